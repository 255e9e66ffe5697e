/// End-to-end scan coordinator tests.
///
/// These drive `ScanCoordinator` through whole sessions: enumeration on the
/// session thread, streamed flushes, the final validation pass and the
/// publish step. The in-memory volume from `common` stands in for NTFS so
/// the Windows-only layouts (drive letters, junctions) behave the same on
/// every host. The last test runs the real directory walker against a
/// `tempfile` tree.
mod common;

use common::{eventually, raw, settle, MemoryVolume, Script, ScriptedEnumerator, TIMEOUT};
use linksleuth_core::model::{LinkStatus, LinkType};
use linksleuth_core::scanner::{ScanCoordinator, ScanEvent, ScanPhase};
use std::sync::Arc;
use std::time::Duration;

const FAST_FLUSH: Duration = Duration::from_millis(10);

// ── Helpers ──────────────────────────────────────────────────────────────────

/// A volume with three links:
///
/// ```text
/// C:\A  -> C:\X   symlink   (X exists)
/// C:\B  -> C:\Y   junction  (Y missing)
/// C:\C  -> C:\Z   hardlink
/// ```
fn example_volume() -> Arc<MemoryVolume> {
    let volume = MemoryVolume::new();
    volume.add_object(r"C:\X");
    volume.add_link(r"C:\A", r"C:\X", LinkType::Symlink);
    volume.add_link(r"C:\B", r"C:\Y", LinkType::Junction);
    volume.add_link(r"C:\C", r"C:\Z", LinkType::Hardlink);
    volume
}

fn coordinator_for(volume: &Arc<MemoryVolume>) -> ScanCoordinator {
    ScanCoordinator::new(volume.clone(), volume.clone()).with_flush_interval(FAST_FLUSH)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn completed_scan_publishes_validated_sorted_snapshot() {
    let volume = example_volume();
    let coordinator = coordinator_for(&volume);

    let session = coordinator.start_scan("C:").unwrap();
    assert_eq!(
        coordinator.wait_for(session.id, TIMEOUT),
        Some(ScanPhase::Completed)
    );

    let snapshot = coordinator.snapshot();
    let summary: Vec<(&str, LinkType, &str)> = snapshot
        .iter()
        .map(|e| (e.path.as_str(), e.link_type, e.status.label()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (r"C:\A", LinkType::Symlink, "Ok"),
            (r"C:\B", LinkType::Junction, "Broken"),
            (r"C:\C", LinkType::Hardlink, "Ok"),
        ]
    );

    let state = coordinator.state();
    assert!(Arc::ptr_eq(&state.entries, &state.streamed));
    assert!(state.error.is_none());
}

#[test]
fn denied_targets_are_not_reported_broken() {
    let volume = MemoryVolume::new();
    volume.deny(r"C:\Secret");
    volume.add_link(r"C:\L", r"C:\Secret\inner", LinkType::Symlink);
    let coordinator = coordinator_for(&volume);

    coordinator.start_scan("C:").unwrap();
    assert_eq!(settle(&coordinator), ScanPhase::Completed);

    let entry = coordinator.find(r"c:\l").expect("link should be in snapshot");
    assert_eq!(entry.status, LinkStatus::AccessDenied);
}

#[test]
fn link_chains_resolve_through_every_level() {
    let volume = MemoryVolume::new();
    volume.add_object(r"C:\real");
    volume.add_link(r"C:\first", r"C:\second", LinkType::Symlink);
    volume.add_link(r"C:\second", r"C:\real", LinkType::Junction);
    volume.add_link(r"C:\dangling", r"C:\gone", LinkType::Symlink);
    volume.add_link(r"C:\via", r"C:\dangling", LinkType::Symlink);
    let coordinator = coordinator_for(&volume);

    coordinator.start_scan("C:").unwrap();
    settle(&coordinator);

    let status = |path: &str| coordinator.find(path).map(|e| e.status);
    assert_eq!(status(r"C:\first"), Some(LinkStatus::Ok));
    assert!(status(r"C:\via").is_some_and(|s| s.is_broken()));
}

#[test]
fn superseded_session_never_reaches_the_snapshot() {
    let (release_a, gate_a) = crossbeam_channel::bounded(1);
    let (enumerator, finished) = ScriptedEnumerator::new(vec![
        (
            "A:",
            Script {
                before: vec![raw(r"A:\early", r"A:\t", LinkType::Symlink)],
                gate: Some(gate_a),
                after: vec![raw(r"A:\late", r"A:\t", LinkType::Symlink)],
                fail: None,
            },
        ),
        (
            "B:",
            Script {
                before: vec![raw(r"B:\one", r"B:\t", LinkType::Symlink)],
                ..Script::default()
            },
        ),
    ]);
    let volume = MemoryVolume::new();
    let coordinator =
        ScanCoordinator::new(Arc::new(enumerator), volume).with_flush_interval(FAST_FLUSH);

    let first = coordinator.start_scan("A:").unwrap();
    let second = coordinator.start_scan("B:").unwrap();
    assert!(second.id > first.id);
    assert!(first.is_cancelled());

    assert_eq!(
        coordinator.wait_for(second.id, TIMEOUT),
        Some(ScanPhase::Completed)
    );
    assert_eq!(
        coordinator.wait_for(first.id, TIMEOUT),
        Some(ScanPhase::Cancelled)
    );

    // Let the superseded enumeration run to the end.
    release_a.send(()).unwrap();
    let mut done = Vec::new();
    while done.len() < 2 {
        done.push(finished.recv_timeout(TIMEOUT).unwrap());
    }
    std::thread::sleep(FAST_FLUSH * 5);

    let state = coordinator.state();
    assert_eq!(state.session, Some(second.id));
    assert_eq!(state.phase, ScanPhase::Completed);
    let paths: Vec<&str> = state.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec![r"B:\one"]);
}

#[test]
fn cancel_discards_streamed_entries() {
    let (release, gate) = crossbeam_channel::bounded(1);
    let (enumerator, finished) = ScriptedEnumerator::new(vec![(
        "C:",
        Script {
            before: vec![raw(r"C:\a", r"C:\t", LinkType::Symlink)],
            gate: Some(gate),
            after: vec![raw(r"C:\b", r"C:\t", LinkType::Symlink)],
            fail: None,
        },
    )]);
    let coordinator = ScanCoordinator::new(Arc::new(enumerator), MemoryVolume::new())
        .with_flush_interval(FAST_FLUSH);

    let session = coordinator.start_scan("C:").unwrap();
    assert!(eventually(|| coordinator.state().streamed.len() == 1));

    coordinator.cancel();
    let state = coordinator.state();
    assert_eq!(state.phase, ScanPhase::Cancelled);
    assert!(state.streamed.is_empty());
    assert!(state.progress.is_none());

    release.send(()).unwrap();
    finished.recv_timeout(TIMEOUT).unwrap();
    std::thread::sleep(FAST_FLUSH * 5);

    let state = coordinator.state();
    assert_eq!(state.phase, ScanPhase::Cancelled);
    assert!(state.entries.is_empty());
    assert!(state.streamed.is_empty());
    assert_eq!(
        coordinator.wait_for(session.id, TIMEOUT),
        Some(ScanPhase::Cancelled)
    );
}

#[test]
fn failed_enumeration_keeps_streamed_entries() {
    let (release, gate) = crossbeam_channel::bounded(1);
    let (enumerator, _finished) = ScriptedEnumerator::new(vec![(
        "C:",
        Script {
            before: vec![raw(r"C:\a", r"C:\t", LinkType::Symlink)],
            gate: Some(gate),
            after: Vec::new(),
            fail: Some("journal disappeared".to_string()),
        },
    )]);
    let coordinator = ScanCoordinator::new(Arc::new(enumerator), MemoryVolume::new())
        .with_flush_interval(FAST_FLUSH);

    coordinator.start_scan("C:").unwrap();
    assert!(eventually(|| coordinator.state().streamed.len() == 1));
    release.send(()).unwrap();

    assert_eq!(settle(&coordinator), ScanPhase::Failed);
    let state = coordinator.state();
    assert!(state
        .error
        .as_deref()
        .is_some_and(|e| e.contains("journal disappeared")));
    assert_eq!(state.streamed.len(), 1);
    assert!(state.entries.is_empty());
}

#[test]
fn duplicate_paths_across_batches_are_kept_once() {
    let (enumerator, _finished) = ScriptedEnumerator::new(vec![(
        "C:",
        Script {
            before: vec![raw(r"C:\Dup", r"C:\first", LinkType::Symlink)],
            after: vec![
                raw(r"c:\dup", r"C:\second", LinkType::Symlink),
                raw(r"C:\other", r"C:\t", LinkType::Symlink),
            ],
            ..Script::default()
        },
    )]);
    let coordinator = ScanCoordinator::new(Arc::new(enumerator), MemoryVolume::new())
        .with_flush_interval(FAST_FLUSH);

    coordinator.start_scan("C:").unwrap();
    assert_eq!(settle(&coordinator), ScanPhase::Completed);

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].path, r"C:\Dup");
    assert_eq!(snapshot[0].target, r"C:\first");
}

#[test]
fn events_follow_the_session_lifecycle() {
    let volume = example_volume();
    let coordinator = coordinator_for(&volume);
    let events = coordinator.events();

    let session = coordinator.start_scan("C:").unwrap();
    let mut seen = Vec::new();
    loop {
        let event = events
            .recv_timeout(TIMEOUT)
            .expect("scan did not finish in time");
        let finished = matches!(event, ScanEvent::Completed { .. } | ScanEvent::Failed { .. });
        seen.push(event);
        if finished {
            break;
        }
    }

    assert!(matches!(
        seen.first(),
        Some(ScanEvent::Started { session: s, volume }) if *s == session.id && volume == "C:"
    ));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ScanEvent::Validating { entries: 3, .. })));
    assert!(matches!(
        seen.last(),
        Some(ScanEvent::Completed { entries: 3, .. })
    ));
}

#[test]
fn rescan_reuses_the_last_volume() {
    let volume = example_volume();
    let coordinator = coordinator_for(&volume);
    assert!(coordinator.rescan().unwrap().is_none());

    coordinator.start_scan("C:").unwrap();
    settle(&coordinator);
    volume.add_link(r"C:\D", r"C:\X", LinkType::Symlink);

    let again = coordinator.rescan().unwrap().expect("a volume was scanned");
    assert_eq!(again.volume, "C:");
    assert_eq!(
        coordinator.wait_for(again.id, TIMEOUT),
        Some(ScanPhase::Completed)
    );
    assert_eq!(coordinator.snapshot().len(), 4);
}

#[cfg(unix)]
#[test]
fn walker_scans_a_real_directory_tree() {
    use linksleuth_core::scanner::walk::WalkEnumerator;
    use linksleuth_core::validator::FsResolver;
    use std::os::unix::fs::symlink;

    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::create_dir(root.join("data")).unwrap();
    std::fs::write(root.join("data").join("file.txt"), b"hello").unwrap();
    symlink(root.join("data").join("file.txt"), root.join("good")).unwrap();
    symlink(root.join("missing"), root.join("bad")).unwrap();

    let enumerator = Arc::new(WalkEnumerator::new(Vec::new()));
    let coordinator =
        ScanCoordinator::new(enumerator, Arc::new(FsResolver)).with_flush_interval(FAST_FLUSH);
    let session = coordinator.start_scan(&root.to_string_lossy()).unwrap();
    assert_eq!(
        coordinator.wait_for(session.id, Duration::from_secs(30)),
        Some(ScanPhase::Completed)
    );

    let good = coordinator
        .find(&root.join("good").to_string_lossy())
        .expect("good link found");
    assert_eq!(good.status, LinkStatus::Ok);
    let bad = coordinator
        .find(&root.join("bad").to_string_lossy())
        .expect("bad link found");
    assert!(bad.status.is_broken());
    assert_eq!(coordinator.snapshot().len(), 2);
}
