//! LinkSleuth: find, validate and manage NTFS links.
//!
//! Thin binary entry point. All logic lives in the `linksleuth-core` crate;
//! this file parses the command line, wires the core services together and
//! prints results.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use linksleuth_core::config::{Config, CONFIG_FILE_NAME};
use linksleuth_core::history::{ActionHistory, JsonlHistoryStore, UndoOutcome, DEFAULT_PAGE_SIZE};
use linksleuth_core::model::{ActionRecord, LinkStatus, LinkType};
use linksleuth_core::mutation::{AuditStatus, FsLinkOperator, MutationEngine, MutationReport};
use linksleuth_core::platform;
use linksleuth_core::scanner::{ScanCoordinator, ScanEvent, ScanPhase, TieredEnumerator};
use linksleuth_core::validator::{details::link_details, FsResolver};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How long the CLI waits for any single scan before giving up.
const SCAN_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// LinkSleuth - find, validate and manage NTFS symlinks, junctions and hardlinks
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults to linksleuth.toml next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List NTFS volumes
    Volumes,

    /// Scan a volume and summarise its links
    Scan {
        /// Volume to scan (defaults to scan.default_volume from the config)
        volume: Option<String>,
    },

    /// Show metadata for one link
    Details {
        path: String,
    },

    /// Create a link
    Create {
        link: String,
        target: String,

        /// Kind of link to create
        #[arg(long = "type", value_enum, default_value_t = LinkKind::Symlink)]
        link_type: LinkKind,

        /// The target is a directory (symlinks only)
        #[arg(long)]
        dir: bool,
    },

    /// Delete a link
    Delete {
        link: String,
    },

    /// Point a symlink or junction elsewhere
    Retarget {
        link: String,
        target: String,
    },

    /// Show recorded actions, newest first
    History {
        #[arg(default_value_t = DEFAULT_PAGE_SIZE)]
        limit: usize,
        #[arg(default_value_t = 0)]
        offset: usize,
    },

    /// Reverse the most recent action
    Undo,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LinkKind {
    Symlink,
    Junction,
    Hardlink,
}

impl From<LinkKind> for LinkType {
    fn from(kind: LinkKind) -> Self {
        match kind {
            LinkKind::Symlink => LinkType::Symlink,
            LinkKind::Junction => LinkType::Junction,
            LinkKind::Hardlink => LinkType::Hardlink,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;
    tracing::info!("LinkSleuth starting (config: {})", config_path.display());

    let app = App::build(&config, &config_path)?;

    let Some(command) = cli.command else {
        if config.scan.auto_scan_on_start {
            return app.scan(&config.scan.default_volume);
        }
        return list_volumes();
    };

    match command {
        Command::Volumes => list_volumes(),
        Command::Scan { volume } => {
            app.scan(volume.as_deref().unwrap_or(&config.scan.default_volume))
        }
        Command::Details { path } => show_details(&path),
        Command::Create {
            link,
            target,
            link_type,
            dir,
        } => {
            let symlink = matches!(link_type, LinkKind::Symlink);
            if symlink && !platform::link_privileges().create_symlinks {
                tracing::warn!(
                    "No SeCreateSymbolicLinkPrivilege: creating a symlink needs Developer Mode"
                );
            }
            app.mutated(app.engine.create(&link, &target, link_type.into(), dir))
        }
        Command::Delete { link } => app.mutated(app.engine.delete(&link)),
        Command::Retarget { link, target } => app.mutated(app.engine.retarget(&link, &target)),
        Command::History { limit, offset } => app.show_history(limit, offset),
        Command::Undo => app.undo(),
    }
}

/// The core services, wired once per run.
struct App {
    coordinator: Arc<ScanCoordinator>,
    engine: Arc<MutationEngine>,
    history: ActionHistory,
}

impl App {
    fn build(config: &Config, config_path: &Path) -> anyhow::Result<Self> {
        let enumerator = Arc::new(TieredEnumerator::for_platform(
            config.scan.excluded_paths.clone(),
        ));
        let coordinator = Arc::new(ScanCoordinator::new(enumerator, Arc::new(FsResolver)));

        let history_path = history_path(config, config_path);
        let store = Arc::new(
            JsonlHistoryStore::open(&history_path)
                .with_context(|| format!("opening history at {}", history_path.display()))?,
        );
        let engine = Arc::new(MutationEngine::new(
            Arc::new(FsLinkOperator),
            store.clone(),
            coordinator.clone(),
        ));
        let history = ActionHistory::new(store, engine.clone());

        Ok(Self {
            coordinator,
            engine,
            history,
        })
    }

    fn scan(&self, volume: &str) -> anyhow::Result<()> {
        if !platform::is_elevated() {
            tracing::warn!("Not elevated: using the directory walker, expect a slower scan");
        }
        let session = self.coordinator.start_scan(volume)?;
        self.finish_scan(session.id)
    }

    /// Follow events for `session` until it ends, then print a summary.
    fn finish_scan(&self, session: linksleuth_core::scanner::SessionId) -> anyhow::Result<()> {
        let events = self.coordinator.events();
        while let Ok(event) = events.recv_timeout(Duration::from_millis(500)) {
            match event {
                ScanEvent::Progress { progress, .. } => {
                    tracing::debug!(
                        "{} scanned, {} links, at {}",
                        progress.scanned,
                        progress.found,
                        progress.current_path
                    );
                }
                ScanEvent::Validating { entries, .. } => {
                    tracing::info!("Validating {entries} links");
                }
                ScanEvent::Completed { .. } | ScanEvent::Failed { .. } => break,
                _ => {}
            }
        }

        match self.coordinator.wait_for(session, SCAN_TIMEOUT) {
            Some(ScanPhase::Completed) => {
                print_summary(&self.coordinator);
                Ok(())
            }
            Some(ScanPhase::Failed) => {
                let state = self.coordinator.state();
                bail!(
                    "Scan failed: {}",
                    state.error.unwrap_or_else(|| "unknown error".to_string())
                )
            }
            Some(phase) => bail!("Scan ended as {phase:?}"),
            None => bail!("Scan did not finish within {} s", SCAN_TIMEOUT.as_secs()),
        }
    }

    fn mutated(
        &self,
        result: Result<MutationReport, linksleuth_core::error::MutationError>,
    ) -> anyhow::Result<()> {
        let report = result?;
        print_report(&report);
        self.after_mutation()
    }

    fn after_mutation(&self) -> anyhow::Result<()> {
        match self.coordinator.state().session {
            Some(session) => self.finish_scan(session),
            None => Ok(()),
        }
    }

    fn show_history(&self, limit: usize, offset: usize) -> anyhow::Result<()> {
        let handle = self.history.load(limit, offset)?;
        handle.wait(LOAD_TIMEOUT).context("history load timed out")?;
        let view = self.history.view();
        if let Some(error) = view.error {
            bail!("Could not read history: {error}");
        }
        if view.records.is_empty() {
            println!("No actions recorded.");
        }
        for record in &view.records {
            println!("{}", format_record(record));
        }
        Ok(())
    }

    fn undo(&self) -> anyhow::Result<()> {
        match self.history.undo_last()? {
            UndoOutcome::NothingToUndo => {
                println!("Nothing to undo.");
                Ok(())
            }
            UndoOutcome::Undone { reversed, report } => {
                println!("Reversed: {}", format_record(&reversed));
                print_report(&report);
                self.after_mutation()
            }
        }
    }
}

fn list_volumes() -> anyhow::Result<()> {
    let volumes = platform::enumerate_volumes();
    if volumes.is_empty() {
        println!("No NTFS volumes found.");
    }
    for volume in volumes {
        println!(
            "{:<4} {:<20} {:>8.1} GiB free of {:.1} GiB",
            volume.letter,
            volume.label,
            gib(volume.free_bytes),
            gib(volume.total_bytes)
        );
    }
    Ok(())
}

fn show_details(path: &str) -> anyhow::Result<()> {
    let details = link_details(path).with_context(|| format!("reading {path}"))?;
    println!("Path:        {}", details.path);
    println!("Type:        {}", details.link_type.label());
    println!("Object:      {:?}", details.object_type);
    println!("Target:      {}", details.target_stored);
    println!("Resolved:    {}", details.target_real);
    println!("Status:      {}", status_text(&details.status));
    println!("Created:     {}", details.created_at);
    println!("Modified:    {}", details.modified_at);
    println!(
        "Owner:       {}",
        details.owner.as_deref().unwrap_or("(unknown)")
    );
    println!("Attributes:  {}", details.attributes.join(", "));
    Ok(())
}

fn print_summary(coordinator: &ScanCoordinator) {
    let state = coordinator.state();
    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in state.entries.iter() {
        *by_type.entry(entry.link_type.label()).or_default() += 1;
        *by_status.entry(entry.status.label()).or_default() += 1;
    }

    println!(
        "{} links on {} ({})",
        state.entries.len(),
        state.volume.as_deref().unwrap_or("?"),
        state.strategy.map_or("unknown", |s| s.label())
    );
    for (label, count) in by_type.iter().chain(by_status.iter()) {
        println!("  {label:<14} {count}");
    }
    for entry in state.entries.iter().filter(|e| e.status.is_broken()) {
        println!(
            "  BROKEN {} -> {} ({})",
            entry.path,
            entry.target,
            status_text(&entry.status)
        );
    }
}

fn print_report(report: &MutationReport) {
    println!("{} {}: done", report.action.label(), report.path);
    if let AuditStatus::Missing(reason) = &report.audit {
        eprintln!("warning: the action was not recorded in history: {reason}");
    }
}

fn format_record(record: &ActionRecord) -> String {
    let outcome = if record.success { "ok" } else { "FAILED" };
    let mut line = format!(
        "#{:<5} {} {:<8} {:<8} {}",
        record.id,
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.action_type.label(),
        outcome,
        record.link_path
    );
    match (&record.target_old, &record.target_new) {
        (Some(old), Some(new)) => line.push_str(&format!(" ({old} -> {new})")),
        (None, Some(new)) => line.push_str(&format!(" -> {new}")),
        (Some(old), None) => line.push_str(&format!(" (was -> {old})")),
        (None, None) => {}
    }
    if let Some(undone) = record.undoes {
        line.push_str(&format!(" [undoes #{undone}]"));
    }
    if let Some(error) = &record.error_msg {
        line.push_str(&format!(": {error}"));
    }
    line
}

fn status_text(status: &LinkStatus) -> String {
    match status {
        LinkStatus::Broken(reason) => format!("Broken: {reason}"),
        other => other.label().to_string(),
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// `linksleuth.toml` next to the executable, or in the working directory
/// when the executable path is unknown.
fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

fn history_path(config: &Config, config_path: &Path) -> PathBuf {
    let file = PathBuf::from(&config.history.file);
    if file.is_absolute() {
        return file;
    }
    config_path
        .parent()
        .map(|dir| dir.join(&file))
        .unwrap_or(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_defaults_to_a_file_symlink() {
        let cli = Cli::try_parse_from(["linksleuth", "create", r"C:\l", r"C:\t"]).unwrap();
        match cli.command {
            Some(Command::Create {
                link,
                target,
                link_type,
                dir,
            }) => {
                assert_eq!(link, r"C:\l");
                assert_eq!(target, r"C:\t");
                assert_eq!(LinkType::from(link_type), LinkType::Symlink);
                assert!(!dir);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn create_accepts_a_link_type() {
        let cli = Cli::try_parse_from([
            "linksleuth", "create", r"C:\l", r"C:\t", "--type", "junction",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Create {
                link_type: LinkKind::Junction,
                ..
            })
        ));
    }

    #[test]
    fn unknown_link_type_is_rejected() {
        let err =
            Cli::try_parse_from(["linksleuth", "create", "a", "b", "--type", "shortcut"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn history_paging_defaults() {
        let cli = Cli::try_parse_from(["linksleuth", "history"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::History {
                limit: DEFAULT_PAGE_SIZE,
                offset: 0
            })
        ));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["linksleuth", "undo", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("x.toml")));
        assert!(matches!(cli.command, Some(Command::Undo)));
    }
}
