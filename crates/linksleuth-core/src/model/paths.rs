//! NTFS path helpers - normalisation, absolute-path checks, volume identity.
//!
//! These work on strings rather than `std::path::Path` because the rules are
//! NTFS rules (drive letters, UNC shares, case-insensitive names) regardless
//! of the host the code is compiled for.

/// The NTFS path separator.
pub const SEPARATOR: char = '\\';

const VERBATIM_UNC_PREFIX: &str = r"\\?\UNC\";
const VERBATIM_PREFIX: &str = r"\\?\";

/// Trim surrounding whitespace and convert forward slashes to backslashes.
pub fn normalize(path: &str) -> String {
    path.trim().replace('/', "\\")
}

/// Case-insensitive identity of a path, used to key snapshot entries.
///
/// Trailing separators are ignored so `C:\Links\` and `c:\links` collide.
pub fn key(path: &str) -> String {
    let normalized = normalize(path);
    let trimmed = strip_trailing_separators(&normalized);
    trimmed.to_lowercase()
}

/// `true` for drive-letter (`C:\...`) and UNC (`\\server\share\...`) paths,
/// including their `\\?\` verbatim spellings.
pub fn is_absolute(path: &str) -> bool {
    let path = normalize(path);
    if let Some(rest) = path.strip_prefix(VERBATIM_UNC_PREFIX) {
        return unc_share(rest).is_some();
    }
    if let Some(rest) = path.strip_prefix(VERBATIM_PREFIX) {
        return drive_letter(rest).is_some() && rest.as_bytes().get(2) == Some(&b'\\');
    }
    if let Some(rest) = path.strip_prefix(r"\\") {
        return unc_share(rest).is_some();
    }
    drive_letter(&path).is_some() && path.as_bytes().get(2) == Some(&b'\\')
}

/// The volume a path lives on: `C:` for drive paths, `\\server\share`
/// (lower-cased) for UNC paths. `None` for relative paths.
pub fn volume_of(path: &str) -> Option<String> {
    let path = normalize(path);
    if let Some(rest) = path.strip_prefix(VERBATIM_UNC_PREFIX) {
        return unc_share(rest).map(|share| format!(r"\\{}", share.to_lowercase()));
    }
    let path = path.strip_prefix(VERBATIM_PREFIX).unwrap_or(path.as_str());
    if let Some(rest) = path.strip_prefix(r"\\") {
        return unc_share(rest).map(|share| format!(r"\\{}", share.to_lowercase()));
    }
    drive_letter(path).map(|letter| format!("{letter}:"))
}

/// Normalise a user-supplied drive (`C`, `c:`, `C:\`, `C:/`) to its root
/// form `C:\`. Anything else is rejected.
pub fn normalize_drive(drive: &str) -> Option<String> {
    let trimmed = drive.trim();
    let mut chars = trimmed.chars();
    let letter = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    match chars.next() {
        None => return Some(format!("{}:\\", letter.to_ascii_uppercase())),
        Some(':') => {}
        Some(_) => return None,
    }
    let remainder = chars.as_str();
    if !remainder.chars().all(|c| c == '\\' || c == '/') {
        return None;
    }
    Some(format!("{}:\\", letter.to_ascii_uppercase()))
}

/// Whether `path` equals, or lies beneath, one of the `excluded` paths.
///
/// Matching is case-insensitive and on whole components, so excluding
/// `C:\Win` does not exclude `C:\Windows`.
pub fn is_excluded(path: &str, excluded: &[String]) -> bool {
    let path_key = key(path);
    excluded.iter().any(|item| {
        let excluded_key = key(item);
        if excluded_key.is_empty() {
            return false;
        }
        if path_key == excluded_key {
            return true;
        }
        path_key
            .strip_prefix(&excluded_key)
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    })
}

/// Strip the `\\?\` and `\\?\UNC\` prefixes that canonicalisation adds.
pub fn display_form(path: &str) -> String {
    if let Some(rest) = path.strip_prefix(VERBATIM_UNC_PREFIX) {
        return format!(r"\\{rest}");
    }
    if let Some(rest) = path.strip_prefix(VERBATIM_PREFIX) {
        return rest.to_string();
    }
    path.to_string()
}

fn strip_trailing_separators(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    // Keep the separator of a drive root: `C:\` must not become `C:`.
    if trimmed.len() == 2 && trimmed.ends_with(':') && path.len() > 2 {
        &path[..3]
    } else {
        trimmed
    }
}

fn drive_letter(path: &str) -> Option<char> {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some((bytes[0] as char).to_ascii_uppercase())
    } else {
        None
    }
}

/// Parse `server\share[\...]` and return `server\share`.
fn unc_share(rest: &str) -> Option<&str> {
    let mut parts = rest.splitn(3, SEPARATOR);
    let server = parts.next().filter(|s| !s.is_empty())?;
    let share = parts.next().filter(|s| !s.is_empty())?;
    Some(&rest[..server.len() + 1 + share.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_converts_slashes_and_trims() {
        assert_eq!(normalize("  C:/links/a  "), r"C:\links\a");
    }

    #[test]
    fn drive_and_unc_paths_are_absolute() {
        assert!(is_absolute(r"C:\links\a"));
        assert!(is_absolute("d:/data"));
        assert!(is_absolute(r"\\server\share\dir"));
        assert!(is_absolute(r"\\?\C:\links"));
        assert!(is_absolute(r"\\?\UNC\server\share\x"));
    }

    #[test]
    fn relative_and_malformed_paths_are_not_absolute() {
        assert!(!is_absolute(r"links\a"));
        assert!(!is_absolute("C:relative"));
        assert!(!is_absolute(r"\\server"));
        assert!(!is_absolute(r"\\\share"));
        assert!(!is_absolute(""));
    }

    #[test]
    fn volume_identity() {
        assert_eq!(volume_of(r"c:\a\b").as_deref(), Some("C:"));
        assert_eq!(volume_of(r"\\?\D:\x").as_deref(), Some("D:"));
        assert_eq!(
            volume_of(r"\\Server\Share\dir").as_deref(),
            Some(r"\\server\share")
        );
        assert_eq!(volume_of(r"relative\path"), None);
    }

    #[test]
    fn keys_ignore_case_and_trailing_separator() {
        assert_eq!(key(r"C:\Links\A\"), key("c:/links/a"));
        assert_eq!(key(r"C:\"), r"c:\");
    }

    #[test]
    fn drive_normalisation() {
        assert_eq!(normalize_drive("c").as_deref(), Some(r"C:\"));
        assert_eq!(normalize_drive("C:").as_deref(), Some(r"C:\"));
        assert_eq!(normalize_drive(r" d:\ ").as_deref(), Some(r"D:\"));
        assert_eq!(normalize_drive("e:/").as_deref(), Some(r"E:\"));
        assert_eq!(normalize_drive(r"C:\Windows"), None);
        assert_eq!(normalize_drive("1:"), None);
        assert_eq!(normalize_drive(""), None);
    }

    #[test]
    fn exclusion_matches_whole_components() {
        let excluded = vec![r"C:\Windows\WinSxS".to_string()];
        assert!(is_excluded(r"c:\windows\winsxs", &excluded));
        assert!(is_excluded(r"C:\Windows\WinSxS\amd64\x.dll", &excluded));
        assert!(!is_excluded(r"C:\Windows\WinSxSBackup", &excluded));
        assert!(!is_excluded(r"C:\Users", &excluded));
    }

    #[test]
    fn empty_exclusions_never_match() {
        assert!(!is_excluded(r"C:\x", &[String::new()]));
    }

    #[test]
    fn display_form_strips_verbatim_prefixes() {
        assert_eq!(display_form(r"\\?\C:\a"), r"C:\a");
        assert_eq!(display_form(r"\\?\UNC\srv\share"), r"\\srv\share");
        assert_eq!(display_form("/tmp/a"), "/tmp/a");
    }
}
