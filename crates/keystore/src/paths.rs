//! Keystore path helpers

use std::path::{Path, PathBuf};

/// Expand a path, replacing a leading `~` with the user's home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// Default keystore directory.
///
/// - Linux: `$XDG_DATA_HOME/veilnet/keys` or `~/.local/share/veilnet/keys`
/// - macOS: `~/Library/Application Support/Veilnet/keys`
/// - elsewhere: `~/.veilnet/keys`
pub fn default_keystore_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                home_dir()
                    .map(|h| h.join(".local/share"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("veilnet/keys")
    }
    #[cfg(target_os = "macos")]
    {
        home_dir()
            .map(|h| h.join("Library/Application Support/Veilnet/keys"))
            .unwrap_or_else(|| PathBuf::from(".veilnet/keys"))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        home_dir()
            .map(|h| h.join(".veilnet/keys"))
            .unwrap_or_else(|| PathBuf::from(".veilnet/keys"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_absolute() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path), path);
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path(&PathBuf::from("~/keys/node.key"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("keys/node.key"));
    }

    #[test]
    fn test_default_keystore_dir_ends_with_keys() {
        assert!(default_keystore_dir().ends_with("keys"));
    }
}
