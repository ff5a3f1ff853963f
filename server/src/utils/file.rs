//! File utility functions

use std::path::PathBuf;

/// Expand a user-supplied path (config file, pricing file, data dir) to an
/// absolute path.
///
/// `~` and `~/...` resolve against the home directory; relative paths resolve
/// against the current directory without canonicalizing, so the target need
/// not exist yet. Surrounding whitespace is ignored.
///
/// ```text
/// expand_path("~/.arbor")     // -> /home/user/.arbor
/// expand_path("./prices.json") // -> /current/dir/./prices.json
/// expand_path("/etc/arbor")   // -> /etc/arbor
/// ```
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();

    if path.is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let expanded = match path.strip_prefix('~') {
        Some("") => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => dirs::home_dir()
            .map(|home| home.join(&rest[1..]))
            .unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_absolute_unchanged() {
        assert_eq!(expand_path("/var/lib/arbor"), PathBuf::from("/var/lib/arbor"));
        assert_eq!(expand_path("  /var/lib/arbor  "), PathBuf::from("/var/lib/arbor"));
    }

    #[test]
    fn test_relative_becomes_absolute() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(expand_path("prices.json"), cwd.join("prices.json"));
        assert_eq!(expand_path("../config"), cwd.join("../config"));
        assert!(expand_path("./.arbor").ends_with(".arbor"));
    }

    #[test]
    fn test_tilde_expansion() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_path("~"), home);
        assert_eq!(expand_path("~/.arbor/arbor.json"), home.join(".arbor/arbor.json"));
    }

    #[test]
    fn test_tilde_inside_name_is_literal() {
        let result = expand_path("~backup");
        assert!(result.is_absolute());
        assert!(result.ends_with("~backup"));
    }

    #[test]
    fn test_empty_is_current_dir() {
        assert!(expand_path("").is_absolute());
        assert!(expand_path("   ").is_absolute());
    }
}
