//! Path helpers shared by the CLI and the config loader.

use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` to the home directory.
///
/// Returns the path unchanged if it has no `~` prefix or no home directory is
/// known.
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Normalize path, falling back to the original if canonicalization fails.
pub fn normalize_or_original(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Turn a user-supplied file argument into a backend key.
///
/// Relative arguments are keys already. Absolute ones must lie inside `root`
/// and are made relative to it; `None` otherwise.
pub fn key_for_path(arg: &str, root: &Path) -> Option<String> {
    let path = Path::new(arg);
    if !path.is_absolute() {
        return Some(arg.to_string());
    }
    let root = normalize_or_original(root);
    let rel = path.strip_prefix(&root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/.linkstore/data");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".linkstore/data"));
        }
        assert_eq!(expand_home("/srv/data"), PathBuf::from("/srv/data"));
        assert_eq!(expand_home("~user/data"), PathBuf::from("~user/data"));
    }

    #[test]
    fn test_normalize_or_original_returns_original_on_failure() {
        let fake_path = Path::new("/nonexistent/path/file.txt");
        assert_eq!(normalize_or_original(fake_path), fake_path);
    }

    #[test]
    fn test_key_for_path() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();

        assert_eq!(key_for_path("vm1/disk.vhd", &root).as_deref(), Some("vm1/disk.vhd"));
        let inside = root.join("vm1/disk.vhd");
        assert_eq!(
            key_for_path(inside.to_str().unwrap(), &root).as_deref(),
            Some("vm1/disk.vhd")
        );
        assert_eq!(key_for_path("/elsewhere/file", &root), None);
        assert_eq!(key_for_path(root.to_str().unwrap(), &root), None);
    }
}
