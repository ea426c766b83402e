//! Where to look for chat session files.
//!
//! Locating the editor's storage layout is not this crate's job: callers
//! supply the root through a [`PathResolver`]. The binary uses
//! [`ConfiguredRoot`], which takes the path from the merged configuration.

use std::path::PathBuf;

/// Errors resolving the directory to watch.
#[derive(Debug, thiserror::Error)]
pub enum RootError {
    #[error("no session root configured; pass --root or set `root` in the config file")]
    NotConfigured,
    #[error("session root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

/// Supplies the directory tree to scan and watch.
pub trait PathResolver {
    fn resolve_root(&self) -> Result<PathBuf, RootError>;
}

/// A root taken verbatim from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredRoot(Option<PathBuf>);

impl ConfiguredRoot {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self(root)
    }
}

impl PathResolver for ConfiguredRoot {
    fn resolve_root(&self) -> Result<PathBuf, RootError> {
        let root = self.0.clone().ok_or(RootError::NotConfigured)?;
        if root.is_dir() {
            Ok(root)
        } else {
            Err(RootError::NotADirectory(root))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_root_is_not_configured() {
        let err = ConfiguredRoot::new(None).resolve_root().unwrap_err();
        assert!(matches!(err, RootError::NotConfigured));
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("x.json");
        std::fs::write(&file, "{}").unwrap();

        match ConfiguredRoot::new(Some(file.clone())).resolve_root() {
            Err(RootError::NotADirectory(p)) => assert_eq!(p, file),
            other => panic!("expected NotADirectory, got: {:?}", other),
        }
    }

    #[test]
    fn test_existing_directory_resolves() {
        let tmp = TempDir::new().unwrap();
        let root = ConfiguredRoot::new(Some(tmp.path().to_path_buf()))
            .resolve_root()
            .unwrap();
        assert_eq!(root, tmp.path());
    }
}
