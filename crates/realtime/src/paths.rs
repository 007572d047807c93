//! Path resolution for Portal's local data.
//!
//! Resolved once at startup from: CLI `--data-dir` > `PORTAL_DATA_DIR` env >
//! `~/.portal`. Clap folds the first two together, so callers pass whatever
//! it produced.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

const DEFAULT_DIR_NAME: &str = ".portal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// `explicit` if given, else `~/.portal`.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => dirs::home_dir()
                .context("home directory not found; pass --data-dir")?
                .join(DEFAULT_DIR_NAME),
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Saved session used by `portal whoami`
    pub fn session_path(&self) -> PathBuf {
        self.root.join("session.json")
    }

    /// Create the data dir and its subdirectories.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = DataPaths::resolve(Some(tmp.path())).expect("resolve");

        assert_eq!(paths.root(), tmp.path());
        assert_eq!(paths.log_dir(), tmp.path().join("logs"));
        assert_eq!(paths.session_path(), tmp.path().join("session.json"));
    }

    #[test]
    fn ensure_dirs_creates_layout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = DataPaths::resolve(Some(&tmp.path().join("nested"))).expect("resolve");

        paths.ensure_dirs().expect("ensure dirs");
        assert!(paths.log_dir().is_dir());
        // idempotent
        paths.ensure_dirs().expect("ensure dirs again");
    }
}
