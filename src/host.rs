//! The default file-system host.
//!
//! Canonical paths are workspace-relative with `/` separators; the host
//! roots them at a base directory. Standard-library paths resolve into
//! the built-in blob registry instead of the file system.

use crate::stdlib;
use anyhow::{Context, Result, bail};
use quill_loader::{Host, STDLIB_PREFIX, resolve_specifier};
use std::path::PathBuf;

/// Host backed by a directory tree plus the built-in standard library.
pub struct FsHost {
    root: PathBuf,
}

impl FsHost {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Host for FsHost {
    fn resolve(&self, specifier: &str, referrer: &str) -> Result<String> {
        match resolve_specifier(specifier, referrer) {
            Some(path) => Ok(path),
            None => bail!("cannot resolve specifier '{specifier}' from '{referrer}'"),
        }
    }

    fn load(&self, path: &str) -> Result<String> {
        if path.starts_with(STDLIB_PREFIX) {
            return stdlib::source(path)
                .map(str::to_string)
                .with_context(|| format!("unknown standard library '{path}'"));
        }
        let full = self.root.join(path);
        std::fs::read_to_string(&full)
            .with_context(|| format!("cannot read '{}'", full.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_files_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.ql"), "let x = 1;").unwrap();
        let host = FsHost::new(dir.path());
        assert_eq!(host.load("main.ql").unwrap(), "let x = 1;");
        assert!(host.load("missing.ql").is_err());
    }

    #[test]
    fn stdlib_paths_bypass_the_file_system() {
        let dir = tempfile::tempdir().unwrap();
        let host = FsHost::new(dir.path());
        assert!(host.load("std/core.ql").is_ok());
    }
}
