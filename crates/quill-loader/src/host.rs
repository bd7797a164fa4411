//! The host abstraction.
//!
//! The compiler never touches the file system directly: a [`Host`] maps
//! import specifiers to canonical paths and canonical paths to text.
//! Failures propagate unchanged to the caller.

use crate::{SOURCE_EXT, STDLIB_PREFIX};
use anyhow::{Result, bail};
use rustc_hash::FxHashMap;

/// Resolves specifiers and supplies source text.
pub trait Host {
    /// Resolve a written import specifier against the importing library's
    /// canonical path.
    fn resolve(&self, specifier: &str, referrer: &str) -> Result<String>;

    /// Load the text of a library by canonical path.
    fn load(&self, path: &str) -> Result<String>;
}

/// Shared specifier-resolution rules:
/// `./p` and `../p` resolve against the referrer's directory with the
/// source extension auto-appended, `stdlib:name` resolves into the
/// standard-library namespace. Anything else is the host's business.
#[must_use]
pub fn resolve_specifier(specifier: &str, referrer: &str) -> Option<String> {
    if let Some(name) = specifier.strip_prefix("stdlib:") {
        return Some(format!("{STDLIB_PREFIX}{name}{SOURCE_EXT}"));
    }
    if !specifier.starts_with("./") && !specifier.starts_with("../") {
        return None;
    }

    // Directory of the referrer.
    let mut segments: Vec<&str> = match referrer.rfind('/') {
        Some(idx) => referrer[..idx].split('/').collect(),
        None => Vec::new(),
    };

    for part in specifier.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    let mut path = segments.join("/");
    if !path.ends_with(SOURCE_EXT) {
        path.push_str(SOURCE_EXT);
    }
    Some(path)
}

/// An in-memory host backed by a path -> text map.
#[derive(Default)]
pub struct MemoryHost {
    files: FxHashMap<String, String>,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, text: &str) -> &mut Self {
        self.files.insert(path.to_string(), text.to_string());
        self
    }
}

impl Host for MemoryHost {
    fn resolve(&self, specifier: &str, referrer: &str) -> Result<String> {
        match resolve_specifier(specifier, referrer) {
            Some(path) => Ok(path),
            None => bail!("cannot resolve specifier '{specifier}' from '{referrer}'"),
        }
    }

    fn load(&self, path: &str) -> Result<String> {
        match self.files.get(path) {
            Some(text) => Ok(text.clone()),
            None => bail!("file not found: '{path}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_specifiers_resolve_against_referrer_dir() {
        assert_eq!(
            resolve_specifier("./util", "app/main.ql").as_deref(),
            Some("app/util.ql")
        );
        assert_eq!(
            resolve_specifier("../shared/log", "app/sub/main.ql").as_deref(),
            Some("app/shared/log.ql")
        );
        assert_eq!(
            resolve_specifier("./util.ql", "main.ql").as_deref(),
            Some("util.ql")
        );
    }

    #[test]
    fn stdlib_specifiers_resolve_into_std_namespace() {
        assert_eq!(
            resolve_specifier("stdlib:core", "app/main.ql").as_deref(),
            Some("std/core.ql")
        );
    }

    #[test]
    fn bare_specifiers_are_rejected() {
        assert_eq!(resolve_specifier("util", "main.ql"), None);
    }

    #[test]
    fn missing_file_is_a_host_error() {
        let host = MemoryHost::new();
        assert!(host.load("nope.ql").is_err());
    }
}
