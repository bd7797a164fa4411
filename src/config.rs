//! Optional project configuration.
//!
//! A `quillconfig.json` beside the entry file supplies compile-option
//! defaults; command-line flags win over it.

use anyhow::{Context, Result};
use quill_common::options::{CompileOptions, Target};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "quillconfig.json";

/// The on-disk shape; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectConfig {
    pub target: Option<Target>,
    pub dce: Option<bool>,
    pub debug: Option<bool>,
    /// Default output path.
    pub out: Option<String>,
}

impl ProjectConfig {
    /// Load the config beside `entry`, if present.
    pub fn discover(entry: &Path) -> Result<Self> {
        let dir = entry.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed '{}'", path.display()))
    }

    /// Fold the config into a set of options; `None` fields keep the
    /// given defaults.
    #[must_use]
    pub fn apply(&self, mut options: CompileOptions) -> CompileOptions {
        if let Some(target) = self.target {
            options.target = target;
        }
        if let Some(dce) = self.dce {
            options.dce = dce;
        }
        if let Some(debug) = self.debug {
            options.debug = debug;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_applies_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "target": "wasi", "dce": false }"#,
        )
        .unwrap();
        let entry = dir.path().join("main.ql");
        let config = ProjectConfig::discover(&entry).unwrap();
        let options = config.apply(CompileOptions::default());
        assert_eq!(options.target, Target::Wasi);
        assert!(!options.dce);
        assert!(!options.debug);
    }

    #[test]
    fn missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("main.ql");
        let config = ProjectConfig::discover(&entry).unwrap();
        assert!(config.target.is_none());
    }
}
