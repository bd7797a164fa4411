//! Compiler options shared by the driver and the pipeline.
//!
//! This module lives in quill-common so that the checker and the code
//! generator can reference options without depending on the CLI crate.

use serde::{Deserialize, Serialize};

/// Which host environment the emitted module is linked against.
///
/// The module shape is identical for both targets; the target picks the
/// import namespace for host helpers and the export naming of the
/// exception tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Browser,
    Wasi,
}

impl Target {
    /// Import namespace used for host-provided functions.
    #[must_use]
    pub fn import_namespace(self) -> &'static str {
        match self {
            Target::Browser => "env",
            Target::Wasi => "wasi_snapshot_preview1",
        }
    }
}

/// Options for one compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Host environment for the emitted module.
    pub target: Target,
    /// When true, unreachable functions, globals, and types are dropped
    /// from the output.
    pub dce: bool,
    /// When true, original names are embedded in the name section.
    pub debug: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: Target::Browser,
            dce: true,
            debug: false,
        }
    }
}
