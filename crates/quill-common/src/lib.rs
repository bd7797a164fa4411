//! Common types and utilities for the Quill compiler.
//!
//! This crate provides foundational types used across all quill crates:
//! - Source spans (`Span`, `Spanned`)
//! - Position/line-map types for line/column source locations
//! - Diagnostic records, error codes, and the canonical printed form
//! - Compiler options shared by the driver and the pipeline

// Span - Source location tracking (byte offsets)
pub mod span;
pub use span::{Span, Spanned};

// Position/LineMap types for line/column source locations
pub mod position;
pub use position::{LineMap, Position, SourceLocation};

// Diagnostic records and error codes
pub mod diagnostics;
pub use diagnostics::{Diagnostic, ErrorCode, Severity};

// Compiler options
pub mod options;
pub use options::{CompileOptions, Target};
