//! Library loading for the Quill compiler.
//!
//! A library is a single source file identified by canonical path; it is
//! the unit of caching and of the topological sort. The loader parses
//! each library exactly once, memoises the record by path, and builds
//! the dependency graph the checker walks.

pub mod host;
pub mod loader;

pub use host::{Host, MemoryHost, resolve_specifier};
pub use loader::{Library, LibraryGraph, Loader};

/// Canonical-path prefix of standard-library modules.
pub const STDLIB_PREFIX: &str = "std/";

/// Source-file extension, auto-appended to extension-less specifiers.
pub const SOURCE_EXT: &str = ".ql";
