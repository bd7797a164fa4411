//! AST node types and the parser interface for the Quill compiler.
//!
//! The parser itself is an external collaborator: anything that can turn
//! source text into the trees defined here can drive the pipeline. Node
//! identity is a stable [`NodeId`] issued by a per-compilation
//! [`NodeIdGen`]; all semantic facts (resolved bindings, inferred types)
//! live in side tables keyed by those ids, never on the nodes themselves.

pub mod ast;
pub mod build;
pub mod source;

pub use ast::*;
pub use build::AstBuilder;
pub use source::{NodeIdGen, ParseSource, ParsedSource};
