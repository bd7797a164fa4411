//! The parser interface.
//!
//! Parsing is an external collaborator: the loader hands it `(path, text)`
//! and a [`NodeIdGen`] and receives back a statement list plus parse
//! diagnostics. The generator guarantees node-id uniqueness across every
//! library of one compilation, which is what lets the semantic side
//! tables share a single keyspace.

use crate::ast::{NodeId, Stmt};
use quill_common::diagnostics::Diagnostic;

/// Issues [`NodeId`]s for one compilation.
#[derive(Debug, Default)]
pub struct NodeIdGen {
    next: u32,
}

impl NodeIdGen {
    #[must_use]
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids issued so far.
    #[must_use]
    pub fn issued(&self) -> u32 {
        self.next
    }
}

/// The result of parsing one library.
#[derive(Debug, Default)]
pub struct ParsedSource {
    pub stmts: Vec<Stmt>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Anything that can turn source text into a Quill AST.
///
/// Implementations must be deterministic and must take every [`NodeId`]
/// from the generator they are handed.
pub trait ParseSource {
    fn parse(&self, path: &str, text: &str, ids: &mut NodeIdGen) -> ParsedSource;
}
