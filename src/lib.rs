//! The Quill compiler.
//!
//! A whole-program compiler for a statically-typed, class-based
//! language targeting WebAssembly GC. Compilation starts from one entry
//! library, transitively loads every dependency, type-checks the whole
//! program in dependency order, and emits a single module using the GC,
//! exception-handling, and typed-function-references proposals.
//!
//! The lexer/parser is an external collaborator: anything implementing
//! [`quill_ast::ParseSource`] can feed the pipeline. The host supplies
//! source text through [`quill_loader::Host`].

pub mod config;
pub mod host;
pub mod stdlib;

pub use quill_ast as ast;
pub use quill_checker as checker;
pub use quill_codegen as codegen;
pub use quill_common as common;
pub use quill_loader as loader;
pub use quill_sema as sema;
pub use quill_types as types;

use quill_ast::ParseSource;
use quill_checker::{Program, check_program};
use quill_common::diagnostics::{Diagnostic, ErrorCode};
use quill_common::options::CompileOptions;
use quill_loader::{Host, LibraryGraph, Loader};
use tracing::info;

/// The result of one compilation.
pub struct CompileResult {
    /// The dependency graph, dependency-first.
    pub graph: LibraryGraph,
    /// The checked program state (types, declarations, side tables).
    pub program: Program,
    /// Every diagnostic, in emission order.
    pub diagnostics: Vec<Diagnostic>,
    /// The emitted module; absent when errors were reported.
    pub output: Option<Vec<u8>>,
}

impl CompileResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }
}

/// Compile the program rooted at `entry`.
pub fn compile(
    entry: &str,
    host: &dyn Host,
    parser: &dyn ParseSource,
    options: &CompileOptions,
) -> anyhow::Result<CompileResult> {
    info!(entry, "compiling");
    let mut loader = Loader::new(host, parser);
    let graph = loader.compute_graph(entry)?;
    info!(libraries = graph.libraries.len(), "loaded");

    let mut program = Program::new();
    check_program(&graph, &mut program);

    let output = if program.sema.has_errors() {
        None
    } else {
        match quill_codegen::generate(&program, &graph, options) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                // Codegen failures are fatal for the compile; surface
                // them as a diagnostic on the entry library.
                program.sema.report(Diagnostic::error(
                    ErrorCode::CodegenFailure,
                    format!("code generation failed: {err}"),
                ));
                None
            }
        }
    };

    let diagnostics = program.sema.take_diagnostics();
    Ok(CompileResult {
        graph,
        program,
        diagnostics,
        output,
    })
}
