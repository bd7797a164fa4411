//! The library loader and dependency graph.
//!
//! `load` is idempotent: the first call for a path parses the text and
//! caches the record; every later call returns the same `Arc`. While a
//! record is being built its path is marked in-flight, so import
//! back-edges terminate instead of looping; the cycle itself is reported
//! by `compute_graph`, not here.

use crate::STDLIB_PREFIX;
use crate::host::Host;
use anyhow::Result;
use quill_ast::{NodeIdGen, ParseSource, Stmt, StmtKind};
use quill_common::diagnostics::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::debug;

/// One loaded library. Never mutated after cache insertion.
#[derive(Debug)]
pub struct Library {
    /// Canonical path; the identity of the library.
    pub path: String,
    /// Whether this is a standard-library module.
    pub is_stdlib: bool,
    /// Original text as supplied by the host.
    pub text: String,
    /// Parsed statement list.
    pub stmts: Vec<Stmt>,
    /// Written import specifier -> resolved canonical path.
    pub imports: FxHashMap<String, String>,
    /// Resolved canonical paths in import order (deduplicated).
    pub import_order: Vec<String>,
    /// Diagnostics produced while parsing this library.
    pub parse_diagnostics: Vec<Diagnostic>,
}

/// The topologically sorted dependency graph of one compilation.
#[derive(Debug)]
pub struct LibraryGraph {
    /// Dependency-first postorder. When `has_cycle` is set the order is
    /// a best-effort postorder.
    pub libraries: Vec<Arc<Library>>,
    pub has_cycle: bool,
    /// Canonical paths of the libraries participating in a cycle.
    pub cycle_participants: Vec<String>,
}

impl LibraryGraph {
    /// Position of a library in the checking order.
    #[must_use]
    pub fn position(&self, path: &str) -> Option<usize> {
        self.libraries.iter().position(|l| l.path == path)
    }
}

/// Memoising loader over a host and a parser.
pub struct Loader<'a> {
    host: &'a dyn Host,
    parser: &'a dyn ParseSource,
    ids: NodeIdGen,
    cache: FxHashMap<String, Arc<Library>>,
    /// Paths currently being built on the load stack.
    in_flight: FxHashSet<String>,
}

impl<'a> Loader<'a> {
    pub fn new(host: &'a dyn Host, parser: &'a dyn ParseSource) -> Self {
        Self {
            host,
            parser,
            ids: NodeIdGen::new(),
            cache: FxHashMap::default(),
            in_flight: FxHashSet::default(),
        }
    }

    /// The node-id generator, shared by every library of this compilation.
    pub fn ids_mut(&mut self) -> &mut NodeIdGen {
        &mut self.ids
    }

    /// Load a library by canonical path, parsing it at most once.
    ///
    /// Host failures (missing path, I/O) propagate unchanged. Parse
    /// failures are stored on the record and do not fail the load.
    pub fn load(&mut self, path: &str) -> Result<Arc<Library>> {
        if let Some(record) = self.cache.get(path) {
            debug!(path, "library cache hit");
            return Ok(record.clone());
        }
        if self.in_flight.contains(path) {
            // Import back-edge: the record is being built further up the
            // stack. The caller only needs the path mapping, which it
            // already has, so surface the skeleton by finishing later.
            anyhow::bail!("library '{path}' is part of an import cycle still being loaded");
        }

        debug!(path, "loading library");
        let text = self.host.load(path)?;
        self.in_flight.insert(path.to_string());

        let parsed = self.parser.parse(path, &text, &mut self.ids);

        // Resolve every written specifier before recursing so back-edges
        // see a consistent import map.
        let mut imports = FxHashMap::default();
        let mut import_order = Vec::new();
        let parse_diagnostics = parsed.diagnostics;
        for stmt in &parsed.stmts {
            if let StmtKind::Import(import) = &stmt.kind {
                if imports.contains_key(&import.specifier) {
                    continue;
                }
                match self.host.resolve(&import.specifier, path) {
                    Ok(resolved) => {
                        if !import_order.contains(&resolved) {
                            import_order.push(resolved.clone());
                        }
                        imports.insert(import.specifier.clone(), resolved);
                    }
                    Err(err) => {
                        self.in_flight.remove(path);
                        return Err(err);
                    }
                }
            }
        }

        // Recurse into imports; a back-edge to an in-flight path is not
        // an error at load time. Parse failures live on the dependency's
        // record, so only host failures can propagate from here.
        for dep in import_order.clone() {
            if self.in_flight.contains(&dep) {
                continue;
            }
            if let Err(err) = self.load(&dep) {
                self.in_flight.remove(path);
                return Err(err);
            }
        }

        self.in_flight.remove(path);
        let record = Arc::new(Library {
            path: path.to_string(),
            is_stdlib: path.starts_with(STDLIB_PREFIX),
            text,
            stmts: parsed.stmts,
            imports,
            import_order,
            parse_diagnostics,
        });
        self.cache.insert(path.to_string(), record.clone());
        Ok(record)
    }

    /// Load the entry library and every transitive dependency, and
    /// produce the dependency-first postorder.
    pub fn compute_graph(&mut self, entry: &str) -> Result<LibraryGraph> {
        self.load(entry)?;

        let mut order = Vec::new();
        let mut visited = FxHashSet::default();
        let mut on_stack = FxHashSet::default();
        let mut cycle_participants = Vec::new();
        let mut has_cycle = false;

        self.postorder(
            entry,
            &mut order,
            &mut visited,
            &mut on_stack,
            &mut cycle_participants,
            &mut has_cycle,
        );

        let libraries = order
            .into_iter()
            .map(|path| self.cache[&path].clone())
            .collect();

        Ok(LibraryGraph {
            libraries,
            has_cycle,
            cycle_participants,
        })
    }

    fn postorder(
        &mut self,
        path: &str,
        order: &mut Vec<String>,
        visited: &mut FxHashSet<String>,
        on_stack: &mut FxHashSet<String>,
        cycle_participants: &mut Vec<String>,
        has_cycle: &mut bool,
    ) {
        if on_stack.contains(path) {
            *has_cycle = true;
            if !cycle_participants.iter().any(|p| p == path) {
                cycle_participants.push(path.to_string());
            }
            return;
        }
        if !visited.insert(path.to_string()) {
            return;
        }

        on_stack.insert(path.to_string());
        let deps = match self.cache.get(path) {
            Some(record) => record.import_order.clone(),
            None => {
                // A dependency that failed to load earlier; it cannot
                // contribute edges.
                Vec::new()
            }
        };
        for dep in deps {
            // Dependencies discovered only during graph computation (a
            // back-edge target that finished later) still need loading.
            if !self.cache.contains_key(&dep) {
                let _ = self.load(&dep);
            }
            self.postorder(&dep, order, visited, on_stack, cycle_participants, has_cycle);
        }
        on_stack.remove(path);
        if self.cache.contains_key(path) {
            order.push(path.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use quill_ast::{AstBuilder, ParsedSource};

    /// Minimal line-oriented parser for loader tests: each line is either
    /// `import <specifier>` or ignored.
    struct LineParser;

    impl ParseSource for LineParser {
        fn parse(&self, _path: &str, text: &str, ids: &mut NodeIdGen) -> ParsedSource {
            let mut b = AstBuilder::new(ids);
            let stmts = text
                .lines()
                .filter_map(|line| {
                    let spec = line.strip_prefix("import ")?;
                    Some(b.import(spec.trim(), vec![]))
                })
                .collect();
            ParsedSource {
                stmts,
                diagnostics: Vec::new(),
            }
        }
    }

    fn host(files: &[(&str, &str)]) -> MemoryHost {
        let mut host = MemoryHost::new();
        for (path, text) in files {
            host.insert(path, text);
        }
        host
    }

    #[test]
    fn load_is_idempotent_and_identity_stable() {
        let host = host(&[("main.ql", "")]);
        let parser = LineParser;
        let mut loader = Loader::new(&host, &parser);
        let a = loader.load("main.ql").unwrap();
        let b = loader.load("main.ql").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn graph_is_dependency_first() {
        let host = host(&[
            ("main.ql", "import ./a\nimport ./b"),
            ("a.ql", "import ./b"),
            ("b.ql", ""),
        ]);
        let parser = LineParser;
        let mut loader = Loader::new(&host, &parser);
        let graph = loader.compute_graph("main.ql").unwrap();
        assert!(!graph.has_cycle);
        let paths: Vec<&str> = graph.libraries.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["b.ql", "a.ql", "main.ql"]);
        assert!(graph.position("b.ql").unwrap() < graph.position("a.ql").unwrap());
    }

    #[test]
    fn cycles_are_flagged_with_participants() {
        let host = host(&[
            ("main.ql", "import ./a"),
            ("a.ql", "import ./b"),
            ("b.ql", "import ./a"),
        ]);
        let parser = LineParser;
        let mut loader = Loader::new(&host, &parser);
        let graph = loader.compute_graph("main.ql").unwrap();
        assert!(graph.has_cycle);
        assert!(graph.cycle_participants.iter().any(|p| p == "a.ql"));
        // Every library still appears exactly once.
        assert_eq!(graph.libraries.len(), 3);
    }

    #[test]
    fn self_import_is_a_cycle() {
        let host = host(&[("main.ql", "import ./main")]);
        let parser = LineParser;
        let mut loader = Loader::new(&host, &parser);
        let graph = loader.compute_graph("main.ql").unwrap();
        assert!(graph.has_cycle);
        assert_eq!(graph.cycle_participants, vec!["main.ql".to_string()]);
    }

    #[test]
    fn missing_dependency_propagates_host_error() {
        let host = host(&[("main.ql", "import ./nope")]);
        let parser = LineParser;
        let mut loader = Loader::new(&host, &parser);
        assert!(loader.load("main.ql").is_err());
    }

    #[test]
    fn stdlib_paths_are_flagged() {
        let host = host(&[("main.ql", "import stdlib:core"), ("std/core.ql", "")]);
        let parser = LineParser;
        let mut loader = Loader::new(&host, &parser);
        let graph = loader.compute_graph("main.ql").unwrap();
        let core = &graph.libraries[graph.position("std/core.ql").unwrap()];
        assert!(core.is_stdlib);
        assert!(!graph.libraries[graph.position("main.ql").unwrap()].is_stdlib);
    }
}
