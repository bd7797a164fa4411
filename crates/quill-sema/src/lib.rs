//! Semantic side tables for one compilation.
//!
//! The original design of systems like this attaches resolved symbols
//! and inferred types directly onto AST nodes; here they live in a
//! [`SemanticContext`] keyed by stable node ids instead. The checker is
//! the only writer; the bundler and the code generator read.

use quill_ast::NodeId;
use quill_common::diagnostics::Diagnostic;
use quill_types::{DeclId, TypeId};
use rustc_hash::{FxHashMap, FxHashSet};

/// What an identifier use resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    /// A local binding: parameter, `let`/`var` in a body, catch binding,
    /// or pattern binding. The node is the declaring node.
    Local { node: NodeId, mutable: bool },
    /// A top-level `let`/`var` of some library.
    Global {
        library: String,
        node: NodeId,
        mutable: bool,
    },
    /// A top-level function.
    Function(DeclId),
    /// A class used in value or type position.
    Class(DeclId),
    Interface(DeclId),
    Mixin(DeclId),
    Enum(DeclId),
    Distinct(DeclId),
    /// An enum member access (`Color.Red`).
    EnumMember { decl: DeclId, index: u32 },
    /// An instance field of a class, by member index.
    Field { class: DeclId, member: u32 },
    /// A method of a class, by member index.
    Method { class: DeclId, member: u32 },
    /// An accessor of a class, by member index.
    Accessor { class: DeclId, member: u32 },
    /// An interface method, by member index.
    InterfaceMethod { iface: DeclId, member: u32 },
    /// A constructor reached through `new`.
    Constructor(DeclId),
}

impl Binding {
    /// The declaration behind a type-position binding, if any.
    #[must_use]
    pub fn type_decl(&self) -> Option<DeclId> {
        match self {
            Binding::Class(d)
            | Binding::Interface(d)
            | Binding::Mixin(d)
            | Binding::Enum(d)
            | Binding::Distinct(d) => Some(*d),
            _ => None,
        }
    }
}

/// A prelude export actually used by some library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreludeUse {
    /// Canonical path of the exporting standard library.
    pub library: String,
    /// The exported name.
    pub export: String,
}

/// One recorded class/interface specialization.
#[derive(Clone, Debug)]
pub struct Specialization {
    pub decl: DeclId,
    pub args: Vec<TypeId>,
    /// The canonical specialized type.
    pub ty: TypeId,
}

/// Process-wide tables for one compilation.
#[derive(Debug, Default)]
pub struct SemanticContext {
    /// Identifier use -> resolved target. Exactly one entry per use.
    resolved_bindings: FxHashMap<NodeId, Binding>,
    /// Expression / annotation node -> inferred type. Exactly one entry
    /// per expression.
    inferred_types: FxHashMap<NodeId, TypeId>,
    /// Specialization key -> canonical specialized type.
    specialized_classes: FxHashMap<String, TypeId>,
    /// Specializations in first-seen order, for the codegen walk.
    specializations: Vec<Specialization>,
    /// Call-site node -> concrete type arguments of a generic callee.
    /// Drives codegen monomorphization of generic functions/methods.
    call_type_args: FxHashMap<NodeId, Vec<TypeId>>,
    /// Prelude exports a library actually used, by local name.
    pub used_prelude: FxHashMap<String, PreludeUse>,
    /// Ordered diagnostic sequence.
    diagnostics: Vec<Diagnostic>,
    /// Dedup set: (start offset or node id, code discriminant).
    emitted: FxHashSet<(u32, u32)>,
}

impl SemanticContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// Record the resolved binding of an identifier use.
    ///
    /// Re-binding a node to a different target would violate the
    /// one-binding-per-use invariant and panics in debug builds.
    pub fn bind(&mut self, node: NodeId, binding: Binding) {
        let prev = self.resolved_bindings.insert(node, binding);
        debug_assert!(
            prev.is_none() || prev == self.resolved_bindings.get(&node).cloned(),
            "node {node} bound twice with different targets"
        );
    }

    #[must_use]
    pub fn binding(&self, node: NodeId) -> Option<&Binding> {
        self.resolved_bindings.get(&node)
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Record the inferred type of an expression or annotation node.
    pub fn record_type(&mut self, node: NodeId, ty: TypeId) {
        self.inferred_types.insert(node, ty);
    }

    #[must_use]
    pub fn type_of(&self, node: NodeId) -> Option<TypeId> {
        self.inferred_types.get(&node).copied()
    }

    /// Record the concrete type arguments a generic call resolved to.
    pub fn record_call_args(&mut self, call: NodeId, args: Vec<TypeId>) {
        self.call_type_args.insert(call, args);
    }

    #[must_use]
    pub fn call_args(&self, call: NodeId) -> Option<&[TypeId]> {
        self.call_type_args.get(&call).map(Vec::as_slice)
    }

    // =========================================================================
    // Specializations
    // =========================================================================

    /// Look up a specialization by key.
    #[must_use]
    pub fn specialization(&self, key: &str) -> Option<TypeId> {
        self.specialized_classes.get(key).copied()
    }

    /// Record a specialization under its key. First writer wins; every
    /// later request for the same key sees the same layout.
    pub fn record_specialization(
        &mut self,
        key: String,
        decl: DeclId,
        args: Vec<TypeId>,
        ty: TypeId,
    ) -> TypeId {
        if let Some(&existing) = self.specialized_classes.get(&key) {
            return existing;
        }
        self.specialized_classes.insert(key, ty);
        self.specializations.push(Specialization { decl, args, ty });
        ty
    }

    /// All recorded specializations in first-seen order.
    #[must_use]
    pub fn specializations(&self) -> &[Specialization] {
        &self.specializations
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Append a diagnostic, deduplicating repeats at the same position.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        let pos = diagnostic.location.as_ref().map_or(u32::MAX, |l| l.start);
        let code = diagnostic.code as u32;
        if pos != u32::MAX && !self.emitted.insert((pos, code)) {
            return;
        }
        self.diagnostics.push(diagnostic);
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// Take ownership of the diagnostics (driver hand-off).
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_common::diagnostics::{Diagnostic, ErrorCode};

    #[test]
    fn specialization_cache_is_first_writer_wins() {
        let mut sema = SemanticContext::new();
        let ty1 = TypeId(100);
        let ty2 = TypeId(200);
        let got1 = sema.record_specialization("a.ql::Box<i32>".into(), DeclId(1), vec![], ty1);
        let got2 = sema.record_specialization("a.ql::Box<i32>".into(), DeclId(1), vec![], ty2);
        assert_eq!(got1, ty1);
        assert_eq!(got2, ty1);
        assert_eq!(sema.specializations().len(), 1);
    }

    #[test]
    fn duplicate_diagnostics_at_same_position_collapse() {
        use quill_common::position::SourceLocation;
        let mut sema = SemanticContext::new();
        let loc = SourceLocation {
            file: "main.ql".into(),
            line: 0,
            column: 4,
            start: 4,
            length: 1,
        };
        let d = Diagnostic::error(ErrorCode::SymbolNotFound, "cannot find name 'x'")
            .with_location(loc);
        sema.report(d.clone());
        sema.report(d);
        assert_eq!(sema.diagnostics().len(), 1);
        assert!(sema.has_errors());
    }

    #[test]
    fn types_and_bindings_round_trip() {
        let mut sema = SemanticContext::new();
        let node = NodeId(7);
        sema.record_type(node, TypeId::I32);
        sema.bind(
            node,
            Binding::Local {
                node: NodeId(3),
                mutable: false,
            },
        );
        assert_eq!(sema.type_of(node), Some(TypeId::I32));
        assert!(matches!(
            sema.binding(node),
            Some(Binding::Local { node: NodeId(3), .. })
        ));
    }
}
