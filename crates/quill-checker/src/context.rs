//! Checker context.
//!
//! Holds the per-library state used throughout checking. The context
//! separates state from logic: the statement, expression, and class
//! modules all extend it with `impl` blocks.

use crate::scopes::{ScopeStack, TypeOrDecl, ValueEntry};
use crate::{Intrinsics, Program};
use quill_ast::{NodeId, TypeAnn, TypeAnnKind};
use quill_common::diagnostics::{Diagnostic, ErrorCode};
use quill_common::position::LineMap;
use quill_common::span::Span;
use quill_loader::Library;
use quill_types::{
    DeclId, DeclKind, FunctionShape, LiteralValue, TypeId, TypeKind, is_primitive_value,
    is_reference,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// One exported symbol of a checked library. Imports bind the exported
/// declaration identity, never just the name.
#[derive(Clone, Debug)]
pub struct ExportedSymbol {
    pub value: Option<ValueEntry>,
    pub type_decl: Option<DeclId>,
}

/// Everything a library exports, by exported name.
pub type ExportTable = FxHashMap<String, ExportedSymbol>;

/// Tracks which fields are already initialised while checking field
/// initializers in declaration order.
#[derive(Debug)]
pub struct FieldInit {
    pub class: DeclId,
    /// Own fields initialised so far plus every superclass field.
    pub initialized: FxHashSet<String>,
    /// All own field names, for the before-initialization diagnostic.
    pub own_fields: FxHashSet<String>,
}

/// Shared state for checking one library.
pub struct LibraryChecker<'a> {
    pub program: &'a mut Program,
    pub library: &'a Library,
    pub line_map: LineMap,
    pub scopes: ScopeStack,
    /// Flow-narrowing frames: binding declaration node -> narrowed type.
    pub narrow_frames: Vec<FxHashMap<NodeId, TypeId>>,
    /// Stack of expected return types for enclosing functions.
    pub return_types: Vec<TypeId>,
    /// Stack of `this` types for enclosing class bodies.
    pub this_types: Vec<TypeId>,
    /// Declaration of the class whose body is being checked.
    pub enclosing_class: Option<DeclId>,
    /// Set while checking field initializers, for ordering checks.
    pub field_init: Option<FieldInit>,
    /// Whether the current member body is static.
    pub in_static: bool,
    pub loop_depth: u32,
    pub(crate) exports: &'a FxHashMap<String, ExportTable>,
    pub(crate) intrinsics: &'a Intrinsics,
    /// Prelude exports visible to this library, by name, with the
    /// exporting standard library's path. Consulted only when the scope
    /// stack misses; hits are recorded in `used_prelude`.
    pub(crate) prelude: FxHashMap<String, (ExportedSymbol, String)>,
}

impl<'a> LibraryChecker<'a> {
    pub fn new(
        program: &'a mut Program,
        library: &'a Library,
        exports: &'a FxHashMap<String, ExportTable>,
        intrinsics: &'a Intrinsics,
    ) -> Self {
        let line_map = LineMap::build(&library.text);
        Self {
            program,
            library,
            line_map,
            scopes: ScopeStack::new(),
            narrow_frames: Vec::new(),
            return_types: Vec::new(),
            this_types: Vec::new(),
            enclosing_class: None,
            field_init: None,
            in_static: false,
            loop_depth: 0,
            exports,
            intrinsics,
            prelude: FxHashMap::default(),
        }
    }

    /// Check the whole library and produce its export table.
    pub fn run(&mut self) -> ExportTable {
        self.scopes.push();
        self.seed_scope();
        self.register_types();
        self.resolve_signatures();
        self.check_class_rules();
        self.check_top_level();
        self.check_bodies();
        let table = self.build_exports();
        self.scopes.pop();
        table
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn error(&mut self, code: ErrorCode, span: Span, message: impl Into<String>) {
        let diag = Diagnostic::error(code, message);
        let diag = if span.is_dummy() {
            diag
        } else {
            diag.with_span(&self.library.path, span, &self.line_map)
        };
        self.program.sema.report(diag);
    }

    pub fn warning(&mut self, code: ErrorCode, span: Span, message: impl Into<String>) {
        let diag = Diagnostic::warning(code, message);
        let diag = if span.is_dummy() {
            diag
        } else {
            diag.with_span(&self.library.path, span, &self.line_map)
        };
        self.program.sema.report(diag);
    }

    /// Format a type for a message.
    #[must_use]
    pub fn fmt_type(&self, ty: TypeId) -> String {
        quill_types::format_type(&self.program.types, &self.program.decls, ty)
    }

    pub fn assignable(&self, source: TypeId, target: TypeId) -> bool {
        quill_types::assignable(&self.program.types, &self.program.decls, source, target)
    }

    // =========================================================================
    // Narrowing
    // =========================================================================

    pub fn push_narrow(&mut self, facts: FxHashMap<NodeId, TypeId>) {
        self.narrow_frames.push(facts);
    }

    pub fn pop_narrow(&mut self) {
        self.narrow_frames.pop();
    }

    /// The narrowed type of a binding, innermost frame first.
    #[must_use]
    pub fn narrowed(&self, decl_node: NodeId) -> Option<TypeId> {
        self.narrow_frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(&decl_node).copied())
    }

    /// Drop narrowing facts for a binding after it is assigned to.
    pub fn invalidate_narrowing(&mut self, decl_node: NodeId) {
        for frame in &mut self.narrow_frames {
            frame.remove(&decl_node);
        }
    }

    // =========================================================================
    // Type annotation resolution
    // =========================================================================

    /// The `This` type of a class at its own parameters.
    #[must_use]
    pub fn identity_class_type(&self, decl: DeclId) -> TypeId {
        let args = self
            .program
            .decls
            .class_info(decl)
            .map(|info| {
                info.type_params
                    .iter()
                    .map(|p| self.program.types.type_param(info.scope, &p.name))
                    .collect()
            })
            .unwrap_or_default();
        self.program.types.class(decl, args)
    }

    /// Resolve a written type annotation to a type, recording it.
    pub fn resolve_type(&mut self, ann: &TypeAnn) -> TypeId {
        let ty = self.resolve_type_inner(ann);
        self.program.sema.record_type(ann.id, ty);
        ty
    }

    fn resolve_type_inner(&mut self, ann: &TypeAnn) -> TypeId {
        match &ann.kind {
            TypeAnnKind::Named { name, args } => self.resolve_named_type(ann, name, args),
            TypeAnnKind::Union(members) => {
                let resolved: Vec<TypeId> =
                    members.iter().map(|m| self.resolve_type(m)).collect();
                self.check_union_mixing(ann.span, &resolved);
                self.check_distinct_union(ann.span, &resolved);
                self.program.types.union_of(resolved)
            }
            TypeAnnKind::Tuple(elems) => {
                let elems = elems.iter().map(|e| self.resolve_type(e)).collect();
                self.program.types.tuple(elems)
            }
            TypeAnnKind::Record(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, field)| (name.clone(), self.resolve_type(field)))
                    .collect();
                self.program.types.record(fields)
            }
            TypeAnnKind::Function { params, ret } => {
                let params = params.iter().map(|p| self.resolve_type(p)).collect();
                let return_type = self.resolve_type(ret);
                self.program.types.function(FunctionShape {
                    type_params: Vec::new(),
                    params,
                    return_type,
                })
            }
            TypeAnnKind::FixedArray(elem) => {
                let elem = self.resolve_type(elem);
                self.program.types.fixed_array(elem)
            }
            TypeAnnKind::Literal(value) => {
                let value = match value {
                    quill_ast::LitValue::Int(v) => LiteralValue::Int(*v),
                    quill_ast::LitValue::Bool(v) => LiteralValue::Bool(*v),
                    quill_ast::LitValue::Str(v) => LiteralValue::Str(v.clone()),
                };
                self.program.types.intern(TypeKind::Literal(value))
            }
            TypeAnnKind::Null => TypeId::NULL,
            TypeAnnKind::This => match self.enclosing_class {
                Some(class) => self.program.types.this_type(class),
                None => {
                    self.error(
                        ErrorCode::InvalidThis,
                        ann.span,
                        "'This' is only available inside a class body",
                    );
                    TypeId::ERROR
                }
            },
        }
    }

    fn resolve_named_type(&mut self, ann: &TypeAnn, name: &str, args: &[TypeAnn]) -> TypeId {
        let builtin = match name {
            "i32" => Some(TypeId::I32),
            "u32" => Some(TypeId::U32),
            "i64" => Some(TypeId::I64),
            "f32" => Some(TypeId::F32),
            "f64" => Some(TypeId::F64),
            "boolean" => Some(TypeId::BOOLEAN),
            "string" => Some(TypeId::STRING),
            "void" => Some(TypeId::VOID),
            "never" => Some(TypeId::NEVER),
            "anyref" => Some(TypeId::ANYREF),
            _ => None,
        };
        if let Some(ty) = builtin {
            if !args.is_empty() {
                self.error(
                    ErrorCode::ArgumentCountMismatch,
                    ann.span,
                    format!("type '{name}' takes no type arguments"),
                );
            }
            return ty;
        }

        if name == "Array" {
            if args.len() != 1 {
                self.error(
                    ErrorCode::ArgumentCountMismatch,
                    ann.span,
                    "type 'Array' takes exactly one type argument",
                );
                return TypeId::ERROR;
            }
            let elem = self.resolve_type(&args[0]);
            return self.program.types.array(elem);
        }

        let resolved_args: Vec<TypeId> = args.iter().map(|a| self.resolve_type(a)).collect();

        match self.lookup_type_with_prelude(name) {
            Some(TypeOrDecl::Param(ty)) => {
                if !args.is_empty() {
                    self.error(
                        ErrorCode::ArgumentCountMismatch,
                        ann.span,
                        format!("type parameter '{name}' takes no type arguments"),
                    );
                }
                ty
            }
            Some(TypeOrDecl::Decl(decl)) => {
                self.program
                    .sema
                    .bind(ann.id, crate::decls::type_binding(&self.program.decls, decl));
                self.instantiate_named(decl, resolved_args, ann.span)
            }
            None => {
                self.error(
                    ErrorCode::SymbolNotFound,
                    ann.span,
                    format!("cannot find type '{name}'"),
                );
                TypeId::ERROR
            }
        }
    }

    fn instantiate_named(&mut self, decl: DeclId, args: Vec<TypeId>, span: Span) -> TypeId {
        match self.program.decls.get(decl).kind {
            DeclKind::Class | DeclKind::Interface | DeclKind::Mixin => {
                self.instantiate(decl, args, span)
            }
            DeclKind::Enum => {
                if !args.is_empty() {
                    self.error(
                        ErrorCode::ArgumentCountMismatch,
                        span,
                        "enum types take no type arguments",
                    );
                }
                self.program.types.enum_type(decl)
            }
            DeclKind::Distinct => {
                if !args.is_empty() {
                    self.error(
                        ErrorCode::ArgumentCountMismatch,
                        span,
                        "distinct types take no type arguments",
                    );
                }
                let inner = self
                    .program
                    .decls
                    .distinct_info(decl)
                    .map_or(TypeId::ERROR, |i| i.inner);
                self.program.types.distinct(inner, decl)
            }
            DeclKind::Function => {
                self.error(
                    ErrorCode::WrongDeclarationKind,
                    span,
                    "functions cannot be used as types",
                );
                TypeId::ERROR
            }
        }
    }

    // =========================================================================
    // Prelude-aware lookups
    // =========================================================================

    /// Value lookup: the scope stack first, then prelude exports.
    /// Prelude hits are recorded in the used-prelude table.
    pub fn lookup_value_with_prelude(&mut self, name: &str) -> Option<ValueEntry> {
        if let Some(entry) = self.scopes.lookup_value(name) {
            return Some(entry.clone());
        }
        let (symbol, library) = self.prelude.get(name)?;
        let value = symbol.value.clone()?;
        self.program.sema.used_prelude.insert(
            name.to_string(),
            quill_sema::PreludeUse {
                library: library.clone(),
                export: name.to_string(),
            },
        );
        Some(value)
    }

    /// Type lookup: the scope stack first, then prelude exports.
    pub fn lookup_type_with_prelude(&mut self, name: &str) -> Option<TypeOrDecl> {
        if let Some(found) = self.scopes.lookup_type(name) {
            return Some(found);
        }
        let (symbol, library) = self.prelude.get(name)?;
        let decl = symbol.type_decl?;
        self.program.sema.used_prelude.insert(
            name.to_string(),
            quill_sema::PreludeUse {
                library: library.clone(),
                export: name.to_string(),
            },
        );
        Some(TypeOrDecl::Decl(decl))
    }

    /// Unions may not mix unboxed scalars with references: the target
    /// has no storage type holding both.
    pub(crate) fn check_union_mixing(&mut self, span: Span, members: &[TypeId]) {
        let types = &self.program.types;
        let decls = &self.program.decls;
        let has_primitive = members
            .iter()
            .any(|&m| is_primitive_value(types, decls, m));
        let has_reference = members.iter().any(|&m| is_reference(types, decls, m));
        if has_primitive && has_reference {
            self.error(
                ErrorCode::UnionMixesPrimitiveAndReference,
                span,
                "a union cannot mix a primitive value type with a reference type",
            );
        }
    }

    /// Two distinct aliases of the same underlying primitive cannot be
    /// unioned: their runtime representations are indistinguishable.
    fn check_distinct_union(&mut self, span: Span, members: &[TypeId]) {
        let mut seen_inner: Vec<TypeId> = Vec::new();
        for &member in members {
            if let TypeKind::Distinct { inner, .. } = self.program.types.kind(member) {
                if seen_inner.contains(&inner) {
                    self.error(
                        ErrorCode::UnionMixesPrimitiveAndReference,
                        span,
                        "two distinct types over the same underlying type cannot be unioned",
                    );
                    return;
                }
                seen_inner.push(inner);
            }
        }
    }
}
