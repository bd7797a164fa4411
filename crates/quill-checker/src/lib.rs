//! The Quill type checker.
//!
//! One pass per library, in the topological order computed by the
//! loader. Each library is checked by a fresh [`context::LibraryChecker`]
//! that writes into the shared [`Program`]: the type interner, the
//! declaration store, and the semantic side tables. Diagnostics
//! accumulate; a construct that fails checking is typed `Error`, which
//! relates to everything so a single mistake does not cascade.

pub mod classes;
pub mod context;
pub mod decls;
pub mod exhaustive;
pub mod exprs;
pub mod generics;
pub mod narrow;
pub mod scopes;
pub mod stmts;

use quill_common::diagnostics::{Diagnostic, ErrorCode};
use quill_loader::LibraryGraph;
use quill_sema::SemanticContext;
use quill_types::{DeclId, DeclKind, DeclStore, FunctionInfo, TypeInterner, TypeParamInfo};
use rustc_hash::FxHashMap;
use tracing::debug;

use context::{ExportTable, LibraryChecker};

/// Library name the intrinsic function declarations are registered
/// under. Not a loadable path; only scope seeding refers to it.
pub const INTRINSICS_LIBRARY: &str = "<intrinsics>";

/// The shared state of one compilation.
pub struct Program {
    pub types: TypeInterner,
    pub decls: DeclStore,
    pub sema: SemanticContext,
}

impl Program {
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: TypeInterner::new(),
            decls: DeclStore::new(),
            sema: SemanticContext::new(),
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Intrinsic declarations seeded into standard-library scopes.
pub struct Intrinsics {
    pub functions: Vec<(String, DeclId)>,
}

/// Register the intrinsic function signatures once per compilation.
fn ensure_intrinsics(program: &mut Program) -> Intrinsics {
    use quill_ast::NodeId;
    use quill_types::TypeId;

    let mut functions = Vec::new();
    let types = &program.types;
    let decls = &mut program.decls;

    let mut intrinsic =
        |decls: &mut DeclStore, name: &str, build: &dyn Fn(u32, &TypeInterner) -> FunctionInfo| {
            let id = decls.declare(DeclKind::Function, INTRINSICS_LIBRARY, name, NodeId::DUMMY);
            let scope = decls.fresh_scope();
            let mut info = build(scope, types);
            info.scope = scope;
            info.intrinsic = Some(name.to_string());
            *decls.function_info_mut(id).expect("just declared") = info;
            functions.push((name.to_string(), id));
        };

    let generic_t = |scope: u32, types: &TypeInterner| {
        (
            vec![TypeParamInfo {
                name: "T".to_string(),
                constraint: None,
                default: None,
            }],
            types.type_param(scope, "T"),
        )
    };

    intrinsic(decls, "__array_len", &|scope, types| {
        let (type_params, t) = generic_t(scope, types);
        FunctionInfo {
            type_params,
            params: vec![types.fixed_array(t)],
            return_type: TypeId::I32,
            ..FunctionInfo::default()
        }
    });
    intrinsic(decls, "__array_get", &|scope, types| {
        let (type_params, t) = generic_t(scope, types);
        FunctionInfo {
            type_params,
            params: vec![types.fixed_array(t), TypeId::I32],
            return_type: t,
            ..FunctionInfo::default()
        }
    });
    intrinsic(decls, "__array_set", &|scope, types| {
        let (type_params, t) = generic_t(scope, types);
        FunctionInfo {
            type_params,
            params: vec![types.fixed_array(t), TypeId::I32, t],
            return_type: TypeId::VOID,
            ..FunctionInfo::default()
        }
    });
    intrinsic(decls, "__array_new", &|scope, types| {
        let (type_params, t) = generic_t(scope, types);
        FunctionInfo {
            type_params,
            params: vec![TypeId::I32, t],
            return_type: types.fixed_array(t),
            ..FunctionInfo::default()
        }
    });
    intrinsic(decls, "unreachable", &|_scope, _types| FunctionInfo {
        return_type: TypeId::NEVER,
        ..FunctionInfo::default()
    });

    Intrinsics { functions }
}

/// Check every library of the graph in topological order.
pub fn check_program(graph: &LibraryGraph, program: &mut Program) {
    if graph.has_cycle {
        // Strict topological checking cannot finalise exports inside a
        // cycle; surface the participants and keep going with the
        // best-effort order.
        let participants = graph.cycle_participants.join("', '");
        program.sema.report(Diagnostic::error(
            ErrorCode::ImportCycle,
            format!("import cycle involving '{participants}'"),
        ));
    }

    let intrinsics = ensure_intrinsics(program);
    let mut exports: FxHashMap<String, ExportTable> = FxHashMap::default();

    for library in &graph.libraries {
        debug!(path = %library.path, "checking library");
        for diag in &library.parse_diagnostics {
            program.sema.report(diag.clone());
        }
        let mut checker =
            LibraryChecker::new(program, library, &exports, &intrinsics);
        let table = checker.run();
        exports.insert(library.path.clone(), table);
    }
}
