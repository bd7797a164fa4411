//! The bundler: the codegen-facing view of the checked program.
//!
//! Collects the AST maps the generator walks (declarations by id,
//! member bodies by node, globals and top-level statements in
//! dependency order), and owns the monomorphization registries: one
//! entry per concrete class/interface/function specialization, keyed by
//! the specialization key, with a globally-unique mangled name each.
//! Reachability is what populates the registries — items nobody reaches
//! are never registered, which is the dead-code elimination.

use crate::names::{NameTable, library_prefix};
use quill_ast::{ClassDecl, FuncDecl, LetStmt, Member, MixinDecl, NodeId, Stmt, StmtKind};
use quill_loader::{Library, LibraryGraph};
use quill_types::{DeclId, TypeId};
use rustc_hash::FxHashMap;

/// One item of a library's top level, in source order. Globals and
/// plain statements interleave; that order is the start function.
pub enum TopItem<'a> {
    /// Index into `AstMaps::globals`.
    Global(usize),
    Stmt(&'a Stmt),
}

/// Declaration ASTs by stable id, plus the program's value roots.
pub struct AstMaps<'a> {
    pub class_decls: FxHashMap<DeclId, &'a ClassDecl>,
    pub mixin_decls: FxHashMap<DeclId, &'a MixinDecl>,
    pub func_decls: FxHashMap<DeclId, &'a FuncDecl>,
    /// Class and mixin member nodes, for body lookup from signatures.
    pub members: FxHashMap<NodeId, &'a Member>,
    /// Declaration that owns each member node (mixin bodies need their
    /// declaring mixin's substitution, not the applying class's).
    pub member_owner: FxHashMap<NodeId, DeclId>,
    /// Top-level bindings in dependency order.
    pub globals: Vec<GlobalDef<'a>>,
    pub global_by_node: FxHashMap<NodeId, usize>,
    /// Per-library top-level items in dependency order.
    pub top_level: Vec<(&'a Library, Vec<TopItem<'a>>)>,
    /// The entry library (last in topological order).
    pub entry: &'a Library,
}

pub struct GlobalDef<'a> {
    pub library: &'a Library,
    pub node: NodeId,
    pub stmt: &'a LetStmt,
    pub exported: bool,
}

impl<'a> AstMaps<'a> {
    pub fn build(
        graph: &'a LibraryGraph,
        decls: &quill_types::DeclStore,
    ) -> AstMaps<'a> {
        let mut class_decls = FxHashMap::default();
        let mut mixin_decls = FxHashMap::default();
        let mut func_decls = FxHashMap::default();
        let mut members = FxHashMap::default();
        let mut member_owner = FxHashMap::default();
        let mut globals = Vec::new();
        let mut global_by_node = FxHashMap::default();
        let mut top_level = Vec::new();

        for library in &graph.libraries {
            let mut items = Vec::new();
            for stmt in &library.stmts {
                match &stmt.kind {
                    StmtKind::Class(c) => {
                        if let Some(id) = decls.lookup(&library.path, &c.name.name) {
                            class_decls.insert(id, c);
                            for member in &c.members {
                                members.insert(member.id, member);
                                member_owner.insert(member.id, id);
                            }
                        }
                    }
                    StmtKind::Mixin(m) => {
                        if let Some(id) = decls.lookup(&library.path, &m.name.name) {
                            mixin_decls.insert(id, m);
                            for member in &m.members {
                                members.insert(member.id, member);
                                member_owner.insert(member.id, id);
                            }
                        }
                    }
                    StmtKind::Func(f) => {
                        if let Some(id) = decls.lookup(&library.path, &f.name.name) {
                            func_decls.insert(id, f);
                        }
                    }
                    StmtKind::Let(l) => {
                        global_by_node.insert(stmt.id, globals.len());
                        items.push(TopItem::Global(globals.len()));
                        globals.push(GlobalDef {
                            library,
                            node: stmt.id,
                            stmt: l,
                            exported: l.exported,
                        });
                    }
                    StmtKind::Import(_)
                    | StmtKind::Interface(_)
                    | StmtKind::Enum(_)
                    | StmtKind::Distinct(_) => {}
                    _ => items.push(TopItem::Stmt(stmt)),
                }
            }
            top_level.push((library.as_ref(), items));
        }

        let entry = graph
            .libraries
            .last()
            .expect("a graph always contains the entry library")
            .as_ref();

        AstMaps {
            class_decls,
            mixin_decls,
            func_decls,
            members,
            member_owner,
            globals,
            global_by_node,
            top_level,
            entry,
        }
    }
}

/// A concrete class specialization scheduled for emission.
pub struct ClassInstance {
    pub decl: DeclId,
    pub args: Vec<TypeId>,
    /// The canonical class type.
    pub ty: TypeId,
    pub key: String,
    /// Globally-unique mangled name.
    pub name: String,
}

/// A concrete interface specialization participating in dispatch.
pub struct IfaceInstance {
    pub decl: DeclId,
    pub args: Vec<TypeId>,
    pub ty: TypeId,
    pub key: String,
    /// Closed-world interface id stored in itables.
    pub id: i32,
}

/// A concrete function specialization scheduled for emission.
pub struct FuncInstance {
    pub decl: DeclId,
    pub args: Vec<TypeId>,
    pub key: String,
    /// Assigned function index.
    pub index: u32,
    pub name: String,
}

/// The monomorphization registries of one emission.
pub struct Bundle<'a> {
    pub ast: AstMaps<'a>,
    pub classes: Vec<ClassInstance>,
    pub class_by_key: FxHashMap<String, usize>,
    pub ifaces: Vec<IfaceInstance>,
    pub iface_by_key: FxHashMap<String, usize>,
    pub funcs: Vec<FuncInstance>,
    pub func_by_key: FxHashMap<String, usize>,
    pub names: NameTable,
}

impl<'a> Bundle<'a> {
    pub fn new(graph: &'a LibraryGraph, decls: &quill_types::DeclStore) -> Bundle<'a> {
        Bundle {
            ast: AstMaps::build(graph, decls),
            classes: Vec::new(),
            class_by_key: FxHashMap::default(),
            ifaces: Vec::new(),
            iface_by_key: FxHashMap::default(),
            funcs: Vec::new(),
            func_by_key: FxHashMap::default(),
            names: NameTable::new(),
        }
    }

    /// Mangled base name of a declaration.
    pub fn decl_base_name(decls: &quill_types::DeclStore, decl: DeclId) -> String {
        let data = decls.get(decl);
        format!("{}_{}", library_prefix(&data.library), data.name)
    }
}
