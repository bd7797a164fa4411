//! WebAssembly code generation for the Quill compiler.
//!
//! The generator is read-only over the checked program: the checker has
//! already recorded every binding, type, and specialization it needs.
//! Emission is driven by reachability — the bundler registries fill as
//! the generator walks from the program's roots (top-level statements
//! and entry-library exports), which doubles as dead-code elimination.
//!
//! The module uses GC struct types for every class layout, record,
//! tuple, closure shape, and vtable; typed function references for
//! closures and vtable slots; and the exception proposal for
//! throw/try/catch/finally. Codegen failures are fatal: an invariant
//! the generator cannot locally recover from (a missing specialization,
//! an unsubstituted type parameter) aborts the compile.

mod bundle;
mod exprs;
mod helpers;
mod layout;
mod lower;
mod names;
mod ops;
mod types;

pub use bundle::Bundle;

use bundle::{ClassInstance, FuncInstance, IfaceInstance, TopItem};
use layout::ClassLayout;
use lower::FuncCtx;
use quill_ast::{NodeId, StmtKind};
use quill_checker::Program;
use quill_common::options::CompileOptions;
use quill_loader::LibraryGraph;
use quill_types::{
    DeclId, DeclKind, TypeId, TypeKind, TypeSubstitution, instantiate_type, type_key,
};
use rustc_hash::FxHashMap;
use tracing::debug;
use types::TypeTable;
use wasm_encoder::{
    AbstractHeapType, BlockType, CodeSection, CompositeInnerType, ConstExpr, DataCountSection,
    DataSection, ElementSection, Elements, ExportKind, ExportSection, FieldType, Function,
    FunctionSection, GlobalSection, GlobalType, HeapType, Instruction, Module, NameMap,
    NameSection, RefType, StartSection, StorageType, TagKind, TagSection, TagType, TypeSection,
    ValType,
};

/// Fatal code-generation failures.
#[derive(Debug)]
pub enum CodegenError {
    /// A type reached codegen still carrying a type parameter.
    Unsubstituted(String),
    /// A specialization the generator relies on is missing.
    MissingSpecialization(String),
    /// The checked program still carries error types.
    ErroneousInput,
    /// A construct the backend has no lowering for.
    Unsupported(String),
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::Unsubstituted(what) => {
                write!(f, "type parameter '{what}' survived monomorphization")
            }
            CodegenError::MissingSpecialization(key) => {
                write!(f, "missing specialization '{key}'")
            }
            CodegenError::ErroneousInput => {
                write!(f, "cannot generate code for a program with type errors")
            }
            CodegenError::Unsupported(what) => write!(f, "unsupported construct: {what}"),
        }
    }
}

impl std::error::Error for CodegenError {}

pub type Result<T> = std::result::Result<T, CodegenError>;

/// Generate a WebAssembly module from a checked program.
pub fn generate(
    program: &Program,
    graph: &LibraryGraph,
    options: &CompileOptions,
) -> Result<Vec<u8>> {
    let mut generator = Generator::new(program, graph, options);
    generator.run()
}

// =============================================================================
// Tables
// =============================================================================

/// Declared functions with deferred bodies. Indices are final at
/// declaration time, so mutually-recursive bodies can reference each
/// other freely.
#[derive(Default)]
pub(crate) struct FuncTable {
    pub(crate) types: Vec<u32>,
    pub(crate) bodies: Vec<Option<Function>>,
    pub(crate) names: Vec<String>,
}

impl FuncTable {
    pub(crate) fn declare(&mut self, name: String, type_idx: u32) -> u32 {
        let idx = self.types.len() as u32;
        self.types.push(type_idx);
        self.bodies.push(None);
        self.names.push(name);
        idx
    }

    pub(crate) fn define(&mut self, idx: u32, body: Function) {
        self.bodies[idx as usize] = Some(body);
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.types.len()
    }
}

pub(crate) struct GlobalSlot {
    ty: ValType,
    mutable: bool,
    init: ConstExpr,
    name: String,
}

/// Pre-resolved indices of the base GC types.
#[derive(Clone, Copy, Default)]
pub(crate) struct BaseTypes {
    /// `struct { vt: (ref $vt_base) }` — root of every class struct.
    pub(crate) obj_root: u32,
    /// `struct { itable: (ref null $itab) }` — root of every vtable.
    pub(crate) vt_base: u32,
    /// `array (mut (ref null $ientry))`
    pub(crate) itab: u32,
    /// `struct { id: i32, ivt: (ref struct) }`
    pub(crate) ientry: u32,
    /// `array (mut i8)` — string payload.
    pub(crate) chars: u32,
    /// `struct { bytes: (ref $chars) }`
    pub(crate) str_: u32,
    /// `array (mut (ref null $str))` — template strings arrays.
    pub(crate) str_arr: u32,
    /// Function type `(param eqref)` of the exception tag.
    pub(crate) exn_func: u32,
}

/// Work items for deferred function bodies.
pub(crate) enum Pending {
    /// A top-level function specialization.
    Func { index: u32, decl: DeclId, type_args: Vec<TypeId> },
    /// A method body of a class instance (by member index), possibly a
    /// generic-method specialization.
    Method {
        index: u32,
        class: usize,
        member: u32,
        margs: Vec<TypeId>,
    },
    /// Synthesized public-field accessor.
    FieldGet { index: u32, class: usize, field: usize },
    FieldSet { index: u32, class: usize, field: usize },
    /// Declared accessor body.
    Accessor { index: u32, class: usize, member: u32 },
    /// The `new` function of a class instance.
    Ctor { index: u32, class: usize },
    /// Cast adapter filling a vtable slot introduced higher up.
    SlotAdapter {
        index: u32,
        class: usize,
        slot: usize,
        target: u32,
    },
    /// Interface-method adapter for an itable entry.
    IfaceAdapter {
        index: u32,
        class: usize,
        iface: usize,
        method: u32,
    },
    /// Linear itable search helper for one interface instance.
    IfaceFinder { index: u32, iface: usize },
    /// Extension-class method, a free function over the inner type.
    ExtMethod {
        index: u32,
        decl: DeclId,
        member: u32,
        margs: Vec<TypeId>,
    },
}

pub struct Generator<'a> {
    pub(crate) program: &'a Program,
    pub(crate) options: &'a CompileOptions,
    pub(crate) bundle: Bundle<'a>,
    pub(crate) types: TypeTable,
    pub(crate) funcs: FuncTable,
    pub(crate) globals: Vec<GlobalSlot>,
    pub(crate) layouts: Vec<Option<ClassLayout>>,
    pub(crate) pending: Vec<Pending>,
    pub(crate) base: BaseTypes,
    /// String literal -> (global index, data segment index).
    pub(crate) strings: FxHashMap<String, (u32, u32)>,
    pub(crate) string_data: Vec<Vec<u8>>,
    /// Template expression node -> strings-array global (stable
    /// identity for tagged templates).
    pub(crate) templates: FxHashMap<NodeId, u32>,
    pub(crate) template_init: Vec<(u32, Vec<String>)>,
    /// Runtime helper name -> function index, linked only if used.
    pub(crate) helpers: FxHashMap<String, u32>,
    /// Function indices referenced by `ref.func` (declarative element
    /// segment).
    pub(crate) declared_funcs: Vec<u32>,
    /// Top-level `let` node -> global index.
    pub(crate) user_globals: FxHashMap<NodeId, u32>,
    /// (class instance, member index) -> static-field global.
    pub(crate) static_globals: FxHashMap<(usize, u32), u32>,
    /// Plain functions wrapped as closure values, by key.
    pub(crate) closure_wrappers: FxHashMap<String, u32>,
    /// Class instance -> vtable global.
    pub(crate) vtable_globals: FxHashMap<usize, u32>,
    /// Interface instance -> itable search helper.
    pub(crate) iface_finders: FxHashMap<usize, u32>,
    /// Generic-method and extension-method specializations, by key.
    pub(crate) method_instances: FxHashMap<String, u32>,
    pub(crate) start_body: Vec<Instruction<'static>>,
    pub(crate) start_locals: Vec<ValType>,
}

impl<'a> Generator<'a> {
    pub fn new(
        program: &'a Program,
        graph: &'a LibraryGraph,
        options: &'a CompileOptions,
    ) -> Self {
        Self {
            program,
            options,
            bundle: Bundle::new(graph, &program.decls),
            types: TypeTable::new(),
            funcs: FuncTable::default(),
            globals: Vec::new(),
            layouts: Vec::new(),
            pending: Vec::new(),
            base: BaseTypes::default(),
            strings: FxHashMap::default(),
            string_data: Vec::new(),
            templates: FxHashMap::default(),
            template_init: Vec::new(),
            helpers: FxHashMap::default(),
            declared_funcs: Vec::new(),
            user_globals: FxHashMap::default(),
            static_globals: FxHashMap::default(),
            closure_wrappers: FxHashMap::default(),
            vtable_globals: FxHashMap::default(),
            iface_finders: FxHashMap::default(),
            method_instances: FxHashMap::default(),
            start_body: Vec::new(),
            start_locals: Vec::new(),
        }
    }

    // =========================================================================
    // Base types
    // =========================================================================

    fn init_base_types(&mut self) {
        use types::{open_subtype, struct_type};

        let obj_root = self.types.reserve("$obj");
        let vt_base = self.types.reserve("$vt");
        let itab = self.types.reserve("$itab");
        let ientry = self.types.reserve("$ientry");
        let chars = self.types.reserve("$chars");
        let str_ = self.types.reserve("$str");
        let str_arr = self.types.reserve("$arr:string");

        // $obj = struct { vt: (ref $vt) }
        self.types.define(
            obj_root,
            open_subtype(
                struct_type(vec![(
                    StorageType::Val(ValType::Ref(RefType {
                        nullable: false,
                        heap_type: HeapType::Concrete(vt_base),
                    })),
                    false,
                )]),
                None,
            ),
        );
        // $vt = struct { itable: (ref null $itab) }
        self.types.define(
            vt_base,
            open_subtype(
                struct_type(vec![(
                    StorageType::Val(ValType::Ref(RefType {
                        nullable: true,
                        heap_type: HeapType::Concrete(itab),
                    })),
                    false,
                )]),
                None,
            ),
        );
        // $itab = array (ref null $ientry)
        self.types.define(
            itab,
            types::final_subtype(CompositeInnerType::Array(wasm_encoder::ArrayType(
                FieldType {
                    element_type: StorageType::Val(ValType::Ref(RefType {
                        nullable: true,
                        heap_type: HeapType::Concrete(ientry),
                    })),
                    mutable: false,
                },
            ))),
        );
        // $ientry = struct { id: i32, ivt: (ref struct) }
        self.types.define(
            ientry,
            types::final_subtype(struct_type(vec![
                (StorageType::Val(ValType::I32), false),
                (
                    StorageType::Val(ValType::Ref(RefType {
                        nullable: false,
                        heap_type: HeapType::Abstract {
                            shared: false,
                            ty: AbstractHeapType::Struct,
                        },
                    })),
                    false,
                ),
            ])),
        );
        // $chars = array (mut i8)
        self.types.define(
            chars,
            types::final_subtype(CompositeInnerType::Array(wasm_encoder::ArrayType(
                FieldType {
                    element_type: StorageType::I8,
                    mutable: true,
                },
            ))),
        );
        // $str = struct { bytes: (ref $chars) }
        self.types.define(
            str_,
            types::final_subtype(struct_type(vec![(
                StorageType::Val(ValType::Ref(RefType {
                    nullable: false,
                    heap_type: HeapType::Concrete(chars),
                })),
                false,
            )])),
        );
        // $strarr = array (mut (ref null $str))
        self.types.define(
            str_arr,
            types::final_subtype(CompositeInnerType::Array(wasm_encoder::ArrayType(
                FieldType {
                    element_type: StorageType::Val(ValType::Ref(RefType {
                        nullable: true,
                        heap_type: HeapType::Concrete(str_),
                    })),
                    mutable: true,
                },
            ))),
        );

        let exn_func = self.types.func_type(vec![eqref()], vec![]);

        self.base = BaseTypes {
            obj_root,
            vt_base,
            itab,
            ientry,
            chars,
            str_: str_,
            str_arr,
            exn_func,
        };
    }

    // =========================================================================
    // Type mapping
    // =========================================================================

    /// The storage type of a concrete Quill type.
    pub(crate) fn val_type(&mut self, ty: TypeId) -> Result<ValType> {
        match self.program.types.kind(ty) {
            TypeKind::I32 | TypeKind::U32 | TypeKind::Boolean | TypeKind::Enum(_) => {
                Ok(ValType::I32)
            }
            TypeKind::I64 => Ok(ValType::I64),
            TypeKind::F32 => Ok(ValType::F32),
            TypeKind::F64 => Ok(ValType::F64),
            TypeKind::Literal(value) => match value.base_type() {
                TypeId::STRING => Ok(ref_null(self.base.str_)),
                _ => Ok(ValType::I32),
            },
            TypeKind::String => Ok(ref_null(self.base.str_)),
            TypeKind::AnyRef => Ok(ValType::Ref(RefType::ANYREF)),
            TypeKind::Null => Ok(ValType::Ref(RefType::new_abstract(AbstractHeapType::None, true, false))),
            // A `never`-typed value never materialises; the slot type
            // is arbitrary.
            TypeKind::Never => Ok(ValType::I32),
            TypeKind::Void => Err(CodegenError::Unsupported("void value".into())),
            TypeKind::Error => Err(CodegenError::ErroneousInput),
            TypeKind::FixedArray(elem) => {
                let idx = self.array_type(elem)?;
                Ok(ref_null(idx))
            }
            TypeKind::Array(elem) => {
                let idx = self.dyn_array_type(elem)?;
                Ok(ref_null(idx))
            }
            TypeKind::Tuple(elems) => {
                let idx = self.tuple_type(ty, &elems)?;
                Ok(ref_null(idx))
            }
            TypeKind::Record(fields) => {
                let elems: Vec<TypeId> = fields.iter().map(|(_, t)| *t).collect();
                let idx = self.tuple_type(ty, &elems)?;
                Ok(ref_null(idx))
            }
            TypeKind::Union(_) => self.union_val_type(ty),
            TypeKind::Function(shape) => {
                let (base, _) = self.closure_types(&shape.params.clone(), shape.return_type)?;
                Ok(ref_null(base))
            }
            TypeKind::Class(_) => {
                // The struct index is reserved before the layout builds,
                // so self-referential fields resolve mid-construction.
                let instance = self.ensure_class(ty)?;
                let key = format!("$struct:{}", self.bundle.classes[instance].key);
                let struct_ty = self.types.reserve(&key);
                Ok(ref_null(struct_ty))
            }
            TypeKind::Interface(_) => {
                self.ensure_iface(ty)?;
                Ok(ref_null(self.base.obj_root))
            }
            TypeKind::Mixin(_) => Err(CodegenError::Unsupported(
                "mixin types dissolve into their applying classes".into(),
            )),
            TypeKind::Distinct { inner, .. } => self.val_type(inner),
            TypeKind::Symbol(_) => Ok(ValType::Ref(RefType::ANYREF)),
            TypeKind::TypeParam(p) => Err(CodegenError::Unsubstituted(p.name)),
            TypeKind::This(_) => Err(CodegenError::Unsubstituted("This".into())),
        }
    }

    fn union_val_type(&mut self, ty: TypeId) -> Result<ValType> {
        let types = &self.program.types;
        let decls = &self.program.decls;
        let inner = types.without_null(ty);
        let nullable = inner != ty;
        let members: Vec<TypeId> = match types.kind(inner) {
            TypeKind::Union(members) => members,
            _ => vec![inner],
        };
        if members.is_empty() {
            return Ok(ValType::Ref(RefType::new_abstract(AbstractHeapType::None, true, false)));
        }
        let all_refs = members
            .iter()
            .all(|&m| quill_types::is_reference(types, decls, m));
        if all_refs {
            // Reference unions are held as eqref and cast on narrowed
            // reads.
            let _ = nullable;
            for &m in &members {
                // Make sure every branch's layout exists.
                let _ = self.val_type(m)?;
            }
            return Ok(ValType::Ref(RefType::EQREF));
        }
        // Scalar unions must share one base.
        let mut base = None;
        for &m in &members {
            let wide = self.program.types.widened(m);
            match base {
                None => base = Some(wide),
                Some(b) if b == wide => {}
                Some(_) => {
                    return Err(CodegenError::Unsupported(
                        "union of scalar types with different representations".into(),
                    ));
                }
            }
        }
        self.val_type(base.expect("non-empty"))
    }

    /// Fixed-array wasm type for an element type.
    pub(crate) fn array_type(&mut self, elem: TypeId) -> Result<u32> {
        let key = format!(
            "$arr:{}",
            type_key(&self.program.types, &self.program.decls, elem)
        );
        if let Some(idx) = self.types.get(&key) {
            if self.types.is_defined(&key) {
                return Ok(idx);
            }
        }
        let val = self.val_type(elem)?;
        let idx = self.types.reserve(&key);
        self.types.define(
            idx,
            types::final_subtype(CompositeInnerType::Array(wasm_encoder::ArrayType(
                FieldType {
                    element_type: StorageType::Val(val),
                    mutable: true,
                },
            ))),
        );
        Ok(idx)
    }

    /// Growable-array wasm type: `struct { len: mut i32, data: mut ref }`.
    pub(crate) fn dyn_array_type(&mut self, elem: TypeId) -> Result<u32> {
        let key = format!(
            "$dynarr:{}",
            type_key(&self.program.types, &self.program.decls, elem)
        );
        if let Some(idx) = self.types.get(&key) {
            if self.types.is_defined(&key) {
                return Ok(idx);
            }
        }
        let payload = self.array_type(elem)?;
        let idx = self.types.reserve(&key);
        self.types.define(
            idx,
            types::final_subtype(types::struct_type(vec![
                (StorageType::Val(ValType::I32), true),
                (StorageType::Val(ref_null(payload)), true),
            ])),
        );
        Ok(idx)
    }

    /// Struct type for a tuple or record canonicalization. Keyed by the
    /// type itself, so `{x,y}` and `{y,x}` share one wasm type.
    fn tuple_type(&mut self, ty: TypeId, elems: &[TypeId]) -> Result<u32> {
        let key = format!(
            "$tup:{}",
            type_key(&self.program.types, &self.program.decls, ty)
        );
        if let Some(idx) = self.types.get(&key) {
            if self.types.is_defined(&key) {
                return Ok(idx);
            }
        }
        let idx = self.types.reserve(&key);
        let mut fields = Vec::with_capacity(elems.len());
        for &e in elems {
            fields.push((StorageType::Val(self.val_type(e)?), true));
        }
        self.types.define(idx, types::final_subtype(types::struct_type(fields)));
        Ok(idx)
    }

    /// The (closure base struct, code function type) pair for a
    /// function shape. The code type's first parameter is the closure
    /// base itself (a self-referential pair inside the rec group).
    pub(crate) fn closure_types(&mut self, params: &[TypeId], ret: TypeId) -> Result<(u32, u32)> {
        let mut key = String::from("$clos(");
        for &p in params {
            key.push_str(&type_key(&self.program.types, &self.program.decls, p));
            key.push(',');
        }
        key.push_str(")->");
        key.push_str(&type_key(&self.program.types, &self.program.decls, ret));

        let code_key = format!("{key}#code");
        if let Some(base) = self.types.get(&key) {
            if self.types.is_defined(&key) {
                return Ok((base, self.types.get(&code_key).expect("paired")));
            }
        }
        let base = self.types.reserve(&key);
        let code = self.types.reserve(&code_key);

        let mut code_params = vec![ref_null(base)];
        for &p in params {
            code_params.push(self.val_type(p)?);
        }
        let code_results = if ret == TypeId::VOID {
            vec![]
        } else {
            vec![self.val_type(ret)?]
        };
        self.types.define(
            code,
            types::final_subtype(CompositeInnerType::Func(wasm_encoder::FuncType::new(
                code_params,
                code_results,
            ))),
        );
        self.types.define(
            base,
            types::open_subtype(
                types::struct_type(vec![(
                    StorageType::Val(ValType::Ref(RefType {
                        nullable: false,
                        heap_type: HeapType::Concrete(code),
                    })),
                    false,
                )]),
                None,
            ),
        );
        Ok((base, code))
    }

    /// A concrete closure shape extending the base with capture fields.
    pub(crate) fn closure_shape(
        &mut self,
        base: u32,
        code: u32,
        captures: &[ValType],
    ) -> u32 {
        let key = format!("$closshape:{base}:{captures:?}");
        if let Some(idx) = self.types.get(&key) {
            return idx;
        }
        let idx = self.types.reserve(&key);
        let mut fields = vec![(
            StorageType::Val(ValType::Ref(RefType {
                nullable: false,
                heap_type: HeapType::Concrete(code),
            })),
            false,
        )];
        for &c in captures {
            fields.push((StorageType::Val(c), false));
        }
        self.types
            .define(idx, types::open_subtype(types::struct_type(fields), Some(base)));
        idx
    }

    /// A one-field mutable cell boxing a captured mutable variable.
    pub(crate) fn box_type(&mut self, ty: TypeId) -> Result<u32> {
        let key = format!(
            "$box:{}",
            type_key(&self.program.types, &self.program.decls, ty)
        );
        if let Some(idx) = self.types.get(&key) {
            if self.types.is_defined(&key) {
                return Ok(idx);
            }
        }
        let val = self.val_type(ty)?;
        let idx = self.types.reserve(&key);
        self.types.define(
            idx,
            types::final_subtype(types::struct_type(vec![(StorageType::Val(val), true)])),
        );
        Ok(idx)
    }

    pub(crate) fn block_type(&mut self, ty: TypeId) -> Result<BlockType> {
        if ty == TypeId::VOID {
            Ok(BlockType::Empty)
        } else {
            Ok(BlockType::Result(self.val_type(ty)?))
        }
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Register (and lay out) a concrete class specialization.
    pub(crate) fn ensure_class(&mut self, ty: TypeId) -> Result<usize> {
        let TypeKind::Class(r) = self.program.types.kind(ty) else {
            return Err(CodegenError::MissingSpecialization(format!(
                "not a class type: {}",
                type_key(&self.program.types, &self.program.decls, ty)
            )));
        };
        self.check_concrete(&r.args)?;
        let key = type_key(&self.program.types, &self.program.decls, ty);
        if let Some(&idx) = self.bundle.class_by_key.get(&key) {
            return Ok(idx);
        }

        let base_name = Bundle::decl_base_name(&self.program.decls, r.decl);
        let hint = if r.args.is_empty() {
            base_name
        } else {
            let mut name = base_name;
            for &a in &r.args {
                name.push('_');
                name.push_str(&type_key(&self.program.types, &self.program.decls, a));
            }
            name
        };
        let name = self.bundle.names.claim(&hint);
        let idx = self.bundle.classes.len();
        self.bundle.classes.push(ClassInstance {
            decl: r.decl,
            args: r.args.clone(),
            ty,
            key: key.clone(),
            name,
        });
        self.bundle.class_by_key.insert(key, idx);
        self.layouts.push(None);

        self.build_layout(idx)?;
        Ok(idx)
    }

    /// Register a concrete interface specialization and assign its
    /// closed-world id.
    pub(crate) fn ensure_iface(&mut self, ty: TypeId) -> Result<usize> {
        let TypeKind::Interface(r) = self.program.types.kind(ty) else {
            return Err(CodegenError::MissingSpecialization(format!(
                "not an interface type: {}",
                type_key(&self.program.types, &self.program.decls, ty)
            )));
        };
        self.check_concrete(&r.args)?;
        let key = type_key(&self.program.types, &self.program.decls, ty);
        if let Some(&idx) = self.bundle.iface_by_key.get(&key) {
            return Ok(idx);
        }
        let idx = self.bundle.ifaces.len();
        let id = idx as i32;
        self.bundle.ifaces.push(IfaceInstance {
            decl: r.decl,
            args: r.args.clone(),
            ty,
            key: key.clone(),
            id,
        });
        self.bundle.iface_by_key.insert(key, idx);

        // Interface vtable struct: one typed funcref per method, this
        // typed as the object root.
        self.iface_vtable_type(idx)?;

        // The per-interface itable search helper.
        let finder_ty = {
            let ivt = self.iface_vtable_type(idx)?;
            self.types.func_type(
                vec![ref_null(self.base.itab)],
                vec![ValType::Ref(RefType {
                    nullable: false,
                    heap_type: HeapType::Concrete(ivt),
                })],
            )
        };
        let name = format!("itable_find_{idx}");
        let finder = self.funcs.declare(name, finder_ty);
        self.pending.push(Pending::IfaceFinder { index: finder, iface: idx });
        self.iface_finders.insert(idx, finder);
        Ok(idx)
    }

    /// The interface vtable struct type for an interface instance.
    pub(crate) fn iface_vtable_type(&mut self, iface: usize) -> Result<u32> {
        let inst_key = self.bundle.ifaces[iface].key.clone();
        let key = format!("$ivt:{inst_key}");
        if let Some(idx) = self.types.get(&key) {
            if self.types.is_defined(&key) {
                return Ok(idx);
            }
        }
        let idx = self.types.reserve(&key);
        let methods = self.iface_method_sigs(iface)?;
        let mut fields = Vec::with_capacity(methods.len());
        for (params, ret) in methods {
            let fty = self.iface_method_func_type(&params, ret)?;
            fields.push((
                StorageType::Val(ValType::Ref(RefType {
                    nullable: false,
                    heap_type: HeapType::Concrete(fty),
                })),
                false,
            ));
        }
        self.types.define(idx, types::final_subtype(types::struct_type(fields)));
        Ok(idx)
    }

    /// Substituted (params, return) of each method of an interface
    /// instance, in member order.
    pub(crate) fn iface_method_sigs(&mut self, iface: usize) -> Result<Vec<(Vec<TypeId>, TypeId)>> {
        let inst = &self.bundle.ifaces[iface];
        let info = self
            .program
            .decls
            .interface_info(inst.decl)
            .ok_or_else(|| CodegenError::MissingSpecialization(inst.key.clone()))?;
        let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(info.scope, &names, &inst.args);
        let mut out = Vec::new();
        for member in &info.members {
            if let quill_types::MemberSigKind::Method {
                params,
                return_type,
                ..
            } = &member.kind
            {
                let params = params
                    .iter()
                    .map(|&p| instantiate_type(&self.program.types, p, &subst))
                    .collect();
                let ret = instantiate_type(&self.program.types, *return_type, &subst);
                out.push((params, ret));
            }
        }
        Ok(out)
    }

    /// Function type of an interface slot: `(objRoot, params...) -> ret`.
    fn iface_method_func_type(&mut self, params: &[TypeId], ret: TypeId) -> Result<u32> {
        let mut wasm_params = vec![ref_null(self.base.obj_root)];
        for &p in params {
            wasm_params.push(self.val_type(p)?);
        }
        let results = if ret == TypeId::VOID {
            vec![]
        } else {
            vec![self.val_type(ret)?]
        };
        Ok(self.types.func_type(wasm_params, results))
    }

    /// Register a concrete function specialization.
    pub(crate) fn ensure_func(&mut self, decl: DeclId, type_args: Vec<TypeId>) -> Result<u32> {
        self.check_concrete(&type_args)?;
        let mut key = format!("fn:{decl}");
        for &a in &type_args {
            key.push(':');
            key.push_str(&type_key(&self.program.types, &self.program.decls, a));
        }
        if let Some(&idx) = self.bundle.func_by_key.get(&key) {
            return Ok(self.bundle.funcs[idx].index);
        }

        let info = self
            .program
            .decls
            .function_info(decl)
            .ok_or_else(|| CodegenError::MissingSpecialization(key.clone()))?
            .clone();
        let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(info.scope, &names, &type_args);
        let mut params = Vec::with_capacity(info.params.len());
        for &p in &info.params {
            params.push(self.val_type(instantiate_type(&self.program.types, p, &subst))?);
        }
        let ret = instantiate_type(&self.program.types, info.return_type, &subst);
        let results = if ret == TypeId::VOID {
            vec![]
        } else {
            vec![self.val_type(ret)?]
        };
        let type_idx = self.types.func_type(params, results);

        let base_name = Bundle::decl_base_name(&self.program.decls, decl);
        let name = self.bundle.names.claim(&base_name);
        let index = self.funcs.declare(name.clone(), type_idx);
        let entry = FuncInstance {
            decl,
            args: type_args.clone(),
            key: key.clone(),
            index,
            name,
        };
        self.bundle.func_by_key.insert(key, self.bundle.funcs.len());
        self.bundle.funcs.push(entry);
        self.pending.push(Pending::Func {
            index,
            decl,
            type_args,
        });
        Ok(index)
    }

    fn check_concrete(&self, args: &[TypeId]) -> Result<()> {
        for &a in args {
            if let TypeKind::TypeParam(p) = self.program.types.kind(a) {
                return Err(CodegenError::Unsubstituted(p.name));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Orchestration
    // =========================================================================

    fn run(&mut self) -> Result<Vec<u8>> {
        self.init_base_types();
        self.declare_user_globals()?;
        self.collect_roots()?;
        self.lower_top_level()?;
        while let Some(item) = self.pending.pop() {
            self.lower_pending(item)?;
        }
        debug!(
            classes = self.bundle.classes.len(),
            interfaces = self.bundle.ifaces.len(),
            functions = self.funcs.types.len(),
            "bundle complete"
        );
        self.finish()
    }

    fn declare_user_globals(&mut self) -> Result<()> {
        for i in 0..self.bundle.ast.globals.len() {
            let def = &self.bundle.ast.globals[i];
            let node = def.node;
            let library_path = def.library.path.clone();
            let name = def.stmt.name.name.clone();
            let ty = self
                .program
                .sema
                .type_of(node)
                .ok_or_else(|| CodegenError::MissingSpecialization(format!("global '{name}'")))?;
            let val = self.val_type(ty)?;
            let global_name = format!("{}_{}", names::library_prefix(&library_path), name);
            let idx = self.push_global(val, true, zero_init(val), &global_name);
            self.user_globals.insert(node, idx);
        }
        Ok(())
    }

    fn collect_roots(&mut self) -> Result<()> {
        // Entry-library exports are always roots.
        let entry_stmts: Vec<&quill_ast::Stmt> = self
            .bundle
            .ast
            .entry
            .stmts
            .iter()
            .filter(|s| s.is_exported())
            .collect();
        for stmt in entry_stmts {
            match &stmt.kind {
                StmtKind::Func(f) if f.type_params.is_empty() => {
                    if let Some(decl) = self
                        .program
                        .decls
                        .lookup(&self.bundle.ast.entry.path, &f.name.name)
                    {
                        self.ensure_func(decl, Vec::new())?;
                    }
                }
                StmtKind::Class(c) if c.type_params.is_empty() => {
                    if let Some(decl) = self
                        .program
                        .decls
                        .lookup(&self.bundle.ast.entry.path, &c.name.name)
                    {
                        let info = self.program.decls.class_info(decl);
                        let is_abstract = info.is_some_and(|i| {
                            i.flags.contains(quill_types::ClassFlags::ABSTRACT)
                        });
                        if !is_abstract {
                            let ty = self.program.types.class(decl, Vec::new());
                            self.ensure_class(ty)?;
                        }
                    }
                }
                _ => {}
            }
        }

        if !self.options.dce {
            // Keep everything: every non-generic class and function of
            // every library, plus every concrete checker-recorded
            // specialization.
            let all: Vec<(DeclId, DeclKind)> = self
                .program
                .decls
                .iter()
                .map(|(id, data)| (id, data.kind))
                .collect();
            for (decl, kind) in all {
                match kind {
                    DeclKind::Class => {
                        let info = self.program.decls.class_info(decl);
                        let generic = info.is_some_and(|i| !i.type_params.is_empty());
                        let abstract_ = info.is_some_and(|i| {
                            i.flags.contains(quill_types::ClassFlags::ABSTRACT)
                        });
                        let extension = info.is_some_and(|i| {
                            i.flags.contains(quill_types::ClassFlags::EXTENSION)
                        });
                        if !generic && !abstract_ && !extension {
                            let ty = self.program.types.class(decl, Vec::new());
                            self.ensure_class(ty)?;
                        }
                    }
                    DeclKind::Function => {
                        let info = self.program.decls.function_info(decl);
                        let generic = info.is_some_and(|i| !i.type_params.is_empty());
                        let intrinsic = info.is_some_and(|i| i.intrinsic.is_some());
                        if !generic && !intrinsic {
                            self.ensure_func(decl, Vec::new())?;
                        }
                    }
                    _ => {}
                }
            }
            for spec in self.program.sema.specializations().to_vec() {
                if self.check_concrete(&spec.args).is_err() {
                    continue;
                }
                match self.program.decls.get(spec.decl).kind {
                    DeclKind::Class => {
                        let info = self.program.decls.class_info(spec.decl);
                        let abstract_ = info.is_some_and(|i| {
                            i.flags.contains(quill_types::ClassFlags::ABSTRACT)
                        });
                        if !abstract_ {
                            self.ensure_class(spec.ty)?;
                        }
                    }
                    DeclKind::Interface => {
                        self.ensure_iface(spec.ty)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn lower_top_level(&mut self) -> Result<()> {
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 0, None);
        let top_level: Vec<(String, Vec<TopLevelItem>)> = self
            .bundle
            .ast
            .top_level
            .iter()
            .map(|(library, items)| {
                let items = items
                    .iter()
                    .map(|item| match item {
                        TopItem::Global(i) => TopLevelItem::Global(*i),
                        TopItem::Stmt(s) => TopLevelItem::Stmt(*s),
                    })
                    .collect();
                (library.path.clone(), items)
            })
            .collect();

        for (_path, items) in &top_level {
            for item in items {
                match item {
                    TopLevelItem::Global(i) => {
                        let def_node = self.bundle.ast.globals[*i].node;
                        let init = self.bundle.ast.globals[*i].stmt.init.clone();
                        let declared = self
                            .program
                            .sema
                            .type_of(def_node)
                            .ok_or(CodegenError::ErroneousInput)?;
                        let produced = self.lower_expr(&mut ctx, &init)?;
                        self.coerce(&mut ctx, produced, declared)?;
                        let global = self.user_globals[&def_node];
                        ctx.emit(Instruction::GlobalSet(global));
                    }
                    TopLevelItem::Stmt(stmt) => {
                        self.lower_stmt(&mut ctx, stmt)?;
                    }
                }
            }
        }
        self.start_body = ctx.code.clone();
        self.start_locals = ctx.locals.clone();
        Ok(())
    }

    fn lower_pending(&mut self, item: Pending) -> Result<()> {
        match item {
            Pending::Func {
                index,
                decl,
                type_args,
            } => self.lower_function(index, decl, &type_args),
            Pending::Method {
                index,
                class,
                member,
                margs,
            } => self.lower_method(index, class, member, &margs),
            Pending::FieldGet { index, class, field } => self.lower_field_get(index, class, field),
            Pending::FieldSet { index, class, field } => self.lower_field_set(index, class, field),
            Pending::Accessor { index, class, member } => self.lower_accessor(index, class, member),
            Pending::Ctor { index, class } => self.lower_ctor(index, class),
            Pending::SlotAdapter {
                index,
                class,
                slot,
                target,
            } => self.lower_slot_adapter(index, class, slot, target),
            Pending::IfaceAdapter {
                index,
                class,
                iface,
                method,
            } => self.lower_iface_adapter(index, class, iface, method),
            Pending::IfaceFinder { index, iface } => self.lower_iface_finder(index, iface),
            Pending::ExtMethod {
                index,
                decl,
                member,
                margs,
            } => self.lower_ext_method(index, decl, member, &margs),
        }
    }

    // =========================================================================
    // Globals and strings
    // =========================================================================

    pub(crate) fn push_global(
        &mut self,
        ty: ValType,
        mutable: bool,
        init: ConstExpr,
        name: &str,
    ) -> u32 {
        let idx = self.globals.len() as u32;
        self.globals.push(GlobalSlot {
            ty,
            mutable,
            init,
            name: name.to_string(),
        });
        idx
    }

    /// The deduplicated global holding a string literal.
    pub(crate) fn string_literal(&mut self, text: &str) -> u32 {
        if let Some(&(global, _)) = self.strings.get(text) {
            return global;
        }
        let data_idx = self.string_data.len() as u32;
        self.string_data.push(text.as_bytes().to_vec());
        let global = self.push_global(
            ref_null(self.base.str_),
            true,
            ConstExpr::ref_null(HeapType::Concrete(self.base.str_)),
            &format!("str_{data_idx}"),
        );
        self.strings.insert(text.to_string(), (global, data_idx));
        global
    }

    /// The stable strings-array global of a template expression.
    pub(crate) fn template_strings(&mut self, node: NodeId, quasis: &[String]) -> u32 {
        if let Some(&global) = self.templates.get(&node) {
            return global;
        }
        let global = self.push_global(
            ref_null(self.base.str_arr),
            true,
            ConstExpr::ref_null(HeapType::Concrete(self.base.str_arr)),
            &format!("tpl_{}", self.templates.len()),
        );
        self.templates.insert(node, global);
        self.template_init.push((global, quasis.to_vec()));
        // The quasi literals themselves are interned strings.
        for q in quasis {
            self.string_literal(q);
        }
        global
    }

    /// Mark a function as `ref.func`-referenced.
    pub(crate) fn declare_func_ref(&mut self, index: u32) {
        if !self.declared_funcs.contains(&index) {
            self.declared_funcs.push(index);
        }
    }

    // =========================================================================
    // Finish: start function, sections
    // =========================================================================

    fn finish(&mut self) -> Result<Vec<u8>> {
        let start_index = self.build_start_function()?;

        let mut module = Module::new();

        // Type section: one recursion group.
        let mut type_section = TypeSection::new();
        let subtypes = std::mem::take(&mut self.types).into_subtypes();
        type_section.ty().rec(subtypes);
        module.section(&type_section);

        // Function section.
        let mut function_section = FunctionSection::new();
        for &type_idx in &self.funcs.types {
            function_section.function(type_idx);
        }
        module.section(&function_section);

        // Tag section: one exception tag per module.
        let mut tag_section = TagSection::new();
        tag_section.tag(TagType {
            kind: TagKind::Exception,
            func_type_idx: self.base.exn_func,
        });
        module.section(&tag_section);

        // Global section.
        let mut global_section = GlobalSection::new();
        for slot in &self.globals {
            global_section.global(
                GlobalType {
                    val_type: slot.ty,
                    mutable: slot.mutable,
                    shared: false,
                },
                &slot.init,
            );
        }
        module.section(&global_section);

        // Export section: entry-library exports under original names,
        // plus the exception tag.
        let mut export_section = ExportSection::new();
        self.build_exports(&mut export_section)?;
        module.section(&export_section);

        // Start section.
        module.section(&StartSection {
            function_index: start_index,
        });

        // Declarative element segment for every ref.func.
        if !self.declared_funcs.is_empty() {
            let mut element_section = ElementSection::new();
            element_section.declared(Elements::Functions(self.declared_funcs.clone().into()));
            module.section(&element_section);
        }

        // Data count + code + data.
        module.section(&DataCountSection {
            count: self.string_data.len() as u32,
        });

        let mut code_section = CodeSection::new();
        for (idx, body) in self.funcs.bodies.iter().enumerate() {
            match body {
                Some(body) => {
                    code_section.function(body);
                }
                None => {
                    return Err(CodegenError::MissingSpecialization(format!(
                        "function '{}' declared but never lowered",
                        self.funcs.names[idx]
                    )));
                }
            }
        }
        module.section(&code_section);

        if !self.string_data.is_empty() {
            let mut data_section = DataSection::new();
            for bytes in &self.string_data {
                data_section.passive(bytes.iter().copied());
            }
            module.section(&data_section);
        }

        // Name section with original names, in debug builds.
        if self.options.debug {
            let mut names = NameSection::new();
            names.module("quill");
            let mut func_names = NameMap::new();
            for (idx, name) in self.funcs.names.iter().enumerate() {
                func_names.append(idx as u32, name);
            }
            names.functions(&func_names);
            let mut global_names = NameMap::new();
            for (idx, slot) in self.globals.iter().enumerate() {
                global_names.append(idx as u32, &slot.name);
            }
            names.globals(&global_names);
            module.section(&names);
        }

        Ok(module.finish())
    }

    fn build_exports(&mut self, exports: &mut ExportSection) -> Result<()> {
        let entry_path = self.bundle.ast.entry.path.clone();
        for stmt in &self.bundle.ast.entry.stmts {
            if !stmt.is_exported() {
                continue;
            }
            match &stmt.kind {
                StmtKind::Func(f) if f.type_params.is_empty() => {
                    if let Some(decl) = self.program.decls.lookup(&entry_path, &f.name.name) {
                        let key = format!("fn:{decl}");
                        if let Some(&i) = self.bundle.func_by_key.get(&key) {
                            exports.export(
                                &f.name.name,
                                ExportKind::Func,
                                self.bundle.funcs[i].index,
                            );
                        }
                    }
                }
                StmtKind::Let(l) => {
                    if let Some(&global) = self.user_globals.get(&stmt.id) {
                        exports.export(&l.name.name, ExportKind::Global, global);
                    }
                }
                StmtKind::Class(c) if c.type_params.is_empty() => {
                    if let Some(decl) = self.program.decls.lookup(&entry_path, &c.name.name) {
                        let ty = self.program.types.class(decl, Vec::new());
                        let key = type_key(&self.program.types, &self.program.decls, ty);
                        if let Some(&idx) = self.bundle.class_by_key.get(&key) {
                            if let Some(layout) = &self.layouts[idx] {
                                // The class's constructor function is its
                                // host-visible surface.
                                exports.export(&c.name.name, ExportKind::Func, layout.new_func);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        exports.export("exception", ExportKind::Tag, 0);
        Ok(())
    }

    /// Assemble the start function: string and template-array globals
    /// first, then vtables, then the per-library top-level code in
    /// dependency order.
    fn build_start_function(&mut self) -> Result<u32> {
        let mut code: Vec<Instruction<'static>> = Vec::new();

        // String literal globals.
        let mut strings: Vec<(String, u32, u32)> = self
            .strings
            .iter()
            .map(|(text, &(global, data))| (text.clone(), global, data))
            .collect();
        strings.sort_by_key(|&(_, global, _)| global);
        for (text, global, data) in &strings {
            code.push(Instruction::I32Const(0));
            code.push(Instruction::I32Const(text.len() as i32));
            code.push(Instruction::ArrayNewData {
                array_type_index: self.base.chars,
                array_data_index: *data,
            });
            code.push(Instruction::StructNew(self.base.str_));
            code.push(Instruction::GlobalSet(*global));
        }

        // Template strings arrays (stable identities).
        for (global, quasis) in self.template_init.clone() {
            for q in &quasis {
                let string_global = self.strings[q.as_str()].0;
                code.push(Instruction::GlobalGet(string_global));
            }
            code.push(Instruction::ArrayNewFixed {
                array_type_index: self.base.str_arr,
                array_size: quasis.len() as u32,
            });
            code.push(Instruction::GlobalSet(global));
        }

        // Vtables (and itables) for every concrete class instance.
        let vtable_code = self.build_vtable_init()?;
        code.extend(vtable_code);

        // Library top-level code.
        code.append(&mut self.start_body);
        code.push(Instruction::End);

        let type_idx = self.types.func_type(vec![], vec![]);
        let index = self.funcs.declare("start".to_string(), type_idx);
        let mut function = Function::new_with_locals_types(self.start_locals.clone());
        for ins in &code {
            function.instruction(ins);
        }
        self.funcs.define(index, function);
        Ok(index)
    }
}

enum TopLevelItem<'a> {
    Global(usize),
    Stmt(&'a quill_ast::Stmt),
}

/// `(ref null $idx)`
pub(crate) fn ref_null(idx: u32) -> ValType {
    ValType::Ref(RefType {
        nullable: true,
        heap_type: HeapType::Concrete(idx),
    })
}

pub(crate) fn eqref() -> ValType {
    ValType::Ref(RefType::EQREF)
}

/// The zero/null constant initializer for a storage type.
pub(crate) fn zero_init(ty: ValType) -> ConstExpr {
    match ty {
        ValType::I32 => ConstExpr::i32_const(0),
        ValType::I64 => ConstExpr::i64_const(0),
        ValType::F32 => ConstExpr::f32_const(0.0_f32.into()),
        ValType::F64 => ConstExpr::f64_const(0.0.into()),
        ValType::Ref(r) => ConstExpr::ref_null(r.heap_type),
        ValType::V128 => ConstExpr::i32_const(0),
    }
}
