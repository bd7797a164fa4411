//! Class struct layouts and vtables.
//!
//! A class struct is `[vtableRef, superclass fields…, own fields…]`;
//! the field prefix mirrors the inheritance chain, so struct subtyping
//! follows class subtyping. Every public field gets get/set accessor
//! slots in the vtable; private fields are direct struct loads. A
//! vtable slot's function type is fixed by the slot-introducing class;
//! overrides whose receiver is a subclass are bridged by one-cast
//! adapters so vtable struct types can form declared subtype chains.

use crate::{CodegenError, Generator, Pending, Result, ref_null, zero_init};
use quill_types::{
    ClassFlags, MemberFlags, MemberSigKind, TypeId, TypeKind, TypeRef, TypeSubstitution,
    Visibility, instantiate_type, relate,
};
use rustc_hash::FxHashMap;
use wasm_encoder::{ConstExpr, HeapType, Instruction, StorageType, ValType};

/// One stored (non-static) field of a class layout.
pub(crate) struct FieldSlot {
    pub name: String,
    /// Concrete field type.
    pub ty: TypeId,
    /// Class instance that declared the field.
    pub owner: usize,
    /// Member index in the owner's declaration.
    pub member: u32,
    pub private: bool,
}

pub(crate) enum SlotImpl {
    Func(u32),
    /// Abstract declaration with no body at this level.
    Abstract,
}

/// One virtual-dispatch slot.
pub(crate) struct VtableSlot {
    /// Conflict name (`get_x`/`set_x` for accessors and field
    /// accessors, the method name otherwise).
    pub name: String,
    /// Class instance that introduced the slot (fixes the signature).
    pub intro: usize,
    /// The slot's function type.
    pub func_ty: u32,
    /// Parameters (without the receiver) and return at the
    /// introduction signature.
    pub params: Vec<TypeId>,
    pub ret: TypeId,
    pub impl_: SlotImpl,
}

pub(crate) struct ClassLayout {
    pub super_instance: Option<usize>,
    pub fields: Vec<FieldSlot>,
    pub slots: Vec<VtableSlot>,
    pub struct_ty: u32,
    pub vtable_ty: u32,
    /// The `new` function allocating and initialising an instance.
    pub new_func: u32,
    pub is_abstract: bool,
    /// Class type parameters -> concrete arguments.
    pub subst: TypeSubstitution,
    /// Member index -> direct function index, for every non-generic
    /// method with a body (virtual or not).
    pub method_funcs: FxHashMap<u32, u32>,
    /// (interface instance, adapter function per interface method).
    pub itables: Vec<(usize, Vec<u32>)>,
}

impl ClassLayout {
    /// Struct field position of a layout field (0 is the vtable).
    #[must_use]
    pub fn field_pos(&self, index: usize) -> u32 {
        index as u32 + 1
    }

    /// Find a stored field by name.
    #[must_use]
    pub fn field_named(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Find a vtable slot by conflict name.
    #[must_use]
    pub fn slot_named(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }
}

impl<'a> Generator<'a> {
    pub(crate) fn build_layout(&mut self, instance: usize) -> Result<()> {
        let inst_decl = self.bundle.classes[instance].decl;
        let inst_args = self.bundle.classes[instance].args.clone();
        let inst_key = self.bundle.classes[instance].key.clone();
        let inst_name = self.bundle.classes[instance].name.clone();

        let info = self
            .program
            .decls
            .class_info(inst_decl)
            .ok_or_else(|| CodegenError::MissingSpecialization(inst_key.clone()))?
            .clone();
        let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(info.scope, &names, &inst_args);
        let is_abstract = info.flags.contains(ClassFlags::ABSTRACT);

        // Reserve the struct/vtable indices before anything recursive.
        let struct_ty = self.types.reserve(&format!("$struct:{inst_key}"));
        let vtable_ty = self.types.reserve(&format!("$vt:{inst_key}"));

        // Superclass first: its layout is our prefix.
        let super_instance = match info.extends {
            Some(extends) => {
                let super_ty = instantiate_type(&self.program.types, extends, &subst);
                let idx = self.ensure_class(super_ty)?;
                if self.layouts[idx].is_none() {
                    return Err(CodegenError::MissingSpecialization(format!(
                        "cyclic inheritance through '{inst_key}'"
                    )));
                }
                Some(idx)
            }
            None => None,
        };

        let mut fields: Vec<FieldSlot> = Vec::new();
        let mut slots: Vec<VtableSlot> = Vec::new();
        if let Some(super_idx) = super_instance {
            let super_layout = self.layouts[super_idx].as_ref().expect("built above");
            fields.extend(super_layout.fields.iter().map(|f| FieldSlot {
                name: f.name.clone(),
                ty: f.ty,
                owner: f.owner,
                member: f.member,
                private: f.private,
            }));
            slots.extend(super_layout.slots.iter().map(|s| VtableSlot {
                name: s.name.clone(),
                intro: s.intro,
                func_ty: s.func_ty,
                params: s.params.clone(),
                ret: s.ret,
                impl_: match s.impl_ {
                    SlotImpl::Func(f) => SlotImpl::Func(f),
                    SlotImpl::Abstract => SlotImpl::Abstract,
                },
            }));
        }

        let mut method_funcs: FxHashMap<u32, u32> = FxHashMap::default();

        // Own members, in declaration order (mixin members included:
        // the checker merged them ahead of the class's own).
        for (member_idx, member) in info.members.iter().enumerate() {
            let member_idx = member_idx as u32;
            match &member.kind {
                MemberSigKind::Field { ty } => {
                    let concrete = instantiate_type(&self.program.types, *ty, &subst);
                    if member.flags.contains(MemberFlags::STATIC) {
                        let val = self.val_type(concrete)?;
                        let global = self.push_global(
                            val,
                            true,
                            zero_init(val),
                            &format!("{inst_name}_{}", member.name),
                        );
                        self.static_globals.insert((instance, member_idx), global);
                        continue;
                    }
                    let existing = fields.iter().position(|f| f.name == member.name);
                    match existing {
                        Some(pos) => {
                            // Redeclared storage shares the inherited
                            // position.
                            fields[pos].owner = instance;
                            fields[pos].member = member_idx;
                        }
                        None => fields.push(FieldSlot {
                            name: member.name.clone(),
                            ty: concrete,
                            owner: instance,
                            member: member_idx,
                            private: member.visibility == Visibility::Private,
                        }),
                    }
                    if member.visibility == Visibility::Public {
                        let field_pos = fields.iter().position(|f| f.name == member.name).unwrap();
                        self.add_field_accessor_slots(
                            instance,
                            struct_ty,
                            &mut slots,
                            &member.name,
                            concrete,
                            field_pos,
                        )?;
                    }
                }
                MemberSigKind::Method {
                    type_params,
                    params,
                    return_type,
                    intrinsic,
                    ..
                } => {
                    if intrinsic.is_some() {
                        continue;
                    }
                    let has_body = self
                        .bundle
                        .ast
                        .members
                        .get(&member.node)
                        .map(member_has_body)
                        .unwrap_or(false);
                    if !type_params.is_empty() {
                        // Generic methods are statically dispatched and
                        // monomorphized per call site.
                        continue;
                    }
                    let params: Vec<TypeId> = params
                        .iter()
                        .map(|&p| instantiate_type(&self.program.types, p, &subst))
                        .collect();
                    let ret = instantiate_type(&self.program.types, *return_type, &subst);

                    let func = if has_body {
                        let func = self.declare_method_func(
                            instance,
                            struct_ty,
                            &member.name,
                            &params,
                            ret,
                            member.flags.contains(MemberFlags::STATIC),
                        )?;
                        self.pending.push(Pending::Method {
                            index: func,
                            class: instance,
                            member: member_idx,
                            margs: Vec::new(),
                        });
                        method_funcs.insert(member_idx, func);
                        Some(func)
                    } else {
                        None
                    };

                    if member.flags.contains(MemberFlags::VIRTUAL)
                        || member.flags.contains(MemberFlags::ABSTRACT)
                    {
                        self.place_method_slot(
                            instance,
                            struct_ty,
                            &mut slots,
                            &member.name,
                            &params,
                            ret,
                            func,
                        )?;
                    }
                }
                MemberSigKind::Getter { ty } => {
                    let concrete = instantiate_type(&self.program.types, *ty, &subst);
                    let func = self.declare_method_func(
                        instance,
                        struct_ty,
                        &format!("get_{}", member.name),
                        &[],
                        concrete,
                        member.flags.contains(MemberFlags::STATIC),
                    )?;
                    self.pending.push(Pending::Accessor {
                        index: func,
                        class: instance,
                        member: member_idx,
                    });
                    method_funcs.insert(member_idx, func);
                    if member.visibility == Visibility::Public
                        && !member.flags.contains(MemberFlags::STATIC)
                    {
                        self.place_named_slot(
                            instance,
                            struct_ty,
                            &mut slots,
                            format!("get_{}", member.name),
                            &[],
                            concrete,
                            Some(func),
                        )?;
                    }
                }
                MemberSigKind::Setter { ty } => {
                    let concrete = instantiate_type(&self.program.types, *ty, &subst);
                    let func = self.declare_method_func(
                        instance,
                        struct_ty,
                        &format!("set_{}", member.name),
                        &[concrete],
                        TypeId::VOID,
                        member.flags.contains(MemberFlags::STATIC),
                    )?;
                    self.pending.push(Pending::Accessor {
                        index: func,
                        class: instance,
                        member: member_idx,
                    });
                    method_funcs.insert(member_idx, func);
                    if member.visibility == Visibility::Public
                        && !member.flags.contains(MemberFlags::STATIC)
                    {
                        self.place_named_slot(
                            instance,
                            struct_ty,
                            &mut slots,
                            format!("set_{}", member.name),
                            &[concrete],
                            TypeId::VOID,
                            Some(func),
                        )?;
                    }
                }
            }
        }

        // The `new` function.
        let ctor_params: Vec<TypeId> = info
            .ctor
            .as_ref()
            .map(|c| {
                c.params
                    .iter()
                    .map(|&p| instantiate_type(&self.program.types, p, &subst))
                    .collect()
            })
            .unwrap_or_default();
        let mut new_params = Vec::with_capacity(ctor_params.len());
        for &p in &ctor_params {
            new_params.push(self.val_type(p)?);
        }
        let new_ty = self
            .types
            .func_type(new_params, vec![ref_null(struct_ty)]);
        let new_func = self
            .funcs
            .declare(format!("new_{inst_name}"), new_ty);
        // Abstract classes are never allocated; their `new` lowers to
        // a single unreachable.
        self.pending.push(Pending::Ctor {
            index: new_func,
            class: instance,
        });

        // Interface side tables.
        let mut itables = Vec::new();
        if !is_abstract {
            let class_ref = TypeRef {
                decl: inst_decl,
                args: inst_args.clone(),
            };
            let ifaces =
                relate::implemented_interfaces(&self.program.types, &self.program.decls, &class_ref);
            for iface_ty in ifaces {
                if !matches!(self.program.types.kind(iface_ty), TypeKind::Interface(_)) {
                    continue;
                }
                let iface = self.ensure_iface(iface_ty)?;
                let sigs = self.iface_method_sigs(iface)?;
                let mut adapters = Vec::with_capacity(sigs.len());
                for (method_idx, (params, ret)) in sigs.iter().enumerate() {
                    let mut wasm_params = vec![ref_null(self.base.obj_root)];
                    for &p in params {
                        wasm_params.push(self.val_type(p)?);
                    }
                    let results = if *ret == TypeId::VOID {
                        vec![]
                    } else {
                        vec![self.val_type(*ret)?]
                    };
                    let fty = self.types.func_type(wasm_params, results);
                    let adapter = self.funcs.declare(
                        format!("{inst_name}_as_iface{iface}_m{method_idx}"),
                        fty,
                    );
                    self.pending.push(Pending::IfaceAdapter {
                        index: adapter,
                        class: instance,
                        iface,
                        method: method_idx as u32,
                    });
                    adapters.push(adapter);
                }
                itables.push((iface, adapters));
            }

            // The vtable global, filled by the start function.
            let vt_global = self.push_global(
                ref_null(vtable_ty),
                true,
                ConstExpr::ref_null(HeapType::Concrete(vtable_ty)),
                &format!("vt_{inst_name}"),
            );
            self.vtable_globals.insert(instance, vt_global);
        }

        // Define the struct and vtable types now the shapes are known.
        let mut struct_fields = vec![(
            StorageType::Val(ValType::Ref(wasm_encoder::RefType {
                nullable: false,
                heap_type: HeapType::Concrete(vtable_ty),
            })),
            false,
        )];
        for field in &fields {
            struct_fields.push((StorageType::Val(self.val_type(field.ty)?), true));
        }
        let super_struct = super_instance
            .map(|s| self.layouts[s].as_ref().expect("built").struct_ty)
            .unwrap_or(self.base.obj_root);
        self.types.define(
            struct_ty,
            crate::types::open_subtype(crate::types::struct_type(struct_fields), Some(super_struct)),
        );

        let mut vt_fields = vec![(
            StorageType::Val(ref_null(self.base.itab)),
            false,
        )];
        for slot in &slots {
            vt_fields.push((
                StorageType::Val(ValType::Ref(wasm_encoder::RefType {
                    nullable: false,
                    heap_type: HeapType::Concrete(slot.func_ty),
                })),
                false,
            ));
        }
        let super_vt = super_instance
            .map(|s| self.layouts[s].as_ref().expect("built").vtable_ty)
            .unwrap_or(self.base.vt_base);
        self.types.define(
            vtable_ty,
            crate::types::open_subtype(crate::types::struct_type(vt_fields), Some(super_vt)),
        );

        self.layouts[instance] = Some(ClassLayout {
            super_instance,
            fields,
            slots,
            struct_ty,
            vtable_ty,
            new_func,
            is_abstract,
            subst,
            method_funcs,
            itables,
        });
        Ok(())
    }

    /// Declare a method-shaped function: `(this?, params...) -> ret`.
    fn declare_method_func(
        &mut self,
        instance: usize,
        struct_ty: u32,
        name: &str,
        params: &[TypeId],
        ret: TypeId,
        is_static: bool,
    ) -> Result<u32> {
        let inst_name = self.bundle.classes[instance].name.clone();
        let mut wasm_params = Vec::with_capacity(params.len() + 1);
        if !is_static {
            wasm_params.push(ref_null(struct_ty));
        }
        for &p in params {
            wasm_params.push(self.val_type(p)?);
        }
        let results = if ret == TypeId::VOID {
            vec![]
        } else {
            vec![self.val_type(ret)?]
        };
        let fty = self.types.func_type(wasm_params, results);
        Ok(self.funcs.declare(format!("{inst_name}_{name}"), fty))
    }

    /// Slot function type at the introducing class.
    fn slot_func_type(
        &mut self,
        intro_struct: u32,
        params: &[TypeId],
        ret: TypeId,
    ) -> Result<u32> {
        let mut wasm_params = vec![ref_null(intro_struct)];
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

    fn add_field_accessor_slots(
        &mut self,
        instance: usize,
        struct_ty: u32,
        slots: &mut Vec<VtableSlot>,
        field_name: &str,
        field_ty: TypeId,
        field_pos: usize,
    ) -> Result<()> {
        let get_func = {
            let fty_params: &[TypeId] = &[];
            let func = self.declare_method_func(
                instance,
                struct_ty,
                &format!("get_{field_name}"),
                fty_params,
                field_ty,
                false,
            )?;
            self.pending.push(Pending::FieldGet {
                index: func,
                class: instance,
                field: field_pos,
            });
            func
        };
        self.place_named_slot(
            instance,
            struct_ty,
            slots,
            format!("get_{field_name}"),
            &[],
            field_ty,
            Some(get_func),
        )?;

        let set_func = {
            let func = self.declare_method_func(
                instance,
                struct_ty,
                &format!("set_{field_name}"),
                &[field_ty],
                TypeId::VOID,
                false,
            )?;
            self.pending.push(Pending::FieldSet {
                index: func,
                class: instance,
                field: field_pos,
            });
            func
        };
        self.place_named_slot(
            instance,
            struct_ty,
            slots,
            format!("set_{field_name}"),
            &[field_ty],
            TypeId::VOID,
            Some(set_func),
        )?;
        Ok(())
    }

    fn place_method_slot(
        &mut self,
        instance: usize,
        struct_ty: u32,
        slots: &mut Vec<VtableSlot>,
        name: &str,
        params: &[TypeId],
        ret: TypeId,
        func: Option<u32>,
    ) -> Result<()> {
        self.place_named_slot(instance, struct_ty, slots, name.to_string(), params, ret, func)
    }

    /// Insert or override a vtable slot. Overrides keep the slot's
    /// introduced signature; when the overriding class differs from the
    /// introducer, a cast adapter bridges the receiver type.
    fn place_named_slot(
        &mut self,
        instance: usize,
        struct_ty: u32,
        slots: &mut Vec<VtableSlot>,
        name: String,
        params: &[TypeId],
        ret: TypeId,
        func: Option<u32>,
    ) -> Result<()> {
        if let Some(pos) = slots.iter().position(|s| s.name == name) {
            // Override: the slot signature stays the introducer's.
            let intro = slots[pos].intro;
            let impl_ = match func {
                Some(target) if intro != instance => {
                    let adapter = self
                        .funcs
                        .declare(format!("{}_{name}_adapter", self.bundle.classes[instance].name), slots[pos].func_ty);
                    self.pending.push(Pending::SlotAdapter {
                        index: adapter,
                        class: instance,
                        slot: pos,
                        target,
                    });
                    SlotImpl::Func(adapter)
                }
                Some(target) => SlotImpl::Func(target),
                None => SlotImpl::Abstract,
            };
            slots[pos].impl_ = impl_;
            return Ok(());
        }

        let func_ty = self.slot_func_type(struct_ty, params, ret)?;
        slots.push(VtableSlot {
            name,
            intro: instance,
            func_ty,
            params: params.to_vec(),
            ret,
            impl_: match func {
                Some(f) => SlotImpl::Func(f),
                None => SlotImpl::Abstract,
            },
        });
        Ok(())
    }

    /// Start-function code building every concrete vtable (itable
    /// entries included).
    pub(crate) fn build_vtable_init(&mut self) -> Result<Vec<Instruction<'static>>> {
        let mut code = Vec::new();
        for instance in 0..self.bundle.classes.len() {
            let Some(&vt_global) = self.vtable_globals.get(&instance) else {
                continue;
            };
            let (vtable_ty, slot_impls, itables) = {
                let layout = self.layouts[instance]
                    .as_ref()
                    .expect("layouts are built when instances register");
                let impls: Vec<SlotImpl> = layout
                    .slots
                    .iter()
                    .map(|s| match s.impl_ {
                        SlotImpl::Func(f) => SlotImpl::Func(f),
                        SlotImpl::Abstract => SlotImpl::Abstract,
                    })
                    .collect();
                (layout.vtable_ty, impls, layout.itables.clone())
            };

            // itable.
            let entries = itables.len() as u32;
            for (iface, adapters) in &itables {
                code.push(Instruction::I32Const(self.bundle.ifaces[*iface].id));
                for &adapter in adapters {
                    self.declare_func_ref(adapter);
                    code.push(Instruction::RefFunc(adapter));
                }
                let ivt_ty = self.iface_vtable_type(*iface)?;
                code.push(Instruction::StructNew(ivt_ty));
                code.push(Instruction::StructNew(self.base.ientry));
            }
            code.push(Instruction::ArrayNewFixed {
                array_type_index: self.base.itab,
                array_size: entries,
            });

            // Slots.
            for (i, impl_) in slot_impls.iter().enumerate() {
                match impl_ {
                    SlotImpl::Func(f) => {
                        self.declare_func_ref(*f);
                        code.push(Instruction::RefFunc(*f));
                    }
                    SlotImpl::Abstract => {
                        let name = self.bundle.classes[instance].name.clone();
                        return Err(CodegenError::MissingSpecialization(format!(
                            "abstract slot {i} reached the concrete vtable of '{name}'"
                        )));
                    }
                }
            }
            code.push(Instruction::StructNew(vtable_ty));
            code.push(Instruction::GlobalSet(vt_global));
        }
        Ok(code)
    }
}

fn member_has_body(member: &&quill_ast::Member) -> bool {
    match &member.kind {
        quill_ast::MemberKind::Method(m) => m.body.is_some(),
        quill_ast::MemberKind::Accessor(_) => true,
        _ => false,
    }
}

