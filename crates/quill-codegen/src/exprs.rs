//! Expression lowering.
//!
//! Public-field reads and writes dispatch through vtable accessor slots
//! (an indirect call per access); private fields are direct struct
//! loads. Short-circuit operators lower to `if`, so the untaken operand
//! is never emitted into the taken path.

use crate::lower::FuncCtx;
use crate::{CodegenError, Generator, Pending, Result, ref_null};
use quill_ast::{Expr, ExprKind, NodeId};
use quill_sema::Binding;
use quill_types::{
    ClassFlags, DeclId, MemberFlags, MemberSigKind, TypeId, TypeKind, TypeSubstitution,
    Visibility, instantiate_type, type_key,
};
use wasm_encoder::{AbstractHeapType, HeapType, Instruction, ValType};

impl<'a> Generator<'a> {
    pub(crate) fn lower_expr(&mut self, ctx: &mut FuncCtx, expr: &Expr) -> Result<TypeId> {
        let node_ty = self.ty_of(ctx, expr.id)?;
        match &expr.kind {
            ExprKind::Int(v) => {
                match self.program.types.widened(node_ty) {
                    TypeId::I64 => ctx.emit(Instruction::I64Const(*v)),
                    TypeId::F64 => ctx.emit(Instruction::F64Const((*v as f64).into())),
                    TypeId::F32 => ctx.emit(Instruction::F32Const((*v as f32).into())),
                    _ => ctx.emit(Instruction::I32Const(*v as i32)),
                }
                Ok(node_ty)
            }
            ExprKind::Float(v) => {
                match self.program.types.widened(node_ty) {
                    TypeId::F32 => ctx.emit(Instruction::F32Const((*v as f32).into())),
                    _ => ctx.emit(Instruction::F64Const((*v).into())),
                }
                Ok(node_ty)
            }
            ExprKind::Bool(v) => {
                ctx.emit(Instruction::I32Const(i32::from(*v)));
                Ok(node_ty)
            }
            ExprKind::Str(text) => {
                let global = self.string_literal(text);
                ctx.emit(Instruction::GlobalGet(global));
                Ok(node_ty)
            }
            ExprKind::Null => {
                ctx.emit(Instruction::RefNull(HeapType::Abstract {
                    shared: false,
                    ty: AbstractHeapType::None,
                }));
                Ok(node_ty)
            }
            ExprKind::This => {
                self.emit_this(ctx)?;
                Ok(node_ty)
            }
            ExprKind::Ident(_) => self.lower_ident(ctx, expr, node_ty),
            ExprKind::Member { object, .. } => self.lower_member_read(ctx, expr, object, node_ty),
            ExprKind::Index { object, index } => self.lower_index_read(ctx, expr, object, index),
            ExprKind::Call { callee, args, .. } => self.lower_call(ctx, expr, callee, args),
            ExprKind::New { args, .. } => self.lower_new(ctx, expr, args, node_ty),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(ctx, expr, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => self.lower_unary(ctx, *op, operand, node_ty),
            ExprKind::Assign { target, value } => {
                self.lower_assign(ctx, target, value)?;
                Ok(TypeId::VOID)
            }
            ExprKind::Closure { params, body, .. } => {
                self.lower_closure(ctx, expr, params, body, node_ty)
            }
            ExprKind::FixedArray(elems) => self.lower_fixed_array(ctx, elems, node_ty),
            ExprKind::Tuple(elems) => self.lower_tuple(ctx, elems, node_ty),
            ExprKind::Record(fields) => self.lower_record(ctx, fields, node_ty),
            ExprKind::Match { scrutinee, arms } => {
                self.lower_match(ctx, expr, scrutinee, arms, node_ty)
            }
            ExprKind::Cast { operand, .. } => self.lower_cast(ctx, operand, node_ty),
            ExprKind::Is { operand, ty } => self.lower_is(ctx, operand, ty),
            ExprKind::Template { tag, quasis, exprs } => {
                self.lower_template(ctx, expr, tag.as_deref(), quasis, exprs, node_ty)
            }
        }
    }

    pub(crate) fn emit_this(&mut self, ctx: &mut FuncCtx) -> Result<()> {
        if let Some(env) = &ctx.capture_env {
            if let Some(field) = env.this_field {
                let env_local = env.env_local;
                let shape = env.shape_ty;
                ctx.emit(Instruction::LocalGet(env_local));
                ctx.emit(Instruction::StructGet {
                    struct_type_index: shape,
                    field_index: field,
                });
                return Ok(());
            }
        }
        let this = ctx
            .this_local
            .ok_or_else(|| CodegenError::Unsupported("'this' outside a member body".into()))?;
        ctx.emit(Instruction::LocalGet(this));
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn lower_ident(&mut self, ctx: &mut FuncCtx, expr: &Expr, node_ty: TypeId) -> Result<TypeId> {
        let binding = self
            .binding_of_node(expr.id)
            .ok_or(CodegenError::ErroneousInput)?;
        match binding {
            Binding::Local { node, .. } => {
                let declared = self.ty_of(ctx, node)?;
                self.emit_local_read(ctx, node, declared)?;
                self.coerce(ctx, declared, node_ty)?;
                Ok(node_ty)
            }
            Binding::Global { node, .. } => {
                let declared = self.ty_of(ctx, node)?;
                let global = *self
                    .user_globals
                    .get(&node)
                    .ok_or_else(|| CodegenError::MissingSpecialization("global slot".into()))?;
                ctx.emit(Instruction::GlobalGet(global));
                self.coerce(ctx, declared, node_ty)?;
                Ok(node_ty)
            }
            Binding::Function(decl) => {
                self.emit_function_value(ctx, decl, expr.id, node_ty)?;
                Ok(node_ty)
            }
            Binding::Field { class, member } => {
                // Implicit-this field read.
                let this_ty = self.this_type(ctx)?;
                self.emit_this(ctx)?;
                self.emit_field_read(ctx, this_ty, class, member, node_ty)
            }
            Binding::Accessor { class, member } => {
                let this_ty = self.this_type(ctx)?;
                self.emit_this(ctx)?;
                self.emit_accessor_read(ctx, this_ty, class, member, node_ty)
            }
            Binding::Class(_) | Binding::Enum(_) => Ok(TypeId::VOID),
            _ => Err(CodegenError::Unsupported(
                "this name is not a value at runtime".into(),
            )),
        }
    }

    pub(crate) fn binding_of_node(&self, node: NodeId) -> Option<Binding> {
        self.program.sema.binding(node).cloned()
    }

    /// Push a local's value (through its box when boxed; through the
    /// capture environment inside closures).
    fn emit_local_read(&mut self, ctx: &mut FuncCtx, node: NodeId, declared: TypeId) -> Result<()> {
        let boxed = ctx.boxed.contains(&node)
            || ctx
                .capture_env
                .as_ref()
                .is_some_and(|env| env.fields.contains_key(&node) && self.box_hint(ctx, node));
        if let Some(&local) = ctx.local_map.get(&node) {
            ctx.emit(Instruction::LocalGet(local));
        } else if let Some(env) = &ctx.capture_env {
            let Some(&field) = env.fields.get(&node) else {
                return Err(CodegenError::MissingSpecialization(
                    "captured binding slot".into(),
                ));
            };
            let env_local = env.env_local;
            let shape = env.shape_ty;
            ctx.emit(Instruction::LocalGet(env_local));
            ctx.emit(Instruction::StructGet {
                struct_type_index: shape,
                field_index: field,
            });
        } else {
            return Err(CodegenError::MissingSpecialization("local slot".into()));
        }
        if boxed {
            let box_ty = self.box_type(declared)?;
            ctx.emit(Instruction::StructGet {
                struct_type_index: box_ty,
                field_index: 0,
            });
        }
        Ok(())
    }

    /// Whether a captured binding travels as a box (mutable capture).
    fn box_hint(&self, ctx: &FuncCtx, node: NodeId) -> bool {
        ctx.boxed.contains(&node)
    }

    fn lower_member_read(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        object: &Expr,
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let binding = self.binding_of_node(expr.id);
        match binding {
            Some(Binding::EnumMember { index, .. }) => {
                ctx.emit(Instruction::I32Const(index as i32));
                Ok(node_ty)
            }
            Some(Binding::Field { class, member }) => {
                // Static fields live in globals.
                let sig_flags = self
                    .program
                    .decls
                    .class_info(class)
                    .and_then(|i| i.members.get(member as usize))
                    .map(|m| m.flags)
                    .unwrap_or_default();
                if sig_flags.contains(MemberFlags::STATIC) {
                    let instance = {
                        let ty = self.program.types.class(class, Vec::new());
                        self.ensure_class(ty)?
                    };
                    let global = *self
                        .static_globals
                        .get(&(instance, member))
                        .ok_or_else(|| {
                            CodegenError::MissingSpecialization("static field global".into())
                        })?;
                    ctx.emit(Instruction::GlobalGet(global));
                    return Ok(node_ty);
                }
                let object_ty = self.lower_receiver(ctx, object)?;
                self.emit_field_read(ctx, object_ty, class, member, node_ty)
            }
            Some(Binding::Accessor { class, member }) => {
                let object_ty = self.lower_receiver(ctx, object)?;
                self.emit_accessor_read(ctx, object_ty, class, member, node_ty)
            }
            Some(Binding::Method { .. }) | Some(Binding::InterfaceMethod { .. }) => Err(
                CodegenError::Unsupported("method references are not first-class values".into()),
            ),
            _ => {
                // Record field access (structural).
                let object_ty = self.ty_of(ctx, object.id)?;
                self.lower_expr(ctx, object)?;
                if let (TypeKind::Record(fields), ExprKind::Member { property, .. }) =
                    (self.program.types.kind(object_ty), &expr.kind)
                {
                    let pos = fields
                        .iter()
                        .position(|(name, _)| name == property)
                        .ok_or(CodegenError::ErroneousInput)?;
                    let elems: Vec<TypeId> = fields.iter().map(|(_, t)| *t).collect();
                    let struct_ty = self.record_struct(object_ty, &elems)?;
                    ctx.emit(Instruction::StructGet {
                        struct_type_index: struct_ty,
                        field_index: pos as u32,
                    });
                    return Ok(node_ty);
                }
                Err(CodegenError::Unsupported("member access".into()))
            }
        }
    }

    /// Lower an object expression and return its concrete type.
    fn lower_receiver(&mut self, ctx: &mut FuncCtx, object: &Expr) -> Result<TypeId> {
        let ty = self.lower_expr(ctx, object)?;
        Ok(ty)
    }

    /// Field read on an already-pushed receiver: vtable getter slot for
    /// public fields, direct struct load for private ones.
    fn emit_field_read(
        &mut self,
        ctx: &mut FuncCtx,
        object_ty: TypeId,
        class: DeclId,
        member: u32,
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let instance = self.receiver_instance(ctx, object_ty)?;
        let sig = self
            .program
            .decls
            .class_info(class)
            .and_then(|i| i.members.get(member as usize).cloned())
            .ok_or(CodegenError::ErroneousInput)?;
        if sig.visibility == Visibility::Private {
            let (struct_ty, pos, field_ty) = {
                let layout = self.layouts[instance].as_ref().expect("layout");
                let idx = layout
                    .field_named(&sig.name)
                    .ok_or(CodegenError::ErroneousInput)?;
                (layout.struct_ty, layout.field_pos(idx), layout.fields[idx].ty)
            };
            ctx.emit(Instruction::StructGet {
                struct_type_index: struct_ty,
                field_index: pos,
            });
            self.coerce(ctx, field_ty, node_ty)?;
            return Ok(node_ty);
        }
        self.emit_slot_call(ctx, instance, &format!("get_{}", sig.name), &[], node_ty)
    }

    fn emit_accessor_read(
        &mut self,
        ctx: &mut FuncCtx,
        object_ty: TypeId,
        class: DeclId,
        member: u32,
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let instance = self.receiver_instance(ctx, object_ty)?;
        let sig = self
            .program
            .decls
            .class_info(class)
            .and_then(|i| i.members.get(member as usize).cloned())
            .ok_or(CodegenError::ErroneousInput)?;
        if sig.visibility == Visibility::Private {
            // Private accessor: direct call on the declaring instance.
            let (target, target_member) = self.resolve_member_on_instance(instance, class, member)?;
            let func = *self.layouts[target]
                .as_ref()
                .expect("layout")
                .method_funcs
                .get(&target_member)
                .ok_or(CodegenError::ErroneousInput)?;
            ctx.emit(Instruction::Call(func));
            return Ok(node_ty);
        }
        self.emit_slot_call(ctx, instance, &format!("get_{}", sig.name), &[], node_ty)
    }

    /// The class instance behind a receiver type. Inside mixin bodies
    /// the static receiver is the mixin itself; the applying class is
    /// the lowering instance.
    pub(crate) fn receiver_instance(&mut self, ctx: &FuncCtx, object_ty: TypeId) -> Result<usize> {
        match self.program.types.kind(object_ty) {
            TypeKind::Class(_) => self.ensure_class(object_ty),
            TypeKind::Mixin(_) | TypeKind::This(_) => ctx
                .this_instance
                .ok_or_else(|| CodegenError::MissingSpecialization("mixin receiver".into())),
            other => Err(CodegenError::MissingSpecialization(format!(
                "class receiver, found {other:?}"
            ))),
        }
    }

    /// Resolve a (declaring decl, member index) pair against a concrete
    /// receiver instance. Mixin-declared members are matched by their
    /// AST node in the applying class's merged member list.
    pub(crate) fn resolve_member_on_instance(
        &self,
        instance: usize,
        class: DeclId,
        member: u32,
    ) -> Result<(usize, u32)> {
        if self.program.decls.get(class).kind == quill_types::DeclKind::Mixin {
            let node = self
                .program
                .decls
                .class_info(class)
                .and_then(|i| i.members.get(member as usize))
                .map(|m| m.node)
                .ok_or(CodegenError::ErroneousInput)?;
            let mut current = instance;
            loop {
                let decl = self.bundle.classes[current].decl;
                if let Some(info) = self.program.decls.class_info(decl) {
                    if let Some(pos) = info.members.iter().position(|m| m.node == node) {
                        return Ok((current, pos as u32));
                    }
                }
                match self.layouts[current].as_ref().and_then(|l| l.super_instance) {
                    Some(sup) => current = sup,
                    None => {
                        return Err(CodegenError::MissingSpecialization(
                            "mixin member on receiver chain".into(),
                        ));
                    }
                }
            }
        }
        let target = self.declaring_instance_along_chain(instance, class)?;
        Ok((target, member))
    }

    /// Walk a layout chain to the instance whose decl is `class`.
    fn declaring_instance_along_chain(&self, start: usize, class: DeclId) -> Result<usize> {
        let mut current = start;
        loop {
            if self.bundle.classes[current].decl == class {
                return Ok(current);
            }
            match self.layouts[current].as_ref().and_then(|l| l.super_instance) {
                Some(sup) => current = sup,
                None => {
                    return Err(CodegenError::MissingSpecialization(
                        "declaring class on receiver chain".into(),
                    ));
                }
            }
        }
    }

    /// Call a vtable slot: receiver is already on the stack; `args` are
    /// lowered here against the slot's introduced signature.
    fn emit_slot_call(
        &mut self,
        ctx: &mut FuncCtx,
        instance: usize,
        slot_name: &str,
        args: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let (struct_ty, vtable_ty, slot_pos, func_ty, params, ret) = {
            let layout = self.layouts[instance].as_ref().expect("layout");
            let pos = layout.slot_named(slot_name).ok_or_else(|| {
                CodegenError::MissingSpecialization(format!("vtable slot '{slot_name}'"))
            })?;
            let slot = &layout.slots[pos];
            (
                layout.struct_ty,
                layout.vtable_ty,
                pos as u32,
                slot.func_ty,
                slot.params.clone(),
                slot.ret,
            )
        };

        // Stash the receiver so it can be both the argument and the
        // dispatch source.
        let receiver = ctx.new_local(ref_null(struct_ty));
        ctx.emit(Instruction::LocalTee(receiver));
        for (arg, &param) in args.iter().zip(&params) {
            let produced = self.lower_expr(ctx, arg)?;
            self.coerce(ctx, produced, param)?;
        }
        ctx.emit(Instruction::LocalGet(receiver));
        ctx.emit(Instruction::StructGet {
            struct_type_index: struct_ty,
            field_index: 0,
        });
        ctx.emit(Instruction::StructGet {
            struct_type_index: vtable_ty,
            field_index: slot_pos + 1,
        });
        ctx.emit(Instruction::CallRef(func_ty));
        if ret != TypeId::VOID && node_ty == TypeId::VOID {
            ctx.emit(Instruction::Drop);
        } else if ret != TypeId::VOID {
            self.coerce(ctx, ret, node_ty)?;
        }
        Ok(node_ty)
    }

    fn lower_index_read(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        object: &Expr,
        index: &Expr,
    ) -> Result<TypeId> {
        let node_ty = self.ty_of(ctx, expr.id)?;
        let object_ty = self.lower_expr(ctx, object)?;
        match self.program.types.kind(object_ty) {
            TypeKind::FixedArray(elem) => {
                let arr = self.array_type(elem)?;
                self.lower_expr(ctx, index)?;
                ctx.emit(Instruction::ArrayGet(arr));
                self.coerce(ctx, elem, node_ty)?;
                Ok(node_ty)
            }
            TypeKind::Array(elem) => {
                let dynarr = self.dyn_array_type(elem)?;
                let arr = self.array_type(elem)?;
                ctx.emit(Instruction::StructGet {
                    struct_type_index: dynarr,
                    field_index: 1,
                });
                self.lower_expr(ctx, index)?;
                ctx.emit(Instruction::ArrayGet(arr));
                self.coerce(ctx, elem, node_ty)?;
                Ok(node_ty)
            }
            TypeKind::Tuple(elems) => {
                let struct_ty = self.record_struct(object_ty, &elems)?;
                let ExprKind::Int(i) = index.kind else {
                    return Err(CodegenError::Unsupported(
                        "dynamic tuple indexing".into(),
                    ));
                };
                ctx.emit(Instruction::StructGet {
                    struct_type_index: struct_ty,
                    field_index: i as u32,
                });
                Ok(node_ty)
            }
            other => Err(CodegenError::Unsupported(format!(
                "indexing a {other:?}"
            ))),
        }
    }

    /// The struct type of a tuple/record canonicalization.
    pub(crate) fn record_struct(&mut self, ty: TypeId, elems: &[TypeId]) -> Result<u32> {
        let key = format!(
            "$tup:{}",
            type_key(&self.program.types, &self.program.decls, ty)
        );
        if let Some(idx) = self.types.get(&key) {
            if self.types.is_defined(&key) {
                return Ok(idx);
            }
        }
        // Mint through val_type, which owns the definition.
        let _ = self.val_type(ty)?;
        let _ = elems;
        self.types
            .get(&key)
            .ok_or_else(|| CodegenError::MissingSpecialization(key))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn lower_call(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        callee: &Expr,
        args: &[Expr],
    ) -> Result<TypeId> {
        let node_ty = self.ty_of(ctx, expr.id)?;

        // Concrete call-site type arguments for generic callees.
        let call_args: Vec<TypeId> = self
            .program
            .sema
            .call_args(expr.id)
            .map(|a| {
                a.iter()
                    .map(|&t| instantiate_type(&self.program.types, t, &ctx.subst))
                    .collect()
            })
            .unwrap_or_default();

        // Direct function call.
        if let Some(Binding::Function(decl)) = self.binding_of_node(callee.id) {
            let info = self
                .program
                .decls
                .function_info(decl)
                .ok_or(CodegenError::ErroneousInput)?
                .clone();
            if let Some(intrinsic) = &info.intrinsic {
                return self.lower_intrinsic(ctx, intrinsic, &call_args, args, node_ty);
            }
            let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
            let subst = TypeSubstitution::for_params(info.scope, &names, &call_args);
            for (arg, &param) in args.iter().zip(&info.params) {
                let param = instantiate_type(&self.program.types, param, &subst);
                let produced = self.lower_expr(ctx, arg)?;
                self.coerce(ctx, produced, param)?;
            }
            let func = self.ensure_func(decl, call_args)?;
            ctx.emit(Instruction::Call(func));
            let ret = instantiate_type(&self.program.types, info.return_type, &subst);
            if ret == TypeId::NEVER {
                ctx.emit(Instruction::Unreachable);
            }
            return Ok(node_ty);
        }

        // Method call through a member (or bare name inside a class).
        let method_binding = self.binding_of_node(callee.id);
        match method_binding {
            Some(Binding::Method { class, member }) => {
                let object_ty = match &callee.kind {
                    ExprKind::Member { object, .. } => {
                        let ty = self.ty_of(ctx, object.id)?;
                        Some((Some((**object).clone()), ty))
                    }
                    _ => None,
                };
                let (object_expr, object_ty) = match object_ty {
                    Some((o, t)) => (o, t),
                    None => (None, ctx_this_type(self, ctx)?),
                };
                return self.lower_method_call(
                    ctx, expr, object_expr.as_ref(), object_ty, class, member, &call_args, args,
                    node_ty,
                );
            }
            Some(Binding::InterfaceMethod { iface, member }) => {
                let ExprKind::Member { object, .. } = &callee.kind else {
                    return Err(CodegenError::Unsupported("interface call shape".into()));
                };
                let object_ty = self.ty_of(ctx, object.id)?;
                return self.lower_iface_call(ctx, object, object_ty, iface, member, args, node_ty);
            }
            Some(Binding::Accessor { .. }) | Some(Binding::Field { .. }) => {
                // Calling a field/accessor value: read it, then call the
                // closure.
            }
            _ => {}
        }

        // Closure-valued call.
        let callee_ty = self.lower_expr(ctx, callee)?;
        let TypeKind::Function(shape) = self.program.types.kind(callee_ty) else {
            return Err(CodegenError::Unsupported("indirect call target".into()));
        };
        let (base, code) = self.closure_types(&shape.params, shape.return_type)?;
        let tmp = ctx.new_local(ref_null(base));
        ctx.emit(Instruction::LocalTee(tmp));
        for (arg, &param) in args.iter().zip(&shape.params) {
            let produced = self.lower_expr(ctx, arg)?;
            self.coerce(ctx, produced, param)?;
        }
        ctx.emit(Instruction::LocalGet(tmp));
        ctx.emit(Instruction::StructGet {
            struct_type_index: base,
            field_index: 0,
        });
        ctx.emit(Instruction::CallRef(code));
        if shape.return_type != TypeId::VOID {
            self.coerce(ctx, shape.return_type, node_ty)?;
        }
        Ok(node_ty)
    }

    fn lower_method_call(
        &mut self,
        ctx: &mut FuncCtx,
        _expr: &Expr,
        object: Option<&Expr>,
        object_ty: TypeId,
        class: DeclId,
        member: u32,
        margs: &[TypeId],
        args: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let class_info = self
            .program
            .decls
            .class_info(class)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let sig = class_info
            .members
            .get(member as usize)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let MemberSigKind::Method {
            type_params,
            scope,
            params,
            return_type,
            intrinsic,
        } = &sig.kind
        else {
            return Err(CodegenError::ErroneousInput);
        };
        if intrinsic.is_some() {
            return Err(CodegenError::Unsupported("intrinsic method call".into()));
        }

        // Extension-class methods are statically dispatched free
        // functions taking the inner value.
        if class_info.flags.contains(ClassFlags::EXTENSION) {
            match object {
                Some(object) => {
                    self.lower_expr(ctx, object)?;
                }
                None => self.emit_this(ctx)?,
            }
            for arg in args {
                self.lower_expr(ctx, arg)?;
            }
            let func = self.ensure_extension_method(class, member, margs)?;
            ctx.emit(Instruction::Call(func));
            return Ok(node_ty);
        }

        let is_static = sig.flags.contains(MemberFlags::STATIC);
        if is_static {
            let instance = {
                let ty = self.program.types.class(class, Vec::new());
                self.ensure_class(ty)?
            };
            for arg in args {
                self.lower_expr(ctx, arg)?;
            }
            let func = *self.layouts[instance]
                .as_ref()
                .expect("layout")
                .method_funcs
                .get(&member)
                .ok_or(CodegenError::ErroneousInput)?;
            ctx.emit(Instruction::Call(func));
            return Ok(node_ty);
        }

        // Push the receiver.
        match object {
            Some(object) => {
                self.lower_expr(ctx, object)?;
            }
            None => self.emit_this(ctx)?,
        }
        let instance = self.receiver_instance(ctx, object_ty)?;

        // Generic methods and non-virtual methods dispatch statically.
        let virtual_ = sig.flags.contains(MemberFlags::VIRTUAL) && type_params.is_empty();
        if !virtual_ {
            let (target_instance, target_member) =
                self.resolve_member_on_instance(instance, class, member)?;
            let receiver_subst = self.member_body_subst(target_instance, sig.node)?;
            let mnames: Vec<String> = type_params.iter().map(|p| p.name.clone()).collect();
            let msubst = TypeSubstitution::for_params(*scope, &mnames, margs);
            let full = receiver_subst.then(&self.program.types, &msubst);
            for (arg, &param) in args.iter().zip(params) {
                let param = instantiate_type(&self.program.types, param, &full);
                let produced = self.lower_expr(ctx, arg)?;
                self.coerce(ctx, produced, param)?;
            }
            let func = if type_params.is_empty() {
                *self.layouts[target_instance]
                    .as_ref()
                    .expect("layout")
                    .method_funcs
                    .get(&target_member)
                    .ok_or(CodegenError::ErroneousInput)?
            } else {
                self.ensure_method_instance(target_instance, target_member, margs)?
            };
            ctx.emit(Instruction::Call(func));
            let ret = instantiate_type(&self.program.types, *return_type, &full);
            if ret == TypeId::NEVER {
                ctx.emit(Instruction::Unreachable);
            }
            return Ok(node_ty);
        }

        self.emit_slot_call(ctx, instance, &sig.slot_name(), args, node_ty)
    }

    fn lower_iface_call(
        &mut self,
        ctx: &mut FuncCtx,
        object: &Expr,
        object_ty: TypeId,
        iface_decl: DeclId,
        member: u32,
        args: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let TypeKind::Interface(_) = self.program.types.kind(object_ty) else {
            return Err(CodegenError::MissingSpecialization(
                "interface receiver".into(),
            ));
        };
        let iface = self.ensure_iface(object_ty)?;
        let _ = iface_decl;
        let sigs = self.iface_method_sigs(iface)?;
        let (params, ret) = sigs
            .get(member as usize)
            .cloned()
            .ok_or(CodegenError::ErroneousInput)?;

        self.lower_expr(ctx, object)?;
        let receiver = ctx.new_local(ref_null(self.base.obj_root));
        ctx.emit(Instruction::LocalTee(receiver));
        for (arg, &param) in args.iter().zip(&params) {
            let produced = self.lower_expr(ctx, arg)?;
            self.coerce(ctx, produced, param)?;
        }

        // Receiver's itable -> this interface's vtable -> slot.
        let ivt = self.iface_vtable_type(iface)?;
        let finder = *self
            .iface_finders
            .get(&iface)
            .ok_or_else(|| CodegenError::MissingSpecialization("itable finder".into()))?;
        ctx.emit(Instruction::LocalGet(receiver));
        ctx.emit(Instruction::StructGet {
            struct_type_index: self.base.obj_root,
            field_index: 0,
        });
        ctx.emit(Instruction::StructGet {
            struct_type_index: self.base.vt_base,
            field_index: 0,
        });
        ctx.emit(Instruction::Call(finder));
        ctx.emit(Instruction::StructGet {
            struct_type_index: ivt,
            field_index: member,
        });
        let mut wasm_params = vec![ref_null(self.base.obj_root)];
        for &p in &params {
            wasm_params.push(self.val_type(p)?);
        }
        let results = if ret == TypeId::VOID {
            vec![]
        } else {
            vec![self.val_type(ret)?]
        };
        let fty = self.types.func_type(wasm_params, results);
        ctx.emit(Instruction::CallRef(fty));
        if ret != TypeId::VOID {
            self.coerce(ctx, ret, node_ty)?;
        }
        Ok(node_ty)
    }

    /// Intrinsics lower to single instructions.
    fn lower_intrinsic(
        &mut self,
        ctx: &mut FuncCtx,
        name: &str,
        call_args: &[TypeId],
        args: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let elem = call_args.first().copied().unwrap_or(TypeId::I32);
        match name {
            "__array_len" => {
                self.lower_expr(ctx, &args[0])?;
                ctx.emit(Instruction::ArrayLen);
                Ok(node_ty)
            }
            "__array_get" => {
                let arr = self.array_type(elem)?;
                self.lower_expr(ctx, &args[0])?;
                self.lower_expr(ctx, &args[1])?;
                ctx.emit(Instruction::ArrayGet(arr));
                Ok(node_ty)
            }
            "__array_set" => {
                let arr = self.array_type(elem)?;
                self.lower_expr(ctx, &args[0])?;
                self.lower_expr(ctx, &args[1])?;
                let produced = self.lower_expr(ctx, &args[2])?;
                self.coerce(ctx, produced, elem)?;
                ctx.emit(Instruction::ArraySet(arr));
                Ok(TypeId::VOID)
            }
            "__array_new" => {
                let arr = self.array_type(elem)?;
                // array.new takes (init value, length).
                let len = ctx.new_local(ValType::I32);
                self.lower_expr(ctx, &args[0])?;
                ctx.emit(Instruction::LocalSet(len));
                let produced = self.lower_expr(ctx, &args[1])?;
                self.coerce(ctx, produced, elem)?;
                ctx.emit(Instruction::LocalGet(len));
                ctx.emit(Instruction::ArrayNew(arr));
                Ok(node_ty)
            }
            "unreachable" => {
                ctx.emit(Instruction::Unreachable);
                Ok(TypeId::NEVER)
            }
            other => Err(CodegenError::Unsupported(format!("intrinsic '{other}'"))),
        }
    }

    fn lower_new(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        args: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let instance = self.ensure_class(node_ty)?;
        let decl = self.bundle.classes[instance].decl;
        let info = self
            .program
            .decls
            .class_info(decl)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let subst = self.layouts[instance]
            .as_ref()
            .expect("layout")
            .subst
            .clone();
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
        for (arg, &param) in args.iter().zip(&ctor_params) {
            let produced = self.lower_expr(ctx, arg)?;
            self.coerce(ctx, produced, param)?;
        }
        let new_func = self.layouts[instance].as_ref().expect("layout").new_func;
        ctx.emit(Instruction::Call(new_func));
        let _ = expr;
        Ok(node_ty)
    }

    /// A generic-method specialization of a class instance.
    pub(crate) fn ensure_method_instance(
        &mut self,
        class: usize,
        member: u32,
        margs: &[TypeId],
    ) -> Result<u32> {
        let mut key = format!("mi:{}:{member}", self.bundle.classes[class].key);
        for &a in margs {
            key.push(':');
            key.push_str(&type_key(&self.program.types, &self.program.decls, a));
        }
        if let Some(&func) = self.method_instances.get(&key) {
            return Ok(func);
        }
        let decl = self.bundle.classes[class].decl;
        let sig = self
            .program
            .decls
            .class_info(decl)
            .and_then(|i| i.members.get(member as usize).cloned())
            .ok_or(CodegenError::ErroneousInput)?;
        let MemberSigKind::Method {
            type_params,
            scope,
            params,
            return_type,
            ..
        } = &sig.kind
        else {
            return Err(CodegenError::ErroneousInput);
        };
        let class_subst = self.layouts[class]
            .as_ref()
            .expect("layout")
            .subst
            .clone();
        let names: Vec<String> = type_params.iter().map(|p| p.name.clone()).collect();
        let msubst = TypeSubstitution::for_params(*scope, &names, margs);
        let full = class_subst.then(&self.program.types, &msubst);

        let struct_ty = self.layouts[class].as_ref().expect("layout").struct_ty;
        let mut wasm_params = Vec::with_capacity(params.len() + 1);
        if !sig.flags.contains(MemberFlags::STATIC) {
            wasm_params.push(ref_null(struct_ty));
        }
        for &p in params {
            wasm_params.push(self.val_type(instantiate_type(&self.program.types, p, &full))?);
        }
        let ret = instantiate_type(&self.program.types, *return_type, &full);
        let results = if ret == TypeId::VOID {
            vec![]
        } else {
            vec![self.val_type(ret)?]
        };
        let fty = self.types.func_type(wasm_params, results);
        let name = format!("{}_{}_spec", self.bundle.classes[class].name, sig.name);
        let func = self.funcs.declare(name, fty);
        self.method_instances.insert(key, func);
        self.pending.push(Pending::Method {
            index: func,
            class,
            member,
            margs: margs.to_vec(),
        });
        Ok(func)
    }

    /// An extension-class method, compiled as a free function whose
    /// first parameter is the inner value.
    pub(crate) fn ensure_extension_method(
        &mut self,
        decl: DeclId,
        member: u32,
        margs: &[TypeId],
    ) -> Result<u32> {
        let mut key = format!("ext:{decl}:{member}");
        for &a in margs {
            key.push(':');
            key.push_str(&type_key(&self.program.types, &self.program.decls, a));
        }
        if let Some(&func) = self.method_instances.get(&key) {
            return Ok(func);
        }
        let info = self
            .program
            .decls
            .class_info(decl)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let inner = info
            .extension_on
            .ok_or_else(|| CodegenError::MissingSpecialization("extension inner type".into()))?;
        let sig = info
            .members
            .get(member as usize)
            .cloned()
            .ok_or(CodegenError::ErroneousInput)?;
        let MemberSigKind::Method {
            type_params,
            scope,
            params,
            return_type,
            ..
        } = &sig.kind
        else {
            return Err(CodegenError::ErroneousInput);
        };
        let names: Vec<String> = type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(*scope, &names, margs);

        let mut wasm_params = vec![self.val_type(inner)?];
        for &p in params {
            wasm_params.push(self.val_type(instantiate_type(&self.program.types, p, &subst))?);
        }
        let ret = instantiate_type(&self.program.types, *return_type, &subst);
        let results = if ret == TypeId::VOID {
            vec![]
        } else {
            vec![self.val_type(ret)?]
        };
        let fty = self.types.func_type(wasm_params, results);
        let base = crate::Bundle::decl_base_name(&self.program.decls, decl);
        let name = self.bundle.names.claim(&format!("{base}_{}", sig.name));
        let func = self.funcs.declare(name, fty);
        self.method_instances.insert(key, func);
        self.pending.push(Pending::ExtMethod {
            index: func,
            decl,
            member,
            margs: margs.to_vec(),
        });
        Ok(func)
    }
}

/// The concrete `this` type of the enclosing member body.
fn ctx_this_type(generator: &Generator<'_>, ctx: &FuncCtx) -> Result<TypeId> {
    let instance = ctx
        .this_instance
        .ok_or_else(|| CodegenError::Unsupported("'this' outside a member".into()))?;
    Ok(generator.bundle.classes[instance].ty)
}
