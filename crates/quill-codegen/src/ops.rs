//! Operators, literals, closures, matches, casts, and templates.

use crate::lower::{CaptureEnv, FuncCtx};
use crate::{CodegenError, Generator, Result, ref_null};
use quill_ast::{
    BinaryOp, ClosureBody, Expr, ExprKind, LitValue, MatchArm, NodeId, Param, Pattern,
    PatternKind, TypeAnn, UnaryOp,
};
use quill_sema::Binding;
use quill_types::{
    DeclId, MemberFlags, MemberSigKind, TypeId, TypeKind, TypeSubstitution, instantiate_type,
};
use rustc_hash::FxHashMap;
use wasm_encoder::{BlockType, HeapType, Instruction, ValType};

/// What a closure captures, in field order.
enum CaptureItem {
    /// A local by declaration node; boxed captures share the cell.
    Local { node: NodeId, boxed: bool },
    This,
}

impl<'a> Generator<'a> {
    // =========================================================================
    // Operators
    // =========================================================================

    pub(crate) fn lower_binary(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<TypeId> {
        let node_ty = self.ty_of(ctx, expr.id)?;
        match op {
            // Short-circuit: the right operand is emitted only into the
            // conditionally-taken arm.
            BinaryOp::And => {
                self.lower_expr(ctx, lhs)?;
                ctx.open_if(BlockType::Result(ValType::I32));
                self.lower_expr(ctx, rhs)?;
                ctx.emit(Instruction::Else);
                ctx.emit(Instruction::I32Const(0));
                ctx.close_block();
                Ok(node_ty)
            }
            BinaryOp::Or => {
                self.lower_expr(ctx, lhs)?;
                ctx.open_if(BlockType::Result(ValType::I32));
                ctx.emit(Instruction::I32Const(1));
                ctx.emit(Instruction::Else);
                self.lower_expr(ctx, rhs)?;
                ctx.close_block();
                Ok(node_ty)
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                self.lower_equality(ctx, op, lhs, rhs)?;
                Ok(node_ty)
            }
            BinaryOp::Add => {
                let lhs_ty = self.ty_of(ctx, lhs.id)?;
                if self.program.types.widened(lhs_ty) == TypeId::STRING {
                    self.lower_expr(ctx, lhs)?;
                    self.lower_expr(ctx, rhs)?;
                    let concat = self.helper_str_concat()?;
                    ctx.emit(Instruction::Call(concat));
                    return Ok(node_ty);
                }
                self.lower_numeric_binary(ctx, op, lhs, rhs, node_ty)
            }
            _ => self.lower_numeric_binary(ctx, op, lhs, rhs, node_ty),
        }
    }

    fn lower_numeric_binary(
        &mut self,
        ctx: &mut FuncCtx,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let lhs_ty = self.ty_of(ctx, lhs.id)?;
        let base = self.program.types.widened(lhs_ty);
        self.lower_expr(ctx, lhs)?;
        self.lower_expr(ctx, rhs)?;
        ctx.emit(numeric_instruction(base, op)?);
        Ok(node_ty)
    }

    fn lower_equality(&mut self, ctx: &mut FuncCtx, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<()> {
        // Null tests compile to ref.is_null.
        let null_test = match (&lhs.kind, &rhs.kind) {
            (ExprKind::Null, _) => Some(rhs),
            (_, ExprKind::Null) => Some(lhs),
            _ => None,
        };
        if let Some(operand) = null_test {
            self.lower_expr(ctx, operand)?;
            ctx.emit(Instruction::RefIsNull);
            if op == BinaryOp::Ne {
                ctx.emit(Instruction::I32Eqz);
            }
            return Ok(());
        }

        let lhs_ty = self.ty_of(ctx, lhs.id)?;
        let base = self.program.types.widened(lhs_ty);
        if base == TypeId::STRING {
            self.lower_expr(ctx, lhs)?;
            self.lower_expr(ctx, rhs)?;
            let eq = self.helper_str_eq()?;
            ctx.emit(Instruction::Call(eq));
            if op == BinaryOp::Ne {
                ctx.emit(Instruction::I32Eqz);
            }
            return Ok(());
        }
        let scalar = matches!(
            base,
            TypeId::I32 | TypeId::U32 | TypeId::I64 | TypeId::F32 | TypeId::F64 | TypeId::BOOLEAN
        ) || matches!(self.program.types.kind(base), TypeKind::Enum(_));
        self.lower_expr(ctx, lhs)?;
        self.lower_expr(ctx, rhs)?;
        if scalar {
            ctx.emit(numeric_instruction(
                if matches!(self.program.types.kind(base), TypeKind::Enum(_))
                    || base == TypeId::BOOLEAN
                {
                    TypeId::I32
                } else {
                    base
                },
                op,
            )?);
        } else {
            ctx.emit(Instruction::RefEq);
            if op == BinaryOp::Ne {
                ctx.emit(Instruction::I32Eqz);
            }
        }
        Ok(())
    }

    pub(crate) fn lower_unary(
        &mut self,
        ctx: &mut FuncCtx,
        op: UnaryOp,
        operand: &Expr,
        node_ty: TypeId,
    ) -> Result<TypeId> {
        match op {
            UnaryOp::Not => {
                self.lower_expr(ctx, operand)?;
                ctx.emit(Instruction::I32Eqz);
            }
            UnaryOp::Neg => {
                let base = self.program.types.widened(node_ty);
                match base {
                    TypeId::F32 => {
                        self.lower_expr(ctx, operand)?;
                        ctx.emit(Instruction::F32Neg);
                    }
                    TypeId::F64 => {
                        self.lower_expr(ctx, operand)?;
                        ctx.emit(Instruction::F64Neg);
                    }
                    TypeId::I64 => {
                        ctx.emit(Instruction::I64Const(0));
                        self.lower_expr(ctx, operand)?;
                        ctx.emit(Instruction::I64Sub);
                    }
                    _ => {
                        ctx.emit(Instruction::I32Const(0));
                        self.lower_expr(ctx, operand)?;
                        ctx.emit(Instruction::I32Sub);
                    }
                }
            }
        }
        Ok(node_ty)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    pub(crate) fn lower_assign(&mut self, ctx: &mut FuncCtx, target: &Expr, value: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Ident(_) => {
                let binding = self
                    .binding_of_node(target.id)
                    .ok_or(CodegenError::ErroneousInput)?;
                match binding {
                    Binding::Local { node, .. } => {
                        let declared = self.ty_of(ctx, node)?;
                        if ctx.boxed.contains(&node) {
                            self.emit_local_raw(ctx, node)?;
                            let produced = self.lower_expr(ctx, value)?;
                            self.coerce(ctx, produced, declared)?;
                            let box_ty = self.box_type(declared)?;
                            ctx.emit(Instruction::StructSet {
                                struct_type_index: box_ty,
                                field_index: 0,
                            });
                        } else {
                            let produced = self.lower_expr(ctx, value)?;
                            self.coerce(ctx, produced, declared)?;
                            let local = *ctx
                                .local_map
                                .get(&node)
                                .ok_or(CodegenError::ErroneousInput)?;
                            ctx.emit(Instruction::LocalSet(local));
                        }
                    }
                    Binding::Global { node, .. } => {
                        let declared = self.ty_of(ctx, node)?;
                        let produced = self.lower_expr(ctx, value)?;
                        self.coerce(ctx, produced, declared)?;
                        let global = *self
                            .user_globals
                            .get(&node)
                            .ok_or(CodegenError::ErroneousInput)?;
                        ctx.emit(Instruction::GlobalSet(global));
                    }
                    Binding::Field { class, member } | Binding::Accessor { class, member } => {
                        self.emit_this(ctx)?;
                        let this_ty = self.this_type(ctx)?;
                        self.emit_member_write(ctx, this_ty, class, member, value)?;
                    }
                    _ => return Err(CodegenError::Unsupported("assignment target".into())),
                }
            }
            ExprKind::Member { object, .. } => {
                let binding = self
                    .binding_of_node(target.id)
                    .ok_or(CodegenError::ErroneousInput)?;
                match binding {
                    Binding::Field { class, member } | Binding::Accessor { class, member } => {
                        // Static fields write their global.
                        let is_static = self
                            .program
                            .decls
                            .class_info(class)
                            .and_then(|i| i.members.get(member as usize))
                            .is_some_and(|m| m.flags.contains(MemberFlags::STATIC));
                        if is_static {
                            let instance = {
                                let ty = self.program.types.class(class, Vec::new());
                                self.ensure_class(ty)?
                            };
                            let declared = self.ty_of(ctx, target.id)?;
                            let produced = self.lower_expr(ctx, value)?;
                            self.coerce(ctx, produced, declared)?;
                            let global = *self
                                .static_globals
                                .get(&(instance, member))
                                .ok_or(CodegenError::ErroneousInput)?;
                            ctx.emit(Instruction::GlobalSet(global));
                            return Ok(());
                        }
                        let object_ty = self.lower_expr(ctx, object)?;
                        self.emit_member_write(ctx, object_ty, class, member, value)?;
                    }
                    _ => return Err(CodegenError::Unsupported("member assignment target".into())),
                }
            }
            ExprKind::Index { object, index } => {
                let object_ty = self.lower_expr(ctx, object)?;
                match self.program.types.kind(object_ty) {
                    TypeKind::FixedArray(elem) => {
                        let arr = self.array_type(elem)?;
                        self.lower_expr(ctx, index)?;
                        let produced = self.lower_expr(ctx, value)?;
                        self.coerce(ctx, produced, elem)?;
                        ctx.emit(Instruction::ArraySet(arr));
                    }
                    TypeKind::Array(elem) => {
                        let dynarr = self.dyn_array_type(elem)?;
                        let arr = self.array_type(elem)?;
                        ctx.emit(Instruction::StructGet {
                            struct_type_index: dynarr,
                            field_index: 1,
                        });
                        self.lower_expr(ctx, index)?;
                        let produced = self.lower_expr(ctx, value)?;
                        self.coerce(ctx, produced, elem)?;
                        ctx.emit(Instruction::ArraySet(arr));
                    }
                    other => {
                        return Err(CodegenError::Unsupported(format!(
                            "index assignment into {other:?}"
                        )));
                    }
                }
            }
            _ => return Err(CodegenError::Unsupported("assignment target".into())),
        }
        Ok(())
    }

    /// Write a member of the receiver on the stack: public fields and
    /// accessors via the `set_` vtable slot, private fields directly.
    fn emit_member_write(
        &mut self,
        ctx: &mut FuncCtx,
        object_ty: TypeId,
        class: DeclId,
        member: u32,
        value: &Expr,
    ) -> Result<()> {
        let instance = self.receiver_instance(ctx, object_ty)?;
        let sig = self
            .program
            .decls
            .class_info(class)
            .and_then(|i| i.members.get(member as usize).cloned())
            .ok_or(CodegenError::ErroneousInput)?;

        if sig.visibility == quill_types::Visibility::Private {
            let (struct_ty, pos, field_ty) = {
                let layout = self.layouts[instance].as_ref().expect("layout");
                let idx = layout
                    .field_named(&sig.name)
                    .ok_or(CodegenError::ErroneousInput)?;
                (layout.struct_ty, layout.field_pos(idx), layout.fields[idx].ty)
            };
            let produced = self.lower_expr(ctx, value)?;
            self.coerce(ctx, produced, field_ty)?;
            ctx.emit(Instruction::StructSet {
                struct_type_index: struct_ty,
                field_index: pos,
            });
            return Ok(());
        }

        // Public: receiver is on the stack; the slot call evaluates the
        // value as its single argument.
        let slot = format!("set_{}", sig.name);
        self.emit_slot_call_with_values(ctx, instance, &slot, &[value])?;
        Ok(())
    }

    /// Like `emit_slot_call` for statement position (void slots).
    fn emit_slot_call_with_values(
        &mut self,
        ctx: &mut FuncCtx,
        instance: usize,
        slot_name: &str,
        args: &[&Expr],
    ) -> Result<()> {
        let (struct_ty, vtable_ty, slot_pos, func_ty, params) = {
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
            )
        };
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
        Ok(())
    }

    /// Push a local's raw storage (the box itself for boxed locals).
    pub(crate) fn emit_local_raw(&mut self, ctx: &mut FuncCtx, node: NodeId) -> Result<()> {
        if let Some(&local) = ctx.local_map.get(&node) {
            ctx.emit(Instruction::LocalGet(local));
            return Ok(());
        }
        if let Some(env) = &ctx.capture_env {
            if let Some(&field) = env.fields.get(&node) {
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
        Err(CodegenError::MissingSpecialization("local slot".into()))
    }

    /// The concrete `this` type in the current body.
    pub(crate) fn this_type(&self, ctx: &FuncCtx) -> Result<TypeId> {
        let instance = ctx
            .this_instance
            .ok_or_else(|| CodegenError::Unsupported("'this' outside a member".into()))?;
        Ok(self.bundle.classes[instance].ty)
    }

    // =========================================================================
    // Closures
    // =========================================================================

    pub(crate) fn lower_closure(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        params: &[Param],
        body: &ClosureBody,
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let TypeKind::Function(shape) = self.program.types.kind(node_ty) else {
            return Err(CodegenError::ErroneousInput);
        };
        let (base, code) = self.closure_types(&shape.params, shape.return_type)?;

        // Captures: free locals (boxed when mutable) plus `this`.
        let mut captures: Vec<CaptureItem> = self
            .closure_free_locals(expr)
            .into_iter()
            .map(|(node, mutable)| CaptureItem::Local {
                node,
                boxed: mutable,
            })
            .collect();
        if closure_uses_this(self, expr) {
            captures.push(CaptureItem::This);
        }

        let mut capture_vals = Vec::with_capacity(captures.len());
        for item in &captures {
            let val = match item {
                CaptureItem::Local { node, boxed } => {
                    let declared = self.ty_of(ctx, *node)?;
                    if *boxed {
                        let box_ty = self.box_type(declared)?;
                        ref_null(box_ty)
                    } else {
                        self.val_type(declared)?
                    }
                }
                CaptureItem::This => {
                    let this_ty = self.this_type(ctx)?;
                    self.val_type(this_ty)?
                }
            };
            capture_vals.push(val);
        }
        let shape_ty = self.closure_shape(base, code, &capture_vals);

        // The body function.
        let body_index = self
            .funcs
            .declare(format!("closure_{}", expr.id), code);
        {
            let mut inner = FuncCtx::new(
                ctx.subst.clone(),
                1 + shape.params.len() as u32,
                ctx.this_instance,
            );
            inner.ret_ty = shape.return_type;
            for (i, param) in params.iter().enumerate() {
                inner.local_map.insert(param.id, 1 + i as u32);
            }
            // Cast the environment to the concrete shape.
            inner.emit(Instruction::LocalGet(0));
            inner.emit(Instruction::RefCastNullable(HeapType::Concrete(shape_ty)));
            let env_local = inner.new_local(ref_null(shape_ty));
            inner.emit(Instruction::LocalSet(env_local));

            let mut fields = FxHashMap::default();
            let mut this_field = None;
            for (i, item) in captures.iter().enumerate() {
                let field = 1 + i as u32;
                match item {
                    CaptureItem::Local { node, boxed } => {
                        fields.insert(*node, field);
                        if *boxed {
                            inner.boxed.insert(*node);
                        }
                    }
                    CaptureItem::This => this_field = Some(field),
                }
            }
            inner.capture_env = Some(CaptureEnv {
                env_local,
                shape_ty,
                fields,
                this_field,
            });

            match body {
                ClosureBody::Expr(e) => {
                    let produced = self.lower_expr(&mut inner, e)?;
                    let ret = shape.return_type;
                    if ret == TypeId::VOID {
                        if produced != TypeId::VOID && produced != TypeId::NEVER {
                            inner.emit(Instruction::Drop);
                        }
                    } else {
                        self.coerce(&mut inner, produced, ret)?;
                    }
                }
                ClosureBody::Block(b) => {
                    let block = b.clone();
                    self.prepare_boxing(&mut inner, &block)?;
                    self.lower_block_stmts(&mut inner, &block)?;
                    if shape.return_type != TypeId::VOID {
                        inner.emit(Instruction::Unreachable);
                    }
                }
            }
            self.funcs.define(body_index, inner.into_function());
        }

        // Construction site.
        self.declare_func_ref(body_index);
        ctx.emit(Instruction::RefFunc(body_index));
        for item in &captures {
            match item {
                CaptureItem::Local { node, boxed } => {
                    if *boxed {
                        self.emit_local_raw(ctx, *node)?;
                    } else {
                        let declared = self.ty_of(ctx, *node)?;
                        self.emit_local_value(ctx, *node, declared)?;
                    }
                }
                CaptureItem::This => self.emit_this(ctx)?,
            }
        }
        ctx.emit(Instruction::StructNew(shape_ty));
        Ok(node_ty)
    }

    fn emit_local_value(&mut self, ctx: &mut FuncCtx, node: NodeId, declared: TypeId) -> Result<()> {
        self.emit_local_raw(ctx, node)?;
        if ctx.boxed.contains(&node) {
            let box_ty = self.box_type(declared)?;
            ctx.emit(Instruction::StructGet {
                struct_type_index: box_ty,
                field_index: 0,
            });
        }
        Ok(())
    }

    /// Wrap a top-level function as a closure value.
    pub(crate) fn emit_function_value(
        &mut self,
        ctx: &mut FuncCtx,
        decl: DeclId,
        _node: NodeId,
        fn_ty: TypeId,
    ) -> Result<()> {
        let TypeKind::Function(shape) = self.program.types.kind(fn_ty) else {
            return Err(CodegenError::ErroneousInput);
        };
        if !shape.type_params.is_empty() {
            return Err(CodegenError::Unsupported(
                "generic function used as a value".into(),
            ));
        }
        let target = self.ensure_func(decl, Vec::new())?;
        let (base, code) = self.closure_types(&shape.params, shape.return_type)?;
        let key = format!("fnwrap:{target}:{base}");
        let wrapper = match self.closure_wrappers.get(&key) {
            Some(&w) => w,
            None => {
                let wrapper = self
                    .funcs
                    .declare(format!("fnval_{target}"), code);
                let mut inner = FuncCtx::new(
                    TypeSubstitution::new(),
                    1 + shape.params.len() as u32,
                    None,
                );
                for i in 0..shape.params.len() {
                    inner.emit(Instruction::LocalGet(1 + i as u32));
                }
                inner.emit(Instruction::Call(target));
                self.funcs.define(wrapper, inner.into_function());
                self.closure_wrappers.insert(key, wrapper);
                wrapper
            }
        };
        self.declare_func_ref(wrapper);
        ctx.emit(Instruction::RefFunc(wrapper));
        let shape_ty = self.closure_shape(base, code, &[]);
        ctx.emit(Instruction::StructNew(shape_ty));
        Ok(())
    }

    // =========================================================================
    // Composite literals
    // =========================================================================

    pub(crate) fn lower_fixed_array(
        &mut self,
        ctx: &mut FuncCtx,
        elems: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let TypeKind::FixedArray(elem) = self.program.types.kind(node_ty) else {
            return Err(CodegenError::ErroneousInput);
        };
        let arr = self.array_type(elem)?;
        for e in elems {
            let produced = self.lower_expr(ctx, e)?;
            self.coerce(ctx, produced, elem)?;
        }
        ctx.emit(Instruction::ArrayNewFixed {
            array_type_index: arr,
            array_size: elems.len() as u32,
        });
        Ok(node_ty)
    }

    pub(crate) fn lower_tuple(
        &mut self,
        ctx: &mut FuncCtx,
        elems: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let TypeKind::Tuple(elem_types) = self.program.types.kind(node_ty) else {
            return Err(CodegenError::ErroneousInput);
        };
        let struct_ty = self.record_struct(node_ty, &elem_types)?;
        for (e, &ty) in elems.iter().zip(&elem_types) {
            let produced = self.lower_expr(ctx, e)?;
            self.coerce(ctx, produced, ty)?;
        }
        ctx.emit(Instruction::StructNew(struct_ty));
        Ok(node_ty)
    }

    /// Record fields are evaluated in source order into temporaries and
    /// pushed in canonical (name-sorted) order, so field order in the
    /// source never changes the emitted struct.
    pub(crate) fn lower_record(
        &mut self,
        ctx: &mut FuncCtx,
        fields: &[(String, Expr)],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let TypeKind::Record(canonical) = self.program.types.kind(node_ty) else {
            return Err(CodegenError::ErroneousInput);
        };
        let elem_types: Vec<TypeId> = canonical.iter().map(|(_, t)| *t).collect();
        let struct_ty = self.record_struct(node_ty, &elem_types)?;

        let mut temps: FxHashMap<&str, u32> = FxHashMap::default();
        for (name, e) in fields {
            let declared = canonical
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| *t)
                .ok_or(CodegenError::ErroneousInput)?;
            let produced = self.lower_expr(ctx, e)?;
            self.coerce(ctx, produced, declared)?;
            let local = ctx.new_local(self.val_type(declared)?);
            ctx.emit(Instruction::LocalSet(local));
            temps.insert(name.as_str(), local);
        }
        for (name, _) in &canonical {
            let local = *temps
                .get(name.as_str())
                .ok_or(CodegenError::ErroneousInput)?;
            ctx.emit(Instruction::LocalGet(local));
        }
        ctx.emit(Instruction::StructNew(struct_ty));
        Ok(node_ty)
    }

    // =========================================================================
    // Match
    // =========================================================================

    pub(crate) fn lower_match(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        scrutinee: &Expr,
        arms: &[MatchArm],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let scrut_ty = self.lower_expr(ctx, scrutinee)?;
        let scrut_val = self.val_type(scrut_ty)?;
        let scrut_local = ctx.new_local(scrut_val);
        ctx.emit(Instruction::LocalSet(scrut_local));

        let bt = self.block_type(node_ty)?;
        let done = ctx.open_labelled(Instruction::Block(bt));
        for arm in arms {
            let next = ctx.open_labelled(Instruction::Block(BlockType::Empty));
            self.emit_pattern_test(ctx, scrut_local, scrut_ty, &arm.pattern)?;
            ctx.emit(Instruction::I32Eqz);
            let rel = ctx.rel_level(next);
            ctx.emit(Instruction::BrIf(rel));
            self.emit_pattern_bindings(ctx, scrut_local, scrut_ty, &arm.pattern)?;
            let produced = self.lower_expr(ctx, &arm.body)?;
            if node_ty == TypeId::VOID {
                if produced != TypeId::VOID && produced != TypeId::NEVER {
                    ctx.emit(Instruction::Drop);
                }
            } else {
                self.coerce(ctx, produced, node_ty)?;
            }
            let rel = ctx.rel_level(done);
            ctx.emit(Instruction::Br(rel));
            ctx.close_block();
        }
        // Exhaustiveness was checked; an uncovered value is a checker
        // bug, not a recoverable state.
        ctx.emit(Instruction::Unreachable);
        ctx.close_block();
        let _ = expr;
        Ok(node_ty)
    }

    /// Push 1 when the pattern matches the scrutinee local.
    fn emit_pattern_test(
        &mut self,
        ctx: &mut FuncCtx,
        scrut_local: u32,
        scrut_ty: TypeId,
        pattern: &Pattern,
    ) -> Result<()> {
        match &pattern.kind {
            PatternKind::Wildcard(_) => ctx.emit(Instruction::I32Const(1)),
            PatternKind::Null => {
                ctx.emit(Instruction::LocalGet(scrut_local));
                ctx.emit(Instruction::RefIsNull);
            }
            PatternKind::Literal(LitValue::Int(v)) => {
                ctx.emit(Instruction::LocalGet(scrut_local));
                match self.program.types.widened(scrut_ty) {
                    TypeId::I64 => {
                        ctx.emit(Instruction::I64Const(*v));
                        ctx.emit(Instruction::I64Eq);
                    }
                    _ => {
                        ctx.emit(Instruction::I32Const(*v as i32));
                        ctx.emit(Instruction::I32Eq);
                    }
                }
            }
            PatternKind::Literal(LitValue::Bool(v)) => {
                ctx.emit(Instruction::LocalGet(scrut_local));
                ctx.emit(Instruction::I32Const(i32::from(*v)));
                ctx.emit(Instruction::I32Eq);
            }
            PatternKind::Literal(LitValue::Str(text)) => {
                ctx.emit(Instruction::LocalGet(scrut_local));
                let global = self.string_literal(text);
                ctx.emit(Instruction::GlobalGet(global));
                let eq = self.helper_str_eq()?;
                ctx.emit(Instruction::Call(eq));
            }
            PatternKind::EnumMember { .. } => {
                let Some(Binding::EnumMember { index, .. }) = self.binding_of_node(pattern.id)
                else {
                    return Err(CodegenError::ErroneousInput);
                };
                ctx.emit(Instruction::LocalGet(scrut_local));
                ctx.emit(Instruction::I32Const(index as i32));
                ctx.emit(Instruction::I32Eq);
            }
            PatternKind::Type { .. } => {
                let target = self.ty_of(ctx, pattern.id)?;
                let val = self.val_type(target)?;
                let ValType::Ref(r) = val else {
                    return Err(CodegenError::Unsupported(
                        "type pattern over a scalar scrutinee".into(),
                    ));
                };
                ctx.emit(Instruction::LocalGet(scrut_local));
                match r.heap_type {
                    HeapType::Concrete(idx) => {
                        ctx.emit(Instruction::RefTestNonNull(HeapType::Concrete(idx)));
                    }
                    HeapType::Abstract { ty, .. } => {
                        ctx.emit(Instruction::RefTestNonNull(HeapType::Abstract {
                            shared: false,
                            ty,
                        }));
                    }
                    HeapType::Exact(_) => unreachable!("exact heap types are not produced here"),
                }
            }
            PatternKind::Tuple(subs) => {
                let TypeKind::Tuple(elems) = self.program.types.kind(scrut_ty) else {
                    return Err(CodegenError::ErroneousInput);
                };
                let struct_ty = self.record_struct(scrut_ty, &elems)?;
                self.emit_composite_test(ctx, scrut_local, struct_ty, &elems, subs, 0)?;
            }
            PatternKind::Record(field_pats) => {
                let TypeKind::Record(fields) = self.program.types.kind(scrut_ty) else {
                    return Err(CodegenError::ErroneousInput);
                };
                let elems: Vec<TypeId> = fields.iter().map(|(_, t)| *t).collect();
                let struct_ty = self.record_struct(scrut_ty, &elems)?;
                // Order sub-tests by the canonical field order.
                let mut ordered: Vec<(usize, &Pattern)> = Vec::new();
                for (name, sub) in field_pats {
                    let pos = fields
                        .iter()
                        .position(|(n, _)| n == name)
                        .ok_or(CodegenError::ErroneousInput)?;
                    ordered.push((pos, sub));
                }
                let subs: Vec<&Pattern> = ordered.iter().map(|(_, p)| *p).collect();
                let positions: Vec<usize> = ordered.iter().map(|(i, _)| *i).collect();
                self.emit_composite_test_at(ctx, scrut_local, struct_ty, &elems, &subs, &positions)?;
            }
        }
        Ok(())
    }

    fn emit_composite_test(
        &mut self,
        ctx: &mut FuncCtx,
        scrut_local: u32,
        struct_ty: u32,
        elems: &[TypeId],
        subs: &[Pattern],
        first_field: usize,
    ) -> Result<()> {
        let subs: Vec<&Pattern> = subs.iter().collect();
        let positions: Vec<usize> = (first_field..first_field + subs.len()).collect();
        self.emit_composite_test_at(ctx, scrut_local, struct_ty, elems, &subs, &positions)
    }

    /// AND together element-wise sub-tests.
    fn emit_composite_test_at(
        &mut self,
        ctx: &mut FuncCtx,
        scrut_local: u32,
        struct_ty: u32,
        elems: &[TypeId],
        subs: &[&Pattern],
        positions: &[usize],
    ) -> Result<()> {
        ctx.emit(Instruction::I32Const(1));
        for (sub, &pos) in subs.iter().zip(positions) {
            let elem_ty = elems.get(pos).copied().ok_or(CodegenError::ErroneousInput)?;
            let elem_val = self.val_type(elem_ty)?;
            let elem_local = ctx.new_local(elem_val);
            ctx.emit(Instruction::LocalGet(scrut_local));
            ctx.emit(Instruction::StructGet {
                struct_type_index: struct_ty,
                field_index: pos as u32,
            });
            ctx.emit(Instruction::LocalSet(elem_local));
            self.emit_pattern_test(ctx, elem_local, elem_ty, sub)?;
            ctx.emit(Instruction::I32And);
        }
        Ok(())
    }

    /// Declare locals for the pattern's bindings (cast where needed).
    fn emit_pattern_bindings(
        &mut self,
        ctx: &mut FuncCtx,
        scrut_local: u32,
        scrut_ty: TypeId,
        pattern: &Pattern,
    ) -> Result<()> {
        match &pattern.kind {
            PatternKind::Type { binding: Some(_), .. } => {
                let target = self.ty_of(ctx, pattern.id)?;
                let val = self.val_type(target)?;
                ctx.emit(Instruction::LocalGet(scrut_local));
                if let ValType::Ref(r) = val {
                    if let HeapType::Concrete(idx) = r.heap_type {
                        ctx.emit(Instruction::RefCastNullable(HeapType::Concrete(idx)));
                    }
                }
                let local = ctx.new_local(val);
                ctx.emit(Instruction::LocalSet(local));
                ctx.local_map.insert(pattern.id, local);
            }
            PatternKind::Wildcard(Some(_)) => {
                let val = self.val_type(scrut_ty)?;
                ctx.emit(Instruction::LocalGet(scrut_local));
                let local = ctx.new_local(val);
                ctx.emit(Instruction::LocalSet(local));
                ctx.local_map.insert(pattern.id, local);
            }
            PatternKind::Tuple(subs) => {
                let TypeKind::Tuple(elems) = self.program.types.kind(scrut_ty) else {
                    return Ok(());
                };
                let struct_ty = self.record_struct(scrut_ty, &elems)?;
                for (i, sub) in subs.iter().enumerate() {
                    let elem_ty = elems.get(i).copied().ok_or(CodegenError::ErroneousInput)?;
                    let elem_val = self.val_type(elem_ty)?;
                    let elem_local = ctx.new_local(elem_val);
                    ctx.emit(Instruction::LocalGet(scrut_local));
                    ctx.emit(Instruction::StructGet {
                        struct_type_index: struct_ty,
                        field_index: i as u32,
                    });
                    ctx.emit(Instruction::LocalSet(elem_local));
                    self.emit_pattern_bindings(ctx, elem_local, elem_ty, sub)?;
                }
            }
            PatternKind::Record(field_pats) => {
                let TypeKind::Record(fields) = self.program.types.kind(scrut_ty) else {
                    return Ok(());
                };
                let elems: Vec<TypeId> = fields.iter().map(|(_, t)| *t).collect();
                let struct_ty = self.record_struct(scrut_ty, &elems)?;
                for (name, sub) in field_pats {
                    let pos = fields
                        .iter()
                        .position(|(n, _)| n == name)
                        .ok_or(CodegenError::ErroneousInput)?;
                    let elem_ty = elems[pos];
                    let elem_val = self.val_type(elem_ty)?;
                    let elem_local = ctx.new_local(elem_val);
                    ctx.emit(Instruction::LocalGet(scrut_local));
                    ctx.emit(Instruction::StructGet {
                        struct_type_index: struct_ty,
                        field_index: pos as u32,
                    });
                    ctx.emit(Instruction::LocalSet(elem_local));
                    self.emit_pattern_bindings(ctx, elem_local, elem_ty, sub)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // =========================================================================
    // Casts and type tests
    // =========================================================================

    pub(crate) fn lower_cast(
        &mut self,
        ctx: &mut FuncCtx,
        operand: &Expr,
        node_ty: TypeId,
    ) -> Result<TypeId> {
        let source = self.lower_expr(ctx, operand)?;
        let from = self.unwrap_distinct(self.program.types.widened(source));
        let to = self.unwrap_distinct(self.program.types.widened(node_ty));

        let numeric = [TypeId::I32, TypeId::U32, TypeId::I64, TypeId::F32, TypeId::F64];
        if numeric.contains(&from) && numeric.contains(&to) {
            for ins in numeric_conversion(from, to) {
                ctx.emit(ins);
            }
            return Ok(node_ty);
        }

        // Reference casts: upcasts are free, downcasts are checked and
        // trap at runtime on mismatch.
        let target_val = self.val_type(node_ty)?;
        if let ValType::Ref(r) = target_val {
            if let HeapType::Concrete(idx) = r.heap_type {
                if !quill_types::assignable(&self.program.types, &self.program.decls, source, node_ty)
                {
                    ctx.emit(Instruction::RefCastNullable(HeapType::Concrete(idx)));
                }
            }
        }
        Ok(node_ty)
    }

    fn unwrap_distinct(&self, ty: TypeId) -> TypeId {
        match self.program.types.kind(ty) {
            TypeKind::Distinct { inner, .. } => inner,
            _ => ty,
        }
    }

    pub(crate) fn lower_is(&mut self, ctx: &mut FuncCtx, operand: &Expr, ty: &TypeAnn) -> Result<TypeId> {
        self.lower_expr(ctx, operand)?;
        let target = {
            let raw = self
                .program
                .sema
                .type_of(ty.id)
                .ok_or(CodegenError::ErroneousInput)?;
            instantiate_type(&self.program.types, raw, &ctx.subst)
        };
        if target == TypeId::NULL {
            ctx.emit(Instruction::RefIsNull);
            return Ok(TypeId::BOOLEAN);
        }
        let val = self.val_type(target)?;
        let ValType::Ref(r) = val else {
            return Err(CodegenError::Unsupported(
                "'is' over a scalar operand".into(),
            ));
        };
        match r.heap_type {
            HeapType::Concrete(idx) => {
                ctx.emit(Instruction::RefTestNonNull(HeapType::Concrete(idx)));
            }
            HeapType::Abstract { ty, .. } => {
                ctx.emit(Instruction::RefTestNonNull(HeapType::Abstract {
                    shared: false,
                    ty,
                }));
            }
            HeapType::Exact(_) => unreachable!("exact heap types are not produced here"),
        }
        Ok(TypeId::BOOLEAN)
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub(crate) fn lower_template(
        &mut self,
        ctx: &mut FuncCtx,
        expr: &Expr,
        tag: Option<&Expr>,
        quasis: &[String],
        exprs: &[Expr],
        node_ty: TypeId,
    ) -> Result<TypeId> {
        match tag {
            None => {
                // Concatenate quasi/stringified-interpolation pairs.
                let first = self.string_literal(&quasis[0]);
                ctx.emit(Instruction::GlobalGet(first));
                for (i, e) in exprs.iter().enumerate() {
                    let ty = self.lower_expr(ctx, e)?;
                    self.emit_stringify(ctx, ty)?;
                    let concat = self.helper_str_concat()?;
                    ctx.emit(Instruction::Call(concat));
                    let quasi = self.string_literal(&quasis[i + 1]);
                    ctx.emit(Instruction::GlobalGet(quasi));
                    ctx.emit(Instruction::Call(concat));
                }
                Ok(node_ty)
            }
            Some(tag) => {
                // Tagged: the strings array has a stable identity per
                // template expression.
                let strings_global = self.template_strings(expr.id, quasis);
                let tag_ty = self.ty_of(ctx, tag.id)?;
                let TypeKind::Function(shape) = self.program.types.kind(tag_ty) else {
                    return Err(CodegenError::ErroneousInput);
                };
                let (base, code) = self.closure_types(&shape.params, shape.return_type)?;
                self.lower_expr(ctx, tag)?;
                let tmp = ctx.new_local(ref_null(base));
                ctx.emit(Instruction::LocalTee(tmp));
                ctx.emit(Instruction::GlobalGet(strings_global));
                for (e, &param) in exprs.iter().zip(shape.params.iter().skip(1)) {
                    let produced = self.lower_expr(ctx, e)?;
                    self.coerce(ctx, produced, param)?;
                }
                ctx.emit(Instruction::LocalGet(tmp));
                ctx.emit(Instruction::StructGet {
                    struct_type_index: base,
                    field_index: 0,
                });
                ctx.emit(Instruction::CallRef(code));
                Ok(node_ty)
            }
        }
    }

    // =========================================================================
    // Extension methods
    // =========================================================================

    pub(crate) fn lower_ext_method(
        &mut self,
        index: u32,
        decl: DeclId,
        member: u32,
        margs: &[TypeId],
    ) -> Result<()> {
        let sig = self
            .program
            .decls
            .class_info(decl)
            .and_then(|i| i.members.get(member as usize).cloned())
            .ok_or(CodegenError::ErroneousInput)?;
        let member_ast = *self
            .bundle
            .ast
            .members
            .get(&sig.node)
            .ok_or(CodegenError::ErroneousInput)?;
        let quill_ast::MemberKind::Method(method) = &member_ast.kind else {
            return Err(CodegenError::ErroneousInput);
        };
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| CodegenError::Unsupported("bodyless extension method".into()))?
            .clone();
        let MemberSigKind::Method {
            type_params,
            scope,
            return_type,
            params,
            ..
        } = &sig.kind
        else {
            return Err(CodegenError::ErroneousInput);
        };
        let names: Vec<String> = type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(*scope, &names, margs);

        let mut ctx = FuncCtx::new(subst, params.len() as u32 + 1, None);
        ctx.this_local = Some(0);
        for (i, param) in method.params.iter().enumerate() {
            ctx.local_map.insert(param.id, 1 + i as u32);
        }
        ctx.ret_ty = instantiate_type(&self.program.types, *return_type, &ctx.subst);
        self.lower_block_stmts(&mut ctx, &body)?;
        if ctx.ret_ty != TypeId::VOID {
            ctx.emit(Instruction::Unreachable);
        }
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    // =========================================================================
    // Stringify dispatch
    // =========================================================================

    /// Convert the value on the stack to a string by its static type.
    pub(crate) fn emit_stringify(&mut self, ctx: &mut FuncCtx, ty: TypeId) -> Result<()> {
        let wide = self.program.types.widened(ty);
        match wide {
            TypeId::STRING => Ok(()),
            TypeId::BOOLEAN => {
                let f = self.helper_bool_to_str()?;
                ctx.emit(Instruction::Call(f));
                Ok(())
            }
            TypeId::I32 => {
                let f = self.helper_i32_to_str()?;
                ctx.emit(Instruction::Call(f));
                Ok(())
            }
            TypeId::U32 => {
                let f = self.helper_u32_to_str()?;
                ctx.emit(Instruction::Call(f));
                Ok(())
            }
            TypeId::I64 => {
                let f = self.helper_i64_to_str()?;
                ctx.emit(Instruction::Call(f));
                Ok(())
            }
            TypeId::F32 => {
                ctx.emit(Instruction::F64PromoteF32);
                let f = self.helper_f64_to_str()?;
                ctx.emit(Instruction::Call(f));
                Ok(())
            }
            TypeId::F64 => {
                let f = self.helper_f64_to_str()?;
                ctx.emit(Instruction::Call(f));
                Ok(())
            }
            other => Err(CodegenError::Unsupported(format!(
                "stringifying {}",
                quill_types::format_type(&self.program.types, &self.program.decls, other)
            ))),
        }
    }
}

fn closure_uses_this(generator: &Generator<'_>, closure: &Expr) -> bool {
    let mut uses = false;
    crate::lower::visit_closure_body(closure, &mut |e: &Expr| {
        match &e.kind {
            ExprKind::This => uses = true,
            ExprKind::Ident(_) => {
                if matches!(
                    generator.program.sema.binding(e.id),
                    Some(Binding::Field { .. })
                        | Some(Binding::Accessor { .. })
                        | Some(Binding::Method { .. })
                ) {
                    uses = true;
                }
            }
            _ => {}
        }
    });
    uses
}

/// The wasm instruction for a numeric operator at a scalar base type.
fn numeric_instruction(base: TypeId, op: BinaryOp) -> Result<Instruction<'static>> {
    use Instruction as I;
    let ins = match (base, op) {
        (TypeId::I32, BinaryOp::Add) => I::I32Add,
        (TypeId::I32, BinaryOp::Sub) => I::I32Sub,
        (TypeId::I32, BinaryOp::Mul) => I::I32Mul,
        (TypeId::I32, BinaryOp::Div) => I::I32DivS,
        (TypeId::I32, BinaryOp::Rem) => I::I32RemS,
        (TypeId::I32, BinaryOp::Eq) => I::I32Eq,
        (TypeId::I32, BinaryOp::Ne) => I::I32Ne,
        (TypeId::I32, BinaryOp::Lt) => I::I32LtS,
        (TypeId::I32, BinaryOp::Le) => I::I32LeS,
        (TypeId::I32, BinaryOp::Gt) => I::I32GtS,
        (TypeId::I32, BinaryOp::Ge) => I::I32GeS,
        (TypeId::I32, BinaryOp::BitAnd) => I::I32And,
        (TypeId::I32, BinaryOp::BitOr) => I::I32Or,
        (TypeId::I32, BinaryOp::BitXor) => I::I32Xor,
        (TypeId::I32, BinaryOp::Shl) => I::I32Shl,
        (TypeId::I32, BinaryOp::Shr) => I::I32ShrS,

        (TypeId::U32, BinaryOp::Add) => I::I32Add,
        (TypeId::U32, BinaryOp::Sub) => I::I32Sub,
        (TypeId::U32, BinaryOp::Mul) => I::I32Mul,
        (TypeId::U32, BinaryOp::Div) => I::I32DivU,
        (TypeId::U32, BinaryOp::Rem) => I::I32RemU,
        (TypeId::U32, BinaryOp::Eq) => I::I32Eq,
        (TypeId::U32, BinaryOp::Ne) => I::I32Ne,
        (TypeId::U32, BinaryOp::Lt) => I::I32LtU,
        (TypeId::U32, BinaryOp::Le) => I::I32LeU,
        (TypeId::U32, BinaryOp::Gt) => I::I32GtU,
        (TypeId::U32, BinaryOp::Ge) => I::I32GeU,
        (TypeId::U32, BinaryOp::BitAnd) => I::I32And,
        (TypeId::U32, BinaryOp::BitOr) => I::I32Or,
        (TypeId::U32, BinaryOp::BitXor) => I::I32Xor,
        (TypeId::U32, BinaryOp::Shl) => I::I32Shl,
        (TypeId::U32, BinaryOp::Shr) => I::I32ShrU,

        (TypeId::I64, BinaryOp::Add) => I::I64Add,
        (TypeId::I64, BinaryOp::Sub) => I::I64Sub,
        (TypeId::I64, BinaryOp::Mul) => I::I64Mul,
        (TypeId::I64, BinaryOp::Div) => I::I64DivS,
        (TypeId::I64, BinaryOp::Rem) => I::I64RemS,
        (TypeId::I64, BinaryOp::Eq) => I::I64Eq,
        (TypeId::I64, BinaryOp::Ne) => I::I64Ne,
        (TypeId::I64, BinaryOp::Lt) => I::I64LtS,
        (TypeId::I64, BinaryOp::Le) => I::I64LeS,
        (TypeId::I64, BinaryOp::Gt) => I::I64GtS,
        (TypeId::I64, BinaryOp::Ge) => I::I64GeS,
        (TypeId::I64, BinaryOp::BitAnd) => I::I64And,
        (TypeId::I64, BinaryOp::BitOr) => I::I64Or,
        (TypeId::I64, BinaryOp::BitXor) => I::I64Xor,
        (TypeId::I64, BinaryOp::Shl) => I::I64Shl,
        (TypeId::I64, BinaryOp::Shr) => I::I64ShrS,

        (TypeId::F32, BinaryOp::Add) => I::F32Add,
        (TypeId::F32, BinaryOp::Sub) => I::F32Sub,
        (TypeId::F32, BinaryOp::Mul) => I::F32Mul,
        (TypeId::F32, BinaryOp::Div) => I::F32Div,
        (TypeId::F32, BinaryOp::Eq) => I::F32Eq,
        (TypeId::F32, BinaryOp::Ne) => I::F32Ne,
        (TypeId::F32, BinaryOp::Lt) => I::F32Lt,
        (TypeId::F32, BinaryOp::Le) => I::F32Le,
        (TypeId::F32, BinaryOp::Gt) => I::F32Gt,
        (TypeId::F32, BinaryOp::Ge) => I::F32Ge,

        (TypeId::F64, BinaryOp::Add) => I::F64Add,
        (TypeId::F64, BinaryOp::Sub) => I::F64Sub,
        (TypeId::F64, BinaryOp::Mul) => I::F64Mul,
        (TypeId::F64, BinaryOp::Div) => I::F64Div,
        (TypeId::F64, BinaryOp::Eq) => I::F64Eq,
        (TypeId::F64, BinaryOp::Ne) => I::F64Ne,
        (TypeId::F64, BinaryOp::Lt) => I::F64Lt,
        (TypeId::F64, BinaryOp::Le) => I::F64Le,
        (TypeId::F64, BinaryOp::Gt) => I::F64Gt,
        (TypeId::F64, BinaryOp::Ge) => I::F64Ge,

        (TypeId::BOOLEAN, BinaryOp::Eq) => I::I32Eq,
        (TypeId::BOOLEAN, BinaryOp::Ne) => I::I32Ne,

        (base, op) => {
            return Err(CodegenError::Unsupported(format!(
                "operator {op:?} at {base:?}"
            )));
        }
    };
    Ok(ins)
}

/// Conversion instruction sequence between numeric bases.
fn numeric_conversion(from: TypeId, to: TypeId) -> Vec<Instruction<'static>> {
    use Instruction as I;
    if from == to || (from == TypeId::I32 && to == TypeId::U32) || (from == TypeId::U32 && to == TypeId::I32)
    {
        return Vec::new();
    }
    match (from, to) {
        (TypeId::I32, TypeId::I64) => vec![I::I64ExtendI32S],
        (TypeId::U32, TypeId::I64) => vec![I::I64ExtendI32U],
        (TypeId::I64, TypeId::I32 | TypeId::U32) => vec![I::I32WrapI64],
        (TypeId::I32, TypeId::F32) => vec![I::F32ConvertI32S],
        (TypeId::U32, TypeId::F32) => vec![I::F32ConvertI32U],
        (TypeId::I32, TypeId::F64) => vec![I::F64ConvertI32S],
        (TypeId::U32, TypeId::F64) => vec![I::F64ConvertI32U],
        (TypeId::I64, TypeId::F32) => vec![I::F32ConvertI64S],
        (TypeId::I64, TypeId::F64) => vec![I::F64ConvertI64S],
        (TypeId::F32, TypeId::I32) => vec![I::I32TruncF32S],
        (TypeId::F32, TypeId::U32) => vec![I::I32TruncF32U],
        (TypeId::F64, TypeId::I32) => vec![I::I32TruncF64S],
        (TypeId::F64, TypeId::U32) => vec![I::I32TruncF64U],
        (TypeId::F32, TypeId::I64) => vec![I::I64TruncF32S],
        (TypeId::F64, TypeId::I64) => vec![I::I64TruncF64S],
        (TypeId::F32, TypeId::F64) => vec![I::F64PromoteF32],
        (TypeId::F64, TypeId::F32) => vec![I::F32DemoteF64],
        _ => Vec::new(),
    }
}
