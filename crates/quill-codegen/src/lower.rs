//! Statement and expression lowering.
//!
//! Bodies are lowered against a concrete substitution: the same AST is
//! visited once per monomorphization instance, with every recorded type
//! pushed through the instance's type arguments. The lowering contract
//! is simple: an expression pushes exactly one value of its concrete
//! type's storage (nothing for `void`, a dead stack for `never`).

use crate::{CodegenError, Generator, Result, eqref, ref_null};
use quill_ast::{
    Block, ClosureBody, Expr, ExprKind, NodeId, Pattern, PatternKind, Stmt, StmtKind,
};
use quill_sema::Binding;
use quill_types::{
    DeclId, MemberFlags, MemberSigKind, TypeId, TypeKind, TypeSubstitution, instantiate_type,
};
use rustc_hash::{FxHashMap, FxHashSet};
use wasm_encoder::{
    BlockType, Catch, Function, HeapType, Instruction, RefType, ValType,
};

/// Capture environment of a closure body being lowered.
pub(crate) struct CaptureEnv {
    /// Local holding the closure struct, already cast to its shape.
    pub env_local: u32,
    pub shape_ty: u32,
    /// Captured binding -> field index in the shape.
    pub fields: FxHashMap<NodeId, u32>,
    pub this_field: Option<u32>,
}

struct LoopLabels {
    break_level: u32,
    continue_level: u32,
}

struct FinallyFrame {
    /// Level of the block a `return` inside the protected region
    /// branches to (the finally-normal path follows it).
    body_exit_level: u32,
}

/// Per-function lowering state.
pub(crate) struct FuncCtx {
    pub subst: TypeSubstitution,
    pub param_count: u32,
    pub locals: Vec<ValType>,
    /// Binding declaration node -> local index.
    pub local_map: FxHashMap<NodeId, u32>,
    /// Locals stored as one-field heap cells (captured mutables).
    pub boxed: FxHashSet<NodeId>,
    pub this_local: Option<u32>,
    pub this_instance: Option<usize>,
    /// Set in `new` functions: a bare `return` yields the instance.
    pub ctor_this: Option<u32>,
    pub capture_env: Option<CaptureEnv>,
    pub code: Vec<Instruction<'static>>,
    /// Number of currently open blocks.
    depth: u32,
    loops: Vec<LoopLabels>,
    finallys: Vec<FinallyFrame>,
    ret_flag: Option<u32>,
    ret_val: Option<u32>,
    pub ret_ty: TypeId,
}

impl FuncCtx {
    pub(crate) fn new(subst: TypeSubstitution, param_count: u32, this_instance: Option<usize>) -> Self {
        Self {
            subst,
            param_count,
            locals: Vec::new(),
            local_map: FxHashMap::default(),
            boxed: FxHashSet::default(),
            this_local: None,
            this_instance,
            ctor_this: None,
            capture_env: None,
            code: Vec::new(),
            depth: 0,
            loops: Vec::new(),
            finallys: Vec::new(),
            ret_flag: None,
            ret_val: None,
            ret_ty: TypeId::VOID,
        }
    }

    pub(crate) fn emit(&mut self, ins: Instruction<'static>) {
        self.code.push(ins);
    }

    pub(crate) fn new_local(&mut self, ty: ValType) -> u32 {
        let idx = self.param_count + self.locals.len() as u32;
        self.locals.push(ty);
        idx
    }

    /// Open a labelled block; returns its level for later branches.
    fn open(&mut self, ins: Instruction<'static>) -> u32 {
        self.emit(ins);
        self.depth += 1;
        self.depth
    }

    fn close(&mut self) {
        self.emit(Instruction::End);
        self.depth -= 1;
    }

    /// Relative depth for a branch to a block at `level`.
    fn rel(&self, level: u32) -> u32 {
        self.depth - level
    }

    pub(crate) fn open_if(&mut self, bt: BlockType) {
        self.open(Instruction::If(bt));
    }

    pub(crate) fn open_labelled(&mut self, ins: Instruction<'static>) -> u32 {
        self.open(ins)
    }

    pub(crate) fn close_block(&mut self) {
        self.close();
    }

    pub(crate) fn rel_level(&self, level: u32) -> u32 {
        self.rel(level)
    }

    /// Finish into a `Function` body.
    pub(crate) fn into_function(self) -> Function {
        let mut function = Function::new_with_locals_types(self.locals.clone());
        for ins in &self.code {
            function.instruction(ins);
        }
        function.instruction(&Instruction::End);
        function
    }
}

impl<'a> Generator<'a> {
    /// The concrete type of a checked node under the instance
    /// substitution.
    pub(crate) fn ty_of(&self, ctx: &FuncCtx, node: NodeId) -> Result<TypeId> {
        let ty = self
            .program
            .sema
            .type_of(node)
            .ok_or(CodegenError::ErroneousInput)?;
        Ok(instantiate_type(&self.program.types, ty, &ctx.subst))
    }

    fn binding_of(&self, node: NodeId) -> Option<Binding> {
        self.program.sema.binding(node).cloned()
    }

    // =========================================================================
    // Entry points for pending bodies
    // =========================================================================

    pub(crate) fn lower_function(
        &mut self,
        index: u32,
        decl: DeclId,
        type_args: &[TypeId],
    ) -> Result<()> {
        let func = *self
            .bundle
            .ast
            .func_decls
            .get(&decl)
            .ok_or_else(|| CodegenError::MissingSpecialization(format!("function {decl}")))?;
        let info = self
            .program
            .decls
            .function_info(decl)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(info.scope, &names, type_args);

        let mut ctx = FuncCtx::new(subst, info.params.len() as u32, None);
        for (i, param) in func.params.iter().enumerate() {
            ctx.local_map.insert(param.id, i as u32);
        }
        ctx.ret_ty = instantiate_type(&self.program.types, info.return_type, &ctx.subst);

        let body = func
            .body
            .as_ref()
            .ok_or_else(|| CodegenError::Unsupported("bodyless function".into()))?
            .clone();
        self.prepare_boxing(&mut ctx, &body)?;
        self.lower_block_stmts(&mut ctx, &body)?;
        self.pad_missing_return(&mut ctx)?;
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    pub(crate) fn lower_method(
        &mut self,
        index: u32,
        class: usize,
        member: u32,
        margs: &[TypeId],
    ) -> Result<()> {
        let decl = self.bundle.classes[class].decl;
        let info = self
            .program
            .decls
            .class_info(decl)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let sig = info
            .members
            .get(member as usize)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
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
            .ok_or_else(|| CodegenError::Unsupported("abstract method body".into()))?
            .clone();

        let MemberSigKind::Method {
            scope,
            type_params,
            return_type,
            params,
            ..
        } = &sig.kind
        else {
            return Err(CodegenError::ErroneousInput);
        };

        // Body substitution: the declaring class/mixin's parameters to
        // this instance's arguments, plus method generics.
        let mut subst = self.member_body_subst(class, sig.node)?;
        let names: Vec<String> = type_params.iter().map(|p| p.name.clone()).collect();
        let margs_subst = TypeSubstitution::for_params(*scope, &names, margs);
        subst = subst.then(&self.program.types, &margs_subst);

        let is_static = sig.flags.contains(MemberFlags::STATIC);
        let this_offset = u32::from(!is_static);
        let mut ctx = FuncCtx::new(subst, params.len() as u32 + this_offset, Some(class));
        if !is_static {
            ctx.this_local = Some(0);
        }
        for (i, param) in method.params.iter().enumerate() {
            ctx.local_map.insert(param.id, i as u32 + this_offset);
        }
        ctx.ret_ty = instantiate_type(&self.program.types, *return_type, &ctx.subst);

        self.prepare_boxing(&mut ctx, &body)?;
        self.lower_block_stmts(&mut ctx, &body)?;
        self.pad_missing_return(&mut ctx)?;
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    pub(crate) fn lower_accessor(&mut self, index: u32, class: usize, member: u32) -> Result<()> {
        let decl = self.bundle.classes[class].decl;
        let info = self
            .program
            .decls
            .class_info(decl)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let sig = info
            .members
            .get(member as usize)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let member_ast = *self
            .bundle
            .ast
            .members
            .get(&sig.node)
            .ok_or(CodegenError::ErroneousInput)?;
        let quill_ast::MemberKind::Accessor(accessor) = &member_ast.kind else {
            return Err(CodegenError::ErroneousInput);
        };
        let body = accessor.body.clone();
        let subst = self.member_body_subst(class, sig.node)?;

        let is_static = sig.flags.contains(MemberFlags::STATIC);
        let this_offset = u32::from(!is_static);
        let value_param = u32::from(matches!(sig.kind, MemberSigKind::Setter { .. }));
        let mut ctx = FuncCtx::new(subst, this_offset + value_param, Some(class));
        if !is_static {
            ctx.this_local = Some(0);
        }
        if let (MemberSigKind::Setter { .. }, Some(param)) = (&sig.kind, &accessor.param) {
            ctx.local_map.insert(param.id, this_offset);
        }
        ctx.ret_ty = match &sig.kind {
            MemberSigKind::Getter { ty } => instantiate_type(&self.program.types, *ty, &ctx.subst),
            _ => TypeId::VOID,
        };

        self.prepare_boxing(&mut ctx, &body)?;
        self.lower_block_stmts(&mut ctx, &body)?;
        self.pad_missing_return(&mut ctx)?;
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    /// The `new` function: allocate with zeroed fields and the class
    /// vtable, run field initializers inherited-first, then the
    /// constructor body. A virtual call made by a base-class field
    /// initializer dispatches through the derived vtable while the
    /// derived fields still hold their zero values — deliberately.
    pub(crate) fn lower_ctor(&mut self, index: u32, class: usize) -> Result<()> {
        let (struct_ty, is_abstract) = {
            let layout = self.layouts[class].as_ref().expect("layout built");
            (layout.struct_ty, layout.is_abstract)
        };
        if is_abstract {
            let mut ctx = FuncCtx::new(TypeSubstitution::new(), 0, Some(class));
            ctx.emit(Instruction::Unreachable);
            self.funcs.define(index, ctx.into_function());
            return Ok(());
        }

        let decl = self.bundle.classes[class].decl;
        let info = self
            .program
            .decls
            .class_info(decl)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let ctor_ast = info.ctor.as_ref().and_then(|c| {
            self.bundle.ast.members.get(&c.node).and_then(|m| match &m.kind {
                quill_ast::MemberKind::Constructor(ctor) => Some((*m, ctor.clone())),
                _ => None,
            })
        });

        let param_count = info.ctor.as_ref().map_or(0, |c| c.params.len()) as u32;
        let class_subst = self.layouts[class]
            .as_ref()
            .expect("layout built")
            .subst
            .clone();
        let mut ctx = FuncCtx::new(class_subst, param_count, Some(class));
        if let Some((_, ctor)) = &ctor_ast {
            for (i, param) in ctor.params.iter().enumerate() {
                ctx.local_map.insert(param.id, i as u32);
            }
        }
        ctx.ret_ty = self.bundle.classes[class].ty;

        // Allocate: vtable + zero defaults.
        let vt_global = *self
            .vtable_globals
            .get(&class)
            .ok_or_else(|| CodegenError::MissingSpecialization("vtable global".into()))?;
        ctx.emit(Instruction::GlobalGet(vt_global));
        ctx.emit(Instruction::RefAsNonNull);
        let field_types: Vec<TypeId> = self.layouts[class]
            .as_ref()
            .expect("layout built")
            .fields
            .iter()
            .map(|f| f.ty)
            .collect();
        for &fty in &field_types {
            self.emit_zero_value(&mut ctx, fty)?;
        }
        ctx.emit(Instruction::StructNew(struct_ty));
        let this_val = ref_null(struct_ty);
        let this_local = ctx.new_local(this_val);
        ctx.emit(Instruction::LocalSet(this_local));
        ctx.this_local = Some(this_local);
        ctx.ctor_this = Some(this_local);

        // Field initializers, root class first.
        let chain = self.class_chain(class);
        for &link in chain.iter().rev() {
            self.lower_field_inits(&mut ctx, class, link, this_local, struct_ty)?;
        }

        // Constructor body (declared on this class only).
        if let Some((_, ctor)) = &ctor_ast {
            let body = ctor.body.clone();
            self.prepare_boxing(&mut ctx, &body)?;
            self.lower_block_stmts(&mut ctx, &body)?;
        }

        ctx.emit(Instruction::LocalGet(this_local));
        ctx.emit(Instruction::Return);
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    /// The substitution a member body is lowered under: the declaring
    /// class's parameters to this instance's arguments — or, for a
    /// mixin-originated member, the mixin's parameters to the applied
    /// arguments (pushed through the class instance).
    pub(crate) fn member_body_subst(
        &self,
        class: usize,
        member_node: NodeId,
    ) -> Result<TypeSubstitution> {
        let class_subst = self.layouts[class]
            .as_ref()
            .expect("layout built")
            .subst
            .clone();
        self.member_body_subst_for_owner(class, member_node, &class_subst)
    }

    pub(crate) fn member_body_subst_for_owner(
        &self,
        class: usize,
        member_node: NodeId,
        class_subst: &TypeSubstitution,
    ) -> Result<TypeSubstitution> {
        let class_decl = self.bundle.classes[class].decl;
        let Some(&owner) = self.bundle.ast.member_owner.get(&member_node) else {
            return Ok(class_subst.clone());
        };
        if owner == class_decl {
            return Ok(class_subst.clone());
        }
        // Mixin-originated member: resolve the applied arguments.
        let info = self
            .program
            .decls
            .class_info(class_decl)
            .ok_or(CodegenError::ErroneousInput)?;
        for &mixin_ty in &info.mixins {
            let applied = instantiate_type(&self.program.types, mixin_ty, class_subst);
            if let TypeKind::Mixin(r) = self.program.types.kind(applied) {
                if r.decl == owner {
                    let mixin_info = self
                        .program
                        .decls
                        .class_info(owner)
                        .ok_or(CodegenError::ErroneousInput)?;
                    let names: Vec<String> = mixin_info
                        .type_params
                        .iter()
                        .map(|p| p.name.clone())
                        .collect();
                    return Ok(TypeSubstitution::for_params(
                        mixin_info.scope,
                        &names,
                        &r.args,
                    ));
                }
            }
        }
        Ok(class_subst.clone())
    }

    /// The instance chain leaf-to-root.
    fn class_chain(&self, class: usize) -> Vec<usize> {
        let mut chain = vec![class];
        let mut current = class;
        while let Some(layout) = self.layouts[current].as_ref() {
            match layout.super_instance {
                Some(sup) => {
                    chain.push(sup);
                    current = sup;
                }
                None => break,
            }
        }
        chain
    }

    fn lower_field_inits(
        &mut self,
        ctx: &mut FuncCtx,
        leaf: usize,
        owner: usize,
        this_local: u32,
        leaf_struct: u32,
    ) -> Result<()> {
        let decl = self.bundle.classes[owner].decl;
        let info = self
            .program
            .decls
            .class_info(decl)
            .ok_or(CodegenError::ErroneousInput)?
            .clone();
        let owner_subst = self.layouts[owner]
            .as_ref()
            .expect("layout built")
            .subst
            .clone();

        let leaf_fields: Vec<(String, usize)> = self.layouts[leaf]
            .as_ref()
            .expect("layout built")
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        for sig in info.members.clone() {
            let MemberSigKind::Field { .. } = sig.kind else {
                continue;
            };
            if sig.flags.contains(MemberFlags::STATIC) {
                continue;
            }
            let Some(member_ast) = self.bundle.ast.members.get(&sig.node).copied() else {
                continue;
            };
            let quill_ast::MemberKind::Field(field) = &member_ast.kind else {
                continue;
            };
            let Some(init) = field.init.clone() else {
                continue;
            };
            let Some(field_idx) = leaf_fields
                .iter()
                .find(|(name, _)| *name == sig.name)
                .map(|&(_, idx)| idx)
            else {
                continue;
            };

            let body_subst = self.member_body_subst_for_owner(owner, sig.node, &owner_subst)?;
            let saved = std::mem::replace(&mut ctx.subst, body_subst);

            ctx.emit(Instruction::LocalGet(this_local));
            let produced = self.lower_expr(ctx, &init)?;
            let declared = self.layouts[leaf].as_ref().expect("layout").fields[field_idx].ty;
            self.coerce(ctx, produced, declared)?;
            ctx.emit(Instruction::StructSet {
                struct_type_index: leaf_struct,
                field_index: field_idx as u32 + 1,
            });

            ctx.subst = saved;
        }
        Ok(())
    }

    // =========================================================================
    // Boxing analysis
    // =========================================================================

    /// Mark mutable locals captured by any closure in the body: their
    /// storage becomes a one-field heap cell shared with the captures.
    pub(crate) fn prepare_boxing(&mut self, ctx: &mut FuncCtx, block: &Block) -> Result<()> {
        for stmt in &block.stmts {
            visit_exprs_stmt(stmt, &mut |expr| {
                if matches!(expr.kind, ExprKind::Closure { .. }) {
                    for (node, mutable) in self.closure_free_locals(expr) {
                        if mutable {
                            ctx.boxed.insert(node);
                        }
                    }
                }
            });
        }
        Ok(())
    }

    /// Free local bindings of a closure: uses whose declaring node is
    /// outside the closure, with the binding's mutability.
    pub(crate) fn closure_free_locals(&self, closure: &Expr) -> Vec<(NodeId, bool)> {
        let ExprKind::Closure { body, .. } = &closure.kind else {
            return Vec::new();
        };
        let mut declared = FxHashSet::default();
        collect_closure_bindings(closure, &mut declared);
        let mut used = Vec::new();
        match body {
            ClosureBody::Expr(e) => collect_local_uses(self, e, &mut used),
            ClosureBody::Block(b) => {
                for s in &b.stmts {
                    visit_exprs_stmt(s, &mut |e| {
                        collect_local_uses_shallow(self, e, &mut used);
                    });
                }
            }
        }
        let mut seen = FxHashSet::default();
        used.retain(|(node, _)| !declared.contains(node) && seen.insert(*node));
        let mut out = used;
        out.sort_by_key(|(node, _)| *node);
        out
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub(crate) fn lower_block_stmts(&mut self, ctx: &mut FuncCtx, block: &Block) -> Result<()> {
        for stmt in &block.stmts {
            self.lower_stmt(ctx, stmt)?;
        }
        Ok(())
    }

    pub(crate) fn lower_stmt(&mut self, ctx: &mut FuncCtx, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Let(l) => {
                let declared = self.ty_of(ctx, stmt.id)?;
                let produced = self.lower_expr(ctx, &l.init)?;
                self.coerce(ctx, produced, declared)?;
                if ctx.boxed.contains(&stmt.id) {
                    let box_ty = self.box_type(declared)?;
                    ctx.emit(Instruction::StructNew(box_ty));
                    let local = ctx.new_local(ref_null(box_ty));
                    ctx.emit(Instruction::LocalSet(local));
                    ctx.local_map.insert(stmt.id, local);
                } else {
                    let val = self.val_type(declared)?;
                    let local = ctx.new_local(val);
                    ctx.emit(Instruction::LocalSet(local));
                    ctx.local_map.insert(stmt.id, local);
                }
            }
            StmtKind::Expr(e) => {
                let produced = self.lower_expr(ctx, e)?;
                self.drop_value(ctx, produced)?;
            }
            StmtKind::Return(value) => {
                self.lower_return(ctx, value.as_ref())?;
            }
            StmtKind::If(if_stmt) => {
                let cond_ty = self.lower_expr(ctx, &if_stmt.cond)?;
                debug_assert_ne!(cond_ty, TypeId::VOID);
                let _level = ctx.open(Instruction::If(BlockType::Empty));
                self.lower_block_stmts(ctx, &if_stmt.then_branch)?;
                if let Some(else_branch) = &if_stmt.else_branch {
                    ctx.emit(Instruction::Else);
                    self.lower_block_stmts(ctx, else_branch)?;
                }
                ctx.close();
            }
            StmtKind::While(while_stmt) => {
                let break_level = ctx.open(Instruction::Block(BlockType::Empty));
                let continue_level = ctx.open(Instruction::Loop(BlockType::Empty));
                self.lower_expr(ctx, &while_stmt.cond)?;
                ctx.emit(Instruction::I32Eqz);
                let rel = ctx.rel(break_level);
                ctx.emit(Instruction::BrIf(rel));
                ctx.loops.push(LoopLabels {
                    break_level,
                    continue_level,
                });
                self.lower_block_stmts(ctx, &while_stmt.body)?;
                ctx.loops.pop();
                let rel = ctx.rel(continue_level);
                ctx.emit(Instruction::Br(rel));
                ctx.close();
                ctx.close();
            }
            StmtKind::Block(block) => self.lower_block_stmts(ctx, block)?,
            StmtKind::Throw(value) => {
                let produced = self.lower_expr(ctx, value)?;
                let _ = produced;
                ctx.emit(Instruction::Throw(0));
            }
            StmtKind::Try(try_stmt) => self.lower_try(ctx, try_stmt)?,
            StmtKind::Break => {
                let Some(labels) = ctx.loops.last() else {
                    return Err(CodegenError::Unsupported("break outside loop".into()));
                };
                let rel = ctx.rel(labels.break_level);
                ctx.emit(Instruction::Br(rel));
            }
            StmtKind::Continue => {
                let Some(labels) = ctx.loops.last() else {
                    return Err(CodegenError::Unsupported("continue outside loop".into()));
                };
                let rel = ctx.rel(labels.continue_level);
                ctx.emit(Instruction::Br(rel));
            }
            StmtKind::Import(_)
            | StmtKind::Func(_)
            | StmtKind::Class(_)
            | StmtKind::Interface(_)
            | StmtKind::Mixin(_)
            | StmtKind::Enum(_)
            | StmtKind::Distinct(_) => {}
        }
        Ok(())
    }

    fn lower_return(&mut self, ctx: &mut FuncCtx, value: Option<&Expr>) -> Result<()> {
        if let Some(frame_level) = ctx.finallys.last().map(|f| f.body_exit_level) {
            // Route through the finally: stash the value, raise the
            // flag, branch to the protected region's exit.
            if ctx.ret_flag.is_none() {
                let flag = ctx.new_local(ValType::I32);
                ctx.ret_flag = Some(flag);
                if ctx.ret_ty != TypeId::VOID {
                    let val = self.val_type(ctx.ret_ty)?;
                    ctx.ret_val = Some(ctx.new_local(val));
                }
            }
            if let Some(value) = value {
                let produced = self.lower_expr(ctx, value)?;
                let ret_ty = ctx.ret_ty;
                self.coerce(ctx, produced, ret_ty)?;
                if let Some(ret_val) = ctx.ret_val {
                    ctx.emit(Instruction::LocalSet(ret_val));
                }
            }
            ctx.emit(Instruction::I32Const(1));
            let flag = ctx.ret_flag.expect("assigned above");
            ctx.emit(Instruction::LocalSet(flag));
            let rel = ctx.rel(frame_level);
            ctx.emit(Instruction::Br(rel));
            return Ok(());
        }

        match value {
            Some(value) => {
                let produced = self.lower_expr(ctx, value)?;
                let ret_ty = ctx.ret_ty;
                self.coerce(ctx, produced, ret_ty)?;
            }
            None => {
                if let Some(this) = ctx.ctor_this {
                    ctx.emit(Instruction::LocalGet(this));
                }
            }
        }
        ctx.emit(Instruction::Return);
        Ok(())
    }

    fn lower_try(&mut self, ctx: &mut FuncCtx, try_stmt: &quill_ast::TryStmt) -> Result<()> {
        match (&try_stmt.catch, &try_stmt.finally) {
            (Some(catch), None) => self.lower_try_catch(ctx, &try_stmt.body, catch),
            (None, Some(finally)) => self.lower_try_finally(ctx, &try_stmt.body, None, finally),
            (Some(catch), Some(finally)) => {
                self.lower_try_finally(ctx, &try_stmt.body, Some(catch), finally)
            }
            (None, None) => self.lower_block_stmts(ctx, &try_stmt.body),
        }
    }

    fn lower_try_catch(
        &mut self,
        ctx: &mut FuncCtx,
        body: &Block,
        catch: &quill_ast::CatchClause,
    ) -> Result<()> {
        let eq_bt = {
            let fty = self.types.func_type(vec![], vec![eqref()]);
            BlockType::FunctionType(fty)
        };
        let done = ctx.open(Instruction::Block(BlockType::Empty));
        let _dest = ctx.open(Instruction::Block(eq_bt));
        // Catch labels resolve in the scope enclosing the try_table:
        // label 0 is the eqref destination block.
        let _try = ctx.open(Instruction::TryTable(
            BlockType::Empty,
            vec![Catch::One { tag: 0, label: 0 }].into(),
        ));
        self.lower_block_stmts(ctx, body)?;
        ctx.close(); // try_table
        let rel = ctx.rel(done);
        ctx.emit(Instruction::Br(rel));
        ctx.close(); // dest

        // Thrown value on the stack: bind it at the declared type.
        let catch_ty = self.ty_of(ctx, catch.binding.id)?;
        let val = self.val_type(catch_ty)?;
        if let ValType::Ref(r) = val {
            if let HeapType::Concrete(idx) = r.heap_type {
                ctx.emit(Instruction::RefCastNullable(HeapType::Concrete(idx)));
            }
        }
        let local = ctx.new_local(val);
        ctx.emit(Instruction::LocalSet(local));
        ctx.local_map.insert(catch.binding.id, local);
        self.lower_block_stmts(ctx, &catch.body)?;
        ctx.close(); // done
        Ok(())
    }

    /// `try…finally` (optionally with a catch nested inside): the
    /// protected region is wrapped so the finally body runs on the
    /// normal path, the return path, and the unwind path — the last
    /// replays the exception with `throw_ref`.
    fn lower_try_finally(
        &mut self,
        ctx: &mut FuncCtx,
        body: &Block,
        catch: Option<&quill_ast::CatchClause>,
        finally: &Block,
    ) -> Result<()> {
        let exn_bt = {
            let fty = self
                .types
                .func_type(vec![], vec![ValType::Ref(RefType::EXNREF)]);
            BlockType::FunctionType(fty)
        };
        let done = ctx.open(Instruction::Block(BlockType::Empty));
        let rethrow = ctx.open(Instruction::Block(exn_bt));
        let body_exit = ctx.open(Instruction::Block(BlockType::Empty));
        let _try = ctx.open(Instruction::TryTable(
            BlockType::Empty,
            vec![Catch::AllRef { label: 1 }].into(),
        ));
        ctx.finallys.push(FinallyFrame {
            body_exit_level: body_exit,
        });
        match catch {
            Some(catch) => self.lower_try_catch(ctx, body, catch)?,
            None => self.lower_block_stmts(ctx, body)?,
        }
        ctx.finallys.pop();
        ctx.close(); // try_table
        ctx.close(); // body_exit

        // Normal (and routed-return) path.
        self.lower_block_stmts(ctx, finally)?;
        if let Some(flag) = ctx.ret_flag {
            ctx.emit(Instruction::LocalGet(flag));
            ctx.open(Instruction::If(BlockType::Empty));
            if let Some(outer) = ctx.finallys.last().map(|f| f.body_exit_level) {
                let rel = ctx.rel(outer);
                ctx.emit(Instruction::Br(rel));
            } else {
                if let Some(ret_val) = ctx.ret_val {
                    ctx.emit(Instruction::LocalGet(ret_val));
                }
                ctx.emit(Instruction::Return);
            }
            ctx.close();
        }
        let rel = ctx.rel(done);
        ctx.emit(Instruction::Br(rel));
        ctx.close(); // rethrow — exnref on stack here

        // Unwind path: run the finally body, then replay.
        let exn_local = ctx.new_local(ValType::Ref(RefType::EXNREF));
        ctx.emit(Instruction::LocalSet(exn_local));
        self.lower_block_stmts(ctx, finally)?;
        ctx.emit(Instruction::LocalGet(exn_local));
        ctx.emit(Instruction::ThrowRef);
        ctx.close(); // done
        Ok(())
    }

    /// Functions whose checked body always returns still need a
    /// validator-visible terminator.
    fn pad_missing_return(&mut self, ctx: &mut FuncCtx) -> Result<()> {
        if ctx.ret_ty != TypeId::VOID {
            ctx.emit(Instruction::Unreachable);
        }
        Ok(())
    }

    fn drop_value(&mut self, ctx: &mut FuncCtx, ty: TypeId) -> Result<()> {
        if ty != TypeId::VOID && ty != TypeId::NEVER {
            ctx.emit(Instruction::Drop);
        }
        Ok(())
    }

    /// Push the zero value of a concrete type.
    pub(crate) fn emit_zero_value(&mut self, ctx: &mut FuncCtx, ty: TypeId) -> Result<()> {
        match self.val_type(ty)? {
            ValType::I32 => ctx.emit(Instruction::I32Const(0)),
            ValType::I64 => ctx.emit(Instruction::I64Const(0)),
            ValType::F32 => ctx.emit(Instruction::F32Const(0.0_f32.into())),
            ValType::F64 => ctx.emit(Instruction::F64Const(0.0.into())),
            ValType::Ref(r) => ctx.emit(Instruction::RefNull(r.heap_type)),
            ValType::V128 => return Err(CodegenError::Unsupported("v128".into())),
        }
        Ok(())
    }

    // =========================================================================
    // Coercion
    // =========================================================================

    /// Adapt a pushed value of type `from` to type `to`: reference
    /// downcasts after narrowing, closure arity adapters wherever a
    /// function type is widened, and the identity everywhere else.
    pub(crate) fn coerce(&mut self, ctx: &mut FuncCtx, from: TypeId, to: TypeId) -> Result<()> {
        if from == to || to == TypeId::VOID || from == TypeId::NEVER {
            return Ok(());
        }
        let from_kind = self.program.types.kind(from);
        let to_kind = self.program.types.kind(to);

        if let (TypeKind::Function(f), TypeKind::Function(t)) = (&from_kind, &to_kind) {
            if f.params.len() != t.params.len() || f.params != t.params || f.return_type != t.return_type {
                return self.emit_arity_adapter(ctx, f.params.clone(), f.return_type, t.params.clone(), t.return_type);
            }
            return Ok(());
        }

        let from_val = self.val_type(from)?;
        let to_val = self.val_type(to)?;
        if from_val == to_val {
            return Ok(());
        }
        match (from_val, to_val) {
            (ValType::Ref(_), ValType::Ref(to_ref)) => {
                match to_ref.heap_type {
                    HeapType::Concrete(idx) => {
                        // Narrowing (or checker-approved) downcast.
                        if !self.is_upcast(from, to) {
                            ctx.emit(Instruction::RefCastNullable(HeapType::Concrete(idx)));
                        }
                    }
                    HeapType::Abstract { .. } => {
                        // Widening to eqref/anyref is free.
                    }
                    HeapType::Exact(_) => unreachable!("exact heap types are not produced here"),
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether `from <: to` holds structurally in the emitted type
    /// hierarchy (no cast needed).
    fn is_upcast(&self, from: TypeId, to: TypeId) -> bool {
        quill_types::assignable(&self.program.types, &self.program.decls, from, to)
    }

    /// Wrap the closure on the stack in an adapter with the target
    /// shape that ignores extra parameters.
    fn emit_arity_adapter(
        &mut self,
        ctx: &mut FuncCtx,
        src_params: Vec<TypeId>,
        src_ret: TypeId,
        dst_params: Vec<TypeId>,
        dst_ret: TypeId,
    ) -> Result<()> {
        let (src_base, src_code) = self.closure_types(&src_params, src_ret)?;
        let (dst_base, dst_code) = self.closure_types(&dst_params, dst_ret)?;

        let key = format!("adapt:{src_base}->{dst_base}");
        let adapter = match self.closure_wrappers.get(&key) {
            Some(&f) => f,
            None => {
                let code_ty = dst_code;
                let index = self
                    .funcs
                    .declare(format!("closure_adapter_{src_base}_{dst_base}"), code_ty);
                // Body: cast env to the adapter shape, pull the inner
                // closure, forward the first src arity arguments.
                let shape = self.closure_shape(dst_base, dst_code, &[ref_null(src_base)]);
                let mut a = FuncCtx::new(
                    TypeSubstitution::new(),
                    dst_params.len() as u32 + 1,
                    None,
                );
                a.emit(Instruction::LocalGet(0));
                a.emit(Instruction::RefCastNullable(HeapType::Concrete(shape)));
                let env = a.new_local(ref_null(shape));
                a.emit(Instruction::LocalSet(env));
                // Inner closure (capture field 1).
                let inner = a.new_local(ref_null(src_base));
                a.emit(Instruction::LocalGet(env));
                a.emit(Instruction::StructGet {
                    struct_type_index: shape,
                    field_index: 1,
                });
                a.emit(Instruction::LocalSet(inner));
                a.emit(Instruction::LocalGet(inner));
                for i in 0..src_params.len() {
                    a.emit(Instruction::LocalGet(1 + i as u32));
                }
                a.emit(Instruction::LocalGet(inner));
                a.emit(Instruction::StructGet {
                    struct_type_index: src_base,
                    field_index: 0,
                });
                a.emit(Instruction::CallRef(src_code));
                if src_ret != TypeId::VOID && dst_ret == TypeId::VOID {
                    a.emit(Instruction::Drop);
                }
                self.funcs.define(index, a.into_function());
                self.closure_wrappers.insert(key, index);
                index
            }
        };
        // Stack: inner closure. Build the adapter shape around it.
        let inner_local = ctx.new_local(ref_null(src_base));
        ctx.emit(Instruction::LocalSet(inner_local));
        self.declare_func_ref(adapter);
        ctx.emit(Instruction::RefFunc(adapter));
        ctx.emit(Instruction::LocalGet(inner_local));
        let shape = self.closure_shape(dst_base, dst_code, &[ref_null(src_base)]);
        ctx.emit(Instruction::StructNew(shape));
        Ok(())
    }
}

// =============================================================================
// AST walking utilities (capture analysis)
// =============================================================================

fn visit_exprs_stmt(stmt: &Stmt, f: &mut impl FnMut(&Expr)) {
    match &stmt.kind {
        StmtKind::Let(l) => visit_exprs(&l.init, f),
        StmtKind::Expr(e) | StmtKind::Throw(e) => visit_exprs(e, f),
        StmtKind::Return(Some(e)) => visit_exprs(e, f),
        StmtKind::Return(None) => {}
        StmtKind::If(s) => {
            visit_exprs(&s.cond, f);
            for st in &s.then_branch.stmts {
                visit_exprs_stmt(st, f);
            }
            if let Some(else_branch) = &s.else_branch {
                for st in &else_branch.stmts {
                    visit_exprs_stmt(st, f);
                }
            }
        }
        StmtKind::While(s) => {
            visit_exprs(&s.cond, f);
            for st in &s.body.stmts {
                visit_exprs_stmt(st, f);
            }
        }
        StmtKind::Block(b) => {
            for st in &b.stmts {
                visit_exprs_stmt(st, f);
            }
        }
        StmtKind::Try(t) => {
            for st in &t.body.stmts {
                visit_exprs_stmt(st, f);
            }
            if let Some(catch) = &t.catch {
                for st in &catch.body.stmts {
                    visit_exprs_stmt(st, f);
                }
            }
            if let Some(finally) = &t.finally {
                for st in &finally.stmts {
                    visit_exprs_stmt(st, f);
                }
            }
        }
        _ => {}
    }
}

fn visit_exprs(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Member { object, .. } => visit_exprs(object, f),
        ExprKind::Index { object, index } => {
            visit_exprs(object, f);
            visit_exprs(index, f);
        }
        ExprKind::Call { callee, args, .. } => {
            visit_exprs(callee, f);
            for a in args {
                visit_exprs(a, f);
            }
        }
        ExprKind::New { args, .. } => {
            for a in args {
                visit_exprs(a, f);
            }
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            visit_exprs(lhs, f);
            visit_exprs(rhs, f);
        }
        ExprKind::Unary { operand, .. } => visit_exprs(operand, f),
        ExprKind::Assign { target, value } => {
            visit_exprs(target, f);
            visit_exprs(value, f);
        }
        ExprKind::Closure { body, .. } => match body {
            ClosureBody::Expr(e) => visit_exprs(e, f),
            ClosureBody::Block(b) => {
                for st in &b.stmts {
                    visit_exprs_stmt(st, f);
                }
            }
        },
        ExprKind::FixedArray(elems) | ExprKind::Tuple(elems) => {
            for e in elems {
                visit_exprs(e, f);
            }
        }
        ExprKind::Record(fields) => {
            for (_, e) in fields {
                visit_exprs(e, f);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            visit_exprs(scrutinee, f);
            for arm in arms {
                visit_exprs(&arm.body, f);
            }
        }
        ExprKind::Cast { operand, .. } | ExprKind::Is { operand, .. } => visit_exprs(operand, f),
        ExprKind::Template { tag, exprs, .. } => {
            if let Some(tag) = tag {
                visit_exprs(tag, f);
            }
            for e in exprs {
                visit_exprs(e, f);
            }
        }
        _ => {}
    }
}

/// Declaration nodes introduced inside a closure (params, local lets,
/// pattern and catch bindings, nested closures' own bindings).
fn collect_closure_bindings(expr: &Expr, out: &mut FxHashSet<NodeId>) {
    let ExprKind::Closure { params, body, .. } = &expr.kind else {
        return;
    };
    for p in params {
        out.insert(p.id);
    }
    match body {
        ClosureBody::Expr(e) => collect_inner_decls_expr(e, out),
        ClosureBody::Block(b) => collect_inner_decls_block(b, out),
    }
}

fn collect_inner_decls_block(block: &Block, out: &mut FxHashSet<NodeId>) {
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::Let(_) => {
                out.insert(stmt.id);
            }
            StmtKind::If(s) => {
                collect_inner_decls_block(&s.then_branch, out);
                if let Some(else_branch) = &s.else_branch {
                    collect_inner_decls_block(else_branch, out);
                }
            }
            StmtKind::While(s) => collect_inner_decls_block(&s.body, out),
            StmtKind::Block(b) => collect_inner_decls_block(b, out),
            StmtKind::Try(t) => {
                collect_inner_decls_block(&t.body, out);
                if let Some(catch) = &t.catch {
                    out.insert(catch.binding.id);
                    collect_inner_decls_block(&catch.body, out);
                }
                if let Some(finally) = &t.finally {
                    collect_inner_decls_block(finally, out);
                }
            }
            _ => {}
        }
        visit_exprs_stmt(stmt, &mut |e| collect_inner_decls_shallow(e, out));
    }
}

fn collect_inner_decls_expr(expr: &Expr, out: &mut FxHashSet<NodeId>) {
    visit_exprs(expr, &mut |e| collect_inner_decls_shallow(e, out));
}

fn collect_inner_decls_shallow(expr: &Expr, out: &mut FxHashSet<NodeId>) {
    match &expr.kind {
        ExprKind::Closure { params, body, .. } => {
            for p in params {
                out.insert(p.id);
            }
            if let ClosureBody::Block(b) = body {
                collect_inner_decls_block(b, out);
            }
        }
        ExprKind::Match { arms, .. } => {
            for arm in arms {
                collect_pattern_bindings(&arm.pattern, out);
            }
        }
        _ => {}
    }
}

fn collect_pattern_bindings(pattern: &Pattern, out: &mut FxHashSet<NodeId>) {
    match &pattern.kind {
        PatternKind::Type { binding: Some(_), .. } | PatternKind::Wildcard(Some(_)) => {
            out.insert(pattern.id);
        }
        PatternKind::Tuple(subs) => {
            for sub in subs {
                collect_pattern_bindings(sub, out);
            }
        }
        PatternKind::Record(fields) => {
            for (_, sub) in fields {
                collect_pattern_bindings(sub, out);
            }
        }
        _ => {}
    }
}

/// Visit every expression inside a closure's body.
pub(crate) fn visit_closure_body(closure: &Expr, f: &mut impl FnMut(&Expr)) {
    if let ExprKind::Closure { body, .. } = &closure.kind {
        match body {
            ClosureBody::Expr(e) => visit_exprs(e, f),
            ClosureBody::Block(b) => {
                for stmt in &b.stmts {
                    visit_exprs_stmt(stmt, f);
                }
            }
        }
    }
}

fn collect_local_uses(generator: &Generator<'_>, expr: &Expr, out: &mut Vec<(NodeId, bool)>) {
    visit_exprs(expr, &mut |e| {
        collect_local_uses_shallow(generator, e, out);
    });
}

fn collect_local_uses_shallow(
    generator: &Generator<'_>,
    expr: &Expr,
    out: &mut Vec<(NodeId, bool)>,
) {
    if let ExprKind::Ident(_) = expr.kind {
        if let Some(Binding::Local { node, mutable }) = generator.program.sema.binding(expr.id) {
            out.push((*node, *mutable));
        }
    }
}
