//! Statement checking.
//!
//! Top-level statements run in source order (that order becomes the
//! start function); bodies of hoisted functions and class members are
//! checked afterwards, with the full global scope in view.

use crate::context::LibraryChecker;
use crate::scopes::ValueEntry;
use quill_ast::{Block, Expr, FuncDecl, LetStmt, Stmt, StmtKind};
use quill_common::diagnostics::ErrorCode;
use quill_sema::Binding;
use quill_types::TypeId;

impl<'a> LibraryChecker<'a> {
    // =========================================================================
    // Top level
    // =========================================================================

    pub(crate) fn check_top_level(&mut self) {
        let library = self.library;
        for stmt in &library.stmts {
            match &stmt.kind {
                StmtKind::Import(_)
                | StmtKind::Func(_)
                | StmtKind::Class(_)
                | StmtKind::Interface(_)
                | StmtKind::Mixin(_)
                | StmtKind::Enum(_)
                | StmtKind::Distinct(_) => {}
                _ => self.check_stmt(stmt),
            }
        }
    }

    pub(crate) fn check_bodies(&mut self) {
        let library = self.library;
        for stmt in &library.stmts {
            match &stmt.kind {
                StmtKind::Func(f) => self.check_function_body(f),
                StmtKind::Class(c) => self.check_class_bodies(c),
                StmtKind::Mixin(m) => self.check_mixin_bodies(m),
                _ => {}
            }
        }
    }

    fn check_function_body(&mut self, func: &FuncDecl) {
        let Some(body) = &func.body else {
            // Intrinsic or abstract declaration; nothing to check.
            return;
        };
        let decl = self
            .program
            .decls
            .lookup(&self.library.path, &func.name.name)
            .expect("functions are registered before bodies");
        let info = self
            .program
            .decls
            .function_info(decl)
            .expect("function info")
            .clone();

        self.scopes.push();
        for p in &info.type_params {
            let ty = self.program.types.type_param(info.scope, &p.name);
            self.scopes.declare_type_param(&p.name, ty);
        }
        for (param, &ty) in func.params.iter().zip(&info.params) {
            self.scopes.declare_value(
                &param.name,
                ValueEntry {
                    binding: Binding::Local {
                        node: param.id,
                        mutable: false,
                    },
                    ty,
                },
            );
            self.program.sema.record_type(param.id, ty);
        }
        self.return_types.push(info.return_type);
        self.check_block_stmts(body);
        self.return_types.pop();
        self.scopes.pop();

        if info.return_type != TypeId::VOID
            && info.return_type != TypeId::ERROR
            && !self.block_returns(body)
        {
            self.error(
                ErrorCode::MissingReturn,
                func.name.span,
                format!(
                    "function '{}' does not return on every path",
                    func.name.name
                ),
            );
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub(crate) fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let(l) => self.check_let(stmt, l),
            StmtKind::Expr(e) => {
                self.check_expr(e, None);
            }
            StmtKind::Return(value) => self.check_return(stmt, value.as_ref()),
            StmtKind::If(if_stmt) => {
                self.check_expr(&if_stmt.cond, Some(TypeId::BOOLEAN));
                let (then_facts, else_facts) = self.condition_facts(&if_stmt.cond);
                self.push_narrow(then_facts);
                self.check_block(&if_stmt.then_branch);
                self.pop_narrow();
                if let Some(else_branch) = &if_stmt.else_branch {
                    self.push_narrow(else_facts);
                    self.check_block(else_branch);
                    self.pop_narrow();
                }
            }
            StmtKind::While(while_stmt) => {
                self.check_expr(&while_stmt.cond, Some(TypeId::BOOLEAN));
                let (then_facts, _) = self.condition_facts(&while_stmt.cond);
                self.push_narrow(then_facts);
                self.loop_depth += 1;
                self.check_block(&while_stmt.body);
                self.loop_depth -= 1;
                self.pop_narrow();
            }
            StmtKind::Block(block) => self.check_block(block),
            StmtKind::Throw(value) => {
                let ty = self.check_expr(value, None);
                if ty != TypeId::ERROR
                    && !quill_types::is_reference(&self.program.types, &self.program.decls, ty)
                {
                    let shown = self.fmt_type(ty);
                    self.error(
                        ErrorCode::TypeMismatch,
                        value.span,
                        format!("cannot throw a value of type '{shown}'"),
                    );
                }
            }
            StmtKind::Try(try_stmt) => {
                self.check_block(&try_stmt.body);
                if let Some(catch) = &try_stmt.catch {
                    self.scopes.push();
                    let ty = catch
                        .annotation
                        .as_ref()
                        .map_or(TypeId::ANYREF, |ann| self.resolve_type(ann));
                    self.scopes.declare_value(
                        &catch.binding.name,
                        ValueEntry {
                            binding: Binding::Local {
                                node: catch.binding.id,
                                mutable: false,
                            },
                            ty,
                        },
                    );
                    self.program.sema.record_type(catch.binding.id, ty);
                    self.check_block_stmts(&catch.body);
                    self.scopes.pop();
                }
                if let Some(finally) = &try_stmt.finally {
                    self.check_block(finally);
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error(
                        ErrorCode::JumpOutsideLoop,
                        stmt.span,
                        "break and continue are only valid inside a loop",
                    );
                }
            }
            StmtKind::Import(_)
            | StmtKind::Func(_)
            | StmtKind::Class(_)
            | StmtKind::Interface(_)
            | StmtKind::Mixin(_)
            | StmtKind::Enum(_)
            | StmtKind::Distinct(_) => {
                // Declarations are handled by the dedicated passes; a
                // nested declaration statement is a parser guarantee we
                // do not re-check here.
            }
        }
    }

    /// Check a block in a fresh scope frame. Scope release is
    /// guaranteed on all paths.
    pub(crate) fn check_block(&mut self, block: &Block) {
        self.scopes.push();
        self.check_block_stmts(block);
        self.scopes.pop();
    }

    /// Check a block's statements in the current frame (used where the
    /// caller already pushed a frame holding parameters).
    pub(crate) fn check_block_stmts(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_let(&mut self, stmt: &Stmt, l: &LetStmt) {
        let declared = l.annotation.as_ref().map(|ann| self.resolve_type(ann));
        let init_ty = self.check_expr(&l.init, declared);

        let ty = match declared {
            Some(declared) => {
                if !self.assignable(init_ty, declared) {
                    let found = self.fmt_type(init_ty);
                    let wanted = self.fmt_type(declared);
                    self.error(
                        ErrorCode::TypeMismatch,
                        l.init.span,
                        format!("type '{found}' is not assignable to type '{wanted}'"),
                    );
                }
                declared
            }
            // A `let` keeps literal types; a `var` widens them.
            None if l.mutable => self.program.types.widened(init_ty),
            None => init_ty,
        };

        self.program.sema.record_type(stmt.id, ty);
        self.program.sema.record_type(l.name.id, ty);

        let binding = if self.scopes.depth() == 1 {
            Binding::Global {
                library: self.library.path.clone(),
                node: stmt.id,
                mutable: l.mutable,
            }
        } else {
            Binding::Local {
                node: stmt.id,
                mutable: l.mutable,
            }
        };
        if !self
            .scopes
            .declare_value(&l.name.name, ValueEntry { binding, ty })
        {
            self.error(
                ErrorCode::DuplicateDeclaration,
                l.name.span,
                format!("duplicate declaration of '{}'", l.name.name),
            );
        }
    }

    fn check_return(&mut self, stmt: &Stmt, value: Option<&Expr>) {
        let Some(&expected) = self.return_types.last() else {
            self.error(
                ErrorCode::TypeMismatch,
                stmt.span,
                "return is only valid inside a function body",
            );
            if let Some(value) = value {
                self.check_expr(value, None);
            }
            return;
        };
        match value {
            Some(value) => {
                let ty = self.check_expr(value, Some(expected));
                if expected == TypeId::VOID {
                    if ty != TypeId::VOID && ty != TypeId::ERROR {
                        self.error(
                            ErrorCode::TypeMismatch,
                            value.span,
                            "this function does not return a value",
                        );
                    }
                } else if !self.assignable(ty, expected) {
                    let found = self.fmt_type(ty);
                    let wanted = self.fmt_type(expected);
                    self.error(
                        ErrorCode::TypeMismatch,
                        value.span,
                        format!("type '{found}' is not assignable to return type '{wanted}'"),
                    );
                }
            }
            None => {
                if expected != TypeId::VOID && expected != TypeId::ERROR {
                    let wanted = self.fmt_type(expected);
                    self.error(
                        ErrorCode::TypeMismatch,
                        stmt.span,
                        format!("expected a return value of type '{wanted}'"),
                    );
                }
            }
        }
    }

    // =========================================================================
    // Definite-return analysis
    // =========================================================================

    /// Whether a block definitely returns or throws on every path.
    #[must_use]
    pub(crate) fn block_returns(&self, block: &Block) -> bool {
        block.stmts.iter().any(|stmt| self.stmt_exits(stmt))
    }

    fn stmt_exits(&self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Return(_) | StmtKind::Throw(_) => true,
            StmtKind::Block(block) => self.block_returns(block),
            StmtKind::If(if_stmt) => match &if_stmt.else_branch {
                Some(else_branch) => {
                    self.block_returns(&if_stmt.then_branch) && self.block_returns(else_branch)
                }
                None => false,
            },
            // An expression of type `never` (e.g. `unreachable()`) exits.
            StmtKind::Expr(e) => self.program.sema.type_of(e.id) == Some(TypeId::NEVER),
            _ => false,
        }
    }
}
