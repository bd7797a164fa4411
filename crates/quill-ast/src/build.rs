//! Programmatic AST construction.
//!
//! The builder is how tests (and any embedder without a text parser)
//! produce trees: every node gets its id from the compilation's
//! [`NodeIdGen`], so builder-made ASTs are indistinguishable from parsed
//! ones as far as the pipeline is concerned. Spans are dummy spans;
//! diagnostics for synthetic trees print without locations.

use crate::ast::*;
use crate::source::NodeIdGen;
use quill_common::span::Span;

pub struct AstBuilder<'g> {
    ids: &'g mut NodeIdGen,
}

impl<'g> AstBuilder<'g> {
    pub fn new(ids: &'g mut NodeIdGen) -> Self {
        Self { ids }
    }

    fn id(&mut self) -> NodeId {
        self.ids.fresh()
    }

    // =========================================================================
    // Type annotations
    // =========================================================================

    fn ann(&mut self, kind: TypeAnnKind) -> TypeAnn {
        TypeAnn {
            id: self.id(),
            span: Span::dummy(),
            kind,
        }
    }

    pub fn ty(&mut self, name: &str) -> TypeAnn {
        self.ann(TypeAnnKind::Named {
            name: name.to_string(),
            args: Vec::new(),
        })
    }

    pub fn ty_args(&mut self, name: &str, args: Vec<TypeAnn>) -> TypeAnn {
        self.ann(TypeAnnKind::Named {
            name: name.to_string(),
            args,
        })
    }

    pub fn ty_union(&mut self, members: Vec<TypeAnn>) -> TypeAnn {
        self.ann(TypeAnnKind::Union(members))
    }

    pub fn ty_tuple(&mut self, elems: Vec<TypeAnn>) -> TypeAnn {
        self.ann(TypeAnnKind::Tuple(elems))
    }

    pub fn ty_record(&mut self, fields: Vec<(&str, TypeAnn)>) -> TypeAnn {
        self.ann(TypeAnnKind::Record(
            fields
                .into_iter()
                .map(|(n, t)| (n.to_string(), t))
                .collect(),
        ))
    }

    pub fn ty_func(&mut self, params: Vec<TypeAnn>, ret: TypeAnn) -> TypeAnn {
        self.ann(TypeAnnKind::Function {
            params,
            ret: Box::new(ret),
        })
    }

    pub fn ty_fixed_array(&mut self, elem: TypeAnn) -> TypeAnn {
        self.ann(TypeAnnKind::FixedArray(Box::new(elem)))
    }

    pub fn ty_lit_int(&mut self, value: i64) -> TypeAnn {
        self.ann(TypeAnnKind::Literal(LitValue::Int(value)))
    }

    pub fn ty_lit_str(&mut self, value: &str) -> TypeAnn {
        self.ann(TypeAnnKind::Literal(LitValue::Str(value.to_string())))
    }

    pub fn ty_null(&mut self) -> TypeAnn {
        self.ann(TypeAnnKind::Null)
    }

    pub fn ty_this(&mut self) -> TypeAnn {
        self.ann(TypeAnnKind::This)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr(&mut self, kind: ExprKind) -> Expr {
        Expr {
            id: self.id(),
            span: Span::dummy(),
            kind,
        }
    }

    pub fn int(&mut self, value: i64) -> Expr {
        self.expr(ExprKind::Int(value))
    }

    pub fn float(&mut self, value: f64) -> Expr {
        self.expr(ExprKind::Float(value))
    }

    pub fn bool_(&mut self, value: bool) -> Expr {
        self.expr(ExprKind::Bool(value))
    }

    pub fn str_(&mut self, value: &str) -> Expr {
        self.expr(ExprKind::Str(value.to_string()))
    }

    pub fn null(&mut self) -> Expr {
        self.expr(ExprKind::Null)
    }

    pub fn this(&mut self) -> Expr {
        self.expr(ExprKind::This)
    }

    pub fn ident(&mut self, name: &str) -> Expr {
        self.expr(ExprKind::Ident(name.to_string()))
    }

    pub fn member(&mut self, object: Expr, property: &str) -> Expr {
        self.expr(ExprKind::Member {
            object: Box::new(object),
            property: property.to_string(),
        })
    }

    pub fn index(&mut self, object: Expr, index: Expr) -> Expr {
        self.expr(ExprKind::Index {
            object: Box::new(object),
            index: Box::new(index),
        })
    }

    pub fn call(&mut self, callee: Expr, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            callee: Box::new(callee),
            type_args: Vec::new(),
            args,
        })
    }

    pub fn call_generic(&mut self, callee: Expr, type_args: Vec<TypeAnn>, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            callee: Box::new(callee),
            type_args,
            args,
        })
    }

    pub fn new_(&mut self, class: TypeAnn, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::New { class, args })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn add(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn eq(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        self.binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Expr) -> Expr {
        self.expr(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn assign(&mut self, target: Expr, value: Expr) -> Expr {
        self.expr(ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn closure(&mut self, params: Vec<Param>, body: Expr) -> Expr {
        self.expr(ExprKind::Closure {
            params,
            return_ann: None,
            body: ClosureBody::Expr(Box::new(body)),
        })
    }

    pub fn closure_block(&mut self, params: Vec<Param>, body: Block) -> Expr {
        self.expr(ExprKind::Closure {
            params,
            return_ann: None,
            body: ClosureBody::Block(body),
        })
    }

    pub fn fixed_array(&mut self, elems: Vec<Expr>) -> Expr {
        self.expr(ExprKind::FixedArray(elems))
    }

    pub fn tuple(&mut self, elems: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Tuple(elems))
    }

    pub fn record(&mut self, fields: Vec<(&str, Expr)>) -> Expr {
        self.expr(ExprKind::Record(
            fields
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        ))
    }

    pub fn match_(&mut self, scrutinee: Expr, arms: Vec<MatchArm>) -> Expr {
        self.expr(ExprKind::Match {
            scrutinee: Box::new(scrutinee),
            arms,
        })
    }

    pub fn cast(&mut self, operand: Expr, ty: TypeAnn) -> Expr {
        self.expr(ExprKind::Cast {
            operand: Box::new(operand),
            ty: Box::new(ty),
        })
    }

    pub fn is_(&mut self, operand: Expr, ty: TypeAnn) -> Expr {
        self.expr(ExprKind::Is {
            operand: Box::new(operand),
            ty: Box::new(ty),
        })
    }

    pub fn template(&mut self, quasis: Vec<&str>, exprs: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Template {
            tag: None,
            quasis: quasis.into_iter().map(str::to_string).collect(),
            exprs,
        })
    }

    pub fn tagged_template(&mut self, tag: Expr, quasis: Vec<&str>, exprs: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Template {
            tag: Some(Box::new(tag)),
            quasis: quasis.into_iter().map(str::to_string).collect(),
            exprs,
        })
    }

    // =========================================================================
    // Patterns and match arms
    // =========================================================================

    fn pattern(&mut self, kind: PatternKind) -> Pattern {
        Pattern {
            id: self.id(),
            span: Span::dummy(),
            kind,
        }
    }

    pub fn pat_int(&mut self, value: i64) -> Pattern {
        self.pattern(PatternKind::Literal(LitValue::Int(value)))
    }

    pub fn pat_str(&mut self, value: &str) -> Pattern {
        self.pattern(PatternKind::Literal(LitValue::Str(value.to_string())))
    }

    pub fn pat_bool(&mut self, value: bool) -> Pattern {
        self.pattern(PatternKind::Literal(LitValue::Bool(value)))
    }

    pub fn pat_null(&mut self) -> Pattern {
        self.pattern(PatternKind::Null)
    }

    pub fn pat_type(&mut self, ty: TypeAnn, binding: Option<&str>) -> Pattern {
        self.pattern(PatternKind::Type {
            ty,
            binding: binding.map(str::to_string),
        })
    }

    pub fn pat_enum(&mut self, enum_name: &str, member: &str) -> Pattern {
        self.pattern(PatternKind::EnumMember {
            enum_name: enum_name.to_string(),
            member: member.to_string(),
        })
    }

    pub fn pat_tuple(&mut self, elems: Vec<Pattern>) -> Pattern {
        self.pattern(PatternKind::Tuple(elems))
    }

    pub fn pat_wildcard(&mut self) -> Pattern {
        self.pattern(PatternKind::Wildcard(None))
    }

    pub fn pat_binding(&mut self, name: &str) -> Pattern {
        self.pattern(PatternKind::Wildcard(Some(name.to_string())))
    }

    pub fn arm(&mut self, pattern: Pattern, body: Expr) -> MatchArm {
        MatchArm {
            id: self.id(),
            span: Span::dummy(),
            pattern,
            body,
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn stmt(&mut self, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.id(),
            span: Span::dummy(),
            kind,
        }
    }

    pub fn name(&mut self, name: &str) -> Ident {
        Ident {
            id: self.id(),
            span: Span::dummy(),
            name: name.to_string(),
        }
    }

    pub fn param(&mut self, name: &str, annotation: TypeAnn) -> Param {
        Param {
            id: self.id(),
            span: Span::dummy(),
            name: name.to_string(),
            annotation: Some(annotation),
        }
    }

    pub fn param_untyped(&mut self, name: &str) -> Param {
        Param {
            id: self.id(),
            span: Span::dummy(),
            name: name.to_string(),
            annotation: None,
        }
    }

    pub fn type_param(&mut self, name: &str) -> TypeParamDecl {
        TypeParamDecl {
            id: self.id(),
            span: Span::dummy(),
            name: name.to_string(),
            constraint: None,
            default: None,
        }
    }

    pub fn block(&mut self, stmts: Vec<Stmt>) -> Block {
        Block {
            id: self.id(),
            span: Span::dummy(),
            stmts,
        }
    }

    pub fn let_(&mut self, name: &str, init: Expr) -> Stmt {
        let name = self.name(name);
        self.stmt(StmtKind::Let(LetStmt {
            name,
            mutable: false,
            exported: false,
            annotation: None,
            init,
        }))
    }

    pub fn let_typed(&mut self, name: &str, annotation: TypeAnn, init: Expr) -> Stmt {
        let name = self.name(name);
        self.stmt(StmtKind::Let(LetStmt {
            name,
            mutable: false,
            exported: false,
            annotation: Some(annotation),
            init,
        }))
    }

    pub fn var_(&mut self, name: &str, init: Expr) -> Stmt {
        let name = self.name(name);
        self.stmt(StmtKind::Let(LetStmt {
            name,
            mutable: true,
            exported: false,
            annotation: None,
            init,
        }))
    }

    /// Mark a declaration statement as exported.
    #[must_use]
    pub fn exported(&mut self, mut stmt: Stmt) -> Stmt {
        match &mut stmt.kind {
            StmtKind::Let(s) => s.exported = true,
            StmtKind::Func(f) => f.exported = true,
            StmtKind::Class(c) => c.exported = true,
            StmtKind::Interface(i) => i.exported = true,
            StmtKind::Mixin(m) => m.exported = true,
            StmtKind::Enum(e) => e.exported = true,
            StmtKind::Distinct(d) => d.exported = true,
            _ => {}
        }
        stmt
    }

    pub fn func(
        &mut self,
        name: &str,
        params: Vec<Param>,
        return_ann: Option<TypeAnn>,
        body: Block,
    ) -> Stmt {
        let name = self.name(name);
        self.stmt(StmtKind::Func(FuncDecl {
            name,
            exported: false,
            type_params: Vec::new(),
            params,
            return_ann,
            body: Some(body),
            decorators: Vec::new(),
        }))
    }

    /// A default, empty class declaration to be filled by the caller.
    pub fn class(&mut self, name: &str) -> ClassDecl {
        let name = self.name(name);
        ClassDecl {
            name,
            exported: false,
            is_abstract: false,
            is_final: false,
            extension_on: None,
            type_params: Vec::new(),
            extends: None,
            implements: Vec::new(),
            mixins: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn stmt_class(&mut self, class: ClassDecl) -> Stmt {
        self.stmt(StmtKind::Class(class))
    }

    pub fn interface(&mut self, name: &str) -> InterfaceDecl {
        let name = self.name(name);
        InterfaceDecl {
            name,
            exported: false,
            type_params: Vec::new(),
            extends: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn stmt_interface(&mut self, interface: InterfaceDecl) -> Stmt {
        self.stmt(StmtKind::Interface(interface))
    }

    pub fn interface_method(
        &mut self,
        name: &str,
        params: Vec<Param>,
        return_ann: TypeAnn,
    ) -> InterfaceMember {
        InterfaceMember {
            id: self.id(),
            span: Span::dummy(),
            name: name.to_string(),
            type_params: Vec::new(),
            params,
            return_ann: Some(return_ann),
        }
    }

    pub fn mixin(&mut self, name: &str) -> MixinDecl {
        let name = self.name(name);
        MixinDecl {
            name,
            exported: false,
            type_params: Vec::new(),
            on: None,
            members: Vec::new(),
        }
    }

    pub fn stmt_mixin(&mut self, mixin: MixinDecl) -> Stmt {
        self.stmt(StmtKind::Mixin(mixin))
    }

    pub fn enum_(&mut self, name: &str, members: Vec<&str>) -> Stmt {
        let name = self.name(name);
        let members = members
            .into_iter()
            .map(|m| EnumMemberDecl {
                id: self.id(),
                span: Span::dummy(),
                name: m.to_string(),
            })
            .collect();
        self.stmt(StmtKind::Enum(EnumDecl {
            name,
            exported: false,
            members,
        }))
    }

    pub fn distinct(&mut self, name: &str, inner: TypeAnn) -> Stmt {
        let name = self.name(name);
        self.stmt(StmtKind::Distinct(DistinctDecl {
            name,
            exported: false,
            inner,
        }))
    }

    pub fn field(&mut self, name: &str, annotation: Option<TypeAnn>, init: Option<Expr>) -> Member {
        let name = self.name(name);
        Member {
            id: self.id(),
            span: Span::dummy(),
            kind: MemberKind::Field(FieldDecl {
                name,
                visibility: Visibility::Public,
                is_static: false,
                annotation,
                init,
            }),
        }
    }

    pub fn private_field(
        &mut self,
        name: &str,
        annotation: Option<TypeAnn>,
        init: Option<Expr>,
    ) -> Member {
        let mut member = self.field(name, annotation, init);
        if let MemberKind::Field(f) = &mut member.kind {
            f.visibility = Visibility::Private;
        }
        member
    }

    pub fn method(
        &mut self,
        name: &str,
        params: Vec<Param>,
        return_ann: Option<TypeAnn>,
        body: Block,
    ) -> Member {
        let name = self.name(name);
        Member {
            id: self.id(),
            span: Span::dummy(),
            kind: MemberKind::Method(MethodDecl {
                name,
                visibility: Visibility::Public,
                is_static: false,
                is_final: false,
                is_abstract: false,
                type_params: Vec::new(),
                params,
                return_ann,
                body: Some(body),
                decorators: Vec::new(),
            }),
        }
    }

    pub fn abstract_method(
        &mut self,
        name: &str,
        params: Vec<Param>,
        return_ann: Option<TypeAnn>,
    ) -> Member {
        let name = self.name(name);
        Member {
            id: self.id(),
            span: Span::dummy(),
            kind: MemberKind::Method(MethodDecl {
                name,
                visibility: Visibility::Public,
                is_static: false,
                is_final: false,
                is_abstract: true,
                type_params: Vec::new(),
                params,
                return_ann,
                body: None,
                decorators: Vec::new(),
            }),
        }
    }

    pub fn constructor(&mut self, params: Vec<Param>, body: Block) -> Member {
        Member {
            id: self.id(),
            span: Span::dummy(),
            kind: MemberKind::Constructor(CtorDecl { params, body }),
        }
    }

    pub fn getter(&mut self, name: &str, return_ann: TypeAnn, body: Block) -> Member {
        let name = self.name(name);
        Member {
            id: self.id(),
            span: Span::dummy(),
            kind: MemberKind::Accessor(AccessorDecl {
                name,
                kind: AccessorKind::Get,
                visibility: Visibility::Public,
                is_static: false,
                param: None,
                return_ann: Some(return_ann),
                body,
            }),
        }
    }

    pub fn setter(&mut self, name: &str, param: Param, body: Block) -> Member {
        let name = self.name(name);
        Member {
            id: self.id(),
            span: Span::dummy(),
            kind: MemberKind::Accessor(AccessorDecl {
                name,
                kind: AccessorKind::Set,
                visibility: Visibility::Public,
                is_static: false,
                param: Some(param),
                return_ann: None,
                body,
            }),
        }
    }

    pub fn import(&mut self, specifier: &str, names: Vec<&str>) -> Stmt {
        let names = names
            .into_iter()
            .map(|n| ImportName {
                id: self.id(),
                span: Span::dummy(),
                name: n.to_string(),
                alias: None,
            })
            .collect();
        self.stmt(StmtKind::Import(ImportStmt {
            specifier: specifier.to_string(),
            names,
        }))
    }

    pub fn import_as(&mut self, specifier: &str, names: Vec<(&str, &str)>) -> Stmt {
        let names = names
            .into_iter()
            .map(|(n, a)| ImportName {
                id: self.id(),
                span: Span::dummy(),
                name: n.to_string(),
                alias: Some(a.to_string()),
            })
            .collect();
        self.stmt(StmtKind::Import(ImportStmt {
            specifier: specifier.to_string(),
            names,
        }))
    }

    pub fn expr_stmt(&mut self, expr: Expr) -> Stmt {
        self.stmt(StmtKind::Expr(expr))
    }

    pub fn ret(&mut self, expr: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Return(expr))
    }

    pub fn if_(&mut self, cond: Expr, then_branch: Block, else_branch: Option<Block>) -> Stmt {
        self.stmt(StmtKind::If(IfStmt {
            cond,
            then_branch,
            else_branch,
        }))
    }

    pub fn while_(&mut self, cond: Expr, body: Block) -> Stmt {
        self.stmt(StmtKind::While(WhileStmt { cond, body }))
    }

    pub fn throw_(&mut self, expr: Expr) -> Stmt {
        self.stmt(StmtKind::Throw(expr))
    }

    pub fn try_(&mut self, body: Block, catch: Option<CatchClause>, finally: Option<Block>) -> Stmt {
        self.stmt(StmtKind::Try(TryStmt {
            body,
            catch,
            finally,
        }))
    }

    pub fn catch(&mut self, binding: &str, annotation: Option<TypeAnn>, body: Block) -> CatchClause {
        let binding = self.name(binding);
        CatchClause {
            id: self.id(),
            span: Span::dummy(),
            binding,
            annotation,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_across_nodes() {
        let mut ids = NodeIdGen::new();
        let mut b = AstBuilder::new(&mut ids);
        let one = b.int(1);
        let two = b.int(2);
        let sum = b.add(one, two);
        let stmt = b.let_("x", sum);
        let mut seen = std::collections::HashSet::new();
        assert!(seen.insert(stmt.id));
        if let StmtKind::Let(l) = &stmt.kind {
            assert!(seen.insert(l.name.id));
            assert!(seen.insert(l.init.id));
            if let ExprKind::Binary { lhs, rhs, .. } = &l.init.kind {
                assert!(seen.insert(lhs.id));
                assert!(seen.insert(rhs.id));
            }
        }
    }

    #[test]
    fn exported_flips_any_declaration() {
        let mut ids = NodeIdGen::new();
        let mut b = AstBuilder::new(&mut ids);
        let init = b.int(1);
        let stmt = b.let_("x", init);
        assert!(!stmt.is_exported());
        let stmt = b.exported(stmt);
        assert!(stmt.is_exported());
        assert_eq!(stmt.decl_name(), Some("x"));
    }
}
