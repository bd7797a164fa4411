//! The Quill AST.
//!
//! Every node carries a [`NodeId`] and a [`Span`]. The kinds follow the
//! surface language: libraries are flat statement lists; classes,
//! interfaces, mixins, enums, and distinct aliases are statements;
//! `match` is an expression.

use quill_common::span::{Span, Spanned};
use serde::{Deserialize, Serialize};

/// Stable identity of an AST node within one compilation.
///
/// Ids are unique across all libraries of a compilation, which lets the
/// semantic side tables use a single keyspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Id used for synthesized nodes that never reach the side tables.
    pub const DUMMY: NodeId = NodeId(u32::MAX);
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// An identifier occurrence that names a declaration (not a use in
/// expression position; those are `ExprKind::Ident`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ident {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
}

/// A literal value as it appears in patterns and literal type annotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LitValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl std::fmt::Display for LitValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LitValue::Int(v) => write!(f, "{v}"),
            LitValue::Bool(v) => write!(f, "{v}"),
            LitValue::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StmtKind {
    Import(ImportStmt),
    Let(LetStmt),
    Func(FuncDecl),
    Class(ClassDecl),
    Interface(InterfaceDecl),
    Mixin(MixinDecl),
    Enum(EnumDecl),
    Distinct(DistinctDecl),
    Expr(Expr),
    Return(Option<Expr>),
    If(IfStmt),
    While(WhileStmt),
    Block(Block),
    Throw(Expr),
    Try(TryStmt),
    Break,
    Continue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportStmt {
    /// The specifier exactly as written (`./util`, `../x/y`, `stdlib:core`).
    pub specifier: String,
    pub names: Vec<ImportName>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportName {
    pub id: NodeId,
    pub span: Span,
    /// Exported name in the source library.
    pub name: String,
    /// Local alias, when `as` was written.
    pub alias: Option<String>,
}

impl ImportName {
    /// The name this import binds in the importing library's scope.
    #[must_use]
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LetStmt {
    pub name: Ident,
    /// `var` bindings are mutable and widen literal initializers.
    pub mutable: bool,
    pub exported: bool,
    pub annotation: Option<TypeAnn>,
    pub init: Expr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: Ident,
    pub exported: bool,
    pub type_params: Vec<TypeParamDecl>,
    pub params: Vec<Param>,
    pub return_ann: Option<TypeAnn>,
    /// Absent for intrinsic declarations.
    pub body: Option<Block>,
    pub decorators: Vec<Decorator>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decorator {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    /// String argument, e.g. `@intrinsic("__array_len")`.
    pub arg: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeParamDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    /// Upper-bound constraint (`T ext Shape`).
    pub constraint: Option<TypeAnn>,
    /// Default argument (`T = i32`).
    pub default: Option<TypeAnn>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Param {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub annotation: Option<TypeAnn>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: Ident,
    pub exported: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    /// Present for extension classes (`class Meters on i32`).
    pub extension_on: Option<TypeAnn>,
    pub type_params: Vec<TypeParamDecl>,
    pub extends: Option<TypeAnn>,
    pub implements: Vec<TypeAnn>,
    /// Applied mixins (`with Logging, Caching`).
    pub mixins: Vec<TypeAnn>,
    pub members: Vec<Member>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub span: Span,
    pub kind: MemberKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MemberKind {
    Field(FieldDecl),
    Method(MethodDecl),
    Accessor(AccessorDecl),
    Constructor(CtorDecl),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: Ident,
    pub visibility: Visibility,
    pub is_static: bool,
    pub annotation: Option<TypeAnn>,
    pub init: Option<Expr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: Ident,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub is_abstract: bool,
    pub type_params: Vec<TypeParamDecl>,
    pub params: Vec<Param>,
    pub return_ann: Option<TypeAnn>,
    /// Absent for abstract and intrinsic methods.
    pub body: Option<Block>,
    pub decorators: Vec<Decorator>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessorKind {
    Get,
    Set,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessorDecl {
    pub name: Ident,
    pub kind: AccessorKind,
    pub visibility: Visibility,
    pub is_static: bool,
    /// The value parameter of a setter.
    pub param: Option<Param>,
    /// The declared type of a getter.
    pub return_ann: Option<TypeAnn>,
    pub body: Block,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CtorDecl {
    pub params: Vec<Param>,
    pub body: Block,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub name: Ident,
    pub exported: bool,
    pub type_params: Vec<TypeParamDecl>,
    pub extends: Vec<TypeAnn>,
    pub members: Vec<InterfaceMember>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterfaceMember {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub type_params: Vec<TypeParamDecl>,
    pub params: Vec<Param>,
    pub return_ann: Option<TypeAnn>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MixinDecl {
    pub name: Ident,
    pub exported: bool,
    pub type_params: Vec<TypeParamDecl>,
    /// The `on` requirement: classes applying this mixin must have this
    /// type reachable through their extends/mixins chain.
    pub on: Option<TypeAnn>,
    pub members: Vec<Member>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: Ident,
    pub exported: bool,
    pub members: Vec<EnumMemberDecl>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumMemberDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
}

/// `distinct type Meters = i32`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DistinctDecl {
    pub name: Ident,
    pub exported: bool,
    pub inner: TypeAnn,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_branch: Block,
    pub else_branch: Option<Block>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TryStmt {
    pub body: Block,
    pub catch: Option<CatchClause>,
    pub finally: Option<Block>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatchClause {
    pub id: NodeId,
    pub span: Span,
    pub binding: Ident,
    pub annotation: Option<TypeAnn>,
    pub body: Block,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    This,
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        type_args: Vec<TypeAnn>,
        args: Vec<Expr>,
    },
    New {
        class: TypeAnn,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Closure {
        params: Vec<Param>,
        return_ann: Option<Box<TypeAnn>>,
        body: ClosureBody,
    },
    /// `#[a, b, c]` — fixed-length array literal.
    FixedArray(Vec<Expr>),
    Tuple(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    Cast {
        operand: Box<Expr>,
        ty: Box<TypeAnn>,
    },
    Is {
        operand: Box<Expr>,
        ty: Box<TypeAnn>,
    },
    Template {
        tag: Option<Box<Expr>>,
        /// The literal chunks; always `exprs.len() + 1` entries.
        quasis: Vec<String>,
        exprs: Vec<Expr>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClosureBody {
    Expr(Box<Expr>),
    Block(Block),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuit logical and.
    And,
    /// Short-circuit logical or.
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchArm {
    pub id: NodeId,
    pub span: Span,
    pub pattern: Pattern,
    pub body: Expr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pattern {
    pub id: NodeId,
    pub span: Span,
    pub kind: PatternKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PatternKind {
    Literal(LitValue),
    Null,
    /// Class (or other type) pattern with an optional binding:
    /// `Circle c => ...`.
    Type {
        ty: TypeAnn,
        binding: Option<String>,
    },
    /// `Color.Red => ...`
    EnumMember {
        enum_name: String,
        member: String,
    },
    Tuple(Vec<Pattern>),
    Record(Vec<(String, Pattern)>),
    /// `_` or a bare binding name that matches anything.
    Wildcard(Option<String>),
}

// =============================================================================
// Type annotations
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeAnn {
    pub id: NodeId,
    pub span: Span,
    pub kind: TypeAnnKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TypeAnnKind {
    /// A (possibly generic) named type: `i32`, `Box<string>`, `Array<T>`.
    Named {
        name: String,
        args: Vec<TypeAnn>,
    },
    Union(Vec<TypeAnn>),
    Tuple(Vec<TypeAnn>),
    Record(Vec<(String, TypeAnn)>),
    Function {
        params: Vec<TypeAnn>,
        ret: Box<TypeAnn>,
    },
    /// `#[T]` — fixed-length array.
    FixedArray(Box<TypeAnn>),
    Literal(LitValue),
    Null,
    This,
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        self.span
    }
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        self.span
    }
}

impl Spanned for TypeAnn {
    fn span(&self) -> Span {
        self.span
    }
}

impl Spanned for Pattern {
    fn span(&self) -> Span {
        self.span
    }
}

impl Stmt {
    /// Whether this statement introduces a hoisted type declaration.
    #[must_use]
    pub fn is_type_decl(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Class(_)
                | StmtKind::Interface(_)
                | StmtKind::Mixin(_)
                | StmtKind::Enum(_)
                | StmtKind::Distinct(_)
        )
    }

    /// The declared name, for declaration statements.
    #[must_use]
    pub fn decl_name(&self) -> Option<&str> {
        match &self.kind {
            StmtKind::Let(s) => Some(&s.name.name),
            StmtKind::Func(f) => Some(&f.name.name),
            StmtKind::Class(c) => Some(&c.name.name),
            StmtKind::Interface(i) => Some(&i.name.name),
            StmtKind::Mixin(m) => Some(&m.name.name),
            StmtKind::Enum(e) => Some(&e.name.name),
            StmtKind::Distinct(d) => Some(&d.name.name),
            _ => None,
        }
    }

    /// Whether the declaration is marked `export`.
    #[must_use]
    pub fn is_exported(&self) -> bool {
        match &self.kind {
            StmtKind::Let(s) => s.exported,
            StmtKind::Func(f) => f.exported,
            StmtKind::Class(c) => c.exported,
            StmtKind::Interface(i) => i.exported,
            StmtKind::Mixin(m) => m.exported,
            StmtKind::Enum(e) => e.exported,
            StmtKind::Distinct(d) => d.exported,
            _ => false,
        }
    }
}

impl MethodDecl {
    /// Find a decorator by name.
    #[must_use]
    pub fn decorator(&self, name: &str) -> Option<&Decorator> {
        self.decorators.iter().find(|d| d.name == name)
    }

    /// The intrinsic name, when `@intrinsic("...")` is present.
    #[must_use]
    pub fn intrinsic_name(&self) -> Option<&str> {
        self.decorator("intrinsic").and_then(|d| d.arg.as_deref())
    }
}

impl FuncDecl {
    #[must_use]
    pub fn decorator(&self, name: &str) -> Option<&Decorator> {
        self.decorators.iter().find(|d| d.name == name)
    }

    #[must_use]
    pub fn intrinsic_name(&self) -> Option<&str> {
        self.decorator("intrinsic").and_then(|d| d.arg.as_deref())
    }
}
