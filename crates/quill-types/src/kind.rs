//! Type kinds.
//!
//! [`TypeKind`] is the tagged sum over every type constructor of the
//! language. Values are always consumed through the interner; the
//! constructors here carry [`TypeId`]s, never nested kinds.

use crate::decl::DeclId;

/// An interned type. Ids are dense and stable for one compilation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const I32: TypeId = TypeId(0);
    pub const U32: TypeId = TypeId(1);
    pub const I64: TypeId = TypeId(2);
    pub const F32: TypeId = TypeId(3);
    pub const F64: TypeId = TypeId(4);
    pub const BOOLEAN: TypeId = TypeId(5);
    pub const STRING: TypeId = TypeId(6);
    pub const VOID: TypeId = TypeId(7);
    pub const NEVER: TypeId = TypeId(8);
    pub const ANYREF: TypeId = TypeId(9);
    pub const NULL: TypeId = TypeId(10);
    /// Placeholder type attached to constructs that failed checking.
    /// Assignable to and from everything so one error does not cascade.
    pub const ERROR: TypeId = TypeId(11);

    /// Number of pre-interned types.
    pub(crate) const FIRST_FREE: u32 = 12;
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A literal value usable as a type. Floats are deliberately absent:
/// float literals type as their base primitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LiteralValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl LiteralValue {
    /// The base primitive this literal widens to.
    #[must_use]
    pub fn base_type(&self) -> TypeId {
        match self {
            LiteralValue::Int(_) => TypeId::I32,
            LiteralValue::Bool(_) => TypeId::BOOLEAN,
            LiteralValue::Str(_) => TypeId::STRING,
        }
    }
}

impl std::fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralValue::Int(v) => write!(f, "{v}"),
            LiteralValue::Bool(v) => write!(f, "{v}"),
            LiteralValue::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Identity of a type parameter: the scope id of the declaring generic
/// plus the written name. Two libraries can both declare `T`; the scope
/// keeps them distinct.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeParamRef {
    pub scope: u32,
    pub name: String,
}

/// A nominal type applied to concrete arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub decl: DeclId,
    pub args: Vec<TypeId>,
}

/// A function type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionShape {
    pub type_params: Vec<TypeParamRef>,
    pub params: Vec<TypeId>,
    pub return_type: TypeId,
}

/// The tagged sum of all type constructors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    I32,
    U32,
    I64,
    F32,
    F64,
    Boolean,
    String,
    Void,
    Never,
    AnyRef,
    Null,
    Error,
    Literal(LiteralValue),
    /// Fixed-length array; element type is invariant.
    FixedArray(TypeId),
    /// Growable array; element type is invariant.
    Array(TypeId),
    Tuple(Vec<TypeId>),
    /// Fields sorted by name; the interner enforces the order.
    Record(Vec<(String, TypeId)>),
    /// Members sorted and deduplicated; built through `union_of`.
    Union(Vec<TypeId>),
    Function(FunctionShape),
    Class(TypeRef),
    Interface(TypeRef),
    Mixin(TypeRef),
    Enum(DeclId),
    TypeParam(TypeParamRef),
    /// The `This` type inside the named class declaration.
    This(DeclId),
    /// A distinct alias: nominally separate from its underlying type.
    Distinct { inner: TypeId, decl: DeclId },
    Symbol(DeclId),
}

impl TypeKind {
    /// The kind pre-interned at a fixed id, if this is one of them.
    #[must_use]
    pub(crate) fn preinterned(id: u32) -> Option<TypeKind> {
        Some(match id {
            0 => TypeKind::I32,
            1 => TypeKind::U32,
            2 => TypeKind::I64,
            3 => TypeKind::F32,
            4 => TypeKind::F64,
            5 => TypeKind::Boolean,
            6 => TypeKind::String,
            7 => TypeKind::Void,
            8 => TypeKind::Never,
            9 => TypeKind::AnyRef,
            10 => TypeKind::Null,
            11 => TypeKind::Error,
            _ => return None,
        })
    }
}
