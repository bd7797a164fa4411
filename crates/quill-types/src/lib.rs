//! The Quill type system.
//!
//! Types are structural values interned to [`TypeId`]s: two types built
//! from equal components are the same id, which is what makes
//! canonicalization, the specialized-class cache, and codegen layout
//! identity work. Nothing in here is ever mutated after interning;
//! substitution produces fresh nodes.

pub mod decl;
pub mod display;
pub mod intern;
pub mod key;
pub mod kind;
pub mod relate;
pub mod subst;

pub use decl::{
    ClassFlags, ClassInfo, CtorSig, DeclId, DeclKind, DeclStore, DistinctInfo, EnumInfo,
    FunctionInfo, InterfaceInfo, MemberFlags, MemberSig, MemberSigKind, TypeParamInfo, Visibility,
};
pub use display::format_type;
pub use intern::TypeInterner;
pub use key::type_key;
pub use kind::{FunctionShape, LiteralValue, TypeId, TypeKind, TypeParamRef, TypeRef};
pub use relate::{assignable, is_primitive_value, is_reference};
pub use subst::{TypeSubstitution, instantiate_type};
