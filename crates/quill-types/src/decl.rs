//! Declaration metadata.
//!
//! Declarations are keyed by stable [`DeclId`]s and resolved lazily:
//! the checker registers a skeletal entry before checking bodies, which
//! is what makes self-referential and mutually-recursive classes work.
//! Nothing holds a direct reference from one declaration to another;
//! heritage edges are `TypeId`s whose `TypeRef`s carry `DeclId`s.

use crate::kind::TypeId;
use bitflags::bitflags;
use quill_ast::NodeId;
use rustc_hash::FxHashMap;

/// Stable identity of a declaration within one compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

impl std::fmt::Display for DeclId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclKind {
    Class,
    Interface,
    Mixin,
    Enum,
    Distinct,
    Function,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ClassFlags: u8 {
        const ABSTRACT = 1 << 0;
        const FINAL = 1 << 1;
        const EXTENSION = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MemberFlags: u8 {
        const STATIC = 1 << 0;
        const FINAL = 1 << 1;
        const ABSTRACT = 1 << 2;
        const VIRTUAL = 1 << 3;
    }
}

/// One type parameter of a generic declaration.
#[derive(Clone, Debug)]
pub struct TypeParamInfo {
    pub name: String,
    /// Upper-bound constraint, already resolved to a type.
    pub constraint: Option<TypeId>,
    /// Default argument applied when fewer arguments are written.
    pub default: Option<TypeId>,
}

/// Signature of one class/mixin member, in declaration order.
#[derive(Clone, Debug)]
pub struct MemberSig {
    pub name: String,
    pub visibility: Visibility,
    pub flags: MemberFlags,
    /// AST node of the declaring member (body lookup for codegen).
    pub node: NodeId,
    pub kind: MemberSigKind,
}

#[derive(Clone, Debug)]
pub enum MemberSigKind {
    Field {
        ty: TypeId,
    },
    Method {
        type_params: Vec<TypeParamInfo>,
        /// Type-parameter scope of the method's own generics.
        scope: u32,
        params: Vec<TypeId>,
        return_type: TypeId,
        intrinsic: Option<String>,
    },
    Getter {
        ty: TypeId,
    },
    Setter {
        ty: TypeId,
    },
}

impl MemberSig {
    /// The name used for override-conflict purposes: accessors occupy
    /// `get_X`/`set_X` slots.
    #[must_use]
    pub fn slot_name(&self) -> String {
        match self.kind {
            MemberSigKind::Getter { .. } => format!("get_{}", self.name),
            MemberSigKind::Setter { .. } => format!("set_{}", self.name),
            _ => self.name.clone(),
        }
    }

    #[must_use]
    pub fn is_method(&self) -> bool {
        matches!(self.kind, MemberSigKind::Method { .. })
    }

    #[must_use]
    pub fn is_field(&self) -> bool {
        matches!(self.kind, MemberSigKind::Field { .. })
    }
}

/// Constructor signature.
#[derive(Clone, Debug)]
pub struct CtorSig {
    pub params: Vec<TypeId>,
    pub node: NodeId,
}

/// Metadata for a class or a mixin (mixins reuse the shape; `on` is
/// their application requirement).
#[derive(Clone, Debug, Default)]
pub struct ClassInfo {
    pub type_params: Vec<TypeParamInfo>,
    /// Scope id of this declaration's type parameters.
    pub scope: u32,
    /// Superclass as a `Class` type with concrete arguments.
    pub extends: Option<TypeId>,
    pub implements: Vec<TypeId>,
    pub mixins: Vec<TypeId>,
    pub flags: ClassFlags,
    /// Inner type for extension classes (`class Meters on i32`).
    pub extension_on: Option<TypeId>,
    /// Mixin `on` requirement.
    pub on: Option<TypeId>,
    /// Ordered member list (fields, accessors, methods).
    pub members: Vec<MemberSig>,
    pub ctor: Option<CtorSig>,
}

#[derive(Clone, Debug, Default)]
pub struct InterfaceInfo {
    pub type_params: Vec<TypeParamInfo>,
    pub scope: u32,
    pub extends: Vec<TypeId>,
    /// Method signatures only; interfaces carry no state.
    pub members: Vec<MemberSig>,
}

#[derive(Clone, Debug, Default)]
pub struct EnumInfo {
    pub members: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct DistinctInfo {
    pub inner: TypeId,
}

#[derive(Clone, Debug, Default)]
pub struct FunctionInfo {
    pub type_params: Vec<TypeParamInfo>,
    pub scope: u32,
    pub params: Vec<TypeId>,
    pub return_type: TypeId,
    pub intrinsic: Option<String>,
}

#[derive(Clone, Debug)]
pub enum DeclInfo {
    Class(ClassInfo),
    Interface(InterfaceInfo),
    Mixin(ClassInfo),
    Enum(EnumInfo),
    Distinct(DistinctInfo),
    Function(FunctionInfo),
}

/// One declaration record.
#[derive(Clone, Debug)]
pub struct DeclData {
    pub kind: DeclKind,
    /// Canonical path of the owning library. Part of every
    /// specialization key: two libraries can both declare `Handler`.
    pub library: String,
    pub name: String,
    /// AST node of the declaration statement.
    pub node: NodeId,
    pub info: DeclInfo,
}

/// Process-wide declaration table for one compilation.
#[derive(Debug, Default)]
pub struct DeclStore {
    decls: Vec<DeclData>,
    by_key: FxHashMap<(String, String), DeclId>,
    next_scope: u32,
}

impl DeclStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration with skeletal info. Idempotent per
    /// `(library, name)`: re-declaring returns the existing id.
    pub fn declare(
        &mut self,
        kind: DeclKind,
        library: &str,
        name: &str,
        node: NodeId,
    ) -> DeclId {
        let key = (library.to_string(), name.to_string());
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }
        let info = match kind {
            DeclKind::Class => DeclInfo::Class(ClassInfo::default()),
            DeclKind::Interface => DeclInfo::Interface(InterfaceInfo::default()),
            DeclKind::Mixin => DeclInfo::Mixin(ClassInfo::default()),
            DeclKind::Enum => DeclInfo::Enum(EnumInfo::default()),
            DeclKind::Distinct => DeclInfo::Distinct(DistinctInfo {
                inner: TypeId::ERROR,
            }),
            DeclKind::Function => DeclInfo::Function(FunctionInfo {
                return_type: TypeId::VOID,
                ..FunctionInfo::default()
            }),
        };
        let id = DeclId(u32::try_from(self.decls.len()).unwrap_or(u32::MAX));
        self.decls.push(DeclData {
            kind,
            library: key.0.clone(),
            name: key.1.clone(),
            node,
            info,
        });
        self.by_key.insert(key, id);
        id
    }

    /// Issue a fresh type-parameter scope id.
    pub fn fresh_scope(&mut self) -> u32 {
        self.next_scope += 1;
        self.next_scope
    }

    #[must_use]
    pub fn get(&self, id: DeclId) -> &DeclData {
        &self.decls[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: DeclId) -> &mut DeclData {
        &mut self.decls[id.0 as usize]
    }

    #[must_use]
    pub fn lookup(&self, library: &str, name: &str) -> Option<DeclId> {
        self.by_key
            .get(&(library.to_string(), name.to_string()))
            .copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeclId, &DeclData)> {
        self.decls
            .iter()
            .enumerate()
            .map(|(i, d)| (DeclId(i as u32), d))
    }

    /// Class/mixin info accessors. Mixins share the class shape.
    #[must_use]
    pub fn class_info(&self, id: DeclId) -> Option<&ClassInfo> {
        match &self.get(id).info {
            DeclInfo::Class(info) | DeclInfo::Mixin(info) => Some(info),
            _ => None,
        }
    }

    pub fn class_info_mut(&mut self, id: DeclId) -> Option<&mut ClassInfo> {
        match &mut self.get_mut(id).info {
            DeclInfo::Class(info) | DeclInfo::Mixin(info) => Some(info),
            _ => None,
        }
    }

    #[must_use]
    pub fn interface_info(&self, id: DeclId) -> Option<&InterfaceInfo> {
        match &self.get(id).info {
            DeclInfo::Interface(info) => Some(info),
            _ => None,
        }
    }

    pub fn interface_info_mut(&mut self, id: DeclId) -> Option<&mut InterfaceInfo> {
        match &mut self.get_mut(id).info {
            DeclInfo::Interface(info) => Some(info),
            _ => None,
        }
    }

    #[must_use]
    pub fn enum_info(&self, id: DeclId) -> Option<&EnumInfo> {
        match &self.get(id).info {
            DeclInfo::Enum(info) => Some(info),
            _ => None,
        }
    }

    pub fn enum_info_mut(&mut self, id: DeclId) -> Option<&mut EnumInfo> {
        match &mut self.get_mut(id).info {
            DeclInfo::Enum(info) => Some(info),
            _ => None,
        }
    }

    #[must_use]
    pub fn distinct_info(&self, id: DeclId) -> Option<&DistinctInfo> {
        match &self.get(id).info {
            DeclInfo::Distinct(info) => Some(info),
            _ => None,
        }
    }

    pub fn distinct_info_mut(&mut self, id: DeclId) -> Option<&mut DistinctInfo> {
        match &mut self.get_mut(id).info {
            DeclInfo::Distinct(info) => Some(info),
            _ => None,
        }
    }

    #[must_use]
    pub fn function_info(&self, id: DeclId) -> Option<&FunctionInfo> {
        match &self.get(id).info {
            DeclInfo::Function(info) => Some(info),
            _ => None,
        }
    }

    pub fn function_info_mut(&mut self, id: DeclId) -> Option<&mut FunctionInfo> {
        match &mut self.get_mut(id).info {
            DeclInfo::Function(info) => Some(info),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_is_idempotent_per_library_and_name() {
        let mut store = DeclStore::new();
        let a = store.declare(DeclKind::Class, "a.ql", "Handler", NodeId(1));
        let again = store.declare(DeclKind::Class, "a.ql", "Handler", NodeId(1));
        let other = store.declare(DeclKind::Class, "b.ql", "Handler", NodeId(2));
        assert_eq!(a, again);
        assert_ne!(a, other);
        assert_eq!(store.get(other).library, "b.ql");
    }

    #[test]
    fn scopes_are_fresh() {
        let mut store = DeclStore::new();
        assert_ne!(store.fresh_scope(), store.fresh_scope());
    }

    #[test]
    fn accessor_slot_names_use_get_set_prefix() {
        let sig = MemberSig {
            name: "size".into(),
            visibility: Visibility::Public,
            flags: MemberFlags::default(),
            node: NodeId(0),
            kind: MemberSigKind::Getter { ty: TypeId::I32 },
        };
        assert_eq!(sig.slot_name(), "get_size");
    }
}
