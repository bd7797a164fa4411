//! The type interner.
//!
//! All types are interned by structural identity: constructing a type
//! from equal components returns the same [`TypeId`]. The interner is
//! append-only; nodes are immutable once inserted. Interior mutability
//! lets the checker thread a shared reference everywhere (the pipeline
//! is single-threaded by design).

use crate::decl::DeclId;
use crate::kind::{FunctionShape, LiteralValue, TypeId, TypeKind, TypeParamRef, TypeRef};
use rustc_hash::FxHashMap;
use std::cell::RefCell;

pub struct TypeInterner {
    types: RefCell<Vec<TypeKind>>,
    map: RefCell<FxHashMap<TypeKind, TypeId>>,
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeInterner {
    #[must_use]
    pub fn new() -> Self {
        let mut types = Vec::with_capacity(64);
        let mut map = FxHashMap::default();
        for id in 0..TypeId::FIRST_FREE {
            let kind = TypeKind::preinterned(id).expect("preinterned table covers FIRST_FREE");
            map.insert(kind.clone(), TypeId(id));
            types.push(kind);
        }
        Self {
            types: RefCell::new(types),
            map: RefCell::new(map),
        }
    }

    /// Intern a kind, returning the canonical id.
    ///
    /// `Union` kinds must come through [`TypeInterner::union_of`] so the
    /// member list is normalised; everything else may be interned raw.
    pub fn intern(&self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.map.borrow().get(&kind) {
            return id;
        }
        let mut types = self.types.borrow_mut();
        let id = TypeId(u32::try_from(types.len()).unwrap_or(u32::MAX));
        types.push(kind.clone());
        self.map.borrow_mut().insert(kind, id);
        id
    }

    /// The kind behind an id. Clones: kinds are small and this keeps
    /// borrows out of caller signatures.
    #[must_use]
    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.types.borrow()[id.0 as usize].clone()
    }

    /// Number of interned types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    // =========================================================================
    // Constructor helpers
    // =========================================================================

    pub fn literal_int(&self, value: i64) -> TypeId {
        self.intern(TypeKind::Literal(LiteralValue::Int(value)))
    }

    pub fn literal_bool(&self, value: bool) -> TypeId {
        self.intern(TypeKind::Literal(LiteralValue::Bool(value)))
    }

    pub fn literal_str(&self, value: &str) -> TypeId {
        self.intern(TypeKind::Literal(LiteralValue::Str(value.to_string())))
    }

    pub fn fixed_array(&self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::FixedArray(elem))
    }

    pub fn array(&self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Array(elem))
    }

    pub fn tuple(&self, elems: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Tuple(elems))
    }

    /// Record types canonicalize by sorting fields by name.
    pub fn record(&self, mut fields: Vec<(String, TypeId)>) -> TypeId {
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        self.intern(TypeKind::Record(fields))
    }

    pub fn function(&self, shape: FunctionShape) -> TypeId {
        self.intern(TypeKind::Function(shape))
    }

    pub fn class(&self, decl: DeclId, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Class(TypeRef { decl, args }))
    }

    pub fn interface(&self, decl: DeclId, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Interface(TypeRef { decl, args }))
    }

    pub fn mixin(&self, decl: DeclId, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Mixin(TypeRef { decl, args }))
    }

    pub fn enum_type(&self, decl: DeclId) -> TypeId {
        self.intern(TypeKind::Enum(decl))
    }

    pub fn type_param(&self, scope: u32, name: &str) -> TypeId {
        self.intern(TypeKind::TypeParam(TypeParamRef {
            scope,
            name: name.to_string(),
        }))
    }

    pub fn this_type(&self, class: DeclId) -> TypeId {
        self.intern(TypeKind::This(class))
    }

    pub fn distinct(&self, inner: TypeId, decl: DeclId) -> TypeId {
        self.intern(TypeKind::Distinct { inner, decl })
    }

    // =========================================================================
    // Union normalisation
    // =========================================================================

    /// Build the canonical union of `members`:
    /// nested unions are flattened, `Never` is absorbed, duplicates are
    /// removed, members are sorted, and a singleton collapses to its
    /// member. The empty union is `Never`.
    pub fn union_of(&self, members: impl IntoIterator<Item = TypeId>) -> TypeId {
        let mut flat: Vec<TypeId> = Vec::new();
        for member in members {
            match self.kind(member) {
                TypeKind::Union(inner) => flat.extend(inner),
                TypeKind::Never => {}
                _ => flat.push(member),
            }
        }
        flat.sort_unstable();
        flat.dedup();
        match flat.len() {
            0 => TypeId::NEVER,
            1 => flat[0],
            _ => self.intern(TypeKind::Union(flat)),
        }
    }

    /// Remove `subtrahend` members from a union (exact member identity).
    /// Used by match-exhaustiveness subtraction.
    pub fn union_subtract(&self, from: TypeId, subtrahend: TypeId) -> TypeId {
        let removed: Vec<TypeId> = match self.kind(subtrahend) {
            TypeKind::Union(members) => members,
            _ => vec![subtrahend],
        };
        match self.kind(from) {
            TypeKind::Union(members) => self.union_of(
                members
                    .into_iter()
                    .filter(|m| !removed.contains(m))
                    .collect::<Vec<_>>(),
            ),
            _ if removed.contains(&from) => TypeId::NEVER,
            _ => from,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether a union (or single type) contains `Null`.
    #[must_use]
    pub fn contains_null(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::Null => true,
            TypeKind::Union(members) => members.contains(&TypeId::NULL),
            _ => false,
        }
    }

    /// The union with `Null` removed.
    #[must_use]
    pub fn without_null(&self, id: TypeId) -> TypeId {
        self.union_subtract(id, TypeId::NULL)
    }

    /// Literal types widen to their base primitive; everything else is
    /// already wide.
    #[must_use]
    pub fn widened(&self, id: TypeId) -> TypeId {
        match self.kind(id) {
            TypeKind::Literal(value) => value.base_type(),
            TypeKind::Union(members) => {
                self.union_of(members.into_iter().map(|m| self.widened(m)).collect::<Vec<_>>())
            }
            _ => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_identity() {
        let interner = TypeInterner::new();
        let a = interner.tuple(vec![TypeId::I32, TypeId::STRING]);
        let b = interner.tuple(vec![TypeId::I32, TypeId::STRING]);
        assert_eq!(a, b);
        let c = interner.tuple(vec![TypeId::STRING, TypeId::I32]);
        assert_ne!(a, c);
    }

    #[test]
    fn union_order_is_irrelevant() {
        let interner = TypeInterner::new();
        let ab = interner.union_of([TypeId::I32, TypeId::STRING]);
        let ba = interner.union_of([TypeId::STRING, TypeId::I32]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn union_normalisation() {
        let interner = TypeInterner::new();
        // Never is absorbed.
        assert_eq!(
            interner.union_of([TypeId::I32, TypeId::NEVER]),
            TypeId::I32
        );
        // Duplicates collapse.
        assert_eq!(interner.union_of([TypeId::I32, TypeId::I32]), TypeId::I32);
        // Empty union is Never.
        assert_eq!(interner.union_of([]), TypeId::NEVER);
        // Nested unions flatten.
        let ab = interner.union_of([TypeId::I32, TypeId::STRING]);
        let abc = interner.union_of([ab, TypeId::BOOLEAN]);
        match interner.kind(abc) {
            TypeKind::Union(members) => assert_eq!(members.len(), 3),
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn null_bearing_unions_are_preserved() {
        let interner = TypeInterner::new();
        let nullable = interner.union_of([TypeId::STRING, TypeId::NULL]);
        assert!(interner.contains_null(nullable));
        assert_eq!(interner.without_null(nullable), TypeId::STRING);
    }

    #[test]
    fn record_fields_sort_by_name() {
        let interner = TypeInterner::new();
        let xy = interner.record(vec![
            ("x".to_string(), TypeId::I32),
            ("y".to_string(), TypeId::I32),
        ]);
        let yx = interner.record(vec![
            ("y".to_string(), TypeId::I32),
            ("x".to_string(), TypeId::I32),
        ]);
        assert_eq!(xy, yx);
    }

    #[test]
    fn widening_maps_literals_to_bases() {
        let interner = TypeInterner::new();
        assert_eq!(interner.widened(interner.literal_int(5)), TypeId::I32);
        assert_eq!(interner.widened(interner.literal_bool(true)), TypeId::BOOLEAN);
        assert_eq!(interner.widened(interner.literal_str("x")), TypeId::STRING);
        let lits = interner.union_of([interner.literal_int(1), interner.literal_int(2)]);
        assert_eq!(interner.widened(lits), TypeId::I32);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let interner = TypeInterner::new();
        let u = interner.union_of([TypeId::I32, TypeId::STRING]);
        let again = interner.union_of([u]);
        assert_eq!(u, again);
    }

    #[test]
    fn union_subtract_removes_members() {
        let interner = TypeInterner::new();
        let one = interner.literal_int(1);
        let two = interner.literal_int(2);
        let three = interner.literal_int(3);
        let u = interner.union_of([one, two, three]);
        let rest = interner.union_subtract(u, two);
        assert_eq!(rest, interner.union_of([one, three]));
        assert_eq!(interner.union_subtract(one, one), TypeId::NEVER);
    }
}
