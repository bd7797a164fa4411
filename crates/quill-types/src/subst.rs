//! Type-parameter substitution.
//!
//! Substitution is pure: it walks a type, replaces every `TypeParam` the
//! mapping covers, and re-interns along the way, so the result is always
//! canonical. Scope ids keep same-named parameters from different
//! declarations apart; the mapping never needs masking.

use crate::intern::TypeInterner;
use crate::kind::{FunctionShape, TypeId, TypeKind, TypeParamRef, TypeRef};
use rustc_hash::FxHashMap;

/// A mapping from type parameters to concrete types.
#[derive(Clone, Debug, Default)]
pub struct TypeSubstitution {
    map: FxHashMap<TypeParamRef, TypeId>,
}

impl TypeSubstitution {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a substitution for a declaration's parameter list at the
    /// given arguments. Lengths must already agree.
    #[must_use]
    pub fn for_params(scope: u32, names: &[String], args: &[TypeId]) -> Self {
        let mut subst = Self::new();
        for (name, &arg) in names.iter().zip(args) {
            subst.insert(
                TypeParamRef {
                    scope,
                    name: name.clone(),
                },
                arg,
            );
        }
        subst
    }

    pub fn insert(&mut self, param: TypeParamRef, ty: TypeId) {
        self.map.insert(param, ty);
    }

    #[must_use]
    pub fn get(&self, param: &TypeParamRef) -> Option<TypeId> {
        self.map.get(param).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Compose: apply `other` to every target of `self`.
    #[must_use]
    pub fn then(&self, interner: &TypeInterner, other: &TypeSubstitution) -> TypeSubstitution {
        let mut out = TypeSubstitution::new();
        for (param, &ty) in &self.map {
            out.insert(param.clone(), instantiate_type(interner, ty, other));
        }
        for (param, &ty) in &other.map {
            if !out.map.contains_key(param) {
                out.insert(param.clone(), ty);
            }
        }
        out
    }
}

/// Replace every covered `TypeParam` in `ty`, recursing through all
/// constructors. Returns a freshly-canonicalized node; `ty` itself is
/// never mutated.
pub fn instantiate_type(
    interner: &TypeInterner,
    ty: TypeId,
    subst: &TypeSubstitution,
) -> TypeId {
    if subst.is_empty() {
        return ty;
    }
    match interner.kind(ty) {
        TypeKind::TypeParam(param) => subst.get(&param).unwrap_or(ty),
        TypeKind::FixedArray(elem) => {
            interner.fixed_array(instantiate_type(interner, elem, subst))
        }
        TypeKind::Array(elem) => interner.array(instantiate_type(interner, elem, subst)),
        TypeKind::Tuple(elems) => interner.tuple(
            elems
                .into_iter()
                .map(|e| instantiate_type(interner, e, subst))
                .collect(),
        ),
        TypeKind::Record(fields) => interner.record(
            fields
                .into_iter()
                .map(|(name, field)| (name, instantiate_type(interner, field, subst)))
                .collect(),
        ),
        TypeKind::Union(members) => interner.union_of(
            members
                .into_iter()
                .map(|m| instantiate_type(interner, m, subst))
                .collect::<Vec<_>>(),
        ),
        TypeKind::Function(shape) => interner.function(FunctionShape {
            type_params: shape.type_params,
            params: shape
                .params
                .into_iter()
                .map(|p| instantiate_type(interner, p, subst))
                .collect(),
            return_type: instantiate_type(interner, shape.return_type, subst),
        }),
        TypeKind::Class(r) => interner.class(r.decl, subst_args(interner, r, subst)),
        TypeKind::Interface(r) => interner.interface(r.decl, subst_args(interner, r, subst)),
        TypeKind::Mixin(r) => interner.mixin(r.decl, subst_args(interner, r, subst)),
        TypeKind::Distinct { inner, decl } => {
            interner.distinct(instantiate_type(interner, inner, subst), decl)
        }
        // Primitives, literals, enums, This, Symbol: nothing to replace.
        _ => ty,
    }
}

fn subst_args(interner: &TypeInterner, r: TypeRef, subst: &TypeSubstitution) -> Vec<TypeId> {
    r.args
        .into_iter()
        .map(|a| instantiate_type(interner, a, subst))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_through_containers() {
        let interner = TypeInterner::new();
        let t = interner.type_param(1, "T");
        let tuple = interner.tuple(vec![t, TypeId::STRING]);
        let subst = TypeSubstitution::for_params(1, &["T".to_string()], &[TypeId::I32]);
        let result = instantiate_type(&interner, tuple, &subst);
        assert_eq!(result, interner.tuple(vec![TypeId::I32, TypeId::STRING]));
        // Purity: the original node is untouched.
        assert_eq!(interner.kind(tuple), TypeKind::Tuple(vec![t, TypeId::STRING]));
    }

    #[test]
    fn unknown_params_are_kept() {
        let interner = TypeInterner::new();
        let t = interner.type_param(1, "T");
        let u = interner.type_param(2, "U");
        let subst = TypeSubstitution::for_params(1, &["T".to_string()], &[TypeId::I32]);
        assert_eq!(instantiate_type(&interner, u, &subst), u);
        assert_eq!(instantiate_type(&interner, t, &subst), TypeId::I32);
    }

    #[test]
    fn union_substitution_recanonicalizes() {
        let interner = TypeInterner::new();
        let t = interner.type_param(1, "T");
        let u = interner.union_of([t, TypeId::I32]);
        let subst = TypeSubstitution::for_params(1, &["T".to_string()], &[TypeId::I32]);
        // T|i32 with T := i32 collapses to i32.
        assert_eq!(instantiate_type(&interner, u, &subst), TypeId::I32);
    }
}
