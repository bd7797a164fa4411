//! Assignability (`S <: T`).
//!
//! The rules run in a fixed order; the first that applies decides. The
//! implements relation uses interface declaration identity, never the
//! interface's name, so two libraries exporting a `Handler` interface
//! stay distinct.

use crate::decl::{DeclStore, MemberSigKind};
use crate::intern::TypeInterner;
use crate::kind::{TypeId, TypeKind, TypeRef};
use crate::subst::{TypeSubstitution, instantiate_type};

const MAX_RELATE_DEPTH: u32 = 64;

/// Whether `t` is a reference type (representable as a GC reference).
#[must_use]
pub fn is_reference(interner: &TypeInterner, decls: &DeclStore, t: TypeId) -> bool {
    match interner.kind(t) {
        TypeKind::String
        | TypeKind::AnyRef
        | TypeKind::Null
        | TypeKind::FixedArray(_)
        | TypeKind::Array(_)
        | TypeKind::Tuple(_)
        | TypeKind::Record(_)
        | TypeKind::Function(_)
        | TypeKind::Class(_)
        | TypeKind::Interface(_)
        | TypeKind::Mixin(_)
        | TypeKind::Symbol(_)
        | TypeKind::This(_) => true,
        TypeKind::Literal(value) => value.base_type() == TypeId::STRING,
        TypeKind::Union(members) => members
            .iter()
            .all(|&m| is_reference(interner, decls, m)),
        TypeKind::Distinct { inner, .. } => is_reference(interner, decls, inner),
        _ => false,
    }
}

/// Whether `t` is an unboxed scalar value type.
#[must_use]
pub fn is_primitive_value(interner: &TypeInterner, decls: &DeclStore, t: TypeId) -> bool {
    match interner.kind(t) {
        TypeKind::I32
        | TypeKind::U32
        | TypeKind::I64
        | TypeKind::F32
        | TypeKind::F64
        | TypeKind::Boolean
        | TypeKind::Enum(_) => true,
        TypeKind::Literal(value) => value.base_type() != TypeId::STRING,
        TypeKind::Distinct { inner, .. } => is_primitive_value(interner, decls, inner),
        _ => false,
    }
}

/// The superclass of a class specialization, with the subclass's
/// arguments substituted in. `None` at the root.
#[must_use]
pub fn superclass_of(
    interner: &TypeInterner,
    decls: &DeclStore,
    class: &TypeRef,
) -> Option<TypeId> {
    let info = decls.class_info(class.decl)?;
    let extends = info.extends?;
    let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
    let subst = TypeSubstitution::for_params(info.scope, &names, &class.args);
    Some(instantiate_type(interner, extends, &subst))
}

/// Every interface a class specialization implements, transitively:
/// its own `implements`, those of its mixins, those of its superclasses,
/// and the extends-closure of each interface — all substituted.
#[must_use]
pub fn implemented_interfaces(
    interner: &TypeInterner,
    decls: &DeclStore,
    class: &TypeRef,
) -> Vec<TypeId> {
    let mut out = Vec::new();
    let mut current = Some(interner.class(class.decl, class.args.clone()));
    let mut depth = 0u32;
    while let Some(ty) = current {
        depth += 1;
        if depth > MAX_RELATE_DEPTH {
            break;
        }
        let TypeKind::Class(r) = interner.kind(ty) else {
            break;
        };
        let Some(info) = decls.class_info(r.decl) else {
            break;
        };
        let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(info.scope, &names, &r.args);
        for &iface in &info.implements {
            push_interface_closure(
                interner,
                decls,
                instantiate_type(interner, iface, &subst),
                &mut out,
            );
        }
        for &mixin in &info.mixins {
            if let TypeKind::Mixin(m) = interner.kind(instantiate_type(interner, mixin, &subst)) {
                if let Some(mixin_info) = decls.class_info(m.decl) {
                    let mnames: Vec<String> =
                        mixin_info.type_params.iter().map(|p| p.name.clone()).collect();
                    let msubst = TypeSubstitution::for_params(mixin_info.scope, &mnames, &m.args);
                    for &iface in &mixin_info.implements {
                        push_interface_closure(
                            interner,
                            decls,
                            instantiate_type(interner, iface, &msubst),
                            &mut out,
                        );
                    }
                }
            }
        }
        current = superclass_of(interner, decls, &r);
    }
    out
}

fn push_interface_closure(
    interner: &TypeInterner,
    decls: &DeclStore,
    iface: TypeId,
    out: &mut Vec<TypeId>,
) {
    if out.contains(&iface) {
        return;
    }
    out.push(iface);
    if let TypeKind::Interface(r) = interner.kind(iface) {
        if let Some(info) = decls.interface_info(r.decl) {
            let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
            let subst = TypeSubstitution::for_params(info.scope, &names, &r.args);
            for &parent in &info.extends {
                push_interface_closure(
                    interner,
                    decls,
                    instantiate_type(interner, parent, &subst),
                    out,
                );
            }
        }
    }
}

/// `This(c)` compared as the class at its own parameters.
fn this_as_class(interner: &TypeInterner, decls: &DeclStore, decl: crate::decl::DeclId) -> TypeId {
    let args = decls
        .class_info(decl)
        .map(|info| {
            info.type_params
                .iter()
                .map(|p| interner.type_param(info.scope, &p.name))
                .collect()
        })
        .unwrap_or_default();
    interner.class(decl, args)
}

/// The subtype test.
#[must_use]
pub fn assignable(interner: &TypeInterner, decls: &DeclStore, source: TypeId, target: TypeId) -> bool {
    assignable_depth(interner, decls, source, target, 0)
}

fn assignable_depth(
    interner: &TypeInterner,
    decls: &DeclStore,
    source: TypeId,
    target: TypeId,
    depth: u32,
) -> bool {
    if source == target {
        return true;
    }
    if depth > MAX_RELATE_DEPTH {
        return false;
    }
    let depth = depth + 1;

    // The error placeholder relates to everything; one failed construct
    // must not cascade.
    if source == TypeId::ERROR || target == TypeId::ERROR {
        return true;
    }

    let source_kind = interner.kind(source);
    let target_kind = interner.kind(target);

    // Resolve This before any other comparison.
    if let TypeKind::This(decl) = source_kind {
        return assignable_depth(
            interner,
            decls,
            this_as_class(interner, decls, decl),
            target,
            depth,
        );
    }
    if let TypeKind::This(decl) = target_kind {
        return assignable_depth(
            interner,
            decls,
            source,
            this_as_class(interner, decls, decl),
            depth,
        );
    }

    // Never is a subtype of everything.
    if source == TypeId::NEVER {
        return true;
    }

    // Union on the left: every member must fit the target.
    if let TypeKind::Union(members) = &source_kind {
        return members
            .iter()
            .all(|&m| assignable_depth(interner, decls, m, target, depth));
    }

    // AnyRef accepts every reference type.
    if target == TypeId::ANYREF {
        return is_reference(interner, decls, source);
    }

    // Null fits reference types and null-bearing unions.
    if source == TypeId::NULL {
        if interner.contains_null(target) {
            return true;
        }
        return is_reference(interner, decls, target);
    }

    // Union on the right: some member must accept the source.
    if let TypeKind::Union(members) = &target_kind {
        return members
            .iter()
            .any(|&m| assignable_depth(interner, decls, source, m, depth));
    }

    // Literal widening to the base primitive.
    if let TypeKind::Literal(value) = &source_kind {
        if value.base_type() == target {
            return true;
        }
    }

    match (&source_kind, &target_kind) {
        // Distinct types are invariant: identity only (handled by the
        // fast path); different decls never relate, nor does a distinct
        // type relate to its underlying type implicitly.
        (TypeKind::Distinct { .. }, _) | (_, TypeKind::Distinct { .. }) => false,

        // Element-invariant containers.
        (TypeKind::FixedArray(a), TypeKind::FixedArray(b))
        | (TypeKind::Array(a), TypeKind::Array(b)) => a == b,

        // Tuples and records are field-invariant: their wasm struct
        // identity is their type identity.
        (TypeKind::Tuple(a), TypeKind::Tuple(b)) => a == b,
        (TypeKind::Record(a), TypeKind::Record(b)) => a == b,

        // Function types: contravariant parameters, covariant return.
        // A source with fewer parameters adapts (extras are ignored by
        // the call).
        (TypeKind::Function(s), TypeKind::Function(t)) => {
            if s.params.len() > t.params.len() {
                return false;
            }
            for (sp, tp) in s.params.iter().zip(&t.params) {
                if !assignable_depth(interner, decls, *tp, *sp, depth) {
                    return false;
                }
            }
            t.return_type == TypeId::VOID
                || assignable_depth(interner, decls, s.return_type, t.return_type, depth)
        }

        // Class to class: identical declaration with invariantly-equal
        // arguments, or a transitive extends edge.
        (TypeKind::Class(s), TypeKind::Class(t)) => {
            if s.decl == t.decl {
                return s.args == t.args;
            }
            let mut current = superclass_of(interner, decls, s);
            let mut hops = 0u32;
            while let Some(super_ty) = current {
                hops += 1;
                if hops > MAX_RELATE_DEPTH {
                    return false;
                }
                if let TypeKind::Class(sup) = interner.kind(super_ty) {
                    if sup.decl == t.decl {
                        return sup.args == t.args;
                    }
                    current = superclass_of(interner, decls, &sup);
                } else {
                    return false;
                }
            }
            false
        }

        // Class (or mixin) to interface: declaration-identity implements
        // relation with invariant arguments.
        (TypeKind::Class(s), TypeKind::Interface(_)) => {
            implemented_interfaces(interner, decls, s).contains(&target)
        }

        // Interface to interface: identity or the extends closure.
        (TypeKind::Interface(s), TypeKind::Interface(t)) => {
            if s.decl == t.decl {
                return s.args == t.args;
            }
            let mut closure = Vec::new();
            push_interface_closure(interner, decls, source, &mut closure);
            closure.contains(&target)
        }

        // Type parameters relate through their constraint.
        (TypeKind::TypeParam(p), _) => {
            let constraint = decls_param_constraint(decls, p);
            match constraint {
                Some(c) => assignable_depth(interner, decls, c, target, depth),
                None => false,
            }
        }

        _ => false,
    }
}

/// Find the declared constraint of a type parameter by scanning the
/// declaration that owns its scope.
fn decls_param_constraint(decls: &DeclStore, param: &crate::kind::TypeParamRef) -> Option<TypeId> {
    for (_, data) in decls.iter() {
        let (scope, params) = match &data.info {
            crate::decl::DeclInfo::Class(info) | crate::decl::DeclInfo::Mixin(info) => {
                (info.scope, &info.type_params)
            }
            crate::decl::DeclInfo::Interface(info) => (info.scope, &info.type_params),
            crate::decl::DeclInfo::Function(info) => (info.scope, &info.type_params),
            _ => continue,
        };
        if scope == param.scope {
            return params
                .iter()
                .find(|p| p.name == param.name)
                .and_then(|p| p.constraint);
        }
        // Method scopes live inside class members.
        if let crate::decl::DeclInfo::Class(info) | crate::decl::DeclInfo::Mixin(info) = &data.info
        {
            for member in &info.members {
                if let MemberSigKind::Method {
                    scope: method_scope,
                    type_params,
                    ..
                } = &member.kind
                {
                    if *method_scope == param.scope {
                        return type_params
                            .iter()
                            .find(|p| p.name == param.name)
                            .and_then(|p| p.constraint);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{ClassInfo, DeclKind, TypeParamInfo};
    use quill_ast::NodeId;

    fn class_decl(decls: &mut DeclStore, library: &str, name: &str) -> crate::decl::DeclId {
        decls.declare(DeclKind::Class, library, name, NodeId(0))
    }

    #[test]
    fn reflexivity_holds_for_everything() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        for id in [TypeId::I32, TypeId::STRING, TypeId::NEVER, TypeId::NULL] {
            assert!(assignable(&interner, &decls, id, id));
        }
        let tuple = interner.tuple(vec![TypeId::I32, TypeId::F64]);
        assert!(assignable(&interner, &decls, tuple, tuple));
    }

    #[test]
    fn never_fits_everything() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        assert!(assignable(&interner, &decls, TypeId::NEVER, TypeId::I32));
        assert!(assignable(&interner, &decls, TypeId::NEVER, TypeId::STRING));
    }

    #[test]
    fn null_fits_references_not_scalars() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        assert!(assignable(&interner, &decls, TypeId::NULL, TypeId::STRING));
        assert!(!assignable(&interner, &decls, TypeId::NULL, TypeId::I32));
        let nullable_i32 = interner.union_of([TypeId::I32, TypeId::NULL]);
        assert!(assignable(&interner, &decls, TypeId::NULL, nullable_i32));
    }

    #[test]
    fn literals_widen_to_their_base() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        let one = interner.literal_int(1);
        assert!(assignable(&interner, &decls, one, TypeId::I32));
        assert!(!assignable(&interner, &decls, one, TypeId::STRING));
        assert!(!assignable(&interner, &decls, TypeId::I32, one));
    }

    #[test]
    fn union_rules() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        let one = interner.literal_int(1);
        let two = interner.literal_int(2);
        let u = interner.union_of([one, two]);
        // Union-left: every member must fit.
        assert!(assignable(&interner, &decls, u, TypeId::I32));
        // Union-right: some member must accept.
        assert!(assignable(&interner, &decls, one, u));
        assert!(!assignable(&interner, &decls, interner.literal_int(3), u));
    }

    #[test]
    fn anyref_accepts_references_only() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        assert!(assignable(&interner, &decls, TypeId::STRING, TypeId::ANYREF));
        assert!(!assignable(&interner, &decls, TypeId::I32, TypeId::ANYREF));
    }

    #[test]
    fn function_variance_and_arity_adaptation() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        let takes_two = interner.function(crate::kind::FunctionShape {
            type_params: vec![],
            params: vec![TypeId::I32, TypeId::STRING],
            return_type: TypeId::I32,
        });
        let takes_one = interner.function(crate::kind::FunctionShape {
            type_params: vec![],
            params: vec![TypeId::I32],
            return_type: TypeId::I32,
        });
        // Fewer parameters adapt to a wider signature...
        assert!(assignable(&interner, &decls, takes_one, takes_two));
        // ...but not the other way around.
        assert!(!assignable(&interner, &decls, takes_two, takes_one));

        // Void-returning targets accept any return.
        let to_void = interner.function(crate::kind::FunctionShape {
            type_params: vec![],
            params: vec![TypeId::I32],
            return_type: TypeId::VOID,
        });
        assert!(assignable(&interner, &decls, takes_one, to_void));
    }

    #[test]
    fn class_extends_chain_with_substitution() {
        let interner = TypeInterner::new();
        let mut decls = DeclStore::new();
        // class Base<T>
        let base = class_decl(&mut decls, "lib.ql", "Base");
        let base_scope = decls.fresh_scope();
        *decls.class_info_mut(base).unwrap() = ClassInfo {
            type_params: vec![TypeParamInfo {
                name: "T".into(),
                constraint: None,
                default: None,
            }],
            scope: base_scope,
            ..ClassInfo::default()
        };
        // class Derived extends Base<i32>
        let derived = class_decl(&mut decls, "lib.ql", "Derived");
        let extends = interner.class(base, vec![TypeId::I32]);
        *decls.class_info_mut(derived).unwrap() = ClassInfo {
            extends: Some(extends),
            ..ClassInfo::default()
        };

        let derived_ty = interner.class(derived, vec![]);
        let base_i32 = interner.class(base, vec![TypeId::I32]);
        let base_str = interner.class(base, vec![TypeId::STRING]);
        assert!(assignable(&interner, &decls, derived_ty, base_i32));
        // Invariant arguments.
        assert!(!assignable(&interner, &decls, derived_ty, base_str));
        assert!(!assignable(&interner, &decls, base_i32, derived_ty));
    }

    #[test]
    fn interface_identity_not_name() {
        let interner = TypeInterner::new();
        let mut decls = DeclStore::new();
        let iface_a = decls.declare(DeclKind::Interface, "a.ql", "Handler", NodeId(1));
        let iface_b = decls.declare(DeclKind::Interface, "b.ql", "Handler", NodeId(2));
        let class = class_decl(&mut decls, "main.ql", "Impl");
        let iface_a_ty = interner.interface(iface_a, vec![]);
        let iface_b_ty = interner.interface(iface_b, vec![]);
        decls.class_info_mut(class).unwrap().implements = vec![iface_a_ty];

        let class_ty = interner.class(class, vec![]);
        assert!(assignable(&interner, &decls, class_ty, iface_a_ty));
        // Same name, different declaration: not assignable.
        assert!(!assignable(&interner, &decls, class_ty, iface_b_ty));
    }

    #[test]
    fn distinct_types_are_invariant() {
        let interner = TypeInterner::new();
        let mut decls = DeclStore::new();
        let meters = decls.declare(DeclKind::Distinct, "units.ql", "Meters", NodeId(1));
        let feet = decls.declare(DeclKind::Distinct, "units.ql", "Feet", NodeId(2));
        let meters_ty = interner.distinct(TypeId::I32, meters);
        let feet_ty = interner.distinct(TypeId::I32, feet);
        assert!(assignable(&interner, &decls, meters_ty, meters_ty));
        assert!(!assignable(&interner, &decls, meters_ty, feet_ty));
        assert!(!assignable(&interner, &decls, meters_ty, TypeId::I32));
        assert!(!assignable(&interner, &decls, TypeId::I32, meters_ty));
    }

    #[test]
    fn error_type_relates_both_ways() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        assert!(assignable(&interner, &decls, TypeId::ERROR, TypeId::I32));
        assert!(assignable(&interner, &decls, TypeId::STRING, TypeId::ERROR));
    }
}
