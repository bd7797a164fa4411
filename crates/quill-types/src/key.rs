//! Specialization keys.
//!
//! A key is a stable textual identity of a type at concrete arguments.
//! Nominal constructors contribute the owning library's canonical path
//! plus the declaration name, so same-named declarations from different
//! libraries never collide; structural constructors encode their
//! components, with unions and record fields sorted.
//!
//! The key drives both the specialized-class cache and the codegen
//! monomorphization cache: one key, one layout.

use crate::decl::DeclStore;
use crate::intern::TypeInterner;
use crate::kind::{LiteralValue, TypeId, TypeKind};

/// Compute the specialization key of a type.
#[must_use]
pub fn type_key(interner: &TypeInterner, decls: &DeclStore, ty: TypeId) -> String {
    match interner.kind(ty) {
        TypeKind::I32 => "i32".into(),
        TypeKind::U32 => "u32".into(),
        TypeKind::I64 => "i64".into(),
        TypeKind::F32 => "f32".into(),
        TypeKind::F64 => "f64".into(),
        TypeKind::Boolean => "boolean".into(),
        TypeKind::String => "string".into(),
        TypeKind::Void => "void".into(),
        TypeKind::Never => "never".into(),
        TypeKind::AnyRef => "anyref".into(),
        TypeKind::Null => "null".into(),
        TypeKind::Error => "<error>".into(),
        TypeKind::Literal(value) => match value {
            LiteralValue::Int(v) => format!("lit:int:{v}"),
            LiteralValue::Bool(v) => format!("lit:bool:{v}"),
            LiteralValue::Str(v) => format!("lit:str:{v}"),
        },
        TypeKind::FixedArray(elem) => {
            format!("fixedarray<{}>", type_key(interner, decls, elem))
        }
        TypeKind::Array(elem) => format!("array<{}>", type_key(interner, decls, elem)),
        TypeKind::Tuple(elems) => format!(
            "tuple<{}>",
            elems
                .iter()
                .map(|&e| type_key(interner, decls, e))
                .collect::<Vec<_>>()
                .join(",")
        ),
        TypeKind::Record(fields) => {
            // Fields are name-sorted by the interner already; the key
            // preserves that order.
            format!(
                "record{{{}}}",
                fields
                    .iter()
                    .map(|(name, field)| format!("{name}:{}", type_key(interner, decls, *field)))
                    .collect::<Vec<_>>()
                    .join(",")
            )
        }
        TypeKind::Union(members) => {
            let mut keys: Vec<String> = members
                .iter()
                .map(|&m| type_key(interner, decls, m))
                .collect();
            keys.sort();
            format!("union({})", keys.join("|"))
        }
        TypeKind::Function(shape) => format!(
            "fn({})->{}",
            shape
                .params
                .iter()
                .map(|&p| type_key(interner, decls, p))
                .collect::<Vec<_>>()
                .join(","),
            type_key(interner, decls, shape.return_type)
        ),
        TypeKind::Class(r) | TypeKind::Interface(r) | TypeKind::Mixin(r) => {
            let data = decls.get(r.decl);
            if r.args.is_empty() {
                format!("{}::{}", data.library, data.name)
            } else {
                format!(
                    "{}::{}<{}>",
                    data.library,
                    data.name,
                    r.args
                        .iter()
                        .map(|&a| type_key(interner, decls, a))
                        .collect::<Vec<_>>()
                        .join(",")
                )
            }
        }
        TypeKind::Enum(decl) => {
            let data = decls.get(decl);
            format!("enum:{}::{}", data.library, data.name)
        }
        TypeKind::TypeParam(p) => format!("tp:{}:{}", p.scope, p.name),
        TypeKind::This(decl) => {
            let data = decls.get(decl);
            format!("this:{}::{}", data.library, data.name)
        }
        TypeKind::Distinct { decl, .. } => {
            let data = decls.get(decl);
            format!("distinct:{}::{}", data.library, data.name)
        }
        TypeKind::Symbol(decl) => {
            let data = decls.get(decl);
            format!("symbol:{}::{}", data.library, data.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::DeclKind;
    use quill_ast::NodeId;

    #[test]
    fn keys_include_owning_library() {
        let interner = TypeInterner::new();
        let mut decls = DeclStore::new();
        let box_a = decls.declare(DeclKind::Class, "a.ql", "Box", NodeId(1));
        let box_b = decls.declare(DeclKind::Class, "b.ql", "Box", NodeId(2));
        let a = interner.class(box_a, vec![TypeId::I32]);
        let b = interner.class(box_b, vec![TypeId::I32]);
        assert_eq!(type_key(&interner, &decls, a), "a.ql::Box<i32>");
        assert_eq!(type_key(&interner, &decls, b), "b.ql::Box<i32>");
        assert_ne!(
            type_key(&interner, &decls, a),
            type_key(&interner, &decls, b)
        );
    }

    #[test]
    fn union_keys_are_order_independent() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        let ab = interner.union_of([TypeId::I32, TypeId::STRING]);
        let ba = interner.union_of([TypeId::STRING, TypeId::I32]);
        assert_eq!(
            type_key(&interner, &decls, ab),
            type_key(&interner, &decls, ba)
        );
    }

    #[test]
    fn record_keys_are_field_order_independent() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        let xy = interner.record(vec![
            ("x".to_string(), TypeId::I32),
            ("y".to_string(), TypeId::F64),
        ]);
        let yx = interner.record(vec![
            ("y".to_string(), TypeId::F64),
            ("x".to_string(), TypeId::I32),
        ]);
        assert_eq!(
            type_key(&interner, &decls, xy),
            type_key(&interner, &decls, yx)
        );
    }

    #[test]
    fn type_params_key_by_scope_and_name() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        let t1 = interner.type_param(1, "T");
        let t2 = interner.type_param(2, "T");
        assert_ne!(
            type_key(&interner, &decls, t1),
            type_key(&interner, &decls, t2)
        );
    }
}
