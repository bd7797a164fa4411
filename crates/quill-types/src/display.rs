//! Human-readable type formatting for diagnostics.

use crate::decl::DeclStore;
use crate::intern::TypeInterner;
use crate::kind::{TypeId, TypeKind};

/// Format a type the way it reads in source.
#[must_use]
pub fn format_type(interner: &TypeInterner, decls: &DeclStore, ty: TypeId) -> String {
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
        TypeKind::Literal(value) => value.to_string(),
        TypeKind::FixedArray(elem) => format!("#[{}]", format_type(interner, decls, elem)),
        TypeKind::Array(elem) => format!("Array<{}>", format_type(interner, decls, elem)),
        TypeKind::Tuple(elems) => format!(
            "({})",
            elems
                .iter()
                .map(|&e| format_type(interner, decls, e))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        TypeKind::Record(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(name, field)| format!("{name}: {}", format_type(interner, decls, *field)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        TypeKind::Union(members) => members
            .iter()
            .map(|&m| format_type(interner, decls, m))
            .collect::<Vec<_>>()
            .join(" | "),
        TypeKind::Function(shape) => format!(
            "({}) => {}",
            shape
                .params
                .iter()
                .map(|&p| format_type(interner, decls, p))
                .collect::<Vec<_>>()
                .join(", "),
            format_type(interner, decls, shape.return_type)
        ),
        TypeKind::Class(r) | TypeKind::Interface(r) | TypeKind::Mixin(r) => {
            let name = &decls.get(r.decl).name;
            if r.args.is_empty() {
                name.clone()
            } else {
                format!(
                    "{name}<{}>",
                    r.args
                        .iter()
                        .map(|&a| format_type(interner, decls, a))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        }
        TypeKind::Enum(decl) => decls.get(decl).name.clone(),
        TypeKind::TypeParam(p) => p.name,
        TypeKind::This(_) => "This".into(),
        TypeKind::Distinct { decl, .. } => decls.get(decl).name.clone(),
        TypeKind::Symbol(decl) => format!("symbol {}", decls.get(decl).name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_read_like_source() {
        let interner = TypeInterner::new();
        let decls = DeclStore::new();
        let nullable = interner.union_of([TypeId::STRING, TypeId::NULL]);
        assert_eq!(format_type(&interner, &decls, nullable), "string | null");
        let lit = interner.literal_int(2);
        assert_eq!(format_type(&interner, &decls, lit), "2");
        let arr = interner.fixed_array(TypeId::I32);
        assert_eq!(format_type(&interner, &decls, arr), "#[i32]");
    }
}
