//! The module's type section, built as one recursion group.
//!
//! All GC types (class structs, vtables, itables, closures, records,
//! tuples, arrays, strings) plus every function signature live in a
//! single rec group, so mutually-recursive layouts and subtype chains
//! can reference each other freely by index. Indices are reserved
//! first and defined later where recursion demands it.

use rustc_hash::FxHashMap;
use wasm_encoder::{
    CompositeInnerType, CompositeType, FieldType, FuncType, StorageType, StructType, SubType,
    ValType,
};

#[derive(Debug, Default)]
pub struct TypeTable {
    subtypes: Vec<Option<SubType>>,
    by_key: FxHashMap<String, u32>,
}

impl TypeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an index for `key` without defining it yet. Returns the
    /// existing index when the key is already present.
    pub fn reserve(&mut self, key: &str) -> u32 {
        if let Some(&idx) = self.by_key.get(key) {
            return idx;
        }
        let idx = self.subtypes.len() as u32;
        self.subtypes.push(None);
        self.by_key.insert(key.to_string(), idx);
        idx
    }

    /// Define (or redefine identically) the subtype behind an index.
    pub fn define(&mut self, idx: u32, subtype: SubType) {
        self.subtypes[idx as usize] = Some(subtype);
    }

    /// Whether a key has been defined (not merely reserved).
    #[must_use]
    pub fn is_defined(&self, key: &str) -> bool {
        self.by_key
            .get(key)
            .is_some_and(|&idx| self.subtypes[idx as usize].is_some())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<u32> {
        self.by_key.get(key).copied()
    }

    /// Intern a plain function signature.
    pub fn func_type(&mut self, params: Vec<ValType>, results: Vec<ValType>) -> u32 {
        let key = format!("fn({params:?})->({results:?})");
        if let Some(&idx) = self.by_key.get(&key) {
            return idx;
        }
        let idx = self.reserve(&key);
        self.define(idx, final_subtype(CompositeInnerType::Func(FuncType::new(params, results))));
        idx
    }

    /// Intern an immutable struct with the given fields.
    pub fn immutable_struct(&mut self, key: &str, fields: Vec<ValType>) -> u32 {
        if let Some(&idx) = self.by_key.get(key) {
            if self.subtypes[idx as usize].is_some() {
                return idx;
            }
        }
        let idx = self.reserve(key);
        let fields: Vec<FieldType> = fields
            .into_iter()
            .map(|ty| FieldType {
                element_type: StorageType::Val(ty),
                mutable: false,
            })
            .collect();
        self.define(
            idx,
            final_subtype(CompositeInnerType::Struct(StructType {
                fields: fields.into_boxed_slice(),
            })),
        );
        idx
    }

    /// Number of reserved type indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subtypes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subtypes.is_empty()
    }

    /// The finished recursion group. Panics if a reserved type was
    /// never defined — that is a generator bug, and fatal by design.
    #[must_use]
    pub fn into_subtypes(self) -> Vec<SubType> {
        self.subtypes
            .into_iter()
            .enumerate()
            .map(|(idx, subtype)| {
                subtype.unwrap_or_else(|| panic!("type index {idx} reserved but never defined"))
            })
            .collect()
    }
}

/// A final subtype with no declared supertype.
#[must_use]
pub fn final_subtype(inner: CompositeInnerType) -> SubType {
    SubType {
        is_final: true,
        supertype_idx: None,
        composite_type: CompositeType {
            inner,
            shared: false,
            descriptor: None,
            describes: None,
        },
    }
}

/// An open (non-final) subtype, optionally below a supertype.
#[must_use]
pub fn open_subtype(inner: CompositeInnerType, supertype: Option<u32>) -> SubType {
    SubType {
        is_final: false,
        supertype_idx: supertype,
        composite_type: CompositeType {
            inner,
            shared: false,
            descriptor: None,
            describes: None,
        },
    }
}

/// Struct composite from (type, mutability) pairs.
#[must_use]
pub fn struct_type(fields: Vec<(StorageType, bool)>) -> CompositeInnerType {
    CompositeInnerType::Struct(StructType {
        fields: fields
            .into_iter()
            .map(|(element_type, mutable)| FieldType {
                element_type,
                mutable,
            })
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_define_round_trips() {
        let mut table = TypeTable::new();
        let a = table.reserve("a");
        let b = table.reserve("b");
        assert_ne!(a, b);
        assert_eq!(table.reserve("a"), a);
        table.define(a, final_subtype(CompositeInnerType::Func(FuncType::new([], []))));
        assert!(table.is_defined("a"));
        assert!(!table.is_defined("b"));
    }

    #[test]
    fn func_types_deduplicate() {
        let mut table = TypeTable::new();
        let a = table.func_type(vec![ValType::I32], vec![ValType::I32]);
        let b = table.func_type(vec![ValType::I32], vec![ValType::I32]);
        let c = table.func_type(vec![ValType::I64], vec![ValType::I32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
