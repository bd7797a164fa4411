//! Lexical scopes.
//!
//! A stack of frames; the bottom frame is the library's global scope.
//! Shadowing across frames is permitted and silent; a duplicate in the
//! same frame is a `DuplicateDeclaration`. Names can simultaneously
//! carry a value meaning and a type meaning (a class is both).

use quill_sema::Binding;
use quill_types::{DeclId, TypeId};
use rustc_hash::FxHashMap;

/// The value half of a scope entry.
#[derive(Clone, Debug)]
pub struct ValueEntry {
    pub binding: Binding,
    pub ty: TypeId,
}

/// One name's meanings in one frame.
#[derive(Clone, Debug, Default)]
pub struct ScopeEntry {
    pub value: Option<ValueEntry>,
    pub type_decl: Option<DeclId>,
    /// Type parameters in scope resolve to their `TypeParam` type.
    pub type_param: Option<TypeId>,
}

#[derive(Debug, Default)]
pub struct Scope {
    entries: FxHashMap<String, ScopeEntry>,
}

/// The scope stack of one library check.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<Scope>,
}

impl ScopeStack {
    #[must_use]
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push(&mut self) {
        self.frames.push(Scope::default());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Declare a value in the top frame. Returns false when the frame
    /// already has a value under this name (same-scope duplicate).
    pub fn declare_value(&mut self, name: &str, entry: ValueEntry) -> bool {
        let frame = self.frames.last_mut().expect("scope stack is never empty");
        let slot = frame.entries.entry(name.to_string()).or_default();
        if slot.value.is_some() {
            return false;
        }
        slot.value = Some(entry);
        true
    }

    /// Declare a type in the top frame. Returns false on a same-scope
    /// duplicate type name.
    pub fn declare_type(&mut self, name: &str, decl: DeclId) -> bool {
        let frame = self.frames.last_mut().expect("scope stack is never empty");
        let slot = frame.entries.entry(name.to_string()).or_default();
        if slot.type_decl.is_some() {
            return false;
        }
        slot.type_decl = Some(decl);
        true
    }

    /// Bring a type parameter into scope.
    pub fn declare_type_param(&mut self, name: &str, ty: TypeId) {
        let frame = self.frames.last_mut().expect("scope stack is never empty");
        frame.entries.entry(name.to_string()).or_default().type_param = Some(ty);
    }

    /// Innermost value meaning of a name.
    #[must_use]
    pub fn lookup_value(&self, name: &str) -> Option<&ValueEntry> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.entries.get(name).and_then(|e| e.value.as_ref()))
    }

    /// Innermost type meaning of a name: a type parameter shadows a
    /// declaration.
    #[must_use]
    pub fn lookup_type(&self, name: &str) -> Option<TypeOrDecl> {
        for frame in self.frames.iter().rev() {
            if let Some(entry) = frame.entries.get(name) {
                if let Some(ty) = entry.type_param {
                    return Some(TypeOrDecl::Param(ty));
                }
                if let Some(decl) = entry.type_decl {
                    return Some(TypeOrDecl::Decl(decl));
                }
            }
        }
        None
    }
}

/// Result of a type-position lookup.
#[derive(Clone, Copy, Debug)]
pub enum TypeOrDecl {
    Param(TypeId),
    Decl(DeclId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ast::NodeId;

    fn local(node: u32) -> ValueEntry {
        ValueEntry {
            binding: Binding::Local {
                node: NodeId(node),
                mutable: false,
            },
            ty: TypeId::I32,
        }
    }

    #[test]
    fn shadowing_across_frames_is_permitted() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        assert!(scopes.declare_value("x", local(1)));
        scopes.push();
        assert!(scopes.declare_value("x", local(2)));
        match scopes.lookup_value("x") {
            Some(entry) => assert!(matches!(
                entry.binding,
                Binding::Local { node: NodeId(2), .. }
            )),
            None => panic!("x not found"),
        }
        scopes.pop();
        assert!(matches!(
            scopes.lookup_value("x").map(|e| &e.binding),
            Some(Binding::Local { node: NodeId(1), .. })
        ));
    }

    #[test]
    fn same_frame_duplicates_are_rejected() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        assert!(scopes.declare_value("x", local(1)));
        assert!(!scopes.declare_value("x", local(2)));
    }

    #[test]
    fn type_params_shadow_type_decls() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        assert!(scopes.declare_type("T", DeclId(3)));
        scopes.push();
        scopes.declare_type_param("T", TypeId(42));
        assert!(matches!(
            scopes.lookup_type("T"),
            Some(TypeOrDecl::Param(TypeId(42)))
        ));
        scopes.pop();
        assert!(matches!(
            scopes.lookup_type("T"),
            Some(TypeOrDecl::Decl(DeclId(3)))
        ));
    }
}
