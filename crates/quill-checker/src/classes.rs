//! Class, interface, and mixin checking.
//!
//! Structural rules first (abstract/final/override/implements/mixin
//! requirements), then member bodies. Classes are already registered
//! and their signatures resolved by the declaration passes, so mutual
//! recursion and self-referential fields are settled by the time these
//! checks run.

use crate::context::{FieldInit, LibraryChecker};
use crate::scopes::ValueEntry;
use quill_ast::{ClassDecl, Member, MemberKind, MixinDecl, StmtKind};
use quill_common::diagnostics::ErrorCode;
use quill_sema::Binding;
use quill_types::{
    ClassFlags, DeclId, MemberFlags, MemberSig, MemberSigKind, TypeId, TypeKind, TypeRef,
    TypeSubstitution, instantiate_type, relate,
};
use rustc_hash::FxHashSet;

impl<'a> LibraryChecker<'a> {
    // =========================================================================
    // Structural rules
    // =========================================================================

    pub(crate) fn check_class_rules(&mut self) {
        let library = self.library;
        for stmt in &library.stmts {
            let StmtKind::Class(class) = &stmt.kind else {
                continue;
            };
            let decl = self
                .program
                .decls
                .lookup(&library.path, &class.name.name)
                .expect("registered");
            self.check_one_class(class, decl);
        }
    }

    fn check_one_class(&mut self, class: &ClassDecl, decl: DeclId) {
        let info = self.program.decls.class_info(decl).expect("class").clone();
        let identity = self.identity_class_type(decl);

        // Heritage cycles would make layout construction diverge.
        let mut seen: FxHashSet<DeclId> = FxHashSet::default();
        seen.insert(decl);
        let mut chain = info.extends;
        while let Some(super_ty) = chain {
            let TypeKind::Class(r) = self.program.types.kind(super_ty) else {
                break;
            };
            if !seen.insert(r.decl) {
                self.error(
                    ErrorCode::WrongDeclarationKind,
                    class.name.span,
                    format!("class '{}' participates in an inheritance cycle", class.name.name),
                );
                return;
            }
            chain = self.program.decls.class_info(r.decl).and_then(|i| i.extends);
        }

        // Abstract members belong in abstract classes.
        if !info.flags.contains(ClassFlags::ABSTRACT) {
            for member in &info.members {
                if member.flags.contains(MemberFlags::ABSTRACT) {
                    self.error(
                        ErrorCode::AbstractMethodOutsideAbstract,
                        class.name.span,
                        format!(
                            "abstract member '{}' is only permitted in an abstract class",
                            member.name
                        ),
                    );
                }
            }

            // Every abstract member of the inheritance chain must be
            // implemented somewhere below its declaration.
            for missing in self.unimplemented_abstract_members(decl) {
                self.error(
                    ErrorCode::MissingAbstractImplementation,
                    class.name.span,
                    format!(
                        "non-abstract class '{}' does not implement inherited abstract member '{missing}'",
                        class.name.name
                    ),
                );
            }
        }

        // Extension classes have no storage.
        if info.flags.contains(ClassFlags::EXTENSION) {
            for member in &info.members {
                if member.is_field() {
                    self.error(
                        ErrorCode::TypeMismatch,
                        class.name.span,
                        format!(
                            "extension class '{}' cannot declare field '{}'",
                            class.name.name, member.name
                        ),
                    );
                }
            }
        }

        // Override compatibility against the superclass chain.
        if let Some(extends) = info.extends {
            if let TypeKind::Class(super_ref) = self.program.types.kind(extends) {
                for member in &info.members {
                    self.check_override(class, member, &super_ref);
                }
            }
        }

        // Mixin `on` requirements.
        for &mixin_ty in &info.mixins {
            let TypeKind::Mixin(r) = self.program.types.kind(mixin_ty) else {
                continue;
            };
            let Some(mixin_info) = self.program.decls.class_info(r.decl) else {
                continue;
            };
            if let Some(on) = mixin_info.on {
                let names: Vec<String> = mixin_info
                    .type_params
                    .iter()
                    .map(|p| p.name.clone())
                    .collect();
                let scope = mixin_info.scope;
                let subst = TypeSubstitution::for_params(scope, &names, &r.args);
                let on = instantiate_type(&self.program.types, on, &subst);
                if !self.assignable(identity, on) {
                    let mixin_name = self.program.decls.get(r.decl).name.clone();
                    let wanted = self.fmt_type(on);
                    self.error(
                        ErrorCode::MixinRequirementUnmet,
                        class.name.span,
                        format!(
                            "class '{}' applies mixin '{mixin_name}' but does not satisfy its 'on {wanted}' requirement",
                            class.name.name
                        ),
                    );
                }
            }
        }

        // Implements clauses: every interface method must be provided
        // with a compatible signature.
        for &iface_ty in &info.implements {
            let TypeKind::Interface(iface_ref) = self.program.types.kind(iface_ty) else {
                continue;
            };
            self.check_implements(class, decl, &iface_ref);
        }
    }

    /// Abstract members of the chain with no implementation below.
    fn unimplemented_abstract_members(&self, decl: DeclId) -> Vec<String> {
        let mut implemented: FxHashSet<String> = FxHashSet::default();
        let mut missing = Vec::new();
        let mut current = Some(decl);
        while let Some(class) = current {
            let Some(info) = self.program.decls.class_info(class) else {
                break;
            };
            for member in &info.members {
                let slot = member.slot_name();
                if member.flags.contains(MemberFlags::ABSTRACT) {
                    if !implemented.contains(&slot) && !missing.contains(&member.name) {
                        missing.push(member.name.clone());
                    }
                } else {
                    implemented.insert(slot);
                }
            }
            current = info.extends.and_then(|e| match self.program.types.kind(e) {
                TypeKind::Class(r) => Some(r.decl),
                _ => None,
            });
        }
        missing
    }

    /// Find the overridden member (same slot name) in the superclass
    /// chain and verify variance and finality.
    fn check_override(&mut self, class: &ClassDecl, member: &MemberSig, super_ref: &TypeRef) {
        if member.flags.contains(MemberFlags::STATIC) {
            return;
        }
        let slot = member.slot_name();
        let mut current = super_ref.clone();
        let mut hops = 0u32;
        loop {
            hops += 1;
            if hops > 64 {
                return;
            }
            let Some(info) = self.program.decls.class_info(current.decl) else {
                return;
            };
            let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
            let subst = TypeSubstitution::for_params(info.scope, &names, &current.args);
            if let Some(base) = info.members.iter().find(|m| m.slot_name() == slot) {
                let base = self.substitute_member(base, &subst);
                if base.flags.contains(MemberFlags::FINAL) {
                    self.error(
                        ErrorCode::CannotOverrideFinal,
                        class.name.span,
                        format!("cannot override final member '{}'", member.name),
                    );
                    return;
                }
                self.check_override_signature(class, member, &base);
                return;
            }
            let Some(super_ty) =
                relate::superclass_of(&self.program.types, &self.program.decls, &current)
            else {
                return;
            };
            match self.program.types.kind(super_ty) {
                TypeKind::Class(r) => current = r,
                _ => return,
            }
        }
    }

    /// Overriding parameters must be contravariantly compatible, the
    /// return covariantly compatible.
    fn check_override_signature(&mut self, class: &ClassDecl, member: &MemberSig, base: &MemberSig) {
        let (own_params, own_ret) = match &member.kind {
            MemberSigKind::Method {
                params,
                return_type,
                ..
            } => (params.clone(), *return_type),
            MemberSigKind::Field { ty } | MemberSigKind::Getter { ty } => (Vec::new(), *ty),
            MemberSigKind::Setter { ty } => (vec![*ty], TypeId::VOID),
        };
        let (base_params, base_ret) = match &base.kind {
            MemberSigKind::Method {
                params,
                return_type,
                ..
            } => (params.clone(), *return_type),
            MemberSigKind::Field { ty } | MemberSigKind::Getter { ty } => (Vec::new(), *ty),
            MemberSigKind::Setter { ty } => (vec![*ty], TypeId::VOID),
        };

        let mut compatible = own_params.len() == base_params.len();
        if compatible {
            for (own, base) in own_params.iter().zip(&base_params) {
                if !self.assignable(*base, *own) {
                    compatible = false;
                    break;
                }
            }
        }
        if compatible && base_ret != TypeId::VOID && !self.assignable(own_ret, base_ret) {
            compatible = false;
        }
        if !compatible {
            self.error(
                ErrorCode::TypeMismatch,
                class.name.span,
                format!(
                    "override of '{}' in class '{}' is not compatible with the inherited signature",
                    member.name, class.name.name
                ),
            );
        }
    }

    fn check_implements(&mut self, class: &ClassDecl, decl: DeclId, iface_ref: &TypeRef) {
        let Some(iface_info) = self.program.decls.interface_info(iface_ref.decl).cloned() else {
            return;
        };
        let names: Vec<String> = iface_info
            .type_params
            .iter()
            .map(|p| p.name.clone())
            .collect();
        let subst = TypeSubstitution::for_params(iface_info.scope, &names, &iface_ref.args);
        let identity = self.identity_class_type(decl);
        let TypeKind::Class(class_ref) = self.program.types.kind(identity) else {
            return;
        };
        let iface_name = self.program.decls.get(iface_ref.decl).name.clone();

        for method in &iface_info.members {
            let wanted = self.substitute_member(method, &subst);
            let Some(found) = self.class_member(&class_ref, &method.name) else {
                self.error(
                    ErrorCode::TypeMismatch,
                    class.name.span,
                    format!(
                        "class '{}' does not implement method '{}' of interface '{iface_name}'",
                        class.name.name, method.name
                    ),
                );
                continue;
            };
            self.check_override_signature(class, &found.sig, &wanted);
        }

        // Extended interfaces are part of the contract.
        for &parent in &iface_info.extends {
            let parent = instantiate_type(&self.program.types, parent, &subst);
            if let TypeKind::Interface(parent_ref) = self.program.types.kind(parent) {
                self.check_implements(class, decl, &parent_ref);
            }
        }
    }

    // =========================================================================
    // Bodies
    // =========================================================================

    pub(crate) fn check_class_bodies(&mut self, class: &ClassDecl) {
        let decl = self
            .program
            .decls
            .lookup(&self.library.path, &class.name.name)
            .expect("registered");
        let info = self.program.decls.class_info(decl).expect("class").clone();

        self.scopes.push();
        for p in &info.type_params {
            let ty = self.program.types.type_param(info.scope, &p.name);
            self.scopes.declare_type_param(&p.name, ty);
        }
        let this_ty = self.identity_class_type(decl);
        self.this_types.push(this_ty);
        let previous_class = self.enclosing_class.replace(decl);

        // Field initializers, in declaration order. Superclass fields
        // are initialised before any of ours.
        let mut initialized: FxHashSet<String> = FxHashSet::default();
        let mut own_fields: FxHashSet<String> = FxHashSet::default();
        let mut chain = info.extends;
        while let Some(super_ty) = chain {
            let TypeKind::Class(r) = self.program.types.kind(super_ty) else {
                break;
            };
            let Some(super_info) = self.program.decls.class_info(r.decl) else {
                break;
            };
            for m in &super_info.members {
                if m.is_field() {
                    initialized.insert(m.name.clone());
                }
            }
            chain = super_info.extends;
        }
        for m in &info.members {
            if m.is_field() && !m.flags.contains(MemberFlags::STATIC) {
                own_fields.insert(m.name.clone());
            }
        }
        self.field_init = Some(FieldInit {
            class: decl,
            initialized,
            own_fields,
        });

        for member in &class.members {
            if let MemberKind::Field(field) = &member.kind {
                let sig_ty = info
                    .members
                    .iter()
                    .find(|m| m.node == member.id)
                    .and_then(|m| match m.kind {
                        MemberSigKind::Field { ty } => Some(ty),
                        _ => None,
                    })
                    .unwrap_or(TypeId::ERROR);
                self.in_static = field.is_static;
                if let Some(init) = &field.init {
                    let init_ty = self.check_expr(init, Some(sig_ty));
                    if !self.assignable(init_ty, sig_ty) {
                        let found = self.fmt_type(init_ty);
                        let wanted = self.fmt_type(sig_ty);
                        self.error(
                            ErrorCode::TypeMismatch,
                            init.span,
                            format!("type '{found}' is not assignable to type '{wanted}'"),
                        );
                    }
                }
                self.in_static = false;
                if !field.is_static {
                    if let Some(fi) = &mut self.field_init {
                        fi.initialized.insert(field.name.name.clone());
                    }
                }
            }
        }
        self.field_init = None;

        // Constructor and member bodies. Inside a constructor every
        // field is addressable (assignments, not reads, dominate).
        for member in &class.members {
            self.check_member_body(&info, member);
        }

        self.enclosing_class = previous_class;
        self.this_types.pop();
        self.scopes.pop();
    }

    pub(crate) fn check_mixin_bodies(&mut self, mixin: &MixinDecl) {
        let decl = self
            .program
            .decls
            .lookup(&self.library.path, &mixin.name.name)
            .expect("registered");
        let info = self.program.decls.class_info(decl).expect("mixin").clone();

        self.scopes.push();
        for p in &info.type_params {
            let ty = self.program.types.type_param(info.scope, &p.name);
            self.scopes.declare_type_param(&p.name, ty);
        }
        let args: Vec<TypeId> = info
            .type_params
            .iter()
            .map(|p| self.program.types.type_param(info.scope, &p.name))
            .collect();
        let this_ty = self.program.types.mixin(decl, args);
        self.this_types.push(this_ty);
        let previous_class = self.enclosing_class.replace(decl);

        for member in &mixin.members {
            self.check_member_body(&info, member);
        }

        self.enclosing_class = previous_class;
        self.this_types.pop();
        self.scopes.pop();
    }

    fn check_member_body(&mut self, info: &quill_types::ClassInfo, member: &Member) {
        match &member.kind {
            MemberKind::Method(method) => {
                let Some(body) = &method.body else {
                    return;
                };
                let sig = info.members.iter().find(|m| m.node == member.id).cloned();
                let Some(MemberSig {
                    kind:
                        MemberSigKind::Method {
                            type_params,
                            scope,
                            params,
                            return_type,
                            ..
                        },
                    ..
                }) = sig
                else {
                    return;
                };

                self.scopes.push();
                for p in &type_params {
                    let ty = self.program.types.type_param(scope, &p.name);
                    self.scopes.declare_type_param(&p.name, ty);
                }
                for (param, &ty) in method.params.iter().zip(&params) {
                    self.scopes.declare_value(
                        &param.name,
                        ValueEntry {
                            binding: Binding::Local {
                                node: param.id,
                                mutable: false,
                            },
                            ty,
                        },
                    );
                    self.program.sema.record_type(param.id, ty);
                }
                self.in_static = method.is_static;
                self.return_types.push(return_type);
                self.check_block_stmts(body);
                self.return_types.pop();
                self.in_static = false;
                self.scopes.pop();

                if return_type != TypeId::VOID
                    && return_type != TypeId::ERROR
                    && !self.block_returns(body)
                {
                    self.error(
                        ErrorCode::MissingReturn,
                        method.name.span,
                        format!(
                            "method '{}' does not return on every path",
                            method.name.name
                        ),
                    );
                }
            }
            MemberKind::Accessor(accessor) => {
                let sig = info.members.iter().find(|m| m.node == member.id).cloned();
                let Some(sig) = sig else { return };
                self.scopes.push();
                let return_type = match (&sig.kind, &accessor.param) {
                    (MemberSigKind::Setter { ty }, Some(param)) => {
                        self.scopes.declare_value(
                            &param.name,
                            ValueEntry {
                                binding: Binding::Local {
                                    node: param.id,
                                    mutable: false,
                                },
                                ty: *ty,
                            },
                        );
                        self.program.sema.record_type(param.id, *ty);
                        TypeId::VOID
                    }
                    (MemberSigKind::Getter { ty }, _) => *ty,
                    _ => TypeId::VOID,
                };
                self.in_static = accessor.is_static;
                self.return_types.push(return_type);
                self.check_block_stmts(&accessor.body);
                self.return_types.pop();
                self.in_static = false;
                self.scopes.pop();

                if return_type != TypeId::VOID
                    && return_type != TypeId::ERROR
                    && !self.block_returns(&accessor.body)
                {
                    self.error(
                        ErrorCode::MissingReturn,
                        accessor.name.span,
                        format!(
                            "getter '{}' does not return on every path",
                            accessor.name.name
                        ),
                    );
                }
            }
            MemberKind::Constructor(ctor) => {
                let params = info.ctor.as_ref().map(|c| c.params.clone()).unwrap_or_default();
                self.scopes.push();
                for (param, &ty) in ctor.params.iter().zip(&params) {
                    self.scopes.declare_value(
                        &param.name,
                        ValueEntry {
                            binding: Binding::Local {
                                node: param.id,
                                mutable: false,
                            },
                            ty,
                        },
                    );
                    self.program.sema.record_type(param.id, ty);
                }
                self.return_types.push(TypeId::VOID);
                self.check_block_stmts(&ctor.body);
                self.return_types.pop();
                self.scopes.pop();
            }
            MemberKind::Field(_) => {
                // Initializers were checked with ordering above.
            }
        }
    }
}
