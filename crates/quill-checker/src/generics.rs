//! Generic instantiation and type-argument inference.
//!
//! Instantiation applies defaults, verifies constraints, and records the
//! specialization in the process-wide cache keyed by the specialization
//! key — the same key codegen monomorphizes over, so checker and
//! generator always agree on layout identity.

use crate::context::LibraryChecker;
use quill_common::diagnostics::ErrorCode;
use quill_common::span::Span;
use quill_types::{
    DeclId, DeclKind, TypeId, TypeKind, TypeParamInfo, TypeSubstitution, instantiate_type,
    type_key,
};

impl<'a> LibraryChecker<'a> {
    /// Instantiate a generic class/interface/mixin at the given
    /// arguments (which may be fewer than declared, triggering
    /// defaults).
    pub(crate) fn instantiate(&mut self, decl: DeclId, args: Vec<TypeId>, span: Span) -> TypeId {
        let kind = self.program.decls.get(decl).kind;
        let (params, scope) = match kind {
            DeclKind::Class | DeclKind::Mixin => {
                let info = self.program.decls.class_info(decl).expect("class info");
                (info.type_params.clone(), info.scope)
            }
            DeclKind::Interface => {
                let info = self
                    .program
                    .decls
                    .interface_info(decl)
                    .expect("interface info");
                (info.type_params.clone(), info.scope)
            }
            _ => return TypeId::ERROR,
        };

        let Some(args) = self.complete_type_args(decl, &params, scope, args, span) else {
            return TypeId::ERROR;
        };

        let ty = match kind {
            DeclKind::Class => self.program.types.class(decl, args.clone()),
            DeclKind::Interface => self.program.types.interface(decl, args.clone()),
            _ => self.program.types.mixin(decl, args.clone()),
        };

        // Mixins dissolve into their applying classes; only classes and
        // interfaces need layout identity downstream.
        if matches!(kind, DeclKind::Class | DeclKind::Interface) {
            let key = type_key(&self.program.types, &self.program.decls, ty);
            self.program
                .sema
                .record_specialization(key, decl, args, ty);
        }
        ty
    }

    /// Apply defaults and verify constraints. `None` when the argument
    /// count cannot be repaired.
    pub(crate) fn complete_type_args(
        &mut self,
        decl: DeclId,
        params: &[TypeParamInfo],
        scope: u32,
        mut args: Vec<TypeId>,
        span: Span,
    ) -> Option<Vec<TypeId>> {
        let name = self.program.decls.get(decl).name.clone();
        if args.len() > params.len() {
            self.error(
                ErrorCode::ArgumentCountMismatch,
                span,
                format!(
                    "'{name}' takes {} type argument(s), got {}",
                    params.len(),
                    args.len()
                ),
            );
            return None;
        }

        // Fill missing trailing arguments from defaults, substituting
        // earlier arguments into later defaults.
        while args.len() < params.len() {
            let param = &params[args.len()];
            let Some(default) = param.default else {
                self.error(
                    ErrorCode::ArgumentCountMismatch,
                    span,
                    format!(
                        "'{name}' takes {} type argument(s), got {}",
                        params.len(),
                        args.len()
                    ),
                );
                return None;
            };
            let names: Vec<String> = params[..args.len()].iter().map(|p| p.name.clone()).collect();
            let subst = TypeSubstitution::for_params(scope, &names, &args);
            args.push(instantiate_type(&self.program.types, default, &subst));
        }

        // Constraint verification, with every argument substituted into
        // the constraint (constraints may reference sibling parameters).
        let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(scope, &names, &args);
        for (param, &arg) in params.iter().zip(&args) {
            if let Some(constraint) = param.constraint {
                let constraint = instantiate_type(&self.program.types, constraint, &subst);
                if !self.assignable(arg, constraint) {
                    let found = self.fmt_type(arg);
                    let wanted = self.fmt_type(constraint);
                    self.error(
                        ErrorCode::ConstraintViolation,
                        span,
                        format!(
                            "type '{found}' does not satisfy the constraint '{wanted}' of '{}' on '{name}'",
                            param.name
                        ),
                    );
                }
            }
        }
        Some(args)
    }

    // =========================================================================
    // Inference
    // =========================================================================

    /// Infer type arguments for a generic call from parameter patterns
    /// and actual argument types. First match wins per parameter;
    /// literals widen before binding.
    pub(crate) fn infer_type_args(
        &self,
        scope: u32,
        param_patterns: &[TypeId],
        arg_types: &[TypeId],
    ) -> TypeSubstitution {
        let mut subst = TypeSubstitution::new();
        for (&pattern, &actual) in param_patterns.iter().zip(arg_types) {
            self.unify(pattern, actual, scope, &mut subst);
        }
        subst
    }

    fn unify(&self, pattern: TypeId, actual: TypeId, scope: u32, subst: &mut TypeSubstitution) {
        match self.program.types.kind(pattern) {
            TypeKind::TypeParam(p) if p.scope == scope => {
                if subst.get(&p).is_none() {
                    subst.insert(p, self.program.types.widened(actual));
                }
            }
            TypeKind::FixedArray(pe) => {
                if let TypeKind::FixedArray(ae) = self.program.types.kind(actual) {
                    self.unify(pe, ae, scope, subst);
                }
            }
            TypeKind::Array(pe) => {
                if let TypeKind::Array(ae) = self.program.types.kind(actual) {
                    self.unify(pe, ae, scope, subst);
                }
            }
            TypeKind::Tuple(pes) => {
                if let TypeKind::Tuple(aes) = self.program.types.kind(actual) {
                    for (pe, ae) in pes.iter().zip(&aes) {
                        self.unify(*pe, *ae, scope, subst);
                    }
                }
            }
            TypeKind::Record(pfs) => {
                if let TypeKind::Record(afs) = self.program.types.kind(actual) {
                    for (pname, pf) in &pfs {
                        if let Some((_, af)) = afs.iter().find(|(aname, _)| aname == pname) {
                            self.unify(*pf, *af, scope, subst);
                        }
                    }
                }
            }
            TypeKind::Function(ps) => {
                if let TypeKind::Function(asig) = self.program.types.kind(actual) {
                    for (pp, ap) in ps.params.iter().zip(&asig.params) {
                        self.unify(*pp, *ap, scope, subst);
                    }
                    self.unify(ps.return_type, asig.return_type, scope, subst);
                }
            }
            TypeKind::Class(pr) => {
                if let TypeKind::Class(ar) = self.program.types.kind(actual) {
                    if pr.decl == ar.decl {
                        for (pa, aa) in pr.args.iter().zip(&ar.args) {
                            self.unify(*pa, *aa, scope, subst);
                        }
                    }
                }
            }
            TypeKind::Interface(pr) => {
                if let TypeKind::Interface(ar) = self.program.types.kind(actual) {
                    if pr.decl == ar.decl {
                        for (pa, aa) in pr.args.iter().zip(&ar.args) {
                            self.unify(*pa, *aa, scope, subst);
                        }
                    }
                }
            }
            TypeKind::Union(pms) => {
                // Match the actual against each branch; useful for
                // T|null patterns.
                for pm in pms {
                    self.unify(pm, self.program.types.without_null(actual), scope, subst);
                }
            }
            _ => {}
        }
    }
}
