//! Declaration passes.
//!
//! Types are hoisted: every type declaration of a library is registered
//! (skeletally) before any signature or body is looked at, which is what
//! lets self-referential and mutually-recursive classes check. Values,
//! including class statics and top-level bindings, are initialised in
//! source order.

use crate::context::{ExportTable, ExportedSymbol, LibraryChecker};
use crate::scopes::ValueEntry;
use quill_ast::{
    ClassDecl, Decorator, ExprKind, FuncDecl, InterfaceDecl, Member, MemberKind, MixinDecl, Param,
    StmtKind, TypeParamDecl, Visibility as AstVisibility,
};
use quill_common::diagnostics::ErrorCode;
use quill_common::span::Span;
use quill_sema::Binding;
use quill_types::{
    CtorSig, DeclId, DeclKind, FunctionShape, MemberFlags, MemberSig, MemberSigKind, TypeId,
    TypeParamInfo, TypeParamRef, TypeSubstitution, Visibility, instantiate_type,
};

/// Names the code generator understands as intrinsics.
pub const KNOWN_INTRINSICS: &[&str] = &[
    "__array_len",
    "__array_get",
    "__array_set",
    "__array_new",
    "unreachable",
];

/// The binding a type declaration produces in type position.
#[must_use]
pub fn type_binding(decls: &quill_types::DeclStore, decl: DeclId) -> Binding {
    match decls.get(decl).kind {
        DeclKind::Class => Binding::Class(decl),
        DeclKind::Interface => Binding::Interface(decl),
        DeclKind::Mixin => Binding::Mixin(decl),
        DeclKind::Enum => Binding::Enum(decl),
        DeclKind::Distinct => Binding::Distinct(decl),
        DeclKind::Function => Binding::Function(decl),
    }
}

impl<'a> LibraryChecker<'a> {
    // =========================================================================
    // Scope seeding: intrinsics, prelude, imports
    // =========================================================================

    pub(crate) fn seed_scope(&mut self) {
        // Intrinsic declarations are visible inside standard-library
        // modules only.
        if self.library.is_stdlib {
            for (name, decl) in self.intrinsics.functions.clone() {
                let ty = self.function_value_type(decl);
                self.scopes.declare_value(
                    &name,
                    ValueEntry {
                        binding: Binding::Function(decl),
                        ty,
                    },
                );
            }
        } else {
            // Prelude: exports of every standard library checked so far.
            let mut prelude = Vec::new();
            for (path, table) in self.exports.iter() {
                if !path.starts_with(quill_loader::STDLIB_PREFIX) {
                    continue;
                }
                for (name, symbol) in table {
                    prelude.push((name.clone(), (symbol.clone(), path.clone())));
                }
            }
            self.prelude.extend(prelude);
        }

        // Explicit imports bind exported declaration identities.
        let library = self.library;
        for stmt in &library.stmts {
            let StmtKind::Import(import) = &stmt.kind else {
                continue;
            };
            let Some(dep_path) = library.imports.get(&import.specifier) else {
                continue;
            };
            let Some(table) = self.exports.get(dep_path).cloned() else {
                // Unresolvable inside an import cycle; already reported.
                continue;
            };
            for imported in &import.names {
                let Some(symbol) = table.get(&imported.name) else {
                    self.error(
                        ErrorCode::SymbolNotFound,
                        imported.span,
                        format!(
                            "library '{dep_path}' has no exported member '{}'",
                            imported.name
                        ),
                    );
                    continue;
                };
                let local = imported.local_name().to_string();
                if let Some(value) = &symbol.value {
                    self.scopes.declare_value(&local, value.clone());
                    self.program.sema.bind(imported.id, value.binding.clone());
                }
                if let Some(decl) = symbol.type_decl {
                    self.scopes.declare_type(&local, decl);
                    if symbol.value.is_none() {
                        self.program
                            .sema
                            .bind(imported.id, type_binding(&self.program.decls, decl));
                    }
                }
            }
        }
    }

    // =========================================================================
    // Phase 1: hoisted registration
    // =========================================================================

    pub(crate) fn register_types(&mut self) {
        let library = self.library;
        for stmt in &library.stmts {
            let (kind, name, span) = match &stmt.kind {
                StmtKind::Class(c) => (DeclKind::Class, &c.name, c.name.span),
                StmtKind::Interface(i) => (DeclKind::Interface, &i.name, i.name.span),
                StmtKind::Mixin(m) => (DeclKind::Mixin, &m.name, m.name.span),
                StmtKind::Enum(e) => (DeclKind::Enum, &e.name, e.name.span),
                StmtKind::Distinct(d) => (DeclKind::Distinct, &d.name, d.name.span),
                StmtKind::Func(f) => (DeclKind::Function, &f.name, f.name.span),
                _ => continue,
            };
            let decl =
                self.program
                    .decls
                    .declare(kind, &library.path, &name.name, stmt.id);
            if kind != DeclKind::Function {
                if !self.scopes.declare_type(&name.name, decl) {
                    self.error(
                        ErrorCode::DuplicateDeclaration,
                        span,
                        format!("duplicate declaration of '{}'", name.name),
                    );
                }
            }
            // Classes and enums are also value names (static access,
            // enum members). The value itself is not first-class.
            match kind {
                DeclKind::Class => {
                    self.scopes.declare_value(
                        &name.name,
                        ValueEntry {
                            binding: Binding::Class(decl),
                            ty: TypeId::VOID,
                        },
                    );
                }
                DeclKind::Enum => {
                    self.scopes.declare_value(
                        &name.name,
                        ValueEntry {
                            binding: Binding::Enum(decl),
                            ty: TypeId::VOID,
                        },
                    );
                }
                _ => {}
            }
            // Assign the type-parameter scope up front so any forward
            // reference can already count arguments.
            let params: Vec<&TypeParamDecl> = match &stmt.kind {
                StmtKind::Class(c) => c.type_params.iter().collect(),
                StmtKind::Interface(i) => i.type_params.iter().collect(),
                StmtKind::Mixin(m) => m.type_params.iter().collect(),
                StmtKind::Func(f) => f.type_params.iter().collect(),
                _ => Vec::new(),
            };
            let scope = self.program.decls.fresh_scope();
            let skeleton: Vec<TypeParamInfo> = params
                .iter()
                .map(|p| TypeParamInfo {
                    name: p.name.clone(),
                    constraint: None,
                    default: None,
                })
                .collect();
            match kind {
                DeclKind::Class | DeclKind::Mixin => {
                    let info = self.program.decls.class_info_mut(decl).expect("class info");
                    info.scope = scope;
                    info.type_params = skeleton;
                }
                DeclKind::Interface => {
                    let info = self
                        .program
                        .decls
                        .interface_info_mut(decl)
                        .expect("interface info");
                    info.scope = scope;
                    info.type_params = skeleton;
                }
                DeclKind::Function => {
                    let info = self
                        .program
                        .decls
                        .function_info_mut(decl)
                        .expect("function info");
                    info.scope = scope;
                    info.type_params = skeleton;
                }
                _ => {}
            }
        }
    }

    // =========================================================================
    // Phase 2: signature resolution
    // =========================================================================

    pub(crate) fn resolve_signatures(&mut self) {
        let library = self.library;

        // Enums and distinct aliases carry no heritage; resolve first so
        // everything else can reference them.
        for stmt in &library.stmts {
            match &stmt.kind {
                StmtKind::Enum(e) => {
                    let decl = self.decl_of(&e.name.name);
                    let members = e.members.iter().map(|m| m.name.clone()).collect();
                    self.program.decls.enum_info_mut(decl).expect("enum").members = members;
                }
                StmtKind::Distinct(d) => {
                    let decl = self.decl_of(&d.name.name);
                    let inner = self.resolve_type(&d.inner);
                    self.program
                        .decls
                        .distinct_info_mut(decl)
                        .expect("distinct")
                        .inner = inner;
                }
                _ => {}
            }
        }

        for stmt in &library.stmts {
            if let StmtKind::Interface(i) = &stmt.kind {
                self.resolve_interface_signature(i);
            }
        }
        for stmt in &library.stmts {
            if let StmtKind::Mixin(m) = &stmt.kind {
                self.resolve_mixin_signature(m);
            }
        }
        for stmt in &library.stmts {
            if let StmtKind::Class(c) = &stmt.kind {
                self.resolve_class_signature(c);
            }
        }
        for stmt in &library.stmts {
            if let StmtKind::Class(c) = &stmt.kind {
                self.merge_mixin_members(c);
            }
        }
        for stmt in &library.stmts {
            if let StmtKind::Func(f) = &stmt.kind {
                self.resolve_function_signature(f);
            }
        }
    }

    fn decl_of(&self, name: &str) -> DeclId {
        self.program
            .decls
            .lookup(&self.library.path, name)
            .expect("registered in phase 1")
    }

    /// Push a frame holding a declaration's type parameters and resolve
    /// their constraints and defaults.
    fn enter_type_params(&mut self, scope: u32, params: &[TypeParamDecl]) -> Vec<TypeParamInfo> {
        self.scopes.push();
        for p in params {
            let ty = self.program.types.type_param(scope, &p.name);
            self.scopes.declare_type_param(&p.name, ty);
        }
        params
            .iter()
            .map(|p| TypeParamInfo {
                name: p.name.clone(),
                constraint: p.constraint.as_ref().map(|c| self.resolve_type(c)),
                default: p.default.as_ref().map(|d| self.resolve_type(d)),
            })
            .collect()
    }

    fn resolve_interface_signature(&mut self, decl_ast: &InterfaceDecl) {
        let decl = self.decl_of(&decl_ast.name.name);
        let scope = self
            .program
            .decls
            .interface_info(decl)
            .expect("interface")
            .scope;
        let type_params = self.enter_type_params(scope, &decl_ast.type_params);

        let extends: Vec<TypeId> = decl_ast
            .extends
            .iter()
            .map(|ann| {
                let ty = self.resolve_type(ann);
                if !matches!(
                    self.program.types.kind(ty),
                    quill_types::TypeKind::Interface(_) | quill_types::TypeKind::Error
                ) {
                    self.error(
                        ErrorCode::WrongDeclarationKind,
                        ann.span,
                        "interfaces can only extend interfaces",
                    );
                }
                ty
            })
            .collect();

        let mut members = Vec::new();
        for member in &decl_ast.members {
            let method_scope = self.program.decls.fresh_scope();
            let method_params = self.enter_type_params(method_scope, &member.type_params);
            let params = member
                .params
                .iter()
                .map(|p| self.param_type(p))
                .collect::<Vec<_>>();
            let return_type = member
                .return_ann
                .as_ref()
                .map_or(TypeId::VOID, |ann| self.resolve_type(ann));
            self.scopes.pop();
            members.push(MemberSig {
                name: member.name.clone(),
                visibility: Visibility::Public,
                flags: MemberFlags::VIRTUAL,
                node: member.id,
                kind: MemberSigKind::Method {
                    type_params: method_params,
                    scope: method_scope,
                    params,
                    return_type,
                    intrinsic: None,
                },
            });
        }
        self.scopes.pop();

        let info = self
            .program
            .decls
            .interface_info_mut(decl)
            .expect("interface");
        info.type_params = type_params;
        info.extends = extends;
        info.members = members;
    }

    fn resolve_mixin_signature(&mut self, decl_ast: &MixinDecl) {
        let decl = self.decl_of(&decl_ast.name.name);
        let scope = self.program.decls.class_info(decl).expect("mixin").scope;
        let type_params = self.enter_type_params(scope, &decl_ast.type_params);

        let on = decl_ast.on.as_ref().map(|ann| self.resolve_type(ann));
        let members = self.resolve_member_signatures(&decl_ast.members, true);
        self.scopes.pop();

        let info = self.program.decls.class_info_mut(decl).expect("mixin");
        info.type_params = type_params;
        info.on = on;
        info.members = members;
    }

    fn resolve_class_signature(&mut self, decl_ast: &ClassDecl) {
        let decl = self.decl_of(&decl_ast.name.name);
        let scope = self.program.decls.class_info(decl).expect("class").scope;
        let type_params = self.enter_type_params(scope, &decl_ast.type_params);

        let mut flags = quill_types::ClassFlags::default();
        if decl_ast.is_abstract {
            flags |= quill_types::ClassFlags::ABSTRACT;
        }
        if decl_ast.is_final {
            flags |= quill_types::ClassFlags::FINAL;
        }
        let extension_on = decl_ast.extension_on.as_ref().map(|ann| {
            flags |= quill_types::ClassFlags::EXTENSION;
            self.resolve_type(ann)
        });

        let extends = decl_ast.extends.as_ref().and_then(|ann| {
            let ty = self.resolve_type(ann);
            match self.program.types.kind(ty) {
                quill_types::TypeKind::Class(r) => {
                    let super_info = self.program.decls.class_info(r.decl);
                    if super_info
                        .is_some_and(|i| i.flags.contains(quill_types::ClassFlags::FINAL))
                    {
                        let name = self.program.decls.get(r.decl).name.clone();
                        self.error(
                            ErrorCode::CannotExtendFinal,
                            ann.span,
                            format!("cannot extend final class '{name}'"),
                        );
                        return None;
                    }
                    Some(ty)
                }
                quill_types::TypeKind::Error => None,
                _ => {
                    self.error(
                        ErrorCode::WrongDeclarationKind,
                        ann.span,
                        "classes can only extend classes",
                    );
                    None
                }
            }
        });

        let implements: Vec<TypeId> = decl_ast
            .implements
            .iter()
            .map(|ann| {
                let ty = self.resolve_type(ann);
                if !matches!(
                    self.program.types.kind(ty),
                    quill_types::TypeKind::Interface(_) | quill_types::TypeKind::Error
                ) {
                    self.error(
                        ErrorCode::WrongDeclarationKind,
                        ann.span,
                        "the implements clause takes interfaces",
                    );
                }
                ty
            })
            .collect();

        let mixins: Vec<TypeId> = decl_ast
            .mixins
            .iter()
            .map(|ann| {
                let ty = self.resolve_type(ann);
                if !matches!(
                    self.program.types.kind(ty),
                    quill_types::TypeKind::Mixin(_) | quill_types::TypeKind::Error
                ) {
                    self.error(
                        ErrorCode::WrongDeclarationKind,
                        ann.span,
                        "the with clause takes mixins, not interfaces or classes",
                    );
                }
                ty
            })
            .collect();

        let members = self.resolve_member_signatures(&decl_ast.members, false);
        let ctor = decl_ast.members.iter().find_map(|m| match &m.kind {
            MemberKind::Constructor(ctor) => {
                let params = ctor.params.iter().map(|p| self.param_type(p)).collect();
                Some(CtorSig {
                    params,
                    node: m.id,
                })
            }
            _ => None,
        });
        self.scopes.pop();

        let info = self.program.decls.class_info_mut(decl).expect("class");
        info.type_params = type_params;
        info.flags = flags;
        info.extension_on = extension_on;
        info.extends = extends;
        info.implements = implements;
        info.mixins = mixins;
        info.members = members;
        info.ctor = ctor;
    }

    /// Resolve member signatures of a class or mixin body.
    fn resolve_member_signatures(&mut self, members: &[Member], in_mixin: bool) -> Vec<MemberSig> {
        let mut sigs: Vec<MemberSig> = Vec::new();
        for member in members {
            match &member.kind {
                MemberKind::Field(field) => {
                    let ty = if let Some(ann) = &field.annotation {
                        self.resolve_type(ann)
                    } else if let Some(init) = &field.init {
                        match self.simple_expr_type(init) {
                            Some(ty) => self.program.types.widened(ty),
                            None => {
                                self.error(
                                    ErrorCode::TypeMismatch,
                                    field.name.span,
                                    format!(
                                        "field '{}' needs a type annotation",
                                        field.name.name
                                    ),
                                );
                                TypeId::ERROR
                            }
                        }
                    } else {
                        self.error(
                            ErrorCode::TypeMismatch,
                            field.name.span,
                            format!("field '{}' needs a type or an initializer", field.name.name),
                        );
                        TypeId::ERROR
                    };
                    let mut flags = MemberFlags::default();
                    if field.is_static {
                        flags |= MemberFlags::STATIC;
                    }
                    sigs.push(MemberSig {
                        name: field.name.name.clone(),
                        visibility: visibility(field.visibility),
                        flags,
                        node: member.id,
                        kind: MemberSigKind::Field { ty },
                    });
                }
                MemberKind::Method(method) => {
                    let method_scope = self.program.decls.fresh_scope();
                    let type_params = self.enter_type_params(method_scope, &method.type_params);
                    let params = method.params.iter().map(|p| self.param_type(p)).collect();
                    let return_type = method
                        .return_ann
                        .as_ref()
                        .map_or(TypeId::VOID, |ann| self.resolve_type(ann));
                    self.scopes.pop();

                    let intrinsic = self.intrinsic_of(&method.decorators, member.span);
                    let mut flags = MemberFlags::default();
                    if method.is_static {
                        flags |= MemberFlags::STATIC;
                    }
                    if method.is_final {
                        flags |= MemberFlags::FINAL;
                    }
                    if method.is_abstract {
                        flags |= MemberFlags::ABSTRACT;
                    }
                    if !method.is_static
                        && !method.is_final
                        && method.visibility == AstVisibility::Public
                    {
                        flags |= MemberFlags::VIRTUAL;
                    }
                    sigs.push(MemberSig {
                        name: method.name.name.clone(),
                        visibility: visibility(method.visibility),
                        flags,
                        node: member.id,
                        kind: MemberSigKind::Method {
                            type_params,
                            scope: method_scope,
                            params,
                            return_type,
                            intrinsic,
                        },
                    });
                }
                MemberKind::Accessor(accessor) => {
                    let kind = match accessor.kind {
                        quill_ast::AccessorKind::Get => {
                            let ty = accessor
                                .return_ann
                                .as_ref()
                                .map_or(TypeId::ERROR, |ann| self.resolve_type(ann));
                            MemberSigKind::Getter { ty }
                        }
                        quill_ast::AccessorKind::Set => {
                            let ty = accessor
                                .param
                                .as_ref()
                                .map_or(TypeId::ERROR, |p| self.param_type(p));
                            MemberSigKind::Setter { ty }
                        }
                    };
                    let mut flags = MemberFlags::VIRTUAL;
                    if accessor.is_static {
                        flags = MemberFlags::STATIC;
                    }
                    sigs.push(MemberSig {
                        name: accessor.name.name.clone(),
                        visibility: visibility(accessor.visibility),
                        flags,
                        node: member.id,
                        kind,
                    });
                }
                MemberKind::Constructor(_) => {
                    if in_mixin {
                        self.error(
                            ErrorCode::ConstructorInMixin,
                            member.span,
                            "mixins may not declare constructors",
                        );
                    }
                }
            }
        }
        sigs
    }

    /// Append substituted mixin members to each applying class, after
    /// every mixin signature of the library is resolved. The class's own
    /// members win name conflicts.
    fn merge_mixin_members(&mut self, decl_ast: &ClassDecl) {
        let decl = self.decl_of(&decl_ast.name.name);
        let info = self.program.decls.class_info(decl).expect("class").clone();
        if info.mixins.is_empty() {
            return;
        }
        let own_names: Vec<String> = info.members.iter().map(|m| m.slot_name()).collect();
        let mut merged: Vec<MemberSig> = Vec::new();
        for &mixin_ty in &info.mixins {
            let quill_types::TypeKind::Mixin(r) = self.program.types.kind(mixin_ty) else {
                continue;
            };
            let Some(mixin_info) = self.program.decls.class_info(r.decl).cloned() else {
                continue;
            };
            let names: Vec<String> = mixin_info
                .type_params
                .iter()
                .map(|p| p.name.clone())
                .collect();
            let subst = TypeSubstitution::for_params(mixin_info.scope, &names, &r.args);
            for member in &mixin_info.members {
                let slot = member.slot_name();
                if own_names.contains(&slot) || merged.iter().any(|m| m.slot_name() == slot) {
                    continue;
                }
                merged.push(self.substitute_member(member, &subst));
            }
        }
        if merged.is_empty() {
            return;
        }
        let info = self.program.decls.class_info_mut(decl).expect("class");
        // Mixin members precede own members: layout mirrors application
        // order.
        merged.extend(info.members.drain(..));
        info.members = merged;
    }

    pub(crate) fn substitute_member(
        &self,
        member: &MemberSig,
        subst: &TypeSubstitution,
    ) -> MemberSig {
        let types = &self.program.types;
        let kind = match &member.kind {
            MemberSigKind::Field { ty } => MemberSigKind::Field {
                ty: instantiate_type(types, *ty, subst),
            },
            MemberSigKind::Getter { ty } => MemberSigKind::Getter {
                ty: instantiate_type(types, *ty, subst),
            },
            MemberSigKind::Setter { ty } => MemberSigKind::Setter {
                ty: instantiate_type(types, *ty, subst),
            },
            MemberSigKind::Method {
                type_params,
                scope,
                params,
                return_type,
                intrinsic,
            } => MemberSigKind::Method {
                type_params: type_params.clone(),
                scope: *scope,
                params: params
                    .iter()
                    .map(|&p| instantiate_type(types, p, subst))
                    .collect(),
                return_type: instantiate_type(types, *return_type, subst),
                intrinsic: intrinsic.clone(),
            },
        };
        MemberSig {
            name: member.name.clone(),
            visibility: member.visibility,
            flags: member.flags,
            node: member.node,
            kind,
        }
    }

    fn resolve_function_signature(&mut self, decl_ast: &FuncDecl) {
        let decl = self.decl_of(&decl_ast.name.name);
        let scope = self
            .program
            .decls
            .function_info(decl)
            .expect("function")
            .scope;
        let type_params = self.enter_type_params(scope, &decl_ast.type_params);
        let params: Vec<TypeId> = decl_ast.params.iter().map(|p| self.param_type(p)).collect();
        let return_type = decl_ast
            .return_ann
            .as_ref()
            .map_or(TypeId::VOID, |ann| self.resolve_type(ann));
        self.scopes.pop();

        let intrinsic = self.intrinsic_of(&decl_ast.decorators, decl_ast.name.span);

        let info = self
            .program
            .decls
            .function_info_mut(decl)
            .expect("function");
        info.type_params = type_params;
        info.params = params;
        info.return_type = return_type;
        info.intrinsic = intrinsic;

        // Functions hoist: the value binding is visible to every body in
        // the library regardless of declaration order.
        let ty = self.function_value_type(decl);
        if !self.scopes.declare_value(
            &decl_ast.name.name,
            ValueEntry {
                binding: Binding::Function(decl),
                ty,
            },
        ) {
            self.error(
                ErrorCode::DuplicateDeclaration,
                decl_ast.name.span,
                format!("duplicate declaration of '{}'", decl_ast.name.name),
            );
        }
    }

    /// The function type a function declaration has in value position.
    pub(crate) fn function_value_type(&self, decl: DeclId) -> TypeId {
        let info = self.program.decls.function_info(decl).expect("function");
        let type_params = info
            .type_params
            .iter()
            .map(|p| TypeParamRef {
                scope: info.scope,
                name: p.name.clone(),
            })
            .collect();
        self.program.types.function(FunctionShape {
            type_params,
            params: info.params.clone(),
            return_type: info.return_type,
        })
    }

    pub(crate) fn param_type(&mut self, param: &Param) -> TypeId {
        match &param.annotation {
            Some(ann) => self.resolve_type(ann),
            None => {
                self.error(
                    ErrorCode::ClosureParameterNeedsAnnotation,
                    param.span,
                    format!("parameter '{}' needs a type annotation", param.name),
                );
                TypeId::ERROR
            }
        }
    }

    /// Validate an `@intrinsic` decorator. Only standard-library
    /// libraries may use it, and only for names the generator knows.
    fn intrinsic_of(&mut self, decorators: &[Decorator], span: Span) -> Option<String> {
        let decorator = decorators.iter().find(|d| d.name == "intrinsic")?;
        if !self.library.is_stdlib {
            self.error(
                ErrorCode::DecoratorNotAllowed,
                span,
                "@intrinsic is only allowed in standard-library code",
            );
            return None;
        }
        let Some(name) = decorator.arg.as_deref() else {
            self.error(
                ErrorCode::UnknownIntrinsic,
                span,
                "@intrinsic requires a name argument",
            );
            return None;
        };
        if !KNOWN_INTRINSICS.contains(&name) {
            self.error(
                ErrorCode::UnknownIntrinsic,
                span,
                format!("unknown intrinsic '{name}'"),
            );
            return None;
        }
        Some(name.to_string())
    }

    /// Types computable without name resolution: literal initializers
    /// and casts. Used for field-type inference ahead of body checking.
    fn simple_expr_type(&mut self, expr: &quill_ast::Expr) -> Option<TypeId> {
        match &expr.kind {
            ExprKind::Int(_) => Some(TypeId::I32),
            ExprKind::Float(_) => Some(TypeId::F64),
            ExprKind::Bool(_) => Some(TypeId::BOOLEAN),
            ExprKind::Str(_) => Some(TypeId::STRING),
            ExprKind::Null => Some(TypeId::NULL),
            ExprKind::Cast { ty, .. } => Some(self.resolve_type(ty)),
            ExprKind::New { class, .. } => Some(self.resolve_type(class)),
            _ => None,
        }
    }

    // =========================================================================
    // Exports
    // =========================================================================

    pub(crate) fn build_exports(&mut self) -> ExportTable {
        let library = self.library;
        let mut table = ExportTable::default();
        for stmt in &library.stmts {
            if !stmt.is_exported() {
                continue;
            }
            let Some(name) = stmt.decl_name() else {
                continue;
            };
            let symbol = match &stmt.kind {
                StmtKind::Let(l) => ExportedSymbol {
                    value: Some(ValueEntry {
                        binding: Binding::Global {
                            library: library.path.clone(),
                            node: stmt.id,
                            mutable: l.mutable,
                        },
                        ty: self
                            .program
                            .sema
                            .type_of(stmt.id)
                            .unwrap_or(TypeId::ERROR),
                    }),
                    type_decl: None,
                },
                StmtKind::Func(_) => {
                    let decl = self.decl_of(name);
                    ExportedSymbol {
                        value: Some(ValueEntry {
                            binding: Binding::Function(decl),
                            ty: self.function_value_type(decl),
                        }),
                        type_decl: None,
                    }
                }
                StmtKind::Class(_) => {
                    let decl = self.decl_of(name);
                    ExportedSymbol {
                        value: Some(ValueEntry {
                            binding: Binding::Class(decl),
                            ty: TypeId::VOID,
                        }),
                        type_decl: Some(decl),
                    }
                }
                StmtKind::Enum(_) => {
                    let decl = self.decl_of(name);
                    ExportedSymbol {
                        value: Some(ValueEntry {
                            binding: Binding::Enum(decl),
                            ty: TypeId::VOID,
                        }),
                        type_decl: Some(decl),
                    }
                }
                StmtKind::Interface(_) | StmtKind::Mixin(_) | StmtKind::Distinct(_) => {
                    let decl = self.decl_of(name);
                    ExportedSymbol {
                        value: None,
                        type_decl: Some(decl),
                    }
                }
                _ => continue,
            };
            table.insert(name.to_string(), symbol);
        }
        table
    }
}

fn visibility(v: AstVisibility) -> Visibility {
    match v {
        AstVisibility::Public => Visibility::Public,
        AstVisibility::Private => Visibility::Private,
    }
}
