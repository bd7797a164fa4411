//! Expression checking.
//!
//! Every visitor returns the expression's type and records it on the
//! node. When a target type is known (argument position, annotated
//! binding, return position) it is threaded in as `expected` and drives
//! contextual typing of literals and closures.

use crate::context::LibraryChecker;
use crate::scopes::ValueEntry;
use quill_ast::{
    BinaryOp, ClosureBody, Expr, ExprKind, NodeId, Param, TypeAnn, UnaryOp,
};
use quill_common::diagnostics::ErrorCode;
use quill_common::span::Span;
use quill_sema::Binding;
use quill_types::{
    ClassFlags, DeclId, DeclKind, FunctionShape, MemberFlags, MemberSig, MemberSigKind, TypeId,
    TypeKind, TypeRef, TypeSubstitution, Visibility, instantiate_type,
};

/// A resolved member access.
pub(crate) struct MemberLookup {
    /// Declaring class/interface.
    pub owner: DeclId,
    /// Index into the owner's member list.
    pub index: u32,
    /// The member signature with the owner's arguments substituted.
    pub sig: MemberSig,
    pub on_interface: bool,
}

impl<'a> LibraryChecker<'a> {
    pub(crate) fn check_expr(&mut self, expr: &Expr, expected: Option<TypeId>) -> TypeId {
        let ty = self.check_expr_inner(expr, expected);
        self.program.sema.record_type(expr.id, ty);
        ty
    }

    fn check_expr_inner(&mut self, expr: &Expr, expected: Option<TypeId>) -> TypeId {
        match &expr.kind {
            ExprKind::Int(value) => self.check_int_literal(*value, expected),
            ExprKind::Float(_) => match expected {
                Some(TypeId::F32) => TypeId::F32,
                _ => TypeId::F64,
            },
            ExprKind::Bool(value) => self.program.types.literal_bool(*value),
            ExprKind::Str(value) => self.program.types.literal_str(value),
            ExprKind::Null => TypeId::NULL,
            ExprKind::This => self.check_this(expr.span),
            ExprKind::Ident(name) => self.check_ident(expr, name),
            ExprKind::Member { object, property } => self.check_member(expr, object, property),
            ExprKind::Index { object, index } => self.check_index(expr, object, index),
            ExprKind::Call {
                callee,
                type_args,
                args,
            } => self.check_call(expr, callee, type_args, args),
            ExprKind::New { class, args } => self.check_new(expr, class, args),
            ExprKind::Binary { op, lhs, rhs } => self.check_binary(expr, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand),
            ExprKind::Assign { target, value } => self.check_assign(target, value),
            ExprKind::Closure {
                params,
                return_ann,
                body,
            } => self.check_closure(expr, params, return_ann.as_deref(), body, expected),
            ExprKind::FixedArray(elems) => self.check_fixed_array(expr.span, elems, expected),
            ExprKind::Tuple(elems) => self.check_tuple(elems, expected),
            ExprKind::Record(fields) => self.check_record(fields, expected),
            ExprKind::Match { scrutinee, arms } => self.check_match(expr, scrutinee, arms, expected),
            ExprKind::Cast { operand, ty } => self.check_cast(expr.span, operand, ty),
            ExprKind::Is { operand, ty } => self.check_is(operand, ty),
            ExprKind::Template { tag, quasis, exprs } => {
                self.check_template(expr.span, tag.as_deref(), quasis, exprs)
            }
        }
    }

    // =========================================================================
    // Leaves
    // =========================================================================

    fn check_int_literal(&mut self, value: i64, expected: Option<TypeId>) -> TypeId {
        // The parameter/annotation type drives contextual typing of
        // numeric literals; otherwise they keep their literal type.
        match expected {
            Some(TypeId::I64) => TypeId::I64,
            Some(TypeId::U32) if value >= 0 => TypeId::U32,
            Some(TypeId::F64) => TypeId::F64,
            Some(TypeId::F32) => TypeId::F32,
            _ => self.program.types.literal_int(value),
        }
    }

    fn check_this(&mut self, span: Span) -> TypeId {
        match self.this_types.last() {
            Some(&ty) if !self.in_static => ty,
            Some(_) => {
                self.error(
                    ErrorCode::InvalidThis,
                    span,
                    "'this' is not available in a static member",
                );
                TypeId::ERROR
            }
            None => {
                self.error(
                    ErrorCode::InvalidThis,
                    span,
                    "'this' is only available inside a class body",
                );
                TypeId::ERROR
            }
        }
    }

    fn check_ident(&mut self, expr: &Expr, name: &str) -> TypeId {
        if let Some(entry) = self.lookup_value_with_prelude(name) {
            self.program.sema.bind(expr.id, entry.binding.clone());
            // Field-initialization ordering applies to implicit field
            // reads too.
            self.check_field_init_order(name, expr.span, &entry.binding);
            let declared = match &entry.binding {
                Binding::Local { node, .. } | Binding::Global { node, .. } => {
                    self.narrowed(*node).unwrap_or(entry.ty)
                }
                _ => entry.ty,
            };
            return declared;
        }

        // Inside a class body, bare member names resolve against `this`.
        if let Some(class) = self.enclosing_class {
            let this_ty = self.identity_class_type(class);
            if let TypeKind::Class(r) = self.program.types.kind(this_ty) {
                if let Some(lookup) = self.class_member(&r, name) {
                    return self.bind_member(expr.id, expr.span, &lookup);
                }
            }
        }

        self.error(
            ErrorCode::SymbolNotFound,
            expr.span,
            format!("cannot find name '{name}'"),
        );
        TypeId::ERROR
    }

    fn check_field_init_order(&mut self, name: &str, span: Span, binding: &Binding) {
        let Some(field_init) = &self.field_init else {
            return;
        };
        let is_field_read = matches!(binding, Binding::Field { .. })
            || field_init.own_fields.contains(name);
        if is_field_read
            && field_init.own_fields.contains(name)
            && !field_init.initialized.contains(name)
        {
            self.error(
                ErrorCode::FieldAccessBeforeInitialization,
                span,
                format!("cannot access field '{name}' before initialization"),
            );
        }
    }

    // =========================================================================
    // Member access
    // =========================================================================

    /// Find a member by name on a class specialization, walking the
    /// inheritance chain. The returned signature is substituted into the
    /// specialization's arguments.
    pub(crate) fn class_member(&self, class: &TypeRef, name: &str) -> Option<MemberLookup> {
        let mut current = class.clone();
        let mut hops = 0u32;
        loop {
            hops += 1;
            if hops > 64 {
                return None;
            }
            let info = self.program.decls.class_info(current.decl)?;
            let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
            let subst = TypeSubstitution::for_params(info.scope, &names, &current.args);
            if let Some((index, member)) = info
                .members
                .iter()
                .enumerate()
                .find(|(_, m)| m.name == name && !m.flags.contains(MemberFlags::STATIC))
            {
                return Some(MemberLookup {
                    owner: current.decl,
                    index: index as u32,
                    sig: self.substitute_member(member, &subst),
                    on_interface: false,
                });
            }
            let super_ty = quill_types::relate::superclass_of(
                &self.program.types,
                &self.program.decls,
                &current,
            )?;
            match self.program.types.kind(super_ty) {
                TypeKind::Class(r) => current = r,
                _ => return None,
            }
        }
    }

    /// Find a static member on a class declaration.
    fn static_member(&self, decl: DeclId, name: &str) -> Option<MemberLookup> {
        let info = self.program.decls.class_info(decl)?;
        let (index, member) = info
            .members
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == name && m.flags.contains(MemberFlags::STATIC))?;
        Some(MemberLookup {
            owner: decl,
            index: index as u32,
            sig: member.clone(),
            on_interface: false,
        })
    }

    /// Find a method on an interface specialization (its own members or
    /// an extended interface's).
    fn interface_member(&self, iface: &TypeRef, name: &str) -> Option<MemberLookup> {
        let info = self.program.decls.interface_info(iface.decl)?;
        let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(info.scope, &names, &iface.args);
        if let Some((index, member)) = info
            .members
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == name)
        {
            return Some(MemberLookup {
                owner: iface.decl,
                index: index as u32,
                sig: self.substitute_member(member, &subst),
                on_interface: true,
            });
        }
        for &parent in &info.extends {
            let parent = instantiate_type(&self.program.types, parent, &subst);
            if let TypeKind::Interface(r) = self.program.types.kind(parent) {
                if let Some(found) = self.interface_member(&r, name) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Find an extension-class method for an arbitrary inner type.
    fn extension_member(&self, inner: TypeId, name: &str) -> Option<MemberLookup> {
        for (decl, data) in self.program.decls.iter() {
            let DeclKind::Class = data.kind else {
                continue;
            };
            let Some(info) = self.program.decls.class_info(decl) else {
                continue;
            };
            if !info.flags.contains(ClassFlags::EXTENSION) || info.extension_on != Some(inner) {
                continue;
            }
            if let Some((index, member)) = info
                .members
                .iter()
                .enumerate()
                .find(|(_, m)| m.name == name)
            {
                return Some(MemberLookup {
                    owner: decl,
                    index: index as u32,
                    sig: member.clone(),
                    on_interface: false,
                });
            }
        }
        None
    }

    /// Record the binding for a member access and produce its type.
    fn bind_member(&mut self, node: NodeId, span: Span, lookup: &MemberLookup) -> TypeId {
        // Field-initialization order: an initializer may read fields
        // declared earlier in the same class (or any superclass field).
        if let Some(fi) = &self.field_init {
            if fi.class == lookup.owner
                && matches!(lookup.sig.kind, MemberSigKind::Field { .. })
                && fi.own_fields.contains(&lookup.sig.name)
                && !fi.initialized.contains(&lookup.sig.name)
            {
                let name = lookup.sig.name.clone();
                self.error(
                    ErrorCode::FieldAccessBeforeInitialization,
                    span,
                    format!("cannot access field '{name}' before initialization"),
                );
            }
        }
        // Private members are visible inside the declaring class only.
        if lookup.sig.visibility == Visibility::Private
            && self.enclosing_class != Some(lookup.owner)
        {
            self.error(
                ErrorCode::PropertyNotFound,
                span,
                format!("member '{}' is private", lookup.sig.name),
            );
            return TypeId::ERROR;
        }
        let binding = if lookup.on_interface {
            Binding::InterfaceMethod {
                iface: lookup.owner,
                member: lookup.index,
            }
        } else {
            match &lookup.sig.kind {
                MemberSigKind::Field { .. } => Binding::Field {
                    class: lookup.owner,
                    member: lookup.index,
                },
                MemberSigKind::Method { .. } => Binding::Method {
                    class: lookup.owner,
                    member: lookup.index,
                },
                MemberSigKind::Getter { .. } | MemberSigKind::Setter { .. } => Binding::Accessor {
                    class: lookup.owner,
                    member: lookup.index,
                },
            }
        };
        self.program.sema.bind(node, binding);
        match &lookup.sig.kind {
            MemberSigKind::Field { ty }
            | MemberSigKind::Getter { ty }
            | MemberSigKind::Setter { ty } => *ty,
            MemberSigKind::Method {
                type_params,
                scope,
                params,
                return_type,
                ..
            } => self.program.types.function(FunctionShape {
                type_params: type_params
                    .iter()
                    .map(|p| quill_types::TypeParamRef {
                        scope: *scope,
                        name: p.name.clone(),
                    })
                    .collect(),
                params: params.clone(),
                return_type: *return_type,
            }),
        }
    }

    fn check_member(&mut self, expr: &Expr, object: &Expr, property: &str) -> TypeId {
        // Static access and enum members: the object is a bare class or
        // enum name.
        if let ExprKind::Ident(name) = &object.kind {
            if let Some(entry) = self.lookup_value_with_prelude(name) {
                match entry.binding {
                    Binding::Class(decl) => {
                        self.program.sema.bind(object.id, Binding::Class(decl));
                        self.program.sema.record_type(object.id, TypeId::VOID);
                        if let Some(lookup) = self.static_member(decl, property) {
                            return self.bind_member(expr.id, expr.span, &lookup);
                        }
                        self.error(
                            ErrorCode::PropertyNotFound,
                            expr.span,
                            format!("class '{name}' has no static member '{property}'"),
                        );
                        return TypeId::ERROR;
                    }
                    Binding::Enum(decl) => {
                        self.program.sema.bind(object.id, Binding::Enum(decl));
                        let ty = self.program.types.enum_type(decl);
                        self.program.sema.record_type(object.id, ty);
                        let members = &self
                            .program
                            .decls
                            .enum_info(decl)
                            .expect("enum info")
                            .members;
                        if let Some(index) = members.iter().position(|m| m == property) {
                            self.program.sema.bind(
                                expr.id,
                                Binding::EnumMember {
                                    decl,
                                    index: index as u32,
                                },
                            );
                            return ty;
                        }
                        self.error(
                            ErrorCode::PropertyNotFound,
                            expr.span,
                            format!("enum '{name}' has no member '{property}'"),
                        );
                        return TypeId::ERROR;
                    }
                    _ => {}
                }
            }
        }

        let object_ty = self.check_expr(object, None);
        if object_ty == TypeId::ERROR {
            return TypeId::ERROR;
        }
        self.member_on_type(expr, object_ty, property)
    }

    fn member_on_type(&mut self, expr: &Expr, object_ty: TypeId, property: &str) -> TypeId {
        match self.program.types.kind(object_ty) {
            TypeKind::Class(r) => {
                if let Some(lookup) = self.class_member(&r, property) {
                    return self.bind_member(expr.id, expr.span, &lookup);
                }
            }
            TypeKind::This(decl) => {
                let identity = self.identity_class_type(decl);
                if let TypeKind::Class(r) = self.program.types.kind(identity) {
                    if let Some(lookup) = self.class_member(&r, property) {
                        return self.bind_member(expr.id, expr.span, &lookup);
                    }
                }
            }
            TypeKind::Mixin(r) => {
                // Inside mixin bodies: own members, then the `on`
                // requirement's members.
                let info = self.program.decls.class_info(r.decl);
                if let Some(info) = info {
                    let names: Vec<String> =
                        info.type_params.iter().map(|p| p.name.clone()).collect();
                    let subst = TypeSubstitution::for_params(info.scope, &names, &r.args);
                    if let Some((index, member)) = info
                        .members
                        .iter()
                        .enumerate()
                        .find(|(_, m)| m.name == property)
                    {
                        let lookup = MemberLookup {
                            owner: r.decl,
                            index: index as u32,
                            sig: self.substitute_member(member, &subst),
                            on_interface: false,
                        };
                        return self.bind_member(expr.id, expr.span, &lookup);
                    }
                    if let Some(on) = info.on {
                        let on = instantiate_type(&self.program.types, on, &subst);
                        if let TypeKind::Class(on_ref) = self.program.types.kind(on) {
                            if let Some(lookup) = self.class_member(&on_ref, property) {
                                return self.bind_member(expr.id, expr.span, &lookup);
                            }
                        }
                    }
                }
            }
            TypeKind::Interface(r) => {
                if let Some(lookup) = self.interface_member(&r, property) {
                    return self.bind_member(expr.id, expr.span, &lookup);
                }
            }
            TypeKind::Record(fields) => {
                if let Some((_, field_ty)) = fields.iter().find(|(name, _)| name == property) {
                    return *field_ty;
                }
            }
            _ => {}
        }

        // Extension classes add members to otherwise closed types.
        if let Some(lookup) = self.extension_member(object_ty, property) {
            return self.bind_member(expr.id, expr.span, &lookup);
        }

        let shown = self.fmt_type(object_ty);
        self.error(
            ErrorCode::PropertyNotFound,
            expr.span,
            format!("property '{property}' does not exist on type '{shown}'"),
        );
        TypeId::ERROR
    }

    // =========================================================================
    // Indexing
    // =========================================================================

    fn check_index(&mut self, expr: &Expr, object: &Expr, index: &Expr) -> TypeId {
        let object_ty = self.check_expr(object, None);
        match self.program.types.kind(object_ty) {
            TypeKind::FixedArray(elem) | TypeKind::Array(elem) => {
                let index_ty = self.check_expr(index, Some(TypeId::I32));
                if !self.assignable(index_ty, TypeId::I32) {
                    let shown = self.fmt_type(index_ty);
                    self.error(
                        ErrorCode::TypeMismatch,
                        index.span,
                        format!("array index must be 'i32', found '{shown}'"),
                    );
                }
                elem
            }
            TypeKind::Tuple(elems) => {
                self.check_expr(index, Some(TypeId::I32));
                match &index.kind {
                    ExprKind::Int(i) if (*i as usize) < elems.len() && *i >= 0 => {
                        elems[*i as usize]
                    }
                    ExprKind::Int(_) => {
                        self.error(
                            ErrorCode::TypeMismatch,
                            index.span,
                            "tuple index is out of bounds",
                        );
                        TypeId::ERROR
                    }
                    _ => {
                        self.error(
                            ErrorCode::TypeMismatch,
                            index.span,
                            "tuple indexing requires a literal index",
                        );
                        TypeId::ERROR
                    }
                }
            }
            TypeKind::Error => TypeId::ERROR,
            _ => {
                let shown = self.fmt_type(object_ty);
                self.error(
                    ErrorCode::TypeMismatch,
                    expr.span,
                    format!("type '{shown}' cannot be indexed"),
                );
                TypeId::ERROR
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn check_call(
        &mut self,
        expr: &Expr,
        callee: &Expr,
        type_args: &[TypeAnn],
        args: &[Expr],
    ) -> TypeId {
        let explicit: Vec<TypeId> = type_args.iter().map(|a| self.resolve_type(a)).collect();

        // Direct function call.
        if let ExprKind::Ident(name) = &callee.kind {
            if let Some(entry) = self.lookup_value_with_prelude(name) {
                if let Binding::Function(decl) = entry.binding {
                    self.program.sema.bind(callee.id, Binding::Function(decl));
                    self.program.sema.record_type(callee.id, entry.ty);
                    let info = self
                        .program
                        .decls
                        .function_info(decl)
                        .expect("function info")
                        .clone();
                    return self.check_generic_call(
                        expr,
                        &info.type_params,
                        info.scope,
                        &info.params,
                        info.return_type,
                        &explicit,
                        args,
                    );
                }
            }
        }

        // Method call through a member expression.
        if let ExprKind::Member { object, property } = &callee.kind {
            let callee_ty = self.check_member(callee, object, property);
            self.program.sema.record_type(callee.id, callee_ty);
            if callee_ty == TypeId::ERROR {
                for arg in args {
                    self.check_expr(arg, None);
                }
                return TypeId::ERROR;
            }
            if let Some(binding) = self.program.sema.binding(callee.id).cloned() {
                match binding {
                    Binding::Method { class, member }
                    | Binding::InterfaceMethod {
                        iface: class,
                        member,
                    } => {
                        let sig = self.member_call_signature(object, class, member);
                        if let Some((type_params, scope, params, ret)) = sig {
                            return self.check_generic_call(
                                expr,
                                &type_params,
                                scope,
                                &params,
                                ret,
                                &explicit,
                                args,
                            );
                        }
                    }
                    _ => {}
                }
            }
            return self.check_value_call(expr, callee_ty, callee.span, args);
        }

        // Anything else must evaluate to a function value.
        let callee_ty = self.check_expr(callee, None);
        self.check_value_call(expr, callee_ty, callee.span, args)
    }

    /// The substituted signature of a method/interface-method call,
    /// taking the object's static specialization into account.
    fn member_call_signature(
        &mut self,
        object: &Expr,
        owner: DeclId,
        member: u32,
    ) -> Option<(Vec<quill_types::TypeParamInfo>, u32, Vec<TypeId>, TypeId)> {
        let object_ty = self.program.sema.type_of(object.id)?;
        let lookup = match self.program.types.kind(object_ty) {
            TypeKind::Class(r) => self.class_member_sig_at(&r, owner, member),
            TypeKind::This(decl) => {
                let identity = self.identity_class_type(decl);
                match self.program.types.kind(identity) {
                    TypeKind::Class(r) => self.class_member_sig_at(&r, owner, member),
                    _ => None,
                }
            }
            TypeKind::Interface(r) => {
                let info = self.program.decls.interface_info(r.decl)?;
                let names: Vec<String> =
                    info.type_params.iter().map(|p| p.name.clone()).collect();
                let subst = TypeSubstitution::for_params(info.scope, &names, &r.args);
                let sig = if r.decl == owner {
                    info.members.get(member as usize)?.clone()
                } else {
                    self.program
                        .decls
                        .interface_info(owner)?
                        .members
                        .get(member as usize)?
                        .clone()
                };
                Some(self.substitute_member(&sig, &subst))
            }
            TypeKind::Mixin(_) => {
                let sig = self
                    .program
                    .decls
                    .class_info(owner)?
                    .members
                    .get(member as usize)?
                    .clone();
                Some(sig)
            }
            _ => {
                // Extension or static method: unsubstituted signature.
                let sig = self
                    .program
                    .decls
                    .class_info(owner)?
                    .members
                    .get(member as usize)?
                    .clone();
                Some(sig)
            }
        }?;
        match lookup.kind {
            MemberSigKind::Method {
                type_params,
                scope,
                params,
                return_type,
                ..
            } => Some((type_params, scope, params, return_type)),
            _ => None,
        }
    }

    /// Walk up from the object's specialization to `owner`, composing
    /// substitutions, and return the member signature substituted for
    /// the concrete receiver.
    fn class_member_sig_at(&self, start: &TypeRef, owner: DeclId, member: u32) -> Option<MemberSig> {
        let mut current = start.clone();
        let mut hops = 0u32;
        loop {
            hops += 1;
            if hops > 64 {
                return None;
            }
            let info = self.program.decls.class_info(current.decl)?;
            if current.decl == owner {
                let names: Vec<String> =
                    info.type_params.iter().map(|p| p.name.clone()).collect();
                let subst = TypeSubstitution::for_params(info.scope, &names, &current.args);
                let sig = info.members.get(member as usize)?;
                return Some(self.substitute_member(sig, &subst));
            }
            let super_ty = quill_types::relate::superclass_of(
                &self.program.types,
                &self.program.decls,
                &current,
            )?;
            match self.program.types.kind(super_ty) {
                TypeKind::Class(r) => current = r,
                _ => return None,
            }
        }
    }

    /// Check a call against an explicit signature, inferring or
    /// verifying type arguments.
    fn check_generic_call(
        &mut self,
        expr: &Expr,
        type_params: &[quill_types::TypeParamInfo],
        scope: u32,
        params: &[TypeId],
        return_type: TypeId,
        explicit: &[TypeId],
        args: &[Expr],
    ) -> TypeId {
        if args.len() != params.len() {
            self.error(
                ErrorCode::ArgumentCountMismatch,
                expr.span,
                format!("expected {} argument(s), got {}", params.len(), args.len()),
            );
            for arg in args {
                self.check_expr(arg, None);
            }
            return TypeId::ERROR;
        }

        if type_params.is_empty() {
            for (arg, &param) in args.iter().zip(params) {
                let arg_ty = self.check_expr(arg, Some(param));
                self.check_arg(arg, arg_ty, param);
            }
            return return_type;
        }

        // Generic call: contextually type arguments whose parameter does
        // not mention a type parameter, infer the rest.
        let mut arg_types = Vec::with_capacity(args.len());
        for (arg, &param) in args.iter().zip(params) {
            let contextual = if self.mentions_scope(param, scope) {
                None
            } else {
                Some(param)
            };
            arg_types.push(self.check_expr(arg, contextual));
        }

        let mut subst = if explicit.is_empty() {
            self.infer_type_args(scope, params, &arg_types)
        } else {
            let names: Vec<String> = type_params.iter().map(|p| p.name.clone()).collect();
            TypeSubstitution::for_params(scope, &names, explicit)
        };

        // Any parameter still uninferred falls back to its default or
        // errors.
        let mut final_args = Vec::with_capacity(type_params.len());
        for p in type_params {
            let param_ref = quill_types::TypeParamRef {
                scope,
                name: p.name.clone(),
            };
            match subst.get(&param_ref) {
                Some(ty) => final_args.push(ty),
                None => match p.default {
                    Some(d) => {
                        let d = instantiate_type(&self.program.types, d, &subst);
                        subst.insert(param_ref, d);
                        final_args.push(d);
                    }
                    None => {
                        self.error(
                            ErrorCode::ArgumentCountMismatch,
                            expr.span,
                            format!("cannot infer type argument '{}'", p.name),
                        );
                        subst.insert(param_ref, TypeId::ERROR);
                        final_args.push(TypeId::ERROR);
                    }
                },
            }
        }

        // Constraint verification on the inferred arguments.
        for (p, &arg) in type_params.iter().zip(&final_args) {
            if let Some(constraint) = p.constraint {
                let constraint = instantiate_type(&self.program.types, constraint, &subst);
                if !self.assignable(arg, constraint) {
                    let found = self.fmt_type(arg);
                    let wanted = self.fmt_type(constraint);
                    self.error(
                        ErrorCode::ConstraintViolation,
                        expr.span,
                        format!("type '{found}' does not satisfy the constraint '{wanted}'"),
                    );
                }
            }
        }

        for (arg, (&param, &arg_ty)) in args.iter().zip(params.iter().zip(&arg_types)) {
            let param = instantiate_type(&self.program.types, param, &subst);
            self.check_arg(arg, arg_ty, param);
        }

        self.program.sema.record_call_args(expr.id, final_args);
        instantiate_type(&self.program.types, return_type, &subst)
    }

    fn check_arg(&mut self, arg: &Expr, arg_ty: TypeId, param: TypeId) {
        if !self.assignable(arg_ty, param) {
            let found = self.fmt_type(arg_ty);
            let wanted = self.fmt_type(param);
            self.error(
                ErrorCode::TypeMismatch,
                arg.span,
                format!("argument of type '{found}' is not assignable to parameter of type '{wanted}'"),
            );
        }
    }

    /// Call through a function-typed value.
    fn check_value_call(
        &mut self,
        expr: &Expr,
        callee_ty: TypeId,
        callee_span: Span,
        args: &[Expr],
    ) -> TypeId {
        match self.program.types.kind(callee_ty) {
            TypeKind::Function(shape) => self.check_generic_call(
                expr,
                &[],
                0,
                &shape.params,
                shape.return_type,
                &[],
                args,
            ),
            TypeKind::Error => {
                for arg in args {
                    self.check_expr(arg, None);
                }
                TypeId::ERROR
            }
            _ => {
                let shown = self.fmt_type(callee_ty);
                self.error(
                    ErrorCode::NotCallable,
                    callee_span,
                    format!("type '{shown}' is not callable"),
                );
                for arg in args {
                    self.check_expr(arg, None);
                }
                TypeId::ERROR
            }
        }
    }

    fn check_new(&mut self, expr: &Expr, class: &TypeAnn, args: &[Expr]) -> TypeId {
        let class_ty = self.resolve_type(class);
        let TypeKind::Class(r) = self.program.types.kind(class_ty) else {
            if class_ty != TypeId::ERROR {
                self.error(
                    ErrorCode::WrongDeclarationKind,
                    class.span,
                    "'new' requires a class type",
                );
            }
            for arg in args {
                self.check_expr(arg, None);
            }
            return TypeId::ERROR;
        };

        let info = self
            .program
            .decls
            .class_info(r.decl)
            .expect("class info")
            .clone();
        if info.flags.contains(ClassFlags::ABSTRACT) {
            let name = self.program.decls.get(r.decl).name.clone();
            self.error(
                ErrorCode::AbstractInstantiation,
                expr.span,
                format!("cannot instantiate abstract class '{name}'"),
            );
        }
        self.program.sema.bind(expr.id, Binding::Constructor(r.decl));

        let names: Vec<String> = info.type_params.iter().map(|p| p.name.clone()).collect();
        let subst = TypeSubstitution::for_params(info.scope, &names, &r.args);
        let ctor_params: Vec<TypeId> = info
            .ctor
            .as_ref()
            .map(|c| {
                c.params
                    .iter()
                    .map(|&p| instantiate_type(&self.program.types, p, &subst))
                    .collect()
            })
            .unwrap_or_default();

        if args.len() != ctor_params.len() {
            self.error(
                ErrorCode::ArgumentCountMismatch,
                expr.span,
                format!(
                    "constructor takes {} argument(s), got {}",
                    ctor_params.len(),
                    args.len()
                ),
            );
            for arg in args {
                self.check_expr(arg, None);
            }
        } else {
            for (arg, &param) in args.iter().zip(&ctor_params) {
                let arg_ty = self.check_expr(arg, Some(param));
                self.check_arg(arg, arg_ty, param);
            }
        }
        class_ty
    }

    /// Whether a type mentions any parameter of the given scope.
    fn mentions_scope(&self, ty: TypeId, scope: u32) -> bool {
        match self.program.types.kind(ty) {
            TypeKind::TypeParam(p) => p.scope == scope,
            TypeKind::FixedArray(e) | TypeKind::Array(e) => self.mentions_scope(e, scope),
            TypeKind::Tuple(es) => es.iter().any(|&e| self.mentions_scope(e, scope)),
            TypeKind::Record(fs) => fs.iter().any(|(_, f)| self.mentions_scope(*f, scope)),
            TypeKind::Union(ms) => ms.iter().any(|&m| self.mentions_scope(m, scope)),
            TypeKind::Function(s) => {
                s.params.iter().any(|&p| self.mentions_scope(p, scope))
                    || self.mentions_scope(s.return_type, scope)
            }
            TypeKind::Class(r) | TypeKind::Interface(r) | TypeKind::Mixin(r) => {
                r.args.iter().any(|&a| self.mentions_scope(a, scope))
            }
            TypeKind::Distinct { inner, .. } => self.mentions_scope(inner, scope),
            _ => false,
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn check_binary(&mut self, expr: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> TypeId {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                self.check_bool_operand(lhs);
                // The right operand is evaluated conditionally; its
                // narrowing context includes the left operand's facts.
                let (then_facts, else_facts) = self.condition_facts(lhs);
                let facts = if op == BinaryOp::And {
                    then_facts
                } else {
                    else_facts
                };
                self.push_narrow(facts);
                self.check_bool_operand(rhs);
                self.pop_narrow();
                TypeId::BOOLEAN
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let lhs_ty = self.check_expr(lhs, None);
                let rhs_ty = self.check_expr(rhs, None);
                if lhs_ty != TypeId::ERROR
                    && rhs_ty != TypeId::ERROR
                    && !self.assignable(lhs_ty, rhs_ty)
                    && !self.assignable(rhs_ty, lhs_ty)
                {
                    let l = self.fmt_type(lhs_ty);
                    let r = self.fmt_type(rhs_ty);
                    self.error(
                        ErrorCode::TypeMismatch,
                        expr.span,
                        format!("types '{l}' and '{r}' have no overlap"),
                    );
                }
                TypeId::BOOLEAN
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let lhs_ty = self.check_expr(lhs, None);
                let rhs_ty = self.check_expr(rhs, Some(self.program.types.widened(lhs_ty)));
                self.require_same_numeric(expr.span, lhs_ty, rhs_ty);
                TypeId::BOOLEAN
            }
            BinaryOp::Add => {
                let lhs_ty = self.check_expr(lhs, None);
                let lhs_wide = self.program.types.widened(lhs_ty);
                if lhs_wide == TypeId::STRING {
                    let rhs_ty = self.check_expr(rhs, Some(TypeId::STRING));
                    if !self.assignable(rhs_ty, TypeId::STRING) {
                        let shown = self.fmt_type(rhs_ty);
                        self.error(
                            ErrorCode::TypeMismatch,
                            rhs.span,
                            format!("cannot concatenate 'string' with '{shown}'"),
                        );
                    }
                    return TypeId::STRING;
                }
                let rhs_ty = self.check_expr(rhs, Some(lhs_wide));
                self.numeric_result(expr.span, lhs_ty, rhs_ty)
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let lhs_ty = self.check_expr(lhs, None);
                let lhs_wide = self.program.types.widened(lhs_ty);
                let rhs_ty = self.check_expr(rhs, Some(lhs_wide));
                self.numeric_result(expr.span, lhs_ty, rhs_ty)
            }
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr => {
                let lhs_ty = self.check_expr(lhs, None);
                let lhs_wide = self.program.types.widened(lhs_ty);
                let rhs_ty = self.check_expr(rhs, Some(lhs_wide));
                let result = self.numeric_result(expr.span, lhs_ty, rhs_ty);
                if !matches!(result, TypeId::I32 | TypeId::U32 | TypeId::I64 | TypeId::ERROR) {
                    let shown = self.fmt_type(result);
                    self.error(
                        ErrorCode::TypeMismatch,
                        expr.span,
                        format!("bitwise operators require integer operands, found '{shown}'"),
                    );
                    return TypeId::ERROR;
                }
                result
            }
        }
    }

    fn check_bool_operand(&mut self, operand: &Expr) {
        let ty = self.check_expr(operand, Some(TypeId::BOOLEAN));
        if !self.assignable(ty, TypeId::BOOLEAN) {
            let shown = self.fmt_type(ty);
            self.error(
                ErrorCode::TypeMismatch,
                operand.span,
                format!("expected 'boolean', found '{shown}'"),
            );
        }
    }

    fn numeric_result(&mut self, span: Span, lhs: TypeId, rhs: TypeId) -> TypeId {
        if lhs == TypeId::ERROR || rhs == TypeId::ERROR {
            return TypeId::ERROR;
        }
        let l = self.program.types.widened(lhs);
        let r = self.program.types.widened(rhs);
        let numeric = [TypeId::I32, TypeId::U32, TypeId::I64, TypeId::F32, TypeId::F64];
        if l == r && numeric.contains(&l) {
            return l;
        }
        let ls = self.fmt_type(lhs);
        let rs = self.fmt_type(rhs);
        self.error(
            ErrorCode::TypeMismatch,
            span,
            format!("operator requires matching numeric operands, found '{ls}' and '{rs}'"),
        );
        TypeId::ERROR
    }

    fn require_same_numeric(&mut self, span: Span, lhs: TypeId, rhs: TypeId) {
        if lhs == TypeId::ERROR || rhs == TypeId::ERROR {
            return;
        }
        self.numeric_result(span, lhs, rhs);
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr) -> TypeId {
        match op {
            UnaryOp::Neg => {
                let ty = self.check_expr(operand, None);
                let wide = self.program.types.widened(ty);
                match wide {
                    TypeId::I32 | TypeId::I64 | TypeId::F32 | TypeId::F64 => wide,
                    TypeId::ERROR => TypeId::ERROR,
                    _ => {
                        let shown = self.fmt_type(ty);
                        self.error(
                            ErrorCode::TypeMismatch,
                            operand.span,
                            format!("cannot negate a value of type '{shown}'"),
                        );
                        TypeId::ERROR
                    }
                }
            }
            UnaryOp::Not => {
                self.check_bool_operand(operand);
                TypeId::BOOLEAN
            }
        }
    }

    fn check_assign(&mut self, target: &Expr, value: &Expr) -> TypeId {
        let target_ty = match &target.kind {
            ExprKind::Ident(name) => {
                let ty = self.check_expr(target, None);
                if let Some(binding) = self.program.sema.binding(target.id).cloned() {
                    match binding {
                        Binding::Local { node, mutable } | Binding::Global { node, mutable, .. } => {
                            if !mutable {
                                self.error(
                                    ErrorCode::TypeMismatch,
                                    target.span,
                                    format!("cannot assign to immutable binding '{name}'"),
                                );
                            }
                            self.invalidate_narrowing(node);
                            // Assignment checks against the declared
                            // (unnarrowed) type.
                            self.program.sema.type_of(node).unwrap_or(ty)
                        }
                        Binding::Field { .. } | Binding::Accessor { .. } => ty,
                        _ => {
                            self.error(
                                ErrorCode::TypeMismatch,
                                target.span,
                                "this expression is not assignable",
                            );
                            TypeId::ERROR
                        }
                    }
                } else {
                    TypeId::ERROR
                }
            }
            ExprKind::Member { .. } => {
                let ty = self.check_expr(target, None);
                match self.program.sema.binding(target.id) {
                    Some(Binding::Field { .. } | Binding::Accessor { .. }) => ty,
                    Some(_) => {
                        self.error(
                            ErrorCode::TypeMismatch,
                            target.span,
                            "only fields and accessors are assignable",
                        );
                        TypeId::ERROR
                    }
                    None => TypeId::ERROR,
                }
            }
            ExprKind::Index { .. } => self.check_expr(target, None),
            _ => {
                self.error(
                    ErrorCode::TypeMismatch,
                    target.span,
                    "this expression is not assignable",
                );
                self.check_expr(target, None);
                TypeId::ERROR
            }
        };

        let value_ty = self.check_expr(value, Some(target_ty).filter(|&t| t != TypeId::ERROR));
        if target_ty != TypeId::ERROR && !self.assignable(value_ty, target_ty) {
            let found = self.fmt_type(value_ty);
            let wanted = self.fmt_type(target_ty);
            self.error(
                ErrorCode::TypeMismatch,
                value.span,
                format!("type '{found}' is not assignable to type '{wanted}'"),
            );
        }
        TypeId::VOID
    }

    // =========================================================================
    // Closures
    // =========================================================================

    fn check_closure(
        &mut self,
        expr: &Expr,
        params: &[Param],
        return_ann: Option<&TypeAnn>,
        body: &ClosureBody,
        expected: Option<TypeId>,
    ) -> TypeId {
        let expected_shape = expected.and_then(|e| match self.program.types.kind(e) {
            TypeKind::Function(shape) => Some(shape),
            _ => None,
        });

        let mut param_types = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let ty = match &param.annotation {
                Some(ann) => self.resolve_type(ann),
                None => match expected_shape.as_ref().and_then(|s| s.params.get(i)) {
                    // Contextual parameter types from the target.
                    Some(&ty) => ty,
                    None => {
                        self.error(
                            ErrorCode::ClosureParameterNeedsAnnotation,
                            param.span,
                            format!(
                                "parameter '{}' needs a type annotation when no contextual type is available",
                                param.name
                            ),
                        );
                        TypeId::ERROR
                    }
                },
            };
            param_types.push(ty);
        }

        let declared_ret = return_ann.map(|ann| self.resolve_type(ann));
        let contextual_ret = expected_shape.as_ref().map(|s| s.return_type);

        self.scopes.push();
        for (param, &ty) in params.iter().zip(&param_types) {
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

        let return_type = match body {
            ClosureBody::Expr(body_expr) => {
                let target = declared_ret.or(contextual_ret);
                let body_ty = self.check_expr(body_expr, target);
                let ret = target.unwrap_or_else(|| self.program.types.widened(body_ty));
                if !self.assignable(body_ty, ret) {
                    let found = self.fmt_type(body_ty);
                    let wanted = self.fmt_type(ret);
                    self.error(
                        ErrorCode::TypeMismatch,
                        body_expr.span,
                        format!("type '{found}' is not assignable to return type '{wanted}'"),
                    );
                }
                ret
            }
            ClosureBody::Block(block) => {
                let ret = declared_ret.or(contextual_ret).unwrap_or(TypeId::VOID);
                self.return_types.push(ret);
                self.check_block_stmts(block);
                self.return_types.pop();
                if ret != TypeId::VOID && ret != TypeId::ERROR && !self.block_returns(block) {
                    self.error(
                        ErrorCode::MissingReturn,
                        expr.span,
                        "closure does not return on every path",
                    );
                }
                ret
            }
        };
        self.scopes.pop();

        self.program.types.function(FunctionShape {
            type_params: Vec::new(),
            params: param_types,
            return_type,
        })
    }

    // =========================================================================
    // Composite literals
    // =========================================================================

    fn check_fixed_array(
        &mut self,
        span: Span,
        elems: &[Expr],
        expected: Option<TypeId>,
    ) -> TypeId {
        let expected_elem = expected.and_then(|e| match self.program.types.kind(e) {
            TypeKind::FixedArray(elem) => Some(elem),
            _ => None,
        });
        if elems.is_empty() {
            return match expected_elem {
                Some(elem) => self.program.types.fixed_array(elem),
                None => {
                    self.error(
                        ErrorCode::TypeMismatch,
                        span,
                        "an empty array literal needs a contextual element type",
                    );
                    TypeId::ERROR
                }
            };
        }
        let first = self.check_expr(&elems[0], expected_elem);
        let elem = expected_elem.unwrap_or_else(|| self.program.types.widened(first));
        if !self.assignable(first, elem) {
            let found = self.fmt_type(first);
            let wanted = self.fmt_type(elem);
            self.error(
                ErrorCode::TypeMismatch,
                elems[0].span,
                format!("array element of type '{found}' does not fit '{wanted}'"),
            );
        }
        for e in &elems[1..] {
            let ty = self.check_expr(e, Some(elem));
            if !self.assignable(ty, elem) {
                let found = self.fmt_type(ty);
                let wanted = self.fmt_type(elem);
                self.error(
                    ErrorCode::TypeMismatch,
                    e.span,
                    format!("array element of type '{found}' does not fit '{wanted}'"),
                );
            }
        }
        self.program.types.fixed_array(elem)
    }

    fn check_tuple(&mut self, elems: &[Expr], expected: Option<TypeId>) -> TypeId {
        let expected_elems = expected.and_then(|e| match self.program.types.kind(e) {
            TypeKind::Tuple(elems) => Some(elems),
            _ => None,
        });
        let elems: Vec<TypeId> = elems
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let ctx = expected_elems.as_ref().and_then(|t| t.get(i)).copied();
                let ty = self.check_expr(e, ctx);
                ctx.unwrap_or_else(|| self.program.types.widened(ty))
            })
            .collect();
        self.program.types.tuple(elems)
    }

    fn check_record(&mut self, fields: &[(String, Expr)], expected: Option<TypeId>) -> TypeId {
        let expected_fields = expected.and_then(|e| match self.program.types.kind(e) {
            TypeKind::Record(fields) => Some(fields),
            _ => None,
        });
        let fields: Vec<(String, TypeId)> = fields
            .iter()
            .map(|(name, e)| {
                let ctx = expected_fields
                    .as_ref()
                    .and_then(|fs| fs.iter().find(|(n, _)| n == name))
                    .map(|(_, t)| *t);
                let ty = self.check_expr(e, ctx);
                (
                    name.clone(),
                    ctx.unwrap_or_else(|| self.program.types.widened(ty)),
                )
            })
            .collect();
        self.program.types.record(fields)
    }

    // =========================================================================
    // Casts and type tests
    // =========================================================================

    fn check_cast(&mut self, span: Span, operand: &Expr, ty: &TypeAnn) -> TypeId {
        let target = self.resolve_type(ty);
        let source = self.check_expr(operand, Some(target));
        if source == TypeId::ERROR || target == TypeId::ERROR {
            return target;
        }

        let numeric = [TypeId::I32, TypeId::U32, TypeId::I64, TypeId::F32, TypeId::F64];
        let source_wide = self.program.types.widened(source);
        let numeric_cast = numeric.contains(&source_wide) && numeric.contains(&target);

        let distinct_cast = match (
            self.program.types.kind(source),
            self.program.types.kind(target),
        ) {
            (TypeKind::Distinct { inner, .. }, _) => inner == target,
            (_, TypeKind::Distinct { inner, .. }) => {
                inner == source || inner == source_wide
            }
            _ => false,
        };

        let up = self.assignable(source, target);
        let down = self.assignable(target, source);
        if !(up || down || numeric_cast || distinct_cast) {
            let from = self.fmt_type(source);
            let to = self.fmt_type(target);
            self.error(
                ErrorCode::InvalidCast,
                span,
                format!("cannot cast '{from}' to '{to}'"),
            );
        }
        target
    }

    fn check_is(&mut self, operand: &Expr, ty: &TypeAnn) -> TypeId {
        let source = self.check_expr(operand, None);
        let target = self.resolve_type(ty);
        if source != TypeId::ERROR
            && target != TypeId::ERROR
            && !quill_types::is_reference(&self.program.types, &self.program.decls, source)
            && !matches!(self.program.types.kind(source), TypeKind::Union(_))
        {
            let shown = self.fmt_type(source);
            self.error(
                ErrorCode::TypeMismatch,
                operand.span,
                format!("'is' requires a reference or union operand, found '{shown}'"),
            );
        }
        TypeId::BOOLEAN
    }

    // =========================================================================
    // Templates
    // =========================================================================

    fn check_template(
        &mut self,
        span: Span,
        tag: Option<&Expr>,
        quasis: &[String],
        exprs: &[Expr],
    ) -> TypeId {
        if quasis.len() != exprs.len() + 1 {
            self.error(
                ErrorCode::TypeMismatch,
                span,
                "malformed template literal",
            );
        }
        let mut interp_types = Vec::with_capacity(exprs.len());
        for e in exprs {
            let ty = self.check_expr(e, None);
            let wide = self.program.types.widened(ty);
            let stringifiable = matches!(
                wide,
                TypeId::I32
                    | TypeId::U32
                    | TypeId::I64
                    | TypeId::F32
                    | TypeId::F64
                    | TypeId::BOOLEAN
                    | TypeId::STRING
                    | TypeId::ERROR
            );
            if !stringifiable {
                let shown = self.fmt_type(ty);
                self.error(
                    ErrorCode::TypeMismatch,
                    e.span,
                    format!("type '{shown}' cannot be interpolated into a string"),
                );
            }
            interp_types.push(wide);
        }

        match tag {
            None => TypeId::STRING,
            Some(tag) => {
                let tag_ty = self.check_expr(tag, None);
                match self.program.types.kind(tag_ty) {
                    TypeKind::Function(shape) => {
                        let strings = self.program.types.fixed_array(TypeId::STRING);
                        if shape.params.first() != Some(&strings) {
                            self.error(
                                ErrorCode::TypeMismatch,
                                tag.span,
                                "a template tag takes '#[string]' as its first parameter",
                            );
                        }
                        shape.return_type
                    }
                    TypeKind::Error => TypeId::ERROR,
                    _ => {
                        let shown = self.fmt_type(tag_ty);
                        self.error(
                            ErrorCode::NotCallable,
                            tag.span,
                            format!("template tag of type '{shown}' is not callable"),
                        );
                        TypeId::ERROR
                    }
                }
            }
        }
    }
}
