//! Match checking and exhaustiveness analysis.
//!
//! Exhaustiveness is computed by subtraction: start from the scrutinee
//! type and remove what each case covers. Literal, class, null, and
//! enum-member patterns subtract exactly; tuple and record patterns do
//! not subtract and instead surface a clear diagnostic when the match
//! depends on them for exhaustiveness.

use crate::context::LibraryChecker;
use crate::scopes::ValueEntry;
use quill_ast::{Expr, LitValue, MatchArm, Pattern, PatternKind};
use quill_common::diagnostics::ErrorCode;
use quill_sema::Binding;
use quill_types::{LiteralValue, TypeId, TypeKind};
use rustc_hash::FxHashSet;

impl<'a> LibraryChecker<'a> {
    pub(crate) fn check_match(
        &mut self,
        expr: &Expr,
        scrutinee: &Expr,
        arms: &[MatchArm],
        expected: Option<TypeId>,
    ) -> TypeId {
        let scrut_ty = self.check_expr(scrutinee, None);

        // Enum scrutinees track remaining members as a set.
        if let TypeKind::Enum(decl) = self.program.types.kind(scrut_ty) {
            return self.check_enum_match(expr, scrut_ty, decl, arms, expected);
        }

        // Booleans behave like the closed union true|false.
        let mut remaining = if scrut_ty == TypeId::BOOLEAN {
            let t = self.program.types.literal_bool(true);
            let f = self.program.types.literal_bool(false);
            self.program.types.union_of([t, f])
        } else {
            scrut_ty
        };

        let mut arm_types = Vec::with_capacity(arms.len());
        let mut has_unsupported = false;

        for arm in arms {
            let covered = self.pattern_coverage(&arm.pattern, remaining, &mut has_unsupported);

            if let Some(covered) = covered {
                let reachable = self.intersects(remaining, covered);
                if !reachable {
                    self.warning(
                        ErrorCode::UnreachableCase,
                        arm.pattern.span,
                        "this case is unreachable; earlier cases already cover it",
                    );
                } else {
                    remaining = self.narrow_subtract(remaining, covered);
                }
            }

            self.scopes.push();
            self.bind_pattern(&arm.pattern, covered.unwrap_or(remaining));
            arm_types.push(self.check_expr(&arm.body, expected));
            self.scopes.pop();
        }

        if remaining != TypeId::NEVER && scrut_ty != TypeId::ERROR {
            if has_unsupported {
                self.error(
                    ErrorCode::UnsupportedPattern,
                    expr.span,
                    "tuple and record patterns do not participate in exhaustiveness; add a wildcard case",
                );
            } else {
                let witness = self.uncovered_witness(remaining);
                self.error(
                    ErrorCode::NonExhaustiveMatch,
                    expr.span,
                    format!("match is not exhaustive; '{witness}' is not covered"),
                );
            }
        }

        match expected {
            Some(expected) => expected,
            None => {
                let widened: Vec<TypeId> = arm_types
                    .iter()
                    .map(|&t| self.program.types.widened(t))
                    .collect();
                self.program.types.union_of(widened)
            }
        }
    }

    fn check_enum_match(
        &mut self,
        expr: &Expr,
        scrut_ty: TypeId,
        decl: quill_types::DeclId,
        arms: &[MatchArm],
        expected: Option<TypeId>,
    ) -> TypeId {
        let members = self
            .program
            .decls
            .enum_info(decl)
            .expect("enum info")
            .members
            .clone();
        let enum_name = self.program.decls.get(decl).name.clone();
        let mut remaining: FxHashSet<String> = members.iter().cloned().collect();
        let mut arm_types = Vec::with_capacity(arms.len());

        for arm in arms {
            match &arm.pattern.kind {
                PatternKind::EnumMember { member, .. } => {
                    if !members.iter().any(|m| m == member) {
                        self.error(
                            ErrorCode::PropertyNotFound,
                            arm.pattern.span,
                            format!("enum '{enum_name}' has no member '{member}'"),
                        );
                    } else if !remaining.remove(member) {
                        self.warning(
                            ErrorCode::UnreachableCase,
                            arm.pattern.span,
                            format!("member '{member}' is already covered"),
                        );
                    }
                    if let Some(index) = members.iter().position(|m| m == member) {
                        self.program.sema.bind(
                            arm.pattern.id,
                            Binding::EnumMember {
                                decl,
                                index: index as u32,
                            },
                        );
                    }
                }
                PatternKind::Wildcard(binding) => {
                    if remaining.is_empty() {
                        self.warning(
                            ErrorCode::UnreachableCase,
                            arm.pattern.span,
                            "this case is unreachable; earlier cases already cover it",
                        );
                    }
                    remaining.clear();
                    if let Some(name) = binding {
                        let name = name.clone();
                        self.scopes.push();
                        self.scopes.declare_value(
                            &name,
                            ValueEntry {
                                binding: Binding::Local {
                                    node: arm.pattern.id,
                                    mutable: false,
                                },
                                ty: scrut_ty,
                            },
                        );
                        self.program.sema.record_type(arm.pattern.id, scrut_ty);
                        arm_types.push(self.check_expr(&arm.body, expected));
                        self.scopes.pop();
                        continue;
                    }
                }
                _ => {
                    self.error(
                        ErrorCode::UnsupportedPattern,
                        arm.pattern.span,
                        format!("a match over enum '{enum_name}' takes enum-member patterns"),
                    );
                }
            }
            arm_types.push(self.check_expr(&arm.body, expected));
        }

        if !remaining.is_empty() {
            let mut names: Vec<&String> = remaining.iter().collect();
            names.sort();
            let witness = format!("{enum_name}.{}", names[0]);
            self.error(
                ErrorCode::NonExhaustiveMatch,
                expr.span,
                format!("match is not exhaustive; '{witness}' is not covered"),
            );
        }

        match expected {
            Some(expected) => expected,
            None => {
                let widened: Vec<TypeId> = arm_types
                    .iter()
                    .map(|&t| self.program.types.widened(t))
                    .collect();
                self.program.types.union_of(widened)
            }
        }
    }

    /// The subset of the scrutinee a pattern covers. `None` for
    /// patterns that cannot subtract (tuples, records).
    fn pattern_coverage(
        &mut self,
        pattern: &Pattern,
        remaining: TypeId,
        has_unsupported: &mut bool,
    ) -> Option<TypeId> {
        match &pattern.kind {
            PatternKind::Literal(value) => {
                let lit = match value {
                    LitValue::Int(v) => LiteralValue::Int(*v),
                    LitValue::Bool(v) => LiteralValue::Bool(*v),
                    LitValue::Str(v) => LiteralValue::Str(v.clone()),
                };
                Some(self.program.types.intern(TypeKind::Literal(lit)))
            }
            PatternKind::Null => Some(TypeId::NULL),
            PatternKind::Type { ty, .. } => {
                let covered = self.resolve_type(ty);
                self.program.sema.record_type(pattern.id, covered);
                Some(covered)
            }
            PatternKind::Wildcard(_) => Some(remaining),
            PatternKind::EnumMember { enum_name, .. } => {
                self.error(
                    ErrorCode::UnsupportedPattern,
                    pattern.span,
                    format!(
                        "enum-member pattern '{enum_name}.…' requires an enum scrutinee"
                    ),
                );
                None
            }
            PatternKind::Tuple(subs) => {
                *has_unsupported = true;
                // Sub-patterns still type-check against the element
                // types when the scrutinee is a tuple.
                if let TypeKind::Tuple(elems) = self.program.types.kind(remaining) {
                    if subs.len() != elems.len() {
                        self.error(
                            ErrorCode::TypeMismatch,
                            pattern.span,
                            format!(
                                "tuple pattern has {} element(s), the scrutinee has {}",
                                subs.len(),
                                elems.len()
                            ),
                        );
                    }
                    for (sub, &elem) in subs.iter().zip(&elems) {
                        let mut nested_unsupported = false;
                        self.pattern_coverage(sub, elem, &mut nested_unsupported);
                    }
                }
                None
            }
            PatternKind::Record(fields) => {
                *has_unsupported = true;
                if let TypeKind::Record(field_types) = self.program.types.kind(remaining) {
                    for (name, sub) in fields {
                        match field_types.iter().find(|(n, _)| n == name) {
                            Some((_, field_ty)) => {
                                let mut nested_unsupported = false;
                                self.pattern_coverage(sub, *field_ty, &mut nested_unsupported);
                            }
                            None => {
                                self.error(
                                    ErrorCode::PropertyNotFound,
                                    sub.span,
                                    format!("the scrutinee has no field '{name}'"),
                                );
                            }
                        }
                    }
                }
                None
            }
        }
    }

    /// Declare pattern bindings in the current (arm) scope.
    fn bind_pattern(&mut self, pattern: &Pattern, covered: TypeId) {
        match &pattern.kind {
            PatternKind::Type {
                binding: Some(name),
                ..
            } => {
                let ty = self
                    .program
                    .sema
                    .type_of(pattern.id)
                    .unwrap_or(covered);
                self.scopes.declare_value(
                    name,
                    ValueEntry {
                        binding: Binding::Local {
                            node: pattern.id,
                            mutable: false,
                        },
                        ty,
                    },
                );
            }
            PatternKind::Wildcard(Some(name)) => {
                self.program.sema.record_type(pattern.id, covered);
                self.scopes.declare_value(
                    name,
                    ValueEntry {
                        binding: Binding::Local {
                            node: pattern.id,
                            mutable: false,
                        },
                        ty: covered,
                    },
                );
            }
            _ => {}
        }
    }

    /// Whether any value inhabits both types (for reachability).
    fn intersects(&self, remaining: TypeId, covered: TypeId) -> bool {
        if remaining == TypeId::NEVER {
            return false;
        }
        match self.program.types.kind(remaining) {
            TypeKind::Union(members) => members.iter().any(|&m| {
                self.assignable(m, covered)
                    || quill_types::assignable(&self.program.types, &self.program.decls, covered, m)
            }),
            _ => {
                self.assignable(remaining, covered)
                    || self.assignable(covered, remaining)
            }
        }
    }

    /// A representative uncovered value for the diagnostic.
    fn uncovered_witness(&self, remaining: TypeId) -> String {
        match self.program.types.kind(remaining) {
            TypeKind::Union(members) => members
                .first()
                .map(|&m| self.fmt_type(m))
                .unwrap_or_else(|| self.fmt_type(remaining)),
            _ => self.fmt_type(remaining),
        }
    }
}
