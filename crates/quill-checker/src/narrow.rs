//! Flow-sensitive narrowing.
//!
//! Guards of the form `x is T`, `x == literal`, and `x != null` narrow
//! `x` within the dominated branch; the complementary fact applies to
//! the else branch. Narrowing operates on shadowed slots (the narrow
//! frames of the context), keyed by the binding's declaring node, and is
//! invalidated by assignment.

use crate::context::LibraryChecker;
use quill_ast::{BinaryOp, Expr, ExprKind, NodeId, UnaryOp};
use quill_types::{TypeId, TypeKind};
use rustc_hash::FxHashMap;

pub type NarrowFacts = FxHashMap<NodeId, TypeId>;

impl<'a> LibraryChecker<'a> {
    /// Derive (then, else) narrowing facts from a condition. Must run
    /// after the condition has been checked, so bindings and types are
    /// recorded.
    pub(crate) fn condition_facts(&mut self, cond: &Expr) -> (NarrowFacts, NarrowFacts) {
        let mut then_facts = NarrowFacts::default();
        let mut else_facts = NarrowFacts::default();
        self.collect_facts(cond, &mut then_facts, &mut else_facts);
        (then_facts, else_facts)
    }

    fn collect_facts(&mut self, cond: &Expr, then_facts: &mut NarrowFacts, else_facts: &mut NarrowFacts) {
        match &cond.kind {
            ExprKind::Is { operand, ty } => {
                let Some((slot, current)) = self.narrow_slot(operand) else {
                    return;
                };
                let Some(target) = self.program.sema.type_of(ty.id) else {
                    return;
                };
                then_facts.insert(slot, self.narrow_to(current, target));
                else_facts.insert(slot, self.narrow_subtract(current, target));
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::Eq | BinaryOp::Ne => {
                    let (operand, test) = match (self.literal_test(rhs), self.literal_test(lhs)) {
                        (Some(test), _) => (lhs.as_ref(), test),
                        (_, Some(test)) => (rhs.as_ref(), test),
                        _ => return,
                    };
                    let Some((slot, current)) = self.narrow_slot(operand) else {
                        return;
                    };
                    let (positive, negative) = match test {
                        LiteralTest::Null => {
                            (TypeId::NULL, self.narrow_subtract(current, TypeId::NULL))
                        }
                        LiteralTest::Value(ty) => (
                            self.narrow_to(current, ty),
                            self.narrow_subtract(current, ty),
                        ),
                    };
                    if *op == BinaryOp::Eq {
                        then_facts.insert(slot, positive);
                        else_facts.insert(slot, negative);
                    } else {
                        then_facts.insert(slot, negative);
                        else_facts.insert(slot, positive);
                    }
                }
                // Both sides of `&&` hold in the then branch; nothing is
                // known in the else branch.
                BinaryOp::And => {
                    let mut discard = NarrowFacts::default();
                    self.collect_facts(lhs, then_facts, &mut discard);
                    self.collect_facts(rhs, then_facts, &mut discard);
                }
                _ => {}
            },
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                self.collect_facts(operand, else_facts, then_facts);
            }
            _ => {}
        }
    }

    /// The shadow slot a guard narrows: the declaring node of a plain
    /// identifier binding, with its current (possibly already narrowed)
    /// type.
    fn narrow_slot(&self, expr: &Expr) -> Option<(NodeId, TypeId)> {
        let ExprKind::Ident(_) = expr.kind else {
            return None;
        };
        let decl_node = match self.program.sema.binding(expr.id)? {
            quill_sema::Binding::Local { node, .. } => *node,
            quill_sema::Binding::Global { node, .. } => *node,
            _ => return None,
        };
        let current = self.program.sema.type_of(expr.id)?;
        Some((decl_node, current))
    }

    fn literal_test(&self, expr: &Expr) -> Option<LiteralTest> {
        match &expr.kind {
            ExprKind::Null => Some(LiteralTest::Null),
            ExprKind::Int(v) => Some(LiteralTest::Value(self.program.types.literal_int(*v))),
            ExprKind::Bool(v) => Some(LiteralTest::Value(self.program.types.literal_bool(*v))),
            ExprKind::Str(v) => Some(LiteralTest::Value(self.program.types.literal_str(v))),
            _ => None,
        }
    }

    /// Narrow `current` to the subset matching `target`.
    pub(crate) fn narrow_to(&self, current: TypeId, target: TypeId) -> TypeId {
        if current == target || current == TypeId::ERROR {
            return target;
        }
        match self.program.types.kind(current) {
            TypeKind::Union(members) => {
                let matching: Vec<TypeId> = members
                    .into_iter()
                    .filter(|&m| {
                        self.assignable(m, target)
                            || quill_types::assignable(
                                &self.program.types,
                                &self.program.decls,
                                target,
                                m,
                            )
                    })
                    .map(|m| if self.assignable(m, target) { m } else { target })
                    .collect();
                if matching.is_empty() {
                    TypeId::NEVER
                } else {
                    self.program.types.union_of(matching)
                }
            }
            _ => {
                if self.assignable(target, current) {
                    // Downcast narrowing: a check against a subclass.
                    target
                } else if self.assignable(current, target) {
                    current
                } else {
                    TypeId::NEVER
                }
            }
        }
    }

    /// The complement: remove the subset matching `target`.
    pub(crate) fn narrow_subtract(&self, current: TypeId, target: TypeId) -> TypeId {
        match self.program.types.kind(current) {
            TypeKind::Union(members) => self.program.types.union_of(
                members
                    .into_iter()
                    .filter(|&m| !self.assignable(m, target))
                    .collect::<Vec<_>>(),
            ),
            _ if self.assignable(current, target) => TypeId::NEVER,
            _ => current,
        }
    }
}

enum LiteralTest {
    Null,
    Value(TypeId),
}
