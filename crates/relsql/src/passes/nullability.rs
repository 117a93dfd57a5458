//! Nullability computation and three-valued-logic simplification.
//!
//! Recomputes per-node nullability bottom-up and simplifies what the
//! three-valued logic makes constant: null propagation through arithmetic
//! and null-propagating function arguments, `= NULL` / `<> NULL` rewrites to
//! `IS [NOT] NULL`, NOT pushdown over comparisons, pruning of constant CASE
//! tests, and the LIKE special cases this dialect contracts to (an empty
//! constant pattern always matches, a NULL constant pattern or input never
//! does).
//!
//! This pass runs after search-condition conversion, so every predicate node
//! sits in a condition position. Simplifications that collapse a predicate
//! to a known truth therefore produce the canonical `0 = 1` / `1 = 1`
//! comparisons rather than bare boolean literals, keeping the tree's
//! condition/value shaping intact.
//!
//! Dialect-specific node handling beyond the base rules: an ordered
//! aggregate keeps its declared nullability and is rebuilt only when a child
//! changed; a cast is exactly as nullable as its operand.

use crate::error::{Error, Result};
use crate::expressions::{
    always_false, always_true, BinaryOperator, CaseWhen, Expr, Expression, JsonTable,
    UnaryOperator, Value,
};
use crate::passes::rewrite_children;
use std::sync::Arc;

/// Run the pass over a statement root.
pub fn process_nullability(expr: &Expr) -> Result<Expr> {
    visit(expr)
}

/// The single argument expression a JSON table expansion wraps: its source
/// JSON value. Used by parameter-collection rewriting, which treats the
/// expansion as a one-argument collection source.
pub fn collection_argument(expr: &Expr) -> Result<Expr> {
    match expr.as_ref() {
        Expression::JsonTable(j) => Ok(j.json.clone()),
        other => Err(Error::internal(format!(
            "expected a JSON table collection source, got {other:?}"
        ))),
    }
}

/// Replace the single argument of a JSON table expansion, keeping alias,
/// path and column descriptors.
pub fn substitute_collection_argument(expr: &Expr, argument: Expr) -> Result<Expr> {
    match expr.as_ref() {
        Expression::JsonTable(j) => Ok(Arc::new(Expression::JsonTable(JsonTable {
            alias: j.alias.clone(),
            json: argument,
            path: j.path.clone(),
            columns: j.columns.clone(),
        }))),
        other => Err(Error::internal(format!(
            "expected a JSON table collection source, got {other:?}"
        ))),
    }
}

/// Whether this predicate is known true: either a true literal or the
/// canonical `1 = 1` shape earlier simplifications produce.
fn is_known_true(expr: &Expr) -> bool {
    expr.is_true_constant() || *expr == always_true()
}

/// Whether this predicate is known false (`0 = 1` or a false literal).
fn is_known_false(expr: &Expr) -> bool {
    expr.is_false_constant() || *expr == always_false()
}

fn visit(expr: &Expr) -> Result<Expr> {
    match expr.as_ref() {
        Expression::Unary(u) => {
            let operand = visit(&u.operand)?;
            let rebuilt = simplify_unary(u.op, operand, expr, &u.operand, &u.ty);
            Ok(rebuilt)
        }

        Expression::Binary(b) => {
            let left = visit(&b.left)?;
            let right = visit(&b.right)?;
            Ok(simplify_binary(b.op, left, right, expr, b))
        }

        Expression::Case(c) => {
            let rebuilt = rewrite_children(expr, &mut visit)?;
            let Expression::Case(c2) = rebuilt.as_ref() else {
                return Ok(rebuilt);
            };
            // Only searched CASEs have statically decidable tests.
            if c.operand.is_some() {
                return Ok(rebuilt);
            }
            let mut whens: Vec<CaseWhen> = Vec::with_capacity(c2.whens.len());
            let mut else_ = c2.else_.clone();
            let mut pruned = false;
            for when in &c2.whens {
                if is_known_false(&when.test) {
                    pruned = true;
                    continue;
                }
                if is_known_true(&when.test) {
                    pruned = true;
                    else_ = Some(when.result.clone());
                    break;
                }
                whens.push(when.clone());
            }
            if !pruned {
                return Ok(rebuilt);
            }
            if whens.is_empty() {
                return Ok(match else_ {
                    Some(e) => e,
                    None => Expression::null(c2.ty.clone()),
                });
            }
            let nullable = whens.iter().any(|w| w.result.nullable())
                || else_.as_ref().map(|e| e.nullable()).unwrap_or(true);
            Ok(Expression::searched_case(
                whens,
                else_,
                c2.ty.with_nullable(nullable),
            ))
        }

        Expression::Function(f) => {
            let rebuilt = rewrite_children(expr, &mut visit)?;
            let Expression::Function(f2) = rebuilt.as_ref() else {
                return Ok(rebuilt);
            };
            // A null constant in a null-propagating argument makes the call
            // itself null. Full-text predicates are condition-shaped and
            // never fold this way.
            let condition_shaped = ["CONTAINS", "FREETEXT"]
                .iter()
                .any(|n| f2.name.eq_ignore_ascii_case(n));
            if !condition_shaped {
                let propagated_null = f2
                    .args
                    .iter()
                    .zip(f2.argument_propagates_null.iter())
                    .any(|(arg, propagates)| *propagates && arg.is_null_constant());
                if propagated_null {
                    return Ok(Expression::null(f2.ty.clone()));
                }
            }
            let nullable = f2.ty.nullable
                || f2
                    .args
                    .iter()
                    .zip(f2.argument_propagates_null.iter())
                    .any(|(arg, propagates)| *propagates && arg.nullable());
            if nullable == f2.ty.nullable && Arc::ptr_eq(&rebuilt, expr) {
                return Ok(rebuilt);
            }
            Ok(Arc::new(Expression::Function(crate::expressions::Function {
                name: f2.name.clone(),
                args: f2.args.clone(),
                ty: f2.ty.with_nullable(nullable),
                argument_propagates_null: f2.argument_propagates_null.clone(),
                niladic: f2.niladic,
            })))
        }

        // Declared nullability stands; rebuild only when a child changed.
        Expression::OrderedAggregate(_) => rewrite_children(expr, &mut visit),

        Expression::Cast(c) => {
            let operand = visit(&c.operand)?;
            if operand.is_null_constant() {
                return Ok(Expression::null(c.ty.clone()));
            }
            let nullable = operand.nullable();
            if nullable == c.ty.nullable && Arc::ptr_eq(&operand, &c.operand) {
                return Ok(expr.clone());
            }
            Ok(Expression::cast(operand, c.ty.with_nullable(nullable)))
        }

        Expression::Like(l) => {
            let rebuilt = rewrite_children(expr, &mut visit)?;
            let Expression::Like(l2) = rebuilt.as_ref() else {
                return Ok(rebuilt);
            };
            // Contracted behavior: an empty constant pattern matches every
            // row; a NULL constant pattern or input matches none.
            if matches!(l2.pattern.as_constant(), Some(Value::Text(s)) if s.is_empty()) {
                return Ok(always_true());
            }
            if l2.pattern.is_null_constant() || l2.operand.is_null_constant() {
                return Ok(always_false());
            }
            Ok(rebuilt)
        }

        Expression::In(i) => {
            let rebuilt = rewrite_children(expr, &mut visit)?;
            let Expression::In(i2) = rebuilt.as_ref() else {
                return Ok(rebuilt);
            };
            // NULL entries in a value list can never produce a match.
            if let crate::expressions::InList::Values(values) = &i2.list {
                let filtered: Vec<Expr> = values
                    .iter()
                    .filter(|v| !v.is_null_constant())
                    .cloned()
                    .collect();
                if filtered.is_empty() {
                    return Ok(if i2.negated {
                        always_true()
                    } else {
                        always_false()
                    });
                }
                if filtered.len() != values.len() {
                    return Ok(Arc::new(Expression::In(crate::expressions::In {
                        operand: i2.operand.clone(),
                        list: crate::expressions::InList::Values(filtered),
                        negated: i2.negated,
                    })));
                }
            }
            Ok(rebuilt)
        }

        _ => rewrite_children(expr, &mut visit),
    }
}

fn simplify_unary(
    op: UnaryOperator,
    operand: Expr,
    original: &Expr,
    original_operand: &Expr,
    ty: &crate::expressions::TypeInfo,
) -> Expr {
    match op {
        UnaryOperator::Not => {
            if is_known_true(&operand) {
                return always_false();
            }
            if is_known_false(&operand) {
                return always_true();
            }
            if operand.is_null_constant() {
                return Expression::null(ty.clone());
            }
            // NOT NOT x -> x
            if let Expression::Unary(inner) = operand.as_ref() {
                if inner.op == UnaryOperator::Not {
                    return inner.operand.clone();
                }
            }
            // Push NOT through comparisons: NOT (a > b) -> a <= b.
            if let Expression::Binary(inner) = operand.as_ref() {
                if let Some(negated) = inner.op.negated() {
                    return Expression::binary(
                        negated,
                        inner.left.clone(),
                        inner.right.clone(),
                        inner.ty.clone(),
                    );
                }
            }
            rebuild_unary(op, operand, original, original_operand, ty, operand_nullable)
        }
        UnaryOperator::Negate | UnaryOperator::BitwiseNot => {
            if operand.is_null_constant() {
                return Expression::null(ty.clone());
            }
            rebuild_unary(op, operand, original, original_operand, ty, operand_nullable)
        }
        UnaryOperator::IsNull => {
            if operand.is_null_constant() {
                return always_true();
            }
            if !operand.nullable() {
                return always_false();
            }
            rebuild_unary(op, operand, original, original_operand, ty, |_| false)
        }
        UnaryOperator::IsNotNull => {
            if operand.is_null_constant() {
                return always_false();
            }
            if !operand.nullable() {
                return always_true();
            }
            rebuild_unary(op, operand, original, original_operand, ty, |_| false)
        }
    }
}

fn operand_nullable(operand: &Expr) -> bool {
    operand.nullable()
}

fn rebuild_unary(
    op: UnaryOperator,
    operand: Expr,
    original: &Expr,
    original_operand: &Expr,
    ty: &crate::expressions::TypeInfo,
    nullable: impl Fn(&Expr) -> bool,
) -> Expr {
    let nullable = nullable(&operand);
    if Arc::ptr_eq(&operand, original_operand) && nullable == ty.nullable {
        return original.clone();
    }
    Arc::new(Expression::Unary(crate::expressions::Unary {
        op,
        operand,
        ty: ty.with_nullable(nullable),
    }))
}

fn simplify_binary(
    op: BinaryOperator,
    left: Expr,
    right: Expr,
    original: &Expr,
    b: &crate::expressions::Binary,
) -> Expr {
    match op {
        BinaryOperator::And => {
            if is_known_false(&left) || is_known_false(&right) {
                return always_false();
            }
            if is_known_true(&left) {
                return right;
            }
            if is_known_true(&right) {
                return left;
            }
            rebuild_binary(op, left, right, original, b)
        }
        BinaryOperator::Or => {
            if is_known_true(&left) || is_known_true(&right) {
                return always_true();
            }
            if is_known_false(&left) {
                return right;
            }
            if is_known_false(&right) {
                return left;
            }
            rebuild_binary(op, left, right, original, b)
        }
        BinaryOperator::Eq | BinaryOperator::Neq => {
            // Comparisons against a NULL constant lower to IS [NOT] NULL,
            // which is what the plan means under its host-language equality.
            let left_null = left.is_null_constant();
            let right_null = right.is_null_constant();
            if left_null && right_null {
                return if op == BinaryOperator::Eq {
                    always_true()
                } else {
                    always_false()
                };
            }
            if left_null || right_null {
                let operand = if left_null { right } else { left };
                return if op == BinaryOperator::Eq {
                    Expression::is_null(operand)
                } else {
                    Expression::is_not_null(operand)
                };
            }
            rebuild_binary(op, left, right, original, b)
        }
        _ if op.is_comparison() => rebuild_binary(op, left, right, original, b),
        // Arithmetic, bitwise and concat propagate NULL operands.
        _ => {
            if left.is_null_constant() || right.is_null_constant() {
                return Expression::null(b.ty.clone());
            }
            rebuild_binary(op, left, right, original, b)
        }
    }
}

fn rebuild_binary(
    op: BinaryOperator,
    left: Expr,
    right: Expr,
    original: &Expr,
    b: &crate::expressions::Binary,
) -> Expr {
    let nullable = left.nullable() || right.nullable();
    if Arc::ptr_eq(&left, &b.left) && Arc::ptr_eq(&right, &b.right) && nullable == b.ty.nullable {
        return original.clone();
    }
    Expression::binary(op, left, right, b.ty.with_nullable(nullable))
}
