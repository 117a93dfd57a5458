//! Search-condition conversion.
//!
//! The dialect distinguishes positions that accept a predicate directly
//! (WHERE, HAVING, JOIN ON, CASE tests) from positions that need a scalar
//! boolean value (SELECT list, function arguments, CASE results). This pass
//! threads a single "this position wants a search condition" flag through
//! one recursive descent and inserts the conversion at every boolean-typed
//! node:
//!
//! - a boolean *value* (column, parameter, literal) in a condition position
//!   becomes `value = 1`;
//! - a *condition* (comparison, EXISTS, LIKE, ...) in a value position
//!   becomes `CASE WHEN condition THEN 1 ELSE 0 END`;
//! - `NOT (x = y)` and `NOT (x <> y)` fold into the negated comparison
//!   instead of double-negating.
//!
//! Re-running the pass on its own output is a no-op.

use crate::error::Result;
use crate::expressions::{
    BinaryOperator, CaseWhen, Expr, Expression, Join, Ordering, Projection, Select, TypeInfo,
    UnaryOperator,
};
use crate::passes::rewrite_children;
use std::sync::Arc;

/// Function names the dialect treats as full-text predicates; they are
/// condition-shaped even though they render as function calls.
const FULL_TEXT_FUNCTIONS: [&str; 2] = ["CONTAINS", "FREETEXT"];

/// Run the pass over a statement root.
pub fn convert_search_conditions(expr: &Expr) -> Result<Expr> {
    visit(expr, false)
}

/// Whether this node already is a valid search condition.
fn is_condition_shaped(expr: &Expression) -> bool {
    match expr {
        Expression::Binary(b) => b.op.is_logical() || b.op.is_comparison(),
        Expression::Unary(u) => matches!(
            u.op,
            UnaryOperator::Not | UnaryOperator::IsNull | UnaryOperator::IsNotNull
        ),
        Expression::Exists(_) | Expression::In(_) | Expression::Like(_) => true,
        Expression::Function(f) => FULL_TEXT_FUNCTIONS
            .iter()
            .any(|n| f.name.eq_ignore_ascii_case(n)),
        _ => false,
    }
}

/// Insert the conversion required by the surrounding position, if any.
/// Non-boolean nodes never convert.
fn apply(expr: Expr, want_condition: bool) -> Expr {
    if !expr.is_boolean() {
        return expr;
    }
    let condition_shaped = is_condition_shaped(expr.as_ref());
    if want_condition && !condition_shaped {
        Expression::eq(expr, Expression::bool(true))
    } else if !want_condition && condition_shaped {
        let nullable = expr.nullable();
        Expression::searched_case(
            vec![CaseWhen {
                test: expr,
                result: Expression::bool(true),
            }],
            Some(Expression::bool(false)),
            TypeInfo::bool().with_nullable(nullable),
        )
    } else {
        expr
    }
}

fn visit(expr: &Expr, search_condition: bool) -> Result<Expr> {
    match expr.as_ref() {
        // AND/OR operands are themselves condition positions.
        Expression::Binary(b) if b.op.is_logical() => {
            let left = visit(&b.left, true)?;
            let right = visit(&b.right, true)?;
            let rebuilt = if Arc::ptr_eq(&left, &b.left) && Arc::ptr_eq(&right, &b.right) {
                expr.clone()
            } else {
                Expression::binary(b.op, left, right, b.ty.clone())
            };
            Ok(apply(rebuilt, search_condition))
        }

        Expression::Unary(u) if u.op == UnaryOperator::Not => {
            // NOT (x = y) / NOT (x <> y) fold into the negated comparison.
            if let Expression::Binary(inner) = u.operand.as_ref() {
                if matches!(inner.op, BinaryOperator::Eq | BinaryOperator::Neq) {
                    if let Some(negated) = inner.op.negated() {
                        let left = visit(&inner.left, false)?;
                        let right = visit(&inner.right, false)?;
                        let folded =
                            Expression::binary(negated, left, right, inner.ty.clone());
                        return Ok(apply(folded, search_condition));
                    }
                }
            }
            let operand = visit(&u.operand, true)?;
            let rebuilt = if Arc::ptr_eq(&operand, &u.operand) {
                expr.clone()
            } else {
                Arc::new(Expression::Unary(crate::expressions::Unary {
                    op: u.op,
                    operand,
                    ty: u.ty.clone(),
                }))
            };
            Ok(apply(rebuilt, search_condition))
        }

        // A CASE without an operand has condition-position tests; the
        // results and the else branch are always value positions.
        Expression::Case(c) => {
            let test_is_condition = c.operand.is_none();
            let mut changed = false;
            let operand = match &c.operand {
                Some(o) => {
                    let v = visit(o, false)?;
                    changed |= !Arc::ptr_eq(&v, o);
                    Some(v)
                }
                None => None,
            };
            let whens = c
                .whens
                .iter()
                .map(|w| {
                    let test = visit(&w.test, test_is_condition)?;
                    let result = visit(&w.result, false)?;
                    changed |= !Arc::ptr_eq(&test, &w.test) || !Arc::ptr_eq(&result, &w.result);
                    Ok(CaseWhen { test, result })
                })
                .collect::<Result<Vec<_>>>()?;
            let else_ = match &c.else_ {
                Some(e) => {
                    let v = visit(e, false)?;
                    changed |= !Arc::ptr_eq(&v, e);
                    Some(v)
                }
                None => None,
            };
            let rebuilt = if changed {
                Arc::new(Expression::Case(crate::expressions::Case {
                    operand,
                    whens,
                    else_,
                    ty: c.ty.clone(),
                }))
            } else {
                expr.clone()
            };
            Ok(apply(rebuilt, search_condition))
        }

        // JOIN predicates are condition positions; the joined source keeps
        // its own contexts.
        Expression::Join(j) => {
            let table = visit(&j.table, false)?;
            let on = match &j.on {
                Some(on) => Some(visit(on, true)?),
                None => None,
            };
            let unchanged = Arc::ptr_eq(&table, &j.table)
                && match (&on, &j.on) {
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
            if unchanged {
                Ok(expr.clone())
            } else {
                Ok(Arc::new(Expression::Join(Join {
                    kind: j.kind,
                    table,
                    on,
                })))
            }
        }

        Expression::Select(s) => {
            fn track(out: &Expr, original: &Expr, changed: &mut bool) {
                *changed |= !Arc::ptr_eq(out, original);
            }
            let mut changed = false;

            let projection = s
                .projection
                .iter()
                .map(|p| {
                    let e = visit(&p.expr, false)?;
                    track(&e, &p.expr, &mut changed);
                    Ok(Projection {
                        expr: e,
                        alias: p.alias.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let tables = s
                .tables
                .iter()
                .map(|t| {
                    let e = visit(t, false)?;
                    track(&e, t, &mut changed);
                    Ok(e)
                })
                .collect::<Result<Vec<_>>>()?;
            let predicate = match &s.predicate {
                Some(p) => {
                    let e = visit(p, true)?;
                    track(&e, p, &mut changed);
                    Some(e)
                }
                None => None,
            };
            let group_by = s
                .group_by
                .iter()
                .map(|g| {
                    let e = visit(g, false)?;
                    track(&e, g, &mut changed);
                    Ok(e)
                })
                .collect::<Result<Vec<_>>>()?;
            let having = match &s.having {
                Some(h) => {
                    let e = visit(h, true)?;
                    track(&e, h, &mut changed);
                    Some(e)
                }
                None => None,
            };
            let orderings = s
                .orderings
                .iter()
                .map(|o| {
                    let e = visit(&o.expr, false)?;
                    track(&e, &o.expr, &mut changed);
                    Ok(Ordering {
                        expr: e,
                        ascending: o.ascending,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let limit = match &s.limit {
                Some(l) => {
                    let e = visit(l, false)?;
                    track(&e, l, &mut changed);
                    Some(e)
                }
                None => None,
            };
            let offset = match &s.offset {
                Some(o) => {
                    let e = visit(o, false)?;
                    track(&e, o, &mut changed);
                    Some(e)
                }
                None => None,
            };

            if changed {
                Ok(Arc::new(Expression::Select(Select {
                    distinct: s.distinct,
                    projection,
                    tables,
                    predicate,
                    group_by,
                    having,
                    orderings,
                    limit,
                    offset,
                    alias: s.alias.clone(),
                })))
            } else {
                Ok(expr.clone())
            }
        }

        // Everything else has only value-position children: comparisons,
        // arithmetic, function arguments, EXISTS/IN/LIKE operands, casts,
        // JSON nodes, VALUES rows, set operations, UPDATE/DELETE shells.
        _ => {
            let rebuilt = rewrite_children(expr, &mut |child| visit(child, false))?;
            Ok(apply(rebuilt, search_condition))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::{TypeKind, Value};

    fn bool_col(name: &str) -> Expr {
        Expression::column("t", name, TypeInfo::bool())
    }

    fn int_col(name: &str) -> Expr {
        Expression::column("t", name, TypeInfo::int())
    }

    fn where_select(predicate: Expr) -> Expr {
        Select::from_source(Expression::table("things", "t"))
            .with_projection(vec![Projection::unaliased(int_col("id"))])
            .with_predicate(predicate)
            .into_expr()
    }

    fn predicate_of(expr: &Expr) -> Expr {
        expr.as_select().unwrap().predicate.clone().unwrap()
    }

    #[test]
    fn boolean_column_in_predicate_gets_comparison() {
        let out = convert_search_conditions(&where_select(bool_col("active"))).unwrap();
        let predicate = predicate_of(&out);
        match predicate.as_ref() {
            Expression::Binary(b) => {
                assert_eq!(b.op, BinaryOperator::Eq);
                assert!(b.right.is_true_constant());
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn comparison_in_predicate_passes_through() {
        let predicate = Expression::eq(int_col("a"), Expression::int(5));
        let select = where_select(predicate.clone());
        let out = convert_search_conditions(&select).unwrap();
        assert!(Arc::ptr_eq(&out, &select));
    }

    #[test]
    fn condition_in_projection_gets_case_wrapper() {
        let select = Select::from_source(Expression::table("things", "t"))
            .with_projection(vec![Projection::unaliased(Expression::eq(
                int_col("a"),
                Expression::int(5),
            ))])
            .into_expr();
        let out = convert_search_conditions(&select).unwrap();
        let projected = out.as_select().unwrap().projection[0].expr.clone();
        match projected.as_ref() {
            Expression::Case(c) => {
                assert!(c.operand.is_none());
                assert!(c.whens[0].result.is_true_constant());
                assert!(c.else_.as_ref().unwrap().is_false_constant());
            }
            other => panic!("expected CASE wrapper, got {other:?}"),
        }
    }

    #[test]
    fn not_equal_folds_into_negated_comparison() {
        let not_eq = Expression::not(Expression::eq(int_col("x"), Expression::int(5)));
        let select = Select::from_source(Expression::table("things", "t"))
            .with_projection(vec![Projection::unaliased(not_eq)])
            .into_expr();
        let out = convert_search_conditions(&select).unwrap();
        let projected = out.as_select().unwrap().projection[0].expr.clone();
        // Value position: folded to x <> 5, then CASE-wrapped as a value.
        match projected.as_ref() {
            Expression::Case(c) => match c.whens[0].test.as_ref() {
                Expression::Binary(b) => assert_eq!(b.op, BinaryOperator::Neq),
                other => panic!("expected folded <>, got {other:?}"),
            },
            other => panic!("expected CASE wrapper, got {other:?}"),
        }
    }

    #[test]
    fn boolean_literal_in_value_position_is_untouched() {
        let select = Select::from_source(Expression::table("things", "t"))
            .with_projection(vec![Projection::unaliased(Expression::bool(true))])
            .into_expr();
        let out = convert_search_conditions(&select).unwrap();
        assert!(Arc::ptr_eq(&out, &select));
    }

    #[test]
    fn and_operands_are_condition_positions() {
        let predicate = Expression::and(bool_col("a"), bool_col("b"));
        let out = convert_search_conditions(&where_select(predicate)).unwrap();
        let predicate = predicate_of(&out);
        match predicate.as_ref() {
            Expression::Binary(b) => {
                assert_eq!(b.op, BinaryOperator::And);
                assert!(matches!(b.left.as_ref(), Expression::Binary(l) if l.op == BinaryOperator::Eq));
                assert!(matches!(b.right.as_ref(), Expression::Binary(r) if r.op == BinaryOperator::Eq));
            }
            other => panic!("expected AND, got {other:?}"),
        }
    }

    #[test]
    fn case_tests_are_condition_positions_without_operand() {
        let case = Expression::searched_case(
            vec![CaseWhen {
                test: bool_col("flag"),
                result: Expression::int(1),
            }],
            Some(Expression::int(0)),
            TypeInfo::int(),
        );
        let select = Select::from_source(Expression::table("things", "t"))
            .with_projection(vec![Projection::unaliased(case)])
            .into_expr();
        let out = convert_search_conditions(&select).unwrap();
        let projected = out.as_select().unwrap().projection[0].expr.clone();
        match projected.as_ref() {
            Expression::Case(c) => {
                assert!(matches!(c.whens[0].test.as_ref(), Expression::Binary(b) if b.op == BinaryOperator::Eq));
            }
            other => panic!("expected CASE, got {other:?}"),
        }
    }

    #[test]
    fn function_arguments_are_value_positions() {
        let condition = Expression::eq(int_col("a"), Expression::int(1));
        let call = Expression::function("COALESCE", vec![condition], TypeInfo::bool());
        let out = convert_search_conditions(&where_select(call)).unwrap();
        let predicate = predicate_of(&out);
        // Outer: function wrapped as `f(...) = 1`; inner arg CASE-wrapped.
        match predicate.as_ref() {
            Expression::Binary(b) => match b.left.as_ref() {
                Expression::Function(f) => {
                    assert!(matches!(f.args[0].as_ref(), Expression::Case(_)));
                }
                other => panic!("expected function, got {other:?}"),
            },
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn pass_is_idempotent() {
        let predicate = Expression::or(
            Expression::and(bool_col("a"), Expression::eq(int_col("x"), Expression::int(3))),
            Expression::not(Expression::eq(int_col("y"), Expression::int(4))),
        );
        let select = where_select(predicate);
        let once = convert_search_conditions(&select).unwrap();
        let twice = convert_search_conditions(&once).unwrap();
        assert!(Arc::ptr_eq(&once, &twice));
    }

    #[test]
    fn exists_subquery_predicate_is_converted_inside() {
        let inner = Select::from_source(Expression::table("orders", "o"))
            .with_predicate(bool_col("open"))
            .into_expr();
        let out = convert_search_conditions(&where_select(Expression::exists(inner))).unwrap();
        let predicate = predicate_of(&out);
        match predicate.as_ref() {
            Expression::Exists(e) => {
                let inner_pred = e.subquery.as_select().unwrap().predicate.clone().unwrap();
                assert!(matches!(inner_pred.as_ref(), Expression::Binary(b) if b.op == BinaryOperator::Eq));
            }
            other => panic!("expected EXISTS, got {other:?}"),
        }
    }

    #[test]
    fn null_bool_literal_reduces_cleanly() {
        // A NULL boolean constant in value position stays a literal.
        let select = Select::from_source(Expression::table("things", "t"))
            .with_projection(vec![Projection::unaliased(Expression::literal(
                Value::Null,
                TypeInfo::nullable(TypeKind::Bool, "bit"),
            ))])
            .into_expr();
        let out = convert_search_conditions(&select).unwrap();
        assert!(Arc::ptr_eq(&out, &select));
    }
}
