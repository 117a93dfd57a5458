//! Tree-rewriting passes of the lowering pipeline.
//!
//! Each pass is a total function over the closed [`Expression`] enum that
//! consumes a tree and produces a new tree of the same vocabulary. Passes
//! never mutate nodes: a rewrite rebuilds only the path from a changed leaf
//! to the root and returns the original handle when nothing changed, so
//! unchanged subtrees stay shared between input and output.

/// Constant-folding of zero-row LIMIT/OFFSET windows.
pub mod collapse_skip_take;
/// Resolution of the search-condition / scalar-value duality.
pub mod search_condition;
/// Three-valued-logic nullability computation and simplification.
pub mod nullability;
/// Rich-form to bare-form JSON table downgrades.
pub mod json_postprocess;

pub use collapse_skip_take::collapse_skip_take;
pub use json_postprocess::postprocess_json_tables;
pub use nullability::{
    collection_argument, process_nullability, substitute_collection_argument,
};
pub use search_condition::convert_search_conditions;

use crate::error::Result;
use crate::expressions::{
    Assignment, CaseWhen, Expr, Expression, Ordering, Projection,
};
use std::sync::Arc;

/// Apply `f` to every direct child expression of `expr`, rebuilding the node
/// only when some child actually changed. The identity of unchanged children
/// is preserved, which is what makes `Arc::ptr_eq` short-circuiting work
/// across a whole pass.
pub(crate) fn rewrite_children<F>(expr: &Expr, f: &mut F) -> Result<Expr>
where
    F: FnMut(&Expr) -> Result<Expr>,
{
    let mut changed = false;

    let mut one = |e: &Expr, changed: &mut bool| -> Result<Expr> {
        let out = f(e)?;
        if !Arc::ptr_eq(&out, e) {
            *changed = true;
        }
        Ok(out)
    };

    let rebuilt = match expr.as_ref() {
        Expression::Column(_)
        | Expression::Literal(_)
        | Expression::Parameter(_)
        | Expression::Table(_) => return Ok(expr.clone()),

        Expression::Unary(u) => {
            let operand = one(&u.operand, &mut changed)?;
            Expression::Unary(crate::expressions::Unary {
                op: u.op,
                operand,
                ty: u.ty.clone(),
            })
        }
        Expression::Binary(b) => {
            let left = one(&b.left, &mut changed)?;
            let right = one(&b.right, &mut changed)?;
            Expression::Binary(crate::expressions::Binary {
                op: b.op,
                left,
                right,
                ty: b.ty.clone(),
            })
        }
        Expression::Case(c) => {
            let operand = rewrite_opt(&c.operand, &mut changed, &mut one)?;
            let whens = c
                .whens
                .iter()
                .map(|w| {
                    Ok(CaseWhen {
                        test: one(&w.test, &mut changed)?,
                        result: one(&w.result, &mut changed)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let else_ = rewrite_opt(&c.else_, &mut changed, &mut one)?;
            Expression::Case(crate::expressions::Case {
                operand,
                whens,
                else_,
                ty: c.ty.clone(),
            })
        }
        Expression::Function(func) => {
            let args = rewrite_vec(&func.args, &mut changed, &mut one)?;
            Expression::Function(crate::expressions::Function {
                name: func.name.clone(),
                args,
                ty: func.ty.clone(),
                argument_propagates_null: func.argument_propagates_null.clone(),
                niladic: func.niladic,
            })
        }
        Expression::OrderedAggregate(agg) => {
            let args = rewrite_vec(&agg.args, &mut changed, &mut one)?;
            let orderings = rewrite_orderings(&agg.orderings, &mut changed, &mut one)?;
            Expression::OrderedAggregate(crate::expressions::OrderedAggregate {
                name: agg.name.clone(),
                args,
                orderings,
                ty: agg.ty.clone(),
            })
        }
        Expression::Cast(c) => {
            let operand = one(&c.operand, &mut changed)?;
            Expression::Cast(crate::expressions::Cast {
                operand,
                ty: c.ty.clone(),
            })
        }
        Expression::Collate(c) => {
            let operand = one(&c.operand, &mut changed)?;
            Expression::Collate(crate::expressions::Collate {
                operand,
                collation: c.collation.clone(),
            })
        }
        Expression::Distinct(d) => {
            let operand = one(&d.operand, &mut changed)?;
            Expression::Distinct(crate::expressions::Distinct { operand })
        }
        Expression::Exists(e) => {
            let subquery = one(&e.subquery, &mut changed)?;
            Expression::Exists(crate::expressions::Exists { subquery })
        }
        Expression::In(i) => {
            let operand = one(&i.operand, &mut changed)?;
            let list = match &i.list {
                crate::expressions::InList::Values(values) => crate::expressions::InList::Values(
                    rewrite_vec(values, &mut changed, &mut one)?,
                ),
                crate::expressions::InList::Subquery(s) => {
                    crate::expressions::InList::Subquery(one(s, &mut changed)?)
                }
            };
            Expression::In(crate::expressions::In {
                operand,
                list,
                negated: i.negated,
            })
        }
        Expression::Like(l) => {
            let operand = one(&l.operand, &mut changed)?;
            let pattern = one(&l.pattern, &mut changed)?;
            let escape = rewrite_opt(&l.escape, &mut changed, &mut one)?;
            Expression::Like(crate::expressions::Like {
                operand,
                pattern,
                escape,
            })
        }
        Expression::JsonScalar(j) => {
            let column = one(&j.column, &mut changed)?;
            let path = rewrite_path(&j.path, &mut changed, &mut one)?;
            Expression::JsonScalar(crate::expressions::JsonScalar {
                column,
                path,
                ty: j.ty.clone(),
            })
        }
        Expression::Join(j) => {
            let table = one(&j.table, &mut changed)?;
            let on = rewrite_opt(&j.on, &mut changed, &mut one)?;
            Expression::Join(crate::expressions::Join {
                kind: j.kind,
                table,
                on,
            })
        }
        Expression::Select(s) => {
            let projection = s
                .projection
                .iter()
                .map(|p| {
                    Ok(Projection {
                        expr: one(&p.expr, &mut changed)?,
                        alias: p.alias.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let tables = rewrite_vec(&s.tables, &mut changed, &mut one)?;
            let predicate = rewrite_opt(&s.predicate, &mut changed, &mut one)?;
            let group_by = rewrite_vec(&s.group_by, &mut changed, &mut one)?;
            let having = rewrite_opt(&s.having, &mut changed, &mut one)?;
            let orderings = rewrite_orderings(&s.orderings, &mut changed, &mut one)?;
            let limit = rewrite_opt(&s.limit, &mut changed, &mut one)?;
            let offset = rewrite_opt(&s.offset, &mut changed, &mut one)?;
            Expression::Select(crate::expressions::Select {
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
            })
        }
        Expression::JsonTable(j) => {
            let json = one(&j.json, &mut changed)?;
            let path = match &j.path {
                Some(p) => Some(rewrite_path(p, &mut changed, &mut one)?),
                None => None,
            };
            Expression::JsonTable(crate::expressions::JsonTable {
                alias: j.alias.clone(),
                json,
                path,
                columns: j.columns.clone(),
            })
        }
        Expression::ValuesList(v) => {
            let rows = v
                .rows
                .iter()
                .map(|row| rewrite_vec(row, &mut changed, &mut one))
                .collect::<Result<Vec<_>>>()?;
            Expression::ValuesList(crate::expressions::ValuesList {
                alias: v.alias.clone(),
                column_names: v.column_names.clone(),
                rows,
            })
        }
        Expression::Union(s) => Expression::Union(rewrite_set_op(s, &mut changed, &mut one)?),
        Expression::Except(s) => Expression::Except(rewrite_set_op(s, &mut changed, &mut one)?),
        Expression::Intersect(s) => {
            Expression::Intersect(rewrite_set_op(s, &mut changed, &mut one)?)
        }
        Expression::Update(u) => {
            let table = one(&u.table, &mut changed)?;
            let assignments = u
                .assignments
                .iter()
                .map(|a| {
                    Ok(Assignment {
                        column: one(&a.column, &mut changed)?,
                        value: one(&a.value, &mut changed)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let select = one(&u.select, &mut changed)?;
            Expression::Update(crate::expressions::Update {
                table,
                assignments,
                select,
            })
        }
        Expression::Delete(d) => {
            let table = one(&d.table, &mut changed)?;
            let select = one(&d.select, &mut changed)?;
            Expression::Delete(crate::expressions::Delete { table, select })
        }
    };

    if changed {
        Ok(Arc::new(rebuilt))
    } else {
        Ok(expr.clone())
    }
}

fn rewrite_opt<F>(opt: &Option<Expr>, changed: &mut bool, one: &mut F) -> Result<Option<Expr>>
where
    F: FnMut(&Expr, &mut bool) -> Result<Expr>,
{
    match opt {
        Some(e) => Ok(Some(one(e, changed)?)),
        None => Ok(None),
    }
}

fn rewrite_vec<F>(exprs: &[Expr], changed: &mut bool, one: &mut F) -> Result<Vec<Expr>>
where
    F: FnMut(&Expr, &mut bool) -> Result<Expr>,
{
    exprs.iter().map(|e| one(e, changed)).collect()
}

fn rewrite_orderings<F>(
    orderings: &[Ordering],
    changed: &mut bool,
    one: &mut F,
) -> Result<Vec<Ordering>>
where
    F: FnMut(&Expr, &mut bool) -> Result<Expr>,
{
    orderings
        .iter()
        .map(|o| {
            Ok(Ordering {
                expr: one(&o.expr, changed)?,
                ascending: o.ascending,
            })
        })
        .collect()
}

fn rewrite_path<F>(
    path: &[crate::expressions::PathSegment],
    changed: &mut bool,
    one: &mut F,
) -> Result<Vec<crate::expressions::PathSegment>>
where
    F: FnMut(&Expr, &mut bool) -> Result<Expr>,
{
    path.iter()
        .map(|seg| match seg {
            crate::expressions::PathSegment::Key(k) => {
                Ok(crate::expressions::PathSegment::Key(k.clone()))
            }
            crate::expressions::PathSegment::Index(e) => Ok(
                crate::expressions::PathSegment::Index(one(e, changed)?),
            ),
        })
        .collect()
}

fn rewrite_set_op<F>(
    s: &crate::expressions::SetOperation,
    changed: &mut bool,
    one: &mut F,
) -> Result<crate::expressions::SetOperation>
where
    F: FnMut(&Expr, &mut bool) -> Result<Expr>,
{
    Ok(crate::expressions::SetOperation {
        alias: s.alias.clone(),
        left: one(&s.left, changed)?,
        right: one(&s.right, changed)?,
        distinct: s.distinct,
    })
}
