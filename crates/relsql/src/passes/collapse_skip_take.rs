//! Skip/Take collapsing.
//!
//! Folds trivial pagination into a provably-empty query shape: a Select
//! whose LIMIT/OFFSET window requests zero rows keeps its projection and
//! sources but gets a constant-false condition instead, with orderings and
//! pagination cleared. Because the fold can depend on the *value* bound to a
//! runtime parameter, the pass also reports whether the resulting SQL shape
//! is valid for every future parameter binding or only for the current one.

use crate::error::{Error, Result};
use crate::expressions::{always_false, Expr, Expression, ParameterValues, Select, Value};
use crate::passes::rewrite_children;
use std::sync::Arc;

/// Run the pass. Returns the rewritten tree and the cacheability flag:
/// `false` whenever a LIMIT or OFFSET was parameter-driven, since a later
/// execution with a different binding would need a different shape.
pub fn collapse_skip_take(
    expr: &Expr,
    parameters: &ParameterValues,
) -> Result<(Expr, bool)> {
    let mut collapser = Collapser {
        parameters,
        cacheable: true,
    };
    let rewritten = collapser.visit(expr)?;
    Ok((rewritten, collapser.cacheable))
}

struct Collapser<'a> {
    parameters: &'a ParameterValues,
    cacheable: bool,
}

impl Collapser<'_> {
    fn visit(&mut self, expr: &Expr) -> Result<Expr> {
        let expr = rewrite_children(expr, &mut |child| self.visit(child))?;

        if let Expression::Select(select) = expr.as_ref() {
            if self.window_is_empty(select)? {
                return Ok(Arc::new(Expression::Select(self.collapse(select))));
            }
        }
        Ok(expr)
    }

    /// Whether every pagination clause present on this Select evaluates to
    /// zero under the current bindings (and at least one is present).
    fn window_is_empty(&mut self, select: &Select) -> Result<bool> {
        if select.limit.is_none() && select.offset.is_none() {
            return Ok(false);
        }
        for clause in [&select.limit, &select.offset].into_iter().flatten() {
            if !self.is_zero(clause)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_zero(&mut self, expr: &Expr) -> Result<bool> {
        match expr.as_ref() {
            Expression::Literal(lit) => Ok(lit.value.as_int() == Some(0)),
            Expression::Parameter(param) => {
                // The compiled shape now depends on this binding.
                self.cacheable = false;
                let value = self.parameters.get(&param.name).ok_or_else(|| {
                    Error::internal(format!("no value bound for parameter @{}", param.name))
                })?;
                Ok(matches!(value, Value::Int(0)))
            }
            _ => Ok(false),
        }
    }

    /// Rebuild the Select as a zero-row shape. The constant-false condition
    /// goes into HAVING when a GROUP BY is present, since the predicate
    /// filters pre-grouping rows.
    fn collapse(&self, select: &Select) -> Select {
        let grouped = !select.group_by.is_empty();
        Select {
            distinct: select.distinct,
            projection: select.projection.clone(),
            tables: select.tables.clone(),
            predicate: if grouped {
                select.predicate.clone()
            } else {
                Some(always_false())
            },
            group_by: select.group_by.clone(),
            having: if grouped { Some(always_false()) } else { None },
            orderings: Vec::new(),
            limit: None,
            offset: None,
            alias: select.alias.clone(),
        }
    }
}
