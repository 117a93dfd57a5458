//! SQL text emission.
//!
//! Walks the final tree once and writes dialect SQL, owning every syntax
//! decision that is not tree shape: operator precedence and parenthesization,
//! pagination clauses (LIMIT/OFFSET only, never a per-statement row-count
//! keyword, with OFFSET requiring an ORDER BY that is synthesized as
//! `ORDER BY (SELECT 1)` when none survived the passes), JSON path text, and
//! the statement-shape restrictions of UPDATE/DELETE-FROM forms.
//!
//! The generator trusts the passes for semantic shaping; what it rejects
//! here are constructs the dialect has no spelling for at all.

use crate::error::{Error, Result};
use crate::expressions::{
    BinaryOperator, Expr, Expression, JoinKind, JsonColumn, Ordering, PathSegment, Select,
    TypeKind, UnaryOperator, Value,
};
use crate::quoting::{quote_identifier, quote_string};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Lowest compatibility level that can evaluate a JSON path with a
/// non-constant array index.
pub const MIN_COMPATIBILITY_LEVEL: u32 = 140;

/// Precedence levels, higher binds tighter. Anything not in the binary
/// operator table (casts, function calls, atoms) is treated as atomic.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_COMPARISON: u8 = 3;
const PREC_BITWISE: u8 = 4;
const PREC_ADDITIVE: u8 = 5;
const PREC_MULTIPLICATIVE: u8 = 6;
const PREC_UNARY: u8 = 7;
const PREC_ATOM: u8 = 8;

static BINARY_OPERATORS: Lazy<HashMap<BinaryOperator, (&'static str, u8)>> = Lazy::new(|| {
    HashMap::from([
        (BinaryOperator::Or, ("OR", PREC_OR)),
        (BinaryOperator::And, ("AND", PREC_AND)),
        (BinaryOperator::Eq, ("=", PREC_COMPARISON)),
        (BinaryOperator::Neq, ("<>", PREC_COMPARISON)),
        (BinaryOperator::Gt, (">", PREC_COMPARISON)),
        (BinaryOperator::Gte, (">=", PREC_COMPARISON)),
        (BinaryOperator::Lt, ("<", PREC_COMPARISON)),
        (BinaryOperator::Lte, ("<=", PREC_COMPARISON)),
        (BinaryOperator::BitwiseAnd, ("&", PREC_BITWISE)),
        (BinaryOperator::BitwiseOr, ("|", PREC_BITWISE)),
        (BinaryOperator::Add, ("+", PREC_ADDITIVE)),
        (BinaryOperator::Sub, ("-", PREC_ADDITIVE)),
        (BinaryOperator::Concat, ("+", PREC_ADDITIVE)),
        (BinaryOperator::Mul, ("*", PREC_MULTIPLICATIVE)),
        (BinaryOperator::Div, ("/", PREC_MULTIPLICATIVE)),
        (BinaryOperator::Mod, ("%", PREC_MULTIPLICATIVE)),
    ])
});

/// Full-text predicate functions; their first argument must be a plain
/// column reference.
const FULL_TEXT_FUNCTIONS: &[&str] = &["CONTAINS", "FREETEXT"];

/// Knobs the emission stage honors.
#[derive(Debug, Clone)]
pub struct LoweringOptions {
    /// Database compatibility level, gating JSON path features.
    pub compatibility_level: u32,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            compatibility_level: 150,
        }
    }
}

/// The emitted command: SQL text plus the runtime parameters it references,
/// in order of first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<String>,
}

/// Emit SQL for a finished statement tree.
pub fn generate(expr: &Expr, options: &LoweringOptions) -> Result<Command> {
    let mut generator = Generator {
        options,
        sql: String::new(),
        parameters: Vec::new(),
    };
    generator.visit_statement(expr)?;
    Ok(Command {
        text: generator.sql,
        parameters: generator.parameters,
    })
}

struct Generator<'a> {
    options: &'a LoweringOptions,
    sql: String,
    parameters: Vec<String>,
}

impl Generator<'_> {
    fn visit_statement(&mut self, expr: &Expr) -> Result<()> {
        match expr.as_ref() {
            Expression::Select(s) => self.visit_select(s),
            Expression::Union(_) | Expression::Except(_) | Expression::Intersect(_) => {
                self.visit_set_operation(expr, false)
            }
            Expression::Update(u) => self.visit_update(u),
            Expression::Delete(d) => self.visit_delete(d),
            // A bare VALUES list cannot stand as a statement; wrap it.
            Expression::ValuesList(_) => {
                let wrapped = Select::from_source(expr.clone());
                self.visit_select(&wrapped)
            }
            other => Err(Error::internal(format!(
                "statement root must be a query or DML node, got {other:?}"
            ))),
        }
    }

    fn visit_select(&mut self, select: &Select) -> Result<()> {
        self.sql.push_str("SELECT ");
        if select.distinct {
            self.sql.push_str("DISTINCT ");
        }
        if select.projection.is_empty() {
            self.sql.push('1');
        } else {
            for (i, projection) in select.projection.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.visit(&projection.expr)?;
                if let Some(alias) = &projection.alias {
                    self.sql.push_str(" AS ");
                    self.sql.push_str(&quote_identifier(alias));
                }
            }
        }

        if !select.tables.is_empty() {
            self.sql.push_str(" FROM ");
            for (i, table) in select.tables.iter().enumerate() {
                if i > 0 && !matches!(table.as_ref(), Expression::Join(_)) {
                    self.sql.push_str(", ");
                } else if i > 0 {
                    self.sql.push(' ');
                }
                self.visit_source(table)?;
            }
        }

        if let Some(predicate) = &select.predicate {
            self.sql.push_str(" WHERE ");
            self.visit(predicate)?;
        }

        if !select.group_by.is_empty() {
            self.sql.push_str(" GROUP BY ");
            for (i, expr) in select.group_by.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.visit(expr)?;
            }
        }

        if let Some(having) = &select.having {
            self.sql.push_str(" HAVING ");
            self.visit(having)?;
        }

        if !select.orderings.is_empty() {
            self.sql.push_str(" ORDER BY ");
            self.visit_orderings(&select.orderings)?;
        } else if select.offset.is_some() {
            // OFFSET is invalid without an ORDER BY; a no-op ordering keeps
            // the statement well-formed without imposing an order.
            self.sql.push_str(" ORDER BY (SELECT 1)");
        }

        if let Some(limit) = &select.limit {
            self.sql.push_str(" LIMIT ");
            self.visit(limit)?;
        }
        if let Some(offset) = &select.offset {
            self.sql.push_str(" OFFSET ");
            self.visit(offset)?;
        }
        Ok(())
    }

    fn visit_orderings(&mut self, orderings: &[Ordering]) -> Result<()> {
        for (i, ordering) in orderings.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.visit(&ordering.expr)?;
            if !ordering.ascending {
                self.sql.push_str(" DESC");
            }
        }
        Ok(())
    }

    /// A table-list entry: base table, join, derived query, JSON expansion,
    /// inline VALUES, or set operation.
    fn visit_source(&mut self, expr: &Expr) -> Result<()> {
        match expr.as_ref() {
            Expression::Table(t) => {
                self.sql.push_str(&quote_identifier(&t.name));
                self.sql.push_str(" AS ");
                self.sql.push_str(&quote_identifier(&t.alias));
                Ok(())
            }
            Expression::Join(j) => {
                self.sql.push_str(match j.kind {
                    JoinKind::Inner => "INNER JOIN ",
                    JoinKind::LeftOuter => "LEFT JOIN ",
                    JoinKind::Cross => "CROSS JOIN ",
                    JoinKind::CrossApply => "CROSS APPLY ",
                    JoinKind::OuterApply => "OUTER APPLY ",
                });
                self.visit_source(&j.table)?;
                if let Some(on) = &j.on {
                    self.sql.push_str(" ON ");
                    self.visit(on)?;
                }
                Ok(())
            }
            Expression::Select(s) => {
                let alias = s.alias.clone().ok_or_else(|| {
                    Error::internal("derived query used as a source without an alias")
                })?;
                self.sql.push('(');
                self.visit_select(s)?;
                self.sql.push_str(") AS ");
                self.sql.push_str(&quote_identifier(&alias));
                Ok(())
            }
            Expression::JsonTable(j) => self.visit_json_table(j),
            Expression::ValuesList(v) => {
                if v.rows.is_empty() {
                    return Err(Error::unsupported("VALUES list with no rows"));
                }
                self.sql.push_str("(VALUES ");
                for (i, row) in v.rows.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.sql.push('(');
                    for (k, value) in row.iter().enumerate() {
                        if k > 0 {
                            self.sql.push_str(", ");
                        }
                        self.visit(value)?;
                    }
                    self.sql.push(')');
                }
                self.sql.push_str(") AS ");
                self.sql.push_str(&quote_identifier(&v.alias));
                self.sql.push('(');
                for (i, name) in v.column_names.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.sql.push_str(&quote_identifier(name));
                }
                self.sql.push(')');
                Ok(())
            }
            Expression::Union(_) | Expression::Except(_) | Expression::Intersect(_) => {
                self.visit_set_operation(expr, true)
            }
            other => Err(Error::internal(format!(
                "unexpected node in a table list: {other:?}"
            ))),
        }
    }

    fn visit_set_operation(&mut self, expr: &Expr, as_source: bool) -> Result<()> {
        let (op, keyword) = match expr.as_ref() {
            Expression::Union(s) => (s, if s.distinct { "UNION" } else { "UNION ALL" }),
            Expression::Except(s) => (s, "EXCEPT"),
            Expression::Intersect(s) => (s, "INTERSECT"),
            other => {
                return Err(Error::internal(format!(
                    "expected a set operation, got {other:?}"
                )))
            }
        };
        if as_source {
            self.sql.push('(');
        }
        self.visit_query(&op.left)?;
        self.sql.push(' ');
        self.sql.push_str(keyword);
        self.sql.push(' ');
        self.visit_query(&op.right)?;
        if as_source {
            self.sql.push_str(") AS ");
            self.sql.push_str(&quote_identifier(&op.alias));
        }
        Ok(())
    }

    /// One side of a set operation: a Select or a nested set operation.
    fn visit_query(&mut self, expr: &Expr) -> Result<()> {
        match expr.as_ref() {
            Expression::Select(s) => self.visit_select(s),
            Expression::Union(_) | Expression::Except(_) | Expression::Intersect(_) => {
                self.sql.push('(');
                self.visit_set_operation(expr, false)?;
                self.sql.push(')');
                Ok(())
            }
            other => Err(Error::internal(format!(
                "set operation side must be a query, got {other:?}"
            ))),
        }
    }

    fn visit_json_table(&mut self, table: &crate::expressions::JsonTable) -> Result<()> {
        self.sql.push_str("OPENJSON(");
        self.visit(&table.json)?;
        if let Some(path) = &table.path {
            self.sql.push_str(", ");
            self.visit_json_path(path)?;
        }
        self.sql.push(')');
        if let Some(columns) = &table.columns {
            self.sql.push_str(" WITH (");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.visit_json_column(column)?;
            }
            self.sql.push(')');
        }
        self.sql.push_str(" AS ");
        self.sql.push_str(&quote_identifier(&table.alias));
        Ok(())
    }

    fn visit_json_column(&mut self, column: &JsonColumn) -> Result<()> {
        self.sql.push_str(&quote_identifier(&column.name));
        self.sql.push(' ');
        self.sql.push_str(&column.store_type);
        if !column.path.is_empty() {
            self.sql.push(' ');
            self.visit_json_path(&column.path)?;
        }
        if column.as_json {
            self.sql.push_str(" AS JSON");
        }
        Ok(())
    }

    /// Render a JSON path as a string literal, or as a string concatenation
    /// when some array index is not a constant. The concatenated form only
    /// evaluates above [`MIN_COMPATIBILITY_LEVEL`].
    fn visit_json_path(&mut self, path: &[PathSegment]) -> Result<()> {
        let constant = path
            .iter()
            .all(|seg| !matches!(seg, PathSegment::Index(e) if e.as_constant().is_none()));
        if constant {
            let mut text = String::from("$");
            for segment in path {
                match segment {
                    PathSegment::Key(key) => {
                        text.push('.');
                        text.push_str(key);
                    }
                    PathSegment::Index(index) => match index.as_constant() {
                        Some(Value::Int(i)) => {
                            let _ = write!(text, "[{i}]");
                        }
                        _ => {
                            return Err(Error::internal(
                                "constant JSON path with a non-integer index",
                            ))
                        }
                    },
                }
            }
            self.sql.push_str(&quote_string(&text));
            return Ok(());
        }

        if self.options.compatibility_level < MIN_COMPATIBILITY_LEVEL {
            return Err(Error::unsupported(format!(
                "JSON path with a non-constant array index below compatibility level {MIN_COMPATIBILITY_LEVEL}"
            )));
        }
        // '$.a[' + CAST(@i AS nvarchar(max)) + ']' piecewise.
        let mut literal = String::from("$");
        for segment in path {
            match segment {
                PathSegment::Key(key) => {
                    literal.push('.');
                    literal.push_str(key);
                }
                PathSegment::Index(index) => {
                    if let Some(Value::Int(i)) = index.as_constant() {
                        let _ = write!(literal, "[{i}]");
                        continue;
                    }
                    literal.push('[');
                    self.sql.push_str(&quote_string(&literal));
                    literal.clear();
                    self.sql.push_str(" + CAST(");
                    self.visit(index)?;
                    self.sql.push_str(" AS nvarchar(max)) + ");
                    literal.push(']');
                }
            }
        }
        self.sql.push_str(&quote_string(&literal));
        Ok(())
    }

    fn visit_update(&mut self, update: &crate::expressions::Update) -> Result<()> {
        let select = query_for_dml(&update.select, "UPDATE")?;
        check_dml_shape(select, "UPDATE")?;
        let alias = source_alias(&update.table, "UPDATE")?;

        self.sql.push_str("UPDATE ");
        self.sql.push_str(&quote_identifier(alias));
        self.sql.push_str(" SET ");
        for (i, assignment) in update.assignments.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.visit(&assignment.column)?;
            self.sql.push_str(" = ");
            self.visit(&assignment.value)?;
        }
        self.sql.push_str(" FROM ");
        self.visit_from_list(&select.tables)?;
        if let Some(predicate) = &select.predicate {
            self.sql.push_str(" WHERE ");
            self.visit(predicate)?;
        }
        Ok(())
    }

    fn visit_delete(&mut self, delete: &crate::expressions::Delete) -> Result<()> {
        let select = query_for_dml(&delete.select, "DELETE")?;
        check_dml_shape(select, "DELETE")?;
        if !select.projection.is_empty() {
            return Err(Error::unsupported("DELETE over a query with a projection"));
        }
        let alias = source_alias(&delete.table, "DELETE")?;

        self.sql.push_str("DELETE FROM ");
        self.sql.push_str(&quote_identifier(alias));
        self.sql.push_str(" FROM ");
        self.visit_from_list(&select.tables)?;
        if let Some(predicate) = &select.predicate {
            self.sql.push_str(" WHERE ");
            self.visit(predicate)?;
        }
        Ok(())
    }

    fn visit_from_list(&mut self, tables: &[Expr]) -> Result<()> {
        for (i, table) in tables.iter().enumerate() {
            if i > 0 && !matches!(table.as_ref(), Expression::Join(_)) {
                self.sql.push_str(", ");
            } else if i > 0 {
                self.sql.push(' ');
            }
            self.visit_source(table)?;
        }
        Ok(())
    }

    /// Scalar and predicate expressions.
    fn visit(&mut self, expr: &Expr) -> Result<()> {
        match expr.as_ref() {
            Expression::Column(c) => {
                self.sql.push_str(&quote_identifier(&c.table));
                self.sql.push('.');
                self.sql.push_str(&quote_identifier(&c.name));
                Ok(())
            }
            Expression::Literal(l) => self.visit_value(&l.value),
            Expression::Parameter(p) => {
                if !self.parameters.contains(&p.name) {
                    self.parameters.push(p.name.clone());
                }
                self.sql.push('@');
                self.sql.push_str(&p.name);
                Ok(())
            }
            Expression::Unary(u) => self.visit_unary(u),
            Expression::Binary(b) => self.visit_binary(b),
            Expression::Case(c) => {
                self.sql.push_str("CASE");
                if let Some(operand) = &c.operand {
                    self.sql.push(' ');
                    self.visit(operand)?;
                }
                for when in &c.whens {
                    self.sql.push_str(" WHEN ");
                    self.visit(&when.test)?;
                    self.sql.push_str(" THEN ");
                    self.visit(&when.result)?;
                }
                if let Some(else_) = &c.else_ {
                    self.sql.push_str(" ELSE ");
                    self.visit(else_)?;
                }
                self.sql.push_str(" END");
                Ok(())
            }
            Expression::Function(f) => self.visit_function(f),
            Expression::OrderedAggregate(agg) => {
                self.sql.push_str(&agg.name);
                self.sql.push('(');
                for (i, arg) in agg.args.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.visit(arg)?;
                }
                self.sql.push_str(") WITHIN GROUP (ORDER BY ");
                self.visit_orderings(&agg.orderings)?;
                self.sql.push(')');
                Ok(())
            }
            Expression::Cast(c) => {
                self.sql.push_str("CAST(");
                self.visit(&c.operand)?;
                self.sql.push_str(" AS ");
                self.sql.push_str(&c.ty.store_type);
                self.sql.push(')');
                Ok(())
            }
            Expression::Collate(c) => {
                self.visit(&c.operand)?;
                self.sql.push_str(" COLLATE ");
                self.sql.push_str(&c.collation);
                Ok(())
            }
            Expression::Distinct(d) => {
                self.sql.push_str("DISTINCT ");
                self.visit(&d.operand)
            }
            Expression::Exists(e) => {
                self.sql.push_str("EXISTS ");
                self.visit_subquery(&e.subquery)
            }
            Expression::In(i) => {
                self.visit_operand(&i.operand, PREC_COMPARISON)?;
                self.sql.push_str(if i.negated { " NOT IN " } else { " IN " });
                match &i.list {
                    crate::expressions::InList::Values(values) => {
                        if values.is_empty() {
                            return Err(Error::internal("IN predicate with an empty list"));
                        }
                        self.sql.push('(');
                        for (k, value) in values.iter().enumerate() {
                            if k > 0 {
                                self.sql.push_str(", ");
                            }
                            self.visit(value)?;
                        }
                        self.sql.push(')');
                        Ok(())
                    }
                    crate::expressions::InList::Subquery(s) => self.visit_subquery(s),
                }
            }
            Expression::Like(l) => {
                self.visit_operand(&l.operand, PREC_COMPARISON)?;
                self.sql.push_str(" LIKE ");
                self.visit_operand(&l.pattern, PREC_COMPARISON)?;
                if let Some(escape) = &l.escape {
                    self.sql.push_str(" ESCAPE ");
                    self.visit(escape)?;
                }
                Ok(())
            }
            Expression::JsonScalar(j) => {
                // Renders as a function call; never needs outer parentheses.
                self.sql.push_str(if j.ty.kind == TypeKind::Json {
                    "JSON_QUERY("
                } else {
                    "JSON_VALUE("
                });
                self.visit(&j.column)?;
                self.sql.push_str(", ");
                self.visit_json_path(&j.path)?;
                self.sql.push(')');
                Ok(())
            }
            Expression::Select(s) => {
                self.sql.push('(');
                self.visit_select(s)?;
                self.sql.push(')');
                Ok(())
            }
            other => Err(Error::internal(format!(
                "unexpected node in a scalar position: {other:?}"
            ))),
        }
    }

    fn visit_subquery(&mut self, expr: &Expr) -> Result<()> {
        match expr.as_ref() {
            Expression::Select(s) => {
                self.sql.push('(');
                self.visit_select(s)?;
                self.sql.push(')');
                Ok(())
            }
            other => Err(Error::internal(format!(
                "expected a subquery, got {other:?}"
            ))),
        }
    }

    fn visit_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.sql.push_str("NULL"),
            Value::Bool(b) => self.sql.push(if *b { '1' } else { '0' }),
            Value::Int(i) => {
                let _ = write!(self.sql, "{i}");
            }
            Value::Double(d) => self.sql.push_str(d),
            Value::Text(t) => {
                self.sql.push('N');
                self.sql.push_str(&quote_string(t));
            }
            Value::Bytes(bytes) => {
                self.sql.push_str("0x");
                for byte in bytes {
                    let _ = write!(self.sql, "{byte:02X}");
                }
            }
        }
        Ok(())
    }

    fn visit_unary(&mut self, unary: &crate::expressions::Unary) -> Result<()> {
        match unary.op {
            UnaryOperator::Not => {
                self.sql.push_str("NOT (");
                self.visit(&unary.operand)?;
                self.sql.push(')');
            }
            UnaryOperator::Negate => {
                self.sql.push('-');
                self.visit_operand(&unary.operand, PREC_UNARY)?;
            }
            UnaryOperator::BitwiseNot => {
                self.sql.push('~');
                self.visit_operand(&unary.operand, PREC_UNARY)?;
            }
            UnaryOperator::IsNull => {
                self.visit_operand(&unary.operand, PREC_COMPARISON)?;
                self.sql.push_str(" IS NULL");
            }
            UnaryOperator::IsNotNull => {
                self.visit_operand(&unary.operand, PREC_COMPARISON)?;
                self.sql.push_str(" IS NOT NULL");
            }
        }
        Ok(())
    }

    fn visit_binary(&mut self, binary: &crate::expressions::Binary) -> Result<()> {
        let (token, precedence) = *BINARY_OPERATORS.get(&binary.op).ok_or_else(|| {
            Error::ambiguous_operator(format!("{:?}", binary.op), binary.ty.store_type.clone())
        })?;
        self.visit_operand(&binary.left, precedence)?;
        self.sql.push(' ');
        self.sql.push_str(token);
        self.sql.push(' ');
        // Same-precedence right operands keep their parentheses so that
        // non-associative operators stay correct.
        self.visit_operand_strict(&binary.right, precedence)
    }

    /// Visit a child, parenthesizing it when it binds looser than the
    /// enclosing operator.
    fn visit_operand(&mut self, expr: &Expr, parent_precedence: u8) -> Result<()> {
        if precedence_of(expr) < parent_precedence {
            self.sql.push('(');
            self.visit(expr)?;
            self.sql.push(')');
        } else {
            self.visit(expr)?;
        }
        Ok(())
    }

    /// As [`visit_operand`], but also parenthesizes equal precedence.
    fn visit_operand_strict(&mut self, expr: &Expr, parent_precedence: u8) -> Result<()> {
        if precedence_of(expr) <= parent_precedence && precedence_of(expr) < PREC_ATOM {
            self.sql.push('(');
            self.visit(expr)?;
            self.sql.push(')');
        } else {
            self.visit(expr)?;
        }
        Ok(())
    }

    fn visit_function(&mut self, function: &crate::expressions::Function) -> Result<()> {
        if FULL_TEXT_FUNCTIONS
            .iter()
            .any(|n| function.name.eq_ignore_ascii_case(n))
        {
            let column_first = function
                .args
                .first()
                .map(|a| matches!(a.as_ref(), Expression::Column(_)))
                .unwrap_or(false);
            if !column_first {
                return Err(Error::unsupported(format!(
                    "{} over a non-column operand",
                    function.name
                )));
            }
        }
        self.sql.push_str(&function.name);
        if function.niladic {
            return Ok(());
        }
        self.sql.push('(');
        for (i, arg) in function.args.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.visit(arg)?;
        }
        self.sql.push(')');
        Ok(())
    }
}

fn precedence_of(expr: &Expr) -> u8 {
    match expr.as_ref() {
        Expression::Binary(b) => BINARY_OPERATORS
            .get(&b.op)
            .map(|(_, p)| *p)
            .unwrap_or(PREC_ATOM),
        Expression::Unary(u) => match u.op {
            UnaryOperator::Negate | UnaryOperator::BitwiseNot => PREC_UNARY,
            UnaryOperator::IsNull | UnaryOperator::IsNotNull => PREC_COMPARISON,
            UnaryOperator::Not => PREC_ATOM,
        },
        Expression::In(_) | Expression::Like(_) => PREC_COMPARISON,
        Expression::Collate(_) => PREC_UNARY,
        _ => PREC_ATOM,
    }
}

/// The Select a DML statement executes over.
fn query_for_dml<'a>(expr: &'a Expr, statement: &str) -> Result<&'a Select> {
    expr.as_select()
        .ok_or_else(|| Error::internal(format!("{statement} over a non-Select query")))
}

/// The FROM-form of UPDATE and DELETE cannot express grouping, ordering or
/// pagination.
fn check_dml_shape(select: &Select, statement: &str) -> Result<()> {
    if select.offset.is_some() {
        return Err(Error::unsupported(format!(
            "{statement} over a query with an OFFSET"
        )));
    }
    if select.limit.is_some() {
        return Err(Error::unsupported(format!(
            "{statement} over a query with a LIMIT"
        )));
    }
    if select.having.is_some() {
        return Err(Error::unsupported(format!(
            "{statement} over a query with a HAVING clause"
        )));
    }
    if !select.orderings.is_empty() {
        return Err(Error::unsupported(format!(
            "{statement} over an ordered query"
        )));
    }
    if !select.group_by.is_empty() {
        return Err(Error::unsupported(format!(
            "{statement} over a grouped query"
        )));
    }
    Ok(())
}

fn source_alias<'a>(table: &'a Expr, statement: &str) -> Result<&'a str> {
    table
        .source_alias()
        .ok_or_else(|| Error::internal(format!("{statement} target without an alias")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::{Projection, TypeInfo};
    use std::sync::Arc;

    fn sql(expr: &Expr) -> String {
        generate(expr, &LoweringOptions::default()).unwrap().text
    }

    fn int_col(table: &str, name: &str) -> Expr {
        Expression::column(table, name, TypeInfo::int())
    }

    fn orders() -> Select {
        Select::from_source(Expression::table("orders", "o"))
            .with_projection(vec![Projection::unaliased(int_col("o", "id"))])
    }

    #[test]
    fn plain_select() {
        assert_eq!(
            sql(&orders().into_expr()),
            "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\""
        );
    }

    #[test]
    fn where_and_order_by() {
        let select = orders()
            .with_predicate(Expression::gt(int_col("o", "total"), Expression::int(100)))
            .with_orderings(vec![Ordering::desc(int_col("o", "total"))])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\" \
             WHERE \"o\".\"total\" > 100 ORDER BY \"o\".\"total\" DESC"
        );
    }

    #[test]
    fn offset_without_orderings_synthesizes_order_by() {
        let select = orders().with_offset(Expression::int(10)).into_expr();
        assert_eq!(
            sql(&select),
            "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\" ORDER BY (SELECT 1) OFFSET 10"
        );
    }

    #[test]
    fn limit_and_offset_with_orderings() {
        let select = orders()
            .with_orderings(vec![Ordering::asc(int_col("o", "id"))])
            .with_limit(Expression::int(5))
            .with_offset(Expression::int(10))
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\" \
             ORDER BY \"o\".\"id\" LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn logical_operators_are_textual() {
        let select = orders()
            .with_predicate(Expression::and(
                Expression::gt(int_col("o", "a"), Expression::int(1)),
                Expression::or(
                    Expression::eq(int_col("o", "b"), Expression::int(2)),
                    Expression::eq(int_col("o", "c"), Expression::int(3)),
                ),
            ))
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\" \
             WHERE \"o\".\"a\" > 1 AND (\"o\".\"b\" = 2 OR \"o\".\"c\" = 3)"
        );
    }

    #[test]
    fn arithmetic_precedence_parenthesization() {
        let sum = Expression::binary(
            BinaryOperator::Add,
            int_col("o", "a"),
            int_col("o", "b"),
            TypeInfo::int(),
        );
        let product = Expression::binary(
            BinaryOperator::Mul,
            sum,
            int_col("o", "c"),
            TypeInfo::int(),
        );
        let select = orders()
            .with_projection(vec![Projection::unaliased(product)])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT (\"o\".\"a\" + \"o\".\"b\") * \"o\".\"c\" FROM \"orders\" AS \"o\""
        );
    }

    #[test]
    fn subtraction_keeps_right_operand_parenthesized() {
        let inner = Expression::binary(
            BinaryOperator::Sub,
            int_col("o", "b"),
            int_col("o", "c"),
            TypeInfo::int(),
        );
        let outer = Expression::binary(
            BinaryOperator::Sub,
            int_col("o", "a"),
            inner,
            TypeInfo::int(),
        );
        let select = orders()
            .with_projection(vec![Projection::unaliased(outer)])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT \"o\".\"a\" - (\"o\".\"b\" - \"o\".\"c\") FROM \"orders\" AS \"o\""
        );
    }

    #[test]
    fn text_literals_are_escaped() {
        let select = orders()
            .with_predicate(Expression::eq(
                Expression::column("o", "name", TypeInfo::text()),
                Expression::text("O'Brien"),
            ))
            .into_expr();
        assert!(sql(&select).contains("N'O''Brien'"));
    }

    #[test]
    fn parameters_are_collected_in_order() {
        let select = orders()
            .with_predicate(Expression::and(
                Expression::gt(
                    int_col("o", "total"),
                    Expression::parameter("min", TypeInfo::int()),
                ),
                Expression::gt(
                    Expression::parameter("max", TypeInfo::int()),
                    int_col("o", "total"),
                ),
            ))
            .into_expr();
        let command = generate(&select, &LoweringOptions::default()).unwrap();
        assert!(command.text.contains("@min"));
        assert_eq!(command.parameters, vec!["min".to_owned(), "max".to_owned()]);
    }

    #[test]
    fn json_scalar_renders_as_function_call() {
        let extraction = Expression::json_scalar(
            Expression::column("o", "data", TypeInfo::nullable(TypeKind::Json, "json")),
            vec![PathSegment::key("customer"), PathSegment::key("name")],
            TypeInfo::nullable(TypeKind::Text, "nvarchar(max)"),
        );
        let select = orders()
            .with_projection(vec![Projection::unaliased(extraction)])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT JSON_VALUE(\"o\".\"data\", '$.customer.name') FROM \"orders\" AS \"o\""
        );
    }

    #[test]
    fn variable_json_index_concatenates_path() {
        let extraction = Expression::json_scalar(
            Expression::column("o", "data", TypeInfo::nullable(TypeKind::Json, "json")),
            vec![
                PathSegment::key("items"),
                PathSegment::Index(Expression::parameter("i", TypeInfo::int())),
            ],
            TypeInfo::nullable(TypeKind::Text, "nvarchar(max)"),
        );
        let select = orders()
            .with_projection(vec![Projection::unaliased(extraction)])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT JSON_VALUE(\"o\".\"data\", \
             '$.items[' + CAST(@i AS nvarchar(max)) + ']') FROM \"orders\" AS \"o\""
        );
    }

    #[test]
    fn variable_json_index_below_minimum_level_fails() {
        let extraction = Expression::json_scalar(
            Expression::column("o", "data", TypeInfo::nullable(TypeKind::Json, "json")),
            vec![PathSegment::Index(Expression::parameter(
                "i",
                TypeInfo::int(),
            ))],
            TypeInfo::nullable(TypeKind::Text, "nvarchar(max)"),
        );
        let select = orders()
            .with_projection(vec![Projection::unaliased(extraction)])
            .into_expr();
        let options = LoweringOptions {
            compatibility_level: 130,
        };
        let err = generate(&select, &options).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn bare_json_table_source() {
        let table = Arc::new(Expression::JsonTable(crate::expressions::JsonTable {
            alias: "j".into(),
            json: Expression::parameter("items", TypeInfo::nullable(TypeKind::Json, "json")),
            path: None,
            columns: None,
        }));
        let select = Select::from_source(table)
            .with_projection(vec![Projection::unaliased(Expression::column(
                "j",
                "value",
                TypeInfo::nullable(TypeKind::Text, "nvarchar(max)"),
            ))])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT \"j\".\"value\" FROM OPENJSON(@items) AS \"j\""
        );
    }

    #[test]
    fn rich_json_table_source() {
        let table = Arc::new(Expression::JsonTable(crate::expressions::JsonTable {
            alias: "j".into(),
            json: Expression::parameter("items", TypeInfo::nullable(TypeKind::Json, "json")),
            path: None,
            columns: Some(vec![crate::expressions::JsonColumn {
                name: "price".into(),
                kind: TypeKind::Int,
                store_type: "int".into(),
                path: vec![PathSegment::key("price")],
                as_json: false,
            }]),
        }));
        let select = Select::from_source(table)
            .with_projection(vec![Projection::unaliased(int_col("j", "price"))])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT \"j\".\"price\" FROM OPENJSON(@items) \
             WITH (\"price\" int '$.price') AS \"j\""
        );
    }

    #[test]
    fn values_source_and_top_level_wrapping() {
        let values = Arc::new(Expression::ValuesList(crate::expressions::ValuesList {
            alias: "v".into(),
            column_names: vec!["n".into()],
            rows: vec![vec![Expression::int(1)], vec![Expression::int(2)]],
        }));
        assert_eq!(
            sql(&values),
            "SELECT 1 FROM (VALUES (1), (2)) AS \"v\"(\"n\")"
        );
    }

    #[test]
    fn empty_values_list_is_unsupported() {
        let values = Arc::new(Expression::ValuesList(crate::expressions::ValuesList {
            alias: "v".into(),
            column_names: vec!["n".into()],
            rows: Vec::new(),
        }));
        let err = generate(&values, &LoweringOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn union_all_statement() {
        let left = orders().into_expr();
        let right = orders().into_expr();
        let union = Arc::new(Expression::Union(crate::expressions::SetOperation {
            alias: "u".into(),
            left,
            right,
            distinct: false,
        }));
        assert_eq!(
            sql(&union),
            "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\" UNION ALL \
             SELECT \"o\".\"id\" FROM \"orders\" AS \"o\""
        );
    }

    #[test]
    fn delete_statement() {
        let select = Select::from_source(Expression::table("orders", "o"))
            .with_predicate(Expression::gt(int_col("o", "age"), Expression::int(30)));
        let delete = Arc::new(Expression::Delete(crate::expressions::Delete {
            table: Expression::table("orders", "o"),
            select: select.into_expr(),
        }));
        assert_eq!(
            sql(&delete),
            "DELETE FROM \"o\" FROM \"orders\" AS \"o\" WHERE \"o\".\"age\" > 30"
        );
    }

    #[test]
    fn delete_with_having_is_unsupported() {
        let mut select = Select::from_source(Expression::table("orders", "o"));
        select.having = Some(crate::expressions::always_false());
        let delete = Arc::new(Expression::Delete(crate::expressions::Delete {
            table: Expression::table("orders", "o"),
            select: select.into_expr(),
        }));
        let err = generate(&delete, &LoweringOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn delete_with_limit_is_unsupported() {
        let select =
            Select::from_source(Expression::table("orders", "o")).with_limit(Expression::int(1));
        let delete = Arc::new(Expression::Delete(crate::expressions::Delete {
            table: Expression::table("orders", "o"),
            select: select.into_expr(),
        }));
        let err = generate(&delete, &LoweringOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn update_statement() {
        let select = Select::from_source(Expression::table("orders", "o"))
            .with_predicate(Expression::eq(int_col("o", "id"), Expression::int(1)));
        let update = Arc::new(Expression::Update(crate::expressions::Update {
            table: Expression::table("orders", "o"),
            assignments: vec![crate::expressions::Assignment {
                column: int_col("o", "total"),
                value: Expression::int(0),
            }],
            select: select.into_expr(),
        }));
        assert_eq!(
            sql(&update),
            "UPDATE \"o\" SET \"o\".\"total\" = 0 FROM \"orders\" AS \"o\" \
             WHERE \"o\".\"id\" = 1"
        );
    }

    #[test]
    fn full_text_predicate_requires_column_operand() {
        let good = Expression::function(
            "CONTAINS",
            vec![
                Expression::column("o", "name", TypeInfo::text()),
                Expression::text("widget"),
            ],
            TypeInfo::bool(),
        );
        let select = orders().with_predicate(good).into_expr();
        assert!(sql(&select).contains("CONTAINS(\"o\".\"name\", N'widget')"));

        let bad = Expression::function(
            "CONTAINS",
            vec![Expression::text("name"), Expression::text("widget")],
            TypeInfo::bool(),
        );
        let select = orders().with_predicate(bad).into_expr();
        let err = generate(&select, &LoweringOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn niladic_function_renders_without_parentheses() {
        let niladic = Arc::new(Expression::Function(crate::expressions::Function {
            name: "CURRENT_TIMESTAMP".into(),
            args: Vec::new(),
            ty: TypeInfo::new(TypeKind::DateTime, "datetime2"),
            argument_propagates_null: Vec::new(),
            niladic: true,
        }));
        let select = orders()
            .with_projection(vec![Projection::unaliased(niladic)])
            .into_expr();
        assert_eq!(
            sql(&select),
            "SELECT CURRENT_TIMESTAMP FROM \"orders\" AS \"o\""
        );
    }

    #[test]
    fn grouped_query_with_having() {
        let mut select = orders();
        select.group_by = vec![int_col("o", "customer")];
        select.having = Some(Expression::gt(
            Expression::function("COUNT", vec![int_col("o", "id")], TypeInfo::int()),
            Expression::int(1),
        ));
        assert_eq!(
            sql(&select.into_expr()),
            "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\" GROUP BY \"o\".\"customer\" \
             HAVING COUNT(\"o\".\"id\") > 1"
        );
    }
}
