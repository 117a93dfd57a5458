//! Rich-form to bare-form JSON table downgrades.
//!
//! A JSON table expansion carrying per-column descriptors (the rich form)
//! lets the database convert each field to its declared store type, but it
//! cannot guarantee row order and cannot represent a handful of opaque store
//! types. This pass scans every Select's table list and downgrades a
//! rich-form node to the bare form when either
//!
//! 1. a surviving ordering or projection still references the node's
//!    synthetic ordinal key column, so the original array order matters, or
//! 2. some descriptor's store type is one the rich form cannot declare.
//!
//! A downgrade strips the descriptors and records each one in a side table
//! keyed by `(alias, column name)`. The Select subtree is then re-visited:
//! every column reference that pointed at a downgraded node is rewritten to
//! read the node's single generic value column, followed by a cast back to
//! the descriptor's store type (when the sub-path was empty) or a JSON
//! scalar extraction over the sub-path (when it was not). A scalar
//! extraction that already read a nested-entity descriptor has the
//! descriptor's sub-path prefixed onto its own and reads the generic column
//! directly.
//!
//! Side-table entries are scoped to the Select being visited: a scope is
//! pushed on entry and popped on exit, and a scope also shadows every alias
//! its Select defines, so nested queries that reuse an alias for a
//! differently-shaped node cannot pick up an outer rewrite.
//!
//! Descriptors of binary columns cannot be downgraded at all, since the
//! bare form loses the base64 decoding the rich schema provided; hitting one
//! is an unsupported-construct error.

use crate::error::{Error, Result};
use crate::expressions::{
    Column, Expr, Expression, Join, JsonColumn, JsonTable, Select, TypeInfo, TypeKind,
    JSON_KEY_COLUMN, JSON_VALUE_COLUMN,
};
use crate::passes::rewrite_children;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Store types the rich-form column schema cannot declare.
const OPAQUE_STORE_TYPES: &[&str] = &["money", "smallmoney", "timestamp", "rowversion"];

/// Store type of the generic value column a bare-form expansion projects.
const GENERIC_VALUE_STORE_TYPE: &str = "nvarchar(max)";

/// Run the pass over a statement root.
pub fn postprocess_json_tables(expr: &Expr) -> Result<Expr> {
    let mut rewriter = Rewriter { scopes: Vec::new() };
    rewriter.visit(expr)
}

/// Per-Select side table: the descriptors of downgraded nodes, plus every
/// alias this Select defines. An alias present here shadows rewrites from
/// enclosing scopes even when nothing was downgraded for it.
struct Scope {
    rewrites: HashMap<(String, String), JsonColumn>,
    aliases: HashSet<String>,
}

struct Rewriter {
    /// Innermost scope last.
    scopes: Vec<Scope>,
}

impl Rewriter {
    fn visit(&mut self, expr: &Expr) -> Result<Expr> {
        match expr.as_ref() {
            Expression::Select(_) => self.visit_select(expr),
            Expression::Column(c) => self.rewrite_column(expr, c),
            Expression::JsonScalar(j) => self.rewrite_scalar(expr, j),
            _ => rewrite_children(expr, &mut |child| self.visit(child)),
        }
    }

    /// Downgrade triggering sources of this Select, then re-visit the whole
    /// subtree with the recorded descriptors in scope.
    fn visit_select(&mut self, expr: &Expr) -> Result<Expr> {
        let Some(select) = expr.as_select() else {
            return Err(Error::internal("visit_select on a non-Select node"));
        };

        let mut scope = Scope {
            rewrites: HashMap::new(),
            aliases: select
                .tables
                .iter()
                .filter_map(|t| t.source_alias().map(str::to_owned))
                .collect(),
        };

        let mut tables = Vec::with_capacity(select.tables.len());
        let mut changed = false;
        for source in &select.tables {
            let out = downgrade_source(select, source, &mut scope)?;
            if !Arc::ptr_eq(&out, source) {
                changed = true;
            }
            tables.push(out);
        }

        let with_tables: Expr = if changed {
            Arc::new(Expression::Select(Select {
                tables,
                ..select.clone()
            }))
        } else {
            expr.clone()
        };

        self.scopes.push(scope);
        let result = rewrite_children(&with_tables, &mut |child| self.visit(child));
        self.scopes.pop();
        result
    }

    /// The descriptor recorded for a column of a downgraded node. The search
    /// runs innermost-out and stops at the first scope defining the alias.
    fn lookup(&self, table: &str, name: &str) -> Option<&JsonColumn> {
        let key = (table.to_owned(), name.to_owned());
        for scope in self.scopes.iter().rev() {
            if let Some(descriptor) = scope.rewrites.get(&key) {
                return Some(descriptor);
            }
            if scope.aliases.contains(table) {
                return None;
            }
        }
        None
    }

    /// Rewrite a reference to a descriptor column of a downgraded node into
    /// a read of the generic value column.
    fn rewrite_column(&self, expr: &Expr, column: &Column) -> Result<Expr> {
        let Some(descriptor) = self.lookup(&column.table, &column.name) else {
            return Ok(expr.clone());
        };
        let generic = generic_value_column(&column.table);
        if descriptor.path.is_empty() {
            if descriptor
                .store_type
                .eq_ignore_ascii_case(GENERIC_VALUE_STORE_TYPE)
            {
                return Ok(generic);
            }
            return Ok(Expression::cast(
                generic,
                TypeInfo {
                    kind: descriptor.kind,
                    store_type: descriptor.store_type.clone(),
                    nullable: column.ty.nullable,
                },
            ));
        }
        Ok(Expression::json_scalar(
            generic,
            descriptor.path.clone(),
            column.ty.clone(),
        ))
    }

    /// Rewrite an extraction that read a nested-entity descriptor column:
    /// the descriptor's sub-path is prefixed onto the extraction's own path
    /// and the source becomes the generic value column.
    fn rewrite_scalar(
        &mut self,
        expr: &Expr,
        scalar: &crate::expressions::JsonScalar,
    ) -> Result<Expr> {
        if let Expression::Column(column) = scalar.column.as_ref() {
            if let Some(descriptor) = self.lookup(&column.table, &column.name) {
                if descriptor.as_json {
                    let mut path =
                        Vec::with_capacity(descriptor.path.len() + scalar.path.len());
                    path.extend(descriptor.path.iter().cloned());
                    path.extend(scalar.path.iter().cloned());
                    return Ok(Expression::json_scalar(
                        generic_value_column(&column.table),
                        path,
                        scalar.ty.clone(),
                    ));
                }
            }
        }
        rewrite_children(expr, &mut |child| self.visit(child))
    }
}

/// Downgrade a single table-list entry when it is (or wraps) a rich-form
/// JSON table that triggers. Other sources pass through untouched here; the
/// re-visit recurses into them afterwards.
fn downgrade_source(select: &Select, source: &Expr, scope: &mut Scope) -> Result<Expr> {
    match source.as_ref() {
        Expression::JsonTable(j) => {
            if let Some(columns) = &j.columns {
                if must_downgrade(select, j, columns) {
                    return downgrade(j, columns, scope);
                }
            }
            Ok(source.clone())
        }
        Expression::Join(join) => {
            let table = downgrade_source(select, &join.table, scope)?;
            if Arc::ptr_eq(&table, &join.table) {
                Ok(source.clone())
            } else {
                Ok(Arc::new(Expression::Join(Join {
                    kind: join.kind,
                    table,
                    on: join.on.clone(),
                })))
            }
        }
        _ => Ok(source.clone()),
    }
}

fn must_downgrade(select: &Select, table: &JsonTable, columns: &[JsonColumn]) -> bool {
    if columns.iter().any(|c| {
        OPAQUE_STORE_TYPES
            .iter()
            .any(|t| c.store_type.eq_ignore_ascii_case(t))
    }) {
        return true;
    }
    key_column_referenced(select, &table.alias)
}

/// Strip the descriptors and record them in the current scope.
fn downgrade(table: &JsonTable, columns: &[JsonColumn], scope: &mut Scope) -> Result<Expr> {
    if let Some(binary) = columns.iter().find(|c| c.kind == TypeKind::Blob) {
        return Err(Error::unsupported(format!(
            "reading binary JSON column '{}' ('{}') without a typed column schema",
            binary.name, binary.store_type
        )));
    }
    for column in columns {
        scope
            .rewrites
            .insert((table.alias.clone(), column.name.clone()), column.clone());
    }
    Ok(Arc::new(Expression::JsonTable(JsonTable {
        alias: table.alias.clone(),
        json: table.json.clone(),
        path: table.path.clone(),
        columns: None,
    })))
}

fn generic_value_column(table: &str) -> Expr {
    Expression::column(
        table,
        JSON_VALUE_COLUMN,
        TypeInfo::nullable(TypeKind::Text, GENERIC_VALUE_STORE_TYPE),
    )
}

/// Whether any projection or ordering of this Select mentions the synthetic
/// ordinal key column of the given source alias.
fn key_column_referenced(select: &Select, alias: &str) -> bool {
    select
        .projection
        .iter()
        .any(|p| mentions_column(&p.expr, alias, JSON_KEY_COLUMN))
        || select
            .orderings
            .iter()
            .any(|o| mentions_column(&o.expr, alias, JSON_KEY_COLUMN))
}

fn mentions_column(expr: &Expr, table: &str, name: &str) -> bool {
    fn walk(expr: &Expr, table: &str, name: &str, found: &mut bool) {
        if *found {
            return;
        }
        if let Expression::Column(c) = expr.as_ref() {
            if c.table == table && c.name == name {
                *found = true;
            }
            return;
        }
        // Traversal only; the identity rewrite never fails or rebuilds.
        let _ = rewrite_children(expr, &mut |child| {
            walk(child, table, name, found);
            Ok(child.clone())
        });
    }

    let mut found = false;
    walk(expr, table, name, &mut found);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::{Ordering, PathSegment, Projection};

    fn descriptor(name: &str, store_type: &str, kind: TypeKind) -> JsonColumn {
        JsonColumn {
            name: name.into(),
            kind,
            store_type: store_type.into(),
            path: vec![PathSegment::key(name)],
            as_json: false,
        }
    }

    fn rich_table(alias: &str, columns: Vec<JsonColumn>) -> Expr {
        Arc::new(Expression::JsonTable(JsonTable {
            alias: alias.into(),
            json: Expression::parameter("items", TypeInfo::nullable(TypeKind::Json, "json")),
            path: None,
            columns: Some(columns),
        }))
    }

    fn key_column(alias: &str) -> Expr {
        Expression::column(
            alias,
            JSON_KEY_COLUMN,
            TypeInfo::nullable(TypeKind::Text, "nvarchar(4000)"),
        )
    }

    fn descriptor_column(alias: &str, name: &str, store_type: &str, kind: TypeKind) -> Expr {
        Expression::column(alias, name, TypeInfo::nullable(kind, store_type))
    }

    #[test]
    fn key_ordering_downgrades_to_bare_form() {
        let select = Select::from_source(rich_table(
            "j",
            vec![descriptor("price", "int", TypeKind::Int)],
        ))
        .with_projection(vec![Projection::unaliased(descriptor_column(
            "j",
            "price",
            "int",
            TypeKind::Int,
        ))])
        .with_orderings(vec![Ordering::asc(key_column("j"))])
        .into_expr();

        let out = postprocess_json_tables(&select).unwrap();
        let select = out.as_select().unwrap();

        match select.tables[0].as_ref() {
            Expression::JsonTable(j) => assert!(j.columns.is_none()),
            other => panic!("expected JSON table, got {other:?}"),
        }
        // Consumer reads the generic column through an extraction, since the
        // descriptor carried a sub-path.
        match select.projection[0].expr.as_ref() {
            Expression::JsonScalar(s) => {
                assert_eq!(s.path, vec![PathSegment::key("price")]);
                match s.column.as_ref() {
                    Expression::Column(c) => assert_eq!(c.name, JSON_VALUE_COLUMN),
                    other => panic!("expected generic column, got {other:?}"),
                }
            }
            other => panic!("expected extraction, got {other:?}"),
        }
    }

    #[test]
    fn opaque_store_type_downgrades_without_key_reference() {
        let select = Select::from_source(rich_table(
            "j",
            vec![JsonColumn {
                name: "amount".into(),
                kind: TypeKind::Decimal,
                store_type: "money".into(),
                path: Vec::new(),
                as_json: false,
            }],
        ))
        .with_projection(vec![Projection::unaliased(descriptor_column(
            "j",
            "amount",
            "money",
            TypeKind::Decimal,
        ))])
        .into_expr();

        let out = postprocess_json_tables(&select).unwrap();
        let select = out.as_select().unwrap();

        match select.tables[0].as_ref() {
            Expression::JsonTable(j) => assert!(j.columns.is_none()),
            other => panic!("expected JSON table, got {other:?}"),
        }
        // Empty sub-path: the generic column is cast back to the store type.
        match select.projection[0].expr.as_ref() {
            Expression::Cast(c) => assert_eq!(c.ty.store_type, "money"),
            other => panic!("expected cast, got {other:?}"),
        }
    }

    #[test]
    fn matching_text_store_type_skips_the_cast() {
        let select = Select::from_source(rich_table(
            "j",
            vec![JsonColumn {
                name: "note".into(),
                kind: TypeKind::Text,
                store_type: "nvarchar(max)".into(),
                path: Vec::new(),
                as_json: false,
            }],
        ))
        .with_projection(vec![Projection::unaliased(descriptor_column(
            "j",
            "note",
            "nvarchar(max)",
            TypeKind::Text,
        ))])
        .with_orderings(vec![Ordering::asc(key_column("j"))])
        .into_expr();

        let out = postprocess_json_tables(&select).unwrap();
        match out.as_select().unwrap().projection[0].expr.as_ref() {
            Expression::Column(c) => assert_eq!(c.name, JSON_VALUE_COLUMN),
            other => panic!("expected bare generic column, got {other:?}"),
        }
    }

    #[test]
    fn binary_descriptor_fails_fast_on_downgrade() {
        let select = Select::from_source(rich_table(
            "j",
            vec![descriptor("payload", "varbinary(max)", TypeKind::Blob)],
        ))
        .with_orderings(vec![Ordering::asc(key_column("j"))])
        .into_expr();

        let err = postprocess_json_tables(&select).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }), "got {err:?}");
    }

    #[test]
    fn untriggered_rich_table_is_untouched() {
        let select = Select::from_source(rich_table(
            "j",
            vec![descriptor("price", "int", TypeKind::Int)],
        ))
        .with_projection(vec![Projection::unaliased(descriptor_column(
            "j",
            "price",
            "int",
            TypeKind::Int,
        ))])
        .into_expr();

        let out = postprocess_json_tables(&select).unwrap();
        assert!(Arc::ptr_eq(&out, &select));
    }

    #[test]
    fn nested_entity_extraction_gets_prefixed_path() {
        let extraction = Expression::json_scalar(
            descriptor_column("j", "address", "json", TypeKind::Json),
            vec![PathSegment::key("city")],
            TypeInfo::nullable(TypeKind::Text, "nvarchar(max)"),
        );
        let select = Select::from_source(rich_table(
            "j",
            vec![JsonColumn {
                name: "address".into(),
                kind: TypeKind::Json,
                store_type: "json".into(),
                path: vec![PathSegment::key("address")],
                as_json: true,
            }],
        ))
        .with_projection(vec![Projection::unaliased(extraction)])
        .with_orderings(vec![Ordering::asc(key_column("j"))])
        .into_expr();

        let out = postprocess_json_tables(&select).unwrap();
        match out.as_select().unwrap().projection[0].expr.as_ref() {
            Expression::JsonScalar(s) => {
                assert_eq!(
                    s.path,
                    vec![PathSegment::key("address"), PathSegment::key("city")]
                );
                match s.column.as_ref() {
                    Expression::Column(c) => assert_eq!(c.name, JSON_VALUE_COLUMN),
                    other => panic!("expected generic column, got {other:?}"),
                }
            }
            other => panic!("expected extraction, got {other:?}"),
        }
    }

    #[test]
    fn nested_select_with_same_alias_is_not_contaminated() {
        // Inner query reuses the alias for a rich table that does not
        // trigger; its column must keep its shape while the outer one is
        // rewritten.
        let inner = Select::from_source(rich_table(
            "j",
            vec![descriptor("price", "int", TypeKind::Int)],
        ))
        .with_projection(vec![Projection::unaliased(descriptor_column(
            "j",
            "price",
            "int",
            TypeKind::Int,
        ))])
        .into_expr();

        let outer = Select::from_source(rich_table(
            "j",
            vec![descriptor("price", "int", TypeKind::Int)],
        ))
        .with_projection(vec![
            Projection::unaliased(descriptor_column("j", "price", "int", TypeKind::Int)),
            Projection::aliased(inner.clone(), "nested"),
        ])
        .with_orderings(vec![Ordering::asc(key_column("j"))])
        .into_expr();

        let out = postprocess_json_tables(&outer).unwrap();
        let select = out.as_select().unwrap();

        assert!(matches!(
            select.projection[0].expr.as_ref(),
            Expression::JsonScalar(_)
        ));
        // The nested query came back untouched.
        assert!(Arc::ptr_eq(&select.projection[1].expr, &inner));
    }
}
