//! Relational SQL expression IR.
//!
//! This module defines the node vocabulary shared by every lowering pass and
//! by the SQL generator. The design follows a single closed tagged enum,
//! [`Expression`], with one variant per relational construct and plain
//! structs carrying each variant's fields.
//!
//! # Immutability and sharing
//!
//! Nodes are immutable once built. The handle type used everywhere is
//! [`Expr`], an `Arc<Expression>`: a rewrite that changes nothing returns the
//! original handle, so passes can detect "no change" with [`Arc::ptr_eq`] and
//! rebuild only the path from a changed leaf to the root. Unchanged subtrees
//! are shared between the input and output trees.
//!
//! # Variant groups
//!
//! | Group | Variants |
//! |---|---|
//! | **Scalars** | `Column`, `Literal`, `Parameter`, `Unary`, `Binary`, `Case`, `Function`, `OrderedAggregate`, `Cast`, `Collate`, `Distinct`, `JsonScalar` |
//! | **Predicates** | `Exists`, `In`, `Like` (plus boolean `Unary`/`Binary`) |
//! | **Sources** | `Table`, `Join`, `Select`, `JsonTable`, `ValuesList`, `Union`, `Except`, `Intersect` |
//! | **Statements** | `Select`, `Update`, `Delete` |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to an immutable expression node.
pub type Expr = Arc<Expression>;

/// Runtime parameter bindings for one execution, keyed by parameter name.
pub type ParameterValues = HashMap<String, Value>;

/// Name of the single untyped value column projected by a bare-form
/// [`JsonTable`].
pub const JSON_VALUE_COLUMN: &str = "value";

/// Name of the synthetic ordinal key column projected by a [`JsonTable`].
/// Ordering by it preserves the original array order.
pub const JSON_KEY_COLUMN: &str = "key";

/// Logical type classification of a scalar expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Bool,
    Int,
    Double,
    Decimal,
    Text,
    Blob,
    DateTime,
    Guid,
    Json,
    Other,
}

/// Resolved type of a scalar expression: logical kind, concrete store type,
/// and nullability. The upstream type-mapping catalog supplies these fully
/// resolved; this crate never infers store types on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInfo {
    pub kind: TypeKind,
    pub store_type: String,
    pub nullable: bool,
}

impl TypeInfo {
    /// Create a non-nullable type.
    pub fn new(kind: TypeKind, store_type: impl Into<String>) -> Self {
        Self {
            kind,
            store_type: store_type.into(),
            nullable: false,
        }
    }

    /// Create a nullable type.
    pub fn nullable(kind: TypeKind, store_type: impl Into<String>) -> Self {
        Self {
            kind,
            store_type: store_type.into(),
            nullable: true,
        }
    }

    /// Copy of this type with the given nullability.
    pub fn with_nullable(&self, nullable: bool) -> Self {
        Self {
            kind: self.kind,
            store_type: self.store_type.clone(),
            nullable,
        }
    }

    /// The non-nullable boolean type of this dialect.
    pub fn bool() -> Self {
        Self::new(TypeKind::Bool, "bit")
    }

    /// The non-nullable integer type of this dialect.
    pub fn int() -> Self {
        Self::new(TypeKind::Int, "int")
    }

    /// The non-nullable text type of this dialect.
    pub fn text() -> Self {
        Self::new(TypeKind::Text, "nvarchar(max)")
    }
}

/// A constant value carried by a [`Literal`] or bound to a parameter.
///
/// Doubles are carried as canonical decimal strings so that `Value` stays
/// `Eq + Hash` and trees remain structurally comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(String),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Integer view of this value, if it is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Negate,
    BitwiseNot,
    IsNull,
    IsNotNull,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    And,
    Or,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitwiseAnd,
    BitwiseOr,
    Concat,
}

impl BinaryOperator {
    /// Whether this operator produces a boolean from its operands.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Neq
                | BinaryOperator::Gt
                | BinaryOperator::Gte
                | BinaryOperator::Lt
                | BinaryOperator::Lte
        )
    }

    /// Whether this operator is a logical connective.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    /// The comparison with the opposite truth table, if any.
    pub fn negated(&self) -> Option<BinaryOperator> {
        match self {
            BinaryOperator::Eq => Some(BinaryOperator::Neq),
            BinaryOperator::Neq => Some(BinaryOperator::Eq),
            BinaryOperator::Gt => Some(BinaryOperator::Lte),
            BinaryOperator::Gte => Some(BinaryOperator::Lt),
            BinaryOperator::Lt => Some(BinaryOperator::Gte),
            BinaryOperator::Lte => Some(BinaryOperator::Gt),
            _ => None,
        }
    }
}

/// Join kinds supported by the dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    LeftOuter,
    Cross,
    CrossApply,
    OuterApply,
}

/// One segment of a JSON path: an object key or an array index.
///
/// The index is an arbitrary expression; non-constant indexes constrain how
/// the generator can render the path (see the generator's compatibility
/// handling).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    Key(String),
    Index(Expr),
}

impl PathSegment {
    pub fn key(name: impl Into<String>) -> Self {
        PathSegment::Key(name.into())
    }
}

/// Reference to a column of a source table, by table alias and column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub table: String,
    pub name: String,
    pub ty: TypeInfo,
}

/// A constant embedded in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub value: Value,
    pub ty: TypeInfo,
}

/// Placeholder for a runtime parameter, rendered as `@name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unary {
    pub op: UnaryOperator,
    pub operand: Expr,
    pub ty: TypeInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binary {
    pub op: BinaryOperator,
    pub left: Expr,
    pub right: Expr,
    pub ty: TypeInfo,
}

/// One WHEN clause of a CASE expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseWhen {
    pub test: Expr,
    pub result: Expr,
}

/// CASE expression, either simple (with an operand) or searched (without).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Case {
    pub operand: Option<Expr>,
    pub whens: Vec<CaseWhen>,
    pub else_: Option<Expr>,
    pub ty: TypeInfo,
}

/// A scalar SQL function call.
///
/// `ty.nullable` is the declared result nullability;
/// `argument_propagates_null` marks, per argument, whether a NULL argument
/// forces a NULL result. Niladic functions render without parentheses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub args: Vec<Expr>,
    pub ty: TypeInfo,
    pub argument_propagates_null: Vec<bool>,
    pub niladic: bool,
}

/// Sort key inside an ORDER BY list or a WITHIN GROUP clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ordering {
    pub expr: Expr,
    pub ascending: bool,
}

impl Ordering {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: true,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: false,
        }
    }
}

/// Aggregate function with an ORDER BY inside the aggregation
/// (`name(args) WITHIN GROUP (ORDER BY ...)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderedAggregate {
    pub name: String,
    pub args: Vec<Expr>,
    pub orderings: Vec<Ordering>,
    pub ty: TypeInfo,
}

/// `CAST(operand AS ty.store_type)`. The cast changes the store type only;
/// it introduces no nullability beyond the operand's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cast {
    pub operand: Expr,
    pub ty: TypeInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collate {
    pub operand: Expr,
    pub collation: String,
}

/// DISTINCT wrapper inside an aggregate argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distinct {
    pub operand: Expr,
}

/// `EXISTS (subquery)` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exists {
    pub subquery: Expr,
}

/// The right-hand side of an IN predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InList {
    Values(Vec<Expr>),
    Subquery(Expr),
}

/// `operand [NOT] IN (...)` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct In {
    pub operand: Expr,
    pub list: InList,
    pub negated: bool,
}

/// `operand LIKE pattern [ESCAPE escape]` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Like {
    pub operand: Expr,
    pub pattern: Expr,
    pub escape: Option<Expr>,
}

/// Extraction of a scalar value from a JSON column, rendered as a JSON
/// value function over a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JsonScalar {
    pub column: Expr,
    pub path: Vec<PathSegment>,
    pub ty: TypeInfo,
}

/// A base table reference with its alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub alias: String,
}

/// A join over another source. `on` is required for inner/left joins and
/// absent for cross joins and applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub table: Expr,
    pub on: Option<Expr>,
}

/// One projected expression with an optional output alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Projection {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Projection {
    pub fn unaliased(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// A SELECT block: projection over sources with filtering, grouping,
/// ordering and pagination.
///
/// `offset` may be non-null in emitted SQL only when an ORDER BY is present;
/// the generator synthesizes a no-op ordering when none survived the passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Select {
    pub distinct: bool,
    pub projection: Vec<Projection>,
    pub tables: Vec<Expr>,
    pub predicate: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub orderings: Vec<Ordering>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    pub alias: Option<String>,
}

impl Select {
    /// A select over a single source with no clauses.
    pub fn from_source(source: Expr) -> Self {
        Self {
            distinct: false,
            projection: Vec::new(),
            tables: vec![source],
            predicate: None,
            group_by: Vec::new(),
            having: None,
            orderings: Vec::new(),
            limit: None,
            offset: None,
            alias: None,
        }
    }

    pub fn with_projection(mut self, projection: Vec<Projection>) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_predicate(mut self, predicate: Expr) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_orderings(mut self, orderings: Vec<Ordering>) -> Self {
        self.orderings = orderings;
        self
    }

    pub fn with_limit(mut self, limit: Expr) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: Expr) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn into_expr(self) -> Expr {
        Arc::new(Expression::Select(self))
    }
}

/// Per-column schema descriptor of a rich-form [`JsonTable`]: the projected
/// name, its store type, the sub-path below the row object, and whether the
/// column is itself a nested JSON entity (`AS JSON`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JsonColumn {
    pub name: String,
    pub kind: TypeKind,
    pub store_type: String,
    pub path: Vec<PathSegment>,
    pub as_json: bool,
}

/// Expansion of a JSON array into rows.
///
/// With `columns` present (the rich form) the database converts each row
/// field to its declared store type but cannot guarantee row order. Without
/// descriptors (the bare form) the expansion projects a single untyped
/// [`JSON_VALUE_COLUMN`] plus the ordinal [`JSON_KEY_COLUMN`], and
/// consumers must cast or extract explicitly. The JSON postprocessing pass
/// decides which form each node keeps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JsonTable {
    pub alias: String,
    pub json: Expr,
    pub path: Option<Vec<PathSegment>>,
    pub columns: Option<Vec<JsonColumn>>,
}

/// Inline `VALUES` rows used as a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValuesList {
    pub alias: String,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
}

/// UNION / EXCEPT / INTERSECT of two queries. `distinct` is meaningful for
/// unions only; EXCEPT and INTERSECT always deduplicate in this dialect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetOperation {
    pub alias: String,
    pub left: Expr,
    pub right: Expr,
    pub distinct: bool,
}

/// One `SET column = value` assignment of an UPDATE.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub column: Expr,
    pub value: Expr,
}

/// UPDATE statement over the rows selected by `select`, targeting `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Update {
    pub table: Expr,
    pub assignments: Vec<Assignment>,
    pub select: Expr,
}

/// DELETE statement over the rows selected by `select`, targeting `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delete {
    pub table: Expr,
    pub select: Expr,
}

/// A relational expression node. See the module docs for the variant groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Column(Column),
    Literal(Literal),
    Parameter(Parameter),
    Unary(Unary),
    Binary(Binary),
    Case(Case),
    Function(Function),
    OrderedAggregate(OrderedAggregate),
    Cast(Cast),
    Collate(Collate),
    Distinct(Distinct),
    Exists(Exists),
    In(In),
    Like(Like),
    JsonScalar(JsonScalar),
    Table(Table),
    Join(Join),
    Select(Select),
    JsonTable(JsonTable),
    ValuesList(ValuesList),
    Union(SetOperation),
    Except(SetOperation),
    Intersect(SetOperation),
    Update(Update),
    Delete(Delete),
}

impl Expression {
    /// Wrap this node in a shared handle.
    pub fn into_expr(self) -> Expr {
        Arc::new(self)
    }

    /// Column reference with an explicit type.
    pub fn column(table: impl Into<String>, name: impl Into<String>, ty: TypeInfo) -> Expr {
        Arc::new(Expression::Column(Column {
            table: table.into(),
            name: name.into(),
            ty,
        }))
    }

    /// Typed literal constant.
    pub fn literal(value: Value, ty: TypeInfo) -> Expr {
        Arc::new(Expression::Literal(Literal { value, ty }))
    }

    /// Integer literal.
    pub fn int(value: i64) -> Expr {
        Self::literal(Value::Int(value), TypeInfo::int())
    }

    /// Text literal.
    pub fn text(value: impl Into<String>) -> Expr {
        Self::literal(Value::Text(value.into()), TypeInfo::text())
    }

    /// Boolean literal.
    pub fn bool(value: bool) -> Expr {
        Self::literal(Value::Bool(value), TypeInfo::bool())
    }

    /// Typed NULL literal.
    pub fn null(ty: TypeInfo) -> Expr {
        Self::literal(Value::Null, ty.with_nullable(true))
    }

    /// Runtime parameter placeholder.
    pub fn parameter(name: impl Into<String>, ty: TypeInfo) -> Expr {
        Arc::new(Expression::Parameter(Parameter {
            name: name.into(),
            ty,
        }))
    }

    /// Binary operation with an explicit result type.
    pub fn binary(op: BinaryOperator, left: Expr, right: Expr, ty: TypeInfo) -> Expr {
        Arc::new(Expression::Binary(Binary {
            op,
            left,
            right,
            ty,
        }))
    }

    /// Boolean-producing binary operation whose nullability follows its
    /// operands.
    pub fn boolean_binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
        let nullable = left.nullable() || right.nullable();
        Self::binary(op, left, right, TypeInfo::bool().with_nullable(nullable))
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Self::boolean_binary(BinaryOperator::Eq, left, right)
    }

    pub fn neq(left: Expr, right: Expr) -> Expr {
        Self::boolean_binary(BinaryOperator::Neq, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Expr {
        Self::boolean_binary(BinaryOperator::Gt, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Self::boolean_binary(BinaryOperator::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Self::boolean_binary(BinaryOperator::Or, left, right)
    }

    pub fn not(operand: Expr) -> Expr {
        let ty = operand
            .type_info()
            .cloned()
            .unwrap_or_else(TypeInfo::bool);
        Arc::new(Expression::Unary(Unary {
            op: UnaryOperator::Not,
            operand,
            ty,
        }))
    }

    pub fn is_null(operand: Expr) -> Expr {
        Arc::new(Expression::Unary(Unary {
            op: UnaryOperator::IsNull,
            operand,
            ty: TypeInfo::bool(),
        }))
    }

    pub fn is_not_null(operand: Expr) -> Expr {
        Arc::new(Expression::Unary(Unary {
            op: UnaryOperator::IsNotNull,
            operand,
            ty: TypeInfo::bool(),
        }))
    }

    /// Scalar function call; all arguments propagate NULL by default.
    pub fn function(name: impl Into<String>, args: Vec<Expr>, ty: TypeInfo) -> Expr {
        let propagates = vec![true; args.len()];
        Arc::new(Expression::Function(Function {
            name: name.into(),
            args,
            ty,
            argument_propagates_null: propagates,
            niladic: false,
        }))
    }

    pub fn cast(operand: Expr, ty: TypeInfo) -> Expr {
        Arc::new(Expression::Cast(Cast { operand, ty }))
    }

    pub fn exists(subquery: Expr) -> Expr {
        Arc::new(Expression::Exists(Exists { subquery }))
    }

    pub fn in_values(operand: Expr, values: Vec<Expr>) -> Expr {
        Arc::new(Expression::In(In {
            operand,
            list: InList::Values(values),
            negated: false,
        }))
    }

    pub fn like(operand: Expr, pattern: Expr) -> Expr {
        Arc::new(Expression::Like(Like {
            operand,
            pattern,
            escape: None,
        }))
    }

    /// Searched CASE producing a value of type `ty`.
    pub fn searched_case(whens: Vec<CaseWhen>, else_: Option<Expr>, ty: TypeInfo) -> Expr {
        Arc::new(Expression::Case(Case {
            operand: None,
            whens,
            else_,
            ty,
        }))
    }

    /// Base table source.
    pub fn table(name: impl Into<String>, alias: impl Into<String>) -> Expr {
        Arc::new(Expression::Table(Table {
            name: name.into(),
            alias: alias.into(),
        }))
    }

    /// JSON scalar extraction from a column.
    pub fn json_scalar(column: Expr, path: Vec<PathSegment>, ty: TypeInfo) -> Expr {
        Arc::new(Expression::JsonScalar(JsonScalar { column, path, ty }))
    }

    /// The resolved type of a scalar node; `None` for sources and
    /// statements, which have no scalar type.
    pub fn type_info(&self) -> Option<&TypeInfo> {
        match self {
            Expression::Column(c) => Some(&c.ty),
            Expression::Literal(l) => Some(&l.ty),
            Expression::Parameter(p) => Some(&p.ty),
            Expression::Unary(u) => Some(&u.ty),
            Expression::Binary(b) => Some(&b.ty),
            Expression::Case(c) => Some(&c.ty),
            Expression::Function(f) => Some(&f.ty),
            Expression::OrderedAggregate(a) => Some(&a.ty),
            Expression::Cast(c) => Some(&c.ty),
            Expression::Collate(c) => c.operand.type_info(),
            Expression::Distinct(d) => d.operand.type_info(),
            Expression::JsonScalar(j) => Some(&j.ty),
            // Predicates are boolean but carry no stored TypeInfo; callers
            // use is_boolean() for them.
            _ => None,
        }
    }

    /// Whether this node is a boolean-typed scalar or predicate.
    pub fn is_boolean(&self) -> bool {
        match self {
            Expression::Exists(_) | Expression::In(_) | Expression::Like(_) => true,
            other => other
                .type_info()
                .map(|t| t.kind == TypeKind::Bool)
                .unwrap_or(false),
        }
    }

    /// Whether this node may evaluate to NULL.
    pub fn nullable(&self) -> bool {
        match self {
            Expression::Exists(_) => false,
            Expression::In(i) => i.operand.nullable(),
            Expression::Like(l) => l.operand.nullable() || l.pattern.nullable(),
            other => other.type_info().map(|t| t.nullable).unwrap_or(false),
        }
    }

    /// Constant value of this node, if it is a literal.
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expression::Literal(l) => Some(&l.value),
            _ => None,
        }
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self.as_constant(), Some(Value::Null))
    }

    pub fn is_true_constant(&self) -> bool {
        matches!(self.as_constant(), Some(Value::Bool(true)))
    }

    pub fn is_false_constant(&self) -> bool {
        matches!(self.as_constant(), Some(Value::Bool(false)))
    }

    /// The select block of this node, if it is one.
    pub fn as_select(&self) -> Option<&Select> {
        match self {
            Expression::Select(s) => Some(s),
            _ => None,
        }
    }

    /// The alias under which this source is referenced, if it is a source.
    pub fn source_alias(&self) -> Option<&str> {
        match self {
            Expression::Table(t) => Some(&t.alias),
            Expression::Join(j) => j.table.source_alias(),
            Expression::Select(s) => s.alias.as_deref(),
            Expression::JsonTable(j) => Some(&j.alias),
            Expression::ValuesList(v) => Some(&v.alias),
            Expression::Union(s) | Expression::Except(s) | Expression::Intersect(s) => {
                Some(&s.alias)
            }
            _ => None,
        }
    }
}

/// The canonical always-false predicate used when a query shape is known to
/// produce no rows (`0 = 1`).
pub fn always_false() -> Expr {
    Expression::eq(Expression::int(0), Expression::int(1))
}

/// The canonical always-true predicate (`1 = 1`).
pub fn always_true() -> Expr {
    Expression::eq(Expression::int(1), Expression::int(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_col(table: &str, name: &str) -> Expr {
        Expression::column(table, name, TypeInfo::nullable(TypeKind::Int, "int"))
    }

    #[test]
    fn comparison_nullability_follows_operands() {
        let nullable = Expression::eq(int_col("t", "a"), Expression::int(1));
        assert!(nullable.nullable());

        let non_null = Expression::eq(Expression::int(1), Expression::int(2));
        assert!(!non_null.nullable());
    }

    #[test]
    fn boolean_detection() {
        assert!(Expression::eq(Expression::int(1), Expression::int(1)).is_boolean());
        assert!(Expression::bool(true).is_boolean());
        assert!(!Expression::int(1).is_boolean());
        assert!(Expression::like(Expression::text("a"), Expression::text("b")).is_boolean());
    }

    #[test]
    fn structural_equality_and_sharing() {
        let a = Expression::eq(int_col("t", "a"), Expression::int(5));
        let b = Expression::eq(int_col("t", "a"), Expression::int(5));
        // Structurally equal but distinct handles.
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a, &b));

        let shared = a.clone();
        assert!(Arc::ptr_eq(&a, &shared));
    }

    #[test]
    fn source_aliases() {
        let table = Expression::table("orders", "o");
        assert_eq!(table.source_alias(), Some("o"));

        let join = Arc::new(Expression::Join(Join {
            kind: JoinKind::Inner,
            table: table.clone(),
            on: Some(always_true()),
        }));
        assert_eq!(join.source_alias(), Some("o"));
    }

    #[test]
    fn typed_null_is_nullable() {
        let null = Expression::null(TypeInfo::int());
        assert!(null.nullable());
        assert!(null.is_null_constant());
    }
}
