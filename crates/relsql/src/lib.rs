//! Lowering of relational query plans to dialect SQL text.
//!
//! The input is a statement tree already bound to tables, columns and store
//! types by an upstream compiler. Lowering runs a fixed sequence of
//! tree-rewriting passes over the immutable [`expressions`] vocabulary and
//! finishes with text emission:
//!
//! 1. [`passes::collapse_skip_take`] folds zero-row pagination windows into
//!    provably-empty query shapes and reports cacheability.
//! 2. [`passes::convert_search_conditions`] resolves where each boolean
//!    expression is a predicate and where it is a scalar value.
//! 3. [`passes::process_nullability`] recomputes nullability and simplifies
//!    under three-valued logic.
//! 4. [`passes::postprocess_json_tables`] downgrades JSON table expansions
//!    that need row order or carry undeclarable store types.
//! 5. [`generator::generate`] emits the SQL text.
//!
//! ```
//! use relsql::expressions::{Expression, ParameterValues, Projection, Select, TypeInfo};
//! use relsql::{lower, LoweringOptions};
//!
//! let plan = Select::from_source(Expression::table("orders", "o"))
//!     .with_projection(vec![Projection::unaliased(Expression::column(
//!         "o",
//!         "id",
//!         TypeInfo::int(),
//!     ))])
//!     .into_expr();
//! let lowered = lower(&plan, &ParameterValues::new(), &LoweringOptions::default()).unwrap();
//! assert_eq!(lowered.command.text, "SELECT \"o\".\"id\" FROM \"orders\" AS \"o\"");
//! assert!(lowered.cacheable);
//! ```

pub mod error;
pub mod expressions;
pub mod generator;
pub mod passes;
pub mod quoting;

pub use error::{Error, Result};
pub use generator::{generate, Command, LoweringOptions, MIN_COMPATIBILITY_LEVEL};

use expressions::{Expr, ParameterValues};

/// The product of one lowering run.
#[derive(Debug, Clone)]
pub struct Lowered {
    /// SQL text plus the runtime parameters it references.
    pub command: Command,
    /// The tree the generator consumed, after all passes.
    pub tree: Expr,
    /// Whether the SQL shape is valid for every future parameter binding of
    /// the same plan, or only for the current one.
    pub cacheable: bool,
}

/// Run the full pipeline over a statement tree.
///
/// `parameters` carries the runtime bindings of the current execution; only
/// the skip/take pass reads them. When the produced shape depended on one of
/// those values, [`Lowered::cacheable`] is `false` and callers must key any
/// plan cache on the parameter values as well.
pub fn lower(
    root: &Expr,
    parameters: &ParameterValues,
    options: &LoweringOptions,
) -> Result<Lowered> {
    let (tree, cacheable) = passes::collapse_skip_take(root, parameters)?;
    let tree = passes::convert_search_conditions(&tree)?;
    let tree = passes::process_nullability(&tree)?;
    let tree = passes::postprocess_json_tables(&tree)?;
    let command = generator::generate(&tree, options)?;
    Ok(Lowered {
        command,
        tree,
        cacheable,
    })
}
