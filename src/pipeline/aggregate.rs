//! Accident-level aggregation
//!
//! Collapses the one-row-per-(vehicle, person) frame into one row per
//! accident. Reduction rules are declared per column; the target is the worst
//! ordinal severity among the accident's persons.

use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Result};

use super::schema::{require_columns, ACCIDENT_ID, GRAV_ORDER, PERSON_ROW, TARGET, VEHICLE_ID};

/// Reduction applied to one column within an accident group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    /// Maximum; logical OR for 0/1 flags
    Max,
    /// First row in the canonical order of [`row_order`]
    First,
    /// Number of distinct non-missing values
    DistinctCount,
    /// Number of non-missing values
    Count,
}

/// (source column, reduction, output column)
pub type AggregationRule = (&'static str, Reduce, &'static str);

/// Rules for columns that need more than pass-through. Every other column
/// (accident and location attributes, vehicle and person descriptors) is
/// reduced with `First`.
pub const AGGREGATION_RULES: &[AggregationRule] = &[
    (GRAV_ORDER, Reduce::Max, TARGET),
    (VEHICLE_ID, Reduce::DistinctCount, "nb_vehicules"),
    (PERSON_ROW, Reduce::Count, "nb_usagers"),
    ("choc_avant", Reduce::Max, "choc_avant"),
    ("choc_arriere", Reduce::Max, "choc_arriere"),
    ("choc_cote", Reduce::Max, "choc_cote"),
    ("choc_multiple", Reduce::Max, "choc_multiple"),
    ("is_male", Reduce::Max, "is_male"),
    ("is_female", Reduce::Max, "is_female"),
];

fn rule_expr(source: &str, reduce: Reduce, output: &str) -> Expr {
    let expr = match reduce {
        Reduce::Max => col(source).max(),
        Reduce::First => col(source).first(),
        Reduce::DistinctCount => col(source).drop_nulls().n_unique().cast(DataType::Int64),
        Reduce::Count => col(source).count().cast(DataType::Int64),
    };
    expr.alias(output)
}

/// Road-user category code of a driver
const DRIVER_CATEGORY: i64 = 1;

/// Sort keys that put the rows of each accident in a canonical order.
///
/// Rows are ordered by vehicle, then the vehicle's driver before its other
/// occupants, then by every remaining column in name order. Two rows can only
/// tie when they are equal in every column, so `First` never depends on the
/// order of the input file.
fn row_order(df: &DataFrame) -> Vec<Expr> {
    let mut names: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
    names.sort_unstable();

    let mut keys = vec![col(ACCIDENT_ID)];
    if names.contains(&VEHICLE_ID) {
        keys.push(col(VEHICLE_ID));
    }
    if names.contains(&"catu") {
        keys.push(
            when(col("catu").eq(lit(DRIVER_CATEGORY)))
                .then(lit(0i32))
                .otherwise(lit(1i32)),
        );
    }
    keys.extend(
        names
            .into_iter()
            .filter(|n| *n != ACCIDENT_ID && *n != VEHICLE_ID)
            .map(col),
    );
    keys
}

/// Produce exactly one row per accident identifier present in `df`.
///
/// Rows are put in the order of [`row_order`] first so `First` picks the
/// same row regardless of input order.
pub fn aggregate_accidents(df: &DataFrame) -> Result<DataFrame> {
    aggregate_with_rules(df, AGGREGATION_RULES)
}

pub fn aggregate_with_rules(df: &DataFrame, rules: &[AggregationRule]) -> Result<DataFrame> {
    let sources: Vec<&str> = std::iter::once(ACCIDENT_ID)
        .chain(rules.iter().map(|(source, _, _)| *source))
        .collect();
    require_columns(df, &sources, "aggregate")?;

    let mut exprs: Vec<Expr> = rules
        .iter()
        .map(|(source, reduce, output)| rule_expr(source, *reduce, output))
        .collect();

    let ruled: Vec<&str> = rules
        .iter()
        .flat_map(|(source, _, output)| [*source, *output])
        .collect();
    for name in df.get_column_names() {
        let name = name.as_str();
        if name == ACCIDENT_ID || ruled.contains(&name) {
            continue;
        }
        exprs.push(rule_expr(name, Reduce::First, name));
    }

    let aggregated = df
        .clone()
        .lazy()
        .sort_by_exprs(
            row_order(df),
            SortMultipleOptions::default()
                .with_maintain_order(true)
                .with_nulls_last(true),
        )
        .group_by_stable([col(ACCIDENT_ID)])
        .agg(exprs)
        .collect()?;

    let accidents = df.column(ACCIDENT_ID)?.n_unique()?;
    if aggregated.height() != accidents {
        return Err(PipelineError::schema(
            "aggregate",
            format!(
                "expected {} accident rows, produced {}",
                accidents,
                aggregated.height()
            ),
        ));
    }

    info!(accidents = aggregated.height(), rows = df.height(), "aggregated to accident level");
    Ok(aggregated)
}

/// Remove accidents with no recorded person (no target) and report how many
pub fn drop_unlabelled(df: &DataFrame) -> Result<(DataFrame, usize)> {
    require_columns(df, &[TARGET], "drop_unlabelled")?;
    let missing = df.column(TARGET)?.null_count();
    let labelled = df
        .clone()
        .lazy()
        .filter(col(TARGET).is_not_null())
        .collect()?;
    Ok((labelled, missing))
}
