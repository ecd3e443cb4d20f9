//! Missing-value policy
//!
//! The policy is data: a table of (column, rule) consulted by one generic
//! routine. Near-complete columns drop the incomplete rows, everything else is
//! filled.

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

use super::schema::require_columns;

/// How missing values of one column are handled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FillPolicy {
    /// Replace with a fixed value (cast to the column type)
    Constant(i64),
    /// Replace with the column median
    Median,
    /// Drop the row
    DropRow,
}

/// Per-column missing-value policy, applied after recoding
pub const FILL_POLICIES: &[(&str, FillPolicy)] = &[
    // near-complete columns: imputation adds more noise than value
    ("atm", FillPolicy::DropRow),
    ("col", FillPolicy::DropRow),
    ("com", FillPolicy::DropRow),
    ("catr", FillPolicy::DropRow),
    ("choc", FillPolicy::DropRow),
    ("manv", FillPolicy::DropRow),
    ("senc", FillPolicy::DropRow),
    // categorical unknown
    ("lum", FillPolicy::Constant(-1)),
    ("agg", FillPolicy::Constant(-1)),
    ("int", FillPolicy::Constant(-1)),
    ("mois", FillPolicy::Constant(-1)),
    ("hour", FillPolicy::Constant(-1)),
    ("jour_semaine", FillPolicy::Constant(-1)),
    ("catu", FillPolicy::Constant(-1)),
    ("catv", FillPolicy::Constant(-1)),
    ("vosp", FillPolicy::Constant(-1)),
    ("plan", FillPolicy::Constant(-1)),
    // obstacle struck: absence recorded as unknown
    ("obs", FillPolicy::Constant(-1)),
    ("obsm", FillPolicy::Constant(-1)),
    // no central reservation
    ("lartpc", FillPolicy::Constant(0)),
    ("larrout", FillPolicy::Constant(-1)),
    ("prof", FillPolicy::Constant(-1)),
    ("nbv", FillPolicy::Median),
    ("circ", FillPolicy::Constant(-1)),
    // no special amenity
    ("infra", FillPolicy::Constant(0)),
    ("situ", FillPolicy::Constant(-1)),
];

/// Columns with no modelling value, dropped once filling is done
pub const IRRELEVANT_COLUMNS: &[&str] = &[
    "adr", "gps", "lat", "long", "com", "dep", "voie", "v1", "v2", "pr", "pr1", "env1", "occutc",
    "locp", "actp", "etatp", "hrmn", "jour", "an", "an_nais", "choc", "secu", "surf", "sexe",
    "place", "trajet", "grav",
];

/// Default value of an engineered feature when it is absent at prediction time
pub fn feature_default(column: &str) -> Option<FeatureDefault> {
    if let Some((_, policy)) = FILL_POLICIES.iter().find(|(name, _)| *name == column) {
        return match policy {
            FillPolicy::Constant(v) => Some(FeatureDefault::Number(*v as f64)),
            // resolved from training data
            FillPolicy::Median => None,
            // dropped-row columns have no fill; -1 is an unseen category
            FillPolicy::DropRow => Some(FeatureDefault::Number(-1.0)),
        };
    }
    match column {
        "choc_avant" | "choc_arriere" | "choc_cote" | "choc_multiple" | "is_male"
        | "is_female" => Some(FeatureDefault::Number(0.0)),
        "secu_equipement" | "surface_normale" => Some(FeatureDefault::Number(-1.0)),
        "age_band" | "trip_group" => Some(FeatureDefault::Text("unknown".to_string())),
        "seat_group" => Some(FeatureDefault::Text("other/unknown".to_string())),
        _ => None,
    }
}

/// A documented fill value for an engineered feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureDefault {
    Number(f64),
    Text(String),
}

/// What the fill routine did
#[derive(Debug, Clone, Default, Serialize)]
pub struct FillReport {
    pub rows_before: usize,
    pub rows_after: usize,
    /// Rows removed per drop-row column (a row may count under several)
    pub dropped_by_column: Vec<(String, usize)>,
    /// Values filled per column
    pub filled: Vec<(String, usize)>,
    /// Medians used for `FillPolicy::Median` columns
    pub medians: BTreeMap<String, f64>,
}

impl FillReport {
    pub fn rows_dropped(&self) -> usize {
        self.rows_before - self.rows_after
    }
}

/// Apply a fill-policy table: drop rows first, then fill.
///
/// Every column named in the table must be present.
pub fn apply_fill_policies(
    df: &DataFrame,
    policies: &[(&str, FillPolicy)],
) -> Result<(DataFrame, FillReport)> {
    let names: Vec<&str> = policies.iter().map(|(name, _)| *name).collect();
    require_columns(df, &names, "fill")?;

    let mut report = FillReport {
        rows_before: df.height(),
        ..Default::default()
    };

    let drop_columns: Vec<&str> = policies
        .iter()
        .filter(|(_, p)| *p == FillPolicy::DropRow)
        .map(|(name, _)| *name)
        .collect();
    for name in &drop_columns {
        let nulls = df.column(name)?.null_count();
        if nulls > 0 {
            report.dropped_by_column.push((name.to_string(), nulls));
        }
    }

    let mut lf = df.clone().lazy();
    if let Some(predicate) = drop_columns
        .iter()
        .map(|name| col(*name).is_not_null())
        .reduce(|acc, e| acc.and(e))
    {
        lf = lf.filter(predicate);
    }
    let kept = lf.collect()?;

    let mut fills: Vec<Expr> = Vec::new();
    for (name, policy) in policies {
        let column = kept.column(name)?;
        let nulls = column.null_count();
        let is_float = column.dtype().is_float();

        let value: f64 = match policy {
            FillPolicy::DropRow => continue,
            FillPolicy::Constant(v) => *v as f64,
            FillPolicy::Median => {
                let median = column
                    .as_materialized_series()
                    .median()
                    .unwrap_or(0.0);
                report.medians.insert(name.to_string(), median);
                median
            }
        };

        if nulls == 0 {
            continue;
        }
        report.filled.push((name.to_string(), nulls));

        let literal = if is_float {
            lit(value)
        } else {
            lit(value.round() as i64)
        };
        fills.push(col(*name).fill_null(literal));
    }

    let filled = if fills.is_empty() {
        kept
    } else {
        kept.lazy().with_columns(fills).collect()?
    };

    report.rows_after = filled.height();
    if report.rows_dropped() > 0 {
        warn!(
            dropped = report.rows_dropped(),
            remaining = report.rows_after,
            "dropped rows missing near-complete columns"
        );
    }
    info!(columns = report.filled.len(), "applied fill policy");

    Ok((filled, report))
}

/// Remove the irrelevant columns that are present
pub fn drop_irrelevant_columns(df: &DataFrame) -> DataFrame {
    let present: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .filter(|name| IRRELEVANT_COLUMNS.contains(&name.as_str()))
        .collect();
    df.drop_many(present)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table_matches_documented_rules() {
        let lookup = |name: &str| {
            FILL_POLICIES
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, p)| *p)
        };
        assert_eq!(lookup("lartpc"), Some(FillPolicy::Constant(0)));
        assert_eq!(lookup("infra"), Some(FillPolicy::Constant(0)));
        assert_eq!(lookup("larrout"), Some(FillPolicy::Constant(-1)));
        assert_eq!(lookup("nbv"), Some(FillPolicy::Median));
        assert_eq!(lookup("atm"), Some(FillPolicy::DropRow));
        assert_eq!(lookup("obsm"), Some(FillPolicy::Constant(-1)));
    }

    #[test]
    fn test_no_column_is_both_filled_and_irrelevant_except_drop_row_keys() {
        for (name, policy) in FILL_POLICIES {
            if IRRELEVANT_COLUMNS.contains(name) {
                assert_eq!(*policy, FillPolicy::DropRow, "{} is filled then dropped", name);
            }
        }
    }

    #[test]
    fn test_feature_defaults() {
        assert_eq!(feature_default("lartpc"), Some(FeatureDefault::Number(0.0)));
        assert_eq!(feature_default("choc_avant"), Some(FeatureDefault::Number(0.0)));
        assert_eq!(
            feature_default("age_band"),
            Some(FeatureDefault::Text("unknown".to_string()))
        );
        assert_eq!(feature_default("nbv"), None);
    }
}
