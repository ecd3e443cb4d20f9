//! Descriptive summaries of a prepared dataset

use polars::prelude::*;
use serde::Serialize;

use crate::error::Result;

use super::recode::Severity;
use super::schema::TARGET;

/// Shape, missing-value ratios and target distribution
#[derive(Debug, Clone, Serialize)]
pub struct DatasetProfile {
    pub rows: usize,
    pub columns: usize,
    /// (column, missing ratio), highest first
    pub missing: Vec<(String, f64)>,
    /// Present when the frame carries the target
    pub target: Option<Vec<TargetShare>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetShare {
    pub class: u8,
    pub label: String,
    pub count: usize,
    pub share: f64,
}

/// Missing ratio of every column, sorted by ratio descending
pub fn analyze_missing_values(df: &DataFrame) -> Vec<(String, f64)> {
    if df.height() == 0 {
        return Vec::new();
    }
    let rows = df.height() as f64;

    let mut missing_ratios: Vec<(String, f64)> = df
        .get_columns()
        .iter()
        .map(|c| (c.name().to_string(), c.null_count() as f64 / rows))
        .collect();

    missing_ratios.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    missing_ratios
}

/// Count and share of each ordinal severity in the target column
pub fn target_distribution(df: &DataFrame) -> Result<Vec<TargetShare>> {
    let values = df.column(TARGET)?.cast(&DataType::Int64)?;
    let values: Vec<i64> = values.i64()?.into_iter().flatten().collect();
    let total = values.len();

    let shares = Severity::ALL
        .iter()
        .map(|severity| {
            let count = values
                .iter()
                .filter(|v| **v == severity.ordinal() as i64)
                .count();
            TargetShare {
                class: severity.ordinal(),
                label: severity.label().to_string(),
                count,
                share: if total == 0 { 0.0 } else { count as f64 / total as f64 },
            }
        })
        .collect();
    Ok(shares)
}

pub fn profile_dataset(df: &DataFrame) -> Result<DatasetProfile> {
    let has_target = df.get_column_names().iter().any(|n| n.as_str() == TARGET);
    Ok(DatasetProfile {
        rows: df.height(),
        columns: df.width(),
        missing: analyze_missing_values(df),
        target: if has_target {
            Some(target_distribution(df)?)
        } else {
            None
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ratios_sorted() {
        let df = df! {
            "a" => [Some(1i64), None, None, Some(4)],
            "b" => [Some(1i64), Some(2), None, Some(4)],
            "c" => [1i64, 2, 3, 4],
        }
        .unwrap();
        let ratios = analyze_missing_values(&df);
        assert_eq!(ratios[0], ("a".to_string(), 0.5));
        assert_eq!(ratios[1], ("b".to_string(), 0.25));
        assert_eq!(ratios[2], ("c".to_string(), 0.0));
    }

    #[test]
    fn test_target_distribution_lists_every_class() {
        let df = df! { "grav_order_max" => [1i64, 1, 3, 2] }.unwrap();
        let dist = target_distribution(&df).unwrap();
        assert_eq!(dist.len(), 4);
        assert_eq!(dist[0].count, 0);
        assert_eq!(dist[1].count, 2);
        assert!((dist[1].share - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_frame_has_no_missing_ratios() {
        let df = DataFrame::empty();
        assert!(analyze_missing_values(&df).is_empty());
    }
}
