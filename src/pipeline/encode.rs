//! One-hot encoding of nominal features
//!
//! The encoder is fitted from a training [`PartitionFrame`] only. Nominal
//! columns get a sorted vocabulary whose first level is the dropped reference;
//! values never seen during fitting encode to all zeros. Numeric columns pass
//! through with missing values replaced by the training median.

use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};

use super::schema::NOMINAL_FEATURES;
use super::split::{Partition, PartitionFrame};

/// Category key used for missing nominal values
pub const MISSING_LEVEL: &str = "missing";

/// Encoded matrix that remembers which partition it came from
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    partition: Partition,
    pub columns: Vec<String>,
    pub values: Array2<f64>,
    pub labels: Vec<u8>,
}

impl FeatureMatrix {
    pub(crate) fn new(partition: Partition, columns: Vec<String>, values: Array2<f64>, labels: Vec<u8>) -> Self {
        Self {
            partition,
            columns,
            values,
            labels,
        }
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncodedColumn {
    Numeric { name: String, fill: f64 },
    /// `levels[0]` is the reference level and gets no indicator
    Nominal { name: String, levels: Vec<String> },
}

impl EncodedColumn {
    pub fn name(&self) -> &str {
        match self {
            EncodedColumn::Numeric { name, .. } | EncodedColumn::Nominal { name, .. } => name,
        }
    }

    fn width(&self) -> usize {
        match self {
            EncodedColumn::Numeric { .. } => 1,
            EncodedColumn::Nominal { levels, .. } => levels.len().saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    columns: Vec<EncodedColumn>,
}

/// Normalize a raw cell to its category key, so `2`, `2.0` and `"2"` agree
pub fn category_key(value: Option<&str>) -> String {
    match value.map(str::trim) {
        None | Some("") => MISSING_LEVEL.to_string(),
        Some(s) => match s.parse::<f64>() {
            Ok(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
            _ => s.to_string(),
        },
    }
}

fn is_nominal(name: &str, dtype: &DataType) -> bool {
    NOMINAL_FEATURES.contains(&name) || matches!(dtype, DataType::String)
}

fn category_keys(column: &Column) -> Result<Vec<String>> {
    let text = column.cast(&DataType::String)?;
    Ok(text.str()?.into_iter().map(category_key).collect())
}

fn numeric_values(column: &Column) -> Result<Vec<Option<f64>>> {
    let values = column.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().collect())
}

fn median(values: &[Option<f64>]) -> f64 {
    let mut present: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if present.is_empty() {
        return 0.0;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    let mid = present.len() / 2;
    if present.len() % 2 == 0 {
        (present[mid - 1] + present[mid]) / 2.0
    } else {
        present[mid]
    }
}

impl CategoricalEncoder {
    /// Fit on the training partition. Any other partition is rejected.
    pub fn fit(train: &PartitionFrame) -> Result<Self> {
        if train.partition() != Partition::Train {
            return Err(PipelineError::EncodingLeakage {
                component: "categorical encoder",
                partition: train.partition().to_string(),
            });
        }
        Self::fit_frame(train.features())
    }

    pub(crate) fn fit_frame(df: &DataFrame) -> Result<Self> {
        let mut columns = Vec::with_capacity(df.width());
        for column in df.get_columns() {
            let name = column.name().to_string();
            if is_nominal(&name, column.dtype()) {
                let mut levels = category_keys(column)?;
                levels.sort_by(|a, b| compare_levels(a, b));
                levels.dedup();
                debug!(column = %name, levels = levels.len(), "nominal vocabulary");
                columns.push(EncodedColumn::Nominal { name, levels });
            } else {
                let fill = median(&numeric_values(column)?);
                columns.push(EncodedColumn::Numeric { name, fill });
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[EncodedColumn] {
        &self.columns
    }

    /// Raw column names expected at transform time
    pub fn input_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    pub fn vocabulary(&self, column: &str) -> Option<&[String]> {
        self.columns.iter().find_map(|c| match c {
            EncodedColumn::Nominal { name, levels } if name == column => Some(levels.as_slice()),
            _ => None,
        })
    }

    /// Training median used for a numeric column
    pub fn numeric_fill(&self, column: &str) -> Option<f64> {
        self.columns.iter().find_map(|c| match c {
            EncodedColumn::Numeric { name, fill } if name == column => Some(*fill),
            _ => None,
        })
    }

    /// Output column names: numeric names as-is, indicators as `column=level`
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for column in &self.columns {
            match column {
                EncodedColumn::Numeric { name, .. } => names.push(name.clone()),
                EncodedColumn::Nominal { name, levels } => {
                    names.extend(levels.iter().skip(1).map(|level| format!("{}={}", name, level)))
                }
            }
        }
        names
    }

    pub fn width(&self) -> usize {
        self.columns.iter().map(EncodedColumn::width).sum()
    }

    /// Encode a frame holding every input column
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let n = df.height();
        let mut out = Array2::<f64>::zeros((n, self.width()));
        let mut offset = 0;

        for encoded in &self.columns {
            let column = df.column(encoded.name()).map_err(|_| {
                PipelineError::schema("encode", format!("missing feature column '{}'", encoded.name()))
            })?;
            match encoded {
                EncodedColumn::Numeric { fill, .. } => {
                    for (row, value) in numeric_values(column)?.into_iter().enumerate() {
                        out[[row, offset]] = value.filter(|v| v.is_finite()).unwrap_or(*fill);
                    }
                }
                EncodedColumn::Nominal { levels, .. } => {
                    for (row, key) in category_keys(column)?.iter().enumerate() {
                        if let Ok(pos) = levels.binary_search_by(|l| compare_levels(l, key)) {
                            if pos > 0 {
                                out[[row, offset + pos - 1]] = 1.0;
                            }
                        }
                    }
                }
            }
            offset += encoded.width();
        }

        Ok(out)
    }

    /// Encode a partition, carrying its tag and labels along
    pub fn transform_partition(&self, frame: &PartitionFrame) -> Result<FeatureMatrix> {
        let values = self.transform(frame.features())?;
        Ok(FeatureMatrix::new(
            frame.partition(),
            self.feature_names(),
            values,
            frame.labels().to_vec(),
        ))
    }
}

/// Numeric keys sort numerically (so `-1 < 2 < 10`), text keys after them
fn compare_levels(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
