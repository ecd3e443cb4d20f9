//! Feature/target separation and stratified train/test split

use std::collections::BTreeMap;

use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::error::{PipelineError, Result};

use super::recode::Severity;
use super::schema::{require_columns, ACCIDENT_ID, TARGET, YEAR_TAG};

/// Which side of the split a frame or matrix came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Test,
    /// Rows supplied at prediction time
    Inference,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Train => write!(f, "train"),
            Partition::Test => write!(f, "test"),
            Partition::Inference => write!(f, "inference"),
        }
    }
}

/// Feature frame and labels tagged with their partition.
///
/// Only the split can produce a `Train` partition, which is what the encoder
/// and scaler accept for fitting.
#[derive(Debug, Clone)]
pub struct PartitionFrame {
    partition: Partition,
    features: DataFrame,
    labels: Vec<u8>,
}

impl PartitionFrame {
    pub(crate) fn new(partition: Partition, features: DataFrame, labels: Vec<u8>) -> Self {
        Self {
            partition,
            features,
            labels,
        }
    }

    /// Unlabelled rows for prediction
    pub fn inference(features: DataFrame) -> Self {
        Self::new(Partition::Inference, features, Vec::new())
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn features(&self) -> &DataFrame {
        &self.features
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.features.height()
    }

    pub fn is_empty(&self) -> bool {
        self.features.height() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SplitData {
    pub train: PartitionFrame,
    pub test: PartitionFrame,
}

/// Explanatory frame and target vector
#[derive(Debug, Clone)]
pub struct Xy {
    pub features: DataFrame,
    pub target: Vec<u8>,
    /// Accidents removed because every occupant was uninjured
    pub excluded_uninjured: usize,
}

/// Separate the target from the features, removing the identifier and the
/// year tag. Rows whose target is missing are rejected.
pub fn split_xy(df: &DataFrame, exclude_uninjured: bool) -> Result<Xy> {
    require_columns(df, &[TARGET], "split")?;

    let target_column = df.column(TARGET)?.cast(&DataType::Int64)?;
    let raw: Vec<Option<i64>> = target_column.i64()?.into_iter().collect();
    let missing = raw.iter().filter(|v| v.is_none()).count();
    if missing > 0 {
        return Err(PipelineError::schema(
            "split",
            format!("{} row(s) have no '{}'", missing, TARGET),
        ));
    }

    let mut keep = Vec::with_capacity(raw.len());
    let mut target = Vec::with_capacity(raw.len());
    for value in raw.into_iter().flatten() {
        let severity = u8::try_from(value)
            .ok()
            .and_then(Severity::from_ordinal)
            .ok_or_else(|| {
                PipelineError::schema("split", format!("'{}' value {} is not an ordinal severity", TARGET, value))
            })?;
        let kept = !(exclude_uninjured && severity == Severity::Uninjured);
        keep.push(kept);
        if kept {
            target.push(severity.ordinal());
        }
    }
    let excluded_uninjured = keep.iter().filter(|k| !**k).count();

    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let kept = df.filter(&mask)?;

    let drop: Vec<&str> = [TARGET, ACCIDENT_ID, YEAR_TAG]
        .into_iter()
        .filter(|c| kept.get_column_names().iter().any(|n| n.as_str() == *c))
        .collect();
    let features = kept.drop_many(drop);

    Ok(Xy {
        features,
        target,
        excluded_uninjured,
    })
}

/// Per-class shuffled split of row indices, returned in ascending order
pub fn stratified_indices(y: &[u8], train_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (i, label) in y.iter().enumerate() {
        by_class.entry(*label).or_default().push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(y.len());
    let mut test = Vec::with_capacity(y.len());

    for (_, mut indices) in by_class {
        indices.shuffle(&mut rng);
        let n = indices.len();
        let mut n_train = (n as f64 * train_fraction).round() as usize;
        if n >= 2 {
            n_train = n_train.clamp(1, n - 1);
        } else {
            n_train = n;
        }
        train.extend_from_slice(&indices[..n_train]);
        test.extend_from_slice(&indices[n_train..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn take_rows(df: &DataFrame, indices: &[usize]) -> Result<DataFrame> {
    let idx: Vec<IdxSize> = indices.iter().map(|&i| i as IdxSize).collect();
    let idx = IdxCa::from_vec("idx".into(), idx);
    Ok(df.take(&idx)?)
}

/// Stratified split preserving the class proportions on both sides
pub fn stratified_split(x: &DataFrame, y: &[u8], train_fraction: f64, seed: u64) -> Result<SplitData> {
    if x.height() != y.len() {
        return Err(PipelineError::schema(
            "split",
            format!("{} feature rows but {} labels", x.height(), y.len()),
        ));
    }
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(PipelineError::Config(format!(
            "train_fraction must be in (0, 1), got {}",
            train_fraction
        )));
    }

    let (train_idx, test_idx) = stratified_indices(y, train_fraction, seed);
    let pick = |indices: &[usize]| indices.iter().map(|&i| y[i]).collect::<Vec<u8>>();

    let train = PartitionFrame::new(Partition::Train, take_rows(x, &train_idx)?, pick(&train_idx));
    let test = PartitionFrame::new(Partition::Test, take_rows(x, &test_idx)?, pick(&test_idx));

    info!(train = train.len(), test = test.len(), "stratified split");
    Ok(SplitData { train, test })
}

/// Count of each label
pub fn class_counts(y: &[u8]) -> BTreeMap<u8, usize> {
    let mut counts = BTreeMap::new();
    for label in y {
        *counts.entry(*label).or_insert(0) += 1;
    }
    counts
}
