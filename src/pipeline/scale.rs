//! Standardization fitted on the training matrix

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

use super::encode::FeatureMatrix;
use super::split::Partition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    center: bool,
    means: Vec<f64>,
    /// Standard deviations; constant columns keep 1.0
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit per-column mean and standard deviation. Only a training matrix is
    /// accepted.
    pub fn fit(train: &FeatureMatrix, center: bool) -> Result<Self> {
        if train.partition() != Partition::Train {
            return Err(PipelineError::EncodingLeakage {
                component: "standard scaler",
                partition: train.partition().to_string(),
            });
        }
        Ok(Self::fit_values(&train.values, center))
    }

    pub(crate) fn fit_values(values: &Array2<f64>, center: bool) -> Self {
        let n = values.nrows();
        let mut means = Vec::with_capacity(values.ncols());
        let mut scales = Vec::with_capacity(values.ncols());

        for column in values.axis_iter(Axis(1)) {
            if n == 0 {
                means.push(0.0);
                scales.push(1.0);
                continue;
            }
            let mean = column.sum() / n as f64;
            let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            let std = variance.sqrt();
            means.push(mean);
            scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }

        Self {
            center,
            means,
            scales,
        }
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn transform(&self, values: &Array2<f64>) -> Result<Array2<f64>> {
        if values.ncols() != self.means.len() {
            return Err(PipelineError::Model(format!(
                "scaler fitted on {} columns, got {}",
                self.means.len(),
                values.ncols()
            )));
        }

        let mut out = values.clone();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let shift = if self.center { self.means[j] } else { 0.0 };
            let scale = self.scales[j];
            column.mapv_inplace(|v| (v - shift) / scale);
        }
        Ok(out)
    }

    /// Scale a matrix, keeping its partition and labels
    pub fn transform_matrix(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        Ok(FeatureMatrix::new(
            matrix.partition(),
            matrix.columns.clone(),
            self.transform(&matrix.values)?,
            matrix.labels.clone(),
        ))
    }
}
