//! Trained model bundle and the prediction interface
//!
//! A bundle is a zip archive holding four JSON documents: the manifest, the
//! fitted encoder, the fitted scaler and the fitted classifier. Prediction
//! accepts rows with the engineered feature columns; absent or missing columns
//! take the defaults recorded in the manifest.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use chrono::Utc;
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ::zip::write::SimpleFileOptions;
use ::zip::{ZipArchive, ZipWriter};

use crate::config::ClassifierKind;
use crate::error::{PipelineError, Result};
use crate::pipeline::{
    category_key, feature_default, CategoricalEncoder, EncodedColumn, FeatureDefault,
    StandardScaler, Severity, MISSING_LEVEL,
};

use super::classifier::{argmax, FittedClassifier, SeverityClassifier};
use super::evaluate::EvaluationReport;

const MANIFEST_FILE: &str = "manifest.json";
const ENCODER_FILE: &str = "encoder.json";
const SCALER_FILE: &str = "scaler.json";
const CLASSIFIER_FILE: &str = "classifier.json";

/// Output column holding the predicted ordinal class
pub const PREDICTION_COLUMN: &str = "prediction";
/// Output column holding the maximum class probability
pub const CONFIDENCE_COLUMN: &str = "confidence";

/// Descriptive metadata stored next to the fitted components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub created_at: String,
    pub classifier: ClassifierKind,
    /// Ordinal classes the model can predict
    pub classes: Vec<u8>,
    pub class_labels: Vec<String>,
    /// How the label space was derived from the raw severity scale
    pub label_space_note: String,
    /// Engineered columns expected at prediction time, in encoder order
    pub feature_columns: Vec<String>,
    /// Value used when a feature column is absent or missing
    pub defaults: BTreeMap<String, FeatureDefault>,
    pub macro_f1: f64,
}

impl ModelManifest {
    pub fn new(
        classifier: &FittedClassifier,
        encoder: &CategoricalEncoder,
        excluded_uninjured: bool,
        evaluation: &EvaluationReport,
    ) -> Self {
        let classes = classifier.classes().to_vec();
        let class_labels = classes
            .iter()
            .map(|c| {
                Severity::from_ordinal(*c)
                    .map(|s| s.label().to_string())
                    .unwrap_or_else(|| c.to_string())
            })
            .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now().to_rfc3339(),
            classifier: classifier.kind(),
            classes,
            class_labels,
            label_space_note: label_space_note(excluded_uninjured),
            feature_columns: encoder.input_columns().iter().map(|s| s.to_string()).collect(),
            defaults: prediction_defaults(encoder),
            macro_f1: evaluation.macro_f1,
        }
    }
}

fn label_space_note(excluded_uninjured: bool) -> String {
    let mut note = String::from(
        "Target is the maximum ordinal severity over the accident's persons \
         (0 uninjured, 1 light injury, 2 hospitalized, 3 fatality). Any accident \
         with at least one injured person takes an injured class, so class 0 only \
         covers accidents where nobody was hurt.",
    );
    if excluded_uninjured {
        note.push_str(" Those accidents were excluded before training; predictions are in {1, 2, 3}.");
    } else {
        note.push_str(" Those accidents were kept; class 0 is part of the label space.");
    }
    note
}

/// Documented defaults, falling back to the training median for numeric
/// columns without one
fn prediction_defaults(encoder: &CategoricalEncoder) -> BTreeMap<String, FeatureDefault> {
    let mut defaults = BTreeMap::new();
    for column in encoder.columns() {
        let name = column.name();
        let value = match (feature_default(name), column) {
            (Some(d), _) => Some(d),
            (None, EncodedColumn::Numeric { fill, .. }) => Some(FeatureDefault::Number(*fill)),
            (None, EncodedColumn::Nominal { .. }) => None,
        };
        if let Some(value) = value {
            defaults.insert(name.to_string(), value);
        }
    }
    defaults
}

/// One prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class: u8,
    pub label: String,
    /// Maximum class probability, when the classifier provides probabilities
    pub confidence: Option<f64>,
    pub probabilities: Option<Vec<(u8, f64)>>,
}

/// Everything needed to turn an engineered feature row into a prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub manifest: ModelManifest,
    pub encoder: CategoricalEncoder,
    pub scaler: StandardScaler,
    pub classifier: FittedClassifier,
}

fn write_json<W: Write + std::io::Seek, T: Serialize>(
    zip: &mut ZipWriter<W>,
    name: &str,
    value: &T,
    options: SimpleFileOptions,
) -> Result<()> {
    zip.start_file(name, options)?;
    let content = serde_json::to_vec_pretty(value)?;
    zip.write_all(&content)?;
    Ok(())
}

fn read_json<R: Read + std::io::Seek, T: DeserializeOwned>(archive: &mut ZipArchive<R>, name: &str) -> Result<T> {
    let mut file = archive
        .by_name(name)
        .map_err(|_| PipelineError::Model(format!("model bundle has no '{}'", name)))?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(serde_json::from_slice(&content)?)
}

impl ModelBundle {
    /// Write the bundle as a zip archive
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(::zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        write_json(&mut zip, MANIFEST_FILE, &self.manifest, options)?;
        write_json(&mut zip, ENCODER_FILE, &self.encoder, options)?;
        write_json(&mut zip, SCALER_FILE, &self.scaler, options)?;
        write_json(&mut zip, CLASSIFIER_FILE, &self.classifier, options)?;
        zip.finish()?;

        info!(path = %path.display(), "saved model bundle");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let bundle = Self {
            manifest: read_json(&mut archive, MANIFEST_FILE)?,
            encoder: read_json(&mut archive, ENCODER_FILE)?,
            scaler: read_json(&mut archive, SCALER_FILE)?,
            classifier: read_json(&mut archive, CLASSIFIER_FILE)?,
        };
        if bundle.scaler.means().len() != bundle.encoder.width() {
            return Err(PipelineError::Model(format!(
                "scaler has {} columns but encoder produces {}",
                bundle.scaler.means().len(),
                bundle.encoder.width()
            )));
        }
        Ok(bundle)
    }

    /// Rebuild every expected feature column, applying the manifest defaults
    /// to absent columns and missing cells. Extra columns are ignored.
    pub fn complete_features(&self, df: &DataFrame) -> Result<DataFrame> {
        let n = df.height();
        let mut columns = Vec::with_capacity(self.encoder.columns().len());

        for encoded in self.encoder.columns() {
            let name = encoded.name();
            let default = self.manifest.defaults.get(name);
            let present = df.column(name).ok();
            if present.is_none() {
                debug!(column = name, "feature absent, using default");
            }

            let column = match encoded {
                EncodedColumn::Numeric { fill, .. } => {
                    let fallback = match default {
                        Some(FeatureDefault::Number(v)) => *v,
                        _ => *fill,
                    };
                    let values: Vec<f64> = match present {
                        Some(c) => c
                            .cast(&DataType::Float64)?
                            .f64()?
                            .into_iter()
                            .map(|v| v.filter(|v| v.is_finite()).unwrap_or(fallback))
                            .collect(),
                        None => vec![fallback; n],
                    };
                    Column::new(name.into(), values)
                }
                EncodedColumn::Nominal { .. } => {
                    let fallback = match default {
                        Some(FeatureDefault::Number(v)) => category_key(Some(&v.to_string())),
                        Some(FeatureDefault::Text(s)) => s.clone(),
                        None => MISSING_LEVEL.to_string(),
                    };
                    let values: Vec<String> = match present {
                        Some(c) => c
                            .cast(&DataType::String)?
                            .str()?
                            .into_iter()
                            .map(|v| match category_key(v) {
                                key if key == MISSING_LEVEL => fallback.clone(),
                                key => key,
                            })
                            .collect(),
                        None => vec![fallback.clone(); n],
                    };
                    Column::new(name.into(), values)
                }
            };
            columns.push(column);
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Predict every row of `df`, appending `prediction` and `confidence`
    pub fn predict_frame(&self, df: &DataFrame) -> Result<DataFrame> {
        let predictions = self.predict_rows(df)?;

        let classes: Vec<i64> = predictions.iter().map(|p| p.class as i64).collect();
        let confidence: Vec<Option<f64>> = predictions.iter().map(|p| p.confidence).collect();

        let mut out = df.clone();
        out.with_column(Column::new(PREDICTION_COLUMN.into(), classes))?;
        out.with_column(Column::new(CONFIDENCE_COLUMN.into(), confidence))?;
        Ok(out)
    }

    /// Predict every row of `df`
    pub fn predict_rows(&self, df: &DataFrame) -> Result<Vec<Prediction>> {
        let features = self.complete_features(df)?;
        let encoded = self.encoder.transform(&features)?;
        let scaled = self.scaler.transform(&encoded)?;

        let classes = self.classifier.classes().to_vec();
        let predicted = self.classifier.predict(&scaled)?;
        let proba = self.classifier.predict_proba(&scaled)?;

        let predictions = predicted
            .into_iter()
            .enumerate()
            .map(|(row, class)| {
                let probabilities = proba.as_ref().map(|p| {
                    classes
                        .iter()
                        .zip(p.row(row).iter())
                        .map(|(c, v)| (*c, *v))
                        .collect::<Vec<_>>()
                });
                let confidence = proba
                    .as_ref()
                    .map(|p| p.row(row)[argmax(p.row(row).iter().copied())]);
                Prediction {
                    class,
                    label: Severity::from_ordinal(class)
                        .map(|s| s.label().to_string())
                        .unwrap_or_else(|| class.to_string()),
                    confidence,
                    probabilities,
                }
            })
            .collect();

        Ok(predictions)
    }

    /// Predict one record given as column name to raw value
    pub fn predict_record(&self, record: &BTreeMap<String, String>) -> Result<Prediction> {
        let columns: Vec<Column> = record
            .iter()
            .map(|(name, value)| Column::new(name.as_str().into(), [value.as_str()]))
            .collect();
        let row = if columns.is_empty() {
            DataFrame::new(vec![Column::new("__row".into(), [0i64])])?
        } else {
            DataFrame::new(columns)?
        };

        self.predict_rows(&row)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Model("no prediction produced".into()))
    }
}
