//! Evaluation report export

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::model::{EvaluationReport, ModelManifest, TrainingCounts};

/// Metadata about the training run
#[derive(Serialize)]
pub struct TrainingMetadata {
    /// Timestamp of the export (ISO 8601 format)
    pub timestamp: String,
    pub roadsev_version: String,
    /// Prepared dataset, or the raw data directory when prepared on the fly
    pub input: String,
    pub model_bundle: String,
    pub classifier: String,
    pub classes: Vec<u8>,
    pub label_space_note: String,
}

/// Complete evaluation export
#[derive(Serialize)]
pub struct EvaluationExport<'a> {
    pub metadata: TrainingMetadata,
    /// Configuration the model was trained with
    pub config: &'a PipelineConfig,
    pub counts: &'a TrainingCounts,
    pub evaluation: &'a EvaluationReport,
}

/// Write the evaluation report with its run metadata as pretty JSON
pub fn export_evaluation(
    output_path: &Path,
    input: &str,
    bundle_path: &Path,
    manifest: &ModelManifest,
    config: &PipelineConfig,
    counts: &TrainingCounts,
    evaluation: &EvaluationReport,
) -> Result<()> {
    let export = EvaluationExport {
        metadata: TrainingMetadata {
            timestamp: Utc::now().to_rfc3339(),
            roadsev_version: env!("CARGO_PKG_VERSION").to_string(),
            input: input.to_string(),
            model_bundle: bundle_path.display().to_string(),
            classifier: manifest.classifier.to_string(),
            classes: manifest.classes.clone(),
            label_space_note: manifest.label_space_note.clone(),
        },
        config,
        counts,
        evaluation,
    };

    let json = serde_json::to_string_pretty(&export)
        .context("Failed to serialize evaluation report to JSON")?;

    std::fs::write(output_path, json).with_context(|| {
        format!(
            "Failed to write evaluation report to {}",
            output_path.display()
        )
    })?;

    Ok(())
}
