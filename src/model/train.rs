//! Encoding, split and imbalance-aware training, end to end

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::{
    class_counts, drop_unlabelled, smote, split_xy, stratified_split, undersample,
    CategoricalEncoder, StandardScaler,
};

use super::bundle::{ModelBundle, ModelManifest};
use super::classifier::{fit_classifier, SeverityClassifier};
use super::evaluate::{evaluate, EvaluationReport};

/// Class counts at each training step
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingCounts {
    /// Accidents with no recorded person, hence no target
    pub unlabelled: usize,
    pub excluded_uninjured: usize,
    pub train: BTreeMap<u8, usize>,
    pub test: BTreeMap<u8, usize>,
    pub undersampled: BTreeMap<u8, usize>,
    pub oversampled: BTreeMap<u8, usize>,
    pub encoded_features: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ModelBundle,
    pub evaluation: EvaluationReport,
    pub counts: TrainingCounts,
}

/// Train on an accident-level frame and evaluate on the untouched test split.
///
/// Steps: drop accidents without a target, separate features from the
/// target, stratified split, fit the encoder and the scaler on the training
/// partition, under-sample then over-sample the training matrix, fit the
/// classifier, evaluate on the unbalanced test matrix.
pub fn train_model(accidents: &DataFrame, config: &PipelineConfig) -> Result<TrainingOutcome> {
    config.validate()?;

    let (labelled, unlabelled) = drop_unlabelled(accidents)?;
    if unlabelled > 0 {
        warn!(unlabelled, "dropped accidents with no recorded person");
    }

    let xy = split_xy(&labelled, config.split.exclude_uninjured)?;
    let split = stratified_split(
        &xy.features,
        &xy.target,
        config.split.train_fraction,
        config.split.seed,
    )?;

    let encoder = CategoricalEncoder::fit(&split.train)?;
    let train_matrix = encoder.transform_partition(&split.train)?;
    let test_matrix = encoder.transform_partition(&split.test)?;

    let scaler = StandardScaler::fit(&train_matrix, config.scaling.center)?;
    let train_scaled = scaler.transform_matrix(&train_matrix)?;
    let test_scaled = scaler.transform_matrix(&test_matrix)?;

    let sampling = &config.sampling;
    let thinned = undersample(
        &train_scaled.values,
        &train_scaled.labels,
        &sampling.undersample_ratios,
        sampling.seed,
    )?;
    let balanced = smote(
        &thinned.values,
        &thinned.labels,
        sampling.k_neighbors,
        sampling.oversample_targets.as_ref(),
        sampling.seed,
    )?;

    let classifier = fit_classifier(&balanced.values, &balanced.labels, &config.classifier)?;

    let predicted = classifier.predict(&test_scaled.values)?;
    let evaluation = evaluate(&test_scaled.labels, &predicted);
    info!(
        macro_f1 = evaluation.macro_f1,
        accuracy = evaluation.accuracy,
        "evaluated on held-out partition"
    );

    let counts = TrainingCounts {
        unlabelled,
        excluded_uninjured: xy.excluded_uninjured,
        train: class_counts(split.train.labels()),
        test: class_counts(split.test.labels()),
        undersampled: thinned.counts(),
        oversampled: balanced.counts(),
        encoded_features: encoder.width(),
    };

    let manifest = ModelManifest::new(&classifier, &encoder, config.split.exclude_uninjured, &evaluation);
    let bundle = ModelBundle {
        manifest,
        encoder,
        scaler,
        classifier,
    };

    Ok(TrainingOutcome {
        bundle,
        evaluation,
        counts,
    })
}
