//! Tests for one-hot encoding and scaling fitted on the training partition

use polars::prelude::*;
use roadsev::error::PipelineError;
use roadsev::pipeline::{
    stratified_split, CategoricalEncoder, EncodedColumn, Partition, PartitionFrame,
    StandardScaler,
};

#[path = "common/mod.rs"]
mod common;

/// Light (1) accidents at night on urban roads, serious (3) ones by day on
/// rural roads. `catv` carries a level only present in the last rows.
fn frame() -> (DataFrame, Vec<u8>) {
    let n = 40;
    let y: Vec<u8> = (0..n).map(|i| if i % 2 == 0 { 1 } else { 3 }).collect();
    let df = df! {
        "lum" => (0..n).map(|i| if i % 2 == 0 { 3i64 } else { 1 }).collect::<Vec<_>>(),
        "age_band" => (0..n).map(|i| if i % 4 < 2 { "adult" } else { "young" }).collect::<Vec<_>>(),
        "nbv" => (0..n).map(|i| Some((i % 4) as f64)).collect::<Vec<_>>(),
    }
    .unwrap();
    (df, y)
}

#[test]
fn test_encoder_refuses_test_and_inference_partitions() {
    let (df, y) = frame();
    let split = stratified_split(&df, &y, 0.8, 42).unwrap();

    match CategoricalEncoder::fit(&split.test) {
        Err(PipelineError::EncodingLeakage { partition, .. }) => assert_eq!(partition, "test"),
        other => panic!("expected leakage error, got {:?}", other.map(|_| ())),
    }

    let inference = PartitionFrame::inference(df.clone());
    assert_eq!(inference.partition(), Partition::Inference);
    assert!(matches!(
        CategoricalEncoder::fit(&inference),
        Err(PipelineError::EncodingLeakage { .. })
    ));
}

#[test]
fn test_scaler_refuses_test_matrix() {
    let (df, y) = frame();
    let split = stratified_split(&df, &y, 0.8, 42).unwrap();
    let encoder = CategoricalEncoder::fit(&split.train).unwrap();

    let train = encoder.transform_partition(&split.train).unwrap();
    let test = encoder.transform_partition(&split.test).unwrap();
    assert_eq!(train.partition(), Partition::Train);
    assert_eq!(test.partition(), Partition::Test);

    assert!(StandardScaler::fit(&train, true).is_ok());
    assert!(matches!(
        StandardScaler::fit(&test, true),
        Err(PipelineError::EncodingLeakage { component, .. }) if component.contains("scaler")
    ));
}

#[test]
fn test_vocabulary_is_sorted_with_reference_first() {
    let (df, y) = frame();
    let split = stratified_split(&df, &y, 0.8, 42).unwrap();
    let encoder = CategoricalEncoder::fit(&split.train).unwrap();

    assert_eq!(
        encoder.vocabulary("lum").unwrap(),
        &["1".to_string(), "3".to_string()]
    );
    assert_eq!(
        encoder.vocabulary("age_band").unwrap(),
        &["adult".to_string(), "young".to_string()]
    );
    assert!(matches!(
        encoder.columns().iter().find(|c| c.name() == "nbv"),
        Some(EncodedColumn::Numeric { .. })
    ));
    assert_eq!(
        encoder.feature_names(),
        vec!["lum=3".to_string(), "age_band=young".to_string(), "nbv".to_string()]
    );
    assert_eq!(encoder.width(), 3);
}

#[test]
fn test_unseen_and_missing_values_encode_to_zero_or_median() {
    let (df, y) = frame();
    let split = stratified_split(&df, &y, 0.8, 42).unwrap();
    let encoder = CategoricalEncoder::fit(&split.train).unwrap();
    let fill = encoder.numeric_fill("nbv").unwrap();

    let new_rows = df! {
        "lum" => [Some(5i64), None],
        "age_band" => ["senior", "young"],
        "nbv" => [None, Some(2.0)],
    }
    .unwrap();
    let m = encoder.transform(&new_rows).unwrap();

    // unseen lum and unseen age band: no indicator set
    assert_eq!((m[[0, 0]], m[[0, 1]]), (0.0, 0.0));
    assert_eq!(m[[0, 2]], fill);
    assert_eq!((m[[1, 0]], m[[1, 1]], m[[1, 2]]), (0.0, 1.0, 2.0));
}

#[test]
fn test_transform_requires_every_input_column() {
    let (df, y) = frame();
    let split = stratified_split(&df, &y, 0.8, 42).unwrap();
    let encoder = CategoricalEncoder::fit(&split.train).unwrap();

    let partial = df.drop("nbv").unwrap();
    let err = encoder.transform(&partial).unwrap_err();
    assert!(err.to_string().contains("nbv"));
}

#[test]
fn test_scaled_training_matrix_has_unit_variance() {
    let (df, y) = frame();
    let split = stratified_split(&df, &y, 0.8, 42).unwrap();
    let encoder = CategoricalEncoder::fit(&split.train).unwrap();
    let train = encoder.transform_partition(&split.train).unwrap();

    let scaler = StandardScaler::fit(&train, true).unwrap();
    let scaled = scaler.transform_matrix(&train).unwrap();

    for column in scaled.values.columns() {
        let n = column.len() as f64;
        let mean = column.sum() / n;
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9, "variance {}", var);
    }
    assert_eq!(scaled.labels, train.labels);
}
