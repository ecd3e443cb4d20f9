//! Tests for the dataset exploration summaries

use polars::prelude::*;
use roadsev::config::PipelineConfig;
use roadsev::pipeline::{
    analyze_missing_values, prepare_dataset, profile_dataset, target_distribution, TARGET,
};

#[path = "common/mod.rs"]
mod common;
use common::*;

#[test]
fn test_analyze_missing_values_basic() {
    let df = df! {
        "col_complete" => [1.0f64, 2.0, 3.0, 4.0, 5.0],
        "col_partial_missing" => [Some(1.0f64), Some(2.0), None, None, Some(5.0)],
        "col_all_missing" => [None::<f64>, None, None, None, None],
    }
    .unwrap();

    let ratios = analyze_missing_values(&df);
    let ratio_map: std::collections::HashMap<_, _> = ratios.iter().cloned().collect();

    assert!(
        (ratio_map["col_complete"] - 0.0).abs() < 0.001,
        "col_complete should have 0% missing, got {}",
        ratio_map["col_complete"]
    );
    assert!(
        (ratio_map["col_partial_missing"] - 0.4).abs() < 0.001,
        "col_partial_missing should have 40% missing, got {}",
        ratio_map["col_partial_missing"]
    );
    assert!(
        (ratio_map["col_all_missing"] - 1.0).abs() < 0.001,
        "col_all_missing should have 100% missing, got {}",
        ratio_map["col_all_missing"]
    );

    // sorted descending
    for pair in ratios.windows(2) {
        assert!(pair[0].1 >= pair[1].1);
    }
}

#[test]
fn test_empty_frame_has_no_ratios() {
    let df = DataFrame::empty();
    assert!(analyze_missing_values(&df).is_empty());
}

#[test]
fn test_target_distribution_covers_every_severity() {
    let df = df! {
        TARGET => [1i64, 1, 1, 2, 3, 1, 2, 1],
    }
    .unwrap();

    let shares = target_distribution(&df).unwrap();

    assert_eq!(shares.len(), 4);
    assert_eq!(shares[0].count, 0);
    assert_eq!(shares[1].label, "light injury");
    assert_eq!(shares[1].count, 5);
    assert!((shares[1].share - 0.625).abs() < 1e-12);
    assert_eq!(shares[3].count, 1);
    let total: f64 = shares.iter().map(|s| s.share).sum();
    assert!((total - 1.0).abs() < 1e-12);
}

#[test]
fn test_profile_of_prepared_fixture() {
    let (_dir, source) = create_source_dir(&[2018], 50);
    let config = PipelineConfig {
        source,
        ..Default::default()
    };
    let accidents = prepare_dataset(&config).unwrap().accidents;

    let profile = profile_dataset(&accidents).unwrap();

    assert_eq!(profile.rows, 50);
    assert_eq!(profile.columns, accidents.width());
    assert_eq!(profile.missing.len(), accidents.width());
    // every fill policy has run, nothing is left missing
    assert!(profile.missing.iter().all(|(_, ratio)| *ratio == 0.0));

    let target = profile.target.unwrap();
    let counts: Vec<usize> = target.iter().map(|s| s.count).collect();
    assert_eq!(counts, vec![5, 25, 15, 5]);
}

#[test]
fn test_profile_without_target() {
    let df = df! {
        "lum" => [1i64, 2],
    }
    .unwrap();
    let profile = profile_dataset(&df).unwrap();
    assert!(profile.target.is_none());
    assert_shape(&df, profile.rows, profile.columns);
}
