//! Tests for feature recoding and the fill policy on consolidated data

use polars::prelude::*;
use roadsev::config::FeatureConfig;
use roadsev::pipeline::{
    apply_fill_policies, consolidate, decode_safety_equipment, load_source_tables,
    recode_features, reduce_features, FillPolicy, IRRELEVANT_COLUMNS,
};

#[path = "common/mod.rs"]
mod common;
use common::*;

fn merged_fixture(n: usize) -> DataFrame {
    let (_dir, config) = create_source_dir(&[2018], n);
    let tables = load_source_tables(&config).unwrap();
    consolidate(&tables).unwrap()
}

#[test]
fn test_safety_equipment_decoding() {
    // belt worn
    assert_eq!(decode_safety_equipment(Some(11)), 1);
    // helmet worn
    assert_eq!(decode_safety_equipment(Some(21)), 2);
    // belt not worn
    assert_eq!(decode_safety_equipment(Some(12)), 0);
    // undetermined usage
    assert_eq!(decode_safety_equipment(Some(13)), -1);
    assert_eq!(decode_safety_equipment(None), -1);
}

#[test]
fn test_recode_adds_engineered_columns_without_touching_input() {
    let merged = merged_fixture(20);
    let width = merged.width();
    let recoded = recode_features(&merged, &FeatureConfig::default()).unwrap();

    assert_eq!(merged.width(), width);
    assert_eq!(recoded.height(), merged.height());
    assert_has_columns(
        &recoded,
        &[
            "hour",
            "jour_semaine",
            "grav_order",
            "choc_avant",
            "choc_arriere",
            "choc_cote",
            "choc_multiple",
            "secu_equipement",
            "surface_normale",
            "is_male",
            "is_female",
            "seat_group",
            "trip_group",
            "age",
            "age_band",
        ],
    );
}

#[test]
fn test_recoded_values_follow_raw_codes() {
    let merged = merged_fixture(20);
    let recoded = recode_features(&merged, &FeatureConfig::default()).unwrap();

    let grav = int_column(&recoded, "grav");
    let order = int_column(&recoded, "grav_order");
    let secu = int_column(&recoded, "secu_equipement");
    for ((g, o), s) in grav.iter().zip(order.iter()).zip(secu.iter()) {
        let expected = match g {
            Some(1) => 0,
            Some(4) => 1,
            Some(3) => 2,
            Some(2) => 3,
            other => panic!("unexpected grav {:?}", other),
        };
        assert_eq!(*o, Some(expected));
        // hurt persons carry an unworn belt in the fixture
        let belt = if expected >= 2 { 0 } else { 1 };
        assert_eq!(*s, Some(belt));
    }

    let choc = int_column(&recoded, "choc");
    let front = int_column(&recoded, "choc_avant");
    let side = int_column(&recoded, "choc_cote");
    for ((c, f), s) in choc.iter().zip(front.iter()).zip(side.iter()) {
        let c = c.unwrap();
        assert_eq!(*f, Some(((1..=3).contains(&c)) as i64));
        assert_eq!(*s, Some(((7..=8).contains(&c)) as i64));
    }

    let surf = int_column(&recoded, "surf");
    let surface = int_column(&recoded, "surface_normale");
    for (raw, flag) in surf.iter().zip(surface.iter()) {
        let expected = match raw.unwrap() {
            1 => 1,
            9 => -1,
            _ => 0,
        };
        assert_eq!(*flag, Some(expected));
    }

    for hour in int_column(&recoded, "hour") {
        assert!((0..24).contains(&hour.unwrap()));
    }
}

#[test]
fn test_reduce_features_fills_and_drops_irrelevant_columns() {
    let merged = merged_fixture(30);
    let (reduced, report) = reduce_features(&merged, &FeatureConfig::default()).unwrap();

    // the fixture has no missing value in any drop-row column
    assert_eq!(report.rows_dropped(), 0);
    assert_eq!(reduced.height(), merged.height());

    for column in IRRELEVANT_COLUMNS {
        assert!(
            reduced.column(column).is_err(),
            "irrelevant column {} still present",
            column
        );
    }

    assert_eq!(reduced.column("nbv").unwrap().null_count(), 0);
    assert!(report.medians.contains_key("nbv"));
    let lartpc = reduced.column("lartpc").unwrap().f64().unwrap();
    assert_eq!(lartpc.null_count(), 0);
    assert!(report.filled.iter().any(|(name, _)| name == "lartpc"));
}

#[test]
fn test_drop_row_policy_removes_incomplete_rows() {
    let df = df! {
        "atm" => [Some(1i64), None, Some(2), Some(3)],
        "nbv" => [Some(2i64), Some(2), None, Some(4)],
        "lum" => [None, Some(1i64), Some(1), Some(5)],
    }
    .unwrap();
    let policies = [
        ("atm", FillPolicy::DropRow),
        ("nbv", FillPolicy::Median),
        ("lum", FillPolicy::Constant(-1)),
    ];

    let (filled, report) = apply_fill_policies(&df, &policies).unwrap();

    assert_eq!(report.rows_dropped(), 1);
    assert_eq!(report.dropped_by_column, vec![("atm".to_string(), 1)]);
    assert_eq!(int_column(&filled, "atm"), vec![Some(1), Some(2), Some(3)]);
    // median taken over the kept rows: 2 and 4
    assert_eq!(int_column(&filled, "nbv"), vec![Some(2), Some(3), Some(4)]);
    assert_eq!(int_column(&filled, "lum"), vec![Some(-1), Some(1), Some(5)]);
}
