//! Shared test utilities and fixture generators
#![allow(dead_code)]

use polars::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use roadsev::config::{SourceConfig, YearRange};

/// Raw `grav` code of the worst-injured person for accident `i`.
///
/// Over ten accidents: 5 light injury, 3 hospitalized, 1 fatality, 1 where
/// nobody was hurt.
pub fn worst_grav(i: usize) -> i64 {
    match i % 10 {
        0..=4 => 4,
        5..=7 => 3,
        8 => 2,
        _ => 1,
    }
}

/// Ordinal of `worst_grav(i)`
pub fn worst_ordinal(i: usize) -> i64 {
    match worst_grav(i) {
        4 => 1,
        3 => 2,
        2 => 3,
        _ => 0,
    }
}

pub fn accident_id(year: i32, i: usize) -> i64 {
    year as i64 * 100_000 + i as i64
}

/// Vehicles of accident `i`: one or two
pub fn vehicle_ids(i: usize) -> Vec<&'static str> {
    if i % 2 == 0 {
        vec!["A01"]
    } else {
        vec!["A01", "B01"]
    }
}

/// Yearly characteristics file body
pub fn characteristics_csv(year: i32, n: usize, sep: char) -> String {
    let header = [
        "Num_Acc", "an", "mois", "jour", "hrmn", "lum", "agg", "int", "atm", "col", "com", "adr",
        "gps", "lat", "long", "dep",
    ];
    let mut out = header.join(&sep.to_string());
    out.push('\n');
    for i in 0..n {
        let severe = worst_ordinal(i) >= 2;
        let row = [
            accident_id(year, i).to_string(),
            (year % 100).to_string(),
            (1 + i % 12).to_string(),
            (1 + i % 28).to_string(),
            format!("{}{:02}", i % 24, (i * 7) % 60),
            if severe { "3" } else { "1" }.to_string(),
            if severe { "1" } else { "2" }.to_string(),
            (1 + i % 4).to_string(),
            (1 + i % 3).to_string(),
            (1 + i % 7).to_string(),
            "75056".to_string(),
            "RUE DE LA PAIX".to_string(),
            "M".to_string(),
            String::new(),
            String::new(),
            "750".to_string(),
        ];
        out.push_str(&row.join(&sep.to_string()));
        out.push('\n');
    }
    out
}

/// Yearly locations file body
pub fn locations_csv(year: i32, n: usize, sep: char) -> String {
    let header = [
        "Num_Acc", "catr", "voie", "v1", "v2", "circ", "nbv", "pr", "pr1", "vosp", "prof", "plan",
        "lartpc", "larrout", "surf", "infra", "situ", "env1",
    ];
    let mut out = header.join(&sep.to_string());
    out.push('\n');
    for i in 0..n {
        let severe = worst_ordinal(i) >= 2;
        let row = [
            accident_id(year, i).to_string(),
            if severe { "3" } else { "4" }.to_string(),
            "12".to_string(),
            String::new(),
            String::new(),
            (1 + i % 2).to_string(),
            // some lanes unknown, median fills them
            if i % 5 == 0 { String::new() } else { (2 + i % 2).to_string() },
            String::new(),
            String::new(),
            "0".to_string(),
            "1".to_string(),
            (1 + i % 3).to_string(),
            if i % 3 == 0 { String::new() } else { "0".to_string() },
            "60".to_string(),
            (1 + i % 9).to_string(),
            String::new(),
            "1".to_string(),
            "0".to_string(),
        ];
        out.push_str(&row.join(&sep.to_string()));
        out.push('\n');
    }
    out
}

/// Yearly vehicles file body
pub fn vehicles_csv(year: i32, n: usize, sep: char) -> String {
    let header = [
        "Num_Acc", "senc", "catv", "occutc", "obs", "obsm", "choc", "manv", "num_veh",
    ];
    let mut out = header.join(&sep.to_string());
    out.push('\n');
    for i in 0..n {
        let severe = worst_ordinal(i) >= 2;
        for (v, vehicle) in vehicle_ids(i).into_iter().enumerate() {
            let row = [
                accident_id(year, i).to_string(),
                "1".to_string(),
                if severe && v == 0 { "2" } else { "7" }.to_string(),
                String::new(),
                if severe { "1" } else { "0" }.to_string(),
                (v + 1).to_string(),
                (1 + (i + v * 3) % 9).to_string(),
                (1 + i % 15).to_string(),
                vehicle.to_string(),
            ];
            out.push_str(&row.join(&sep.to_string()));
            out.push('\n');
        }
    }
    out
}

/// Yearly persons file body: each vehicle's driver, plus a passenger in the
/// first vehicle of every third accident. The first driver carries the worst
/// severity, everyone else is uninjured.
pub fn persons_csv(year: i32, n: usize, sep: char) -> String {
    let header = [
        "Num_Acc", "place", "catu", "grav", "sexe", "trajet", "secu", "locp", "actp", "etatp",
        "an_nais", "num_veh",
    ];
    let mut out = header.join(&sep.to_string());
    out.push('\n');
    for i in 0..n {
        let mut persons: Vec<(&str, i64, i64, i64)> = Vec::new();
        for (v, vehicle) in vehicle_ids(i).into_iter().enumerate() {
            let grav = if v == 0 { worst_grav(i) } else { 1 };
            persons.push((vehicle, 1, 1, grav));
        }
        if i % 3 == 0 {
            persons.push(("A01", 2, 2, 1));
        }
        for (p, (vehicle, place, catu, grav)) in persons.into_iter().enumerate() {
            let severe = grav == 2 || grav == 3;
            let row = [
                accident_id(year, i).to_string(),
                place.to_string(),
                catu.to_string(),
                grav.to_string(),
                (1 + (i + p) % 2).to_string(),
                (1 + i % 5).to_string(),
                if severe { "12" } else { "11" }.to_string(),
                String::new(),
                String::new(),
                String::new(),
                (year as i64 - 18 - ((i * 7 + p * 13) % 60) as i64).to_string(),
                vehicle.to_string(),
            ];
            out.push_str(&row.join(&sep.to_string()));
            out.push('\n');
        }
    }
    out
}

/// Write all four files of one year into `dir`
pub fn write_year(dir: &Path, year: i32, n: usize, sep: char) {
    let files = [
        ("caracteristiques", characteristics_csv(year, n, sep)),
        ("lieux", locations_csv(year, n, sep)),
        ("vehicules", vehicles_csv(year, n, sep)),
        ("usagers", persons_csv(year, n, sep)),
    ];
    for (stem, body) in files {
        std::fs::write(dir.join(format!("{}-{}.csv", stem, year)), body).unwrap();
    }
}

/// Encode text as latin1 bytes (every char must be below U+0100)
pub fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u32 as u8).collect()
}

/// A data directory holding `n` accidents per year, comma-separated UTF-8
pub fn create_source_dir(years: &[i32], n: usize) -> (TempDir, SourceConfig) {
    let temp_dir = TempDir::new().unwrap();
    for year in years {
        write_year(temp_dir.path(), *year, n, ',');
    }
    let config = SourceConfig {
        data_dir: temp_dir.path().to_path_buf(),
        years: YearRange::new(years[0], years[years.len() - 1]),
        ..Default::default()
    };
    (temp_dir, config)
}

/// A temporary directory with a CSV copy of `df`
pub fn create_temp_csv(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("test_data.csv");

    let mut file = std::fs::File::create(&csv_path).unwrap();
    CsvWriter::new(&mut file).finish(df).unwrap();

    (temp_dir, csv_path)
}

/// A temporary directory with a Parquet copy of `df`
pub fn create_temp_parquet(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let parquet_path = temp_dir.path().join("test_data.parquet");

    let file = std::fs::File::create(&parquet_path).unwrap();
    ParquetWriter::new(file).finish(df).unwrap();

    (temp_dir, parquet_path)
}

/// Assert the shape of a DataFrame
pub fn assert_shape(df: &DataFrame, expected_rows: usize, expected_cols: usize) {
    assert_eq!(
        df.height(),
        expected_rows,
        "Expected {} rows, got {}",
        expected_rows,
        df.height()
    );
    assert_eq!(
        df.width(),
        expected_cols,
        "Expected {} columns, got {}",
        expected_cols,
        df.width()
    );
}

/// Assert that a DataFrame has specific columns
pub fn assert_has_columns(df: &DataFrame, columns: &[&str]) {
    let df_columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    for col in columns {
        assert!(
            df_columns.contains(&col.to_string()),
            "DataFrame missing expected column: {}",
            col
        );
    }
}

/// Integer values of a column, nulls kept
pub fn int_column(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
    df.column(name)
        .unwrap()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .collect()
}
