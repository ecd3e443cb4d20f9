//! Stages 1 to 4 chained: raw yearly files to one row per accident

use polars::prelude::*;

use crate::config::{FeatureConfig, PipelineConfig};
use crate::error::Result;

use super::aggregate::aggregate_accidents;
use super::consolidate::consolidate;
use super::fill::{apply_fill_policies, drop_irrelevant_columns, FillReport, FILL_POLICIES};
use super::loader::{load_source_tables, SourceTables};
use super::recode::recode_features;
use super::schema::TableFamily;

/// Row counts observed at each stage boundary
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StageCounts {
    /// Rows per table family after loading, in `TableFamily::ALL` order
    pub loaded: Vec<(String, usize)>,
    pub merged_rows: usize,
    pub reduced_rows: usize,
    pub accidents: usize,
}

/// Output of the preparation stages
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub accidents: DataFrame,
    pub fill_report: FillReport,
    pub counts: StageCounts,
}

/// Recode, apply the fill policy, then drop irrelevant columns
pub fn reduce_features(merged: &DataFrame, config: &FeatureConfig) -> Result<(DataFrame, FillReport)> {
    let recoded = recode_features(merged, config)?;
    let (filled, report) = apply_fill_policies(&recoded, FILL_POLICIES)?;
    Ok((drop_irrelevant_columns(&filled), report))
}

/// Run consolidation, reduction and aggregation on already loaded tables
pub fn prepare_from_tables(tables: &SourceTables, config: &FeatureConfig) -> Result<PreparedDataset> {
    let loaded = TableFamily::ALL
        .iter()
        .map(|f| (f.stem().to_string(), tables.get(*f).height()))
        .collect();

    let merged = consolidate(tables)?;
    let (reduced, fill_report) = reduce_features(&merged, config)?;
    let accidents = aggregate_accidents(&reduced)?;

    let counts = StageCounts {
        loaded,
        merged_rows: merged.height(),
        reduced_rows: reduced.height(),
        accidents: accidents.height(),
    };

    Ok(PreparedDataset {
        accidents,
        fill_report,
        counts,
    })
}

/// Load the configured years and run stages 1 to 4
pub fn prepare_dataset(config: &PipelineConfig) -> Result<PreparedDataset> {
    let tables = load_source_tables(&config.source)?;
    prepare_from_tables(&tables, &config.features)
}
