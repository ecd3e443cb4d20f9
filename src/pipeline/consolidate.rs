//! Record consolidation: join the four family tables into one wide frame
//!
//! The accident-characteristics table is the anchor. Locations join 1:1 on
//! the accident identifier; persons join to their vehicle on
//! (accident, vehicle) before the combined vehicle/person rows are attached to
//! the anchor, so unrelated vehicles and persons are never crossed.

use std::collections::HashSet;

use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Result};

use super::loader::SourceTables;
use super::schema::{require_columns, TableFamily, ACCIDENT_ID, PERSON_ROW, VEHICLE_ID, YEAR_TAG};

/// Maximum number of orphan keys quoted in an integrity error
const ORPHAN_SAMPLE: usize = 5;

/// Left-join locations, vehicles and persons onto the characteristics table.
///
/// Every accident of the anchor appears at least once in the output; an
/// accident with vehicles but no persons yields one row per vehicle, and an
/// accident with neither yields a single row with those columns missing.
pub fn consolidate(tables: &SourceTables) -> Result<DataFrame> {
    for family in TableFamily::ALL {
        require_columns(tables.get(family), &family.column_names(), family.stem())?;
    }

    check_unique_key(&tables.characteristics, TableFamily::Characteristics)?;
    check_unique_key(&tables.locations, TableFamily::Locations)?;

    let anchor_ids = accident_ids(&tables.characteristics)?;
    for family in [TableFamily::Locations, TableFamily::Vehicles, TableFamily::Persons] {
        check_references(tables.get(family), family, &anchor_ids)?;
    }
    check_person_vehicles(&tables.persons, &tables.vehicles)?;

    let key = [col(ACCIDENT_ID)];
    let vehicle_key = [col(ACCIDENT_ID), col(VEHICLE_ID)];

    // The year tag is carried by the anchor only
    let locations = tables.locations.clone().lazy().drop([YEAR_TAG]);
    let vehicles = tables.vehicles.clone().lazy().drop([YEAR_TAG]);
    let persons = tables
        .persons
        .clone()
        .lazy()
        .drop([YEAR_TAG])
        .with_column(lit(1i64).alias(PERSON_ROW));

    let vehicle_persons = vehicles.join(
        persons,
        vehicle_key.clone(),
        vehicle_key,
        JoinArgs::new(JoinType::Left),
    );

    let merged = tables
        .characteristics
        .clone()
        .lazy()
        .join(locations, key.clone(), key.clone(), JoinArgs::new(JoinType::Left))
        .join(vehicle_persons, key.clone(), key, JoinArgs::new(JoinType::Left))
        .collect()?;

    info!(
        accidents = anchor_ids.len(),
        rows = merged.height(),
        "consolidated source tables"
    );
    Ok(merged)
}

fn accident_ids(df: &DataFrame) -> Result<HashSet<i64>> {
    Ok(df.column(ACCIDENT_ID)?.i64()?.into_iter().flatten().collect())
}

fn check_unique_key(df: &DataFrame, family: TableFamily) -> Result<()> {
    let mut seen = HashSet::with_capacity(df.height());
    let mut duplicates = Vec::new();
    for id in df.column(ACCIDENT_ID)?.i64()?.into_iter().flatten() {
        if !seen.insert(id) {
            duplicates.push(id.to_string());
        }
    }
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(PipelineError::JoinIntegrity {
        table: family.stem().to_string(),
        parent: family.stem().to_string(),
        column: ACCIDENT_ID.to_string(),
        orphan_count: duplicates.len(),
        sample: duplicates.into_iter().take(ORPHAN_SAMPLE).collect(),
    })
}

/// Every identifier of a dependent table must exist in the anchor
fn check_references(df: &DataFrame, family: TableFamily, anchor: &HashSet<i64>) -> Result<()> {
    let orphans: Vec<i64> = df
        .column(ACCIDENT_ID)?
        .i64()?
        .into_iter()
        .flatten()
        .filter(|id| !anchor.contains(id))
        .collect();

    if orphans.is_empty() {
        return Ok(());
    }
    Err(PipelineError::JoinIntegrity {
        table: family.stem().to_string(),
        parent: TableFamily::Characteristics.stem().to_string(),
        column: ACCIDENT_ID.to_string(),
        orphan_count: orphans.len(),
        sample: orphans
            .iter()
            .take(ORPHAN_SAMPLE)
            .map(|id| id.to_string())
            .collect(),
    })
}

/// Every person must reference a vehicle recorded for the same accident
fn check_person_vehicles(persons: &DataFrame, vehicles: &DataFrame) -> Result<()> {
    let known: HashSet<(i64, String)> = vehicle_keys(vehicles)?.into_iter().collect();
    let orphans: Vec<(i64, String)> = vehicle_keys(persons)?
        .into_iter()
        .filter(|k| !known.contains(k))
        .collect();

    if orphans.is_empty() {
        return Ok(());
    }
    Err(PipelineError::JoinIntegrity {
        table: TableFamily::Persons.stem().to_string(),
        parent: TableFamily::Vehicles.stem().to_string(),
        column: format!("{}+{}", ACCIDENT_ID, VEHICLE_ID),
        orphan_count: orphans.len(),
        sample: orphans
            .iter()
            .take(ORPHAN_SAMPLE)
            .map(|(id, veh)| format!("{}/{}", id, veh))
            .collect(),
    })
}

fn vehicle_keys(df: &DataFrame) -> Result<Vec<(i64, String)>> {
    let ids = df.column(ACCIDENT_ID)?.i64()?;
    let vehicles = df.column(VEHICLE_ID)?.str()?;
    Ok(ids
        .into_iter()
        .zip(vehicles.into_iter())
        .filter_map(|(id, veh)| Some((id?, veh?.to_string())))
        .collect())
}
