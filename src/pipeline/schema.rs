//! Declared schemas for the four yearly table families
//!
//! Column sets drift from year to year in the raw files. Every stage works
//! against these declarations instead of whatever columns happen to be present.

use polars::prelude::*;

use crate::error::{PipelineError, Result};

/// Accident identifier shared by the four families
pub const ACCIDENT_ID: &str = "Num_Acc";
/// Vehicle identifier, unique only within an accident
pub const VEHICLE_ID: &str = "num_veh";
/// Source year tag appended by the loader
pub const YEAR_TAG: &str = "year";
/// Set to 1 on merged rows that carry a person record
pub const PERSON_ROW: &str = "person_row";
/// Per-person ordinal severity
pub const GRAV_ORDER: &str = "grav_order";
/// Aggregated supervised target
pub const TARGET: &str = "grav_order_max";

/// Semantic kind of a raw column, which drives type conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Join key, parsed as integer
    Identifier,
    /// Nominal code, parsed as integer
    Code,
    /// Integer quantity
    Count,
    /// Real-valued measurement (comma decimal separator accepted)
    Measure,
    /// Free text kept as string
    Text,
}

impl ColumnKind {
    pub fn dtype(&self) -> DataType {
        match self {
            ColumnKind::Identifier | ColumnKind::Code | ColumnKind::Count => DataType::Int64,
            ColumnKind::Measure => DataType::Float64,
            ColumnKind::Text => DataType::String,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

const fn spec(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        nullable: true,
    }
}

const fn key(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Identifier,
        nullable: false,
    }
}

use ColumnKind::{Code, Count, Measure, Text};

const CHARACTERISTICS: &[ColumnSpec] = &[
    key(ACCIDENT_ID),
    spec("an", Code),
    spec("mois", Code),
    spec("jour", Code),
    spec("hrmn", Text),
    spec("lum", Code),
    spec("agg", Code),
    spec("int", Code),
    spec("atm", Code),
    spec("col", Code),
    spec("com", Text),
    spec("adr", Text),
    spec("gps", Text),
    spec("lat", Text),
    spec("long", Text),
    spec("dep", Text),
];

const LOCATIONS: &[ColumnSpec] = &[
    key(ACCIDENT_ID),
    spec("catr", Code),
    spec("voie", Text),
    spec("v1", Text),
    spec("v2", Text),
    spec("circ", Code),
    spec("nbv", Count),
    spec("pr", Text),
    spec("pr1", Text),
    spec("vosp", Code),
    spec("prof", Code),
    spec("plan", Code),
    spec("lartpc", Measure),
    spec("larrout", Measure),
    spec("surf", Code),
    spec("infra", Code),
    spec("situ", Code),
    spec("env1", Code),
];

const VEHICLES: &[ColumnSpec] = &[
    key(ACCIDENT_ID),
    spec("senc", Code),
    spec("catv", Code),
    spec("occutc", Count),
    spec("obs", Code),
    spec("obsm", Code),
    spec("choc", Code),
    spec("manv", Code),
    ColumnSpec {
        name: VEHICLE_ID,
        kind: Text,
        nullable: false,
    },
];

const PERSONS: &[ColumnSpec] = &[
    key(ACCIDENT_ID),
    spec("place", Code),
    spec("catu", Code),
    spec("grav", Code),
    spec("sexe", Code),
    spec("trajet", Code),
    spec("secu", Code),
    spec("locp", Code),
    spec("actp", Text),
    spec("etatp", Code),
    spec("an_nais", Count),
    ColumnSpec {
        name: VEHICLE_ID,
        kind: Text,
        nullable: false,
    },
];

/// The four yearly table families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableFamily {
    Characteristics,
    Locations,
    Vehicles,
    Persons,
}

impl TableFamily {
    pub const ALL: [TableFamily; 4] = [
        TableFamily::Characteristics,
        TableFamily::Locations,
        TableFamily::Vehicles,
        TableFamily::Persons,
    ];

    /// File stem used by the yearly releases
    pub fn stem(&self) -> &'static str {
        match self {
            TableFamily::Characteristics => "caracteristiques",
            TableFamily::Locations => "lieux",
            TableFamily::Vehicles => "vehicules",
            TableFamily::Persons => "usagers",
        }
    }

    pub fn columns(&self) -> &'static [ColumnSpec] {
        match self {
            TableFamily::Characteristics => CHARACTERISTICS,
            TableFamily::Locations => LOCATIONS,
            TableFamily::Vehicles => VEHICLES,
            TableFamily::Persons => PERSONS,
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }
}

impl std::fmt::Display for TableFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stem())
    }
}

/// Nominal features one-hot encoded before training. Any string column is
/// treated as nominal as well.
pub const NOMINAL_FEATURES: &[&str] = &[
    "mois",
    "jour_semaine",
    "hour",
    "lum",
    "agg",
    "int",
    "atm",
    "col",
    "catr",
    "circ",
    "vosp",
    "prof",
    "plan",
    "infra",
    "situ",
    "catv",
    "manv",
    "senc",
    "obs",
    "obsm",
    "catu",
    "age_band",
    "trip_group",
    "seat_group",
    "secu_equipement",
];

/// Fail fast when a stage input lacks a column it depends on
pub fn require_columns(df: &DataFrame, required: &[&str], stage: &str) -> Result<()> {
    let present: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !present.iter().any(|p| p == c))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::schema(
            stage,
            format!("missing required column(s) {:?}", missing),
        ))
    }
}

/// Check a loaded family table against its declaration, including dtypes and
/// non-nullable columns.
pub fn validate_family_frame(df: &DataFrame, family: TableFamily) -> Result<()> {
    let stage = family.stem();
    require_columns(df, &family.column_names(), stage)?;

    for spec in family.columns() {
        let column = df.column(spec.name)?;
        let expected = spec.kind.dtype();
        if column.dtype() != &expected {
            return Err(PipelineError::schema(
                stage,
                format!(
                    "column '{}' has type {}, expected {}",
                    spec.name,
                    column.dtype(),
                    expected
                ),
            ));
        }
        if !spec.nullable && column.null_count() > 0 {
            return Err(PipelineError::schema(
                stage,
                format!(
                    "column '{}' has {} missing value(s) but is not nullable",
                    spec.name,
                    column.null_count()
                ),
            ));
        }
    }
    Ok(())
}
