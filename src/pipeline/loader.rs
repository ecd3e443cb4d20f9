//! Yearly table loader
//!
//! Reads one file per year for a table family, trying each configured
//! delimiter/encoding until one yields a frame carrying the declared columns,
//! then normalises the result to the family schema and tags it with its year.

use std::io::Cursor;
use std::path::Path;

use encoding_rs::UTF_8;
use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ReadAttempt, SourceConfig};
use crate::error::{PipelineError, Result};

use super::schema::{validate_family_frame, ColumnKind, TableFamily, ACCIDENT_ID, YEAR_TAG};

/// The four family tables, each concatenated over the configured years
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub characteristics: DataFrame,
    pub locations: DataFrame,
    pub vehicles: DataFrame,
    pub persons: DataFrame,
}

impl SourceTables {
    pub fn get(&self, family: TableFamily) -> &DataFrame {
        match family {
            TableFamily::Characteristics => &self.characteristics,
            TableFamily::Locations => &self.locations,
            TableFamily::Vehicles => &self.vehicles,
            TableFamily::Persons => &self.persons,
        }
    }
}

/// Load the four families for the configured year range
pub fn load_source_tables(config: &SourceConfig) -> Result<SourceTables> {
    Ok(SourceTables {
        characteristics: load_family(config, TableFamily::Characteristics)?,
        locations: load_family(config, TableFamily::Locations)?,
        vehicles: load_family(config, TableFamily::Vehicles)?,
        persons: load_family(config, TableFamily::Persons)?,
    })
}

/// Load every year of one family and concatenate them in year order.
///
/// Years are read in parallel; a year that cannot be read fails the whole
/// call so volumetric totals are never silently short.
pub fn load_family(config: &SourceConfig, family: TableFamily) -> Result<DataFrame> {
    let years = config.years.years();

    let frames: Vec<DataFrame> = years
        .par_iter()
        .map(|&year| load_family_year(config, family, year))
        .collect::<Result<Vec<_>>>()?;

    let mut frames = frames.into_iter();
    let mut combined = match frames.next() {
        Some(first) => first,
        None => {
            return Err(PipelineError::DataFormat {
                table: family.stem().to_string(),
                year: None,
                message: "year range selects no files".to_string(),
            })
        }
    };
    for frame in frames {
        combined.vstack_mut(&frame)?;
    }
    combined.as_single_chunk_par();

    validate_family_frame(&combined, family)?;
    info!(
        table = family.stem(),
        rows = combined.height(),
        years = years.len(),
        "loaded table family"
    );
    Ok(combined)
}

/// Load a single year's file for a family
pub fn load_family_year(config: &SourceConfig, family: TableFamily, year: i32) -> Result<DataFrame> {
    let path = config.file_path(family.stem(), year);
    let bytes = std::fs::read(&path).map_err(|e| PipelineError::DataFormat {
        table: family.stem().to_string(),
        year: Some(year),
        message: format!("cannot read {}: {}", path.display(), e),
    })?;

    let attempts = config.attempts_for(year);
    let raw = parse_with_attempts(&bytes, &attempts, family).map_err(|message| {
        PipelineError::DataFormat {
            table: family.stem().to_string(),
            year: Some(year),
            message,
        }
    })?;

    normalize_frame(&raw, family, year)
}

/// Try each attempt in order and return the first frame that parses and
/// exposes the identifier plus at least one other declared column.
///
/// On failure the error lists what was tried.
pub fn parse_with_attempts(
    bytes: &[u8],
    attempts: &[ReadAttempt],
    family: TableFamily,
) -> std::result::Result<DataFrame, String> {
    let mut tried = Vec::with_capacity(attempts.len());

    for attempt in attempts {
        tried.push(attempt.to_string());
        match parse_with_attempt(bytes, attempt, family) {
            Ok(Some(df)) => {
                debug!(table = family.stem(), attempt = %attempt, "read attempt succeeded");
                return Ok(df);
            }
            Ok(None) => {
                debug!(table = family.stem(), attempt = %attempt, "header does not match schema");
            }
            Err(reason) => {
                debug!(table = family.stem(), attempt = %attempt, reason = %reason, "read attempt failed");
            }
        }
    }

    Err(format!(
        "no delimiter/encoding combination produced the declared columns (tried {})",
        tried.join(", ")
    ))
}

fn parse_with_attempt(
    bytes: &[u8],
    attempt: &ReadAttempt,
    family: TableFamily,
) -> std::result::Result<Option<DataFrame>, String> {
    let encoding = attempt.encoding().map_err(|e| e.to_string())?;
    let delimiter = attempt.delimiter_byte().map_err(|e| e.to_string())?;

    // Strict decoding so a latin1 file read as UTF-8 falls through
    let body = if encoding == UTF_8 {
        bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(bytes)
    } else {
        bytes
    };
    let text = encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .ok_or_else(|| format!("content is not valid {}", encoding.name()))?;

    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|opts| opts.with_separator(delimiter))
        .into_reader_with_file_handle(Cursor::new(text.into_owned().into_bytes()))
        .finish()
        .map_err(|e| e.to_string())?;

    let trimmed: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.trim().trim_matches('"').to_string())
        .collect();
    df.set_column_names(trimmed.iter().map(|s| s.as_str()))
        .map_err(|e| e.to_string())?;

    let declared = family.column_names();
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let has_key = names.iter().any(|n| n == ACCIDENT_ID);
    let other_declared = names
        .iter()
        .filter(|n| n.as_str() != ACCIDENT_ID && declared.contains(&n.as_str()))
        .count();

    if has_key && other_declared > 0 {
        Ok(Some(df))
    } else {
        Ok(None)
    }
}

/// Convert a raw all-text frame to the family schema.
///
/// Declared columns absent from the file are added as all-missing, undeclared
/// columns are dropped, and the `year` tag is appended.
pub fn normalize_frame(raw: &DataFrame, family: TableFamily, year: i32) -> Result<DataFrame> {
    let height = raw.height();
    let present: Vec<String> = raw.get_column_names().iter().map(|s| s.to_string()).collect();
    let mut columns: Vec<Column> = Vec::with_capacity(family.columns().len() + 1);

    for declared in family.columns() {
        if !present.iter().any(|p| p == declared.name) {
            if !declared.nullable {
                return Err(PipelineError::DataFormat {
                    table: family.stem().to_string(),
                    year: Some(year),
                    message: format!("required column '{}' is absent", declared.name),
                });
            }
            warn!(
                table = family.stem(),
                year,
                column = declared.name,
                "column absent for this year, filled with missing values"
            );
            columns.push(Column::full_null(declared.name.into(), height, &declared.kind.dtype()));
            continue;
        }

        let text = text_values(raw.column(declared.name)?)?;
        let column = match declared.kind {
            ColumnKind::Identifier | ColumnKind::Code | ColumnKind::Count => {
                let values: Vec<Option<i64>> = text.iter().map(|v| v.as_deref().and_then(parse_int)).collect();
                Column::new(declared.name.into(), values)
            }
            ColumnKind::Measure => {
                let values: Vec<Option<f64>> = text.iter().map(|v| v.as_deref().and_then(parse_float)).collect();
                Column::new(declared.name.into(), values)
            }
            ColumnKind::Text => Column::new(declared.name.into(), text),
        };

        if !declared.nullable && column.null_count() > 0 {
            return Err(PipelineError::DataFormat {
                table: family.stem().to_string(),
                year: Some(year),
                message: format!(
                    "{} row(s) have an empty or unparseable '{}'",
                    column.null_count(),
                    declared.name
                ),
            });
        }
        columns.push(column);
    }

    columns.push(Column::new(YEAR_TAG.into(), vec![year as i64; height]));
    Ok(DataFrame::new(columns)?)
}

fn text_values(column: &Column) -> Result<Vec<Option<String>>> {
    let as_text = column.cast(&DataType::String)?;
    Ok(as_text
        .str()?
        .into_iter()
        .map(|v| {
            v.map(|s| s.trim().trim_matches('"').trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect())
}

/// Parse an integer code, accepting integral decimals such as `2.0`
pub fn parse_int(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| parse_float(value).filter(|v| v.fract() == 0.0).map(|v| v as i64))
}

/// Parse a real number, accepting a comma as decimal separator
pub fn parse_float(value: &str) -> Option<f64> {
    value
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Load a prepared dataset from a file (CSV or Parquet based on extension)
pub fn load_dataset(path: &Path) -> Result<DataFrame> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let lf = match extension.as_str() {
        "csv" => LazyCsvReader::new(path).with_infer_schema_length(Some(10000)).finish()?,
        "parquet" => LazyFrame::scan_parquet(path, Default::default())?,
        _ => {
            return Err(PipelineError::DataFormat {
                table: path.display().to_string(),
                year: None,
                message: format!(
                    "unsupported file format '{}', supported formats: csv, parquet",
                    extension
                ),
            })
        }
    };

    Ok(lf.collect()?)
}

/// Save a dataset to file (CSV or Parquet based on extension)
pub fn save_dataset(df: &mut DataFrame, path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" => {
            let mut file = std::fs::File::create(path)?;
            CsvWriter::new(&mut file).finish(df)?;
        }
        "parquet" => {
            let file = std::fs::File::create(path)?;
            ParquetWriter::new(file).finish(df)?;
        }
        _ => {
            return Err(PipelineError::DataFormat {
                table: path.display().to_string(),
                year: None,
                message: format!(
                    "unsupported output format '{}', supported formats: csv, parquet",
                    extension
                ),
            })
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_variants() {
        assert_eq!(parse_int("05"), Some(5));
        assert_eq!(parse_int("2.0"), Some(2));
        assert_eq!(parse_int("2.5"), None);
        assert_eq!(parse_int("A01"), None);
    }

    #[test]
    fn test_parse_float_comma_decimal() {
        assert_eq!(parse_float("3,5"), Some(3.5));
        assert_eq!(parse_float("12"), Some(12.0));
        assert_eq!(parse_float("NaN"), None);
    }

    #[test]
    fn test_normalize_adds_absent_columns_and_year() {
        let raw = df! {
            "Num_Acc" => ["201200000001", "201200000002"],
            "catr" => ["3", ""],
            "lartpc" => ["0,0", "2.5"],
        }
        .unwrap();

        let df = normalize_frame(&raw, TableFamily::Locations, 2012).unwrap();

        assert_eq!(df.width(), TableFamily::Locations.columns().len() + 1);
        assert_eq!(df.column("surf").unwrap().null_count(), 2);
        assert_eq!(df.column("catr").unwrap().null_count(), 1);
        let lartpc: Vec<Option<f64>> = df.column("lartpc").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(lartpc, vec![Some(0.0), Some(2.5)]);
        let years: Vec<Option<i64>> = df.column(YEAR_TAG).unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(years, vec![Some(2012), Some(2012)]);
    }

    #[test]
    fn test_normalize_rejects_unparseable_identifier() {
        let raw = df! {
            "Num_Acc" => ["201200000001", "oops"],
            "catr" => ["3", "1"],
        }
        .unwrap();
        assert!(normalize_frame(&raw, TableFamily::Locations, 2012).is_err());
    }
}
