//! Error types for the severity pipeline.
//!
//! Every variant is fatal to the current run. Structural variants carry the
//! year, table or column the operator needs to inspect.

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the loading, reconciliation and training stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source file (or a stage input) does not have the expected shape.
    ///
    /// `year` is `None` for schema checks on derived frames.
    #[error("Data format error in '{table}'{}: {message}", fmt_year(.year))]
    DataFormat {
        table: String,
        year: Option<i32>,
        message: String,
    },

    /// An identifier in a dependent table has no counterpart in its parent.
    #[error(
        "Join integrity error: {orphan_count} row(s) of '{table}' reference a '{column}' absent from '{parent}' (e.g. {sample:?})"
    )]
    JoinIntegrity {
        table: String,
        parent: String,
        column: String,
        orphan_count: usize,
        sample: Vec<String>,
    },

    /// A class has too few members for the neighbour search of the over-sampler.
    #[error(
        "Insufficient samples for class {class}: {count} member(s), over-sampling with k={k_neighbors} needs at least {required}"
    )]
    InsufficientSamples {
        class: u8,
        count: usize,
        k_neighbors: usize,
        required: usize,
    },

    /// An encoder or scaler was fitted on data outside the training partition.
    #[error("Encoding leakage: {component} must be fitted on the training partition, got {partition}")]
    EncodingLeakage {
        component: &'static str,
        partition: String,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Classifier fitting, prediction or bundle consistency failure.
    #[error("Model error: {0}")]
    Model(String),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

fn fmt_year(year: &Option<i32>) -> String {
    match year {
        Some(y) => format!(" ({})", y),
        None => String::new(),
    }
}

impl PipelineError {
    /// Shorthand for a format error on a derived frame
    pub fn schema(stage: &str, message: impl Into<String>) -> Self {
        PipelineError::DataFormat {
            table: stage.to_string(),
            year: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_format_message_names_year_and_table() {
        let err = PipelineError::DataFormat {
            table: "usagers".to_string(),
            year: Some(2009),
            message: "no read attempt succeeded".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("usagers"));
        assert!(msg.contains("2009"));
    }

    #[test]
    fn test_schema_error_has_no_year() {
        let msg = PipelineError::schema("aggregate", "missing column 'grav_order'").to_string();
        assert!(msg.contains("aggregate"));
        assert!(!msg.contains("()"));
    }

    #[test]
    fn test_insufficient_samples_message() {
        let err = PipelineError::InsufficientSamples {
            class: 3,
            count: 2,
            k_neighbors: 3,
            required: 4,
        };
        assert!(err.to_string().contains("class 3"));
    }
}
