//! roadsev: French road-accident severity pipeline
//!
//! Loads the yearly characteristics, locations, vehicles and persons files,
//! reconciles them into one row per accident, and trains an imbalance-aware
//! classifier of the worst injury severity.

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod utils;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
