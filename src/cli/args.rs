//! Command-line argument definitions using clap

use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{ClassifierKind, PipelineConfig, YearRange};

/// roadsev - Reconcile French road-accident files and train a severity classifier
#[derive(Parser, Debug)]
#[command(name = "roadsev")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON configuration file. Flags given on the command line override it.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase diagnostic logging (-v debug, -vv trace).
    /// RUST_LOG takes precedence when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Skip interactive confirmation prompts
    #[arg(long, global = true, default_value = "false")]
    pub no_confirm: bool,
}

/// Options locating the raw yearly files
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Directory holding the yearly files
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Years to load, e.g. "2005-2018" or "2016"
    #[arg(short, long)]
    pub years: Option<YearRange>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, reconcile, recode and aggregate the yearly files into one row per accident
    Prepare {
        #[command(flatten)]
        source: SourceArgs,

        /// Output file (CSV or Parquet, determined by extension)
        #[arg(short, long, default_value = "accidents.parquet")]
        output: PathBuf,
    },

    /// Train a severity classifier and write the model bundle
    Train {
        /// Prepared accident-level dataset. When omitted the raw files are prepared first.
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[command(flatten)]
        source: SourceArgs,

        /// Model bundle output path (zip archive)
        #[arg(short, long, default_value = "model.zip")]
        output: PathBuf,

        /// Evaluation report output path.
        /// Defaults to the bundle path with an '_evaluation.json' suffix.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Classifier strategy: "forest", "boosting", "tree" or "logistic"
        #[arg(long)]
        classifier: Option<ClassifierKind>,

        /// Fraction of accidents used for training
        #[arg(long, value_parser = validate_train_fraction)]
        train_fraction: Option<f64>,

        /// Neighbours used by the over-sampler
        #[arg(short, long, value_parser = validate_k_neighbors)]
        k_neighbors: Option<usize>,

        /// Keep accidents where nobody was injured (adds class 0)
        #[arg(long, default_value = "false")]
        include_uninjured: bool,

        /// Seed for the split, the resampling and the classifier
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Predict the severity of accident-level rows with a trained bundle
    Predict {
        /// Model bundle produced by `train`
        #[arg(short, long)]
        model: PathBuf,

        /// Rows to score (CSV or Parquet)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file. Defaults to the input with a '_predicted' suffix.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize a prepared dataset: shape, missing values, target distribution
    Explore {
        /// Prepared accident-level dataset (CSV or Parquet)
        input: PathBuf,

        /// Number of columns listed in the missing-value table
        #[arg(long, default_value = "15")]
        top: usize,
    },
}

impl SourceArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.data_dir {
            config.source.data_dir = dir.clone();
        }
        if let Some(years) = self.years {
            config.source.years = years;
        }
    }
}

impl Cli {
    /// Configuration from the optional file with command-line overrides applied
    pub fn resolve_config(&self) -> crate::error::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        match &self.command {
            Commands::Prepare { source, .. } => source.apply(&mut config),
            Commands::Train {
                source,
                classifier,
                train_fraction,
                k_neighbors,
                include_uninjured,
                seed,
                ..
            } => {
                source.apply(&mut config);
                if let Some(kind) = classifier {
                    config.classifier.kind = *kind;
                }
                if let Some(f) = train_fraction {
                    config.split.train_fraction = *f;
                }
                if let Some(k) = k_neighbors {
                    config.sampling.k_neighbors = *k;
                }
                if *include_uninjured {
                    config.split.exclude_uninjured = false;
                }
                if let Some(seed) = seed {
                    config.split.seed = *seed;
                    config.sampling.seed = *seed;
                    config.classifier.seed = *seed;
                    config.features.seed = *seed;
                }
            }
            Commands::Predict { .. } | Commands::Explore { .. } => {}
        }

        config.validate()?;
        Ok(config)
    }
}

/// Sibling path with a suffix added to the file stem
pub fn derive_path(path: &Path, suffix: &str, extension: Option<&str>) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let extension = extension
        .or_else(|| path.extension().and_then(|e| e.to_str()))
        .unwrap_or("parquet");
    parent.join(format!("{}{}.{}", stem, suffix, extension))
}

/// Validator for train_fraction parameter
fn validate_train_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(format!(
            "train_fraction must be between 0.0 and 1.0 (exclusive), got {}",
            value
        ))
    }
}

/// Validator for k_neighbors parameter
fn validate_k_neighbors(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid count", s))?;

    if value == 0 {
        Err("k_neighbors must be at least 1".to_string())
    } else {
        Ok(value)
    }
}
