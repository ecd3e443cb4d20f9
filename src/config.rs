//! Pipeline configuration
//!
//! Every field has a default so a JSON config file only needs the values it
//! overrides. The defaults reproduce the settings the study was run with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Inclusive range of accident years to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn years(&self) -> Vec<i32> {
        (self.start..=self.end).collect()
    }
}

impl Default for YearRange {
    fn default() -> Self {
        Self::new(2005, 2018)
    }
}

impl std::str::FromStr for YearRange {
    type Err = String;

    /// Parses `2005-2018` or a single year `2016`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|_| format!("'{}' is not a valid year", v.trim()))
        };
        match s.split_once('-') {
            Some((start, end)) => Ok(YearRange::new(parse(start)?, parse(end)?)),
            None => {
                let year = parse(s)?;
                Ok(YearRange::new(year, year))
            }
        }
    }
}

/// One delimiter/encoding combination to try when parsing a yearly file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadAttempt {
    pub delimiter: char,
    /// WHATWG encoding label, e.g. `utf-8` or `latin1`
    pub encoding: String,
}

impl ReadAttempt {
    pub fn new(delimiter: char, encoding: &str) -> Self {
        Self {
            delimiter,
            encoding: encoding.to_string(),
        }
    }

    /// Resolve the encoding label
    pub fn encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.encoding.as_bytes()).ok_or_else(|| {
            PipelineError::Config(format!("unknown text encoding '{}'", self.encoding))
        })
    }

    /// Delimiter as a single byte, as required by the CSV parser
    pub fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(|b| b.is_ascii())
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "delimiter {:?} must be a single ASCII character",
                    self.delimiter
                ))
            })
    }
}

impl std::fmt::Display for ReadAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{}", self.delimiter, self.encoding)
    }
}

fn default_read_attempts() -> Vec<ReadAttempt> {
    vec![
        ReadAttempt::new(',', "utf-8"),
        ReadAttempt::new(',', "latin1"),
        ReadAttempt::new('\t', "utf-8"),
        ReadAttempt::new('\t', "latin1"),
        ReadAttempt::new(';', "utf-8"),
        ReadAttempt::new(';', "latin1"),
    ]
}

/// Where and how to read the yearly files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub data_dir: PathBuf,
    pub years: YearRange,
    /// File name pattern with `{family}` and `{year}` placeholders
    pub file_pattern: String,
    pub read_attempts: Vec<ReadAttempt>,
    /// Attempts tried before the global list for specific years
    pub year_read_attempts: BTreeMap<i32, Vec<ReadAttempt>>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            years: YearRange::default(),
            file_pattern: "{family}-{year}.csv".to_string(),
            read_attempts: default_read_attempts(),
            year_read_attempts: BTreeMap::new(),
        }
    }
}

impl SourceConfig {
    /// Read attempts for a given year: overrides first, then the global list
    pub fn attempts_for(&self, year: i32) -> Vec<ReadAttempt> {
        let mut attempts = self
            .year_read_attempts
            .get(&year)
            .cloned()
            .unwrap_or_default();
        for attempt in &self.read_attempts {
            if !attempts.contains(attempt) {
                attempts.push(attempt.clone());
            }
        }
        attempts
    }

    pub fn file_path(&self, family: &str, year: i32) -> PathBuf {
        let name = self
            .file_pattern
            .replace("{family}", family)
            .replace("{year}", &year.to_string());
        self.data_dir.join(name)
    }
}

/// Feature engineering options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Tail fraction on each side of the age distribution treated as outliers
    pub age_outlier_quantile: f64,
    /// Half-width of the uniform jitter around the median replacement age
    pub age_jitter_years: i64,
    pub seed: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            age_outlier_quantile: 0.01,
            age_jitter_years: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_fraction: f64,
    pub seed: u64,
    /// Drop accidents whose occupants were all uninjured before splitting
    pub exclude_uninjured: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.8,
            seed: 42,
            exclude_uninjured: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Subtract the training mean before scaling to unit variance
    pub center: bool,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self { center: true }
    }
}

/// Under-then-over sampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fraction of each class kept by the under-sampler; absent classes keep 1.0
    pub undersample_ratios: BTreeMap<u8, f64>,
    pub k_neighbors: usize,
    /// Per-class counts to reach; `None` balances every class to the largest one
    pub oversample_targets: Option<BTreeMap<u8, usize>>,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        // light injury is the majority at accident level, hospitalised second
        let undersample_ratios = BTreeMap::from([(1u8, 0.5), (2u8, 0.8)]);
        Self {
            undersample_ratios,
            k_neighbors: 3,
            oversample_targets: None,
            seed: 42,
        }
    }
}

/// Which classifier strategy to fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Forest,
    Boosting,
    Tree,
    Logistic,
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierKind::Forest => write!(f, "forest"),
            ClassifierKind::Boosting => write!(f, "boosting"),
            ClassifierKind::Tree => write!(f, "tree"),
            ClassifierKind::Logistic => write!(f, "logistic"),
        }
    }
}

impl std::str::FromStr for ClassifierKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forest" | "rf" => Ok(ClassifierKind::Forest),
            "boosting" | "hgb" => Ok(ClassifierKind::Boosting),
            "tree" => Ok(ClassifierKind::Tree),
            "logistic" | "lr" => Ok(ClassifierKind::Logistic),
            _ => Err(format!(
                "Unknown classifier: '{}'. Use 'forest', 'boosting', 'tree' or 'logistic'.",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    /// Trees in the bagged forest
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    /// Boosting rounds, each fitting one tree per class
    pub n_rounds: usize,
    pub learning_rate: f64,
    /// Depth of each boosted tree
    pub boosting_depth: usize,
    /// Histogram bins per feature for boosting (at most 256)
    pub max_bins: usize,
    /// Iteration cap for the logistic solver
    pub max_iterations: u64,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Forest,
            n_trees: 50,
            max_depth: Some(12),
            min_samples_leaf: 5,
            n_rounds: 100,
            learning_rate: 0.1,
            boosting_depth: 6,
            max_bins: 255,
            max_iterations: 200,
            seed: 42,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub features: FeatureConfig,
    pub split: SplitConfig,
    pub scaling: ScalingConfig,
    pub sampling: SamplingConfig,
    pub classifier: ClassifierConfig,
}

impl PipelineConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let years = self.source.years;
        if years.start > years.end {
            return Err(PipelineError::Config(format!(
                "empty year range {}-{}",
                years.start, years.end
            )));
        }
        if self.source.read_attempts.is_empty() {
            return Err(PipelineError::Config(
                "at least one read attempt is required".to_string(),
            ));
        }
        for attempt in self
            .source
            .read_attempts
            .iter()
            .chain(self.source.year_read_attempts.values().flatten())
        {
            attempt.encoding()?;
            attempt.delimiter_byte()?;
        }
        let q = self.features.age_outlier_quantile;
        if !(0.0..0.5).contains(&q) {
            return Err(PipelineError::Config(format!(
                "age_outlier_quantile must be in [0, 0.5), got {}",
                q
            )));
        }
        let f = self.split.train_fraction;
        if !(f > 0.0 && f < 1.0) {
            return Err(PipelineError::Config(format!(
                "train_fraction must be in (0, 1), got {}",
                f
            )));
        }
        for (class, ratio) in &self.sampling.undersample_ratios {
            if !(*ratio > 0.0 && *ratio <= 1.0) {
                return Err(PipelineError::Config(format!(
                    "under-sampling ratio for class {} must be in (0, 1], got {}",
                    class, ratio
                )));
            }
        }
        if self.sampling.k_neighbors == 0 {
            return Err(PipelineError::Config(
                "k_neighbors must be at least 1".to_string(),
            ));
        }
        if self.classifier.kind == ClassifierKind::Forest && self.classifier.n_trees == 0 {
            return Err(PipelineError::Config(
                "n_trees must be at least 1".to_string(),
            ));
        }
        if self.classifier.kind == ClassifierKind::Boosting {
            let c = &self.classifier;
            if c.n_rounds == 0 || c.boosting_depth == 0 {
                return Err(PipelineError::Config(
                    "n_rounds and boosting_depth must be at least 1".to_string(),
                ));
            }
            if !(c.learning_rate > 0.0 && c.learning_rate <= 1.0) {
                return Err(PipelineError::Config(format!(
                    "learning_rate must be in (0, 1], got {}",
                    c.learning_rate
                )));
            }
            if !(2..=256).contains(&c.max_bins) {
                return Err(PipelineError::Config(format!(
                    "max_bins must be in 2..=256, got {}",
                    c.max_bins
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_year_range_parsing() {
        assert_eq!("2005-2018".parse::<YearRange>().unwrap(), YearRange::new(2005, 2018));
        assert_eq!("2016".parse::<YearRange>().unwrap(), YearRange::new(2016, 2016));
        assert!("20x6".parse::<YearRange>().is_err());
    }

    #[test]
    fn test_year_overrides_are_tried_first() {
        let mut source = SourceConfig::default();
        source
            .year_read_attempts
            .insert(2009, vec![ReadAttempt::new('\t', "latin1")]);

        let attempts = source.attempts_for(2009);
        assert_eq!(attempts[0], ReadAttempt::new('\t', "latin1"));
        // no duplicate of the override in the global tail
        assert_eq!(attempts.len(), source.read_attempts.len());

        assert_eq!(source.attempts_for(2010)[0], ReadAttempt::new(',', "utf-8"));
    }

    #[test]
    fn test_file_path_pattern() {
        let source = SourceConfig::default();
        assert_eq!(
            source.file_path("lieux", 2012),
            PathBuf::from("data/lieux-2012.csv")
        );
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let mut config = PipelineConfig::default();
        config.sampling.undersample_ratios.insert(1, 0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_boosting_settings_validated() {
        let mut config = PipelineConfig::default();
        config.classifier.kind = "hgb".parse().unwrap();
        assert_eq!(config.classifier.kind, ClassifierKind::Boosting);
        assert!(config.validate().is_ok());

        config.classifier.learning_rate = 0.0;
        assert!(config.validate().is_err());
        config.classifier.learning_rate = 0.1;
        config.classifier.max_bins = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let mut config = PipelineConfig::default();
        config.source.read_attempts = vec![ReadAttempt::new(',', "klingon")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"sampling": {"k_neighbors": 5}}"#).unwrap();
        assert_eq!(config.sampling.k_neighbors, 5);
        assert_eq!(config.split.train_fraction, 0.8);
        assert_eq!(config.source.years, YearRange::new(2005, 2018));
    }
}
