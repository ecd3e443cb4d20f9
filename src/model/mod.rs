//! Classifier strategies, evaluation and the persisted model bundle

pub mod boosting;
pub mod bundle;
pub mod classifier;
pub mod evaluate;
pub mod train;

pub use boosting::BoostingModel;
pub use bundle::{ModelBundle, ModelManifest, Prediction, CONFIDENCE_COLUMN, PREDICTION_COLUMN};
pub use classifier::{fit_classifier, FittedClassifier, SeverityClassifier};
pub use evaluate::{evaluate, ClassMetrics, EvaluationReport};
pub use train::{train_model, TrainingCounts, TrainingOutcome};
