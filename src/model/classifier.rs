//! Classifier strategies
//!
//! Every strategy is fitted from a standardized, rebalanced matrix and exposes
//! the same [`SeverityClassifier`] surface. The fitted form is the serializable
//! [`FittedClassifier`] enum stored in the model bundle.

use linfa::prelude::*;
use linfa_logistic::{MultiFittedLogisticRegression, MultiLogisticRegression};
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, Axis, Ix1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ClassifierConfig, ClassifierKind};
use crate::error::{PipelineError, Result};

use super::boosting::BoostingModel;

/// Prediction surface shared by every fitted strategy
pub trait SeverityClassifier {
    /// Ordinal classes known to the model, in probability-column order
    fn classes(&self) -> &[u8];

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<u8>>;

    /// Per-class probabilities, `None` when the strategy has none
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>>;
}

pub(crate) fn distinct_classes(y: &[u8]) -> Vec<u8> {
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    classes
}

fn dataset(x: &Array2<f64>, y: &[u8]) -> Dataset<f64, usize, Ix1> {
    let targets: Array1<usize> = y.iter().map(|&c| c as usize).collect();
    Dataset::new(x.clone(), targets)
}

fn tree_params(config: &ClassifierConfig) -> linfa_trees::DecisionTreeParams<f64, usize> {
    DecisionTree::params()
        .split_quality(SplitQuality::Gini)
        .max_depth(config.max_depth)
        .min_weight_leaf(config.min_samples_leaf as f32)
}

fn to_labels(predicted: Array1<usize>) -> Vec<u8> {
    predicted.iter().map(|&c| c as u8).collect()
}

/// A single decision tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeModel {
    classes: Vec<u8>,
    tree: DecisionTree<f64, usize>,
}

impl TreeModel {
    pub fn fit(x: &Array2<f64>, y: &[u8], config: &ClassifierConfig) -> Result<Self> {
        let tree = tree_params(config)
            .fit(&dataset(x, y))
            .map_err(|e| PipelineError::Model(format!("decision tree: {}", e)))?;
        Ok(Self {
            classes: distinct_classes(y),
            tree,
        })
    }
}

impl SeverityClassifier for TreeModel {
    fn classes(&self) -> &[u8] {
        &self.classes
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<u8>> {
        Ok(to_labels(self.tree.predict(x)))
    }

    fn predict_proba(&self, _x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        Ok(None)
    }
}

/// Bootstrap-aggregated decision trees; probabilities are vote shares
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    classes: Vec<u8>,
    trees: Vec<DecisionTree<f64, usize>>,
}

impl ForestModel {
    pub fn fit(x: &Array2<f64>, y: &[u8], config: &ClassifierConfig) -> Result<Self> {
        if config.n_trees == 0 {
            return Err(PipelineError::Config("n_trees must be at least 1".into()));
        }
        let n = x.nrows();
        let params = tree_params(config);

        let trees = (0..config.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let sample_x = x.select(Axis(0), &rows);
                let sample_y: Vec<u8> = rows.iter().map(|&r| y[r]).collect();
                params
                    .fit(&dataset(&sample_x, &sample_y))
                    .map_err(|e| PipelineError::Model(format!("forest tree {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            classes: distinct_classes(y),
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn votes(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut votes = Array2::<f64>::zeros((x.nrows(), self.classes.len()));
        for tree in &self.trees {
            for (row, class) in tree.predict(x).iter().enumerate() {
                if let Some(col) = self.classes.iter().position(|c| *c as usize == *class) {
                    votes[[row, col]] += 1.0;
                }
            }
        }
        votes
    }
}

impl SeverityClassifier for ForestModel {
    fn classes(&self) -> &[u8] {
        &self.classes
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<u8>> {
        let votes = self.votes(x);
        Ok(votes
            .axis_iter(Axis(0))
            .map(|row| self.classes[argmax(row.iter().copied())])
            .collect())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        let n_trees = self.trees.len() as f64;
        Ok(Some(self.votes(x) / n_trees))
    }
}

/// Multinomial logistic regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    classes: Vec<u8>,
    model: MultiFittedLogisticRegression<f64, usize>,
}

impl LogisticModel {
    pub fn fit(x: &Array2<f64>, y: &[u8], config: &ClassifierConfig) -> Result<Self> {
        let model = MultiLogisticRegression::default()
            .max_iterations(config.max_iterations)
            .fit(&dataset(x, y))
            .map_err(|e| PipelineError::Model(format!("logistic regression: {}", e)))?;
        let classes = model.classes().iter().map(|&c| c as u8).collect();
        Ok(Self { classes, model })
    }
}

impl SeverityClassifier for LogisticModel {
    fn classes(&self) -> &[u8] {
        &self.classes
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<u8>> {
        Ok(to_labels(self.model.predict(x)))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        Ok(Some(self.model.predict_probabilities(x)))
    }
}

/// Index of the largest value; ties go to the first (lowest class)
pub fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// A fitted strategy as stored in the bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "lowercase")]
pub enum FittedClassifier {
    Forest(ForestModel),
    Boosting(BoostingModel),
    Tree(TreeModel),
    Logistic(LogisticModel),
}

impl FittedClassifier {
    pub fn kind(&self) -> ClassifierKind {
        match self {
            FittedClassifier::Forest(_) => ClassifierKind::Forest,
            FittedClassifier::Boosting(_) => ClassifierKind::Boosting,
            FittedClassifier::Tree(_) => ClassifierKind::Tree,
            FittedClassifier::Logistic(_) => ClassifierKind::Logistic,
        }
    }

    fn inner(&self) -> &dyn SeverityClassifier {
        match self {
            FittedClassifier::Forest(m) => m,
            FittedClassifier::Boosting(m) => m,
            FittedClassifier::Tree(m) => m,
            FittedClassifier::Logistic(m) => m,
        }
    }
}

impl SeverityClassifier for FittedClassifier {
    fn classes(&self) -> &[u8] {
        self.inner().classes()
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<u8>> {
        self.inner().predict(x)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        self.inner().predict_proba(x)
    }
}

/// Fit the configured strategy
pub fn fit_classifier(x: &Array2<f64>, y: &[u8], config: &ClassifierConfig) -> Result<FittedClassifier> {
    if x.nrows() != y.len() || x.nrows() == 0 {
        return Err(PipelineError::Model(format!(
            "cannot fit on {} rows with {} labels",
            x.nrows(),
            y.len()
        )));
    }
    let classes = distinct_classes(y);
    if classes.len() < 2 {
        return Err(PipelineError::Model(format!(
            "training labels contain a single class {:?}",
            classes
        )));
    }

    info!(kind = %config.kind, rows = x.nrows(), features = x.ncols(), "fitting classifier");
    let fitted = match config.kind {
        ClassifierKind::Forest => FittedClassifier::Forest(ForestModel::fit(x, y, config)?),
        ClassifierKind::Boosting => FittedClassifier::Boosting(BoostingModel::fit(x, y, config)?),
        ClassifierKind::Tree => FittedClassifier::Tree(TreeModel::fit(x, y, config)?),
        ClassifierKind::Logistic => FittedClassifier::Logistic(LogisticModel::fit(x, y, config)?),
    };
    Ok(fitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Vec<u8>) {
        let x = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [0.3, 0.1],
            [5.0, 5.1],
            [5.2, 5.0],
            [5.1, 5.2],
            [5.3, 5.1],
        ];
        (x, vec![1, 1, 1, 1, 3, 3, 3, 3])
    }

    fn config(kind: ClassifierKind) -> ClassifierConfig {
        ClassifierConfig {
            kind,
            n_trees: 5,
            min_samples_leaf: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_tree_separates_two_clusters() {
        let (x, y) = separable();
        let model = fit_classifier(&x, &y, &config(ClassifierKind::Tree)).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
        assert!(model.predict_proba(&x).unwrap().is_none());
        assert_eq!(model.classes(), &[1, 3]);
    }

    #[test]
    fn test_forest_probabilities_sum_to_one() {
        let (x, y) = separable();
        let model = fit_classifier(&x, &y, &config(ClassifierKind::Forest)).unwrap();
        let proba = model.predict_proba(&x).unwrap().unwrap();
        assert_eq!(proba.shape(), &[8, 2]);
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_boosting_separates_clusters_with_probabilities() {
        let (x, y) = separable();
        let mut cfg = config(ClassifierKind::Boosting);
        cfg.n_rounds = 20;
        cfg.min_samples_leaf = 2;
        let model = fit_classifier(&x, &y, &cfg).unwrap();

        assert_eq!(model.kind(), ClassifierKind::Boosting);
        assert_eq!(model.predict(&x).unwrap(), y);
        let proba = model.predict_proba(&x).unwrap().unwrap();
        assert_eq!(proba.shape(), &[8, 2]);
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(proba[[0, 0]] > 0.5);
        assert!(proba[[7, 1]] > 0.5);

        let json = serde_json::to_string(&model).unwrap();
        let back: FittedClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict(&x).unwrap(), y);
        let reloaded = back.predict_proba(&x).unwrap().unwrap();
        assert!((&reloaded - &proba).iter().all(|d| d.abs() < 1e-9));
    }

    #[test]
    fn test_boosting_rejects_zero_rounds() {
        let (x, y) = separable();
        let mut cfg = config(ClassifierKind::Boosting);
        cfg.n_rounds = 0;
        assert!(fit_classifier(&x, &y, &cfg).is_err());
    }

    #[test]
    fn test_single_class_is_rejected() {
        let x = array![[0.0], [1.0]];
        assert!(fit_classifier(&x, &[2, 2], &config(ClassifierKind::Tree)).is_err());
    }

    #[test]
    fn test_argmax_prefers_first_on_tie() {
        assert_eq!(argmax([0.2, 0.4, 0.4].into_iter()), 1);
    }

    #[test]
    fn test_fitted_classifier_round_trips_through_json() {
        let (x, y) = separable();
        let model = fit_classifier(&x, &y, &config(ClassifierKind::Tree)).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: FittedClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), ClassifierKind::Tree);
        assert_eq!(back.predict(&x).unwrap(), model.predict(&x).unwrap());
    }
}
