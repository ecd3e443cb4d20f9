//! Histogram gradient boosting
//!
//! Multi-class boosting with a softmax loss. Every round fits one regression
//! tree per class on the gradient and hessian of the loss; features are
//! bucketed once into quantile bins so split search scans histograms instead
//! of sorted values. Trees store raw-value thresholds, so prediction needs no
//! binning.

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::{PipelineError, Result};

use super::classifier::{argmax, distinct_classes, SeverityClassifier};

/// L2 penalty on leaf values
const LEAF_L2: f64 = 1.0;
const MIN_HESSIAN: f64 = 1e-12;
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree predicting a raw-score correction for one class
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Features bucketed into bins; `edges[f][b]` is the upper bound of bin `b`
struct BinnedFeatures {
    edges: Vec<Vec<f64>>,
    bins: Vec<Vec<u8>>,
}

fn bin_edges(column: ArrayView1<f64>, max_bins: usize) -> Vec<f64> {
    let mut values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();
    let len = values.len();
    if len < 2 {
        return Vec::new();
    }

    let mut cuts: Vec<usize> = if len <= max_bins {
        (1..len).collect()
    } else {
        (1..max_bins).map(|i| i * len / max_bins).collect()
    };
    cuts.dedup();
    cuts.into_iter()
        .map(|j| (values[j - 1] + values[j]) / 2.0)
        .collect()
}

impl BinnedFeatures {
    fn new(x: &Array2<f64>, max_bins: usize) -> Self {
        let edges: Vec<Vec<f64>> = (0..x.ncols())
            .into_par_iter()
            .map(|f| bin_edges(x.column(f), max_bins))
            .collect();
        let bins = edges
            .par_iter()
            .enumerate()
            .map(|(f, edges)| {
                x.column(f)
                    .iter()
                    .map(|v| edges.partition_point(|e| e < v) as u8)
                    .collect()
            })
            .collect();
        Self { edges, bins }
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }
}

struct SplitCandidate {
    gain: f64,
    feature: usize,
    bin: usize,
}

struct TreeBuilder<'a> {
    binned: &'a BinnedFeatures,
    gradients: &'a [f64],
    hessians: &'a [f64],
    max_depth: usize,
    min_samples_leaf: usize,
    nodes: Vec<Node>,
}

fn leaf_value(g: f64, h: f64) -> f64 {
    -g / (h + LEAF_L2)
}

fn score(g: f64, h: f64) -> f64 {
    g * g / (h + LEAF_L2)
}

impl TreeBuilder<'_> {
    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<SplitCandidate> {
        let parent = score(g_total, h_total);
        (0..self.binned.edges.len())
            .into_par_iter()
            .filter_map(|feature| {
                let n_bins = self.binned.n_bins(feature);
                if n_bins < 2 {
                    return None;
                }
                let column = &self.binned.bins[feature];
                let mut hist_g = vec![0.0; n_bins];
                let mut hist_h = vec![0.0; n_bins];
                let mut hist_n = vec![0usize; n_bins];
                for &r in rows {
                    let b = column[r] as usize;
                    hist_g[b] += self.gradients[r];
                    hist_h[b] += self.hessians[r];
                    hist_n[b] += 1;
                }

                let mut best: Option<SplitCandidate> = None;
                let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
                for bin in 0..n_bins - 1 {
                    gl += hist_g[bin];
                    hl += hist_h[bin];
                    nl += hist_n[bin];
                    let nr = rows.len() - nl;
                    if nl < self.min_samples_leaf || nr < self.min_samples_leaf {
                        continue;
                    }
                    let gain = score(gl, hl) + score(g_total - gl, h_total - hl) - parent;
                    let improves = best.as_ref().map(|b| gain > b.gain).unwrap_or(true);
                    if improves {
                        best = Some(SplitCandidate { gain, feature, bin });
                    }
                }
                best
            })
            .reduce_with(|a, b| {
                // ties go to the lower feature index
                if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                    b
                } else {
                    a
                }
            })
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.gradients[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hessians[r]).sum();
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: leaf_value(g, h) });

        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf {
            return idx;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return idx;
        };
        if split.gain <= MIN_GAIN {
            return idx;
        }

        let column = &self.binned.bins[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| (column[r] as usize) <= split.bin);
        let threshold = self.binned.edges[split.feature][split.bin];

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold,
            left,
            right,
        };
        idx
    }
}

fn softmax_rows(raw: &Array2<f64>) -> Array2<f64> {
    let mut proba = raw.clone();
    for mut row in proba.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, v| m.max(*v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
    proba
}

/// Gradient-boosted regression trees under a softmax loss
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostingModel {
    classes: Vec<u8>,
    learning_rate: f64,
    /// Log prior of each class, the raw score before any tree
    baseline: Vec<f64>,
    /// One tree per class for every round
    rounds: Vec<Vec<RegressionTree>>,
}

impl BoostingModel {
    pub fn fit(x: &Array2<f64>, y: &[u8], config: &ClassifierConfig) -> Result<Self> {
        if config.n_rounds == 0 {
            return Err(PipelineError::Config("n_rounds must be at least 1".into()));
        }
        if config.boosting_depth == 0 {
            return Err(PipelineError::Config("boosting_depth must be at least 1".into()));
        }
        if !(2..=256).contains(&config.max_bins) {
            return Err(PipelineError::Config(format!(
                "max_bins must be in 2..=256, got {}",
                config.max_bins
            )));
        }

        let classes = distinct_classes(y);
        let n = x.nrows();
        let k = classes.len();
        let onehot: Vec<usize> = y
            .iter()
            .map(|c| classes.iter().position(|class| class == c).unwrap_or(0))
            .collect();

        let baseline: Vec<f64> = (0..k)
            .map(|j| {
                let count = onehot.iter().filter(|&&c| c == j).count();
                (count as f64 / n as f64).max(MIN_HESSIAN).ln()
            })
            .collect();

        let binned = BinnedFeatures::new(x, config.max_bins);
        let mut raw = Array2::from_shape_fn((n, k), |(_, j)| baseline[j]);

        let mut rounds = Vec::with_capacity(config.n_rounds);
        for round in 0..config.n_rounds {
            let proba = softmax_rows(&raw);
            let trees: Vec<RegressionTree> = (0..k)
                .into_par_iter()
                .map(|j| {
                    let p = proba.column(j);
                    let gradients: Vec<f64> = (0..n)
                        .map(|r| p[r] - if onehot[r] == j { 1.0 } else { 0.0 })
                        .collect();
                    let hessians: Vec<f64> =
                        (0..n).map(|r| (p[r] * (1.0 - p[r])).max(MIN_HESSIAN)).collect();
                    let mut builder = TreeBuilder {
                        binned: &binned,
                        gradients: &gradients,
                        hessians: &hessians,
                        max_depth: config.boosting_depth,
                        min_samples_leaf: config.min_samples_leaf.max(1),
                        nodes: Vec::new(),
                    };
                    builder.grow((0..n).collect(), 0);
                    RegressionTree {
                        nodes: builder.nodes,
                    }
                })
                .collect();

            for (r, row) in x.axis_iter(Axis(0)).enumerate() {
                for (j, tree) in trees.iter().enumerate() {
                    raw[[r, j]] += config.learning_rate * tree.predict(row);
                }
            }
            if round % 10 == 0 {
                debug!(round, "boosting round fitted");
            }
            rounds.push(trees);
        }

        Ok(Self {
            classes,
            learning_rate: config.learning_rate,
            baseline,
            rounds,
        })
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    fn raw_scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut raw = Array2::<f64>::zeros((x.nrows(), self.classes.len()));
        for (r, row) in x.axis_iter(Axis(0)).enumerate() {
            for (j, base) in self.baseline.iter().enumerate() {
                raw[[r, j]] = *base
                    + self.learning_rate
                        * self.rounds.iter().map(|trees| trees[j].predict(row)).sum::<f64>();
            }
        }
        raw
    }
}

impl SeverityClassifier for BoostingModel {
    fn classes(&self) -> &[u8] {
        &self.classes
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<u8>> {
        let raw = self.raw_scores(x);
        Ok(raw
            .axis_iter(Axis(0))
            .map(|row| self.classes[argmax(row.iter().copied())])
            .collect())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        Ok(Some(softmax_rows(&self.raw_scores(x))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_bin_edges_are_midpoints_of_distinct_values() {
        let column = array![3.0, 1.0, 2.0, 2.0, 1.0];
        assert_eq!(bin_edges(column.view(), 255), vec![1.5, 2.5]);
    }

    #[test]
    fn test_bin_edges_respect_the_bin_budget() {
        let column = ndarray::Array1::from_iter((0..1000).map(|v| v as f64));
        let edges = bin_edges(column.view(), 16);
        assert_eq!(edges.len(), 15);
        assert!(edges.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_constant_column_has_no_edges() {
        let column = array![4.0, 4.0, 4.0];
        assert!(bin_edges(column.view(), 255).is_empty());
    }

    #[test]
    fn test_binned_values_match_thresholds() {
        let x = array![[1.0], [2.0], [3.0]];
        let binned = BinnedFeatures::new(&x, 255);
        assert_eq!(binned.bins[0], vec![0, 1, 2]);
        assert_eq!(binned.n_bins(0), 3);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let raw = array![[0.0, 1.0, 2.0], [1000.0, 0.0, -1000.0]];
        let proba = softmax_rows(&raw);
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!(proba[[1, 0]] > 0.999);
    }
}
