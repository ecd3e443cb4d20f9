//! Class rebalancing of the training matrix
//!
//! Majority classes are first thinned by fixed per-class keep ratios, then
//! minority classes are grown with SMOTE-style interpolation between a sample
//! and one of its k nearest same-class neighbours. Thinning first bounds the
//! size of the synthetic set.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

use super::split::class_counts;

/// Labelled rows after resampling
#[derive(Debug, Clone)]
pub struct Resampled {
    pub values: Array2<f64>,
    pub labels: Vec<u8>,
}

impl Resampled {
    pub fn counts(&self) -> BTreeMap<u8, usize> {
        class_counts(&self.labels)
    }
}

fn indices_by_class(labels: &[u8]) -> BTreeMap<u8, Vec<usize>> {
    let mut by_class: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(*label).or_default().push(i);
    }
    by_class
}

fn check_rows(values: &Array2<f64>, labels: &[u8]) -> Result<()> {
    if values.nrows() != labels.len() {
        return Err(PipelineError::Model(format!(
            "{} rows but {} labels",
            values.nrows(),
            labels.len()
        )));
    }
    Ok(())
}

/// Keep `round(count * ratio)` rows of each listed class, at least one.
/// Classes without a ratio are kept whole.
pub fn undersample(
    values: &Array2<f64>,
    labels: &[u8],
    ratios: &BTreeMap<u8, f64>,
    seed: u64,
) -> Result<Resampled> {
    check_rows(values, labels)?;
    if let Some((class, ratio)) = ratios.iter().find(|(_, r)| !(**r > 0.0 && **r <= 1.0)) {
        return Err(PipelineError::Config(format!(
            "under-sampling ratio for class {} must be in (0, 1], got {}",
            class, ratio
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut keep = Vec::with_capacity(labels.len());

    for (class, mut indices) in indices_by_class(labels) {
        let ratio = ratios.get(&class).copied().unwrap_or(1.0);
        let n_keep = ((indices.len() as f64 * ratio).round() as usize).clamp(1, indices.len());
        if n_keep < indices.len() {
            indices.shuffle(&mut rng);
            indices.truncate(n_keep);
        }
        debug!(class, kept = n_keep, ratio, "under-sampled class");
        keep.extend(indices);
    }
    keep.sort_unstable();

    Ok(Resampled {
        values: values.select(Axis(0), &keep),
        labels: keep.iter().map(|&i| labels[i]).collect(),
    })
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// For each member, the positions (within `members`) of its k nearest other
/// members by Euclidean distance
fn nearest_neighbours(values: &Array2<f64>, members: &[usize], k: usize) -> Vec<Vec<usize>> {
    members
        .par_iter()
        .enumerate()
        .map(|(pos, &row)| {
            let mut distances: Vec<(f64, usize)> = members
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != pos)
                .map(|(other, &other_row)| {
                    (squared_distance(values.row(row), values.row(other_row)), other)
                })
                .collect();
            distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            distances.into_iter().take(k).map(|(_, other)| other).collect()
        })
        .collect()
}

/// Grow every class to its target count with synthetic samples.
///
/// Without explicit targets every class is raised to the majority count. A
/// class that needs synthetic samples but has fewer than `k + 1` members
/// fails with `InsufficientSamples`.
pub fn smote(
    values: &Array2<f64>,
    labels: &[u8],
    k_neighbors: usize,
    targets: Option<&BTreeMap<u8, usize>>,
    seed: u64,
) -> Result<Resampled> {
    check_rows(values, labels)?;
    if k_neighbors == 0 {
        return Err(PipelineError::Config("k_neighbors must be at least 1".into()));
    }

    let by_class = indices_by_class(labels);
    let majority = by_class.values().map(Vec::len).max().unwrap_or(0);

    let mut plan: Vec<(u8, usize)> = Vec::new();
    for (class, members) in &by_class {
        let target = match targets.and_then(|t| t.get(class)) {
            Some(&t) if t < members.len() => {
                return Err(PipelineError::Config(format!(
                    "over-sampling target {} for class {} is below its {} rows",
                    t,
                    class,
                    members.len()
                )))
            }
            Some(&t) if t > majority => {
                return Err(PipelineError::Config(format!(
                    "over-sampling target {} for class {} exceeds the majority count {}",
                    t, class, majority
                )))
            }
            Some(&t) => t,
            None if targets.is_some() => members.len(),
            None => majority,
        };

        let needed = target - members.len();
        if needed > 0 && members.len() < k_neighbors + 1 {
            return Err(PipelineError::InsufficientSamples {
                class: *class,
                count: members.len(),
                k_neighbors,
                required: k_neighbors + 1,
            });
        }
        plan.push((*class, needed));
    }

    let synthetic_total: usize = plan.iter().map(|(_, n)| n).sum();
    let width = values.ncols();
    let mut synthetic = Array2::<f64>::zeros((synthetic_total, width));
    let mut synthetic_labels = Vec::with_capacity(synthetic_total);
    let mut next = 0;

    for (class, needed) in plan {
        if needed == 0 {
            continue;
        }
        let members = &by_class[&class];
        let neighbours = nearest_neighbours(values, members, k_neighbors);
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(class as u64));

        for _ in 0..needed {
            let base = rng.gen_range(0..members.len());
            let neighbour = neighbours[base][rng.gen_range(0..neighbours[base].len())];
            let gap: f64 = rng.gen();

            let a = values.row(members[base]);
            let b = values.row(members[neighbour]);
            let mut row = synthetic.row_mut(next);
            for j in 0..width {
                row[j] = a[j] + gap * (b[j] - a[j]);
            }
            synthetic_labels.push(class);
            next += 1;
        }
        debug!(class, generated = needed, "synthesized minority samples");
    }

    let mut out_values = values.clone();
    if synthetic_total > 0 {
        out_values
            .append(Axis(0), synthetic.view())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
    }
    let mut out_labels = labels.to_vec();
    out_labels.extend(synthetic_labels);

    info!(original = labels.len(), synthetic = synthetic_total, "over-sampled training set");
    Ok(Resampled {
        values: out_values,
        labels: out_labels,
    })
}

/// Under-sample then over-sample with the configured parameters
pub fn rebalance(
    values: &Array2<f64>,
    labels: &[u8],
    config: &crate::config::SamplingConfig,
) -> Result<Resampled> {
    let thinned = undersample(values, labels, &config.undersample_ratios, config.seed)?;
    smote(
        &thinned.values,
        &thinned.labels,
        config.k_neighbors,
        config.oversample_targets.as_ref(),
        config.seed,
    )
}
