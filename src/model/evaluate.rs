//! Classification metrics on the held-out partition

use serde::{Deserialize, Serialize};

use crate::pipeline::Severity;

/// Precision, recall and F1 for one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: u8,
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Row and column order of the confusion matrix
    pub classes: Vec<u8>,
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    /// Unweighted mean of per-class F1; the model-selection metric
    pub macro_f1: f64,
    pub weighted_f1: f64,
    /// `confusion[true][predicted]`
    pub confusion: Vec<Vec<usize>>,
    pub samples: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn label_for(class: u8) -> String {
    Severity::from_ordinal(class)
        .map(|s| s.label().to_string())
        .unwrap_or_else(|| format!("class {}", class))
}

/// Compare predictions with the truth. Classes are the union of both sides.
pub fn evaluate(y_true: &[u8], y_pred: &[u8]) -> EvaluationReport {
    let mut classes: Vec<u8> = y_true.iter().chain(y_pred.iter()).copied().collect();
    classes.sort_unstable();
    classes.dedup();

    let index = |c: u8| classes.iter().position(|x| *x == c).unwrap_or(0);
    let k = classes.len();
    let mut confusion = vec![vec![0usize; k]; k];
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        confusion[index(*t)][index(*p)] += 1;
    }

    let samples = y_true.len().min(y_pred.len());
    let correct: usize = (0..k).map(|i| confusion[i][i]).sum();

    let per_class: Vec<ClassMetrics> = classes
        .iter()
        .enumerate()
        .map(|(i, &class)| {
            let tp = confusion[i][i];
            let predicted: usize = (0..k).map(|r| confusion[r][i]).sum();
            let support: usize = confusion[i].iter().sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                class,
                label: label_for(class),
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    let macro_f1 = if per_class.is_empty() {
        0.0
    } else {
        per_class.iter().map(|m| m.f1).sum::<f64>() / per_class.len() as f64
    };
    let weighted_f1 = if samples == 0 {
        0.0
    } else {
        per_class.iter().map(|m| m.f1 * m.support as f64).sum::<f64>() / samples as f64
    };

    EvaluationReport {
        classes,
        per_class,
        accuracy: ratio(correct, samples),
        macro_f1,
        weighted_f1,
        confusion,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let y = vec![1, 2, 3, 1];
        let report = evaluate(&y, &y);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.macro_f1, 1.0);
        assert_eq!(report.confusion, vec![vec![2, 0, 0], vec![0, 1, 0], vec![0, 0, 1]]);
    }

    #[test]
    fn test_macro_f1_weights_minority_equally() {
        // majority always right, minority always missed
        let y_true = vec![1, 1, 1, 1, 1, 1, 1, 1, 1, 3];
        let y_pred = vec![1; 10];
        let report = evaluate(&y_true, &y_pred);

        assert!((report.accuracy - 0.9).abs() < 1e-12);
        let minority = &report.per_class[1];
        assert_eq!(minority.class, 3);
        assert_eq!(minority.support, 1);
        assert_eq!(minority.f1, 0.0);
        // majority f1 = 2 * 0.9 * 1 / 1.9
        let majority_f1 = 1.8 / 1.9;
        assert!((report.macro_f1 - majority_f1 / 2.0).abs() < 1e-12);
        assert!(report.weighted_f1 > report.macro_f1);
    }

    #[test]
    fn test_labels_use_severity_names() {
        let report = evaluate(&[3], &[3]);
        assert_eq!(report.per_class[0].label, Severity::Fatality.label());
    }
}
