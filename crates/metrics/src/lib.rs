//! Confusion-matrix metrics for per-pixel classification.
//!
//! Rows are ground truth, columns are predictions. Pixels with a negative label are
//! unlabeled and never counted.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    /// Counts `(truth, pred)` pairs; out-of-range indices are ignored.
    pub fn from_predictions(num_classes: usize, truth: &[usize], preds: &[usize]) -> Self {
        let mut cm = Self::new(num_classes);
        for (t, p) in truth.iter().zip(preds) {
            cm.add(*t, *p);
        }
        cm
    }

    /// Like [`from_predictions`](Self::from_predictions) but skips negative labels.
    pub fn from_labels(num_classes: usize, labels: &[i64], preds: &[i64]) -> Self {
        let mut cm = Self::new(num_classes);
        for (t, p) in labels.iter().zip(preds) {
            if *t >= 0 && *p >= 0 {
                cm.add(*t as usize, *p as usize);
            }
        }
        cm
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn add(&mut self, truth: usize, pred: usize) {
        if truth < self.num_classes && pred < self.num_classes {
            self.counts[truth * self.num_classes + pred] += 1;
        }
    }

    pub fn get(&self, truth: usize, pred: usize) -> u64 {
        self.counts[truth * self.num_classes + pred]
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        debug_assert_eq!(self.num_classes, other.num_classes);
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += *b;
        }
    }

    pub fn rows(&self) -> Vec<Vec<u64>> {
        self.counts
            .chunks(self.num_classes.max(1))
            .map(|row| row.to_vec())
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.num_classes).map(|k| self.get(k, k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn accuracy(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.correct() as f32 / total as f32
        }
    }

    /// `2tp / (2tp + fp + fn)` per class; a class never seen nor predicted scores 0.
    pub fn per_class_f1(&self) -> Vec<f32> {
        (0..self.num_classes)
            .map(|k| {
                let tp = self.get(k, k);
                let support: u64 = (0..self.num_classes).map(|p| self.get(k, p)).sum();
                let predicted: u64 = (0..self.num_classes).map(|t| self.get(t, k)).sum();
                let denom = support + predicted;
                if denom == 0 {
                    0.0
                } else {
                    (2 * tp) as f32 / denom as f32
                }
            })
            .collect()
    }

    pub fn mean_f1(&self) -> f32 {
        let scores = self.per_class_f1();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            let cells: Vec<String> = row.iter().map(|c| format!("{c:>7}")).collect();
            writeln!(f, "[{}]", cells.join(" "))?;
        }
        Ok(())
    }
}

/// Index of the largest value in each `[classes]` column of a `[batch, classes, pixels]`
/// buffer, flattened to `[batch, pixels]`.
pub fn argmax_classes(values: &[f32], batch: usize, num_classes: usize, pixels: usize) -> Vec<i64> {
    let mut out = Vec::with_capacity(batch * pixels);
    for b in 0..batch {
        for p in 0..pixels {
            let mut best = 0usize;
            let mut best_val = f32::NEG_INFINITY;
            for k in 0..num_classes {
                let v = values[(b * num_classes + k) * pixels + p];
                if v > best_val {
                    best_val = v;
                    best = k;
                }
            }
            out.push(best as i64);
        }
    }
    out
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_is_trace_over_total() {
        let cm = ConfusionMatrix::from_predictions(2, &[0, 0, 1, 1], &[0, 1, 1, 1]);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.correct(), 3);
        assert!((cm.accuracy() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn f1_matches_hand_computation() {
        // class 0: tp=1 fn=1 fp=0 -> 2/3; class 1: tp=2 fn=0 fp=1 -> 4/5
        let cm = ConfusionMatrix::from_predictions(2, &[0, 0, 1, 1], &[0, 1, 1, 1]);
        let f1 = cm.per_class_f1();
        assert!((f1[0] - 2.0 / 3.0).abs() < 1e-6);
        assert!((f1[1] - 0.8).abs() < 1e-6);
        assert!((cm.mean_f1() - (2.0 / 3.0 + 0.8) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn absent_classes_score_zero_and_empty_matrix_is_safe() {
        let cm = ConfusionMatrix::from_predictions(3, &[0, 0], &[0, 0]);
        assert_eq!(cm.per_class_f1(), vec![1.0, 0.0, 0.0]);
        let empty = ConfusionMatrix::new(3);
        assert_eq!(empty.accuracy(), 0.0);
        assert_eq!(empty.mean_f1(), 0.0);
    }

    #[test]
    fn unlabeled_pixels_are_skipped_and_merge_adds() {
        let mut cm = ConfusionMatrix::from_labels(2, &[-1, 0, 1], &[1, 0, 0]);
        assert_eq!(cm.total(), 2);
        cm.merge(&ConfusionMatrix::from_labels(2, &[1], &[1]));
        assert_eq!(cm.rows(), vec![vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn argmax_reads_class_major_layout() {
        // batch 1, 2 classes, 3 pixels
        let values = [0.1, 0.9, 0.4, 0.8, 0.2, 0.6];
        assert_eq!(argmax_classes(&values, 1, 2, 3), vec![1, 0, 1]);
    }

    #[test]
    fn std_is_population_std() {
        let (m, s) = mean_std(&[1.0, 3.0]);
        assert_eq!(m, 2.0);
        assert!((s - 1.0).abs() < 1e-6);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }
}
