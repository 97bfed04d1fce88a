//! Per-pixel classifiers fit on `timesteps * bands` feature rows.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{TrainError, TrainResult};

pub trait NonDlModel {
    fn name(&self) -> &'static str;
    fn fit(&mut self, xs: &[Vec<f32>], ys: &[usize]) -> TrainResult<()>;
    fn predict(&self, xs: &[Vec<f32>]) -> TrainResult<Vec<usize>>;
}

/// Assigns each row to the class with the closest mean feature vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearestCentroid {
    centroids: Vec<Option<Vec<f32>>>,
}

impl NearestCentroid {
    pub fn new(num_classes: usize) -> Self {
        Self {
            centroids: vec![None; num_classes],
        }
    }

    pub fn centroid(&self, class: usize) -> Option<&[f32]> {
        self.centroids.get(class).and_then(|c| c.as_deref())
    }
}

impl NonDlModel for NearestCentroid {
    fn name(&self) -> &'static str {
        "nearest_centroid"
    }

    fn fit(&mut self, xs: &[Vec<f32>], ys: &[usize]) -> TrainResult<()> {
        if xs.len() != ys.len() {
            return Err(TrainError::Config(format!(
                "{} feature rows but {} labels",
                xs.len(),
                ys.len()
            )));
        }
        let Some(dim) = xs.first().map(Vec::len) else {
            return Err(TrainError::Missing("at least one labeled pixel"));
        };
        let num_classes = self
            .centroids
            .len()
            .max(ys.iter().max().map_or(0, |m| m + 1));
        let mut sums = vec![vec![0.0f64; dim]; num_classes];
        let mut counts = vec![0usize; num_classes];
        for (row, class) in xs.iter().zip(ys) {
            if row.len() != dim {
                return Err(TrainError::Config(format!(
                    "feature row has {} values, expected {dim}",
                    row.len()
                )));
            }
            for (s, v) in sums[*class].iter_mut().zip(row) {
                *s += *v as f64;
            }
            counts[*class] += 1;
        }
        self.centroids = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, n)| (n > 0).then(|| sum.iter().map(|s| (s / n as f64) as f32).collect()))
            .collect();
        Ok(())
    }

    fn predict(&self, xs: &[Vec<f32>]) -> TrainResult<Vec<usize>> {
        if self.centroids.iter().all(Option::is_none) {
            return Err(TrainError::NotFitted("nearest_centroid"));
        }
        Ok(xs
            .iter()
            .map(|row| {
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for (class, centroid) in self.centroids.iter().enumerate() {
                    let Some(c) = centroid else { continue };
                    let dist: f32 = row.iter().zip(c).map(|(a, b)| (a - b).powi(2)).sum();
                    if dist < best_dist {
                        best_dist = dist;
                        best = class;
                    }
                }
                best
            })
            .collect())
    }
}

/// Predicts the most frequent training class everywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MajorityClass {
    class: Option<usize>,
}

impl NonDlModel for MajorityClass {
    fn name(&self) -> &'static str {
        "majority_class"
    }

    fn fit(&mut self, _xs: &[Vec<f32>], ys: &[usize]) -> TrainResult<()> {
        let num_classes = ys.iter().max().map_or(0, |m| m + 1);
        let mut counts = vec![0usize; num_classes];
        for y in ys {
            counts[*y] += 1;
        }
        // Ties go to the lowest class index.
        self.class = counts
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(class, _)| class);
        if self.class.is_none() {
            return Err(TrainError::Missing("at least one labeled pixel"));
        }
        Ok(())
    }

    fn predict(&self, xs: &[Vec<f32>]) -> TrainResult<Vec<usize>> {
        let class = self.class.ok_or(TrainError::NotFitted("majority_class"))?;
        Ok(vec![class; xs.len()])
    }
}

/// Serializable set of non-deep models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NonDlClassifier {
    NearestCentroid(NearestCentroid),
    MajorityClass(MajorityClass),
}

impl NonDlClassifier {
    fn inner(&self) -> &dyn NonDlModel {
        match self {
            NonDlClassifier::NearestCentroid(m) => m,
            NonDlClassifier::MajorityClass(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn NonDlModel {
        match self {
            NonDlClassifier::NearestCentroid(m) => m,
            NonDlClassifier::MajorityClass(m) => m,
        }
    }

    pub fn save_json(&self, path: &Path) -> TrainResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| TrainError::json(path, e))?;
        std::fs::write(path, json).map_err(|e| TrainError::io(path, e))
    }

    pub fn load_json(path: &Path) -> TrainResult<Self> {
        let raw = std::fs::read(path).map_err(|e| TrainError::io(path, e))?;
        serde_json::from_slice(&raw).map_err(|e| TrainError::json(path, e))
    }
}

impl NonDlModel for NonDlClassifier {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn fit(&mut self, xs: &[Vec<f32>], ys: &[usize]) -> TrainResult<()> {
        self.inner_mut().fit(xs, ys)
    }

    fn predict(&self, xs: &[Vec<f32>]) -> TrainResult<Vec<usize>> {
        self.inner().predict(xs)
    }
}
