//! Masked per-pixel losses over class log-probabilities.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossKind {
    #[default]
    CrossEntropy,
    Focal,
}

/// `Sum` keeps the raw total so split-level loss can be divided by total pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossConfig {
    pub kind: LossKind,
    /// Reweight classes by inverse training frequency.
    pub weighted: bool,
    /// Exponent applied to the inverse-frequency weights.
    pub weight_scale: f32,
    /// Focusing parameter; ignored for cross-entropy.
    pub gamma: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            kind: LossKind::CrossEntropy,
            weighted: false,
            weight_scale: 1.0,
            gamma: 2.0,
        }
    }
}

pub struct LossOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    /// Max class probability per pixel, `[batch, height, width]`.
    pub confidence: Tensor<B, 3>,
    /// Labeled pixels in the batch.
    pub num_pixels: usize,
}

#[derive(Debug, Clone)]
pub struct SegLoss {
    kind: LossKind,
    gamma: f32,
    class_weights: Option<Vec<f32>>,
}

impl SegLoss {
    /// `class_counts` is only consulted when `cfg.weighted` is set.
    pub fn new(cfg: &LossConfig, class_counts: Option<&[u64]>) -> Self {
        let class_weights = if cfg.weighted {
            class_counts.map(|counts| class_weights(counts, cfg.weight_scale))
        } else {
            None
        };
        Self {
            kind: cfg.kind,
            gamma: cfg.gamma,
            class_weights,
        }
    }

    pub fn class_weights(&self) -> Option<&[f32]> {
        self.class_weights.as_deref()
    }

    /// `log_probs` and one-hot `targets` are both `[batch, classes, height, width]`.
    pub fn forward<B: Backend>(
        &self,
        log_probs: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        reduction: Reduction,
    ) -> LossOutput<B> {
        let device = log_probs.device();
        let num_classes = log_probs.dims()[1];
        let num_pixels = targets.clone().sum().into_scalar().elem::<f32>().round() as usize;

        let probs = log_probs.clone().exp();
        let confidence = probs.clone().max_dim(1).squeeze::<3>(1);

        let mut weighted = targets;
        if let Some(w) = &self.class_weights {
            let w = Tensor::<B, 1>::from_floats(w.as_slice(), &device).reshape([1, num_classes, 1, 1]);
            weighted = weighted * w;
        }
        if self.kind == LossKind::Focal && self.gamma > 0.0 {
            let focal = probs.neg().add_scalar(1.0).clamp_min(0.0).powf_scalar(self.gamma);
            weighted = weighted * focal;
        }

        let total = (weighted * log_probs).sum().neg();
        let loss = match reduction {
            Reduction::Sum => total,
            Reduction::Mean => total.div_scalar(num_pixels.max(1) as f32),
        };

        LossOutput {
            loss,
            confidence,
            num_pixels,
        }
    }
}

/// `(total / (K * count_k))^scale`; classes absent from training get weight 0.
pub fn class_weights(counts: &[u64], weight_scale: f32) -> Vec<f32> {
    let total: u64 = counts.iter().sum();
    let k = counts.len().max(1) as f32;
    counts
        .iter()
        .map(|c| {
            if *c == 0 {
                0.0
            } else {
                (total as f32 / (k * *c as f32)).powf(weight_scale)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    // batch 1, 2 classes, 1x2 pixels; pixel 0 labeled class 0, pixel 1 unlabeled.
    fn fixture() -> (Tensor<B, 4>, Tensor<B, 4>) {
        let device = Default::default();
        let probs = [0.8f32, 0.5, 0.2, 0.5];
        let log_probs: Vec<f32> = probs.iter().map(|p| p.ln()).collect();
        let log_probs = Tensor::from_data(TensorData::new(log_probs, [1, 2, 1, 2]), &device);
        let targets = Tensor::from_data(TensorData::new(vec![1.0f32, 0.0, 0.0, 0.0], [1, 2, 1, 2]), &device);
        (log_probs, targets)
    }

    #[test]
    fn cross_entropy_ignores_unlabeled_pixels() {
        let (log_probs, targets) = fixture();
        let loss = SegLoss::new(&LossConfig::default(), None);
        let out = loss.forward(log_probs, targets, Reduction::Sum);
        assert_eq!(out.num_pixels, 1);
        let value: f32 = out.loss.into_scalar();
        assert!((value + 0.8f32.ln()).abs() < 1e-5);
        let conf = out.confidence.into_data().to_vec::<f32>().unwrap();
        assert!((conf[0] - 0.8).abs() < 1e-5 && (conf[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn focal_loss_down_weights_confident_pixels() {
        let (log_probs, targets) = fixture();
        let cfg = LossConfig {
            kind: LossKind::Focal,
            gamma: 2.0,
            ..LossConfig::default()
        };
        let value: f32 = SegLoss::new(&cfg, None)
            .forward(log_probs, targets, Reduction::Mean)
            .loss
            .into_scalar();
        let expected = -(0.2f32.powi(2)) * 0.8f32.ln();
        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    fn inverse_frequency_weights() {
        let w = class_weights(&[30, 10, 0], 1.0);
        assert!((w[0] - 40.0 / 90.0).abs() < 1e-6);
        assert!((w[1] - 40.0 / 30.0).abs() < 1e-6);
        assert_eq!(w[2], 0.0);
        let unweighted = LossConfig::default();
        assert!(SegLoss::new(&unweighted, Some(&[1, 2])).class_weights().is_none());
    }

    #[test]
    fn class_weights_scale_the_per_pixel_loss() {
        let weighted = LossConfig {
            weighted: true,
            ..LossConfig::default()
        };
        // Only pixel 0 is labeled, as class 0 with p = 0.8.
        let (log_probs, targets) = fixture();
        let out = SegLoss::new(&weighted, Some(&[1, 3])).forward(log_probs, targets, Reduction::Sum);
        let value: f32 = out.loss.into_scalar();
        assert!((value + 2.0 * 0.8f32.ln()).abs() < 1e-5);

        let (log_probs, targets) = fixture();
        let out = SegLoss::new(&weighted, Some(&[0, 3])).forward(log_probs, targets, Reduction::Sum);
        let value: f32 = out.loss.into_scalar();
        assert!(value.abs() < 1e-7);
        assert_eq!(out.num_pixels, 1);
    }
}
