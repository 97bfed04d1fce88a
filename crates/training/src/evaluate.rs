//! Per-batch evaluation and split-level metric accumulation.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use metrics::{argmax_classes, ConfusionMatrix};
use models::ClstmSegmenter;
use tile_dataset::{TileBatch, TileLoader};

use crate::error::{TrainError, TrainResult};
use crate::loss::{Reduction, SegLoss};

/// Whether a model is gradient-trained or fit on per-pixel feature rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Dl,
    NonDl,
}

pub struct BatchEvaluation<B: Backend> {
    /// Loss under `reduction`; still attached to the autodiff graph when `B` tracks it.
    pub loss: Tensor<B, 1>,
    pub reduction: Reduction,
    pub cm: ConfusionMatrix,
    pub correct: u64,
    pub num_pixels: usize,
    pub accuracy: f32,
    /// Argmax class per pixel, flat `[batch, height, width]`.
    pub pred_classes: Vec<i64>,
    /// Max class probability per pixel, flat `[batch, height, width]`.
    pub confidence: Vec<f32>,
}

impl<B: Backend> BatchEvaluation<B> {
    pub fn has_labels(&self) -> bool {
        self.num_pixels > 0
    }

    pub fn loss_value(&self) -> f32 {
        self.loss.clone().into_scalar().elem::<f32>()
    }
}

pub(crate) fn host_f32<B: Backend, const D: usize>(t: Tensor<B, D>) -> TrainResult<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Tensor(format!("{e:?}")))
}

/// Scores deep-model log-probabilities against a batch's labels.
pub fn evaluate<B: Backend>(
    log_probs: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    labels: &[i64],
    loss_fn: &SegLoss,
    reduction: Reduction,
) -> TrainResult<BatchEvaluation<B>> {
    let [batch, num_classes, height, width] = log_probs.dims();
    let pixels = height * width;
    if labels.len() != batch * pixels {
        return Err(TrainError::Tensor(format!(
            "labels hold {} pixels, predictions {}",
            labels.len(),
            batch * pixels
        )));
    }

    let scores = host_f32(log_probs.clone())?;
    let pred_classes = argmax_classes(&scores, batch, num_classes, pixels);
    let cm = ConfusionMatrix::from_labels(num_classes, labels, &pred_classes);

    let out = loss_fn.forward(log_probs, targets, reduction);
    let confidence = host_f32(out.confidence)?;
    let correct = cm.correct();

    Ok(BatchEvaluation {
        loss: out.loss,
        reduction,
        accuracy: cm.accuracy(),
        cm,
        correct,
        num_pixels: out.num_pixels,
        pred_classes,
        confidence,
    })
}

#[derive(Debug, Clone)]
pub struct NonDlEvaluation {
    pub cm: ConfusionMatrix,
    pub accuracy: f32,
}

/// Non-deep models carry no loss; only the confusion matrix and accuracy.
pub fn evaluate_non_dl(preds: &[usize], truth: &[usize], num_classes: usize) -> NonDlEvaluation {
    let cm = ConfusionMatrix::from_predictions(num_classes, truth, preds);
    NonDlEvaluation {
        accuracy: cm.accuracy(),
        cm,
    }
}

/// Forward a batch through the segmenter and evaluate it.
pub fn score_batch<B: Backend>(
    model: &ClstmSegmenter<B>,
    batch: &TileBatch<B>,
    loss_fn: &SegLoss,
    reduction: Reduction,
) -> TrainResult<BatchEvaluation<B>> {
    let bands = batch.inputs.dims()[2];
    if bands != model.input_size() {
        return Err(TrainError::Config(format!(
            "batch has {bands} bands, model expects input_size {}",
            model.input_size()
        )));
    }
    let log_probs = model.log_probs(batch.inputs.clone());
    evaluate(log_probs, batch.targets.clone(), &batch.labels, loss_fn, reduction)
}

/// Running totals for one split over one epoch.
#[derive(Debug, Clone)]
pub struct SplitAccumulator {
    pub loss_sum: f64,
    pub correct: u64,
    pub pixels: u64,
    pub cm: ConfusionMatrix,
}

impl SplitAccumulator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            loss_sum: 0.0,
            correct: 0,
            pixels: 0,
            cm: ConfusionMatrix::new(num_classes),
        }
    }

    /// Adds a `Sum`-reduced batch.
    pub fn absorb<B: Backend>(&mut self, eval: &BatchEvaluation<B>) {
        let batch_loss = match eval.reduction {
            Reduction::Sum => eval.loss_value() as f64,
            Reduction::Mean => eval.loss_value() as f64 * eval.num_pixels as f64,
        };
        self.loss_sum += batch_loss;
        self.correct += eval.correct;
        self.pixels += eval.num_pixels as u64;
        self.cm.merge(&eval.cm);
    }

    pub fn loss_per_pixel(&self) -> f32 {
        if self.pixels == 0 {
            0.0
        } else {
            (self.loss_sum / self.pixels as f64) as f32
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.pixels == 0 {
            0.0
        } else {
            self.correct as f32 / self.pixels as f32
        }
    }

    pub fn scores(&self) -> SplitScores {
        SplitScores {
            loss_per_pixel: self.loss_per_pixel(),
            mean_f1: self.cm.mean_f1(),
            accuracy: self.cm.accuracy(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitScores {
    pub loss_per_pixel: f32,
    pub mean_f1: f32,
    pub accuracy: f32,
}

/// Evaluate a full split without gradients. Pass the inner-backend model (`model.valid()`).
pub fn evaluate_split<B: Backend>(
    model: &ClstmSegmenter<B>,
    loader: &mut TileLoader,
    batch_size: usize,
    device: &B::Device,
    loss_fn: &SegLoss,
) -> TrainResult<SplitScores> {
    let mut acc = SplitAccumulator::new(model.num_classes());
    loader.reset();
    while let Some(batch) = loader.next_batch::<B>(batch_size, device)? {
        let eval = score_batch(model, &batch, loss_fn, Reduction::Sum)?;
        acc.absorb(&eval);
    }
    Ok(acc.scores())
}
