//! Experiment bookkeeping: per-split metric series, batch snapshots, and jsonl output.

use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;
use cli_support::OutputOpts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tile_dataset::{Split, TileBatch};

use crate::error::{TrainError, TrainResult};
use crate::evaluate::{BatchEvaluation, SplitAccumulator};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub split: Split,
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub mean_f1: f32,
    pub per_class_f1: Vec<f32>,
    pub pixels: u64,
    pub confusion: Vec<Vec<u64>>,
}

impl EpochRecord {
    pub fn from_accumulator(split: Split, epoch: usize, acc: &SplitAccumulator) -> Self {
        Self {
            split,
            epoch,
            loss: acc.loss_per_pixel(),
            accuracy: acc.accuracy(),
            mean_f1: acc.cm.mean_f1(),
            per_class_f1: acc.cm.per_class_f1(),
            pixels: acc.pixels,
            confusion: acc.cm.rows(),
        }
    }
}

/// Host-side copy of one batch's predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub split: Split,
    pub ids: Vec<String>,
    pub height: usize,
    pub width: usize,
    pub labels: Vec<i64>,
    pub predictions: Vec<i64>,
    pub confidence: Vec<f32>,
    pub cloud_fraction: Option<f32>,
    pub loss: f32,
}

impl BatchSnapshot {
    pub fn capture<B: Backend>(split: Split, batch: &TileBatch<B>, eval: &BatchEvaluation<B>) -> Self {
        let [_, _, _, height, width] = batch.inputs.dims();
        let cloud_fraction = batch
            .cloudmasks
            .as_ref()
            .map(|m| m.clone().mean().into_scalar().elem::<f32>());
        Self {
            split,
            ids: batch.ids.clone(),
            height,
            width,
            labels: batch.labels.clone(),
            predictions: eval.pred_classes.clone(),
            confidence: eval.confidence.clone(),
            cloud_fraction,
            loss: eval.loss_value(),
        }
    }
}

pub struct ExperimentLogger {
    metrics_path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    series: BTreeMap<String, Vec<f32>>,
    class_f1: BTreeMap<Split, Vec<f32>>,
    gradnorm: Vec<f32>,
    batches: usize,
}

impl ExperimentLogger {
    /// Logger writing epoch records to `<save_dir>/<name>_metrics.jsonl`.
    pub fn create(output: &OutputOpts) -> TrainResult<Self> {
        fs::create_dir_all(&output.save_dir).map_err(|e| TrainError::io(&output.save_dir, e))?;
        let path = output.path_with_suffix("_metrics.jsonl");
        let file = File::create(&path).map_err(|e| TrainError::io(&path, e))?;
        Ok(Self {
            metrics_path: Some(path),
            writer: Some(BufWriter::new(file)),
            ..Self::in_memory()
        })
    }

    /// Logger that only keeps series in memory.
    pub fn in_memory() -> Self {
        Self {
            metrics_path: None,
            writer: None,
            series: BTreeMap::new(),
            class_f1: BTreeMap::new(),
            gradnorm: Vec::new(),
            batches: 0,
        }
    }

    pub fn metrics_path(&self) -> Option<&Path> {
        self.metrics_path.as_deref()
    }

    /// `"<split>_loss"`, `"<split>_acc"`, `"<split>_f1"`, or `"train_gradnorm"`.
    pub fn series(&self, key: &str) -> &[f32] {
        if key == "train_gradnorm" {
            return &self.gradnorm;
        }
        self.series.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn class_f1(&self, split: Split) -> Option<&[f32]> {
        self.class_f1.get(&split).map(Vec::as_slice)
    }

    pub fn batches_seen(&self) -> usize {
        self.batches
    }

    pub fn record_gradnorm(&mut self, norm: f32) {
        self.gradnorm.push(norm);
    }

    pub fn record_batch(&mut self, snapshot: &BatchSnapshot) {
        self.batches += 1;
        tracing::debug!(
            split = %snapshot.split,
            batch = self.batches,
            tiles = snapshot.ids.len(),
            loss = snapshot.loss,
            cloud_fraction = ?snapshot.cloud_fraction,
            "batch"
        );
    }

    pub fn record_epoch(
        &mut self,
        split: Split,
        epoch: usize,
        acc: &SplitAccumulator,
    ) -> TrainResult<EpochRecord> {
        let record = EpochRecord::from_accumulator(split, epoch, acc);
        self.push(format!("{split}_loss"), record.loss);
        self.push(format!("{split}_acc"), record.accuracy);
        self.push(format!("{split}_f1"), record.mean_f1);
        self.class_f1.insert(split, record.per_class_f1.clone());

        tracing::info!(
            split = %split,
            epoch,
            loss = record.loss,
            acc = record.accuracy,
            f1 = record.mean_f1,
            "epoch summary"
        );
        tracing::debug!(split = %split, per_class_f1 = ?record.per_class_f1, "class f1");

        if let Some(writer) = self.writer.as_mut() {
            let path = self.metrics_path.clone().unwrap_or_default();
            let line = serde_json::to_string(&record).map_err(|e| TrainError::json(&path, e))?;
            writeln!(writer, "{line}").map_err(|e| TrainError::io(&path, e))?;
            writer.flush().map_err(|e| TrainError::io(&path, e))?;
        }
        Ok(record)
    }

    fn push(&mut self, key: String, value: f32) {
        self.series.entry(key).or_default().push(value);
    }
}

fn write_json<T: Serialize>(dir: &Path, file: &str, value: &T) -> TrainResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| TrainError::io(dir, e))?;
    let path = dir.join(file);
    let json = serde_json::to_vec_pretty(value).map_err(|e| TrainError::json(&path, e))?;
    fs::write(&path, json).map_err(|e| TrainError::io(&path, e))?;
    Ok(path)
}

/// Writes `epoch_<split>.json` into `dir`.
pub fn dump_epoch(record: &EpochRecord, dir: &Path) -> TrainResult<PathBuf> {
    write_json(dir, &format!("epoch_{}.json", record.split), record)
}

/// Writes `batch_<split>.json` into `dir`.
pub fn dump_batch(snapshot: &BatchSnapshot, dir: &Path) -> TrainResult<PathBuf> {
    write_json(dir, &format!("batch_{}.json", snapshot.split), snapshot)
}
