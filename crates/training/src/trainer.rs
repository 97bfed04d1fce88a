//! Training loops for deep and non-deep model families.

use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use cli_support::OutputOpts;
use metrics::mean_std;
use models::ClstmSegmenter;
use std::collections::BTreeMap;
use tile_dataset::{class_counts, pixel_features, Split, SplitLoaders};
use tracing::info;

use crate::checkpoint::save_segmenter;
use crate::error::{TrainError, TrainResult};
use crate::evaluate::{evaluate_non_dl, score_batch, ModelFamily, SplitAccumulator};
use crate::loss::{LossConfig, Reduction, SegLoss};
use crate::non_dl::{NonDlClassifier, NonDlModel};
use crate::optim::{OptimizerConfig, SegOptimizer};
use crate::vis::{dump_batch, dump_epoch, BatchSnapshot, EpochRecord, ExperimentLogger};

/// Loop settings shared by both model families.
#[derive(Debug, Clone)]
pub struct TrainSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub num_classes: usize,
    pub eval_on_test: bool,
    pub save_best: bool,
    pub num_repeat: usize,
    pub optimizer: OptimizerConfig,
    pub loss: LossConfig,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 4,
            num_classes: 4,
            eval_on_test: false,
            save_best: false,
            num_repeat: 1,
            optimizer: OptimizerConfig::default(),
            loss: LossConfig::default(),
        }
    }
}

impl TrainSettings {
    pub fn splits(&self) -> &'static [Split] {
        if self.eval_on_test {
            &[Split::Test]
        } else {
            &[Split::Train, Split::Val]
        }
    }

    fn epochs(&self) -> usize {
        if self.eval_on_test {
            1
        } else {
            self.epochs
        }
    }
}

pub enum TrainableModel<B: AutodiffBackend> {
    Dl(ClstmSegmenter<B>),
    NonDl(NonDlClassifier),
}

impl<B: AutodiffBackend> TrainableModel<B> {
    pub fn family(&self) -> ModelFamily {
        match self {
            TrainableModel::Dl(_) => ModelFamily::Dl,
            TrainableModel::NonDl(_) => ModelFamily::NonDl,
        }
    }
}

/// L2 norm of the head kernel's gradient divided by its element count.
fn head_grad_norm<B: AutodiffBackend>(model: &ClstmSegmenter<B>, grads: &B::Gradients) -> f32 {
    let weight = model.head().weight.val();
    let numel = weight.shape().num_elements().max(1) as f32;
    weight
        .grad(grads)
        .map(|g| g.powf_scalar(2.0).sum().sqrt().into_scalar().elem::<f32>() / numel)
        .unwrap_or(0.0)
}

/// Trains `model` on `train`, scoring `val` each epoch; with `eval_on_test`, one pass over `test`.
///
/// Writes `<name>_best` whenever validation mean F1 improves.
pub fn train_dl_model<B: AutodiffBackend>(
    mut model: ClstmSegmenter<B>,
    loaders: &mut SplitLoaders,
    settings: &TrainSettings,
    output: &OutputOpts,
    logger: &mut ExperimentLogger,
    device: &B::Device,
) -> TrainResult<ClstmSegmenter<B>> {
    let num_classes = settings.num_classes;
    let counts = settings
        .loss
        .weighted
        .then(|| class_counts(loaders.train.samples(), num_classes));
    let loss_fn = SegLoss::new(&settings.loss, counts.as_deref());
    if let Some(w) = loss_fn.class_weights() {
        info!(weights = ?w, "class weights");
    }
    let mut optim = SegOptimizer::<ClstmSegmenter<B>>::new::<B>(&settings.optimizer);
    let batch_size = settings.batch_size.max(1);
    let mut best_val_f1 = 0.0f32;

    for epoch in 0..settings.epochs() {
        info!(epoch, "epoch start");
        let mut records: BTreeMap<Split, EpochRecord> = BTreeMap::new();

        for &split in settings.splits() {
            let mut acc = SplitAccumulator::new(num_classes);
            let mut last_snapshot = None;
            let loader = loaders.get_mut(split);
            loader.reset();

            if split == Split::Train {
                while let Some(batch) = loader.next_batch::<B>(batch_size, device)? {
                    let eval = score_batch(&model, &batch, &loss_fn, Reduction::Sum)?;
                    if eval.has_labels() {
                        let grads = eval.loss.clone().backward();
                        logger.record_gradnorm(head_grad_norm(&model, &grads));
                        let grads = GradientsParams::from_grads(grads, &model);
                        model = optim.step(model, grads);
                        acc.absorb(&eval);
                    }
                    let snapshot = BatchSnapshot::capture(split, &batch, &eval);
                    logger.record_batch(&snapshot);
                    last_snapshot = Some(snapshot);
                }
            } else {
                let eval_model = model.valid();
                while let Some(batch) = loader.next_batch::<B::InnerBackend>(batch_size, device)? {
                    let eval = score_batch(&eval_model, &batch, &loss_fn, Reduction::Sum)?;
                    if eval.has_labels() {
                        acc.absorb(&eval);
                    }
                    let snapshot = BatchSnapshot::capture(split, &batch, &eval);
                    logger.record_batch(&snapshot);
                    last_snapshot = Some(snapshot);
                }
            }

            let record = logger.record_epoch(split, epoch, &acc)?;

            if split == Split::Val {
                let val_f1 = acc.cm.mean_f1();
                if val_f1 > best_val_f1 {
                    best_val_f1 = val_f1;
                    let path = output.best_checkpoint_path();
                    save_segmenter(&model, &path)?;
                    info!(epoch, val_f1, path = %path.display(), "new best checkpoint");
                    if settings.save_best {
                        let dir = output.best_dir();
                        if let Some(snapshot) = &last_snapshot {
                            dump_batch(snapshot, &dir)?;
                        }
                        dump_epoch(&record, &dir)?;
                        if let Some(train_record) = records.get(&Split::Train) {
                            dump_epoch(train_record, &dir)?;
                        }
                    }
                }
            }
            records.insert(split, record);
        }
    }

    Ok(model)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitSummary {
    pub split: Split,
    pub acc_mean: f32,
    pub acc_std: f32,
    pub f1_mean: f32,
    pub f1_std: f32,
}

/// Fits on `train` and scores each split, `num_repeat` times; returns mean/std per split.
pub fn train_non_dl_model(
    model: &mut NonDlClassifier,
    loaders: &SplitLoaders,
    settings: &TrainSettings,
    output: &OutputOpts,
) -> TrainResult<Vec<SplitSummary>> {
    let mut results: BTreeMap<Split, (Vec<f32>, Vec<f32>)> = BTreeMap::new();

    for rep in 0..settings.num_repeat.max(1) {
        for &split in settings.splits() {
            let (xs, ys) = pixel_features(loaders.get(split).samples());
            if split == Split::Train {
                model.fit(&xs, &ys)?;
                let path = output.path_with_suffix("_model.json");
                std::fs::create_dir_all(&output.save_dir)
                    .map_err(|e| TrainError::io(&output.save_dir, e))?;
                model.save_json(&path)?;
            }
            let preds = model.predict(&xs)?;
            let eval = evaluate_non_dl(&preds, &ys, settings.num_classes);
            let f1 = eval.cm.mean_f1();

            info!(rep, split = %split, accuracy = eval.accuracy, f1, model = model.name(), "non-dl split");
            info!("{split} cm:\n{}", eval.cm);
            info!(split = %split, per_class_f1 = ?eval.cm.per_class_f1(), "per class f1");

            let entry = results.entry(split).or_default();
            entry.0.push(eval.accuracy);
            entry.1.push(f1);
        }
    }

    let summaries = settings
        .splits()
        .iter()
        .filter_map(|split| {
            let (accs, f1s) = results.get(split)?;
            let (acc_mean, acc_std) = mean_std(accs);
            let (f1_mean, f1_std) = mean_std(f1s);
            info!(
                "{split} accuracy: {acc_mean:.4} +/- {acc_std:.4}, f1-score: {f1_mean:.4} +/- {f1_std:.4}"
            );
            Some(SplitSummary {
                split: *split,
                acc_mean,
                acc_std,
                f1_mean,
                f1_std,
            })
        })
        .collect();
    Ok(summaries)
}

/// Dispatches to the loop for the model's family.
pub fn train<B: AutodiffBackend>(
    model: TrainableModel<B>,
    settings: Option<&TrainSettings>,
    loaders: Option<&mut SplitLoaders>,
    output: &OutputOpts,
    logger: &mut ExperimentLogger,
    device: &B::Device,
) -> TrainResult<TrainableModel<B>> {
    let loaders = loaders.ok_or(TrainError::Missing("split loaders"))?;
    let settings = settings.ok_or(TrainError::Missing("train settings"))?;
    info!(family = ?model.family(), "training");
    match model {
        TrainableModel::Dl(m) => {
            train_dl_model(m, loaders, settings, output, logger, device).map(TrainableModel::Dl)
        }
        TrainableModel::NonDl(mut m) => {
            train_non_dl_model(&mut m, loaders, settings, output)?;
            Ok(TrainableModel::NonDl(m))
        }
    }
}

