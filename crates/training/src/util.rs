use anyhow::Context;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use clap::{Args, Parser, ValueEnum};
use cli_support::{resolve_seed, LogArgs, OutputArgs, OutputOpts, SeedArgs};
use models::{ClstmSegmenter, ClstmSegmenterConfig, TemporalPooling};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tile_dataset::{class_counts, pixel_features, Split, SplitLoaders, SyntheticTiles};
use tracing::{info, warn};

use crate::checkpoint::{load_segmenter_from_checkpoint, save_segmenter};
use crate::evaluate::{evaluate_non_dl, evaluate_split, ModelFamily};
use crate::loss::{LossConfig, LossKind, SegLoss};
use crate::non_dl::{MajorityClass, NearestCentroid, NonDlClassifier, NonDlModel};
use crate::optim::{OptimizerConfig, OptimizerKind};
use crate::trainer::{train, TrainSettings, TrainableModel};
use crate::vis::ExperimentLogger;
use crate::TrainBackend;

pub type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Clstm,
    NearestCentroid,
    MajorityClass,
}

impl ModelKind {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelKind::Clstm => ModelFamily::Dl,
            ModelKind::NearestCentroid | ModelKind::MajorityClass => ModelFamily::NonDl,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Clstm => "clstm",
            ModelKind::NearestCentroid => "nearest_centroid",
            ModelKind::MajorityClass => "majority_class",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolingKind {
    VectorAttention,
    TemporalAttention,
    LastState,
    Mean,
}

impl From<PoolingKind> for TemporalPooling {
    fn from(kind: PoolingKind) -> Self {
        match kind {
            PoolingKind::VectorAttention => TemporalPooling::VectorAttention,
            PoolingKind::TemporalAttention => TemporalPooling::TemporalAttention,
            PoolingKind::LastState => TemporalPooling::LastState,
            PoolingKind::Mean => TemporalPooling::Mean,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitArg {
    Train,
    Val,
    Test,
}

impl From<SplitArg> for Split {
    fn from(arg: SplitArg) -> Self {
        match arg {
            SplitArg::Train => Split::Train,
            SplitArg::Val => Split::Val,
            SplitArg::Test => Split::Test,
        }
    }
}

/// Model selection and ConvLSTM architecture.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model to train or evaluate.
    #[arg(long, value_enum, default_value_t = ModelKind::Clstm)]
    pub model: ModelKind,
    /// Input bands per timestep; inferred from the first tile when omitted.
    #[arg(long)]
    pub input_size: Option<usize>,
    /// Hidden channels per ConvLSTM layer (comma separated).
    #[arg(long, value_delimiter = ',', default_value = "128")]
    pub hidden_dims: Vec<usize>,
    /// ConvLSTM kernel size per layer (comma separated, odd).
    #[arg(long, value_delimiter = ',', default_value = "3")]
    pub lstm_kernel_sizes: Vec<usize>,
    /// Kernel size of the segmentation head.
    #[arg(long, default_value_t = 3)]
    pub conv_kernel_size: usize,
    #[arg(long, default_value_t = 1)]
    pub lstm_num_layers: usize,
    #[arg(long, default_value_t = 4)]
    pub num_classes: usize,
    /// Run a second ConvLSTM over reversed time and concatenate.
    #[arg(long)]
    pub bidirectional: bool,
    #[arg(long, value_enum, default_value_t = PoolingKind::VectorAttention)]
    pub pooling: PoolingKind,
    /// Emit raw class scores from `forward`.
    #[arg(long)]
    pub early_feats: bool,
}

impl ModelArgs {
    pub fn segmenter_config(&self, input_size: usize) -> ClstmSegmenterConfig {
        ClstmSegmenterConfig {
            input_size,
            hidden_dims: self.hidden_dims.clone(),
            lstm_kernel_sizes: self.lstm_kernel_sizes.clone(),
            conv_kernel_size: self.conv_kernel_size,
            lstm_num_layers: self.lstm_num_layers,
            num_classes: self.num_classes,
            bidirectional: self.bidirectional,
            pooling: self.pooling.into(),
            early_feats: self.early_feats,
        }
    }

    /// Fresh classifier for the non-deep kinds.
    pub fn non_dl_classifier(&self) -> Option<NonDlClassifier> {
        match self.model {
            ModelKind::Clstm => None,
            ModelKind::NearestCentroid => Some(NonDlClassifier::NearestCentroid(
                NearestCentroid::new(self.num_classes),
            )),
            ModelKind::MajorityClass => Some(NonDlClassifier::MajorityClass(MajorityClass::default())),
        }
    }

    fn input_size_for(&self, loaders: &SplitLoaders) -> anyhow::Result<usize> {
        if let Some(size) = self.input_size {
            return Ok(size);
        }
        loaders
            .input_dims()
            .map(|(_, bands)| bands)
            .context("cannot infer --input-size from an empty dataset")
    }
}

/// The segmenter's input channels must match the tiles' band count.
fn check_input_size(cfg: &ClstmSegmenterConfig, loaders: &SplitLoaders) -> anyhow::Result<()> {
    if let Some((_, bands)) = loaders.input_dims() {
        if bands != cfg.input_size {
            anyhow::bail!(
                "model input_size is {} but tiles have {bands} bands",
                cfg.input_size
            );
        }
    }
    Ok(())
}

/// Where tiles come from.
#[derive(Args, Debug, Clone, Default)]
pub struct DataArgs {
    /// Dataset root containing train/, val/, test/ tile JSON files.
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    /// Generate this many synthetic training tiles instead of reading a root.
    #[arg(long)]
    pub synthetic: Option<usize>,
}

/// Loaders from `--synthetic N` (val/test get N/4 tiles each) or `--dataset-root`.
pub fn build_loaders(data: &DataArgs, num_classes: usize, seed: u64) -> anyhow::Result<SplitLoaders> {
    if let Some(count) = data.synthetic {
        let gen = |offset: u64, n: usize| {
            SyntheticTiles {
                num_classes,
                seed: seed.wrapping_add(offset),
                ..Default::default()
            }
            .generate(n)
        };
        let held_out = (count / 4).max(1);
        info!(count, held_out, "generating synthetic tiles");
        return Ok(SplitLoaders::from_samples(
            gen(0, count),
            gen(1, held_out),
            gen(2, held_out),
            num_classes,
            Some(seed),
        )?);
    }
    let root = data
        .dataset_root
        .as_deref()
        .context("pass --dataset-root or --synthetic")?;
    SplitLoaders::from_root(root, num_classes, Some(seed))
        .with_context(|| format!("failed to load tiles under {}", root.display()))
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train a ConvLSTM segmenter or a per-pixel baseline on tile time series")]
pub struct TrainArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    pub output: OutputArgs,
    #[command(flatten)]
    pub seed: SeedArgs,
    #[command(flatten)]
    pub log: LogArgs,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// TOML file with defaults for any flag below; also read from CLSTM_TRAIN_CONFIG.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,
    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    /// SGD momentum.
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,
    #[arg(long, value_enum, default_value_t = LossKind::CrossEntropy)]
    pub loss: LossKind,
    /// Weight classes by inverse training frequency.
    #[arg(long)]
    pub loss_weight: bool,
    /// Exponent on the inverse-frequency class weights.
    #[arg(long, default_value_t = 1.0)]
    pub weight_scale: f32,
    /// Focal loss focusing parameter.
    #[arg(long, default_value_t = 2.0)]
    pub gamma: f32,
    /// Run a single pass over the test split instead of train/val.
    #[arg(long)]
    pub eval_on_test: bool,
    /// Dump the best epoch's batch and summaries next to the best checkpoint.
    #[arg(long)]
    pub save_best: bool,
    /// Fit/score repetitions for non-deep models.
    #[arg(long, default_value_t = 1)]
    pub num_repeat: usize,
    /// Warm-start from a checkpoint (burn record, or JSON for non-deep models).
    #[arg(long)]
    pub model_path: Option<PathBuf>,
}

impl TrainArgs {
    pub fn settings(&self) -> TrainSettings {
        TrainSettings {
            epochs: self.epochs,
            batch_size: self.batch_size,
            num_classes: self.model.num_classes,
            eval_on_test: self.eval_on_test,
            save_best: self.save_best,
            num_repeat: self.num_repeat,
            optimizer: OptimizerConfig {
                kind: self.optimizer,
                lr: self.lr,
                momentum: self.momentum,
                weight_decay: self.weight_decay,
            },
            loss: LossConfig {
                kind: self.loss,
                weighted: self.loss_weight,
                weight_scale: self.weight_scale,
                gamma: self.gamma,
            },
        }
    }
}

/// `<save_dir>/<name>_config.json`, written next to the DL checkpoint.
pub fn model_config_path(output: &OutputOpts) -> PathBuf {
    output.path_with_suffix("_config.json")
}

fn write_model_config(cfg: &ClstmSegmenterConfig, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn read_model_config(path: &Path) -> anyhow::Result<ClstmSegmenterConfig> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid model config {}", path.display()))
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<OutputOpts> {
    validate_backend_choice(args.backend)?;

    let seed = resolve_seed(args.seed.seed);
    <ADBackend as Backend>::seed(seed);
    let output = args.output.resolve(args.model.model.name());
    fs::create_dir_all(&output.save_dir)
        .with_context(|| format!("failed to create {}", output.save_dir.display()))?;
    info!(seed, name = %output.name, save_dir = %output.save_dir.display(), "run");

    let mut loaders = build_loaders(&args.data, args.model.num_classes, seed)?;
    let required = if args.eval_on_test { Split::Test } else { Split::Train };
    if loaders.get(required).is_empty() {
        anyhow::bail!("no {required} tiles found");
    }
    if !args.eval_on_test && loaders.val.is_empty() {
        warn!("validation split is empty; no best checkpoint will be written");
    }

    let device = <ADBackend as Backend>::Device::default();
    let settings = args.settings();
    let mut logger = ExperimentLogger::create(&output)?;

    let model = match args.model.model.family() {
        ModelFamily::Dl => {
            let cfg = args.model.segmenter_config(args.model.input_size_for(&loaders)?);
            check_input_size(&cfg, &loaders)?;
            let model = match &args.model_path {
                Some(path) => load_segmenter_from_checkpoint::<ADBackend>(&cfg, path, &device)?,
                None => ClstmSegmenter::<ADBackend>::new(&cfg, &device)?,
            };
            write_model_config(&cfg, &model_config_path(&output))?;
            TrainableModel::Dl(model)
        }
        ModelFamily::NonDl => {
            let model = match &args.model_path {
                Some(path) => NonDlClassifier::load_json(path)?,
                None => args
                    .model
                    .non_dl_classifier()
                    .context("model kind has no non-deep classifier")?,
            };
            TrainableModel::NonDl(model)
        }
    };

    let trained = train::<ADBackend>(
        model,
        Some(&settings),
        Some(&mut loaders),
        &output,
        &mut logger,
        &device,
    )?;

    if let TrainableModel::Dl(model) = trained {
        let path = output.checkpoint_path();
        save_segmenter(&model, &path)?;
        info!(path = %path.display(), "saved final checkpoint");
    }
    if let Some(metrics) = logger.metrics_path() {
        info!(path = %metrics.display(), "metrics written");
    }
    Ok(output)
}

#[derive(Parser, Debug)]
#[command(name = "eval", about = "Score a trained segmenter or baseline on one split")]
pub struct EvalArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    pub seed: SeedArgs,
    #[command(flatten)]
    pub log: LogArgs,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Checkpoint to load (burn record without extension, or non-deep JSON).
    #[arg(long)]
    pub checkpoint: PathBuf,
    /// Architecture JSON written by `train`; defaults to the model flags.
    #[arg(long)]
    pub model_config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = SplitArg::Test)]
    pub split: SplitArg,
    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,
    #[arg(long, value_enum, default_value_t = LossKind::CrossEntropy)]
    pub loss: LossKind,
    #[arg(long, default_value_t = 2.0)]
    pub gamma: f32,
    /// Weight the loss by inverse train-split class frequency, as `train --loss-weight`.
    #[arg(long)]
    pub loss_weight: bool,
    #[arg(long, default_value_t = 1.0)]
    pub weight_scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub split: Split,
    pub accuracy: f32,
    pub mean_f1: f32,
    /// Absent for non-deep models.
    pub loss_per_pixel: Option<f32>,
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<EvalReport> {
    validate_backend_choice(args.backend)?;
    let seed = resolve_seed(args.seed.seed);
    let split: Split = args.split.into();

    let cfg = match &args.model_config {
        Some(path) => Some(read_model_config(path)?),
        None => None,
    };
    let num_classes = cfg.as_ref().map_or(args.model.num_classes, |c| c.num_classes);
    let mut loaders = build_loaders(&args.data, num_classes, seed)?;
    if loaders.get(split).is_empty() {
        anyhow::bail!("no {split} tiles found");
    }

    let report = match args.model.model.family() {
        ModelFamily::Dl => {
            let cfg = match cfg {
                Some(cfg) => cfg,
                None => args.model.segmenter_config(args.model.input_size_for(&loaders)?),
            };
            check_input_size(&cfg, &loaders)?;
            let device = <TrainBackend as Backend>::Device::default();
            let model = load_segmenter_from_checkpoint::<TrainBackend>(&cfg, &args.checkpoint, &device)?;
            let loss_cfg = LossConfig {
                kind: args.loss,
                weighted: args.loss_weight,
                weight_scale: args.weight_scale,
                gamma: args.gamma,
            };
            let counts = if loss_cfg.weighted {
                if loaders.train.is_empty() {
                    anyhow::bail!("--loss-weight needs train tiles to derive class weights");
                }
                Some(class_counts(loaders.train.samples(), num_classes))
            } else {
                None
            };
            let loss_fn = SegLoss::new(&loss_cfg, counts.as_deref());
            let scores = evaluate_split(
                &model,
                loaders.get_mut(split),
                args.batch_size.max(1),
                &device,
                &loss_fn,
            )?;
            EvalReport {
                split,
                accuracy: scores.accuracy,
                mean_f1: scores.mean_f1,
                loss_per_pixel: Some(scores.loss_per_pixel),
            }
        }
        ModelFamily::NonDl => {
            let model = NonDlClassifier::load_json(&args.checkpoint)?;
            let (xs, ys) = pixel_features(loaders.get(split).samples());
            let preds = model.predict(&xs)?;
            let eval = evaluate_non_dl(&preds, &ys, num_classes);
            EvalReport {
                split,
                accuracy: eval.accuracy,
                mean_f1: eval.cm.mean_f1(),
                loss_per_pixel: None,
            }
        }
    };

    info!(
        split = %report.split,
        accuracy = report.accuracy,
        f1 = report.mean_f1,
        loss = ?report.loss_per_pixel,
        "eval complete"
    );
    Ok(report)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
