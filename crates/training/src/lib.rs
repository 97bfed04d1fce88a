#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod loss;
pub mod non_dl;
pub mod optim;
pub mod trainer;
pub mod util;
pub mod vis;

pub use checkpoint::{load_segmenter_from_checkpoint, save_segmenter};
pub use config::TrainConfigFile;
pub use error::{TrainError, TrainResult};
pub use evaluate::{
    evaluate, evaluate_non_dl, evaluate_split, score_batch, BatchEvaluation, ModelFamily,
    SplitAccumulator, SplitScores,
};
pub use loss::{LossConfig, LossKind, Reduction, SegLoss};
pub use models::{ClstmSegmenter, ClstmSegmenterConfig, TemporalPooling};
pub use non_dl::{MajorityClass, NearestCentroid, NonDlClassifier, NonDlModel};
pub use optim::{OptimizerConfig, OptimizerKind, SegOptimizer};
pub use trainer::{train, train_dl_model, train_non_dl_model, SplitSummary, TrainSettings, TrainableModel};
pub use util::{run_eval, run_train, EvalArgs, EvalReport, TrainArgs};
pub use vis::{BatchSnapshot, EpochRecord, ExperimentLogger};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
