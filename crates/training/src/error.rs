use std::path::PathBuf;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] models::ModelConfigError),
    #[error(transparent)]
    Dataset(#[from] tile_dataset::TileDatasetError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("checkpoint error at {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("tensor readback failed: {0}")]
    Tensor(String),
    #[error("{0} must be fit before predicting")]
    NotFitted(&'static str),
    #[error("training requires {0}")]
    Missing(&'static str),
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        TrainError::Json {
            path: path.into(),
            source,
        }
    }
}
