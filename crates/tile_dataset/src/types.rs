//! Core types and error definitions for tile_dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, TileDatasetError>;

#[derive(Debug, Error)]
pub enum TileDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("sample {id} failed validation: {msg}")]
    Validation { id: String, msg: String },
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("{0}")]
    Other(String),
}

/// Dataset split names, matching the on-disk subdirectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = TileDatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(TileDatasetError::Other(format!("unknown split `{other}`"))),
        }
    }
}

/// One tile over time.
///
/// `inputs` is laid out `[timesteps, bands, height, width]`, `labels` is `[height, width]`
/// with negative values marking unlabeled pixels, and `cloudmask` (when present) is
/// `[timesteps, height, width]` with 1.0 where the pixel is cloudy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSample {
    pub id: String,
    pub timesteps: usize,
    pub bands: usize,
    pub height: usize,
    pub width: usize,
    pub inputs: Vec<f32>,
    pub labels: Vec<i64>,
    #[serde(default)]
    pub cloudmask: Option<Vec<f32>>,
}

impl TileSample {
    pub fn dims(&self) -> [usize; 4] {
        [self.timesteps, self.bands, self.height, self.width]
    }

    /// `(timesteps, bands)`: what a model consumes per pixel.
    pub fn input_dims(&self) -> (usize, usize) {
        (self.timesteps, self.bands)
    }

    /// Ids become file names; they must stay inside the split directory.
    pub fn check_id(&self) -> DatasetResult<()> {
        let id = self.id.as_str();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(TileDatasetError::Validation {
                id: self.id.clone(),
                msg: "id must be a plain file name".to_string(),
            });
        }
        Ok(())
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }

    pub fn labeled_pixels(&self) -> usize {
        self.labels.iter().filter(|l| **l >= 0).count()
    }

    /// Value of band `band` at timestep `t` for pixel `(y, x)`.
    pub fn value(&self, t: usize, band: usize, y: usize, x: usize) -> f32 {
        self.inputs[((t * self.bands + band) * self.height + y) * self.width + x]
    }

    pub fn validate(&self, num_classes: usize) -> DatasetResult<()> {
        let fail = |msg: String| TileDatasetError::Validation {
            id: self.id.clone(),
            msg,
        };
        self.check_id()?;
        if self.timesteps == 0 || self.bands == 0 || self.height == 0 || self.width == 0 {
            return Err(fail(format!("degenerate dims {:?}", self.dims())));
        }
        let expected = self.timesteps * self.bands * self.pixels();
        if self.inputs.len() != expected {
            return Err(fail(format!(
                "inputs has {} values, expected {expected}",
                self.inputs.len()
            )));
        }
        if self.inputs.iter().any(|v| !v.is_finite()) {
            return Err(fail("inputs contain non-finite values".to_string()));
        }
        if self.labels.len() != self.pixels() {
            return Err(fail(format!(
                "labels has {} values, expected {}",
                self.labels.len(),
                self.pixels()
            )));
        }
        if let Some(bad) = self.labels.iter().find(|l| **l >= num_classes as i64) {
            return Err(fail(format!(
                "label {bad} out of range for {num_classes} classes"
            )));
        }
        if let Some(mask) = &self.cloudmask {
            let expected = self.timesteps * self.pixels();
            if mask.len() != expected {
                return Err(fail(format!(
                    "cloudmask has {} values, expected {expected}",
                    mask.len()
                )));
            }
        }
        Ok(())
    }
}
