use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{ClstmSegmenter, ClstmSegmenterConfig};
use std::path::Path;

use crate::error::{TrainError, TrainResult};

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

/// Saves the segmenter's weights; the recorder appends its `.bin` extension.
pub fn save_segmenter<B: Backend>(model: &ClstmSegmenter<B>, path: &Path) -> TrainResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TrainError::io(parent, e))?;
    }
    model
        .clone()
        .save_file(path, &recorder())
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
}

/// Builds a fresh segmenter from `cfg` and loads weights from `path` into it.
pub fn load_segmenter_from_checkpoint<B: Backend>(
    cfg: &ClstmSegmenterConfig,
    path: &Path,
    device: &B::Device,
) -> TrainResult<ClstmSegmenter<B>> {
    ClstmSegmenter::<B>::new(cfg, device)?
        .load_file(path, &recorder(), device)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
}
