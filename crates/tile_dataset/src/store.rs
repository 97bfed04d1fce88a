//! On-disk layout: `<root>/<split>/*.json`, one [`TileSample`] per file.

use crate::types::{DatasetResult, Split, TileDatasetError, TileSample};
use std::fs;
use std::path::{Path, PathBuf};

pub fn split_dir(root: &Path, split: Split) -> PathBuf {
    root.join(split.as_str())
}

/// Sample files for a split, sorted by filename. A missing split directory yields none.
pub fn index_split(root: &Path, split: Split) -> DatasetResult<Vec<PathBuf>> {
    let dir = split_dir(root, split);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(&dir).map_err(|e| TileDatasetError::Io {
        path: dir.clone(),
        source: e,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TileDatasetError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn load_sample(path: &Path, num_classes: usize) -> DatasetResult<TileSample> {
    let raw = fs::read(path).map_err(|e| TileDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let sample: TileSample = serde_json::from_slice(&raw).map_err(|e| TileDatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    sample.validate(num_classes)?;
    Ok(sample)
}

pub fn load_split(root: &Path, split: Split, num_classes: usize) -> DatasetResult<Vec<TileSample>> {
    let paths = index_split(root, split)?;
    let samples = paths
        .iter()
        .map(|p| load_sample(p, num_classes))
        .collect::<DatasetResult<Vec<_>>>()?;
    tracing::debug!(split = %split, samples = samples.len(), root = %root.display(), "loaded split");
    Ok(samples)
}

/// Writes each sample as `<root>/<split>/<id>.json`, creating the directory.
pub fn write_split(root: &Path, split: Split, samples: &[TileSample]) -> DatasetResult<()> {
    let dir = split_dir(root, split);
    fs::create_dir_all(&dir).map_err(|e| TileDatasetError::Io {
        path: dir.clone(),
        source: e,
    })?;
    for sample in samples {
        sample.check_id()?;
        let path = dir.join(format!("{}.json", sample.id));
        let json = serde_json::to_vec(sample).map_err(|e| TileDatasetError::Json {
            path: path.clone(),
            source: e,
        })?;
        fs::write(&path, json).map_err(|e| TileDatasetError::Io { path, source: e })?;
    }
    Ok(())
}
