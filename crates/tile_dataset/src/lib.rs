//! Satellite tile time-series samples and Burn-compatible batching.
//!
//! This crate provides:
//! - [`TileSample`]: one tile's band stack over time with per-pixel crop labels
//! - JSON split storage under `<root>/<split>/`
//! - [`SyntheticTiles`] for seeded smoke datasets
//! - [`TileLoader`] batch iteration producing [`TileBatch`] tensors
//! - per-pixel feature extraction for non-deep-learning models

pub mod batch;
pub mod features;
pub mod store;
pub mod synthetic;
pub mod types;

pub use batch::{LoaderConfig, SplitLoaders, TileBatch, TileLoader};
pub use features::{class_counts, pixel_features};
pub use store::{index_split, load_sample, load_split, write_split};
pub use synthetic::SyntheticTiles;
pub use types::*;
