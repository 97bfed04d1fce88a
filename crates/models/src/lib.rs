//! Burn models for satellite image time-series segmentation.
//!
//! - [`ConvLstm`]: stacked convolutional LSTM over `[batch, time, bands, height, width]`.
//! - [`VectorAttention`] / [`TemporalAttention`]: softmax-over-time reweighting per pixel.
//! - [`ClstmSegmenter`]: ConvLSTM encoder, temporal pooling, and a conv head emitting
//!   per-pixel class log-probabilities.
//!
//! These are pure Burn modules; training and checkpointing live in the `training` crate.

pub mod attention;
pub mod clstm;
pub mod segmenter;

use thiserror::Error;

pub use attention::{TemporalAttention, VectorAttention};
pub use clstm::{ConvLstm, ConvLstmCell, ConvLstmConfig, LstmState};
pub use segmenter::{ClstmSegmenter, ClstmSegmenterConfig, TemporalPooling, TimePooling};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelConfigError {
    #[error("model needs at least one ConvLSTM layer")]
    NoLayers,
    #[error("{field} has {got} entries but the model has {num_layers} layers")]
    LayerMismatch {
        field: &'static str,
        got: usize,
        num_layers: usize,
    },
    #[error("kernel size {kernel_size} must be odd to preserve spatial dims")]
    EvenKernel { kernel_size: usize },
    #[error("layer width must be positive, got {value}")]
    ZeroWidth { value: usize },
    #[error("segmentation head needs at least 2 classes, got {num_classes}")]
    TooFewClasses { num_classes: usize },
    #[error("attention heads r={r} cannot broadcast onto hidden dim {hidden_dim}")]
    AttentionHeads { r: usize, hidden_dim: usize },
}

pub mod prelude {
    pub use super::{
        ClstmSegmenter, ClstmSegmenterConfig, ConvLstm, ConvLstmConfig, ModelConfigError,
        TemporalAttention, TemporalPooling, VectorAttention,
    };
}
