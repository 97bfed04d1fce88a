//! Temporal attention over ConvLSTM outputs.
//!
//! Both modules take `[batch, time, channels, height, width]` and return a tensor of
//! the same shape with every timestep scaled by its softmax weight over time. Weights
//! are computed independently per pixel.

use burn::module::Module;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::activation::{softmax, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::ModelConfigError;

fn constant_linear<B: Backend>(d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_in, d_out)
        .with_bias(false)
        .with_initializer(Initializer::Constant { value: 1.0 })
        .init(device)
}

fn channels_last<B: Backend>(hidden: Tensor<B, 5>) -> Tensor<B, 5> {
    hidden.permute([0, 1, 3, 4, 2])
}

fn channels_first<B: Backend>(hidden: Tensor<B, 5>) -> Tensor<B, 5> {
    hidden.permute([0, 1, 4, 2, 3])
}

/// Scores each hidden vector with a single bias-free projection.
#[derive(Debug, Module)]
pub struct VectorAttention<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> VectorAttention<B> {
    pub fn new(hidden_dim: usize, device: &B::Device) -> Self {
        Self {
            linear: constant_linear(hidden_dim, 1, device),
        }
    }

    /// Softmax weights over time, channels last: `[B, T, H, W, 1]`.
    pub fn weights(&self, hidden: Tensor<B, 5>) -> Tensor<B, 5> {
        softmax(self.linear.forward(channels_last(hidden)), 1)
    }

    pub fn forward(&self, hidden: Tensor<B, 5>) -> Tensor<B, 5> {
        let hidden = channels_last(hidden);
        let weights = softmax(self.linear.forward(hidden.clone()), 1);
        channels_first(weights * hidden)
    }
}

/// Two-layer `tanh` scorer (`hidden -> d -> r`).
#[derive(Debug, Module)]
pub struct TemporalAttention<B: Backend> {
    w_s1: Linear<B>,
    w_s2: Linear<B>,
}

impl<B: Backend> TemporalAttention<B> {
    pub const DEFAULT_D: usize = 128;
    pub const DEFAULT_R: usize = 1;

    /// `r` must be 1 or `hidden_dim` so the weights broadcast onto the hidden states.
    pub fn new(
        hidden_dim: usize,
        d: usize,
        r: usize,
        device: &B::Device,
    ) -> Result<Self, ModelConfigError> {
        if r != 1 && r != hidden_dim {
            return Err(ModelConfigError::AttentionHeads { r, hidden_dim });
        }
        if d == 0 {
            return Err(ModelConfigError::ZeroWidth { value: d });
        }
        Ok(Self {
            w_s1: constant_linear(hidden_dim, d, device),
            w_s2: constant_linear(d, r, device),
        })
    }

    pub fn weights(&self, hidden: Tensor<B, 5>) -> Tensor<B, 5> {
        let z = tanh(self.w_s1.forward(channels_last(hidden)));
        softmax(self.w_s2.forward(z), 1)
    }

    pub fn forward(&self, hidden: Tensor<B, 5>) -> Tensor<B, 5> {
        let hidden = channels_last(hidden);
        let z = tanh(self.w_s1.forward(hidden.clone()));
        let weights = softmax(self.w_s2.forward(z), 1);
        channels_first(weights * hidden)
    }
}
