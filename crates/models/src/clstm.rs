use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::tensor::activation::{sigmoid, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::ModelConfigError;

/// Hidden and cell state of one ConvLSTM layer, each `[batch, hidden, height, width]`.
pub type LstmState<B> = (Tensor<B, 4>, Tensor<B, 4>);

/// Single ConvLSTM cell: one convolution over `[x, h]` produces the four gates.
#[derive(Debug, Module)]
pub struct ConvLstmCell<B: Backend> {
    gates: Conv2d<B>,
    hidden_dim: usize,
}

impl<B: Backend> ConvLstmCell<B> {
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        kernel_size: usize,
        device: &B::Device,
    ) -> Result<Self, ModelConfigError> {
        if kernel_size % 2 == 0 {
            return Err(ModelConfigError::EvenKernel { kernel_size });
        }
        let padding = (kernel_size - 1) / 2;
        let gates = Conv2dConfig::new([input_dim + hidden_dim, 4 * hidden_dim], [kernel_size; 2])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(device);
        Ok(Self { gates, hidden_dim })
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Zero state matching a `[batch, _, height, width]` input.
    pub fn zero_state(&self, batch: usize, height: usize, width: usize, device: &B::Device) -> LstmState<B> {
        let shape = [batch, self.hidden_dim, height, width];
        (Tensor::zeros(shape, device), Tensor::zeros(shape, device))
    }

    /// One timestep. Gates are laid out `i, f, o, g` along the channel axis.
    pub fn forward(&self, input: Tensor<B, 4>, state: LstmState<B>) -> LstmState<B> {
        let (h, c) = state;
        let combined = Tensor::cat(vec![input, h], 1);
        let gates = self.gates.forward(combined);
        let hd = self.hidden_dim;

        let i = sigmoid(gates.clone().narrow(1, 0, hd));
        let f = sigmoid(gates.clone().narrow(1, hd, hd));
        let o = sigmoid(gates.clone().narrow(1, 2 * hd, hd));
        let g = tanh(gates.narrow(1, 3 * hd, hd));

        let c_next = f * c + i * g;
        let h_next = o * tanh(c_next.clone());
        (h_next, c_next)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvLstmConfig {
    /// Bands per timestep.
    pub input_size: usize,
    /// Hidden channels per layer; a single entry is repeated for every layer.
    pub hidden_dims: Vec<usize>,
    /// Kernel size per layer; a single entry is repeated for every layer.
    pub kernel_sizes: Vec<usize>,
    pub num_layers: usize,
}

impl Default for ConvLstmConfig {
    fn default() -> Self {
        Self {
            input_size: 13,
            hidden_dims: vec![128],
            kernel_sizes: vec![3],
            num_layers: 1,
        }
    }
}

impl ConvLstmConfig {
    /// Per-layer `(hidden_dim, kernel_size)` after broadcasting single entries.
    pub fn layers(&self) -> Result<Vec<(usize, usize)>, ModelConfigError> {
        if self.num_layers == 0 {
            return Err(ModelConfigError::NoLayers);
        }
        let hidden = broadcast("hidden_dims", &self.hidden_dims, self.num_layers)?;
        let kernels = broadcast("kernel_sizes", &self.kernel_sizes, self.num_layers)?;
        if let Some(&zero) = hidden.iter().find(|h| **h == 0) {
            return Err(ModelConfigError::ZeroWidth { value: zero });
        }
        Ok(hidden.into_iter().zip(kernels).collect())
    }

    pub fn last_hidden_dim(&self) -> Result<usize, ModelConfigError> {
        self.layers()?
            .last()
            .map(|(h, _)| *h)
            .ok_or(ModelConfigError::NoLayers)
    }
}

fn broadcast(
    field: &'static str,
    values: &[usize],
    num_layers: usize,
) -> Result<Vec<usize>, ModelConfigError> {
    match values.len() {
        1 => Ok(vec![values[0]; num_layers]),
        n if n == num_layers => Ok(values.to_vec()),
        n => Err(ModelConfigError::LayerMismatch {
            field,
            got: n,
            num_layers,
        }),
    }
}

/// Stacked ConvLSTM over `[batch, time, channels, height, width]` sequences.
#[derive(Debug, Module)]
pub struct ConvLstm<B: Backend> {
    cells: Vec<ConvLstmCell<B>>,
}

impl<B: Backend> ConvLstm<B> {
    pub fn new(cfg: &ConvLstmConfig, device: &B::Device) -> Result<Self, ModelConfigError> {
        let mut cells = Vec::new();
        let mut input_dim = cfg.input_size;
        for (hidden_dim, kernel_size) in cfg.layers()? {
            cells.push(ConvLstmCell::new(input_dim, hidden_dim, kernel_size, device)?);
            input_dim = hidden_dim;
        }
        Ok(Self { cells })
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    /// Returns the last layer's hidden output at every timestep `[B, T, C_last, H, W]`
    /// and the final `(h, c)` of each layer.
    pub fn forward(&self, inputs: Tensor<B, 5>) -> (Tensor<B, 5>, Vec<LstmState<B>>) {
        let [batch, steps, _, height, width] = inputs.dims();
        let device = inputs.device();

        let mut layer_input: Vec<Tensor<B, 4>> = (0..steps)
            .map(|t| inputs.clone().narrow(1, t, 1).squeeze::<4>(1))
            .collect();
        let mut last_states = Vec::with_capacity(self.cells.len());

        for cell in &self.cells {
            let mut state = cell.zero_state(batch, height, width, &device);
            let mut outputs = Vec::with_capacity(steps);
            for x in layer_input {
                state = cell.forward(x, state);
                outputs.push(state.0.clone());
            }
            last_states.push(state);
            layer_input = outputs;
        }

        (Tensor::stack(layer_input, 1), last_states)
    }
}
