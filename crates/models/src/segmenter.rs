use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::attention::{TemporalAttention, VectorAttention};
use crate::clstm::{ConvLstm, ConvLstmConfig};
use crate::ModelConfigError;

/// How the time axis is collapsed before the segmentation head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalPooling {
    /// Sum of [`VectorAttention`]-reweighted outputs.
    #[default]
    VectorAttention,
    /// Sum of [`TemporalAttention`]-reweighted outputs.
    TemporalAttention,
    /// Final hidden state of the last layer.
    LastState,
    /// Mean of the last layer's outputs over time.
    Mean,
}

/// Pooling stage; at most one attention module is populated.
#[derive(Debug, Module)]
pub struct TimePooling<B: Backend> {
    vector: Option<VectorAttention<B>>,
    temporal: Option<TemporalAttention<B>>,
    mean: bool,
}

impl<B: Backend> TimePooling<B> {
    pub fn new(
        kind: TemporalPooling,
        hidden_dim: usize,
        device: &B::Device,
    ) -> Result<Self, ModelConfigError> {
        let mut pooling = Self {
            vector: None,
            temporal: None,
            mean: false,
        };
        match kind {
            TemporalPooling::VectorAttention => {
                pooling.vector = Some(VectorAttention::new(hidden_dim, device));
            }
            TemporalPooling::TemporalAttention => {
                pooling.temporal = Some(TemporalAttention::new(
                    hidden_dim,
                    TemporalAttention::<B>::DEFAULT_D,
                    TemporalAttention::<B>::DEFAULT_R,
                    device,
                )?);
            }
            TemporalPooling::Mean => pooling.mean = true,
            TemporalPooling::LastState => {}
        }
        Ok(pooling)
    }

    /// `[B, T, C, H, W] -> [B, C, H, W]`.
    pub fn forward(&self, outputs: Tensor<B, 5>) -> Tensor<B, 4> {
        if let Some(att) = &self.vector {
            return att.forward(outputs).sum_dim(1).squeeze::<4>(1);
        }
        if let Some(att) = &self.temporal {
            return att.forward(outputs).sum_dim(1).squeeze::<4>(1);
        }
        if self.mean {
            return outputs.mean_dim(1).squeeze::<4>(1);
        }
        let steps = outputs.dims()[1];
        outputs.narrow(1, steps - 1, 1).squeeze::<4>(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClstmSegmenterConfig {
    pub input_size: usize,
    pub hidden_dims: Vec<usize>,
    pub lstm_kernel_sizes: Vec<usize>,
    pub conv_kernel_size: usize,
    pub lstm_num_layers: usize,
    pub num_classes: usize,
    pub bidirectional: bool,
    pub pooling: TemporalPooling,
    /// Emit raw class scores instead of log-probabilities.
    pub early_feats: bool,
}

impl Default for ClstmSegmenterConfig {
    fn default() -> Self {
        Self {
            input_size: 13,
            hidden_dims: vec![128],
            lstm_kernel_sizes: vec![3],
            conv_kernel_size: 3,
            lstm_num_layers: 1,
            num_classes: 4,
            bidirectional: false,
            pooling: TemporalPooling::default(),
            early_feats: false,
        }
    }
}

impl ClstmSegmenterConfig {
    pub fn lstm(&self) -> ConvLstmConfig {
        ConvLstmConfig {
            input_size: self.input_size,
            hidden_dims: self.hidden_dims.clone(),
            kernel_sizes: self.lstm_kernel_sizes.clone(),
            num_layers: self.lstm_num_layers,
        }
    }

    pub fn validate(&self) -> Result<(), ModelConfigError> {
        self.lstm().layers()?;
        if self.num_classes < 2 {
            return Err(ModelConfigError::TooFewClasses {
                num_classes: self.num_classes,
            });
        }
        if self.conv_kernel_size % 2 == 0 {
            return Err(ModelConfigError::EvenKernel {
                kernel_size: self.conv_kernel_size,
            });
        }
        Ok(())
    }
}

/// ConvLSTM encoder, temporal pooling, and a convolutional per-pixel classifier.
#[derive(Debug, Module)]
pub struct ClstmSegmenter<B: Backend> {
    clstm: ConvLstm<B>,
    pool: TimePooling<B>,
    clstm_rev: Option<ConvLstm<B>>,
    pool_rev: Option<TimePooling<B>>,
    head: Conv2d<B>,
    input_size: usize,
    num_classes: usize,
    early_feats: bool,
}

impl<B: Backend> ClstmSegmenter<B> {
    pub fn new(cfg: &ClstmSegmenterConfig, device: &B::Device) -> Result<Self, ModelConfigError> {
        cfg.validate()?;
        let lstm_cfg = cfg.lstm();
        let hidden = lstm_cfg.last_hidden_dim()?;

        let clstm = ConvLstm::new(&lstm_cfg, device)?;
        let pool = TimePooling::new(cfg.pooling, hidden, device)?;
        let (clstm_rev, pool_rev) = if cfg.bidirectional {
            (
                Some(ConvLstm::new(&lstm_cfg, device)?),
                Some(TimePooling::new(cfg.pooling, hidden, device)?),
            )
        } else {
            (None, None)
        };

        let in_channels = if cfg.bidirectional { hidden * 2 } else { hidden };
        let padding = (cfg.conv_kernel_size - 1) / 2;
        let head = Conv2dConfig::new(
            [in_channels, cfg.num_classes],
            [cfg.conv_kernel_size; 2],
        )
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device);

        Ok(Self {
            clstm,
            pool,
            clstm_rev,
            pool_rev,
            head,
            input_size: cfg.input_size,
            num_classes: cfg.num_classes,
            early_feats: cfg.early_feats,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn is_bidirectional(&self) -> bool {
        self.clstm_rev.is_some()
    }

    /// Bands expected on axis 2 of the input.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Head convolution; exposed for gradient-norm bookkeeping.
    pub fn head(&self) -> &Conv2d<B> {
        &self.head
    }

    /// `[B, T, C, H, W] -> [B, num_classes, H, W]`, log-probabilities unless `early_feats`.
    pub fn forward(&self, inputs: Tensor<B, 5>) -> Tensor<B, 4> {
        let scores = self.scores(inputs);
        if self.early_feats {
            scores
        } else {
            log_softmax(scores, 1)
        }
    }

    /// Class log-probabilities regardless of `early_feats`.
    pub fn log_probs(&self, inputs: Tensor<B, 5>) -> Tensor<B, 4> {
        log_softmax(self.scores(inputs), 1)
    }

    fn scores(&self, inputs: Tensor<B, 5>) -> Tensor<B, 4> {
        let reversed = self.clstm_rev.as_ref().map(|_| reverse_time(inputs.clone()));
        let (outputs, _) = self.clstm.forward(inputs);
        let mut state = self.pool.forward(outputs);

        if let (Some(rev), Some(pool_rev), Some(reversed)) =
            (&self.clstm_rev, &self.pool_rev, reversed)
        {
            let (rev_outputs, _) = rev.forward(reversed);
            state = Tensor::cat(vec![state, pool_rev.forward(rev_outputs)], 1);
        }

        self.head.forward(state)
    }
}

fn reverse_time<B: Backend>(inputs: Tensor<B, 5>) -> Tensor<B, 5> {
    let steps = inputs.dims()[1];
    let frames = (0..steps)
        .rev()
        .map(|t| inputs.clone().narrow(1, t, 1))
        .collect();
    Tensor::cat(frames, 1)
}
