use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub lr: f64,
    /// SGD only.
    pub momentum: f64,
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            lr: 1e-3,
            momentum: 0.9,
            weight_decay: 0.0,
        }
    }
}

type StepFn<M> = Box<dyn FnMut(f64, M, GradientsParams) -> M>;

/// Type-erased optimizer over module `M`, built from [`OptimizerConfig`].
pub struct SegOptimizer<M> {
    kind: OptimizerKind,
    lr: f64,
    step: StepFn<M>,
}

/// Plain heavy-ball momentum: no dampening, no Nesterov.
fn sgd_momentum(cfg: &OptimizerConfig) -> Option<MomentumConfig> {
    (cfg.momentum > 0.0).then(|| {
        MomentumConfig::new()
            .with_momentum(cfg.momentum)
            .with_dampening(0.0)
    })
}

impl<M> SegOptimizer<M> {
    pub fn new<B>(cfg: &OptimizerConfig) -> Self
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + 'static,
    {
        let decay = (cfg.weight_decay > 0.0).then(|| WeightDecayConfig::new(cfg.weight_decay as f32));
        let step: StepFn<M> = match cfg.kind {
            OptimizerKind::Adam => {
                let mut optim = AdamConfig::new().with_weight_decay(decay).init::<B, M>();
                Box::new(move |lr, module, grads| optim.step(lr, module, grads))
            }
            OptimizerKind::Sgd => {
                let mut optim = SgdConfig::new()
                    .with_momentum(sgd_momentum(cfg))
                    .with_weight_decay(decay)
                    .init::<B, M>();
                Box::new(move |lr, module, grads| optim.step(lr, module, grads))
            }
        };
        Self {
            kind: cfg.kind,
            lr: cfg.lr,
            step,
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn step(&mut self, module: M, grads: GradientsParams) -> M {
        (self.step)(self.lr, module, grads)
    }
}
