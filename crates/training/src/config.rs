//! Optional TOML defaults for `train`; explicit CLI flags take precedence.

use clap::parser::ValueSource;
use clap::ArgMatches;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{TrainError, TrainResult};
use crate::loss::LossKind;
use crate::optim::OptimizerKind;
use crate::util::{ModelKind, PoolingKind, TrainArgs};

pub const CONFIG_ENV: &str = "CLSTM_TRAIN_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfigFile {
    pub model: Option<ModelKind>,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub lr: Option<f64>,
    pub momentum: Option<f64>,
    pub weight_decay: Option<f64>,
    pub optimizer: Option<OptimizerKind>,
    pub loss: Option<LossKind>,
    pub loss_weight: Option<bool>,
    pub weight_scale: Option<f32>,
    pub gamma: Option<f32>,
    pub hidden_dims: Option<Vec<usize>>,
    pub lstm_kernel_sizes: Option<Vec<usize>>,
    pub conv_kernel_size: Option<usize>,
    pub lstm_num_layers: Option<usize>,
    pub num_classes: Option<usize>,
    pub bidirectional: Option<bool>,
    pub pooling: Option<PoolingKind>,
    pub early_feats: Option<bool>,
    pub num_repeat: Option<usize>,
    pub save_best: Option<bool>,
    pub seed: Option<u64>,
    pub dataset_root: Option<PathBuf>,
    pub synthetic: Option<usize>,
}

impl TrainConfigFile {
    pub fn from_path(path: &Path) -> TrainResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| TrainError::io(path, e))?;
        toml::from_str(&raw)
            .map_err(|e| TrainError::Config(format!("{}: {e}", path.display())))
    }

    /// `--config` if given, else `CLSTM_TRAIN_CONFIG`.
    pub fn locate(cli: Option<&Path>) -> Option<PathBuf> {
        cli.map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    /// Loads the located file, if any.
    pub fn load(cli: Option<&Path>) -> TrainResult<Option<Self>> {
        Self::locate(cli).map(|p| Self::from_path(&p)).transpose()
    }

    /// Fills every field the user did not pass on the command line.
    pub fn apply(&self, args: &mut TrainArgs, matches: &ArgMatches) {
        let from_cli = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);

        macro_rules! fill {
            ($id:literal, opt $field:expr, $value:expr) => {
                if let Some(v) = $value.clone() {
                    if !from_cli($id) {
                        $field = Some(v);
                    }
                }
            };
            ($id:literal, $field:expr, $value:expr) => {
                if let Some(v) = $value.clone() {
                    if !from_cli($id) {
                        $field = v;
                    }
                }
            };
        }

        fill!("model", args.model.model, self.model);
        fill!("epochs", args.epochs, self.epochs);
        fill!("batch_size", args.batch_size, self.batch_size);
        fill!("lr", args.lr, self.lr);
        fill!("momentum", args.momentum, self.momentum);
        fill!("weight_decay", args.weight_decay, self.weight_decay);
        fill!("optimizer", args.optimizer, self.optimizer);
        fill!("loss", args.loss, self.loss);
        fill!("loss_weight", args.loss_weight, self.loss_weight);
        fill!("weight_scale", args.weight_scale, self.weight_scale);
        fill!("gamma", args.gamma, self.gamma);
        fill!("hidden_dims", args.model.hidden_dims, self.hidden_dims);
        fill!("lstm_kernel_sizes", args.model.lstm_kernel_sizes, self.lstm_kernel_sizes);
        fill!("conv_kernel_size", args.model.conv_kernel_size, self.conv_kernel_size);
        fill!("lstm_num_layers", args.model.lstm_num_layers, self.lstm_num_layers);
        fill!("num_classes", args.model.num_classes, self.num_classes);
        fill!("bidirectional", args.model.bidirectional, self.bidirectional);
        fill!("pooling", args.model.pooling, self.pooling);
        fill!("early_feats", args.model.early_feats, self.early_feats);
        fill!("num_repeat", args.num_repeat, self.num_repeat);
        fill!("save_best", args.save_best, self.save_best);
        fill!("seed", opt args.seed.seed, self.seed);
        fill!("dataset_root", opt args.data.dataset_root, self.dataset_root);
        fill!("synthetic", opt args.data.synthetic, self.synthetic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    fn parse(argv: &[&str]) -> (TrainArgs, ArgMatches) {
        let matches = TrainArgs::command().get_matches_from(argv);
        let args = TrainArgs::from_arg_matches(&matches).unwrap();
        (args, matches)
    }

    #[test]
    fn file_fills_defaults_but_not_explicit_flags() {
        let file: TrainConfigFile = toml::from_str(
            r#"
            epochs = 7
            lr = 0.01
            optimizer = "sgd"
            hidden_dims = [16, 8]
            pooling = "mean"
            "#,
        )
        .unwrap();
        let (mut args, matches) = parse(&["train", "--epochs", "2"]);
        file.apply(&mut args, &matches);

        assert_eq!(args.epochs, 2);
        assert!((args.lr - 0.01).abs() < 1e-12);
        assert_eq!(args.optimizer, OptimizerKind::Sgd);
        assert_eq!(args.model.hidden_dims, vec![16, 8]);
        assert_eq!(args.model.pooling, PoolingKind::Mean);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<TrainConfigFile>("learning_rate = 1.0").is_err());
    }

    #[test]
    fn cli_path_beats_env() {
        let path = TrainConfigFile::locate(Some(Path::new("a.toml")));
        assert_eq!(path, Some(PathBuf::from("a.toml")));
    }
}
