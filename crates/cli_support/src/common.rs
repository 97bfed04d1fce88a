use clap::Args;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Experiment output location shared by train/eval binaries.
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Directory for checkpoints, metrics, and best-epoch dumps.
    #[arg(long, default_value = "runs")]
    pub save_dir: PathBuf,
    /// Experiment name; defaults to "<timestamp>_<model>".
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutputOpts {
    pub save_dir: PathBuf,
    pub name: String,
}

impl OutputArgs {
    pub fn resolve(&self, model_name: &str) -> OutputOpts {
        let name = self.name.clone().unwrap_or_else(|| default_run_name(model_name));
        OutputOpts {
            save_dir: self.save_dir.clone(),
            name,
        }
    }
}

impl OutputOpts {
    pub fn new(save_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            save_dir: save_dir.into(),
            name: name.into(),
        }
    }

    /// `<save_dir>/<name><suffix>`.
    pub fn path_with_suffix(&self, suffix: &str) -> PathBuf {
        self.save_dir.join(format!("{}{suffix}", self.name))
    }

    /// Final checkpoint path (`burn` appends its own extension).
    pub fn checkpoint_path(&self) -> PathBuf {
        self.path_with_suffix("")
    }

    pub fn best_checkpoint_path(&self) -> PathBuf {
        self.path_with_suffix("_best")
    }

    pub fn best_dir(&self) -> PathBuf {
        self.path_with_suffix("_best_dir")
    }
}

pub fn default_run_name(model_name: &str) -> String {
    format!(
        "{}_{model_name}",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Seed passed on the CLI.
#[derive(Debug, Clone, Copy, Args)]
pub struct SeedArgs {
    /// Seed for backend init, shuffling, and synthetic data.
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Resolve seed from CLI, then env (`CLSTM_SEED`), else time.
pub fn resolve_seed(cli_seed: Option<u64>) -> u64 {
    if let Some(s) = cli_seed {
        return s;
    }
    if let Ok(env_seed) = std::env::var("CLSTM_SEED") {
        if let Ok(parsed) = env_seed.parse::<u64>() {
            return parsed;
        }
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

/// Verbosity flag; `RUST_LOG` wins when set.
#[derive(Debug, Clone, Copy, Args)]
pub struct LogArgs {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl LogArgs {
    pub fn level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

pub fn init_tracing(log: &LogArgs) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.level().as_str().to_ascii_lowercase()));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
