pub mod common;

pub use common::{
    default_run_name, init_tracing, resolve_seed, LogArgs, OutputArgs, OutputOpts, SeedArgs,
};
