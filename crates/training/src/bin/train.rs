use clap::{CommandFactory, FromArgMatches};
use training::config::TrainConfigFile;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    let matches = TrainArgs::command().get_matches();
    let mut args = TrainArgs::from_arg_matches(&matches)?;
    cli_support::init_tracing(&args.log);
    if let Some(file) = TrainConfigFile::load(args.config.as_deref())? {
        file.apply(&mut args, &matches);
    }
    run_train(args)?;
    Ok(())
}
