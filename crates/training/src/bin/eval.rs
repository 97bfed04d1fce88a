use clap::Parser;
use training::util::{run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    let args = EvalArgs::parse();
    cli_support::init_tracing(&args.log);
    let report = run_eval(args)?;
    println!(
        "{} accuracy={:.4} f1={:.4}{}",
        report.split,
        report.accuracy,
        report.mean_f1,
        report
            .loss_per_pixel
            .map(|l| format!(" loss/pixel={l:.4}"))
            .unwrap_or_default()
    );
    Ok(())
}
