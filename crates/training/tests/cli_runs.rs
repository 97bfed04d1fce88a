use clap::Parser;
use tile_dataset::Split;
use training::{run_eval, run_train, EpochRecord, EvalArgs, TrainArgs};

#[test]
fn train_then_eval_from_the_command_line() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let save_dir = tmp.path().to_string_lossy().into_owned();
    let args = TrainArgs::parse_from([
        "train",
        "--synthetic",
        "4",
        "--hidden-dims",
        "4",
        "--num-classes",
        "3",
        "--epochs",
        "1",
        "--batch-size",
        "2",
        "--seed",
        "3",
        "--save-dir",
        &save_dir,
        "--name",
        "cli",
    ]);
    let output = run_train(args)?;
    assert_eq!(output.name, "cli");
    assert!(tmp.path().join("cli.bin").exists());
    assert!(tmp.path().join("cli_config.json").exists());
    assert!(tmp.path().join("cli_metrics.jsonl").exists());

    let checkpoint = tmp.path().join("cli").to_string_lossy().into_owned();
    let config = tmp.path().join("cli_config.json").to_string_lossy().into_owned();
    let report = run_eval(EvalArgs::parse_from([
        "eval",
        "--synthetic",
        "4",
        "--seed",
        "3",
        "--checkpoint",
        &checkpoint,
        "--model-config",
        &config,
        "--split",
        "val",
    ]))?;
    assert_eq!(report.split, Split::Val);
    assert!(report.loss_per_pixel.is_some_and(|l| l.is_finite()));
    assert!((0.0..=1.0).contains(&report.accuracy));
    Ok(())
}

#[test]
fn majority_baseline_trains_and_evaluates() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let save_dir = tmp.path().to_string_lossy().into_owned();
    run_train(TrainArgs::parse_from([
        "train",
        "--model",
        "majority-class",
        "--synthetic",
        "4",
        "--num-classes",
        "3",
        "--seed",
        "5",
        "--save-dir",
        &save_dir,
        "--name",
        "maj",
    ]))?;
    let model = tmp.path().join("maj_model.json").to_string_lossy().into_owned();
    let report = run_eval(EvalArgs::parse_from([
        "eval",
        "--model",
        "majority-class",
        "--synthetic",
        "4",
        "--num-classes",
        "3",
        "--seed",
        "5",
        "--checkpoint",
        &model,
    ]))?;
    assert_eq!(report.split, Split::Test);
    assert!(report.loss_per_pixel.is_none());
    Ok(())
}

#[test]
fn input_size_that_disagrees_with_the_tiles_is_an_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let save_dir = tmp.path().to_string_lossy().into_owned();
    let result = run_train(TrainArgs::parse_from([
        "train",
        "--synthetic",
        "2",
        "--input-size",
        "5",
        "--hidden-dims",
        "4",
        "--num-classes",
        "3",
        "--save-dir",
        &save_dir,
        "--name",
        "bands",
    ]));
    let err = result.err().map(|e| e.to_string()).unwrap_or_default();
    assert!(err.contains("bands"), "{err}");
    assert!(!tmp.path().join("bands.bin").exists());
    Ok(())
}

#[test]
fn weighted_eval_reproduces_the_weighted_validation_loss() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let save_dir = tmp.path().to_string_lossy().into_owned();
    let common = ["--synthetic", "4", "--seed", "11", "--num-classes", "3"];
    let mut train_argv = vec!["train", "--hidden-dims", "4", "--epochs", "1", "--loss-weight"];
    train_argv.extend(common);
    train_argv.extend(["--save-dir", &save_dir, "--name", "weighted"]);
    run_train(TrainArgs::parse_from(train_argv))?;

    let raw = std::fs::read_to_string(tmp.path().join("weighted_metrics.jsonl"))?;
    let val = raw
        .lines()
        .map(serde_json::from_str::<EpochRecord>)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .find(|r| r.split == Split::Val)
        .expect("val record");

    let checkpoint = tmp.path().join("weighted").to_string_lossy().into_owned();
    let config = tmp.path().join("weighted_config.json").to_string_lossy().into_owned();
    let eval = |weighted: bool| -> anyhow::Result<f32> {
        let mut argv = vec![
            "eval",
            "--checkpoint",
            &checkpoint,
            "--model-config",
            &config,
            "--split",
            "val",
        ];
        argv.extend(common);
        if weighted {
            argv.push("--loss-weight");
        }
        let report = run_eval(EvalArgs::parse_from(argv))?;
        Ok(report.loss_per_pixel.expect("dl loss"))
    };

    let weighted = eval(true)?;
    assert!((weighted - val.loss).abs() < 1e-4 * val.loss.abs().max(1.0), "{weighted} vs {}", val.loss);
    assert!(eval(false)?.is_finite());
    Ok(())
}
