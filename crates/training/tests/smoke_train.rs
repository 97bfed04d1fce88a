use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn_ndarray::NdArray;
use cli_support::OutputOpts;
use models::{ClstmSegmenter, ClstmSegmenterConfig};
use tile_dataset::{SplitLoaders, SyntheticTiles};
use training::{
    evaluate_split, load_segmenter_from_checkpoint, save_segmenter, train_dl_model, EpochRecord,
    ExperimentLogger, LossConfig, SegLoss, TrainSettings,
};

type B = Autodiff<NdArray<f32>>;

fn tiles() -> SyntheticTiles {
    SyntheticTiles {
        timesteps: 3,
        bands: 2,
        height: 4,
        width: 4,
        num_classes: 3,
        ..SyntheticTiles::default()
    }
}

fn small_cfg() -> ClstmSegmenterConfig {
    ClstmSegmenterConfig {
        input_size: 2,
        hidden_dims: vec![4],
        num_classes: 3,
        ..ClstmSegmenterConfig::default()
    }
}

fn loaders() -> anyhow::Result<SplitLoaders> {
    let gen = tiles();
    let val = SyntheticTiles { seed: 8, ..gen.clone() };
    Ok(SplitLoaders::from_samples(
        gen.generate(4),
        val.generate(2),
        Vec::new(),
        gen.num_classes,
        Some(1),
    )?)
}

#[test]
fn dl_training_writes_checkpoints_and_metrics() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let device = Default::default();
    let mut loaders = loaders()?;
    let model = ClstmSegmenter::<B>::new(&small_cfg(), &device)?;
    let settings = TrainSettings {
        epochs: 2,
        batch_size: 2,
        num_classes: 3,
        save_best: true,
        ..TrainSettings::default()
    };
    let output = OutputOpts::new(tmp.path(), "smoke");
    let mut logger = ExperimentLogger::create(&output)?;

    let trained = train_dl_model(model, &mut loaders, &settings, &output, &mut logger, &device)?;

    assert_eq!(logger.series("train_loss").len(), 2);
    assert_eq!(logger.series("val_f1").len(), 2);
    // 4 train tiles in batches of 2, over 2 epochs.
    assert_eq!(logger.series("train_gradnorm").len(), 4);
    assert!(logger.series("train_gradnorm").iter().all(|g| g.is_finite()));
    assert!(logger.series("val_loss").iter().all(|l| l.is_finite() && *l > 0.0));
    assert_eq!(logger.batches_seen(), 2 * (2 + 1));

    let lines = std::fs::read_to_string(tmp.path().join("smoke_metrics.jsonl"))?;
    let records: Vec<EpochRecord> = lines
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(records.len(), 4);

    assert!(tmp.path().join("smoke_best.bin").exists());
    let best_dir = tmp.path().join("smoke_best_dir");
    assert!(best_dir.join("epoch_val.json").exists());
    assert!(best_dir.join("epoch_train.json").exists());
    assert!(best_dir.join("batch_val.json").exists());

    save_segmenter(&trained, &output.checkpoint_path())?;
    assert!(tmp.path().join("smoke.bin").exists());
    Ok(())
}

#[test]
fn reloaded_checkpoint_scores_like_the_trained_model() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let device = Default::default();
    let mut loaders = loaders()?;
    let settings = TrainSettings {
        epochs: 1,
        batch_size: 2,
        num_classes: 3,
        ..TrainSettings::default()
    };
    let output = OutputOpts::new(tmp.path(), "reload");
    let mut logger = ExperimentLogger::in_memory();
    let model = ClstmSegmenter::<B>::new(&small_cfg(), &device)?;
    let trained = train_dl_model(model, &mut loaders, &settings, &output, &mut logger, &device)?;

    let path = output.checkpoint_path();
    save_segmenter(&trained, &path)?;
    let loaded = load_segmenter_from_checkpoint::<NdArray<f32>>(&small_cfg(), &path, &device)?;

    let loss_fn = SegLoss::new(&LossConfig::default(), None);
    let expected = evaluate_split(&trained.valid(), &mut loaders.val, 2, &device, &loss_fn)?;
    let actual = evaluate_split(&loaded, &mut loaders.val, 2, &device, &loss_fn)?;
    assert!((expected.loss_per_pixel - actual.loss_per_pixel).abs() < 1e-5);
    assert_eq!(expected.accuracy, actual.accuracy);
    assert_eq!(expected.mean_f1, actual.mean_f1);
    Ok(())
}

#[test]
fn eval_on_test_runs_a_single_pass() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let device = Default::default();
    let gen = tiles();
    let mut loaders = SplitLoaders::from_samples(Vec::new(), Vec::new(), gen.generate(3), 3, None)?;
    let settings = TrainSettings {
        epochs: 5,
        batch_size: 2,
        num_classes: 3,
        eval_on_test: true,
        ..TrainSettings::default()
    };
    let output = OutputOpts::new(tmp.path(), "test_only");
    let mut logger = ExperimentLogger::in_memory();
    let model = ClstmSegmenter::<B>::new(&small_cfg(), &device)?;
    train_dl_model(model, &mut loaders, &settings, &output, &mut logger, &device)?;

    assert_eq!(logger.series("test_loss").len(), 1);
    assert!(logger.series("train_loss").is_empty());
    assert!(logger.series("train_gradnorm").is_empty());
    assert!(!tmp.path().join("test_only_best.bin").exists());
    Ok(())
}

#[test]
fn unlabeled_batches_skip_updates_and_metrics() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let device = Default::default();
    let gen = tiles();
    let mut train = gen.generate(3);
    train[1].labels.iter_mut().for_each(|l| *l = -1);
    let labeled: u64 = train.iter().map(|s| s.labeled_pixels() as u64).sum();
    let val = SyntheticTiles { seed: 8, ..gen.clone() }.generate(1);
    let mut loaders = SplitLoaders::from_samples(train, val, Vec::new(), 3, Some(2))?;

    let settings = TrainSettings {
        epochs: 1,
        batch_size: 1,
        num_classes: 3,
        ..TrainSettings::default()
    };
    let output = OutputOpts::new(tmp.path(), "sparse");
    let mut logger = ExperimentLogger::create(&output)?;
    let model = ClstmSegmenter::<B>::new(&small_cfg(), &device)?;
    train_dl_model(model, &mut loaders, &settings, &output, &mut logger, &device)?;

    assert_eq!(logger.series("train_gradnorm").len(), 2);
    assert_eq!(logger.batches_seen(), 3 + 1);
    let lines = std::fs::read_to_string(tmp.path().join("sparse_metrics.jsonl"))?;
    let records: Vec<EpochRecord> = lines
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let train_record = records
        .iter()
        .find(|r| r.split == tile_dataset::Split::Train)
        .expect("train record");
    assert_eq!(train_record.pixels, labeled);
    assert_eq!(train_record.confusion.iter().flatten().sum::<u64>(), labeled);
    Ok(())
}

#[test]
fn a_fully_unlabeled_train_split_leaves_weights_untouched() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let device = Default::default();
    let mut train = tiles().generate(2);
    for tile in &mut train {
        tile.labels.iter_mut().for_each(|l| *l = -1);
    }
    let mut loaders = SplitLoaders::from_samples(train, Vec::new(), Vec::new(), 3, None)?;
    let settings = TrainSettings {
        epochs: 2,
        batch_size: 1,
        num_classes: 3,
        ..TrainSettings::default()
    };
    let output = OutputOpts::new(tmp.path(), "blank");
    let mut logger = ExperimentLogger::in_memory();
    let model = ClstmSegmenter::<B>::new(&small_cfg(), &device)?;
    let head = |m: &ClstmSegmenter<B>| m.head().weight.val().into_data().to_vec::<f32>().unwrap();
    let before = head(&model);

    let trained = train_dl_model(model, &mut loaders, &settings, &output, &mut logger, &device)?;

    assert!(logger.series("train_gradnorm").is_empty());
    assert_eq!(head(&trained), before);
    Ok(())
}
