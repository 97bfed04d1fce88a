use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use cli_support::OutputOpts;
use tile_dataset::{Split, SplitLoaders, SyntheticTiles};
use training::{
    train, train_non_dl_model, ExperimentLogger, NearestCentroid, NonDlClassifier, NonDlModel,
    TrainError, TrainSettings, TrainableModel,
};

type B = Autodiff<NdArray<f32>>;

fn loaders() -> anyhow::Result<SplitLoaders> {
    let gen = SyntheticTiles::default();
    let val = SyntheticTiles { seed: 11, ..gen.clone() };
    Ok(SplitLoaders::from_samples(
        gen.generate(3),
        val.generate(2),
        Vec::new(),
        gen.num_classes,
        None,
    )?)
}

#[test]
fn nearest_centroid_separates_synthetic_classes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let loaders = loaders()?;
    let settings = TrainSettings {
        num_classes: 3,
        num_repeat: 2,
        ..TrainSettings::default()
    };
    let output = OutputOpts::new(tmp.path(), "centroid");
    let mut model = NonDlClassifier::NearestCentroid(NearestCentroid::new(3));

    let summaries = train_non_dl_model(&mut model, &loaders, &settings, &output)?;

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].split, Split::Train);
    for summary in &summaries {
        assert!(summary.acc_mean > 0.9, "{summary:?}");
        assert!(summary.acc_std.abs() < 1e-6);
    }

    let saved = NonDlClassifier::load_json(&tmp.path().join("centroid_model.json"))?;
    assert_eq!(saved.name(), "nearest_centroid");
    Ok(())
}

#[test]
fn train_requires_settings_and_loaders() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let output = OutputOpts::new(tmp.path(), "missing");
    let mut logger = ExperimentLogger::in_memory();
    let device = Default::default();
    let model = TrainableModel::<B>::NonDl(NonDlClassifier::NearestCentroid(NearestCentroid::new(3)));

    let mut loaders = loaders()?;
    let err = train::<B>(model, None, Some(&mut loaders), &output, &mut logger, &device);
    assert!(matches!(err, Err(TrainError::Missing(_))));

    let model = TrainableModel::<B>::NonDl(NonDlClassifier::NearestCentroid(NearestCentroid::new(3)));
    let err = train::<B>(model, Some(&TrainSettings::default()), None, &output, &mut logger, &device);
    assert!(matches!(err, Err(TrainError::Missing(_))));
    Ok(())
}
