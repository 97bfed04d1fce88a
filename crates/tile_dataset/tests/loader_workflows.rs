use burn_ndarray::NdArray;
use tile_dataset::{
    class_counts, index_split, write_split, LoaderConfig, Split, SplitLoaders, SyntheticTiles,
    TileDatasetError, TileLoader,
};

type B = NdArray<f32>;

#[test]
fn written_splits_load_back_into_loaders() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let gen = SyntheticTiles::default();
    write_split(tmp.path(), Split::Train, &gen.generate(5))?;
    write_split(tmp.path(), Split::Val, &gen.generate(2))?;

    assert_eq!(index_split(tmp.path(), Split::Train)?.len(), 5);
    let loaders = SplitLoaders::from_root(tmp.path(), gen.num_classes, Some(1))?;
    assert_eq!(loaders.train.len(), 5);
    assert_eq!(loaders.val.len(), 2);
    assert!(loaders.test.is_empty());
    Ok(())
}

#[test]
fn batches_cover_the_split_and_encode_targets() -> anyhow::Result<()> {
    let gen = SyntheticTiles {
        cloud_prob: 0.5,
        ..SyntheticTiles::default()
    };
    let samples = gen.generate(5);
    let labeled: usize = samples.iter().map(|s| s.labeled_pixels()).sum();
    let mut loader = TileLoader::new(samples, LoaderConfig::new(gen.num_classes))?;
    let device = Default::default();

    let mut seen = 0;
    let mut hot = 0.0f32;
    while let Some(batch) = loader.next_batch::<B>(2, &device)? {
        let [b, t, c, h, w] = batch.inputs.dims();
        assert_eq!((t, c, h, w), (gen.timesteps, gen.bands, gen.height, gen.width));
        assert_eq!(batch.targets.dims(), [b, gen.num_classes, h, w]);
        assert!(batch.cloudmasks.is_some());
        hot += batch.targets.sum().into_scalar();
        seen += b;
    }
    assert_eq!(seen, 5);
    assert_eq!(hot as usize, labeled);

    loader.reset();
    assert!(loader.next_batch::<B>(8, &device)?.is_some());
    Ok(())
}

#[test]
fn shuffled_order_is_reproducible_per_seed() -> anyhow::Result<()> {
    let samples = SyntheticTiles::default().generate(6);
    let ids = |seed| -> anyhow::Result<Vec<String>> {
        let mut loader = TileLoader::new(samples.clone(), LoaderConfig::new(3).shuffled(Some(seed)))?;
        let batch = loader
            .next_batch::<B>(6, &Default::default())?
            .expect("non-empty split");
        Ok(batch.ids)
    };
    assert_eq!(ids(3)?, ids(3)?);
    Ok(())
}

#[test]
fn mixed_dims_within_a_batch_are_rejected() -> anyhow::Result<()> {
    let mut samples = SyntheticTiles::default().generate(1);
    let mut bigger = SyntheticTiles {
        width: 10,
        ..SyntheticTiles::default()
    }
    .generate(1);
    bigger[0].id = "wide".into();
    samples.append(&mut bigger);

    let mut loader = TileLoader::new(samples, LoaderConfig::new(3))?;
    let err = loader.next_batch::<B>(2, &Default::default()).err();
    assert!(matches!(err, Some(TileDatasetError::Shape(_))));
    Ok(())
}

#[test]
fn class_histogram_matches_labeled_pixels() {
    let samples = SyntheticTiles::default().generate(3);
    let counts = class_counts(&samples, 3);
    let labeled: usize = samples.iter().map(|s| s.labeled_pixels()).sum();
    assert_eq!(counts.iter().sum::<u64>() as usize, labeled);
}

#[test]
fn mixed_band_counts_within_a_split_are_rejected() {
    let mut samples = SyntheticTiles::default().generate(2);
    let mut wide = SyntheticTiles {
        bands: 5,
        ..SyntheticTiles::default()
    }
    .generate(1);
    wide[0].id = "five_bands".into();
    samples.append(&mut wide);

    let err = TileLoader::new(samples, LoaderConfig::new(3)).err();
    assert!(matches!(err, Some(TileDatasetError::Shape(_))));
}

#[test]
fn splits_must_agree_on_timesteps_and_bands() -> anyhow::Result<()> {
    let gen = SyntheticTiles::default();
    let other = SyntheticTiles {
        bands: 4,
        ..SyntheticTiles::default()
    };
    let err = SplitLoaders::from_samples(gen.generate(3), other.generate(1), vec![], 3, None).err();
    assert!(matches!(err, Some(TileDatasetError::Shape(_))));

    let loaders = SplitLoaders::from_samples(vec![], gen.generate(1), vec![], 3, None)?;
    assert_eq!(loaders.input_dims(), Some((gen.timesteps, gen.bands)));
    Ok(())
}

#[test]
fn writing_a_tile_with_a_path_like_id_fails() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut samples = SyntheticTiles::default().generate(1);
    samples[0].id = "../escaped".into();
    let err = write_split(tmp.path(), Split::Train, &samples).err();
    assert!(matches!(err, Some(TileDatasetError::Validation { .. })));
    assert!(!tmp.path().join("escaped.json").exists());
    Ok(())
}
