//! Batch iteration over in-memory tiles.

use crate::store::load_split;
use crate::types::{DatasetResult, Split, TileDatasetError, TileSample};
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub num_classes: usize,
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl LoaderConfig {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            shuffle: false,
            seed: None,
        }
    }

    pub fn shuffled(mut self, seed: Option<u64>) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }
}

pub struct TileBatch<B: Backend> {
    /// `[batch, time, bands, height, width]`.
    pub inputs: Tensor<B, 5>,
    /// One-hot `[batch, classes, height, width]`; all zeros at unlabeled pixels.
    pub targets: Tensor<B, 4>,
    /// Flat `[batch, height, width]` labels, negative where unlabeled.
    pub labels: Vec<i64>,
    /// `[batch, time, height, width]` when every sample in the batch carries a mask.
    pub cloudmasks: Option<Tensor<B, 4>>,
    pub ids: Vec<String>,
}

impl<B: Backend> TileBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn labeled_pixels(&self) -> usize {
        self.labels.iter().filter(|l| **l >= 0).count()
    }
}

pub struct TileLoader {
    samples: Vec<TileSample>,
    order: Vec<usize>,
    cursor: usize,
    cfg: LoaderConfig,
    rng: StdRng,
}

impl TileLoader {
    pub fn new(samples: Vec<TileSample>, cfg: LoaderConfig) -> DatasetResult<Self> {
        for sample in &samples {
            sample.validate(cfg.num_classes)?;
        }
        if let Some(first) = samples.first() {
            if let Some(odd) = samples.iter().find(|s| s.input_dims() != first.input_dims()) {
                return Err(TileDatasetError::Shape(format!(
                    "sample {} has (timesteps, bands) {:?}, split expects {:?}",
                    odd.id,
                    odd.input_dims(),
                    first.input_dims()
                )));
            }
        }
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let order = (0..samples.len()).collect();
        let mut loader = Self {
            samples,
            order,
            cursor: 0,
            cfg,
            rng,
        };
        loader.reset();
        Ok(loader)
    }

    pub fn from_root(root: &Path, split: Split, cfg: LoaderConfig) -> DatasetResult<Self> {
        let samples = load_split(root, split, cfg.num_classes)?;
        Self::new(samples, cfg)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.cfg.num_classes
    }

    pub fn samples(&self) -> &[TileSample] {
        &self.samples
    }

    /// `(timesteps, bands)` shared by every sample, `None` when empty.
    pub fn input_dims(&self) -> Option<(usize, usize)> {
        self.samples.first().map(TileSample::input_dims)
    }

    /// Rewinds to the start of the split, reshuffling when configured.
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.cfg.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<TileBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size.max(1)).min(self.order.len());
        let picked: Vec<&TileSample> = self.order[self.cursor..end]
            .iter()
            .map(|i| &self.samples[*i])
            .collect();
        self.cursor = end;
        assemble(&picked, self.cfg.num_classes, device).map(Some)
    }
}

fn assemble<B: Backend>(
    samples: &[&TileSample],
    num_classes: usize,
    device: &B::Device,
) -> DatasetResult<TileBatch<B>> {
    let Some(first) = samples.first() else {
        return Err(TileDatasetError::Other("cannot assemble empty batch".to_string()));
    };
    let [steps, bands, height, width] = first.dims();
    let pixels = height * width;
    let batch = samples.len();

    let mut inputs = Vec::with_capacity(batch * steps * bands * pixels);
    let mut targets = vec![0.0f32; batch * num_classes * pixels];
    let mut labels = Vec::with_capacity(batch * pixels);
    let mut masks = Vec::with_capacity(batch * steps * pixels);
    let mut all_masked = true;
    let mut ids = Vec::with_capacity(batch);

    for (b, sample) in samples.iter().enumerate() {
        if sample.dims() != first.dims() {
            return Err(TileDatasetError::Shape(format!(
                "sample {} has dims {:?}, batch expects {:?}",
                sample.id,
                sample.dims(),
                first.dims()
            )));
        }
        inputs.extend_from_slice(&sample.inputs);
        for (p, label) in sample.labels.iter().enumerate() {
            if *label >= 0 {
                targets[(b * num_classes + *label as usize) * pixels + p] = 1.0;
            }
        }
        labels.extend_from_slice(&sample.labels);
        match &sample.cloudmask {
            Some(mask) if all_masked => masks.extend_from_slice(mask),
            _ => all_masked = false,
        }
        ids.push(sample.id.clone());
    }

    let inputs = Tensor::<B, 1>::from_floats(inputs.as_slice(), device)
        .reshape([batch, steps, bands, height, width]);
    let targets = Tensor::<B, 1>::from_floats(targets.as_slice(), device)
        .reshape([batch, num_classes, height, width]);
    let cloudmasks = all_masked.then(|| {
        Tensor::<B, 1>::from_floats(masks.as_slice(), device).reshape([batch, steps, height, width])
    });

    Ok(TileBatch {
        inputs,
        targets,
        labels,
        cloudmasks,
        ids,
    })
}

/// Loaders for every split; missing splits are empty loaders.
pub struct SplitLoaders {
    pub train: TileLoader,
    pub val: TileLoader,
    pub test: TileLoader,
}

impl SplitLoaders {
    /// Train shuffles with `seed`; val and test keep file order.
    pub fn from_root(root: &Path, num_classes: usize, seed: Option<u64>) -> DatasetResult<Self> {
        Self {
            train: TileLoader::from_root(
                root,
                Split::Train,
                LoaderConfig::new(num_classes).shuffled(seed),
            )?,
            val: TileLoader::from_root(root, Split::Val, LoaderConfig::new(num_classes))?,
            test: TileLoader::from_root(root, Split::Test, LoaderConfig::new(num_classes))?,
        }
        .checked()
    }

    pub fn from_samples(
        train: Vec<TileSample>,
        val: Vec<TileSample>,
        test: Vec<TileSample>,
        num_classes: usize,
        seed: Option<u64>,
    ) -> DatasetResult<Self> {
        Self {
            train: TileLoader::new(train, LoaderConfig::new(num_classes).shuffled(seed))?,
            val: TileLoader::new(val, LoaderConfig::new(num_classes))?,
            test: TileLoader::new(test, LoaderConfig::new(num_classes))?,
        }
        .checked()
    }

    /// Every non-empty split must agree on `(timesteps, bands)`.
    fn checked(self) -> DatasetResult<Self> {
        let mut expected: Option<(Split, (usize, usize))> = None;
        for split in Split::ALL {
            let Some(dims) = self.get(split).input_dims() else {
                continue;
            };
            match expected {
                None => expected = Some((split, dims)),
                Some((first, want)) if want != dims => {
                    return Err(TileDatasetError::Shape(format!(
                        "{split} tiles have (timesteps, bands) {dims:?}, {first} tiles have {want:?}"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(self)
    }

    /// `(timesteps, bands)` of the first non-empty split.
    pub fn input_dims(&self) -> Option<(usize, usize)> {
        Split::ALL.iter().find_map(|s| self.get(*s).input_dims())
    }

    pub fn get(&self, split: Split) -> &TileLoader {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn get_mut(&mut self, split: Split) -> &mut TileLoader {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
            Split::Test => &mut self.test,
        }
    }
}
