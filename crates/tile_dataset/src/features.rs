//! Per-pixel feature rows for non-deep-learning models.

use crate::types::TileSample;

/// One row per labeled pixel with `timesteps * bands` features ordered time-major,
/// paired with the pixel's class.
pub fn pixel_features(samples: &[TileSample]) -> (Vec<Vec<f32>>, Vec<usize>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for sample in samples {
        for y in 0..sample.height {
            for x in 0..sample.width {
                let label = sample.labels[y * sample.width + x];
                if label < 0 {
                    continue;
                }
                let mut row = Vec::with_capacity(sample.timesteps * sample.bands);
                for t in 0..sample.timesteps {
                    for band in 0..sample.bands {
                        row.push(sample.value(t, band, y, x));
                    }
                }
                xs.push(row);
                ys.push(label as usize);
            }
        }
    }
    (xs, ys)
}

/// Labeled pixel count per class.
pub fn class_counts(samples: &[TileSample], num_classes: usize) -> Vec<u64> {
    let mut counts = vec![0u64; num_classes];
    for label in samples.iter().flat_map(|s| s.labels.iter()) {
        if *label >= 0 && (*label as usize) < num_classes {
            counts[*label as usize] += 1;
        }
    }
    counts
}
