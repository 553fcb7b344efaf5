use super::{Pipeline, VolumeItem};
use crate::event::EventSample;
use burn::data::dataset::Dataset;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Applies a [`Pipeline`] to every recording drawn from the wrapped dataset.
///
/// Every access draws fresh randomness: the rng is seeded from the run seed
/// and a per-dataset draw counter, so the same index is augmented differently
/// across epochs while a run stays reproducible for a fixed access order.
pub struct AugmentedDataset<D> {
    dataset: D,
    pipeline: Arc<Pipeline>,
    seed: u64,
    draws: AtomicU64,
}

impl<D> AugmentedDataset<D> {
    pub fn new(dataset: D, pipeline: Pipeline, seed: u64) -> Self {
        Self {
            dataset,
            pipeline: Arc::new(pipeline),
            seed,
            draws: AtomicU64::new(0),
        }
    }

    fn rng(&self) -> StdRng {
        let draw = self.draws.fetch_add(1, Ordering::Relaxed);
        StdRng::seed_from_u64(self.seed.wrapping_add(draw.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }
}

impl<D: Dataset<EventSample>> Dataset<VolumeItem> for AugmentedDataset<D> {
    fn get(&self, index: usize) -> Option<VolumeItem> {
        let sample = self.dataset.get(index)?;
        let mut rng = self.rng();
        // pipelines from `Pipeline::build` always end in a float volume
        match self.pipeline.volume(sample, &mut rng) {
            Ok(item) => Some(item),
            Err(err) => panic!("augmentation pipeline failed on sample {index}: {err}"),
        }
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}
