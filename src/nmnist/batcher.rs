use crate::augment::VolumeItem;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

#[derive(Clone, Default)]
pub struct NmnistBatcher {}

#[derive(Clone, Debug)]
pub struct NmnistBatch<B: Backend> {
    /// Event counts per time bin and pixel.
    ///
    /// # Shape
    /// [batch_size, n_time_bins, height, width]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> NmnistBatch<B> {
    pub fn batch_size(&self) -> usize {
        let [batch_size] = self.targets.dims();
        batch_size
    }
}

impl<B: Backend> Batcher<B, VolumeItem, NmnistBatch<B>> for NmnistBatcher {
    fn batch(&self, items: Vec<VolumeItem>, device: &B::Device) -> NmnistBatch<B> {
        let (items_volume, items_label): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.volume, item.label))
            .unzip();

        let images = items_volume
            .into_iter()
            .map(|volume| {
                let [bins, height, width] = volume.shape;
                TensorData::new(volume.data, [1, bins, height, width]).convert::<B::FloatElem>()
            })
            .map(|data| Tensor::<B, 4>::from_data(data, device))
            .collect();

        let targets = items_label
            .into_iter()
            .map(|label: u8| {
                Tensor::<B, 1, Int>::from_data([(label as i64).elem::<B::IntElem>()], device)
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        NmnistBatch { images, targets }
    }
}
