use crate::augment::{AugmentationConfig, VolumeItem};
use crate::error::{Error, Result};
use crate::metrics::{MetricsRecord, MetricsSink, Mode, RunState};
use crate::model::{Classifier, ModelConfigExt, Net, NetConfig, nll_loss};
use crate::nmnist::{NmnistBatch, NmnistBatcher};
use crate::optim::OptimConfigExt;
use burn::prelude::*;
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    nn::loss::Reduction,
    optim::{GradientsParams, Optimizer, SgdConfig},
    tensor::backend::AutodiffBackend,
};
use std::sync::Arc;

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: SgdConfig,
    pub augmentation: AugmentationConfig,
    pub model: NetConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1000)]
    pub test_batch_size: usize,
    /// Zero loads batches on the calling thread.
    #[config(default = 0)]
    pub num_workers: usize,
    #[config(default = 2e-3)]
    pub lr: f64,
    #[config(default = 1)]
    pub seed: u64,
    /// Batches between two training loss records.
    #[config(default = 10)]
    pub log_interval: usize,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch-size", self.batch_size),
            ("test-batch-size", self.test_batch_size),
            ("log-interval", self.log_interval),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("--{name} must be at least 1")));
            }
        }
        if !self.lr.is_finite() || self.lr < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "--lr must be a non-negative number, got {}",
                self.lr
            )));
        }
        self.augmentation.validate()?;
        if self.augmentation.n_time_bins != self.model.n_time_bins {
            return Err(Error::InvalidConfig(format!(
                "the pipeline produces {} time bins but the model expects {}",
                self.augmentation.n_time_bins, self.model.n_time_bins
            )));
        }
        Ok(())
    }
}

/// Mean loss and accuracy over a held-out set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// Running sums of an evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluationAccumulator {
    pub loss_sum: f64,
    pub correct: usize,
    pub total: usize,
}

impl EvaluationAccumulator {
    pub fn update(&mut self, batch_loss_sum: f64, batch_correct: usize, batch_size: usize) {
        self.loss_sum += batch_loss_sum;
        self.correct += batch_correct;
        self.total += batch_size;
    }

    pub fn finish(&self) -> Result<Evaluation> {
        if self.total == 0 {
            return Err(Error::EmptyEvaluation);
        }
        Ok(Evaluation {
            loss: self.loss_sum / self.total as f64,
            accuracy: self.correct as f64 / self.total as f64,
        })
    }
}

/// One pass over the training batches.
///
/// Logs the batch loss every `log_interval` batches (starting with the first one),
/// advancing `state.global_step` after each record. Returns the updated model.
#[allow(clippy::too_many_arguments)]
pub fn epoch_train<AutoB, M, O, I, S>(
    mut model: M,
    device: &AutoB::Device,
    batches: I,
    optim: &mut O,
    config: &TrainingConfig,
    state: &mut RunState,
    sink: &mut S,
) -> Result<M>
where
    AutoB: AutodiffBackend,
    M: AutodiffModule<AutoB> + Classifier<AutoB>,
    O: Optimizer<M, AutoB>,
    I: IntoIterator<Item = NmnistBatch<AutoB>>,
    S: MetricsSink + ?Sized,
{
    for (batch_idx, batch) in batches.into_iter().enumerate() {
        let images = batch.images.to_device(device);
        let targets = batch.targets.to_device(device);

        let log_probs = model.log_probs(images);
        let loss = nll_loss(log_probs, targets, Reduction::Mean);
        let loss_value: f64 = loss.clone().into_scalar().elem();

        // gradients are produced fresh by every backward pass
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(config.lr, model, grads);

        tracing::debug!(
            "Epoch {}/{}, Batch {batch_idx:0>4}, Loss {loss_value:.4}",
            state.epoch,
            config.num_epochs,
        );

        if batch_idx % config.log_interval == 0 {
            let record = MetricsRecord::new(Mode::Train, state.global_step).with("loss", loss_value);
            sink.record(&record)?;
            state.global_step += 1;
        }
    }
    Ok(model)
}

/// One pass over the held-out batches, without gradient tracking.
///
/// Records the mean loss and accuracy at the current, unchanged, global step.
pub fn epoch_test<B, M, I, S>(
    model: &M,
    device: &B::Device,
    batches: I,
    state: &RunState,
    sink: &mut S,
) -> Result<Evaluation>
where
    B: Backend,
    M: Classifier<B>,
    I: IntoIterator<Item = NmnistBatch<B>>,
    S: MetricsSink + ?Sized,
{
    let mut acc = EvaluationAccumulator::default();
    for batch in batches {
        let batch_size = batch.batch_size();
        let images = batch.images.to_device(device);
        let targets = batch.targets.to_device(device);

        let log_probs = model.log_probs(images);
        let loss_sum: f64 = nll_loss(log_probs.clone(), targets.clone(), Reduction::Sum)
            .into_scalar()
            .elem();
        let predictions = log_probs.argmax(1).reshape([batch_size]);
        let correct: i64 = predictions
            .equal(targets)
            .int()
            .sum()
            .into_scalar()
            .elem();

        acc.update(loss_sum, correct as usize, batch_size);
    }

    let evaluation = acc.finish()?;
    tracing::info!(
        "Epoch {}, Test Loss {:.4}, Test Acc {}/{} ({:.2}%)",
        state.epoch,
        evaluation.loss,
        acc.correct,
        acc.total,
        evaluation.accuracy * 100.0,
    );
    let record = MetricsRecord::new(Mode::Test, state.global_step)
        .with("loss", evaluation.loss)
        .with("accuracy", evaluation.accuracy);
    sink.record(&record)?;
    Ok(evaluation)
}

type Dataloader<B> = Arc<dyn DataLoader<B, NmnistBatch<B>> + 'static>;

/// Trains a fresh [`Net`] for `config.num_epochs` epochs, evaluating after each one.
pub fn run<AutoB, TrainD, TestD, S>(
    config: &TrainingConfig,
    device: AutoB::Device,
    train_dataset: TrainD,
    test_dataset: TestD,
    sink: &mut S,
) -> Result<RunState>
where
    AutoB: AutodiffBackend,
    TrainD: Dataset<VolumeItem> + 'static,
    TestD: Dataset<VolumeItem> + 'static,
    S: MetricsSink + ?Sized,
{
    config.validate()?;
    AutoB::seed(config.seed);

    let mut model: Net<AutoB> = config.model.init(&device);
    let mut optim = OptimConfigExt::<AutoB, Net<AutoB>>::init(&config.optimizer);

    let mut builder_train = DataLoaderBuilder::new(NmnistBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed);
    let mut builder_test = DataLoaderBuilder::new(NmnistBatcher::default())
        .batch_size(config.test_batch_size)
        .shuffle(config.seed);
    if config.num_workers > 0 {
        builder_train = builder_train.num_workers(config.num_workers);
        builder_test = builder_test.num_workers(config.num_workers);
    }
    let dataloader_train: Dataloader<AutoB> = builder_train.build(train_dataset);
    let dataloader_test: Dataloader<AutoB::InnerBackend> = builder_test.build(test_dataset);

    tracing::info!(
        "Starting training: {} epochs, {} training items, {} test items",
        config.num_epochs,
        dataloader_train.num_items(),
        dataloader_test.num_items(),
    );

    let mut state = RunState::default();
    for epoch in 1..config.num_epochs + 1 {
        state.epoch = epoch;

        model = epoch_train(
            model,
            &device,
            dataloader_train.iter(),
            &mut optim,
            config,
            &mut state,
            sink,
        )?;

        epoch_test(
            &model.valid(),
            &device,
            dataloader_test.iter(),
            &state,
            sink,
        )?;
    }
    tracing::info!("Training finished after {} logged steps", state.global_step);

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MainAutoBackend, MainBackend};
    use crate::augment::Volume;
    use crate::metrics::RecordingSink;
    use burn::data::dataset::InMemDataset;
    use crate::optim::optimizer_config;

    type AutoB = MainAutoBackend;

    /// Predicts the class stored in the first voxel of every volume.
    struct EchoClassifier;

    impl<B: Backend> Classifier<B> for EchoClassifier {
        fn log_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            let [batch_size, ..] = images.dims();
            let device = images.device();
            let predicted = images
                .slice([0..batch_size, 0..1, 0..1, 0..1])
                .reshape([batch_size, 1])
                .repeat_dim(1, 10);
            let classes = Tensor::<B, 1, Int>::arange(0..10, &device)
                .float()
                .reshape([1, 10])
                .repeat_dim(0, batch_size);
            let scores = (classes - predicted).powf_scalar(2.0).neg();
            burn::tensor::activation::log_softmax(scores, 1)
        }
    }

    fn echo_batch<B: Backend>(predicted: &[u8], labels: &[u8], device: &B::Device) -> NmnistBatch<B> {
        let images = predicted
            .iter()
            .map(|p| {
                let mut data = vec![0.0f32; 2 * 2 * 2];
                data[0] = *p as f32;
                Tensor::<B, 4>::from_data(TensorData::new(data, [1, 2, 2, 2]), device)
            })
            .collect();
        let targets: Vec<i32> = labels.iter().map(|label| *label as i32).collect();
        NmnistBatch {
            images: Tensor::cat(images, 0),
            targets: Tensor::from_data(TensorData::new(targets, [labels.len()]), device),
        }
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig::new(
            optimizer_config(0.5),
            AugmentationConfig::new().with_n_time_bins(2),
            NetConfig::new()
                .with_n_time_bins(2)
                .with_conv1_channels(2)
                .with_conv2_channels(2)
                .with_hidden_size(8),
        )
    }

    fn volume_item(label: u8) -> VolumeItem {
        VolumeItem {
            volume: Volume {
                shape: [2, 34, 34],
                data: vec![1.0; 2 * 34 * 34],
            },
            label,
        }
    }

    fn random_batch<B: Backend>(batch_size: usize, device: &B::Device) -> NmnistBatch<B> {
        let targets: Vec<i32> = (0..batch_size as i32).map(|i| i % 10).collect();
        NmnistBatch {
            images: Tensor::<B, 4>::ones([batch_size, 2, 34, 34], device),
            targets: Tensor::from_data(TensorData::new(targets, [batch_size]), device),
        }
    }

    #[test]
    fn accumulator_divides_by_sample_count() {
        let mut acc = EvaluationAccumulator::default();
        acc.update(6.0, 4, 6);
        acc.update(4.0, 3, 4);
        let evaluation = acc.finish().unwrap();
        assert_eq!(evaluation.accuracy, 0.7);
        assert_eq!(evaluation.loss, 1.0);

        assert!(matches!(
            EvaluationAccumulator::default().finish(),
            Err(Error::EmptyEvaluation)
        ));
    }

    #[test]
    fn evaluation_counts_argmax_hits() {
        let device = Default::default();
        // 7 of 10 predictions match their label
        let batches = vec![
            echo_batch::<MainBackend>(&[0, 1, 2, 3], &[0, 1, 2, 9], &device),
            echo_batch::<MainBackend>(&[4, 5, 6, 7, 8, 9], &[4, 5, 6, 0, 0, 9], &device),
        ];
        let state = RunState {
            global_step: 5,
            epoch: 2,
        };
        let mut sink = RecordingSink::default();

        let evaluation = epoch_test(&EchoClassifier, &device, batches, &state, &mut sink).unwrap();

        assert!((evaluation.accuracy - 0.7).abs() < 1e-12);
        assert!(evaluation.loss > 0.0);
        assert_eq!(sink.records.len(), 1);
        let record = &sink.records[0];
        assert_eq!(record.mode, Mode::Test);
        assert_eq!(record.step, 5);
        assert_eq!(record.get("accuracy"), Some(evaluation.accuracy));
        assert_eq!(record.get("loss"), Some(evaluation.loss));
    }

    #[test]
    fn evaluation_of_nothing_fails() {
        let device = Default::default();
        let mut sink = RecordingSink::default();
        let batches: Vec<NmnistBatch<MainBackend>> = Vec::new();
        let err = epoch_test(&EchoClassifier, &device, batches, &RunState::default(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, Error::EmptyEvaluation));
        assert!(sink.records.is_empty());
    }

    #[test]
    fn training_logs_every_interval() {
        let device = Default::default();
        let config = small_config().with_log_interval(2);
        let mut model: Net<AutoB> = config.model.init(&device);
        let mut optim = OptimConfigExt::<AutoB, Net<AutoB>>::init(&config.optimizer);
        let mut state = RunState::default();
        let mut sink = RecordingSink::default();

        for epoch in 1..=2 {
            state.epoch = epoch;
            // 5 batches -> records at batches 0, 2 and 4
            let batches: Vec<_> = (0..5).map(|_| random_batch::<AutoB>(2, &device)).collect();
            model = epoch_train(
                model, &device, batches, &mut optim, &config, &mut state, &mut sink,
            )
            .unwrap();
        }

        assert_eq!(state.global_step, 6);
        let steps: Vec<usize> = sink.records.iter().map(|record| record.step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4, 5]);
        assert!(sink.of_mode(Mode::Test).next().is_none());
        assert!(sink.records.iter().all(|record| record.get("loss").unwrap().is_finite()));
    }

    #[test]
    fn training_updates_parameters() {
        let device = Default::default();
        let config = small_config().with_lr(0.1);
        let model: Net<AutoB> = config.model.init(&device);
        let before = model.fc2.weight.val().into_data();
        let mut optim = OptimConfigExt::<AutoB, Net<AutoB>>::init(&config.optimizer);

        let model = epoch_train(
            model,
            &device,
            vec![random_batch::<AutoB>(4, &device)],
            &mut optim,
            &config,
            &mut RunState::default(),
            &mut RecordingSink::default(),
        )
        .unwrap();

        assert_ne!(before, model.fc2.weight.val().into_data());
    }

    #[test]
    fn zero_epochs_trains_nothing() {
        let config = small_config().with_num_epochs(0);
        let train = InMemDataset::new(vec![volume_item(1)]);
        let test = InMemDataset::new(vec![volume_item(2)]);
        let mut sink = RecordingSink::default();

        let state =
            run::<AutoB, _, _, _>(&config, Default::default(), train, test, &mut sink).unwrap();

        assert_eq!(
            state,
            RunState {
                global_step: 0,
                epoch: 0
            }
        );
        assert!(sink.records.is_empty());
    }

    #[test]
    fn validate_accepts_zero_epochs_and_zero_lr() {
        assert!(small_config().with_num_epochs(0).validate().is_ok());
        assert!(small_config().with_lr(0.0).validate().is_ok());
        assert!(small_config().with_lr(-1e-3).validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_log_interval_and_bin_mismatch() {
        assert!(small_config().validate().is_ok());
        assert!(matches!(
            small_config().with_batch_size(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            small_config().with_log_interval(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        let mut config = small_config();
        config.model = NetConfig::new();
        assert!(config.validate().is_err());
    }
}
