//! Data-augmentation experiments on N-MNIST, the event-camera recording of MNIST.

pub mod augment;
pub mod backend;
pub mod cli;
pub mod error;
pub mod event;
pub mod metrics;
pub mod model;
pub mod nmnist;
pub mod optim;
pub mod training;

pub use error::{Error, Result};

use augment::{AugmentedDataset, Pipeline};
use backend::MainDevice;
use burn::tensor::backend::AutodiffBackend;
use cli::AppArgs;
use metrics::{RunState, ScalarWriter};
use nmnist::NmnistDataset;

/// Runs one experiment as described by the command line.
pub fn launch<AutoB: AutodiffBackend + MainDevice>(args: &AppArgs) -> Result<RunState> {
    let config = args.training_config()?;
    let device = AutoB::main_device(!args.no_cuda)?;
    tracing::info!("Running on {device:?}");

    tracing::info!("Training augmentations:");
    let train_pipeline = Pipeline::build(&config.augmentation, true);
    tracing::info!("Test augmentations:");
    let test_pipeline = Pipeline::build(&config.augmentation, false);

    let download = !args.downloaded;
    let num_events = Some(args.num_events);
    let train_dataset = AugmentedDataset::new(
        NmnistDataset::train(&args.data_dir, download, num_events)?,
        train_pipeline,
        config.seed,
    );
    let test_dataset = AugmentedDataset::new(
        NmnistDataset::test(&args.data_dir, download, num_events)?,
        test_pipeline,
        config.seed.wrapping_add(1),
    );

    let experiment_dir = args.experiment_dir();
    let mut sink = ScalarWriter::new(&experiment_dir)?;
    tracing::info!("Logging scalars to {:?}", sink.path());
    cli::save_training_config(&experiment_dir, &config)?;

    training::run::<AutoB, _, _, _>(&config, device, train_dataset, test_dataset, &mut sink)
}
