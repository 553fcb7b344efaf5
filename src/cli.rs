use crate::augment::{AugmentationConfig, experiment_name};
use crate::error::{Error, Result};
use crate::model::NetConfig;
use crate::optim::optimizer_config;
use crate::training::TrainingConfig;
use burn::prelude::*;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

pub const HELP: &str = "\
N-MNIST augmentation experiments

Trains a small convolutional network on the N-MNIST event-camera digits, with an
optional set of event-stream augmentations applied to the training recordings.
Scalars are appended to <LOGDIR>/<NAME><SUFFIX>/scalars.csv, where the suffix
names the enabled augmentations (e.g. _dp_0.30_rp_0.50).

USAGE:
    nmnist --name <NAME> [OPTIONS]

FLAGS:
    -h, --help                      Show this help message and exit
        --no-cuda                   Run on the cpu even when an accelerator is available
        --downloaded                Never download; fail if the dataset is missing

AUGMENTATIONS (disabled when unset or at most 1e-4):
        --drop-probability <P>      Fraction of events dropped from each recording
        --flip-lr-probability <P>   Probability of mirroring a recording horizontally
        --flip-ud-probability <P>   Probability of mirroring a recording vertically
        --refractory-period <US>    Per-pixel refractory period, in microseconds
        --time-jitter <US>          Standard deviation of the timestamp noise, in microseconds

OPTIONS:
        --name <NAME>               Experiment name (required)
        --batch-size <N>            Training batch size [default: 64]
        --test-batch-size <N>       Evaluation batch size [default: 1000]
        --epochs <N>                Number of epochs [default: 10]
        --lr <LR>                   Learning rate [default: 0.002]
        --momentum <M>              SGD momentum [default: 0.5]
        --seed <SEED>               Random seed [default: 1]
        --log-interval <N>          Batches between two training loss records [default: 10]
        --num-events <N>            Events kept from the start of each recording [default: 1000]
        --num-workers <N>           Data loading threads, 0 loads in-thread [default: 0]
        --logdir <PATH>             Root of the experiment directories [default: ../logs]
        --data-dir <PATH>           Dataset root, holding nmnist/{Train,Test} [default: ../data]
";

pub const TRAINING_CONFIG_NAME: &str = "training_config";

#[derive(Debug, Clone, PartialEq)]
pub struct AppArgs {
    pub name: String,
    pub drop_probability: Option<f64>,
    pub flip_lr_probability: Option<f64>,
    pub flip_ud_probability: Option<f64>,
    pub refractory_period: Option<f64>,
    pub time_jitter: Option<f64>,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub epochs: usize,
    pub lr: f64,
    pub momentum: f64,
    pub seed: u64,
    pub log_interval: usize,
    pub num_events: usize,
    pub num_workers: usize,
    pub logdir: PathBuf,
    pub data_dir: PathBuf,
    pub no_cuda: bool,
    pub downloaded: bool,
}

impl AppArgs {
    /// Parses the process arguments, printing the usage and exiting on `--help`.
    pub fn parse() -> Result<Self> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", HELP);
            std::process::exit(0);
        }

        Self::from_arguments(pargs)
    }

    pub fn parse_from(args: Vec<OsString>) -> Result<Self> {
        Self::from_arguments(pico_args::Arguments::from_vec(args))
    }

    fn from_arguments(mut pargs: pico_args::Arguments) -> Result<Self> {
        let args = AppArgs {
            name: pargs.value_from_str("--name")?,
            drop_probability: pargs.opt_value_from_str("--drop-probability")?,
            flip_lr_probability: pargs.opt_value_from_str("--flip-lr-probability")?,
            flip_ud_probability: pargs.opt_value_from_str("--flip-ud-probability")?,
            refractory_period: pargs.opt_value_from_str("--refractory-period")?,
            time_jitter: pargs.opt_value_from_str("--time-jitter")?,
            batch_size: pargs.opt_value_from_str("--batch-size")?.unwrap_or(64),
            test_batch_size: pargs.opt_value_from_str("--test-batch-size")?.unwrap_or(1000),
            epochs: pargs.opt_value_from_str("--epochs")?.unwrap_or(10),
            lr: pargs.opt_value_from_str("--lr")?.unwrap_or(2e-3),
            momentum: pargs.opt_value_from_str("--momentum")?.unwrap_or(0.5),
            seed: pargs.opt_value_from_str("--seed")?.unwrap_or(1),
            log_interval: pargs.opt_value_from_str("--log-interval")?.unwrap_or(10),
            num_events: pargs.opt_value_from_str("--num-events")?.unwrap_or(1000),
            num_workers: pargs.opt_value_from_str("--num-workers")?.unwrap_or(0),
            logdir: pargs
                .opt_value_from_os_str("--logdir", parse_path)?
                .unwrap_or_else(|| PathBuf::from("../logs")),
            data_dir: pargs
                .opt_value_from_os_str("--data-dir", parse_path)?
                .unwrap_or_else(|| PathBuf::from("../data")),
            // must parse flags after values
            no_cuda: pargs.contains("--no-cuda"),
            downloaded: pargs.contains("--downloaded"),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            return Err(Error::UnusedArguments(remaining));
        }

        if !args.momentum.is_finite() || args.momentum < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "--momentum must be a non-negative number, got {}",
                args.momentum
            )));
        }

        Ok(args)
    }

    pub fn augmentation_config(&self) -> AugmentationConfig {
        AugmentationConfig::new()
            .with_drop_probability(self.drop_probability)
            .with_flip_lr_probability(self.flip_lr_probability)
            .with_flip_ud_probability(self.flip_ud_probability)
            .with_refractory_period(self.refractory_period)
            .with_time_jitter(self.time_jitter)
    }

    /// The validated run configuration described by these arguments.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let augmentation = self.augmentation_config();
        let model = NetConfig::new().with_n_time_bins(augmentation.n_time_bins);
        let config = TrainingConfig::new(optimizer_config(self.momentum), augmentation, model)
            .with_num_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_test_batch_size(self.test_batch_size)
            .with_num_workers(self.num_workers)
            .with_lr(self.lr)
            .with_seed(self.seed)
            .with_log_interval(self.log_interval);
        config.validate()?;
        Ok(config)
    }

    /// `<logdir>/<name><suffix>`, the suffix naming the enabled augmentations.
    pub fn experiment_dir(&self) -> PathBuf {
        let suffix = experiment_name(&self.augmentation_config());
        self.logdir.join(format!("{}{suffix}", self.name))
    }
}

fn parse_path(s: &OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

/// Writes `training_config.json` into `dir`.
pub fn save_training_config(dir: &Path, training_config: &impl Config) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(Error::io(dir))?;
    let path = dir.join(TRAINING_CONFIG_NAME).with_extension("json");
    tracing::info!("Saving training config into {path:?}");
    training_config.save(&path).map_err(Error::io(&path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn defaults_fill_everything_but_the_name() {
        let parsed = AppArgs::parse_from(args(&["--name", "baseline"])).unwrap();
        assert_eq!(parsed.name, "baseline");
        assert_eq!(parsed.batch_size, 64);
        assert_eq!(parsed.test_batch_size, 1000);
        assert_eq!(parsed.epochs, 10);
        assert_eq!(parsed.lr, 2e-3);
        assert_eq!(parsed.momentum, 0.5);
        assert_eq!(parsed.seed, 1);
        assert_eq!(parsed.log_interval, 10);
        assert_eq!(parsed.num_events, 1000);
        assert_eq!(parsed.num_workers, 0);
        assert_eq!(parsed.logdir, PathBuf::from("../logs"));
        assert_eq!(parsed.data_dir, PathBuf::from("../data"));
        assert!(!parsed.no_cuda);
        assert!(!parsed.downloaded);
        assert!(parsed.drop_probability.is_none());
        assert_eq!(parsed.experiment_dir(), PathBuf::from("../logs/baseline"));

        let config = parsed.training_config().unwrap();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.augmentation.n_time_bins, config.model.n_time_bins);
    }

    #[test]
    fn name_is_required() {
        let err = AppArgs::parse_from(args(&["--epochs", "2"])).unwrap_err();
        assert!(matches!(err, Error::Args(pico_args::Error::MissingOption(_))));
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        let err = AppArgs::parse_from(args(&["--name", "x", "--verbose"])).unwrap_err();
        assert!(matches!(err, Error::UnusedArguments(ref rest) if rest == &args(&["--verbose"])));
    }

    #[test]
    fn negative_values_are_rejected() {
        let parsed =
            AppArgs::parse_from(args(&["--name", "x", "--drop-probability", "-0.5"])).unwrap();
        assert!(matches!(parsed.training_config(), Err(Error::InvalidConfig(_))));

        let err = AppArgs::parse_from(args(&["--name", "x", "--batch-size", "-3"])).unwrap_err();
        assert!(matches!(err, Error::Args(_)));

        let err = AppArgs::parse_from(args(&["--name", "x", "--momentum", "-1"])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn zero_epochs_and_zero_lr_are_accepted() {
        let config = AppArgs::parse_from(args(&["--name", "x", "--epochs", "0", "--lr", "0"]))
            .unwrap()
            .training_config()
            .unwrap();
        assert_eq!(config.num_epochs, 0);
        assert_eq!(config.lr, 0.0);
    }

    #[test]
    fn experiment_dir_names_enabled_augmentations() {
        let parsed = AppArgs::parse_from(args(&[
            "--name",
            "run",
            "--logdir",
            "/tmp/logs",
            "--refractory-period",
            "0.5",
            "--no-cuda",
        ]))
        .unwrap();
        assert!(parsed.no_cuda);
        assert_eq!(parsed.experiment_dir(), PathBuf::from("/tmp/logs/run_rp_0.50"));
    }

    #[test]
    fn config_is_saved_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppArgs::parse_from(args(&["--name", "x", "--epochs", "3"]))
            .unwrap()
            .training_config()
            .unwrap();
        let path = save_training_config(&dir.path().join("run"), &config).unwrap();
        assert_eq!(path.file_name().unwrap(), "training_config.json");

        let loaded = TrainingConfig::load(&path).unwrap();
        assert_eq!(loaded.num_epochs, 3);
        assert_eq!(loaded.augmentation.drop_probability, None);
    }
}
