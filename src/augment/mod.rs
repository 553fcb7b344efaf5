//! Event-stream augmentations and their per-run composition.

use crate::error::{Error, Result};
use crate::event::{EventSample, SensorSize};
use burn::prelude::*;
use rand::Rng;

pub mod dataset;
pub mod step;

pub use dataset::AugmentedDataset;
pub use step::{AugmentationStep, Representation, SampleData, Volume};

/// Magnitudes at or below this value disable their augmentation.
pub const EPSILON: f64 = 1e-4;

#[derive(Config, Debug)]
pub struct AugmentationConfig {
    /// Fraction of events dropped from each recording.
    #[config(default = "None")]
    pub drop_probability: Option<f64>,
    #[config(default = "None")]
    pub flip_lr_probability: Option<f64>,
    #[config(default = "None")]
    pub flip_ud_probability: Option<f64>,
    /// Refractory period in microseconds.
    #[config(default = "None")]
    pub refractory_period: Option<f64>,
    /// Standard deviation of the timestamp noise, in microseconds.
    #[config(default = "None")]
    pub time_jitter: Option<f64>,
    /// Number of time slices of the volume fed to the network.
    #[config(default = 10)]
    pub n_time_bins: usize,
}

impl AugmentationConfig {
    pub fn validate(&self) -> Result<()> {
        for augmentation in &OPTIONAL_AUGMENTATIONS {
            if let Some(value) = (augmentation.value)(self) {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "--{} must be a non-negative number, got {value}",
                        augmentation.flag
                    )));
                }
            }
        }
        if self.n_time_bins == 0 {
            return Err(Error::InvalidConfig("n_time_bins must be at least 1".into()));
        }
        Ok(())
    }
}

/// An optional augmentation: where its magnitude lives, how it is named and how it is built.
struct OptionalAugmentation {
    flag: &'static str,
    code: &'static str,
    value: fn(&AugmentationConfig) -> Option<f64>,
    step: fn(f64) -> AugmentationStep,
}

/// Optional augmentations, in pipeline (and name) order.
const OPTIONAL_AUGMENTATIONS: [OptionalAugmentation; 5] = [
    OptionalAugmentation {
        flag: "drop-probability",
        code: "dp",
        value: |config| config.drop_probability,
        step: |probability| AugmentationStep::DropEvent { probability },
    },
    OptionalAugmentation {
        flag: "flip-lr-probability",
        code: "flr",
        value: |config| config.flip_lr_probability,
        step: |probability| AugmentationStep::FlipLr { probability },
    },
    OptionalAugmentation {
        flag: "flip-ud-probability",
        code: "fud",
        value: |config| config.flip_ud_probability,
        step: |probability| AugmentationStep::FlipUd { probability },
    },
    OptionalAugmentation {
        flag: "refractory-period",
        code: "rp",
        value: |config| config.refractory_period,
        step: |period| AugmentationStep::RefractoryPeriod { period },
    },
    OptionalAugmentation {
        flag: "time-jitter",
        code: "tj",
        value: |config| config.time_jitter,
        step: |std_dev| AugmentationStep::TimeJitter { std_dev },
    },
];

/// Run-name suffix listing every augmentation option that was given,
/// e.g. `_dp_0.30_rp_1.00`.
///
/// Unlike [`Pipeline::build`], options are listed even when their magnitude disables them.
pub fn experiment_name(config: &AugmentationConfig) -> String {
    OPTIONAL_AUGMENTATIONS
        .iter()
        .filter_map(|augmentation| {
            (augmentation.value)(config).map(|value| format!("_{}_{value:.2}", augmentation.code))
        })
        .collect()
}

/// A sample after the whole pipeline ran.
#[derive(Clone, Debug)]
pub struct VolumeItem {
    pub volume: Volume<f32>,
    pub label: u8,
}

/// Ordered transforms turning an event recording into a float volume.
#[derive(Clone, Debug, PartialEq)]
pub struct Pipeline {
    steps: Vec<AugmentationStep>,
    sensor: SensorSize,
}

impl Pipeline {
    /// Builds the N-MNIST pipeline.
    ///
    /// Optional augmentations are only included for training, and only when
    /// their magnitude exceeds [`EPSILON`]. `Volume` and `AsFloat32` always close the pipeline.
    pub fn build(config: &AugmentationConfig, is_training: bool) -> Self {
        Self::build_for_sensor(config, is_training, SensorSize::NMNIST)
    }

    pub fn build_for_sensor(
        config: &AugmentationConfig,
        is_training: bool,
        sensor: SensorSize,
    ) -> Self {
        let mut steps: Vec<AugmentationStep> = OPTIONAL_AUGMENTATIONS
            .iter()
            .filter(|_| is_training)
            .filter_map(|augmentation| {
                (augmentation.value)(config)
                    .filter(|value| *value > EPSILON)
                    .map(augmentation.step)
            })
            .collect();
        steps.push(AugmentationStep::Volume {
            n_time_bins: config.n_time_bins,
        });
        steps.push(AugmentationStep::AsFloat32);

        for step in &steps {
            tracing::info!("- {step}");
        }

        Self { steps, sensor }
    }

    pub fn steps(&self) -> &[AugmentationStep] {
        &self.steps
    }

    /// Runs every step in order.
    pub fn apply<R: Rng + ?Sized>(&self, data: SampleData, rng: &mut R) -> Result<SampleData> {
        self.steps
            .iter()
            .try_fold(data, |data, step| step.apply(data, self.sensor, rng))
    }

    /// Runs the pipeline over a labelled recording, expecting a float volume at the end.
    pub fn volume<R: Rng + ?Sized>(&self, sample: EventSample, rng: &mut R) -> Result<VolumeItem> {
        match self.apply(SampleData::Events(sample.events), rng)? {
            SampleData::Float(volume) => Ok(VolumeItem {
                volume,
                label: sample.label,
            }),
            other => Err(Error::Representation {
                step: "Pipeline",
                expected: Representation::Float,
                got: other.representation(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn all_options(value: f64) -> AugmentationConfig {
        AugmentationConfig::new()
            .with_drop_probability(Some(value))
            .with_flip_lr_probability(Some(value))
            .with_flip_ud_probability(Some(value))
            .with_refractory_period(Some(value))
            .with_time_jitter(Some(value))
    }

    fn names(pipeline: &Pipeline) -> Vec<&'static str> {
        pipeline.steps().iter().map(|step| step.name()).collect()
    }

    #[test]
    fn disabled_options_leave_only_binning_and_cast() {
        for config in [AugmentationConfig::new(), all_options(1e-4), all_options(0.0)] {
            for is_training in [true, false] {
                let pipeline = Pipeline::build(&config, is_training);
                assert_eq!(names(&pipeline), vec!["Volume", "AsFloat32"]);
            }
        }
        assert_eq!(experiment_name(&AugmentationConfig::new()), "");
    }

    #[test]
    fn test_pipeline_never_augments() {
        for value in [0.0, 0.2, 1.0, 50.0] {
            let pipeline = Pipeline::build(&all_options(value), false);
            assert!(pipeline.steps().iter().all(|step| !step.is_optional()));
        }
    }

    #[test]
    fn training_pipeline_keeps_table_order() {
        let pipeline = Pipeline::build(&all_options(0.5), true);
        assert_eq!(
            names(&pipeline),
            vec![
                "DropEvent",
                "FlipLR",
                "FlipUD",
                "RefractoryPeriod",
                "TimeJitter",
                "Volume",
                "AsFloat32"
            ]
        );
    }

    #[test]
    fn flip_ud_is_guarded_by_its_own_probability() {
        let config = AugmentationConfig::new()
            .with_flip_lr_probability(Some(0.0))
            .with_flip_ud_probability(Some(0.5));
        assert_eq!(
            Pipeline::build(&config, true).steps()[0],
            AugmentationStep::FlipUd { probability: 0.5 }
        );

        let config = AugmentationConfig::new()
            .with_flip_lr_probability(Some(0.5))
            .with_flip_ud_probability(Some(0.0));
        assert_eq!(names(&Pipeline::build(&config, true))[..2], ["FlipLR", "Volume"]);
    }

    #[test]
    fn time_jitter_is_included_when_enabled() {
        let config = AugmentationConfig::new().with_time_jitter(Some(2.0));
        assert_eq!(
            Pipeline::build(&config, true).steps()[0],
            AugmentationStep::TimeJitter { std_dev: 2.0 }
        );
    }

    #[test]
    fn experiment_name_lists_present_options_in_order() {
        let config = AugmentationConfig::new().with_refractory_period(Some(0.5));
        assert_eq!(experiment_name(&config), "_rp_0.50");

        let config = AugmentationConfig::new()
            .with_time_jitter(Some(1.0))
            .with_drop_probability(Some(0.3))
            .with_flip_ud_probability(Some(0.0));
        assert_eq!(experiment_name(&config), "_dp_0.30_fud_0.00_tj_1.00");
        assert_eq!(experiment_name(&config), experiment_name(&config.clone()));
    }

    #[test]
    fn validate_rejects_negative_magnitudes() {
        assert!(all_options(0.3).validate().is_ok());
        let config = AugmentationConfig::new().with_time_jitter(Some(-1.0));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        let config = AugmentationConfig::new().with_drop_probability(Some(f64::NAN));
        assert!(config.validate().is_err());
    }

    #[test]
    fn volume_produces_float_histogram() {
        let pipeline = Pipeline::build(&AugmentationConfig::new().with_n_time_bins(2), false);
        let sample = EventSample {
            events: vec![Event::new(0, 0, 0.0, true), Event::new(33, 33, 100.0, false)],
            label: 4,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let item = pipeline.volume(sample, &mut rng).unwrap();
        assert_eq!(item.label, 4);
        assert_eq!(item.volume.shape, [2, 34, 34]);
        assert_eq!(item.volume.data[0], 1.0);
        assert_eq!(item.volume.data[34 * 34 + 33 * 34 + 33], 1.0);
        assert_eq!(item.volume.data.iter().sum::<f32>(), 2.0);
    }
}
