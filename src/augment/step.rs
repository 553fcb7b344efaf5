use crate::error::{Error, Result};
use crate::event::{Event, SensorSize};
use num_traits::AsPrimitive;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// A dense event histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    /// # Shape
    /// [n_time_bins, height, width]
    pub shape: [usize; 3],
    pub data: Vec<T>,
}

/// A sample as it travels through a [`Pipeline`](super::Pipeline).
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    Events(Vec<Event>),
    Counts(Volume<u32>),
    Float(Volume<f32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Events,
    Counts,
    Float,
}

impl SampleData {
    pub fn representation(&self) -> Representation {
        match self {
            SampleData::Events(_) => Representation::Events,
            SampleData::Counts(_) => Representation::Counts,
            SampleData::Float(_) => Representation::Float,
        }
    }
}

/// One transform of a [`Pipeline`](super::Pipeline).
///
/// The first five variants are optional and stochastic, the last two are
/// always appended and turn the event stream into a float volume.
#[derive(Debug, Clone, PartialEq)]
pub enum AugmentationStep {
    DropEvent { probability: f64 },
    FlipLr { probability: f64 },
    FlipUd { probability: f64 },
    RefractoryPeriod { period: f64 },
    TimeJitter { std_dev: f64 },
    Volume { n_time_bins: usize },
    AsFloat32,
}

impl AugmentationStep {
    pub fn name(&self) -> &'static str {
        match self {
            AugmentationStep::DropEvent { .. } => "DropEvent",
            AugmentationStep::FlipLr { .. } => "FlipLR",
            AugmentationStep::FlipUd { .. } => "FlipUD",
            AugmentationStep::RefractoryPeriod { .. } => "RefractoryPeriod",
            AugmentationStep::TimeJitter { .. } => "TimeJitter",
            AugmentationStep::Volume { .. } => "Volume",
            AugmentationStep::AsFloat32 => "AsFloat32",
        }
    }

    /// Whether this step is one of the optional, configurable augmentations.
    pub fn is_optional(&self) -> bool {
        !matches!(
            self,
            AugmentationStep::Volume { .. } | AugmentationStep::AsFloat32
        )
    }

    fn magnitude(&self) -> Option<f64> {
        match self {
            AugmentationStep::DropEvent { probability }
            | AugmentationStep::FlipLr { probability }
            | AugmentationStep::FlipUd { probability } => Some(*probability),
            AugmentationStep::RefractoryPeriod { period } => Some(*period),
            AugmentationStep::TimeJitter { std_dev } => Some(*std_dev),
            AugmentationStep::Volume { .. } | AugmentationStep::AsFloat32 => None,
        }
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        data: SampleData,
        sensor: SensorSize,
        rng: &mut R,
    ) -> Result<SampleData> {
        let got = data.representation();
        match (self, data) {
            (AugmentationStep::DropEvent { probability }, SampleData::Events(events)) => Ok(
                SampleData::Events(drop_events(events, *probability, rng)),
            ),
            (AugmentationStep::FlipLr { probability }, SampleData::Events(events)) => Ok(
                SampleData::Events(flip_lr(events, *probability, sensor, rng)),
            ),
            (AugmentationStep::FlipUd { probability }, SampleData::Events(events)) => Ok(
                SampleData::Events(flip_ud(events, *probability, sensor, rng)),
            ),
            (AugmentationStep::RefractoryPeriod { period }, SampleData::Events(events)) => Ok(
                SampleData::Events(refractory_period(events, *period, sensor)),
            ),
            (AugmentationStep::TimeJitter { std_dev }, SampleData::Events(events)) => Ok(
                SampleData::Events(time_jitter(events, *std_dev, rng)),
            ),
            (AugmentationStep::Volume { n_time_bins }, SampleData::Events(events)) => Ok(
                SampleData::Counts(to_volume(&events, *n_time_bins, sensor)),
            ),
            (AugmentationStep::AsFloat32, SampleData::Counts(counts)) => {
                Ok(SampleData::Float(as_float32(&counts)))
            }
            (AugmentationStep::AsFloat32, _) => Err(Error::Representation {
                step: self.name(),
                expected: Representation::Counts,
                got,
            }),
            (_, _) => Err(Error::Representation {
                step: self.name(),
                expected: Representation::Events,
                got,
            }),
        }
    }
}

impl std::fmt::Display for AugmentationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.magnitude() {
            Some(value) => write!(f, "{} : {value:.6}", self.name()),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// Drops `round(probability * len)` events chosen uniformly without replacement.
/// Surviving events keep their order.
pub fn drop_events<R: Rng + ?Sized>(events: Vec<Event>, probability: f64, rng: &mut R) -> Vec<Event> {
    let len = events.len();
    let n_dropped = ((probability.clamp(0.0, 1.0) * len as f64) + 0.5) as usize;
    let n_dropped = n_dropped.min(len);
    if n_dropped == 0 {
        return events;
    }

    let mut keep = vec![true; len];
    for idx in rand::seq::index::sample(rng, len, n_dropped) {
        keep[idx] = false;
    }
    events
        .into_iter()
        .zip(keep)
        .filter_map(|(event, keep)| keep.then_some(event))
        .collect()
}

/// Mirrors every event horizontally with the given probability.
///
/// Events outside of the sensor are left untouched.
pub fn flip_lr<R: Rng + ?Sized>(
    mut events: Vec<Event>,
    probability: f64,
    sensor: SensorSize,
    rng: &mut R,
) -> Vec<Event> {
    if rng.random_bool(probability.clamp(0.0, 1.0)) {
        let max_x = sensor.width.saturating_sub(1) as u16;
        for event in events.iter_mut().filter(|event| sensor.contains(event)) {
            event.x = max_x - event.x;
        }
    }
    events
}

/// Mirrors every event vertically with the given probability.
///
/// Events outside of the sensor are left untouched.
pub fn flip_ud<R: Rng + ?Sized>(
    mut events: Vec<Event>,
    probability: f64,
    sensor: SensorSize,
    rng: &mut R,
) -> Vec<Event> {
    if rng.random_bool(probability.clamp(0.0, 1.0)) {
        let max_y = sensor.height.saturating_sub(1) as u16;
        for event in events.iter_mut().filter(|event| sensor.contains(event)) {
            event.y = max_y - event.y;
        }
    }
    events
}

/// Suppresses events that follow a kept event at the same pixel within `period` microseconds.
///
/// Events outside of the sensor are passed through untouched.
pub fn refractory_period(events: Vec<Event>, period: f64, sensor: SensorSize) -> Vec<Event> {
    let mut last_kept = vec![f64::NEG_INFINITY; sensor.num_pixels()];
    events
        .into_iter()
        .filter(|event| {
            if !sensor.contains(event) {
                return true;
            }
            let pixel = event.y as usize * sensor.width + event.x as usize;
            if event.t - last_kept[pixel] > period {
                last_kept[pixel] = event.t;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Adds zero-mean gaussian noise to every timestamp.
///
/// Timestamps are clipped at zero and the events re-sorted by time.
pub fn time_jitter<R: Rng + ?Sized>(mut events: Vec<Event>, std_dev: f64, rng: &mut R) -> Vec<Event> {
    let Ok(normal) = Normal::new(0.0, std_dev) else {
        return events;
    };
    for event in &mut events {
        event.t = (event.t + normal.sample(rng)).max(0.0);
    }
    events.sort_by(|a, b| a.t.total_cmp(&b.t));
    events
}

/// Counts events into `n_time_bins` equal slices of the recording's time span.
///
/// The last slice is closed so that the latest event lands in it.
/// Polarity is ignored and events outside of the sensor are discarded.
pub fn to_volume(events: &[Event], n_time_bins: usize, sensor: SensorSize) -> Volume<u32> {
    let pixels = sensor.num_pixels();
    let mut volume = Volume {
        shape: [n_time_bins, sensor.height, sensor.width],
        data: vec![0u32; n_time_bins * pixels],
    };
    if n_time_bins == 0 {
        return volume;
    }

    let inside = || events.iter().filter(|event| sensor.contains(event));
    let Some((t_min, t_max)) = inside().fold(None, |acc: Option<(f64, f64)>, event| match acc {
        None => Some((event.t, event.t)),
        Some((lo, hi)) => Some((lo.min(event.t), hi.max(event.t))),
    }) else {
        return volume;
    };

    let span = t_max - t_min;
    for event in inside() {
        let bin = if span > 0.0 {
            (((event.t - t_min) / span) * n_time_bins as f64) as usize
        } else {
            0
        };
        let bin = bin.min(n_time_bins - 1);
        let idx = bin * pixels + event.y as usize * sensor.width + event.x as usize;
        volume.data[idx] += 1;
    }
    volume
}

pub fn as_float32(counts: &Volume<u32>) -> Volume<f32> {
    Volume {
        shape: counts.shape,
        data: counts.data.iter().map(|count| count.as_()).collect(),
    }
}
