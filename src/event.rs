/// A single address-event from the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Column, in between 0 and `SensorSize::width - 1`.
    pub x: u16,
    /// Row, in between 0 and `SensorSize::height - 1`.
    pub y: u16,
    /// Timestamp in microseconds.
    pub t: f64,
    /// `true` for an ON (brightness increase) event.
    pub polarity: bool,
}

impl Event {
    pub fn new(x: u16, y: u16, t: f64, polarity: bool) -> Self {
        Self { x, y, t, polarity }
    }
}

/// An event recording along with its digit label.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSample {
    /// Events, ordered by timestamp.
    pub events: Vec<Event>,

    /// Label of the recording.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSize {
    pub width: usize,
    pub height: usize,
}

impl SensorSize {
    /// The ATIS crop used by N-MNIST.
    pub const NMNIST: SensorSize = SensorSize {
        width: 34,
        height: 34,
    };

    pub fn contains(&self, event: &Event) -> bool {
        (event.x as usize) < self.width && (event.y as usize) < self.height
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }
}
