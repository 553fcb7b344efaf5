//! Scalar logging: what gets recorded and where it goes.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Counters shared by the training and evaluation steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    /// Number of training records logged so far.
    pub global_step: usize,
    /// Current epoch, starting at 1 (0 before training starts).
    pub epoch: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Test => "test",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named scalars produced by one logging event.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub mode: Mode,
    pub step: usize,
    pub scalars: BTreeMap<&'static str, f64>,
}

impl MetricsRecord {
    pub fn new(mode: Mode, step: usize) -> Self {
        Self {
            mode,
            step,
            scalars: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.scalars.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }

    /// `(tag, value)` pairs, tagged as `<mode>/<name>`.
    pub fn tagged(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        self.scalars
            .iter()
            .map(|(name, value)| (format!("{}/{name}", self.mode), *value))
    }
}

/// Destination of [`MetricsRecord`]s.
pub trait MetricsSink {
    fn record(&mut self, record: &MetricsRecord) -> Result<()>;
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn record(&mut self, record: &MetricsRecord) -> Result<()> {
        (**self).record(record)
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub records: Vec<MetricsRecord>,
}

impl RecordingSink {
    pub fn of_mode(&self, mode: Mode) -> impl Iterator<Item = &MetricsRecord> {
        self.records.iter().filter(move |record| record.mode == mode)
    }
}

impl MetricsSink for RecordingSink {
    fn record(&mut self, record: &MetricsRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Appends scalars to `<dir>/scalars.csv`, one `step,tag,value` row per scalar.
///
/// Rows are flushed after every record so a crashed run keeps its history.
pub struct ScalarWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl ScalarWriter {
    pub const FILE_NAME: &'static str = "scalars.csv";

    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(Error::io(dir))?;
        let path = dir.join(Self::FILE_NAME);
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::io(&path))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer
                .write_record(["step", "tag", "value"])
                .map_err(Error::csv(&path))?;
            tracing::debug!("created scalar log {path:?}");
        }
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for ScalarWriter {
    fn record(&mut self, record: &MetricsRecord) -> Result<()> {
        let step = record.step.to_string();
        for (tag, value) in record.tagged() {
            tracing::info!(step = record.step, "{tag} = {value:.6}");
            self.writer
                .write_record([step.as_str(), tag.as_str(), value.to_string().as_str()])
                .map_err(Error::csv(&self.path))?;
        }
        self.writer.flush().map_err(Error::io(&self.path))
    }
}
