use std::ffi::OsString;
use std::path::PathBuf;

use crate::augment::Representation;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    Args(#[from] pico_args::Error),

    #[error("unused arguments: {0:?}")]
    UnusedArguments(Vec<OsString>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(&'static str),

    #[error("dataset not found at {path:?} (run without --downloaded to fetch it)")]
    DatasetMissing { path: PathBuf },

    #[error("malformed recording {path:?}: {reason}")]
    MalformedRecording { path: PathBuf, reason: String },

    #[error("i/o error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write scalars to {path:?}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to extract dataset archive")]
    Archive(#[from] zip::result::ZipError),

    /// A pipeline step received a sample in a representation it cannot handle.
    #[error("{step} expects {expected:?} input, got {got:?}")]
    Representation {
        step: &'static str,
        expected: Representation,
        got: Representation,
    },

    #[error("evaluation set is empty")]
    EmptyEvaluation,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>) -> impl FnOnce(csv::Error) -> Self {
        let path = path.into();
        move |source| Error::Csv { path, source }
    }
}
