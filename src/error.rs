use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Axis of a time-frequency selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Time,
    Frequency,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Time => write!(f, "time"),
            Axis::Frequency => write!(f, "frequency"),
        }
    }
}

/// Why a caller-supplied selection was refused.
///
/// Each variant is a distinct reason so callers can react to the offending
/// parameter without parsing messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidSelection {
    #[error("time range: {0}")]
    Time(String),
    #[error("frequency range: {0}")]
    Frequency(String),
    #[error("beam {requested} not in lane (available: {available:?})")]
    Beam { requested: u32, available: Vec<u32> },
    #[error("polarization {requested} not in lane (available: {available})")]
    Polarization { requested: String, available: String },
}

/// Every failure the reader and engines can report.
#[derive(Debug, Error)]
pub enum LaneError {
    /// A single record could not be decoded. Fatal for the scan that hit it.
    #[error("malformed record at byte {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    /// The file's record structure is inconsistent. The lane is unusable.
    #[error("corrupt stream at byte {offset}: {reason}")]
    CorruptStream { offset: u64, reason: String },

    #[error("invalid selection, {0}")]
    InvalidSelection(#[from] InvalidSelection),

    /// The requested range lies entirely outside the lane.
    #[error("empty selection: requested {axis} range does not intersect the lane")]
    EmptySelection { axis: Axis },

    #[error("invalid bin width: {0}")]
    InvalidBinWidth(String),

    /// Two spectra cannot be combined: different products or axes.
    #[error("incompatible spectra: {0}")]
    Incompatible(String),

    #[error("invalid record layout: {0}")]
    InvalidLayout(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LaneError {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        LaneError::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        LaneError::CorruptStream {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LaneError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = LaneError> = std::result::Result<T, E>;
