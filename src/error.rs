//! Error types for probing, planning, transfer and state persistence.

use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Coarse classification of [`Error`], used when deciding what the user sees
/// and whether partial work can still be cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Probe,
    Plan,
    Transfer,
    StateIo,
    PathSafety,
    Merge,
    Verify,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid url '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot resolve host '{host}'")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("probe request to {url} failed")]
    Probe {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("probe request to {url} returned {status}")]
    ProbeStatus { url: String, status: StatusCode },

    #[error("server sent an unparsable Content-Length '{value}' for {url}")]
    InvalidContentLength { url: String, value: String },

    #[error("segment count must be at least 1, got {0}")]
    InvalidSegmentCount(usize),

    #[error("cannot create directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("segment {index} of {url} failed")]
    Transfer {
        index: usize,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("segment {index} cannot write {}", path.display())]
    SegmentIo {
        index: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("segment {index} of {url} returned {status}")]
    SegmentStatus {
        index: usize,
        url: String,
        status: StatusCode,
    },

    #[error("segment {index} of {url}: server ignored the Range header")]
    RangeIgnored { index: usize, url: String },

    #[error("{outstanding} segment worker(s) stopped without reporting")]
    WorkerLost { outstanding: usize },

    #[error("cannot access download state at {}", path.display())]
    StateIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download state at {} is malformed", path.display())]
    StateFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("path {} escapes {}", path.display(), root.display())]
    PathSafety { path: PathBuf, root: PathBuf },

    #[error("cannot determine the home directory")]
    NoHomeDir,

    #[error("cannot merge segments into {}", path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read {} for checksum verification", path.display())]
    VerifyIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidUrl { .. }
            | Error::Resolve { .. }
            | Error::Probe { .. }
            | Error::ProbeStatus { .. }
            | Error::InvalidContentLength { .. } => ErrorKind::Probe,
            Error::InvalidSegmentCount(_) | Error::CreateDir { .. } => ErrorKind::Plan,
            Error::Transfer { .. }
            | Error::SegmentIo { .. }
            | Error::SegmentStatus { .. }
            | Error::RangeIgnored { .. }
            | Error::WorkerLost { .. } => ErrorKind::Transfer,
            Error::StateIo { .. } | Error::StateFormat { .. } => ErrorKind::StateIo,
            Error::PathSafety { .. } | Error::NoHomeDir => ErrorKind::PathSafety,
            Error::Merge { .. } => ErrorKind::Merge,
            Error::VerifyIo { .. } | Error::ChecksumMismatch { .. } => ErrorKind::Verify,
        }
    }

    pub(crate) fn state_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::StateIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
