//! # prdl
//!
//! Parallel, resumable HTTP downloads.
//!
//! A download is probed for range support, split into byte-range segments
//! fetched concurrently, and either merged into the final file or, when
//! interrupted, persisted so a later run continues from the exact byte each
//! segment reached.

pub mod downloader;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod merger;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod state;
pub mod transport;
pub mod utils;
pub mod worker;

pub use downloader::{Downloader, RunOutcome, Termination};
pub use error::{Error, ErrorKind, Result};
pub use plan::PartRange;
pub use probe::DownloadTask;
pub use state::DownloadState;
pub use transport::{Profile, TransportConfig};
pub use utils::Workspace;
