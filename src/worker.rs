use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use indicatif::ProgressBar;
use reqwest::{header, Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::plan::PartRange;

/// Largest slice written between two cancellation checks.
pub const CHUNK_SIZE: usize = 8 * 1024;

pub type ArcRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Global byte-per-second cap shared by every worker of a task.
pub fn rate_limiter(bytes_per_sec: u32) -> Option<ArcRateLimiter> {
    let limit = NonZeroU32::new(bytes_per_sec)?;
    let burst = NonZeroU32::new(bytes_per_sec.max(CHUNK_SIZE as u32))?;
    let quota = Quota::per_second(limit).allow_burst(burst);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Terminal report of one segment worker. Each worker sends exactly one.
#[derive(Debug)]
pub enum SegmentEvent {
    Completed { index: usize, path: PathBuf },
    /// Stopped on request; `remaining` starts at the first unwritten byte.
    Cancelled { index: usize, remaining: PartRange },
    Failed { index: usize, error: Error },
}

/// Read-only resources shared by all workers of a task.
#[derive(Clone)]
pub struct WorkerContext {
    pub client: Client,
    pub cancel: CancellationToken,
    pub limiter: Option<ArcRateLimiter>,
}

#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub index: usize,
    pub part: PartRange,
    pub segment_count: usize,
    pub total_length: Option<u64>,
}

impl SegmentJob {
    fn open_ended(&self) -> bool {
        self.total_length.map_or(true, |total| self.part.to == total)
    }

    /// `None` means a plain GET.
    pub fn range_header(&self) -> Option<String> {
        if self.segment_count <= 1 && self.part.from == 0 {
            return None;
        }
        if self.open_ended() {
            Some(format!("bytes={}-", self.part.from))
        } else {
            Some(format!("bytes={}-{}", self.part.from, self.part.to))
        }
    }
}

enum Outcome {
    Finished,
    Cancelled { written: u64 },
}

/// Runs one segment to completion, cancellation or failure.
///
/// The segment file is opened in append mode so a resumed range continues
/// after the bytes an earlier run already flushed.
pub async fn run_segment(ctx: WorkerContext, job: SegmentJob, progress: ProgressBar) -> SegmentEvent {
    let index = job.index;
    match transfer(&ctx, &job, &progress).await {
        Ok(Outcome::Finished) => {
            debug!(index, path = %job.part.path.display(), "segment completed");
            progress.finish();
            SegmentEvent::Completed {
                index,
                path: job.part.path.clone(),
            }
        }
        Ok(Outcome::Cancelled { written }) => {
            let remaining = job.part.remaining_after(written);
            // Cancelled after the last byte but before end-of-stream.
            if remaining.expected_len(job.total_length) == Some(0) {
                debug!(index, "segment completed at cancellation");
                progress.finish();
                return SegmentEvent::Completed {
                    index,
                    path: job.part.path.clone(),
                };
            }
            debug!(index, written, from = remaining.from, "segment cancelled");
            progress.abandon();
            SegmentEvent::Cancelled { index, remaining }
        }
        Err(error) => {
            progress.abandon();
            SegmentEvent::Failed { index, error }
        }
    }
}

async fn transfer(ctx: &WorkerContext, job: &SegmentJob, progress: &ProgressBar) -> Result<Outcome> {
    let index = job.index;
    let path = &job.part.path;
    let io_err = |source: std::io::Error| Error::SegmentIo {
        index,
        path: path.clone(),
        source,
    };

    // Created up front so an empty range still leaves a file to merge.
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err)?;

    if job.part.expected_len(job.total_length) == Some(0) {
        return Ok(Outcome::Finished);
    }

    let mut request = ctx.client.get(&job.part.url);
    let range = job.range_header();
    if let Some(range) = &range {
        request = request.header(header::RANGE, range);
    }
    trace!(index, range = ?range, "requesting segment");

    let sent = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Ok(Outcome::Cancelled { written: 0 }),
        sent = request.send() => sent,
    };
    let mut response = sent.map_err(|source| Error::Transfer {
        index,
        url: job.part.url.clone(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::SegmentStatus {
            index,
            url: job.part.url.clone(),
            status,
        });
    }
    if range.is_some() && status == StatusCode::OK {
        return Err(Error::RangeIgnored {
            index,
            url: job.part.url.clone(),
        });
    }

    let mut written = 0u64;
    let outcome = 'stream: loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break 'stream Outcome::Cancelled { written },
            chunk = response.chunk() => chunk.map_err(|source| Error::Transfer {
                index,
                url: job.part.url.clone(),
                source,
            })?,
        };
        let Some(chunk) = chunk else {
            break Outcome::Finished;
        };

        for slice in chunk.chunks(CHUNK_SIZE) {
            if ctx.cancel.is_cancelled() {
                break 'stream Outcome::Cancelled { written };
            }
            if let Some(limiter) = &ctx.limiter {
                if let Some(n) = NonZeroU32::new(slice.len() as u32) {
                    if limiter.until_n_ready(n).await.is_err() {
                        trace!(index, "slice exceeds rate limiter burst");
                    }
                }
            }
            file.write_all(slice).await.map_err(io_err)?;
            written += slice.len() as u64;
            progress.inc(slice.len() as u64);
        }
    };

    file.flush().await.map_err(io_err)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(from: u64, to: u64, segment_count: usize, total: Option<u64>) -> SegmentJob {
        SegmentJob {
            index: 0,
            part: PartRange {
                url: "http://example.com/f".into(),
                path: "/tmp/f.part0".into(),
                from,
                to,
            },
            segment_count,
            total_length: total,
        }
    }

    #[test]
    fn closed_range_header() {
        assert_eq!(
            job(0, 4, 2, Some(10)).range_header().as_deref(),
            Some("bytes=0-4")
        );
    }

    #[test]
    fn last_segment_is_open_ended() {
        assert_eq!(
            job(5, 10, 2, Some(10)).range_header().as_deref(),
            Some("bytes=5-")
        );
    }

    #[test]
    fn single_segment_sends_plain_get() {
        assert_eq!(job(0, 10, 1, Some(10)).range_header(), None);
        assert_eq!(job(0, 0, 1, None).range_header(), None);
    }

    #[test]
    fn resumed_single_segment_keeps_range() {
        assert_eq!(
            job(7, 10, 1, Some(10)).range_header().as_deref(),
            Some("bytes=7-")
        );
    }

    #[tokio::test]
    async fn empty_range_completes_with_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(0, 0, 1, Some(0));
        job.part.path = dir.path().join("f.part0");
        let ctx = WorkerContext {
            client: Client::new(),
            cancel: CancellationToken::new(),
            limiter: None,
        };

        let event = run_segment(ctx, job, ProgressBar::hidden()).await;
        let SegmentEvent::Completed { path, .. } = event else {
            panic!("expected completion, got {event:?}");
        };
        assert_eq!(std::fs::read(path).unwrap(), b"");
    }

    #[test]
    fn rate_limiter_rejects_zero() {
        assert!(rate_limiter(0).is_none());
        assert!(rate_limiter(1024).is_some());
    }
}
