use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::Local;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hashing;
use crate::merger;
use crate::plan::{self, PartRange};
use crate::probe::{self, size_report, DownloadTask};
use crate::progress::Progress;
use crate::state::{remove_dir_if_exists, DownloadState, StateStore};
use crate::transport::TransportConfig;
use crate::utils::{
    checked_output_name, display_name, ensure_within, get_filename_from_url, get_unique_filepath,
    Workspace,
};
use crate::worker::{self, ArcRateLimiter, SegmentEvent, SegmentJob, WorkerContext};

/// Lifecycle of one run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Running,
    Interrupting,
    Finishing,
    ResumedSave,
    Merged,
    Done,
    Failed,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All segments were transferred and merged into `path`.
    Merged { path: PathBuf, sha256: Option<String> },
    /// Interrupted; progress persisted under `state_dir`.
    Saved { state_dir: PathBuf, remaining: usize },
    /// Interrupted, but the server does not support resumption.
    Discarded,
}

pub struct Downloader {
    workspace: Workspace,
    transport: TransportConfig,
    output_dir: PathBuf,
    progress: Progress,
    limiter: Option<ArcRateLimiter>,
    expected_sha256: Option<String>,
}

/// What the workers of one run reported.
#[derive(Default)]
struct RunLedger {
    completed: Vec<usize>,
    remaining: Vec<(usize, PartRange)>,
}

impl Downloader {
    pub fn new(workspace: Workspace, transport: TransportConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace,
            transport,
            output_dir: output_dir.into(),
            progress: Progress::hidden(),
            limiter: None,
            expected_sha256: None,
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_rate_limit(mut self, bytes_per_sec: Option<u32>) -> Self {
        self.limiter = bytes_per_sec.and_then(worker::rate_limiter);
        self
    }

    pub fn with_expected_sha256(mut self, sha256: Option<String>) -> Self {
        self.expected_sha256 = sha256;
        self
    }

    /// Resumes from saved state when there is some, otherwise starts fresh.
    /// `fresh` drops any saved state first.
    pub async fn start(
        &self,
        url: &str,
        concurrency: usize,
        output_name: Option<&str>,
        fresh: bool,
        interrupt: impl Future<Output = ()>,
    ) -> Result<RunOutcome> {
        if !fresh {
            let store = StateStore::new(self.workspace.state_dir(url)?);
            if let Some(state) = store.consume().await? {
                info!(url, "found saved state, resuming");
                return self.resume(state, interrupt).await;
            }
        }
        // A fresh run clears any saved state for the URL.
        self.download(url, concurrency, output_name, interrupt).await
    }

    /// Fresh run: probe, plan into the working directory, transfer.
    pub async fn download(
        &self,
        url: &str,
        concurrency: usize,
        output_name: Option<&str>,
        interrupt: impl Future<Output = ()>,
    ) -> Result<RunOutcome> {
        let work_dir = self.workspace.work_dir(url)?;
        let state_dir = self.workspace.state_dir(url)?;
        // Leftovers of a run that crashed or failed cannot be trusted.
        remove_dir_if_exists(&work_dir).await?;
        StateStore::new(state_dir).discard().await?;

        let output_name = match output_name {
            Some(name) => checked_output_name(&self.output_dir, name)?,
            None => get_filename_from_url(url),
        };
        let client = self.transport.build_client(url)?;

        debug!(phase = ?Phase::Planning, url);
        let mut task = probe::probe(&client, url, concurrency, &output_name).await?;
        // Unknown length plans one open-ended segment from zero.
        task.ranges = plan::plan(
            task.segment_count,
            task.total_length.unwrap_or(0),
            url,
            &task.output_name,
            &work_dir,
        )
        .await?;

        self.progress.println(format!(
            "Downloading {} ({}) with {} part(s)",
            display_name(&task.output_name),
            size_report(task.total_length),
            task.segment_count
        ));
        self.run(client, task, Vec::new(), interrupt).await
    }

    /// Continues an interrupted run without probing.
    pub async fn resume(&self, state: DownloadState, interrupt: impl Future<Output = ()>) -> Result<RunOutcome> {
        let client = self.transport.build_client(&state.url)?;
        let (task, completed) = task_from_state(state);
        self.progress.println(format!(
            "Resuming {} ({} left) with {} part(s)",
            display_name(&task.output_name),
            size_report(task.remaining_bytes()),
            task.segment_count
        ));
        self.run(client, task, completed, interrupt).await
    }

    async fn run(
        &self,
        client: Client,
        task: DownloadTask,
        completed_before: Vec<PartRange>,
        interrupt: impl Future<Output = ()>,
    ) -> Result<RunOutcome> {
        let result = self.supervise(client, &task, interrupt).await;
        let ledger = match result {
            Ok(ledger) => ledger,
            Err(error) => {
                warn!(phase = ?Phase::Failed, url = %task.url, error = %error, "download failed");
                return Err(error);
            }
        };

        debug!(phase = ?Phase::Finishing, url = %task.url);
        let mut completed: Vec<PartRange> = completed_before;
        completed.extend(ledger.completed.iter().map(|&i| task.ranges[i].clone()));

        let outcome = if ledger.remaining.is_empty() {
            self.finish_merge(&task, completed).await?
        } else if task.resumable {
            self.finish_save(&task, ledger.remaining, completed).await?
        } else {
            remove_dir_if_exists(&self.workspace.work_dir(&task.url)?).await?;
            info!(url = %task.url, "interrupted download is not resumable, progress discarded");
            RunOutcome::Discarded
        };
        debug!(phase = ?Phase::Done, url = %task.url);
        Ok(outcome)
    }

    /// Spawns one worker per range and drains their events until every one
    /// of them has reported. A failed segment aborts the rest immediately.
    async fn supervise(
        &self,
        client: Client,
        task: &DownloadTask,
        interrupt: impl Future<Output = ()>,
    ) -> Result<RunLedger> {
        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            client,
            cancel: cancel.clone(),
            limiter: self.limiter.clone(),
        };
        let label = display_name(&task.output_name);

        let (tx, mut rx) = mpsc::channel(task.ranges.len().max(1));
        let mut workers = JoinSet::new();
        for (index, part) in task.ranges.iter().enumerate() {
            let job = SegmentJob {
                index,
                part: part.clone(),
                segment_count: task.segment_count,
                total_length: task.total_length,
            };
            let bar = self
                .progress
                .segment_bar(&label, index, part.expected_len(task.total_length));
            let ctx = ctx.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let event = worker::run_segment(ctx, job, bar).await;
                let _ = tx.send(event).await;
            });
        }
        drop(tx);
        debug!(phase = ?Phase::Running, url = %task.url, workers = task.ranges.len());

        let mut ledger = RunLedger::default();
        let mut outstanding = task.ranges.len();
        let mut interrupted = false;
        tokio::pin!(interrupt);

        while outstanding > 0 {
            tokio::select! {
                () = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    info!(phase = ?Phase::Interrupting, outstanding, "termination requested");
                    cancel.cancel();
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        return Err(Error::WorkerLost { outstanding });
                    };
                    outstanding -= 1;
                    match event {
                        SegmentEvent::Completed { index, .. } => ledger.completed.push(index),
                        SegmentEvent::Cancelled { index, remaining } => ledger.remaining.push((index, remaining)),
                        SegmentEvent::Failed { index, error } => {
                            debug!(index, "segment failed, aborting remaining workers");
                            cancel.cancel();
                            workers.abort_all();
                            return Err(error);
                        }
                    }
                }
            }
        }

        while workers.join_next().await.is_some() {}
        Ok(ledger)
    }

    async fn finish_merge(&self, task: &DownloadTask, mut completed: Vec<PartRange>) -> Result<RunOutcome> {
        // Arrival order is not byte order.
        completed.sort_by_key(|part| part.from);
        let parts: Vec<PathBuf> = completed.into_iter().map(|part| part.path).collect();

        ensure_within(&self.output_dir, Path::new(&task.output_name))?;
        let target = get_unique_filepath(&self.output_dir, &task.output_name);
        merger::merge_files(&parts, &target).await?;

        let sha256 = match &self.expected_sha256 {
            Some(expected) => Some(hashing::verify_file(&target, expected).await?),
            None => None,
        };

        remove_dir_if_exists(&self.workspace.work_dir(&task.url)?).await?;
        StateStore::new(self.workspace.state_dir(&task.url)?).discard().await?;
        info!(phase = ?Phase::Merged, path = %target.display(), "download merged");
        Ok(RunOutcome::Merged { path: target, sha256 })
    }

    async fn finish_save(
        &self,
        task: &DownloadTask,
        mut remaining: Vec<(usize, PartRange)>,
        completed: Vec<PartRange>,
    ) -> Result<RunOutcome> {
        debug!(phase = ?Phase::ResumedSave, url = %task.url);
        remaining.sort_by_key(|(index, _)| *index);
        let state = DownloadState {
            url: task.url.clone(),
            output_name: task.output_name.clone(),
            total_length: task.total_length,
            remaining: remaining.into_iter().map(|(_, part)| part).collect(),
            completed,
            saved_at: Local::now(),
        };

        let store = StateStore::new(self.workspace.state_dir(&task.url)?);
        let saved = store.save(&state).await?;
        remove_dir_if_exists(&self.workspace.work_dir(&task.url)?).await?;
        Ok(RunOutcome::Saved {
            state_dir: store.dir().to_path_buf(),
            remaining: saved.remaining.len(),
        })
    }
}

/// Rebuilds a task from a resume record. Returns the task for the remaining
/// ranges and the segments that were already complete.
pub fn task_from_state(state: DownloadState) -> (DownloadTask, Vec<PartRange>) {
    let task = DownloadTask {
        url: state.url,
        output_name: state.output_name,
        total_length: state.total_length,
        segment_count: state.remaining.len(),
        resumable: true,
        ranges: state.remaining,
    };
    (task, state.completed)
}

/// Resolves on the first hangup, interrupt, terminate or quit signal.
///
/// Handlers are registered by [`Termination::install`], before any worker
/// starts, so an early signal is not lost.
pub struct Termination {
    #[cfg(unix)]
    signals: Vec<tokio::signal::unix::Signal>,
}

impl Termination {
    pub fn install() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let kinds = [
                SignalKind::hangup(),
                SignalKind::interrupt(),
                SignalKind::terminate(),
                SignalKind::quit(),
            ];
            let signals = kinds
                .into_iter()
                .filter_map(|kind| match signal(kind) {
                    Ok(stream) => Some(stream),
                    Err(e) => {
                        warn!(error = %e, "cannot install signal handler");
                        None
                    }
                })
                .collect();
            Self { signals }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    #[cfg_attr(not(unix), allow(unused_mut))]
    pub async fn requested(mut self) {
        #[cfg(unix)]
        {
            if self.signals.is_empty() {
                return std::future::pending::<()>().await;
            }
            let waits = self.signals.iter_mut().map(|s| Box::pin(s.recv()));
            futures::future::select_all(waits).await;
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
