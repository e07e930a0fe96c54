//! Resume records for interrupted downloads.
//!
//! An interrupted, resumable task is persisted as a directory holding its
//! segment files and a `state.json` describing what is left to fetch. The
//! record is read back once when the download is resumed.
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::plan::{create_private_dir, PartRange};

pub const STATE_FILE: &str = "state.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloadState {
    pub url: String,
    pub output_name: String,
    /// Keeps the open-end sentinel of the last segment meaningful on resume.
    pub total_length: Option<u64>,
    /// Ranges still to transfer, each starting at its first unwritten byte.
    pub remaining: Vec<PartRange>,
    /// Segments finished before the interruption; merged on completion.
    #[serde(default)]
    pub completed: Vec<PartRange>,
    pub saved_at: DateTime<Local>,
}

impl DownloadState {
    pub fn remaining_bytes(&self) -> Option<u64> {
        self.remaining
            .iter()
            .map(|r| r.expected_len(self.total_length))
            .sum()
    }
}

/// Persistence for one task's state directory.
///
/// Saving moves the segment files first and writes the record last; a crash
/// in between leaves segment files without a record.
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Moves every referenced segment file into the state directory and
    /// writes the record. Returns the state with its paths rewritten.
    pub async fn save(&self, state: &DownloadState) -> Result<DownloadState> {
        create_private_dir(&self.dir)
            .await
            .map_err(|e| Error::state_io(&self.dir, e))?;

        let mut saved = state.clone();
        for part in saved.remaining.iter_mut().chain(saved.completed.iter_mut()) {
            part.path = self.adopt(&part.path).await?;
        }

        let json = serde_json::to_string_pretty(&saved).map_err(|source| Error::StateFormat {
            path: self.record_path(),
            source,
        })?;
        fs::write(self.record_path(), json)
            .await
            .map_err(|e| Error::state_io(self.record_path(), e))?;

        info!(dir = %self.dir.display(), remaining = saved.remaining.len(), "saved download state");
        Ok(saved)
    }

    async fn adopt(&self, path: &Path) -> Result<PathBuf> {
        let Some(name) = path.file_name() else {
            return Err(Error::state_io(path, std::io::Error::other("segment path has no file name")));
        };
        let target = self.dir.join(name);
        if target == path {
            return Ok(target);
        }
        match fs::rename(path, &target).await {
            Ok(()) => {
                debug!(from = %path.display(), to = %target.display(), "moved segment file");
                Ok(target)
            }
            // Cancelled before the first byte arrived: nothing on disk yet.
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(target),
            Err(e) => Err(Error::state_io(path, e)),
        }
    }

    /// Reads the record, `None` when the task has no saved state.
    pub async fn load(&self) -> Result<Option<DownloadState>> {
        let path = self.record_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::state_io(path, e)),
        };
        let state = serde_json::from_str(&content).map_err(|source| Error::StateFormat { path, source })?;
        Ok(Some(state))
    }

    /// Loads the record and deletes it, keeping the segment files. Segment
    /// files grow as soon as a resumed run starts, so the old record must not
    /// be read twice.
    pub async fn consume(&self) -> Result<Option<DownloadState>> {
        let Some(state) = self.load().await? else {
            return Ok(None);
        };
        fs::remove_file(self.record_path())
            .await
            .map_err(|e| Error::state_io(self.record_path(), e))?;
        Ok(Some(state))
    }

    /// Removes the record together with the segment files.
    pub async fn discard(&self) -> Result<()> {
        remove_dir_if_exists(&self.dir).await
    }
}

pub(crate) async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::state_io(dir, e)),
    }
}

/// Every readable record under `state_root`, oldest first.
pub async fn list_saved(state_root: &Path) -> Result<Vec<DownloadState>> {
    let mut entries = match fs::read_dir(state_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::state_io(state_root, e)),
    };

    let mut states = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::state_io(state_root, e))?
    {
        if !entry.path().is_dir() {
            continue;
        }
        match StateStore::new(entry.path()).load().await {
            Ok(Some(state)) => states.push(state),
            Ok(None) => {}
            Err(e) => debug!(dir = %entry.path().display(), error = %e, "skipping unreadable state"),
        }
    }
    states.sort_by_key(|s| s.saved_at);
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn part(dir: &Path, index: usize, from: u64, to: u64) -> PartRange {
        PartRange {
            url: "http://example.com/file.bin".into(),
            path: dir.join(format!("file.bin.part{}", index)),
            from,
            to,
        }
    }

    #[tokio::test]
    async fn save_moves_segments_and_load_reads_back() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work)?;
        std::fs::write(work.join("file.bin.part0"), b"Hello")?;
        std::fs::write(work.join("file.bin.part1"), b"Wo")?;

        let state = DownloadState {
            url: "http://example.com/file.bin".into(),
            output_name: "file.bin".into(),
            total_length: Some(10),
            remaining: vec![part(&work, 1, 7, 10)],
            completed: vec![part(&work, 0, 0, 4)],
            saved_at: Local::now(),
        };

        let store = StateStore::new(tmp.path().join("state"));
        let saved = store.save(&state).await?;

        assert!(!work.join("file.bin.part1").exists());
        assert_eq!(std::fs::read(store.dir().join("file.bin.part1"))?, b"Wo");
        assert_eq!(saved.remaining[0].path, store.dir().join("file.bin.part1"));
        assert_eq!(saved.remaining[0].from, 7);

        let loaded = store.load().await?.expect("state present");
        assert_eq!(loaded, saved);
        assert_eq!(loaded.remaining_bytes(), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn saving_in_place_is_a_rewrite() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = StateStore::new(tmp.path());
        std::fs::write(tmp.path().join("file.bin.part0"), b"abc")?;
        let state = DownloadState {
            url: "http://example.com/file.bin".into(),
            output_name: "file.bin".into(),
            total_length: Some(10),
            remaining: vec![part(tmp.path(), 0, 3, 10)],
            completed: vec![],
            saved_at: Local::now(),
        };
        store.save(&state).await?;
        assert_eq!(std::fs::read(tmp.path().join("file.bin.part0"))?, b"abc");
        Ok(())
    }

    #[tokio::test]
    async fn missing_segment_file_is_tolerated() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = StateStore::new(tmp.path().join("state"));
        let state = DownloadState {
            url: "http://example.com/file.bin".into(),
            output_name: "file.bin".into(),
            total_length: Some(10),
            remaining: vec![part(&tmp.path().join("work"), 0, 0, 10)],
            completed: vec![],
            saved_at: Local::now(),
        };
        let saved = store.save(&state).await?;
        assert_eq!(saved.remaining[0].from, 0);
        Ok(())
    }

    #[tokio::test]
    async fn consume_reads_record_once() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = StateStore::new(tmp.path());
        std::fs::write(tmp.path().join("file.bin.part0"), b"abc")?;
        store
            .save(&DownloadState {
                url: "http://example.com/file.bin".into(),
                output_name: "file.bin".into(),
                total_length: Some(10),
                remaining: vec![part(tmp.path(), 0, 3, 10)],
                completed: vec![],
                saved_at: Local::now(),
            })
            .await?;

        assert!(store.consume().await?.is_some());
        assert!(store.consume().await?.is_none());
        assert!(tmp.path().join("file.bin.part0").exists());
        Ok(())
    }

    #[tokio::test]
    async fn discard_removes_record_and_segments() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = StateStore::new(tmp.path().join("task"));
        store
            .save(&DownloadState {
                url: "http://example.com/file.bin".into(),
                output_name: "file.bin".into(),
                total_length: Some(10),
                remaining: vec![],
                completed: vec![],
                saved_at: Local::now(),
            })
            .await?;
        std::fs::write(store.dir().join("file.bin.part0"), b"abc")?;

        store.discard().await?;
        assert!(!store.dir().exists());
        // Nothing saved is fine too.
        store.discard().await?;
        Ok(())
    }

    #[tokio::test]
    async fn load_without_record_is_none() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        assert!(StateStore::new(tmp.path()).load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_record_is_an_error() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        std::fs::write(tmp.path().join(STATE_FILE), "{ not json")?;
        let err = StateStore::new(tmp.path()).load().await.unwrap_err();
        assert!(matches!(err, Error::StateFormat { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn list_saved_skips_empty_dirs() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        std::fs::create_dir_all(tmp.path().join("empty"))?;
        let store = StateStore::new(tmp.path().join("task"));
        store
            .save(&DownloadState {
                url: "http://example.com/a".into(),
                output_name: "a".into(),
                total_length: Some(1),
                remaining: vec![],
                completed: vec![],
                saved_at: Local::now(),
            })
            .await?;
        let states = list_saved(tmp.path()).await?;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].url, "http://example.com/a");
        Ok(())
    }
}
