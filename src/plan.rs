use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::ensure_within;

/// One segment of work: an inclusive byte range of `url` and the local file
/// receiving it.
///
/// The last segment of a task uses `to == total_length` as the open-end
/// sentinel and is requested as `bytes=from-`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PartRange {
    pub url: String,
    pub path: PathBuf,
    pub from: u64,
    pub to: u64,
}

impl PartRange {
    /// Bytes still expected for this range, if the total length is known.
    pub fn expected_len(&self, total_length: Option<u64>) -> Option<u64> {
        let total = total_length?;
        if self.to == total {
            Some(total.saturating_sub(self.from))
        } else {
            Some((self.to + 1).saturating_sub(self.from))
        }
    }

    /// Range describing what is left after `written` bytes landed on disk.
    pub fn remaining_after(&self, written: u64) -> PartRange {
        PartRange {
            from: self.from + written,
            ..self.clone()
        }
    }
}

/// `<dir>/<output_name>.part<index>`, rejected if it resolves outside `dir`.
pub fn segment_path(dir: &Path, output_name: &str, index: usize) -> Result<PathBuf> {
    ensure_within(dir, Path::new(&format!("{}.part{}", output_name, index)))
}

/// Splits `[0, total_length]` into `segment_count` contiguous ranges.
///
/// Every segment but the last is `size` bytes long; the last one absorbs the
/// remainder and ends on the `total_length` sentinel.
pub fn plan_ranges(
    segment_count: usize,
    total_length: u64,
    url: &str,
    output_name: &str,
    dir: &Path,
) -> Result<Vec<PartRange>> {
    if segment_count == 0 {
        return Err(Error::InvalidSegmentCount(segment_count));
    }
    let count = segment_count as u64;
    let size = total_length / count;
    if size == 0 && count > 1 {
        return Err(Error::InvalidSegmentCount(segment_count));
    }

    (0..count)
        .map(|i| {
            let from = i * size;
            let to = if i == count - 1 {
                total_length
            } else {
                (i + 1) * size - 1
            };
            Ok(PartRange {
                url: url.to_string(),
                path: segment_path(dir, output_name, i as usize)?,
                from,
                to,
            })
        })
        .collect()
}

/// Creates `dir` and its parents, owner-only on unix.
pub(crate) async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

/// Plans the ranges and makes sure the directory for their files exists.
pub async fn plan(
    segment_count: usize,
    total_length: u64,
    url: &str,
    output_name: &str,
    dir: &Path,
) -> Result<Vec<PartRange>> {
    let ranges = plan_ranges(segment_count, total_length, url, output_name, dir)?;
    create_private_dir(dir)
        .await
        .map_err(|source| Error::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    debug!(segments = ranges.len(), dir = %dir.display(), "planned ranges");
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://example.com/file.bin";

    fn ranges(count: usize, total: u64) -> Vec<PartRange> {
        plan_ranges(count, total, URL, "file.bin", Path::new("/tmp/work")).unwrap()
    }

    #[test]
    fn ten_bytes_two_segments() {
        let parts = ranges(2, 10);
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].from, parts[0].to), (0, 4));
        assert_eq!((parts[1].from, parts[1].to), (5, 10));
        assert_eq!(parts[1].path, Path::new("/tmp/work/file.bin.part1"));
    }

    #[test]
    fn partition_is_contiguous_and_complete() {
        for total in [1u64, 7, 10, 99, 100, 1_000_003] {
            for count in 1..=8usize {
                if total / (count as u64) == 0 && count > 1 {
                    continue;
                }
                let parts = ranges(count, total);
                assert_eq!(parts.len(), count);
                assert_eq!(parts[0].from, 0);
                assert_eq!(parts.last().unwrap().to, total);
                for pair in parts.windows(2) {
                    assert_eq!(pair[0].to + 1, pair[1].from);
                }
                let covered: u64 = parts
                    .iter()
                    .map(|p| p.expected_len(Some(total)).unwrap())
                    .sum();
                assert_eq!(covered, total);
            }
        }
    }

    #[test]
    fn replanning_is_idempotent() {
        assert_eq!(ranges(3, 1000), ranges(3, 1000));
    }

    #[test]
    fn zero_segments_is_rejected() {
        let err = plan_ranges(0, 10, URL, "file.bin", Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, Error::InvalidSegmentCount(0)));
    }

    #[test]
    fn more_segments_than_bytes_is_rejected() {
        assert!(plan_ranges(4, 3, URL, "file.bin", Path::new("/tmp")).is_err());
    }

    #[test]
    fn segment_paths_stay_inside_the_directory() {
        let err = plan_ranges(2, 10, URL, "../../escaped", Path::new("/tmp/work")).unwrap_err();
        assert!(matches!(err, Error::PathSafety { .. }));
        assert!(plan_ranges(1, 10, URL, "..", Path::new("/tmp/work")).is_ok());
        assert!(plan_ranges(1, 10, URL, "a/../../b", Path::new("/tmp/work")).is_err());
    }

    #[tokio::test]
    async fn rejected_plan_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work").join("task");
        assert!(plan(1, 10, URL, "../x", &work).await.is_err());
        assert!(!work.exists());
    }

    #[test]
    fn remaining_after_advances_start_only() {
        let part = &ranges(2, 10)[0];
        let rest = part.remaining_after(3);
        assert_eq!((rest.from, rest.to), (3, 4));
        assert_eq!(rest.path, part.path);
        assert_eq!(part.from, 0);
        assert_eq!(rest.expected_len(Some(10)), Some(2));
    }

    #[tokio::test]
    async fn plan_creates_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work").join("task");
        let parts = plan(2, 10, URL, "file.bin", &work).await.unwrap();
        assert!(work.is_dir());
        assert!(parts.iter().all(|p| p.path.starts_with(&work)));
    }
}
