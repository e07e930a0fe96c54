use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

const DISPLAY_NAME_BUDGET: usize = 32;
const KEY_HASH_LEN: usize = 16;
const KEY_NAME_BUDGET: usize = 32;

/// Last path segment of the URL, percent-decoded and sanitized.
///
/// Falls back to a name derived from the URL itself so that reruns of the same
/// download always merge into the same file name.
pub fn get_filename_from_url(url_str: &str) -> String {
    Url::parse(url_str)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .map(|segment| percent_decode_str(&segment).decode_utf8_lossy().to_string())
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty() && name.chars().any(|c| c != '.'))
        .unwrap_or_else(|| {
            format!(
                "download-{}",
                Uuid::new_v5(&Uuid::NAMESPACE_URL, url_str.as_bytes())
            )
        })
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(
        |c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_',
        "_",
    )
}

/// Merge name given by the caller, sanitized and checked to land directly
/// inside `output_dir`.
pub fn checked_output_name(output_dir: &Path, name: &str) -> Result<String> {
    let name = sanitize_filename(name);
    ensure_within(output_dir, Path::new(&name))?;
    Ok(name)
}

/// Shortens a name for progress output. Long names keep their tail so the
/// extension stays visible.
pub fn display_name(name: &str) -> String {
    let count = name.chars().count();
    if count <= DISPLAY_NAME_BUDGET {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (DISPLAY_NAME_BUDGET - 1)).collect();
    format!("…{}", tail)
}

pub fn get_unique_filepath(dir: &Path, filename: &str) -> PathBuf {
    let mut path = dir.join(filename);
    let mut counter = 1;

    let original = Path::new(filename);
    let file_stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    let extension = original
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    while path.exists() {
        let new_filename = if extension.is_empty() {
            format!("{}_{}", file_stem, counter)
        } else {
            format!("{}_{}.{}", file_stem, counter, extension)
        };

        path = dir.join(new_filename);
        counter += 1;
    }
    path
}

/// Deterministic, separator-free directory name for a URL. Only the tail of
/// long names is kept so the key stays well under the file name limit.
pub fn task_key(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let name = get_filename_from_url(url);
    let skip = name.chars().count().saturating_sub(KEY_NAME_BUDGET);
    let tail: String = name.chars().skip(skip).collect();
    format!("{}-{}", tail, &digest[..KEY_HASH_LEN])
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Rejects any path that lands outside `root` once normalized.
pub fn ensure_within(root: &Path, path: &Path) -> Result<PathBuf> {
    let root = normalize(root);
    let resolved = normalize(&root.join(path));
    if resolved == root || !resolved.starts_with(&root) {
        return Err(Error::PathSafety {
            path: resolved,
            root,
        });
    }
    Ok(resolved)
}

/// Filesystem layout for transient and persisted task data.
///
/// ```text
/// <root>/work/<key>/         segment files of a running task
/// <root>/state/<key>/        segment files + state.json of an interrupted task
/// ```
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/Downloads/prdl`
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
        Ok(Self::new(home.join("Downloads").join("prdl")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn work_dir(&self, url: &str) -> Result<PathBuf> {
        ensure_within(&self.root, &Path::new("work").join(task_key(url)))
    }

    pub fn state_root(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn state_dir(&self, url: &str) -> Result<PathBuf> {
        ensure_within(&self.root, &Path::new("state").join(task_key(url)))
    }
}
