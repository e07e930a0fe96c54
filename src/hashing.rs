use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

pub async fn calculate_hash(filepath: &Path) -> std::io::Result<String> {
    let mut file = File::open(filepath).await?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compares the file's SHA-256 against `expected` (hex, any case).
pub async fn verify_file(filepath: &Path, expected: &str) -> Result<String> {
    let actual = calculate_hash(filepath).await.map_err(|source| Error::VerifyIo {
        path: filepath.to_path_buf(),
        source,
    })?;
    if !expected.trim().eq_ignore_ascii_case(&actual) {
        return Err(Error::ChecksumMismatch {
            path: filepath.to_path_buf(),
            expected: expected.trim().to_lowercase(),
            actual,
        });
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // SHA-256 of "Hello Rust"
    const HELLO_RUST: &str = "DC5D63134FB696626C4BF28E1232434AB040ACC10A66CFEE55DACDD70DAE82A3";

    #[tokio::test]
    async fn verify_accepts_matching_hash() -> anyhow::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(temp_file, "Hello Rust")?;
        let hash = verify_file(temp_file.path(), HELLO_RUST).await?;
        assert_eq!(hash, HELLO_RUST.to_lowercase());
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_other_hash() -> anyhow::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(temp_file, "Hello Rust")?;
        let err = verify_file(temp_file.path(), "badhash123").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Verify);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_file_is_a_verify_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_file(&dir.path().join("missing.bin"), HELLO_RUST)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VerifyIo { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Verify);
    }
}
