use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{self, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use crate::error::{Error, Result};

/// Concatenates `parts` into `output` in the order given.
///
/// The output is removed again if any input cannot be read.
pub async fn merge_files(parts: &[PathBuf], output: &Path) -> Result<()> {
    let result = concat(parts, output).await;
    if result.is_err() {
        let _ = fs::remove_file(output).await;
    }
    result
}

async fn concat(parts: &[PathBuf], output: &Path) -> Result<()> {
    let merge_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| Error::Merge { path, source }
    };

    let file = File::create(output).await.map_err(merge_err(output))?;
    let mut writer = BufWriter::new(file);

    for part in parts {
        let input = File::open(part).await.map_err(merge_err(part))?;
        let mut reader = BufReader::new(input);
        let copied = io::copy(&mut reader, &mut writer)
            .await
            .map_err(merge_err(part))?;
        debug!(part = %part.display(), bytes = copied, "merged segment");
    }

    writer.flush().await.map_err(merge_err(output))?;
    Ok(())
}
