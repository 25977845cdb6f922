//! Output file handling.
//!
//! The rendered config is written to a sibling temp file and renamed over
//! the target, so the shaping service never loads a partial file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors writing the rendered config or the history log.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode history record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl OutputError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        OutputError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Replace `path` with `contents` atomically.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), OutputError> {
    let tmp = temp_path(path);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| OutputError::io(&tmp, e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| OutputError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| OutputError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| OutputError::io(path, e))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Append `record` to `path` as one JSON line.
pub async fn append_json_line<T: Serialize>(path: &Path, record: &T) -> Result<(), OutputError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| OutputError::io(path, e))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| OutputError::io(path, e))
}

/// `.<name>.tmp` in the same directory, so the rename stays on one filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}
