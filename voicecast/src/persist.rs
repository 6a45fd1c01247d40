//! Atomic file persistence helper: write to a temp file, then rename it
//! over the destination so readers never observe a partial write.

use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;
use tokio::{fs, task};

/// Serializes `value` as pretty JSON and atomically replaces the file at
/// `path` with it.
///
/// # Errors
///
/// If serialization, the temp-file write, or the rename fails.
pub async fn write_json_atomic<T: Serialize + Send + 'static>(
    path: &Path,
    value: T,
) -> anyhow::Result<()> {
    let path = path.to_owned();
    task::spawn_blocking(move || write_json_atomic_blocking(&path, &value))
        .await
        .context("atomic write task panicked")?
}

fn write_json_atomic_blocking<T: Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .context("failed to serialize value as JSON")?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("voicecast"),
        )
        .suffix(".tmp")
        .tempfile_in(dir)
        .context("failed to create temp file for atomic write")?;

    std::fs::write(tmp.path(), &bytes)
        .context("failed to write temp file contents")?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .context("failed to rename temp file into place")?;
    Ok(())
}

/// Reads and parses the JSON file at `path`, returning `default` if it
/// does not yet exist.
///
/// # Errors
///
/// If the file exists but cannot be read or parsed.
pub async fn read_json_or_default<T>(path: &Path) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Ok(T::default())
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    }
}
