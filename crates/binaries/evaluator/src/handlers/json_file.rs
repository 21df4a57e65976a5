use color_eyre::eyre::{Result, WrapErr};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .wrap_err_with(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_slice(&bytes).wrap_err_with(|| format!("Invalid JSON in {}", path.display()))
}

/// Pretty-printed, non-ASCII kept as-is.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    tokio::fs::write(path, bytes)
        .await
        .wrap_err_with(|| format!("Cannot write {}", path.display()))
}
