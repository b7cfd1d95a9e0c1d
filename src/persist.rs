//! Writing the consolidated dataset and backing up the previous one.

use crate::error::Result;
use crate::types::Dataset;
use chrono::Local;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copy an existing output into `backup_dir` before it is overwritten.
///
/// Returns `None` when there is nothing to back up. Backups are named
/// `backup_<YYYYmmdd_HHMMSS>.json`; a numeric suffix keeps runs within the
/// same second from clobbering each other.
pub fn create_backup(output: &Path, backup_dir: &Path) -> Result<Option<PathBuf>> {
    if !output.is_file() {
        return Ok(None);
    }

    fs::create_dir_all(backup_dir)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let mut backup = backup_dir.join(format!("backup_{}.json", stamp));
    let mut counter = 1;
    while backup.exists() {
        backup = backup_dir.join(format!("backup_{}_{}.json", stamp, counter));
        counter += 1;
    }

    fs::copy(output, &backup)?;
    debug!("Backed up {} to {}", output.display(), backup.display());
    Ok(Some(backup))
}

/// Pretty JSON exactly as it is written to disk
pub fn render_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}

/// Write the dataset and return the sha256 of what was written
pub fn write_dataset(output: &Path, dataset: &Dataset) -> Result<String> {
    write_json(output, dataset)
}

/// Write pretty JSON atomically: a sibling temp file renamed over the target
pub fn write_json<T: Serialize>(output: &Path, value: &T) -> Result<String> {
    let json = render_json(value)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = output
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = output.with_file_name(tmp_name);

    fs::write(&tmp, &json)?;
    fs::rename(&tmp, output)?;
    Ok(fingerprint(&json))
}

/// Hex sha256 of the serialized dataset
pub fn fingerprint(json: &str) -> String {
    let digest = Sha256::digest(json.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
