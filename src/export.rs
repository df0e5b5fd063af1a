//! Writing fetched records to disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::record::PostRecord;

/// On-disk layout, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// A single pretty-printed JSON array.
    Json,
    /// One compact JSON object per line.
    JsonLines,
}

impl ExportFormat {
    /// `.jsonl` and `.ndjson` select JSON Lines; anything else is a JSON array.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jsonl" | "ndjson") => Self::JsonLines,
            _ => Self::Json,
        }
    }
}

/// Default output name: `posts_<username>_<YYYYmmdd_HHMMSS>.json`.
///
/// Graph API runs have no username and use `graph_api` instead.
#[must_use]
pub fn default_filename(username: Option<&str>, now: DateTime<Utc>) -> PathBuf {
    let owner: String = username
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or("graph_api")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
        .collect();
    PathBuf::from(format!("posts_{owner}_{}.json", now.format("%Y%m%d_%H%M%S")))
}

/// Write `records` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_records(path: &Path, records: &[PostRecord]) -> Result<ExportFormat> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let format = ExportFormat::from_path(path);
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, records)
                .context("Failed to serialize records")?;
            writer.write_all(b"\n")?;
        }
        ExportFormat::JsonLines => {
            for record in records {
                serde_json::to_writer(&mut writer, record)
                    .with_context(|| format!("Failed to serialize post {}", record.id()))?;
                writer.write_all(b"\n")?;
            }
        }
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write output file: {}", path.display()))?;

    info!(
        path = %path.display(),
        records = records.len(),
        format = ?format,
        "Exported records"
    );
    Ok(format)
}
