//! NDJSON Snapshot Files
//!
//! The snapshot archive strategy materializes the source cursor once
//! into a temp file — one JSON object per LF-terminated line, UTF-8 —
//! then opens an independent reader over it for each included format.
//!
//! `write_snapshot` aborts with `SnapshotSizeExceeded` the moment
//! cumulative bytes would pass the cap, destroying the partial file;
//! the reader skips empty lines.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use reporthouse_formats::RowStream;

use crate::error::{Result, WorkerError};

/// A written snapshot file.
#[derive(Debug)]
pub struct Snapshot {
    pub path: PathBuf,
    pub row_count: u64,
    pub bytes: u64,
}

/// Write `rows` to `<dir>/<name>` as NDJSON, bounded by `max_bytes`.
pub async fn write_snapshot(
    rows: RowStream,
    dir: &Path,
    name: &str,
    max_bytes: u64,
    buffer_bytes: usize,
    on_row: Option<Arc<dyn Fn(u64) + Send + Sync>>,
) -> Result<Snapshot> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(name);

    let result = write_inner(rows, &path, max_bytes, buffer_bytes, on_row).await;
    if result.is_err() {
        // destroy the partial file on any failure
        let _ = fs::remove_file(&path).await;
    }
    result
}

async fn write_inner(
    mut rows: RowStream,
    path: &Path,
    max_bytes: u64,
    buffer_bytes: usize,
    on_row: Option<Arc<dyn Fn(u64) + Send + Sync>>,
) -> Result<Snapshot> {
    let file = fs::File::create(path).await?;
    let mut writer = BufWriter::with_capacity(buffer_bytes.max(1), file);
    let mut bytes: u64 = 0;
    let mut row_count: u64 = 0;

    while let Some(row) = rows.next().await {
        let row = row?;
        let mut line = serde_json::to_vec(&Value::Object(row))?;
        line.push(b'\n');
        if bytes + line.len() as u64 > max_bytes {
            return Err(WorkerError::SnapshotSizeExceeded { max: max_bytes });
        }
        writer.write_all(&line).await?;
        bytes += line.len() as u64;
        row_count += 1;
        if let Some(on_row) = &on_row {
            on_row(row_count);
        }
    }
    writer.flush().await?;
    debug!(path = %path.display(), row_count, bytes, "snapshot written");

    Ok(Snapshot { path: path.to_path_buf(), row_count, bytes })
}

/// Lazily re-read a snapshot, one row per non-empty line.
pub fn snapshot_rows(path: PathBuf, buffer_bytes: usize) -> RowStream {
    Box::pin(async_stream::try_stream! {
        let file = fs::File::open(&path).await?;
        let reader = BufReader::with_capacity(buffer_bytes.max(1), file);
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let row = parse_line(trimmed)?;
            yield row;
        }
    })
}

fn parse_line(line: &str) -> io::Result<reporthouse_core::Row> {
    let value: Value = serde_json::from_str(line).map_err(io::Error::other)?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(io::Error::other(format!(
            "snapshot line is not an object: {other}"
        ))),
    }
}
