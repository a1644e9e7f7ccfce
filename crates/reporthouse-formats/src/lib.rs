//! Streaming Format Generators
//!
//! Each generator consumes a lazy stream of rows exactly once, in order,
//! and produces a byte stream plus its content type and file extension.
//! The header/schema of every format is derived from the *first* row's
//! key ordering; later rows with different key sets are projected onto the
//! first row's keys, substituting missing values as empty.
//!
//! ## Formats
//!
//! | Format | Content type | Extension |
//! |---|---|---|
//! | Delimited | `text/csv` | `csv` |
//! | Structured-object array | `application/json` | `json` |
//! | Spreadsheet | spreadsheet ML MIME | `xlsx` |
//! | Paginated document | `application/pdf` | `pdf` |
//! | Archive | `application/zip` | `zip` |
//!
//! ## Memory discipline
//!
//! Delimited and JSON output is chunked through a small in-memory buffer
//! (`StreamOptions::buffer_bytes`). Spreadsheet and archive output is
//! spooled row-by-row (entry-by-entry) through an anonymous temp file,
//! never holding a whole workbook or archive in memory. The paginated
//! document is bounded by `StreamOptions::document_max_rows` and fails
//! with `DocumentRowLimitExceeded` the moment the limit is passed.
//!
//! Byte streams carry `std::io::Error` items so the upload path can
//! consume them without knowing about this crate's error enum; generator
//! failures are wrapped via `io::Error::other` and keep their message.

pub mod archive;
pub mod delimited;
pub mod document;
pub mod error;
pub mod json_array;
pub mod options;
pub mod spreadsheet;

use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;

use reporthouse_core::{ReportFormat, Row};

pub use archive::{generate_archive, ArchiveEntry};
pub use delimited::generate_delimited;
pub use document::generate_document;
pub use error::{FormatError, Result};
pub use json_array::generate_json_array;
pub use options::StreamOptions;
pub use spreadsheet::generate_spreadsheet;

/// A lazy, single-consumer stream of report rows.
pub type RowStream = BoxStream<'static, io::Result<Row>>;

/// A lazy, single-consumer stream of artifact bytes.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// The output of a generator: the byte stream and its metadata.
pub struct Generated {
    pub bytes: ByteStream,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Dispatch a row stream to the generator for `format`.
///
/// `Archive` is not a row-stream format (it concatenates entry streams,
/// see [`generate_archive`]) and is rejected here.
pub fn generate_rows(
    format: ReportFormat,
    rows: RowStream,
    opts: StreamOptions,
) -> Result<Generated> {
    match format {
        ReportFormat::Delimited => Ok(generate_delimited(rows, opts)),
        ReportFormat::StructuredObject => Ok(generate_json_array(rows, opts)),
        ReportFormat::Spreadsheet => Ok(generate_spreadsheet(rows, opts)),
        ReportFormat::PaginatedDocument => Ok(generate_document(rows, opts)),
        ReportFormat::Archive => Err(FormatError::NotARowFormat),
    }
}

/// Render a cell value: null/missing is empty, strings pass through,
/// everything else is JSON-serialized.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accumulates serialized output and releases it in `cap`-sized chunks.
pub(crate) struct ChunkBuffer {
    buf: Vec<u8>,
    cap: usize,
}

impl ChunkBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { buf: Vec::with_capacity(cap), cap }
    }

    /// Append bytes; returns a full chunk once the buffer reaches capacity.
    pub(crate) fn push(&mut self, data: &[u8]) -> Option<Bytes> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.cap {
            Some(Bytes::from(std::mem::take(&mut self.buf)))
        } else {
            None
        }
    }

    /// Release whatever remains.
    pub(crate) fn finish(mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(Bytes::from(std::mem::take(&mut self.buf)))
        }
    }
}

/// Stream a spooled temp file back out in `buffer_bytes`-sized chunks.
pub(crate) fn stream_spooled_file(mut file: std::fs::File, buffer_bytes: usize) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        use std::io::Seek;
        use tokio::io::AsyncReadExt;

        file.seek(io::SeekFrom::Start(0))?;
        let mut file = tokio::fs::File::from_std(file);
        let cap = buffer_bytes.max(1);
        loop {
            let mut buf = vec![0u8; cap];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            buf.truncate(n);
            yield Bytes::from(buf);
        }
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_buffer_releases_at_capacity() {
        let mut buf = ChunkBuffer::new(4);
        assert!(buf.push(b"ab").is_none());
        let chunk = buf.push(b"cde").unwrap();
        assert_eq!(&chunk[..], b"abcde");
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_chunk_buffer_finish_releases_remainder() {
        let mut buf = ChunkBuffer::new(1024);
        assert!(buf.push(b"tail").is_none());
        assert_eq!(&buf.finish().unwrap()[..], b"tail");
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&Value::Null), "");
        assert_eq!(render_value(&Value::String("x".into())), "x");
        assert_eq!(render_value(&serde_json::json!(10)), "10");
        assert_eq!(render_value(&serde_json::json!({"a": 1})), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_archive_is_not_a_row_format() {
        let rows = test_util::rows_from(vec![]);
        let err = generate_rows(ReportFormat::Archive, rows, StreamOptions::default());
        assert!(matches!(err, Err(FormatError::NotARowFormat)));
    }
}
