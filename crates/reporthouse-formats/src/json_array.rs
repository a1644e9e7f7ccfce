//! Structured-object array generator.
//!
//! Emits a single JSON array: `[` + comma-separated serialized rows + `]`.
//! Empty input emits exactly `[]`. Row order is preserved.

use std::io;

use futures::StreamExt;
use serde_json::Value;

use crate::error::Result;
use crate::options::StreamOptions;
use crate::{ChunkBuffer, Generated, RowStream};

/// Stream rows as one `application/json` array.
pub fn generate_json_array(rows: RowStream, opts: StreamOptions) -> Generated {
    let inner = async_stream::try_stream! {
        let mut rows = rows;
        let mut buf = ChunkBuffer::new(opts.buffer_bytes);
        let mut first = true;

        if let Some(chunk) = buf.push(b"[") {
            yield chunk;
        }
        while let Some(row) = rows.next().await {
            let row = row?;
            if !first {
                if let Some(chunk) = buf.push(b",") {
                    yield chunk;
                }
            }
            first = false;
            let encoded = serde_json::to_vec(&Value::Object(row))?;
            if let Some(chunk) = buf.push(&encoded) {
                yield chunk;
            }
        }
        if let Some(chunk) = buf.push(b"]") {
            yield chunk;
        }
        if let Some(rest) = buf.finish() {
            yield rest;
        }
    };
    Generated {
        bytes: Box::pin(inner.map(|r: Result<_>| r.map_err(io::Error::other))),
        content_type: "application/json",
        extension: "json",
    }
}
