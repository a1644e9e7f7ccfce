//! Delimited (CSV) generator.
//!
//! Header line comes from the first row's keys. A field is quoted iff it
//! contains `,`, `"`, or a newline; embedded quotes are doubled; records
//! are LF-terminated. Null and missing values render empty, strings pass
//! through raw, anything else is JSON-serialized.

use std::io;

use futures::StreamExt;
use serde_json::Value;

use crate::error::{FormatError, Result};
use crate::options::StreamOptions;
use crate::{render_value, ChunkBuffer, Generated, RowStream};

/// Stream rows as `text/csv`.
pub fn generate_delimited(rows: RowStream, opts: StreamOptions) -> Generated {
    let inner = async_stream::try_stream! {
        let mut rows = rows;
        let mut buf = ChunkBuffer::new(opts.buffer_bytes);
        let mut header: Option<Vec<String>> = None;

        while let Some(row) = rows.next().await {
            let row = row?;
            if header.is_none() {
                let keys: Vec<String> = row.keys().cloned().collect();
                let line = encode_record(&keys)?;
                if let Some(chunk) = buf.push(&line) {
                    yield chunk;
                }
                header = Some(keys);
            }
            let fields: Vec<String> = header
                .iter()
                .flat_map(|keys| keys.iter())
                .map(|k| render_value(row.get(k).unwrap_or(&Value::Null)))
                .collect();
            let line = encode_record(&fields)?;
            if let Some(chunk) = buf.push(&line) {
                yield chunk;
            }
        }

        if let Some(rest) = buf.finish() {
            yield rest;
        }
    };
    Generated {
        bytes: Box::pin(inner.map(|r: Result<_>| r.map_err(io::Error::other))),
        content_type: "text/csv",
        extension: "csv",
    }
}

/// Encode one LF-terminated record with quote-when-necessary semantics.
fn encode_record(fields: &[String]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer.flush().map_err(FormatError::Io)?;
    writer
        .into_inner()
        .map_err(|e| FormatError::Io(io::Error::other(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{collect_bytes, rows_from};
    use serde_json::json;

    async fn csv_for(rows: Vec<serde_json::Value>) -> String {
        let out = generate_delimited(rows_from(rows), StreamOptions::default());
        assert_eq!(out.content_type, "text/csv");
        assert_eq!(out.extension, "csv");
        String::from_utf8(collect_bytes(out.bytes).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_header_from_first_row_keys() {
        let body = csv_for(vec![
            json!({"status": "paid", "amount": 10}),
            json!({"amount": 20, "status": "pending"}),
        ])
        .await;
        assert_eq!(body, "status,amount\npaid,10\npending,20\n");
    }

    #[tokio::test]
    async fn test_missing_keys_render_empty() {
        let body = csv_for(vec![
            json!({"a": 1, "b": 2}),
            json!({"a": 3}),
            json!({"b": 4, "c": "dropped-key"}),
        ])
        .await;
        assert_eq!(body, "a,b\n1,2\n3,\n,4\n");
    }

    #[tokio::test]
    async fn test_quoting_only_when_necessary() {
        let body = csv_for(vec![json!({
            "plain": "abc",
            "comma": "a,b",
            "quote": "say \"hi\"",
            "newline": "l1\nl2"
        })])
        .await;
        let mut lines = body.splitn(2, '\n');
        assert_eq!(lines.next().unwrap(), "plain,comma,quote,newline");
        assert_eq!(lines.next().unwrap(), "abc,\"a,b\",\"say \"\"hi\"\"\",\"l1\nl2\"\n");
    }

    #[tokio::test]
    async fn test_null_and_non_string_values() {
        let body = csv_for(vec![json!({
            "none": null,
            "flag": true,
            "nested": {"k": 1},
            "list": [1, 2]
        })])
        .await;
        assert_eq!(
            body,
            "none,flag,nested,list\n,true,\"{\"\"k\"\":1}\",\"[1,2]\"\n"
        );
    }

    #[tokio::test]
    async fn test_empty_input_is_empty_output() {
        assert_eq!(csv_for(vec![]).await, "");
    }

    #[tokio::test]
    async fn test_deterministic_output() {
        let rows = vec![json!({"x": 1, "y": "a"}), json!({"x": 2, "y": "b"})];
        let a = csv_for(rows.clone()).await;
        let b = csv_for(rows).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_small_buffer_chunks_concatenate_identically() {
        let rows: Vec<_> = (0..50).map(|i| json!({"i": i, "s": "x".repeat(20)})).collect();
        let big = csv_for(rows.clone()).await;
        let out = generate_delimited(
            rows_from(rows),
            StreamOptions { buffer_bytes: 7, ..Default::default() },
        );
        let small = String::from_utf8(collect_bytes(out.bytes).await.unwrap()).unwrap();
        assert_eq!(big, small);
    }
}
