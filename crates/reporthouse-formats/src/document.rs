//! Paginated document (PDF) generator.
//!
//! Renders a title page heading ("Report") followed by one text line per
//! row of the form `<index>. <JSON(row)>`, paginated onto US-Letter
//! pages. The row stream is consumed first so the limit check runs before
//! any page is laid out; if `document_max_rows` is set and exceeded, the
//! byte stream fails with `DocumentRowLimitExceeded` and nothing is
//! emitted.

use std::io;

use futures::StreamExt;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::Value;

use crate::error::{FormatError, Result};
use crate::options::StreamOptions;
use crate::{ChunkBuffer, Generated, RowStream};

const LINES_PER_PAGE: usize = 44;
const LINE_LEADING: i64 = 15;
const MARGIN_LEFT: i64 = 54;
const BODY_TOP: i64 = 714;
const TITLE_TOP: i64 = 752;

/// Stream rows as an `application/pdf` document.
pub fn generate_document(rows: RowStream, opts: StreamOptions) -> Generated {
    let inner = async_stream::try_stream! {
        let lines = collect_lines(rows, opts.document_max_rows).await?;
        let pdf = build_pdf(&lines)?;
        let mut buf = ChunkBuffer::new(opts.buffer_bytes);
        if let Some(chunk) = buf.push(&pdf) {
            yield chunk;
        }
        if let Some(rest) = buf.finish() {
            yield rest;
        }
    };
    Generated {
        bytes: Box::pin(inner.map(|r: Result<_>| r.map_err(io::Error::other))),
        content_type: "application/pdf",
        extension: "pdf",
    }
}

/// Consume the row stream into display lines, enforcing the row cap
/// before any page is laid out.
async fn collect_lines(mut rows: RowStream, max_rows: Option<u64>) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut count: u64 = 0;
    while let Some(row) = rows.next().await {
        let row = row?;
        count += 1;
        if let Some(max) = max_rows {
            if count > max {
                return Err(FormatError::DocumentRowLimitExceeded { max });
            }
        }
        let body = serde_json::to_string(&Value::Object(row))?;
        lines.push(format!("{count}. {body}"));
    }
    Ok(lines)
}

fn build_pdf(lines: &[String]) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    let mut pages = lines.chunks(LINES_PER_PAGE).peekable();
    let mut first = true;
    // At least one page, even with no rows.
    if pages.peek().is_none() {
        let content = page_content(&[], true)?;
        kids.push(add_page(&mut doc, pages_id, resources_id, content).into());
    }
    for chunk in pages {
        let content = page_content(chunk, first)?;
        kids.push(add_page(&mut doc, pages_id, resources_id, content).into());
        first = false;
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn page_content(lines: &[String], with_title: bool) -> Result<Vec<u8>> {
    let mut operations = Vec::new();
    if with_title {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 20.into()]));
        operations.push(Operation::new("Td", vec![MARGIN_LEFT.into(), TITLE_TOP.into()]));
        operations.push(Operation::new("Tj", vec![Object::string_literal("Report")]));
        operations.push(Operation::new("ET", vec![]));
    }
    if !lines.is_empty() {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
        operations.push(Operation::new("TL", vec![LINE_LEADING.into()]));
        operations.push(Operation::new("Td", vec![MARGIN_LEFT.into(), BODY_TOP.into()]));
        for line in lines {
            operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));
    }
    let content = Content { operations };
    Ok(content.encode()?)
}

fn add_page(
    doc: &mut Document,
    pages_id: lopdf::ObjectId,
    resources_id: lopdf::ObjectId,
    content: Vec<u8>,
) -> lopdf::ObjectId {
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{collect_bytes, rows_from};
    use futures::StreamExt as _;
    use serde_json::json;

    #[tokio::test]
    async fn test_document_carries_title_and_rows() {
        let out = generate_document(
            rows_from(vec![json!({"status": "paid"}), json!({"status": "pending"})]),
            StreamOptions::default(),
        );
        assert_eq!(out.content_type, "application/pdf");
        let bytes = collect_bytes(out.bytes).await.unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("(Report)"));
        assert!(text.contains("1. {\"status\":\"paid\"}"));
        assert!(text.contains("2. {\"status\":\"pending\"}"));
    }

    #[tokio::test]
    async fn test_empty_input_still_renders_title_page() {
        let out = generate_document(rows_from(vec![]), StreamOptions::default());
        let bytes = collect_bytes(out.bytes).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(String::from_utf8_lossy(&bytes).contains("(Report)"));
    }

    #[tokio::test]
    async fn test_rows_flow_onto_multiple_pages() {
        let rows: Vec<_> = (0..LINES_PER_PAGE + 1).map(|i| json!({"n": i})).collect();
        let out = generate_document(rows_from(rows), StreamOptions::default());
        let bytes = collect_bytes(out.bytes).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Count 2"));
    }

    #[tokio::test]
    async fn test_row_limit_fails_the_stream() {
        let out = generate_document(
            rows_from(vec![json!({"n": 1}), json!({"n": 2})]),
            StreamOptions { document_max_rows: Some(1), ..Default::default() },
        );
        let mut stream = out.bytes;
        let mut err = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => {}
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        let err = err.expect("stream should fail");
        assert!(err
            .to_string()
            .to_lowercase()
            .contains("document row limit exceeded"));
    }

    #[tokio::test]
    async fn test_limit_equal_to_row_count_is_fine() {
        let out = generate_document(
            rows_from(vec![json!({"n": 1}), json!({"n": 2})]),
            StreamOptions { document_max_rows: Some(2), ..Default::default() },
        );
        let bytes = collect_bytes(out.bytes).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
