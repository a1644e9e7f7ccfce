//! Spreadsheet (XLSX) generator.
//!
//! A workbook is a ZIP of XML parts. The worksheet is written row by row
//! straight into the zip entry as rows arrive, with cell text carried as
//! inline strings, so no full-workbook model is ever held in memory. The
//! zip spools through an anonymous temp file and is streamed back out in
//! `buffer_bytes` chunks once the last row is committed.
//!
//! The first row's keys become the header row; later rows are projected
//! onto those keys. Numeric values are written as numbers, everything
//! else as inline strings.

use std::io::{self, Write};

use futures::StreamExt;
use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::options::StreamOptions;
use crate::{render_value, stream_spooled_file, Generated, RowStream};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Report" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

const SHEET_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#;

const SHEET_CLOSE: &str = "</sheetData></worksheet>";

/// Stream rows as a single-worksheet XLSX workbook.
pub fn generate_spreadsheet(rows: RowStream, opts: StreamOptions) -> Generated {
    let buffer_bytes = opts.buffer_bytes;
    let inner = async_stream::try_stream! {
        let spool = tempfile::tempfile()?;
        let mut zip = ZipWriter::new(spool);
        let entry = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("[Content_Types].xml", entry)?;
        zip.write_all(CONTENT_TYPES.as_bytes())?;
        zip.start_file("_rels/.rels", entry)?;
        zip.write_all(ROOT_RELS.as_bytes())?;
        zip.start_file("xl/workbook.xml", entry)?;
        zip.write_all(WORKBOOK.as_bytes())?;
        zip.start_file("xl/_rels/workbook.xml.rels", entry)?;
        zip.write_all(WORKBOOK_RELS.as_bytes())?;

        zip.start_file("xl/worksheets/sheet1.xml", entry)?;
        zip.write_all(SHEET_OPEN.as_bytes())?;

        let mut rows = rows;
        let mut header: Option<Vec<String>> = None;
        while let Some(row) = rows.next().await {
            let row = row?;
            if header.is_none() {
                let keys: Vec<String> = row.keys().cloned().collect();
                let header_cells: Vec<Value> =
                    keys.iter().map(|k| Value::String(k.clone())).collect();
                zip.write_all(encode_row(&header_cells).as_bytes())?;
                header = Some(keys);
            }
            let cells: Vec<Value> = header
                .iter()
                .flat_map(|keys| keys.iter())
                .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
                .collect();
            zip.write_all(encode_row(&cells).as_bytes())?;
        }

        zip.write_all(SHEET_CLOSE.as_bytes())?;
        let spool = zip.finish()?;

        let mut spooled = stream_spooled_file(spool, buffer_bytes);
        while let Some(chunk) = spooled.next().await {
            yield chunk?;
        }
    };
    Generated {
        bytes: Box::pin(inner.map(|r: Result<_>| r.map_err(io::Error::other))),
        content_type:
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        extension: "xlsx",
    }
}

fn encode_row(cells: &[Value]) -> String {
    let mut out = String::from("<row>");
    for cell in cells {
        match cell {
            Value::Null => out.push_str("<c/>"),
            Value::Number(n) => {
                out.push_str("<c><v>");
                out.push_str(&n.to_string());
                out.push_str("</v></c>");
            }
            other => {
                out.push_str("<c t=\"inlineStr\"><is><t xml:space=\"preserve\">");
                out.push_str(&xml_escape(&render_value(other)));
                out.push_str("</t></is></c>");
            }
        }
    }
    out.push_str("</row>");
    out
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{collect_bytes, rows_from};
    use serde_json::json;
    use std::io::Read;

    async fn workbook_for(rows: Vec<serde_json::Value>) -> Vec<u8> {
        let out = generate_spreadsheet(rows_from(rows), StreamOptions::default());
        assert_eq!(out.extension, "xlsx");
        collect_bytes(out.bytes).await.unwrap()
    }

    fn sheet_xml(bytes: &[u8]) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        sheet
    }

    #[tokio::test]
    async fn test_workbook_has_all_parts() {
        let bytes = workbook_for(vec![json!({"a": 1})]).await;
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(&bytes[..])).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"[Content_Types].xml".to_string()));
        assert!(names.contains(&"xl/workbook.xml".to_string()));
        assert!(names.contains(&"xl/worksheets/sheet1.xml".to_string()));
    }

    #[tokio::test]
    async fn test_header_then_values() {
        let bytes = workbook_for(vec![
            json!({"status": "paid", "amount": 10}),
            json!({"status": "a<b&c", "amount": 2.5}),
        ])
        .await;
        let sheet = sheet_xml(&bytes);
        assert!(sheet.contains("<t xml:space=\"preserve\">status</t>"));
        assert!(sheet.contains("<t xml:space=\"preserve\">paid</t>"));
        assert!(sheet.contains("<v>10</v>"));
        assert!(sheet.contains("<v>2.5</v>"));
        assert!(sheet.contains("a&lt;b&amp;c"));
    }

    #[tokio::test]
    async fn test_missing_values_are_empty_cells() {
        let bytes = workbook_for(vec![json!({"a": 1, "b": 2}), json!({"b": 3})]).await;
        let sheet = sheet_xml(&bytes);
        assert!(sheet.contains("<row><c/><c><v>3</v></c></row>"));
    }

    #[tokio::test]
    async fn test_empty_input_is_a_valid_workbook() {
        let bytes = workbook_for(vec![]).await;
        let sheet = sheet_xml(&bytes);
        assert!(sheet.contains("<sheetData></sheetData>"));
    }
}
