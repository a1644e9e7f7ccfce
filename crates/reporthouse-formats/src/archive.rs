//! ZIP archive generator.
//!
//! Concatenates an ordered list of named entry streams into one deflated
//! archive (level 9). Entry bytes are appended to the spool as they
//! arrive; an error on any input stream propagates and destroys the
//! archive output. Once the last entry is committed the spool is streamed
//! back out in `buffer_bytes` chunks.

use std::io::{self, Write};

use futures::StreamExt;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::options::StreamOptions;
use crate::{stream_spooled_file, ByteStream, Generated};

/// One named entry of an archive.
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: ByteStream,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, bytes: ByteStream) -> Self {
        Self { name: name.into(), bytes }
    }
}

/// Stream entries into one `application/zip` archive.
pub fn generate_archive(entries: Vec<ArchiveEntry>, opts: StreamOptions) -> Generated {
    let buffer_bytes = opts.buffer_bytes;
    let inner = async_stream::try_stream! {
        let spool = tempfile::tempfile()?;
        let mut zip = ZipWriter::new(spool);
        let entry_opts = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9));

        for entry in entries {
            zip.start_file(entry.name.as_str(), entry_opts)?;
            let mut bytes = entry.bytes;
            while let Some(chunk) = bytes.next().await {
                zip.write_all(&chunk?)?;
            }
        }
        let spool = zip.finish()?;

        let mut spooled = stream_spooled_file(spool, buffer_bytes);
        while let Some(chunk) = spooled.next().await {
            yield chunk?;
        }
    };
    Generated {
        bytes: Box::pin(inner.map(|r: Result<_>| r.map_err(io::Error::other))),
        content_type: "application/zip",
        extension: "zip",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::collect_bytes;
    use bytes::Bytes;
    use std::io::Read;

    fn literal_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    fn failing_stream() -> ByteStream {
        Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("entry stream broke")),
        ]))
    }

    #[tokio::test]
    async fn test_entries_keep_names_and_contents_in_order() {
        let out = generate_archive(
            vec![
                ArchiveEntry::new("report.csv", literal_stream(vec![b"a,b\n", b"1,2\n"])),
                ArchiveEntry::new("report.json", literal_stream(vec![b"[]"])),
            ],
            StreamOptions::default(),
        );
        assert_eq!(out.content_type, "application/zip");
        let bytes = collect_bytes(out.bytes).await.unwrap();

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(&bytes[..])).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["report.csv", "report.json"]);

        let mut csv = String::new();
        archive.by_name("report.csv").unwrap().read_to_string(&mut csv).unwrap();
        assert_eq!(csv, "a,b\n1,2\n");
        let mut json = String::new();
        archive.by_name("report.json").unwrap().read_to_string(&mut json).unwrap();
        assert_eq!(json, "[]");
    }

    #[tokio::test]
    async fn test_entry_names_appear_in_raw_bytes() {
        let out = generate_archive(
            vec![
                ArchiveEntry::new("report.csv", literal_stream(vec![b"x\n"])),
                ArchiveEntry::new("report.json", literal_stream(vec![b"[]"])),
            ],
            StreamOptions::default(),
        );
        let bytes = collect_bytes(out.bytes).await.unwrap();
        let raw = String::from_utf8_lossy(&bytes);
        assert!(raw.contains("report.csv"));
        assert!(raw.contains("report.json"));
    }

    #[tokio::test]
    async fn test_entry_stream_error_destroys_archive() {
        let out = generate_archive(
            vec![
                ArchiveEntry::new("good.csv", literal_stream(vec![b"fine\n"])),
                ArchiveEntry::new("bad.json", failing_stream()),
            ],
            StreamOptions::default(),
        );
        let err = collect_bytes(out.bytes).await.unwrap_err();
        assert!(err.to_string().contains("entry stream broke"));
    }

    #[tokio::test]
    async fn test_empty_entry_list_is_a_valid_empty_archive() {
        let out = generate_archive(vec![], StreamOptions::default());
        let bytes = collect_bytes(out.bytes).await.unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(&bytes[..])).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
