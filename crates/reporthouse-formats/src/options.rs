//! Generator stream options.

/// Tuning knobs shared by every generator.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Target chunk size for byte-level pipelines.
    pub buffer_bytes: usize,
    /// Hard row cap for the paginated document format.
    pub document_max_rows: Option<u64>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_bytes: 64 * 1024,
            document_max_rows: None,
        }
    }
}
