pub mod reports;
pub mod schedules;

use reporthouse_core::{Compression, ReportFormat};
use reporthouse_reduce::spec::is_identifier;
use reporthouse_reduce::{PartitionSpec, ReduceSpec};

use crate::config::ServerConfig;
use crate::error::ApiError;

/// The report-shape validation shared by job submissions and schedules.
///
/// The processor relies on these rules having been enforced here: it
/// never observes `compression = zip` combined with the archive format,
/// nor an archive without include formats.
pub(crate) fn validate_report_shape(
    config: &ServerConfig,
    format: ReportFormat,
    compression: Option<Compression>,
    include_formats: &[ReportFormat],
    reduce_spec: Option<&ReduceSpec>,
    partition_spec: Option<&PartitionSpec>,
    source_collection: Option<&str>,
) -> Result<(), ApiError> {
    if format == ReportFormat::Archive {
        if include_formats.is_empty() {
            return Err(ApiError::ArchiveRequiresIncludeFormats);
        }
        let mut seen = std::collections::HashSet::new();
        for sub in include_formats {
            if *sub == ReportFormat::Archive {
                return Err(ApiError::Validation(
                    "includeFormats cannot contain archive".to_string(),
                ));
            }
            if !seen.insert(*sub) {
                return Err(ApiError::DuplicateIncludeFormats);
            }
        }
        if compression == Some(Compression::Zip) {
            return Err(ApiError::CompressionArchiveConflict);
        }
    } else if !include_formats.is_empty() {
        return Err(ApiError::IncludeFormatsNotAllowed);
    }

    if let Some(spec) = reduce_spec {
        spec.validate()
            .map_err(|e| ApiError::InvalidReduceSpec(e.to_string()))?;
    }
    if let Some(partition) = partition_spec {
        partition
            .validate()
            .map_err(|e| ApiError::InvalidReduceSpec(e.to_string()))?;
    }

    if let Some(collection) = source_collection.map(str::trim).filter(|s| !s.is_empty()) {
        let allowed = is_identifier(collection)
            && config
                .source_collection_allowlist
                .iter()
                .any(|c| c == collection);
        if !allowed {
            return Err(ApiError::SourceCollectionNotAllowed(collection.to_string()));
        }
    }
    Ok(())
}
