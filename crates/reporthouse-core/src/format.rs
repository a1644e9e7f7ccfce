//! Report output formats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The file format a report job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    /// Comma-separated values.
    Delimited,
    /// A single JSON array of row objects.
    StructuredObject,
    /// A single-worksheet XLSX workbook.
    Spreadsheet,
    /// A paginated PDF document, one line per row.
    PaginatedDocument,
    /// A ZIP archive containing one entry per included sub-format.
    Archive,
}

impl ReportFormat {
    /// File extension of the artifact body.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Delimited => "csv",
            ReportFormat::StructuredObject => "json",
            ReportFormat::Spreadsheet => "xlsx",
            ReportFormat::PaginatedDocument => "pdf",
            ReportFormat::Archive => "zip",
        }
    }

    /// MIME type of the artifact body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Delimited => "text/csv",
            ReportFormat::StructuredObject => "application/json",
            ReportFormat::Spreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ReportFormat::PaginatedDocument => "application/pdf",
            ReportFormat::Archive => "application/zip",
        }
    }

    /// Wire name, matching the serde rendering.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Delimited => "delimited",
            ReportFormat::StructuredObject => "structured-object",
            ReportFormat::Spreadsheet => "spreadsheet",
            ReportFormat::PaginatedDocument => "paginated-document",
            ReportFormat::Archive => "archive",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delimited" => Ok(ReportFormat::Delimited),
            "structured-object" => Ok(ReportFormat::StructuredObject),
            "spreadsheet" => Ok(ReportFormat::Spreadsheet),
            "paginated-document" => Ok(ReportFormat::PaginatedDocument),
            "archive" => Ok(ReportFormat::Archive),
            other => Err(CoreError::InvalidFormat(other.to_string())),
        }
    }
}

/// Optional compression applied to a single-format artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for f in [
            ReportFormat::Delimited,
            ReportFormat::StructuredObject,
            ReportFormat::Spreadsheet,
            ReportFormat::PaginatedDocument,
            ReportFormat::Archive,
        ] {
            assert_eq!(f.as_str().parse::<ReportFormat>().unwrap(), f);
            let json = serde_json::to_string(&f).unwrap();
            assert_eq!(json, format!("\"{}\"", f.as_str()));
        }
    }

    #[test]
    fn test_extensions() {
        assert_eq!(ReportFormat::Delimited.extension(), "csv");
        assert_eq!(ReportFormat::Archive.extension(), "zip");
        assert_eq!(ReportFormat::Spreadsheet.content_type().contains("spreadsheetml"), true);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!("parquet".parse::<ReportFormat>().is_err());
    }
}
