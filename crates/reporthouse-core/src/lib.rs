//! Reporthouse Core Types
//!
//! This crate holds the vocabulary shared by every other Reporthouse crate:
//!
//! - **RowId**: the 96-bit source-row identifier, rendered as 24 hex digits
//! - **Row**: an insertion-ordered JSON object, the unit flowing through
//!   every report pipeline
//! - **Value normalization**: collapsing store-native wrapper values
//!   (identifiers, timestamps) into portable scalars
//! - **Filter sanitization**: stripping operator and path-traversal keys
//!   from untrusted filter input
//! - **Artifact descriptors**: where an uploaded report lives and whether
//!   it can be downloaded
//!
//! Everything here is pure data and pure functions; no I/O.

pub mod artifact;
pub mod error;
pub mod filters;
pub mod format;
pub mod id;
pub mod row;
pub mod value;

pub use artifact::{ArtifactDescriptor, ArtifactMode, ArtifactReason};
pub use error::{CoreError, Result};
pub use filters::sanitize_filters;
pub use format::{Compression, ReportFormat};
pub use id::RowId;
pub use row::{Row, ID_FIELD};
pub use value::normalize;
