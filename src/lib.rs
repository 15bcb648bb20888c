//! Columnar Format Compatibility Checker
//!
//! Verifies that a columnar storage format stays readable and writable across
//! releases and across independent producer implementations.
//!
//! ## Features
//!
//! - **Schema-driven transcoding**: delimited text rows to typed records and back
//! - **Release ordering**: `major.minor.patch[-tag]` with release > pre-release
//! - **Order-tolerant comparison**: external merge sort bounded by disk, not RAM
//! - **Compatibility matrix**: round trip, backward and cross-producer checks
//!
//! ## Layout
//!
//! ```text
//! test-data/
//! ├── datasets/
//! │   ├── customer.csv
//! │   └── customer.schema
//! ├── release-1.0.0/
//! │   ├── customer.plain.col
//! │   ├── customer.dict.col
//! │   └── text/
//! ├── release-1.1.0/
//! └── external/
//!     └── external/1.1.2/customer.external.col
//! ```

pub mod checksum;
pub mod config;
pub mod equivalence;
pub mod error;
pub mod format;
pub mod locate;
pub mod ordering;
pub mod report;
pub mod runner;
pub mod schema;
pub mod transcode;
pub mod version;

pub use checksum::Checksum;
pub use config::CompatConfig;
pub use equivalence::{compare_ordered, compare_unordered, ComparisonResult, ExternalSorter, SortConfig};
pub use error::{CompatError, Result};
pub use format::{ColumnarFormat, EncodeOptions, Encoding, RowGroupFormat};
pub use locate::{ArtifactLocator, ArtifactRef, ArtifactRole, DatasetRef, VersionDir};
pub use report::{CollectingReporter, MatrixReport, Reporter, TracingReporter, UnitKind, UnitOutcome, UnitReport};
pub use runner::{convert_columnar_to_text, convert_text_to_columnar, schema_path_for, CompatibilityRunner};
pub use schema::{ColumnDescriptor, PrimitiveKind, Schema};
pub use transcode::{Record, RecordTranscoder, Value};
pub use version::VersionId;
