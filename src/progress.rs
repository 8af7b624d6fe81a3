//! Student progress: severity classification, snapshot store, data sources.

pub mod classifier;
pub mod source;
pub mod store;

pub use classifier::SeverityTier;
pub use source::{CsvExportSource, ProgressSource, RawProgressRecord};
pub use store::{ProgressDelta, ProgressSnapshot, ProgressStore, StudentProgress};

/// Normalize an identity for lookup and binding: trimmed, lower-cased email.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}
