//! Progress data sources.
//!
//! The store consumes any `ProgressSource`; the shipped implementation reads
//! the analytics CSV export, either from a local file the sheet is synced to
//! or straight from an HTTP endpoint. Row-level problems are reported by the
//! store during validation; this layer only fails when the export itself is
//! unreachable or structurally broken (missing required columns).

use crate::error::FetchError;
use serde::Deserialize;
use std::path::PathBuf;

/// One row of the analytics export, untyped. Validation and numeric parsing
/// happen in the store so every source shares the same discard rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProgressRecord {
    #[serde(rename = "email", alias = "Email")]
    pub email: String,
    #[serde(rename = "Delta Progress", alias = "Expected result")]
    pub expected_result: String,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: Option<String>,
    #[serde(rename = "Course", alias = "course_id", default)]
    pub course_id: Option<String>,
    #[serde(rename = "Progress (%)", alias = "progress", default)]
    pub progress: Option<String>,
}

/// Source of raw progress rows, refreshed wholesale.
pub trait ProgressSource: Send + Sync {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<RawProgressRecord>, FetchError>> + Send;
}

enum ExportLocation {
    Path(PathBuf),
    Url(String),
}

/// Reads the analytics CSV export from disk or over HTTP.
pub struct CsvExportSource {
    location: ExportLocation,
    http_client: reqwest::Client,
}

/// Header sets that satisfy the required-column check. The export has gone
/// through two generations of column naming.
const EMAIL_COLUMNS: [&str; 2] = ["email", "Email"];
const METRIC_COLUMNS: [&str; 2] = ["Delta Progress", "Expected result"];

impl CsvExportSource {
    pub fn new(source: &str) -> Self {
        let location = if source.starts_with("http://") || source.starts_with("https://") {
            ExportLocation::Url(source.to_string())
        } else {
            ExportLocation::Path(PathBuf::from(source))
        };
        Self {
            location,
            http_client: reqwest::Client::new(),
        }
    }

    async fn read_bytes(&self) -> Result<Vec<u8>, FetchError> {
        match &self.location {
            ExportLocation::Path(path) => std::fs::read(path).map_err(|error| {
                FetchError::Unreachable(format!("{}: {error}", path.display()))
            }),
            ExportLocation::Url(url) => {
                let response = self
                    .http_client
                    .get(url)
                    .send()
                    .await
                    .map_err(|error| FetchError::Unreachable(error.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Unreachable(format!(
                        "export endpoint returned status {status}"
                    )));
                }
                response
                    .bytes()
                    .await
                    .map(|bytes| bytes.to_vec())
                    .map_err(|error| FetchError::Unreachable(error.to_string()))
            }
        }
    }

    fn parse(bytes: &[u8]) -> Result<Vec<RawProgressRecord>, FetchError> {
        let mut reader = csv::Reader::from_reader(bytes);
        let headers = reader
            .headers()
            .map_err(|error| FetchError::Malformed(error.to_string()))?
            .clone();

        for required in [&EMAIL_COLUMNS[..], &METRIC_COLUMNS[..]] {
            if !headers.iter().any(|header| required.contains(&header)) {
                return Err(FetchError::Malformed(format!(
                    "export is missing a required column (one of {required:?})"
                )));
            }
        }

        let mut records = Vec::new();
        for row in reader.deserialize::<RawProgressRecord>() {
            match row {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(%error, "skipping unreadable export row");
                }
            }
        }
        Ok(records)
    }
}

impl ProgressSource for CsvExportSource {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<RawProgressRecord>, FetchError>> + Send {
        async move {
            let bytes = self.read_bytes().await?;
            Self::parse(&bytes)
        }
    }
}

impl std::fmt::Debug for CsvExportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = match &self.location {
            ExportLocation::Path(path) => format!("path:{}", path.display()),
            ExportLocation::Url(url) => format!("url:{url}"),
        };
        f.debug_struct("CsvExportSource")
            .field("location", &location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_export_rows_with_optional_columns() {
        let data = "email,Delta Progress,Name,Progress (%)\n\
                    a@b.com,2.5,Avery,40\n\
                    c@d.com,-6,,\n";
        let records = CsvExportSource::parse(data.as_bytes()).expect("export should parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].email, "a@b.com");
        assert_eq!(records[0].expected_result, "2.5");
        assert_eq!(records[0].name.as_deref(), Some("Avery"));
        assert_eq!(records[1].email, "c@d.com");
    }

    #[test]
    fn accepts_the_older_column_names() {
        let data = "Email,Expected result\na@b.com,1.0\n";
        let records = CsvExportSource::parse(data.as_bytes()).expect("export should parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expected_result, "1.0");
    }

    #[test]
    fn missing_metric_column_is_a_malformed_export() {
        let data = "email,Name\na@b.com,Avery\n";
        let error = CsvExportSource::parse(data.as_bytes())
            .expect_err("export without a metric column should fail");
        assert!(matches!(error, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn missing_file_is_unreachable() {
        let source = CsvExportSource::new("/nonexistent/analytics.csv");
        let error = source
            .fetch_all()
            .await
            .expect_err("missing file should fail");
        assert!(matches!(error, FetchError::Unreachable(_)));
    }
}
