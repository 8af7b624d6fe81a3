//! Snapshot store for student progress.
//!
//! The whole roster lives behind one `ArcSwap`: a refresh builds the new
//! mapping off to the side and swaps it in as a unit, so readers always see
//! a complete snapshot — the one from before the refresh or the one after,
//! never a mix.

use crate::error::FetchError;
use crate::progress::normalize_identity;
use crate::progress::source::{ProgressSource, RawProgressRecord};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Latest known progress for one student.
#[derive(Debug, Clone)]
pub struct StudentProgress {
    /// Normalized email, the lookup and binding key.
    pub email: String,
    /// The pace metric ("expected result" delta).
    pub expected_result: f64,
    pub name: Option<String>,
    pub course_id: Option<String>,
    pub progress_pct: Option<f64>,
    pub refreshed_at: DateTime<Utc>,
}

/// The complete roster at one refresh instant.
#[derive(Debug, Default)]
pub struct ProgressSnapshot {
    students: HashMap<String, StudentProgress>,
}

impl ProgressSnapshot {
    pub fn get(&self, identity: &str) -> Option<&StudentProgress> {
        self.students.get(&normalize_identity(identity))
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// A metric movement between two snapshots.
#[derive(Debug, Clone)]
pub struct ProgressDelta {
    pub identity: String,
    /// None when the identity is new in the current snapshot.
    pub previous: Option<f64>,
    pub current: f64,
}

/// Holds the roster snapshot and replaces it wholesale on refresh.
pub struct ProgressStore {
    snapshot: ArcSwap<ProgressSnapshot>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ProgressSnapshot::default()),
        }
    }

    /// Fetch the roster from the source, validate rows, and swap the new
    /// snapshot in. Malformed rows are logged and discarded, never fatal;
    /// a source failure leaves the previous snapshot untouched.
    ///
    /// Returns the number of students in the new snapshot.
    pub async fn refresh(&self, source: &impl ProgressSource) -> Result<usize, FetchError> {
        let raw = source.fetch_all().await?;
        let total = raw.len();

        let refreshed_at = Utc::now();
        let mut students = HashMap::with_capacity(total);
        let mut discarded = 0usize;

        for record in raw {
            match validate_record(record, refreshed_at) {
                Ok(student) => {
                    students.insert(student.email.clone(), student);
                }
                Err(reason) => {
                    discarded += 1;
                    tracing::warn!(%reason, "discarding malformed progress record");
                }
            }
        }

        if discarded > 0 {
            tracing::warn!(discarded, total, "progress refresh discarded malformed records");
        }

        let count = students.len();
        self.snapshot.store(Arc::new(ProgressSnapshot { students }));
        Ok(count)
    }

    /// Case-insensitive, whitespace-trimmed exact lookup.
    pub fn get(&self, identity: &str) -> Option<StudentProgress> {
        self.snapshot.load().get(identity).cloned()
    }

    /// The current snapshot. Holding the Arc keeps that roster version
    /// alive across later refreshes.
    pub fn snapshot(&self) -> Arc<ProgressSnapshot> {
        self.snapshot.load_full()
    }

    /// Identities in the current snapshot whose metric moved by at least
    /// `epsilon` since `previous`, plus identities that are new.
    pub fn diff_since(&self, previous: &ProgressSnapshot, epsilon: f64) -> Vec<ProgressDelta> {
        let current = self.snapshot.load();
        let mut deltas: Vec<ProgressDelta> = current
            .students
            .values()
            .filter_map(|student| match previous.students.get(&student.email) {
                None => Some(ProgressDelta {
                    identity: student.email.clone(),
                    previous: None,
                    current: student.expected_result,
                }),
                Some(old) if (student.expected_result - old.expected_result).abs() >= epsilon => {
                    Some(ProgressDelta {
                        identity: student.email.clone(),
                        previous: Some(old.expected_result),
                        current: student.expected_result,
                    })
                }
                Some(_) => None,
            })
            .collect();
        // Stable report order for logs and tests.
        deltas.sort_by(|a, b| a.identity.cmp(&b.identity));
        deltas
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("students", &self.snapshot.load().len())
            .finish()
    }
}

/// Check required fields and parse the numerics. Returns the reason a
/// record is unusable so the refresh can log it.
fn validate_record(
    record: RawProgressRecord,
    refreshed_at: DateTime<Utc>,
) -> Result<StudentProgress, String> {
    let email = normalize_identity(&record.email);
    if email.is_empty() {
        return Err("missing email".into());
    }

    let metric_text = record.expected_result.trim();
    let expected_result: f64 = metric_text
        .parse()
        .map_err(|_| format!("unparseable metric {metric_text:?} for {email}"))?;
    if !expected_result.is_finite() {
        return Err(format!("non-finite metric {metric_text:?} for {email}"));
    }

    // The progress column carries a trailing percent sign in some exports.
    let progress_pct = record
        .progress
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .and_then(|text| text.trim_end_matches('%').trim().parse::<f64>().ok());

    Ok(StudentProgress {
        email,
        expected_result,
        name: record.name.filter(|name| !name.trim().is_empty()),
        course_id: record.course_id.filter(|course| !course.trim().is_empty()),
        progress_pct,
        refreshed_at,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{StaticSource, record};
    use super::*;

    #[tokio::test]
    async fn get_normalizes_case_and_whitespace() {
        let store = ProgressStore::new();
        let source = StaticSource::new(vec![record(" A@B.com ", "5.0")]);
        store.refresh(&source).await.expect("refresh should succeed");

        let direct = store.get("a@b.com").expect("normalized key should hit");
        let padded = store.get("  A@B.COM ").expect("padded key should hit");
        assert_eq!(direct.email, "a@b.com");
        assert_eq!(padded.expected_result, 5.0);
    }

    #[tokio::test]
    async fn refresh_replaces_the_roster_wholesale() {
        let store = ProgressStore::new();
        let source = StaticSource::new(vec![record("old@x.com", "1.0")]);
        store.refresh(&source).await.expect("refresh should succeed");

        source.set(vec![record("new@x.com", "2.0")]);
        let count = store.refresh(&source).await.expect("refresh should succeed");

        assert_eq!(count, 1);
        assert!(store.get("old@x.com").is_none());
        assert!(store.get("new@x.com").is_some());
    }

    #[tokio::test]
    async fn held_snapshot_survives_a_refresh_intact() {
        let store = ProgressStore::new();
        let source = StaticSource::new(vec![record("a@x.com", "1.0"), record("b@x.com", "2.0")]);
        store.refresh(&source).await.expect("refresh should succeed");

        let before = store.snapshot();
        source.set(vec![record("c@x.com", "3.0")]);
        store.refresh(&source).await.expect("refresh should succeed");

        // A reader that grabbed the old snapshot still sees it complete.
        assert_eq!(before.len(), 2);
        assert!(before.get("a@x.com").is_some());
        assert!(before.get("c@x.com").is_none());
        assert!(store.get("c@x.com").is_some());
    }

    #[tokio::test]
    async fn malformed_rows_are_discarded_not_fatal() {
        let store = ProgressStore::new();
        let source = StaticSource::new(vec![
            record("good@x.com", "1.5"),
            record("", "2.0"),
            record("bad@x.com", "not-a-number"),
            record("nan@x.com", "NaN"),
        ]);

        let count = store.refresh(&source).await.expect("refresh should succeed");
        assert_eq!(count, 1);
        assert!(store.get("good@x.com").is_some());
        assert!(store.get("bad@x.com").is_none());
        assert!(store.get("nan@x.com").is_none());
    }

    #[tokio::test]
    async fn diff_reports_moves_beyond_epsilon_and_new_identities() {
        let store = ProgressStore::new();
        let source = StaticSource::new(vec![
            record("moved@x.com", "2.0"),
            record("steady@x.com", "1.0"),
            record("noise@x.com", "0.5"),
        ]);
        store.refresh(&source).await.expect("refresh should succeed");
        let previous = store.snapshot();

        source.set(vec![
            record("moved@x.com", "-5.0"),
            record("steady@x.com", "1.0"),
            record("noise@x.com", "0.505"),
            record("fresh@x.com", "0.0"),
        ]);
        store.refresh(&source).await.expect("refresh should succeed");

        let deltas = store.diff_since(&previous, 0.01);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].identity, "fresh@x.com");
        assert_eq!(deltas[0].previous, None);
        assert_eq!(deltas[1].identity, "moved@x.com");
        assert_eq!(deltas[1].previous, Some(2.0));
        assert_eq!(deltas[1].current, -5.0);
    }

    #[tokio::test]
    async fn identical_snapshots_produce_no_deltas() {
        let store = ProgressStore::new();
        let source = StaticSource::new(vec![record("s@x.com", "-5.0")]);
        store.refresh(&source).await.expect("refresh should succeed");
        let previous = store.snapshot();

        store.refresh(&source).await.expect("refresh should succeed");
        assert!(store.diff_since(&previous, 0.01).is_empty());
    }

    #[tokio::test]
    async fn progress_pct_parses_with_and_without_percent_sign() {
        let store = ProgressStore::new();
        let mut with_sign = record("a@x.com", "1.0");
        with_sign.progress = Some("42%".into());
        let mut plain = record("b@x.com", "1.0");
        plain.progress = Some("17.5".into());
        let source = StaticSource::new(vec![with_sign, plain]);
        store.refresh(&source).await.expect("refresh should succeed");

        assert_eq!(
            store.get("a@x.com").and_then(|s| s.progress_pct),
            Some(42.0)
        );
        assert_eq!(
            store.get("b@x.com").and_then(|s| s.progress_pct),
            Some(17.5)
        );
    }
}
