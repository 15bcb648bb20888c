//! Matrix results and the injected reporter
//!
//! The runner never logs results through a global: it hands every event to a
//! [`Reporter`] supplied by the caller and returns a [`MatrixReport`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::equivalence::ComparisonResult;
use crate::locate::ArtifactRef;
use crate::version::VersionId;

/// Which comparison a unit performs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitKind {
    /// Encode the reference text and decode it back
    RoundTrip,
    /// Decode an artifact written by an earlier release
    Backward { version: VersionId },
    /// Decode an artifact written by another implementation
    CrossProducer { producer: String, version: VersionId },
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::RoundTrip => write!(f, "round-trip"),
            UnitKind::Backward { version } => write!(f, "backward@{}", version),
            UnitKind::CrossProducer { producer, version } => {
                write!(f, "cross-producer@{}-{}", producer, version)
            }
        }
    }
}

/// One cell of the compatibility matrix
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixUnit {
    pub dataset: String,
    #[serde(flatten)]
    pub kind: UnitKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl fmt::Display for MatrixUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.kind)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// How a unit ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum UnitOutcome {
    Passed(ComparisonResult),
    Failed(ComparisonResult),
    /// Conversion or I/O error; the message names the row or column
    Error(String),
    /// An optional artifact was missing
    Skipped(String),
}

impl UnitOutcome {
    pub fn from_comparison(result: ComparisonResult) -> Self {
        if result.is_match() {
            UnitOutcome::Passed(result)
        } else {
            UnitOutcome::Failed(result)
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UnitOutcome::Failed(_) | UnitOutcome::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    #[serde(flatten)]
    pub unit: MatrixUnit,
    pub outcome: UnitOutcome,
}

/// Every unit outcome of one matrix run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub generated_at: DateTime<Utc>,
    pub current_version: VersionId,
    pub units: Vec<UnitReport>,
}

impl MatrixReport {
    pub fn new(current_version: VersionId) -> Self {
        Self {
            generated_at: Utc::now(),
            current_version,
            units: Vec::new(),
        }
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Passed(_)))
    }

    /// Units that failed a comparison or errored
    pub fn failed(&self) -> usize {
        self.count(UnitOutcome::is_failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.outcome.is_failure())
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| pred(&u.outcome)).count()
    }
}

/// Sink for runner progress and results.
pub trait Reporter: Send + Sync {
    fn unit_started(&self, unit: &MatrixUnit);
    fn unit_finished(&self, report: &UnitReport);
    fn artifact_missing(&self, artifact: &ArtifactRef);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn unit_started(&self, unit: &MatrixUnit) {
        info!(unit = %unit, "unit started");
    }

    fn unit_finished(&self, report: &UnitReport) {
        match &report.outcome {
            UnitOutcome::Passed(result) => {
                info!(unit = %report.unit, rows = result.matched_rows, "unit passed")
            }
            UnitOutcome::Failed(result) => {
                warn!(unit = %report.unit, detail = %result.summary(), "unit failed")
            }
            UnitOutcome::Error(message) => warn!(unit = %report.unit, error = %message, "unit errored"),
            UnitOutcome::Skipped(reason) => info!(unit = %report.unit, reason = %reason, "unit skipped"),
        }
    }

    fn artifact_missing(&self, artifact: &ArtifactRef) {
        warn!(path = %artifact.path.display(), dataset = %artifact.dataset, "artifact missing");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Started(MatrixUnit),
    Finished(UnitReport),
    Missing(PathBuf),
}

/// Buffers events in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ReportEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, event: ReportEvent) {
        self.lock().push(event);
    }
}

impl Reporter for CollectingReporter {
    fn unit_started(&self, unit: &MatrixUnit) {
        self.push(ReportEvent::Started(unit.clone()));
    }

    fn unit_finished(&self, report: &UnitReport) {
        self.push(ReportEvent::Finished(report.clone()));
    }

    fn artifact_missing(&self, artifact: &ArtifactRef) {
        self.push(ReportEvent::Missing(artifact.path.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equivalence::RowCountMismatch;

    fn unit(dataset: &str, kind: UnitKind) -> MatrixUnit {
        MatrixUnit {
            dataset: dataset.to_string(),
            kind,
            variant: Some("plain".to_string()),
        }
    }

    #[test]
    fn test_report_counts() {
        let mut report = MatrixReport::new(VersionId::new(1, 2, 0));
        report.units.push(UnitReport {
            unit: unit("customer", UnitKind::RoundTrip),
            outcome: UnitOutcome::from_comparison(ComparisonResult {
                matched_rows: 3,
                ..Default::default()
            }),
        });
        report.units.push(UnitReport {
            unit: unit(
                "customer",
                UnitKind::Backward {
                    version: VersionId::new(1, 0, 0),
                },
            ),
            outcome: UnitOutcome::from_comparison(ComparisonResult {
                matched_rows: 2,
                first_mismatch: None,
                row_count_mismatch: Some(RowCountMismatch {
                    expected_count: 3,
                    actual_count: 2,
                }),
            }),
        });
        report.units.push(UnitReport {
            unit: unit("orders", UnitKind::RoundTrip),
            outcome: UnitOutcome::Skipped("missing".to_string()),
        });

        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_units_sort_by_dataset_then_kind() {
        let mut units = vec![
            unit(
                "b",
                UnitKind::Backward {
                    version: VersionId::new(1, 0, 0),
                },
            ),
            unit("b", UnitKind::RoundTrip),
            unit("a", UnitKind::RoundTrip),
        ];
        units.sort();
        assert_eq!(units[0].dataset, "a");
        assert_eq!(units[1].kind, UnitKind::RoundTrip);
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = MatrixReport::new(VersionId::new(1, 2, 0));
        report.units.push(UnitReport {
            unit: unit("customer", UnitKind::RoundTrip),
            outcome: UnitOutcome::Error("Row 3: expected 3 fields, found 2".to_string()),
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["current_version"], "1.2.0");
        assert_eq!(json["units"][0]["dataset"], "customer");
        assert_eq!(json["units"][0]["kind"], "round_trip");
        assert_eq!(json["units"][0]["outcome"]["status"], "error");
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        let u = unit("customer", UnitKind::RoundTrip);
        reporter.unit_started(&u);
        reporter.unit_finished(&UnitReport {
            unit: u.clone(),
            outcome: UnitOutcome::Skipped("n/a".to_string()),
        });
        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ReportEvent::Started(u));
    }
}
