//! Test outcome model: three-valued verdicts and per-run reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Final outcome of one test case run.
///
/// `Skip` means the environment could not support running the test at all
/// (missing interface, failed install, failed remote build). `Fail` means the
/// environment was fine but the system under test did not perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason")]
pub enum Verdict {
    Pass,
    Fail(String),
    Skip(String),
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail(_) => "FAIL",
            Verdict::Skip(_) => "SKIP",
        }
    }

    /// Exit code mapping for the CLI: pass = 0, fail = 1, skip = 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail(_) => 1,
            Verdict::Skip(_) => 2,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail(r) | Verdict::Skip(r) => Some(r),
        }
    }
}

/// Error carried between lifecycle steps of a test case.
///
/// Every external action (install, remote command, fetch, build) is checked at
/// its call site and converted into one of these two, with a message naming the
/// offending package/command/value. Nothing else propagates out of a step.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("{0}")]
    Skip(String),
    #[error("{0}")]
    Fail(String),
}

pub type CaseResult<T> = Result<T, CaseError>;

/// Shorthand for `Err(CaseError::Skip(..))` producers.
pub fn skip(msg: impl Into<String>) -> CaseError {
    CaseError::Skip(msg.into())
}

/// Shorthand for `Err(CaseError::Fail(..))` producers.
pub fn fail(msg: impl Into<String>) -> CaseError {
    CaseError::Fail(msg.into())
}

impl From<CaseError> for Verdict {
    fn from(err: CaseError) -> Self {
        match err {
            CaseError::Skip(r) => Verdict::Skip(r),
            CaseError::Fail(r) => Verdict::Fail(r),
        }
    }
}

/// Result of one full test case run, serializable for `--json` output.
#[derive(Debug, Serialize)]
pub struct TestReport {
    pub run_id: Uuid,
    pub case: String,
    pub verdict: Verdict,
    /// Evidence lines collected during execution (measured values, tool lines).
    pub details: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// A teardown step that failed. Reported, but does not overturn `verdict`.
    pub teardown: Option<String>,
}

impl TestReport {
    pub fn begin(case: &str) -> ReportBuilder {
        ReportBuilder {
            run_id: Uuid::new_v4(),
            case: case.to_string(),
            started_at: Utc::now(),
            t0: Instant::now(),
        }
    }
}

/// Stamps a report with run ID, start time and duration.
pub struct ReportBuilder {
    run_id: Uuid,
    case: String,
    started_at: DateTime<Utc>,
    t0: Instant,
}

impl ReportBuilder {
    pub fn finish(
        self,
        verdict: Verdict,
        details: Vec<String>,
        teardown: Option<String>,
    ) -> TestReport {
        TestReport {
            run_id: self.run_id,
            case: self.case,
            verdict,
            details,
            started_at: self.started_at,
            duration_secs: self.t0.elapsed().as_secs_f64(),
            teardown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Verdict::Pass.exit_code(), 0);
        assert_eq!(Verdict::Fail("x".into()).exit_code(), 1);
        assert_eq!(Verdict::Skip("x".into()).exit_code(), 2);
    }

    #[test]
    fn test_case_error_maps_to_verdict() {
        let v: Verdict = skip("eth9 interface is not available").into();
        assert_eq!(v, Verdict::Skip("eth9 interface is not available".into()));
        let v: Verdict = fail("iperf run failed").into();
        assert_eq!(v, Verdict::Fail("iperf run failed".into()));
    }

    #[test]
    fn test_report_builder_stamps_run() {
        let report = TestReport::begin("iperf").finish(Verdict::Pass, vec![], None);
        assert_eq!(report.case, "iperf");
        assert_eq!(report.verdict, Verdict::Pass);
        assert!(report.teardown.is_none());
    }
}
