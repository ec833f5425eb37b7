//! peerbench -- peer-driven benchmark and capture tests for Linux network links.
//!
//! This crate provides the test lifecycle driver behind the `peerbench` CLI:
//! parameter resolution, dependency provisioning on a local host and an
//! SSH-reachable peer, interface/MTU configuration, benchmark tool builds,
//! output parsing and threshold verdicts, and best-effort teardown.

pub mod cases;
pub mod exec;
pub mod fetch;
pub mod netdev;
pub mod params;
pub mod parse;
pub mod pkg;
pub mod preflight;
pub mod remote;
pub mod verdict;

pub use cases::CaseKind;
pub use params::TestParams;
pub use verdict::{TestReport, Verdict};

/// Run one test case end to end: setup, execute/verify, teardown.
pub async fn run_case(kind: CaseKind, params: &TestParams) -> TestReport {
    cases::run(kind, params).await
}
