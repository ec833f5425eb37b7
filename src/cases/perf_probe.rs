//! perf kernel-probe duplicate-placement check. Local host only, the one
//! case in the suite that never touches the peer or the link configuration.
//!
//! Places a probe on a line inside a scheduler function, then fails if perf
//! registered more than one event for that single location (seen either in
//! perf's own stderr or in the kernel's kprobe_events list).

use crate::exec;
use crate::params::TestParams;
use crate::pkg::{self, PkgBackend};
use crate::verdict::{fail, skip, CaseResult, TestReport, Verdict};
use tracing::info;

const SYMBOL: &str = "select_task_rq_fair";
const PROBE_POINT: &str = "select_task_rq_fair:15";
const KPROBE_EVENTS: &str = "/sys/kernel/debug/tracing/kprobe_events";

pub async fn run(params: &TestParams) -> TestReport {
    let report = TestReport::begin("perf-probe");
    info!(case = "perf-probe", "starting");

    if let Err(e) = setup(params).await {
        return report.finish(e.into(), Vec::new(), None);
    }
    let (verdict, details) = match execute().await {
        Ok(details) => (Verdict::Pass, details),
        Err(e) => (e.into(), Vec::new()),
    };
    let teardown_issue = teardown().await.err().map(|e| e.to_string());
    report.finish(verdict, details, teardown_issue)
}

/// perf package names per distro family; Ubuntu ties them to the running
/// kernel release.
async fn perf_packages(distro: &str) -> CaseResult<Vec<String>> {
    if distro == "ubuntu" || distro == "debian" {
        let out = exec::run("uname", &["-r"])
            .await
            .map_err(|e| skip(format!("cannot read kernel release: {e}")))?;
        let release = out.stdout_text().trim().to_string();
        return Ok(vec![
            "linux-tools-common".to_string(),
            format!("linux-tools-{release}"),
        ]);
    }
    if distro == "rhel" || distro == "centos" || distro == "fedora" {
        return Ok(vec!["perf".to_string(), "kernel-debuginfo".to_string()]);
    }
    if pkg::is_suse(distro) {
        return Ok(vec![
            "perf".to_string(),
            "kernel-default-base-debuginfo".to_string(),
        ]);
    }
    Err(skip(format!("no known perf packages for distro {distro}")))
}

async fn setup(_params: &TestParams) -> CaseResult<()> {
    let backend = PkgBackend::detect()
        .await
        .ok_or_else(|| skip("no supported package backend on this host"))?;
    for pkg in perf_packages(&pkg::distro_id()).await? {
        backend.ensure_installed(&pkg).await?;
    }
    Ok(())
}

async fn execute() -> CaseResult<Vec<String>> {
    let out = exec::run("perf", &["probe", PROBE_POINT])
        .await
        .map_err(|e| fail(format!("perf probe did not start: {e}")))?;
    if !out.success() {
        return Err(fail(format!(
            "perf probe {PROBE_POINT} failed: {}",
            out.stderr_text().trim()
        )));
    }

    let events = std::fs::read_to_string(KPROBE_EVENTS)
        .map_err(|e| skip(format!("cannot read {KPROBE_EVENTS}: {e}")))?;
    evaluate(&out.stderr_text(), &events)
}

/// Verification phase: count the evidence of duplicate placement. perf
/// reports a second probe at the same location with an underscore-suffixed
/// event name; each kprobe_events line naming the symbol counts as one
/// registration.
pub fn evaluate(perf_stderr: &str, kprobe_events: &str) -> CaseResult<Vec<String>> {
    let mut registrations = 0;
    if perf_stderr.contains(SYMBOL) && perf_stderr.contains(&format!("{SYMBOL}_")) {
        registrations += 1;
    }
    for line in kprobe_events.lines() {
        if line.contains(SYMBOL) {
            registrations += 1;
        }
    }
    if registrations >= 2 {
        return Err(fail(
            "perf probe is placing multiple probes at the same location",
        ));
    }
    Ok(vec![format!(
        "single probe registered at {PROBE_POINT} ({registrations} kprobe entry)"
    )])
}

async fn teardown() -> CaseResult<()> {
    // Delete every probed event, not just ours.
    let out = exec::run("perf", &["probe", "-d", "*"])
        .await
        .map_err(|e| fail(format!("perf probe cleanup did not start: {e}")))?;
    if !out.success() {
        return Err(fail(format!(
            "perf probe cleanup failed: {}",
            out.stderr_text().trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_probe_passes() {
        let stderr = "Added new event:\n  probe:select_task_rq_fair (on select_task_rq_fair:15)\n";
        let events = "p:probe/select_task_rq_fair _text+1234\n";
        assert!(evaluate(stderr, events).is_ok());
    }

    #[test]
    fn test_duplicate_in_stderr_and_events_fails() {
        let stderr = "\
Added new events:
  probe:select_task_rq_fair (on select_task_rq_fair:15)
  probe:select_task_rq_fair_1 (on select_task_rq_fair:15)
";
        let events = "\
p:probe/select_task_rq_fair _text+1234
p:probe/select_task_rq_fair_1 _text+1234
";
        assert!(evaluate(stderr, events).is_err());
    }

    #[test]
    fn test_two_kprobe_entries_alone_fail() {
        let stderr = "Added new event:\n  probe:select_task_rq_fair\n";
        let events = "\
p:probe/select_task_rq_fair _text+1234
p:probe/select_task_rq_fair_1 _text+1234
";
        assert!(evaluate(stderr, events).is_err());
    }

    #[test]
    fn test_unrelated_events_ignored() {
        let stderr = "Added new event:\n  probe:select_task_rq_fair\n";
        let events = "p:probe/vfs_read _text+99\np:probe/select_task_rq_fair _text+1234\n";
        assert!(evaluate(stderr, events).is_ok());
    }

    #[test]
    fn test_perf_packages_for_rpm_distros() {
        tokio_test::block_on(async {
            let rhel = perf_packages("rhel").await.unwrap();
            assert_eq!(rhel, vec!["perf", "kernel-debuginfo"]);
            let suse = perf_packages("opensuse-leap").await.unwrap();
            assert!(suse.contains(&"kernel-default-base-debuginfo".to_string()));
            assert!(perf_packages("gentoo").await.is_err());
        });
    }
}
