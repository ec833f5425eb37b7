//! Environment readiness checks, run before committing to a test: interface
//! state, peer reachability, required system binaries, package backend.

use crate::exec;
use crate::netdev::NetworkInterface;
use crate::params::TestParams;
use crate::pkg::PkgBackend;
use anyhow::Result;
use serde::Serialize;
use tracing::info;

/// Result of a single readiness check.
#[derive(Debug, Serialize, Clone)]
pub struct CheckResult {
    pub component: String,
    pub status: CheckStatus,
    pub details: String,
    pub remediation: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
    Skipped,
}

impl CheckStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warning => "WARN",
            CheckStatus::Skipped => "SKIP",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreflightReport {
    pub results: Vec<CheckResult>,
}

impl PreflightReport {
    /// Any hard failure means the peer-driven cases cannot run.
    pub fn ready(&self) -> bool {
        !self.results.iter().any(|r| r.status == CheckStatus::Fail)
    }
}

/// Binaries the test cases shell out to.
const REQUIRED_BINARIES: &[&str] = &["ip", "ssh", "scp", "tar", "unzip", "tcpdump", "perf"];

/// Run the readiness checks for the given parameters.
pub async fn run(params: &TestParams) -> Result<PreflightReport> {
    info!("preflight: checking test environment");
    let mut results = Vec::new();

    results.push(check_interface(params));
    results.push(check_peer(params).await);
    results.extend(check_binaries().await);
    results.push(check_backend().await);

    info!("preflight complete, {} check(s) run", results.len());
    Ok(PreflightReport { results })
}

fn check_interface(params: &TestParams) -> CheckResult {
    if params.interface.is_empty() {
        return CheckResult {
            component: "Interface".to_string(),
            status: CheckStatus::Fail,
            details: "no interface configured".to_string(),
            remediation: Some("Set `interface` in the config or pass --interface.".to_string()),
        };
    }
    let iface = NetworkInterface::new(&params.interface);
    if !iface.exists() {
        return CheckResult {
            component: format!("Interface: {}", params.interface),
            status: CheckStatus::Fail,
            details: "not present on this host".to_string(),
            remediation: Some("Check cabling and drivers.".to_string()),
        };
    }
    match iface.speed_mbit() {
        Ok(speed) => CheckResult {
            component: format!("Interface: {}", params.interface),
            status: CheckStatus::Pass,
            details: format!("link speed {speed} Mb/s"),
            remediation: None,
        },
        Err(_) => CheckResult {
            component: format!("Interface: {}", params.interface),
            status: CheckStatus::Warning,
            details: "present, but link speed not reported (link down?)".to_string(),
            remediation: Some("Bring the link up before running throughput cases.".to_string()),
        },
    }
}

async fn check_peer(params: &TestParams) -> CheckResult {
    if params.peer_ip.is_empty() {
        return CheckResult {
            component: "Peer".to_string(),
            status: CheckStatus::Skipped,
            details: "no peer address configured".to_string(),
            remediation: Some("Set `peer_ip` for the peer-driven cases.".to_string()),
        };
    }
    let reachable = matches!(
        exec::run("ping", &["-c", "1", "-W", "2", &params.peer_ip]).await,
        Ok(out) if out.success()
    );
    if reachable {
        CheckResult {
            component: format!("Peer: {}", params.peer_ip),
            status: CheckStatus::Pass,
            details: "responds to ping".to_string(),
            remediation: None,
        }
    } else {
        CheckResult {
            component: format!("Peer: {}", params.peer_ip),
            status: CheckStatus::Fail,
            details: "no ping response".to_string(),
            remediation: Some("Verify the peer address and the link between the hosts.".to_string()),
        }
    }
}

async fn check_binaries() -> Vec<CheckResult> {
    let mut missing = Vec::new();
    for bin in REQUIRED_BINARIES {
        let found = matches!(exec::run("which", &[bin]).await, Ok(out) if out.success());
        if !found {
            missing.push(*bin);
        }
    }
    if missing.is_empty() {
        vec![CheckResult {
            component: "Binaries".to_string(),
            status: CheckStatus::Pass,
            details: "all required tools present".to_string(),
            remediation: None,
        }]
    } else {
        vec![CheckResult {
            component: "Binaries".to_string(),
            status: CheckStatus::Warning,
            details: format!("missing: {}", missing.join(", ")),
            remediation: Some("Install the missing tools; some cases install their own.".to_string()),
        }]
    }
}

async fn check_backend() -> CheckResult {
    match PkgBackend::detect().await {
        Some(backend) => CheckResult {
            component: "Package backend".to_string(),
            status: CheckStatus::Pass,
            details: format!("{backend:?}"),
            remediation: None,
        },
        None => CheckResult {
            component: "Package backend".to_string(),
            status: CheckStatus::Fail,
            details: "no supported package manager found".to_string(),
            remediation: Some("apt, dnf, yum or zypper is required.".to_string()),
        },
    }
}
