//! Test cases and the shared lifecycle glue.
//!
//! Every case follows the same ordered pipeline: setup (validate, provision,
//! configure) -> execute/verify -> teardown. Context produced by setup is an
//! explicit value handed to the later phases, and teardown always runs once
//! setup has succeeded; its failures are reported on the [`TestReport`]
//! without overturning the main verdict.

pub mod iperf;
pub mod perf_probe;
pub mod tcpdump;
pub mod uperf;

use crate::exec::BackgroundProcess;
use crate::netdev::{self, NetworkInterface};
use crate::params::TestParams;
use crate::remote::RemoteSession;
use crate::verdict::{skip, CaseResult, TestReport};
use anyhow::Result;
use clap::ValueEnum;
use tracing::warn;

/// The available test cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CaseKind {
    /// One-way TCP throughput with iperf against the peer.
    Iperf,
    /// Profile-driven throughput with uperf against the peer.
    Uperf,
    /// Kernel packet-drop rate while capturing generated traffic.
    Tcpdump,
    /// perf kernel-probe duplicate-placement check (local only).
    PerfProbe,
}

impl CaseKind {
    pub fn all() -> [CaseKind; 4] {
        [
            CaseKind::Iperf,
            CaseKind::Uperf,
            CaseKind::Tcpdump,
            CaseKind::PerfProbe,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaseKind::Iperf => "iperf",
            CaseKind::Uperf => "uperf",
            CaseKind::Tcpdump => "tcpdump",
            CaseKind::PerfProbe => "perf-probe",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CaseKind::Iperf => "one-way TCP throughput vs. link speed (iperf)",
            CaseKind::Uperf => "profile-driven throughput vs. link speed (uperf)",
            CaseKind::Tcpdump => "kernel drop rate while capturing live traffic",
            CaseKind::PerfProbe => "perf probe duplicate-placement check",
        }
    }

    /// Does this case drive a remote peer?
    pub fn needs_peer(&self) -> bool {
        !matches!(self, CaseKind::PerfProbe)
    }
}

/// Run one case to completion.
pub async fn run(kind: CaseKind, params: &TestParams) -> TestReport {
    match kind {
        CaseKind::Iperf => iperf::run(params).await,
        CaseKind::Uperf => uperf::run(params).await,
        CaseKind::Tcpdump => tcpdump::run(params).await,
        CaseKind::PerfProbe => perf_probe::run(params).await,
    }
}

/// A background traffic generator running concurrently with a capture.
#[async_trait::async_trait]
pub trait TrafficSource: Send + Sync {
    fn describe(&self) -> String;

    /// Start generating traffic; the returned handle is stopped by the caller.
    async fn spawn(&self) -> Result<BackgroundProcess>;
}

/// Host/peer link state shared by the peer-driven cases.
pub(crate) struct LinkContext {
    pub session: RemoteSession,
    pub iface: NetworkInterface,
    pub peer_iface: String,
}

/// Validate parameters before anything destructive runs: a missing interface
/// or empty peer address skips the test without touching host or peer state.
pub(crate) fn validate(params: &TestParams) -> CaseResult<NetworkInterface> {
    let known = netdev::interfaces()
        .map_err(|e| skip(format!("cannot enumerate host interfaces: {e}")))?;
    if params.interface.is_empty() || !known.contains(&params.interface) {
        return Err(skip(format!(
            "{} interface is not available",
            params.interface
        )));
    }
    if params.peer_ip.is_empty() {
        return Err(skip("peer address is not configured"));
    }
    Ok(NetworkInterface::new(&params.interface))
}

/// Bring the link into its test configuration: assign the host address,
/// discover the peer interface, apply the MTU on both ends.
pub(crate) async fn apply_link(
    params: &TestParams,
    iface: NetworkInterface,
    session: RemoteSession,
) -> CaseResult<LinkContext> {
    if !params.host_ip.is_empty() {
        iface
            .add_ipaddr(&params.host_ip, params.prefix_len())
            .await
            .map_err(|e| skip(format!("failed to assign host address: {e}")))?;
    }

    let peer_iface = netdev::peer_interface_for(&session, &params.peer_ip)
        .await
        .map_err(|e| skip(format!("cannot find peer interface: {e}")))?;

    netdev::peer_set_mtu(&session, &peer_iface, params.mtu)
        .await
        .map_err(|_| skip("failed to set mtu in peer"))?;
    iface
        .set_mtu(params.mtu)
        .await
        .map_err(|_| skip("failed to set mtu in host"))?;

    Ok(LinkContext {
        session,
        iface,
        peer_iface,
    })
}

/// Revert the link: MTU back to 1500 on both ends, assigned address removed.
/// Best effort: the first failing step is reported, already-reverted steps
/// are not rolled back.
pub(crate) async fn restore_link(params: &TestParams, ctx: &LinkContext) -> CaseResult<()> {
    ctx.iface
        .set_mtu(1500)
        .await
        .map_err(|_| skip("failed to reset mtu in host"))?;
    netdev::peer_set_mtu(&ctx.session, &ctx.peer_iface, 1500)
        .await
        .map_err(|_| skip("failed to reset mtu in peer"))?;
    if !params.host_ip.is_empty() {
        if let Err(e) = ctx
            .iface
            .remove_ipaddr(&params.host_ip, params.prefix_len())
            .await
        {
            warn!("could not remove host address: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_names_are_stable() {
        let names: Vec<&str> = CaseKind::all().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["iperf", "uperf", "tcpdump", "perf-probe"]);
    }

    #[test]
    fn test_only_perf_probe_is_local() {
        assert!(CaseKind::Iperf.needs_peer());
        assert!(CaseKind::Uperf.needs_peer());
        assert!(CaseKind::Tcpdump.needs_peer());
        assert!(!CaseKind::PerfProbe.needs_peer());
    }

    #[test]
    fn test_validate_skips_on_missing_interface() {
        let params = TestParams {
            interface: "pbench-missing0".to_string(),
            peer_ip: "10.0.0.2".to_string(),
            ..TestParams::default()
        };
        let err = validate(&params).err().unwrap();
        let v: crate::verdict::Verdict = err.into();
        assert!(matches!(v, crate::verdict::Verdict::Skip(_)));
    }

    #[test]
    fn test_validate_skips_on_empty_peer() {
        // lo always exists, so this exercises the peer check specifically.
        let params = TestParams {
            interface: "lo".to_string(),
            ..TestParams::default()
        };
        let err = validate(&params).err().unwrap();
        match crate::verdict::Verdict::from(err) {
            crate::verdict::Verdict::Skip(reason) => {
                assert!(reason.contains("peer address"));
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }
}
