//! Kernel packet-drop test: capture generated traffic with tcpdump and fail
//! when the kernel drops more than the accepted share of it.
//!
//! Traffic comes from a background source (plain ping, or nping for
//! tcp/udp/icmp floods) while tcpdump captures on the interface under test;
//! the drop figure is read from tcpdump's own stderr summary.

use super::{apply_link, validate, LinkContext, TrafficSource};
use crate::exec::{self, BackgroundProcess};
use crate::fetch;
use crate::params::TestParams;
use crate::parse;
use crate::pkg::{self, PkgBackend};
use crate::remote::RemoteSession;
use crate::verdict::{fail, skip, CaseResult, TestReport, Verdict};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const DEPS: &[&str] = &["tcpdump", "flex", "bison", "gcc", "gcc-c++", "nmap"];

const LINK_UP_TIMEOUT: Duration = Duration::from_secs(120);

struct Context {
    link: LinkContext,
    /// Locally built nping for distros that do not package it (SuSE).
    nping: Option<PathBuf>,
    capture_file: PathBuf,
}

/// Steady ping towards the peer, pinned to the interface under test.
struct PingFlood {
    iface: String,
    peer_ip: String,
    count: u64,
}

#[async_trait::async_trait]
impl TrafficSource for PingFlood {
    fn describe(&self) -> String {
        format!("ping -I {} {} -c {}", self.iface, self.peer_ip, self.count)
    }

    async fn spawn(&self) -> anyhow::Result<BackgroundProcess> {
        let count = self.count.to_string();
        BackgroundProcess::spawn(
            "ping",
            &["-I", &self.iface, &self.peer_ip, "-c", &count],
        )
    }
}

/// nping flood in one of its protocol modes (tcp/udp/icmp).
struct NpingFlood {
    binary: String,
    mode: String,
    peer_ip: String,
    count: u64,
}

#[async_trait::async_trait]
impl TrafficSource for NpingFlood {
    fn describe(&self) -> String {
        format!("{} --{} {} -c {}", self.binary, self.mode, self.peer_ip, self.count)
    }

    async fn spawn(&self) -> anyhow::Result<BackgroundProcess> {
        let mode = format!("--{}", self.mode);
        let count = self.count.to_string();
        BackgroundProcess::spawn(&self.binary, &[&mode, &self.peer_ip, "-c", &count])
    }
}

pub async fn run(params: &TestParams) -> TestReport {
    let report = TestReport::begin("tcpdump");
    info!(case = "tcpdump", peer = %params.peer_ip, "starting");

    let ctx = match setup(params).await {
        Ok(ctx) => ctx,
        Err(e) => return report.finish(e.into(), Vec::new(), None),
    };
    let (verdict, details) = match execute(params, &ctx).await {
        Ok(details) => (Verdict::Pass, details),
        Err(e) => (e.into(), Vec::new()),
    };
    let teardown_issue = teardown(params, ctx).await.err().map(|e| e.to_string());
    report.finish(verdict, details, teardown_issue)
}

async fn setup(params: &TestParams) -> CaseResult<Context> {
    let iface = validate(params)?;
    let session = RemoteSession::new(
        &params.peer_ip,
        &params.peer_user,
        params.peer_password.as_deref(),
    );

    let backend = PkgBackend::detect()
        .await
        .ok_or_else(|| skip("no supported package backend on this host"))?;
    for pkg in DEPS {
        backend.ensure_installed(pkg).await?;
    }

    let link = apply_link(params, iface, session).await?;
    link.iface
        .bring_up()
        .await
        .map_err(|e| skip(format!("cannot bring up {}: {e}", params.interface)))?;
    if !link.iface.wait_link_up(LINK_UP_TIMEOUT).await {
        return Err(skip(
            "link up of interface is taking longer than 120 seconds",
        ));
    }

    // nping ships with nmap everywhere except the SuSE package, which drops
    // it; build from the upstream tarball there.
    let nping = if pkg::is_suse(&pkg::distro_id()) {
        Some(build_nping(params).await?)
    } else {
        None
    };

    let capture_file = params.workdir.join("tcpdump.pcap");
    Ok(Context {
        link,
        nping,
        capture_file,
    })
}

async fn build_nping(params: &TestParams) -> CaseResult<PathBuf> {
    let scratch = params.workdir.join("nmap");
    let tarball = fetch::download(&params.nmap_download, &scratch)
        .await
        .map_err(|e| skip(format!("unable to fetch nmap source: {e}")))?;
    let version = fetch::archive_stem(&tarball);
    fetch::extract(&tarball, &scratch)
        .await
        .map_err(|e| skip(format!("unable to extract nmap source: {e}")))?;
    let build_dir = scratch.join(&version);
    fetch::configure_and_make(&build_dir)
        .await
        .map_err(|e| skip(format!("unable to compile nmap: {e}")))?;

    let nping = build_dir.join("nping").join("nping");
    let out = exec::run(&nping.to_string_lossy(), &["-h"])
        .await
        .map_err(|e| skip(format!("built nping does not run: {e}")))?;
    if !out.success() {
        return Err(skip("built nping does not run"));
    }
    Ok(nping)
}

fn traffic_source(params: &TestParams, ctx: &Context) -> Box<dyn TrafficSource> {
    match params.option.as_str() {
        mode @ ("tcp" | "udp" | "icmp") => {
            let binary = ctx
                .nping
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| "nping".to_string());
            Box::new(NpingFlood {
                binary,
                mode: mode.to_string(),
                peer_ip: params.peer_ip.clone(),
                count: params.nping_count(),
            })
        }
        _ => Box::new(PingFlood {
            iface: params.interface.clone(),
            peer_ip: params.peer_ip.clone(),
            count: params.count,
        }),
    }
}

/// Capture filter appended to the tcpdump invocation.
fn filter_args(params: &TestParams) -> Vec<String> {
    match params.option.as_str() {
        "" => Vec::new(),
        "host" | "src" => vec![params.option.clone(), params.host_ip.clone()],
        "dst" => vec!["dst".to_string(), params.peer_ip.clone()],
        other => other.split_whitespace().map(|s| s.to_string()).collect(),
    }
}

async fn execute(params: &TestParams, ctx: &Context) -> CaseResult<Vec<String>> {
    let source = traffic_source(params, ctx);
    info!(traffic = %source.describe(), "starting traffic source");
    let traffic = source
        .spawn()
        .await
        .map_err(|e| fail(format!("traffic source did not start: {e}")))?;

    let count = params.count.to_string();
    let capture = ctx.capture_file.to_string_lossy().to_string();
    let mut args: Vec<String> = vec![
        "-i".into(),
        params.interface.clone(),
        "-n".into(),
        "-c".into(),
        count,
    ];
    args.extend(filter_args(params));
    args.extend(["-w".to_string(), capture]);
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    let result = exec::run("tcpdump", &arg_refs).await;

    // Stop the generator before judging the capture, so a failing verdict
    // does not leak a running flood.
    if let Err(e) = traffic.stop().await {
        warn!("could not stop traffic source: {e}");
    }

    let out = result.map_err(|e| fail(format!("tcpdump did not start: {e}")))?;
    if !out.success() {
        return Err(fail(format!(
            "tcpdump run failed (exit {}): {}",
            out.exit_status,
            out.stderr_text().trim()
        )));
    }
    evaluate(&out.stderr_text(), params.drop_accepted, params.count)
}

/// Verification phase: the kernel-drop line from tcpdump's stderr summary
/// must stay below the accepted percentage of the packet count. Reaching the
/// ceiling exactly is a failure.
pub fn evaluate(stderr: &str, drop_pct: u64, packet_count: u64) -> CaseResult<Vec<String>> {
    match parse::kernel_drop_count(stderr) {
        Some(dropped) if parse::at_or_above_drop_ceiling(dropped, drop_pct, packet_count) => {
            Err(fail(format!(
                "{dropped} packets dropped by kernel, at or above {drop_pct}% of {packet_count}"
            )))
        }
        Some(dropped) => Ok(vec![format!(
            "{dropped} packets dropped by kernel (ceiling {}% of {packet_count})",
            drop_pct
        )]),
        None => Ok(vec!["no kernel drop summary in tcpdump output".to_string()]),
    }
}

async fn teardown(params: &TestParams, ctx: Context) -> CaseResult<()> {
    super::restore_link(params, &ctx.link).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_option(option: &str) -> TestParams {
        TestParams {
            peer_ip: "10.0.0.2".to_string(),
            host_ip: "10.0.0.1".to_string(),
            interface: "eth0".to_string(),
            option: option.to_string(),
            ..TestParams::default()
        }
    }

    #[test]
    fn test_filter_args_variants() {
        assert!(filter_args(&params_with_option("")).is_empty());
        assert_eq!(
            filter_args(&params_with_option("host")),
            vec!["host", "10.0.0.1"]
        );
        assert_eq!(
            filter_args(&params_with_option("src")),
            vec!["src", "10.0.0.1"]
        );
        assert_eq!(
            filter_args(&params_with_option("dst")),
            vec!["dst", "10.0.0.2"]
        );
        assert_eq!(
            filter_args(&params_with_option("port 22")),
            vec!["port", "22"]
        );
    }

    #[test]
    fn test_evaluate_below_ceiling_passes() {
        let stderr = "500 packets captured\n5 packets dropped by kernel\n";
        let details = evaluate(stderr, 10, 500).unwrap();
        assert!(details[0].contains("5 packets dropped"));
    }

    #[test]
    fn test_evaluate_at_ceiling_fails() {
        // 10% of 500 = 50; exactly 50 must fail.
        let stderr = "50 packets dropped by kernel\n";
        assert!(evaluate(stderr, 10, 500).is_err());
    }

    #[test]
    fn test_evaluate_without_summary_passes_with_note() {
        let details = evaluate("500 packets captured\n", 10, 500).unwrap();
        assert!(details[0].contains("no kernel drop summary"));
    }

    #[test]
    fn test_traffic_source_selection() {
        let ctx_nping = |nping| Context {
            link: LinkContext {
                session: RemoteSession::new("10.0.0.2", "root", None),
                iface: crate::netdev::NetworkInterface::new("eth0"),
                peer_iface: "eth1".to_string(),
            },
            nping,
            capture_file: PathBuf::from("/tmp/x.pcap"),
        };

        let src = traffic_source(&params_with_option("tcp"), &ctx_nping(None));
        assert!(src.describe().starts_with("nping --tcp"));

        let built = ctx_nping(Some(PathBuf::from("/scratch/nmap-7.80/nping/nping")));
        let src = traffic_source(&params_with_option("udp"), &built);
        assert!(src.describe().contains("/nping --udp"));

        let src = traffic_source(&params_with_option(""), &ctx_nping(None));
        assert!(src.describe().starts_with("ping -I eth0"));
    }
}
