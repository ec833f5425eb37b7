//! One-way TCP throughput test with iperf.
//!
//! Builds iperf from source on both ends of the link, optionally starts the
//! server on the peer, runs the client against the peer address and checks the
//! sender-side throughput against a percentage of the negotiated link speed.

use super::{apply_link, validate, LinkContext};
use crate::exec::{self, BackgroundProcess};
use crate::fetch;
use crate::params::TestParams;
use crate::parse;
use crate::pkg::PkgBackend;
use crate::remote::RemoteSession;
use crate::verdict::{fail, skip, CaseResult, TestReport, Verdict};
use std::path::PathBuf;
use tracing::{info, warn};

const DEPS: &[&str] = &["gcc", "autoconf", "perl", "m4", "libtool"];

struct Context {
    link: LinkContext,
    /// Versioned source dir name, e.g. "iperf-2.0.13"; doubles as the peer
    /// scratch dir under /tmp.
    version: String,
    client: PathBuf,
    server: Option<BackgroundProcess>,
}

pub async fn run(params: &TestParams) -> TestReport {
    let report = TestReport::begin("iperf");
    info!(case = "iperf", peer = %params.peer_ip, "starting");

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
        backend.ensure_installed_peer(&session, pkg).await?;
    }

    let link = apply_link(params, iface, session).await?;

    let scratch = params.workdir.join("iperf");
    let tarball = fetch::download(&params.iperf_download, &scratch)
        .await
        .map_err(|e| skip(format!("unable to fetch iperf source: {e}")))?;
    let version = fetch::archive_stem(&tarball);
    fetch::extract(&tarball, &scratch)
        .await
        .map_err(|e| skip(format!("unable to extract iperf source: {e}")))?;
    let build_dir = scratch.join(&version);

    let out = link
        .session
        .copy_to(&build_dir, "/tmp")
        .await
        .map_err(|e| skip(format!("scp to peer failed: {e}")))?;
    if !out.success() {
        return Err(skip("unable to copy the iperf source to the peer machine"));
    }
    let out = link
        .session
        .run(&format!("cd /tmp/{version} && ./configure && make"))
        .await
        .map_err(|e| skip(format!("remote build failed to start: {e}")))?;
    if !out.success() {
        return Err(skip("unable to compile iperf on the peer machine"));
    }

    let server = if params.iperf_server_run {
        let cmd = format!("/tmp/{version}/src/iperf -s");
        let handle = link
            .session
            .spawn(&cmd)
            .map_err(|e| skip(format!("could not start iperf server on peer: {e}")))?;
        info!(server = %handle.describe(), "peer server started");
        Some(handle)
    } else {
        None
    };

    fetch::configure_and_make(&build_dir)
        .await
        .map_err(|e| skip(format!("unable to compile iperf on the host: {e}")))?;

    Ok(Context {
        link,
        version,
        client: build_dir.join("src").join("iperf"),
        server,
    })
}

async fn execute(params: &TestParams, ctx: &Context) -> CaseResult<Vec<String>> {
    // Read the link speed now, not at setup, so any MTU-driven renegotiation
    // is reflected in the threshold baseline.
    let speed = ctx
        .link
        .iface
        .speed_mbit()
        .map_err(|e| fail(format!("cannot read link speed: {e}")))?;

    let client = ctx.client.to_string_lossy().to_string();
    let out = exec::run(&client, &["-c", &params.peer_ip])
        .await
        .map_err(|e| fail(format!("iperf client did not start: {e}")))?;
    if !out.success() {
        return Err(fail(format!(
            "iperf run failed (exit {}): {}",
            out.exit_status,
            out.stderr_text().trim()
        )));
    }

    evaluate(&out.stdout_text(), params.expected_throughput, speed)
}

/// Verification phase: extract the sender throughput and hold it against the
/// expected percentage of link speed. Public so the threshold contract can be
/// exercised without hardware.
pub fn evaluate(stdout: &str, expected_pct: u64, link_speed_mbit: u64) -> CaseResult<Vec<String>> {
    let Some(tput) = parse::iperf_sender_throughput(stdout) else {
        return Err(fail("no sender summary line in iperf output"));
    };
    let mbit = tput.as_mbit();
    if parse::below_throughput_floor(mbit, expected_pct, link_speed_mbit) {
        return Err(fail(format!(
            "throughput actual - {}%, expected - {}%, actual value - {} Mb/sec",
            parse::percent_of_link(mbit, link_speed_mbit),
            expected_pct,
            mbit
        )));
    }
    Ok(vec![format!(
        "sender throughput {} Mb/sec ({}% of {} Mb/s link, floor {}%)",
        mbit,
        parse::percent_of_link(mbit, link_speed_mbit),
        link_speed_mbit,
        expected_pct
    )])
}

async fn teardown(params: &TestParams, mut ctx: Context) -> CaseResult<()> {
    if let Some(server) = ctx.server.take() {
        if let Err(e) = server.stop().await {
            warn!("could not stop server channel: {e}");
        }
    }
    let out = ctx
        .link
        .session
        .run(&format!("pkill iperf; rm -rf /tmp/{}", ctx.version))
        .await
        .map_err(|e| fail(format!("ssh to peer failed during cleanup: {e}")))?;
    if !out.success() {
        return Err(fail(
            "either the ssh to the peer machine failed or the iperf process was not killed",
        ));
    }
    super::restore_link(params, &ctx.link).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER_937: &str =
        "[  5]   0.00-10.00  sec  1.09 GBytes   937 Mbits/sec                  sender\n";
    const SENDER_800: &str =
        "[  5]   0.00-10.00  sec  953 MBytes   800 Mbits/sec                  sender\n";

    #[test]
    fn test_evaluate_pass_above_floor() {
        // 937 >= 85% of 1000.
        let details = evaluate(SENDER_937, 85, 1000).unwrap();
        assert!(details[0].contains("937 Mb/sec"));
    }

    #[test]
    fn test_evaluate_fail_below_floor_cites_percentages() {
        let err = evaluate(SENDER_800, 85, 1000).err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("actual - 80%"));
        assert!(msg.contains("expected - 85%"));
        assert!(msg.contains("800 Mb/sec"));
    }

    #[test]
    fn test_evaluate_boundary_equal_passes() {
        let line = "[  5]   0.00-10.00  sec  1013 MBytes   850 Mbits/sec        sender\n";
        assert!(evaluate(line, 85, 1000).is_ok());
    }

    #[test]
    fn test_evaluate_missing_sender_line_fails() {
        let err = evaluate("connect failed: Connection refused\n", 85, 1000)
            .err()
            .unwrap();
        assert!(matches!(err, crate::verdict::CaseError::Fail(_)));
    }
}
