//! Profile-driven throughput test with uperf.
//!
//! Same link lifecycle as the iperf case, with uperf's own wrinkles: a zip
//! checkout that needs autoreconf before configure, SCTP packages whose names
//! differ per distro family, an environment-driven client invocation, and
//! Gb-denominated result lines that normalize to Mb before the comparison.

use super::{apply_link, validate, LinkContext};
use crate::exec::{self, BackgroundProcess};
use crate::fetch;
use crate::params::TestParams;
use crate::parse;
use crate::pkg::{self, PkgBackend};
use crate::remote::RemoteSession;
use crate::verdict::{fail, skip, CaseResult, TestReport, Verdict};
use std::path::PathBuf;
use tracing::{info, warn};

const DEPS: &[&str] = &["gcc", "autoconf", "perl", "m4", "git-core", "automake"];

/// SCTP userland the uperf build links against; package names differ between
/// the Debian and RPM worlds.
fn sctp_deps(distro: &str) -> &'static [&'static str] {
    if distro == "ubuntu" || distro == "debian" {
        &["libsctp1", "libsctp-dev", "lksctp-tools"]
    } else {
        &["lksctp-tools", "lksctp-tools-devel"]
    }
}

struct Context {
    link: LinkContext,
    build_dir: PathBuf,
    server: Option<BackgroundProcess>,
}

pub async fn run(params: &TestParams) -> TestReport {
    let report = TestReport::begin("uperf");
    info!(case = "uperf", peer = %params.peer_ip, "starting");

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
    let distro = pkg::distro_id();
    for pkg in DEPS.iter().chain(sctp_deps(&distro)) {
        backend.ensure_installed(pkg).await?;
        backend.ensure_installed_peer(&session, pkg).await?;
    }

    let link = apply_link(params, iface, session).await?;

    let scratch = params.workdir.join("uperf");
    let archive = fetch::download(&params.uperf_download, &scratch)
        .await
        .map_err(|e| skip(format!("unable to fetch uperf source: {e}")))?;
    fetch::extract(&archive, &scratch)
        .await
        .map_err(|e| skip(format!("unable to extract uperf source: {e}")))?;
    let build_dir = source_dir(&scratch)?;
    let dir_name = build_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "uperf-master".to_string());

    let out = link
        .session
        .copy_to(&build_dir, "/tmp")
        .await
        .map_err(|e| skip(format!("scp to peer failed: {e}")))?;
    if !out.success() {
        return Err(skip("unable to copy the uperf source to the peer machine"));
    }
    let out = link
        .session
        .run(&format!(
            "cd /tmp/{dir_name} && autoreconf -fi && ./configure && make"
        ))
        .await
        .map_err(|e| skip(format!("remote build failed to start: {e}")))?;
    if !out.success() {
        return Err(skip("unable to compile uperf on the peer machine"));
    }

    let server = if params.uperf_server_run {
        let handle = link
            .session
            .spawn(&format!("/tmp/{dir_name}/src/uperf -s"))
            .map_err(|e| skip(format!("could not start uperf server on peer: {e}")))?;
        info!(server = %handle.describe(), "peer server started");
        Some(handle)
    } else {
        None
    };

    fetch::autoreconf_configure_make(&build_dir)
        .await
        .map_err(|e| skip(format!("unable to compile uperf on the host: {e}")))?;

    Ok(Context {
        link,
        build_dir,
        server,
    })
}

/// The directory the archive unpacked into ("uperf-master" for the upstream
/// zip, version-stamped for release tags).
fn source_dir(scratch: &std::path::Path) -> CaseResult<PathBuf> {
    let entries = std::fs::read_dir(scratch)
        .map_err(|e| skip(format!("cannot read {}: {e}", scratch.display())))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir()
            && path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with("uperf"))
                .unwrap_or(false)
        {
            return Ok(path);
        }
    }
    Err(skip("extracted uperf source directory not found"))
}

async fn execute(params: &TestParams, ctx: &Context) -> CaseResult<Vec<String>> {
    let speed = ctx
        .link
        .iface
        .speed_mbit()
        .map_err(|e| fail(format!("cannot read link speed: {e}")))?;

    let cmd = format!(
        "h={} proto=tcp ./src/uperf -m {} -a",
        params.peer_ip, params.uperf_profile
    );
    let out = exec::sh_in(&ctx.build_dir, &cmd)
        .await
        .map_err(|e| fail(format!("uperf client did not start: {e}")))?;
    if !out.success() {
        return Err(fail(format!(
            "uperf run failed (exit {}): {}",
            out.exit_status,
            out.stderr_text().trim()
        )));
    }

    let stdout = out.stdout_text();
    if stdout.contains("WARNING") {
        warn!(case = "uperf", "test completed with warning");
    }
    evaluate(&stdout, &params.peer_ip, params.expected_throughput, speed)
}

/// Verification phase: every result line naming the peer must reach the
/// throughput floor, Gb figures normalized to Mb first.
pub fn evaluate(
    stdout: &str,
    peer_ip: &str,
    expected_pct: u64,
    link_speed_mbit: u64,
) -> CaseResult<Vec<String>> {
    let rates = parse::uperf_throughputs(stdout, peer_ip);
    if rates.is_empty() {
        return Err(fail("no throughput line naming the peer in uperf output"));
    }
    let mut details = Vec::new();
    for tput in rates {
        let mbit = tput.as_mbit();
        if parse::below_throughput_floor(mbit, expected_pct, link_speed_mbit) {
            return Err(fail(format!(
                "throughput actual - {}%, expected - {}%, actual value - {} Mb/sec",
                parse::percent_of_link(mbit, link_speed_mbit),
                expected_pct,
                mbit
            )));
        }
        details.push(format!(
            "throughput {} Mb/sec ({}% of {} Mb/s link, floor {}%)",
            mbit,
            parse::percent_of_link(mbit, link_speed_mbit),
            link_speed_mbit,
            expected_pct
        ));
    }
    Ok(details)
}

async fn teardown(params: &TestParams, mut ctx: Context) -> CaseResult<()> {
    // One canonical lifecycle: the peer-side server is always stopped here,
    // whether or not this run started it.
    if let Some(server) = ctx.server.take() {
        if let Err(e) = server.stop().await {
            warn!("could not stop server channel: {e}");
        }
    }
    let out = ctx
        .link
        .session
        .run("pkill uperf; rm -rf /tmp/uperf-*")
        .await
        .map_err(|e| fail(format!("ssh to peer failed during cleanup: {e}")))?;
    if !out.success() {
        return Err(fail(
            "either the ssh to the peer machine failed or the uperf process was not killed",
        ));
    }
    super::restore_link(params, &ctx.link).await
}
