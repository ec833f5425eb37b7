use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use peerbench::cases::CaseKind;
use peerbench::params::TestParams;
use peerbench::verdict::TestReport;

#[derive(Parser)]
#[command(
    name = "peerbench",
    about = "Peer-driven benchmark and capture tests for Linux network links",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one test case (setup, execute, verify, teardown)
    Run {
        /// Test case to run
        #[arg(value_enum)]
        case: CaseKind,

        /// TOML parameter file
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSON report for machine parsing
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// List the available test cases
    List,

    /// Check environment readiness without running a test
    Preflight {
        /// TOML parameter file
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// CLI overrides for values from the parameter file.
#[derive(Args, Debug)]
struct Overrides {
    /// Peer machine address
    #[arg(long)]
    peer_ip: Option<String>,

    /// Peer login user
    #[arg(long)]
    peer_user: Option<String>,

    /// Peer login password (key auth is used when omitted)
    #[arg(long)]
    peer_password: Option<String>,

    /// Interface under test
    #[arg(long)]
    interface: Option<String>,

    /// Address to assign to the interface for the test
    #[arg(long)]
    host_ip: Option<String>,

    /// Netmask (dotted quad or prefix length) for --host-ip
    #[arg(long)]
    netmask: Option<String>,

    /// MTU to apply on both ends for the test
    #[arg(long)]
    mtu: Option<u32>,

    /// Throughput floor as a percentage of link speed
    #[arg(long)]
    expected_throughput: Option<u64>,

    /// Packet count for the tcpdump case
    #[arg(long)]
    count: Option<u64>,

    /// Accepted kernel-drop ceiling as a percentage of --count
    #[arg(long)]
    drop_accepted: Option<u64>,

    /// tcpdump traffic/filter option (tcp, udp, icmp, host, src, dst, ...)
    #[arg(long)]
    option: Option<String>,

    /// Start the benchmark server on the peer before the run
    #[arg(long)]
    server_run: bool,

    /// Scratch directory for downloads, builds and captures
    #[arg(long)]
    workdir: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, params: &mut TestParams) {
        if let Some(v) = self.peer_ip {
            params.peer_ip = v;
        }
        if let Some(v) = self.peer_user {
            params.peer_user = v;
        }
        if let Some(v) = self.peer_password {
            params.peer_password = Some(v);
        }
        if let Some(v) = self.interface {
            params.interface = v;
        }
        if let Some(v) = self.host_ip {
            params.host_ip = v;
        }
        if let Some(v) = self.netmask {
            params.netmask = v;
        }
        if let Some(v) = self.mtu {
            params.mtu = v;
        }
        if let Some(v) = self.expected_throughput {
            params.expected_throughput = v;
        }
        if let Some(v) = self.count {
            params.count = v;
        }
        if let Some(v) = self.drop_accepted {
            params.drop_accepted = v;
        }
        if let Some(v) = self.option {
            params.option = v;
        }
        if self.server_run {
            params.iperf_server_run = true;
            params.uperf_server_run = true;
        }
        if let Some(v) = self.workdir {
            params.workdir = v;
        }
    }
}

fn load_params(config: Option<&PathBuf>, overrides: Overrides) -> Result<TestParams> {
    let mut params = TestParams::load(config.map(|p| p.as_path()))?;
    overrides.apply(&mut params);
    Ok(params)
}

fn print_report(report: &TestReport) {
    println!("\n{} : {}", report.case, report.verdict.label());
    if let Some(reason) = report.verdict.reason() {
        println!("  reason: {}", reason);
    }
    for detail in &report.details {
        println!("  {}", detail);
    }
    if let Some(issue) = &report.teardown {
        println!("  teardown issue: {}", issue);
    }
    println!(
        "  run {} finished in {:.1}s",
        report.run_id, report.duration_secs
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            case,
            config,
            json,
            overrides,
        } => {
            let params = load_params(config.as_ref(), overrides)?;
            tracing::info!(case = case.name(), peer = %params.peer_ip, "Running test case");
            let report = peerbench::run_case(case, &params).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            std::process::exit(report.verdict.exit_code());
        }
        Commands::List => {
            println!("{:<12} | Description", "Case");
            println!("{:-<12}-|-{:-<50}", "", "");
            for kind in CaseKind::all() {
                println!("{:<12} | {}", kind.name(), kind.describe());
            }
        }
        Commands::Preflight {
            config,
            json,
            overrides,
        } => {
            let params = load_params(config.as_ref(), overrides)?;
            tracing::info!("Running preflight checks");
            let report = peerbench::preflight::run(&params).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\npeerbench environment preflight");
                println!("{:<25} | {:<6} | Details", "Component", "Status");
                println!("{:-<25}-|-{:-<6}-|-{:-<40}", "", "", "");
                for res in &report.results {
                    println!(
                        "{:<25} | {:<6} | {}",
                        res.component,
                        res.status.label(),
                        res.details
                    );
                    if let Some(rem) = &res.remediation {
                        println!("{:<25} | {:<6} |   -> {}", "", "", rem);
                    }
                }
                println!();
            }
            if !report.ready() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
