//! Local process execution: one-shot commands and background children.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, warn};

/// Captured result of a single command invocation.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// stdout decoded lossily for line scanning.
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(out: std::process::Output) -> Self {
        CommandOutput {
            exit_status: out.status.code().unwrap_or(-1),
            stdout: out.stdout,
            stderr: out.stderr,
        }
    }
}

/// Run a program with args, capturing status and output.
pub async fn run(program: &str, args: &[&str]) -> Result<CommandOutput> {
    debug!(%program, ?args, "exec");
    let out = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to execute {program}"))?;
    Ok(out.into())
}

/// Run a shell fragment (`sh -c`). Used for compound build steps where the
/// original commands are genuinely shell pipelines.
pub async fn sh(script: &str) -> Result<CommandOutput> {
    debug!(%script, "exec sh");
    let out = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(script)
        .output()
        .await
        .with_context(|| format!("failed to execute shell command: {script}"))?;
    Ok(out.into())
}

/// Run a shell fragment with a working directory.
pub async fn sh_in(dir: &Path, script: &str) -> Result<CommandOutput> {
    debug!(dir = %dir.display(), %script, "exec sh");
    let out = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(script)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to execute shell command: {script}"))?;
    Ok(out.into())
}

/// A long-lived child launched alongside the foreground command (benchmark
/// server, traffic source, packet sniffer). Stopped explicitly; the driver
/// never waits on its own completion.
pub struct BackgroundProcess {
    child: tokio::process::Child,
    desc: String,
}

impl BackgroundProcess {
    pub fn spawn(program: &str, args: &[&str]) -> Result<Self> {
        debug!(%program, ?args, "spawn background");
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        Ok(BackgroundProcess {
            child,
            desc: format!("{program} {}", args.join(" ")),
        })
    }

    pub fn describe(&self) -> &str {
        &self.desc
    }

    /// Kill the child and reap it. Already-exited children are fine.
    pub async fn stop(mut self) -> Result<()> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(desc = %self.desc, %status, "background process already exited");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => warn!(desc = %self.desc, "try_wait failed: {}", e),
        }
        self.child
            .kill()
            .await
            .with_context(|| format!("failed to kill {}", self.desc))?;
        Ok(())
    }
}
