//! Command channel to the peer host, over the system ssh/scp binaries.
//!
//! The sole operation the tests need is "run command, get exit status +
//! stdout + stderr", plus a recursive copy for shipping source trees. Password
//! auth wraps ssh with `sshpass`; key auth is the default.

use crate::exec::{BackgroundProcess, CommandOutput};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// An authenticated command channel to one peer machine. Owned by a single
/// test case for the duration of its run.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    host: String,
    user: String,
    password: Option<String>,
}

impl RemoteSession {
    pub fn new(host: &str, user: &str, password: Option<&str>) -> Self {
        RemoteSession {
            host: host.to_string(),
            user: user.to_string(),
            password: password.map(|p| p.to_string()),
        }
    }

    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn ssh_options() -> [&'static str; 6] {
        [
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "ConnectTimeout=30",
        ]
    }

    /// Run `command` on the peer through a login shell, capturing the result.
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!(peer = %self.host, %command, "remote exec");
        let target = self.target();
        let mut argv: Vec<&str> = Vec::new();
        if let Some(pw) = &self.password {
            argv.extend(["sshpass", "-p", pw.as_str()]);
        }
        argv.push("ssh");
        argv.extend(Self::ssh_options());
        argv.push(&target);
        argv.push(command);

        let out = tokio::process::Command::new(argv[0])
            .args(&argv[1..])
            .output()
            .await
            .with_context(|| format!("failed to reach peer {}", self.host))?;
        Ok(out.into())
    }

    /// Launch `command` on the peer and leave it running, holding the ssh
    /// child as the handle. Used for benchmark servers started before the
    /// foreground run and stopped at teardown.
    pub fn spawn(&self, command: &str) -> Result<BackgroundProcess> {
        debug!(peer = %self.host, %command, "remote spawn");
        let target = self.target();
        let mut argv: Vec<&str> = Vec::new();
        if let Some(pw) = &self.password {
            argv.extend(["sshpass", "-p", pw.as_str()]);
        }
        argv.push("ssh");
        argv.extend(Self::ssh_options());
        argv.push(&target);
        argv.push(command);
        BackgroundProcess::spawn(argv[0], &argv[1..])
    }

    /// Recursively copy a local directory to `remote_dir` on the peer.
    pub async fn copy_to(&self, local: &Path, remote_dir: &str) -> Result<CommandOutput> {
        debug!(peer = %self.host, local = %local.display(), %remote_dir, "scp");
        let src = local.to_string_lossy().to_string();
        let dst = format!("{}:{}", self.target(), remote_dir);
        let mut argv: Vec<&str> = Vec::new();
        if let Some(pw) = &self.password {
            argv.extend(["sshpass", "-p", pw.as_str()]);
        }
        argv.push("scp");
        argv.extend(Self::ssh_options());
        argv.extend(["-r", src.as_str(), dst.as_str()]);

        let out = tokio::process::Command::new(argv[0])
            .args(&argv[1..])
            .output()
            .await
            .with_context(|| format!("failed to run scp to {}", self.host))?;
        Ok(out.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_formatting() {
        let s = RemoteSession::new("10.0.0.2", "root", None);
        assert_eq!(s.target(), "root@10.0.0.2");
    }

    #[test]
    fn test_run_surfaces_unreachable_peer_as_nonzero() {
        // ssh to an invalid name fails fast; the session must surface that as
        // a captured non-zero exit, not a panic.
        let s = RemoteSession::new("invalid.peerbench.test.invalid", "root", None);
        let out = tokio_test::block_on(s.run("true")).unwrap();
        assert!(!out.success());
    }
}
