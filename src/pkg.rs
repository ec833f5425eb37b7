//! OS package handling for the local host and the peer machine.
//!
//! The peer is assumed to run the same family of distro as the host (the two
//! ends of one lab link), so the host's backend command is replayed over the
//! remote session for peer installs.

use crate::exec;
use crate::remote::RemoteSession;
use crate::verdict::{skip, CaseResult};
use tracing::{debug, info};

/// Supported package manager backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgBackend {
    Apt,
    Dnf,
    Yum,
    Zypper,
}

impl PkgBackend {
    /// Probe PATH for a known backend.
    pub async fn detect() -> Option<PkgBackend> {
        for (bin, backend) in [
            ("apt-get", PkgBackend::Apt),
            ("dnf", PkgBackend::Dnf),
            ("yum", PkgBackend::Yum),
            ("zypper", PkgBackend::Zypper),
        ] {
            if let Ok(out) = exec::run("which", &[bin]).await {
                if out.success() {
                    debug!(?backend, "package backend detected");
                    return Some(backend);
                }
            }
        }
        None
    }

    /// Non-interactive install command, also replayed on the peer.
    pub fn install_command(&self, pkg: &str) -> String {
        match self {
            PkgBackend::Apt => format!("apt-get install -y {pkg}"),
            PkgBackend::Dnf => format!("dnf install -y {pkg}"),
            PkgBackend::Yum => format!("yum install -y {pkg}"),
            PkgBackend::Zypper => format!("zypper --non-interactive install {pkg}"),
        }
    }

    /// Is `pkg` already installed locally?
    pub async fn check_installed(&self, pkg: &str) -> bool {
        let result = match self {
            PkgBackend::Apt => exec::run("dpkg", &["-s", pkg]).await,
            _ => exec::run("rpm", &["-q", pkg]).await,
        };
        matches!(result, Ok(out) if out.success())
    }

    /// Install `pkg` locally unless already present. A failed install is a
    /// skip: the environment cannot support the test.
    pub async fn ensure_installed(&self, pkg: &str) -> CaseResult<()> {
        if self.check_installed(pkg).await {
            return Ok(());
        }
        info!(%pkg, "installing package");
        let out = exec::sh(&self.install_command(pkg))
            .await
            .map_err(|e| skip(format!("could not run package install for {pkg}: {e}")))?;
        if !out.success() {
            return Err(skip(format!("{pkg} package is needed to test")));
        }
        Ok(())
    }

    /// Install `pkg` on the peer over the session.
    pub async fn ensure_installed_peer(
        &self,
        session: &RemoteSession,
        pkg: &str,
    ) -> CaseResult<()> {
        let cmd = self.install_command(pkg);
        let out = session
            .run(&cmd)
            .await
            .map_err(|e| skip(format!("peer install of {pkg} failed: {e}")))?;
        if !out.success() {
            return Err(skip(format!(
                "unable to install the package {pkg} on peer machine"
            )));
        }
        Ok(())
    }
}

/// Lowercased distro ID ("ubuntu", "rhel", "opensuse-leap", ...) from
/// /etc/os-release; "unknown" if unreadable.
pub fn distro_id() -> String {
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|text| parse_os_release_id(&text))
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_os_release_id(text: &str) -> Option<String> {
    text.lines()
        .find(|l| l.starts_with("ID="))
        .map(|l| l[3..].trim().trim_matches('"').to_ascii_lowercase())
}

/// SuSE-family check used by the distro-dependent dependency tables.
pub fn is_suse(distro: &str) -> bool {
    distro.contains("suse") || distro.contains("sles")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_commands() {
        assert_eq!(
            PkgBackend::Apt.install_command("gcc"),
            "apt-get install -y gcc"
        );
        assert_eq!(PkgBackend::Dnf.install_command("perf"), "dnf install -y perf");
        assert_eq!(
            PkgBackend::Zypper.install_command("nmap"),
            "zypper --non-interactive install nmap"
        );
    }

    #[test]
    fn test_parse_os_release_id() {
        let text = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(parse_os_release_id(text), Some("ubuntu".to_string()));
        let quoted = "ID=\"opensuse-leap\"\nVERSION_ID=\"15.5\"\n";
        assert_eq!(parse_os_release_id(quoted), Some("opensuse-leap".to_string()));
        assert_eq!(parse_os_release_id("NAME=foo\n"), None);
    }

    #[test]
    fn test_is_suse() {
        assert!(is_suse("opensuse-leap"));
        assert!(is_suse("sles"));
        assert!(!is_suse("ubuntu"));
        assert!(!is_suse("rhel"));
    }
}
