//! Network interface state: sysfs reads and `ip` command mutations, on the
//! local host and (over the session) on the peer.

use crate::exec;
use crate::remote::RemoteSession;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Names of the interfaces present on this host, from /sys/class/net.
pub fn interfaces() -> Result<Vec<String>> {
    let entries =
        std::fs::read_dir("/sys/class/net").context("failed to read network interfaces")?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

/// One named interface on the local host.
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    name: String,
}

impl NetworkInterface {
    pub fn new(name: &str) -> Self {
        NetworkInterface {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn sysfs(&self, attr: &str) -> PathBuf {
        PathBuf::from("/sys/class/net").join(&self.name).join(attr)
    }

    pub fn exists(&self) -> bool {
        self.sysfs("").exists()
    }

    /// Assign an IPv4 address. No-op flagged by the caller when ip is empty.
    pub async fn add_ipaddr(&self, ip: &str, prefix: u8) -> Result<()> {
        info!(iface = %self.name, %ip, %prefix, "adding address");
        let cidr = format!("{ip}/{prefix}");
        let out = exec::run("ip", &["addr", "add", &cidr, "dev", &self.name]).await?;
        // "File exists" means the address is already configured; keep going.
        if !out.success() && !out.stderr_text().contains("File exists") {
            bail!(
                "ip addr add {cidr} dev {} failed: {}",
                self.name,
                out.stderr_text().trim()
            );
        }
        Ok(())
    }

    pub async fn remove_ipaddr(&self, ip: &str, prefix: u8) -> Result<()> {
        info!(iface = %self.name, %ip, %prefix, "removing address");
        let cidr = format!("{ip}/{prefix}");
        let out = exec::run("ip", &["addr", "del", &cidr, "dev", &self.name]).await?;
        if !out.success() {
            bail!(
                "ip addr del {cidr} dev {} failed: {}",
                self.name,
                out.stderr_text().trim()
            );
        }
        Ok(())
    }

    pub async fn set_mtu(&self, mtu: u32) -> Result<()> {
        info!(iface = %self.name, %mtu, "setting mtu");
        let mtu = mtu.to_string();
        let out = exec::run("ip", &["link", "set", &self.name, "mtu", &mtu]).await?;
        if !out.success() {
            bail!("failed to set mtu on {}: {}", self.name, out.stderr_text().trim());
        }
        Ok(())
    }

    pub async fn bring_up(&self) -> Result<()> {
        let out = exec::run("ip", &["link", "set", &self.name, "up"]).await?;
        if !out.success() {
            bail!("failed to bring up {}: {}", self.name, out.stderr_text().trim());
        }
        Ok(())
    }

    /// Carrier present and operstate up.
    pub fn is_link_up(&self) -> bool {
        let operstate = std::fs::read_to_string(self.sysfs("operstate")).unwrap_or_default();
        if operstate.trim() == "up" {
            return true;
        }
        let carrier = std::fs::read_to_string(self.sysfs("carrier")).unwrap_or_default();
        carrier.trim() == "1"
    }

    /// Poll for link-up once a second, bounded by `timeout`.
    pub async fn wait_link_up(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_link_up() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            debug!(iface = %self.name, "waiting for link");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Negotiated link speed in Mb/s from the sysfs speed attribute. Read at
    /// execution time so MTU/link renegotiation is reflected in thresholds.
    pub fn speed_mbit(&self) -> Result<u64> {
        let raw = std::fs::read_to_string(self.sysfs("speed"))
            .with_context(|| format!("failed to read link speed of {}", self.name))?;
        let speed: i64 = raw
            .trim()
            .parse()
            .with_context(|| format!("bad speed value for {}: {raw:?}", self.name))?;
        if speed <= 0 {
            bail!("link speed of {} is not reported (got {speed})", self.name);
        }
        Ok(speed as u64)
    }
}

/// Name of the peer interface bearing `ip`, discovered over the session.
pub async fn peer_interface_for(session: &RemoteSession, ip: &str) -> Result<String> {
    let out = session
        .run("ip -o -4 addr show")
        .await
        .context("failed to list peer addresses")?;
    if !out.success() {
        bail!("ip addr listing on peer failed: {}", out.stderr_text().trim());
    }
    interface_bearing(&out.stdout_text(), ip)
        .ok_or_else(|| anyhow::anyhow!("no peer interface carries {ip}"))
}

/// Parse one-line `ip -o -4 addr show` output for the interface owning `ip`.
fn interface_bearing(output: &str, ip: &str) -> Option<String> {
    let needle = format!("{ip}/");
    for line in output.lines() {
        // 2: eth1    inet 10.0.0.2/24 brd 10.0.0.255 scope global eth1
        if line.contains(&needle) {
            let mut tokens = line.split_whitespace();
            let _idx = tokens.next()?;
            return tokens.next().map(|s| s.to_string());
        }
    }
    None
}

/// Set the MTU of a named interface on the peer.
pub async fn peer_set_mtu(session: &RemoteSession, iface: &str, mtu: u32) -> Result<()> {
    info!(peer_iface = %iface, %mtu, "setting peer mtu");
    let out = session
        .run(&format!("ip link set {iface} mtu {mtu}"))
        .await?;
    if !out.success() {
        bail!("peer mtu change on {iface} failed: {}", out.stderr_text().trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_bearing_finds_named_interface() {
        let output = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: eth1    inet 10.0.0.2/24 brd 10.0.0.255 scope global eth1\\       valid_lft forever preferred_lft forever
";
        assert_eq!(
            interface_bearing(output, "10.0.0.2"),
            Some("eth1".to_string())
        );
        assert_eq!(interface_bearing(output, "10.0.0.3"), None);
    }

    #[test]
    fn test_interface_bearing_requires_exact_prefix_match() {
        // 10.0.0.20 must not match a query for 10.0.0.2.
        let output = "2: eth1    inet 10.0.0.20/24 brd 10.0.0.255 scope global eth1";
        assert_eq!(interface_bearing(output, "10.0.0.2"), None);
    }

    #[test]
    fn test_loopback_is_listed() {
        // Every Linux host has lo; keeps the sysfs scan honest.
        let names = interfaces().unwrap();
        assert!(names.iter().any(|n| n == "lo"));
    }

    #[test]
    fn test_missing_interface_does_not_exist() {
        assert!(!NetworkInterface::new("pbench-does-not-exist0").exists());
    }
}
