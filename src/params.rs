//! Test parameters: TOML config file plus CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Parameters for one test run. Resolved once, immutable afterwards.
///
/// All fields are optional in the TOML file except `interface` and (for the
/// peer-driven cases) `peer_ip`; validation happens in each case's setup so a
/// missing value surfaces as a skip, never as a parse error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestParams {
    /// Address of the peer machine forming the other half of the link.
    pub peer_ip: String,
    pub peer_user: String,
    pub peer_password: Option<String>,

    /// Interface under test on the local host.
    pub interface: String,
    /// Address to assign to `interface` for the test. Empty = leave as-is.
    pub host_ip: String,
    /// Dotted-quad netmask or prefix length for `host_ip`.
    pub netmask: String,
    pub mtu: u32,

    /// Minimum acceptable throughput, as a percentage of link speed.
    pub expected_throughput: u64,

    /// Packet count for the tcpdump case (ping count and capture count).
    pub count: u64,
    /// Packet count for nping traffic; falls back to `count` when unset.
    pub nping_count: Option<u64>,
    /// Accepted kernel-drop ceiling, as a percentage of `count`.
    pub drop_accepted: u64,
    /// tcpdump capture filter: "tcp"/"udp"/"icmp" (nping traffic),
    /// "host"/"src"/"dst", or raw tcpdump expression text.
    pub option: String,

    pub iperf_server_run: bool,
    pub uperf_server_run: bool,
    pub uperf_profile: String,

    pub iperf_download: String,
    pub uperf_download: String,
    pub nmap_download: String,

    /// Scratch directory for downloads, builds and capture files.
    pub workdir: PathBuf,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            peer_ip: String::new(),
            peer_user: "root".to_string(),
            peer_password: None,
            interface: String::new(),
            host_ip: String::new(),
            netmask: String::new(),
            mtu: 1500,
            expected_throughput: 85,
            count: 500,
            nping_count: None,
            drop_accepted: 10,
            option: String::new(),
            iperf_server_run: false,
            uperf_server_run: false,
            uperf_profile: "manual/throughput.xml".to_string(),
            iperf_download: "https://excellmedia.dl.sourceforge.net/project/iperf2/iperf-2.0.13.tar.gz"
                .to_string(),
            uperf_download: "https://github.com/uperf/uperf/archive/master.zip".to_string(),
            nmap_download: "https://nmap.org/dist/nmap-7.80.tar.bz2".to_string(),
            workdir: std::env::temp_dir().join("peerbench"),
        }
    }
}

impl TestParams {
    /// Load parameters from a TOML file, or the defaults when `path` is None.
    pub fn load(path: Option<&Path>) -> Result<Self, ParamsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ParamsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ParamsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Effective nping packet count.
    pub fn nping_count(&self) -> u64 {
        self.nping_count.unwrap_or(self.count)
    }

    /// Prefix length for `host_ip`, from either a dotted-quad netmask or a
    /// bare prefix length. Defaults to 24 when the netmask is empty or bogus.
    pub fn prefix_len(&self) -> u8 {
        prefix_len(&self.netmask).unwrap_or(24)
    }
}

/// "255.255.255.0" -> 24, "16" -> 16.
pub fn prefix_len(netmask: &str) -> Option<u8> {
    let netmask = netmask.trim();
    if netmask.is_empty() {
        return None;
    }
    if !netmask.contains('.') {
        return netmask.parse::<u8>().ok().filter(|p| *p <= 32);
    }
    let mut bits = 0u32;
    let mut octets = 0;
    for part in netmask.split('.') {
        let octet: u8 = part.parse().ok()?;
        bits = (bits << 8) | octet as u32;
        octets += 1;
    }
    if octets != 4 {
        return None;
    }
    // Must be contiguous ones followed by zeros.
    let ones = bits.leading_ones();
    if bits.checked_shl(ones).unwrap_or(0) != 0 {
        return None;
    }
    Some(ones as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let p = TestParams::default();
        assert_eq!(p.peer_user, "root");
        assert_eq!(p.mtu, 1500);
        assert_eq!(p.expected_throughput, 85);
        assert_eq!(p.count, 500);
        assert_eq!(p.drop_accepted, 10);
        assert!(p.iperf_download.contains("iperf2"));
    }

    #[test]
    fn test_load_toml_overrides() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "peer_ip = \"10.0.0.2\"\ninterface = \"eth0\"\nmtu = 9000\nexpected_throughput = 90"
        )
        .unwrap();
        let p = TestParams::load(Some(f.path())).unwrap();
        assert_eq!(p.peer_ip, "10.0.0.2");
        assert_eq!(p.interface, "eth0");
        assert_eq!(p.mtu, 9000);
        assert_eq!(p.expected_throughput, 90);
        // Untouched fields keep their defaults.
        assert_eq!(p.peer_user, "root");
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "peer_adress = \"10.0.0.2\"").unwrap();
        assert!(matches!(
            TestParams::load(Some(f.path())),
            Err(ParamsError::Parse { .. })
        ));
    }

    #[test]
    fn test_prefix_len() {
        assert_eq!(prefix_len("255.255.255.0"), Some(24));
        assert_eq!(prefix_len("255.255.0.0"), Some(16));
        assert_eq!(prefix_len("255.255.255.255"), Some(32));
        assert_eq!(prefix_len("16"), Some(16));
        assert_eq!(prefix_len(""), None);
        // Non-contiguous masks are rejected.
        assert_eq!(prefix_len("255.0.255.0"), None);
        assert_eq!(prefix_len("garbage"), None);
    }

    #[test]
    fn test_nping_count_falls_back_to_count() {
        let mut p = TestParams::default();
        assert_eq!(p.nping_count(), 500);
        p.nping_count = Some(20);
        assert_eq!(p.nping_count(), 20);
    }
}
