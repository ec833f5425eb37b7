//! Tool output parsing and threshold checks.
//!
//! Each tool gets a small tolerant line matcher returning a typed value
//! instead of a fixed column offset, so minor output-format drift (extra
//! columns, changed spacing) does not break extraction. Values are truncated
//! to whole units: `937.5 Mbits/sec` reads as 937.

/// Unit of a reported transfer rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Mbit,
    Gbit,
}

/// A parsed throughput figure: truncated integer value plus its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    pub value: u64,
    pub unit: RateUnit,
}

impl Throughput {
    /// Normalized to Mb/s (Gb figures multiplied by 1000).
    pub fn as_mbit(&self) -> u64 {
        match self.unit {
            RateUnit::Mbit => self.value,
            RateUnit::Gbit => self.value * 1000,
        }
    }
}

/// Truncated integer part of a decimal token: "937.5" -> 937, "1.38" -> 1.
fn integer_part(token: &str) -> Option<u64> {
    let head = token.split('.').next().unwrap_or(token);
    if head.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

/// Throughput from the iperf client summary.
///
/// Scans for the line marked `sender` and within it the `<rate> <unit>/sec`
/// token pair, e.g. `[  5]  0.00-10.00 sec  1.09 GBytes  937 Mbits/sec  sender`.
pub fn iperf_sender_throughput(stdout: &str) -> Option<Throughput> {
    for line in stdout.lines() {
        if !line.contains("sender") {
            continue;
        }
        if let Some(tput) = rate_from_split_tokens(line) {
            return Some(tput);
        }
    }
    None
}

fn rate_from_split_tokens(line: &str) -> Option<Throughput> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    for pair in tokens.windows(2) {
        let unit = if pair[1].starts_with("Mbits/sec") {
            RateUnit::Mbit
        } else if pair[1].starts_with("Gbits/sec") {
            RateUnit::Gbit
        } else {
            continue;
        };
        if let Some(value) = integer_part(pair[0]) {
            return Some(Throughput { value, unit });
        }
    }
    None
}

/// Throughput figures from uperf output lines naming the peer address.
///
/// uperf glues value and unit into one token (`9.86Gb/s`, `955.06Mb/s`);
/// Gb-denominated figures are normalized by the caller via [`Throughput::as_mbit`].
/// Lines naming the peer but carrying no rate token are ignored.
pub fn uperf_throughputs(stdout: &str, peer_ip: &str) -> Vec<Throughput> {
    let mut rates = Vec::new();
    for line in stdout.lines() {
        if !line.contains(peer_ip) {
            continue;
        }
        if let Some(tput) = rate_from_glued_token(line) {
            rates.push(tput);
        }
    }
    rates
}

fn rate_from_glued_token(line: &str) -> Option<Throughput> {
    for token in line.split_whitespace() {
        let (stripped, unit) = if let Some(s) = token.strip_suffix("Mb/s") {
            (s, RateUnit::Mbit)
        } else if let Some(s) = token.strip_suffix("Gb/s") {
            (s, RateUnit::Gbit)
        } else {
            continue;
        };
        if let Some(value) = integer_part(stripped) {
            return Some(Throughput { value, unit });
        }
    }
    None
}

/// Kernel drop count from tcpdump's stderr summary, e.g.
/// `5 packets dropped by kernel`.
pub fn kernel_drop_count(stderr: &str) -> Option<u64> {
    for line in stderr.lines() {
        if !line.contains("packets dropped by kernel") {
            continue;
        }
        let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
        return digits.parse().ok();
    }
    None
}

/// Throughput floor: fails when measured is strictly below
/// `expected_pct * link_speed / 100`. Equal passes. Integer floor division,
/// so marginal cases round in the test's favor.
pub fn below_throughput_floor(tput_mbit: u64, expected_pct: u64, link_speed_mbit: u64) -> bool {
    tput_mbit < expected_pct * link_speed_mbit / 100
}

/// Drop ceiling: fails when drops reach `drop_pct * packet_count / 100`.
/// Equal fails. The boundary convention is deliberately the opposite of the
/// throughput floor; it is the existing contract of the drop-rate test.
pub fn at_or_above_drop_ceiling(dropped: u64, drop_pct: u64, packet_count: u64) -> bool {
    dropped >= drop_pct * packet_count / 100
}

/// Measured value as an integer percentage of link speed, for messages.
pub fn percent_of_link(tput_mbit: u64, link_speed_mbit: u64) -> u64 {
    if link_speed_mbit == 0 {
        return 0;
    }
    tput_mbit * 100 / link_speed_mbit
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPERF_OUTPUT: &str = "\
------------------------------------------------------------
Client connecting to 10.0.0.2, TCP port 5001
------------------------------------------------------------
[  5]   0.00-10.00  sec  1.09 GBytes   937 Mbits/sec                  sender
[  5]   0.00-10.04  sec  1.09 GBytes   935 Mbits/sec                  receiver
";

    #[test]
    fn test_iperf_sender_line_extraction() {
        let tput = iperf_sender_throughput(IPERF_OUTPUT).unwrap();
        assert_eq!(tput.value, 937);
        assert_eq!(tput.unit, RateUnit::Mbit);
        assert_eq!(tput.as_mbit(), 937);
    }

    #[test]
    fn test_iperf_decimal_rate_truncates() {
        let out = "[  3]  0.0-10.0 sec  1.10 GBytes  941.6 Mbits/sec   sender";
        assert_eq!(iperf_sender_throughput(out).unwrap().value, 941);
    }

    #[test]
    fn test_iperf_gbit_sender_line() {
        let out = "[  5]  0.00-10.00 sec  11.0 GBytes  9.42 Gbits/sec   sender";
        let tput = iperf_sender_throughput(out).unwrap();
        assert_eq!(tput.value, 9);
        assert_eq!(tput.as_mbit(), 9000);
    }

    #[test]
    fn test_iperf_no_sender_line() {
        assert_eq!(iperf_sender_throughput("connect failed\n"), None);
    }

    #[test]
    fn test_uperf_mbit_line() {
        let out = "10.0.0.2   1.12GB /  10.02(s) =   955.06Mb/s  12345op/s";
        let rates = uperf_throughputs(out, "10.0.0.2");
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].value, 955);
        assert_eq!(rates[0].as_mbit(), 955);
    }

    #[test]
    fn test_uperf_gbit_line_normalizes_times_1000() {
        let out = "10.0.0.2  11.51GB /  10.00(s) =   9.86Gb/s  8000op/s";
        let rates = uperf_throughputs(out, "10.0.0.2");
        assert_eq!(rates[0].value, 9);
        assert_eq!(rates[0].as_mbit(), 9000);
    }

    #[test]
    fn test_uperf_ignores_other_hosts_and_bare_mentions() {
        let out = "\
10.0.0.9   1.12GB /  10.02(s) =   955.06Mb/s
Run latency against 10.0.0.2 now
";
        assert!(uperf_throughputs(out, "10.0.0.2").is_empty());
    }

    #[test]
    fn test_kernel_drop_count() {
        let stderr = "\
500 packets captured
503 packets received by filter
5 packets dropped by kernel
";
        assert_eq!(kernel_drop_count(stderr), Some(5));
    }

    #[test]
    fn test_kernel_drop_count_multi_digit() {
        assert_eq!(
            kernel_drop_count("123 packets dropped by kernel\n"),
            Some(123)
        );
    }

    #[test]
    fn test_kernel_drop_count_absent() {
        assert_eq!(kernel_drop_count("500 packets captured\n"), None);
    }

    #[test]
    fn test_throughput_floor_boundary_is_inclusive_pass() {
        // 85% of 1000 Mb/s = 850: equal must NOT fail.
        assert!(!below_throughput_floor(850, 85, 1000));
        assert!(below_throughput_floor(849, 85, 1000));
        assert!(!below_throughput_floor(937, 85, 1000));
    }

    #[test]
    fn test_throughput_floor_uses_integer_division() {
        // 85 * 999 / 100 = 849.15 -> floor 849; 849 is not below 849.
        assert!(!below_throughput_floor(849, 85, 999));
        assert!(below_throughput_floor(848, 85, 999));
    }

    #[test]
    fn test_drop_ceiling_boundary_is_fail() {
        // 10% of 500 = 50: equal must fail, below must not.
        assert!(at_or_above_drop_ceiling(50, 10, 500));
        assert!(!at_or_above_drop_ceiling(49, 10, 500));
        assert!(at_or_above_drop_ceiling(51, 10, 500));
    }

    #[test]
    fn test_percent_of_link() {
        assert_eq!(percent_of_link(937, 1000), 93);
        assert_eq!(percent_of_link(800, 1000), 80);
        assert_eq!(percent_of_link(0, 0), 0);
    }
}
