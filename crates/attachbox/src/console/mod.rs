//! Node console rendering shared by remote sessions and the fixture node.
//!
//! The welcome banner is the first thing a console prints, either when the
//! node starts in console mode or when a client attaches over a transport:
//!
//! ```text
//! Welcome to the skaina JavaScript console!
//!
//! instance: skaina/v0.1.0/linux-x86_64/rust1.80
//! coinbase: 0x8605cdbbdb6d264aa742e77020dcbc58fcdce182
//! at block: 0 (Thu, 01 Jan 1970 00:00:00 UTC)
//!  datadir: /tmp/node
//!  modules: eth:1.0 net:1.0 rpc:1.0 web3:1.0
//!
//! >
//! ```

mod command;

pub use command::{render_error, render_value, Command};

use chrono::DateTime;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Prompt printed after the banner and after every command result.
pub const PROMPT: &str = "> ";

const BLOCK_TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S UTC";

/// Everything the welcome banner shows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Banner {
    /// Client name shown in the greeting line.
    pub name: String,
    /// Full client version string.
    pub instance: String,
    pub coinbase: String,
    pub block: u64,
    /// Block timestamp in seconds since the epoch.
    pub block_time: i64,
    /// Only shown when the console can reach the `admin` module.
    pub datadir: Option<String>,
    /// Module name → version.
    pub modules: BTreeMap<String, String>,
}

impl Banner {
    /// Banner text including the trailing prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Welcome to the {} JavaScript console!", self.name);
        out.push('\n');
        let _ = writeln!(out, "instance: {}", self.instance);
        let _ = writeln!(out, "coinbase: {}", self.coinbase);
        let _ = writeln!(
            out,
            "at block: {} ({})",
            self.block,
            format_block_time(self.block_time)
        );
        if let Some(datadir) = &self.datadir {
            let _ = writeln!(out, " datadir: {datadir}");
        }
        let _ = writeln!(out, " modules: {}", format_modules(&self.modules));
        out.push('\n');
        out.push_str(PROMPT);
        out
    }
}

/// RFC 1123 style UTC timestamp, e.g. `Thu, 01 Jan 1970 00:00:00 UTC`.
pub fn format_block_time(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .unwrap_or_default()
        .format(BLOCK_TIME_FORMAT)
        .to_string()
}

/// `name:version` pairs sorted by name and joined by spaces.
pub fn format_modules(modules: &BTreeMap<String, String>) -> String {
    modules
        .iter()
        .map(|(name, version)| format!("{name}:{version}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Client name from a version string like `skaina/v1.2.3/linux-x86_64/rust1.80`.
pub fn client_name(version: &str) -> &str {
    version.split('/').next().unwrap_or(version)
}

/// Parse a JSON-RPC quantity (`0x1a`) or a plain decimal string.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Encode a JSON-RPC quantity.
pub fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_like_rfc1123() {
        assert_eq!(format_block_time(0), "Thu, 01 Jan 1970 00:00:00 UTC");
    }

    #[test]
    fn quantities_round_trip() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(parse_quantity("0x1a"), Some(26));
        assert_eq!(parse_quantity("12"), Some(12));
        assert_eq!(parse_quantity("0xzz"), None);
    }

    #[test]
    fn client_name_is_first_segment() {
        assert_eq!(client_name("skaina/v0.1.0/linux-x86_64/rust1.80"), "skaina");
        assert_eq!(client_name("plain"), "plain");
    }
}
