use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prefix that marks an IPC address in endpoint strings.
pub const IPC_PREFIX: &str = "ipc:";
/// Windows named pipe namespace.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";
/// Endpoint string selecting the supervised process's own console.
pub const CONSOLE_ENDPOINT: &str = "console";

/// The four ways a session can reach a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// The node's own stdin/stdout.
    LocalConsole,
    /// Unix domain socket or Windows named pipe.
    DomainSocket,
    /// HTTP JSON-RPC.
    Http,
    /// WebSocket JSON-RPC.
    WebSocket,
}

impl TransportKind {
    /// Short name used in bindings and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalConsole => "console",
            Self::DomainSocket => "ipc",
            Self::Http => "http",
            Self::WebSocket => "ws",
        }
    }

    /// Whether the console shows the data directory over this transport.
    ///
    /// The `admin` module is only reachable in-process or over IPC, so remote
    /// HTTP/WS attach never prints the datadir line.
    pub fn shows_datadir(self) -> bool {
        matches!(self, Self::LocalConsole | Self::DomainSocket)
    }

    /// Whether the transport goes through a network or socket hop.
    pub fn is_remote(self) -> bool {
        !matches!(self, Self::LocalConsole)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport kind plus address. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    kind: TransportKind,
    address: String,
}

impl Endpoint {
    /// The supervised process's own console.
    pub fn local_console() -> Self {
        Self {
            kind: TransportKind::LocalConsole,
            address: CONSOLE_ENDPOINT.to_string(),
        }
    }

    /// A domain socket path or named pipe address.
    pub fn ipc(address: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::DomainSocket,
            address: address.into(),
        }
    }

    /// `http://host:port`.
    pub fn http(host: &str, port: u16) -> Self {
        Self {
            kind: TransportKind::Http,
            address: format!("http://{host}:{port}"),
        }
    }

    /// `ws://host:port`.
    pub fn websocket(host: &str, port: u16) -> Self {
        Self {
            kind: TransportKind::WebSocket,
            address: format!("ws://{host}:{port}"),
        }
    }

    /// Parse an endpoint string.
    ///
    /// Accepted forms: `console`, `ipc:<path>`, an absolute socket path,
    /// `\\.\pipe\<name>`, `http(s)://…` and `ws(s)://…`.
    pub fn parse(raw: &str) -> HarnessResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(HarnessError::config("endpoint is empty", None));
        }
        if trimmed == CONSOLE_ENDPOINT {
            return Ok(Self::local_console());
        }
        if let Some(path) = trimmed.strip_prefix(IPC_PREFIX) {
            if path.is_empty() {
                return Err(HarnessError::config(
                    "ipc endpoint has no path",
                    serde_json::json!({ "endpoint": raw }),
                ));
            }
            return Ok(Self::ipc(path));
        }
        if trimmed.starts_with(PIPE_PREFIX) || trimmed.starts_with('/') {
            return Ok(Self::ipc(trimmed));
        }
        let lower = trimmed.to_ascii_lowercase();
        let kind = if lower.starts_with("http://") || lower.starts_with("https://") {
            TransportKind::Http
        } else if lower.starts_with("ws://") || lower.starts_with("wss://") {
            TransportKind::WebSocket
        } else {
            return Err(HarnessError::config(
                format!("unrecognized endpoint '{trimmed}'"),
                serde_json::json!({
                    "endpoint": raw,
                    "accepted": ["console", "ipc:<path>", "/abs/path.ipc", r"\\.\pipe\<name>", "http://host:port", "ws://host:port"],
                }),
            ));
        };
        let rest = trimmed.split_once("://").map_or("", |(_, rest)| rest);
        if rest.is_empty() || rest.starts_with('/') {
            return Err(HarnessError::config(
                format!("endpoint '{trimmed}' has no host"),
                None,
            ));
        }
        Ok(Self {
            kind,
            address: trimmed.to_string(),
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportKind::DomainSocket => write!(f, "{IPC_PREFIX}{}", self.address),
            _ => f.write_str(&self.address),
        }
    }
}

impl FromStr for Endpoint {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
