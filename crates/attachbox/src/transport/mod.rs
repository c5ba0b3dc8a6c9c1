//! Sessions: uniform console access to a node over any transport.
//!
//! [`open`] returns a [`Session`] for an [`Endpoint`]. The local console
//! wraps the supervised process directly; IPC, HTTP and WebSocket endpoints
//! are reached through [`RemoteSession`], which renders the console itself
//! from JSON-RPC calls.

mod local;
mod remote;
pub mod rpc;

pub use local::LocalSession;
pub use remote::RemoteSession;

use crate::error::{HarnessError, HarnessResult};
use crate::model::{EchoMode, Endpoint, TransportKind};
use crate::retry::Deadline;
use crate::supervisor::Instance;
use std::time::Duration;

/// An open console connection.
pub trait Session {
    fn endpoint(&self) -> &Endpoint;

    /// Send one line of input.
    fn write_line(&mut self, line: &str) -> HarnessResult<()>;

    /// Output produced since the previous call; empty when nothing is new.
    /// Never blocks.
    fn read_available(&mut self) -> HarnessResult<Vec<u8>>;

    /// No further output will arrive once what is buffered has been read.
    fn is_closed(&self) -> bool;

    /// Whether written lines show up in the output stream.
    fn echoes_input(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.endpoint().to_string()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AttachOptions {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub echo: EchoMode,
    /// Outer deadline that also bounds connecting.
    pub deadline: Option<Deadline>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(5),
            echo: EchoMode::Echo,
            deadline: None,
        }
    }
}

impl AttachOptions {
    pub(crate) fn connect_deadline(&self) -> Deadline {
        match self.deadline {
            Some(deadline) => deadline.min_with(self.connect_timeout),
            None => Deadline::after(self.connect_timeout),
        }
    }
}

/// Open a session for `endpoint`.
///
/// The local console needs the `instance` it belongs to; remote kinds ignore it.
///
/// # Errors
/// - `E_CONFIG`: local console without an instance
/// - `E_CONNECT_TIMEOUT`: a remote endpoint never became reachable
pub fn open<'a>(
    endpoint: &Endpoint,
    instance: Option<&'a Instance>,
    options: &AttachOptions,
) -> HarnessResult<Box<dyn Session + 'a>> {
    match endpoint.kind() {
        TransportKind::LocalConsole => {
            let instance = instance.ok_or_else(|| {
                HarnessError::config("the local console requires a running instance", None)
            })?;
            tracing::info!(pid = instance.pid(), "session opened on local console");
            Ok(Box::new(LocalSession::new(instance)))
        }
        TransportKind::DomainSocket | TransportKind::Http | TransportKind::WebSocket => {
            Ok(Box::new(RemoteSession::connect(endpoint, options)?))
        }
    }
}
