use super::rpc::{CallOutcome, RpcConnection};
use super::{AttachOptions, Session};
use crate::console::{self, Banner, Command, PROMPT};
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{EchoMode, Endpoint, TransportKind};
use crate::retry::{Backoff, Deadline};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::runtime::Runtime;

const CONNECT_BACKOFF_START: Duration = Duration::from_millis(10);
const CONNECT_BACKOFF_MAX: Duration = Duration::from_millis(250);

/// Console attached to a node over IPC, HTTP or WebSocket.
///
/// Behaves like an attach console: the banner is rendered from RPC calls on
/// open, each written line is evaluated as a console command and its result
/// is queued as output followed by a fresh prompt.
pub struct RemoteSession {
    endpoint: Endpoint,
    runtime: Runtime,
    connection: RpcConnection,
    pending: Vec<u8>,
    echo: EchoMode,
    call_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("endpoint", &self.endpoint)
            .field("echo", &self.echo)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RemoteSession {
    /// Dial `endpoint`, retrying until the connect budget runs out, then
    /// render the welcome banner.
    ///
    /// # Errors
    /// - `E_CONNECT_TIMEOUT`: the endpoint never accepted a connection
    /// - `E_PROTOCOL` / `E_TIMEOUT`: a banner call failed or took too long
    pub fn connect(endpoint: &Endpoint, options: &AttachOptions) -> HarnessResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| HarnessError::io("failed to start session runtime", err))?;
        let deadline = options.connect_deadline();
        let mut connection =
            runtime.block_on(connect_with_retry(endpoint, options.call_timeout, deadline))?;
        let banner = runtime.block_on(fetch_banner(&mut connection, endpoint.kind(), options.call_timeout))?;
        tracing::info!(endpoint = %endpoint, "session opened");
        Ok(Self {
            endpoint: endpoint.clone(),
            runtime,
            connection,
            pending: banner.render().into_bytes(),
            echo: options.echo,
            call_timeout: options.call_timeout,
            closed: false,
        })
    }

    /// Issue a raw JSON-RPC call outside the console flow.
    pub fn call(&mut self, method: &str, params: Value) -> HarnessResult<CallOutcome> {
        let timeout = self.call_timeout;
        self.runtime
            .block_on(bounded_call(&mut self.connection, method, params, timeout))
    }

    fn evaluate(&mut self, line: &str) -> HarnessResult<()> {
        match Command::parse(line) {
            Ok(Command::Exit) => {
                self.runtime.block_on(self.connection.close());
                self.closed = true;
                tracing::debug!(endpoint = %self.endpoint, "session closed by exit");
                return Ok(());
            }
            Ok(Command::Empty) => {}
            Ok(Command::Call { method, params }) => {
                let rendered = match self.call(&method, Value::Array(params)) {
                    Ok(Ok(value)) => console::render_value(&value),
                    Ok(Err(error)) => console::render_error(&error.message),
                    Err(err) if err.code == ErrorCode::Timeout => console::render_error(&err.message),
                    Err(err) => {
                        self.closed = true;
                        return Err(err);
                    }
                };
                self.push_line(&rendered);
            }
            Err(err) => self.push_line(&console::render_error(&err.message)),
        }
        self.pending.extend_from_slice(PROMPT.as_bytes());
        Ok(())
    }

    fn push_line(&mut self, text: &str) {
        self.pending.extend_from_slice(text.as_bytes());
        self.pending.push(b'\n');
    }
}

impl Session for RemoteSession {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn write_line(&mut self, line: &str) -> HarnessResult<()> {
        if self.closed {
            return Err(HarnessError::new(
                ErrorCode::StreamClosed,
                "session is closed",
                json!({ "endpoint": self.endpoint.to_string(), "line": line }),
            ));
        }
        if self.echo == EchoMode::Echo {
            self.push_line(line);
        }
        self.evaluate(line)
    }

    fn read_available(&mut self) -> HarnessResult<Vec<u8>> {
        Ok(std::mem::take(&mut self.pending))
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn echoes_input(&self) -> bool {
        self.echo == EchoMode::Echo
    }
}

async fn connect_with_retry(
    endpoint: &Endpoint,
    call_timeout: Duration,
    deadline: Deadline,
) -> HarnessResult<RpcConnection> {
    let mut backoff = Backoff::new(CONNECT_BACKOFF_START, CONNECT_BACKOFF_MAX);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let attempt_budget = deadline.remaining().max(Duration::from_millis(1));
        let last_error = match tokio::time::timeout(attempt_budget, RpcConnection::connect(endpoint, call_timeout)).await {
            Ok(Ok(connection)) => {
                tracing::debug!(endpoint = %endpoint, attempts, "connected");
                return Ok(connection);
            }
            Ok(Err(err)) if err.code == ErrorCode::Config => return Err(err),
            Ok(Err(err)) => err.to_string(),
            Err(_) => "connect attempt timed out".to_string(),
        };
        tracing::debug!(endpoint = %endpoint, attempts, error = %last_error, "connect attempt failed");
        if !backoff.wait_async(&deadline).await {
            tracing::warn!(endpoint = %endpoint, attempts, "endpoint never became reachable");
            return Err(HarnessError::connect_timeout(
                format!("could not connect to {endpoint}"),
                json!({
                    "endpoint": endpoint.to_string(),
                    "attempts": attempts,
                    "last_error": last_error,
                }),
            ));
        }
    }
}

async fn bounded_call(
    connection: &mut RpcConnection,
    method: &str,
    params: Value,
    timeout: Duration,
) -> HarnessResult<CallOutcome> {
    tokio::time::timeout(timeout, connection.call(method, params))
        .await
        .map_err(|_| {
            HarnessError::timeout(
                format!("call {method} timed out"),
                json!({ "method": method, "timeout_ms": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }),
            )
        })?
}

async fn call_ok(
    connection: &mut RpcConnection,
    method: &str,
    params: Value,
    timeout: Duration,
) -> HarnessResult<Value> {
    bounded_call(connection, method, params, timeout)
        .await?
        .map_err(|error| {
            HarnessError::protocol(
                format!("{method} failed: {}", error.message),
                json!({ "method": method, "rpc_code": error.code }),
            )
        })
}

fn expect_str(method: &str, value: &Value) -> HarnessResult<String> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        HarnessError::protocol(
            format!("{method} returned a non-string result"),
            json!({ "method": method, "result": value }),
        )
    })
}

fn expect_quantity(method: &str, value: &Value) -> HarnessResult<u64> {
    value
        .as_str()
        .and_then(console::parse_quantity)
        .or_else(|| value.as_u64())
        .ok_or_else(|| {
            HarnessError::protocol(
                format!("{method} returned an invalid quantity"),
                json!({ "method": method, "result": value }),
            )
        })
}

async fn fetch_banner(
    connection: &mut RpcConnection,
    kind: TransportKind,
    timeout: Duration,
) -> HarnessResult<Banner> {
    let modules_value = call_ok(connection, "rpc_modules", json!([]), timeout).await?;
    let modules: BTreeMap<String, String> = serde_json::from_value(modules_value.clone()).map_err(|_| {
        HarnessError::protocol(
            "rpc_modules returned an invalid module map",
            json!({ "result": modules_value }),
        )
    })?;
    let instance = expect_str(
        "web3_clientVersion",
        &call_ok(connection, "web3_clientVersion", json!([]), timeout).await?,
    )?;
    let coinbase = expect_str(
        "eth_coinbase",
        &call_ok(connection, "eth_coinbase", json!([]), timeout).await?,
    )?;
    let block = expect_quantity(
        "eth_blockNumber",
        &call_ok(connection, "eth_blockNumber", json!([]), timeout).await?,
    )?;
    let header = call_ok(
        connection,
        "eth_getBlockByNumber",
        json!([console::quantity(block), false]),
        timeout,
    )
    .await?;
    let timestamp = expect_quantity(
        "eth_getBlockByNumber",
        header.get("timestamp").unwrap_or(&Value::Null),
    )?;
    let datadir = if kind.shows_datadir() && modules.contains_key("admin") {
        Some(expect_str(
            "admin_datadir",
            &call_ok(connection, "admin_datadir", json!([]), timeout).await?,
        )?)
    } else {
        None
    };
    Ok(Banner {
        name: console::client_name(&instance).to_string(),
        instance,
        coinbase,
        block,
        block_time: i64::try_from(timestamp).unwrap_or(i64::MAX),
        datadir,
        modules,
    })
}
