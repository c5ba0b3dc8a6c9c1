//! JSON-RPC 2.0 wire types and the three client connections.

use crate::error::{HarnessError, HarnessResult};
use crate::model::{Endpoint, TransportKind};
use futures::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::{prelude::*, Stream as IpcStream};
use interprocess::local_socket::GenericFilePath;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Most responses kept while waiting for a specific id on a WebSocket.
const WS_BACKLOG_LIMIT: usize = 64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: json!(id),
            method: method.into(),
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Value::Null,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
        }
    }

    /// `Ok(result)` or the remote error object.
    pub fn into_outcome(self) -> Result<Value, RpcErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// Result of one call: transport problems are `Err` on the outer layer,
/// remote method errors on the inner one.
pub type CallOutcome = Result<Value, RpcErrorObject>;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// An open client connection of one of the remote kinds.
pub(crate) enum RpcConnection {
    Ipc {
        stream: BufReader<IpcStream>,
        next_id: u64,
    },
    Http {
        client: reqwest::Client,
        url: String,
        next_id: u64,
    },
    Ws {
        socket: Box<WsStream>,
        backlog: VecDeque<RpcResponse>,
        next_id: u64,
    },
}

impl RpcConnection {
    /// One connection attempt; callers retry.
    pub(crate) async fn connect(endpoint: &Endpoint, call_timeout: Duration) -> HarnessResult<Self> {
        match endpoint.kind() {
            TransportKind::DomainSocket => {
                let name = endpoint
                    .address()
                    .to_fs_name::<GenericFilePath>()
                    .map_err(|err| {
                        HarnessError::config(
                            "invalid ipc path",
                            json!({ "source": err.to_string(), "endpoint": endpoint.to_string() }),
                        )
                    })?;
                let stream = IpcStream::connect(name)
                    .await
                    .map_err(|err| HarnessError::io("ipc connect failed", err))?;
                Ok(Self::Ipc {
                    stream: BufReader::new(stream),
                    next_id: 1,
                })
            }
            TransportKind::Http => {
                let client = reqwest::Client::builder()
                    .timeout(call_timeout)
                    .build()
                    .map_err(|err| HarnessError::io("failed to build http client", err))?;
                let mut connection = Self::Http {
                    client,
                    url: endpoint.address().to_string(),
                    next_id: 1,
                };
                // HTTP is connectionless; a successful round trip is the readiness signal.
                let _ = connection.call("web3_clientVersion", json!([])).await?;
                Ok(connection)
            }
            TransportKind::WebSocket => {
                let (socket, _) = tokio_tungstenite::connect_async(endpoint.address())
                    .await
                    .map_err(|err| HarnessError::io("websocket connect failed", err))?;
                Ok(Self::Ws {
                    socket: Box::new(socket),
                    backlog: VecDeque::new(),
                    next_id: 1,
                })
            }
            TransportKind::LocalConsole => Err(HarnessError::config(
                "the local console is not a JSON-RPC endpoint",
                None,
            )),
        }
    }

    fn take_id(&mut self) -> u64 {
        let next_id = match self {
            Self::Ipc { next_id, .. } | Self::Http { next_id, .. } | Self::Ws { next_id, .. } => next_id,
        };
        let id = *next_id;
        *next_id += 1;
        id
    }

    /// Issue a request and wait for its response.
    pub(crate) async fn call(&mut self, method: &str, params: Value) -> HarnessResult<CallOutcome> {
        let id = self.take_id();
        let request = RpcRequest::new(id, method, params);
        let body = serde_json::to_string(&request).map_err(|err| {
            HarnessError::protocol("failed to encode request", json!({ "source": err.to_string() }))
        })?;
        tracing::debug!(method, id, "rpc call");
        let response = match self {
            Self::Ipc { stream, .. } => ipc_round_trip(stream, &body, id).await?,
            Self::Http { client, url, .. } => {
                let reply = client
                    .post(url.as_str())
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|err| HarnessError::io("http request failed", err))?;
                let text = reply
                    .text()
                    .await
                    .map_err(|err| HarnessError::io("failed to read http response", err))?;
                decode_response(&text)?
            }
            Self::Ws { socket, backlog, .. } => ws_round_trip(socket, backlog, body, id).await?,
        };
        Ok(response.into_outcome())
    }

    /// Best-effort orderly close.
    pub(crate) async fn close(&mut self) {
        match self {
            Self::Ipc { stream, .. } => {
                let _ = stream.get_mut().shutdown().await;
            }
            Self::Ws { socket, .. } => {
                let _ = WebSocketStream::close(socket.as_mut(), None).await;
            }
            Self::Http { .. } => {}
        }
    }
}

fn decode_response(text: &str) -> HarnessResult<RpcResponse> {
    serde_json::from_str(text.trim()).map_err(|err| {
        HarnessError::protocol(
            "malformed JSON-RPC response",
            json!({ "source": err.to_string(), "body": text }),
        )
    })
}

async fn ipc_round_trip(stream: &mut BufReader<IpcStream>, body: &str, id: u64) -> HarnessResult<RpcResponse> {
    let mut line = String::with_capacity(body.len() + 1);
    line.push_str(body);
    line.push('\n');
    let writer = stream.get_mut();
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|err| HarnessError::io("ipc write failed", err))?;
    writer
        .flush()
        .await
        .map_err(|err| HarnessError::io("ipc flush failed", err))?;

    let mut reply = String::new();
    loop {
        reply.clear();
        let read = stream
            .read_line(&mut reply)
            .await
            .map_err(|err| HarnessError::io("ipc read failed", err))?;
        if read == 0 {
            return Err(HarnessError::protocol("ipc connection closed by peer", json!({ "id": id })));
        }
        if reply.trim().is_empty() {
            continue;
        }
        let response = decode_response(&reply)?;
        if response.id == json!(id) {
            return Ok(response);
        }
        tracing::debug!(expected = id, got = %response.id, "skipping unrelated ipc message");
    }
}

async fn ws_round_trip(
    socket: &mut WsStream,
    backlog: &mut VecDeque<RpcResponse>,
    body: String,
    id: u64,
) -> HarnessResult<RpcResponse> {
    let wanted = json!(id);
    if let Some(position) = backlog.iter().position(|response| response.id == wanted) {
        if let Some(response) = backlog.remove(position) {
            return Ok(response);
        }
    }
    socket
        .send(Message::Text(body.into()))
        .await
        .map_err(|err| HarnessError::io("websocket send failed", err))?;
    loop {
        let frame = socket
            .next()
            .await
            .ok_or_else(|| HarnessError::protocol("websocket closed by peer", json!({ "id": id })))?
            .map_err(|err| HarnessError::io("websocket receive failed", err))?;
        let text = match frame {
            Message::Text(text) => text.as_str().to_string(),
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => {
                return Err(HarnessError::protocol("websocket closed by peer", json!({ "id": id })))
            }
            _ => continue,
        };
        let response = decode_response(&text)?;
        if response.id == wanted {
            return Ok(response);
        }
        if backlog.len() >= WS_BACKLOG_LIMIT {
            backlog.pop_front();
        }
        backlog.push_back(response);
    }
}
