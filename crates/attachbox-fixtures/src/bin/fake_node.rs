//! Fixture node: serves the console JSON-RPC surface over IPC, HTTP and
//! WebSocket, and prints its own console with the `console` subcommand.
//!
//! Logs go to stderr without colors. The listener lines
//! (`IPC endpoint opened`, `HTTP endpoint opened`, `WebSocket endpoint opened`)
//! are stable so scenarios can wait for them.

#![allow(missing_docs)]

use std::io::{self, BufRead, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use attachbox::console::PROMPT;
use attachbox_fixtures::node::{self, Api, NodeState, DEFAULT_ETHERBASE, DEFAULT_REMOTE_API};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use interprocess::local_socket::tokio::{prelude::*, Stream as IpcStream};
use interprocess::local_socket::{GenericFilePath, ListenerOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::Level;

const IPC_FILE_NAME: &str = "skaina.ipc";

#[derive(Debug, Parser)]
#[command(name = "attachbox-fake-node", version, about = "Fixture node for attach tests")]
struct Cli {
    #[arg(long, default_value_t = 30303, help = "P2P listening port (never opened)")]
    port: u16,
    #[arg(long, default_value_t = 25, help = "Maximum number of peers")]
    maxpeers: u32,
    #[arg(long, help = "Disable peer discovery")]
    nodiscover: bool,
    #[arg(long, default_value = "any", help = "NAT port mapping mechanism")]
    nat: String,
    #[arg(long, help = "Coinbase account")]
    etherbase: Option<String>,
    #[arg(long, help = "Enable the whisper module")]
    shh: bool,
    #[arg(long, help = "Data directory")]
    datadir: Option<PathBuf>,
    #[arg(long, help = "IPC socket path, relative paths resolve inside the datadir")]
    ipcpath: Option<PathBuf>,
    #[arg(long, help = "Do not open the IPC endpoint")]
    ipcdisable: bool,
    #[arg(long, help = "Open the HTTP endpoint")]
    rpc: bool,
    #[arg(long, default_value = "127.0.0.1", help = "HTTP and WebSocket listening address")]
    rpcaddr: String,
    #[arg(long, default_value_t = 8545, help = "HTTP listening port")]
    rpcport: u16,
    #[arg(long, default_value = DEFAULT_REMOTE_API, help = "Modules served over HTTP")]
    rpcapi: String,
    #[arg(long, help = "Open the WebSocket endpoint")]
    ws: bool,
    #[arg(long, default_value_t = 8546, help = "WebSocket listening port")]
    wsport: u16,
    #[arg(long, default_value = DEFAULT_REMOTE_API, help = "Modules served over WebSocket")]
    wsapi: String,
    #[arg(long, default_value_t = 3, help = "Log level: 0 silent, 1 error, 2 warn, 3 info, 4 debug, 5 trace")]
    verbosity: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the node with its interactive console on stdin/stdout
    Console,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => return,
        1 => Level::ERROR,
        2 => Level::WARN,
        3 => Level::INFO,
        4 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_max_level(level)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> io::Result<()> {
    let mut signals = Signals::install()?;
    let datadir = match &cli.datadir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join(format!("{}-{}", node::NODE_NAME, std::process::id())),
    };
    std::fs::create_dir_all(&datadir)?;
    let state = Arc::new(NodeState::new(
        cli.etherbase.clone().unwrap_or_else(|| DEFAULT_ETHERBASE.to_string()),
        datadir.display().to_string(),
    ));
    tracing::info!(
        version = %node::client_version(),
        datadir = %datadir.display(),
        "Starting node"
    );
    if cli.maxpeers == 0 || cli.nodiscover {
        tracing::info!(port = cli.port, nat = %cli.nat, "Peer discovery disabled");
    }

    let local_modules = node::ipc_modules(cli.shh);
    let ipc_path = (!cli.ipcdisable).then(|| resolve_ipc_path(&datadir, cli.ipcpath.as_deref()));
    if let Some(path) = &ipc_path {
        serve_ipc(path, Api::new(state.clone(), local_modules.clone()))?;
    }
    if cli.rpc {
        let api = Api::new(state.clone(), node::remote_modules(&cli.rpcapi));
        let router = Router::new().route("/", post(http_rpc)).with_state(api);
        let addr = serve_http(&cli.rpcaddr, cli.rpcport, router).await?;
        tracing::info!(url = %format!("http://{addr}"), "HTTP endpoint opened");
    }
    if cli.ws {
        let api = Api::new(state.clone(), node::remote_modules(&cli.wsapi));
        let router = Router::new().route("/", get(ws_upgrade)).with_state(api);
        let addr = serve_http(&cli.rpcaddr, cli.wsport, router).await?;
        tracing::info!(url = %format!("ws://{addr}"), "WebSocket endpoint opened");
    }

    let console_done = match cli.command {
        Some(Commands::Console) => Some(spawn_console(Api::new(state, local_modules))),
        None => None,
    };
    let outcome = wait_for_shutdown(&mut signals, console_done).await;
    if let Some(path) = &ipc_path {
        remove_socket(path);
    }
    tracing::info!("Node stopped");
    outcome
}

fn resolve_ipc_path(datadir: &Path, ipcpath: Option<&Path>) -> PathBuf {
    match ipcpath {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => datadir.join(path),
        None => datadir.join(IPC_FILE_NAME),
    }
}

fn remove_socket(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}

/// Resolves once an interrupt or terminate signal arrives, or the console
/// exits.
async fn wait_for_shutdown(
    signals: &mut Signals,
    console_done: Option<oneshot::Receiver<io::Result<()>>>,
) -> io::Result<()> {
    let console = async {
        match console_done {
            Some(done) => done.await.unwrap_or(Ok(())),
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        signal = signals.recv() => {
            tracing::info!("Got {signal}, shutting down...");
            Ok(())
        }
        result = console => result,
    }
}

/// Handlers are installed at startup so an early interrupt still ends in a
/// clean exit.
#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "interrupt",
            _ = self.terminate.recv() => "terminate",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    #[allow(clippy::unnecessary_wraps)]
    fn install() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "interrupt"
    }
}

// =============================================================================
// IPC
// =============================================================================

fn serve_ipc(path: &Path, api: Api) -> io::Result<()> {
    remove_socket(path);
    let name = path.to_fs_name::<GenericFilePath>()?;
    let listener = ListenerOptions::new().name(name).create_tokio()?;
    tracing::info!(url = %path.display(), "IPC endpoint opened");
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok(stream) => {
                    tokio::spawn(serve_ipc_connection(stream, api.clone()));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "IPC accept failed");
                    break;
                }
            }
        }
    });
    Ok(())
}

/// Newline-delimited JSON-RPC, one response line per request line.
async fn serve_ipc_connection(stream: IpcStream, api: Api) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "IPC read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let mut reply = api.handle_message(&line);
        reply.push('\n');
        if writer.write_all(reply.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
    tracing::debug!("IPC connection closed");
}

// =============================================================================
// HTTP and WebSocket
// =============================================================================

async fn serve_http(host: &str, port: u16, router: Router) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::warn!(error = %err, %addr, "server stopped");
        }
    });
    Ok(addr)
}

#[allow(clippy::unused_async)] // axum handlers are async
async fn http_rpc(State(api): State<Api>, body: String) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        api.handle_message(&body),
    )
}

#[allow(clippy::unused_async)]
async fn ws_upgrade(ws: WebSocketUpgrade, State(api): State<Api>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_ws(socket, api))
}

async fn serve_ws(mut socket: WebSocket, api: Api) {
    while let Some(Ok(message)) = socket.recv().await {
        let reply = match message {
            Message::Text(text) => api.handle_message(text.as_str()),
            Message::Binary(bytes) => api.handle_message(&String::from_utf8_lossy(&bytes)),
            Message::Close(_) => break,
            _ => continue,
        };
        if socket.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }
    tracing::debug!("WebSocket connection closed");
}

// =============================================================================
// Console
// =============================================================================

/// Run the console on a plain thread so a blocked stdin read never holds
/// up runtime shutdown.
fn spawn_console(api: Api) -> oneshot::Receiver<io::Result<()>> {
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = done_tx.send(run_console(&api));
    });
    done_rx
}

/// Banner, then one prompt per line until `exit` or end of input.
///
/// Input is echoed back when stdin is not a terminal, the way a line
/// editor would show it.
fn run_console(api: &Api) -> io::Result<()> {
    let stdin = io::stdin();
    let echo = !stdin.is_terminal();
    let mut out = io::stdout().lock();
    out.write_all(api.banner().render().as_bytes())?;
    out.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        if echo {
            writeln!(out, "{line}")?;
        }
        match api.evaluate(&line) {
            Some(reply) => {
                out.write_all(reply.as_bytes())?;
                out.write_all(PROMPT.as_bytes())?;
                out.flush()?;
            }
            None => {
                out.flush()?;
                return Ok(());
            }
        }
    }
    Ok(())
}
