// Test module - relaxed lint rules
#![cfg(unix)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use attachbox::driver::{run_script, DriverConfig};
use attachbox::template::{self, Bindings};
use attachbox::transport::rpc::{RpcRequest, RpcResponse};
use attachbox::transport::{open, AttachOptions, RemoteSession, Session};
use attachbox::{EchoMode, Endpoint, ErrorCode};
use serde_json::{json, Value};

fn quick_attach() -> AttachOptions {
    AttachOptions {
        connect_timeout: Duration::from_millis(300),
        ..AttachOptions::default()
    }
}

fn answer(request: &RpcRequest) -> RpcResponse {
    let result = match request.method.as_str() {
        "rpc_modules" => json!({ "admin": "1.0", "eth": "1.0", "web3": "1.0" }),
        "web3_clientVersion" => json!("skaina/v0.1.0/linux-x86_64/rust1.80"),
        "eth_coinbase" => json!("0x8605cdbbdb6d264aa742e77020dcbc58fcdce182"),
        "eth_blockNumber" => json!("0x0"),
        "eth_getBlockByNumber" => json!({ "number": "0x0", "timestamp": "0x0" }),
        "admin_datadir" => json!("/tmp/node"),
        "eth_accounts" => json!(["0x8605cdbbdb6d264aa742e77020dcbc58fcdce182"]),
        _ => return RpcResponse::failure(request.id.clone(), -32601, "the method does not exist"),
    };
    RpcResponse::success(request.id.clone(), result)
}

/// Newline-delimited JSON-RPC server on a unix socket, one connection.
fn serve_ipc(path: &Path) -> thread::JoinHandle<()> {
    let listener = UnixListener::bind(path).unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            let request: RpcRequest = serde_json::from_str(&line).unwrap();
            let mut data = serde_json::to_vec(&answer(&request)).unwrap();
            data.push(b'\n');
            if writer.write_all(&data).is_err() {
                break;
            }
        }
    })
}

#[test]
fn missing_socket_times_out_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Endpoint::ipc(dir.path().join("absent.ipc").to_string_lossy());
    let started = Instant::now();
    let err = RemoteSession::connect(&endpoint, &quick_attach()).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectTimeout);
    assert!(err.context.unwrap()["attempts"].as_u64().unwrap() >= 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn closed_port_times_out_connecting() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = RemoteSession::connect(&Endpoint::http("127.0.0.1", port), &quick_attach()).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectTimeout);
    let err = RemoteSession::connect(&Endpoint::websocket("127.0.0.1", port), &quick_attach()).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectTimeout);
}

#[test]
fn local_console_needs_an_instance() {
    let err = open(&Endpoint::local_console(), None, &quick_attach()).err().unwrap();
    assert_eq!(err.code, ErrorCode::Config);
}

#[test]
fn ipc_session_renders_banner_and_evaluates_commands() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.ipc");
    let server = serve_ipc(&path);
    let endpoint = Endpoint::parse(&format!("ipc:{}", path.display())).unwrap();
    let mut session = open(&endpoint, None, &quick_attach()).unwrap();

    let script = template::compile(
        r#"
Welcome to the skaina JavaScript console!

instance: skaina/v0.1.0/linux-x86_64/rust1.80
coinbase: 0x8605cdbbdb6d264aa742e77020dcbc58fcdce182
at block: 0 ({{niltime}})
 datadir: /tmp/node
 modules: admin:1.0 eth:1.0 web3:1.0

> {{input "eth.blockNumber"}}
"0x0"
> {{input "miner.start()"}}
Error: the method does not exist
> {{input "exit"}}
"#,
        &Bindings::new().with_host_defaults(),
    )
    .unwrap();
    let report = run_script(session.as_mut(), &script, DriverConfig::default()).unwrap();
    assert_eq!(report.trailing_bytes, 0);
    assert!(session.is_closed());
    let err = session.write_line("eth.coinbase").unwrap_err();
    assert_eq!(err.code, ErrorCode::StreamClosed);
    drop(session);
    server.join().unwrap();
}

#[test]
fn silent_session_does_not_echo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.ipc");
    let _server = serve_ipc(&path);
    let options = AttachOptions {
        echo: EchoMode::Silent,
        ..quick_attach()
    };
    let mut session = RemoteSession::connect(&Endpoint::ipc(path.to_string_lossy()), &options).unwrap();
    assert!(!session.echoes_input());
    let banner = String::from_utf8(session.read_available().unwrap()).unwrap();
    assert!(banner.ends_with("\n\n> "));

    session.write_line("eth.accounts").unwrap();
    let output = String::from_utf8(session.read_available().unwrap()).unwrap();
    assert!(output.starts_with("[\n"));
    assert!(output.ends_with("]\n> "));

    let outcome = session.call("eth_coinbase", Value::Array(Vec::new())).unwrap();
    assert_eq!(outcome.unwrap(), json!("0x8605cdbbdb6d264aa742e77020dcbc58fcdce182"));
}
