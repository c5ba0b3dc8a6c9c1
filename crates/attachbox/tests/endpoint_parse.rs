// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use attachbox::{Endpoint, ErrorCode, TransportKind};

#[test]
fn console_keyword_selects_local_console() {
    let endpoint = Endpoint::parse("console").unwrap();
    assert_eq!(endpoint.kind(), TransportKind::LocalConsole);
    assert!(!endpoint.kind().is_remote());
}

#[test]
fn ipc_forms() {
    let prefixed = Endpoint::parse("ipc:/tmp/node/skaina.ipc").unwrap();
    assert_eq!(prefixed.kind(), TransportKind::DomainSocket);
    assert_eq!(prefixed.address(), "/tmp/node/skaina.ipc");
    assert_eq!(prefixed.to_string(), "ipc:/tmp/node/skaina.ipc");

    let bare = Endpoint::parse("/tmp/node/skaina.ipc").unwrap();
    assert_eq!(bare, prefixed);

    let pipe = Endpoint::parse(r"\\.\pipe\skaina").unwrap();
    assert_eq!(pipe.kind(), TransportKind::DomainSocket);
}

#[test]
fn network_forms() {
    let http = Endpoint::parse("http://localhost:8545").unwrap();
    assert_eq!(http, Endpoint::http("localhost", 8545));
    assert_eq!(http.kind().as_str(), "http");

    let ws: Endpoint = "ws://127.0.0.1:8546".parse().unwrap();
    assert_eq!(ws.kind(), TransportKind::WebSocket);
    assert!(!ws.kind().shows_datadir());
}

#[test]
fn rejects_garbage() {
    for raw in ["", "   ", "ipc:", "ftp://host", "http://", "http:///path", "localhost:8545"] {
        let err = Endpoint::parse(raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::Config, "endpoint {raw:?}");
    }
}

#[test]
fn serializes_as_a_string() {
    let endpoint = Endpoint::parse("ipc:/tmp/a.ipc").unwrap();
    let json = serde_json::to_string(&endpoint).unwrap();
    assert_eq!(json, "\"ipc:/tmp/a.ipc\"");
    let back: Endpoint = serde_json::from_str(&json).unwrap();
    assert_eq!(back, endpoint);
}
