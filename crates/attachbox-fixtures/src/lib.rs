//! Fixture node and helpers for attachbox integration tests.
//!
//! The `attachbox-fake-node` binary behaves like a small node: it opens IPC,
//! HTTP and WebSocket JSON-RPC endpoints, prints its welcome banner in
//! console mode and exits cleanly on interrupt. [`node`] holds the RPC
//! surface it serves so tests can predict every banner field.

pub mod helpers;
pub mod node;
