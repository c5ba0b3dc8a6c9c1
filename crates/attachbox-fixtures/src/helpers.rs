//! Common test helper functions.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use attachbox::Scenario;

/// Create a unique temporary directory for a test.
///
/// The name carries the process id and a timestamp so parallel test
/// binaries never collide. The directory is created immediately.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
pub fn temp_dir(prefix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("attachbox-{prefix}-{}-{stamp}", std::process::id()));

    #[allow(clippy::expect_used)]
    fs::create_dir_all(&dir).expect("failed to create temp directory");

    dir
}

/// A TCP port that was free a moment ago on the loopback interface.
///
/// # Panics
///
/// Panics if no ephemeral port can be bound.
#[must_use]
pub fn free_port() -> u16 {
    #[allow(clippy::expect_used)]
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind ephemeral port");
    #[allow(clippy::expect_used)]
    let port = listener.local_addr().expect("listener has no address").port();
    port
}

/// Write a scenario to a JSON file.
///
/// # Panics
///
/// Panics if serialization or file writing fails.
pub fn write_scenario(path: &Path, scenario: &Scenario) {
    #[allow(clippy::expect_used)]
    let data = serde_json::to_vec_pretty(scenario).expect("failed to serialize scenario");

    #[allow(clippy::expect_used)]
    fs::write(path, data).expect("failed to write scenario file");
}
