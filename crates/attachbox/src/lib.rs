//! attachbox: a scripted harness for checking what a node prints when a
//! console attaches to it.
//!
//! A scenario starts the node, attaches over the local console, an IPC
//! socket, HTTP or WebSocket, and drives a templated script against the
//! session: literal text and `{{field}}` values must appear in order,
//! `{{if flag}}...{{end}}` sections depend on the transport, and
//! `{{input "..."}}` lines are sent as typed input. The node is then shut
//! down and its exit checked.

#![forbid(unsafe_code)]
// Library documentation is in progress. Public API types have docs;
// internal types will be documented in future releases.
#![allow(missing_docs)]

pub mod artifacts;
pub mod console;
pub mod driver;
pub mod error;
pub mod model;
pub mod retry;
pub mod scenario;
pub mod supervisor;
pub mod template;
pub mod transport;

pub use crate::error::{ErrorCode, ErrorInfo, HarnessError, HarnessResult};
pub use crate::model::*;

pub mod run {
    use super::scenario::{run_scenario as run_scenario_impl, RunOptions};
    use super::template::Bindings;
    use super::{HarnessResult, RunResult, Scenario};

    pub fn run_scenario_with_options(
        scenario: &Scenario,
        bindings: Bindings,
        options: RunOptions,
    ) -> HarnessResult<RunResult> {
        run_scenario_impl(scenario, bindings, options)
    }

    pub fn run_scenario(scenario: &Scenario) -> HarnessResult<RunResult> {
        run_scenario_impl(scenario, Bindings::new(), RunOptions::default())
    }
}
