//! attachbox CLI: run console attach scenarios and inspect compiled scripts.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use attachbox::artifacts::ArtifactsWriterConfig;
use attachbox::scenario::{builtin_bindings, load_scenario_file, run_scenario, ProgressCallback, RunOptions};
use attachbox::template::{Bindings, Template};
use attachbox::{Endpoint, ErrorCode, HarnessError, RunResult, RunStatus};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod progress;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "attachbox",
    version,
    about = "Scripted checks for node console banners and attach behaviour"
)]
struct Cli {
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true, help = "Color output")]
    color: ColorMode,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a scenario file (JSON or YAML)
    Run {
        #[arg(long, help = "Print the run result as JSON on stdout")]
        json: bool,
        #[arg(long, help = "Path to the scenario file")]
        scenario: PathBuf,
        #[arg(long, short = 'v', help = "Show per-node progress and debug logs on stderr")]
        verbose: bool,
        #[arg(long, help = "Write artifacts to this directory")]
        artifacts: Option<PathBuf>,
        #[arg(long, help = "Overwrite existing artifacts directory")]
        overwrite: bool,
        #[arg(long = "bind", value_name = "NAME=VALUE", help = "Extra value binding (repeatable)")]
        binds: Vec<String>,
        #[arg(long = "flag", value_name = "NAME=true|false", help = "Extra condition binding (repeatable)")]
        flags: Vec<String>,
    },
    /// Compile a script and print the text it expects
    Compile {
        #[arg(long, help = "Path to the raw script")]
        script: PathBuf,
        #[arg(long, default_value = "console", help = "Endpoint used for the builtin bindings")]
        attach: String,
        #[arg(long = "bind", value_name = "NAME=VALUE", help = "Value binding (repeatable)")]
        binds: Vec<String>,
        #[arg(long = "flag", value_name = "NAME=true|false", help = "Condition binding (repeatable)")]
        flags: Vec<String>,
        #[arg(long, help = "Expected text for a session that does not echo input")]
        silent: bool,
        #[arg(long, help = "Print the compiled nodes as JSON")]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
///
/// `RUST_LOG` wins over the defaults.
fn init_tracing(verbose: bool, ansi: bool) {
    let default = if verbose { "attachbox=debug,warn" } else { "attachbox=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(ansi)
                .with_target(false)
                .compact(),
        )
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let color = configure_colors(cli.color);
    match cli.command {
        Commands::Run {
            json,
            scenario,
            verbose,
            artifacts,
            overwrite,
            binds,
            flags,
        } => {
            init_tracing(verbose, color);
            cmd_run(json, scenario, verbose, artifacts, overwrite, &binds, &flags)
        }
        Commands::Compile {
            script,
            attach,
            binds,
            flags,
            silent,
            json,
        } => {
            init_tracing(false, color);
            cmd_compile(&script, &attach, &binds, &flags, silent, json)
        }
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the run command.
#[allow(clippy::fn_params_excessive_bools)]
fn cmd_run(
    json: bool,
    scenario_path: PathBuf,
    verbose: bool,
    artifacts: Option<PathBuf>,
    overwrite: bool,
    binds: &[String],
    flags: &[String],
) -> Result<()> {
    let scenario = match load_scenario_file(&scenario_path) {
        Ok(scenario) => scenario,
        Err(err) => return emit_result(json, Err(err)),
    };
    let bindings = match caller_bindings(binds, flags) {
        Ok(bindings) => bindings,
        Err(err) => return emit_result(json, Err(err)),
    };
    let progress_callback = if verbose {
        Some(Arc::new(progress::VerboseProgress::new()) as Arc<dyn ProgressCallback>)
    } else {
        None
    };
    let options = RunOptions {
        artifacts: artifacts.map(|dir| ArtifactsWriterConfig { dir, overwrite }),
        progress: progress_callback,
    };
    emit_result(json, run_scenario(&scenario, bindings, options))
}

/// Handle the compile command.
fn cmd_compile(
    script_path: &Path,
    attach: &str,
    binds: &[String],
    flags: &[String],
    silent: bool,
    json: bool,
) -> Result<()> {
    let compiled = std::fs::read_to_string(script_path)
        .map_err(|err| {
            HarnessError::io("failed to read script", err)
                .with_context("path", script_path.display().to_string())
        })
        .and_then(|raw| {
            let endpoint = Endpoint::parse(attach)?;
            let bindings = builtin_bindings(&endpoint, None).extend(caller_bindings(binds, flags)?);
            Template::parse(&raw)?.compile(&bindings)
        });
    match compiled {
        Ok(script) => {
            if json {
                let payload = serde_json::to_string_pretty(&script).into_diagnostic()?;
                println!("{payload}");
            } else {
                print!("{}", script.expected_text(!silent));
            }
            Ok(())
        }
        Err(err) => emit_error(json, &err),
    }
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

/// `--bind name=value` and `--flag name=bool` pairs.
fn caller_bindings(binds: &[String], flags: &[String]) -> Result<Bindings, HarnessError> {
    let mut bindings = Bindings::new();
    for raw in binds {
        let (name, value) = split_pair("--bind", raw)?;
        bindings = bindings.constant(name, value);
    }
    for raw in flags {
        let (name, value) = split_pair("--flag", raw)?;
        let enabled = value.parse::<bool>().map_err(|_| {
            HarnessError::config(
                format!("{raw}: flag value must be true or false"),
                serde_json::json!({ "flag": raw }),
            )
        })?;
        bindings = bindings.flag(name, enabled);
    }
    Ok(bindings)
}

fn split_pair<'a>(option: &str, raw: &'a str) -> Result<(&'a str, &'a str), HarnessError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(HarnessError::config(
            format!("{option} expects NAME=VALUE, got '{raw}'"),
            None,
        )),
    }
}

fn emit_result(json: bool, result: Result<RunResult, HarnessError>) -> Result<()> {
    match result {
        Ok(run_result) => {
            if json {
                let payload = serde_json::to_string(&run_result).into_diagnostic()?;
                println!("{payload}");
            } else {
                report_run(&run_result);
            }
            match run_result.status {
                RunStatus::Passed => Ok(()),
                RunStatus::Failed => {
                    let code = run_result
                        .error
                        .as_ref()
                        .map_or(ErrorCode::Internal, |err| err.code);
                    std::process::exit(code.exit_code());
                }
            }
        }
        Err(err) => emit_error(json, &err),
    }
}

fn report_run(run_result: &RunResult) {
    let status = match run_result.status {
        RunStatus::Passed => "passed",
        RunStatus::Failed => "failed",
    };
    eprintln!(
        "run {status}: {} over {} in {}ms",
        run_result.scenario, run_result.endpoint, run_result.duration_ms
    );
    if let Some(err) = &run_result.error {
        eprintln!("error: {}: {}", err.code, err.message);
        if let Some(context) = &err.context {
            eprintln!("{}", serde_json::to_string_pretty(context).unwrap_or_default());
        }
    }
}

fn emit_error(json: bool, err: &HarnessError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("{:?}", miette::Report::new(HarnessError::from(err.to_error_info())));
        if let Some(context) = &err.context {
            eprintln!("{}", serde_json::to_string_pretty(context).unwrap_or_default());
        }
    }
    std::process::exit(exit_code_for_error(err));
}

fn exit_code_for_error(err: &HarnessError) -> i32 {
    err.exit_code()
}

#[cfg(test)]
mod tests {
    use super::{caller_bindings, exit_code_for_error};
    use attachbox::{ErrorCode, HarnessError};

    #[test]
    fn exit_code_maps_connect_timeout() {
        let err = HarnessError::connect_timeout("never reachable", None);
        assert_eq!(exit_code_for_error(&err), 3);
    }

    #[test]
    fn exit_code_maps_mismatch() {
        let err = HarnessError::new(ErrorCode::ExpectationMismatch, "diverged", None);
        assert_eq!(exit_code_for_error(&err), 7);
    }

    #[test]
    fn bind_and_flag_pairs_are_parsed() {
        let bindings = caller_bindings(&["who=node=1".to_string()], &["ipc=true".to_string()]);
        let bindings = bindings.unwrap_or_default();
        assert!(bindings.contains("who"));
        assert!(bindings.contains("ipc"));
        assert!(caller_bindings(&[], &["ipc=maybe".to_string()]).is_err());
        assert!(caller_bindings(&["=x".to_string()], &[]).is_err());
    }
}
