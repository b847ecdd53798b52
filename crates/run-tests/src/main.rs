//! run-tests - window manager reparenting tests
//!
//! Starts a fresh X server for every test, creates plain client windows,
//! launches the window manager and checks that it framed them.
//!
//! # Usage
//!
//! ```sh
//! # Every built-in test against metacity on Xvfb
//! run-tests
//!
//! # One test, another manager, JSON output
//! run-tests --test=reparent --wm openbox --format json
//!
//! # Exercise the harness without an X server
//! run-tests --headless
//! ```
//!
//! Exit codes:
//! - 0: Every test passed
//! - N: N tests failed or errored (at most 255)
//! - 1: Also used for usage and configuration errors

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use wmprobe::{suite, ReportFormat, RunReport};

mod cli;
#[cfg(test)]
mod cli_test;

use cli::Cli;

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose { "debug,x11rb=warn" } else { "info,x11rb=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Respect NO_COLOR environment variable for testing
    let use_ansi = std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_ansi(use_ansi),
        )
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> Result<u8> {
    let tests = suite::builtin();

    if cli.list {
        for test in &tests {
            println!("{}", test.name());
        }
        return Ok(0);
    }

    let config = cli.config()?;
    let selected = cli::select_tests(&tests, cli.test.as_deref())?;
    let runner = cli.runner(&config);

    tracing::info!(
        tests = selected.len(),
        headless = cli.headless,
        manager = %config.manager.program,
        timeout = ?runner.timeout(),
        "starting run"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut report = RunReport::default();

    for result in runner.run(&selected) {
        if cli.format == ReportFormat::Text {
            writeln!(out, "{}", result).context("failed to write result")?;
            out.flush().context("failed to flush output")?;
        }
        report.push(result);
    }

    let written = match cli.format {
        ReportFormat::Text => writeln!(out, "{}", report.summary()),
        ReportFormat::Json => report.write(ReportFormat::Json, &mut out),
    };
    written.context("failed to write report")?;

    Ok(report.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("run-tests: {:#}", e);
            ExitCode::from(1)
        }
    }
}
