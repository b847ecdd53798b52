//! Command line interface

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use wmprobe::backend::{HeadlessOptions, SimulatedManager};
use wmprobe::{Config, ManagerSpec, ReportFormat, Runner, SessionSource, TestCase};

/// Run window manager reparenting tests against an isolated display.
///
/// Exits with the number of tests that did not pass (0 when all pass).
#[derive(Parser, Debug)]
#[command(name = "run-tests", version, about, long_about = None)]
pub struct Cli {
    /// Run only the named test
    #[arg(long, value_name = "NAME")]
    pub test: Option<String>,

    /// Per-test timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Configuration file (default: $XDG_CONFIG_HOME/wmprobe/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Report format: text or json
    #[arg(long, default_value = "text")]
    pub format: ReportFormat,

    /// Use an in-memory display and a simulated window manager
    #[arg(long)]
    pub headless: bool,

    /// Window manager program to test
    #[arg(long, value_name = "PROGRAM")]
    pub wm: Option<String>,

    /// List the available tests and exit
    #[arg(long)]
    pub list: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Configuration with command line overrides applied
    pub fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_path(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::load(),
        };

        if let Some(timeout) = self.timeout {
            config.run.timeout_secs = timeout;
        }
        if let Some(wm) = &self.wm {
            config.manager.program = wm.clone();
        }

        config.validate().context("invalid settings")?;
        Ok(config)
    }

    pub fn runner(&self, config: &Config) -> Runner {
        if self.headless {
            Runner::from_config(
                config,
                SessionSource::Headless(HeadlessOptions::default()),
                ManagerSpec::Simulated(SimulatedManager::new()),
            )
        } else {
            Runner::from_config(
                config,
                SessionSource::Xserver(config.server.clone()),
                config.manager_spec(),
            )
        }
    }
}

/// Tests to run: all of them, or the one named by `--test`
pub fn select_tests(tests: &[TestCase], name: Option<&str>) -> Result<Vec<TestCase>> {
    let Some(name) = name else {
        return Ok(tests.to_vec());
    };

    match wmprobe::suite::find(tests, name) {
        Some(test) => Ok(vec![test.clone()]),
        None => {
            let known: Vec<_> = tests.iter().map(TestCase::name).collect();
            bail!("unknown test '{}' (available: {})", name, known.join(", "))
        }
    }
}
