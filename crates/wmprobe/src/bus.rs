//! Per-session message bus
//!
//! Some managers look for a session bus at startup and stall or misbehave
//! without one. `dbus-launch` starts a daemon, prints `KEY=value` lines
//! describing it and exits; the daemon keeps running until the session
//! signals it.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;

use rustix::process::{kill_process, Pid, Signal};

use crate::error::HarnessError;
use crate::poll::PollPolicy;
use crate::process::ChildProcess;

pub(crate) const BUS_LAUNCHER: &str = "dbus-launch";

const ADDRESS_KEY: &str = "DBUS_SESSION_BUS_ADDRESS";
const PID_KEY: &str = "DBUS_SESSION_BUS_PID";

/// A running session bus and the environment that points at it
#[derive(Debug)]
pub(crate) struct SessionBus {
    env: Vec<(String, String)>,
    daemon: Option<Pid>,
}

impl SessionBus {
    /// Run the launcher and collect its environment
    pub fn launch(program: &str, args: &[&str], timeout: Duration) -> Result<Self, HarnessError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .env("LANG", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut launcher = ChildProcess::spawn(program, &mut command)
            .map_err(|e| HarnessError::Launch(format!("{}: {}", program, e)))?;

        let policy = PollPolicy::new(timeout).with_intervals(Duration::from_millis(5), Duration::from_millis(50));
        let Some(status) = policy.poll(|| launcher.try_exit())? else {
            return Err(HarnessError::Launch(format!(
                "{} did not finish within {:?}",
                program, timeout
            )));
        };
        if !status.success() {
            return Err(HarnessError::Launch(format!("{} failed ({})", program, status)));
        }

        let mut output = String::new();
        if let Some(mut stdout) = launcher.take_stdout() {
            stdout.read_to_string(&mut output)?;
        }

        let env = parse_env(&output);
        if !env.iter().any(|(key, _)| key == ADDRESS_KEY) {
            return Err(HarnessError::Launch(format!("{} printed no {}", program, ADDRESS_KEY)));
        }
        let daemon = env
            .iter()
            .find(|(key, _)| key == PID_KEY)
            .and_then(|(_, value)| value.parse::<i32>().ok())
            .and_then(Pid::from_raw);

        tracing::info!(?daemon, "session bus started");
        Ok(Self { env, daemon })
    }

    /// Variables to hand to processes that should use this bus
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn stop(&mut self) {
        if let Some(pid) = self.daemon.take() {
            match kill_process(pid, Signal::Term) {
                Ok(()) => tracing::debug!(?pid, "session bus stopped"),
                Err(e) => tracing::debug!(?pid, error = %e, "session bus already gone"),
            }
        }
    }
}

impl Drop for SessionBus {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `KEY=value` lines; anything else is ignored
pub(crate) fn parse_env(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let valid = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            valid.then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}
