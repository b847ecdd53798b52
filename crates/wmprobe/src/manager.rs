//! Window manager lifecycle
//!
//! Starting a manager is the one racy step of a test: the manager takes
//! over the display on its own schedule. [`start_wm`] launches it and then
//! polls the display until the manager has claimed the screen, bounded by
//! [`ManagerOptions::startup`].

use std::fmt;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::backend::{ReadinessProbe, SimulatedManager};
use crate::error::HarnessError;
use crate::poll::PollPolicy;
use crate::process::ChildProcess;
use crate::session::Session;

/// A running window manager, whatever is behind it
pub trait ManagerInstance: Send {
    /// OS process id, if there is a process
    fn id(&self) -> Option<u32>;

    /// Description of how it exited, or `None` while it is still running
    fn poll_exit(&mut self) -> Result<Option<String>, HarnessError>;

    /// Ask it to stop, forcing it after `grace`
    fn terminate(&mut self, grace: Duration) -> Result<(), HarnessError>;
}

/// What to launch as the window manager under test
#[derive(Debug, Clone)]
pub enum ManagerSpec {
    /// An external program, started with `DISPLAY` pointing at the session
    Command {
        program: String,
        args: Vec<String>,
        /// Pass stdout/stderr through instead of discarding them
        inherit_output: bool,
    },
    /// In-process stand-in for headless sessions
    Simulated(SimulatedManager),
}

impl ManagerSpec {
    pub fn command(program: &str) -> Self {
        ManagerSpec::Command {
            program: program.to_string(),
            args: Vec::new(),
            inherit_output: false,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ManagerSpec::Command { program, .. } => program.clone(),
            ManagerSpec::Simulated(_) => "simulated".to_string(),
        }
    }
}

/// Readiness and shutdown settings for [`start_wm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    pub readiness: ReadinessProbe,
    /// Bounded wait for readiness
    pub startup: PollPolicy,
    /// Time between SIGTERM and SIGKILL
    pub stop_grace: Duration,
    /// Give command managers a per-session message bus
    pub session_bus: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            readiness: ReadinessProbe::default(),
            startup: PollPolicy::new(Duration::from_secs(10)),
            stop_grace: Duration::from_secs(2),
            session_bus: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Stopped,
    Running,
    Crashed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) struct ManagerShared {
    label: String,
    pid: Option<u32>,
    grace: Duration,
    state: Mutex<ManagerState>,
    instance: Mutex<Box<dyn ManagerInstance>>,
}

impl ManagerShared {
    /// Refresh the state from the instance; returns the exit reason if it died
    fn check_exit(&self) -> Result<Option<String>, HarnessError> {
        let exited = lock(&self.instance).poll_exit()?;
        if let Some(reason) = &exited {
            let mut state = lock(&self.state);
            if *state == ManagerState::Running {
                tracing::warn!(manager = %self.label, reason = %reason, "window manager exited");
                *state = ManagerState::Crashed;
            }
        }
        Ok(exited)
    }

    pub(crate) fn stop(&self) -> Result<(), HarnessError> {
        self.stop_with(self.grace)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *lock(&self.state) == ManagerState::Stopped
    }

    fn stop_with(&self, grace: Duration) -> Result<(), HarnessError> {
        let mut state = lock(&self.state);
        if *state == ManagerState::Stopped {
            return Ok(());
        }
        lock(&self.instance).terminate(grace)?;
        *state = ManagerState::Stopped;
        tracing::info!(manager = %self.label, "window manager stopped");
        Ok(())
    }
}

/// Handle to the window manager under test
///
/// Dropping it stops the manager.
#[must_use = "dropping a ManagerProcess stops the window manager"]
pub struct ManagerProcess {
    shared: Arc<ManagerShared>,
}

impl ManagerProcess {
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.pid
    }

    /// Current state; notices a crash since the last call
    pub fn state(&self) -> ManagerState {
        if let Err(e) = self.shared.check_exit() {
            tracing::debug!(manager = %self.shared.label, error = %e, "failed to poll window manager");
        }
        *lock(&self.shared.state)
    }

    /// Stop with the grace period from [`ManagerOptions::stop_grace`]
    pub fn stop(&self) -> Result<(), HarnessError> {
        self.shared.stop()
    }
}

impl Drop for ManagerProcess {
    fn drop(&mut self) {
        if let Err(e) = self.shared.stop() {
            tracing::warn!(manager = %self.shared.label, error = %e, "failed to stop window manager");
        }
    }
}

impl fmt::Debug for ManagerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerProcess")
            .field("label", &self.shared.label)
            .field("pid", &self.shared.pid)
            .field("state", &*lock(&self.shared.state))
            .finish()
    }
}

/// An external window manager binary
struct CommandManager {
    process: ChildProcess,
}

/// Everything a command manager needs to know about its environment
struct LaunchEnv<'a> {
    display: &'a str,
    inherit_output: bool,
    /// Extra variables, e.g. the session bus address
    extra: &'a [(String, String)],
}

impl CommandManager {
    fn command(program: &str, args: &[String], env: &LaunchEnv<'_>) -> Command {
        let mut command = Command::new(program);
        command
            .args(args)
            .env("DISPLAY", env.display)
            .env("LANG", "C")
            .envs(env.extra.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null());
        if !env.inherit_output {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command
    }

    fn launch(program: &str, args: &[String], env: &LaunchEnv<'_>) -> Result<Self, HarnessError> {
        let process = ChildProcess::spawn(program, &mut Self::command(program, args, env))
            .map_err(|e| HarnessError::Launch(format!("{}: {}", program, e)))?;
        Ok(Self { process })
    }
}

impl ManagerInstance for CommandManager {
    fn id(&self) -> Option<u32> {
        Some(self.process.id())
    }

    fn poll_exit(&mut self) -> Result<Option<String>, HarnessError> {
        Ok(self.process.try_exit()?.map(|status| status.to_string()))
    }

    fn terminate(&mut self, grace: Duration) -> Result<(), HarnessError> {
        let status = self.process.terminate(grace)?;
        tracing::debug!(?status, "window manager process reaped");
        Ok(())
    }
}

/// Launch the window manager and wait until it has claimed the display
///
/// Fails with [`HarnessError::StartupTimeout`] once `options.startup`
/// elapses without the readiness probe succeeding, and with
/// [`HarnessError::ManagerExited`] if the manager dies first. Either way the
/// manager is stopped before returning.
pub fn start_wm(
    session: &Session,
    spec: &ManagerSpec,
    options: &ManagerOptions,
) -> Result<ManagerProcess, HarnessError> {
    let display = session.display("start_wm")?;

    let instance: Box<dyn ManagerInstance> = match spec {
        ManagerSpec::Command { program, args, inherit_output } => {
            if session.is_headless() {
                return Err(HarnessError::Launch(
                    "headless sessions can only run a simulated window manager".to_string(),
                ));
            }
            let extra = if options.session_bus {
                session.session_bus_env(options.startup.timeout)?
            } else {
                Vec::new()
            };
            let env = LaunchEnv {
                display: session.display_name(),
                inherit_output: *inherit_output,
                extra: &extra,
            };
            Box::new(CommandManager::launch(program, args, &env)?)
        }
        ManagerSpec::Simulated(simulated) => {
            let headless = session.headless_display().ok_or_else(|| {
                HarnessError::Launch("a simulated window manager needs a headless session".to_string())
            })?;
            simulated.launch(headless)?
        }
    };

    let label = spec.label();
    let pid = instance.id();
    let shared = Arc::new(ManagerShared {
        label: label.clone(),
        pid,
        grace: options.stop_grace,
        state: Mutex::new(ManagerState::Running),
        instance: Mutex::new(instance),
    });
    let manager = ManagerProcess { shared };
    session.adopt_manager(manager.shared.clone())?;

    tracing::info!(session = %session.id(), manager = %label, ?pid, probe = ?options.readiness, "waiting for window manager");

    let started = Instant::now();
    let ready = options.startup.poll(|| {
        if let Some(reason) = manager.shared.check_exit()? {
            return Err(HarnessError::ManagerExited(reason));
        }
        Ok(display.manager_present(options.readiness)?.then_some(()))
    })?;

    match ready {
        Some(()) => {
            tracing::info!(manager = %label, elapsed = ?started.elapsed(), "window manager ready");
            Ok(manager)
        }
        None => {
            tracing::warn!(manager = %label, timeout = ?options.startup.timeout, "window manager never became ready");
            Err(HarnessError::StartupTimeout(options.startup.timeout))
        }
    }
}

/// Stop the window manager: SIGTERM, then SIGKILL once `grace` has passed
///
/// Does nothing if it is already stopped.
pub fn stop_wm(manager: &ManagerProcess, grace: Duration) -> Result<(), HarnessError> {
    manager.shared.stop_with(grace)
}
