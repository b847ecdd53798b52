//! Display sessions
//!
//! A [`Session`] is one isolated display: an X server on its own display
//! number (or a headless display) plus everything launched against it.
//! Handles are cheap clones; the last one dropped tears the session down,
//! so a failing test can never leak a server or a window manager.

use std::fmt;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;

use crate::backend::{HeadlessDisplay, HeadlessOptions, WindowSystem, X11Display};
use crate::bus::{SessionBus, BUS_LAUNCHER};
use crate::config::ServerConfig;
use crate::error::HarnessError;
use crate::live;
use crate::manager::ManagerShared;
use crate::poll::PollPolicy;
use crate::process::ChildProcess;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Ready,
    TornDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::TornDown => "torn down",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The display a session is attached to
#[derive(Clone)]
enum Attached {
    X11(Arc<X11Display>),
    Headless(Arc<HeadlessDisplay>),
}

impl Attached {
    fn window_system(&self) -> Arc<dyn WindowSystem> {
        match self {
            Attached::X11(display) => display.clone() as Arc<dyn WindowSystem>,
            Attached::Headless(display) => display.clone() as Arc<dyn WindowSystem>,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) struct SessionShared {
    id: SessionId,
    display_name: String,
    state: Mutex<SessionState>,
    display: Mutex<Option<Attached>>,
    server: Mutex<Option<ChildProcess>>,
    server_grace: Duration,
    managers: Mutex<Vec<Arc<ManagerShared>>>,
    bus: Mutex<Option<SessionBus>>,
}

impl SessionShared {
    fn new(display_name: String, server_grace: Duration) -> Self {
        Self {
            id: SessionId(NEXT_SESSION.fetch_add(1, Ordering::Relaxed)),
            display_name,
            state: Mutex::new(SessionState::Starting),
            display: Mutex::new(None),
            server: Mutex::new(None),
            server_grace,
            managers: Mutex::new(Vec::new()),
            bus: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// The live display, if the session is ready
    pub(crate) fn display(&self, operation: &'static str) -> Result<Arc<dyn WindowSystem>, HarnessError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(HarnessError::InvalidState { operation, state });
        }
        lock(&self.display)
            .as_ref()
            .map(Attached::window_system)
            .ok_or(HarnessError::InvalidState {
                operation,
                state: SessionState::TornDown,
            })
    }

    fn stop(&self) -> Result<(), HarnessError> {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::TornDown {
                return Ok(());
            }
            *state = SessionState::TornDown;
        }

        let mut first_error = None;

        let managers = std::mem::take(&mut *lock(&self.managers));
        for manager in managers {
            if let Err(e) = manager.stop() {
                tracing::warn!(session = %self.id, error = %e, "failed to stop window manager");
                first_error.get_or_insert(e);
            }
        }

        if let Some(mut bus) = lock(&self.bus).take() {
            bus.stop();
        }

        if let Some(Attached::Headless(display)) = lock(&self.display).take() {
            display.shutdown();
        }

        if let Some(mut server) = lock(&self.server).take() {
            match server.terminate(self.server_grace) {
                Ok(status) => tracing::debug!(session = %self.id, ?status, "display server stopped"),
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, "failed to stop display server");
                    first_error.get_or_insert(e.into());
                }
            }
        }

        tracing::info!(session = %self.id, display = %self.display_name, "session torn down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(session = %self.id, error = %e, "session teardown failed");
        }
    }
}

/// An isolated display for one test
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Display name clients connect to
    pub fn display_name(&self) -> &str {
        &self.shared.display_name
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_headless(&self) -> bool {
        self.headless_display().is_some()
    }

    /// The live display; fails unless the session is ready
    pub fn display(&self, operation: &'static str) -> Result<Arc<dyn WindowSystem>, HarnessError> {
        self.shared.display(operation)
    }

    /// The in-memory display behind a headless session
    pub fn headless_display(&self) -> Option<Arc<HeadlessDisplay>> {
        match lock(&self.shared.display).as_ref() {
            Some(Attached::Headless(display)) => Some(display.clone()),
            _ => None,
        }
    }

    /// Release every resource of the session; calling it again does nothing
    pub fn stop(&self) -> Result<(), HarnessError> {
        self.shared.stop()
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionShared> {
        Arc::downgrade(&self.shared)
    }

    /// Tie a manager's lifetime to this session
    ///
    /// Holds the state lock while registering, so a concurrent
    /// [`Session::stop`] either sees the manager or makes this fail.
    pub(crate) fn adopt_manager(&self, manager: Arc<ManagerShared>) -> Result<(), HarnessError> {
        let state = lock(&self.shared.state);
        if *state != SessionState::Ready {
            return Err(HarnessError::InvalidState {
                operation: "start_wm",
                state: *state,
            });
        }
        let mut managers = lock(&self.shared.managers);
        managers.retain(|m| !m.is_stopped());
        managers.push(manager);
        Ok(())
    }

    /// Environment for the session bus, launching it on first use
    pub(crate) fn session_bus_env(&self, timeout: Duration) -> Result<Vec<(String, String)>, HarnessError> {
        self.shared.display("start_wm")?;
        let mut bus = lock(&self.shared.bus);
        if bus.is_none() {
            *bus = Some(SessionBus::launch(BUS_LAUNCHER, &[], timeout)?);
        }
        Ok(bus.as_ref().map(|bus| bus.env().to_vec()).unwrap_or_default())
    }

    #[cfg(test)]
    pub(crate) fn adopted_managers(&self) -> usize {
        lock(&self.shared.managers).len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("display", &self.shared.display_name)
            .field("state", &self.state())
            .finish()
    }
}

/// Start an X server on a free display number and connect to it
pub fn start_session(config: &ServerConfig) -> Result<Session, HarnessError> {
    let number = live::allocate_display_number(config.display_base)?;
    let name = format!(":{}", number);
    let shared = Arc::new(SessionShared::new(name.clone(), config.stop_grace()));

    tracing::info!(session = %shared.id, display = %name, server = %config.program, "starting display server");

    let mut command = server_command(config, &name);
    let mut server = ChildProcess::spawn(&config.program, &mut command)
        .map_err(|e| HarnessError::Session(format!("failed to start {}: {}", config.program, e)))?;

    let connected = PollPolicy::new(config.startup_timeout()).poll(|| {
        if let Some(status) = server.try_exit()? {
            return Err(HarnessError::Session(format!(
                "{} exited during startup ({})",
                config.program, status
            )));
        }
        match X11Display::connect(&name) {
            Ok(display) => Ok(Some(display)),
            Err(e) => {
                tracing::trace!(display = %name, error = %e, "server not accepting connections yet");
                Ok(None)
            }
        }
    });

    let display = match connected {
        Ok(Some(display)) => display,
        Ok(None) => {
            return Err(HarnessError::Session(format!(
                "{} did not accept connections on {} within {:?}",
                config.program,
                name,
                config.startup_timeout()
            )));
        }
        Err(e) => return Err(e),
    };

    *lock(&shared.server) = Some(server);
    *lock(&shared.display) = Some(Attached::X11(Arc::new(display)));
    *lock(&shared.state) = SessionState::Ready;

    tracing::info!(session = %shared.id, display = %name, "session ready");
    Ok(Session { shared })
}

fn server_command(config: &ServerConfig, display: &str) -> Command {
    let mut command = Command::new(&config.program);
    command
        .arg(display)
        .args(&config.args)
        .env("LANG", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

/// Start a session on a fresh in-memory display
pub fn start_headless_session(options: HeadlessOptions) -> Session {
    let display = Arc::new(HeadlessDisplay::new(options));
    let shared = Arc::new(SessionShared::new(display.name().to_string(), Duration::ZERO));

    *lock(&shared.display) = Some(Attached::Headless(display));
    *lock(&shared.state) = SessionState::Ready;

    tracing::debug!(session = %shared.id, display = %shared.display_name, "headless session ready");
    Session { shared }
}

/// Release a session's resources; idempotent
pub fn stop_session(session: &Session) -> Result<(), HarnessError> {
    session.stop()
}

/// Where the runner gets a fresh session for each test
#[derive(Debug, Clone)]
pub enum SessionSource {
    /// A real X server per test
    Xserver(ServerConfig),
    /// An in-memory display per test
    Headless(HeadlessOptions),
}

impl SessionSource {
    pub fn start(&self) -> Result<Session, HarnessError> {
        match self {
            SessionSource::Xserver(config) => start_session(config),
            SessionSource::Headless(options) => Ok(start_headless_session(*options)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_session_starts_ready() {
        let session = start_headless_session(HeadlessOptions::default());
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.is_headless());
        assert!(session.display("test").is_ok());
    }

    #[test]
    fn stop_is_idempotent() {
        let session = start_headless_session(HeadlessOptions::default());
        stop_session(&session).unwrap();
        stop_session(&session).unwrap();
        assert_eq!(session.state(), SessionState::TornDown);
    }

    #[test]
    fn stopped_session_refuses_display_access() {
        let session = start_headless_session(HeadlessOptions::default());
        let display = session.headless_display().unwrap();
        session.stop().unwrap();

        assert!(display.is_shut_down());
        assert!(matches!(
            session.display("make_window"),
            Err(HarnessError::InvalidState { operation: "make_window", state: SessionState::TornDown })
        ));
    }

    #[test]
    fn dropping_last_handle_tears_down() {
        let session = start_headless_session(HeadlessOptions::default());
        let display = session.headless_display().unwrap();
        let clone = session.clone();
        drop(session);
        assert!(!display.is_shut_down());
        drop(clone);
        assert!(display.is_shut_down());
    }

    #[test]
    fn session_ids_are_unique() {
        let a = start_headless_session(HeadlessOptions::default());
        let b = start_headless_session(HeadlessOptions::default());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.display_name(), b.display_name());
    }

    #[test]
    fn server_runs_with_c_locale() {
        let config = ServerConfig::default();
        let command = server_command(&config, ":42");
        let lang = command.get_envs().find(|(key, _)| *key == "LANG").and_then(|(_, value)| value);
        assert_eq!(lang, Some(std::ffi::OsStr::new("C")));
        assert_eq!(command.get_args().next(), Some(std::ffi::OsStr::new(":42")));
    }

    #[test]
    fn missing_server_binary_is_a_session_error() {
        let config = ServerConfig {
            program: "definitely-not-an-x-server".to_string(),
            display_base: 5000,
            ..ServerConfig::default()
        };
        assert!(matches!(start_session(&config), Err(HarnessError::Session(_))));
    }

    #[test]
    fn server_that_exits_early_is_a_session_error() {
        let config = ServerConfig {
            program: "false".to_string(),
            args: Vec::new(),
            display_base: 5100,
            startup_timeout_ms: 2_000,
            ..ServerConfig::default()
        };
        let result = start_session(&config);
        assert!(matches!(result, Err(HarnessError::Session(_))), "got {:?}", result);
    }
}
