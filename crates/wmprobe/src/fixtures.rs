//! Fixtures for testing against headless sessions

use std::time::Duration;

use crate::backend::{HeadlessOptions, SimulatedManager};
use crate::client::{make_window, SyntheticWindow};
use crate::error::HarnessError;
use crate::manager::{ManagerOptions, ManagerSpec};
use crate::poll::PollPolicy;
use crate::runner::Runner;
use crate::session::{start_headless_session, Session, SessionSource};

/// Reparenting wait used by the fixtures
pub const REPARENT_TIMEOUT: Duration = Duration::from_millis(500);

/// Manager startup budget used by the fixtures
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Short-interval policy for in-memory displays
pub fn fast_poll(timeout: Duration) -> PollPolicy {
    PollPolicy::new(timeout).with_intervals(Duration::from_millis(1), Duration::from_millis(20))
}

pub fn fast_manager_options() -> ManagerOptions {
    ManagerOptions {
        startup: fast_poll(STARTUP_TIMEOUT),
        stop_grace: Duration::from_millis(100),
        ..ManagerOptions::default()
    }
}

/// Clean headless session
pub fn headless_session() -> Session {
    start_headless_session(HeadlessOptions::default())
}

/// Headless session where windows start out framed
pub fn polluted_session() -> Session {
    start_headless_session(HeadlessOptions { prepolluted: true })
}

/// Session with `count` unmanaged windows already mapped
///
/// Returns: (session, windows)
pub fn session_with_windows(count: usize) -> Result<(Session, Vec<SyntheticWindow>), HarnessError> {
    let session = headless_session();
    let windows = (0..count)
        .map(|_| make_window(&session))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((session, windows))
}

/// Runner over clean headless sessions driving `manager`
pub fn headless_runner(manager: SimulatedManager) -> Runner {
    runner_for(SessionSource::Headless(HeadlessOptions::default()), manager)
}

/// Runner over pre-polluted headless sessions
pub fn polluted_runner(manager: SimulatedManager) -> Runner {
    runner_for(SessionSource::Headless(HeadlessOptions { prepolluted: true }), manager)
}

fn runner_for(source: SessionSource, manager: SimulatedManager) -> Runner {
    Runner::new(source, ManagerSpec::Simulated(manager))
        .with_manager_options(fast_manager_options())
        .with_reparent_policy(fast_poll(REPARENT_TIMEOUT))
        .with_timeout(Duration::from_secs(10))
}
