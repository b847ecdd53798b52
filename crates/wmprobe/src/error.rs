//! Harness error types

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::backend::WindowId;
use crate::session::SessionState;

/// Errors raised by the harness itself (as opposed to a test's own checks)
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The display could not be allocated or stopped responding
    #[error("display session unavailable: {0}")]
    Session(String),

    /// Operation attempted on a session in the wrong lifecycle state
    #[error("{operation} requires a ready session, but it is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The window manager never claimed the display
    #[error("window manager did not become ready within {}s", .0.as_secs_f64())]
    StartupTimeout(Duration),

    /// The window manager process died before it became ready
    #[error("window manager exited before becoming ready ({0})")]
    ManagerExited(String),

    /// The window manager could not be launched at all
    #[error("failed to launch window manager: {0}")]
    Launch(String),

    /// Query against a window that no longer exists
    #[error("window {0} no longer exists")]
    Inspection(WindowId),

    /// Unexpected reply or connection failure on the display protocol
    #[error("display protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<x11rb::errors::ConnectionError> for HarnessError {
    fn from(e: x11rb::errors::ConnectionError) -> Self {
        HarnessError::Protocol(e.to_string())
    }
}

impl From<x11rb::errors::ReplyError> for HarnessError {
    fn from(e: x11rb::errors::ReplyError) -> Self {
        HarnessError::Protocol(e.to_string())
    }
}

impl From<x11rb::errors::ReplyOrIdError> for HarnessError {
    fn from(e: x11rb::errors::ReplyOrIdError) -> Self {
        HarnessError::Protocol(e.to_string())
    }
}

/// Why a single test did not pass
#[derive(Error, Debug)]
pub enum TestFailure {
    /// The test's own logical check failed
    #[error("{0}")]
    Assertion(String),

    /// The harness failed underneath the test
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl TestFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        TestFailure::Assertion(message.into())
    }
}
