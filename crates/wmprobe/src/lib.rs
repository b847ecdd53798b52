//! Window manager test harness
//!
//! Starts an isolated display, creates plain client windows, launches the
//! window manager under test and checks through the live window tree that
//! it reparented them into frames.
//!
//! # Modules
//!
//! - `session`: Isolated display sessions (X server or headless)
//! - `client`: Synthetic client windows
//! - `manager`: Window manager launch, readiness and shutdown
//! - `inspect`: Live parent queries
//! - `runner`: Test cases, per-test isolation, lazy results
//! - `report`: Text and JSON run reports
//! - `suite`: Built-in tests
//! - `protocol`: Property-based queries to the window manager
//! - `backend`: X11 and headless display implementations
//! - `assertions`: Checks shared by test bodies
//! - `fixtures`: Headless test fixtures
//! - `live`: Helpers for real X servers

pub mod assertions;
pub mod backend;
mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod inspect;
pub mod live;
pub mod manager;
pub mod poll;
mod process;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod session;
pub mod suite;

pub use backend::{Geometry, WindowId};
pub use client::{make_window, SyntheticWindow};
pub use config::Config;
pub use error::{HarnessError, TestFailure};
pub use inspect::{parent, wait_for_parent};
pub use manager::{start_wm, stop_wm, ManagerOptions, ManagerProcess, ManagerSpec, ManagerState};
pub use poll::PollPolicy;
pub use report::{ReportFormat, RunReport};
pub use runner::{Runner, TestCase, TestContext, TestResult, TestStatus};
pub use session::{start_headless_session, start_session, stop_session, Session, SessionSource, SessionState};
