//! Test runner
//!
//! Each test gets a fresh session from the runner's [`SessionSource`] and
//! runs on its own thread, so a panicking or hung body costs one result,
//! never the run. Results are produced lazily: iterating [`Results`] runs
//! the next test.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::{Geometry, WindowId};
use crate::client::{self, SyntheticWindow};
use crate::config::Config;
use crate::error::{HarnessError, TestFailure};
use crate::inspect;
use crate::manager::{self, ManagerOptions, ManagerProcess, ManagerSpec};
use crate::poll::PollPolicy;
use crate::protocol::{self, ManagerQuery, QueryError, DEFAULT_QUERY_PROPERTY};
use crate::session::{Session, SessionSource};

/// Signature of a test body
pub type TestBody = dyn Fn(&mut TestContext) -> Result<(), TestFailure> + Send + Sync;

/// A named test
#[derive(Clone)]
pub struct TestCase {
    name: String,
    body: Arc<TestBody>,
}

impl TestCase {
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut TestContext) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

/// What a test body works with
pub struct TestContext {
    session: Session,
    manager_spec: ManagerSpec,
    manager_options: ManagerOptions,
    geometry: Geometry,
    reparent_policy: PollPolicy,
    query_property: String,
    manager: Option<ManagerProcess>,
}

impl TestContext {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn make_window(&self) -> Result<SyntheticWindow, HarnessError> {
        client::make_window_with(&self.session, self.geometry)
    }

    pub fn parent(&self, window: &SyntheticWindow) -> Result<Option<WindowId>, HarnessError> {
        inspect::parent(window)
    }

    /// Wait (bounded by the configured reparent timeout) for a parent
    pub fn wait_for_parent(&self, window: &SyntheticWindow) -> Result<Option<WindowId>, HarnessError> {
        inspect::wait_for_parent(window, &self.reparent_policy)
    }

    pub fn reparent_policy(&self) -> &PollPolicy {
        &self.reparent_policy
    }

    /// Start the window manager under test and wait until it is ready
    ///
    /// The manager stays up until [`stop_wm`](Self::stop_wm) or the end of
    /// the test.
    pub fn start_wm(&mut self) -> Result<(), HarnessError> {
        if self.manager.is_some() {
            return Err(HarnessError::Launch("window manager is already running".to_string()));
        }
        let manager = manager::start_wm(&self.session, &self.manager_spec, &self.manager_options)?;
        self.manager = Some(manager);
        Ok(())
    }

    pub fn stop_wm(&mut self) -> Result<(), HarnessError> {
        match self.manager.take() {
            Some(manager) => manager::stop_wm(&manager, self.manager_options.stop_grace),
            None => Ok(()),
        }
    }

    pub fn manager(&self) -> Option<&ManagerProcess> {
        self.manager.as_ref()
    }

    /// Ask the running manager a question over the query property
    pub fn query_manager(&self, kind: char, details: &str) -> Result<String, QueryError> {
        protocol::query_manager(
            &self.session,
            &ManagerQuery::new(kind, details),
            &self.query_property,
            &self.reparent_policy,
        )
    }
}

/// Outcome of one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    /// The test's own check failed, or it timed out
    Fail,
    /// The harness failed or the body panicked
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl TestResult {
    fn new(name: &str, status: TestStatus, message: Option<String>, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: duration.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Pass
    }
}

/// One report line: `<name right-aligned to 20>: pass|FAIL (msg)|ERROR (msg)`
impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message.as_deref().unwrap_or("");
        match self.status {
            TestStatus::Pass => write!(f, "{:>20}: pass", self.name),
            TestStatus::Fail => write!(f, "{:>20}: FAIL ({})", self.name, message),
            TestStatus::Error => write!(f, "{:>20}: ERROR ({})", self.name, message),
        }
    }
}

/// Runs tests, one fresh session each
#[derive(Debug, Clone)]
pub struct Runner {
    source: SessionSource,
    manager_spec: ManagerSpec,
    manager_options: ManagerOptions,
    geometry: Geometry,
    reparent_policy: PollPolicy,
    query_property: String,
    timeout: Duration,
}

impl Runner {
    pub fn new(source: SessionSource, manager_spec: ManagerSpec) -> Self {
        Self {
            source,
            manager_spec,
            manager_options: ManagerOptions::default(),
            geometry: Geometry::default(),
            reparent_policy: PollPolicy::default(),
            query_property: DEFAULT_QUERY_PROPERTY.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Runner with every setting taken from `config`
    pub fn from_config(config: &Config, source: SessionSource, manager_spec: ManagerSpec) -> Self {
        Self {
            source,
            manager_spec,
            manager_options: config.manager_options(),
            geometry: config.window.geometry(),
            reparent_policy: config.reparent_policy(),
            query_property: config.manager.query_property.clone(),
            timeout: config.test_timeout(),
        }
    }

    /// Per-test budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_manager_options(mut self, options: ManagerOptions) -> Self {
        self.manager_options = options;
        self
    }

    pub fn with_reparent_policy(mut self, policy: PollPolicy) -> Self {
        self.reparent_policy = policy;
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Iterator that runs `tests` in order as it is advanced
    ///
    /// Each call starts over with fresh sessions.
    pub fn run<'a>(&'a self, tests: &'a [TestCase]) -> Results<'a> {
        Results {
            runner: self,
            tests: tests.iter(),
        }
    }

    fn run_one(&self, test: &TestCase) -> TestResult {
        let span = tracing::info_span!("test", name = %test.name);
        let _guard = span.enter();
        let started = Instant::now();

        let session = match self.source.start() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "could not start session");
                return TestResult::new(&test.name, TestStatus::Error, Some(e.to_string()), started.elapsed());
            }
        };

        let (status, message) = self.execute(test, &session);

        if let Err(e) = session.stop() {
            tracing::warn!(error = %e, "session teardown failed");
        }

        let result = TestResult::new(&test.name, status, message, started.elapsed());
        tracing::info!(status = ?result.status, duration_ms = result.duration_ms, "test finished");
        result
    }

    fn execute(&self, test: &TestCase, session: &Session) -> (TestStatus, Option<String>) {
        let mut context = TestContext {
            session: session.clone(),
            manager_spec: self.manager_spec.clone(),
            manager_options: self.manager_options,
            geometry: self.geometry,
            reparent_policy: self.reparent_policy,
            query_property: self.query_property.clone(),
            manager: None,
        };
        let body = test.body.clone();
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("test-{}", test.name))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| (*body)(&mut context)));
                // Stop the manager before reporting
                drop(context);
                let _ = tx.send(outcome);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return (TestStatus::Error, Some(format!("failed to spawn test thread: {}", e))),
        };

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => {
                if handle.join().is_err() {
                    tracing::debug!("test thread panicked after reporting");
                }
                match outcome {
                    Ok(Ok(())) => (TestStatus::Pass, None),
                    Ok(Err(TestFailure::Assertion(message))) => (TestStatus::Fail, Some(message)),
                    Ok(Err(TestFailure::Harness(e))) => (TestStatus::Error, Some(e.to_string())),
                    Err(payload) => (TestStatus::Error, Some(format!("panicked: {}", panic_message(&*payload)))),
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(timeout = ?self.timeout, "test timed out, tearing down its session");
                // The body thread is left behind; it fails out once the
                // display is gone.
                if let Err(e) = session.stop() {
                    tracing::warn!(error = %e, "forced teardown failed");
                }
                (
                    TestStatus::Fail,
                    Some(format!("timed out after {}s", self.timeout.as_secs_f64())),
                )
            }
            Err(RecvTimeoutError::Disconnected) => {
                (TestStatus::Error, Some("test thread exited without a result".to_string()))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Lazily produced results of [`Runner::run`]
pub struct Results<'a> {
    runner: &'a Runner,
    tests: slice::Iter<'a, TestCase>,
}

impl Iterator for Results<'_> {
    type Item = TestResult;

    fn next(&mut self) -> Option<TestResult> {
        let test = self.tests.next()?;
        Some(self.runner.run_one(test))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.tests.size_hint()
    }
}

impl ExactSizeIterator for Results<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessOptions, SimulatedManager};

    fn headless_runner() -> Runner {
        Runner::new(
            SessionSource::Headless(HeadlessOptions::default()),
            ManagerSpec::Simulated(SimulatedManager::new()),
        )
        .with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn result_lines_are_right_aligned() {
        let pass = TestResult::new("reparent", TestStatus::Pass, None, Duration::ZERO);
        assert_eq!(pass.to_string(), "            reparent: pass");

        let fail = TestResult::new(
            "reparent",
            TestStatus::Fail,
            Some("Window was not reparented".to_string()),
            Duration::ZERO,
        );
        assert_eq!(fail.to_string(), "            reparent: FAIL (Window was not reparented)");
    }

    #[test]
    fn long_names_are_not_truncated() {
        let name = "a-test-name-longer-than-twenty";
        let result = TestResult::new(name, TestStatus::Error, Some("boom".to_string()), Duration::ZERO);
        assert_eq!(result.to_string(), format!("{}: ERROR (boom)", name));
    }

    #[test]
    fn outcome_maps_to_status() {
        let tests = [
            TestCase::new("ok", |_| Ok(())),
            TestCase::new("assert", |_| Err(TestFailure::assertion("nope"))),
            TestCase::new("harness", |_| Err(HarnessError::Protocol("lost".into()).into())),
            TestCase::new("panic", |_| panic!("kaboom")),
        ];
        let results: Vec<_> = headless_runner().run(&tests).collect();

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![TestStatus::Pass, TestStatus::Fail, TestStatus::Error, TestStatus::Error]
        );
        assert_eq!(results[1].message.as_deref(), Some("nope"));
        assert!(results[3].message.as_deref().unwrap().contains("kaboom"));
    }

    #[test]
    fn start_wm_twice_is_an_error() {
        let tests = [TestCase::new("twice", |ctx| {
            ctx.start_wm()?;
            ctx.start_wm()?;
            Ok(())
        })];
        let results: Vec<_> = headless_runner().run(&tests).collect();
        assert_eq!(results[0].status, TestStatus::Error);
    }

    #[test]
    fn size_hint_matches_test_count() {
        let tests = vec![TestCase::new("a", |_| Ok(())), TestCase::new("b", |_| Ok(()))];
        let runner = headless_runner();
        assert_eq!(runner.run(&tests).len(), 2);
    }

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*boxed), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(&*boxed), "non-string panic payload");
    }
}
