//! Checks shared by test bodies
//!
//! Unlike `assert!`, these return a [`TestFailure`] so the runner records a
//! failing test instead of a crashed one.

use crate::backend::WindowId;
use crate::client::SyntheticWindow;
use crate::error::{HarnessError, TestFailure};
use crate::inspect;
use crate::poll::PollPolicy;

/// Message for a window that was already framed before any manager ran
pub const PARENT_AT_START: &str = "Window has a parent at the beginning";

/// Message for a window the manager never framed
pub const NOT_REPARENTED: &str = "Window was not reparented";

/// Fail unless every window still sits directly on the root
pub fn assert_unparented(windows: &[&SyntheticWindow]) -> Result<(), TestFailure> {
    for window in windows {
        if let Some(parent) = inspect::parent(window)? {
            tracing::debug!(window = %window.id(), parent = %parent, "unexpected parent");
            return Err(TestFailure::assertion(PARENT_AT_START));
        }
    }
    Ok(())
}

/// Wait for every window to get a parent; returns the parents in order
///
/// All windows share the one `policy.timeout`.
pub fn assert_reparented(
    windows: &[&SyntheticWindow],
    policy: &PollPolicy,
) -> Result<Vec<WindowId>, TestFailure> {
    let parents = policy.poll(|| -> Result<Option<Vec<WindowId>>, HarnessError> {
        let mut parents = Vec::with_capacity(windows.len());
        for window in windows {
            match inspect::parent(window)? {
                Some(parent) => parents.push(parent),
                None => return Ok(None),
            }
        }
        Ok(Some(parents))
    })?;
    parents.ok_or_else(|| TestFailure::assertion(NOT_REPARENTED))
}

/// Fail if two windows ended up in the same frame
pub fn assert_distinct_parents(parents: &[WindowId]) -> Result<(), TestFailure> {
    for (i, parent) in parents.iter().enumerate() {
        if parents[..i].contains(parent) {
            return Err(TestFailure::assertion(format!(
                "Windows share the frame {}",
                parent
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::backend::HeadlessOptions;
    use crate::client::make_window;
    use crate::session::start_headless_session;

    fn quick() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(30))
            .with_intervals(Duration::from_millis(2), Duration::from_millis(10))
    }

    #[test]
    fn fresh_windows_are_unparented() {
        let session = start_headless_session(HeadlessOptions::default());
        let a = make_window(&session).unwrap();
        let b = make_window(&session).unwrap();
        assert!(assert_unparented(&[&a, &b]).is_ok());
    }

    #[test]
    fn polluted_windows_fail_with_parent_message() {
        let session = start_headless_session(HeadlessOptions { prepolluted: true });
        let window = make_window(&session).unwrap();
        match assert_unparented(&[&window]) {
            Err(TestFailure::Assertion(message)) => assert_eq!(message, PARENT_AT_START),
            other => panic!("expected assertion failure, got {:?}", other),
        }
    }

    #[test]
    fn unframed_window_fails_with_reparent_message() {
        let session = start_headless_session(HeadlessOptions::default());
        let window = make_window(&session).unwrap();
        match assert_reparented(&[&window], &quick()) {
            Err(TestFailure::Assertion(message)) => assert_eq!(message, NOT_REPARENTED),
            other => panic!("expected assertion failure, got {:?}", other),
        }
    }

    #[test]
    fn unframed_windows_share_one_timeout() {
        let session = start_headless_session(HeadlessOptions::default());
        let windows: Vec<_> = (0..4).map(|_| make_window(&session).unwrap()).collect();
        let refs: Vec<_> = windows.iter().collect();
        let policy = PollPolicy::new(Duration::from_millis(200))
            .with_intervals(Duration::from_millis(2), Duration::from_millis(10));

        let start = Instant::now();
        assert!(assert_reparented(&refs, &policy).is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
    }

    #[test]
    fn framed_windows_report_their_parents() {
        let session = start_headless_session(HeadlessOptions::default());
        let display = session.headless_display().unwrap();
        let a = make_window(&session).unwrap();
        let b = make_window(&session).unwrap();
        let framed = display.frame_clients().unwrap();

        let parents = assert_reparented(&[&a, &b], &quick()).unwrap();
        assert_eq!(parents, framed.iter().map(|(_, frame)| *frame).collect::<Vec<_>>());
        assert!(assert_distinct_parents(&parents).is_ok());
    }

    #[test]
    fn shared_frame_is_reported() {
        let frame = WindowId(0x400001);
        assert!(assert_distinct_parents(&[frame, WindowId(0x400002), frame]).is_err());
    }

    #[test]
    fn dead_session_is_a_harness_failure() {
        let session = start_headless_session(HeadlessOptions::default());
        let window = make_window(&session).unwrap();
        session.stop().unwrap();
        assert!(matches!(assert_unparented(&[&window]), Err(TestFailure::Harness(_))));
    }
}
