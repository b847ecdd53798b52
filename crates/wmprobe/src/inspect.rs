//! Live window hierarchy queries
//!
//! Nothing here is cached: every call asks the display, so a test always
//! sees what the window manager has done so far.

use crate::backend::WindowId;
use crate::client::SyntheticWindow;
use crate::error::HarnessError;
use crate::poll::PollPolicy;

/// Current parent of `window`; `None` while it sits directly on the root
pub fn parent(window: &SyntheticWindow) -> Result<Option<WindowId>, HarnessError> {
    let display = window.display("parent")?;
    let parent = display.query_parent(window.id())?;
    tracing::trace!(window = %window.id(), parent = ?parent, "queried parent");
    Ok(parent)
}

/// Wait for `window` to be reparented
///
/// Returns the new parent, or `None` once the whole of `policy.timeout`
/// passed with the window still on the root.
pub fn wait_for_parent(window: &SyntheticWindow, policy: &PollPolicy) -> Result<Option<WindowId>, HarnessError> {
    let parent = policy.poll(|| parent(window))?;
    if parent.is_none() {
        tracing::debug!(window = %window.id(), timeout = ?policy.timeout, "window was not reparented");
    }
    Ok(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::backend::{HeadlessOptions, WindowSystem};
    use crate::client::make_window;
    use crate::session::start_headless_session;

    #[test]
    fn new_window_has_no_parent() {
        let session = start_headless_session(HeadlessOptions::default());
        let window = make_window(&session).unwrap();
        assert_eq!(parent(&window).unwrap(), None);
    }

    #[test]
    fn parent_reflects_live_tree() {
        let session = start_headless_session(HeadlessOptions::default());
        let display = session.headless_display().unwrap();
        let window = make_window(&session).unwrap();

        let frame = display.create_frame().unwrap();
        display.reparent(window.id(), frame).unwrap();
        assert_eq!(parent(&window).unwrap(), Some(frame));

        display.reparent(window.id(), display.root()).unwrap();
        assert_eq!(parent(&window).unwrap(), None);
    }

    #[test]
    fn destroyed_window_is_an_inspection_error() {
        let session = start_headless_session(HeadlessOptions::default());
        let display = session.headless_display().unwrap();
        let window = make_window(&session).unwrap();
        let id = window.id();

        display.destroy_window(id).unwrap();
        assert!(matches!(parent(&window), Err(HarnessError::Inspection(w)) if w == id));
    }

    #[test]
    fn torn_down_session_is_an_inspection_error() {
        let session = start_headless_session(HeadlessOptions::default());
        let window = make_window(&session).unwrap();
        session.stop().unwrap();
        assert!(matches!(parent(&window), Err(HarnessError::Inspection(_))));
    }

    #[test]
    fn wait_for_parent_gives_up_after_timeout() {
        let session = start_headless_session(HeadlessOptions::default());
        let window = make_window(&session).unwrap();
        let policy = PollPolicy::new(Duration::from_millis(50))
            .with_intervals(Duration::from_millis(2), Duration::from_millis(10));

        let start = Instant::now();
        assert_eq!(wait_for_parent(&window, &policy).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
