//! Synthetic client windows

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::backend::{Geometry, WindowId, WindowSystem};
use crate::error::HarnessError;
use crate::session::{Session, SessionShared};

/// A plain top-level window created by the harness
///
/// Holds only a weak reference to its session: a window never keeps a
/// display alive, and once the session is gone every query on the window
/// fails with [`HarnessError::Inspection`].
pub struct SyntheticWindow {
    id: WindowId,
    session: Weak<SessionShared>,
    created: Instant,
}

impl SyntheticWindow {
    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Display of the owning session, if it is still up
    pub(crate) fn display(&self, operation: &'static str) -> Result<Arc<dyn WindowSystem>, HarnessError> {
        let session = self.session.upgrade().ok_or(HarnessError::Inspection(self.id))?;
        session.display(operation).map_err(|e| {
            tracing::debug!(window = %self.id, error = %e, "window outlived its session");
            HarnessError::Inspection(self.id)
        })
    }

    /// Destroy the window
    pub fn close(self) -> Result<(), HarnessError> {
        let display = self.display("close")?;
        display.destroy_window(self.id)?;
        tracing::debug!(window = %self.id, "destroyed synthetic window");
        Ok(())
    }
}

impl fmt::Debug for SyntheticWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticWindow")
            .field("id", &self.id)
            .field("alive", &(self.session.strong_count() > 0))
            .finish()
    }
}

/// Create a mapped 300x300 window at (0,0) on the session's root
///
/// Returns once the server has processed the map request.
pub fn make_window(session: &Session) -> Result<SyntheticWindow, HarnessError> {
    make_window_with(session, Geometry::default())
}

/// Like [`make_window`] with explicit geometry
pub fn make_window_with(session: &Session, geometry: Geometry) -> Result<SyntheticWindow, HarnessError> {
    let display = session.display("make_window")?;
    let id = display.create_window(geometry)?;
    tracing::debug!(window = %id, session = %session.id(), "created synthetic window");
    Ok(SyntheticWindow {
        id,
        session: session.downgrade(),
        created: Instant::now(),
    })
}
