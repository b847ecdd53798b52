//! Window system abstraction
//!
//! The harness talks to the display only through [`WindowSystem`], so the
//! same session, client and inspection code drives either backend:
//!
//! - **X11Display**: a real X server reached through an x11rb connection.
//!   Used for actual window manager runs.
//!
//! - **HeadlessDisplay**: an in-memory window tree with a simulated window
//!   manager. Used to test the harness itself without an X server.

pub mod headless;
pub mod x11;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub use headless::{HeadlessDisplay, HeadlessOptions, SimulatedManager};
pub use x11::X11Display;

/// Identifier of a window on the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Position and size of a newly created window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 300,
            height: 300,
        }
    }
}

/// How to tell that a window manager has taken over the display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessProbe {
    /// The ICCCM `WM_S<screen>` manager selection has an owner
    #[default]
    Selection,
    /// `_NET_SUPPORTING_WM_CHECK` on the root names a window
    SupportingWmCheck,
}

/// Operations the harness needs from a display
///
/// Every call goes to the live display; implementations must not cache
/// window tree state.
pub trait WindowSystem: Send + Sync {
    /// Display name clients connect to (e.g. `:23`)
    fn name(&self) -> &str;

    /// Root window of the screen in use
    fn root(&self) -> WindowId;

    /// Create a top-level window, map it, and wait until the server has
    /// processed both requests
    fn create_window(&self, geometry: Geometry) -> Result<WindowId, HarnessError>;

    fn destroy_window(&self, window: WindowId) -> Result<(), HarnessError>;

    /// Current parent of `window`, or `None` if it is a child of the root
    fn query_parent(&self, window: WindowId) -> Result<Option<WindowId>, HarnessError>;

    /// Whether a window manager currently manages the screen
    fn manager_present(&self, probe: ReadinessProbe) -> Result<bool, HarnessError>;

    /// Replace a UTF-8 text property on `window`
    fn set_text_property(
        &self,
        window: WindowId,
        property: &str,
        value: &[u8],
    ) -> Result<(), HarnessError>;

    /// Read a property; `None` if it is not set
    fn text_property(&self, window: WindowId, property: &str) -> Result<Option<Vec<u8>>, HarnessError>;
}
