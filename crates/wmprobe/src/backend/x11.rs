//! X11 display access through x11rb
//!
//! One [`RustConnection`] per session. Requests that change the window tree
//! are followed by a round trip so the server has processed them before the
//! caller inspects anything.

use x11rb::connection::Connection as _;
use x11rb::errors::ReplyError;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, PropMode, WindowClass,
};
use x11rb::protocol::ErrorKind;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::{Geometry, ReadinessProbe, WindowId, WindowSystem};
use crate::error::HarnessError;

/// A connection to a running X server
pub struct X11Display {
    connection: RustConnection,
    name: String,
    screen: usize,
    root: u32,
    white_pixel: u32,
}

impl X11Display {
    /// Connect to the display called `name`
    pub fn connect(name: &str) -> Result<Self, HarnessError> {
        let (connection, screen) = RustConnection::connect(Some(name))
            .map_err(|e| HarnessError::Session(format!("cannot connect to {}: {}", name, e)))?;

        let (root, white_pixel) = {
            let setup = connection.setup();
            let info = setup.roots.get(screen).ok_or_else(|| {
                HarnessError::Session(format!("display {} has no screen {}", name, screen))
            })?;
            (info.root, info.white_pixel)
        };

        tracing::debug!(display = name, screen, root = format_args!("{:#x}", root), "connected to X server");

        Ok(Self {
            connection,
            name: name.to_string(),
            screen,
            root,
            white_pixel,
        })
    }

    /// Round trip to the server (the equivalent of XSync)
    fn sync(&self) -> Result<(), HarnessError> {
        self.connection.get_input_focus()?.reply()?;
        Ok(())
    }

    fn atom(&self, name: &str) -> Result<Atom, HarnessError> {
        Ok(self.connection.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    /// Map a "bad window" reply to an inspection error
    fn window_error(window: WindowId, error: ReplyError) -> HarnessError {
        match error {
            ReplyError::X11Error(ref e) if matches!(e.error_kind, ErrorKind::Window) => {
                HarnessError::Inspection(window)
            }
            other => other.into(),
        }
    }
}

impl WindowSystem for X11Display {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> WindowId {
        WindowId(self.root)
    }

    fn create_window(&self, geometry: Geometry) -> Result<WindowId, HarnessError> {
        let window = self.connection.generate_id()?;
        let aux = CreateWindowAux::new()
            .background_pixel(self.white_pixel)
            .event_mask(EventMask::PROPERTY_CHANGE);

        self.connection.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            self.root,
            geometry.x,
            geometry.y,
            geometry.width,
            geometry.height,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &aux,
        )?;
        self.connection.map_window(window)?;
        self.sync()?;

        Ok(WindowId(window))
    }

    fn destroy_window(&self, window: WindowId) -> Result<(), HarnessError> {
        self.connection
            .destroy_window(window.0)?
            .check()
            .map_err(|e| Self::window_error(window, e))
    }

    fn query_parent(&self, window: WindowId) -> Result<Option<WindowId>, HarnessError> {
        let reply = self
            .connection
            .query_tree(window.0)?
            .reply()
            .map_err(|e| Self::window_error(window, e))?;

        tracing::debug!(
            window = %window,
            parent = format_args!("{:#x}", reply.parent),
            root = format_args!("{:#x}", reply.root),
            "queried parent"
        );

        if reply.parent == reply.root || reply.parent == x11rb::NONE {
            Ok(None)
        } else {
            Ok(Some(WindowId(reply.parent)))
        }
    }

    fn manager_present(&self, probe: ReadinessProbe) -> Result<bool, HarnessError> {
        match probe {
            ReadinessProbe::Selection => {
                let selection = self.atom(&format!("WM_S{}", self.screen))?;
                let owner = self.connection.get_selection_owner(selection)?.reply()?.owner;
                Ok(owner != x11rb::NONE)
            }
            ReadinessProbe::SupportingWmCheck => {
                let check = self.atom("_NET_SUPPORTING_WM_CHECK")?;
                let reply = self
                    .connection
                    .get_property(false, self.root, check, AtomEnum::WINDOW, 0, 1)?
                    .reply()?;
                let supporting = reply.value32().and_then(|mut values| values.next());
                Ok(supporting.is_some_and(|w| w != x11rb::NONE))
            }
        }
    }

    fn set_text_property(
        &self,
        window: WindowId,
        property: &str,
        value: &[u8],
    ) -> Result<(), HarnessError> {
        let property = self.atom(property)?;
        let utf8 = self.atom("UTF8_STRING")?;
        self.connection
            .change_property8(PropMode::REPLACE, window.0, property, utf8, value)?
            .check()
            .map_err(|e| Self::window_error(window, e))?;
        Ok(())
    }

    fn text_property(&self, window: WindowId, property: &str) -> Result<Option<Vec<u8>>, HarnessError> {
        let property = self.atom(property)?;
        let reply = self
            .connection
            .get_property(false, window.0, property, AtomEnum::ANY, 0, u32::MAX / 4)?
            .reply()
            .map_err(|e| Self::window_error(window, e))?;

        if reply.type_ == x11rb::NONE {
            Ok(None)
        } else {
            Ok(Some(reply.value))
        }
    }
}
