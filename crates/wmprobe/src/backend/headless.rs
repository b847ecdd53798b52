//! In-memory display for testing the harness without an X server
//!
//! [`HeadlessDisplay`] keeps a window tree with the same observable rules as
//! X11: new windows are children of the root, a manager owns the screen
//! through a selection, and frames are ordinary windows that clients get
//! reparented into. [`SimulatedManager`] plays the window manager under test
//! on a background thread, so readiness and reparenting happen
//! asynchronously just like with a real manager process.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{Geometry, ReadinessProbe, WindowId, WindowSystem};
use crate::error::HarnessError;
use crate::manager::ManagerInstance;
use crate::protocol::ManagerQuery;

const ROOT_WINDOW: u32 = 0x100;
const CLIENT_ID_BASE: u32 = 0x20_0000;
const MANAGER_ID_BASE: u32 = 0x40_0000;

static NEXT_DISPLAY: AtomicU64 = AtomicU64::new(0);

/// Knobs for a headless display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessOptions {
    /// Frame every client window as soon as it is created, as if a stale
    /// manager were still attached. Used to check that tests notice a
    /// polluted display.
    pub prepolluted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Client,
    Frame,
    Support,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: WindowId,
    mapped: bool,
    properties: HashMap<String, Vec<u8>>,
}

impl Node {
    fn new(kind: NodeKind, parent: WindowId) -> Self {
        Self {
            kind,
            parent,
            mapped: true,
            properties: HashMap::new(),
        }
    }
}

struct Tree {
    windows: HashMap<WindowId, Node>,
    next_client: u32,
    next_manager: u32,
    selection_owner: Option<WindowId>,
    supporting_wm: Option<WindowId>,
    closed: bool,
}

impl Tree {
    fn allocate(&mut self, kind: NodeKind) -> WindowId {
        let id = match kind {
            NodeKind::Client => {
                self.next_client += 1;
                CLIENT_ID_BASE + self.next_client
            }
            NodeKind::Frame | NodeKind::Support => {
                self.next_manager += 1;
                MANAGER_ID_BASE + self.next_manager
            }
        };
        WindowId(id)
    }

    fn node(&self, window: WindowId) -> Result<&Node, HarnessError> {
        self.windows.get(&window).ok_or(HarnessError::Inspection(window))
    }

    fn node_mut(&mut self, window: WindowId) -> Result<&mut Node, HarnessError> {
        self.windows.get_mut(&window).ok_or(HarnessError::Inspection(window))
    }

    fn unmanaged(&self, root: WindowId) -> Vec<WindowId> {
        let mut clients: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, node)| node.kind == NodeKind::Client && node.mapped && node.parent == root)
            .map(|(id, _)| *id)
            .collect();
        clients.sort();
        clients
    }
}

/// An in-memory X-like display
pub struct HeadlessDisplay {
    name: String,
    options: HeadlessOptions,
    tree: Mutex<Tree>,
}

impl HeadlessDisplay {
    pub fn new(options: HeadlessOptions) -> Self {
        let number = NEXT_DISPLAY.fetch_add(1, Ordering::Relaxed);
        Self {
            name: format!("headless-{}", number),
            options,
            tree: Mutex::new(Tree {
                windows: HashMap::new(),
                next_client: 0,
                next_manager: 0,
                selection_owner: None,
                supporting_wm: None,
                closed: false,
            }),
        }
    }

    fn tree(&self) -> Result<MutexGuard<'_, Tree>, HarnessError> {
        let tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
        if tree.closed {
            return Err(HarnessError::Session(format!("{} has been shut down", self.name)));
        }
        Ok(tree)
    }

    /// Destroy every window and refuse further requests
    pub fn shutdown(&self) {
        let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
        tree.windows.clear();
        tree.selection_owner = None;
        tree.supporting_wm = None;
        tree.closed = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.tree.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Number of live windows, frames included (the root is not counted)
    pub fn window_count(&self) -> usize {
        self.tree.lock().unwrap_or_else(|e| e.into_inner()).windows.len()
    }

    /// Move `window` under `parent`
    pub fn reparent(&self, window: WindowId, parent: WindowId) -> Result<(), HarnessError> {
        let mut tree = self.tree()?;
        if parent != self.root() {
            tree.node(parent)?;
        }
        tree.node_mut(window)?.parent = parent;
        Ok(())
    }

    /// Create an empty frame on the root
    pub fn create_frame(&self) -> Result<WindowId, HarnessError> {
        let mut tree = self.tree()?;
        let frame = tree.allocate(NodeKind::Frame);
        tree.windows.insert(frame, Node::new(NodeKind::Frame, self.root()));
        Ok(frame)
    }

    /// Mapped client windows that sit directly on the root
    pub fn unmanaged_clients(&self) -> Result<Vec<WindowId>, HarnessError> {
        Ok(self.tree()?.unmanaged(self.root()))
    }

    /// Take over the screen: create a support window, own the manager
    /// selection and advertise it on the root
    pub fn become_manager(&self) -> Result<WindowId, HarnessError> {
        let mut tree = self.tree()?;
        if let Some(owner) = tree.selection_owner {
            return Err(HarnessError::Launch(format!(
                "screen is already managed by {}",
                owner
            )));
        }
        let support = tree.allocate(NodeKind::Support);
        let mut node = Node::new(NodeKind::Support, self.root());
        node.mapped = false;
        tree.windows.insert(support, node);
        tree.selection_owner = Some(support);
        tree.supporting_wm = Some(support);
        Ok(support)
    }

    /// Give up the screen: clients return to the root and frames go away
    pub fn resign_manager(&self, owner: WindowId) -> Result<(), HarnessError> {
        let mut tree = self.tree()?;
        let root = self.root();

        let frames: Vec<WindowId> = tree
            .windows
            .iter()
            .filter(|(_, node)| node.kind == NodeKind::Frame)
            .map(|(id, _)| *id)
            .collect();

        for node in tree.windows.values_mut() {
            if node.kind == NodeKind::Client && frames.contains(&node.parent) {
                node.parent = root;
            }
        }
        for frame in frames {
            tree.windows.remove(&frame);
        }

        tree.windows.remove(&owner);
        if tree.selection_owner == Some(owner) {
            tree.selection_owner = None;
        }
        if tree.supporting_wm == Some(owner) {
            tree.supporting_wm = None;
        }
        Ok(())
    }

    /// Put every unmanaged client into a fresh frame
    ///
    /// Done under one lock, so a client destroyed concurrently is either
    /// framed before it goes or never seen.
    pub fn frame_clients(&self) -> Result<Vec<(WindowId, WindowId)>, HarnessError> {
        let mut tree = self.tree()?;
        let root = self.root();
        let mut framed = Vec::new();
        for client in tree.unmanaged(root) {
            let frame = tree.allocate(NodeKind::Frame);
            tree.windows.insert(frame, Node::new(NodeKind::Frame, root));
            tree.node_mut(client)?.parent = frame;
            framed.push((client, frame));
        }
        Ok(framed)
    }

    /// Answer pending manager queries found in `property` on any window
    pub fn answer_queries(&self, property: &str, responder: &Responder) -> Result<usize, HarnessError> {
        let mut tree = self.tree()?;
        let mut answered = 0;
        for node in tree.windows.values_mut() {
            let Some(raw) = node.properties.get(property) else {
                continue;
            };
            let Some(query) = ManagerQuery::decode(raw) else {
                continue;
            };
            if let Some(result) = responder(query.kind, &query.details) {
                node.properties.insert(property.to_string(), query.answer(&result));
                answered += 1;
            }
        }
        Ok(answered)
    }
}

impl fmt::Debug for HeadlessDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessDisplay")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

impl WindowSystem for HeadlessDisplay {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> WindowId {
        WindowId(ROOT_WINDOW)
    }

    fn create_window(&self, _geometry: Geometry) -> Result<WindowId, HarnessError> {
        let mut tree = self.tree()?;
        let window = tree.allocate(NodeKind::Client);
        tree.windows.insert(window, Node::new(NodeKind::Client, self.root()));

        if self.options.prepolluted {
            let frame = tree.allocate(NodeKind::Frame);
            tree.windows.insert(frame, Node::new(NodeKind::Frame, self.root()));
            tree.node_mut(window)?.parent = frame;
        }
        Ok(window)
    }

    fn destroy_window(&self, window: WindowId) -> Result<(), HarnessError> {
        let mut tree = self.tree()?;
        tree.node(window)?;
        tree.windows.remove(&window);
        Ok(())
    }

    fn query_parent(&self, window: WindowId) -> Result<Option<WindowId>, HarnessError> {
        let tree = self.tree()?;
        let parent = tree.node(window)?.parent;
        Ok((parent != self.root()).then_some(parent))
    }

    fn manager_present(&self, probe: ReadinessProbe) -> Result<bool, HarnessError> {
        let tree = self.tree()?;
        Ok(match probe {
            ReadinessProbe::Selection => tree.selection_owner.is_some(),
            ReadinessProbe::SupportingWmCheck => tree.supporting_wm.is_some(),
        })
    }

    fn set_text_property(
        &self,
        window: WindowId,
        property: &str,
        value: &[u8],
    ) -> Result<(), HarnessError> {
        let mut tree = self.tree()?;
        tree.node_mut(window)?
            .properties
            .insert(property.to_string(), value.to_vec());
        Ok(())
    }

    fn text_property(&self, window: WindowId, property: &str) -> Result<Option<Vec<u8>>, HarnessError> {
        let tree = self.tree()?;
        Ok(tree.node(window)?.properties.get(property).cloned())
    }
}

/// Answers manager queries: `(kind, details) -> Some(result)`
pub type Responder = dyn Fn(char, &str) -> Option<String> + Send + Sync;

/// Behaviour of the stand-in window manager for headless sessions
#[derive(Clone)]
pub struct SimulatedManager {
    /// Delay before claiming the screen; `None` never becomes ready
    pub ready_after: Option<Duration>,
    /// Whether clients get framed once ready
    pub reparent: bool,
    /// Simulated crash this long after launch
    pub exit_after: Option<Duration>,
    /// Event loop period
    pub tick: Duration,
    query_property: String,
    responder: Option<Arc<Responder>>,
    launches: Arc<AtomicUsize>,
}

impl SimulatedManager {
    /// A well-behaved manager that takes over shortly after launch
    pub fn new() -> Self {
        Self {
            ready_after: Some(Duration::from_millis(20)),
            reparent: true,
            exit_after: None,
            tick: Duration::from_millis(5),
            query_property: String::new(),
            responder: None,
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn never_ready() -> Self {
        Self {
            ready_after: None,
            ..Self::new()
        }
    }

    pub fn without_reparenting() -> Self {
        Self {
            reparent: false,
            ..Self::new()
        }
    }

    pub fn crashing_after(delay: Duration) -> Self {
        Self {
            exit_after: Some(delay),
            ..Self::new()
        }
    }

    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.ready_after = Some(delay);
        self
    }

    /// Answer queries written to `property` with `responder`
    pub fn with_responder<F>(mut self, property: &str, responder: F) -> Self
    where
        F: Fn(char, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.query_property = property.to_string();
        self.responder = Some(Arc::new(responder));
        self
    }

    /// How many times this manager (or a clone of it) has been launched
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn launch(&self, display: Arc<HeadlessDisplay>) -> Result<Box<dyn ManagerInstance>, HarnessError> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let behaviour = self.clone();

        let thread = thread::Builder::new()
            .name("simulated-wm".to_string())
            .spawn({
                let stop = stop.clone();
                let exited = exited.clone();
                move || {
                    if let Err(e) = behaviour.event_loop(&display, &stop) {
                        tracing::debug!(error = %e, "simulated manager lost its display");
                    }
                    if !stop.load(Ordering::SeqCst) {
                        exited.store(true, Ordering::SeqCst);
                    }
                }
            })?;

        Ok(Box::new(SimulatedInstance {
            stop,
            exited,
            thread: Some(thread),
        }))
    }

    fn event_loop(&self, display: &HeadlessDisplay, stop: &AtomicBool) -> Result<(), HarnessError> {
        let mut owner = None;
        let result = self.manage(display, stop, &mut owner);

        // Like the X server after a manager disconnects: save-set clients
        // go back to the root and the selection is released.
        let resigned = match owner {
            Some(owner) if !display.is_shut_down() => display.resign_manager(owner),
            _ => Ok(()),
        };
        result.and(resigned)
    }

    fn manage(
        &self,
        display: &HeadlessDisplay,
        stop: &AtomicBool,
        owner: &mut Option<WindowId>,
    ) -> Result<(), HarnessError> {
        let started = Instant::now();

        while !stop.load(Ordering::SeqCst) {
            let elapsed = started.elapsed();
            if self.exit_after.is_some_and(|limit| elapsed >= limit) {
                tracing::debug!("simulated manager crashing");
                break;
            }

            if owner.is_none() && self.ready_after.is_some_and(|delay| elapsed >= delay) {
                let support = display.become_manager()?;
                tracing::debug!(support = %support, "simulated manager ready");
                *owner = Some(support);
            }

            if owner.is_some() {
                if self.reparent {
                    for (client, frame) in display.frame_clients()? {
                        tracing::debug!(client = %client, frame = %frame, "framed client");
                    }
                }
                if let Some(responder) = &self.responder {
                    display.answer_queries(&self.query_property, responder.as_ref())?;
                }
            }

            thread::sleep(self.tick);
        }
        Ok(())
    }
}

impl Default for SimulatedManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedManager")
            .field("ready_after", &self.ready_after)
            .field("reparent", &self.reparent)
            .field("exit_after", &self.exit_after)
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

struct SimulatedInstance {
    stop: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ManagerInstance for SimulatedInstance {
    fn id(&self) -> Option<u32> {
        None
    }

    fn poll_exit(&mut self) -> Result<Option<String>, HarnessError> {
        if self.exited.load(Ordering::SeqCst) {
            Ok(Some("simulated manager exited".to_string()))
        } else {
            Ok(None)
        }
    }

    fn terminate(&mut self, _grace: Duration) -> Result<(), HarnessError> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("simulated manager thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for SimulatedInstance {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> HeadlessDisplay {
        HeadlessDisplay::new(HeadlessOptions::default())
    }

    #[test]
    fn new_windows_sit_on_the_root() {
        let display = display();
        let window = display.create_window(Geometry::default()).unwrap();
        assert_eq!(display.query_parent(window).unwrap(), None);
        assert_eq!(display.unmanaged_clients().unwrap(), vec![window]);
    }

    #[test]
    fn prepolluted_windows_start_framed() {
        let display = HeadlessDisplay::new(HeadlessOptions { prepolluted: true });
        let window = display.create_window(Geometry::default()).unwrap();
        assert!(display.query_parent(window).unwrap().is_some());
    }

    #[test]
    fn frame_clients_reparents_each_client_once() {
        let display = display();
        let a = display.create_window(Geometry::default()).unwrap();
        let b = display.create_window(Geometry::default()).unwrap();

        let framed = display.frame_clients().unwrap();
        assert_eq!(framed.len(), 2);
        assert_ne!(display.query_parent(a).unwrap(), display.query_parent(b).unwrap());

        // Already framed clients are left alone
        assert!(display.frame_clients().unwrap().is_empty());
    }

    #[test]
    fn resigning_returns_clients_to_root() {
        let display = display();
        let window = display.create_window(Geometry::default()).unwrap();
        let owner = display.become_manager().unwrap();
        display.frame_clients().unwrap();
        assert!(display.manager_present(ReadinessProbe::Selection).unwrap());

        display.resign_manager(owner).unwrap();

        assert_eq!(display.query_parent(window).unwrap(), None);
        assert!(!display.manager_present(ReadinessProbe::Selection).unwrap());
        assert!(!display.manager_present(ReadinessProbe::SupportingWmCheck).unwrap());
        assert_eq!(display.window_count(), 1);
    }

    #[test]
    fn second_manager_is_refused() {
        let display = display();
        display.become_manager().unwrap();
        assert!(matches!(display.become_manager(), Err(HarnessError::Launch(_))));
    }

    #[test]
    fn destroyed_window_fails_inspection() {
        let display = display();
        let window = display.create_window(Geometry::default()).unwrap();
        display.destroy_window(window).unwrap();
        assert!(matches!(
            display.query_parent(window),
            Err(HarnessError::Inspection(w)) if w == window
        ));
    }

    #[test]
    fn shutdown_refuses_requests() {
        let display = display();
        display.create_window(Geometry::default()).unwrap();
        display.shutdown();
        assert!(display.is_shut_down());
        assert_eq!(display.window_count(), 0);
        assert!(matches!(
            display.create_window(Geometry::default()),
            Err(HarnessError::Session(_))
        ));
    }

    #[test]
    fn answer_queries_rewrites_matching_property() {
        let display = display();
        let window = display.create_window(Geometry::default()).unwrap();
        display.set_text_property(window, "_TEST", b"C?theme").unwrap();

        let responder: Box<Responder> = Box::new(|kind: char, details: &str| {
            (kind == 'C').then(|| format!("{}-value", details))
        });
        assert_eq!(display.answer_queries("_TEST", &*responder).unwrap(), 1);
        assert_eq!(
            display.text_property(window, "_TEST").unwrap(),
            Some(b"C=theme-value".to_vec())
        );
    }

    #[test]
    fn window_ids_do_not_collide_between_clients_and_frames() {
        let display = display();
        let client = display.create_window(Geometry::default()).unwrap();
        let frame = display.create_frame().unwrap();
        assert_ne!(client, frame);
        assert!(client.0 >= CLIENT_ID_BASE && client.0 < MANAGER_ID_BASE);
        assert!(frame.0 > MANAGER_ID_BASE);
    }
}
