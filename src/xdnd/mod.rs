//! XDND drag'n'drop engine
//!
//! [`XdndState`] implements both sides of the XDND protocol (version 5) for the windows of one
//! process:
//!
//! - as a **drag source**, it resolves the window under the pointer (following `XdndProxy`
//!   indirection and input shapes), negotiates with it through
//!   `XdndEnter`/`XdndPosition`/`XdndStatus`/`XdndLeave`/`XdndDrop`/`XdndFinished`, keeps track of
//!   drops waiting for their `XdndFinished` and serves the dragged data through the
//!   `XdndSelection`.
//! - as a **drop target**, it answers the messages of other drag sources on behalf of the
//!   windows registered with [`XdndState::enable_window`], asking the application through
//!   [`XdndHandler`] whether drops are acceptable, and fetches dropped data on demand.
//!
//! Drags between windows of the same process never go through the window system: messages to
//! a local window are handled synchronously, with the same state transitions a remote peer
//! would cause.
//!
//! ## Usage
//!
//! The engine is driven by the embedding event loop:
//!
//! - window-system events are forwarded through [`XdndState::handle_event`],
//! - pointer motion during a drag through [`XdndState::pointer_motion`], the button release
//!   through [`XdndState::drop_drag`] followed by [`XdndState::end_drag`],
//! - timers armed through the [`EngineTimer`] through [`XdndState::handle_timeout`].
//!
//! ```ignore
//! # use std::sync::Arc;
//! # use xdnd_engine::backend::{test::TestWindowSystem, X11Window};
//! # use xdnd_engine::xdnd::*;
//! # struct App;
//! # impl XdndHandler for App {
//! #     fn drag_motion(&mut self, _: X11Window, _: &DragMotion<'_>) -> DragResponse { DragResponse::refuse() }
//! #     fn drop_performed(&mut self, _: X11Window, _: &DragMotion<'_>) -> DropResponse { DropResponse::refuse() }
//! #     fn drag_left(&mut self, _: X11Window) {}
//! #     fn data_received(&mut self, _: TransferId, _: &str, _: Option<Vec<u8>>) {}
//! # }
//! # let backend = TestWindowSystem::new();
//! # let timer = Box::new(xdnd_engine::backend::test::TestTimer::new());
//! # let window: X11Window = 0;
//! let mut app = App;
//! let mut xdnd = XdndState::new(backend, XdndConfig::default(), timer).unwrap();
//! xdnd.enable_window(window, WindowKind::Normal).unwrap();
//!
//! let data = DragData::new().with("text/plain", b"hello".to_vec());
//! xdnd.start_drag(&mut app, window, Arc::new(data), DndActions::COPY | DndActions::MOVE, DndAction::None)
//!     .unwrap();
//! ```

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use tracing::{debug, trace, warn};

use crate::backend::{
    BackendError, PropertyNotify, SelectionNotify, SelectionRequest, Timestamp, WindowRole, WindowSystem,
    X11Window,
};
use crate::utils::{Clock, Local, Monotonic, Point, Rectangle, Time};

mod action;
mod atoms;
mod ledger;
mod message;
pub mod mime;
pub mod resolver;
mod source;
mod target;
mod timer;
mod transfer;

pub use self::action::{default_action, Buttons, DndAction, DndActions, Modifiers};
pub use self::atoms::Atoms;
pub use self::message::XdndMessage;
pub use self::source::{DataSource, DragData, DragId, DragSession};
pub use self::timer::{CalloopTimer, EngineTimer, TimerKind, XdndTimeoutHandler};
pub use self::transfer::TransferId;

use self::ledger::TransactionLedger;
use self::source::ActiveDrag;
use self::target::ActiveOffer;
use self::transfer::{IncomingTransfer, OutgoingTransfer};

/// Predicate marking windows that never accept drops
pub type RejectingWindowPredicate = Arc<dyn Fn(X11Window) -> bool + Send + Sync>;

/// Configuration of the engine
#[derive(Clone)]
pub struct XdndConfig {
    /// Highest protocol version advertised and accepted
    pub version: u32,
    /// Time after which a drop that never finished is forgotten
    pub transaction_timeout: Duration,
    /// Maximum time between two steps of a data transfer
    pub transfer_timeout: Duration,
    /// Maximum number of types read from an `XdndTypeList`
    pub max_type_list: u32,
    /// Recursion budget when searching the window under the pointer
    pub max_resolve_depth: u32,
    /// Data larger than this is sent incrementally, in chunks of this size
    pub incr_chunk_size: usize,
    /// Windows that always reject drops, no matter what they answer
    ///
    /// Some desktop shells keep an invisible window around that claims to accept everything.
    pub always_rejecting: Option<RejectingWindowPredicate>,
}

impl fmt::Debug for XdndConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XdndConfig")
            .field("version", &self.version)
            .field("transaction_timeout", &self.transaction_timeout)
            .field("transfer_timeout", &self.transfer_timeout)
            .field("max_type_list", &self.max_type_list)
            .field("max_resolve_depth", &self.max_resolve_depth)
            .field("incr_chunk_size", &self.incr_chunk_size)
            .field("always_rejecting", &self.always_rejecting.is_some())
            .finish()
    }
}

impl Default for XdndConfig {
    fn default() -> Self {
        XdndConfig {
            version: 5,
            transaction_timeout: Duration::from_millis(5000),
            transfer_timeout: Duration::from_millis(5000),
            max_type_list: 100,
            max_resolve_depth: 6,
            incr_chunk_size: 64 * 1024,
            always_rejecting: None,
        }
    }
}

impl XdndConfig {
    fn rejects(&self, window: X11Window) -> bool {
        self.always_rejecting
            .as_ref()
            .is_some_and(|predicate| predicate(window))
    }
}

/// Errors of the engine's setup functions
#[derive(Debug, thiserror::Error)]
pub enum XdndError {
    /// A drag is already in progress.
    #[error("A drag is already in progress")]
    DragInProgress,
    /// The monotonic clock is not available.
    #[error("Failed to read the monotonic clock")]
    Clock(#[from] std::io::Error),
    /// The window system failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Kind of a window registered with [`XdndState::enable_window`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// An application window
    Normal,
    /// A desktop window, receiving drops through a proxy window
    ///
    /// Desktop windows never take part in drags within the process.
    Desktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LocalWindow {
    kind: WindowKind,
    root: X11Window,
}

/// Window-system events the engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdndEvent {
    /// A client message, possibly one of the XDND messages
    ClientMessage(crate::backend::ClientMessage),
    /// Someone asks for the data of a selection
    SelectionRequest(SelectionRequest),
    /// A selection conversion finished
    SelectionNotify(SelectionNotify),
    /// A property changed
    PropertyNotify(PropertyNotify),
}

/// A drag over a local window, as presented to the application
#[derive(Debug, Clone, Copy)]
pub struct DragMotion<'a> {
    /// Pointer position, relative to the window
    pub point: Point<i32, Local>,
    /// Offered mime types
    pub mime_types: &'a [String],
    /// Actions the source allows
    pub supported: DndActions,
    /// Action the source asks for
    pub proposed: DndAction,
    /// Pressed pointer buttons
    pub buttons: Buttons,
    /// Held keyboard modifiers
    pub modifiers: Modifiers,
    /// Whether the drag originates from this process
    pub local: bool,
}

/// Answer of the application to a drag motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragResponse {
    /// Whether a drop would be accepted
    pub accepted: bool,
    /// Action that would be performed
    pub action: DndAction,
    /// Area of the window inside which the answer stays the same
    ///
    /// `None` if every motion should be reported.
    pub answer_rect: Option<Rectangle<i32, Local>>,
}

impl DragResponse {
    /// Accept drops with `action`
    pub fn accept(action: DndAction) -> DragResponse {
        DragResponse {
            accepted: true,
            action,
            answer_rect: None,
        }
    }

    /// Refuse drops
    pub fn refuse() -> DragResponse {
        DragResponse {
            accepted: false,
            action: DndAction::None,
            answer_rect: None,
        }
    }

    /// Keep this answer while the pointer stays inside `rect`
    pub fn within(mut self, rect: Rectangle<i32, Local>) -> DragResponse {
        self.answer_rect = Some(rect);
        self
    }
}

/// Answer of the application to a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropResponse {
    /// Whether the drop was accepted
    pub accepted: bool,
    /// Action that was performed
    pub action: DndAction,
}

impl DropResponse {
    /// The drop was accepted and `action` performed
    pub fn accept(action: DndAction) -> DropResponse {
        DropResponse { accepted: true, action }
    }

    /// The drop was refused
    pub fn refuse() -> DropResponse {
        DropResponse {
            accepted: false,
            action: DndAction::None,
        }
    }
}

/// How a drop sent by this process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// The target finished processing the drop
    Finished {
        /// Whether the target accepted the drop
        accepted: bool,
        /// Action the target performed
        action: DndAction,
    },
    /// The target never answered within the configured timeout
    Expired,
}

/// Application side of the engine
pub trait XdndHandler {
    /// A drag moved over `window`, should a drop be accepted there?
    fn drag_motion(&mut self, window: X11Window, motion: &DragMotion<'_>) -> DragResponse;

    /// A drag was dropped on `window`
    ///
    /// The data can be fetched with [`XdndState::request_data`] afterwards.
    fn drop_performed(&mut self, window: X11Window, motion: &DragMotion<'_>) -> DropResponse;

    /// A drag left `window` without dropping
    fn drag_left(&mut self, window: X11Window);

    /// Feedback for the drag source: the action the current target would perform
    fn update_cursor(&mut self, action: DndAction) {
        let _ = action;
    }

    /// A drop of the drag `drag` ended, its data is no longer served
    fn drop_finished(&mut self, drag: DragId, outcome: DropOutcome) {
        let _ = (drag, outcome);
    }

    /// Data requested through [`XdndState::request_data`] arrived, `None` if it is unavailable
    fn data_received(&mut self, transfer: TransferId, mime_type: &str, data: Option<Vec<u8>>);
}

/// State of the XDND engine of one window-system connection
pub struct XdndState<B: WindowSystem> {
    backend: B,
    config: XdndConfig,
    clock: Clock<Monotonic>,
    timer: Box<dyn EngineTimer>,
    atoms: Atoms,
    selection_window: X11Window,
    windows: HashMap<X11Window, LocalWindow>,
    desktop_proxy: Option<(X11Window, X11Window)>,
    drag: Option<ActiveDrag>,
    offer: Option<ActiveOffer>,
    ledger: TransactionLedger,
    incoming: Vec<IncomingTransfer>,
    outgoing: Vec<OutgoingTransfer>,
    transfer_properties: Vec<crate::backend::Atom>,
    next_id: u64,
}

impl<B: WindowSystem> fmt::Debug for XdndState<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XdndState")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("selection_window", &self.selection_window)
            .field("windows", &self.windows)
            .field("drag", &self.drag)
            .field("offer", &self.offer)
            .field("ledger", &self.ledger)
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .finish_non_exhaustive()
    }
}

impl<B: WindowSystem> XdndState<B> {
    /// Set up the engine
    ///
    /// Creates the window owning the `XdndSelection` during drags on the first desktop.
    pub fn new(mut backend: B, config: XdndConfig, timer: Box<dyn EngineTimer>) -> Result<Self, XdndError> {
        let clock = Clock::new()?;
        let atoms = Atoms::new(&mut backend)?;
        let desktop = backend.desktop_at(Point::default())?;
        let selection_window = backend.create_window(WindowRole::Selection, desktop.root)?;
        backend.watch_properties(selection_window)?;
        backend.flush()?;
        debug!(selection_window, "XDND engine ready");

        Ok(XdndState {
            ledger: TransactionLedger::new(config.transaction_timeout),
            backend,
            config,
            clock,
            timer,
            atoms,
            selection_window,
            windows: HashMap::new(),
            desktop_proxy: None,
            drag: None,
            offer: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            transfer_properties: Vec::new(),
            next_id: 1,
        })
    }

    /// The window-system collaborator
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the window-system collaborator
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The interned atoms
    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    /// The configuration
    pub fn config(&self) -> &XdndConfig {
        &self.config
    }

    /// Window owning the `XdndSelection`, identifying this process as a drag source
    pub fn selection_window(&self) -> X11Window {
        self.selection_window
    }

    /// Whether a drag started by this process is in progress
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Number of drops waiting for the target to finish
    pub fn pending_drops(&self) -> usize {
        self.ledger.len()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Announce XDND support for a local window
    ///
    /// Normal windows get the `XdndAware` property. A desktop window gets a proxy window
    /// receiving messages on its behalf, unless it already has a working proxy.
    pub fn enable_window(&mut self, window: X11Window, kind: WindowKind) -> Result<(), XdndError> {
        let mut root = window;
        while let Some(parent) = self.backend.parent(root)? {
            root = parent;
        }

        let aware = match kind {
            WindowKind::Normal => Some(window),
            WindowKind::Desktop if self.desktop_proxy.is_some() => {
                debug!(window, "Desktop proxy already exists");
                None
            }
            WindowKind::Desktop => {
                if let Some(proxy) = resolver::get_proxy_window(&mut self.backend, &self.atoms, window)? {
                    debug!(window, proxy, "Desktop already has an XdndProxy");
                    None
                } else {
                    let proxy = self.backend.create_window(WindowRole::DesktopProxy, root)?;
                    let value = crate::backend::Property::from_u32s(self.atoms.WINDOW, &[proxy]);
                    self.backend.change_property(window, self.atoms.XdndProxy, &value)?;
                    self.backend.change_property(proxy, self.atoms.XdndProxy, &value)?;
                    self.desktop_proxy = Some((window, proxy));
                    Some(proxy)
                }
            }
        };

        if let Some(aware) = aware {
            debug!(window = aware, "Setting XdndAware");
            let value = crate::backend::Property::from_u32s(self.atoms.ATOM, &[self.config.version]);
            self.backend.change_property(aware, self.atoms.XdndAware, &value)?;
        }
        self.backend.flush()?;

        self.windows.insert(window, LocalWindow { kind, root });
        Ok(())
    }

    /// Withdraw XDND support of a local window
    pub fn disable_window(&mut self, window: X11Window) {
        let Some(local) = self.windows.remove(&window) else {
            return;
        };

        let result = match local.kind {
            WindowKind::Desktop => match self.desktop_proxy {
                Some((desktop, proxy)) if desktop == window => {
                    self.desktop_proxy = None;
                    self.backend
                        .delete_property(window, self.atoms.XdndProxy)
                        .and_then(|_| self.backend.destroy_window(proxy))
                }
                _ => Ok(()),
            },
            WindowKind::Normal => self.backend.delete_property(window, self.atoms.XdndAware),
        };
        if let Err(err) = result.and_then(|_| self.backend.flush()) {
            warn!(window, ?err, "Failed to withdraw XDND support");
        }
    }

    fn local_target(&self, window: X11Window) -> Option<X11Window> {
        self.windows
            .get(&window)
            .filter(|local| local.kind == WindowKind::Normal)
            .map(|_| window)
    }

    fn send_message(&mut self, destination: X11Window, window: X11Window, msg: XdndMessage) {
        let message = msg.encode(window, &self.atoms);
        trace!(destination, ?msg, "Sending XDND message");
        if let Err(err) = self
            .backend
            .send_client_message(destination, &message)
            .and_then(|_| self.backend.flush())
        {
            warn!(destination, ?err, "Failed to send XDND message");
        }
    }

    /// Process a window-system event, returns whether it was meant for the engine
    pub fn handle_event<H: XdndHandler>(&mut self, handler: &mut H, event: XdndEvent) -> bool {
        match event {
            XdndEvent::ClientMessage(message) => {
                let Some(msg) = XdndMessage::decode(&message, &self.atoms) else {
                    return false;
                };
                trace!(window = message.window, ?msg, "Received XDND message");
                self.handle_message(handler, message.window, msg);
                true
            }
            XdndEvent::SelectionRequest(request) => self.handle_selection_request(&request),
            XdndEvent::SelectionNotify(notify) => self.handle_selection_notify(handler, &notify),
            XdndEvent::PropertyNotify(notify) => self.handle_property_notify(handler, &notify),
        }
    }

    fn handle_message<H: XdndHandler>(&mut self, handler: &mut H, window: X11Window, msg: XdndMessage) {
        match msg {
            XdndMessage::Enter {
                source,
                version,
                has_type_list,
                types,
            } => self.handle_enter(window, source, version, has_type_list, types),
            XdndMessage::Position {
                source,
                point,
                time,
                action,
            } => self.handle_position(handler, window, source, point, time, action, None),
            XdndMessage::Leave { source } => self.handle_leave(handler, window, source),
            XdndMessage::Drop { source, time, actions } => {
                self.handle_drop(handler, window, source, time, actions, None)
            }
            XdndMessage::Status {
                target,
                accept,
                rect,
                action,
            } => {
                if window != self.selection_window {
                    debug!(window, "Received XdndStatus for foreign window, ignoring..");
                    return;
                }
                self.handle_status(handler, target, accept, rect, action)
            }
            XdndMessage::Finished { target, accept, action } => {
                if window != self.selection_window {
                    debug!(window, "Received XdndFinished for foreign window, ignoring..");
                    return;
                }
                self.handle_finished(handler, target, accept, action)
            }
        }
    }

    /// A timer armed through the [`EngineTimer`] fired
    pub fn handle_timeout<H: XdndHandler>(&mut self, handler: &mut H, kind: TimerKind) {
        let now = self.clock.now();
        self.handle_timeout_at(handler, kind, now);
    }

    fn handle_timeout_at<H: XdndHandler>(&mut self, handler: &mut H, kind: TimerKind, now: Time<Monotonic>) {
        match kind {
            TimerKind::TransactionSweep => {
                for transaction in self.ledger.sweep(now, self.timer.as_mut()) {
                    handler.drop_finished(transaction.session.id(), DropOutcome::Expired);
                }
            }
            TimerKind::TransferDeadline => self.expire_transfers(handler, now),
        }
    }

    fn timestamp(&self) -> Timestamp {
        self.backend.timestamp()
    }
}

#[cfg(test)]
mod tests;
