//! [`WindowSystem`] implementation on top of an [`x11rb`] connection
//!
//! The connection is shared with the rest of the application. Events read from it have to be
//! handed to [`X11rbWindowSystem::convert_event`], which keeps track of the latest server
//! timestamp and extracts the events the drag'n'drop engine consumes:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use x11rb::connection::Connection;
//! use xdnd_engine::backend::x11rb::X11rbWindowSystem;
//!
//! let (conn, _screen) = x11rb::connect(None).unwrap();
//! let conn = Arc::new(conn);
//! let mut backend = X11rbWindowSystem::new(conn.clone()).unwrap();
//! loop {
//!     let event = conn.wait_for_event().unwrap();
//!     if let Some(event) = backend.convert_event(&event) {
//!         // xdnd.handle_event(&mut app, event);
//!     }
//! }
//! ```

use std::sync::Arc;

use tracing::{debug, trace, warn};
use x11rb::{
    connection::{Connection as _, RequestConnection as _},
    errors::ReplyError,
    protocol::{
        shape::{self, ConnectionExt as _, SK},
        xproto::{
            AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConfigureWindowAux,
            ConnectionExt as _, CreateWindowAux, EventMask, GrabMode, GrabStatus, MapState, PropMode,
            Property as PropertyChange, SelectionNotifyEvent, StackMode, WindowClass,
            SELECTION_NOTIFY_EVENT,
        },
        Event,
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as _,
};

use super::{
    Atom, BackendError, ClientMessage, Desktop, PointerState, Property, PropertyNotify, PropertyState,
    SelectionNotify, SelectionRequest, ShapeKind, Timestamp, Translated, WindowGeometry, WindowRole,
    WindowSystem, X11Window, CURRENT_TIME, NONE,
};
use crate::utils::{Local, Point, Rectangle, Root};
use crate::xdnd::{Buttons, Modifiers, XdndEvent};

/// Turn X errors of window queries into "no such window"
///
/// Any queried window may be destroyed by its client at any time.
fn absent_on_error<T>(result: Result<T, ReplyError>) -> Result<Option<T>, BackendError> {
    match result {
        Ok(reply) => Ok(Some(reply)),
        Err(ReplyError::X11Error(err)) => {
            trace!(?err, "Window query failed");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// A [`WindowSystem`] backed by an x11rb [`RustConnection`]
#[derive(Debug)]
pub struct X11rbWindowSystem {
    conn: Arc<RustConnection>,
    screen: usize,
    shape: bool,
    time: Timestamp,
    foreign_grab: bool,
    grab_root: Option<X11Window>,
    wm_name: Atom,
    utf8_string: Atom,
}

impl X11rbWindowSystem {
    /// Wrap a connection
    pub fn new(conn: Arc<RustConnection>) -> Result<X11rbWindowSystem, BackendError> {
        let shape = conn.extension_information(shape::X11_EXTENSION_NAME)?.is_some();
        if !shape {
            debug!("X server lacks the shape extension, input shapes are ignored");
        }
        let wm_name = conn.intern_atom(false, b"_NET_WM_NAME")?.reply()?.atom;
        let utf8_string = conn.intern_atom(false, b"UTF8_STRING")?.reply()?.atom;

        Ok(X11rbWindowSystem {
            screen: 0,
            shape,
            time: CURRENT_TIME,
            foreign_grab: false,
            grab_root: None,
            wm_name,
            utf8_string,
            conn,
        })
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<RustConnection> {
        &self.conn
    }

    /// Tell the engine whether some other part of the application holds the pointer grab
    ///
    /// A drag started while the grab is held elsewhere does not grab the pointer itself.
    pub fn set_pointer_grabbed(&mut self, grabbed: bool) {
        self.foreign_grab = grabbed;
    }

    /// Record the timestamp of `event` and extract what the drag'n'drop engine consumes
    pub fn convert_event(&mut self, event: &Event) -> Option<XdndEvent> {
        match event {
            Event::ClientMessage(msg) => {
                if msg.format != 32 {
                    return None;
                }
                Some(XdndEvent::ClientMessage(ClientMessage {
                    window: msg.window,
                    type_: msg.type_,
                    data: msg.data.as_data32(),
                }))
            }
            Event::SelectionRequest(req) => {
                self.update_time(req.time);
                Some(XdndEvent::SelectionRequest(SelectionRequest {
                    time: req.time,
                    owner: req.owner,
                    requestor: req.requestor,
                    selection: req.selection,
                    target: req.target,
                    property: req.property,
                }))
            }
            Event::SelectionNotify(n) => {
                self.update_time(n.time);
                Some(XdndEvent::SelectionNotify(SelectionNotify {
                    time: n.time,
                    requestor: n.requestor,
                    selection: n.selection,
                    target: n.target,
                    property: n.property,
                }))
            }
            Event::PropertyNotify(n) => {
                self.update_time(n.time);
                let state = if n.state == PropertyChange::DELETE {
                    PropertyState::Deleted
                } else {
                    PropertyState::NewValue
                };
                Some(XdndEvent::PropertyNotify(PropertyNotify {
                    window: n.window,
                    atom: n.atom,
                    time: n.time,
                    state,
                }))
            }
            Event::MotionNotify(n) => {
                self.update_time(n.time);
                None
            }
            Event::ButtonPress(n) | Event::ButtonRelease(n) => {
                self.update_time(n.time);
                None
            }
            Event::KeyPress(n) | Event::KeyRelease(n) => {
                self.update_time(n.time);
                None
            }
            Event::EnterNotify(n) | Event::LeaveNotify(n) => {
                self.update_time(n.time);
                None
            }
            _ => None,
        }
    }

    fn update_time(&mut self, time: Timestamp) {
        if time != CURRENT_TIME {
            self.time = time;
        }
    }

    fn screen_root(&self, index: usize) -> X11Window {
        let roots = &self.conn.setup().roots;
        roots.get(index).or_else(|| roots.first()).map_or(NONE, |screen| screen.root)
    }
}

impl WindowSystem for X11rbWindowSystem {
    fn intern_atom(&mut self, name: &str) -> Result<Atom, BackendError> {
        Ok(self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    fn atom_name(&mut self, atom: Atom) -> Result<String, BackendError> {
        let reply = self.conn.get_atom_name(atom)?.reply()?;
        Ok(String::from_utf8_lossy(&reply.name).into_owned())
    }

    fn timestamp(&self) -> Timestamp {
        self.time
    }

    fn desktop_at(&mut self, point: Point<i32, Root>) -> Result<Desktop, BackendError> {
        let screens = self.conn.setup().roots.len();
        if screens > 1 {
            // separate screens share the coordinate space, only the pointer knows which one it is on
            for index in 0..screens {
                let root = self.screen_root(index);
                if self.conn.query_pointer(root)?.reply()?.same_screen {
                    self.screen = index;
                    return Ok(Desktop { index, root });
                }
            }
        }
        trace!(?point, screen = self.screen, "Using default screen");
        Ok(Desktop {
            index: self.screen,
            root: self.screen_root(self.screen),
        })
    }

    fn window_geometry(&mut self, window: X11Window) -> Result<Option<WindowGeometry>, BackendError> {
        let Some(geometry) = absent_on_error(self.conn.get_geometry(window)?.reply())? else {
            return Ok(None);
        };
        let Some(attributes) = absent_on_error(self.conn.get_window_attributes(window)?.reply())? else {
            return Ok(None);
        };
        Ok(Some(WindowGeometry {
            viewable: attributes.map_state == MapState::VIEWABLE,
            rect: Rectangle::from_loc_and_size(
                (geometry.x as i32, geometry.y as i32),
                (geometry.width as i32, geometry.height as i32),
            ),
        }))
    }

    fn children(&mut self, window: X11Window) -> Result<Vec<X11Window>, BackendError> {
        Ok(absent_on_error(self.conn.query_tree(window)?.reply())?
            .map(|tree| tree.children)
            .unwrap_or_default())
    }

    fn parent(&mut self, window: X11Window) -> Result<Option<X11Window>, BackendError> {
        Ok(absent_on_error(self.conn.query_tree(window)?.reply())?
            .map(|tree| tree.parent)
            .filter(|parent| *parent != NONE))
    }

    fn translate_coordinates(
        &mut self,
        src: X11Window,
        dst: X11Window,
        point: Point<i32, Local>,
    ) -> Result<Option<Translated>, BackendError> {
        let x = point.x.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let y = point.y.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let Some(reply) = absent_on_error(self.conn.translate_coordinates(src, dst, x, y)?.reply())? else {
            return Ok(None);
        };
        if !reply.same_screen {
            return Ok(None);
        }
        Ok(Some(Translated {
            point: Point::new(reply.dst_x as i32, reply.dst_y as i32),
            child: Some(reply.child).filter(|child| *child != NONE),
        }))
    }

    fn shape_rectangles(
        &mut self,
        window: X11Window,
        kind: ShapeKind,
    ) -> Result<Option<Vec<Rectangle<i32, Local>>>, BackendError> {
        if !self.shape {
            return Ok(None);
        }
        let kind = match kind {
            ShapeKind::Bounding => SK::BOUNDING,
            ShapeKind::Input => SK::INPUT,
        };
        let Some(reply) = absent_on_error(self.conn.shape_get_rectangles(window, kind)?.reply())? else {
            return Ok(Some(Vec::new()));
        };
        Ok(Some(
            reply
                .rectangles
                .into_iter()
                .map(|rect| {
                    Rectangle::from_loc_and_size(
                        (rect.x as i32, rect.y as i32),
                        (rect.width as i32, rect.height as i32),
                    )
                })
                .collect(),
        ))
    }

    fn get_property(
        &mut self,
        window: X11Window,
        property: Atom,
        type_: Option<Atom>,
        max_len: u32,
    ) -> Result<Option<Property>, BackendError> {
        let requested = type_.unwrap_or(AtomEnum::ANY.into());
        let Some(reply) = absent_on_error(
            self.conn
                .get_property(false, window, property, requested, 0, max_len)?
                .reply(),
        )?
        else {
            return Ok(None);
        };
        if reply.type_ == NONE || type_.is_some_and(|type_| type_ != reply.type_) {
            return Ok(None);
        }
        if reply.bytes_after > 0 {
            debug!(window, property, bytes_after = reply.bytes_after, "Property value truncated");
        }
        Ok(Some(Property {
            type_: reply.type_,
            format: reply.format,
            value: reply.value,
        }))
    }

    fn change_property(
        &mut self,
        window: X11Window,
        property: Atom,
        value: &Property,
    ) -> Result<(), BackendError> {
        let unit = usize::from(value.format / 8).max(1);
        let len = u32::try_from(value.value.len() / unit).unwrap_or(u32::MAX);
        self.conn.change_property(
            PropMode::REPLACE,
            window,
            property,
            value.type_,
            value.format,
            len,
            &value.value,
        )?;
        Ok(())
    }

    fn delete_property(&mut self, window: X11Window, property: Atom) -> Result<(), BackendError> {
        self.conn.delete_property(window, property)?;
        Ok(())
    }

    fn watch_properties(&mut self, window: X11Window) -> Result<(), BackendError> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )?;
        Ok(())
    }

    fn send_client_message(
        &mut self,
        destination: X11Window,
        message: &ClientMessage,
    ) -> Result<(), BackendError> {
        self.conn.send_event(
            false,
            destination,
            EventMask::NO_EVENT,
            ClientMessageEvent::new(32, message.window, message.type_, message.data),
        )?;
        Ok(())
    }

    fn send_selection_notify(
        &mut self,
        destination: X11Window,
        notify: &SelectionNotify,
    ) -> Result<(), BackendError> {
        self.conn.send_event(
            false,
            destination,
            EventMask::NO_EVENT,
            SelectionNotifyEvent {
                response_type: SELECTION_NOTIFY_EVENT,
                sequence: 0,
                time: notify.time,
                requestor: notify.requestor,
                selection: notify.selection,
                target: notify.target,
                property: notify.property,
            },
        )?;
        Ok(())
    }

    fn set_selection_owner(
        &mut self,
        owner: X11Window,
        selection: Atom,
        time: Timestamp,
    ) -> Result<(), BackendError> {
        self.conn.set_selection_owner(owner, selection, time)?;
        Ok(())
    }

    fn selection_owner(&mut self, selection: Atom) -> Result<X11Window, BackendError> {
        Ok(self.conn.get_selection_owner(selection)?.reply()?.owner)
    }

    fn convert_selection(
        &mut self,
        requestor: X11Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<(), BackendError> {
        self.conn
            .convert_selection(requestor, selection, target, property, time)?;
        Ok(())
    }

    fn create_window(&mut self, role: WindowRole, root: X11Window) -> Result<X11Window, BackendError> {
        let window = self.conn.generate_id()?;
        let (class, aux, name) = match role {
            WindowRole::Selection => (
                WindowClass::INPUT_ONLY,
                CreateWindowAux::new().override_redirect(1),
                "XDND selection owner",
            ),
            WindowRole::DragIcon => (
                WindowClass::INPUT_OUTPUT,
                CreateWindowAux::new()
                    .override_redirect(1)
                    .event_mask(EventMask::POINTER_MOTION | EventMask::BUTTON_RELEASE),
                "XDND drag icon",
            ),
            WindowRole::DesktopProxy => (
                WindowClass::INPUT_ONLY,
                CreateWindowAux::new().override_redirect(1),
                "XDND desktop proxy",
            ),
        };
        self.conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            -100,
            -100,
            1,
            1,
            0,
            class,
            x11rb::COPY_FROM_PARENT,
            &aux,
        )?;
        self.conn.change_property8(
            PropMode::REPLACE,
            window,
            self.wm_name,
            self.utf8_string,
            name.as_bytes(),
        )?;
        if role == WindowRole::DragIcon {
            self.conn.map_window(window)?;
            self.grab_root = Some(root);
        }
        trace!(window, ?role, "Created helper window");
        Ok(window)
    }

    fn move_window(&mut self, window: X11Window, point: Point<i32, Root>) -> Result<(), BackendError> {
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new()
                .x(point.x)
                .y(point.y)
                .stack_mode(StackMode::ABOVE),
        )?;
        Ok(())
    }

    fn destroy_window(&mut self, window: X11Window) -> Result<(), BackendError> {
        self.conn.destroy_window(window)?;
        Ok(())
    }

    fn pointer_grabbed(&self) -> bool {
        self.foreign_grab
    }

    fn grab_pointer(&mut self, window: X11Window) -> Result<bool, BackendError> {
        let reply = self
            .conn
            .grab_pointer(
                false,
                window,
                EventMask::POINTER_MOTION | EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                x11rb::NONE,
                self.time,
            )?
            .reply()?;
        if reply.status != GrabStatus::SUCCESS {
            warn!(window, status = ?reply.status, "Failed to grab the pointer");
            return Ok(false);
        }
        Ok(true)
    }

    fn ungrab_pointer(&mut self) -> Result<(), BackendError> {
        self.conn.ungrab_pointer(self.time)?;
        Ok(())
    }

    fn pointer_state(&mut self) -> Result<PointerState, BackendError> {
        let root = self.grab_root.unwrap_or_else(|| self.screen_root(self.screen));
        let reply = self.conn.query_pointer(root)?.reply()?;
        let mask = u32::from(u16::from(reply.mask));
        Ok(PointerState {
            position: Point::new(reply.root_x as i32, reply.root_y as i32),
            buttons: Buttons::from_bits_truncate(mask),
            modifiers: Modifiers::from_bits_truncate(mask),
        })
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        self.conn.flush()?;
        Ok(())
    }
}
