//! Window-system collaborators of the drag'n'drop engine
//!
//! The engine never talks to a display server directly. Everything it needs from the window
//! system (window tree queries, properties, client messages, selections, the pointer grab) goes
//! through the [`WindowSystem`] trait, which is implemented by:
//!
//! - [`x11rb::X11rbWindowSystem`] on top of an `x11rb` connection (feature `backend_x11rb`)
//! - [`test::TestWindowSystem`], an in-memory window tree (feature `backend_test`)
//!
//! Windows are plain integer handles ([`X11Window`]). A handle that no longer resolves to a
//! window makes the queries return `Ok(None)` or an empty result, never a dangling reference.

use crate::utils::{Local, Point, Rectangle, Root};
use crate::xdnd::{Buttons, Modifiers};

#[cfg(feature = "backend_x11rb")]
pub mod x11rb;


/// Handle of a window
pub type X11Window = u32;
/// An interned string identifier
pub type Atom = u32;
/// A window-system timestamp, in milliseconds
pub type Timestamp = u32;

/// The null window / atom
pub const NONE: u32 = 0;
/// The special "current time" timestamp
pub const CURRENT_TIME: Timestamp = 0;

/// An error of the window-system collaborator
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The connection to the window system was lost.
    #[error("Connection to the window system was lost")]
    ConnectionLost,

    /// A request referenced a window that does not exist.
    #[error("Window {0} does not exist")]
    UnknownWindow(X11Window),

    /// Some protocol error occurred.
    #[cfg(feature = "backend_x11rb")]
    #[error("Some protocol error occurred")]
    Protocol(#[from] ::x11rb::errors::ReplyOrIdError),
}

#[cfg(feature = "backend_x11rb")]
impl From<::x11rb::errors::ReplyError> for BackendError {
    fn from(err: ::x11rb::errors::ReplyError) -> Self {
        Self::Protocol(err.into())
    }
}

#[cfg(feature = "backend_x11rb")]
impl From<::x11rb::errors::ConnectionError> for BackendError {
    fn from(err: ::x11rb::errors::ConnectionError) -> Self {
        Self::Protocol(err.into())
    }
}

/// A virtual desktop (screen) of the window system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Desktop {
    /// Index of the screen
    pub index: usize,
    /// Root window of the screen
    pub root: X11Window,
}

/// Geometry of a window, as reported by the window system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    /// Whether the window is mapped and all its ancestors are mapped
    pub viewable: bool,
    /// Outline of the window, relative to its parent
    pub rect: Rectangle<i32, Local>,
}

/// Result of translating a point into another window's coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translated {
    /// The point, relative to the destination window
    pub point: Point<i32, Local>,
    /// The child of the destination window containing the point, if any
    pub child: Option<X11Window>,
}

/// Which shape region of a window to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// The visible outline of the window
    Bounding,
    /// The region accepting pointer input
    Input,
}

/// The value of a window property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Type atom of the property
    pub type_: Atom,
    /// Element size in bits: 8, 16 or 32
    pub format: u8,
    /// Raw value, in native byte order for formats 16 and 32
    pub value: Vec<u8>,
}

impl Property {
    /// Create a property holding 8-bit data
    pub fn from_bytes(type_: Atom, value: impl Into<Vec<u8>>) -> Property {
        Property {
            type_,
            format: 8,
            value: value.into(),
        }
    }

    /// Create a property holding 32-bit data
    pub fn from_u32s(type_: Atom, value: &[u32]) -> Property {
        Property {
            type_,
            format: 32,
            value: value.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        }
    }

    /// Iterate the value as 32-bit data, if the format is 32
    pub fn value32(&self) -> Option<impl Iterator<Item = u32> + '_> {
        if self.format != 32 {
            return None;
        }
        Some(
            self.value
                .chunks_exact(4)
                .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        )
    }

    /// First 32-bit element of the value
    pub fn first_u32(&self) -> Option<u32> {
        self.value32().and_then(|mut iter| iter.next())
    }
}

/// A client message, as sent or received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMessage {
    /// The window the message is about
    pub window: X11Window,
    /// Message type atom
    pub type_: Atom,
    /// 32-bit payload
    pub data: [u32; 5],
}

/// A request by `requestor` to convert `selection` to `target` into `property`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Timestamp of the request
    pub time: Timestamp,
    /// Current owner of the selection
    pub owner: X11Window,
    /// Window asking for the data
    pub requestor: X11Window,
    /// Selection atom
    pub selection: Atom,
    /// Requested target type
    pub target: Atom,
    /// Property to write to, [`NONE`] for obsolete clients
    pub property: Atom,
}

/// Notification that a selection conversion finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionNotify {
    /// Timestamp of the originating request
    pub time: Timestamp,
    /// Window that asked for the data
    pub requestor: X11Window,
    /// Selection atom
    pub selection: Atom,
    /// Target type of the conversion
    pub target: Atom,
    /// Property holding the data, [`NONE`] if the conversion failed
    pub property: Atom,
}

/// Change that happened to a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    /// The property has a new value
    NewValue,
    /// The property was deleted
    Deleted,
}

/// Notification about a property change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyNotify {
    /// Window owning the property
    pub window: X11Window,
    /// Property atom
    pub atom: Atom,
    /// Timestamp of the change
    pub time: Timestamp,
    /// Kind of change
    pub state: PropertyState,
}

/// Pointer position, button and modifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerState {
    /// Pointer position in root coordinates
    pub position: Point<i32, Root>,
    /// Currently pressed buttons
    pub buttons: Buttons,
    /// Currently held modifiers
    pub modifiers: Modifiers,
}

/// Role of a window created by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRole {
    /// Unmapped window owning the XdndSelection and receiving replies
    Selection,
    /// Override-redirect window showing the drag image
    DragIcon,
    /// Unmapped window receiving messages on behalf of a desktop window
    DesktopProxy,
}

/// Everything the drag'n'drop engine needs from the window system
pub trait WindowSystem: std::fmt::Debug {
    /// Intern `name`, creating the atom if needed
    fn intern_atom(&mut self, name: &str) -> Result<Atom, BackendError>;
    /// Name of an interned atom
    fn atom_name(&mut self, atom: Atom) -> Result<String, BackendError>;
    /// Timestamp of the latest event seen from the window system
    fn timestamp(&self) -> Timestamp;

    /// Desktop the root-coordinate `point` lies on
    fn desktop_at(&mut self, point: Point<i32, Root>) -> Result<Desktop, BackendError>;
    /// Geometry of `window`, `None` if it does not exist (anymore)
    fn window_geometry(&mut self, window: X11Window) -> Result<Option<WindowGeometry>, BackendError>;
    /// Children of `window` in stacking order, bottom-most first
    fn children(&mut self, window: X11Window) -> Result<Vec<X11Window>, BackendError>;
    /// Parent of `window`, `None` for root windows and unknown windows
    fn parent(&mut self, window: X11Window) -> Result<Option<X11Window>, BackendError>;
    /// Translate `point` from `src` coordinates to `dst` coordinates
    fn translate_coordinates(
        &mut self,
        src: X11Window,
        dst: X11Window,
        point: Point<i32, Local>,
    ) -> Result<Option<Translated>, BackendError>;
    /// Shape region of `window`, relative to the window
    ///
    /// Returns `Ok(None)` if the window system has no shape support.
    fn shape_rectangles(
        &mut self,
        window: X11Window,
        kind: ShapeKind,
    ) -> Result<Option<Vec<Rectangle<i32, Local>>>, BackendError>;

    /// Read a property, `None` if it is not set or not of type `type_` (any type for `None`)
    ///
    /// At most `max_len` 32-bit units are returned.
    fn get_property(
        &mut self,
        window: X11Window,
        property: Atom,
        type_: Option<Atom>,
        max_len: u32,
    ) -> Result<Option<Property>, BackendError>;
    /// Replace a property
    fn change_property(
        &mut self,
        window: X11Window,
        property: Atom,
        value: &Property,
    ) -> Result<(), BackendError>;
    /// Delete a property
    fn delete_property(&mut self, window: X11Window, property: Atom) -> Result<(), BackendError>;
    /// Subscribe to property change notifications of `window`
    fn watch_properties(&mut self, window: X11Window) -> Result<(), BackendError>;

    /// Send a client message to `destination`
    fn send_client_message(
        &mut self,
        destination: X11Window,
        message: &ClientMessage,
    ) -> Result<(), BackendError>;
    /// Send a selection notification to `destination`
    fn send_selection_notify(
        &mut self,
        destination: X11Window,
        notify: &SelectionNotify,
    ) -> Result<(), BackendError>;
    /// Claim ownership of `selection`
    fn set_selection_owner(
        &mut self,
        owner: X11Window,
        selection: Atom,
        time: Timestamp,
    ) -> Result<(), BackendError>;
    /// Current owner of `selection`, [`NONE`] if unowned
    fn selection_owner(&mut self, selection: Atom) -> Result<X11Window, BackendError>;
    /// Ask the owner of `selection` to convert it to `target` into `property` of `requestor`
    fn convert_selection(
        &mut self,
        requestor: X11Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<(), BackendError>;

    /// Create a helper window as a child of the root window `root`
    fn create_window(&mut self, role: WindowRole, root: X11Window) -> Result<X11Window, BackendError>;
    /// Move a window to a root-coordinate position
    fn move_window(&mut self, window: X11Window, point: Point<i32, Root>) -> Result<(), BackendError>;
    /// Destroy a window created with [`WindowSystem::create_window`]
    fn destroy_window(&mut self, window: X11Window) -> Result<(), BackendError>;

    /// Whether some other component of the process currently holds the pointer grab
    fn pointer_grabbed(&self) -> bool;
    /// Grab the pointer for `window`, returns whether the grab succeeded
    fn grab_pointer(&mut self, window: X11Window) -> Result<bool, BackendError>;
    /// Release a grab obtained through [`WindowSystem::grab_pointer`]
    fn ungrab_pointer(&mut self) -> Result<(), BackendError>;
    /// Current pointer position, buttons and modifiers
    fn pointer_state(&mut self) -> Result<PointerState, BackendError>;

    /// Flush pending requests
    fn flush(&mut self) -> Result<(), BackendError>;
}
