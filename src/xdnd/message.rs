use super::{Atoms, DndAction, DndActions};
use crate::backend::{Atom, ClientMessage, Timestamp, X11Window, NONE};
use crate::utils::{Point, Rectangle, Root};

/// A decoded XDND client message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdndMessage {
    /// A drag entered the window
    Enter {
        /// Selection window of the drag source
        source: X11Window,
        /// Protocol version of the source
        version: u32,
        /// More than three types are offered, see `XdndTypeList`
        has_type_list: bool,
        /// The first three offered types, [`NONE`] padded
        types: [Atom; 3],
    },
    /// The pointer moved over the window
    Position {
        /// Selection window of the drag source
        source: X11Window,
        /// Pointer position in root coordinates
        point: Point<i32, Root>,
        /// Timestamp of the motion
        time: Timestamp,
        /// Action requested by the source
        action: DndAction,
    },
    /// Reply of the target to a position message
    Status {
        /// The target window
        target: X11Window,
        /// Whether the drop would be accepted
        accept: bool,
        /// Root rectangle inside which no new position is wanted
        ///
        /// `None` if every motion should be reported.
        rect: Option<Rectangle<i32, Root>>,
        /// Action the target would perform
        action: DndAction,
    },
    /// The drag left the window
    Leave {
        /// Selection window of the drag source
        source: X11Window,
    },
    /// The drag was dropped on the window
    Drop {
        /// Selection window of the drag source
        source: X11Window,
        /// Timestamp to use for selection conversions
        time: Timestamp,
        /// Actions supported by the source
        actions: DndActions,
    },
    /// The target finished processing a drop
    Finished {
        /// The target window
        target: X11Window,
        /// Whether the drop was accepted
        accept: bool,
        /// Action the target performed
        action: DndAction,
    },
}

fn pack(x: i32, y: i32) -> u32 {
    ((x as u32 & 0xffff) << 16) | (y as u32 & 0xffff)
}

fn unpack(value: u32) -> (i32, i32) {
    ((value >> 16) as i32, (value & 0xffff) as i32)
}

// a refusal carries no action, whatever atom the peer put there
fn reply_action(accept: bool, atom: Atom, atoms: &Atoms) -> DndAction {
    if accept {
        DndAction::from_x(atom, atoms)
    } else {
        DndAction::None
    }
}

impl XdndMessage {
    /// Decode a client message, returns `None` for non-XDND messages
    pub fn decode(message: &ClientMessage, atoms: &Atoms) -> Option<XdndMessage> {
        let data = message.data;
        let msg = match message.type_ {
            x if x == atoms.XdndEnter => XdndMessage::Enter {
                source: data[0],
                version: data[1] >> 24,
                has_type_list: data[1] & 1 != 0,
                types: [data[2], data[3], data[4]],
            },
            x if x == atoms.XdndPosition => XdndMessage::Position {
                source: data[0],
                point: unpack(data[2]).into(),
                time: data[3],
                action: DndAction::from_x(data[4], atoms),
            },
            x if x == atoms.XdndStatus => XdndMessage::Status {
                target: data[0],
                accept: data[1] & 1 != 0,
                rect: if data[1] & 2 == 0 {
                    let (x, y) = unpack(data[2]);
                    let (w, h) = unpack(data[3]);
                    Some(Rectangle::from_loc_and_size((x, y), (w, h)))
                } else {
                    None
                },
                action: reply_action(data[1] & 1 != 0, data[4], atoms),
            },
            x if x == atoms.XdndLeave => XdndMessage::Leave { source: data[0] },
            x if x == atoms.XdndDrop => XdndMessage::Drop {
                source: data[0],
                time: data[2],
                actions: DndActions::from_bits_truncate(data[4]),
            },
            x if x == atoms.XdndFinished => XdndMessage::Finished {
                target: data[0],
                accept: data[1] & 1 != 0,
                action: reply_action(data[1] & 1 != 0, data[2], atoms),
            },
            _ => return None,
        };
        Some(msg)
    }

    /// Encode the message for delivery about `window`
    pub fn encode(&self, window: X11Window, atoms: &Atoms) -> ClientMessage {
        let (type_, data) = match *self {
            XdndMessage::Enter {
                source,
                version,
                has_type_list,
                types,
            } => (
                atoms.XdndEnter,
                [
                    source,
                    (version << 24) | has_type_list as u32,
                    types[0],
                    types[1],
                    types[2],
                ],
            ),
            XdndMessage::Position {
                source,
                point,
                time,
                action,
            } => (
                atoms.XdndPosition,
                [source, 0, pack(point.x, point.y), time, action.to_x(atoms)],
            ),
            XdndMessage::Status {
                target,
                accept,
                rect,
                action,
            } => {
                let action = if accept { action.to_x(atoms) } else { NONE };
                match rect {
                    Some(rect) => (
                        atoms.XdndStatus,
                        [
                            target,
                            accept as u32,
                            pack(rect.loc.x, rect.loc.y),
                            pack(rect.size.w, rect.size.h),
                            action,
                        ],
                    ),
                    None => (atoms.XdndStatus, [target, accept as u32 | 2, 0, 0, action]),
                }
            }
            XdndMessage::Leave { source } => (atoms.XdndLeave, [source, 0, 0, 0, 0]),
            XdndMessage::Drop { source, time, actions } => {
                (atoms.XdndDrop, [source, 0, time, 0, actions.bits()])
            }
            XdndMessage::Finished { target, accept, action } => {
                let action = if accept { action.to_x(atoms) } else { NONE };
                (atoms.XdndFinished, [target, accept as u32, action, 0, 0])
            }
        };

        ClientMessage { window, type_, data }
    }
}
