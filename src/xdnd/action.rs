use bitflags::bitflags;

use super::Atoms;
use crate::backend::{Atom, NONE};

/// Enumeration of valid actions of a Drag'n'Drop operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DndAction {
    /// No action, the drop is refused
    #[default]
    None,
    /// Data will be copied
    Copy,
    /// Data will be moved
    Move,
    /// A link to the data will be created
    Link,
}

bitflags! {
    /// A set of [`DndAction`]s, as supported by a drag source
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DndActions: u32 {
        /// Copying is supported
        const COPY = 0x1;
        /// Moving is supported
        const MOVE = 0x2;
        /// Linking is supported
        const LINK = 0x4;
    }
}

bitflags! {
    /// Keyboard modifiers relevant for choosing a drop action
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        /// Either shift key
        const SHIFT = 0x1;
        /// Either control key
        const CONTROL = 0x4;
        /// Either alt key (Mod1)
        const ALT = 0x8;
    }
}

bitflags! {
    /// Pointer buttons held during a drag
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u32 {
        /// Primary button
        const LEFT = 0x100;
        /// Middle button
        const MIDDLE = 0x200;
        /// Secondary button
        const RIGHT = 0x400;
    }
}

impl DndAction {
    pub(crate) fn from_x(atom: Atom, atoms: &Atoms) -> DndAction {
        match atom {
            x if x == atoms.XdndActionLink => DndAction::Link,
            x if x == atoms.XdndActionMove => DndAction::Move,
            // unknown actions (Ask, Private, ...) degrade to copy, which every target supports
            _ => DndAction::Copy,
        }
    }

    pub(crate) fn to_x(self, atoms: &Atoms) -> Atom {
        match self {
            DndAction::Copy => atoms.XdndActionCopy,
            DndAction::Move => atoms.XdndActionMove,
            DndAction::Link => atoms.XdndActionLink,
            DndAction::None => NONE,
        }
    }

    /// The single-action set containing this action
    pub fn as_flags(self) -> DndActions {
        match self {
            DndAction::None => DndActions::empty(),
            DndAction::Copy => DndActions::COPY,
            DndAction::Move => DndActions::MOVE,
            DndAction::Link => DndActions::LINK,
        }
    }
}

/// Picks the action a drag source requests, given its supported actions and the held modifiers.
///
/// `preferred` is the action the application asked for when starting the drag,
/// [`DndAction::None`] meaning "no preference".
pub fn default_action(supported: DndActions, preferred: DndAction, modifiers: Modifiers) -> DndAction {
    let mut action = match preferred {
        DndAction::None => DndAction::Copy,
        action => action,
    };

    if modifiers.contains(Modifiers::CONTROL | Modifiers::SHIFT) {
        action = DndAction::Link;
    } else if modifiers.contains(Modifiers::CONTROL) {
        action = DndAction::Copy;
    } else if modifiers.contains(Modifiers::SHIFT) {
        action = DndAction::Move;
    } else if modifiers.contains(Modifiers::ALT) {
        action = DndAction::Link;
    }

    if supported.contains(action.as_flags()) {
        return action;
    }

    if supported.contains(DndActions::COPY) {
        DndAction::Copy
    } else if supported.contains(DndActions::MOVE) {
        DndAction::Move
    } else if supported.contains(DndActions::LINK) {
        DndAction::Link
    } else {
        DndAction::None
    }
}
