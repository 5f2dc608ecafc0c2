//! Drag source side of the protocol

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::{
    default_action, ledger::DropTransaction, mime, mime::TypeList, resolver, Buttons, DndAction, DndActions,
    DropOutcome, Modifiers, XdndError, XdndHandler, XdndMessage, XdndState,
};
use crate::backend::{
    BackendError, Desktop, PointerState, Property, Timestamp, WindowRole, WindowSystem, X11Window, NONE,
};
use crate::utils::{Point, Rectangle, Root};

/// Identifies a drag started with [`XdndState::start_drag`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DragId(u64);

/// The data offered by a drag
pub trait DataSource: fmt::Debug + Send + Sync {
    /// Offered mime types, most preferred first
    fn mime_types(&self) -> Vec<String>;
    /// The data for `mime_type`, `None` if it is not offered
    fn data(&self, mime_type: &str) -> Option<Vec<u8>>;
}

/// A [`DataSource`] holding its data in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DragData {
    data: IndexMap<String, Vec<u8>>,
}

impl DragData {
    /// Create an empty data set
    pub fn new() -> DragData {
        DragData::default()
    }

    /// Add the data of a mime type
    pub fn with(mut self, mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> DragData {
        self.insert(mime_type, data);
        self
    }

    /// Add or replace the data of a mime type
    pub fn insert(&mut self, mime_type: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.data.insert(mime_type.into(), data.into());
    }
}

impl DataSource for DragData {
    fn mime_types(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    fn data(&self, mime_type: &str) -> Option<Vec<u8>> {
        self.data.get(mime_type).cloned()
    }
}

/// A drag started by this process
///
/// The session lives as long as the drag, and afterwards as long as its drop awaits the
/// target's answer.
#[derive(Debug)]
pub struct DragSession {
    id: DragId,
    initiator: X11Window,
    data: Arc<dyn DataSource>,
    supported: DndActions,
    preferred: DndAction,
    types: TypeList,
}

impl DragSession {
    /// Id of the drag
    pub fn id(&self) -> DragId {
        self.id
    }

    /// Window the drag was started from
    pub fn initiator(&self) -> X11Window {
        self.initiator
    }

    /// Actions the application allows
    pub fn supported_actions(&self) -> DndActions {
        self.supported
    }

    /// The dragged data
    pub fn data(&self) -> &Arc<dyn DataSource> {
        &self.data
    }

    pub(super) fn types(&self) -> &TypeList {
        &self.types
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> DragSession {
        DragSession {
            id: DragId(0),
            initiator: crate::backend::NONE,
            data: Arc::new(DragData::new()),
            supported: DndActions::COPY,
            preferred: DndAction::None,
            types: TypeList::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Target {
    pub window: X11Window,
    pub proxy: X11Window,
    pub version: u32,
    /// The local window handling messages for `proxy`
    pub local: Option<X11Window>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragState {
    /// No window under the pointer takes part in the protocol
    Idle,
    Entered(Target),
    AwaitingStatus(Target),
    HasStatus(Target),
    Dropping(Target),
}

impl DragState {
    fn target(&self) -> Option<Target> {
        match *self {
            DragState::Idle => None,
            DragState::Entered(target)
            | DragState::AwaitingStatus(target)
            | DragState::HasStatus(target)
            | DragState::Dropping(target) => Some(target),
        }
    }

    /// Target that still expects either a drop or a leave
    fn pending_target(&self) -> Option<Target> {
        match *self {
            DragState::Entered(target) | DragState::AwaitingStatus(target) | DragState::HasStatus(target) => {
                Some(target)
            }
            DragState::Idle | DragState::Dropping(_) => None,
        }
    }
}

struct DragSetup {
    types: TypeList,
    pointer: PointerState,
    desktop: Desktop,
    icon: X11Window,
    grabbed: bool,
}

#[derive(Debug)]
pub(super) struct ActiveDrag {
    session: Arc<DragSession>,
    state: DragState,
    /// Root area inside which the target wants no further position messages
    same_answer: Rectangle<i32, Root>,
    desktop: Desktop,
    icon: Option<X11Window>,
    grabbed: bool,
    can_drop: bool,
    accepted_action: DndAction,
    executed: Option<DndAction>,
    /// Timestamp of the latest position message
    source_time: Timestamp,
}

impl ActiveDrag {
    pub(super) fn session(&self) -> &Arc<DragSession> {
        &self.session
    }

    pub(super) fn source_time(&self) -> Timestamp {
        self.source_time
    }
}

impl<B: WindowSystem> XdndState<B> {
    /// Start a drag from `initiator`
    ///
    /// Claims the `XdndSelection`, shows the drag icon at the pointer, grabs the pointer unless
    /// someone else holds the grab, and evaluates the initial pointer position.
    pub fn start_drag<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        initiator: X11Window,
        data: Arc<dyn DataSource>,
        supported: DndActions,
        preferred: DndAction,
    ) -> Result<DragId, XdndError> {
        if self.drag.is_some() {
            return Err(XdndError::DragInProgress);
        }

        let time = self.timestamp();
        self.backend
            .set_selection_owner(self.selection_window, self.atoms.XdndSelection, time)?;

        let setup = match self.prepare_drag(data.as_ref()) {
            Ok(setup) => setup,
            Err(err) => {
                warn!(?err, "Failed to start drag");
                if let Err(err) = self
                    .backend
                    .set_selection_owner(NONE, self.atoms.XdndSelection, time)
                    .and_then(|_| self.backend.flush())
                {
                    warn!(?err, "Failed to give up the XdndSelection");
                }
                return Err(err);
            }
        };
        let DragSetup {
            types,
            pointer,
            desktop,
            icon,
            grabbed,
        } = setup;

        let session = Arc::new(DragSession {
            id: DragId(self.next_id()),
            initiator,
            data,
            supported,
            preferred,
            types,
        });
        let id = session.id;
        debug!(
            ?id,
            initiator,
            types = session.types.len(),
            grabbed,
            "Starting drag"
        );

        self.drag = Some(ActiveDrag {
            session,
            state: DragState::Idle,
            same_answer: Rectangle::default(),
            desktop,
            icon: Some(icon),
            grabbed,
            can_drop: false,
            accepted_action: DndAction::None,
            executed: None,
            source_time: time,
        });

        self.pointer_motion(handler, pointer.position, pointer.buttons, pointer.modifiers);
        Ok(id)
    }

    fn prepare_drag(&mut self, data: &dyn DataSource) -> Result<DragSetup, XdndError> {
        let mut types = TypeList::default();
        for mime_type in data.mime_types() {
            for atom in mime::atoms_for_format(&mut self.backend, &self.atoms, &mime_type)? {
                types.push(atom);
            }
        }
        if types.needs_property() {
            let value = Property::from_u32s(self.atoms.ATOM, &types.iter().collect::<Vec<_>>());
            self.backend
                .change_property(self.selection_window, self.atoms.XdndTypeList, &value)?;
        } else {
            self.backend
                .delete_property(self.selection_window, self.atoms.XdndTypeList)?;
        }

        let pointer = self.backend.pointer_state()?;
        let desktop = self.backend.desktop_at(pointer.position)?;
        let icon = self.backend.create_window(WindowRole::DragIcon, desktop.root)?;
        match self.show_icon(icon, pointer.position) {
            Ok(grabbed) => Ok(DragSetup {
                types,
                pointer,
                desktop,
                icon,
                grabbed,
            }),
            Err(err) => {
                // destroying the grab window releases the grab
                if let Err(err) = self.backend.destroy_window(icon) {
                    warn!(icon, ?err, "Failed to destroy drag icon");
                }
                Err(err.into())
            }
        }
    }

    fn show_icon(&mut self, icon: X11Window, point: Point<i32, Root>) -> Result<bool, BackendError> {
        self.backend.move_window(icon, point)?;
        let grabbed = !self.backend.pointer_grabbed() && self.backend.grab_pointer(icon)?;
        self.backend.flush()?;
        Ok(grabbed)
    }

    /// The pointer moved during a drag
    pub fn pointer_motion<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        point: Point<i32, Root>,
        buttons: Buttons,
        modifiers: Modifiers,
    ) {
        let Some(drag) = self.drag.as_mut() else {
            return;
        };

        if let Some(icon) = drag.icon {
            if let Err(err) = self.backend.move_window(icon, point) {
                warn!(icon, ?err, "Failed to move drag icon");
            }
        }

        if let DragState::Dropping(target) = drag.state {
            trace!(window = target.window, ?point, "Pointer moved after the drop");
            return;
        }

        if !drag.same_answer.is_empty() && drag.same_answer.contains(point) {
            trace!(?point, "Pointer still inside the same-answer area");
            return;
        }

        match self.backend.desktop_at(point) {
            Ok(desktop) if desktop != drag.desktop => {
                debug!(?desktop, "Drag moved to another desktop");
                replace_icon(&mut self.backend, drag, desktop, point);
            }
            Ok(_) => {}
            Err(err) => warn!(?err, "Failed to query the desktop under the pointer"),
        }

        let root = drag.desktop.root;
        let icon = drag.icon;
        let current = drag.state.target();
        let target = self.resolve_target(root, icon, point).unwrap_or_else(|err| {
            warn!(?err, "Failed to resolve the window under the pointer");
            None
        });

        if current.map(|t| t.window) != target.map(|t| t.window) {
            if let Some(old) = current {
                self.send_leave(handler, old);
            }
            let Some(drag) = self.drag.as_mut() else {
                return;
            };
            drag.state = target.map_or(DragState::Idle, DragState::Entered);
            drag.same_answer = Rectangle::from_loc_and_size((point.x - 2, point.y - 2), (5, 5));
            drag.can_drop = false;
            drag.accepted_action = DndAction::None;
            handler.update_cursor(DndAction::None);

            if let Some(new) = target {
                let types = drag.session.types();
                let enter = XdndMessage::Enter {
                    source: self.selection_window,
                    version: new.version,
                    has_type_list: types.needs_property(),
                    types: types.inline(),
                };
                debug!(window = new.window, proxy = new.proxy, version = new.version, "Entering target");
                self.deliver(handler, new, enter, None);
            }
        }

        let Some(target) = target else {
            return;
        };
        let Some(drag) = self.drag.as_mut() else {
            return;
        };

        if self.config.rejects(target.window) {
            trace!(window = target.window, "Target always rejects drops");
            drag.can_drop = false;
            drag.accepted_action = DndAction::None;
            handler.update_cursor(DndAction::None);
            return;
        }

        if let DragState::AwaitingStatus(_) = drag.state {
            trace!(window = target.window, "Waiting for XdndStatus");
            return;
        }

        let action = default_action(drag.session.supported, drag.session.preferred, modifiers);
        let time = self.backend.timestamp();
        drag.state = DragState::AwaitingStatus(target);
        drag.source_time = time;

        let position = XdndMessage::Position {
            source: self.selection_window,
            point,
            time,
            action,
        };
        let pointer = PointerState {
            position: point,
            buttons,
            modifiers,
        };
        self.deliver(handler, target, position, Some(pointer));
    }

    fn resolve_target(
        &mut self,
        root: X11Window,
        icon: Option<X11Window>,
        point: Point<i32, Root>,
    ) -> Result<Option<Target>, BackendError> {
        let window = resolver::find_aware_target(
            &mut self.backend,
            &self.atoms,
            icon,
            root,
            point,
            self.config.max_resolve_depth,
        )?
        .unwrap_or(root);
        let proxy = resolver::get_proxy_window(&mut self.backend, &self.atoms, window)?.unwrap_or(window);

        let Some(version) = resolver::aware_version(&mut self.backend, &self.atoms, proxy)? else {
            trace!(window, proxy, "Window under the pointer is not XdndAware");
            return Ok(None);
        };
        let version = self.config.version.min(version.max(1));

        Ok(Some(Target {
            window,
            proxy,
            version,
            local: self.local_target(proxy),
        }))
    }

    /// Deliver a message from the drag source to `target`
    ///
    /// Local targets handle the message synchronously, with `pointer` standing in for the
    /// pointer query a remote target would do.
    fn deliver<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        target: Target,
        msg: XdndMessage,
        pointer: Option<PointerState>,
    ) {
        let Some(local) = target.local else {
            self.send_message(target.proxy, target.window, msg);
            return;
        };

        trace!(window = local, ?msg, "Delivering XDND message locally");
        match msg {
            XdndMessage::Position {
                source,
                point,
                time,
                action,
            } => self.handle_position(handler, local, source, point, time, action, pointer),
            XdndMessage::Drop { source, time, actions } => {
                self.handle_drop(handler, local, source, time, actions, pointer)
            }
            msg => self.handle_message(handler, local, msg),
        }
    }

    fn send_leave<H: XdndHandler>(&mut self, handler: &mut H, target: Target) {
        debug!(window = target.window, "Leaving target");
        let leave = XdndMessage::Leave {
            source: self.selection_window,
        };
        self.deliver(handler, target, leave, None);
    }

    pub(super) fn handle_status<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        target: X11Window,
        accept: bool,
        rect: Option<Rectangle<i32, Root>>,
        action: DndAction,
    ) {
        let Some(drag) = self.drag.as_mut() else {
            debug!(target, "Received XdndStatus without a drag, ignoring..");
            return;
        };
        let current = match drag.state {
            DragState::Entered(current) | DragState::AwaitingStatus(current) | DragState::HasStatus(current) => {
                current
            }
            DragState::Idle | DragState::Dropping(_) => {
                debug!(target, "Received unexpected XdndStatus, ignoring..");
                return;
            }
        };
        if target != crate::backend::NONE && target != current.window {
            debug!(target, current = current.window, "Received stale XdndStatus, ignoring..");
            return;
        }

        let accept = accept && !self.config.rejects(current.window);
        drag.state = DragState::HasStatus(current);
        drag.can_drop = accept;
        drag.accepted_action = if accept { action } else { DndAction::None };
        drag.same_answer = rect.unwrap_or_default();
        trace!(target, accept, ?action, ?rect, "Target answered");
        handler.update_cursor(drag.accepted_action);
    }

    /// Drop at the current target
    ///
    /// The drop is remembered until the target finishes it, or the transaction times out. Does
    /// nothing if no target is under the pointer.
    pub fn drop_drag<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        point: Point<i32, Root>,
        buttons: Buttons,
        modifiers: Modifiers,
    ) {
        let Some(drag) = self.drag.as_mut() else {
            return;
        };
        let Some(target) = drag.state.pending_target() else {
            debug!(state = ?drag.state, "Nothing to drop on");
            return;
        };

        let time = self.backend.timestamp();
        drag.state = DragState::Dropping(target);
        let session = Arc::clone(&drag.session);
        debug!(window = target.window, time, can_drop = drag.can_drop, "Dropping");

        let transaction = DropTransaction {
            timestamp: time,
            target: target.window,
            proxy: target.proxy,
            local: target.local,
            session: Arc::clone(&session),
            created_at: self.clock.now(),
        };
        if let Some(replaced) = self.ledger.add(transaction, self.timer.as_mut()) {
            handler.drop_finished(replaced.session.id(), DropOutcome::Expired);
        }

        let msg = XdndMessage::Drop {
            source: self.selection_window,
            time,
            actions: session.supported,
        };
        let pointer = PointerState {
            position: point,
            buttons,
            modifiers,
        };
        self.deliver(handler, target, msg, Some(pointer));

        // local targets finish synchronously and are never swept
        if target.local.is_some()
            && self
                .ledger
                .find_by_timestamp(time)
                .is_some_and(|t| t.target == target.window)
        {
            if let Some(unfinished) = self.ledger.remove_by_timestamp(time, self.timer.as_mut()) {
                debug!(window = target.window, time, "Local drop was not finished, refusing it");
                if let Some(drag) = self.drag.as_mut() {
                    drag.executed = Some(DndAction::None);
                }
                handler.drop_finished(
                    unfinished.session.id(),
                    DropOutcome::Finished {
                        accepted: false,
                        action: DndAction::None,
                    },
                );
            }
        }
    }

    pub(super) fn handle_finished<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        target: X11Window,
        accept: bool,
        action: DndAction,
    ) {
        let Some(transaction) = self.ledger.remove_by_target(target, self.timer.as_mut()) else {
            debug!(target, "Received stale XdndFinished, ignoring..");
            return;
        };

        let action = if accept { action } else { DndAction::None };
        if let Some(drag) = self.drag.as_mut() {
            if Arc::ptr_eq(&drag.session, &transaction.session) {
                drag.executed = Some(action);
            }
        }

        debug!(target, accept, ?action, "Drop finished");
        handler.drop_finished(
            transaction.session.id(),
            DropOutcome::Finished {
                accepted: accept,
                action,
            },
        );
    }

    /// Abort the drag
    ///
    /// Leaves the current target, releases the pointer and removes the drag icon.
    pub fn cancel_drag<H: XdndHandler>(&mut self, handler: &mut H) {
        let Some(drag) = self.drag.as_ref() else {
            return;
        };
        if let Some(target) = drag.state.pending_target() {
            self.send_leave(handler, target);
        }
        if let Some(drag) = self.drag.take() {
            debug!(id = ?drag.session.id, "Drag canceled");
            self.release(drag);
        }
        handler.update_cursor(DndAction::None);
    }

    /// Finish the drag after the pointer button was released, returns the executed action
    ///
    /// A target that was not dropped on is left. If the target has not finished the drop yet,
    /// the action it last accepted is reported.
    pub fn end_drag<H: XdndHandler>(&mut self, handler: &mut H) -> DndAction {
        let Some(drag) = self.drag.as_ref() else {
            return DndAction::None;
        };
        if let Some(target) = drag.state.pending_target() {
            self.send_leave(handler, target);
        }
        let Some(drag) = self.drag.take() else {
            return DndAction::None;
        };

        let fallback = if drag.can_drop {
            drag.accepted_action
        } else {
            DndAction::None
        };
        let action = drag.executed.unwrap_or(fallback);
        debug!(id = ?drag.session.id, ?action, "Drag ended");
        self.release(drag);
        action
    }

    fn release(&mut self, drag: ActiveDrag) {
        let mut result = Ok(());
        if drag.grabbed {
            result = self.backend.ungrab_pointer();
        }
        if let Some(icon) = drag.icon {
            result = result.and(self.backend.destroy_window(icon));
        }
        if let Err(err) = result.and_then(|_| self.backend.flush()) {
            warn!(?err, "Failed to clean up after drag");
        }
    }
}

fn replace_icon<B: WindowSystem>(
    backend: &mut B,
    drag: &mut ActiveDrag,
    desktop: Desktop,
    point: Point<i32, Root>,
) {
    if drag.grabbed {
        if let Err(err) = backend.ungrab_pointer() {
            warn!(?err, "Failed to release pointer grab");
        }
        drag.grabbed = false;
    }
    if let Some(icon) = drag.icon.take() {
        if let Err(err) = backend.destroy_window(icon) {
            warn!(icon, ?err, "Failed to destroy drag icon");
        }
    }

    let icon = backend
        .create_window(WindowRole::DragIcon, desktop.root)
        .and_then(|icon| backend.move_window(icon, point).map(|_| icon));
    match icon {
        Ok(icon) => {
            drag.icon = Some(icon);
            if !backend.pointer_grabbed() {
                drag.grabbed = backend.grab_pointer(icon).unwrap_or_else(|err| {
                    warn!(?err, "Failed to grab the pointer");
                    false
                });
            }
        }
        Err(err) => warn!(?err, "Failed to create drag icon"),
    }
    drag.desktop = desktop;
}
