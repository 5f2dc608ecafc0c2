//! Drop target side of the protocol

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{
    mime, mime::TypeList, resolver, DndAction, DndActions, DragMotion, DragResponse, DragSession,
    DropResponse, WindowKind, XdndHandler, XdndMessage, XdndState,
};
use crate::backend::{Atom, PointerState, Timestamp, WindowSystem, X11Window};
use crate::utils::{Local, Point, Rectangle, Root};

/// Largest coordinate of an answer rectangle
const MAX_ANSWER_COORD: i32 = 4096;

/// A drag offered to one of the local windows
#[derive(Debug)]
pub(super) struct ActiveOffer {
    pub source: X11Window,
    /// Window receiving replies for `source`
    pub proxy: X11Window,
    pub types: TypeList,
    pub mime_types: Vec<String>,
    pub window: X11Window,
    pub position: Point<i32, Local>,
    pub supported: DndActions,
    pub proposed: DndAction,
    pub accepted_action: DndAction,
    /// Timestamp of the drop, to convert the selection with
    pub target_time: Timestamp,
    pub dropped: bool,
}

impl<B: WindowSystem> XdndState<B> {
    /// Mime types offered by the drag over the local windows
    pub fn offered_mime_types(&self) -> Option<&[String]> {
        self.offer.as_ref().map(|offer| offer.mime_types.as_slice())
    }

    pub(super) fn handle_enter(
        &mut self,
        window: X11Window,
        source: X11Window,
        version: u32,
        has_type_list: bool,
        inline: [Atom; 3],
    ) {
        if !self.windows.contains_key(&window) {
            debug!(window, "Received XdndEnter for unknown window, ignoring..");
            return;
        }

        self.offer = None;
        if version > self.config.version {
            debug!(window, source, version, "Unsupported XDND version, ignoring drag");
            return;
        }

        let proxy = resolver::get_proxy_window(&mut self.backend, &self.atoms, source)
            .unwrap_or_else(|err| {
                warn!(source, ?err, "Failed to query XdndProxy of drag source");
                None
            })
            .unwrap_or(source);

        let types = if has_type_list {
            match self.backend.get_property(
                source,
                self.atoms.XdndTypeList,
                Some(self.atoms.ATOM),
                self.config.max_type_list,
            ) {
                Ok(Some(list)) => list.value32().map(|types| types.collect()).unwrap_or_default(),
                Ok(None) => {
                    debug!(source, "Drag source has no XdndTypeList");
                    inline.into_iter().collect()
                }
                Err(err) => {
                    warn!(source, ?err, "Failed to read XdndTypeList");
                    inline.into_iter().collect()
                }
            }
        } else {
            inline.into_iter().collect::<TypeList>()
        };
        let mime_types = mime::formats_for_types(&mut self.backend, &self.atoms, &types);
        debug!(window, source, version, ?mime_types, "Drag entered");

        self.offer = Some(ActiveOffer {
            source,
            proxy,
            types,
            mime_types,
            window,
            position: Point::default(),
            supported: DndActions::empty(),
            proposed: DndAction::None,
            accepted_action: DndAction::None,
            target_time: crate::backend::CURRENT_TIME,
            dropped: false,
        });
    }

    /// Session of a drag of this process, if `source` is our own selection window
    fn local_session(&self, source: X11Window, time: Timestamp) -> Option<Arc<DragSession>> {
        if source != self.selection_window {
            return None;
        }
        self.ledger
            .find_by_timestamp(time)
            .map(|transaction| &transaction.session)
            .or_else(|| self.drag.as_ref().map(|drag| drag.session()))
            .cloned()
    }

    pub(super) fn local_offer_session(&self) -> Option<Arc<DragSession>> {
        let offer = self.offer.as_ref()?;
        self.local_session(offer.source, offer.target_time)
    }

    fn pointer_or_query(&mut self, pointer: Option<PointerState>) -> PointerState {
        pointer.unwrap_or_else(|| {
            self.backend.pointer_state().unwrap_or_else(|err| {
                warn!(?err, "Failed to query pointer state");
                PointerState::default()
            })
        })
    }

    /// Position of `point` inside `window`, and the window's outline in root coordinates
    fn locate(&mut self, window: X11Window, point: Point<i32, Root>) -> Option<(Point<i32, Local>, Rectangle<i32, Root>)> {
        let root = self.windows.get(&window)?.root;
        let translated = self
            .backend
            .translate_coordinates(root, window, point.to_local(Point::default()))
            .and_then(|translated| Ok(translated.zip(self.backend.window_geometry(window)?)));
        match translated {
            Ok(Some((translated, geometry))) => {
                let local = translated.point;
                let origin = Point::<i32, Root>::new(point.x - local.x, point.y - local.y);
                let outline = Rectangle::from_loc_and_size(origin, (geometry.rect.size.w, geometry.rect.size.h));
                Some((local, outline))
            }
            Ok(None) => None,
            Err(err) => {
                warn!(window, ?err, "Failed to translate drag position");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn handle_position<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        window: X11Window,
        source: X11Window,
        point: Point<i32, Root>,
        time: Timestamp,
        action: DndAction,
        pointer: Option<PointerState>,
    ) {
        let Some(offer) = self.offer.as_ref() else {
            debug!(window, source, "Received XdndPosition without XdndEnter, ignoring..");
            return;
        };
        if offer.source != source {
            debug!(
                window,
                source,
                expected = offer.source,
                "Received XdndPosition from stale source, ignoring.."
            );
            return;
        }
        let Some(kind) = self.windows.get(&window).map(|local| local.kind) else {
            debug!(window, "Received XdndPosition for unknown window, ignoring..");
            return;
        };

        let local_session = self.local_session(source, crate::backend::CURRENT_TIME);
        let supported = match local_session.as_ref() {
            Some(session) => session.supported_actions(),
            None => action.as_flags(),
        };
        let pointer = self.pointer_or_query(pointer);
        let located = self.locate(window, point);

        let Some(offer) = self.offer.as_mut() else {
            return;
        };
        offer.window = window;
        offer.supported = supported;
        offer.proposed = action;
        offer.target_time = time;

        let (response, rect) = match located {
            Some((local, outline)) if kind == WindowKind::Normal => {
                offer.position = local;
                let motion = DragMotion {
                    point: local,
                    mime_types: &offer.mime_types,
                    supported,
                    proposed: action,
                    buttons: pointer.buttons,
                    modifiers: pointer.modifiers,
                    local: local_session.is_some(),
                };
                let response = handler.drag_motion(window, &motion);
                let rect = response
                    .answer_rect
                    .and_then(|rect| rect.to_root(outline.loc).intersection(outline))
                    .map(clamp_answer_rect)
                    .filter(|rect| !rect.is_empty());
                (response, rect)
            }
            _ => (DragResponse::refuse(), None),
        };

        offer.accepted_action = if response.accepted {
            response.action
        } else {
            DndAction::None
        };
        trace!(window, accepted = response.accepted, action = ?response.action, ?rect, "Answering drag position");

        let (source, proxy) = (offer.source, offer.proxy);
        let status = XdndMessage::Status {
            target: window,
            accept: response.accepted,
            rect,
            action: response.action,
        };
        self.reply(handler, source, proxy, status);
    }

    pub(super) fn handle_leave<H: XdndHandler>(&mut self, handler: &mut H, window: X11Window, source: X11Window) {
        let Some(offer) = self.offer.as_ref() else {
            debug!(window, source, "Received XdndLeave without XdndEnter, ignoring..");
            return;
        };
        if offer.source != source {
            debug!(
                window,
                source,
                expected = offer.source,
                "Received XdndLeave from stale source, ignoring.."
            );
            return;
        }
        if offer.dropped {
            debug!(window, source, "Received XdndLeave after drop, ignoring..");
            return;
        }

        if let Some(offer) = self.offer.take() {
            debug!(window = offer.window, source, "Drag left");
            handler.drag_left(offer.window);
        }
    }

    pub(super) fn handle_drop<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        window: X11Window,
        source: X11Window,
        time: Timestamp,
        actions: DndActions,
        pointer: Option<PointerState>,
    ) {
        let Some(offer) = self.offer.as_ref() else {
            debug!(window, source, "Received XdndDrop without XdndEnter, ignoring..");
            return;
        };
        if offer.source != source {
            debug!(
                window,
                source,
                expected = offer.source,
                "Received XdndDrop from stale source, ignoring.."
            );
            return;
        }

        let pointer = self.pointer_or_query(pointer);
        let local_session = self.local_session(source, time);
        let registered = self
            .windows
            .get(&window)
            .is_some_and(|local| local.kind == WindowKind::Normal);

        let Some(offer) = self.offer.as_mut() else {
            return;
        };
        offer.target_time = time;
        offer.dropped = true;
        let supported = match local_session.as_ref() {
            Some(session) => session.supported_actions(),
            None if !actions.is_empty() => actions,
            None => offer.supported | offer.accepted_action.as_flags(),
        };

        let response = if registered {
            let motion = DragMotion {
                point: offer.position,
                mime_types: &offer.mime_types,
                supported,
                proposed: offer.proposed,
                buttons: pointer.buttons,
                modifiers: pointer.modifiers,
                local: local_session.is_some(),
            };
            handler.drop_performed(window, &motion)
        } else {
            debug!(window, "Drop on a window that does not take drops");
            DropResponse::refuse()
        };
        let action = if response.accepted {
            response.action
        } else {
            DndAction::None
        };
        offer.accepted_action = action;
        debug!(window, source, accepted = response.accepted, ?action, "Drop performed");

        let (source, proxy) = (offer.source, offer.proxy);
        let finished = XdndMessage::Finished {
            target: window,
            accept: response.accepted,
            action,
        };
        self.reply(handler, source, proxy, finished);
    }

    /// Send a message from a drop target back to the drag source
    fn reply<H: XdndHandler>(&mut self, handler: &mut H, source: X11Window, proxy: X11Window, msg: XdndMessage) {
        if source == self.selection_window {
            trace!(?msg, "Delivering XDND reply locally");
            self.handle_message(handler, source, msg);
        } else {
            self.send_message(proxy, source, msg);
        }
    }
}

fn clamp_answer_rect(rect: Rectangle<i32, Root>) -> Rectangle<i32, Root> {
    let left = rect.loc.x.clamp(0, MAX_ANSWER_COORD);
    let top = rect.loc.y.clamp(0, MAX_ANSWER_COORD);
    let right = rect.loc.x.saturating_add(rect.size.w).clamp(left, MAX_ANSWER_COORD);
    let bottom = rect.loc.y.saturating_add(rect.size.h).clamp(top, MAX_ANSWER_COORD);
    Rectangle::from_extremities((left, top), (right, bottom))
}
