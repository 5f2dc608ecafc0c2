//! Data transfers through the `XdndSelection`
//!
//! As a drop target the engine converts the selection into a property of its selection window
//! and collects the result, following the `INCR` protocol for large data. As a drag source it
//! answers the conversion requests of drop targets, splitting large data into chunks.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{mime, resolver, DragSession, TimerKind, XdndHandler, XdndState};
use crate::backend::{
    Atom, BackendError, Property, PropertyNotify, PropertyState, SelectionNotify, SelectionRequest, Timestamp,
    WindowSystem, X11Window, CURRENT_TIME, NONE,
};
use crate::utils::{Monotonic, Time};

/// Maximum length of a property read, in 32-bit units
const MAX_PROPERTY_LEN: u32 = u32::MAX / 4;

/// Identifies a data request started with [`XdndState::request_data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u64);

#[derive(Debug)]
enum IncomingState {
    /// The selection conversion was requested
    Requested,
    /// The data arrives in chunks
    Receiving { type_: Atom, data: Vec<u8> },
    Complete(Vec<u8>),
    TimedOut,
    Failed,
}

#[derive(Debug)]
pub(super) struct IncomingTransfer {
    id: TransferId,
    mime_type: String,
    target: Atom,
    property: Atom,
    state: IncomingState,
    deadline: Time<Monotonic>,
}

#[derive(Debug)]
pub(super) struct OutgoingTransfer {
    requestor: X11Window,
    property: Atom,
    type_: Atom,
    format: u8,
    data: Vec<u8>,
    chunk_size: usize,
    /// The final 0-byte data chunk has been sent, denoting the completion of this transfer
    sent_finished: bool,
    deadline: Time<Monotonic>,
}

impl OutgoingTransfer {
    fn flush_data<B: WindowSystem>(&mut self, backend: &mut B) -> Result<usize, BackendError> {
        let len = std::cmp::min(self.data.len(), self.chunk_size);

        if len == 0 {
            // This flush will complete the transfer
            self.sent_finished = true;
        }

        let mut data = self.data.split_off(len);
        std::mem::swap(&mut data, &mut self.data);

        let chunk = Property {
            type_: self.type_,
            format: self.format,
            value: data,
        };
        backend.change_property(self.requestor, self.property, &chunk)?;
        backend.flush()?;

        Ok(self.data.len())
    }
}

/// Read and delete a property, deleting it also tells an `INCR` sender to go on
fn take_property<B: WindowSystem>(
    backend: &mut B,
    window: X11Window,
    property: Atom,
) -> Result<Option<Property>, BackendError> {
    let value = backend.get_property(window, property, None, MAX_PROPERTY_LEN)?;
    backend.delete_property(window, property)?;
    backend.flush()?;
    Ok(value)
}

impl<B: WindowSystem> XdndState<B> {
    /// Fetch the dropped data of `mime_type`
    ///
    /// The data is delivered through [`XdndHandler::data_received`], synchronously if the drag
    /// comes from this process. Returns `None` if no drag is offered to the local windows.
    pub fn request_data<H: XdndHandler>(&mut self, handler: &mut H, mime_type: &str) -> Option<TransferId> {
        let offer = self.offer.as_ref()?;
        let types = offer.types.clone();
        let time = offer.target_time;
        let id = TransferId(self.next_id());

        if let Some(session) = self.local_offer_session() {
            let data = session.data().data(mime_type);
            trace!(?id, mime_type, available = data.is_some(), "Serving data of local drag");
            handler.data_received(id, mime_type, data);
            return Some(id);
        }

        match self.start_fetch(id, mime_type, &types, time) {
            Ok(true) => {}
            Ok(false) => handler.data_received(id, mime_type, None),
            Err(err) => {
                warn!(mime_type, ?err, "Failed to request drag data");
                handler.data_received(id, mime_type, None);
            }
        }
        Some(id)
    }

    fn start_fetch(
        &mut self,
        id: TransferId,
        mime_type: &str,
        types: &mime::TypeList,
        time: Timestamp,
    ) -> Result<bool, BackendError> {
        let Some(target) = mime::atom_for_format(&mut self.backend, &self.atoms, mime_type, types)? else {
            debug!(mime_type, "Format is not offered by the drag");
            return Ok(false);
        };
        if self.backend.selection_owner(self.atoms.XdndSelection)? == NONE {
            debug!(mime_type, "XdndSelection has no owner anymore");
            return Ok(false);
        }

        let property = self.transfer_property()?;
        self.backend.convert_selection(
            self.selection_window,
            self.atoms.XdndSelection,
            target,
            property,
            time,
        )?;
        self.backend.flush()?;
        debug!(?id, mime_type, target, property, time, "Requested drag data");

        self.incoming.push(IncomingTransfer {
            id,
            mime_type: mime_type.to_owned(),
            target,
            property,
            state: IncomingState::Requested,
            deadline: self.clock.now() + self.config.transfer_timeout,
        });
        self.timer
            .arm(TimerKind::TransferDeadline, self.config.transfer_timeout);
        Ok(true)
    }

    /// A property of the selection window not used by a running transfer
    fn transfer_property(&mut self) -> Result<Atom, BackendError> {
        let free = self
            .transfer_properties
            .iter()
            .copied()
            .find(|property| !self.incoming.iter().any(|t| t.property == *property));
        if let Some(property) = free {
            return Ok(property);
        }

        let name = format!("_XDND_ENGINE_DATA{}", self.transfer_properties.len());
        let property = self.backend.intern_atom(&name)?;
        self.transfer_properties.push(property);
        Ok(property)
    }

    pub(super) fn handle_selection_notify<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        notify: &SelectionNotify,
    ) -> bool {
        if notify.requestor != self.selection_window || notify.selection != self.atoms.XdndSelection {
            return false;
        }

        let Some(idx) = self.incoming.iter().position(|transfer| {
            matches!(transfer.state, IncomingState::Requested)
                && transfer.target == notify.target
                && (notify.property == NONE || transfer.property == notify.property)
        }) else {
            debug!(target = notify.target, "Received unexpected SelectionNotify, ignoring..");
            return true;
        };

        let state = if notify.property == NONE {
            debug!(target = notify.target, "Drag source refused the conversion");
            IncomingState::Failed
        } else {
            match take_property(&mut self.backend, self.selection_window, notify.property) {
                Ok(Some(value)) if value.type_ == self.atoms.INCR => {
                    trace!(target = notify.target, "Transfer became incremental");
                    IncomingState::Receiving {
                        type_: NONE,
                        data: Vec::new(),
                    }
                }
                Ok(Some(value)) => IncomingState::Complete(mime::convert_incoming(
                    &self.atoms,
                    notify.target,
                    value.type_,
                    value.value,
                )),
                Ok(None) => {
                    debug!(property = notify.property, "Converted selection property is missing");
                    IncomingState::Failed
                }
                Err(err) => {
                    warn!(?err, "Failed to read converted selection");
                    IncomingState::Failed
                }
            }
        };

        self.advance_incoming(handler, idx, state);
        true
    }

    pub(super) fn handle_property_notify<H: XdndHandler>(
        &mut self,
        handler: &mut H,
        notify: &PropertyNotify,
    ) -> bool {
        if notify.window == self.selection_window {
            let Some(idx) = self
                .incoming
                .iter()
                .position(|transfer| transfer.property == notify.atom)
            else {
                return false;
            };
            // deletions are our own, and new values before the SelectionNotify are not ours to take
            if notify.state != PropertyState::NewValue
                || !matches!(self.incoming[idx].state, IncomingState::Receiving { .. })
            {
                return true;
            }

            let chunk = match take_property(&mut self.backend, self.selection_window, notify.atom) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return true,
                Err(err) => {
                    warn!(?err, "Failed to read incremental chunk");
                    self.advance_incoming(handler, idx, IncomingState::Failed);
                    return true;
                }
            };

            let transfer = &mut self.incoming[idx];
            let IncomingState::Receiving { type_, data } = &mut transfer.state else {
                return true;
            };
            let state = if chunk.value.is_empty() {
                debug!(id = ?transfer.id, len = data.len(), "Incr transfer completed");
                IncomingState::Complete(mime::convert_incoming(
                    &self.atoms,
                    transfer.target,
                    *type_,
                    std::mem::take(data),
                ))
            } else {
                trace!(id = ?transfer.id, "Received data chunk: {} bytes", chunk.value.len());
                data.extend_from_slice(&chunk.value);
                IncomingState::Receiving {
                    type_: chunk.type_,
                    data: std::mem::take(data),
                }
            };
            self.advance_incoming(handler, idx, state);
            return true;
        }

        if notify.state != PropertyState::Deleted {
            return false;
        }
        let Some(idx) = self
            .outgoing
            .iter()
            .position(|transfer| transfer.requestor == notify.window && transfer.property == notify.atom)
        else {
            return false;
        };

        let transfer = &mut self.outgoing[idx];
        if transfer.sent_finished {
            debug!(requestor = transfer.requestor, "Incr transfer completed");
            self.outgoing.remove(idx);
        } else {
            match transfer.flush_data(&mut self.backend) {
                Ok(remaining) => {
                    trace!(requestor = transfer.requestor, remaining, "Sent data chunk");
                    transfer.deadline = self.clock.now() + self.config.transfer_timeout;
                }
                Err(err) => {
                    warn!(requestor = transfer.requestor, ?err, "Failed to send data chunk, aborting transfer");
                    self.outgoing.remove(idx);
                }
            }
        }
        self.update_transfer_timer();
        true
    }

    fn advance_incoming<H: XdndHandler>(&mut self, handler: &mut H, idx: usize, state: IncomingState) {
        let deadline = self.clock.now() + self.config.transfer_timeout;
        let transfer = &mut self.incoming[idx];
        let running = matches!(state, IncomingState::Requested | IncomingState::Receiving { .. });
        transfer.state = state;
        if running {
            transfer.deadline = deadline;
        } else {
            let transfer = self.incoming.remove(idx);
            self.finish_incoming(handler, transfer);
        }
    }

    fn finish_incoming<H: XdndHandler>(&mut self, handler: &mut H, transfer: IncomingTransfer) {
        let data = match transfer.state {
            IncomingState::Complete(data) => Some(data),
            IncomingState::TimedOut => {
                debug!(id = ?transfer.id, mime_type = %transfer.mime_type, "Transfer timed out");
                if let Err(err) = self
                    .backend
                    .delete_property(self.selection_window, transfer.property)
                {
                    warn!(?err, "Failed to clean up transfer property");
                }
                None
            }
            _ => None,
        };
        debug!(
            id = ?transfer.id,
            mime_type = %transfer.mime_type,
            len = ?data.as_ref().map(Vec::len),
            "Transfer done"
        );
        handler.data_received(transfer.id, &transfer.mime_type, data);
        self.update_transfer_timer();
    }

    fn update_transfer_timer(&mut self) {
        if self.incoming.is_empty() && self.outgoing.is_empty() && self.timer.is_armed(TimerKind::TransferDeadline) {
            self.timer.disarm(TimerKind::TransferDeadline);
        }
    }

    pub(super) fn expire_transfers<H: XdndHandler>(&mut self, handler: &mut H, now: Time<Monotonic>) {
        let (expired, kept) = std::mem::take(&mut self.incoming)
            .into_iter()
            .partition::<Vec<_>, _>(|transfer| transfer.deadline <= now);
        self.incoming = kept;
        for mut transfer in expired {
            transfer.state = IncomingState::TimedOut;
            self.finish_incoming(handler, transfer);
        }

        self.outgoing.retain(|transfer| {
            let alive = transfer.deadline > now;
            if !alive {
                debug!(requestor = transfer.requestor, "Requestor stopped reading, aborting transfer");
            }
            alive
        });
        self.update_transfer_timer();
    }

    pub(super) fn handle_selection_request(&mut self, request: &SelectionRequest) -> bool {
        if request.selection != self.atoms.XdndSelection {
            return false;
        }
        // obsolete clients leave the property to us
        let property = if request.property == NONE {
            request.target
        } else {
            request.property
        };

        let served = match self.session_for_request(request) {
            Some(session) => self
                .serve_request(request, property, &session)
                .unwrap_or_else(|err| {
                    warn!(requestor = request.requestor, ?err, "Failed to serve drag data");
                    false
                }),
            None => {
                debug!(
                    requestor = request.requestor,
                    time = request.time,
                    "No drag matches the selection request"
                );
                false
            }
        };

        let notify = SelectionNotify {
            time: request.time,
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property: if served { property } else { NONE },
        };
        let destination = resolver::get_proxy_window(&mut self.backend, &self.atoms, request.requestor)
            .ok()
            .flatten()
            .unwrap_or(request.requestor);
        if let Err(err) = self
            .backend
            .send_selection_notify(destination, &notify)
            .and_then(|_| self.backend.flush())
        {
            warn!(destination, ?err, "Failed to send SelectionNotify");
        }
        true
    }

    /// The drag whose data `request` asks for
    fn session_for_request(&mut self, request: &SelectionRequest) -> Option<Arc<DragSession>> {
        if let Some(drag) = self.drag.as_ref() {
            if request.time == drag.source_time() || request.time == CURRENT_TIME {
                return Some(Arc::clone(drag.session()));
            }
        }
        if let Some(transaction) = self.ledger.find_by_timestamp(request.time) {
            return Some(Arc::clone(&transaction.session));
        }
        if let Some(transaction) = self.ledger.find_by_target(request.requestor) {
            return Some(Arc::clone(&transaction.session));
        }

        // the requestor may be a window embedded into the drop target
        let ancestor = resolver::find_aware_ancestor(&mut self.backend, &self.atoms, request.requestor)
            .unwrap_or_else(|err| {
                warn!(requestor = request.requestor, ?err, "Failed to search XdndAware ancestor");
                None
            })?;
        self.ledger
            .find_by_target(ancestor)
            .map(|transaction| Arc::clone(&transaction.session))
    }

    fn serve_request(
        &mut self,
        request: &SelectionRequest,
        property: Atom,
        session: &DragSession,
    ) -> Result<bool, BackendError> {
        if request.target == self.atoms.TARGETS {
            let targets = std::iter::once(self.atoms.TARGETS)
                .chain(session.types().iter())
                .collect::<Vec<_>>();
            let value = Property::from_u32s(self.atoms.ATOM, &targets);
            self.backend.change_property(request.requestor, property, &value)?;
            return Ok(true);
        }

        if !session.types().contains(request.target) {
            debug!(target = request.target, "Requested type is not offered");
            return Ok(false);
        }
        let format = mime::format_for_atom(&mut self.backend, &self.atoms, request.target)?;
        let Some(data) = session.data().data(&format) else {
            debug!(%format, "Drag data is not available");
            return Ok(false);
        };
        let converted = mime::convert_outgoing(&self.atoms, request.target, &format, data);

        if converted.data.len() > self.config.incr_chunk_size {
            trace!(
                requestor = request.requestor,
                len = converted.data.len(),
                "Transfer became incremental"
            );
            self.backend.watch_properties(request.requestor)?;
            let len = u32::try_from(converted.data.len()).unwrap_or(u32::MAX);
            let marker = Property::from_u32s(self.atoms.INCR, &[len]);
            self.backend.change_property(request.requestor, property, &marker)?;
            self.outgoing.push(OutgoingTransfer {
                requestor: request.requestor,
                property,
                type_: converted.type_,
                format: converted.format,
                data: converted.data,
                chunk_size: self.config.incr_chunk_size,
                sent_finished: false,
                deadline: self.clock.now() + self.config.transfer_timeout,
            });
            self.timer
                .arm(TimerKind::TransferDeadline, self.config.transfer_timeout);
        } else {
            let value = Property {
                type_: converted.type_,
                format: converted.format,
                value: converted.data,
            };
            self.backend.change_property(request.requestor, property, &value)?;
        }
        Ok(true)
    }
}
