use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc, time::Duration};

use calloop::{
    timer::{TimeoutAction, Timer},
    LoopHandle, RegistrationToken,
};
use tracing::warn;

/// Timers used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Periodic expiry of drop transactions that never finished
    TransactionSweep,
    /// Periodic expiry of stalled data transfers
    TransferDeadline,
}

/// Periodic timers driving the engine
///
/// While a kind is armed, the event loop is expected to call
/// [`XdndState::handle_timeout`](super::XdndState::handle_timeout) every `interval`.
pub trait EngineTimer: fmt::Debug {
    /// Start firing `kind` periodically, no-op if it is already armed
    fn arm(&mut self, kind: TimerKind, interval: Duration);
    /// Stop firing `kind`
    fn disarm(&mut self, kind: TimerKind);
    /// Whether `kind` is armed
    fn is_armed(&self, kind: TimerKind) -> bool;
}

/// Handler for timers of a [`CalloopTimer`]
pub trait XdndTimeoutHandler {
    /// A timer fired, forward it to [`XdndState::handle_timeout`](super::XdndState::handle_timeout)
    fn xdnd_timeout(&mut self, kind: TimerKind);
}

#[derive(Debug)]
struct TimerSource {
    token: RegistrationToken,
    interval: Duration,
    armed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    sources: HashMap<TimerKind, TimerSource>,
    dispatching: Option<TimerKind>,
}

/// [`EngineTimer`] on top of calloop timer sources
pub struct CalloopTimer<D: 'static> {
    handle: LoopHandle<'static, D>,
    inner: Rc<RefCell<Inner>>,
}

impl<D: 'static> fmt::Debug for CalloopTimer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalloopTimer")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<D: XdndTimeoutHandler + 'static> CalloopTimer<D> {
    /// Create a timer inserting its sources into the loop of `handle`
    pub fn new(handle: LoopHandle<'static, D>) -> CalloopTimer<D> {
        CalloopTimer {
            handle,
            inner: Rc::new(RefCell::new(Inner::default())),
        }
    }
}

impl<D: XdndTimeoutHandler + 'static> EngineTimer for CalloopTimer<D> {
    fn arm(&mut self, kind: TimerKind, interval: Duration) {
        let mut inner = self.inner.borrow_mut();
        if let Some(source) = inner.sources.get_mut(&kind) {
            source.interval = interval;
            source.armed = true;
            return;
        }

        let shared = self.inner.clone();
        let token = self
            .handle
            .insert_source(Timer::from_duration(interval), move |_, _, state| {
                shared.borrow_mut().dispatching = Some(kind);
                state.xdnd_timeout(kind);

                let mut inner = shared.borrow_mut();
                inner.dispatching = None;
                match inner.sources.get(&kind) {
                    Some(source) if source.armed => TimeoutAction::ToDuration(source.interval),
                    _ => {
                        inner.sources.remove(&kind);
                        TimeoutAction::Drop
                    }
                }
            });

        match token {
            Ok(token) => {
                inner.sources.insert(
                    kind,
                    TimerSource {
                        token,
                        interval,
                        armed: true,
                    },
                );
            }
            Err(err) => warn!(?kind, ?err, "Failed to insert timer source"),
        }
    }

    fn disarm(&mut self, kind: TimerKind) {
        let mut inner = self.inner.borrow_mut();
        if inner.dispatching == Some(kind) {
            // the source is dropped once its callback returns
            if let Some(source) = inner.sources.get_mut(&kind) {
                source.armed = false;
            }
        } else if let Some(source) = inner.sources.remove(&kind) {
            self.handle.remove(source.token);
        }
    }

    fn is_armed(&self, kind: TimerKind) -> bool {
        self.inner
            .borrow()
            .sources
            .get(&kind)
            .is_some_and(|source| source.armed)
    }
}
