use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use super::{source::DragSession, EngineTimer, TimerKind};
use crate::backend::{Timestamp, X11Window};
use crate::utils::{Monotonic, Time};

/// A drop that was sent, waiting for the target to finish
#[derive(Debug)]
pub struct DropTransaction {
    /// Timestamp of the drop message, used by the target for selection requests
    pub timestamp: Timestamp,
    /// The window the drop was sent to
    pub target: X11Window,
    /// The window receiving messages for `target`
    pub proxy: X11Window,
    /// The local window handling the drop, if the target is in this process
    pub local: Option<X11Window>,
    /// The drag this drop concludes
    pub session: Arc<DragSession>,
    /// When the drop was sent
    pub created_at: Time<Monotonic>,
}

/// Drop transactions in flight
///
/// Remote transactions expire after the configured timeout, the
/// [`TimerKind::TransactionSweep`] timer is armed while any of them exists.
#[derive(Debug)]
pub struct TransactionLedger {
    transactions: Vec<DropTransaction>,
    timeout: Duration,
}

impl TransactionLedger {
    pub fn new(timeout: Duration) -> TransactionLedger {
        TransactionLedger {
            transactions: Vec::new(),
            timeout,
        }
    }

    /// Insert a transaction, replacing one with the same target and timestamp
    pub fn add(&mut self, transaction: DropTransaction, timer: &mut dyn EngineTimer) -> Option<DropTransaction> {
        let replaced = self
            .transactions
            .iter()
            .position(|t| t.target == transaction.target && t.timestamp == transaction.timestamp)
            .map(|idx| self.transactions.remove(idx));
        if let Some(replaced) = replaced.as_ref() {
            warn!(
                target = replaced.target,
                timestamp = replaced.timestamp,
                "Replacing drop transaction that never finished"
            );
        }

        self.transactions.push(transaction);
        self.update_timer(timer);
        replaced
    }

    /// Remove the transaction sent to `window` or its proxy
    pub fn remove_by_target(
        &mut self,
        window: X11Window,
        timer: &mut dyn EngineTimer,
    ) -> Option<DropTransaction> {
        let idx = self.position_by_target(window)?;
        let transaction = self.transactions.remove(idx);
        self.update_timer(timer);
        Some(transaction)
    }

    /// Remove the transaction of the drop sent at `timestamp`
    pub fn remove_by_timestamp(
        &mut self,
        timestamp: Timestamp,
        timer: &mut dyn EngineTimer,
    ) -> Option<DropTransaction> {
        let idx = self.transactions.iter().position(|t| t.timestamp == timestamp)?;
        let transaction = self.transactions.remove(idx);
        self.update_timer(timer);
        Some(transaction)
    }

    pub fn find_by_target(&self, window: X11Window) -> Option<&DropTransaction> {
        self.position_by_target(window).map(|idx| &self.transactions[idx])
    }

    pub fn find_by_timestamp(&self, timestamp: Timestamp) -> Option<&DropTransaction> {
        self.transactions.iter().find(|t| t.timestamp == timestamp)
    }

    fn position_by_target(&self, window: X11Window) -> Option<usize> {
        self.transactions
            .iter()
            .position(|t| t.target == window || t.proxy == window)
    }

    /// Remove remote transactions older than the timeout
    ///
    /// Local transactions always finish synchronously and never expire.
    pub fn sweep(&mut self, now: Time<Monotonic>, timer: &mut dyn EngineTimer) -> Vec<DropTransaction> {
        let timeout = self.timeout;
        let (expired, kept) = std::mem::take(&mut self.transactions)
            .into_iter()
            .partition::<Vec<_>, _>(|t| t.local.is_none() && t.created_at.duration_since(now) > timeout);
        self.transactions = kept;

        for transaction in &expired {
            debug!(
                target = transaction.target,
                timestamp = transaction.timestamp,
                "Drop transaction expired"
            );
        }

        self.update_timer(timer);
        expired
    }

    fn update_timer(&self, timer: &mut dyn EngineTimer) {
        if self.transactions.iter().any(|t| t.local.is_none()) {
            timer.arm(TimerKind::TransactionSweep, self.timeout);
        } else if timer.is_armed(TimerKind::TransactionSweep) {
            timer.disarm(TimerKind::TransactionSweep);
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }
}
