//! Scoped subscriptions to the ledger log stream of a battle account.
//!
//! A [`LogSubscription`] is opened on match entry and releases its stream
//! when dropped, so every exit path of a session (normal end, disconnect,
//! error propagation) unsubscribes.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use royale_core::reconcile::LedgerLog;

use crate::error::Result;

/// Handle for one open subscription.
pub type SubscriptionId = u64;

/// Anything that streams ledger logs for an account.
pub trait LogSource: Send + Sync + 'static {
    /// Start streaming logs for `account`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Subscription`](crate::error::RelayError::Subscription)
    /// if the stream cannot be opened.
    fn subscribe(
        &self,
        account: u64,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<LedgerLog>)>;

    /// Stop the stream. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// An open log stream that unsubscribes on drop.
///
/// The source defaults to a trait object so sessions can hold any ledger.
pub struct LogSubscription<S: LogSource + ?Sized = dyn LogSource> {
    source: Arc<S>,
    id: SubscriptionId,
    account: u64,
    receiver: mpsc::UnboundedReceiver<LedgerLog>,
}

impl<S: LogSource + ?Sized> LogSubscription<S> {
    /// Subscribe to `account` on `source`.
    ///
    /// # Errors
    ///
    /// Propagates the source's subscription error.
    pub fn open(source: Arc<S>, account: u64) -> Result<Self> {
        let (id, receiver) = source.subscribe(account)?;
        debug!(account, id, "ledger log subscription opened");
        Ok(Self {
            source,
            id,
            account,
            receiver,
        })
    }

    /// Account this stream follows.
    #[must_use]
    pub const fn account(&self) -> u64 {
        self.account
    }

    /// Wait for the next log. `None` once the source closes the stream.
    pub async fn recv(&mut self) -> Option<LedgerLog> {
        self.receiver.recv().await
    }

    /// Next log if one is already queued.
    pub fn try_recv(&mut self) -> Option<LedgerLog> {
        self.receiver.try_recv().ok()
    }
}

impl<S: LogSource + ?Sized> fmt::Debug for LogSubscription<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSubscription")
            .field("id", &self.id)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl<S: LogSource + ?Sized> Drop for LogSubscription<S> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
        debug!(account = self.account, id = self.id, "ledger log subscription released");
    }
}

#[derive(Debug, Default)]
struct Subscribers {
    next_id: SubscriptionId,
    open: Vec<(SubscriptionId, u64, mpsc::UnboundedSender<LedgerLog>)>,
}

/// In-process log source. Logs are delivered to every open subscription
/// of the account they are published on.
#[derive(Debug, Default)]
pub struct LocalLedger {
    subscribers: Mutex<Subscribers>,
}

impl LocalLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `log` to the subscribers of `account`. Returns how many
    /// received it.
    pub fn publish(&self, account: u64, log: &LedgerLog) -> usize {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers
            .open
            .iter()
            .filter(|(_, key, _)| *key == account)
            .filter(|(_, _, sender)| sender.send(log.clone()).is_ok())
            .count()
    }

    /// Open subscriptions on `account`.
    #[must_use]
    pub fn subscriber_count(&self, account: u64) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .iter()
            .filter(|(_, key, _)| *key == account)
            .count()
    }
}

impl LogSource for LocalLedger {
    fn subscribe(
        &self,
        account: u64,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<LedgerLog>)> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        subscribers.open.push((id, account, sender));
        Ok((id, receiver))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .retain(|(open, _, _)| *open != id);
    }
}
