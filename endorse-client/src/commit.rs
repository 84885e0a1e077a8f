//! Commit confirmation: one shared event subscription fanned out to many
//! pending transactions by id.

use crate::error::CommitError;
use crate::transport::{CommitEventSource, CommitStream, LedgerQuery};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use endorse_common::{CommitEvent, TransactionId, TxValidation};
use futures::StreamExt;
use log::{debug, info, trace, warn};
use tokio::{
    sync::{oneshot, Mutex as AsyncMutex},
    time::{self, Instant},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitFailure {
    /// The event source broke before the transaction was seen.
    Stream(String),
    /// The transaction made it into a block but the ledger refused it.
    Invalidated(String),
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(reason) => write!(f, "event stream failed: {reason}"),
            Self::Invalidated(reason) => write!(f, "invalidated: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    Pending,
    Committed(u64),
    TimedOut,
    Failed(CommitFailure),
}

impl CommitStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

enum Delivery {
    Event(CommitEvent),
    StreamFailed(String),
}

struct Watch {
    id: u64,
    sender: oneshot::Sender<Delivery>,
}

#[derive(Default)]
struct Registry {
    watches: HashMap<TransactionId, Vec<Watch>>,
    next_id: u64,
    // Dropping this stops the running dispatcher.
    dispatcher: Option<oneshot::Sender<()>>,
}

impl Registry {
    fn register(&mut self, tx_id: TransactionId) -> (u64, oneshot::Receiver<Delivery>) {
        let (sender, receiver) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.watches
            .entry(tx_id)
            .or_default()
            .push(Watch { id, sender });
        (id, receiver)
    }

    fn deregister(&mut self, tx_id: &TransactionId, id: u64) {
        if let Some(watches) = self.watches.get_mut(tx_id) {
            watches.retain(|watch| watch.id != id);
            if watches.is_empty() {
                self.watches.remove(tx_id);
            }
        }
    }

    fn pending(&self) -> usize {
        self.watches.values().map(Vec::len).sum()
    }

    fn fail_all(&mut self, reason: &str) {
        for (_, watches) in self.watches.drain() {
            for watch in watches {
                let _ = watch.sender.send(Delivery::StreamFailed(reason.to_string()));
            }
        }
    }
}

struct Shared {
    registry: Mutex<Registry>,
    subscribe_lock: AsyncMutex<()>,
    source: Arc<dyn CommitEventSource>,
    ledger: Arc<dyn LedgerQuery>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out `CommitHandle`s and feeds them from a single subscription.
///
/// The subscription is opened on the first watch and reopened on the first
/// watch after it broke. Registration and delivery only ever touch the
/// registry under its lock, so concurrent watches never see each other's events.
#[derive(Clone)]
pub struct CommitWatcher {
    shared: Arc<Shared>,
}

impl CommitWatcher {
    pub fn new(source: Arc<dyn CommitEventSource>, ledger: Arc<dyn LedgerQuery>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Default::default(),
                subscribe_lock: AsyncMutex::new(()),
                source,
                ledger,
            }),
        }
    }

    /// Registers interest in `tx_id` until `deadline`. Call before the
    /// transaction is sent to ordering so its commit event cannot be missed.
    pub async fn watch(
        &self,
        tx_id: TransactionId,
        deadline: Instant,
    ) -> Result<CommitHandle, CommitError> {
        let (watch_id, receiver) = self.shared.registry().register(tx_id.clone());
        // Built before subscribing so an error below deregisters on drop.
        let handle = CommitHandle {
            tx_id,
            watch_id,
            deadline,
            receiver,
            status: CommitStatus::Pending,
            shared: Arc::clone(&self.shared),
        };
        self.ensure_subscribed().await?;
        trace!("watching {}", handle.tx_id);
        Ok(handle)
    }

    /// Number of registered watches that have not been resolved or released.
    pub fn pending_watches(&self) -> usize {
        self.shared.registry().pending()
    }

    async fn ensure_subscribed(&self) -> Result<(), CommitError> {
        let _guard = self.shared.subscribe_lock.lock().await;
        if self.shared.registry().dispatcher.is_some() {
            return Ok(());
        }
        let stream = self
            .shared
            .source
            .subscribe()
            .await
            .map_err(CommitError::Subscribe)?;
        let (stop, stopped) = oneshot::channel();
        self.shared.registry().dispatcher = Some(stop);
        debug!("subscribed to commit events");
        tokio::spawn(dispatch(Arc::downgrade(&self.shared), stream, stopped));
        Ok(())
    }
}

async fn dispatch(
    shared: Weak<Shared>,
    mut stream: CommitStream,
    mut stopped: oneshot::Receiver<()>,
) {
    let reason = loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = &mut stopped => return,
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match next {
            Some(Ok(event)) => {
                let watches = shared
                    .registry()
                    .watches
                    .remove(&event.tx_id)
                    .unwrap_or_default();
                trace!(
                    "commit event for {} in block {}, {} watching",
                    event.tx_id,
                    event.block_number,
                    watches.len()
                );
                for watch in watches {
                    let _ = watch.sender.send(Delivery::Event(event.clone()));
                }
            }
            Some(Err(e)) => break e.to_string(),
            None => break "commit event stream ended".to_string(),
        }
    };

    if let Some(shared) = shared.upgrade() {
        let mut registry = shared.registry();
        registry.dispatcher = None;
        warn!(
            "{}, failing {} pending watches",
            reason,
            registry.pending()
        );
        registry.fail_all(&reason);
    }
}

/// A pending commit confirmation for one transaction.
///
/// Dropping or cancelling the handle releases its registration; other
/// watches on the same subscription are unaffected.
pub struct CommitHandle {
    tx_id: TransactionId,
    watch_id: u64,
    deadline: Instant,
    receiver: oneshot::Receiver<Delivery>,
    status: CommitStatus,
    shared: Arc<Shared>,
}

impl CommitHandle {
    pub fn transaction_id(&self) -> &TransactionId {
        &self.tx_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn status(&self) -> &CommitStatus {
        &self.status
    }

    /// Suspends until the transaction is committed, fails, or the deadline passes.
    /// Once terminal, the status never changes and later calls return it at once.
    pub async fn wait(&mut self) -> CommitStatus {
        if self.status.is_terminal() {
            return self.status.clone();
        }
        let status = match time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(Delivery::Event(event))) => self.resolve(event).await,
            Ok(Ok(Delivery::StreamFailed(reason))) => {
                CommitStatus::Failed(CommitFailure::Stream(reason))
            }
            Ok(Err(_)) => {
                CommitStatus::Failed(CommitFailure::Stream("commit watcher shut down".into()))
            }
            Err(_) => {
                self.release();
                debug!("{} not committed before the deadline", self.tx_id);
                CommitStatus::TimedOut
            }
        };
        self.status = status.clone();
        status
    }

    /// Like `wait`, with the outcome as a `Result` carrying the block number.
    pub async fn committed(mut self) -> Result<u64, CommitError> {
        match self.wait().await {
            CommitStatus::Committed(block_number) => Ok(block_number),
            CommitStatus::TimedOut | CommitStatus::Pending => Err(CommitError::CommitTimeout {
                tx_id: self.tx_id.clone(),
            }),
            CommitStatus::Failed(CommitFailure::Stream(reason)) => {
                Err(CommitError::WatchStreamFailure {
                    tx_id: self.tx_id.clone(),
                    reason,
                })
            }
            CommitStatus::Failed(CommitFailure::Invalidated(reason)) => {
                Err(CommitError::Invalidated {
                    tx_id: self.tx_id.clone(),
                    reason,
                })
            }
        }
    }

    pub fn cancel(self) {
        trace!("cancelled watch on {}", self.tx_id);
    }

    async fn resolve(&self, event: CommitEvent) -> CommitStatus {
        if let TxValidation::Invalid(reason) = event.validation {
            warn!("{} invalidated in block {}: {}", self.tx_id, event.block_number, reason);
            return CommitStatus::Failed(CommitFailure::Invalidated(reason));
        }
        let lookup = self.shared.ledger.block_by_transaction_id(&self.tx_id);
        let block_number = match time::timeout_at(self.deadline, lookup).await {
            Ok(Ok(block_number)) => block_number,
            Ok(Err(e)) => {
                warn!(
                    "block lookup for {} failed ({}), using block {} from the commit event",
                    self.tx_id, e, event.block_number
                );
                event.block_number
            }
            Err(_) => {
                warn!(
                    "block lookup for {} ran past the deadline, using event block {}",
                    self.tx_id, event.block_number
                );
                event.block_number
            }
        };
        info!("{} committed in block {}", self.tx_id, block_number);
        CommitStatus::Committed(block_number)
    }

    fn release(&self) {
        self.shared.registry().deregister(&self.tx_id, self.watch_id);
    }
}

impl Drop for CommitHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CommitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitHandle")
            .field("tx_id", &self.tx_id)
            .field("status", &self.status)
            .finish()
    }
}
