//! Subscriptions: a caller's handle to a filtered stream of receipts.

use crate::{
    error::Error,
    filter::{ActiveFilter, FilterQuery},
    finalizer::Finalizer,
    listener::Inner,
    receipt::Receipt,
};
use alloy::{primitives::B256, rpc::types::TransactionReceipt};
use dashmap::DashMap;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Most filters a single subscription will hold; extras are dropped with a
/// warning.
const MAX_FILTERS_PER_SUBSCRIBER: usize = 1_000;

/// Concurrent receipt fetches per matching pass.
const MAX_CONCURRENT_RECEIPT_FETCHES: usize = 10;

/// Concurrent refetches per retry pass.
const MAX_CONCURRENT_RECEIPT_RETRIES: usize = 10;

/// Cap on the per-subscription pending-retry map.
const MAX_PENDING_RECEIPTS: usize = 5_000;

/// Fetch attempts before a pending receipt is dropped.
const MAX_RECEIPT_RETRY_ATTEMPTS: u32 = 20;

/// Ceiling on the exponential retry backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(300);

/// A new-filter registration handed to the listener for history backfill.
pub(crate) struct Registration {
    pub(crate) subscriber: Arc<Subscriber>,
    pub(crate) filters: Vec<Arc<ActiveFilter>>,
}

/// A receipt fetch that failed with a provider error, waiting to be retried.
#[derive(Debug, Clone)]
struct PendingFetch {
    receipt: Receipt,
    filter: Arc<ActiveFilter>,
    attempts: u32,
    next_attempt_at: Instant,
}

enum FetchOutcome {
    Reorged,
    Fetched(TransactionReceipt),
    NotFound,
    Failed(Error),
}

/// Listener-side state of a subscription, shared between the listener and
/// the caller's [`Subscription`] handle.
pub(crate) struct Subscriber {
    key: u64,
    weak_self: Weak<Self>,
    listener: Weak<Inner>,
    filters: Mutex<Vec<Arc<ActiveFilter>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Receipt>>>,
    done: CancellationToken,
    finalizer: Mutex<Finalizer>,
    pending: DashMap<B256, PendingFetch>,
    registrations: mpsc::Sender<Registration>,
    next_filter_key: Arc<AtomicU64>,
}

impl Subscriber {
    pub(crate) fn new(
        key: u64,
        listener: Weak<Inner>,
        outbound: mpsc::UnboundedSender<Receipt>,
        registrations: mpsc::Sender<Registration>,
        next_filter_key: Arc<AtomicU64>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            key,
            weak_self: weak_self.clone(),
            listener,
            filters: Mutex::new(Vec::new()),
            outbound: Mutex::new(Some(outbound)),
            done: CancellationToken::new(),
            finalizer: Mutex::new(Finalizer::new()),
            pending: DashMap::new(),
            registrations,
            next_filter_key,
        })
    }

    pub(crate) const fn key(&self) -> u64 {
        self.key
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub(crate) const fn done_token(&self) -> &CancellationToken {
        &self.done
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn filters(&self) -> Vec<Arc<ActiveFilter>> {
        self.filters.lock().clone()
    }

    fn has_filter(&self, key: u64) -> bool {
        self.filters.lock().iter().any(|filter| filter.key() == key)
    }

    /// Register new filters, dropping any beyond the per-subscription cap,
    /// then hand them to the listener for history backfill. The intake send
    /// never blocks; a full intake just skips the backfill.
    pub(crate) fn add_filters(
        &self,
        queries: impl IntoIterator<Item = FilterQuery>,
    ) -> Vec<Arc<ActiveFilter>> {
        let mut queries: Vec<_> = queries.into_iter().collect();
        if queries.is_empty() || self.is_done() {
            return Vec::new();
        }

        let registered = {
            let mut filters = self.filters.lock();
            let room = MAX_FILTERS_PER_SUBSCRIBER.saturating_sub(filters.len());
            if queries.len() > room {
                warn!(
                    dropped = queries.len() - room,
                    "subscriber filter limit reached, dropping extra filters"
                );
                queries.truncate(room);
            }
            let registered: Vec<_> = queries
                .into_iter()
                .map(|query| {
                    ActiveFilter::new(self.next_filter_key.fetch_add(1, Ordering::Relaxed), query)
                })
                .collect();
            filters.extend(registered.iter().cloned());
            registered
        };

        if registered.is_empty() {
            return registered;
        }

        let Some(subscriber) = self.weak_self.upgrade() else {
            return registered;
        };
        let registration = Registration { subscriber, filters: registered.clone() };
        if self.registrations.try_send(registration).is_err() {
            warn!("filter registration intake full, skipping history backfill");
        }
        registered
    }

    pub(crate) fn remove_filter(&self, filter: &ActiveFilter) {
        self.filters.lock().retain(|active| active.key() != filter.key());
    }

    pub(crate) fn clear_filters(&self) {
        self.filters.lock().clear();
    }

    fn send(&self, receipt: Receipt) {
        let outbound = self.outbound.lock();
        if let Some(sender) = outbound.as_ref() {
            if sender.send(receipt).is_err() {
                debug!("receipt delivery dropped, subscription receiver is gone");
            }
        }
    }

    /// Drop the subscription: close and flush the outbound channel, discard
    /// retries, and deregister from the listener.
    pub(crate) fn unsubscribe(&self) {
        if self.done.is_cancelled() {
            return;
        }
        self.done.cancel();
        self.outbound.lock().take();
        self.pending.clear();
        self.filters.lock().clear();
        if let Some(inner) = self.listener.upgrade() {
            inner.remove_subscriber(self.key);
        }
    }

    /// Evaluate `filters` against `receipts`, fetch the full receipt for
    /// every match, and deliver. Fetches run concurrently but outcomes are
    /// settled in receipt order, so deliveries within a pass follow block
    /// transaction order. Returns, per filter, whether anything matched.
    pub(crate) async fn match_filters(
        &self,
        inner: &Inner,
        filters: &[Arc<ActiveFilter>],
        receipts: &[Receipt],
    ) -> Vec<bool> {
        let mut matched = vec![false; filters.len()];
        let mut hits = Vec::new();
        for receipt in receipts {
            for (idx, filter) in filters.iter().enumerate() {
                if filter.matches(receipt) {
                    matched[idx] = true;
                    hits.push((Arc::clone(filter), receipt.clone()));
                }
            }
        }
        if hits.is_empty() {
            return matched;
        }

        let fetches = hits.into_iter().map(|(filter, receipt)| async move {
            if receipt.is_reorged() {
                return (filter, receipt, FetchOutcome::Reorged);
            }
            match inner.fetch_transaction_receipt(receipt.transaction_hash()).await {
                Ok(full) => (filter, receipt, FetchOutcome::Fetched(full)),
                Err(Error::NotFound) => (filter, receipt, FetchOutcome::NotFound),
                Err(err) => (filter, receipt, FetchOutcome::Failed(err)),
            }
        });
        let outcomes: Vec<_> =
            stream::iter(fetches).buffered(MAX_CONCURRENT_RECEIPT_FETCHES).collect().await;

        for (filter, receipt, outcome) in outcomes {
            self.settle(inner, filter, receipt, outcome);
        }
        matched
    }

    fn settle(
        &self,
        inner: &Inner,
        filter: Arc<ActiveFilter>,
        mut receipt: Receipt,
        outcome: FetchOutcome,
    ) {
        let txn_hash = receipt.transaction_hash();
        match outcome {
            FetchOutcome::Reorged => {
                // Removals are not delivered; they only flag the queued
                // finality entry so it is dropped unless re-mined.
                self.finalizer.lock().mark_reorged(filter.key(), txn_hash);
            }
            FetchOutcome::Fetched(full) => {
                let query = filter.query();
                if query.limit_one() && !self.has_filter(filter.key()) {
                    // Already satisfied earlier in this pass.
                    return;
                }
                self.pending.remove(&txn_hash);
                receipt.attach_receipt(full);
                receipt.set_filter(Arc::clone(&filter));
                let block_num = receipt.block_number();
                if inner.is_final(block_num) {
                    receipt.set_final(true);
                }
                if query.finalize() && !receipt.is_final() {
                    self.finalizer.lock().enqueue(
                        Arc::clone(&filter),
                        receipt.clone(),
                        block_num,
                    );
                }
                if query.limit_one() && (!query.finalize() || receipt.is_final()) {
                    self.remove_filter(&filter);
                }
                self.send(receipt);
            }
            FetchOutcome::NotFound => {
                // Proven absent upstream. No retry; the monitor re-surfaces
                // the transaction if it is mined later.
                self.pending.remove(&txn_hash);
            }
            FetchOutcome::Failed(err) => {
                debug!(%txn_hash, %err, "receipt fetch failed, queueing for retry");
                if self.pending.contains_key(&txn_hash) {
                    return;
                }
                if self.pending.len() >= MAX_PENDING_RECEIPTS {
                    warn!(%txn_hash, "pending receipt map is full, dropping retry");
                    return;
                }
                self.pending.insert(
                    txn_hash,
                    PendingFetch {
                        receipt,
                        filter,
                        attempts: 1,
                        next_attempt_at: Instant::now() + Duration::from_secs(1),
                    },
                );
            }
        }
    }

    /// Deliver every queued receipt that reached the finality depth under
    /// `current_block`.
    pub(crate) fn finalize_receipts(&self, current_block: u64, finality_depth: u64) {
        let due = self.finalizer.lock().dequeue(current_block, finality_depth);
        for entry in due {
            if entry.receipt.is_reorged() {
                continue;
            }
            let mut receipt = entry.receipt;
            receipt.set_final(true);
            let query = entry.filter.query();
            if query.cond().is_txn_hash() || query.limit_one() {
                self.remove_filter(&entry.filter);
            }
            self.send(receipt);
        }
    }

    /// Refetch claimed pending receipts. Entries are claimed by pushing
    /// their next attempt into the claim window, so concurrent passes do
    /// not double-fetch; a pass interrupted by shutdown releases its claims.
    pub(crate) async fn retry_pending(self: Arc<Self>, inner: Arc<Inner>) {
        let now = Instant::now();
        let claim_until = now + inner.retry_claim_window();
        let mut claimed = Vec::new();
        for mut entry in self.pending.iter_mut() {
            if now >= entry.next_attempt_at {
                entry.next_attempt_at = claim_until;
                claimed.push((*entry.key(), entry.receipt.clone(), entry.filter.clone()));
            }
        }
        if claimed.is_empty() {
            return;
        }
        debug!(count = claimed.len(), "retrying pending receipt fetches");

        let inner_ref = inner.as_ref();
        let refetches = claimed.into_iter().map(|(txn_hash, receipt, filter)| async move {
            tokio::select! {
                _ = inner_ref.shutdown() => (txn_hash, receipt, filter, None),
                result = inner_ref.fetch_transaction_receipt(txn_hash) => {
                    (txn_hash, receipt, filter, Some(result))
                }
            }
        });
        let outcomes: Vec<_> =
            stream::iter(refetches).buffered(MAX_CONCURRENT_RECEIPT_RETRIES).collect().await;

        for (txn_hash, receipt, filter, result) in outcomes {
            match result {
                None => {
                    // Shutdown raced the claim; release it so a later pass
                    // picks the entry up promptly.
                    if let Some(mut entry) = self.pending.get_mut(&txn_hash) {
                        entry.next_attempt_at = Instant::now() + Duration::from_millis(100);
                    }
                }
                Some(Ok(full)) => {
                    self.settle(inner.as_ref(), filter, receipt, FetchOutcome::Fetched(full));
                }
                Some(Err(Error::NotFound)) => {
                    self.pending.remove(&txn_hash);
                }
                Some(Err(err)) => {
                    let mut give_up = false;
                    if let Some(mut entry) = self.pending.get_mut(&txn_hash) {
                        entry.attempts += 1;
                        if entry.attempts >= MAX_RECEIPT_RETRY_ATTEMPTS {
                            error!(
                                %txn_hash,
                                attempts = entry.attempts,
                                %err,
                                "receipt fetch kept failing, giving up"
                            );
                            give_up = true;
                        } else {
                            let backoff = Duration::from_secs(1u64 << entry.attempts.min(32))
                                .min(MAX_RETRY_BACKOFF);
                            entry.next_attempt_at = Instant::now() + backoff;
                        }
                    }
                    if give_up {
                        self.pending.remove(&txn_hash);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("key", &self.key)
            .field("filters", &self.filters.lock().len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// A caller's handle to a filtered stream of receipts.
///
/// Receipts arrive on an unbounded channel, so the listener never blocks on
/// a slow consumer; a subscription that is never drained grows without
/// bound. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    receipts: mpsc::UnboundedReceiver<Receipt>,
}

impl Subscription {
    pub(crate) const fn new(
        subscriber: Arc<Subscriber>,
        receipts: mpsc::UnboundedReceiver<Receipt>,
    ) -> Self {
        Self { subscriber, receipts }
    }

    /// Receive the next matched receipt. Returns `None` once the
    /// subscription is closed and the channel is drained.
    pub async fn recv(&mut self) -> Option<Receipt> {
        self.receipts.recv().await
    }

    /// The raw receipt channel, for callers that select over it directly.
    pub fn receipts(&mut self) -> &mut mpsc::UnboundedReceiver<Receipt> {
        &mut self.receipts
    }

    /// Resolves once the subscription has been unsubscribed.
    pub async fn done(&self) {
        self.subscriber.done_token().cancelled().await
    }

    /// True once the subscription has been unsubscribed.
    pub fn is_done(&self) -> bool {
        self.subscriber.is_done()
    }

    /// Close the subscription. Queued receipts remain readable until the
    /// channel is drained.
    pub fn unsubscribe(&self) {
        self.subscriber.unsubscribe();
    }

    /// Register an additional filter. Returns `None` when the filter cap
    /// dropped it.
    pub fn add_filter(&self, query: FilterQuery) -> Option<Arc<ActiveFilter>> {
        self.subscriber.add_filters([query]).pop()
    }

    /// Register additional filters, returning the registered handles.
    pub fn add_filters(
        &self,
        queries: impl IntoIterator<Item = FilterQuery>,
    ) -> Vec<Arc<ActiveFilter>> {
        self.subscriber.add_filters(queries)
    }

    /// Remove a filter from this subscription.
    pub fn remove_filter(&self, filter: &ActiveFilter) {
        self.subscriber.remove_filter(filter);
    }

    /// Remove every filter from this subscription.
    pub fn clear_filters(&self) {
        self.subscriber.clear_filters();
    }

    /// Snapshot of the currently registered filters.
    pub fn filters(&self) -> Vec<Arc<ActiveFilter>> {
        self.subscriber.filters()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscriber.unsubscribe();
    }
}
