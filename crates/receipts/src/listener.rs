//! The receipts listener: block intake, filter matching, and fetch
//! mediation.

use crate::{
    cache::ReceiptCache,
    error::{Error, Result},
    filter::{ActiveFilter, FilterCond, FilterQuery, MaxWait},
    receipt::Receipt,
    subscription::{Registration, Subscriber, Subscription},
};
use alloy::{network::TransactionResponse, primitives::B256, rpc::types::TransactionReceipt};
use futures::{stream, StreamExt};
use lookout_types::{chains, BlockEvent, ChainMonitor, ReceiptProvider};
use parking_lot::{Mutex, RwLock};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, Semaphore},
    time::{self, Duration},
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

/// Minimum monitor retention the listener requires. New-filter backfill and
/// negative-cache revalidation both lean on the monitor's history.
const MIN_RETENTION: usize = 400;

/// Capacity of the filter-registration intake. A subscriber that manages to
/// queue this many registrations is misusing the API; further registrations
/// are dropped with a warning.
const REGISTRATION_INTAKE_CAPACITY: usize = 1_000;

/// Upstream attempts per mediated fetch before the call is given up on.
const FETCH_RETRY_ATTEMPTS: u32 = 20;

/// Base delay of the upstream fetch backoff.
const FETCH_RETRY_BASE: Duration = Duration::from_secs(1);

/// Listener configuration. `Options::default()` is suitable for most
/// deployments.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Global cap on concurrent upstream receipt fetches.
    pub max_concurrent_fetch_receipt_workers: usize,
    /// Cap on subscriptions matched concurrently per block batch.
    pub max_concurrent_filter_workers: usize,
    /// Capacity of the fetched-receipt and absent-receipt caches.
    pub past_receipts_cache_size: usize,
    /// Confirmations before a receipt is final. Zero selects the per-chain
    /// registry default, falling back to 1.
    pub num_blocks_to_finality: u64,
    /// Default max-wait budget for filters that inherit it, in blocks. Zero
    /// means no limit. Non-zero values are coerced above the finality depth.
    pub filter_max_wait_num_blocks: u64,
    /// Uniform timeout applied to every mediated upstream receipt fetch.
    pub default_fetch_transaction_receipt_timeout: Duration,
    /// How long a claimed retry entry stays parked if the pass that claimed
    /// it dies without restoring it.
    pub retry_claim_window: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent_fetch_receipt_workers: 50,
            max_concurrent_filter_workers: 20,
            past_receipts_cache_size: 5_000,
            num_blocks_to_finality: 0,
            filter_max_wait_num_blocks: 0,
            default_fetch_transaction_receipt_timeout: Duration::from_secs(300),
            retry_claim_window: Duration::from_secs(600),
        }
    }
}

pub(crate) struct Inner {
    opts: Options,
    provider: Arc<dyn ReceiptProvider>,
    monitor: Arc<dyn ChainMonitor>,
    cache: ReceiptCache,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    registrations: mpsc::Sender<Registration>,
    registration_intake: Mutex<Option<mpsc::Receiver<Registration>>>,
    fetch_workers: Semaphore,
    latest_block: AtomicU64,
    finality_depth: AtomicU64,
    max_wait_default: AtomicU64,
    next_key: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl Inner {
    pub(crate) fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::Relaxed)
    }

    pub(crate) fn finality_depth(&self) -> u64 {
        self.finality_depth.load(Ordering::Relaxed).max(1)
    }

    /// The block-finality test: a receipt in `block_num` is final once the
    /// head is at least the finality depth past it.
    pub(crate) fn is_final(&self, block_num: u64) -> bool {
        let latest = self.latest_block();
        latest >= block_num && latest - block_num >= self.finality_depth()
    }

    pub(crate) fn shutdown(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    pub(crate) fn retry_claim_window(&self) -> Duration {
        self.opts.retry_claim_window
    }

    pub(crate) fn remove_subscriber(&self, key: u64) {
        self.subscribers.write().retain(|subscriber| subscriber.key() != key);
    }

    /// Translate a filter's max-wait setting into a block budget. `None`
    /// disables expiry.
    fn effective_max_wait(&self, max_wait: MaxWait) -> Option<u64> {
        match max_wait {
            MaxWait::Inherit => match self.max_wait_default.load(Ordering::Relaxed) {
                0 => None,
                blocks => Some(blocks),
            },
            MaxWait::AfterFinality => Some(self.finality_depth() * 3),
            MaxWait::Unlimited => None,
            MaxWait::Blocks(blocks) => Some(blocks.max(1)),
        }
    }

    /// Resolve the finality depth, consulting the per-chain registry when
    /// the caller did not pin one, and coerce the max-wait default above it.
    async fn resolve_finality_depth(&self) {
        let mut depth = self.opts.num_blocks_to_finality;
        if depth == 0 {
            depth = match self.provider.chain_id().await {
                Ok(chain_id) => chains::num_blocks_to_finality(chain_id).unwrap_or(1),
                Err(err) => {
                    warn!(%err, "chain id lookup failed, defaulting finality depth to 1");
                    1
                }
            };
        }
        let depth = depth.max(1);
        self.finality_depth.store(depth, Ordering::Relaxed);

        let max_wait = self.opts.filter_max_wait_num_blocks;
        if max_wait != 0 && max_wait <= depth {
            warn!(max_wait, depth, "filter max wait must exceed the finality depth, coercing");
            self.max_wait_default.store(depth + 1, Ordering::Relaxed);
        }
    }

    fn expire_filters(
        &self,
        subscriber: &Subscriber,
        filters: &[Arc<ActiveFilter>],
        matched: &[bool],
        latest: u64,
    ) {
        for (filter, hit) in filters.iter().zip(matched) {
            if *hit || filter.last_match_block() == 0 {
                // A fresh filter's wait window starts at its first observed
                // block.
                filter.set_last_match_block(latest);
                continue;
            }
            let Some(max_wait) = self.effective_max_wait(filter.query().max_wait()) else {
                continue;
            };
            if latest.saturating_sub(filter.last_match_block()) >= max_wait {
                debug!(id = filter.id(), max_wait, "filter exhausted without a match, removing");
                subscriber.remove_filter(filter);
                filter.mark_exhausted();
            }
        }
    }

    /// Mediated receipt fetch: cache first, then the negative cache, then
    /// upstream with exponential backoff, all under the global fetch
    /// semaphore and the uniform fetch timeout.
    pub(crate) async fn fetch_transaction_receipt(
        &self,
        txn_hash: B256,
    ) -> Result<TransactionReceipt> {
        let _permit = self.fetch_workers.acquire().await.map_err(|_| Error::Closed)?;

        if let Some(receipt) = self.cache.get_receipt(txn_hash) {
            // Eviction on removal handles most reorgs, but a hit must never
            // hand back a receipt from a block the monitor has since
            // replaced, so revalidate against the canonical hash.
            let stale = receipt
                .block_number
                .and_then(|num| self.monitor.block_hash(num))
                .is_some_and(|canonical| {
                    receipt.block_hash.is_some_and(|cached| cached != canonical)
                });
            if !stale {
                return Ok(receipt);
            }
            self.cache.remove_receipt(txn_hash);
        }

        if let Some(seen_at) = self.cache.not_found_at(txn_hash) {
            if seen_at < self.monitor.oldest_block_num() {
                // The entry predates retention; treat it as missing.
                self.cache.clear_not_found(txn_hash);
            } else if self.monitor.find_transaction(txn_hash).is_some() {
                self.cache.clear_not_found(txn_hash);
            } else {
                return Err(Error::NotFound);
            }
        }

        let fetched =
            time::timeout(self.opts.default_fetch_transaction_receipt_timeout, self.fetch_with_backoff(txn_hash))
                .await
                .map_err(|_| Error::Timeout)??;

        match fetched {
            Some(receipt) => {
                self.cache.put_receipt(txn_hash, receipt.clone());
                Ok(receipt)
            }
            None => {
                self.cache.record_not_found(txn_hash, self.latest_block());
                Err(Error::NotFound)
            }
        }
    }

    async fn fetch_with_backoff(&self, txn_hash: B256) -> Result<Option<TransactionReceipt>> {
        let mut delay = FETCH_RETRY_BASE;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.transaction_receipt(txn_hash).await {
                Ok(found) => return Ok(found),
                Err(err) if attempt >= FETCH_RETRY_ATTEMPTS => return Err(err.into()),
                Err(err) => {
                    debug!(%txn_hash, attempt, %err, "upstream receipt fetch failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(Error::Closed),
                        _ = time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(Duration::from_secs(60));
                }
            }
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptsListener")
            .field("latest_block", &self.latest_block())
            .field("subscribers", &self.subscribers.read().len())
            .finish_non_exhaustive()
    }
}

/// A long-running service that lets many independent callers wait for
/// transaction receipts matching arbitrary filters, delivered across chain
/// reorganizations and up to the configured finality depth.
///
/// The listener consumes block events from a [`ChainMonitor`], fans them out
/// to every subscription, fetches matched receipts from a
/// [`ReceiptProvider`] under a global concurrency cap, and re-delivers
/// receipts once they reach finality. Clones share the same listener.
#[derive(Clone)]
pub struct ReceiptsListener {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReceiptsListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl ReceiptsListener {
    /// Create a listener over the given collaborators.
    ///
    /// Fails if the monitor does not capture logs or retains fewer than 400
    /// blocks, since both history backfill and reorg tracking depend on its
    /// retained window.
    pub fn new<P, M>(provider: P, monitor: M, opts: Options) -> Result<Self>
    where
        P: ReceiptProvider + 'static,
        M: ChainMonitor + 'static,
    {
        if !monitor.logs_enabled() {
            return Err(Error::Config("chain monitor must capture logs"));
        }
        if monitor.retention() < MIN_RETENTION {
            return Err(Error::Config("chain monitor must retain at least 400 blocks"));
        }

        let (registrations, intake) = mpsc::channel(REGISTRATION_INTAKE_CAPACITY);
        let fetch_workers = Semaphore::new(opts.max_concurrent_fetch_receipt_workers.max(1));
        let cache = ReceiptCache::new(opts.past_receipts_cache_size);
        let latest = monitor.latest_block_num();
        let finality_depth = AtomicU64::new(opts.num_blocks_to_finality);
        let max_wait_default = AtomicU64::new(opts.filter_max_wait_num_blocks);

        Ok(Self {
            inner: Arc::new(Inner {
                opts,
                provider: Arc::new(provider),
                monitor: Arc::new(monitor),
                cache,
                subscribers: RwLock::new(Vec::new()),
                registrations,
                registration_intake: Mutex::new(Some(intake)),
                fetch_workers,
                latest_block: AtomicU64::new(latest),
                finality_depth,
                max_wait_default,
                next_key: Arc::new(AtomicU64::new(1)),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Drive the listener until [`Self::stop`] is called or the monitor's
    /// event stream ends. May be invoked exactly once; a second call
    /// returns [`Error::AlreadyRunning`].
    pub async fn run(&self) -> Result<()> {
        let mut registrations =
            self.inner.registration_intake.lock().take().ok_or(Error::AlreadyRunning)?;
        let inner = &self.inner;

        let mut blocks = inner.monitor.subscribe_events();
        inner.resolve_finality_depth().await;
        inner.latest_block.store(inner.monitor.latest_block_num(), Ordering::Relaxed);

        let tick_period = (inner.monitor.avg_block_time() / 4)
            .clamp(Duration::from_millis(500), Duration::from_secs(5));
        let mut retry_tick = time::interval(tick_period);
        retry_tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        debug!(finality_depth = inner.finality_depth(), "receipts listener running");
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                batch = blocks.recv() => match batch {
                    Some(events) => self.handle_blocks(events).await,
                    None => {
                        debug!("chain monitor stream ended, stopping");
                        break;
                    }
                },
                Some(registration) = registrations.recv() => {
                    self.handle_registration(registration).await;
                }
                _ = retry_tick.tick() => self.spawn_retry_passes(),
            }
        }
        Ok(())
    }

    /// Process one batch of monitor block events: evict removed blocks from
    /// the caches, advance the head, then match, finalize, and expire
    /// filters for every subscriber in parallel.
    async fn handle_blocks(&self, events: Vec<BlockEvent>) {
        if events.is_empty() {
            return;
        }
        let inner = self.inner.as_ref();

        for event in events.iter().filter(|event| event.is_removed()) {
            inner.cache.evict_block(&event.block);
        }

        let mut latest = inner.latest_block();
        for event in events.iter().filter(|event| event.is_added()) {
            latest = latest.max(event.block.number());
        }
        inner.latest_block.store(latest, Ordering::Relaxed);

        let mut receipts = Vec::new();
        for event in &events {
            let removed = event.is_removed();
            for txn in &event.block.transactions {
                receipts.push(Receipt::pending(
                    Some(txn.clone()),
                    event.block.txn_logs(txn.tx_hash()),
                    removed,
                ));
            }
        }

        let subscribers = inner.subscribers.read().clone();
        if subscribers.is_empty() {
            return;
        }
        let depth = inner.finality_depth();

        stream::iter(subscribers)
            .for_each_concurrent(inner.opts.max_concurrent_filter_workers.max(1), |subscriber| {
                let receipts = &receipts;
                async move {
                    if subscriber.is_done() {
                        return;
                    }
                    let filters = subscriber.filters();
                    let matched = subscriber.match_filters(inner, &filters, receipts).await;
                    subscriber.finalize_receipts(latest, depth);
                    inner.expire_filters(&subscriber, &filters, &matched, latest);
                }
            })
            .await;
    }

    /// Backfill a fresh registration from the monitor's retained history,
    /// then fall back to a direct upstream fetch for transaction-hash
    /// filters that still have no match. The fallback is the only way a
    /// transaction whose block already fell out of retention is delivered.
    async fn handle_registration(&self, registration: Registration) {
        let inner = self.inner.as_ref();
        let Registration { subscriber, filters } = registration;
        if subscriber.is_done() {
            return;
        }

        let searchers: Vec<_> = filters
            .iter()
            .filter(|filter| filter.query().search_cache() || filter.query().search_on_chain())
            .cloned()
            .collect();
        if searchers.is_empty() {
            return;
        }

        let mut receipts = Vec::new();
        for block in inner.monitor.retained_blocks() {
            for txn in &block.transactions {
                receipts.push(Receipt::pending(
                    Some(txn.clone()),
                    block.txn_logs(txn.tx_hash()),
                    false,
                ));
            }
        }
        let matched = if receipts.is_empty() {
            vec![false; searchers.len()]
        } else {
            subscriber.match_filters(inner, &searchers, &receipts).await
        };

        for (filter, hit) in searchers.iter().zip(matched) {
            if hit || !filter.query().search_on_chain() {
                continue;
            }
            let FilterCond::TxnHash(txn_hash) = filter.query().cond() else { continue };
            match inner.fetch_transaction_receipt(*txn_hash).await {
                Ok(full) => {
                    let receipt = Receipt::from_receipt(full);
                    subscriber
                        .match_filters(inner, std::slice::from_ref(filter), &[receipt])
                        .await;
                }
                Err(Error::NotFound) => {}
                Err(err) => debug!(%txn_hash, %err, "on-chain search fetch failed"),
            }
        }
    }

    /// Kick a retry pass for every subscriber with pending receipts. The
    /// claim mechanism makes overlapping passes safe, so these are fire and
    /// forget.
    fn spawn_retry_passes(&self) {
        let subscribers = self.inner.subscribers.read().clone();
        for subscriber in subscribers {
            if subscriber.is_done() || !subscriber.has_pending() {
                continue;
            }
            tokio::spawn(subscriber.retry_pending(Arc::clone(&self.inner)));
        }
    }

    /// Stop the listener loop. Subscriptions stay open until unsubscribed.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// Create a subscription over the given filter queries. Filters can
    /// also be added and removed later through the returned handle.
    pub fn subscribe(&self, queries: impl IntoIterator<Item = FilterQuery>) -> Subscription {
        let (outbound, receipts) = mpsc::unbounded_channel();
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber::new(
            key,
            Arc::downgrade(&self.inner),
            outbound,
            self.inner.registrations.clone(),
            Arc::clone(&self.inner.next_key),
        );
        self.inner.subscribers.write().push(Arc::clone(&subscriber));
        subscriber.add_filters(queries);
        Subscription::new(subscriber, receipts)
    }

    /// Number of live subscriptions.
    pub fn num_subscribers(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Drop the receipt caches and the monitor's retained history.
    pub fn purge_history(&self) {
        self.inner.cache.purge();
        self.inner.monitor.purge_history();
    }

    /// Number of the latest canonical block the listener has observed.
    pub fn latest_block_num(&self) -> u64 {
        self.inner.latest_block()
    }

    /// The listener's configuration.
    pub fn options(&self) -> &Options {
        &self.inner.opts
    }
}
