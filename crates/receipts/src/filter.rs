//! Filter conditions and per-filter delivery options.

use crate::receipt::Receipt;
use alloy::{
    primitives::{Address, B256},
    rpc::types::Log,
};
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A user-supplied predicate over a transaction's logs.
pub type LogPredicate = Arc<dyn Fn(&[Log]) -> bool + Send + Sync>;

/// What a filter matches on.
#[derive(Clone)]
pub enum FilterCond {
    /// The transaction hash equals the given hash.
    TxnHash(B256),
    /// The transaction sender equals the given address.
    From(Address),
    /// The transaction recipient equals the given address.
    To(Address),
    /// Any log of the transaction was emitted by the given contract.
    LogContract(Address),
    /// Any log of the transaction has the given event signature hash as its
    /// first topic.
    LogTopic(B256),
    /// A user predicate over the transaction's logs returned true.
    Logs(LogPredicate),
}

impl fmt::Debug for FilterCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TxnHash(h) => f.debug_tuple("TxnHash").field(h).finish(),
            Self::From(a) => f.debug_tuple("From").field(a).finish(),
            Self::To(a) => f.debug_tuple("To").field(a).finish(),
            Self::LogContract(a) => f.debug_tuple("LogContract").field(a).finish(),
            Self::LogTopic(h) => f.debug_tuple("LogTopic").field(h).finish(),
            Self::Logs(_) => f.write_str("Logs(..)"),
        }
    }
}

impl FilterCond {
    /// True for the transaction-hash condition.
    pub const fn is_txn_hash(&self) -> bool {
        matches!(self, Self::TxnHash(_))
    }
}

/// Per-filter budget, in blocks, without a match before the filter is
/// removed from its subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MaxWait {
    /// Use the listener-wide default.
    #[default]
    Inherit,
    /// Three times the listener's finality depth.
    AfterFinality,
    /// Never expire.
    Unlimited,
    /// Expire after this many blocks without a match.
    Blocks(u64),
}

/// An immutable filter: a condition plus delivery options.
///
/// Construct with one of the condition constructors, then adjust options
/// with the chainable `with_` methods:
///
/// ```
/// # use lookout_receipts::{FilterQuery, MaxWait};
/// # use alloy::primitives::Address;
/// let query = FilterQuery::to(Address::ZERO).with_finalize(true).with_max_wait(MaxWait::Blocks(30));
/// ```
#[derive(Debug, Clone)]
pub struct FilterQuery {
    cond: FilterCond,
    id: u64,
    finalize: bool,
    limit_one: bool,
    search_cache: bool,
    search_on_chain: bool,
    max_wait: MaxWait,
}

impl FilterQuery {
    const fn with_cond(cond: FilterCond) -> Self {
        Self {
            cond,
            id: 0,
            finalize: false,
            limit_one: false,
            search_cache: false,
            search_on_chain: false,
            max_wait: MaxWait::Inherit,
        }
    }

    /// Match the transaction with the given hash.
    ///
    /// Waiting on a single known transaction is the common case, so this
    /// constructor enables the full option set: finalize, limit-one, cache
    /// and on-chain search, and a max wait of three finality depths.
    pub const fn txn_hash(txn_hash: B256) -> Self {
        Self {
            cond: FilterCond::TxnHash(txn_hash),
            id: 0,
            finalize: true,
            limit_one: true,
            search_cache: true,
            search_on_chain: true,
            max_wait: MaxWait::AfterFinality,
        }
    }

    /// Match transactions sent by the given address.
    pub const fn from(from: Address) -> Self {
        Self::with_cond(FilterCond::From(from))
    }

    /// Match transactions sent to the given address.
    pub const fn to(to: Address) -> Self {
        Self::with_cond(FilterCond::To(to))
    }

    /// Match transactions with a log emitted by the given contract.
    pub const fn log_contract(contract: Address) -> Self {
        Self::with_cond(FilterCond::LogContract(contract))
    }

    /// Match transactions with a log whose first topic is the given event
    /// signature hash.
    pub const fn log_topic(event_sig: B256) -> Self {
        Self::with_cond(FilterCond::LogTopic(event_sig))
    }

    /// Match transactions for which the predicate over their logs returns
    /// true.
    pub fn logs(predicate: impl Fn(&[Log]) -> bool + Send + Sync + 'static) -> Self {
        Self::with_cond(FilterCond::Logs(Arc::new(predicate)))
    }

    /// Set the caller-supplied tag. A non-zero tag disambiguates filters
    /// with identical conditions.
    pub const fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Deliver the receipt again once it reaches the finality depth.
    pub const fn with_finalize(mut self, finalize: bool) -> Self {
        self.finalize = finalize;
        self
    }

    /// Remove the filter after its first (or first final, when finalizing)
    /// delivery.
    pub const fn with_limit_one(mut self, limit_one: bool) -> Self {
        self.limit_one = limit_one;
        self
    }

    /// On registration, also scan the monitor's retained block history.
    pub const fn with_search_cache(mut self, search_cache: bool) -> Self {
        self.search_cache = search_cache;
        self
    }

    /// On registration, fall back to a direct upstream fetch when the
    /// retained history has no match. Only meaningful for transaction-hash
    /// filters.
    pub const fn with_search_on_chain(mut self, search_on_chain: bool) -> Self {
        self.search_on_chain = search_on_chain;
        self
    }

    /// Set the max-wait budget.
    pub const fn with_max_wait(mut self, max_wait: MaxWait) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// The filter condition.
    pub const fn cond(&self) -> &FilterCond {
        &self.cond
    }

    /// The caller-supplied tag, zero when unset.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether the receipt is re-delivered at finality.
    pub const fn finalize(&self) -> bool {
        self.finalize
    }

    /// Whether the filter is removed after its terminal delivery.
    pub const fn limit_one(&self) -> bool {
        self.limit_one
    }

    /// Whether registration scans the monitor's retained history.
    pub const fn search_cache(&self) -> bool {
        self.search_cache
    }

    /// Whether registration may fall back to a direct upstream fetch.
    pub const fn search_on_chain(&self) -> bool {
        self.search_on_chain
    }

    /// The max-wait budget.
    pub const fn max_wait(&self) -> MaxWait {
        self.max_wait
    }

    /// Evaluate the condition against a receipt.
    pub fn matches(&self, receipt: &Receipt) -> bool {
        match &self.cond {
            FilterCond::TxnHash(h) => receipt.transaction_hash() == *h,
            FilterCond::From(a) => receipt.from() == *a,
            FilterCond::To(a) => receipt.to() == Some(*a),
            FilterCond::LogContract(a) => receipt.logs().iter().any(|log| log.address() == *a),
            FilterCond::LogTopic(h) => {
                receipt.logs().iter().any(|log| log.topic0() == Some(h))
            }
            FilterCond::Logs(predicate) => {
                // A panicking user predicate must not take down the listener.
                let predicate = AssertUnwindSafe(|| predicate(receipt.logs()));
                match catch_unwind(predicate) {
                    Ok(matched) => matched,
                    Err(_) => {
                        warn!(id = self.id, "log predicate panicked, treating as no match");
                        false
                    }
                }
            }
        }
    }
}

/// A filter registered on a subscription.
///
/// Wraps the immutable [`FilterQuery`] with the listener-side bookkeeping:
/// the block of the most recent match and the `exhausted` signal raised when
/// the max-wait budget runs out.
#[derive(Debug)]
pub struct ActiveFilter {
    key: u64,
    query: FilterQuery,
    last_match_block: AtomicU64,
    exhausted: CancellationToken,
}

impl ActiveFilter {
    pub(crate) fn new(key: u64, query: FilterQuery) -> Arc<Self> {
        Arc::new(Self {
            key,
            query,
            last_match_block: AtomicU64::new(0),
            exhausted: CancellationToken::new(),
        })
    }

    /// The filter query this registration was created from.
    pub const fn query(&self) -> &FilterQuery {
        &self.query
    }

    /// The caller-supplied tag, zero when unset.
    pub const fn id(&self) -> u64 {
        self.query.id()
    }

    /// Listener-internal identity of this registration.
    pub(crate) const fn key(&self) -> u64 {
        self.key
    }

    /// Resolves when the filter expires without a match.
    pub async fn exhausted(&self) {
        self.exhausted.cancelled().await
    }

    /// True once the filter has expired without a match.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.is_cancelled()
    }

    pub(crate) fn mark_exhausted(&self) {
        self.exhausted.cancel();
    }

    /// Block number of the most recent match, zero before the first one.
    pub fn last_match_block(&self) -> u64 {
        self.last_match_block.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_match_block(&self, block_num: u64) {
        self.last_match_block.store(block_num, Ordering::Relaxed);
    }

    /// Evaluate this filter against a receipt.
    pub fn matches(&self, receipt: &Receipt) -> bool {
        self.query.matches(receipt)
    }
}
