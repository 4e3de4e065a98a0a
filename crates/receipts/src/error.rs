use lookout_types::ProviderError;

/// Errors produced by the receipts listener.
///
/// Everything short of shutdown is recovered locally: upstream failures move
/// matched receipts into the retry queue, and a misbehaving filter is logged
/// and skipped. None of these variants ever terminates the listener loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The filter's max-wait window elapsed without a match and the filter
    /// was removed from its subscription.
    #[error("filter exhausted: no match within its max-wait window")]
    FilterExhausted,

    /// A user-supplied log predicate panicked while matching.
    #[error("log predicate panicked during filter match")]
    FilterMatch,

    /// The receipt is in neither the cache nor the upstream node. Recoverable
    /// if the transaction is mined later; the monitor will re-surface it.
    #[error("transaction receipt not found")]
    NotFound,

    /// The upstream provider failed. The listener retries these with backoff.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A subscription was asked to hold more filters than its cap allows.
    #[error("subscriber filter limit reached")]
    SubscriberOverflow,

    /// `run` was invoked a second time on the same listener.
    #[error("listener is already running")]
    AlreadyRunning,

    /// The subscription channel closed before a result arrived.
    #[error("subscription closed")]
    Closed,

    /// Timed out waiting for a receipt from upstream.
    #[error("timed out waiting for a receipt")]
    Timeout,

    /// The listener was constructed against an unusable monitor.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

/// Result alias for listener operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
