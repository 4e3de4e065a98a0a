//! One-shot receipt fetches over a temporary subscription.

use crate::{
    error::{Error, Result},
    filter::{ActiveFilter, FilterQuery},
    listener::ReceiptsListener,
    receipt::Receipt,
    subscription::Subscription,
};
use alloy::primitives::B256;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::time;

/// Continuation returned by the fetch API, resolving once the fetched
/// receipt reaches finality. Dropping it without awaiting tears down the
/// underlying one-shot subscription.
pub type WaitFinality = BoxFuture<'static, Result<Receipt>>;

impl ReceiptsListener {
    /// Wait for the receipt of `txn_hash`.
    ///
    /// Searches the cache and, when necessary, the upstream node directly,
    /// so transactions mined before the monitor's retention window are still
    /// found. Returns the mined receipt together with a [`WaitFinality`]
    /// continuation; when the receipt is already past the finality depth the
    /// continuation resolves immediately with the same receipt.
    ///
    /// Returns [`Error::FilterExhausted`] if the transaction does not appear
    /// within the filter's max-wait window.
    pub async fn fetch_transaction_receipt(
        &self,
        txn_hash: B256,
    ) -> Result<(Receipt, WaitFinality)> {
        self.fetch_transaction_receipt_with_filter(FilterQuery::txn_hash(txn_hash)).await
    }

    /// Wait for the first receipt matching `query`.
    ///
    /// The query is forced to limit-one and finalize; only transaction-hash
    /// conditions benefit from on-chain search.
    pub async fn fetch_transaction_receipt_with_filter(
        &self,
        query: FilterQuery,
    ) -> Result<(Receipt, WaitFinality)> {
        let query = query.with_finalize(true).with_limit_one(true);
        let mut sub = self.subscribe([query]);
        let Some(filter) = sub.filters().pop() else {
            return Err(Error::SubscriberOverflow);
        };

        let timeout = time::sleep(self.options().default_fetch_transaction_receipt_timeout);
        tokio::pin!(timeout);

        enum Mined {
            Timeout,
            Exhausted,
            Received(Option<Receipt>),
        }

        let mined = tokio::select! {
            _ = &mut timeout => Mined::Timeout,
            _ = filter.exhausted() => Mined::Exhausted,
            received = sub.recv() => Mined::Received(received),
        };

        match mined {
            Mined::Timeout => Err(Error::Timeout),
            Mined::Exhausted => Err(Error::FilterExhausted),
            Mined::Received(None) => Err(Error::Closed),
            Mined::Received(Some(receipt)) if receipt.is_final() => {
                let settled = receipt.clone();
                Ok((receipt, Box::pin(async move { Ok(settled) })))
            }
            Mined::Received(Some(receipt)) => {
                let wait: WaitFinality = Box::pin(wait_finality(sub, filter));
                Ok((receipt, wait))
            }
        }
    }
}

/// Wait for the final delivery on a one-shot subscription.
async fn wait_finality(mut sub: Subscription, filter: Arc<ActiveFilter>) -> Result<Receipt> {
    loop {
        tokio::select! {
            _ = filter.exhausted() => return Err(Error::FilterExhausted),
            received = sub.recv() => match received {
                Some(receipt) if receipt.is_final() => return Ok(receipt),
                // A reorged match was re-mined; keep waiting for its
                // finality.
                Some(_) => {}
                None => return Err(Error::Closed),
            }
        }
    }
}
