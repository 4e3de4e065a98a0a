//! Upstream RPC provider collaborator interface.

use alloy::{primitives::B256, rpc::types::TransactionReceipt};
use async_trait::async_trait;
use std::sync::Arc;

/// An error returned by the upstream RPC provider.
///
/// This covers transport failures, rate limits, and node-side errors. A
/// receipt the node simply does not know is not an error; providers report it
/// as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
#[error("provider error: {0}")]
pub struct ProviderError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl ProviderError {
    /// Wrap an error as a provider error.
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }

    /// A provider error from a plain message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(msg.into().into())
    }
}

/// Result alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// The upstream JSON-RPC surface required by the receipts listener.
#[async_trait]
pub trait ReceiptProvider: Send + Sync {
    /// Fetch the full receipt for `txn_hash`, including its logs. `Ok(None)`
    /// means the node does not know the transaction.
    async fn transaction_receipt(
        &self,
        txn_hash: B256,
    ) -> ProviderResult<Option<TransactionReceipt>>;

    /// Chain id of the upstream node.
    async fn chain_id(&self) -> ProviderResult<u64>;
}

#[async_trait]
impl<P: ReceiptProvider + ?Sized> ReceiptProvider for Arc<P> {
    async fn transaction_receipt(
        &self,
        txn_hash: B256,
    ) -> ProviderResult<Option<TransactionReceipt>> {
        (**self).transaction_receipt(txn_hash).await
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        (**self).chain_id().await
    }
}
