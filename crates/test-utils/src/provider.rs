//! A scriptable receipt provider.

use alloy::{primitives::B256, rpc::types::TransactionReceipt};
use async_trait::async_trait;
use lookout_types::{ProviderError, ProviderResult, ReceiptProvider};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

/// An in-memory [`ReceiptProvider`] with a switchable failure mode.
///
/// While failing, every receipt call returns a provider error, which is how
/// tests exercise the listener's retry queue and backoff.
pub struct MockReceiptProvider {
    chain_id: u64,
    receipts: Mutex<HashMap<B256, TransactionReceipt>>,
    failing: AtomicBool,
    receipt_calls: AtomicU64,
}

impl MockReceiptProvider {
    /// A healthy provider for the given chain.
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            receipts: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            receipt_calls: AtomicU64::new(0),
        }
    }

    /// Store the receipt the provider will serve for its transaction hash.
    pub fn insert_receipt(&self, txn_hash: B256, receipt: TransactionReceipt) {
        self.receipts.lock().insert(txn_hash, receipt);
    }

    /// Forget the receipt for `txn_hash`.
    pub fn remove_receipt(&self, txn_hash: B256) {
        self.receipts.lock().remove(&txn_hash);
    }

    /// Toggle the failure mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Number of receipt calls the provider has served or failed.
    pub fn receipt_calls(&self) -> u64 {
        self.receipt_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReceiptProvider for MockReceiptProvider {
    async fn transaction_receipt(
        &self,
        txn_hash: B256,
    ) -> ProviderResult<Option<TransactionReceipt>> {
        self.receipt_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(ProviderError::msg("simulated provider outage"));
        }
        Ok(self.receipts.lock().get(&txn_hash).cloned())
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        Ok(self.chain_id)
    }
}

impl std::fmt::Debug for MockReceiptProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockReceiptProvider")
            .field("chain_id", &self.chain_id)
            .field("failing", &self.failing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
