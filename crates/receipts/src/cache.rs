//! Bounded caches for fetched and known-absent receipts.

use alloy::{network::TransactionResponse, primitives::B256, rpc::types::TransactionReceipt};
use lookout_types::Block;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Two bounded LRU mappings over upstream fetch results.
///
/// `receipts` holds fetched receipts by transaction hash. `not_found`
/// remembers the head block at which an upstream lookup last came back
/// empty, so repeated matches against an absent transaction do not hammer
/// the provider. Both mappings are evicted for every transaction of a block
/// the monitor removes.
pub(crate) struct ReceiptCache {
    receipts: Mutex<LruCache<B256, TransactionReceipt>>,
    not_found: Mutex<LruCache<B256, u64>>,
}

impl std::fmt::Debug for ReceiptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptCache").finish_non_exhaustive()
    }
}

impl ReceiptCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            receipts: Mutex::new(LruCache::new(capacity)),
            not_found: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn get_receipt(&self, txn_hash: B256) -> Option<TransactionReceipt> {
        self.receipts.lock().get(&txn_hash).cloned()
    }

    pub(crate) fn put_receipt(&self, txn_hash: B256, receipt: TransactionReceipt) {
        self.receipts.lock().put(txn_hash, receipt);
        self.not_found.lock().pop(&txn_hash);
    }

    pub(crate) fn remove_receipt(&self, txn_hash: B256) {
        self.receipts.lock().pop(&txn_hash);
    }

    /// Head block number at which `txn_hash` was last proven absent.
    pub(crate) fn not_found_at(&self, txn_hash: B256) -> Option<u64> {
        self.not_found.lock().get(&txn_hash).copied()
    }

    pub(crate) fn record_not_found(&self, txn_hash: B256, block_num: u64) {
        self.not_found.lock().put(txn_hash, block_num);
    }

    pub(crate) fn clear_not_found(&self, txn_hash: B256) {
        self.not_found.lock().pop(&txn_hash);
    }

    /// Evict every transaction of a removed block from both mappings.
    pub(crate) fn evict_block(&self, block: &Block) {
        let mut receipts = self.receipts.lock();
        let mut not_found = self.not_found.lock();
        for txn in &block.transactions {
            let txn_hash = txn.tx_hash();
            receipts.pop(&txn_hash);
            not_found.pop(&txn_hash);
        }
    }

    /// Drop everything from both mappings.
    pub(crate) fn purge(&self) {
        self.receipts.lock().clear();
        self.not_found.lock().clear();
    }
}
