//! Chain-monitor collaborator interface.

use crate::block::{Block, BlockEvent};
use alloy::primitives::B256;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Receiver half of a monitor block-event subscription.
pub type BlockStream = mpsc::UnboundedReceiver<Vec<BlockEvent>>;

/// A canonical-chain monitor.
///
/// The monitor observes the head of the chain, retains a bounded window of
/// recent blocks with their logs, and notifies subscribers of additions and
/// removals. The receipts listener is a pure consumer of this interface; it
/// never talks to the chain about blocks directly.
pub trait ChainMonitor: Send + Sync {
    /// Subscribe to batches of block events. During a reorg the `Removed`
    /// events for displaced blocks precede the `Added` events of their
    /// replacements within a batch.
    fn subscribe_events(&self) -> BlockStream;

    /// Number of the latest canonical block observed.
    fn latest_block_num(&self) -> u64;

    /// Number of the oldest block still retained.
    fn oldest_block_num(&self) -> u64;

    /// True if the monitor captures logs alongside block bodies.
    fn logs_enabled(&self) -> bool;

    /// Maximum number of blocks the monitor retains.
    fn retention(&self) -> usize;

    /// Snapshot of the retained canonical chain, oldest block first.
    fn retained_blocks(&self) -> Vec<Arc<Block>>;

    /// Block number of the retained block containing `txn_hash`, if the
    /// canonical chain currently includes that transaction.
    fn find_transaction(&self, txn_hash: B256) -> Option<u64>;

    /// Canonical hash of the retained block at `number`.
    fn block_hash(&self, number: u64) -> Option<B256>;

    /// Estimated average block time of the chain.
    fn avg_block_time(&self) -> Duration;

    /// Drop all retained history.
    fn purge_history(&self);
}

impl<M: ChainMonitor + ?Sized> ChainMonitor for Arc<M> {
    fn subscribe_events(&self) -> BlockStream {
        (**self).subscribe_events()
    }

    fn latest_block_num(&self) -> u64 {
        (**self).latest_block_num()
    }

    fn oldest_block_num(&self) -> u64 {
        (**self).oldest_block_num()
    }

    fn logs_enabled(&self) -> bool {
        (**self).logs_enabled()
    }

    fn retention(&self) -> usize {
        (**self).retention()
    }

    fn retained_blocks(&self) -> Vec<Arc<Block>> {
        (**self).retained_blocks()
    }

    fn find_transaction(&self, txn_hash: B256) -> Option<u64> {
        (**self).find_transaction(txn_hash)
    }

    fn block_hash(&self, number: u64) -> Option<B256> {
        (**self).block_hash(number)
    }

    fn avg_block_time(&self) -> Duration {
        (**self).avg_block_time()
    }

    fn purge_history(&self) {
        (**self).purge_history()
    }
}
