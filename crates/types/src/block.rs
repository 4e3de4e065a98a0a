//! Block and block-event types delivered by a chain monitor.

use alloy::{
    network::TransactionResponse,
    primitives::B256,
    rpc::types::{Header, Log, Transaction},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a block was added to or removed from the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockEventKind {
    /// The block became part of the canonical chain.
    Added,
    /// The block was displaced by a reorg.
    Removed,
}

/// A block as retained by the chain monitor: the header together with the
/// block's transactions and captured logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// Transactions included in the block, in block order.
    pub transactions: Vec<Transaction>,
    /// All logs emitted by the block, in log-index order.
    pub logs: Vec<Log>,
}

impl Block {
    /// Create a block from its parts.
    pub const fn new(header: Header, transactions: Vec<Transaction>, logs: Vec<Log>) -> Self {
        Self { header, transactions, logs }
    }

    /// The block number.
    pub const fn number(&self) -> u64 {
        self.header.inner.number
    }

    /// The block hash.
    pub const fn hash(&self) -> B256 {
        self.header.hash
    }

    /// The parent block hash.
    pub const fn parent_hash(&self) -> B256 {
        self.header.inner.parent_hash
    }

    /// Find a transaction in this block by hash.
    pub fn transaction(&self, txn_hash: B256) -> Option<&Transaction> {
        self.transactions.iter().find(|txn| txn.tx_hash() == txn_hash)
    }

    /// Logs emitted by the given transaction, in log-index order.
    pub fn txn_logs(&self, txn_hash: B256) -> Vec<Log> {
        self.logs
            .iter()
            .filter(|log| log.transaction_hash == Some(txn_hash))
            .cloned()
            .collect()
    }
}

/// A monitor-emitted notification that a block was added to or removed from
/// the canonical chain. Events arrive in batches; during a reorg the
/// `Removed` events precede the `Added` events of the replacement blocks.
#[derive(Debug, Clone)]
pub struct BlockEvent {
    /// Added or removed.
    pub kind: BlockEventKind,
    /// The block this event refers to.
    pub block: Arc<Block>,
}

impl BlockEvent {
    /// An `Added` event for the given block.
    pub fn added(block: impl Into<Arc<Block>>) -> Self {
        Self { kind: BlockEventKind::Added, block: block.into() }
    }

    /// A `Removed` event for the given block.
    pub fn removed(block: impl Into<Arc<Block>>) -> Self {
        Self { kind: BlockEventKind::Removed, block: block.into() }
    }

    /// True if the block was added to the canonical chain.
    pub const fn is_added(&self) -> bool {
        matches!(self.kind, BlockEventKind::Added)
    }

    /// True if the block was removed by a reorg.
    pub const fn is_removed(&self) -> bool {
        matches!(self.kind, BlockEventKind::Removed)
    }
}
