//! A scriptable in-memory chain monitor.

use alloy::{network::TransactionResponse, primitives::B256};
use lookout_types::{Block, BlockEvent, BlockStream, ChainMonitor};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;

/// Default retained-history window of the mock.
const DEFAULT_RETENTION: usize = 400;

#[derive(Default)]
struct MonitorState {
    chain: VecDeque<Arc<Block>>,
    latest: u64,
    subscribers: Vec<mpsc::UnboundedSender<Vec<BlockEvent>>>,
}

/// An in-memory [`ChainMonitor`] driven explicitly by the test.
///
/// Tests push blocks and trigger reorgs; the mock maintains the retained
/// window and broadcasts the corresponding event batches to subscribers.
pub struct MockChainMonitor {
    state: Mutex<MonitorState>,
    retention: usize,
    avg_block_time: Duration,
}

impl Default for MockChainMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainMonitor {
    /// A monitor with the default 400-block retention.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// A monitor retaining up to `retention` blocks.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            retention,
            avg_block_time: Duration::from_secs(12),
        }
    }

    fn emit(state: &mut MonitorState, events: Vec<BlockEvent>) {
        state.subscribers.retain(|subscriber| subscriber.send(events.clone()).is_ok());
    }

    /// Append a block to the canonical chain and notify subscribers.
    pub fn push_block(&self, block: Block) {
        self.push_blocks(vec![block]);
    }

    /// Append blocks as a single event batch.
    pub fn push_blocks(&self, blocks: Vec<Block>) {
        let mut state = self.state.lock();
        let mut events = Vec::with_capacity(blocks.len());
        for block in blocks {
            let block = Arc::new(block);
            state.latest = state.latest.max(block.number());
            state.chain.push_back(Arc::clone(&block));
            while state.chain.len() > self.retention {
                state.chain.pop_front();
            }
            events.push(BlockEvent::added(block));
        }
        Self::emit(&mut state, events);
    }

    /// Reorg out up to `depth` blocks from the tip, emitting their removal
    /// events newest first. Returns the removed blocks so the test can mine
    /// replacements.
    pub fn reorg(&self, depth: usize) -> Vec<Arc<Block>> {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        for _ in 0..depth {
            let Some(block) = state.chain.pop_back() else { break };
            removed.push(block);
        }
        state.latest = state.chain.back().map(|block| block.number()).unwrap_or(state.latest);
        let events = removed.iter().map(|block| BlockEvent::removed(Arc::clone(block))).collect();
        Self::emit(&mut state, events);
        removed
    }
}

impl ChainMonitor for MockChainMonitor {
    fn subscribe_events(&self) -> BlockStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(sender);
        receiver
    }

    fn latest_block_num(&self) -> u64 {
        self.state.lock().latest
    }

    fn oldest_block_num(&self) -> u64 {
        let state = self.state.lock();
        state.chain.front().map(|block| block.number()).unwrap_or(state.latest)
    }

    fn logs_enabled(&self) -> bool {
        true
    }

    fn retention(&self) -> usize {
        self.retention
    }

    fn retained_blocks(&self) -> Vec<Arc<Block>> {
        self.state.lock().chain.iter().cloned().collect()
    }

    fn find_transaction(&self, txn_hash: B256) -> Option<u64> {
        let state = self.state.lock();
        state.chain.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .any(|txn| txn.tx_hash() == txn_hash)
                .then(|| block.number())
        })
    }

    fn block_hash(&self, number: u64) -> Option<B256> {
        let state = self.state.lock();
        state.chain.iter().find(|block| block.number() == number).map(|block| block.hash())
    }

    fn avg_block_time(&self) -> Duration {
        self.avg_block_time
    }

    fn purge_history(&self) {
        self.state.lock().chain.clear();
    }
}

impl std::fmt::Debug for MockChainMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockChainMonitor")
            .field("latest", &state.latest)
            .field("retained", &state.chain.len())
            .finish_non_exhaustive()
    }
}
