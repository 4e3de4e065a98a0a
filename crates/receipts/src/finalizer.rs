//! Queue of matched receipts awaiting the finality depth.

use crate::{filter::ActiveFilter, receipt::Receipt};
use alloy::primitives::B256;
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

/// A matched receipt waiting to be re-delivered as final.
#[derive(Debug, Clone)]
pub(crate) struct FinalizerEntry {
    pub(crate) filter: Arc<ActiveFilter>,
    pub(crate) receipt: Receipt,
    pub(crate) match_block: u64,
}

/// Per-subscription finality queue.
///
/// Entries are kept in ascending match-block order and deduplicated by
/// `(filter, txn hash)`. The finalizer does not re-verify on-chain
/// inclusion; the listener's cache eviction on removed blocks and the
/// monitor's reorg notifications are what make a dequeued receipt final.
#[derive(Debug, Default)]
pub(crate) struct Finalizer {
    queue: VecDeque<FinalizerEntry>,
    seen: HashSet<(u64, B256)>,
}

impl Finalizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue a matched receipt. Receipts already final are not queued. A
    /// receipt already queued for the same filter has its entry refreshed
    /// in place, since a reorg can move the match to a different block.
    pub(crate) fn enqueue(&mut self, filter: Arc<ActiveFilter>, receipt: Receipt, match_block: u64) {
        if receipt.is_final() {
            return;
        }

        let txn_id = (filter.key(), receipt.transaction_hash());
        if self.seen.contains(&txn_id) {
            if let Some(pos) = self
                .queue
                .iter()
                .position(|entry| entry.filter.key() == txn_id.0 && entry.receipt.transaction_hash() == txn_id.1)
            {
                self.queue.remove(pos);
            }
            self.insert_sorted(FinalizerEntry { filter, receipt, match_block });
            return;
        }

        self.seen.insert(txn_id);
        self.insert_sorted(FinalizerEntry { filter, receipt, match_block });
    }

    /// Flag the queued entry for `(filter, txn hash)` as reorged, so it is
    /// dropped instead of final-delivered if the transaction is not mined
    /// again first.
    pub(crate) fn mark_reorged(&mut self, filter_key: u64, txn_hash: B256) -> bool {
        let Some(entry) = self
            .queue
            .iter_mut()
            .find(|entry| entry.filter.key() == filter_key && entry.receipt.transaction_hash() == txn_hash)
        else {
            return false;
        };
        entry.receipt.set_reorged(true);
        true
    }

    /// Pop every entry that has reached the finality depth under
    /// `current_block`, in queue order.
    pub(crate) fn dequeue(&mut self, current_block: u64, finality_depth: u64) -> Vec<FinalizerEntry> {
        let mut finalized = Vec::new();
        while self
            .queue
            .front()
            .is_some_and(|entry| current_block.saturating_sub(entry.match_block) >= finality_depth)
        {
            if let Some(entry) = self.queue.pop_front() {
                self.seen.remove(&(entry.filter.key(), entry.receipt.transaction_hash()));
                finalized.push(entry);
            }
        }
        finalized
    }

    fn insert_sorted(&mut self, entry: FinalizerEntry) {
        let pos = self
            .queue
            .iter()
            .rposition(|queued| queued.match_block <= entry.match_block)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        self.queue.insert(pos, entry);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::FilterQuery;
    use alloy::primitives::B256;

    fn receipt(txn_hash: B256) -> Receipt {
        let mut receipt = Receipt::pending(None, vec![], false);
        let full = lookout_test_utils::receipt_for(
            &lookout_test_utils::txn(
                txn_hash,
                lookout_test_utils::test_address(1),
                None,
                0,
            ),
            vec![],
        );
        receipt.attach_receipt(full);
        receipt
    }

    fn filter(key: u64, txn_hash: B256) -> Arc<ActiveFilter> {
        ActiveFilter::new(key, FilterQuery::txn_hash(txn_hash))
    }

    #[test]
    fn dequeues_in_match_order_at_depth() {
        let mut finalizer = Finalizer::new();
        let (h1, h2, h3) = (B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3));

        finalizer.enqueue(filter(1, h1), receipt(h1), 10);
        finalizer.enqueue(filter(2, h2), receipt(h2), 12);
        finalizer.enqueue(filter(3, h3), receipt(h3), 11);

        let finalized = finalizer.dequeue(13, 2);
        let hashes: Vec<_> =
            finalized.iter().map(|entry| entry.receipt.transaction_hash()).collect();
        assert_eq!(hashes, vec![h1, h3]);
        assert_eq!(finalizer.len(), 1);

        // same entries are not re-deliverable
        assert!(finalizer.dequeue(13, 2).is_empty());
    }

    #[test]
    fn enqueue_dedupes_and_moves_block() {
        let mut finalizer = Finalizer::new();
        let hash = B256::repeat_byte(1);
        let filter = filter(1, hash);

        finalizer.enqueue(filter.clone(), receipt(hash), 10);
        // re-mined two blocks later after a reorg
        finalizer.enqueue(filter.clone(), receipt(hash), 12);
        assert_eq!(finalizer.len(), 1);

        // not final at the old block's depth
        assert!(finalizer.dequeue(11, 1).is_empty());
        let finalized = finalizer.dequeue(13, 1);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].match_block, 12);
    }

    #[test]
    fn distinct_filters_share_a_txn() {
        let mut finalizer = Finalizer::new();
        let hash = B256::repeat_byte(1);

        finalizer.enqueue(filter(1, hash), receipt(hash), 10);
        finalizer.enqueue(filter(2, hash), receipt(hash), 10);
        assert_eq!(finalizer.len(), 2);
    }

    #[test]
    fn final_receipts_are_not_queued() {
        let mut finalizer = Finalizer::new();
        let hash = B256::repeat_byte(1);
        let mut already_final = receipt(hash);
        already_final.set_final(true);

        finalizer.enqueue(filter(1, hash), already_final, 10);
        assert!(finalizer.is_empty());
    }

    #[test]
    fn reorged_entries_are_flagged() {
        let mut finalizer = Finalizer::new();
        let hash = B256::repeat_byte(1);
        let filter = filter(1, hash);

        finalizer.enqueue(filter.clone(), receipt(hash), 10);
        assert!(finalizer.mark_reorged(filter.key(), hash));
        assert!(!finalizer.mark_reorged(99, hash));

        let finalized = finalizer.dequeue(20, 2);
        assert!(finalized[0].receipt.is_reorged());
    }
}
