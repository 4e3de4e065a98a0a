//! Reorg handling and finality boundary behaviors.

use lookout_receipts::{FilterQuery, MaxWait, Options, ReceiptsListener};
use lookout_test_utils::{
    block_with_salt, mine, receipt_for, test_address, test_hash, txn, MockChainMonitor,
    MockReceiptProvider,
};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

const RECV_TIMEOUT: Duration = Duration::from_secs(60);

async fn harness(opts: Options) -> (ReceiptsListener, Arc<MockChainMonitor>, Arc<MockReceiptProvider>) {
    let monitor = Arc::new(MockChainMonitor::new());
    let provider = Arc::new(MockReceiptProvider::new(1));
    let listener =
        ReceiptsListener::new(Arc::clone(&provider), Arc::clone(&monitor), opts).unwrap();

    let runner = listener.clone();
    tokio::spawn(async move { runner.run().await });
    sleep(Duration::from_millis(50)).await;

    (listener, monitor, provider)
}

#[tokio::test(start_paused = true)]
async fn reorged_match_is_redelivered_after_remine() {
    let opts = Options { num_blocks_to_finality: 3, ..Default::default() };
    let (listener, monitor, provider) = harness(opts).await;
    mine(&monitor, &provider, 1, vec![], vec![]);

    let hash = test_hash(0xf00);
    let transfer = txn(hash, test_address(1), Some(test_address(2)), 0);

    let mut sub = listener.subscribe([FilterQuery::txn_hash(hash)]);
    sleep(Duration::from_millis(50)).await;

    let original = mine(&monitor, &provider, 2, vec![transfer.clone()], vec![]);

    let mined = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert!(!mined.is_final());
    assert!(!mined.is_reorged());
    assert_eq!(mined.block_hash(), original.hash());

    // the enclosing block is reorged out; the removal itself is not
    // delivered
    monitor.reorg(1);
    assert!(timeout(Duration::from_secs(30), sub.recv()).await.is_err());

    // the transaction is mined again in a replacement block
    let replacement = block_with_salt(2, 1, vec![transfer.clone()], vec![]);
    provider.insert_receipt(hash, receipt_for(&replacement.transactions[0], vec![]));
    monitor.push_block(replacement.clone());

    let remined = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert!(!remined.is_final());
    assert!(!remined.is_reorged());
    assert_eq!(remined.block_hash(), replacement.hash());

    for number in 3..=5 {
        mine(&monitor, &provider, number, vec![], vec![]);
    }

    let finalized = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert!(finalized.is_final());
    assert_eq!(finalized.block_hash(), replacement.hash());

    // the one-shot hash filter is gone after its final delivery
    assert!(sub.filters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn finality_depth_one_finalizes_on_the_next_block() {
    let opts = Options { num_blocks_to_finality: 1, ..Default::default() };
    let (listener, monitor, provider) = harness(opts).await;
    mine(&monitor, &provider, 1, vec![], vec![]);

    let hash = test_hash(0xfab);
    let fetch = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.fetch_transaction_receipt(hash).await })
    };
    sleep(Duration::from_millis(50)).await;

    mine(&monitor, &provider, 2, vec![txn(hash, test_address(1), None, 0)], vec![]);
    let (mined, wait_finality) = timeout(RECV_TIMEOUT, fetch).await.unwrap().unwrap().unwrap();
    assert_eq!(mined.block_number(), 2);
    assert!(!mined.is_final());

    mine(&monitor, &provider, 3, vec![], vec![]);
    let finalized = timeout(RECV_TIMEOUT, wait_finality).await.unwrap().unwrap();
    assert!(finalized.is_final());
}

#[tokio::test(start_paused = true)]
async fn unlimited_max_wait_never_expires() {
    let (listener, monitor, provider) = harness(Options::default()).await;
    mine(&monitor, &provider, 1, vec![], vec![]);

    // both an explicit zero and the inherited listener default disable
    // expiry
    let sub = listener.subscribe([
        FilterQuery::to(test_address(0x21)).with_max_wait(MaxWait::Unlimited),
        FilterQuery::to(test_address(0x22)),
    ]);
    sleep(Duration::from_millis(50)).await;

    for number in 2..=14 {
        mine(&monitor, &provider, number, vec![], vec![]);
    }
    sleep(Duration::from_millis(50)).await;

    let filters = sub.filters();
    assert_eq!(filters.len(), 2);
    assert!(filters.iter().all(|filter| !filter.is_exhausted()));
}

#[tokio::test(start_paused = true)]
async fn default_txn_hash_wait_is_three_finality_depths() {
    let opts = Options { num_blocks_to_finality: 2, ..Default::default() };
    let (listener, monitor, provider) = harness(opts).await;
    mine(&monitor, &provider, 1, vec![], vec![]);

    let sub = listener.subscribe([FilterQuery::txn_hash(test_hash(0x404))]);
    sleep(Duration::from_millis(50)).await;
    let filter = sub.filters().pop().unwrap();

    // grace block, then six empty blocks exhaust the 3 * depth budget
    for number in 2..=8 {
        mine(&monitor, &provider, number, vec![], vec![]);
    }

    timeout(RECV_TIMEOUT, filter.exhausted()).await.unwrap();
    assert!(sub.filters().is_empty());
}
