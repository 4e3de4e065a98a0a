//! Retry-queue behavior under a prolonged provider outage.

use alloy::network::TransactionResponse;
use lookout_receipts::{FilterQuery, MaxWait, Options, ReceiptsListener};
use lookout_test_utils::{mine, test_address, test_hash, txn, MockChainMonitor, MockReceiptProvider};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

/// An outage longer than the in-call backoff budget forces matched receipts
/// through the pending-retry queue, which keeps refetching on the periodic
/// tick until the provider heals.
#[tokio::test(start_paused = true)]
async fn prolonged_outage_drains_through_retry_queue() {
    let opts = Options { num_blocks_to_finality: 2, ..Default::default() };
    let monitor = Arc::new(MockChainMonitor::new());
    let provider = Arc::new(MockReceiptProvider::new(1));
    let listener =
        ReceiptsListener::new(Arc::clone(&provider), Arc::clone(&monitor), opts).unwrap();
    let runner = listener.clone();
    tokio::spawn(async move { runner.run().await });
    sleep(Duration::from_millis(50)).await;

    mine(&monitor, &provider, 1, vec![], vec![]);

    let txns: Vec<_> = (0..3u64)
        .map(|nonce| txn(test_hash(0x8000 + nonce), test_address(6), Some(test_address(7)), nonce))
        .collect();
    let hashes: Vec<_> = txns.iter().map(|transfer| transfer.tx_hash()).collect();

    let mut sub = listener.subscribe(
        hashes.iter().map(|hash| FilterQuery::txn_hash(*hash).with_max_wait(MaxWait::Unlimited)),
    );
    sleep(Duration::from_millis(50)).await;

    provider.set_failing(true);
    mine(&monitor, &provider, 2, txns, vec![]);

    {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            sleep(Duration::from_secs(40 * 60)).await;
            provider.set_failing(false);
        });
    }

    let mut mined: Vec<_> = Vec::new();
    for _ in 0..3 {
        let receipt =
            timeout(Duration::from_secs(3 * 3_600), sub.recv()).await.unwrap().unwrap();
        assert!(!receipt.is_final());
        mined.push(receipt.transaction_hash());
    }
    mined.sort();
    let mut expected = hashes.clone();
    expected.sort();
    assert_eq!(mined, expected);

    // the subscription survived the outage; finality still follows
    mine(&monitor, &provider, 3, vec![], vec![]);
    mine(&monitor, &provider, 4, vec![], vec![]);
    for _ in 0..3 {
        let receipt = timeout(Duration::from_secs(60), sub.recv()).await.unwrap().unwrap();
        assert!(receipt.is_final());
    }
}
