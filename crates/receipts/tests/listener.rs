//! End-to-end scenarios against the mock monitor and provider.

use alloy::network::TransactionResponse;
use lookout_receipts::{types::ChainMonitor, Error, FilterQuery, MaxWait, Options, ReceiptsListener};
use lookout_test_utils::{
    log, mine, test_address, test_hash, txn, MockChainMonitor, MockReceiptProvider,
};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

const RECV_TIMEOUT: Duration = Duration::from_secs(60);

struct Harness {
    listener: ReceiptsListener,
    monitor: Arc<MockChainMonitor>,
    provider: Arc<MockReceiptProvider>,
}

/// Spin up a listener over fresh mocks and give its loop a beat to start.
async fn harness(opts: Options) -> Harness {
    let monitor = Arc::new(MockChainMonitor::new());
    let provider = Arc::new(MockReceiptProvider::new(1));
    let listener =
        ReceiptsListener::new(Arc::clone(&provider), Arc::clone(&monitor), opts).unwrap();

    let runner = listener.clone();
    tokio::spawn(async move { runner.run().await });
    sleep(Duration::from_millis(50)).await;

    Harness { listener, monitor, provider }
}

fn two_block_finality() -> Options {
    Options { num_blocks_to_finality: 2, ..Default::default() }
}

/// Mine `count` empty blocks after `start`.
fn mine_empty(h: &Harness, start: u64, count: u64) {
    for number in start + 1..=start + count {
        mine(&h.monitor, &h.provider, number, vec![], vec![]);
    }
}

#[tokio::test(start_paused = true)]
async fn simple_transfer_mined_then_final() {
    let h = harness(two_block_finality()).await;
    mine(&h.monitor, &h.provider, 1, vec![], vec![]);

    let hash = test_hash(0xaa);
    let transfer = txn(hash, test_address(1), Some(test_address(2)), 0);

    let fetch = {
        let listener = h.listener.clone();
        tokio::spawn(async move { listener.fetch_transaction_receipt(hash).await })
    };
    sleep(Duration::from_millis(50)).await;

    mine(&h.monitor, &h.provider, 2, vec![transfer], vec![]);

    let (mined, wait_finality) =
        timeout(RECV_TIMEOUT, fetch).await.unwrap().unwrap().unwrap();
    assert_eq!(mined.transaction_hash(), hash);
    assert_eq!(mined.block_number(), 2);
    assert!(!mined.is_final());
    assert!(mined.status());

    mine_empty(&h, 2, 2);

    let finalized = timeout(RECV_TIMEOUT, wait_finality).await.unwrap().unwrap();
    assert_eq!(finalized.transaction_hash(), hash);
    assert!(finalized.is_final());
}

#[tokio::test(start_paused = true)]
async fn forty_pipelined_txns_settle_and_release_subscribers() {
    let h = harness(two_block_finality()).await;
    mine(&h.monitor, &h.provider, 1, vec![], vec![]);

    let sender = test_address(7);
    let txns: Vec<_> = (0..40u64)
        .map(|nonce| txn(test_hash(0x4000 + nonce), sender, Some(test_address(8)), nonce))
        .collect();

    let fetches: Vec<_> = txns
        .iter()
        .map(|transfer| {
            let listener = h.listener.clone();
            let hash = transfer.tx_hash();
            tokio::spawn(async move {
                let (mined, wait_finality) =
                    listener.fetch_transaction_receipt(hash).await?;
                let finalized = wait_finality.await?;
                Ok::<_, Error>((mined, finalized))
            })
        })
        .collect();
    sleep(Duration::from_millis(50)).await;

    mine(&h.monitor, &h.provider, 2, txns, vec![]);
    mine_empty(&h, 2, 2);

    let mut deliveries = 0;
    for fetch in fetches {
        let (mined, finalized) = timeout(RECV_TIMEOUT, fetch).await.unwrap().unwrap().unwrap();
        assert!(!mined.is_final());
        assert!(finalized.is_final());
        assert_eq!(mined.transaction_hash(), finalized.transaction_hash());
        deliveries += 2;
    }
    assert_eq!(deliveries, 80);
    assert_eq!(h.listener.num_subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_txn_exhausts_after_max_wait() {
    let h = harness(two_block_finality()).await;
    mine(&h.monitor, &h.provider, 1, vec![], vec![]);

    let query = FilterQuery::txn_hash(test_hash(0xdead)).with_max_wait(MaxWait::Blocks(5));
    let fetch = {
        let listener = h.listener.clone();
        tokio::spawn(async move { listener.fetch_transaction_receipt_with_filter(query).await })
    };
    sleep(Duration::from_millis(50)).await;

    mine_empty(&h, 1, 7);

    let result = timeout(RECV_TIMEOUT, fetch).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::FilterExhausted)));
    assert_eq!(h.listener.num_subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn purged_history_falls_back_to_on_chain_search() {
    let h = harness(two_block_finality()).await;

    let hash = test_hash(0x01d);
    let old = txn(hash, test_address(1), Some(test_address(2)), 0);
    mine(&h.monitor, &h.provider, 1, vec![old], vec![]);
    mine_empty(&h, 1, 3);
    sleep(Duration::from_millis(50)).await;

    h.listener.purge_history();
    assert!(h.monitor.retained_blocks().is_empty());

    let (receipt, wait_finality) =
        timeout(RECV_TIMEOUT, h.listener.fetch_transaction_receipt(hash)).await.unwrap().unwrap();
    assert_eq!(receipt.transaction_hash(), hash);
    assert!(receipt.is_final());

    let finalized = timeout(RECV_TIMEOUT, wait_finality).await.unwrap().unwrap();
    assert_eq!(finalized.transaction_hash(), hash);
}

#[tokio::test(start_paused = true)]
async fn provider_outage_heals_without_losing_deliveries() {
    let h = harness(two_block_finality()).await;
    mine(&h.monitor, &h.provider, 1, vec![], vec![]);

    let txns: Vec<_> = (0..20u64)
        .map(|nonce| txn(test_hash(0x5000 + nonce), test_address(3), Some(test_address(4)), nonce))
        .collect();
    let hashes: Vec<_> = txns.iter().map(|transfer| transfer.tx_hash()).collect();

    let mut sub = h.listener.subscribe(hashes.iter().map(|hash| {
        // keep the subscription alive through the outage
        FilterQuery::txn_hash(*hash).with_max_wait(MaxWait::Unlimited)
    }));
    sleep(Duration::from_millis(50)).await;

    h.provider.set_failing(true);
    mine(&h.monitor, &h.provider, 2, txns, vec![]);

    // heal after an outage window
    sleep(Duration::from_secs(20)).await;
    h.provider.set_failing(false);

    let mut mined = Vec::new();
    for _ in 0..20 {
        let receipt = timeout(Duration::from_secs(3_600), sub.recv()).await.unwrap().unwrap();
        assert!(!receipt.is_final());
        mined.push(receipt.transaction_hash());
    }
    mined.sort();
    let mut expected = hashes.clone();
    expected.sort();
    assert_eq!(mined, expected);
    assert_eq!(h.listener.num_subscribers(), 1);

    mine_empty(&h, 2, 2);
    for _ in 0..20 {
        let receipt = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
        assert!(receipt.is_final());
    }
}

#[tokio::test(start_paused = true)]
async fn log_topic_filter_sees_mint_and_transfers() {
    let h = harness(two_block_finality()).await;
    mine(&h.monitor, &h.provider, 1, vec![], vec![]);

    let transfer_topic = test_hash(0x7e5);
    let token = test_address(0x70);

    let mut sub =
        h.listener.subscribe([FilterQuery::log_topic(transfer_topic).with_finalize(true)]);
    sleep(Duration::from_millis(50)).await;

    // a mint plus five transfers, each emitting one Transfer log
    let txns: Vec<_> = (0..6u64)
        .map(|nonce| txn(test_hash(0x6000 + nonce), test_address(5), Some(token), nonce))
        .collect();
    let logs: Vec<_> = txns
        .iter()
        .map(|transfer| log(token, vec![transfer_topic], transfer.tx_hash()))
        .collect();
    mine(&h.monitor, &h.provider, 2, txns, logs);

    let mut mined = 0;
    for _ in 0..6 {
        let receipt = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
        assert!(!receipt.is_final());
        assert!(receipt.logs().iter().any(|entry| entry.topic0() == Some(&transfer_topic)));
        mined += 1;
    }
    assert_eq!(mined, 6);

    mine_empty(&h, 2, 2);
    let mut finalized = 0;
    for _ in 0..6 {
        let receipt = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
        assert!(receipt.is_final());
        finalized += 1;
    }
    assert_eq!(finalized, 6);

    // the log-topic filter survives its deliveries
    assert_eq!(sub.filters().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_is_not_reentrant() {
    let monitor = Arc::new(MockChainMonitor::new());
    let provider = Arc::new(MockReceiptProvider::new(1));
    let listener =
        ReceiptsListener::new(Arc::clone(&provider), Arc::clone(&monitor), Options::default())
            .unwrap();

    let runner = listener.clone();
    tokio::spawn(async move { runner.run().await });
    sleep(Duration::from_millis(50)).await;

    assert!(matches!(listener.run().await, Err(Error::AlreadyRunning)));

    listener.stop();
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_closes_the_channel() {
    let h = harness(two_block_finality()).await;
    mine(&h.monitor, &h.provider, 1, vec![], vec![]);

    let mut sub = h.listener.subscribe([FilterQuery::to(test_address(9))]);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.listener.num_subscribers(), 1);

    sub.unsubscribe();
    assert!(sub.is_done());
    assert_eq!(h.listener.num_subscribers(), 0);
    assert!(timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn limit_one_delivers_exactly_once() {
    let h = harness(two_block_finality()).await;
    mine(&h.monitor, &h.provider, 1, vec![], vec![]);

    let recipient = test_address(0x11);
    let mut sub = h.listener.subscribe([FilterQuery::to(recipient).with_limit_one(true)]);
    sleep(Duration::from_millis(50)).await;

    let first = txn(test_hash(0x9001), test_address(1), Some(recipient), 0);
    let second = txn(test_hash(0x9002), test_address(1), Some(recipient), 1);
    mine(&h.monitor, &h.provider, 2, vec![first], vec![]);
    mine(&h.monitor, &h.provider, 3, vec![second], vec![]);

    let receipt = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(receipt.transaction_hash(), test_hash(0x9001));
    assert!(sub.filters().is_empty());

    // nothing else arrives
    mine_empty(&h, 3, 2);
    assert!(timeout(Duration::from_secs(30), sub.recv()).await.is_err());
}
