//! Test utilities: scriptable chain-monitor and provider mocks, plus
//! builders for transactions, receipts, logs, and blocks.

mod builders;
pub use builders::{
    block, block_with_salt, log, mine, receipt_for, test_address, test_hash, txn,
};

mod monitor;
pub use monitor::MockChainMonitor;

mod provider;
pub use provider::MockReceiptProvider;

/// Initialize tracing for tests. This is just for local debugging purposes.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .try_init()
        .unwrap();
}
