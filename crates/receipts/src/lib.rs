//! Filtered transaction-receipt subscriptions for Ethereum.
//!
//! A [`ReceiptsListener`] consumes block events from a chain monitor and
//! lets many independent callers wait for receipts matching arbitrary
//! filters, delivered reliably across chain reorganizations and re-delivered
//! once they reach a configurable finality depth.
//!
//! ## Usage Example
//!
//! ```no_run
//! # use lookout_receipts::{FilterQuery, Options, ReceiptsListener};
//! # use lookout_types::{ChainMonitor, ReceiptProvider};
//! # use alloy::primitives::B256;
//! # async fn f(provider: impl ReceiptProvider + 'static, monitor: impl ChainMonitor + 'static) -> lookout_receipts::Result<()> {
//! let listener = ReceiptsListener::new(provider, monitor, Options::default())?;
//!
//! let handle = listener.clone();
//! tokio::spawn(async move { handle.run().await });
//!
//! let (receipt, wait_finality) = listener.fetch_transaction_receipt(B256::ZERO).await?;
//! println!("mined in block {}", receipt.block_number());
//! let receipt = wait_finality.await?;
//! println!("final in block {}", receipt.block_number());
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod cache;

mod error;
pub use error::{Error, Result};

mod fetch;
pub use fetch::WaitFinality;

mod filter;
pub use filter::{ActiveFilter, FilterCond, FilterQuery, LogPredicate, MaxWait};

mod finalizer;

mod listener;
pub use listener::{Options, ReceiptsListener};

mod receipt;
pub use receipt::Receipt;

mod subscription;
pub use subscription::Subscription;

/// Re-exported for convenience.
pub use lookout_types as types;
