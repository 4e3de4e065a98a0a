//! Shared types for the lookout receipts toolkit: the block-event model
//! delivered by a chain monitor, the collaborator traits the listener
//! consumes, and per-chain confirmation depths.

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

mod block;
pub use block::{Block, BlockEvent, BlockEventKind};

/// Per-chain confirmation depths.
pub mod chains;

mod monitor;
pub use monitor::{BlockStream, ChainMonitor};

mod provider;
pub use provider::{ProviderError, ProviderResult, ReceiptProvider};
