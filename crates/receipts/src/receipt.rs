//! The receipt view delivered to subscribers.

use crate::filter::ActiveFilter;
use alloy::{
    consensus::{Transaction as _, TxReceipt},
    network::TransactionResponse,
    primitives::{Address, B256},
    rpc::types::{Log, Transaction, TransactionReceipt},
};
use std::sync::Arc;

/// A matched transaction receipt.
///
/// This is a view over the transaction as seen in a monitor block, the
/// receipt fetched from upstream, or both. A receipt matched by log before
/// its upstream fetch completes has only the transaction side; a receipt
/// found by direct on-chain search has only the receipt side. Accessors
/// return zero values when the underlying source is absent.
#[derive(Debug, Clone)]
pub struct Receipt {
    transaction: Option<Transaction>,
    receipt: Option<TransactionReceipt>,
    logs: Vec<Log>,
    filter: Option<Arc<ActiveFilter>>,
    is_final: bool,
    reorged: bool,
}

impl Receipt {
    /// A match-time view built from a monitor block, before the upstream
    /// fetch.
    pub(crate) const fn pending(
        transaction: Option<Transaction>,
        logs: Vec<Log>,
        reorged: bool,
    ) -> Self {
        Self { transaction, receipt: None, logs, filter: None, is_final: false, reorged }
    }

    /// A view built from an upstream receipt alone, as produced by on-chain
    /// search for transactions no longer in monitor retention.
    pub(crate) fn from_receipt(receipt: TransactionReceipt) -> Self {
        let logs = receipt.inner.logs().to_vec();
        Self {
            transaction: None,
            receipt: Some(receipt),
            logs,
            filter: None,
            is_final: false,
            reorged: false,
        }
    }

    /// Attach the fetched receipt, replacing the matched logs with the
    /// receipt's authoritative ones.
    pub(crate) fn attach_receipt(&mut self, receipt: TransactionReceipt) {
        self.logs = receipt.inner.logs().to_vec();
        self.receipt = Some(receipt);
    }

    pub(crate) fn set_filter(&mut self, filter: Arc<ActiveFilter>) {
        self.filter = Some(filter);
    }

    pub(crate) fn set_final(&mut self, is_final: bool) {
        self.is_final = is_final;
    }

    pub(crate) fn set_reorged(&mut self, reorged: bool) {
        self.reorged = reorged;
    }

    /// The transaction hash.
    pub fn transaction_hash(&self) -> B256 {
        if let Some(receipt) = &self.receipt {
            return receipt.transaction_hash;
        }
        self.transaction.as_ref().map(|txn| txn.tx_hash()).unwrap_or_default()
    }

    /// The transaction sender, zero when unknown.
    pub fn from(&self) -> Address {
        if let Some(txn) = &self.transaction {
            return txn.from();
        }
        self.receipt.as_ref().map(|receipt| receipt.from).unwrap_or_default()
    }

    /// The transaction recipient, `None` for contract deployments and when
    /// unknown.
    pub fn to(&self) -> Option<Address> {
        if let Some(txn) = &self.transaction {
            return txn.to();
        }
        self.receipt.as_ref().and_then(|receipt| receipt.to)
    }

    /// Number of the enclosing block, zero when unknown.
    pub fn block_number(&self) -> u64 {
        self.receipt
            .as_ref()
            .and_then(|receipt| receipt.block_number)
            .or_else(|| self.transaction.as_ref().and_then(|txn| txn.block_number))
            .unwrap_or_default()
    }

    /// Hash of the enclosing block, zero when unknown.
    pub fn block_hash(&self) -> B256 {
        self.receipt
            .as_ref()
            .and_then(|receipt| receipt.block_hash)
            .or_else(|| self.transaction.as_ref().and_then(|txn| txn.block_hash))
            .unwrap_or_default()
    }

    /// Index of the transaction within its block, zero when unknown.
    pub fn transaction_index(&self) -> u64 {
        self.receipt
            .as_ref()
            .and_then(|receipt| receipt.transaction_index)
            .or_else(|| self.transaction.as_ref().and_then(|txn| txn.transaction_index))
            .unwrap_or_default()
    }

    /// Execution status, false when the receipt side is absent.
    pub fn status(&self) -> bool {
        self.receipt.as_ref().map(|receipt| receipt.status()).unwrap_or_default()
    }

    /// Gas used by the transaction, zero when the receipt side is absent.
    pub fn gas_used(&self) -> u64 {
        self.receipt.as_ref().map(|receipt| receipt.gas_used).unwrap_or_default()
    }

    /// Effective gas price paid, zero when unknown.
    pub fn effective_gas_price(&self) -> u128 {
        if let Some(receipt) = &self.receipt {
            return receipt.effective_gas_price;
        }
        self.transaction.as_ref().and_then(|txn| txn.effective_gas_price).unwrap_or_default()
    }

    /// Address of the deployed contract, when the transaction was a deploy.
    pub fn deployed_contract_address(&self) -> Option<Address> {
        self.receipt.as_ref().and_then(|receipt| receipt.contract_address)
    }

    /// The transaction's logs.
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// The transaction view, when the receipt was matched in a monitor
    /// block.
    pub const fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// The fetched upstream receipt, when available.
    pub const fn receipt(&self) -> Option<&TransactionReceipt> {
        self.receipt.as_ref()
    }

    /// The filter this receipt was delivered for.
    pub fn filter(&self) -> Option<&Arc<ActiveFilter>> {
        self.filter.as_ref()
    }

    /// True once the receipt has reached the finality depth under the
    /// current head.
    pub const fn is_final(&self) -> bool {
        self.is_final
    }

    /// True if the enclosing block was removed by a reorg after the match.
    pub const fn is_reorged(&self) -> bool {
        self.reorged
    }
}
