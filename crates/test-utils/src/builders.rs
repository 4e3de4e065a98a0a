//! Builders for alloy value types used across the tests.

use crate::{MockChainMonitor, MockReceiptProvider};
use alloy::{
    consensus::{
        transaction::Recovered, Receipt as ConsensusReceipt, ReceiptEnvelope, ReceiptWithBloom,
        Signed, Transaction as _, TxEnvelope, TxLegacy,
    },
    network::TransactionResponse,
    primitives::{Address, Bytes, LogData, Signature, TxKind, B256, U256},
    rpc::types::{Header, Log, Transaction, TransactionReceipt},
};
use lookout_types::Block;

/// A deterministic 32-byte hash derived from `n`.
pub fn test_hash(n: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    B256::new(bytes)
}

/// A deterministic 20-byte address derived from `n`.
pub fn test_address(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address::new(bytes)
}

fn block_hash(number: u64, salt: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xb1;
    bytes[8..16].copy_from_slice(&salt.to_be_bytes());
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::new(bytes)
}

/// A signed legacy transfer with a fixed fee schedule. The signature is a
/// dummy; the sender is carried pre-recovered.
pub fn txn(hash: B256, from: Address, to: Option<Address>, nonce: u64) -> Transaction {
    let transfer = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 1_000_000_000,
        gas_limit: 21_000,
        to: to.map(TxKind::Call).unwrap_or(TxKind::Create),
        value: U256::from(100_000_000_000_000_000u128),
        input: Bytes::new(),
    };
    let signature = Signature::new(U256::from(1), U256::from(1), false);
    let signed = Signed::new_unchecked(transfer, signature, hash);
    Transaction {
        inner: Recovered::new_unchecked(TxEnvelope::Legacy(signed), from),
        block_hash: None,
        block_number: None,
        transaction_index: None,
        effective_gas_price: Some(1_000_000_000),
    }
}

/// A log emitted by `address` for the transaction `txn_hash`. Block fields
/// are filled in by [`block`].
pub fn log(address: Address, topics: Vec<B256>, txn_hash: B256) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: LogData::new_unchecked(topics, Bytes::new()),
        },
        block_hash: None,
        block_number: None,
        block_timestamp: None,
        transaction_hash: Some(txn_hash),
        transaction_index: None,
        log_index: None,
        removed: false,
    }
}

/// A successful receipt for `txn`, carrying the given logs.
pub fn receipt_for(txn: &Transaction, logs: Vec<Log>) -> TransactionReceipt {
    let receipt = ConsensusReceipt { status: true.into(), cumulative_gas_used: 21_000, logs };
    TransactionReceipt {
        inner: ReceiptEnvelope::Legacy(ReceiptWithBloom {
            receipt,
            logs_bloom: Default::default(),
        }),
        transaction_hash: txn.tx_hash(),
        transaction_index: txn.transaction_index,
        block_hash: txn.block_hash,
        block_number: txn.block_number,
        gas_used: 21_000,
        effective_gas_price: 1_000_000_000,
        blob_gas_used: None,
        blob_gas_price: None,
        from: txn.from(),
        to: txn.to(),
        contract_address: None,
    }
}

/// A block at `number` holding the given transactions and logs, with the
/// block fields of both filled in.
pub fn block(number: u64, txns: Vec<Transaction>, logs: Vec<Log>) -> Block {
    block_with_salt(number, 0, txns, logs)
}

/// Like [`block`], with a salt mixed into the block hash so a reorg
/// replacement at the same height gets a distinct identity.
pub fn block_with_salt(
    number: u64,
    salt: u64,
    mut txns: Vec<Transaction>,
    mut logs: Vec<Log>,
) -> Block {
    let hash = block_hash(number, salt);

    for (index, txn) in txns.iter_mut().enumerate() {
        txn.block_hash = Some(hash);
        txn.block_number = Some(number);
        txn.transaction_index = Some(index as u64);
    }
    for (index, log) in logs.iter_mut().enumerate() {
        log.block_hash = Some(hash);
        log.block_number = Some(number);
        log.log_index = Some(index as u64);
        log.transaction_index = log.transaction_hash.and_then(|txn_hash| {
            txns.iter().position(|txn| txn.tx_hash() == txn_hash).map(|pos| pos as u64)
        });
    }

    let mut header = alloy::consensus::Header::default();
    header.number = number;
    header.parent_hash = block_hash(number.saturating_sub(1), 0);
    header.timestamp = 1_700_000_000 + number * 12;

    Block::new(
        Header { hash, inner: header, total_difficulty: None, size: None },
        txns,
        logs,
    )
}

/// Mine a block: push it to the monitor and store a receipt for each of its
/// transactions with the provider.
pub fn mine(
    monitor: &MockChainMonitor,
    provider: &MockReceiptProvider,
    number: u64,
    txns: Vec<Transaction>,
    logs: Vec<Log>,
) -> Block {
    let block = block(number, txns, logs);
    for txn in &block.transactions {
        provider.insert_receipt(txn.tx_hash(), receipt_for(txn, block.txn_logs(txn.tx_hash())));
    }
    monitor.push_block(block.clone());
    block
}
