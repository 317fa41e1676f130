//! Transaction Broadcaster
//!
//! Submits signed fee-market transactions. There is no automatic retry: a
//! node rejection is returned with the node's reason verbatim and the caller
//! still owns the signed transaction for resubmission.

use super::codec;
use crate::api::EthRpc;
use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{SignedTransaction, TransactionId};
use crate::utils::logging::LogEntry;

/// Broadcast `signed` and return its transaction id without waiting for
/// inclusion
pub fn submit(rpc: &dyn EthRpc, signed: &SignedTransaction) -> ChainSigResult<TransactionId> {
    let raw = codec::encode_signed(signed);
    let expected = codec::transaction_id(signed);

    match rpc.send_raw_transaction(&raw) {
        Ok(id) => {
            if id != expected {
                LogEntry::warn("broadcaster", "Node returned an unexpected transaction id")
                    .field("tx_hash", id)
                    .field("expected_hash", expected)
                    .log();
            }
            LogEntry::info("broadcaster", "Transaction relayed")
                .field("tx_hash", id)
                .field("nonce", signed.tx.nonce)
                .log();
            Ok(id)
        }
        Err(err @ ChainSigError::RelayRejected { .. }) => {
            LogEntry::warn("broadcaster", "Relay rejected transaction")
                .field("reason", &err)
                .field("tx_hash", expected)
                .log();
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Decode and broadcast a previously signed transaction given as hex
pub fn submit_raw_hex(rpc: &dyn EthRpc, raw_hex: &str) -> ChainSigResult<TransactionId> {
    let signed = codec::decode_signed_hex(raw_hex)?;
    submit(rpc, &signed)
}
