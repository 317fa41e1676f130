//! Transaction Tracker
//!
//! Polls for the receipt of a relayed transaction until it is mined or the
//! timeout elapses.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::api::EthRpc;
use crate::error::ChainSigResult;
use crate::types::TransactionId;
use crate::utils::logging::LogEntry;

/// Outcome of a relayed transaction as far as the node knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Not mined yet (or not mined before the timeout)
    Pending,
    Success { block_number: u64 },
    Reverted { block_number: u64 },
}

impl ReceiptStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, ReceiptStatus::Pending)
    }
}

/// Single receipt lookup
pub fn check_receipt(rpc: &dyn EthRpc, id: &TransactionId) -> ChainSigResult<ReceiptStatus> {
    let receipt = match rpc.transaction_receipt(id)? {
        Some(r) => r,
        None => return Ok(ReceiptStatus::Pending),
    };

    // A receipt without a block number belongs to a pending block
    let block_number = match receipt.block_number {
        Some(n) => n.as_u64(),
        None => return Ok(ReceiptStatus::Pending),
    };

    match receipt.status.map(|s| s.as_u64()) {
        Some(0) => Ok(ReceiptStatus::Reverted { block_number }),
        _ => Ok(ReceiptStatus::Success { block_number }),
    }
}

/// Poll every `interval` until the receipt is final or `timeout` elapses
pub fn await_receipt(
    rpc: &dyn EthRpc,
    id: &TransactionId,
    interval: Duration,
    timeout: Duration,
) -> ChainSigResult<ReceiptStatus> {
    let deadline = Instant::now() + timeout;

    loop {
        let status = check_receipt(rpc, id)?;
        if status.is_final() {
            LogEntry::info("tracker", "Transaction mined")
                .field("tx_hash", id)
                .field("status", format!("{:?}", status))
                .log();
            return Ok(status);
        }

        let now = Instant::now();
        if now >= deadline {
            LogEntry::warn("tracker", "Receipt not found before timeout")
                .field("tx_hash", id)
                .log();
            return Ok(ReceiptStatus::Pending);
        }
        std::thread::sleep(interval.min(deadline - now));
    }
}
