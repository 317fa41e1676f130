//! Transaction Builder
//!
//! Resolves nonce and fee fields and assembles unsigned fee-market
//! transactions. Every field can be pinned through `FeeOverrides`; whatever
//! is left open is fetched from the node, and any failure to do so is a
//! `FeeEstimation` error.

use ethers_core::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::abi::{AbiEncoder, AbiValue};
use crate::api::{CallRequest, EthRpc};
use crate::error::{ChainSigError, ChainSigResult};
use crate::types::UnsignedTransaction;
use crate::utils::crypto::to_checksum_address;
use crate::utils::logging::LogEntry;

/// Gas for a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Gas assumed for contract calls when estimation is disabled
pub const DEFAULT_CALL_GAS_LIMIT: u64 = 50_000;

/// Headroom added on top of `eth_estimateGas`, in percent
pub const GAS_ESTIMATE_HEADROOM_PERCENT: u64 = 20;

/// Caller-pinned transaction fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeOverrides {
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    /// Use the fixed defaults instead of `eth_estimateGas`
    pub skip_estimation: bool,
}

/// Build an unsigned transaction from `sender` to `to`
pub fn build(
    rpc: &dyn EthRpc,
    chain_id: u64,
    sender: Address,
    to: Address,
    value_wei: U256,
    data: Option<Bytes>,
    overrides: &FeeOverrides,
) -> ChainSigResult<UnsignedTransaction> {
    let data = data.unwrap_or_default();

    let nonce = match overrides.nonce {
        Some(n) => n,
        None => rpc
            .transaction_count(sender)
            .map_err(|e| fee_error("nonce", e))?,
    };

    let max_priority_fee_per_gas = match overrides.max_priority_fee_per_gas {
        Some(p) => p,
        None => rpc
            .max_priority_fee_per_gas()
            .map_err(|e| fee_error("max priority fee", e))?,
    };

    let max_fee_per_gas = match overrides.max_fee_per_gas {
        Some(f) => f,
        None => {
            let gas_price = rpc.gas_price().map_err(|e| fee_error("gas price", e))?;
            gas_price.saturating_add(max_priority_fee_per_gas)
        }
    };

    if max_priority_fee_per_gas > max_fee_per_gas {
        return Err(ChainSigError::fee_estimation(format!(
            "max priority fee {} exceeds max fee {}",
            max_priority_fee_per_gas, max_fee_per_gas
        )));
    }

    let gas_limit = match overrides.gas_limit {
        Some(g) => g,
        None if overrides.skip_estimation => {
            if data.is_empty() {
                TRANSFER_GAS_LIMIT
            } else {
                DEFAULT_CALL_GAS_LIMIT
            }
        }
        None => {
            let call = CallRequest {
                from: sender,
                to,
                value: value_wei,
                data: data.clone(),
            };
            let estimate = rpc.estimate_gas(&call).map_err(|e| fee_error("gas limit", e))?;
            with_headroom(estimate)
        }
    };

    if gas_limit == 0 {
        return Err(ChainSigError::fee_estimation("gas limit must be non-zero"));
    }

    LogEntry::debug("tx_builder", "Built unsigned transaction")
        .address_field("sender", &to_checksum_address(sender.as_bytes()))
        .field("nonce", nonce)
        .field("gas_limit", gas_limit)
        .field("max_fee_per_gas", max_fee_per_gas)
        .log();

    Ok(UnsignedTransaction {
        nonce,
        to,
        value: value_wei,
        data,
        gas_limit,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        chain_id,
    })
}

fn with_headroom(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(GAS_ESTIMATE_HEADROOM_PERCENT) / 100)
}

fn fee_error(field: &str, cause: ChainSigError) -> ChainSigError {
    ChainSigError::fee_estimation(format!("cannot resolve {}: {}", field, cause))
}

// =============================================================================
// Contract actions
// =============================================================================

/// Everything the UI can ask the user to sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransactionBuilder {
    /// Payable `deposit(string)` crediting a NEAR account
    Deposit { near_account_id: String, amount_wei: U256 },
    Lock { amount: U256 },
    Unlock { amount: U256 },
    Withdraw { amount: U256 },
    TransferLocked { to: Address, amount: U256, near_account_id: String },
    /// Plain value transfer
    Transfer { to: Address, value: U256 },
    /// Arbitrary call with caller-supplied calldata
    Call { to: Address, value: U256, data: Bytes },
}

/// Destination, value and calldata of an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl TransactionBuilder {
    /// Contract function invoked, if any
    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            TransactionBuilder::Deposit { .. } => Some("deposit"),
            TransactionBuilder::Lock { .. } => Some("lockTokens"),
            TransactionBuilder::Unlock { .. } => Some("unlockTokens"),
            TransactionBuilder::Withdraw { .. } => Some("withdraw"),
            TransactionBuilder::TransferLocked { .. } => Some("transferLockedTokens"),
            TransactionBuilder::Transfer { .. } | TransactionBuilder::Call { .. } => None,
        }
    }

    /// Resolve the action against the caETH contract. Contract actions fail
    /// with `InvalidInput` when no contract is configured.
    pub fn target(&self, contract: Option<Address>) -> ChainSigResult<CallTarget> {
        let contract_call = |args: &[AbiValue], value: U256| -> ChainSigResult<CallTarget> {
            let to = contract
                .ok_or_else(|| ChainSigError::invalid_input("no contract address configured"))?;
            let name = self
                .function_name()
                .ok_or_else(|| ChainSigError::invalid_input("action has no contract function"))?;
            Ok(CallTarget {
                to,
                value,
                data: Bytes::from(AbiEncoder::encode_call(name, args)),
            })
        };

        match self {
            TransactionBuilder::Deposit { near_account_id, amount_wei } => {
                if amount_wei.is_zero() {
                    return Err(ChainSigError::invalid_input("deposit amount must be non-zero"));
                }
                contract_call(&[AbiValue::String(near_account_id.clone())], *amount_wei)
            }
            TransactionBuilder::Lock { amount }
            | TransactionBuilder::Unlock { amount }
            | TransactionBuilder::Withdraw { amount } => {
                contract_call(&[AbiValue::Uint(*amount)], U256::zero())
            }
            TransactionBuilder::TransferLocked { to, amount, near_account_id } => contract_call(
                &[
                    AbiValue::Address(*to),
                    AbiValue::Uint(*amount),
                    AbiValue::String(near_account_id.clone()),
                ],
                U256::zero(),
            ),
            TransactionBuilder::Transfer { to, value } => Ok(CallTarget {
                to: *to,
                value: *value,
                data: Bytes::default(),
            }),
            TransactionBuilder::Call { to, value, data } => Ok(CallTarget {
                to: *to,
                value: *value,
                data: data.clone(),
            }),
        }
    }

    /// Build the unsigned transaction for this action
    pub fn build(
        &self,
        rpc: &dyn EthRpc,
        chain_id: u64,
        sender: Address,
        contract: Option<Address>,
        overrides: &FeeOverrides,
    ) -> ChainSigResult<UnsignedTransaction> {
        let target = self.target(contract)?;
        let data = (!target.data.is_empty()).then_some(target.data);
        build(rpc, chain_id, sender, target.to, target.value, data, overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;
    use crate::api::TransactionReceipt;
    use std::cell::Cell;

    struct StubRpc {
        estimate_calls: Cell<u32>,
        fail_fees: bool,
    }

    impl StubRpc {
        fn new() -> Self {
            Self { estimate_calls: Cell::new(0), fail_fees: false }
        }
    }

    impl EthRpc for StubRpc {
        fn transaction_count(&self, _address: Address) -> ChainSigResult<u64> {
            Ok(7)
        }
        fn balance(&self, _address: Address) -> ChainSigResult<U256> {
            Ok(U256::zero())
        }
        fn gas_price(&self) -> ChainSigResult<U256> {
            if self.fail_fees {
                return Err(ChainSigError::rpc("Connection failed"));
            }
            Ok(U256::from(10_000_000_000u64))
        }
        fn max_priority_fee_per_gas(&self) -> ChainSigResult<U256> {
            Ok(U256::from(1_000_000_000u64))
        }
        fn estimate_gas(&self, _call: &CallRequest) -> ChainSigResult<u64> {
            self.estimate_calls.set(self.estimate_calls.get() + 1);
            Ok(40_000)
        }
        fn send_raw_transaction(&self, _raw: &[u8]) -> ChainSigResult<TransactionId> {
            Err(ChainSigError::relay_rejected("not supported"))
        }
        fn transaction_receipt(&self, _id: &TransactionId) -> ChainSigResult<Option<TransactionReceipt>> {
            Ok(None)
        }
    }

    #[test]
    fn test_resolves_from_network() {
        let rpc = StubRpc::new();
        let tx = build(
            &rpc,
            11155111,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            U256::from(5u64),
            None,
            &FeeOverrides::default(),
        )
        .unwrap();

        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.gas_limit, 48_000);
        assert_eq!(tx.max_priority_fee_per_gas, U256::from(1_000_000_000u64));
        assert_eq!(tx.max_fee_per_gas, U256::from(11_000_000_000u64));
    }

    #[test]
    fn test_overrides_skip_network() {
        let rpc = StubRpc { estimate_calls: Cell::new(0), fail_fees: true };
        let overrides = FeeOverrides {
            nonce: Some(0),
            max_fee_per_gas: Some(U256::from(2u64)),
            max_priority_fee_per_gas: Some(U256::from(1u64)),
            skip_estimation: true,
            ..Default::default()
        };
        let tx = build(&rpc, 1, Address::zero(), Address::zero(), U256::zero(), None, &overrides).unwrap();
        assert_eq!(tx.gas_limit, TRANSFER_GAS_LIMIT);
        assert_eq!(rpc.estimate_calls.get(), 0);
    }

    #[test]
    fn test_fee_failure_is_fee_estimation_error() {
        let rpc = StubRpc { estimate_calls: Cell::new(0), fail_fees: true };
        let err = build(
            &rpc,
            1,
            Address::zero(),
            Address::zero(),
            U256::zero(),
            None,
            &FeeOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ChainSigError::FeeEstimation(_)));
    }

    #[test]
    fn test_priority_above_max_fee_rejected() {
        let rpc = StubRpc::new();
        let overrides = FeeOverrides {
            max_fee_per_gas: Some(U256::from(1u64)),
            max_priority_fee_per_gas: Some(U256::from(2u64)),
            ..Default::default()
        };
        let err = build(&rpc, 1, Address::zero(), Address::zero(), U256::zero(), None, &overrides)
            .unwrap_err();
        assert!(matches!(err, ChainSigError::FeeEstimation(_)));
    }

    #[test]
    fn test_contract_actions() {
        let contract = Address::repeat_byte(0xcc);

        let deposit = TransactionBuilder::Deposit {
            near_account_id: "alice.testnet".into(),
            amount_wei: U256::from(10u64),
        }
        .target(Some(contract))
        .unwrap();
        assert_eq!(deposit.to, contract);
        assert_eq!(deposit.value, U256::from(10u64));
        assert_eq!(&deposit.data[..4], &AbiEncoder::selector("deposit(string)"));

        let lock = TransactionBuilder::Lock { amount: U256::from(3u64) }
            .target(Some(contract))
            .unwrap();
        assert!(lock.value.is_zero());
        assert_eq!(&lock.data[..4], &AbiEncoder::selector("lockTokens(uint256)"));
        assert_eq!(lock.data.len(), 36);

        let transfer_locked = TransactionBuilder::TransferLocked {
            to: Address::repeat_byte(0x01),
            amount: U256::one(),
            near_account_id: "bob.testnet".into(),
        }
        .target(Some(contract))
        .unwrap();
        assert_eq!(
            &transfer_locked.data[..4],
            &AbiEncoder::selector("transferLockedTokens(address,uint256,string)")
        );

        assert!(TransactionBuilder::Withdraw { amount: U256::one() }.target(None).is_err());
    }

    #[test]
    fn test_skip_estimation_call_default() {
        let rpc = StubRpc::new();
        let overrides = FeeOverrides { skip_estimation: true, ..Default::default() };
        let tx = TransactionBuilder::Unlock { amount: U256::one() }
            .build(&rpc, 1, Address::zero(), Some(Address::repeat_byte(9)), &overrides)
            .unwrap();
        assert_eq!(tx.gas_limit, DEFAULT_CALL_GAS_LIMIT);
        assert_eq!(rpc.estimate_calls.get(), 0);
    }
}
