//! Transaction Codec
//!
//! Canonical serialization of fee-market (type 2) transactions:
//!
//! ```text
//! unsigned: 0x02 || rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas,
//!                        gasLimit, to, value, data, accessList])
//! signed:   0x02 || rlp([...unsigned fields, yParity, r, s])
//! ```
//!
//! The access list is always empty. The signing payload is the Keccak-256 of
//! the unsigned encoding.

use ethers_core::types::{Address, Bytes, H256, U256};

use super::rlp;
use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{Payload, SignedTransaction, TransactionId, UnsignedTransaction};
use crate::utils::crypto::keccak256;

/// EIP-2718 type byte of fee-market transactions
pub const EIP1559_TX_TYPE: u8 = 0x02;

const UNSIGNED_FIELDS: usize = 9;
const SIGNED_FIELDS: usize = 12;

fn field_items(tx: &UnsignedTransaction) -> Vec<Vec<u8>> {
    vec![
        rlp::encode_u64(tx.chain_id),
        rlp::encode_u64(tx.nonce),
        rlp::encode_u256(tx.max_priority_fee_per_gas),
        rlp::encode_u256(tx.max_fee_per_gas),
        rlp::encode_u64(tx.gas_limit),
        rlp::encode_bytes(tx.to.as_bytes()),
        rlp::encode_u256(tx.value),
        rlp::encode_bytes(&tx.data),
        rlp::encode_list(&[]),
    ]
}

fn typed(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(EIP1559_TX_TYPE);
    out.extend_from_slice(&payload);
    out
}

/// Type-prefixed unsigned encoding
pub fn encode_unsigned(tx: &UnsignedTransaction) -> Vec<u8> {
    typed(rlp::encode_list(&field_items(tx)))
}

/// Type-prefixed signed encoding, ready for `eth_sendRawTransaction`
pub fn encode_signed(signed: &SignedTransaction) -> Vec<u8> {
    let mut items = field_items(&signed.tx);
    items.push(rlp::encode_u64(signed.v));
    items.push(rlp::encode_u256(signed.r));
    items.push(rlp::encode_u256(signed.s));
    typed(rlp::encode_list(&items))
}

/// Signing payload of an unsigned transaction
pub fn hash(tx: &UnsignedTransaction) -> Payload {
    Payload(keccak256(&encode_unsigned(tx)))
}

/// Transaction id the network will assign to `signed`
pub fn transaction_id(signed: &SignedTransaction) -> TransactionId {
    TransactionId(H256::from(keccak256(&encode_signed(signed))))
}

/// 0x-prefixed hex of the signed encoding
pub fn raw_hex(signed: &SignedTransaction) -> String {
    format!("0x{}", hex::encode(encode_signed(signed)))
}

pub fn decode_unsigned(bytes: &[u8]) -> ChainSigResult<UnsignedTransaction> {
    let fields = decode_fields(bytes, UNSIGNED_FIELDS)?;
    parse_unsigned(&fields)
}

pub fn decode_signed(bytes: &[u8]) -> ChainSigResult<SignedTransaction> {
    let fields = decode_fields(bytes, SIGNED_FIELDS)?;
    let tx = parse_unsigned(&fields[..UNSIGNED_FIELDS])?;

    let v = fields[9].as_u64()?;
    if v > 1 {
        return Err(ChainSigError::codec(format!("y-parity must be 0 or 1, got {}", v)));
    }

    Ok(SignedTransaction {
        tx,
        v,
        r: fields[10].as_u256()?,
        s: fields[11].as_u256()?,
    })
}

/// Decode a signed transaction from 0x-prefixed or bare hex
pub fn decode_signed_hex(raw: &str) -> ChainSigResult<SignedTransaction> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x"))?;
    decode_signed(&bytes)
}

fn decode_fields(bytes: &[u8], expected: usize) -> ChainSigResult<Vec<rlp::Item<'_>>> {
    match bytes.first() {
        Some(&EIP1559_TX_TYPE) => {}
        Some(other) => {
            return Err(ChainSigError::codec(format!(
                "unsupported transaction type 0x{:02x}",
                other
            )))
        }
        None => return Err(ChainSigError::codec("empty transaction encoding")),
    }

    let item = rlp::decode(&bytes[1..])?;
    let fields = item.as_list()?.to_vec();
    if fields.len() != expected {
        return Err(ChainSigError::codec(format!(
            "expected {} fields, found {}",
            expected,
            fields.len()
        )));
    }
    Ok(fields)
}

fn parse_unsigned(fields: &[rlp::Item<'_>]) -> ChainSigResult<UnsignedTransaction> {
    let to = fields[5].as_bytes()?;
    if to.len() != 20 {
        return Err(ChainSigError::codec(format!(
            "recipient must be 20 bytes, got {}",
            to.len()
        )));
    }
    if !fields[8].as_list()?.is_empty() {
        return Err(ChainSigError::codec("non-empty access lists are not supported"));
    }

    Ok(UnsignedTransaction {
        chain_id: fields[0].as_u64()?,
        nonce: fields[1].as_u64()?,
        max_priority_fee_per_gas: fields[2].as_u256()?,
        max_fee_per_gas: fields[3].as_u256()?,
        gas_limit: fields[4].as_u64()?,
        to: Address::from_slice(to),
        value: fields[6].as_u256()?,
        data: Bytes::from(fields[7].as_bytes()?.to_vec()),
    })
}

/// Most the sender can spend: `maxFeePerGas · gasLimit + value`
pub fn max_cost(tx: &UnsignedTransaction) -> U256 {
    tx.max_fee_per_gas
        .saturating_mul(U256::from(tx.gas_limit))
        .saturating_add(tx.value)
}
