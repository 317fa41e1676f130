//! ABI encoder for contract calls
//!
//! Covers the argument types the caETH contract takes: static words
//! (`uint256`, `address`, `bool`) and dynamic `string`/`bytes` tails.

use ethers_core::types::{Address, U256};

use crate::utils::crypto::keccak256;

/// A single ABI argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Uint(U256),
    Address(Address),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl AbiValue {
    /// Canonical type name used in function signatures
    pub fn type_name(&self) -> &'static str {
        match self {
            AbiValue::Uint(_) => "uint256",
            AbiValue::Address(_) => "address",
            AbiValue::Bool(_) => "bool",
            AbiValue::String(_) => "string",
            AbiValue::Bytes(_) => "bytes",
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, AbiValue::String(_) | AbiValue::Bytes(_))
    }
}

/// ABI encoder
pub struct AbiEncoder;

impl AbiEncoder {
    /// Function selector: first 4 bytes of keccak256(signature)
    pub fn selector(signature: &str) -> [u8; 4] {
        let hash = keccak256(signature.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// `name(type1,type2,...)` for the given arguments
    pub fn signature(name: &str, args: &[AbiValue]) -> String {
        let types: Vec<&str> = args.iter().map(AbiValue::type_name).collect();
        format!("{}({})", name, types.join(","))
    }

    /// Selector followed by the encoded arguments
    pub fn encode_call(name: &str, args: &[AbiValue]) -> Vec<u8> {
        let mut out = Self::selector(&Self::signature(name, args)).to_vec();
        out.extend_from_slice(&Self::encode(args));
        out
    }

    /// Encode arguments as a tuple: static heads, then dynamic tails
    pub fn encode(args: &[AbiValue]) -> Vec<u8> {
        let head_size = args.len() * 32;
        let mut head = Vec::with_capacity(head_size);
        let mut tail = Vec::new();

        for arg in args {
            match arg {
                AbiValue::Uint(v) => head.extend_from_slice(&uint_word(*v)),
                AbiValue::Address(a) => {
                    let mut word = [0u8; 32];
                    word[12..].copy_from_slice(a.as_bytes());
                    head.extend_from_slice(&word);
                }
                AbiValue::Bool(b) => head.extend_from_slice(&uint_word(U256::from(*b as u8))),
                AbiValue::String(s) => {
                    head.extend_from_slice(&uint_word(U256::from(head_size + tail.len())));
                    tail.extend_from_slice(&encode_dynamic_bytes(s.as_bytes()));
                }
                AbiValue::Bytes(bytes) => {
                    head.extend_from_slice(&uint_word(U256::from(head_size + tail.len())));
                    tail.extend_from_slice(&encode_dynamic_bytes(bytes));
                }
            }
        }

        head.extend_from_slice(&tail);
        head
    }
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// Length word followed by the data right-padded to a word boundary
fn encode_dynamic_bytes(data: &[u8]) -> Vec<u8> {
    let padded_len = data.len().div_ceil(32) * 32;
    let mut out = Vec::with_capacity(32 + padded_len);
    out.extend_from_slice(&uint_word(U256::from(data.len())));
    out.extend_from_slice(data);
    out.resize(32 + padded_len, 0);
    out
}
