//! Shared types for the signing core
//!
//! These are the values that flow between pipeline stages and that get
//! persisted across a continuation.

use ethers_core::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChainSigError, ChainSigResult};
use crate::utils::crypto::to_checksum_address;

/// Sepolia testnet chain id
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

/// Ethereum mainnet chain id
pub const MAINNET_CHAIN_ID: u64 = 1;

/// Path used when the session holds none
pub const DEFAULT_DERIVATION_PATH: &str = "ethereum-1";

// =============================================================================
// Derivation
// =============================================================================

/// Owner-scoped derivation path: `(owner_id, path)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationPath {
    /// NEAR account that owns the derived key (the signer's predecessor)
    pub owner_id: String,
    /// Free-form path string chosen by the owner
    pub path: String,
}

impl DerivationPath {
    pub fn new(owner_id: impl Into<String>, path: impl Into<String>) -> ChainSigResult<Self> {
        let owner_id = owner_id.into();
        let path = path.into();

        if owner_id.trim().is_empty() {
            return Err(ChainSigError::invalid_input("owner id must not be empty"));
        }
        // The tweak preimage joins owner and path with ','; a comma in the
        // owner would let two different pairs share one preimage.
        if owner_id.contains(',') {
            return Err(ChainSigError::invalid_input("owner id must not contain ','"));
        }

        Ok(Self { owner_id, path })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.path)
    }
}

/// Child key and address derived from the MPC root key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedAccount {
    pub public_key: k256::PublicKey,
    pub address: Address,
}

impl DerivedAccount {
    /// EIP-55 checksummed address
    pub fn address_checksummed(&self) -> String {
        to_checksum_address(self.address.as_bytes())
    }

    /// Uncompressed SEC1 encoding of the child key
    pub fn public_key_hex(&self) -> String {
        use k256::elliptic_curve::sec1::ToEncodedPoint;
        hex::encode(self.public_key.to_encoded_point(false).as_bytes())
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// Unsigned EIP-1559 transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub chain_id: u64,
}

/// 32-byte signing hash of an unsigned transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload(pub [u8; 32]);

impl Payload {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get payload as hex string
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

/// Unsigned transaction with a verified signature attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: UnsignedTransaction,
    pub r: U256,
    pub s: U256,
    /// y-parity for the fee-market transaction type
    pub v: u64,
}

/// Network-assigned transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub H256);

impl TransactionId {
    pub fn parse(s: &str) -> ChainSigResult<Self> {
        let bytes = hex::decode(s.trim().trim_start_matches("0x"))?;
        if bytes.len() != 32 {
            return Err(ChainSigError::invalid_input(format!(
                "transaction id must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(H256::from_slice(&bytes)))
    }

    /// Block explorer link for known chains
    pub fn explorer_url(&self, chain_id: u64) -> Option<String> {
        let base = match chain_id {
            MAINNET_CHAIN_ID => "https://etherscan.io/tx/",
            SEPOLIA_CHAIN_ID => "https://sepolia.etherscan.io/tx/",
            _ => return None,
        };
        Some(format!("{}{}", base, self))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

/// Parse a 0x-prefixed (or bare) hex address
pub fn parse_address(s: &str) -> ChainSigResult<Address> {
    let bytes = hex::decode(s.trim().trim_start_matches("0x"))?;
    if bytes.len() != 20 {
        return Err(ChainSigError::invalid_input(format!(
            "address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parse a wei amount given as decimal or 0x-hex
pub fn parse_wei(s: &str) -> ChainSigResult<U256> {
    let s = s.trim();
    if let Some(hex_part) = s.strip_prefix("0x") {
        U256::from_str_radix(hex_part, 16)
            .map_err(|e| ChainSigError::invalid_input(format!("invalid hex amount: {:?}", e)))
    } else {
        U256::from_dec_str(s)
            .map_err(|e| ChainSigError::invalid_input(format!("invalid decimal amount: {:?}", e)))
    }
}
