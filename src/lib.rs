//! caETH Signing Core
//!
//! Controls an Ethereum address whose private key never exists locally.
//! The address is derived from the MPC signer's root key, a NEAR account
//! and a path; every transaction is signed by the threshold signer.
//!
//! # Architecture
//!
//! This crate provides:
//! - **wallet**: Child key and address derivation from the MPC root key
//! - **tx**: Fee-market transaction encoding, building, relay and receipts
//! - **abi**: Calldata for the caETH contract actions
//! - **signing**: Signer requests, continuations and signature reconstruction
//! - **pipeline**: The state machine tying the stages together
//! - **api**: Ethereum JSON-RPC client
//!
//! # Example
//!
//! ```rust,ignore
//! use caeth_core::{config::Config, types::DerivationPath, wallet};
//!
//! let config = Config::sepolia_testnet();
//! let path = DerivationPath::new("alice.testnet", "ethereum-1")?;
//! let account = wallet::derive(&config.root_key()?, &path)?;
//! println!("Address: {}", account.address_checksummed());
//! ```

pub mod abi;
pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod signing;
pub mod tx;
pub mod types;
pub mod utils;
pub mod wallet;

// Re-export key types for convenience
pub use config::Config;
pub use error::{ChainSigError, ChainSigResult, ErrorCode, ErrorReport};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineState, SignatureMode};
pub use types::{
    DerivationPath, DerivedAccount, Payload, SignedTransaction, TransactionId, UnsignedTransaction,
};
