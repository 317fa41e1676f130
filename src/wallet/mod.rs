//! Wallet Module
//!
//! Derivation of MPC-controlled Ethereum accounts and their cache.

mod cache;
mod derivation;

pub use cache::AccountCache;
pub use derivation::*;
