//! Transaction Module
//!
//! Encoding, building, relaying and tracking of fee-market transactions.

pub mod rlp;
pub mod codec;
mod builder;
mod broadcaster;
mod tracker;

pub use builder::*;
pub use broadcaster::*;
pub use tracker::*;
