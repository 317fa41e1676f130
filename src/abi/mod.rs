//! ABI encoding for EVM contract calls
//!
//! Function selectors and argument encoding for the calldata the
//! transaction builders attach.

pub mod encoder;

pub use encoder::*;
