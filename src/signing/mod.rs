//! Threshold Signing
//!
//! Everything between a signing payload and a verified signature:
//! 1. Build the `sign` request and parse the signer's response
//! 2. Talk to the signer directly or across a redirect
//! 3. Persist the continuation so a reload can finish the request
//! 4. Reconstruct and verify the signed transaction

pub mod client;
pub mod compiler;
pub mod continuation;
pub mod near;
pub mod request;

pub use client::{Reservation, SignatureOutcome, SignerClient, SignerTransport, SubmitOutcome};
pub use compiler::{normalize, reconstruct, recover_address, NormalizedSignature};
pub use continuation::{
    ContinuationChannel, ContinuationToken, FileSessionStore, MemorySessionStore, SessionState, SessionStore,
};
pub use near::{FunctionCall, NearSignerTransport, WalletOutcome, WalletSession};
pub use request::{RawSignature, SignRequest, SignatureResponse};
