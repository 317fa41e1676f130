//! Signature Reconstruction
//!
//! Turns the signer's `(R, s, recovery_id)` into a broadcastable fee-market
//! transaction:
//! - `r` is the x-coordinate of `R` reduced mod n
//! - `s` is normalised to the lower half of the order, flipping the
//!   recovery id when it is negated
//! - the signature must recover to the expected sender; the complementary
//!   recovery id is tried once before giving up
//!
//! For type-2 transactions `v` is the y-parity itself; the chain id is
//! already committed inside the signed payload.

use ethers_core::types::{Address, U256};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::point::AffineCoordinates;
use k256::elliptic_curve::scalar::IsHigh;
use k256::Scalar;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};

use super::request::RawSignature;
use crate::error::{ChainSigError, ChainSigResult};
use crate::tx::codec;
use crate::types::{Payload, SignedTransaction, UnsignedTransaction};
use crate::utils::crypto::{address_from_xy, to_checksum_address};
use crate::utils::logging::LogEntry;

/// Canonical `(r, s, recovery_id)` before verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedSignature {
    pub r: Scalar,
    pub s: Scalar,
    pub recovery_id: u8,
}

/// Apply `r = x(R) mod n` and low-s normalisation
pub fn normalize(raw: &RawSignature) -> ChainSigResult<NormalizedSignature> {
    if raw.recovery_id > 1 {
        return Err(ChainSigError::signer_unavailable(format!(
            "malformed signer response: recovery id {} out of range",
            raw.recovery_id
        )));
    }

    let r = <Scalar as Reduce<k256::U256>>::reduce_bytes(&raw.big_r.x());
    if bool::from(r.is_zero()) {
        return Err(ChainSigError::signer_unavailable("malformed signer response: r is zero"));
    }

    let (s, recovery_id) = if bool::from(raw.s.is_high()) {
        (-raw.s, raw.recovery_id ^ 1)
    } else {
        (raw.s, raw.recovery_id)
    };

    Ok(NormalizedSignature { r, s, recovery_id })
}

/// Address recovered from `(r, s, recovery_id)` over `payload`
pub fn recover_address(
    payload: &Payload,
    r: &Scalar,
    s: &Scalar,
    recovery_id: u8,
) -> ChainSigResult<Address> {
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&r.to_bytes());
    compact[32..].copy_from_slice(&s.to_bytes());

    let rec_id = RecoveryId::from_i32(recovery_id as i32)
        .map_err(|e| ChainSigError::codec(format!("Invalid recovery ID: {}", e)))?;
    let sig = RecoverableSignature::from_compact(&compact, rec_id)
        .map_err(|e| ChainSigError::codec(format!("Invalid signature: {}", e)))?;

    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(payload.0);
    let public_key = secp
        .recover_ecdsa(&msg, &sig)
        .map_err(|e| ChainSigError::codec(format!("Recovery failed: {}", e)))?;

    let uncompressed = public_key.serialize_uncompressed();
    let mut xy = [0u8; 64];
    xy.copy_from_slice(&uncompressed[1..]);
    Ok(Address::from(address_from_xy(&xy)))
}

/// Attach a verified signature to `tx`
///
/// Pure: the same inputs always produce the same signed transaction.
pub fn reconstruct(
    raw: &RawSignature,
    tx: &UnsignedTransaction,
    expected_address: Address,
) -> ChainSigResult<SignedTransaction> {
    let normalized = normalize(raw)?;
    let payload = codec::hash(tx);

    let candidates = [normalized.recovery_id, normalized.recovery_id ^ 1];
    for (attempt, recovery_id) in candidates.into_iter().enumerate() {
        // A failed recovery for one parity says nothing about the other
        let recovered = match recover_address(&payload, &normalized.r, &normalized.s, recovery_id) {
            Ok(address) => address,
            Err(_) => continue,
        };
        if recovered != expected_address {
            continue;
        }

        if attempt > 0 {
            LogEntry::warn("reconstructor", "Signer recovery id did not match; used complement")
                .field("recovery_id", raw.recovery_id)
                .log();
        }

        return Ok(SignedTransaction {
            tx: tx.clone(),
            r: scalar_to_u256(&normalized.r),
            s: scalar_to_u256(&normalized.s),
            v: recovery_id as u64,
        });
    }

    let expected = to_checksum_address(expected_address.as_bytes());
    LogEntry::error("reconstructor", "Signature does not recover to the derived address")
        .address_field("expected_address", &expected)
        .field("payload", payload.to_hex())
        .log();
    Err(ChainSigError::SignatureMismatch { expected })
}

fn scalar_to_u256(scalar: &Scalar) -> U256 {
    U256::from_big_endian(&scalar.to_bytes())
}
