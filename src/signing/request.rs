//! Signer wire types
//!
//! The MPC signer's `sign` method takes `{ request: { payload, path,
//! key_version } }` and answers with
//! `{ big_r: { affine_point }, s: { scalar }, recovery_id }`, both values
//! hex encoded.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, FieldBytes, PublicKey, Scalar};
use serde::{Deserialize, Serialize};

use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{DerivationPath, Payload};

/// Arguments of one `sign` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub payload: [u8; 32],
    pub path: String,
    pub key_version: u32,
}

impl SignRequest {
    pub fn new(payload: &Payload, path: &DerivationPath, key_version: u32) -> Self {
        Self {
            payload: payload.0,
            path: path.path.clone(),
            key_version,
        }
    }

    /// JSON arguments of the signer contract call
    pub fn to_args(&self) -> serde_json::Value {
        serde_json::json!({ "request": self })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinePointWire {
    pub affine_point: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarWire {
    pub scalar: String,
}

/// Signature exactly as the signer returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    pub big_r: AffinePointWire,
    pub s: ScalarWire,
    pub recovery_id: u8,
}

/// Parsed signer output: nonce commitment `R`, scalar `s` and the recovery
/// id the signer computed for its own `s`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub big_r: AffinePoint,
    pub s: Scalar,
    pub recovery_id: u8,
}

impl RawSignature {
    /// Parse a signer response. Malformed components mean the signer
    /// misbehaved, which is reported as `SignerUnavailable`.
    pub fn from_response(response: &SignatureResponse) -> ChainSigResult<Self> {
        let r_bytes = hex::decode(response.big_r.affine_point.trim_start_matches("0x"))
            .map_err(|e| malformed(format!("big_r is not hex: {}", e)))?;
        let big_r = PublicKey::from_sec1_bytes(&r_bytes)
            .map_err(|_| malformed("big_r is not a curve point"))?;

        let s = parse_scalar(&response.s.scalar)?;
        if bool::from(s.is_zero()) {
            return Err(malformed("s is zero"));
        }

        if response.recovery_id > 1 {
            return Err(malformed(format!("recovery id {} out of range", response.recovery_id)));
        }

        Ok(Self {
            big_r: *big_r.as_affine(),
            s,
            recovery_id: response.recovery_id,
        })
    }

    /// Wire form of this signature
    pub fn to_response(&self) -> SignatureResponse {
        SignatureResponse {
            big_r: AffinePointWire {
                affine_point: hex::encode(self.big_r.to_encoded_point(true).as_bytes()).to_uppercase(),
            },
            s: ScalarWire {
                scalar: hex::encode(self.s.to_bytes()).to_uppercase(),
            },
            recovery_id: self.recovery_id,
        }
    }
}

fn parse_scalar(raw: &str) -> ChainSigResult<Scalar> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| malformed(format!("s is not hex: {}", e)))?;
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(malformed(format!("s must be at most 32 bytes, got {}", bytes.len())));
    }

    let mut repr = FieldBytes::default();
    repr[32 - bytes.len()..].copy_from_slice(&bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr)).ok_or_else(|| malformed("s is not below the curve order"))
}

fn malformed(msg: impl Into<String>) -> ChainSigError {
    ChainSigError::signer_unavailable(format!("malformed signer response: {}", msg.into()))
}
