//! Key Derivation
//!
//! Derives the Ethereum account controlled through the MPC signer for an
//! `(owner_id, path)` pair. Only public material is involved: the child key
//! is `root + t·G` where `t` is a domain-separated SHA3-256 of the owner and
//! path reduced into the secp256k1 scalar field.

use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{ProjectivePoint, PublicKey, Scalar};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;

use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{DerivationPath, DerivedAccount};
use crate::utils::crypto::address_from_xy;
use ethers_core::types::Address;

/// Domain separator the signer prepends to every tweak preimage
pub const TWEAK_DERIVATION_PREFIX: &str = "near-mpc-recovery v0.1.0 epsilon derivation:";

/// Prefix of NEAR-formatted secp256k1 keys
const NEAR_KEY_PREFIX: &str = "secp256k1:";

/// Long-lived public key of the MPC signer
///
/// Accepts the NEAR form (`secp256k1:` + base58 of the 64-byte x‖y) or a
/// hex SEC1 encoding, compressed or not. The identity cannot be represented.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RootPublicKey(PublicKey);

impl RootPublicKey {
    pub fn from_public_key(key: PublicKey) -> Self {
        Self(key)
    }

    pub fn as_public_key(&self) -> &PublicKey {
        &self.0
    }

    fn from_sec1(bytes: &[u8]) -> ChainSigResult<Self> {
        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| ChainSigError::derivation("root key is not a valid secp256k1 point"))
    }

    /// NEAR-formatted encoding of this key
    pub fn to_near_string(&self) -> String {
        let point = self.0.to_encoded_point(false);
        format!("{}{}", NEAR_KEY_PREFIX, bs58::encode(&point.as_bytes()[1..]).into_string())
    }
}

impl FromStr for RootPublicKey {
    type Err = ChainSigError;

    fn from_str(s: &str) -> ChainSigResult<Self> {
        let s = s.trim();

        if let Some(encoded) = s.strip_prefix(NEAR_KEY_PREFIX) {
            let raw = bs58::decode(encoded)
                .into_vec()
                .map_err(|e| ChainSigError::derivation(format!("invalid base58 root key: {}", e)))?;
            if raw.len() != 64 {
                return Err(ChainSigError::derivation(format!(
                    "root key must be 64 bytes, got {}",
                    raw.len()
                )));
            }
            let mut sec1 = Vec::with_capacity(65);
            sec1.push(0x04);
            sec1.extend_from_slice(&raw);
            return Self::from_sec1(&sec1);
        }

        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| ChainSigError::derivation(format!("invalid hex root key: {}", e)))?;
        Self::from_sec1(&raw)
    }
}

impl fmt::Debug for RootPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootPublicKey({})", self.to_near_string())
    }
}

/// Tweak scalar for an owner and path
pub fn derive_tweak(owner_id: &str, path: &str) -> Scalar {
    let mut hasher = Sha3_256::new();
    hasher.update(TWEAK_DERIVATION_PREFIX.as_bytes());
    hasher.update(owner_id.as_bytes());
    hasher.update(b",");
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();

    <Scalar as Reduce<k256::U256>>::reduce(k256::U256::from_be_slice(&digest))
}

/// Child public key: `root + t·G`
pub fn derive_public_key(root: &RootPublicKey, path: &DerivationPath) -> ChainSigResult<PublicKey> {
    let tweak = derive_tweak(&path.owner_id, &path.path);
    let child = ProjectivePoint::GENERATOR * tweak + root.0.to_projective();

    PublicKey::from_affine(child.to_affine())
        .map_err(|_| ChainSigError::derivation(format!("derived key for {} is the identity", path)))
}

/// Ethereum address of a public key
pub fn public_key_to_address(key: &PublicKey) -> ChainSigResult<Address> {
    let point = key.to_encoded_point(false);
    let xy: &[u8; 64] = point.as_bytes()[1..]
        .try_into()
        .map_err(|_| ChainSigError::derivation("unexpected public key encoding"))?;
    Ok(Address::from(address_from_xy(xy)))
}

/// Derive the account for `path` under `root`
pub fn derive(root: &RootPublicKey, path: &DerivationPath) -> ChainSigResult<DerivedAccount> {
    let public_key = derive_public_key(root, path)?;
    let address = public_key_to_address(&public_key)?;
    Ok(DerivedAccount { public_key, address })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TESTNET_ROOT_PUBLIC_KEY;
    use k256::SecretKey;

    fn root_from_secret(secret: &SecretKey) -> RootPublicKey {
        RootPublicKey::from_public_key(secret.public_key())
    }

    fn secret(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_parse_testnet_root_key() {
        let root: RootPublicKey = TESTNET_ROOT_PUBLIC_KEY.parse().unwrap();
        assert_eq!(root.to_near_string(), TESTNET_ROOT_PUBLIC_KEY);
    }

    #[test]
    fn test_parse_hex_forms_agree() {
        let key = secret(7).public_key();
        let compressed = hex::encode(key.to_encoded_point(true).as_bytes());
        let uncompressed = format!("0x{}", hex::encode(key.to_encoded_point(false).as_bytes()));

        let a: RootPublicKey = compressed.parse().unwrap();
        let b: RootPublicKey = uncompressed.parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_off_curve_root_rejected() {
        let mut bytes = [0u8; 64];
        bytes[31] = 1;
        bytes[63] = 1;
        let encoded = format!("secp256k1:{}", bs58::encode(bytes).into_string());
        assert!(matches!(
            encoded.parse::<RootPublicKey>(),
            Err(ChainSigError::Derivation(_))
        ));

        // SEC1 identity encoding
        assert!("00".parse::<RootPublicKey>().is_err());
        assert!("secp256k1:abc".parse::<RootPublicKey>().is_err());
    }

    #[test]
    fn test_derive_is_deterministic() {
        let root: RootPublicKey = TESTNET_ROOT_PUBLIC_KEY.parse().unwrap();
        let path = DerivationPath::new("alice.testnet", "ethereum-1").unwrap();

        let a = derive(&root, &path).unwrap();
        let b = derive(&root, &path).unwrap();
        assert_eq!(a, b);
        assert!(a.address_checksummed().starts_with("0x"));
    }

    #[test]
    fn test_derived_key_matches_tweaked_secret() {
        let root_secret = secret(42);
        let root = root_from_secret(&root_secret);
        let path = DerivationPath::new("alice.testnet", "ethereum-1").unwrap();

        let tweak = derive_tweak(&path.owner_id, &path.path);
        let child_scalar = *root_secret.to_nonzero_scalar() + tweak;
        let child_public = (ProjectivePoint::GENERATOR * child_scalar).to_affine();

        let derived = derive(&root, &path).unwrap();
        assert_eq!(derived.public_key, PublicKey::from_affine(child_public).unwrap());
    }

    #[test]
    fn test_owner_and_path_are_separated() {
        let root = root_from_secret(&secret(3));
        let a = derive(&root, &DerivationPath::new("alice.testnet", "ethereum-1").unwrap()).unwrap();
        let b = derive(&root, &DerivationPath::new("alice.testnet", "ethereum-2").unwrap()).unwrap();
        let c = derive(&root, &DerivationPath::new("bob.testnet", "ethereum-1").unwrap()).unwrap();

        assert_ne!(a.address, b.address);
        assert_ne!(a.address, c.address);
        assert_ne!(b.address, c.address);
    }
}
