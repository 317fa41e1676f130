//! Signing-core configuration
//!
//! Loaded from TOML, optionally overridden from the environment, and
//! validated before any component is built from it:
//! - Endpoint URLs must parse and use HTTPS (plain HTTP only for localhost)
//! - The chain id must be non-zero
//! - The root public key must parse to a valid curve point

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{parse_address, SEPOLIA_CHAIN_ID};
use crate::wallet::RootPublicKey;

/// MPC signer root key on NEAR testnet (`v1.signer-prod.testnet`)
pub const TESTNET_ROOT_PUBLIC_KEY: &str = "secp256k1:4NfTiv3UsGahebgTaHyD9vF8KYKMBnfd6kh94mK6xv8fGBiJB8TBtFMP5WWXz6B89Ac1fbpzPwAvoyQebemHFwx3";

/// Smallest deposit the signer accepts when it is not congested
pub const MIN_DEPOSIT_YOCTO: u128 = 1;

const ENV_RPC_URL: &str = "CAETH_RPC_URL";
const ENV_CHAIN_ID: &str = "CAETH_CHAIN_ID";
const ENV_SIGNER_CONTRACT: &str = "CAETH_SIGNER_CONTRACT";
const ENV_NEAR_RPC_URL: &str = "CAETH_NEAR_RPC_URL";
const ENV_DEPOSIT_YOCTO: &str = "CAETH_DEPOSIT_YOCTO";

/// Everything the pipeline needs to know about its environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ethereum JSON-RPC endpoint
    pub rpc_url: String,
    pub chain_id: u64,
    /// NEAR account of the MPC signer contract
    pub signer_contract: String,
    /// NEAR JSON-RPC endpoint used to look up signer results
    pub near_rpc_url: String,
    pub root_public_key: String,
    pub key_version: u32,
    /// Deposit attached to each sign call, in yoctoNEAR
    #[serde(with = "u128_string")]
    pub deposit_yocto: u128,
    pub debounce_ms: u64,
    /// Age after which a pending continuation is discarded; 0 disables expiry
    pub continuation_ttl_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_timeout_secs: u64,
    /// caETH contract targeted by the action builders
    pub contract_address: Option<String>,
}

impl Config {
    /// Sepolia + NEAR testnet defaults
    pub fn sepolia_testnet() -> Self {
        Self {
            rpc_url: "https://sepolia.drpc.org".to_string(),
            chain_id: SEPOLIA_CHAIN_ID,
            signer_contract: "v1.signer-prod.testnet".to_string(),
            near_rpc_url: "https://rpc.testnet.near.org".to_string(),
            root_public_key: TESTNET_ROOT_PUBLIC_KEY.to_string(),
            key_version: 0,
            deposit_yocto: MIN_DEPOSIT_YOCTO,
            debounce_ms: 1200,
            continuation_ttl_secs: 3600,
            receipt_poll_interval_ms: 2000,
            receipt_timeout_secs: 120,
            contract_address: None,
        }
    }

    pub fn from_toml_str(s: &str) -> ChainSigResult<Self> {
        let config: Config = toml::from_str(s)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ChainSigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChainSigError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `CAETH_*` overrides from the process environment
    pub fn apply_env(self) -> ChainSigResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides<F>(mut self, lookup: F) -> ChainSigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_RPC_URL) {
            self.rpc_url = v;
        }
        if let Some(v) = lookup(ENV_CHAIN_ID) {
            self.chain_id = v
                .trim()
                .parse()
                .map_err(|_| ChainSigError::config(format!("{} is not a number: {}", ENV_CHAIN_ID, v)))?;
        }
        if let Some(v) = lookup(ENV_SIGNER_CONTRACT) {
            self.signer_contract = v;
        }
        if let Some(v) = lookup(ENV_NEAR_RPC_URL) {
            self.near_rpc_url = v;
        }
        if let Some(v) = lookup(ENV_DEPOSIT_YOCTO) {
            self.deposit_yocto = v
                .trim()
                .parse()
                .map_err(|_| ChainSigError::config(format!("{} is not a number: {}", ENV_DEPOSIT_YOCTO, v)))?;
        }
        Ok(self)
    }

    /// Check every field a component will rely on
    pub fn validate(&self) -> ChainSigResult<()> {
        validate_endpoint("rpc_url", &self.rpc_url)?;
        validate_endpoint("near_rpc_url", &self.near_rpc_url)?;

        if self.chain_id == 0 {
            return Err(ChainSigError::config("chain_id must be non-zero"));
        }
        if self.signer_contract.trim().is_empty() {
            return Err(ChainSigError::config("signer_contract must be set"));
        }
        if self.receipt_poll_interval_ms == 0 {
            return Err(ChainSigError::config("receipt_poll_interval_ms must be non-zero"));
        }

        self.root_key()
            .map_err(|e| ChainSigError::config(format!("root_public_key: {}", e)))?;

        if let Some(addr) = &self.contract_address {
            parse_address(addr)
                .map_err(|e| ChainSigError::config(format!("contract_address: {}", e)))?;
        }

        Ok(())
    }

    pub fn root_key(&self) -> ChainSigResult<RootPublicKey> {
        self.root_public_key.parse()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn continuation_ttl(&self) -> Option<Duration> {
        match self.continuation_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::sepolia_testnet()
    }
}

/// Parse an endpoint and enforce TLS outside localhost
fn validate_endpoint(field: &str, raw: &str) -> ChainSigResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ChainSigError::config(format!("{}: invalid URL {}: {}", field, raw, e)))?;

    let is_local = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_local => Ok(url),
        "http" => Err(ChainSigError::config(format!(
            "{}: HTTPS required for non-local endpoint {}",
            field, raw
        ))),
        other => Err(ChainSigError::config(format!(
            "{}: unsupported scheme {}",
            field, other
        ))),
    }
}

/// yoctoNEAR amounts exceed what TOML integers hold; accept a string or an integer
mod u128_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
            Raw::Int(n) => Ok(n as u128),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_testnet_defaults_validate() {
        let config = Config::sepolia_testnet();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_id, 11155111);
        assert_eq!(config.deposit_yocto, 1);
        assert_eq!(config.debounce(), Duration::from_millis(1200));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml_str(
            r#"
            rpc_url = "http://localhost:8545"
            chain_id = 31337
            deposit_yocto = "50000000000000000000000"
            continuation_ttl_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.deposit_yocto, 50_000_000_000_000_000_000_000);
        assert_eq!(config.signer_contract, "v1.signer-prod.testnet");
        assert!(config.continuation_ttl().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_plain_http_rejected_for_remote() {
        let mut config = Config::sepolia_testnet();
        config.rpc_url = "http://rpc.example.com".to_string();
        assert!(matches!(config.validate(), Err(ChainSigError::Config(_))));
    }

    #[test]
    fn test_bad_root_key_rejected() {
        let mut config = Config::sepolia_testnet();
        config.root_public_key = "secp256k1:notbase58!".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("CAETH_CHAIN_ID", "1"),
            ("CAETH_DEPOSIT_YOCTO", "250000000000000000000000"),
            ("CAETH_SIGNER_CONTRACT", "v1.signer"),
        ]
        .into_iter()
        .collect();

        let config = Config::sepolia_testnet()
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.deposit_yocto, 250_000_000_000_000_000_000_000);
        assert_eq!(config.signer_contract, "v1.signer");

        let bad = Config::sepolia_testnet().apply_overrides(|k| {
            (k == "CAETH_CHAIN_ID").then(|| "sepolia".to_string())
        });
        assert!(bad.is_err());
    }
}
