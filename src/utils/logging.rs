//! Structured Logging with Sensitive Data Redaction
//!
//! Log entries are built field by field and emitted as `tracing` events.
//! Values are shortened by what the key names:
//! - secret material is hidden entirely
//! - Ethereum addresses keep `0x` and four hex digits at each end
//! - NEAR account ids keep their first characters and top-level suffix, also
//!   when they lead a derivation path (`owner/path`)
//! - payloads and transaction hashes keep a short prefix and suffix
//! - NEAR receipt ids (base58) keep six leading and four trailing characters

use std::fmt;
use tracing_subscriber::EnvFilter;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Structured log entry
#[derive(Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    pub module: &'static str,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
}

impl LogEntry {
    pub fn new(level: LogLevel, module: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            module,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn debug(module: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, module, message)
    }

    pub fn info(module: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, module, message)
    }

    pub fn warn(module: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, module, message)
    }

    pub fn error(module: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, module, message)
    }

    /// Add a field to the log entry (auto-redacts sensitive data)
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        let value_str = value.to_string();
        let redacted = redact_if_sensitive(key, &value_str);
        self.fields.push((key, redacted));
        self
    }

    /// Add an Ethereum address field
    pub fn address_field(mut self, key: &'static str, address: &str) -> Self {
        self.fields.push((key, Redaction::EvmAddress.apply(address)));
        self
    }

    /// Render fields as `k=v` pairs
    pub fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Emit the entry as a tracing event
    pub fn log(self) {
        let fields = self.render_fields();
        let module = self.module;
        let message = self.message.as_str();

        match self.level {
            LogLevel::Debug => tracing::debug!(module, fields = %fields, "{}", message),
            LogLevel::Info => tracing::info!(module, fields = %fields, "{}", message),
            LogLevel::Warn => tracing::warn!(module, fields = %fields, "{}", message),
            LogLevel::Error => tracing::error!(module, fields = %fields, "{}", message),
        }
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`)
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// How a field value is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redaction {
    Hidden,
    EvmAddress,
    NearAccount,
    DerivationPath,
    Digest,
    Receipt,
    Clear,
}

impl Redaction {
    fn for_key(key: &str) -> Self {
        let key = key.to_lowercase();
        let is = |names: &[&str]| names.iter().any(|n| key == *n || key.ends_with(&format!("_{}", n)));

        if ["secret", "private_key", "signing_key", "access_key", "seed"]
            .iter()
            .any(|n| key.contains(n))
        {
            Redaction::Hidden
        } else if is(&["address", "account", "sender", "recipient"]) {
            Redaction::EvmAddress
        } else if is(&["owner", "owner_id", "account_id", "near_account"]) {
            Redaction::NearAccount
        } else if is(&["path"]) {
            Redaction::DerivationPath
        } else if is(&["payload", "hash", "tx_hash"]) {
            Redaction::Digest
        } else if is(&["receipt"]) {
            Redaction::Receipt
        } else {
            Redaction::Clear
        }
    }

    fn apply(self, value: &str) -> String {
        let value = value.trim();
        if value.is_empty() {
            return "[EMPTY]".to_string();
        }
        match self {
            Redaction::Hidden => format!("[REDACTED:{}chars]", value.len()),
            Redaction::EvmAddress => shorten(value, if value.starts_with("0x") { 6 } else { 4 }, 4),
            Redaction::NearAccount => shorten_account(value),
            Redaction::DerivationPath => match value.split_once('/') {
                Some((owner, path)) => format!("{}/{}", shorten_account(owner), path),
                None => value.to_string(),
            },
            Redaction::Digest => shorten(value, if value.starts_with("0x") { 10 } else { 8 }, 6),
            Redaction::Receipt => shorten(value, 6, 4),
            Redaction::Clear => value.to_string(),
        }
    }
}

fn redact_if_sensitive(key: &str, value: &str) -> String {
    Redaction::for_key(key).apply(value)
}

/// Keep `head` leading and `tail` trailing characters of an ASCII value
fn shorten(value: &str, head: usize, tail: usize) -> String {
    if !value.is_ascii() || value.len() <= head + tail + 3 {
        return value.to_string();
    }
    format!("{}...{}", &value[..head], &value[value.len() - tail..])
}

/// `alice.testnet` -> `ali***.testnet`; implicit (hex) accounts are shortened
fn shorten_account(account: &str) -> String {
    if account.len() == 64 && account.bytes().all(|b| b.is_ascii_hexdigit()) {
        return shorten(account, 6, 4);
    }
    let (name, top_level) = match account.rfind('.') {
        Some(dot) => (&account[..dot], &account[dot..]),
        None => (account, ""),
    };
    let visible: String = name.chars().take(3).collect();
    format!("{}***{}", visible, top_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_hidden() {
        assert_eq!(redact_if_sensitive("root_secret", "deadbeefdeadbeef"), "[REDACTED:16chars]");
        assert_eq!(redact_if_sensitive("signing_key", ""), "[EMPTY]");
    }

    #[test]
    fn test_evm_address() {
        let redacted = redact_if_sensitive("expected_address", "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        assert_eq!(redacted, "0xd8dA...6045");
    }

    #[test]
    fn test_near_accounts_and_paths() {
        assert_eq!(redact_if_sensitive("owner", "alice.testnet"), "ali***.testnet");
        assert_eq!(redact_if_sensitive("path", "alice.testnet/ethereum-1"), "ali***.testnet/ethereum-1");
        assert_eq!(redact_if_sensitive("current_path", "ethereum-1"), "ethereum-1");

        let implicit = "98793cd91a3f870fb126f66285808c7e094afcfc4eda8a970f6648cdf0dbd6de";
        assert_eq!(redact_if_sensitive("account_id", implicit), "98793c...d6de");
    }

    #[test]
    fn test_digests_and_receipts() {
        let hash = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        assert_eq!(redact_if_sensitive("tx_hash", hash), "0x12345678...abcdef");
        assert_eq!(
            redact_if_sensitive("receipt", "6zgh2u9DqHHiXzdy9ouTP7oGky2T4nugqzqt9wJZwNFm"),
            "6zgh2u...wNFm"
        );
        // Short placeholder ids are left alone
        assert_eq!(redact_if_sensitive("receipt", "receipt-1"), "receipt-1");
    }

    #[test]
    fn test_plain_fields_pass_through() {
        assert_eq!(redact_if_sensitive("total", "100"), "100");
        assert_eq!(redact_if_sensitive("to_state", "idle"), "idle");
        assert_eq!(redact_if_sensitive("deposit_yocto", "1"), "1");
    }

    #[test]
    fn test_log_entry_fields() {
        let entry = LogEntry::info("signer", "Submitting sign request")
            .field("deposit_yocto", 1)
            .field("signing_key", "secret")
            .address_field("account", "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");

        let rendered = entry.render_fields();
        assert!(rendered.contains("deposit_yocto=1"));
        assert!(rendered.contains("signing_key=[REDACTED:6chars]"));
        assert!(rendered.contains("account=0xd8dA...6045"));
    }
}
