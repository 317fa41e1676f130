//! Continuation state
//!
//! When the wallet redirects the user away to approve a `sign` call, the
//! process may be gone by the time the signature exists. Everything needed
//! to finish the request is captured up front in a `ContinuationToken` and
//! persisted in the session store. The receipt id of the signer call comes
//! back on the return URL.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{DerivationPath, Payload, UnsignedTransaction};

/// Query parameter carrying the receipt ids of the wallet's transactions
pub const RECEIPT_IDS_PARAM: &str = "transactionHashes";

/// Query parameter set by the wallet when the user rejected the call
pub const ERROR_CODE_PARAM: &str = "errorCode";

const ERROR_MESSAGE_PARAM: &str = "errorMessage";

/// A suspended signature request, consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub path: DerivationPath,
    /// Address bound when the request was made; never re-derived on resume
    pub expected_address: Address,
    pub tx: UnsignedTransaction,
    pub payload: Payload,
    /// Filled in once the receipt id is known
    #[serde(default)]
    pub receipt_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContinuationToken {
    pub fn new(
        path: DerivationPath,
        expected_address: Address,
        tx: UnsignedTransaction,
        payload: Payload,
    ) -> Self {
        Self {
            path,
            expected_address,
            tx,
            payload,
            receipt_id: None,
            created_at: Utc::now(),
        }
    }

    /// Same logical request, whether or not a receipt id was attached since
    pub fn is_same_request(&self, other: &ContinuationToken) -> bool {
        self.path == other.path && self.payload == other.payload && self.created_at == other.created_at
    }

    /// `None` disables expiry
    pub fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        match ChronoDuration::from_std(ttl) {
            Ok(ttl) => now - self.created_at > ttl,
            // A ttl too large for chrono never elapses
            Err(_) => false,
        }
    }
}

/// The only state shared across a reload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Path string last chosen by the user
    #[serde(default)]
    pub current_path: Option<String>,
    #[serde(default)]
    pub pending: Option<ContinuationToken>,
}

/// Session-scoped persistence
pub trait SessionStore: Send + Sync {
    fn load(&self) -> ChainSigResult<SessionState>;
    fn save(&self, state: &SessionState) -> ChainSigResult<()>;
}

/// Store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    state: Mutex<SessionState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SessionState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> ChainSigResult<SessionState> {
        let state = self
            .state
            .lock()
            .map_err(|_| ChainSigError::storage("session lock poisoned"))?;
        Ok(state.clone())
    }

    fn save(&self, state: &SessionState) -> ChainSigResult<()> {
        let mut current = self
            .state
            .lock()
            .map_err(|_| ChainSigError::storage("session lock poisoned"))?;
        *current = state.clone();
        Ok(())
    }
}

/// JSON file store; survives a process restart
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> ChainSigResult<SessionState> {
        if !self.path.exists() {
            return Ok(SessionState::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(SessionState::default());
        }
        serde_json::from_str(&contents)
            .map_err(|e| ChainSigError::storage(format!("corrupt session file {}: {}", self.path.display(), e)))
    }

    fn save(&self, state: &SessionState) -> ChainSigResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;

        // Write then rename so a crash never leaves a half-written session
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// What the wallet appended to the return URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuationChannel {
    pub receipt_ids: Vec<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ContinuationChannel {
    pub fn parse(url: &str) -> ChainSigResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| ChainSigError::invalid_input(format!("invalid return url: {}", e)))?;

        let mut channel = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                RECEIPT_IDS_PARAM => channel.receipt_ids.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string),
                ),
                ERROR_CODE_PARAM => channel.error_code = Some(value.into_owned()),
                ERROR_MESSAGE_PARAM => channel.error_message = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(channel)
    }

    /// Receipt id used to fetch the signature
    pub fn first_receipt(&self) -> Option<&str> {
        self.receipt_ids.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.receipt_ids.is_empty() && self.error_code.is_none()
    }

    /// The URL with the wallet's parameters removed, for a history replace
    pub fn clear(url: &str) -> ChainSigResult<String> {
        let mut parsed = Url::parse(url)
            .map_err(|e| ChainSigError::invalid_input(format!("invalid return url: {}", e)))?;

        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !matches!(k.as_ref(), RECEIPT_IDS_PARAM | ERROR_CODE_PARAM | ERROR_MESSAGE_PARAM))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
        Ok(parsed.to_string())
    }
}
