//! Signing pipeline
//!
//! Drives one signing attempt through
//! `Idle → Deriving → BuildingPayload → AwaitingSignature → Reconstructing →
//! Relaying → Relayed`, with `Error` reachable from every step.
//!
//! The session store holds the only state that survives a reload: the
//! current path string and, while a redirect is outstanding, the
//! continuation token. The token is written before the signer is contacted
//! and removed once it has been consumed or can never complete. The store
//! has a single continuation slot; a live token blocks new requests until it
//! is consumed, expires or is abandoned.

use chrono::Utc;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use crate::api::EthRpc;
use crate::config::Config;
use crate::error::{ChainSigError, ChainSigResult, ErrorCode};
use crate::signing::{
    reconstruct, ContinuationChannel, ContinuationToken, SessionState, SessionStore, SignatureOutcome,
    SignerClient, SignerTransport,
};
use crate::tx::{self, codec, FeeOverrides, ReceiptStatus, TransactionBuilder};
use crate::types::{
    parse_address, DerivationPath, DerivedAccount, SignedTransaction, TransactionId, DEFAULT_DERIVATION_PATH,
};
use crate::utils::debounce::Debouncer;
use crate::utils::logging::LogEntry;
use crate::wallet::AccountCache;

/// Transitions kept for display
const HISTORY_LIMIT: usize = 64;

/// How the signer is being waited on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMode {
    /// Submitted and awaited in-process
    Direct,
    /// Waiting on a result that arrives on the return URL
    Continuation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Deriving,
    BuildingPayload,
    AwaitingSignature { mode: SignatureMode },
    Reconstructing,
    Relaying,
    Relayed { id: TransactionId },
    Error {
        code: ErrorCode,
        /// Signed transaction kept for manual resubmission
        retained: Option<SignedTransaction>,
    },
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Deriving => write!(f, "deriving"),
            PipelineState::BuildingPayload => write!(f, "building_payload"),
            PipelineState::AwaitingSignature { mode: SignatureMode::Direct } => {
                write!(f, "awaiting_signature(direct)")
            }
            PipelineState::AwaitingSignature { mode: SignatureMode::Continuation } => {
                write!(f, "awaiting_signature(continuation)")
            }
            PipelineState::Reconstructing => write!(f, "reconstructing"),
            PipelineState::Relaying => write!(f, "relaying"),
            PipelineState::Relayed { id } => write!(f, "relayed({})", id),
            PipelineState::Error { code, .. } => write!(f, "error({:?})", code),
        }
    }
}

/// What a pipeline call ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Verified and ready to relay
    Signed(SignedTransaction),
    Relayed { signed: SignedTransaction, id: TransactionId },
    /// Control left the process; finish with `resume`
    Suspended(ContinuationToken),
    /// The path changed while the signer was working; the result was dropped
    Discarded,
}

/// Orchestrates derivation, building, signing and relay for one owner
pub struct Pipeline<R, T, S> {
    config: Config,
    owner_id: String,
    contract: Option<Address>,
    rpc: R,
    signer: SignerClient<T>,
    store: S,
    accounts: AccountCache,
    current_path: RwLock<String>,
    path_edits: Mutex<Debouncer<String>>,
    /// Serializes load-modify-save cycles on the session store
    session_lock: Mutex<()>,
    state: Mutex<PipelineState>,
    history: Mutex<Vec<PipelineState>>,
    retained: Mutex<Option<SignedTransaction>>,
}

impl<R, T, S> Pipeline<R, T, S>
where
    R: EthRpc,
    T: SignerTransport,
    S: SessionStore,
{
    /// Build a pipeline for `owner_id`, restoring the path from the session
    pub fn new(
        config: Config,
        owner_id: impl Into<String>,
        rpc: R,
        signer: SignerClient<T>,
        store: S,
    ) -> ChainSigResult<Self> {
        let owner_id = owner_id.into();
        let root = config.root_key()?;
        let contract = config
            .contract_address
            .as_deref()
            .map(parse_address)
            .transpose()?;

        let session = store.load()?;
        let path = session
            .current_path
            .unwrap_or_else(|| DEFAULT_DERIVATION_PATH.to_string());
        DerivationPath::new(owner_id.as_str(), path.as_str())?;

        let debouncer = Debouncer::new(config.debounce()).with_initial(path.clone());

        Ok(Self {
            config,
            owner_id,
            contract,
            rpc,
            signer,
            store,
            accounts: AccountCache::new(root),
            current_path: RwLock::new(path),
            path_edits: Mutex::new(debouncer),
            session_lock: Mutex::new(()),
            state: Mutex::new(PipelineState::Idle),
            history: Mutex::new(vec![PipelineState::Idle]),
            retained: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub fn signer(&self) -> &SignerClient<T> {
        &self.signer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn state(&self) -> PipelineState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(PipelineState::Idle)
    }

    /// Transitions so far, oldest first
    pub fn history(&self) -> Vec<PipelineState> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn current_path(&self) -> String {
        self.current_path
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|_| DEFAULT_DERIVATION_PATH.to_string())
    }

    /// Signed transaction kept after a relay rejection
    pub fn retained_transaction(&self) -> Option<SignedTransaction> {
        self.retained.lock().ok().and_then(|r| r.clone())
    }

    /// Account for the current path
    pub fn current_account(&self) -> ChainSigResult<DerivedAccount> {
        let path = DerivationPath::new(self.owner_id.as_str(), self.current_path())?;
        self.accounts.get_or_derive(&path)
    }

    // =========================================================================
    // Path selection
    // =========================================================================

    /// Switch to `path`, persist it and derive its account. Unsettled path
    /// edits are dropped.
    pub fn set_path(&self, path: &str) -> ChainSigResult<DerivedAccount> {
        let derivation = DerivationPath::new(self.owner_id.as_str(), path)?;

        self.transition(PipelineState::Deriving);
        let account = match self.accounts.get_or_derive(&derivation) {
            Ok(account) => account,
            Err(e) => return Err(self.fail(e, None)),
        };

        self.restore_path(path)?;
        self.update_session(|session| {
            session.current_path = Some(path.to_string());
            Ok(())
        })?;

        LogEntry::info("pipeline", "Derivation path selected")
            .field("path", &derivation)
            .address_field("address", &account.address_checksummed())
            .log();
        self.transition(PipelineState::Idle);
        Ok(account)
    }

    /// Record a path edit; it takes effect once edits settle
    pub fn push_path_edit(&self, path: &str, now: Instant) {
        if let Ok(mut edits) = self.path_edits.lock() {
            edits.push(path.to_string(), now);
        }
    }

    /// Apply the settled path edit, if the debounce window has passed
    pub fn settle_path_edit(&self, now: Instant) -> ChainSigResult<Option<DerivedAccount>> {
        let settled = self
            .path_edits
            .lock()
            .map_err(|_| ChainSigError::storage("path edit lock poisoned"))?
            .poll(now);
        match settled {
            Some(path) => self.set_path(&path).map(Some),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// Build `action` for the current account and ask the signer for a
    /// signature.
    ///
    /// Refused with `RequestInFlight` while another request holds the same
    /// account and path, or while a live continuation is stored.
    pub fn sign(&self, action: &TransactionBuilder, overrides: &FeeOverrides) -> ChainSigResult<PipelineOutcome> {
        let path = DerivationPath::new(self.owner_id.as_str(), self.current_path())?;
        let account = self.accounts.get_or_derive(&path)?;

        // Claimed before any state is touched so a refused call leaves the
        // running request alone
        let reservation = self.signer.reserve(&path, account.address)?;
        if let Some(existing) = self.live_continuation()? {
            return Err(ChainSigError::RequestInFlight(existing.path.to_string()));
        }

        self.transition(PipelineState::Deriving);
        LogEntry::debug("pipeline", "Signing for account")
            .field("path", &path)
            .address_field("account", &account.address_checksummed())
            .log();

        self.transition(PipelineState::BuildingPayload);
        let tx = action
            .build(&self.rpc, self.config.chain_id, account.address, self.contract, overrides)
            .map_err(|e| self.fail(e, None))?;
        let payload = codec::hash(&tx);

        // Persist before contacting the signer so a redirect can resume
        let token = ContinuationToken::new(path.clone(), account.address, tx, payload);
        self.claim_continuation(&token).map_err(|e| self.fail(e, None))?;

        self.transition(PipelineState::AwaitingSignature { mode: SignatureMode::Direct });
        let raw = match self.signer.request_reserved(&reservation, &payload) {
            Ok(SignatureOutcome::Signed(raw)) => raw,
            Ok(SignatureOutcome::Suspended) => {
                self.transition(PipelineState::AwaitingSignature { mode: SignatureMode::Continuation });
                return Ok(PipelineOutcome::Suspended(token));
            }
            Err(e) => {
                self.release_continuation(&token);
                return Err(self.fail(e, None));
            }
        };
        self.release_continuation(&token);
        drop(reservation);

        if self.current_path() != path.path {
            LogEntry::warn("pipeline", "Path changed while signing; dropping result")
                .field("path", &path)
                .field("current_path", self.current_path())
                .log();
            self.transition(PipelineState::Idle);
            return Ok(PipelineOutcome::Discarded);
        }

        self.transition(PipelineState::Reconstructing);
        let signed = reconstruct(&raw, &token.tx, token.expected_address).map_err(|e| self.fail(e, None))?;

        LogEntry::info("pipeline", "Transaction signed")
            .field("path", &path)
            .field("tx_hash", codec::transaction_id(&signed))
            .log();
        self.transition(PipelineState::Idle);
        Ok(PipelineOutcome::Signed(signed))
    }

    /// Broadcast a signed transaction; on rejection it is retained
    pub fn relay(&self, signed: &SignedTransaction) -> ChainSigResult<TransactionId> {
        self.transition(PipelineState::Relaying);
        match tx::submit(&self.rpc, signed) {
            Ok(id) => {
                if let Ok(mut retained) = self.retained.lock() {
                    if retained.as_ref() == Some(signed) {
                        *retained = None;
                    }
                }
                if let Some(url) = id.explorer_url(self.config.chain_id) {
                    LogEntry::info("pipeline", "Explorer link").field("url", url).log();
                }
                self.transition(PipelineState::Relayed { id });
                Ok(id)
            }
            Err(e) => {
                if let Ok(mut retained) = self.retained.lock() {
                    *retained = Some(signed.clone());
                }
                Err(self.fail(e, Some(signed.clone())))
            }
        }
    }

    /// `sign` followed by `relay` when the signature is available in-process
    pub fn sign_and_relay(
        &self,
        action: &TransactionBuilder,
        overrides: &FeeOverrides,
    ) -> ChainSigResult<PipelineOutcome> {
        match self.sign(action, overrides)? {
            PipelineOutcome::Signed(signed) => {
                let id = self.relay(&signed)?;
                Ok(PipelineOutcome::Relayed { signed, id })
            }
            other => Ok(other),
        }
    }

    /// Poll for inclusion of a relayed transaction
    pub fn await_receipt(&self, id: &TransactionId) -> ChainSigResult<ReceiptStatus> {
        tx::await_receipt(
            &self.rpc,
            id,
            self.config.receipt_poll_interval(),
            self.config.receipt_timeout(),
        )
    }

    // =========================================================================
    // Continuation
    // =========================================================================

    /// Finish a suspended request from the URL the wallet returned to.
    ///
    /// Returns `Ok(None)` when nothing is pending, so a second consume of
    /// the same URL never re-requests a signature.
    pub fn resume(&self, return_url: &str) -> ChainSigResult<Option<PipelineOutcome>> {
        let channel = ContinuationChannel::parse(return_url)?;
        let Some(mut token) = self.store.load()?.pending else {
            if !channel.is_empty() {
                LogEntry::debug("pipeline", "Return URL has no pending continuation").log();
            }
            return Ok(None);
        };

        if let Some(code) = &channel.error_code {
            self.release_continuation(&token);
            let reason = channel.error_message.as_deref().unwrap_or(code.as_str());
            return Err(self.fail(
                ChainSigError::signer_rejected(format!("wallet did not send the sign call: {}", reason)),
                None,
            ));
        }

        if token.path.owner_id != self.owner_id {
            self.release_continuation(&token);
            return Err(self.fail(
                ChainSigError::continuation_expired(format!(
                    "continuation belongs to {}, not {}",
                    token.path.owner_id, self.owner_id
                )),
                None,
            ));
        }

        if token.is_expired(self.config.continuation_ttl(), Utc::now()) {
            self.release_continuation(&token);
            return Err(self.fail(
                ChainSigError::continuation_expired(format!("continuation from {} expired", token.created_at)),
                None,
            ));
        }

        let receipt_id = match channel.first_receipt().map(str::to_string).or_else(|| token.receipt_id.clone()) {
            Some(id) => id,
            None => return Ok(None),
        };

        // Restore the path the request was made for
        self.restore_path(&token.path.path)?;

        token.receipt_id = Some(receipt_id.clone());
        self.update_session(|session| {
            session.current_path = Some(token.path.path.clone());
            session.pending = Some(token.clone());
            Ok(())
        })?;

        self.transition(PipelineState::AwaitingSignature { mode: SignatureMode::Continuation });
        LogEntry::info("pipeline", "Resuming signature request")
            .field("path", &token.path)
            .field("receipt", &receipt_id)
            .log();

        let raw = match self.signer.poll_signature(&receipt_id) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return Err(self.fail(
                    ChainSigError::signer_unavailable(format!(
                        "signature for receipt {} is not available yet",
                        receipt_id
                    )),
                    None,
                ))
            }
            Err(e) => {
                if !e.is_retryable() || matches!(e, ChainSigError::InsufficientDeposit { .. }) {
                    self.release_continuation(&token);
                }
                return Err(self.fail(e, None));
            }
        };

        self.transition(PipelineState::Reconstructing);
        if codec::hash(&token.tx) != token.payload {
            self.release_continuation(&token);
            return Err(self.fail(
                ChainSigError::codec("persisted transaction does not match its payload"),
                None,
            ));
        }

        let result = reconstruct(&raw, &token.tx, token.expected_address);
        self.release_continuation(&token);
        let signed = result.map_err(|e| self.fail(e, None))?;

        LogEntry::info("pipeline", "Continuation consumed")
            .field("path", &token.path)
            .field("tx_hash", codec::transaction_id(&signed))
            .log();
        self.transition(PipelineState::Idle);
        Ok(Some(PipelineOutcome::Signed(signed)))
    }

    /// Pending continuation, if any
    pub fn pending(&self) -> ChainSigResult<Option<ContinuationToken>> {
        Ok(self.store.load()?.pending)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Drop the stored continuation without finishing it. The signer may
    /// still produce a signature for it; that signature is never used.
    pub fn abandon_pending(&self) -> ChainSigResult<Option<ContinuationToken>> {
        let mut abandoned = None;
        self.update_session(|session| {
            abandoned = session.pending.take();
            Ok(())
        })?;
        if let Some(token) = &abandoned {
            LogEntry::warn("pipeline", "Continuation abandoned")
                .field("path", &token.path)
                .field("payload", token.payload.to_hex())
                .log();
        }
        Ok(abandoned)
    }

    fn live_continuation(&self) -> ChainSigResult<Option<ContinuationToken>> {
        let ttl = self.config.continuation_ttl();
        Ok(self
            .store
            .load()?
            .pending
            .filter(|token| !token.is_expired(ttl, Utc::now())))
    }

    /// Store `token` unless a live continuation already holds the slot
    fn claim_continuation(&self, token: &ContinuationToken) -> ChainSigResult<()> {
        let ttl = self.config.continuation_ttl();
        self.update_session(|session| {
            if let Some(existing) = &session.pending {
                if !existing.is_expired(ttl, Utc::now()) {
                    return Err(ChainSigError::RequestInFlight(existing.path.to_string()));
                }
                LogEntry::warn("pipeline", "Replacing expired continuation")
                    .field("path", &existing.path)
                    .field("receipt", existing.receipt_id.as_deref().unwrap_or("none"))
                    .log();
            }
            session.pending = Some(token.clone());
            Ok(())
        })
    }

    /// Remove `token` if it is still the stored one
    fn release_continuation(&self, token: &ContinuationToken) {
        let result = self.update_session(|session| {
            if session.pending.as_ref().is_some_and(|stored| stored.is_same_request(token)) {
                session.pending = None;
            }
            Ok(())
        });
        if let Err(e) = result {
            LogEntry::error("pipeline", "Failed to release continuation")
                .field("error", &e)
                .log();
        }
    }

    fn update_session<F>(&self, apply: F) -> ChainSigResult<()>
    where
        F: FnOnce(&mut SessionState) -> ChainSigResult<()>,
    {
        let _guard = self
            .session_lock
            .lock()
            .map_err(|_| ChainSigError::storage("session lock poisoned"))?;
        let mut session = self.store.load()?;
        apply(&mut session)?;
        if session.current_path.is_none() {
            session.current_path = Some(self.current_path());
        }
        self.store.save(&session)
    }

    /// Make `path` current and reseed the edit debouncer with it
    fn restore_path(&self, path: &str) -> ChainSigResult<()> {
        {
            let mut current = self
                .current_path
                .write()
                .map_err(|_| ChainSigError::storage("path lock poisoned"))?;
            *current = path.to_string();
        }
        let mut edits = self
            .path_edits
            .lock()
            .map_err(|_| ChainSigError::storage("path edit lock poisoned"))?;
        *edits = Debouncer::new(self.config.debounce()).with_initial(path.to_string());
        Ok(())
    }

    fn transition(&self, next: PipelineState) {
        let previous = match self.state.lock() {
            Ok(mut state) => std::mem::replace(&mut *state, next.clone()),
            Err(_) => return,
        };

        LogEntry::info("pipeline", "State transition")
            .field("from_state", &previous)
            .field("to_state", &next)
            .log();

        if let Ok(mut history) = self.history.lock() {
            history.push(next);
            if history.len() > HISTORY_LIMIT {
                let excess = history.len() - HISTORY_LIMIT;
                history.drain(..excess);
            }
        }
    }

    fn fail(&self, error: ChainSigError, retained: Option<SignedTransaction>) -> ChainSigError {
        LogEntry::error("pipeline", "Signing attempt failed")
            .field("code", format!("{:?}", error.code()))
            .field("error", &error)
            .field("retryable", error.is_retryable())
            .log();
        self.transition(PipelineState::Error {
            code: error.code(),
            retained,
        });
        error
    }
}

/// Session state as stored, for display layers
pub fn describe_session(state: &SessionState) -> String {
    match (&state.current_path, &state.pending) {
        (Some(path), Some(token)) => format!("path {} with pending request for {}", path, token.path),
        (Some(path), None) => format!("path {}", path),
        (None, Some(token)) => format!("pending request for {}", token.path),
        (None, None) => "empty".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Idle.to_string(), "idle");
        assert_eq!(
            PipelineState::AwaitingSignature { mode: SignatureMode::Continuation }.to_string(),
            "awaiting_signature(continuation)"
        );
        let err = PipelineState::Error {
            code: ErrorCode::RelayRejectedError,
            retained: None,
        };
        assert_eq!(err.to_string(), "error(RelayRejectedError)");
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_value(PipelineState::AwaitingSignature { mode: SignatureMode::Direct }).unwrap();
        assert_eq!(json["state"], "awaiting_signature");
        assert_eq!(json["mode"], "direct");
    }

    #[test]
    fn test_describe_session() {
        assert_eq!(describe_session(&SessionState::default()), "empty");
        let state = SessionState {
            current_path: Some("ethereum-1".into()),
            pending: None,
        };
        assert_eq!(describe_session(&state), "path ethereum-1");
    }
}
