//! Signer client
//!
//! Sends a payload to the threshold signer and hands back the raw
//! `(R, s, recovery_id)`. The signer either answers in the same call
//! (direct mode) or the wallet redirects the user away, in which case the
//! result is fetched later by receipt id (continuation mode).
//!
//! Each logical request produces at most one signature: a submit is never
//! retried, and an account and path can only have one request in flight.

use ethers_core::types::Address;
use std::collections::HashSet;
use std::sync::Mutex;

use super::request::{RawSignature, SignRequest, SignatureResponse};
use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{DerivationPath, Payload};
use crate::utils::crypto::to_checksum_address;
use crate::utils::logging::LogEntry;

/// Result of handing a `sign` call to the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The call finished and the signer's value is available
    Completed(SignatureResponse),
    /// Control left the process; the result arrives on the return URL
    Redirected,
}

/// Access to the signer service
pub trait SignerTransport: Send + Sync {
    /// Deposit the signer currently requires per request, in yoctoNEAR
    fn required_deposit(&self) -> ChainSigResult<u128>;

    /// Submit one `sign` call with `deposit` attached
    fn submit_sign(&self, request: &SignRequest, deposit: u128) -> ChainSigResult<SubmitOutcome>;

    /// Signature produced by an earlier call, `None` while it is not final
    fn fetch_result(&self, receipt_id: &str) -> ChainSigResult<Option<SignatureResponse>>;
}

/// What a signature request turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOutcome {
    Signed(RawSignature),
    Suspended,
}

type InFlightKey = (Address, DerivationPath);

/// Client for the MPC signer
pub struct SignerClient<T> {
    transport: T,
    key_version: u32,
    deposit: u128,
    in_flight: Mutex<HashSet<InFlightKey>>,
}

impl<T: SignerTransport> SignerClient<T> {
    pub fn new(transport: T, key_version: u32, deposit: u128) -> Self {
        Self {
            transport,
            key_version,
            deposit,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn key_version(&self) -> u32 {
        self.key_version
    }

    /// Deposit attached to every request
    pub fn deposit(&self) -> u128 {
        self.deposit
    }

    /// Claim the `(account, path)` slot. Held until the reservation drops.
    pub fn reserve(&self, path: &DerivationPath, account: Address) -> ChainSigResult<Reservation<'_>> {
        let key = (account, path.clone());
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| ChainSigError::signer_unavailable("in-flight lock poisoned"))?;
        if !set.insert(key.clone()) {
            return Err(ChainSigError::RequestInFlight(path.to_string()));
        }
        Ok(Reservation {
            set: &self.in_flight,
            key,
        })
    }

    /// Request a signature over `payload` with the key at `path`, which
    /// controls `account`
    pub fn request_signature(
        &self,
        payload: &Payload,
        path: &DerivationPath,
        account: Address,
    ) -> ChainSigResult<SignatureOutcome> {
        let reservation = self.reserve(path, account)?;
        self.request_reserved(&reservation, payload)
    }

    /// Like `request_signature`, for a caller already holding the slot
    pub fn request_reserved(
        &self,
        reservation: &Reservation<'_>,
        payload: &Payload,
    ) -> ChainSigResult<SignatureOutcome> {
        let path = reservation.path();
        self.check_deposit()?;

        let request = SignRequest::new(payload, path, self.key_version);
        LogEntry::info("signer", "Submitting sign request")
            .field("path", path)
            .address_field("account", &to_checksum_address(reservation.account().as_bytes()))
            .field("payload", payload.to_hex())
            .field("key_version", self.key_version)
            .field("deposit_yocto", self.deposit)
            .log();

        match self.transport.submit_sign(&request, self.deposit) {
            Ok(SubmitOutcome::Completed(response)) => {
                RawSignature::from_response(&response).map(SignatureOutcome::Signed)
            }
            Ok(SubmitOutcome::Redirected) => {
                LogEntry::info("signer", "Sign request continues out of process")
                    .field("path", path)
                    .log();
                Ok(SignatureOutcome::Suspended)
            }
            Err(e) => Err(self.classify(e)),
        }
    }

    /// Fetch the signature of a suspended request by receipt id
    pub fn fetch_signature(&self, receipt_id: &str) -> ChainSigResult<RawSignature> {
        self.poll_signature(receipt_id)?.ok_or_else(|| {
            ChainSigError::signer_unavailable(format!(
                "signature for receipt {} is not available yet",
                receipt_id
            ))
        })
    }

    /// Like `fetch_signature`, but a result that is not final yet is `None`
    pub fn poll_signature(&self, receipt_id: &str) -> ChainSigResult<Option<RawSignature>> {
        match self.transport.fetch_result(receipt_id) {
            Ok(Some(response)) => RawSignature::from_response(&response).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(self.classify(e)),
        }
    }

    fn check_deposit(&self) -> ChainSigResult<()> {
        let required = self.transport.required_deposit().map_err(|e| match e {
            ChainSigError::Rpc(msg) => ChainSigError::signer_unavailable(msg),
            other => other,
        })?;

        if self.deposit < required {
            LogEntry::warn("signer", "Configured deposit is below the signer minimum")
                .field("required_yocto", required)
                .field("attached_yocto", self.deposit)
                .log();
            return Err(ChainSigError::InsufficientDeposit {
                required,
                attached: self.deposit,
            });
        }
        Ok(())
    }

    /// Map transport failures onto the signer taxonomy
    fn classify(&self, error: ChainSigError) -> ChainSigError {
        match error {
            ChainSigError::SignerUnavailable(msg) | ChainSigError::SignerRejected(msg)
                if msg.to_lowercase().contains("deposit") =>
            {
                let required = self
                    .transport
                    .required_deposit()
                    .ok()
                    .filter(|required| *required > self.deposit)
                    .unwrap_or_else(|| self.deposit.saturating_add(1));

                LogEntry::warn("signer", "Signer rejected the attached deposit")
                    .field("required_yocto", required)
                    .field("attached_yocto", self.deposit)
                    .log();
                ChainSigError::InsufficientDeposit {
                    required,
                    attached: self.deposit,
                }
            }
            ChainSigError::Rpc(msg) => ChainSigError::signer_unavailable(msg),
            other => other,
        }
    }
}

/// An `(account, path)` slot; released on drop however the request ends
pub struct Reservation<'a> {
    set: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Reservation<'_> {
    pub fn account(&self) -> Address {
        self.key.0
    }

    pub fn path(&self) -> &DerivationPath {
        &self.key.1
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}
