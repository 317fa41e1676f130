//! NEAR transport for the signer contract
//!
//! The required deposit is read with a `call_function` view query. Sign
//! calls are made through the user's wallet session; once a call is final
//! its signature is read from the transaction status by receipt id.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};

use super::client::{SignerTransport, SubmitOutcome};
use super::request::{SignRequest, SignatureResponse};
use crate::api::rpc::{JsonRpcTransport, RpcErrorObject};
use crate::error::{ChainSigError, ChainSigResult};
use crate::utils::logging::LogEntry;

const TGAS: u64 = 1_000_000_000_000;

/// Gas attached to each `sign` call
pub const SIGN_GAS: u64 = 250 * TGAS;

/// View method reporting the current per-request deposit
pub const DEPOSIT_VIEW_METHOD: &str = "experimental_signature_deposit";

/// base64 of `{}`
const EMPTY_ARGS_BASE64: &str = "e30=";

/// A function call the wallet is asked to sign and send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub receiver_id: String,
    pub method_name: String,
    pub args: Value,
    pub gas: u64,
    pub deposit: u128,
}

/// How the wallet handled a function call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletOutcome {
    /// Signed and executed in-process; the transaction hash is final
    Executed { tx_hash: String },
    /// The user was sent to the wallet to approve
    Redirected,
}

/// The logged-in NEAR wallet
pub trait WalletSession: Send + Sync {
    fn account_id(&self) -> &str;
    fn call(&self, call: &FunctionCall) -> ChainSigResult<WalletOutcome>;
}

/// `SignerTransport` over NEAR JSON-RPC and a wallet session
pub struct NearSignerTransport {
    rpc: JsonRpcTransport,
    contract_id: String,
    account_id: String,
    wallet: Option<Box<dyn WalletSession>>,
}

impl NearSignerTransport {
    /// Read-only transport: can fetch results and the deposit, cannot sign
    pub fn new(
        near_rpc_url: impl Into<String>,
        contract_id: impl Into<String>,
        account_id: impl Into<String>,
    ) -> ChainSigResult<Self> {
        Ok(Self {
            rpc: JsonRpcTransport::new(near_rpc_url)?,
            contract_id: contract_id.into(),
            account_id: account_id.into(),
            wallet: None,
        })
    }

    pub fn with_wallet(mut self, wallet: Box<dyn WalletSession>) -> Self {
        self.account_id = wallet.account_id().to_string();
        self.wallet = Some(wallet);
        self
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

#[derive(Deserialize)]
struct CallFunctionResult {
    result: Vec<u8>,
}

impl SignerTransport for NearSignerTransport {
    fn required_deposit(&self) -> ChainSigResult<u128> {
        let params = json!({
            "request_type": "call_function",
            "finality": "final",
            "account_id": self.contract_id,
            "method_name": DEPOSIT_VIEW_METHOD,
            "args_base64": EMPTY_ARGS_BASE64,
        });
        let result: CallFunctionResult = self.rpc.call("query", params)?;
        parse_deposit(&result.result)
    }

    fn submit_sign(&self, request: &SignRequest, deposit: u128) -> ChainSigResult<SubmitOutcome> {
        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(|| ChainSigError::signer_unavailable("no wallet session to sign with"))?;

        let call = FunctionCall {
            receiver_id: self.contract_id.clone(),
            method_name: "sign".to_string(),
            args: request.to_args(),
            gas: SIGN_GAS,
            deposit,
        };

        match wallet.call(&call)? {
            WalletOutcome::Redirected => Ok(SubmitOutcome::Redirected),
            WalletOutcome::Executed { tx_hash } => match self.fetch_result(&tx_hash)? {
                Some(response) => Ok(SubmitOutcome::Completed(response)),
                None => Err(ChainSigError::signer_unavailable(format!(
                    "sign call {} finished without a signature",
                    tx_hash
                ))),
            },
        }
    }

    fn fetch_result(&self, receipt_id: &str) -> ChainSigResult<Option<SignatureResponse>> {
        let status = match self.rpc.call_raw("tx", (receipt_id, self.account_id.as_str()))? {
            Ok(value) => value,
            Err(error) if is_unknown_transaction(&error) => {
                LogEntry::debug("near", "Sign call not known to the node yet")
                    .field("receipt", receipt_id)
                    .log();
                return Ok(None);
            }
            Err(error) => return Err(ChainSigError::signer_unavailable(error.message)),
        };
        parse_sign_outcome(&status)
    }
}

/// Deposit view result: a JSON string or number of yoctoNEAR
fn parse_deposit(bytes: &[u8]) -> ChainSigResult<u128> {
    let value: Value = serde_json::from_slice(bytes)?;
    let parsed = match &value {
        Value::String(s) => s.parse::<u128>().ok(),
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    };
    parsed.ok_or_else(|| ChainSigError::signer_unavailable(format!("unexpected deposit value: {}", value)))
}

fn is_unknown_transaction(error: &RpcErrorObject) -> bool {
    let cause = error
        .data
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();
    error.message.contains("UNKNOWN_TRANSACTION")
        || cause.contains("UNKNOWN_TRANSACTION")
        || cause.contains("doesn't exist")
}

/// Extract the signer's value from a final transaction status
fn parse_sign_outcome(status: &Value) -> ChainSigResult<Option<SignatureResponse>> {
    let Some(outcome) = status.get("status") else {
        return Err(ChainSigError::signer_unavailable("transaction status missing"));
    };

    // The call executed and failed; polling again cannot change that
    if let Some(failure) = outcome.get("Failure") {
        return Err(ChainSigError::signer_rejected(format!("sign call failed: {}", failure)));
    }

    let Some(encoded) = outcome.get("SuccessValue").and_then(Value::as_str) else {
        // NotStarted / Started
        return Ok(None);
    };
    if encoded.is_empty() {
        return Err(ChainSigError::signer_unavailable("receipt carries no signature"));
    }

    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| ChainSigError::signer_unavailable(format!("malformed signer response: {}", e)))?;
    let response = serde_json::from_slice(&bytes)
        .map_err(|e| ChainSigError::signer_unavailable(format!("malformed signer response: {}", e)))?;
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method, MockServer};
    use std::sync::{Arc, Mutex};

    /// Wallet that records every call and answers with a fixed outcome
    struct RecordingWallet {
        outcome: WalletOutcome,
        calls: Arc<Mutex<Vec<FunctionCall>>>,
    }

    impl WalletSession for RecordingWallet {
        fn account_id(&self) -> &str {
            "bob.testnet"
        }

        fn call(&self, call: &FunctionCall) -> ChainSigResult<WalletOutcome> {
            self.calls.lock().unwrap().push(call.clone());
            Ok(self.outcome.clone())
        }
    }

    fn with_recording_wallet(
        near_rpc_url: String,
        outcome: WalletOutcome,
    ) -> (NearSignerTransport, Arc<Mutex<Vec<FunctionCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let wallet = RecordingWallet {
            outcome,
            calls: Arc::clone(&calls),
        };
        let transport = NearSignerTransport::new(near_rpc_url, "v1.signer-prod.testnet", "alice.testnet")
            .unwrap()
            .with_wallet(Box::new(wallet));
        (transport, calls)
    }

    fn sign_request() -> SignRequest {
        SignRequest {
            payload: [7; 32],
            path: "ethereum-1".into(),
            key_version: 0,
        }
    }

    fn assert_sign_call(call: &FunctionCall, deposit: u128) {
        assert_eq!(call.receiver_id, "v1.signer-prod.testnet");
        assert_eq!(call.method_name, "sign");
        assert_eq!(call.gas, 250_000_000_000_000);
        assert_eq!(call.deposit, deposit);
        let payload = vec![7u8; 32];
        assert_eq!(
            call.args,
            json!({ "request": { "payload": payload, "path": "ethereum-1", "key_version": 0 } })
        );
    }

    const SIGNATURE_JSON: &str = r#"{"big_r":{"affine_point":"0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798"},"s":{"scalar":"01"},"recovery_id":1}"#;

    #[test]
    fn test_parse_deposit_forms() {
        assert_eq!(parse_deposit(br#""1000000000000000000000""#).unwrap(), 10u128.pow(21));
        assert_eq!(parse_deposit(b"1").unwrap(), 1);
        assert!(parse_deposit(b"null").is_err());
    }

    #[test]
    fn test_parse_success_value() {
        let status = json!({ "status": { "SuccessValue": BASE64.encode(SIGNATURE_JSON) } });
        let response = parse_sign_outcome(&status).unwrap().unwrap();
        assert_eq!(response.recovery_id, 1);
        assert_eq!(response.s.scalar, "01");
    }

    #[test]
    fn test_parse_pending_and_failure() {
        assert_eq!(parse_sign_outcome(&json!({ "status": "NotStarted" })).unwrap(), None);

        let failed = json!({ "status": { "Failure": { "ActionError": { "kind": {
            "FunctionCallError": { "ExecutionError": "Smart contract panicked: Attached deposit is lower than required" }
        } } } } });
        let err = parse_sign_outcome(&failed).unwrap_err();
        assert!(matches!(err, ChainSigError::SignerRejected(ref msg) if msg.contains("deposit")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_transaction_detection() {
        let error = RpcErrorObject {
            code: -32000,
            message: "Server error".into(),
            data: Some(json!({ "name": "HANDLER_ERROR", "cause": { "name": "UNKNOWN_TRANSACTION" } })),
        };
        assert!(is_unknown_transaction(&error));
    }

    #[test]
    fn test_submit_without_wallet() {
        let transport = NearSignerTransport::new("http://127.0.0.1:1", "v1.signer-prod.testnet", "alice.testnet").unwrap();
        let request = SignRequest {
            payload: [0; 32],
            path: "ethereum-1".into(),
            key_version: 0,
        };
        assert!(matches!(
            transport.submit_sign(&request, 1),
            Err(ChainSigError::SignerUnavailable(_))
        ));
    }

    #[test]
    fn test_redirected_sign_call() {
        let (transport, calls) = with_recording_wallet("http://127.0.0.1:1".into(), WalletOutcome::Redirected);
        assert_eq!(transport.account_id(), "bob.testnet");

        let outcome = transport.submit_sign(&sign_request(), 5).unwrap();
        assert_eq!(outcome, SubmitOutcome::Redirected);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_sign_call(&calls[0], 5);
    }

    #[test]
    fn test_executed_sign_call_reads_result() {
        let server = MockServer::start();
        let lookup = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/")
                .body_contains("\"method\":\"tx\"")
                .body_contains("SignTxHash")
                .body_contains("bob.testnet");
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "status": { "SuccessValue": BASE64.encode(SIGNATURE_JSON) } }
            }));
        });

        let executed = WalletOutcome::Executed {
            tx_hash: "SignTxHash".into(),
        };
        let (transport, calls) = with_recording_wallet(server.base_url(), executed);

        match transport.submit_sign(&sign_request(), 1).unwrap() {
            SubmitOutcome::Completed(response) => assert_eq!(response.recovery_id, 1),
            other => panic!("expected a completed call, got {:?}", other),
        }
        lookup.assert();
        assert_sign_call(&calls.lock().unwrap()[0], 1);
    }
}
