//! Ethereum JSON-RPC
//!
//! `EthRpc` is the seam the builder, relay and receipt tracker depend on.
//! `JsonRpcClient` implements it over a blocking reqwest client; tests swap
//! in an in-memory fake.

use ethers_core::types::{Address, Bytes, H256, U256, U64};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{ChainSigError, ChainSigResult};
use crate::types::TransactionId;

/// Call parameters for `eth_estimateGas`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

/// The receipt fields the relay cares about
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: Option<U64>,
    /// 1 on success, 0 on revert
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U256>,
}

/// Ethereum node operations used by the signing pipeline
pub trait EthRpc {
    /// Next nonce including pending transactions
    fn transaction_count(&self, address: Address) -> ChainSigResult<u64>;

    fn balance(&self, address: Address) -> ChainSigResult<U256>;

    fn gas_price(&self) -> ChainSigResult<U256>;

    fn max_priority_fee_per_gas(&self) -> ChainSigResult<U256>;

    fn estimate_gas(&self, call: &CallRequest) -> ChainSigResult<u64>;

    /// Broadcast a signed encoding. A node-side rejection is reported as
    /// `RelayRejected` carrying the node's message verbatim.
    fn send_raw_transaction(&self, raw: &[u8]) -> ChainSigResult<TransactionId>;

    fn transaction_receipt(&self, id: &TransactionId) -> ChainSigResult<Option<TransactionReceipt>>;
}

// =============================================================================
// JSON-RPC envelope
// =============================================================================

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Error object returned by a JSON-RPC node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Blocking JSON-RPC 2.0 transport shared by the Ethereum and NEAR clients
pub struct JsonRpcTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(url: impl Into<String>) -> ChainSigResult<Self> {
        Self::with_timeout(url, Duration::from_secs(30))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> ChainSigResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("caeth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChainSigError::rpc(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform a call; the outer error is transport, the inner one is the
    /// node's own error object
    pub fn call_raw<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> ChainSigResult<Result<serde_json::Value, RpcErrorObject>> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self.client.post(&self.url).json(&request).send()?;
        let status = response.status();
        let body: RpcResponse = response.json().map_err(|e| {
            ChainSigError::rpc(format!("{} returned unparseable body ({}): {}", method, status, e))
        })?;

        if let Some(error) = body.error {
            return Ok(Err(error));
        }
        if !status.is_success() {
            return Err(ChainSigError::rpc(format!("{} failed with HTTP {}", method, status)));
        }
        Ok(Ok(body.result.unwrap_or(serde_json::Value::Null)))
    }

    /// Perform a call and decode its result; node errors become `Rpc`
    pub fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> ChainSigResult<T> {
        match self.call_raw(method, params)? {
            Ok(value) => serde_json::from_value(value).map_err(|e| {
                ChainSigError::rpc(format!("{} returned unexpected result: {}", method, e))
            }),
            Err(error) => Err(ChainSigError::rpc(format!("{}: {}", method, error.message))),
        }
    }
}

// =============================================================================
// Ethereum client
// =============================================================================

const NO_PARAMS: [u8; 0] = [];

/// `EthRpc` over HTTP JSON-RPC
pub struct JsonRpcClient {
    transport: JsonRpcTransport,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> ChainSigResult<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(url)?,
        })
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }
}

impl EthRpc for JsonRpcClient {
    fn transaction_count(&self, address: Address) -> ChainSigResult<u64> {
        let count: U64 = self
            .transport
            .call("eth_getTransactionCount", (address, "pending"))?;
        Ok(count.as_u64())
    }

    fn balance(&self, address: Address) -> ChainSigResult<U256> {
        self.transport.call("eth_getBalance", (address, "latest"))
    }

    fn gas_price(&self) -> ChainSigResult<U256> {
        self.transport.call("eth_gasPrice", NO_PARAMS)
    }

    fn max_priority_fee_per_gas(&self) -> ChainSigResult<U256> {
        self.transport.call("eth_maxPriorityFeePerGas", NO_PARAMS)
    }

    fn estimate_gas(&self, call: &CallRequest) -> ChainSigResult<u64> {
        let gas: U256 = self.transport.call("eth_estimateGas", (call,))?;
        if gas > U256::from(u64::MAX) {
            return Err(ChainSigError::rpc("eth_estimateGas returned an out-of-range value"));
        }
        Ok(gas.as_u64())
    }

    fn send_raw_transaction(&self, raw: &[u8]) -> ChainSigResult<TransactionId> {
        let encoded = format!("0x{}", hex::encode(raw));
        match self.transport.call_raw("eth_sendRawTransaction", (encoded,))? {
            Ok(value) => {
                let hash: H256 = serde_json::from_value(value).map_err(|e| {
                    ChainSigError::rpc(format!("eth_sendRawTransaction returned unexpected result: {}", e))
                })?;
                Ok(TransactionId(hash))
            }
            Err(error) => Err(ChainSigError::relay_rejected(error.message)),
        }
    }

    fn transaction_receipt(&self, id: &TransactionId) -> ChainSigResult<Option<TransactionReceipt>> {
        self.transport
            .call("eth_getTransactionReceipt", (id.to_string(),))
    }
}
