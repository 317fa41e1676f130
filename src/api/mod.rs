//! API Module
//!
//! JSON-RPC clients for the Ethereum node and the transport they share with
//! the NEAR signer client.

pub mod rpc;

pub use rpc::{CallRequest, EthRpc, JsonRpcClient, JsonRpcTransport, RpcErrorObject, TransactionReceipt};
