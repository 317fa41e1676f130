//! JSON-RPC clients against mock Ethereum and NEAR nodes

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use caeth_core::api::{EthRpc, JsonRpcClient};
use caeth_core::signing::{NearSignerTransport, SignerTransport};
use caeth_core::tx::{self, FeeOverrides, ReceiptStatus};
use caeth_core::types::{parse_address, TransactionId};
use caeth_core::ChainSigError;
use ethers_core::types::U256;
use httpmock::{Method, MockServer};
use serde_json::json;

const SENDER: &str = "0x1111111111111111111111111111111111111111";
const DEAD: &str = "0x000000000000000000000000000000000000dEaD";
const TX_HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

fn mock_method<'a>(server: &'a MockServer, method: &str, result: serde_json::Value) -> httpmock::Mock<'a> {
    let needle = format!("\"method\":\"{}\"", method);
    server.mock(|when, then| {
        when.method(Method::POST).path("/").body_contains(needle);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }));
    })
}

#[test]
fn builds_transaction_from_node_fees() {
    let server = MockServer::start();
    let nonce = mock_method(&server, "eth_getTransactionCount", json!("0x7"));
    let _priority = mock_method(&server, "eth_maxPriorityFeePerGas", json!("0x3b9aca00"));
    let _price = mock_method(&server, "eth_gasPrice", json!("0x4a817c800"));
    let estimate = mock_method(&server, "eth_estimateGas", json!("0x5208"));

    let rpc = JsonRpcClient::new(server.base_url()).unwrap();
    let unsigned = tx::build(
        &rpc,
        11155111,
        parse_address(SENDER).unwrap(),
        parse_address(DEAD).unwrap(),
        U256::from(5_000_000_000_000_000u64),
        None,
        &FeeOverrides::default(),
    )
    .unwrap();

    nonce.assert();
    estimate.assert();
    assert_eq!(unsigned.nonce, 7);
    assert_eq!(unsigned.max_priority_fee_per_gas, U256::from(1_000_000_000u64));
    assert_eq!(unsigned.max_fee_per_gas, U256::from(21_000_000_000u64));
    assert_eq!(unsigned.gas_limit, 25_200);
}

#[test]
fn unresolvable_fee_is_a_fee_estimation_error() {
    let server = MockServer::start();
    let _nonce = mock_method(&server, "eth_getTransactionCount", json!("0x0"));
    server.mock(|when, then| {
        when.method(Method::POST).path("/").body_contains("eth_maxPriorityFeePerGas");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "the method does not exist" }
        }));
    });

    let rpc = JsonRpcClient::new(server.base_url()).unwrap();
    let err = tx::build(
        &rpc,
        11155111,
        parse_address(SENDER).unwrap(),
        parse_address(DEAD).unwrap(),
        U256::one(),
        None,
        &FeeOverrides::default(),
    )
    .unwrap_err();

    assert!(matches!(err, ChainSigError::FeeEstimation(ref msg) if msg.contains("does not exist")));
}

#[test]
fn node_rejection_is_reported_verbatim() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(Method::POST).path("/").body_contains("eth_sendRawTransaction");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "nonce too low: next nonce 4, tx nonce 3" }
        }));
    });

    let rpc = JsonRpcClient::new(server.base_url()).unwrap();
    let err = rpc.send_raw_transaction(&[0x02, 0xc0]).unwrap_err();
    match err {
        ChainSigError::RelayRejected { reason } => assert_eq!(reason, "nonce too low: next nonce 4, tx nonce 3"),
        other => panic!("expected relay rejection, got {:?}", other),
    }
}

#[test]
fn broadcast_returns_node_hash() {
    let server = MockServer::start();
    let send = server.mock(|when, then| {
        when.method(Method::POST)
            .path("/")
            .body_contains("eth_sendRawTransaction")
            .body_contains("0x02c0");
        then.status(200).json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": TX_HASH }));
    });

    let rpc = JsonRpcClient::new(server.base_url()).unwrap();
    let id = rpc.send_raw_transaction(&[0x02, 0xc0]).unwrap();
    send.assert();
    assert_eq!(id.to_string(), TX_HASH);
}

#[test]
fn receipt_status_is_read_from_node() {
    let server = MockServer::start();
    let _receipt = mock_method(
        &server,
        "eth_getTransactionReceipt",
        json!({
            "transactionHash": TX_HASH,
            "blockNumber": "0x64",
            "status": "0x0",
            "gasUsed": "0x5208"
        }),
    );

    let rpc = JsonRpcClient::new(server.base_url()).unwrap();
    let status = tx::check_receipt(&rpc, &TransactionId::parse(TX_HASH).unwrap()).unwrap();
    assert_eq!(status, ReceiptStatus::Reverted { block_number: 100 });
}

#[test]
fn missing_receipt_is_pending() {
    let server = MockServer::start();
    let _receipt = mock_method(&server, "eth_getTransactionReceipt", serde_json::Value::Null);

    let rpc = JsonRpcClient::new(server.base_url()).unwrap();
    let status = tx::check_receipt(&rpc, &TransactionId::parse(TX_HASH).unwrap()).unwrap();
    assert_eq!(status, ReceiptStatus::Pending);
}

#[test]
fn near_required_deposit_view() {
    let server = MockServer::start();
    let query = server.mock(|when, then| {
        when.method(Method::POST)
            .path("/")
            .body_contains("\"method\":\"query\"")
            .body_contains("experimental_signature_deposit");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "result": b"\"1\"".to_vec(), "logs": [], "block_height": 1 }
        }));
    });

    let transport = NearSignerTransport::new(server.base_url(), "v1.signer-prod.testnet", "alice.testnet").unwrap();
    assert_eq!(transport.required_deposit().unwrap(), 1);
    query.assert();
}

#[test]
fn near_signature_fetched_by_receipt() {
    let signature = json!({
        "big_r": { "affine_point": "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798" },
        "s": { "scalar": "0A" },
        "recovery_id": 0
    });

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(Method::POST)
            .path("/")
            .body_contains("\"method\":\"tx\"")
            .body_contains("ReceiptKnown");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "status": { "SuccessValue": BASE64.encode(signature.to_string()) } }
        }));
    });
    server.mock(|when, then| {
        when.method(Method::POST)
            .path("/")
            .body_contains("\"method\":\"tx\"")
            .body_contains("ReceiptUnknown");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": -32000,
                "message": "Server error",
                "data": "Transaction ReceiptUnknown doesn't exist",
                "cause": { "name": "UNKNOWN_TRANSACTION" }
            }
        }));
    });

    let transport = NearSignerTransport::new(server.base_url(), "v1.signer-prod.testnet", "alice.testnet").unwrap();

    let response = transport.fetch_result("ReceiptKnown").unwrap().expect("final result");
    assert_eq!(response.s.scalar, "0A");
    assert_eq!(response.recovery_id, 0);

    assert_eq!(transport.fetch_result("ReceiptUnknown").unwrap(), None);
}
