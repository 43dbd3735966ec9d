use axum::{
    extract::{Json, State},
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use builder_rs::{
    beacon::{BeaconClient, PayloadAttributesEvent},
    builder_api::ValidatorRegistry,
    chain::ProposerDuties,
    engine::{EngineClient, JwtAuth},
    payload::{PayloadBuilder, PayloadBuilderConfig, PayloadCache},
};
use ethereum_consensus::primitives::{ExecutionAddress, Hash32, Root};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use url::Url;

#[derive(Clone, Copy, PartialEq)]
enum EngineMode {
    // getPayloadV5 answers "Unsupported fork", V4 succeeds
    FallbackToV4,
    ForkchoiceInvalid,
    MissingPayloadId,
    OversizedCommitment,
}

#[derive(Clone)]
struct FakeNodes {
    mode: Arc<Mutex<EngineMode>>,
    engine_calls: Arc<Mutex<Vec<String>>>,
    saw_bearer_token: Arc<Mutex<bool>>,
}

impl FakeNodes {
    fn new(mode: EngineMode) -> Self {
        Self {
            mode: Arc::new(Mutex::new(mode)),
            engine_calls: Arc::new(Mutex::new(Vec::new())),
            saw_bearer_token: Arc::new(Mutex::new(true)),
        }
    }
}

fn execution_payload_json() -> Value {
    json!({
        "parentHash": format!("0x{}", "11".repeat(32)),
        "feeRecipient": format!("0x{}", "22".repeat(20)),
        "stateRoot": format!("0x{}", "33".repeat(32)),
        "receiptsRoot": format!("0x{}", "44".repeat(32)),
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "prevRandao": format!("0x{}", "55".repeat(32)),
        "blockNumber": "0x7",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "timestamp": "0x63e52f22",
        "extraData": "0x",
        "baseFeePerGas": "0x7",
        "blockHash": format!("0x{}", "aa".repeat(32)),
        "transactions": ["0x0102", "0x030405"],
        "withdrawals": [],
        "blobGasUsed": "0x0",
        "excessBlobGas": "0x0",
    })
}

async fn handle_engine(
    State(nodes): State<FakeNodes>,
    headers: HeaderMap,
    Json(call): Json<Value>,
) -> Json<Value> {
    let has_token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("Bearer "))
        .unwrap_or(false);
    if !has_token {
        *nodes.saw_bearer_token.lock() = false;
    }
    let method = call["method"].as_str().unwrap_or_default().to_string();
    nodes.engine_calls.lock().push(method.clone());
    let id = call["id"].clone();
    let mode = *nodes.mode.lock();

    let result = match method.as_str() {
        "engine_forkchoiceUpdatedV3" => {
            // the builder always sends attributes with a withdrawals array
            let attributes = &call["params"][1];
            assert!(attributes["withdrawals"].is_array());
            match mode {
                EngineMode::ForkchoiceInvalid => json!({
                    "payloadStatus": {"status": "INVALID", "latestValidHash": null, "validationError": "bad block"},
                    "payloadId": null,
                }),
                EngineMode::MissingPayloadId => json!({
                    "payloadStatus": {"status": "VALID", "latestValidHash": null, "validationError": null},
                    "payloadId": null,
                }),
                _ => json!({
                    "payloadStatus": {"status": "VALID", "latestValidHash": null, "validationError": null},
                    "payloadId": "0x0000000021f32cc1",
                }),
            }
        }
        "engine_getPayloadV5" => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -38005, "message": "Unsupported fork"},
            }))
        }
        "engine_getPayloadV4" => {
            let commitment_len =
                if mode == EngineMode::OversizedCommitment { 49 } else { 48 };
            json!({
                "executionPayload": execution_payload_json(),
                "blockValue": "0x2540be400",
                "blobsBundle": {
                    "commitments": [format!("0x{}", "ab".repeat(commitment_len))],
                    "proofs": [format!("0x{}", "cd".repeat(48))],
                    "blobs": [format!("0x{}", "00".repeat(131_072))],
                },
                "shouldOverrideBuilder": false,
                "executionRequests": ["0x00aabb"],
            })
        }
        other => panic!("unexpected engine call: {other}"),
    };
    Json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn handle_finality_checkpoints() -> Json<Value> {
    // no finality yet: zero roots resolve to zero execution hashes
    Json(json!({
        "data": {
            "previous_justified": {"epoch": "0", "root": format!("0x{}", "00".repeat(32))},
            "current_justified": {"epoch": "0", "root": format!("0x{}", "00".repeat(32))},
            "finalized": {"epoch": "0", "root": format!("0x{}", "00".repeat(32))},
        }
    }))
}

async fn start_nodes(port: u16, mode: EngineMode) -> (FakeNodes, Url) {
    let nodes = FakeNodes::new(mode);
    let router = Router::new()
        .route("/", post(handle_engine))
        .route("/eth/v1/beacon/states/head/finality_checkpoints", get(handle_finality_checkpoints))
        .with_state(nodes.clone());
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let server = axum::Server::bind(&addr).serve(router.into_make_service());
    tokio::spawn(server);
    tokio::time::sleep(Duration::from_millis(100)).await;
    (nodes, Url::parse(&format!("http://127.0.0.1:{port}")).unwrap())
}

fn attributes_event(slot: u64) -> PayloadAttributesEvent {
    PayloadAttributesEvent {
        proposal_slot: slot,
        proposer_index: 3,
        parent_block_root: Root::try_from([0x66u8; 32].as_ref()).unwrap(),
        parent_block_hash: Hash32::try_from([0x11u8; 32].as_ref()).unwrap(),
        timestamp: 0x63e52f22,
        prev_randao: Hash32::try_from([0x55u8; 32].as_ref()).unwrap(),
        suggested_fee_recipient: ExecutionAddress::try_from([0x22u8; 20].as_ref()).unwrap(),
        withdrawals: vec![],
        parent_beacon_block_root: Root::try_from([0x66u8; 32].as_ref()).unwrap(),
    }
}

fn builder_for(endpoint: &Url, cache: Arc<PayloadCache>) -> PayloadBuilder {
    let beacon = Arc::new(BeaconClient::new(endpoint.clone()));
    let engine = EngineClient::new(endpoint.clone(), JwtAuth::new(&[7u8; 32]).unwrap());
    let registry = Arc::new(ValidatorRegistry::new());
    let duties = Arc::new(ProposerDuties::new(beacon.api().clone(), 32));
    PayloadBuilder::new(
        engine,
        beacon,
        cache,
        registry,
        duties,
        PayloadBuilderConfig {
            payload_build_time: Duration::from_millis(10),
            fee_recipient: ExecutionAddress::try_from([0x22u8; 20].as_ref()).unwrap(),
            use_proposer_fee_recipient: false,
        },
    )
}

#[tokio::test]
async fn test_build_with_get_payload_version_fallback() {
    let (nodes, endpoint) = start_nodes(28670, EngineMode::FallbackToV4).await;
    let cache = Arc::new(PayloadCache::new(10));
    let builder = builder_for(&endpoint, cache.clone());
    let mut ready = builder.payload_ready().subscribe(4);

    let entry = builder.build(attributes_event(5)).await.expect("build succeeds");
    assert_eq!(entry.slot, 5);
    assert_eq!(entry.block_hash, Hash32::try_from([0xaau8; 32].as_ref()).unwrap());
    assert_eq!(entry.transaction_count(), 2);
    assert_eq!(entry.blob_count(), 1);
    // 0x2540be400 wei = 10 gwei
    assert_eq!(entry.block_value_gwei(), 10);
    assert_eq!(entry.execution_requests.as_ref().unwrap().len(), 1);

    // the build landed in the cache and fired the ready event
    assert_eq!(cache.get_by_slot(5).unwrap().block_hash, entry.block_hash);
    let event = ready.try_recv().expect("payload ready event fired");
    assert_eq!(event.slot, 5);

    // V5 was tried first, rejected as an unsupported fork, then V4 served it
    let calls = nodes.engine_calls.lock();
    assert_eq!(
        *calls,
        vec![
            "engine_forkchoiceUpdatedV3".to_string(),
            "engine_getPayloadV5".to_string(),
            "engine_getPayloadV4".to_string(),
        ]
    );
    assert!(*nodes.saw_bearer_token.lock(), "every engine call is JWT-authenticated");
}

#[tokio::test]
async fn test_build_fails_on_invalid_forkchoice_status() {
    let (nodes, endpoint) = start_nodes(28671, EngineMode::ForkchoiceInvalid).await;
    let cache = Arc::new(PayloadCache::new(10));
    let builder = builder_for(&endpoint, cache.clone());

    let err = builder.build(attributes_event(5)).await.unwrap_err();
    assert!(err.to_string().contains("forkchoice update rejected"), "got: {err}");
    assert!(cache.get_by_slot(5).is_none());
    // the build stops before any getPayload attempt
    assert_eq!(nodes.engine_calls.lock().len(), 1);
}

#[tokio::test]
async fn test_build_fails_without_payload_id() {
    let (_nodes, endpoint) = start_nodes(28672, EngineMode::MissingPayloadId).await;
    let cache = Arc::new(PayloadCache::new(10));
    let builder = builder_for(&endpoint, cache.clone());

    let err = builder.build(attributes_event(5)).await.unwrap_err();
    assert!(err.to_string().contains("payload id"), "got: {err}");
    assert!(cache.get_by_slot(5).is_none());
}

#[tokio::test]
async fn test_build_rejects_malformed_kzg_commitment() {
    let (_nodes, endpoint) = start_nodes(28673, EngineMode::OversizedCommitment).await;
    let cache = Arc::new(PayloadCache::new(10));
    let builder = builder_for(&endpoint, cache.clone());

    let err = builder.build(attributes_event(5)).await.unwrap_err();
    assert!(err.to_string().contains("48 bytes"), "got: {err}");
    assert!(cache.get_by_slot(5).is_none(), "rejected payloads never reach the cache");
}
