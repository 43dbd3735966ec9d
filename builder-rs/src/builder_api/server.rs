use crate::{
    beacon::{PublishBlock, Topic, TopicCounters},
    builder_api::{
        bids_won::{BidWonEntry, BidsWonStore},
        unblind::unblind_signed_block,
        validator_registry::ValidatorRegistry,
    },
    chain::{unix_time_ms, ChainSpec, Clock},
    dispatch::Dispatcher,
    error::{BuilderApiError, ErrorMessage},
    payload::PayloadCache,
    signing::{compute_domain, Signer},
    types::{
        builder_bid::{BuilderBid, SignedBuilderBid, VersionedResponse, CONSENSUS_VERSION},
        execution_payload_header, u256_from_u128, u256_to_u128_saturating, PayloadReady,
        SignedBeaconBlockContents, SignedBlindedBeaconBlock, SignedValidatorRegistration,
    },
    Error,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use ethereum_consensus::primitives::{BlsPublicKey, Hash32, Root, Slot};
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer};
use tracing::{error, info, trace, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BuilderApiState {
    pub spec: Arc<ChainSpec>,
    pub clock: Clock,
    pub signer: Option<Arc<Signer>>,
    pub cache: Option<Arc<PayloadCache>>,
    pub registry: Arc<ValidatorRegistry>,
    pub publisher: Arc<dyn PublishBlock>,
    pub bids_won: Arc<BidsWonStore>,
    pub subsidy_gwei: u64,
    pub enabled: Arc<AtomicBool>,
    pub notifications: Dispatcher<BidWonEntry>,
    pub event_counters: Option<Arc<[TopicCounters; 5]>>,
}

type AppState = Arc<BuilderApiState>;

#[derive(Debug, serde::Deserialize)]
pub struct HeaderRequest {
    #[serde(with = "crate::serde::as_str")]
    pub slot: Slot,
    pub parent_hash: Hash32,
    #[serde(rename = "pubkey")]
    pub public_key: BlsPublicKey,
}

async fn handle_status_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn handle_validator_registration(
    State(state): State<AppState>,
    Json(mut registrations): Json<Vec<SignedValidatorRegistration>>,
) -> Result<StatusCode, Error> {
    trace!(count = registrations.len(), "processing validator registrations");
    let current_epoch = state.clock.epoch_at(state.clock.current_slot());
    if let Err(err) =
        state.registry.process_registrations(&mut registrations, &state.spec, current_epoch)
    {
        let rejected = serde_json::to_string(&registrations).unwrap_or_default();
        warn!(%err, %rejected, "rejecting validator registration batch");
        return Err(err.into())
    }
    Ok(StatusCode::OK)
}

async fn handle_get_header(
    State(state): State<AppState>,
    Path(request): Path<HeaderRequest>,
) -> Result<Response, Error> {
    let no_bid = || Error::from(BuilderApiError::NoBidPrepared(request.slot));
    if !state.enabled.load(Ordering::Relaxed) {
        return Err(no_bid())
    }
    let signer = state.signer.as_ref().ok_or_else(no_bid)?;
    let cache = state.cache.as_ref().ok_or_else(no_bid)?;
    if !state.registry.contains(&request.public_key) {
        return Err(no_bid())
    }
    let entry = cache.get_by_slot(request.slot).ok_or_else(no_bid)?;
    if entry.parent_block_hash != request.parent_hash {
        return Err(no_bid())
    }

    let mut payload = entry.payload.clone();
    let header = execution_payload_header(&mut payload)?;
    let value =
        u256_from_u128(u256_to_u128_saturating(&entry.block_value) + state.subsidy_gwei as u128);
    let mut bid = BuilderBid {
        header,
        blob_kzg_commitments: entry
            .blobs_bundle
            .as_ref()
            .map(|bundle| bundle.commitments.clone())
            .unwrap_or_default(),
        execution_requests: entry.execution_requests.clone().unwrap_or_default(),
        value,
        public_key: signer.public_key().clone(),
    };
    let domain = compute_domain(
        state.spec.domain_application_builder,
        state.spec.genesis_fork_version.clone(),
        Root::default(),
    )?;
    let signature = signer.sign_message(&mut bid, domain)?;
    let signed_bid = SignedBuilderBid { message: bid, signature };
    info!(slot = request.slot, %signed_bid, "returning header");
    let response = VersionedResponse { version: CONSENSUS_VERSION.to_string(), data: signed_bid };
    Ok(([("Eth-Consensus-Version", CONSENSUS_VERSION)], Json(response)).into_response())
}

async fn handle_submit_blinded_block(
    State(state): State<AppState>,
    Json(block): Json<SignedBlindedBeaconBlock>,
) -> Result<StatusCode, Error> {
    let block_hash = block.block_hash().clone();
    let entry = state
        .cache
        .as_ref()
        .and_then(|cache| cache.get_by_block_hash(&block_hash))
        .ok_or_else(|| BuilderApiError::UnknownBlockHash(block_hash.clone()))?;

    let unblinded = unblind_signed_block(&block, &entry)?;
    let contents = SignedBeaconBlockContents::new(unblinded, entry.blobs_bundle.as_ref());
    state
        .publisher
        .publish_block(&contents)
        .await
        .map_err(|err| BuilderApiError::PublishRejected(err.to_string()))?;

    let won = BidWonEntry::from_payload(&entry, unix_time_ms());
    info!(
        slot = entry.slot,
        %block_hash,
        txn_count = won.num_transactions,
        blob_count = won.num_blobs,
        value = %won.value_wei,
        "unblinded block published"
    );
    state.bids_won.record(won.clone());
    state.notifications.fire(won);
    Ok(StatusCode::ACCEPTED)
}

async fn handle_debug_payload(
    State(state): State<AppState>,
    Path(slot): Path<Slot>,
) -> Response {
    let entry = state.cache.as_ref().and_then(|cache| cache.get_by_slot(slot));
    match entry {
        Some(entry) => Json::<PayloadReady>((*entry).clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorMessage {
                code: StatusCode::NOT_FOUND.as_u16(),
                message: format!("no payload cached for slot {slot}"),
            }),
        )
            .into_response(),
    }
}

async fn handle_debug_validators(
    State(state): State<AppState>,
) -> Json<Vec<SignedValidatorRegistration>> {
    Json(state.registry.registrations())
}

#[derive(serde::Serialize)]
struct TopicCounterSnapshot {
    topic: &'static str,
    decoded: u64,
    dropped: u64,
    reconnects: u64,
}

async fn handle_debug_events(State(state): State<AppState>) -> Json<Vec<TopicCounterSnapshot>> {
    let snapshots = state
        .event_counters
        .as_ref()
        .map(|counters| {
            Topic::ALL
                .iter()
                .zip(counters.iter())
                .map(|(topic, counters)| TopicCounterSnapshot {
                    topic: topic.as_str(),
                    decoded: counters.decoded.load(Ordering::Relaxed),
                    dropped: counters.dropped.load(Ordering::Relaxed),
                    reconnects: counters.reconnects.load(Ordering::Relaxed),
                })
                .collect()
        })
        .unwrap_or_default();
    Json(snapshots)
}

fn handle_panic(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(%detail, "recovered panic in request handler");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorMessage {
            code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: "internal server error".to_string(),
        }),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/eth/v1/builder/status", get(handle_status_check))
        .route("/eth/v1/builder/validators", post(handle_validator_registration))
        .route("/eth/v1/builder/header/:slot/:parent_hash/:pubkey", get(handle_get_header))
        .route("/eth/v2/builder/blinded_blocks", post(handle_submit_blinded_block))
        .route("/buildoor/v1/payloads/:slot", get(handle_debug_payload))
        .route("/buildoor/v1/validators", get(handle_debug_validators))
        .route("/buildoor/v1/events", get(handle_debug_events))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

pub struct Server {
    host: Ipv4Addr,
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(host: Ipv4Addr, port: u16, state: AppState) -> Self {
        Self { host, port, state }
    }

    /// Serves until `shutdown` fires, then drains in-flight requests for up
    /// to 10 s.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<(), Error>> {
        let router = router(self.state.clone());
        let addr = SocketAddr::from((self.host, self.port));
        tokio::spawn(async move {
            info!(%addr, "builder API listening");
            let mut drain_signal = shutdown.clone();
            let mut serve_signal = shutdown;
            let server = axum::Server::bind(&addr)
                .serve(router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = serve_signal.changed().await;
                });
            tokio::select! {
                result = server => result.map_err(Error::Hyper),
                _ = async {
                    let _ = drain_signal.changed().await;
                    tokio::time::sleep(SHUTDOWN_DRAIN_TIMEOUT).await;
                } => {
                    warn!("builder API drain timed out");
                    Ok(())
                }
            }
        })
    }
}
