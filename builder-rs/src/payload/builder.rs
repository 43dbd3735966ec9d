use crate::{
    beacon::{BeaconClient, PayloadAttributesEvent},
    builder_api::ValidatorRegistry,
    chain::{unix_time_ms, ProposerDuties},
    dispatch::{Dispatcher, Subscription},
    engine::{
        types::{ForkchoiceStateV1, PayloadAttributesV3, PayloadStatus, WithdrawalV1},
        EngineClient,
    },
    error::BuildError,
    payload::PayloadCache,
    types::{BuildSource, PayloadReady},
    Error,
};
use ethereum_consensus::primitives::{ExecutionAddress, Hash32, Slot};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

pub const DEFAULT_PAYLOAD_BUILD_TIME_MS: u64 = 2000;

#[derive(Clone, Debug)]
pub struct PayloadBuilderConfig {
    /// How long the execution client gets to fill the payload before
    /// `engine_getPayload` collects it.
    pub payload_build_time: Duration,
    pub fee_recipient: ExecutionAddress,
    pub use_proposer_fee_recipient: bool,
}

impl Default for PayloadBuilderConfig {
    fn default() -> Self {
        Self {
            payload_build_time: Duration::from_millis(DEFAULT_PAYLOAD_BUILD_TIME_MS),
            fee_recipient: Default::default(),
            use_proposer_fee_recipient: false,
        }
    }
}

struct CurrentBuild {
    slot: Slot,
    parent_block_hash: Hash32,
    handle: JoinHandle<()>,
}

/// Drives the execution client from `payload_attributes` events: forkchoice
/// update, timed `engine_getPayload`, store into the cache, announce.
/// At most one build runs at a time; a newer event aborts the prior build.
pub struct PayloadBuilder {
    engine: EngineClient,
    beacon: Arc<BeaconClient>,
    cache: Arc<PayloadCache>,
    registry: Arc<ValidatorRegistry>,
    duties: Arc<ProposerDuties>,
    config: PayloadBuilderConfig,
    payload_ready: Dispatcher<PayloadReady>,
    current: Mutex<Option<CurrentBuild>>,
}

impl PayloadBuilder {
    pub fn new(
        engine: EngineClient,
        beacon: Arc<BeaconClient>,
        cache: Arc<PayloadCache>,
        registry: Arc<ValidatorRegistry>,
        duties: Arc<ProposerDuties>,
        config: PayloadBuilderConfig,
    ) -> Self {
        Self {
            engine,
            beacon,
            cache,
            registry,
            duties,
            config,
            payload_ready: Dispatcher::new(),
            current: Mutex::new(None),
        }
    }

    pub fn payload_ready(&self) -> &Dispatcher<PayloadReady> {
        &self.payload_ready
    }

    pub fn spawn(
        self: Arc<Self>,
        mut attributes: Subscription<PayloadAttributesEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = attributes.recv() => match event {
                        Some(event) => self.on_payload_attributes(&event),
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            if let Some(build) = self.current.lock().take() {
                build.handle.abort();
            }
        })
    }

    fn on_payload_attributes(self: &Arc<Self>, event: &PayloadAttributesEvent) {
        let slot = event.proposal_slot;
        let mut current = self.current.lock();
        if let Some(build) = current.take() {
            if !build.handle.is_finished() {
                if build.slot == slot && build.parent_block_hash == event.parent_block_hash {
                    // duplicate notification for the build already running
                    debug!(slot, "ignoring duplicate payload attributes");
                    *current = Some(build);
                    return
                }
                build.handle.abort();
                debug!(slot = build.slot, "aborted superseded build");
            }
        }
        let parent_block_hash = event.parent_block_hash.clone();
        let builder = self.clone();
        let event = event.clone();
        let handle = tokio::spawn(async move {
            match builder.build(event).await {
                Ok(entry) => {
                    info!(
                        slot,
                        block_hash = %entry.block_hash,
                        txn_count = entry.transaction_count(),
                        blob_count = entry.blob_count(),
                        value = %entry.block_value,
                        "payload ready"
                    );
                }
                Err(err) => {
                    warn!(slot, %err, "payload build failed");
                }
            }
        });
        *current = Some(CurrentBuild { slot, parent_block_hash, handle });
    }

    /// One full build: the next `payload_attributes` for the slot triggers a
    /// fresh attempt, so there are no retries here.
    pub async fn build(&self, event: PayloadAttributesEvent) -> Result<Arc<PayloadReady>, Error> {
        let build_requested_at = unix_time_ms();
        let slot = event.proposal_slot;

        let (safe_block_hash, finalized_block_hash) =
            self.beacon.finality_execution_hashes().await?;

        let fee_recipient = self.fee_recipient_for(&event);
        let withdrawals = event.withdrawals.iter().map(WithdrawalV1::from).collect();

        let forkchoice_state = ForkchoiceStateV1 {
            head_block_hash: event.parent_block_hash.clone(),
            safe_block_hash,
            finalized_block_hash,
        };
        let attributes = PayloadAttributesV3 {
            timestamp: event.timestamp,
            prev_randao: event.prev_randao.clone(),
            suggested_fee_recipient: fee_recipient.clone(),
            withdrawals,
            parent_beacon_block_root: event.parent_beacon_block_root.clone(),
        };

        let response = self
            .engine
            .forkchoice_updated_v3(&forkchoice_state, Some(&attributes))
            .await
            .map_err(Error::Engine)?;
        match response.payload_status.status {
            PayloadStatus::Valid | PayloadStatus::Syncing => {}
            status => {
                return Err(BuildError::ForkchoiceRejected(format!("{status:?}")).into())
            }
        }
        let payload_id = response.payload_id.ok_or(BuildError::MissingPayloadId)?;

        tokio::time::sleep(self.config.payload_build_time).await;

        let response = self.engine.get_payload(&payload_id).await.map_err(Error::Engine)?;
        let block_value = response.block_value;
        let execution_requests = response.try_into_execution_requests()?;
        let blobs_bundle = if response.blobs_bundle.is_empty() {
            None
        } else {
            Some(response.blobs_bundle.try_into_blobs_bundle()?)
        };
        let payload = response.execution_payload.into_execution_payload()?;

        let entry = PayloadReady {
            slot,
            parent_block_root: event.parent_block_root,
            parent_block_hash: event.parent_block_hash.clone(),
            block_hash: payload.block_hash.clone(),
            gas_limit: payload.gas_limit,
            payload,
            blobs_bundle,
            execution_requests,
            fee_recipient,
            block_value,
            source: BuildSource::Payload,
            build_requested_at,
            ready_at: unix_time_ms(),
        };
        let entry = self.cache.store(entry);
        self.payload_ready.fire_arc(entry.clone());
        Ok(entry)
    }

    fn fee_recipient_for(&self, event: &PayloadAttributesEvent) -> ExecutionAddress {
        if self.config.use_proposer_fee_recipient {
            if let Some(proposer) = self.duties.proposer_for(event.proposal_slot) {
                if let Some(registration) = self.registry.get_registration(&proposer) {
                    return registration.message.fee_recipient
                }
            }
        }
        self.config.fee_recipient.clone()
    }
}
