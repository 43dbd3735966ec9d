use crate::{
    beacon::{BeaconClient, EventChannels, EventDemux, SubmitBid, SubmitEnvelope, Topic},
    builder_api::{BidsWonStore, BuilderApiState, Server as BuilderApiServer, ValidatorRegistry},
    chain::ProposerDuties,
    config::Config,
    engine::{EngineClient, JwtAuth},
    epbs::{BidTracker, Scheduler},
    payload::{PayloadBuilder, PayloadBuilderConfig, PayloadCache},
    signing::Signer,
    Error,
};
use ethereum_consensus::primitives::ExecutionAddress;
use std::{
    future::Future,
    net::Ipv4Addr,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::Poll,
    time::Duration,
};
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
};
use tracing::{info, warn};
use url::Url;

pub struct Service {
    config: Config,
}

impl Service {
    pub fn from(config: Config) -> Self {
        Self { config }
    }

    /// Brings the builder up in dependency order; each step gates the next,
    /// and any failure here is fatal for the process.
    pub async fn spawn(self) -> Result<ServiceHandle, Error> {
        let config = self.config;
        config.validate()?;

        // beacon node first: everything downstream needs the chain spec
        let beacon_endpoint = Url::parse(&config.cl_client)
            .map_err(|err| Error::Config(format!("invalid `cl_client` URL: {err}")))?;
        let beacon = Arc::new(BeaconClient::new(beacon_endpoint.clone()));
        let spec = Arc::new(beacon.load_chain_spec().await?);
        let clock = spec.clock();
        info!(
            genesis_time = spec.genesis_time,
            seconds_per_slot = spec.seconds_per_slot,
            slots_per_epoch = spec.slots_per_epoch,
            "connected to beacon node"
        );

        let engine_endpoint = Url::parse(&config.el_engine_api)
            .map_err(|err| Error::Config(format!("invalid `el_engine_api` URL: {err}")))?;
        let auth = JwtAuth::from_file(&config.el_jwt_secret).map_err(Error::Engine)?;
        let engine = EngineClient::new(engine_endpoint, auth);

        let signer = Arc::new(Signer::from_hex(&config.builder_privkey)?);
        info!(public_key = %signer.public_key(), "builder identity loaded");

        let duties = Arc::new(ProposerDuties::new(beacon.api().clone(), spec.slots_per_epoch));
        let current_epoch = clock.epoch_at(clock.current_slot());
        for epoch in [current_epoch, current_epoch + 1] {
            if let Err(err) = duties.on_epoch(epoch).await {
                warn!(epoch, %err, "could not prefetch proposer duties");
            }
        }

        let fee_recipient = parse_fee_recipient(&config.fee_recipient)?;
        let cache = Arc::new(PayloadCache::new(config.payload_cache_slots));
        let registry = Arc::new(ValidatorRegistry::new());
        let builder = Arc::new(PayloadBuilder::new(
            engine,
            beacon.clone(),
            cache.clone(),
            registry.clone(),
            duties.clone(),
            PayloadBuilderConfig {
                payload_build_time: Duration::from_millis(config.payload_build_time),
                fee_recipient,
                use_proposer_fee_recipient: config.use_proposer_fee_recipient,
            },
        ));

        let channels = Arc::new(EventChannels::new());
        let demux = EventDemux::new(beacon_endpoint, channels.clone());
        let event_counters = demux.counters();

        let epbs_enabled = Arc::new(AtomicBool::new(config.epbs_enabled));
        let builder_api_enabled = Arc::new(AtomicBool::new(config.builder_api_enabled));

        let tracker = Arc::new(BidTracker::new());
        let scheduler = Arc::new(Scheduler::new(
            config.epbs.clone(),
            config.schedule.clone(),
            spec.clone(),
            signer.clone(),
            cache.clone(),
            tracker.clone(),
            beacon.clone() as Arc<dyn SubmitBid>,
            beacon.clone() as Arc<dyn SubmitEnvelope>,
            epbs_enabled.clone(),
        ));

        let api_state = Arc::new(BuilderApiState {
            spec: spec.clone(),
            clock,
            signer: Some(signer.clone()),
            cache: Some(cache.clone()),
            registry: registry.clone(),
            publisher: beacon.clone(),
            bids_won: Arc::new(BidsWonStore::default()),
            subsidy_gwei: config.block_value_subsidy_gwei,
            enabled: builder_api_enabled.clone(),
            notifications: Default::default(),
            event_counters: Some(event_counters),
        });
        let api_host: Ipv4Addr = config
            .builder_api_host
            .parse()
            .map_err(|err| Error::Config(format!("invalid `builder_api_host`: {err}")))?;
        let api_server = BuilderApiServer::new(api_host, config.builder_api_port, api_state);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let attributes =
            channels.payload_attributes.subscribe(Topic::PayloadAttributes.channel_capacity());
        let builder_task = builder.spawn(attributes, shutdown_rx.clone());
        let scheduler_task = scheduler.clone().spawn(shutdown_rx.clone());
        let api_task = api_server.spawn(shutdown_rx.clone());

        let head_task = {
            let mut heads = channels.head.subscribe(Topic::Head.channel_capacity());
            let scheduler = scheduler.clone();
            let beacon = beacon.clone();
            let duties = duties.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        head = heads.recv() => {
                            let Some(head) = head else { break };
                            if head.epoch_transition {
                                let epoch = clock.epoch_at(head.slot);
                                let duties = duties.clone();
                                tokio::spawn(async move {
                                    for epoch in [epoch, epoch + 1] {
                                        if let Err(err) = duties.on_epoch(epoch).await {
                                            warn!(epoch, %err, "could not refresh proposer duties");
                                        }
                                    }
                                });
                            }
                            // follow-up fetch runs off the event loop, bounded
                            // by the client's 5 s timeout
                            let scheduler = scheduler.clone();
                            let beacon = beacon.clone();
                            tokio::spawn(async move {
                                let root = crate::serde::root_hex(&head.block);
                                match beacon.block_info(&root).await {
                                    Ok(info) => scheduler.on_head(&head, &info),
                                    Err(err) => {
                                        warn!(slot = head.slot, %err, "could not correlate head block")
                                    }
                                }
                            });
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let bids_task = {
            let mut bids =
                channels.bids.subscribe(Topic::ExecutionPayloadBid.channel_capacity());
            let scheduler = scheduler.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        bid = bids.recv() => {
                            let Some(bid) = bid else { break };
                            scheduler.on_bid_event(&bid);
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        // event ingestion goes live last so every consumer is already wired
        let demux_task = demux.spawn(shutdown_rx);

        Ok(ServiceHandle {
            shutdown: shutdown_tx,
            epbs_enabled,
            builder_api_enabled,
            tracker,
            demux: demux_task,
            builder: builder_task,
            scheduler: scheduler_task,
            heads: head_task,
            bids: bids_task,
            api_server: api_task,
        })
    }
}

fn parse_fee_recipient(address: &str) -> Result<ExecutionAddress, Error> {
    let address = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(address)
        .map_err(|err| Error::Config(format!("invalid `fee_recipient`: {err}")))?;
    ExecutionAddress::try_from(bytes.as_slice())
        .map_err(|err| Error::Config(format!("invalid `fee_recipient`: {err}")))
}

/// Handles to every spawned task. Resolves when any of them exits; dropping
/// or signaling shutdown winds the service down in reverse order.
#[pin_project::pin_project]
pub struct ServiceHandle {
    shutdown: watch::Sender<bool>,
    epbs_enabled: Arc<AtomicBool>,
    builder_api_enabled: Arc<AtomicBool>,
    tracker: Arc<BidTracker>,
    #[pin]
    demux: JoinHandle<()>,
    #[pin]
    builder: JoinHandle<()>,
    #[pin]
    scheduler: JoinHandle<()>,
    #[pin]
    heads: JoinHandle<()>,
    #[pin]
    bids: JoinHandle<()>,
    #[pin]
    api_server: JoinHandle<Result<(), Error>>,
}

impl ServiceHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn set_epbs_enabled(&self, enabled: bool) {
        self.epbs_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_builder_api_enabled(&self, enabled: bool) {
        self.builder_api_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Unconfirmed payments owed to proposers, in gwei.
    pub fn total_pending_payments(&self) -> u64 {
        self.tracker.total_pending_payments()
    }
}

impl Future for ServiceHandle {
    type Output = Result<(), JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let demux = this.demux.poll(cx);
        if demux.is_ready() {
            return demux
        }
        let builder = this.builder.poll(cx);
        if builder.is_ready() {
            return builder
        }
        let scheduler = this.scheduler.poll(cx);
        if scheduler.is_ready() {
            return scheduler
        }
        let heads = this.heads.poll(cx);
        if heads.is_ready() {
            return heads
        }
        let bids = this.bids.poll(cx);
        if bids.is_ready() {
            return bids
        }
        match this.api_server.poll(cx) {
            Poll::Ready(Ok(result)) => {
                if let Err(err) = result {
                    warn!(%err, "builder API server exited with error");
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}
