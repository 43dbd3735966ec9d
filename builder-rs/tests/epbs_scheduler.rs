use builder_rs::{
    beacon::{BlockBid, BlockInfo, HeadEvent, SubmitBid, SubmitEnvelope},
    chain::ChainSpec,
    epbs::{BidTracker, Scheduler, SlotPhase},
    payload::PayloadCache,
    signing::Signer,
    types::{
        gwei_to_wei, BuildSource, ExecutionPayload, PayloadReady, SignedExecutionPayloadBid,
        SignedExecutionPayloadEnvelope,
    },
    BidScheduleConfig, EpbsTimingConfig, Error,
};
use ethereum_consensus::{
    crypto::SecretKey,
    primitives::{ExecutionAddress, Hash32, Root, Version},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{atomic::AtomicBool, Arc},
};
use tokio::sync::watch;

#[derive(Default)]
struct MockEndpoint {
    bids: Mutex<Vec<SignedExecutionPayloadBid>>,
    envelopes: Mutex<Vec<SignedExecutionPayloadEnvelope>>,
}

#[async_trait::async_trait]
impl SubmitBid for MockEndpoint {
    async fn submit_bid(&self, bid: &SignedExecutionPayloadBid) -> Result<(), Error> {
        self.bids.lock().push(bid.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubmitEnvelope for MockEndpoint {
    async fn submit_envelope(
        &self,
        envelope: &SignedExecutionPayloadEnvelope,
    ) -> Result<(), Error> {
        self.envelopes.lock().push(envelope.clone());
        Ok(())
    }
}

// genesis at t=0 with 12 s slots, matching the scenario timings below
fn test_spec() -> ChainSpec {
    ChainSpec::from_config(0, Root::default(), Version::default(), &HashMap::new()).unwrap()
}

fn timing() -> EpbsTimingConfig {
    EpbsTimingConfig {
        build_start_time: -3000,
        bid_start_time: -1000,
        bid_end_time: 1000,
        reveal_time: 6000,
        bid_min_amount: 1_000_000,
        bid_increase: 0,
        bid_interval: 0,
        builder_index: 42,
    }
}

fn cached_payload(slot: u64, hash_byte: u8, value_gwei: u64) -> PayloadReady {
    let payload = ExecutionPayload {
        block_hash: Hash32::try_from([hash_byte; 32].as_ref()).unwrap(),
        gas_limit: 30_000_000,
        ..Default::default()
    };
    PayloadReady {
        slot,
        parent_block_root: Root::default(),
        parent_block_hash: Default::default(),
        block_hash: payload.block_hash.clone(),
        payload,
        blobs_bundle: None,
        execution_requests: None,
        fee_recipient: ExecutionAddress::try_from([9u8; 20].as_ref()).unwrap(),
        gas_limit: 30_000_000,
        block_value: gwei_to_wei(value_gwei),
        source: BuildSource::Payload,
        build_requested_at: 0,
        ready_at: 0,
    }
}

struct Harness {
    scheduler: Arc<Scheduler>,
    endpoint: Arc<MockEndpoint>,
    cache: Arc<PayloadCache>,
    tracker: Arc<BidTracker>,
}

fn harness(timing: EpbsTimingConfig) -> Harness {
    let spec = Arc::new(test_spec());
    let signer = Arc::new(Signer::new(SecretKey::try_from([1u8; 32].as_slice()).unwrap()));
    let cache = Arc::new(PayloadCache::new(100));
    let tracker = Arc::new(BidTracker::new());
    let endpoint = Arc::new(MockEndpoint::default());
    let scheduler = Arc::new(Scheduler::new(
        timing,
        BidScheduleConfig::default(),
        spec,
        signer,
        cache.clone(),
        tracker.clone(),
        endpoint.clone(),
        endpoint.clone(),
        Arc::new(AtomicBool::new(true)),
    ));
    Harness { scheduler, endpoint, cache, tracker }
}

fn head_won_by(builder_index: u64, slot: u64, hash_byte: u8, value: u64) -> (HeadEvent, BlockInfo) {
    let head = HeadEvent {
        slot,
        block: Root::try_from([0x77u8; 32].as_ref()).unwrap(),
        state: Root::default(),
        epoch_transition: false,
    };
    let info = BlockInfo {
        slot,
        execution_block_hash: None,
        bid: Some(BlockBid {
            block_hash: Hash32::try_from([hash_byte; 32].as_ref()).unwrap(),
            builder_index,
            value,
        }),
    };
    (head, info)
}

#[tokio::test]
async fn test_epbs_bid_win_reveal_happy_path() {
    let harness = harness(timing());

    // payload for slot 5 lands at t=58s with a 500k gwei block value
    harness.cache.store(cached_payload(5, 0xaa, 500_000));

    // one millisecond before the window opens: nothing happens
    harness.scheduler.on_tick(58_999).await;
    assert!(harness.endpoint.bids.lock().is_empty());

    // window opens 1 s before slot 5 starts
    harness.scheduler.on_tick(59_000).await;
    {
        let bids = harness.endpoint.bids.lock();
        assert_eq!(bids.len(), 1);
        let message = &bids[0].message;
        assert_eq!(message.slot, 5);
        assert_eq!(message.builder_index, 42);
        // bid floor dominates the payload's own value
        assert_eq!(message.value, 1_000_000);
    }
    assert_eq!(harness.scheduler.slot_phase(5), SlotPhase::Bidding);

    // single-bid mode: further ticks in the window do not re-bid
    for now_ms in [59_010, 59_500, 60_000, 60_400] {
        harness.scheduler.on_tick(now_ms).await;
    }
    assert_eq!(harness.endpoint.bids.lock().len(), 1);

    // head arrives mid-slot carrying our payload's hash
    let (head, info) = head_won_by(42, 5, 0xaa, 1_000_000);
    harness.scheduler.on_head(&head, &info);
    assert_eq!(harness.scheduler.slot_phase(5), SlotPhase::WinnerOurs);
    assert_eq!(harness.tracker.total_pending_payments(), 1_000_000);

    // before reveal time: no envelope
    harness.scheduler.on_tick(65_990).await;
    assert!(harness.endpoint.envelopes.lock().is_empty());

    // reveal fires 6 s into slot 5
    harness.scheduler.on_tick(66_000).await;
    {
        let envelopes = harness.endpoint.envelopes.lock();
        assert_eq!(envelopes.len(), 1);
        let message = &envelopes[0].message;
        assert_eq!(message.slot, 5);
        assert_eq!(message.builder_index, 42);
        assert_eq!(message.beacon_block_root, head.block);
    }
    assert_eq!(harness.scheduler.slot_phase(5), SlotPhase::Revealed);

    // the envelope is submitted exactly once
    harness.scheduler.on_tick(66_010).await;
    assert_eq!(harness.endpoint.envelopes.lock().len(), 1);

    // pending payment clears once the won bid is confirmed
    harness.tracker.confirm_won_bid(5);
    assert_eq!(harness.tracker.total_pending_payments(), 0);
}

#[tokio::test]
async fn test_bid_window_closes_without_payload() {
    let harness = harness(timing());
    // no cached payload for slot 5
    harness.scheduler.on_tick(59_500).await;
    harness.scheduler.on_tick(60_500).await;
    assert!(harness.endpoint.bids.lock().is_empty());
    assert_eq!(harness.scheduler.slot_phase(5), SlotPhase::Idle);
}

#[tokio::test]
async fn test_lost_auction_never_reveals() {
    let harness = harness(timing());
    harness.cache.store(cached_payload(5, 0xaa, 500_000));
    harness.scheduler.on_tick(59_000).await;
    assert_eq!(harness.endpoint.bids.lock().len(), 1);

    // another builder's payload was selected
    let (head, info) = head_won_by(7, 5, 0xbb, 2_000_000);
    harness.tracker.track_bid(
        5,
        builder_rs::epbs::TrackedBid {
            builder_index: 7,
            value: 2_000_000,
            block_hash: Hash32::try_from([0xbbu8; 32].as_ref()).unwrap(),
        },
        false,
    );
    harness.scheduler.on_head(&head, &info);
    assert_eq!(harness.scheduler.slot_phase(5), SlotPhase::WinnerOther);
    assert_eq!(harness.tracker.total_pending_payments(), 0);

    // bidding is closed for the slot and no reveal ever fires
    harness.scheduler.on_tick(60_900).await;
    assert_eq!(harness.endpoint.bids.lock().len(), 1);
    harness.scheduler.on_tick(66_000).await;
    assert!(harness.endpoint.envelopes.lock().is_empty());
}

#[tokio::test]
async fn test_interval_mode_escalates_bids() {
    let mut timing = timing();
    timing.bid_interval = 500;
    timing.bid_increase = 50_000;
    let harness = harness(timing);
    harness.cache.store(cached_payload(5, 0xaa, 0));

    harness.scheduler.on_tick(59_000).await;
    harness.scheduler.on_tick(59_200).await; // below the interval: skipped
    harness.scheduler.on_tick(59_500).await;
    harness.scheduler.on_tick(60_000).await;

    let bids = harness.endpoint.bids.lock();
    let values: Vec<u64> = bids.iter().map(|bid| bid.message.value).collect();
    assert_eq!(values, vec![1_000_000, 1_050_000, 1_100_000]);
}

#[tokio::test]
async fn test_single_bid_mode_rebids_on_new_block_hash() {
    let harness = harness(timing());
    harness.cache.store(cached_payload(5, 0xaa, 500_000));
    harness.scheduler.on_tick(59_000).await;
    assert_eq!(harness.endpoint.bids.lock().len(), 1);

    // the payload was rebuilt with a different block hash mid-window
    harness.cache.store(cached_payload(5, 0xcc, 600_000));
    harness.scheduler.on_tick(59_200).await;
    let bids = harness.endpoint.bids.lock();
    assert_eq!(bids.len(), 2);
    assert_eq!(
        bids[1].message.block_hash,
        Hash32::try_from([0xccu8; 32].as_ref()).unwrap()
    );
}

#[tokio::test]
async fn test_disabled_scheduler_is_inert() {
    let spec = Arc::new(test_spec());
    let signer = Arc::new(Signer::new(SecretKey::try_from([1u8; 32].as_slice()).unwrap()));
    let cache = Arc::new(PayloadCache::new(100));
    let tracker = Arc::new(BidTracker::new());
    let endpoint = Arc::new(MockEndpoint::default());
    let scheduler = Arc::new(Scheduler::new(
        timing(),
        BidScheduleConfig::default(),
        spec,
        signer,
        cache.clone(),
        tracker,
        endpoint.clone(),
        endpoint.clone(),
        Arc::new(AtomicBool::new(false)),
    ));
    cache.store(cached_payload(5, 0xaa, 500_000));
    scheduler.on_tick(59_000).await;
    assert!(endpoint.bids.lock().is_empty());
}

#[tokio::test]
async fn test_scheduler_tick_loop_runs_against_wall_clock() {
    // the spawned loop ticks with real time; with genesis at unix epoch the
    // current slot is far in the future and no payload exists, so this just
    // exercises startup and shutdown of the tick task
    let harness = harness(timing());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = harness.scheduler.clone().spawn(shutdown_rx);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert!(harness.endpoint.bids.lock().is_empty());
}
