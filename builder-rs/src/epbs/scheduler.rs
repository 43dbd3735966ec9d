use crate::{
    beacon::{BlockInfo, HeadEvent, SubmitBid, SubmitEnvelope},
    chain::{ChainSpec, Clock},
    config::{BidScheduleConfig, EpbsTimingConfig},
    epbs::{
        bidder::{bid_value, create_signed_bid},
        reveal::create_signed_envelope,
        tracker::{BidTracker, TrackedBid},
    },
    payload::PayloadCache,
    signing::Signer,
    types::SignedExecutionPayloadBid,
};
use ethereum_consensus::primitives::{Hash32, Root, Slot};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const TICK_INTERVAL: Duration = Duration::from_millis(10);
pub const SLOT_STATE_RETENTION: u64 = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotPhase {
    #[default]
    Idle,
    Bidding,
    BlockReceived,
    WinnerOurs,
    WinnerOther,
    Revealed,
    Closed,
}

#[derive(Debug, Default)]
pub struct SlotState {
    pub phase: SlotPhase,
    pub last_bid_time_ms: Option<u64>,
    pub last_bid_hash: Option<Hash32>,
    pub bid_count: u64,
    pub bids_closed: bool,
    pub bid_included: bool,
    pub included_in_block: Option<Root>,
    pub revealed: bool,
}

/// Per-slot real-time driver for the ePBS protocol: submits signed bids in
/// the configured window and reveals the payload envelope once our bid has
/// been observed in the canonical block.
pub struct Scheduler {
    timing: EpbsTimingConfig,
    schedule: BidScheduleConfig,
    clock: Clock,
    spec: Arc<ChainSpec>,
    signer: Arc<Signer>,
    cache: Arc<PayloadCache>,
    tracker: Arc<BidTracker>,
    bids: Arc<dyn SubmitBid>,
    envelopes: Arc<dyn SubmitEnvelope>,
    enabled: Arc<AtomicBool>,
    states: Mutex<HashMap<Slot, SlotState>>,
    last_pruned_slot: Mutex<Slot>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timing: EpbsTimingConfig,
        schedule: BidScheduleConfig,
        spec: Arc<ChainSpec>,
        signer: Arc<Signer>,
        cache: Arc<PayloadCache>,
        tracker: Arc<BidTracker>,
        bids: Arc<dyn SubmitBid>,
        envelopes: Arc<dyn SubmitEnvelope>,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            timing,
            schedule,
            clock: spec.clock(),
            spec,
            signer,
            cache,
            tracker,
            bids,
            envelopes,
            enabled,
            states: Mutex::new(HashMap::new()),
            last_pruned_slot: Mutex::new(0),
        }
    }

    pub fn builder_index(&self) -> u64 {
        self.timing.builder_index
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(TICK_INTERVAL);
            // a late tick coalesces instead of bursting to catch up
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticks.tick() => self.on_tick(crate::chain::unix_time_ms()).await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// One scheduler tick at wall-clock `now_ms`. Split out from the tick
    /// loop so slot scenarios can be driven with synthetic timestamps.
    pub async fn on_tick(&self, now_ms: u64) {
        if !self.enabled.load(Ordering::Relaxed) {
            return
        }
        let current_slot = self.clock.slot_at(now_ms);
        // the next slot is in scope so negative start offsets (e.g. -1000 ms)
        // open its bidding window before the slot begins
        for slot in [current_slot, current_slot + 1] {
            let tau = self.clock.ms_into_slot(now_ms, slot);
            self.check_bidding(slot, tau, now_ms).await;
        }
        self.check_reveal(current_slot, self.clock.ms_into_slot(now_ms, current_slot)).await;
        if current_slot > 0 {
            let previous = current_slot - 1;
            let tau = self.clock.ms_into_slot(now_ms, previous);
            if self.timing.reveal_time >= self.clock.slot_duration_ms() as i64 {
                self.check_reveal(previous, tau).await;
            }
        }
        self.prune(current_slot);
    }

    async fn check_bidding(&self, slot: Slot, tau: i64, now_ms: u64) {
        if tau < self.timing.bid_start_time || tau >= self.timing.bid_end_time {
            return
        }
        if !self.schedule.should_bid(slot) {
            return
        }
        let Some(payload) = self.cache.get_by_slot(slot) else { return };

        let value = {
            let mut states = self.states.lock();
            let state = states.entry(slot).or_default();
            if state.bids_closed || state.bid_included {
                return
            }
            if self.timing.bid_interval > 0 {
                if let Some(last) = state.last_bid_time_ms {
                    if now_ms.saturating_sub(last) < self.timing.bid_interval {
                        return
                    }
                }
            } else if state.bid_count > 0
                && state.last_bid_hash.as_ref() == Some(&payload.block_hash)
            {
                // single-bid mode: one bid per (slot, block hash); a payload
                // rebuilt with a new hash re-opens the window
                return
            }
            let value = bid_value(
                self.timing.bid_min_amount,
                self.timing.bid_increase,
                self.timing.bid_interval,
                state.bid_count,
                payload.block_value_gwei(),
            );
            state.last_bid_time_ms = Some(now_ms);
            state.last_bid_hash = Some(payload.block_hash.clone());
            state.bid_count += 1;
            state.phase = SlotPhase::Bidding;
            value
        };

        let signed_bid = match create_signed_bid(
            &payload,
            value,
            self.timing.builder_index,
            &self.signer,
            &self.spec,
        ) {
            Ok(signed_bid) => signed_bid,
            Err(err) => {
                warn!(slot, %err, "could not sign bid");
                self.roll_back_bid(slot);
                return
            }
        };
        match self.bids.submit_bid(&signed_bid).await {
            Ok(()) => {
                info!(
                    slot,
                    value,
                    block_hash = %signed_bid.message.block_hash,
                    count = self.bid_count(slot),
                    "bid submitted"
                );
                self.tracker.track_bid(
                    slot,
                    TrackedBid {
                        builder_index: self.timing.builder_index,
                        value,
                        block_hash: signed_bid.message.block_hash.clone(),
                    },
                    true,
                );
            }
            Err(err) => {
                warn!(slot, %err, "could not submit bid");
                self.roll_back_bid(slot);
            }
        }
    }

    fn roll_back_bid(&self, slot: Slot) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(&slot) {
            state.bid_count = state.bid_count.saturating_sub(1);
            state.last_bid_hash = None;
            state.last_bid_time_ms = None;
        }
    }

    async fn check_reveal(&self, slot: Slot, tau: i64) {
        if tau < self.timing.reveal_time {
            return
        }
        let beacon_block_root = {
            let mut states = self.states.lock();
            let Some(state) = states.get_mut(&slot) else { return };
            if !state.bid_included || state.revealed {
                return
            }
            let Some(root) = state.included_in_block else { return };
            // marked before the submission completes so overlapping ticks do
            // not double-submit; rolled back on failure
            state.revealed = true;
            root
        };
        let Some(payload) = self.cache.get_by_slot(slot) else {
            warn!(slot, "bid included but payload no longer cached; cannot reveal");
            return
        };
        let envelope = match create_signed_envelope(
            &payload,
            self.timing.builder_index,
            beacon_block_root,
            &self.signer,
            &self.spec,
        ) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(slot, %err, "could not sign payload envelope");
                self.roll_back_reveal(slot);
                return
            }
        };
        match self.envelopes.submit_envelope(&envelope).await {
            Ok(()) => {
                info!(slot, beacon_block_root = %crate::serde::root_hex(&beacon_block_root), "payload revealed");
                let mut states = self.states.lock();
                if let Some(state) = states.get_mut(&slot) {
                    state.phase = SlotPhase::Revealed;
                }
            }
            Err(err) => {
                warn!(slot, %err, "could not submit payload envelope");
                self.roll_back_reveal(slot);
            }
        }
    }

    fn roll_back_reveal(&self, slot: Slot) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(&slot) {
            state.revealed = false;
        }
    }

    /// Correlates a canonical block with our own bids: closes the bidding
    /// window for its slot and, when the block committed to one of our cached
    /// payloads, unlocks the reveal.
    pub fn on_head(&self, head: &HeadEvent, info: &BlockInfo) {
        let slot = info.slot;
        let ours = info
            .committed_block_hash()
            .and_then(|hash| self.cache.get_by_block_hash(hash))
            .map(|entry| entry.slot == slot)
            .unwrap_or(false);
        {
            let mut states = self.states.lock();
            let state = states.entry(slot).or_default();
            state.bids_closed = true;
            if ours {
                state.bid_included = true;
                state.included_in_block = Some(head.block);
                state.phase = SlotPhase::WinnerOurs;
            } else if info.committed_block_hash().is_some() {
                state.phase = SlotPhase::WinnerOther;
            } else {
                state.phase = SlotPhase::BlockReceived;
            }
        }
        if let Some(bid) = &info.bid {
            self.tracker.mark_winning(slot, bid.builder_index);
        }
        debug!(slot, ours, "head correlated");
    }

    /// A bid gossiped by the network. Our own bids echoing back are noted and
    /// otherwise ignored.
    pub fn on_bid_event(&self, bid: &SignedExecutionPayloadBid) {
        let message = &bid.message;
        let is_ours = message.builder_index == self.timing.builder_index;
        if is_ours {
            debug!(slot = message.slot, value = message.value, "observed our own bid on the network");
        }
        self.tracker.track_bid(
            message.slot,
            TrackedBid {
                builder_index: message.builder_index,
                value: message.value,
                block_hash: message.block_hash.clone(),
            },
            is_ours,
        );
    }

    pub fn slot_phase(&self, slot: Slot) -> SlotPhase {
        self.states.lock().get(&slot).map(|state| state.phase).unwrap_or_default()
    }

    pub fn bid_count(&self, slot: Slot) -> u64 {
        self.states.lock().get(&slot).map(|state| state.bid_count).unwrap_or(0)
    }

    fn prune(&self, current_slot: Slot) {
        let mut last_pruned = self.last_pruned_slot.lock();
        if current_slot == *last_pruned {
            return
        }
        *last_pruned = current_slot;
        drop(last_pruned);
        let cutoff = current_slot.saturating_sub(SLOT_STATE_RETENTION);
        let mut states = self.states.lock();
        states.retain(|slot, _| *slot >= cutoff);
        drop(states);
        self.tracker.cleanup(cutoff);
    }
}
