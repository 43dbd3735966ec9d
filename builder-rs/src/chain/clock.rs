use ethereum_consensus::primitives::{Epoch, Slot};
use std::time::{SystemTime, UNIX_EPOCH};

/// Genesis-anchored slot arithmetic, all in unix milliseconds. Pure: no I/O,
/// no shared state.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    genesis_time_ms: u64,
    slot_duration_ms: u64,
    slots_per_epoch: u64,
}

impl Clock {
    pub fn new(genesis_time_ms: u64, slot_duration_ms: u64, slots_per_epoch: u64) -> Self {
        Self { genesis_time_ms, slot_duration_ms, slots_per_epoch }
    }

    pub fn slot_duration_ms(&self) -> u64 {
        self.slot_duration_ms
    }

    /// Slot containing `time_ms`; 0 before genesis.
    pub fn slot_at(&self, time_ms: u64) -> Slot {
        if time_ms < self.genesis_time_ms {
            return 0
        }
        (time_ms - self.genesis_time_ms) / self.slot_duration_ms
    }

    pub fn slot_start_ms(&self, slot: Slot) -> u64 {
        self.genesis_time_ms + slot * self.slot_duration_ms
    }

    /// Signed offset of `time_ms` into `slot`; negative when `slot` has not
    /// started yet.
    pub fn ms_into_slot(&self, time_ms: u64, slot: Slot) -> i64 {
        time_ms as i64 - self.slot_start_ms(slot) as i64
    }

    pub fn epoch_at(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    pub fn current_slot(&self) -> Slot {
        self.slot_at(unix_time_ms())
    }
}

pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
