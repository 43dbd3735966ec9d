mod bidder;
mod reveal;
mod scheduler;
mod tracker;

pub use bidder::{bid_value, create_signed_bid};
pub use reveal::create_signed_envelope;
pub use scheduler::{Scheduler, SlotPhase, SlotState, SLOT_STATE_RETENTION, TICK_INTERVAL};
pub use tracker::{BidTracker, SlotBids, TrackedBid, WonBid};
