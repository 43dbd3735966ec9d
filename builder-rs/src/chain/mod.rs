mod clock;
mod duties;
mod spec;

pub use clock::{unix_time_ms, Clock};
pub use duties::ProposerDuties;
pub use spec::{ChainSpec, Fork, FAR_FUTURE_EPOCH};
