mod bids_won;
mod server;
mod unblind;
mod validator_registry;

pub use bids_won::{BidWonEntry, BidsWonStore, BIDS_WON_CAPACITY};
pub use server::{router, BuilderApiState, HeaderRequest, Server};
pub use unblind::unblind_signed_block;
pub use validator_registry::ValidatorRegistry;
