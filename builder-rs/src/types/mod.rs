mod bid;
mod blinded_block;
pub mod builder_bid;
mod envelope;
mod payload;

pub use bid::*;
pub use blinded_block::*;
pub use builder_bid::{BuilderBid, SignedBuilderBid};
pub use envelope::*;
pub use ethereum_consensus::builder::{SignedValidatorRegistration, ValidatorRegistration};
pub use payload::*;

use ethereum_consensus::ssz::prelude::*;

// Requests produced by `engine_getPayloadV4`+ are carried as opaque byte
// strings; the builder forwards them without interpreting their contents.
pub const MAX_EXECUTION_REQUESTS_PER_PAYLOAD: usize = 16;
pub const MAX_BYTES_PER_EXECUTION_REQUEST: usize = 65536;

pub type ExecutionRequest = ByteList<MAX_BYTES_PER_EXECUTION_REQUEST>;
pub type ExecutionRequests = List<ExecutionRequest, MAX_EXECUTION_REQUESTS_PER_PAYLOAD>;
