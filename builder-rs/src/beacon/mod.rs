mod client;
mod events;

pub use client::{BeaconClient, BlockBid, BlockInfo};
pub use events::{
    AttestationEvent, EnvelopeEvent, EventChannels, EventDemux, HeadEvent, PayloadAttributesEvent,
    Topic, TopicCounters,
};

use crate::types::{
    SignedBeaconBlockContents, SignedExecutionPayloadBid, SignedExecutionPayloadEnvelope,
};
use crate::Error;

/// Submission seams toward the beacon node, kept narrow so schedulers and
/// handlers can be exercised against mocks.
#[async_trait::async_trait]
pub trait SubmitBid: Send + Sync {
    async fn submit_bid(&self, bid: &SignedExecutionPayloadBid) -> Result<(), Error>;
}

#[async_trait::async_trait]
pub trait SubmitEnvelope: Send + Sync {
    async fn submit_envelope(&self, envelope: &SignedExecutionPayloadEnvelope)
        -> Result<(), Error>;
}

#[async_trait::async_trait]
pub trait PublishBlock: Send + Sync {
    async fn publish_block(&self, contents: &SignedBeaconBlockContents) -> Result<(), Error>;
}
