use crate::types::{ExecutionPayload, ExecutionRequests};
use ethereum_consensus::{
    primitives::{BlsSignature, Root, Slot},
    ssz::prelude::*,
};

/// The full payload reveal for a slot where this builder's bid was selected.
/// Keyed by the root of the beacon block that committed to the bid.
#[derive(Debug, Default, Clone, SimpleSerialize, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionPayloadEnvelope {
    pub payload: ExecutionPayload,
    pub execution_requests: ExecutionRequests,
    #[serde(with = "crate::serde::as_str")]
    pub builder_index: u64,
    pub beacon_block_root: Root,
    #[serde(with = "crate::serde::as_str")]
    pub slot: Slot,
    pub state_root: Root,
}

#[derive(Debug, Default, Clone, SimpleSerialize, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignedExecutionPayloadEnvelope {
    pub message: ExecutionPayloadEnvelope,
    pub signature: BlsSignature,
}

/// How the execution payload reaches the chain for a given fork: embedded in
/// the signed beacon block (Electra, Fulu), or revealed separately against
/// the committed beacon block root (Gloas).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEnvelopeForm {
    EmbeddedInBlock,
    StandaloneReveal { beacon_block_root: Root },
}
