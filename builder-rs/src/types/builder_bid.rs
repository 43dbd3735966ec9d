use crate::types::{ExecutionPayloadHeader, ExecutionRequests};
use ethereum_consensus::{
    deneb::{mainnet::MAX_BLOB_COMMITMENTS_PER_BLOCK, polynomial_commitments::KzgCommitment},
    primitives::{BlsPublicKey, BlsSignature},
    ssz::prelude::*,
};
use std::fmt;

/// The consensus version advertised alongside header responses.
pub const CONSENSUS_VERSION: &str = "fulu";

#[derive(Debug, Clone, SimpleSerialize, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BuilderBid {
    pub header: ExecutionPayloadHeader,
    pub blob_kzg_commitments: List<KzgCommitment, MAX_BLOB_COMMITMENTS_PER_BLOCK>,
    pub execution_requests: ExecutionRequests,
    #[serde(with = "crate::serde::as_str")]
    pub value: U256,
    #[serde(rename = "pubkey")]
    pub public_key: BlsPublicKey,
}

#[derive(Debug, Clone, SimpleSerialize, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignedBuilderBid {
    pub message: BuilderBid,
    pub signature: BlsSignature,
}

impl fmt::Display for SignedBuilderBid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let block_hash = &self.message.header.block_hash;
        let value = self.message.value;
        write!(f, "block hash {block_hash} and value {value}")
    }
}

/// Response envelope for versioned builder API data.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct VersionedResponse<T> {
    pub version: String,
    pub data: T,
}
