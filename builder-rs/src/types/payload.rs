use crate::types::ExecutionRequests;
use ethereum_consensus::{
    deneb::{
        mainnet::{Blob, MAX_BLOB_COMMITMENTS_PER_BLOCK},
        polynomial_commitments::{KzgCommitment, KzgProof},
    },
    primitives::{ExecutionAddress, Hash32, Root, Slot},
    ssz::prelude::*,
    Error,
};

pub use ethereum_consensus::deneb::mainnet::{ExecutionPayload, ExecutionPayloadHeader};

pub const WEI_PER_GWEI: u128 = 1_000_000_000;

#[derive(Clone, Debug, Default, SimpleSerialize, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlobsBundle {
    pub commitments: List<KzgCommitment, MAX_BLOB_COMMITMENTS_PER_BLOCK>,
    pub proofs: List<KzgProof, MAX_BLOB_COMMITMENTS_PER_BLOCK>,
    pub blobs: List<Blob, MAX_BLOB_COMMITMENTS_PER_BLOCK>,
}

impl BlobsBundle {
    // Commitments, proofs and blobs are parallel sequences.
    pub fn is_coherent(&self) -> bool {
        self.commitments.len() == self.proofs.len() && self.proofs.len() == self.blobs.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSource {
    Block,
    Payload,
}

/// A payload constructed by the local execution client, ready to be bid on,
/// revealed, or served to a proposer over the builder API.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PayloadReady {
    #[serde(with = "crate::serde::as_str")]
    pub slot: Slot,
    pub parent_block_root: Root,
    pub parent_block_hash: Hash32,
    pub block_hash: Hash32,
    pub payload: ExecutionPayload,
    pub blobs_bundle: Option<BlobsBundle>,
    pub execution_requests: Option<ExecutionRequests>,
    pub fee_recipient: ExecutionAddress,
    #[serde(with = "crate::serde::as_str")]
    pub gas_limit: u64,
    #[serde(with = "crate::serde::as_str")]
    pub block_value: U256,
    pub source: BuildSource,
    #[serde(with = "crate::serde::as_str")]
    pub build_requested_at: u64,
    #[serde(with = "crate::serde::as_str")]
    pub ready_at: u64,
}

impl PayloadReady {
    pub fn block_value_gwei(&self) -> u64 {
        wei_to_gwei(&self.block_value)
    }

    pub fn transaction_count(&self) -> usize {
        self.payload.transactions.len()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs_bundle.as_ref().map(|bundle| bundle.blobs.len()).unwrap_or(0)
    }

    pub fn blob_kzg_commitments_root(&self) -> Result<Root, Error> {
        match self.blobs_bundle.as_ref() {
            Some(bundle) => {
                let mut commitments = bundle.commitments.clone();
                Ok(commitments.hash_tree_root()?)
            }
            None => {
                let mut commitments =
                    List::<KzgCommitment, MAX_BLOB_COMMITMENTS_PER_BLOCK>::default();
                Ok(commitments.hash_tree_root()?)
            }
        }
    }
}

pub fn u256_to_u128_saturating(value: &U256) -> u128 {
    let bytes = value.to_bytes_le();
    if bytes[16..].iter().any(|b| *b != 0) {
        return u128::MAX
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[..16]);
    u128::from_le_bytes(low)
}

pub fn u256_from_u128(value: u128) -> U256 {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(&value.to_le_bytes());
    U256::from_bytes_le(bytes)
}

pub fn wei_to_gwei(value: &U256) -> u64 {
    (u256_to_u128_saturating(value) / WEI_PER_GWEI).min(u64::MAX as u128) as u64
}

pub fn gwei_to_wei(value: u64) -> U256 {
    u256_from_u128(value as u128 * WEI_PER_GWEI)
}

/// Derives the header committed to by builder bids from a full payload.
pub fn execution_payload_header(
    payload: &mut ExecutionPayload,
) -> Result<ExecutionPayloadHeader, Error> {
    let transactions_root = payload.transactions.hash_tree_root()?;
    let withdrawals_root = payload.withdrawals.hash_tree_root()?;
    Ok(ExecutionPayloadHeader {
        parent_hash: payload.parent_hash.clone(),
        fee_recipient: payload.fee_recipient.clone(),
        state_root: payload.state_root.clone(),
        receipts_root: payload.receipts_root.clone(),
        logs_bloom: payload.logs_bloom.clone(),
        prev_randao: payload.prev_randao.clone(),
        block_number: payload.block_number,
        gas_limit: payload.gas_limit,
        gas_used: payload.gas_used,
        timestamp: payload.timestamp,
        extra_data: payload.extra_data.clone(),
        base_fee_per_gas: payload.base_fee_per_gas,
        block_hash: payload.block_hash.clone(),
        transactions_root,
        withdrawals_root,
        blob_gas_used: payload.blob_gas_used,
        excess_blob_gas: payload.excess_blob_gas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gwei_wei_round_trip() {
        for gwei in [0u64, 1, 500_000, 1_000_000, u32::MAX as u64] {
            assert_eq!(wei_to_gwei(&gwei_to_wei(gwei)), gwei);
        }
    }

    #[test]
    fn test_wei_to_gwei_truncates_sub_gwei() {
        assert_eq!(wei_to_gwei(&U256::from(999_999_999u64)), 0);
        assert_eq!(wei_to_gwei(&U256::from(1_999_999_999u64)), 1);
    }

    #[test]
    fn test_blobs_bundle_coherence() {
        let bundle = BlobsBundle::default();
        assert!(bundle.is_coherent());
        let lopsided = BlobsBundle {
            commitments: vec![KzgCommitment::default()].try_into().unwrap(),
            ..Default::default()
        };
        assert!(!lopsided.is_coherent());
        let full = BlobsBundle {
            commitments: vec![KzgCommitment::default()].try_into().unwrap(),
            proofs: vec![KzgProof::default()].try_into().unwrap(),
            blobs: vec![Blob::default()].try_into().unwrap(),
        };
        assert!(full.is_coherent());
    }

    #[test]
    fn test_header_commits_to_payload_contents() {
        let mut payload = ExecutionPayload {
            block_number: 42,
            gas_limit: 30_000_000,
            base_fee_per_gas: U256::from(7u64),
            ..Default::default()
        };
        let header = execution_payload_header(&mut payload).unwrap();
        assert_eq!(header.block_number, payload.block_number);
        assert_eq!(header.gas_limit, payload.gas_limit);
        assert_eq!(header.transactions_root, payload.transactions.hash_tree_root().unwrap());
        assert_eq!(header.withdrawals_root, payload.withdrawals.hash_tree_root().unwrap());
    }
}
