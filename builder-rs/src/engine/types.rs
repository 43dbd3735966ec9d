use crate::types::{
    BlobsBundle, ExecutionPayload, ExecutionRequest, ExecutionRequests,
    MAX_BYTES_PER_EXECUTION_REQUEST,
};
use ethereum_consensus::{
    bellatrix::mainnet::{Transaction, BYTES_PER_LOGS_BLOOM, MAX_EXTRA_DATA_BYTES, MAX_TRANSACTIONS_PER_PAYLOAD},
    capella::mainnet::Withdrawal,
    deneb::{
        mainnet::Blob,
        polynomial_commitments::{KzgCommitment, KzgProof},
    },
    primitives::{Bytes32, ExecutionAddress, Hash32},
    ssz::prelude::*,
};
use serde::{Deserialize, Serialize};

pub type PayloadId = ByteVector<8>;

pub const ENGINE_FORKCHOICE_UPDATED_V3: &str = "engine_forkchoiceUpdatedV3";
pub const ENGINE_GET_PAYLOAD_V3: &str = "engine_getPayloadV3";
pub const ENGINE_GET_PAYLOAD_V4: &str = "engine_getPayloadV4";
pub const ENGINE_GET_PAYLOAD_V5: &str = "engine_getPayloadV5";
pub const ENGINE_NEW_PAYLOAD_V3: &str = "engine_newPayloadV3";
pub const ENGINE_NEW_PAYLOAD_V4: &str = "engine_newPayloadV4";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalV1 {
    #[serde(with = "crate::serde::u64_hex")]
    pub index: u64,
    #[serde(with = "crate::serde::u64_hex")]
    pub validator_index: u64,
    pub address: ExecutionAddress,
    #[serde(with = "crate::serde::u64_hex")]
    pub amount: u64,
}

impl From<&Withdrawal> for WithdrawalV1 {
    fn from(withdrawal: &Withdrawal) -> Self {
        Self {
            index: withdrawal.index as u64,
            validator_index: withdrawal.validator_index as u64,
            address: withdrawal.address.clone(),
            amount: withdrawal.amount,
        }
    }
}

impl From<&WithdrawalV1> for Withdrawal {
    fn from(withdrawal: &WithdrawalV1) -> Self {
        Self {
            index: withdrawal.index as usize,
            validator_index: withdrawal.validator_index as usize,
            address: withdrawal.address.clone(),
            amount: withdrawal.amount,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceStateV1 {
    pub head_block_hash: Hash32,
    pub safe_block_hash: Hash32,
    pub finalized_block_hash: Hash32,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributesV3 {
    #[serde(with = "crate::serde::u64_hex")]
    pub timestamp: u64,
    pub prev_randao: Bytes32,
    pub suggested_fee_recipient: ExecutionAddress,
    // always present, even when empty
    pub withdrawals: Vec<WithdrawalV1>,
    pub parent_beacon_block_root: Hash32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadStatus {
    Valid,
    Invalid,
    Syncing,
    Accepted,
    InvalidBlockHash,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatusV1 {
    pub status: PayloadStatus,
    pub latest_valid_hash: Option<Hash32>,
    pub validation_error: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceUpdatedResponse {
    pub payload_status: PayloadStatusV1,
    pub payload_id: Option<PayloadId>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayloadV3 {
    pub parent_hash: Hash32,
    pub fee_recipient: ExecutionAddress,
    pub state_root: Bytes32,
    pub receipts_root: Bytes32,
    pub logs_bloom: ByteVector<BYTES_PER_LOGS_BLOOM>,
    pub prev_randao: Bytes32,
    #[serde(with = "crate::serde::u64_hex")]
    pub block_number: u64,
    #[serde(with = "crate::serde::u64_hex")]
    pub gas_limit: u64,
    #[serde(with = "crate::serde::u64_hex")]
    pub gas_used: u64,
    #[serde(with = "crate::serde::u64_hex")]
    pub timestamp: u64,
    pub extra_data: ByteList<MAX_EXTRA_DATA_BYTES>,
    #[serde(with = "crate::serde::u256_hex")]
    pub base_fee_per_gas: U256,
    pub block_hash: Hash32,
    pub transactions: List<Transaction, MAX_TRANSACTIONS_PER_PAYLOAD>,
    pub withdrawals: Vec<WithdrawalV1>,
    #[serde(with = "crate::serde::u64_hex")]
    pub blob_gas_used: u64,
    #[serde(with = "crate::serde::u64_hex")]
    pub excess_blob_gas: u64,
}

impl ExecutionPayloadV3 {
    /// Lift the wire payload into the consensus representation.
    pub fn into_execution_payload(self) -> Result<ExecutionPayload, crate::error::BuildError> {
        let withdrawals = self
            .withdrawals
            .iter()
            .map(Withdrawal::from)
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| {
                crate::error::BuildError::InvalidPayload("too many withdrawals".to_string())
            })?;
        Ok(ExecutionPayload {
            parent_hash: self.parent_hash,
            fee_recipient: self.fee_recipient,
            state_root: self.state_root,
            receipts_root: self.receipts_root,
            logs_bloom: self.logs_bloom,
            prev_randao: self.prev_randao,
            block_number: self.block_number,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            timestamp: self.timestamp,
            extra_data: self.extra_data,
            base_fee_per_gas: self.base_fee_per_gas,
            block_hash: self.block_hash,
            transactions: self.transactions,
            withdrawals,
            blob_gas_used: self.blob_gas_used,
            excess_blob_gas: self.excess_blob_gas,
        })
    }
}

/// Blob material as returned over the wire: opaque hex, validated into typed
/// KZG objects by `try_into_blobs_bundle`.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BlobsBundleV1 {
    pub commitments: Vec<String>,
    pub proofs: Vec<String>,
    pub blobs: Vec<String>,
}

impl BlobsBundleV1 {
    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty() && self.proofs.is_empty() && self.blobs.is_empty()
    }

    pub fn try_into_blobs_bundle(self) -> Result<BlobsBundle, crate::error::BuildError> {
        use crate::error::BuildError::InvalidPayload;

        let mut commitments = Vec::with_capacity(self.commitments.len());
        for commitment in &self.commitments {
            let bytes = decode_hex(commitment)?;
            let commitment = KzgCommitment::try_from(bytes.as_slice()).map_err(|_| {
                InvalidPayload(format!("kzg commitment must be 48 bytes, got {}", bytes.len()))
            })?;
            commitments.push(commitment);
        }
        let mut proofs = Vec::with_capacity(self.proofs.len());
        for proof in &self.proofs {
            let bytes = decode_hex(proof)?;
            let proof = KzgProof::try_from(bytes.as_slice()).map_err(|_| {
                InvalidPayload(format!("kzg proof must be 48 bytes, got {}", bytes.len()))
            })?;
            proofs.push(proof);
        }
        let mut blobs = Vec::with_capacity(self.blobs.len());
        for blob in &self.blobs {
            let bytes = decode_hex(blob)?;
            let blob = Blob::try_from(bytes.as_slice())
                .map_err(|_| InvalidPayload(format!("blob has invalid length {}", bytes.len())))?;
            blobs.push(blob);
        }

        let bundle = BlobsBundle {
            commitments: commitments
                .try_into()
                .map_err(|_| InvalidPayload("too many kzg commitments".to_string()))?,
            proofs: proofs
                .try_into()
                .map_err(|_| InvalidPayload("too many kzg proofs".to_string()))?,
            blobs: blobs.try_into().map_err(|_| InvalidPayload("too many blobs".to_string()))?,
        };
        if !bundle.is_coherent() {
            return Err(InvalidPayload(format!(
                "blobs bundle is not coherent: {} commitments, {} proofs, {} blobs",
                bundle.commitments.len(),
                bundle.proofs.len(),
                bundle.blobs.len()
            )))
        }
        Ok(bundle)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GetPayloadResponse {
    pub execution_payload: ExecutionPayloadV3,
    #[serde(with = "crate::serde::u256_hex")]
    pub block_value: U256,
    #[serde(default)]
    pub blobs_bundle: BlobsBundleV1,
    #[serde(default)]
    pub should_override_builder: bool,
    // V4+ only
    #[serde(default)]
    pub execution_requests: Option<Vec<String>>,
}

impl GetPayloadResponse {
    pub fn try_into_execution_requests(
        &self,
    ) -> Result<Option<ExecutionRequests>, crate::error::BuildError> {
        use crate::error::BuildError::InvalidPayload;

        let Some(requests) = self.execution_requests.as_ref() else { return Ok(None) };
        let mut decoded = Vec::with_capacity(requests.len());
        for request in requests {
            let bytes = decode_hex(request)?;
            if bytes.len() > MAX_BYTES_PER_EXECUTION_REQUEST {
                return Err(InvalidPayload(format!(
                    "execution request of {} bytes exceeds limit",
                    bytes.len()
                )))
            }
            let request = ExecutionRequest::try_from(bytes)
                .map_err(|_| InvalidPayload("invalid execution request".to_string()))?;
            decoded.push(request);
        }
        let requests = decoded
            .try_into()
            .map_err(|_| InvalidPayload("too many execution requests".to_string()))?;
        Ok(Some(requests))
    }
}

fn decode_hex(data: &str) -> Result<Vec<u8>, crate::error::BuildError> {
    let data = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(data)
        .map_err(|err| crate::error::BuildError::InvalidPayload(format!("invalid hex: {err}")))
}
