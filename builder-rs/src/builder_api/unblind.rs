use crate::{
    error::BuilderApiError,
    types::{
        BeaconBlock, BeaconBlockBody, PayloadReady, SignedBeaconBlock, SignedBlindedBeaconBlock,
    },
};

/// Reconstructs the full signed block from a proposer-signed blinded block
/// and the matching cached payload. Every non-payload field is carried over
/// untouched; any structural disagreement between the committed header and
/// the cached payload aborts the unblind.
pub fn unblind_signed_block(
    blinded: &SignedBlindedBeaconBlock,
    entry: &PayloadReady,
) -> Result<SignedBeaconBlock, BuilderApiError> {
    let block = &blinded.message;
    let body = &block.body;
    let header = &body.execution_payload_header;

    if header.block_hash != entry.block_hash {
        return Err(BuilderApiError::UnblindMismatch(format!(
            "header block hash {} does not match cached payload {}",
            header.block_hash, entry.block_hash
        )))
    }
    if header.parent_hash != entry.payload.parent_hash {
        return Err(BuilderApiError::UnblindMismatch(format!(
            "header parent hash {} does not match cached payload {}",
            header.parent_hash, entry.payload.parent_hash
        )))
    }

    let mut transactions = entry.payload.transactions.clone();
    let transactions_root = transactions
        .hash_tree_root()
        .map_err(|err| BuilderApiError::UnblindMismatch(err.to_string()))?;
    if header.transactions_root != transactions_root {
        return Err(BuilderApiError::UnblindMismatch(
            "header transactions root does not match cached payload".to_string(),
        ))
    }
    let mut withdrawals = entry.payload.withdrawals.clone();
    let withdrawals_root = withdrawals
        .hash_tree_root()
        .map_err(|err| BuilderApiError::UnblindMismatch(err.to_string()))?;
    if header.withdrawals_root != withdrawals_root {
        return Err(BuilderApiError::UnblindMismatch(
            "header withdrawals root does not match cached payload".to_string(),
        ))
    }

    let cached_commitments = entry
        .blobs_bundle
        .as_ref()
        .map(|bundle| bundle.commitments.clone())
        .unwrap_or_default();
    if body.blob_kzg_commitments != cached_commitments {
        return Err(BuilderApiError::UnblindMismatch(
            "blob kzg commitments do not match cached blobs bundle".to_string(),
        ))
    }

    let body = BeaconBlockBody {
        randao_reveal: body.randao_reveal.clone(),
        eth1_data: body.eth1_data.clone(),
        graffiti: body.graffiti.clone(),
        proposer_slashings: body.proposer_slashings.clone(),
        attester_slashings: body.attester_slashings.clone(),
        attestations: body.attestations.clone(),
        deposits: body.deposits.clone(),
        voluntary_exits: body.voluntary_exits.clone(),
        sync_aggregate: body.sync_aggregate.clone(),
        execution_payload: entry.payload.clone(),
        bls_to_execution_changes: body.bls_to_execution_changes.clone(),
        blob_kzg_commitments: body.blob_kzg_commitments.clone(),
        execution_requests: body.execution_requests.clone(),
    };
    let message = BeaconBlock {
        slot: block.slot,
        proposer_index: block.proposer_index,
        parent_root: block.parent_root,
        state_root: block.state_root,
        body,
    };
    Ok(SignedBeaconBlock { message, signature: blinded.signature.clone() })
}
