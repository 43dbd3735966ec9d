use crate::{
    chain::ChainSpec,
    signing::{compute_domain, Signer},
    types::{
        ExecutionPayloadEnvelope, PayloadReady, SignedExecutionPayloadEnvelope,
    },
    Error,
};
use ethereum_consensus::primitives::Root;

/// Wraps the cached payload into the signed envelope that reveals it against
/// the beacon block which committed to our bid.
pub fn create_signed_envelope(
    payload: &PayloadReady,
    builder_index: u64,
    beacon_block_root: Root,
    signer: &Signer,
    spec: &ChainSpec,
) -> Result<SignedExecutionPayloadEnvelope, Error> {
    let mut message = ExecutionPayloadEnvelope {
        payload: payload.payload.clone(),
        execution_requests: payload.execution_requests.clone().unwrap_or_default(),
        builder_index,
        beacon_block_root,
        slot: payload.slot,
        // the node recomputes the post-state; not known builder-side
        state_root: Root::default(),
    };
    let fork_version = spec.fork_version(spec.fork_at_slot(payload.slot));
    let domain = compute_domain(
        spec.domain_execution_payload_envelope,
        fork_version,
        spec.genesis_validators_root,
    )?;
    let signature = signer.sign_message(&mut message, domain)?;
    Ok(SignedExecutionPayloadEnvelope { message, signature })
}
