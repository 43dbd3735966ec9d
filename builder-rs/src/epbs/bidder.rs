use crate::{
    chain::ChainSpec,
    signing::{compute_domain, Signer},
    types::{ExecutionPayloadBid, PayloadReady, SignedExecutionPayloadBid},
    Error,
};

/// Bid value for the `bid_count`-th bid on a payload: never below the
/// payload's own value, and climbing from the configured floor when
/// interval bidding is on.
pub fn bid_value(
    bid_min_amount: u64,
    bid_increase: u64,
    bid_interval: u64,
    bid_count: u64,
    payload_value_gwei: u64,
) -> u64 {
    let floor = if bid_interval > 0 {
        bid_min_amount.saturating_add(bid_count.saturating_mul(bid_increase))
    } else {
        bid_min_amount
    };
    floor.max(payload_value_gwei)
}

pub fn create_signed_bid(
    payload: &PayloadReady,
    value: u64,
    builder_index: u64,
    signer: &Signer,
    spec: &ChainSpec,
) -> Result<SignedExecutionPayloadBid, Error> {
    let mut message = ExecutionPayloadBid {
        parent_block_hash: payload.parent_block_hash.clone(),
        parent_block_root: payload.parent_block_root,
        block_hash: payload.block_hash.clone(),
        fee_recipient: payload.fee_recipient.clone(),
        gas_limit: payload.gas_limit,
        builder_index,
        slot: payload.slot,
        value,
        execution_payment: value,
        blob_kzg_commitments_root: payload.blob_kzg_commitments_root()?,
    };
    let fork_version = spec.fork_version(spec.fork_at_slot(payload.slot));
    let domain = compute_domain(
        spec.domain_execution_payload_bid,
        fork_version,
        spec.genesis_validators_root,
    )?;
    let signature = signer.sign_message(&mut message, domain)?;
    Ok(SignedExecutionPayloadBid { message, signature })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bid_value_floors_at_minimum() {
        // single-bid mode ignores the increase term
        assert_eq!(bid_value(1_000_000, 50_000, 0, 3, 500_000), 1_000_000);
        assert_eq!(bid_value(1_000_000, 50_000, 0, 0, 2_000_000), 2_000_000);
    }

    #[test]
    fn test_bid_value_climbs_in_interval_mode() {
        assert_eq!(bid_value(1_000_000, 50_000, 500, 0, 0), 1_000_000);
        assert_eq!(bid_value(1_000_000, 50_000, 500, 2, 0), 1_100_000);
        assert_eq!(bid_value(1_000_000, 50_000, 500, 2, 3_000_000), 3_000_000);
    }
}
