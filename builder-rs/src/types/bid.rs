use ethereum_consensus::{
    primitives::{BlsSignature, ExecutionAddress, Hash32, Root, Slot},
    ssz::prelude::*,
};

/// A builder's commitment to reveal the payload identified by `block_hash`
/// for `slot`, paying `value` to the proposer if the bid is selected.
#[derive(Debug, Default, Clone, SimpleSerialize, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionPayloadBid {
    pub parent_block_hash: Hash32,
    pub parent_block_root: Root,
    pub block_hash: Hash32,
    pub fee_recipient: ExecutionAddress,
    #[serde(with = "crate::serde::as_str")]
    pub gas_limit: u64,
    #[serde(with = "crate::serde::as_str")]
    pub builder_index: u64,
    #[serde(with = "crate::serde::as_str")]
    pub slot: Slot,
    /// Amount offered to the proposer, in gwei.
    #[serde(with = "crate::serde::as_str")]
    pub value: u64,
    /// Amount charged on the execution side, in gwei.
    #[serde(with = "crate::serde::as_str")]
    pub execution_payment: u64,
    pub blob_kzg_commitments_root: Root,
}

#[derive(Debug, Default, Clone, SimpleSerialize, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignedExecutionPayloadBid {
    pub message: ExecutionPayloadBid,
    pub signature: BlsSignature,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bid_root_commits_to_value_and_hash() {
        let mut bid = ExecutionPayloadBid { value: 100, ..Default::default() };
        let root_low = bid.hash_tree_root().unwrap();
        bid.value = 200;
        let root_high = bid.hash_tree_root().unwrap();
        assert_ne!(root_low, root_high);

        bid.block_hash = Hash32::try_from([0x33u8; 32].as_ref()).unwrap();
        assert_ne!(bid.hash_tree_root().unwrap(), root_high);
    }

    #[test]
    fn test_bid_serde_round_trip() {
        let bid = ExecutionPayloadBid {
            parent_block_hash: Hash32::try_from([0x11u8; 32].as_ref()).unwrap(),
            parent_block_root: Root::try_from([0x22u8; 32].as_ref()).unwrap(),
            block_hash: Hash32::try_from([0x33u8; 32].as_ref()).unwrap(),
            fee_recipient: ExecutionAddress::try_from([0x55u8; 20].as_ref()).unwrap(),
            gas_limit: 30_000_000,
            builder_index: 42,
            slot: 100,
            value: 1_000_000,
            execution_payment: 1_000_000,
            blob_kzg_commitments_root: Root::default(),
        };
        let repr = serde_json::to_string(&bid).unwrap();
        assert!(repr.contains(r#""value":"1000000""#));
        let recovered: ExecutionPayloadBid = serde_json::from_str(&repr).unwrap();
        assert_eq!(recovered, bid);
    }
}
