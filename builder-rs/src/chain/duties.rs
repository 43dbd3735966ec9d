use beacon_api_client::{mainnet::Client, Error as ApiError};
use ethereum_consensus::primitives::{BlsPublicKey, Epoch, Slot};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
struct State {
    proposers: HashMap<Slot, BlsPublicKey>,
    loaded_epochs: Vec<Epoch>,
}

/// Caches the proposer schedule for the two most recent epochs so the payload
/// builder can resolve the proposer's registered fee recipient without a
/// network round trip per slot.
pub struct ProposerDuties {
    api: Client,
    slots_per_epoch: u64,
    state: Mutex<State>,
}

impl ProposerDuties {
    pub fn new(api: Client, slots_per_epoch: u64) -> Self {
        Self { api, slots_per_epoch, state: Default::default() }
    }

    pub async fn on_epoch(&self, epoch: Epoch) -> Result<(), ApiError> {
        {
            let state = self.state.lock();
            if state.loaded_epochs.contains(&epoch) {
                return Ok(())
            }
        }
        let (_dependent_root, duties) = self.api.get_proposer_duties(epoch).await?;
        let mut state = self.state.lock();
        for duty in &duties {
            state.proposers.insert(duty.slot, duty.public_key.clone());
        }
        state.loaded_epochs.push(epoch);
        state.loaded_epochs.sort_unstable();
        while state.loaded_epochs.len() > 2 {
            let stale = state.loaded_epochs.remove(0);
            let first_retained = state.loaded_epochs[0] * self.slots_per_epoch;
            state.proposers.retain(|slot, _| *slot >= first_retained);
            debug!(epoch = stale, "dropped stale proposer duties");
        }
        Ok(())
    }

    pub fn proposer_for(&self, slot: Slot) -> Option<BlsPublicKey> {
        let state = self.state.lock();
        state.proposers.get(&slot).cloned()
    }
}
