use crate::{
    chain::ChainSpec,
    error::BuilderApiError,
    signing::{compute_domain, compute_signing_root, verify_signature},
    types::SignedValidatorRegistration,
};
use ethereum_consensus::primitives::{BlsPublicKey, Epoch, Root, Version};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Latest accepted registration per proposer public key. Written by the
/// `/eth/v1/builder/validators` endpoint, read by `getHeader` and the
/// payload builder's fee-recipient lookup.
#[derive(Default)]
pub struct ValidatorRegistry {
    state: RwLock<HashMap<BlsPublicKey, SignedValidatorRegistration>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_registration(&self, public_key: &BlsPublicKey) -> Option<SignedValidatorRegistration> {
        self.state.read().get(public_key).cloned()
    }

    pub fn contains(&self, public_key: &BlsPublicKey) -> bool {
        self.state.read().contains_key(public_key)
    }

    pub fn registrations(&self) -> Vec<SignedValidatorRegistration> {
        self.state.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Verifies and stores a batch. All-or-nothing: the first registration
    /// that fails signature verification rejects the whole batch and nothing
    /// is persisted.
    pub fn process_registrations(
        &self,
        registrations: &mut [SignedValidatorRegistration],
        spec: &ChainSpec,
        current_epoch: Epoch,
    ) -> Result<(), BuilderApiError> {
        // validator clients disagree on the domain's fork data; accept the
        // tuples observed in the wild, most common first
        let candidates = [
            (Version::default(), Root::default()),
            (spec.genesis_fork_version.clone(), Root::default()),
            (
                spec.fork_version(spec.fork_at_epoch(current_epoch)),
                spec.genesis_validators_root,
            ),
        ];
        for registration in registrations.iter_mut() {
            if !verify_registration(registration, spec, &candidates) {
                return Err(BuilderApiError::InvalidRegistration(
                    registration.message.public_key.clone(),
                ))
            }
        }
        let mut state = self.state.write();
        for registration in registrations.iter() {
            let public_key = registration.message.public_key.clone();
            trace!(%public_key, "processed registration");
            state.insert(public_key, registration.clone());
        }
        Ok(())
    }
}

fn verify_registration(
    registration: &mut SignedValidatorRegistration,
    spec: &ChainSpec,
    candidates: &[(Version, Root)],
) -> bool {
    let public_key = registration.message.public_key.clone();
    for (fork_version, genesis_validators_root) in candidates {
        let Ok(domain) = compute_domain(
            spec.domain_application_builder,
            fork_version.clone(),
            *genesis_validators_root,
        ) else {
            continue
        };
        let Ok(signing_root) = compute_signing_root(&mut registration.message, domain) else {
            continue
        };
        if verify_signature(&public_key, signing_root.as_ref(), &registration.signature).is_ok() {
            return true
        }
    }
    false
}
