pub use ethereum_consensus::signing::{compute_signing_root, verify_signature};
use ethereum_consensus::{
    crypto::SecretKey,
    phase0::mainnet::{ForkData, SigningData},
    primitives::{BlsPublicKey, BlsSignature, Domain, Root, Version},
    signing::sign_with_domain,
    ssz::prelude::*,
    Error,
};
use std::fmt;

pub type DomainType = [u8; 4];

pub const DOMAIN_APPLICATION_BUILDER: DomainType = [0, 0, 0, 1];
pub const DOMAIN_EXECUTION_PAYLOAD_BID: DomainType = [27, 0, 0, 0];
pub const DOMAIN_EXECUTION_PAYLOAD_ENVELOPE: DomainType = [28, 0, 0, 0];
pub const DOMAIN_VOLUNTARY_EXIT: DomainType = [4, 0, 0, 0];

/// `domain_type || hash_tree_root(ForkData)[..28]`
pub fn compute_domain(
    domain_type: DomainType,
    fork_version: Version,
    genesis_validators_root: Root,
) -> Result<Domain, Error> {
    let mut fork_data = ForkData { current_version: fork_version, genesis_validators_root };
    let fork_data_root = fork_data.hash_tree_root()?;
    let mut domain = Domain::default();
    domain[..4].copy_from_slice(&domain_type);
    domain[4..].copy_from_slice(&fork_data_root.as_ref()[..28]);
    Ok(domain)
}

/// Holds the builder's BLS key. Cheap to call on the hot path; no caching
/// beyond the public key derived at construction.
#[derive(Clone)]
pub struct Signer {
    secret_key: SecretKey,
    public_key: BlsPublicKey,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("public_key", &self.public_key).finish()
    }
}

impl Signer {
    pub fn new(secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self { secret_key, public_key }
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, crate::Error> {
        let hex_key = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let key_bytes = hex::decode(hex_key)
            .map_err(|err| crate::Error::Config(format!("invalid builder key: {err}")))?;
        if key_bytes.len() != 32 {
            return Err(crate::Error::Config(format!(
                "builder key must be 32 bytes, got {}",
                key_bytes.len()
            )))
        }
        let secret_key = SecretKey::try_from(key_bytes.as_slice())
            .map_err(|err| crate::Error::Config(format!("invalid builder key: {err}")))?;
        Ok(Self::new(secret_key))
    }

    pub fn public_key(&self) -> &BlsPublicKey {
        &self.public_key
    }

    pub fn sign_message<T: SimpleSerialize>(
        &self,
        message: &mut T,
        domain: Domain,
    ) -> Result<BlsSignature, Error> {
        sign_with_domain(message, &self.secret_key, domain)
    }

    pub fn sign_root(&self, object_root: Root, domain: Domain) -> Result<BlsSignature, Error> {
        let mut signing_data = SigningData { object_root, domain };
        let signing_root = signing_data.hash_tree_root()?;
        Ok(self.secret_key.sign(signing_root.as_ref()))
    }
}
