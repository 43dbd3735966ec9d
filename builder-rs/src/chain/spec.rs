use crate::{
    chain::Clock,
    signing::{
        DomainType, DOMAIN_APPLICATION_BUILDER, DOMAIN_EXECUTION_PAYLOAD_BID,
        DOMAIN_EXECUTION_PAYLOAD_ENVELOPE, DOMAIN_VOLUNTARY_EXIT,
    },
    types::PayloadEnvelopeForm,
    Error,
};
use ethereum_consensus::primitives::{Epoch, Root, Slot, Version};
use std::collections::HashMap;

pub const FAR_FUTURE_EPOCH: Epoch = Epoch::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fork {
    Electra,
    Fulu,
    Gloas,
}

/// Immutable per-run view of the target chain, assembled from
/// `/eth/v1/beacon/genesis` and `/eth/v1/config/spec` at startup.
#[derive(Clone, Debug)]
pub struct ChainSpec {
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
    pub genesis_time: u64,
    pub genesis_validators_root: Root,
    pub genesis_fork_version: Version,
    pub electra_fork_epoch: Epoch,
    pub electra_fork_version: Version,
    pub fulu_fork_epoch: Epoch,
    pub fulu_fork_version: Version,
    pub gloas_fork_epoch: Epoch,
    pub gloas_fork_version: Version,
    pub ptc_size: u64,
    pub domain_application_builder: DomainType,
    pub domain_execution_payload_bid: DomainType,
    pub domain_execution_payload_envelope: DomainType,
    pub domain_voluntary_exit: DomainType,
}

impl ChainSpec {
    pub fn from_config(
        genesis_time: u64,
        genesis_validators_root: Root,
        genesis_fork_version: Version,
        config: &HashMap<String, String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            seconds_per_slot: parse_u64(config, "SECONDS_PER_SLOT")?.unwrap_or(12),
            slots_per_epoch: parse_u64(config, "SLOTS_PER_EPOCH")?.unwrap_or(32),
            genesis_time,
            genesis_validators_root,
            genesis_fork_version: genesis_fork_version.clone(),
            electra_fork_epoch: parse_u64(config, "ELECTRA_FORK_EPOCH")?.unwrap_or(0),
            electra_fork_version: parse_version(config, "ELECTRA_FORK_VERSION")?
                .unwrap_or_else(|| genesis_fork_version.clone()),
            fulu_fork_epoch: parse_u64(config, "FULU_FORK_EPOCH")?.unwrap_or(FAR_FUTURE_EPOCH),
            fulu_fork_version: parse_version(config, "FULU_FORK_VERSION")?
                .unwrap_or_else(|| genesis_fork_version.clone()),
            gloas_fork_epoch: parse_u64(config, "GLOAS_FORK_EPOCH")?.unwrap_or(FAR_FUTURE_EPOCH),
            gloas_fork_version: parse_version(config, "GLOAS_FORK_VERSION")?
                .unwrap_or_else(|| genesis_fork_version.clone()),
            ptc_size: parse_u64(config, "PTC_SIZE")?.unwrap_or(512),
            domain_application_builder: parse_domain(config, "DOMAIN_APPLICATION_BUILDER")?
                .unwrap_or(DOMAIN_APPLICATION_BUILDER),
            domain_execution_payload_bid: parse_domain(config, "DOMAIN_EXECUTION_PAYLOAD_BID")?
                .unwrap_or(DOMAIN_EXECUTION_PAYLOAD_BID),
            domain_execution_payload_envelope: parse_domain(
                config,
                "DOMAIN_EXECUTION_PAYLOAD_ENVELOPE",
            )?
            .unwrap_or(DOMAIN_EXECUTION_PAYLOAD_ENVELOPE),
            domain_voluntary_exit: parse_domain(config, "DOMAIN_VOLUNTARY_EXIT")?
                .unwrap_or(DOMAIN_VOLUNTARY_EXIT),
        })
    }

    pub fn clock(&self) -> Clock {
        Clock::new(self.genesis_time * 1000, self.seconds_per_slot * 1000, self.slots_per_epoch)
    }

    pub fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    pub fn fork_at_epoch(&self, epoch: Epoch) -> Fork {
        if epoch >= self.gloas_fork_epoch {
            Fork::Gloas
        } else if epoch >= self.fulu_fork_epoch {
            Fork::Fulu
        } else {
            Fork::Electra
        }
    }

    pub fn fork_at_slot(&self, slot: Slot) -> Fork {
        self.fork_at_epoch(self.epoch_at_slot(slot))
    }

    pub fn fork_version(&self, fork: Fork) -> Version {
        match fork {
            Fork::Electra => self.electra_fork_version.clone(),
            Fork::Fulu => self.fulu_fork_version.clone(),
            Fork::Gloas => self.gloas_fork_version.clone(),
        }
    }

    /// How the payload for `slot` reaches the chain, given the beacon block
    /// root observed at head for the payload's block.
    pub fn envelope_form(&self, slot: Slot, beacon_block_root: Root) -> PayloadEnvelopeForm {
        match self.fork_at_slot(slot) {
            Fork::Gloas => PayloadEnvelopeForm::StandaloneReveal { beacon_block_root },
            _ => PayloadEnvelopeForm::EmbeddedInBlock,
        }
    }
}

fn parse_u64(config: &HashMap<String, String>, key: &str) -> Result<Option<u64>, Error> {
    match config.get(key) {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|err| Error::Config(format!("invalid `{key}` in chain spec: {err}"))),
        None => Ok(None),
    }
}

fn parse_version(config: &HashMap<String, String>, key: &str) -> Result<Option<Version>, Error> {
    match config.get(key) {
        Some(value) => {
            let bytes = parse_fixed::<4>(key, value)?;
            Ok(Some(Version::try_from(bytes.as_ref()).expect("4 bytes")))
        }
        None => Ok(None),
    }
}

fn parse_domain(config: &HashMap<String, String>, key: &str) -> Result<Option<DomainType>, Error> {
    match config.get(key) {
        Some(value) => Ok(Some(parse_fixed::<4>(key, value)?)),
        None => Ok(None),
    }
}

fn parse_fixed<const N: usize>(key: &str, value: &str) -> Result<[u8; N], Error> {
    let value = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(value)
        .map_err(|err| Error::Config(format!("invalid `{key}` in chain spec: {err}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Config(format!("invalid `{key}` in chain spec: wrong length")))
}
