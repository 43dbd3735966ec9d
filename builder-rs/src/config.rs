use crate::Error;
use ethereum_consensus::primitives::Slot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    All,
    EveryNth,
    NextN,
}

/// Which slots the builder participates in. Useful on shared devnets where
/// several builders split the slot space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BidScheduleConfig {
    pub mode: ScheduleMode,
    pub every_nth: u64,
    pub next_n: u64,
    pub start_slot: Slot,
}

impl Default for BidScheduleConfig {
    fn default() -> Self {
        Self { mode: ScheduleMode::All, every_nth: 1, next_n: 0, start_slot: 0 }
    }
}

impl BidScheduleConfig {
    pub fn should_bid(&self, slot: Slot) -> bool {
        if slot < self.start_slot {
            return false
        }
        match self.mode {
            ScheduleMode::All => true,
            ScheduleMode::EveryNth => {
                self.every_nth > 0 && (slot - self.start_slot) % self.every_nth == 0
            }
            ScheduleMode::NextN => slot < self.start_slot + self.next_n,
        }
    }
}

/// All times are milliseconds relative to the start of the target slot;
/// negative values land in the previous slot. Amounts are gwei.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpbsTimingConfig {
    pub build_start_time: i64,
    pub bid_start_time: i64,
    pub bid_end_time: i64,
    pub reveal_time: i64,
    pub bid_min_amount: u64,
    pub bid_increase: u64,
    /// Milliseconds between consecutive bids; `0` switches to single-bid
    /// mode, one bid per payload block hash.
    pub bid_interval: u64,
    pub builder_index: u64,
}

impl Default for EpbsTimingConfig {
    fn default() -> Self {
        Self {
            build_start_time: -4000,
            bid_start_time: -1000,
            bid_end_time: 1000,
            reveal_time: 6000,
            bid_min_amount: 1_000_000,
            bid_increase: 0,
            bid_interval: 0,
            builder_index: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 32-byte BLS secret key, hex.
    pub builder_privkey: String,
    /// Builder's own fee recipient, hex address.
    pub fee_recipient: String,
    /// Beacon node base URL.
    pub cl_client: String,
    /// Engine API endpoint of the execution client.
    pub el_engine_api: String,
    /// Path to the 32-byte hex JWT secret shared with the execution client.
    pub el_jwt_secret: String,
    pub epbs_enabled: bool,
    pub builder_api_enabled: bool,
    pub builder_api_host: String,
    pub builder_api_port: u16,
    pub block_value_subsidy_gwei: u64,
    pub use_proposer_fee_recipient: bool,
    /// Milliseconds granted to the execution client per build.
    pub payload_build_time: u64,
    pub payload_cache_slots: usize,
    pub schedule: BidScheduleConfig,
    pub epbs: EpbsTimingConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            builder_privkey: String::new(),
            fee_recipient: format!("0x{}", "00".repeat(20)),
            cl_client: "http://localhost:5052".to_string(),
            el_engine_api: "http://localhost:8551".to_string(),
            el_jwt_secret: "./jwt.hex".to_string(),
            epbs_enabled: true,
            builder_api_enabled: true,
            builder_api_host: "0.0.0.0".to_string(),
            builder_api_port: 9000,
            block_value_subsidy_gwei: 0,
            use_proposer_fee_recipient: false,
            payload_build_time: crate::payload::DEFAULT_PAYLOAD_BUILD_TIME_MS,
            payload_cache_slots: crate::payload::DEFAULT_MAX_SLOTS,
            schedule: Default::default(),
            epbs: Default::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Fatal-at-startup checks; every violation is a configuration error.
    pub fn validate(&self) -> Result<(), Error> {
        if self.builder_privkey.is_empty() {
            return Err(Error::Config("`builder_privkey` is required".to_string()))
        }
        url::Url::parse(&self.cl_client)
            .map_err(|err| Error::Config(format!("invalid `cl_client` URL: {err}")))?;
        url::Url::parse(&self.el_engine_api)
            .map_err(|err| Error::Config(format!("invalid `el_engine_api` URL: {err}")))?;

        let timing = &self.epbs;
        if timing.reveal_time < timing.bid_end_time {
            return Err(Error::Config(
                "`epbs.reveal_time` must not precede `epbs.bid_end_time`".to_string(),
            ))
        }
        if timing.bid_end_time < timing.bid_start_time {
            return Err(Error::Config(
                "`epbs.bid_end_time` must not precede `epbs.bid_start_time`".to_string(),
            ))
        }
        if timing.bid_start_time < timing.build_start_time {
            return Err(Error::Config(
                "`epbs.bid_start_time` must not precede `epbs.build_start_time`".to_string(),
            ))
        }
        let build_window = timing.bid_start_time - timing.build_start_time;
        if self.payload_build_time as i64 > build_window {
            return Err(Error::Config(format!(
                "`payload_build_time` of {} ms does not fit the {} ms window before bidding starts",
                self.payload_build_time, build_window
            )))
        }
        let fee_recipient = self.fee_recipient.strip_prefix("0x").unwrap_or(&self.fee_recipient);
        if hex::decode(fee_recipient).map(|bytes| bytes.len() != 20).unwrap_or(true) {
            return Err(Error::Config("`fee_recipient` must be a 20-byte hex address".to_string()))
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config { builder_privkey: format!("0x{}", "01".repeat(32)), ..Default::default() }
    }

    #[test]
    fn test_default_config_requires_key() {
        assert!(Config::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_timing_ordering_is_enforced() {
        let mut config = valid_config();
        config.epbs.bid_end_time = config.epbs.reveal_time + 1;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.epbs.bid_start_time = config.epbs.bid_end_time + 1;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.epbs.build_start_time = config.epbs.bid_start_time + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_payload_build_time_must_fit_before_bidding() {
        let mut config = valid_config();
        config.epbs.build_start_time = -3000;
        config.epbs.bid_start_time = -1000;
        config.payload_build_time = 2000;
        assert!(config.validate().is_ok());
        config.payload_build_time = 2001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schedule_modes() {
        let all = BidScheduleConfig::default();
        assert!(all.should_bid(0));
        assert!(all.should_bid(12345));

        let every_third = BidScheduleConfig {
            mode: ScheduleMode::EveryNth,
            every_nth: 3,
            start_slot: 10,
            ..Default::default()
        };
        assert!(!every_third.should_bid(9));
        assert!(every_third.should_bid(10));
        assert!(!every_third.should_bid(11));
        assert!(every_third.should_bid(13));

        let next_two = BidScheduleConfig {
            mode: ScheduleMode::NextN,
            next_n: 2,
            start_slot: 10,
            ..Default::default()
        };
        assert!(!next_two.should_bid(9));
        assert!(next_two.should_bid(10));
        assert!(next_two.should_bid(11));
        assert!(!next_two.should_bid(12));
    }
}
