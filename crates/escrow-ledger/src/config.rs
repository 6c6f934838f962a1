//! Escrow configuration
//!
//! Deployment parameters loaded from TOML. Token quantities are whole tokens
//! and get scaled by [`ONE_TOKEN`](crate::ONE_TOKEN) when turned into runtime
//! parameters.

use crate::adjudicator::AdjudicatorParams;
use crate::constants::ONE_TOKEN;
use crate::issuer::{IssuanceParams, Issuer};
use crate::staking::StakingParams;
use escrow_core::{EscrowError, TokenAmount};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for EscrowError {
    fn from(err: ConfigError) -> Self {
        EscrowError::InvalidConfiguration(err.to_string())
    }
}

/// Complete escrow configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Period lengths
    #[serde(default)]
    pub period: PeriodConfig,

    /// Token supply and reward reserve
    #[serde(default)]
    pub token: TokenConfig,

    /// Issuance formula coefficients
    #[serde(default)]
    pub issuance: IssuanceConfig,

    /// Staking limits
    #[serde(default)]
    pub staking: StakingConfig,

    /// Penalty schedule
    #[serde(default)]
    pub adjudicator: AdjudicatorConfig,
}

/// Period configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// Active period length in seconds
    #[serde(default = "default_seconds_per_period")]
    pub seconds_per_period: u32,

    /// Period length records were written with before a period-length change
    #[serde(default = "default_seconds_per_period")]
    pub genesis_seconds_per_period: u32,
}

fn default_seconds_per_period() -> u32 {
    7 * 24 * 3600
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            seconds_per_period: default_seconds_per_period(),
            genesis_seconds_per_period: default_seconds_per_period(),
        }
    }
}

/// Token configuration (whole tokens)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_total_supply")]
    pub total_supply: u64,

    /// Tokens moved into the escrow as the reward reserve
    #[serde(default = "default_reserved_reward")]
    pub reserved_reward: u64,
}

fn default_total_supply() -> u64 {
    3_885_390_081
}

fn default_reserved_reward() -> u64 {
    2_885_390_081
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            total_supply: default_total_supply(),
            reserved_reward: default_reserved_reward(),
        }
    }
}

/// Issuance configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// Phase-2 decay coefficient
    #[serde(default = "default_decay_coefficient")]
    pub issuance_decay_coefficient: u64,

    #[serde(default = "default_lock_coefficient_1")]
    pub lock_duration_coefficient_1: u64,

    #[serde(default = "default_lock_coefficient_2")]
    pub lock_duration_coefficient_2: u64,

    #[serde(default = "default_maximum_rewarded_periods")]
    pub maximum_rewarded_periods: u32,

    /// Whole tokens issued before phase 2 starts
    #[serde(default = "default_first_phase_total_supply")]
    pub first_phase_total_supply: u64,

    /// Whole tokens issued per period in phase 1
    #[serde(default = "default_first_phase_max_issuance")]
    pub first_phase_max_issuance: u64,
}

fn default_decay_coefficient() -> u64 {
    643
}

fn default_lock_coefficient_1() -> u64 {
    52
}

fn default_lock_coefficient_2() -> u64 {
    104
}

fn default_maximum_rewarded_periods() -> u32 {
    52
}

fn default_first_phase_total_supply() -> u64 {
    1_829_579_800
}

fn default_first_phase_max_issuance() -> u64 {
    3_197_216
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            issuance_decay_coefficient: default_decay_coefficient(),
            lock_duration_coefficient_1: default_lock_coefficient_1(),
            lock_duration_coefficient_2: default_lock_coefficient_2(),
            maximum_rewarded_periods: default_maximum_rewarded_periods(),
            first_phase_total_supply: default_first_phase_total_supply(),
            first_phase_max_issuance: default_first_phase_max_issuance(),
        }
    }
}

/// Staking configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Shortest lock a sub-stake may have
    #[serde(default = "default_min_locked_periods")]
    pub min_locked_periods: u32,

    /// Smallest sub-stake (whole tokens)
    #[serde(default = "default_min_allowable_locked_tokens")]
    pub min_allowable_locked_tokens: u64,

    /// Largest per-staker lock (whole tokens)
    #[serde(default = "default_max_allowable_locked_tokens")]
    pub max_allowable_locked_tokens: u64,

    /// Periods before a worker may be changed again
    #[serde(default = "default_min_worker_periods")]
    pub min_worker_periods: u32,
}

fn default_min_locked_periods() -> u32 {
    4
}

fn default_min_allowable_locked_tokens() -> u64 {
    15_000
}

fn default_max_allowable_locked_tokens() -> u64 {
    30_000_000
}

fn default_min_worker_periods() -> u32 {
    2
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            min_locked_periods: default_min_locked_periods(),
            min_allowable_locked_tokens: default_min_allowable_locked_tokens(),
            max_allowable_locked_tokens: default_max_allowable_locked_tokens(),
            min_worker_periods: default_min_worker_periods(),
        }
    }
}

/// Adjudicator configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjudicatorConfig {
    /// Penalty of a first offence (whole tokens)
    #[serde(default = "default_base_penalty")]
    pub base_penalty: u64,

    /// Extra penalty per previous offence (whole tokens)
    #[serde(default = "default_penalty_history_coefficient")]
    pub penalty_history_coefficient: u64,

    /// Penalty never exceeds `value / percentage_penalty_coefficient`
    #[serde(default = "default_percentage_penalty_coefficient")]
    pub percentage_penalty_coefficient: u64,

    /// Investigator receives `penalty / reward_coefficient`
    #[serde(default = "default_reward_coefficient")]
    pub reward_coefficient: u64,
}

fn default_base_penalty() -> u64 {
    100
}

fn default_penalty_history_coefficient() -> u64 {
    10
}

fn default_percentage_penalty_coefficient() -> u64 {
    10
}

fn default_reward_coefficient() -> u64 {
    2
}

impl Default for AdjudicatorConfig {
    fn default() -> Self {
        Self {
            base_penalty: default_base_penalty(),
            penalty_history_coefficient: default_penalty_history_coefficient(),
            percentage_penalty_coefficient: default_percentage_penalty_coefficient(),
            reward_coefficient: default_reward_coefficient(),
        }
    }
}

fn tokens(whole: u64) -> TokenAmount {
    TokenAmount::from(whole) * ONE_TOKEN
}

impl EscrowConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check every deployment parameter
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.period.seconds_per_period == 0 || self.period.genesis_seconds_per_period == 0 {
            return invalid("period lengths must be non-zero");
        }
        if self.staking.min_locked_periods <= 1 {
            return invalid("min_locked_periods must be greater than 1");
        }
        if self.staking.min_allowable_locked_tokens == 0 {
            return invalid("min_allowable_locked_tokens must be non-zero");
        }
        if self.staking.min_allowable_locked_tokens > self.staking.max_allowable_locked_tokens {
            return invalid("min_allowable_locked_tokens exceeds max_allowable_locked_tokens");
        }
        if self.adjudicator.percentage_penalty_coefficient == 0
            || self.adjudicator.reward_coefficient == 0
        {
            return invalid("adjudicator coefficients must be non-zero");
        }

        let mut issuer = Issuer::new(self.issuance_params(), self.total_supply())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        issuer
            .initialize(self.reserved_reward(), 0)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn issuance_params(&self) -> IssuanceParams {
        let issuance = &self.issuance;
        IssuanceParams {
            issuance_decay_coefficient: u128::from(issuance.issuance_decay_coefficient),
            lock_duration_coefficient_1: u128::from(issuance.lock_duration_coefficient_1),
            lock_duration_coefficient_2: u128::from(issuance.lock_duration_coefficient_2),
            maximum_rewarded_periods: issuance.maximum_rewarded_periods,
            first_phase_total_supply: tokens(issuance.first_phase_total_supply),
            first_phase_max_issuance: tokens(issuance.first_phase_max_issuance),
        }
    }

    pub fn staking_params(&self) -> StakingParams {
        StakingParams {
            min_locked_periods: self.staking.min_locked_periods,
            min_allowable_locked_tokens: tokens(self.staking.min_allowable_locked_tokens),
            max_allowable_locked_tokens: tokens(self.staking.max_allowable_locked_tokens),
            min_worker_periods: self.staking.min_worker_periods,
        }
    }

    pub fn adjudicator_params(&self) -> AdjudicatorParams {
        AdjudicatorParams {
            base_penalty: tokens(self.adjudicator.base_penalty),
            penalty_history_coefficient: tokens(self.adjudicator.penalty_history_coefficient),
            percentage_penalty_coefficient: u128::from(
                self.adjudicator.percentage_penalty_coefficient,
            ),
            reward_coefficient: u128::from(self.adjudicator.reward_coefficient),
        }
    }

    pub fn total_supply(&self) -> TokenAmount {
        tokens(self.token.total_supply)
    }

    pub fn reserved_reward(&self) -> TokenAmount {
        tokens(self.token.reserved_reward)
    }
}
