//! Ledger events
//!
//! Every applied operation leaves an audit trail of events. They are staged
//! with the transaction and only become visible (and logged) once it applies.

use escrow_core::{AccountId, Period, TokenAmount};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Event emitted by the staking escrow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEvent {
    Initialized {
        reserved_reward: TokenAmount,
    },
    Donated {
        payer: AccountId,
        value: TokenAmount,
    },
    Deposited {
        staker: AccountId,
        value: TokenAmount,
        periods: u32,
    },
    Locked {
        staker: AccountId,
        value: TokenAmount,
        first_period: Period,
        periods: u32,
    },
    Divided {
        staker: AccountId,
        old_value: TokenAmount,
        last_period: Period,
        new_value: TokenAmount,
        periods: u32,
    },
    Merged {
        staker: AccountId,
        value_1: TokenAmount,
        value_2: TokenAmount,
        last_period: Period,
    },
    Prolonged {
        staker: AccountId,
        value: TokenAmount,
        last_period: Period,
        periods: u32,
    },
    Withdrawn {
        staker: AccountId,
        value: TokenAmount,
    },
    CommitmentMade {
        staker: AccountId,
        period: Period,
        value: TokenAmount,
    },
    Minted {
        staker: AccountId,
        period: Period,
        value: TokenAmount,
    },
    Slashed {
        staker: AccountId,
        penalty: TokenAmount,
        investigator: AccountId,
        reward: TokenAmount,
    },
    ReStakeSet {
        staker: AccountId,
        re_stake: bool,
    },
    WindDownSet {
        staker: AccountId,
        wind_down: bool,
    },
    WorkMeasurementSet {
        staker: AccountId,
        measure_work: bool,
    },
    WorkerBonded {
        staker: AccountId,
        worker: Option<AccountId>,
        start_period: Period,
    },
    Migrated {
        staker: AccountId,
        period: Period,
    },
}

impl EscrowEvent {
    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "Initialized",
            Self::Donated { .. } => "Donated",
            Self::Deposited { .. } => "Deposited",
            Self::Locked { .. } => "Locked",
            Self::Divided { .. } => "Divided",
            Self::Merged { .. } => "Merged",
            Self::Prolonged { .. } => "Prolonged",
            Self::Withdrawn { .. } => "Withdrawn",
            Self::CommitmentMade { .. } => "CommitmentMade",
            Self::Minted { .. } => "Minted",
            Self::Slashed { .. } => "Slashed",
            Self::ReStakeSet { .. } => "ReStakeSet",
            Self::WindDownSet { .. } => "WindDownSet",
            Self::WorkMeasurementSet { .. } => "WorkMeasurementSet",
            Self::WorkerBonded { .. } => "WorkerBonded",
            Self::Migrated { .. } => "Migrated",
        }
    }

    /// Staker the event is about, if any
    pub fn staker(&self) -> Option<AccountId> {
        match self {
            Self::Initialized { .. } | Self::Donated { .. } => None,
            Self::Deposited { staker, .. }
            | Self::Locked { staker, .. }
            | Self::Divided { staker, .. }
            | Self::Merged { staker, .. }
            | Self::Prolonged { staker, .. }
            | Self::Withdrawn { staker, .. }
            | Self::CommitmentMade { staker, .. }
            | Self::Minted { staker, .. }
            | Self::Slashed { staker, .. }
            | Self::ReStakeSet { staker, .. }
            | Self::WindDownSet { staker, .. }
            | Self::WorkMeasurementSet { staker, .. }
            | Self::WorkerBonded { staker, .. }
            | Self::Migrated { staker, .. } => Some(*staker),
        }
    }

    pub(crate) fn log(&self) {
        match self {
            Self::CommitmentMade {
                staker,
                period,
                value,
            } => info!(%staker, period, %value, "Commitment made"),
            Self::Minted {
                staker,
                period,
                value,
            } => info!(%staker, period, %value, "Reward minted"),
            Self::Slashed {
                staker,
                penalty,
                investigator,
                reward,
            } => info!(%staker, %penalty, %investigator, %reward, "Staker slashed"),
            other => info!(event = other.name(), staker = ?other.staker(), "Ledger event"),
        }
    }
}
