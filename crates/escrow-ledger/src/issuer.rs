//! # Issuance
//!
//! Two-phase issuance of staking rewards out of a capped reserve.
//!
//! ## Phases
//!
//! ```text
//! Phase 1: flat pool per period          → firstPhaseMaxIssuance
//!          while previousPeriodSupply + firstPhaseMaxIssuance <= firstPhaseTotalSupply
//! Phase 2: pool decays with what is left → (totalSupply - previousPeriodSupply) / d
//! ```
//!
//! Both phases share the locking-duration factor `(k1 + min(periods, maxRewardedPeriods)) / k2`,
//! so a sub-stake locked for `maxRewardedPeriods` or longer earns the full pool share.
//!
//! ## Supply Tracking
//!
//! `previousPeriodSupply` is frozen at the start of each minting period and drives
//! the phase choice and the phase-2 pool; `currentPeriodSupply` grows with every
//! reward minted in the period. Both start at `totalSupply - reservedReward`.

use escrow_core::math::{self, U256};
use escrow_core::{EscrowError, Period, Result, TokenAmount};
use serde::{Deserialize, Serialize};

/// Deployment parameters of the issuance formula
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceParams {
    /// Phase-2 decay coefficient `d`
    pub issuance_decay_coefficient: u128,
    /// Locking-duration coefficient `k1`
    pub lock_duration_coefficient_1: u128,
    /// Locking-duration coefficient `k2`
    pub lock_duration_coefficient_2: u128,
    /// Locked periods beyond this earn no extra reward
    pub maximum_rewarded_periods: u32,
    /// Supply level at which phase 1 ends
    pub first_phase_total_supply: TokenAmount,
    /// Phase-1 reward pool per period
    pub first_phase_max_issuance: TokenAmount,
}

/// Issuance phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuancePhase {
    First,
    Second,
}

/// Mutable supply counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerState {
    pub initialized: bool,
    pub previous_period_supply: TokenAmount,
    pub current_period_supply: TokenAmount,
    pub current_minting_period: Period,
}

/// Reward issuer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issuer {
    params: IssuanceParams,
    total_supply: TokenAmount,
    minting_coefficient: u128,
    state: IssuerState,
}

impl Issuer {
    /// Create an issuer for a token with `total_supply`.
    ///
    /// Fails fast on parameters that could overflow the reward formula or that
    /// describe an impossible schedule.
    pub fn new(params: IssuanceParams, total_supply: TokenAmount) -> Result<Self> {
        let invalid = |msg: &str| Err(EscrowError::InvalidConfiguration(msg.to_string()));

        if total_supply == 0
            || params.issuance_decay_coefficient == 0
            || params.lock_duration_coefficient_1 == 0
            || params.lock_duration_coefficient_2 == 0
            || params.maximum_rewarded_periods == 0
        {
            return invalid("supply and all issuance coefficients must be non-zero");
        }

        let max_lock_duration_coefficient = params
            .lock_duration_coefficient_1
            .checked_add(u128::from(params.maximum_rewarded_periods));
        let minting_coefficient = params
            .issuance_decay_coefficient
            .checked_mul(params.lock_duration_coefficient_2);
        let (Some(max_lock_duration_coefficient), Some(minting_coefficient)) =
            (max_lock_duration_coefficient, minting_coefficient)
        else {
            return invalid("specified parameters cause overflow");
        };

        // worst case for `totalLocked * d * k2`: totalLocked == totalSupply
        let supply = U256::from(total_supply);
        let worst_denominator = supply.checked_mul(U256::from(minting_coefficient));
        // worst case for `pool * lockedValue * (k1 + periods)`: pool == lockedValue == totalSupply
        let worst_numerator = supply
            .checked_mul(supply)
            .and_then(|v| v.checked_mul(U256::from(max_lock_duration_coefficient)));
        if worst_denominator.is_none() || worst_numerator.is_none() {
            return invalid("specified parameters cause overflow");
        }

        if max_lock_duration_coefficient > params.lock_duration_coefficient_2 {
            return invalid("resulting locking duration coefficient must be at most 1");
        }
        if params.first_phase_total_supply > total_supply {
            return invalid("too many tokens for the first phase");
        }
        if params.first_phase_max_issuance > params.first_phase_total_supply {
            return invalid("reward for the first phase is too high");
        }

        Ok(Self {
            params,
            total_supply,
            minting_coefficient,
            state: IssuerState::default(),
        })
    }

    /// Rebuild an issuer with previously saved counters
    pub fn with_state(
        params: IssuanceParams,
        total_supply: TokenAmount,
        state: IssuerState,
    ) -> Result<Self> {
        let mut issuer = Self::new(params, total_supply)?;
        if state.current_period_supply > total_supply || state.previous_period_supply > total_supply
        {
            return Err(EscrowError::Snapshot(
                "issuer supply counters exceed total supply".to_string(),
            ));
        }
        issuer.state = state;
        Ok(issuer)
    }

    /// Fund the reward reserve and start minting from `current_period`
    pub fn initialize(&mut self, reserved_reward: TokenAmount, current_period: Period) -> Result<()> {
        if self.state.initialized {
            return Err(EscrowError::AlreadyInitialized);
        }
        // the reserve must cover at least one first-phase period
        if reserved_reward < self.params.first_phase_max_issuance || reserved_reward > self.total_supply
        {
            return Err(EscrowError::InvalidReservedReward {
                reserved: reserved_reward,
                minimum: self.params.first_phase_max_issuance,
                maximum: self.total_supply,
            });
        }
        let supply = self.total_supply - reserved_reward;
        self.state = IssuerState {
            initialized: true,
            previous_period_supply: supply,
            current_period_supply: supply,
            current_minting_period: current_period,
        };
        Ok(())
    }

    /// Mint the reward of one sub-stake for one finished period.
    ///
    /// * `locked_value` - value of the sub-stake in the rewarded period
    /// * `total_locked` - all tokens locked in the rewarded period
    /// * `locked_periods` - periods the sub-stake stays locked after the rewarded period
    pub fn mint(
        &mut self,
        current_period: Period,
        locked_value: TokenAmount,
        total_locked: TokenAmount,
        locked_periods: u32,
    ) -> Result<TokenAmount> {
        if !self.state.initialized {
            return Err(EscrowError::NotInitialized);
        }
        if self.state.current_period_supply == self.total_supply
            || locked_value == 0
            || total_locked == 0
        {
            return Ok(0);
        }

        if current_period > self.state.current_minting_period {
            self.state.previous_period_supply = self.state.current_period_supply;
            self.state.current_minting_period = current_period;
        }

        let (pool, coefficient) = match self.phase() {
            IssuancePhase::First => (
                self.params.first_phase_max_issuance,
                self.params.lock_duration_coefficient_2,
            ),
            IssuancePhase::Second => (
                self.total_supply - self.state.previous_period_supply,
                self.minting_coefficient,
            ),
        };

        let duration_factor = self.params.lock_duration_coefficient_1
            + u128::from(locked_periods.min(self.params.maximum_rewarded_periods));
        let mut amount = math::mul_div3(
            pool,
            locked_value,
            duration_factor,
            total_locked,
            coefficient,
            "issuer mint",
        )?;

        // every active stake earns something, nothing beyond the reserve
        let reserved = self.reserved_reward();
        if amount == 0 {
            amount = 1;
        } else if amount > reserved {
            amount = reserved;
        }

        self.state.current_period_supply += amount;
        Ok(amount)
    }

    /// Return previously minted tokens to the mintable pool
    pub fn un_mint(&mut self, amount: TokenAmount) -> Result<()> {
        let previous = math::sub(self.state.previous_period_supply, amount, "issuer un-mint")?;
        let current = math::sub(self.state.current_period_supply, amount, "issuer un-mint")?;
        self.state.previous_period_supply = previous;
        self.state.current_period_supply = current;
        Ok(())
    }

    /// Phase selected by the frozen previous-period supply.
    ///
    /// A zero `first_phase_max_issuance` means the schedule has no first phase.
    pub fn phase(&self) -> IssuancePhase {
        if self.params.first_phase_max_issuance == 0 {
            return IssuancePhase::Second;
        }
        let first_phase_end = self
            .state
            .previous_period_supply
            .checked_add(self.params.first_phase_max_issuance);
        match first_phase_end {
            Some(end) if end <= self.params.first_phase_total_supply => IssuancePhase::First,
            _ => IssuancePhase::Second,
        }
    }

    /// Tokens still available for rewards
    pub fn reserved_reward(&self) -> TokenAmount {
        self.total_supply - self.state.current_period_supply
    }

    /// Largest reward the whole network can receive for one period right now
    pub fn max_period_reward(&self) -> TokenAmount {
        match self.phase() {
            IssuancePhase::First => self.params.first_phase_max_issuance,
            IssuancePhase::Second => {
                (self.total_supply - self.state.previous_period_supply)
                    / self.params.issuance_decay_coefficient
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    pub fn params(&self) -> &IssuanceParams {
        &self.params
    }

    pub fn state(&self) -> IssuerState {
        self.state
    }

    pub fn total_supply(&self) -> TokenAmount {
        self.total_supply
    }

    pub fn minting_coefficient(&self) -> u128 {
        self.minting_coefficient
    }

    /// Migrate the minting period onto a new period length
    pub(crate) fn set_minting_period(&mut self, period: Period) {
        self.state.current_minting_period = period;
    }
}
