//! Staker records
//!
//! A staker record owns the sub-stakes of one account together with its
//! pending commitments, worker link and flags. All period arithmetic that
//! depends on "where the staker is" (start period, locked tokens, released
//! slots) lives here so commitment, minting and slashing agree on it.

use crate::substake::{Downtime, SubStake, SubStakes};
use escrow_core::{AccountId, EscrowError, Period, Result, TokenAmount};
use serde::{Deserialize, Serialize};

/// Per-staker switches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerFlags {
    /// Add minted reward to the sub-stakes that earned it
    pub re_stake: bool,
    /// Shrink open sub-stakes by one period on every commitment
    pub wind_down: bool,
    /// Count minted reward as completed work
    pub measure_work: bool,
    /// Record already uses the active period length
    pub migrated: bool,
}

impl Default for StakerFlags {
    fn default() -> Self {
        Self {
            re_stake: true,
            wind_down: false,
            measure_work: false,
            migrated: false,
        }
    }
}

/// Committed periods whose reward has not been minted yet.
///
/// Never holds more than two periods: a commitment mints everything up to the
/// previous period first, which leaves at most the current period pending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedPeriods {
    current: Option<Period>,
    next: Option<Period>,
}

impl CommittedPeriods {
    /// Pending periods, oldest first
    pub fn pending(&self) -> Vec<Period> {
        let mut periods: Vec<Period> = self.current.into_iter().chain(self.next).collect();
        periods.sort_unstable();
        periods
    }

    /// The later pending period
    pub fn next(&self) -> Option<Period> {
        self.next
    }

    /// The earlier pending period when two are pending
    pub fn current(&self) -> Option<Period> {
        self.current
    }

    pub fn contains(&self, period: Period) -> bool {
        self.current == Some(period) || self.next == Some(period)
    }

    pub fn latest(&self) -> Option<Period> {
        self.current.max(self.next)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }

    /// Add a newly committed period
    pub fn push(&mut self, period: Period) -> Result<()> {
        let mut periods = self.pending();
        if periods.len() == 2 {
            return Err(EscrowError::InvariantViolation(format!(
                "commitment to {period} with two periods already pending"
            )));
        }
        periods.push(period);
        periods.sort_unstable();
        periods.dedup();
        self.current = periods.first().copied().filter(|_| periods.len() == 2);
        self.next = periods.last().copied();
        Ok(())
    }

    /// Drop a period once its reward is minted
    pub fn clear(&mut self, period: Period) {
        if self.current == Some(period) {
            self.current = None;
        }
        if self.next == Some(period) {
            self.next = self.current.take();
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn released(sub_stake: &SubStake, current_period: Period, pending: &[Period]) -> bool {
    match sub_stake.last_period {
        Some(last) => last < current_period && pending.iter().all(|&p| last < p),
        None => false,
    }
}

/// Slashing view of a staker's locks around the current period
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockBreakdown {
    /// Active in the current period only
    pub current_lock: TokenAmount,
    /// Active in the next period only
    pub next_lock: TokenAmount,
    /// Active in both
    pub current_and_next_lock: TokenAmount,
    /// Shortest sub-stake active in the current period
    pub shortest: Option<usize>,
}

/// Everything the ledger knows about one staker
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerInfo {
    /// Deposited tokens plus minted reward, locked or not
    pub value: TokenAmount,
    pub committed: CommittedPeriods,
    /// Last processed commitment, kept once both pending slots are empty
    pub last_committed_period: Option<Period>,
    pub completed_work: TokenAmount,
    pub worker: Option<AccountId>,
    pub worker_start_period: Period,
    pub flags: StakerFlags,
    pub past_downtime: Vec<Downtime>,
    pub sub_stakes: SubStakes,
}

impl StakerInfo {
    /// A freshly registered staker
    pub fn fresh() -> Self {
        Self {
            flags: StakerFlags {
                migrated: true,
                ..StakerFlags::default()
            },
            ..Self::default()
        }
    }

    /// Reference period for the floating end of open sub-stakes.
    ///
    /// With wind-down the durations were already shortened when the next
    /// period was committed, so the reference moves forward by one.
    pub fn start_period(&self, current_period: Period) -> Period {
        match self.committed.next {
            Some(next) if self.flags.wind_down && next > current_period => current_period + 1,
            _ => current_period,
        }
    }

    /// Tokens locked in `period` as seen from `current_period`
    pub fn locked_tokens(&self, current_period: Period, period: Period) -> TokenAmount {
        let start = self.start_period(current_period);
        self.sub_stakes
            .iter()
            .filter(|s| s.is_active(period, start))
            .fold(0, |acc: TokenAmount, s| acc.saturating_add(s.locked_value))
    }

    /// Latest committed period, falling back to the last processed one
    pub fn last_active_period(&self) -> Option<Period> {
        self.committed.latest().or(self.last_committed_period)
    }

    /// Tokens that are neither locked now nor next period
    pub fn unlocked_tokens(&self, current_period: Period) -> TokenAmount {
        let locked = self
            .locked_tokens(current_period, current_period)
            .max(self.locked_tokens(current_period, current_period + 1));
        self.value.saturating_sub(locked)
    }

    /// True once a fixed sub-stake ended before now and before every pending commitment
    pub fn is_released(&self, sub_stake: &SubStake, current_period: Period) -> bool {
        released(sub_stake, current_period, &self.committed.pending())
    }

    /// Store a sub-stake, recycling a released slot when one exists
    pub fn save_sub_stake(&mut self, sub_stake: SubStake, current_period: Period) -> Result<usize> {
        let pending = self.committed.pending();
        self.sub_stakes
            .save(sub_stake, |s| released(s, current_period, &pending))
    }

    /// Current/next lock split plus the shortest sub-stake active now
    pub fn lock_breakdown(&self, current_period: Period) -> LockBreakdown {
        let next_period = current_period + 1;
        let start = self.start_period(current_period);
        let mut breakdown = LockBreakdown::default();
        for sub in self.sub_stakes.iter() {
            let last = sub.last_period_from(start);
            if last < sub.first_period {
                continue;
            }
            let active_now = sub.first_period <= current_period && last >= current_period;
            let active_next = sub.first_period <= next_period && last >= next_period;
            let bucket = match (active_now, active_next) {
                (true, true) => &mut breakdown.current_and_next_lock,
                (true, false) => &mut breakdown.current_lock,
                (false, true) => &mut breakdown.next_lock,
                (false, false) => continue,
            };
            *bucket = bucket.saturating_add(sub.locked_value);
        }
        breakdown.shortest = self.shortest_sub_stake(current_period, start);
        breakdown
    }

    /// Sub-stake active in `period` that ends first; ties go to the shorter window
    pub fn shortest_sub_stake(&self, period: Period, start_period: Period) -> Option<usize> {
        self.sub_stakes
            .iter()
            .enumerate()
            .filter_map(|(index, sub)| {
                let last = sub.last_period_from(start_period);
                (last >= sub.first_period && sub.is_active(period, start_period))
                    .then(|| (last, last - sub.first_period, index))
            })
            .min()
            .map(|(_, _, index)| index)
    }

    /// Keep `value` of a sub-stake starting at `first_period` counted for the
    /// pending commitments before `decrease_period`.
    ///
    /// Used when a sub-stake shrinks or moves its start: the removed value is
    /// preserved as a closed sub-stake ending at `decrease_period - 1` if an
    /// unminted commitment still needs it as reward base. The copy keeps
    /// `reward_last_period` as its reward end, so the duration factor of those
    /// commitments does not drop.
    pub fn save_old_sub_stake(
        &mut self,
        first_period: Period,
        value: TokenAmount,
        reward_last_period: Period,
        decrease_period: Period,
        current_period: Period,
    ) -> Result<()> {
        let pending = self.committed.pending();
        let crossed = |first: Period| -> Vec<bool> {
            pending
                .iter()
                .map(|&p| p < decrease_period && p >= first)
                .collect()
        };
        let signature = crossed(first_period);
        if !signature.iter().any(|&c| c) {
            return Ok(());
        }

        let previous_period = decrease_period.saturating_sub(1);
        // merge into an existing copy covering the same pending periods
        if let Some(existing) = self.sub_stakes.iter_mut().find(|s| {
            s.last_period == Some(previous_period)
                && s.reward_last_period == Some(reward_last_period)
                && crossed(s.first_period) == signature
        }) {
            existing.locked_value = existing
                .locked_value
                .checked_add(value)
                .ok_or(EscrowError::Overflow("old sub-stake value"))?;
            return Ok(());
        }

        let mut copy = SubStake::closed(first_period, previous_period, value);
        copy.reward_last_period = Some(reward_last_period);
        self.save_sub_stake(copy, current_period)?;
        Ok(())
    }
}
