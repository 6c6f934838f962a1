//! Sub-stake storage
//!
//! A staker holds a bounded slot array of sub-stakes. Slots are never shifted:
//! a released slot is overwritten by the next new sub-stake, and only the
//! explicit cleanup operation removes one (swap with the last slot).

use crate::constants::MAX_SUB_STAKES;
use escrow_core::{EscrowError, Period, Result, TokenAmount};
use serde::{Deserialize, Serialize};

/// One independently timed lock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStake {
    /// First period in which the value counts as locked
    pub first_period: Period,
    /// Fixed last period; `None` while the end floats with `unlocking_duration`
    pub last_period: Option<Period>,
    /// Periods left after the start period; 0 once the end is fixed
    pub unlocking_duration: u32,
    pub locked_value: TokenAmount,
    /// Last period the reward duration factor counts to, once the lock was cut
    /// short with unminted commitments still depending on the original end
    #[serde(default)]
    pub reward_last_period: Option<Period>,
}

impl SubStake {
    /// A new open sub-stake
    pub fn open(first_period: Period, unlocking_duration: u32, locked_value: TokenAmount) -> Self {
        Self {
            first_period,
            last_period: None,
            unlocking_duration,
            locked_value,
            reward_last_period: None,
        }
    }

    /// A sub-stake with a fixed window
    pub fn closed(first_period: Period, last_period: Period, locked_value: TokenAmount) -> Self {
        Self {
            first_period,
            last_period: Some(last_period),
            unlocking_duration: 0,
            locked_value,
            reward_last_period: None,
        }
    }

    /// Resolved last period relative to `start_period`
    pub fn last_period_from(&self, start_period: Period) -> Period {
        self.last_period
            .unwrap_or_else(|| start_period.saturating_add(self.unlocking_duration))
    }

    /// Last period the reward duration factor is measured against
    pub fn reward_last_period_from(&self, start_period: Period) -> Period {
        self.reward_last_period
            .unwrap_or_else(|| self.last_period_from(start_period))
    }

    /// Fix the end at `last_period`, keeping the earlier end for rewards
    pub fn cut_at(&mut self, last_period: Period, start_period: Period) {
        if self.reward_last_period.is_none() {
            self.reward_last_period = Some(self.last_period_from(start_period));
        }
        self.last_period = Some(last_period);
        self.unlocking_duration = 0;
    }

    /// True if the value counts as locked in `period`
    pub fn is_active(&self, period: Period, start_period: Period) -> bool {
        self.first_period <= period && period <= self.last_period_from(start_period)
    }

    pub fn is_open(&self) -> bool {
        self.last_period.is_none()
    }
}

/// Interval of periods a staker missed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downtime {
    pub start_period: Period,
    pub end_period: Period,
}

/// Slot array of a staker's sub-stakes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubStakes {
    slots: Vec<SubStake>,
}

impl SubStakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubStake> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubStake> {
        self.slots.iter_mut()
    }

    pub fn get(&self, index: usize) -> Result<&SubStake> {
        let len = self.slots.len();
        self.slots
            .get(index)
            .ok_or(EscrowError::SubStakeIndexOutOfRange { index, len })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut SubStake> {
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(EscrowError::SubStakeIndexOutOfRange { index, len })
    }

    /// Store a sub-stake, reusing the first slot `is_released` accepts.
    ///
    /// Returns the slot index.
    pub fn save<F>(&mut self, sub_stake: SubStake, is_released: F) -> Result<usize>
    where
        F: Fn(&SubStake) -> bool,
    {
        if let Some(index) = self.slots.iter().position(|s| is_released(s)) {
            self.slots[index] = sub_stake;
            return Ok(index);
        }
        if self.slots.len() >= MAX_SUB_STAKES {
            return Err(EscrowError::SubStakeLimitReached {
                max: MAX_SUB_STAKES,
            });
        }
        self.slots.push(sub_stake);
        Ok(self.slots.len() - 1)
    }

    /// Remove a slot by moving the last slot into its place
    pub fn swap_remove(&mut self, index: usize) -> Result<SubStake> {
        self.get(index)?;
        Ok(self.slots.swap_remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_sub_stake_window() {
        let sub = SubStake::open(6, 10, 1000);
        assert_eq!(sub.last_period_from(5), 15);
        assert!(!sub.is_active(5, 5));
        assert!(sub.is_active(6, 5));
        assert!(sub.is_active(15, 5));
        assert!(!sub.is_active(16, 5));
        // the end floats with the start period
        assert!(sub.is_active(16, 6));
    }

    #[test]
    fn test_closed_sub_stake_window() {
        let sub = SubStake::closed(3, 4, 10);
        assert_eq!(sub.last_period_from(100), 4);
        assert!(sub.is_active(4, 100));
        assert!(!sub.is_active(5, 0));
        assert!(!sub.is_open());
    }

    #[test]
    fn test_cut_keeps_reward_end() {
        let mut sub = SubStake::open(6, 10, 1000);
        assert_eq!(sub.reward_last_period_from(5), 15);

        sub.cut_at(6, 5);
        assert!(!sub.is_active(7, 5));
        assert_eq!(sub.reward_last_period_from(5), 15);
        // a second cut keeps the first end
        sub.cut_at(5, 5);
        assert_eq!(sub.reward_last_period_from(5), 15);
    }

    #[test]
    fn test_save_recycles_released_slot() {
        let mut subs = SubStakes::new();
        subs.save(SubStake::closed(1, 2, 10), |_| false).unwrap();
        subs.save(SubStake::open(3, 5, 20), |_| false).unwrap();

        let index = subs
            .save(SubStake::open(7, 5, 30), |s| s.last_period == Some(2))
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs.get(0).unwrap().locked_value, 30);
    }

    #[test]
    fn test_save_respects_cap() {
        let mut subs = SubStakes::new();
        for i in 0..MAX_SUB_STAKES {
            subs.save(SubStake::open(1, 5, i as u128 + 1), |_| false).unwrap();
        }
        assert!(matches!(
            subs.save(SubStake::open(1, 5, 1), |_| false),
            Err(EscrowError::SubStakeLimitReached { .. })
        ));
    }

    #[test]
    fn test_swap_remove() {
        let mut subs = SubStakes::new();
        subs.save(SubStake::open(1, 5, 1), |_| false).unwrap();
        subs.save(SubStake::open(1, 5, 2), |_| false).unwrap();
        subs.save(SubStake::open(1, 5, 3), |_| false).unwrap();

        let removed = subs.swap_remove(0).unwrap();
        assert_eq!(removed.locked_value, 1);
        assert_eq!(subs.get(0).unwrap().locked_value, 3);
        assert!(matches!(
            subs.get(2),
            Err(EscrowError::SubStakeIndexOutOfRange { index: 2, len: 2 })
        ));
    }
}
