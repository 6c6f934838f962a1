//! # Staking Escrow
//!
//! The authoritative per-staker, per-period lock ledger.
//!
//! ## Sub-stake Lifecycle
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `deposit` / `lock_and_create` | new open sub-stake starting next period |
//! | `lock_and_increase` | grows a sub-stake from next period, old value kept for pending rewards |
//! | `divide_stake` | splits off a longer sub-stake |
//! | `merge_stake` | joins two sub-stakes ending in the same period |
//! | `prolong_stake` | extends the unlocking duration |
//! | `remove_unused_sub_stake` | frees a released slot |
//!
//! Every operation validates against a staged [`Transaction`] and applies only
//! when nothing failed, so a rejected call leaves the ledger untouched.

use crate::collaborators::{FeeLedger, TokenCustody};
use crate::config::EscrowConfig;
use crate::constants::MAX_SUB_STAKES;
use crate::events::EscrowEvent;
use crate::issuer::Issuer;
use crate::staker::{StakerFlags, StakerInfo};
use crate::substake::{Downtime, SubStake};
use crate::txn::{ChangeSet, Transaction};
use escrow_core::{
    math, AccountId, Clock, EscrowError, Period, PeriodClock, Result, TokenAmount,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Staking limits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingParams {
    /// Shortest lock a sub-stake may have
    pub min_locked_periods: u32,
    /// Smallest sub-stake
    pub min_allowable_locked_tokens: TokenAmount,
    /// Largest per-staker lock
    pub max_allowable_locked_tokens: TokenAmount,
    /// Periods before a worker may be changed again
    pub min_worker_periods: u32,
}

impl StakingParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_locked_periods <= 1
            || self.min_allowable_locked_tokens == 0
            || self.min_allowable_locked_tokens > self.max_allowable_locked_tokens
        {
            return Err(EscrowError::InvalidConfiguration(
                "staking limits are inconsistent".to_string(),
            ));
        }
        Ok(())
    }
}

/// Privileged identities
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorities {
    /// May initialize the reward reserve
    pub owner: AccountId,
    /// Account holding the escrowed tokens
    pub custody: AccountId,
    /// The only caller allowed to slash
    pub adjudicator: AccountId,
    /// Allocation module allowed to deposit for claimants and toggle work measurement
    pub work_lock: Option<AccountId>,
}

/// External services the ledger calls
#[derive(Clone)]
pub struct Collaborators {
    pub token: Arc<dyn TokenCustody>,
    pub fee_ledger: Arc<dyn FeeLedger>,
}

impl Collaborators {
    pub fn new(token: Arc<dyn TokenCustody>, fee_ledger: Arc<dyn FeeLedger>) -> Self {
        Self { token, fee_ledger }
    }
}

/// One staker of a batch deposit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeposit {
    pub staker: AccountId,
    /// `(value, unlocking duration)` of every sub-stake
    pub sub_stakes: Vec<(TokenAmount, u32)>,
}

/// Committed ledger state
#[derive(Clone, Debug)]
pub(crate) struct LedgerState {
    pub issuer: Issuer,
    pub stakers: HashMap<AccountId, StakerInfo>,
    /// Stakers in registration order
    pub staker_order: Vec<AccountId>,
    pub locked_per_period: BTreeMap<Period, TokenAmount>,
    pub staker_from_worker: HashMap<AccountId, AccountId>,
}

impl LedgerState {
    pub(crate) fn new(issuer: Issuer) -> Self {
        Self {
            issuer,
            stakers: HashMap::new(),
            staker_order: Vec::new(),
            locked_per_period: BTreeMap::new(),
            staker_from_worker: HashMap::new(),
        }
    }
}

/// Where a deposit goes
#[derive(Clone, Copy, Debug)]
enum DepositTarget {
    NewSubStake { periods: u32 },
    SubStake { index: usize },
}

/// The staking escrow ledger
pub struct StakingEscrow {
    params: StakingParams,
    clock: PeriodClock,
    pub(crate) state: LedgerState,
    authorities: Authorities,
    pub(crate) collaborators: Collaborators,
    events: Vec<EscrowEvent>,
}

impl fmt::Debug for StakingEscrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StakingEscrow")
            .field("params", &self.params)
            .field("clock", &self.clock)
            .field("stakers", &self.state.staker_order.len())
            .field("issuer", &self.state.issuer.state())
            .field("authorities", &self.authorities)
            .finish()
    }
}

impl StakingEscrow {
    pub fn new(
        params: StakingParams,
        issuer: Issuer,
        clock: PeriodClock,
        authorities: Authorities,
        collaborators: Collaborators,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            clock,
            state: LedgerState::new(issuer),
            authorities,
            collaborators,
            events: Vec::new(),
        })
    }

    /// Build a ledger from a validated configuration
    pub fn from_config(
        config: &EscrowConfig,
        source: Arc<dyn Clock>,
        authorities: Authorities,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let issuer = Issuer::new(config.issuance_params(), config.total_supply())?;
        let clock = PeriodClock::new(
            source,
            config.period.seconds_per_period,
            config.period.genesis_seconds_per_period,
        );
        Self::new(
            config.staking_params(),
            issuer,
            clock,
            authorities,
            collaborators,
        )
    }

    pub(crate) fn from_parts(
        params: StakingParams,
        clock: PeriodClock,
        state: LedgerState,
        authorities: Authorities,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            params,
            clock,
            state,
            authorities,
            collaborators,
            events: Vec::new(),
        }
    }

    pub fn params(&self) -> &StakingParams {
        &self.params
    }

    pub fn clock(&self) -> &PeriodClock {
        &self.clock
    }

    pub fn authorities(&self) -> &Authorities {
        &self.authorities
    }

    pub fn issuer(&self) -> &Issuer {
        &self.state.issuer
    }

    pub fn current_period(&self) -> Period {
        self.clock.current_period()
    }

    /// Events applied so far and not yet drained
    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<EscrowEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn apply(&mut self, changes: ChangeSet) {
        let events = self.state.apply(changes);
        for event in &events {
            event.log();
        }
        self.events.extend(events);
    }

    pub(crate) fn require_initialized(&self) -> Result<()> {
        if self.state.issuer.is_initialized() {
            Ok(())
        } else {
            Err(EscrowError::NotInitialized)
        }
    }

    /// Fund the reward reserve from `source` and start issuance
    pub fn initialize(
        &mut self,
        caller: AccountId,
        reserved_reward: TokenAmount,
        source: AccountId,
    ) -> Result<()> {
        if caller != self.authorities.owner {
            warn!(%caller, "Rejected initialization by non-owner");
            return Err(EscrowError::Unauthorized(caller));
        }
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        txn.issuer.initialize(reserved_reward, current)?;
        txn.emit(EscrowEvent::Initialized { reserved_reward });
        let changes = txn.finish();

        self.collaborators
            .token
            .transfer(source, self.authorities.custody, reserved_reward)?;
        self.apply(changes);
        Ok(())
    }

    /// Return tokens to the reward reserve
    pub fn donate(&mut self, payer: AccountId, value: TokenAmount) -> Result<()> {
        self.require_initialized()?;
        if value == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let mut txn = Transaction::new(&self.state);
        let minted = txn.issuer.state().current_period_supply;
        if value > minted {
            return Err(EscrowError::ExceedsMaximum {
                requested: value,
                maximum: minted,
            });
        }
        txn.issuer.un_mint(value)?;
        txn.emit(EscrowEvent::Donated { payer, value });
        let changes = txn.finish();

        self.collaborators
            .token
            .transfer(payer, self.authorities.custody, value)?;
        self.apply(changes);
        Ok(())
    }

    /// Deposit tokens from `payer` and lock them as a new sub-stake
    pub fn deposit(
        &mut self,
        staker: AccountId,
        payer: AccountId,
        value: TokenAmount,
        periods: u32,
    ) -> Result<()> {
        self.deposit_to(staker, payer, value, DepositTarget::NewSubStake { periods })
    }

    /// Deposit tokens from `payer` into an existing sub-stake
    pub fn deposit_and_increase(
        &mut self,
        staker: AccountId,
        payer: AccountId,
        index: usize,
        value: TokenAmount,
    ) -> Result<()> {
        self.deposit_to(staker, payer, value, DepositTarget::SubStake { index })
    }

    /// Deposit on behalf of a claimant of the allocation module
    pub fn deposit_from_work_lock(
        &mut self,
        caller: AccountId,
        staker: AccountId,
        value: TokenAmount,
        periods: u32,
    ) -> Result<()> {
        self.require_work_lock(caller)?;
        self.deposit_to(staker, caller, value, DepositTarget::NewSubStake { periods })
    }

    fn deposit_to(
        &mut self,
        staker: AccountId,
        payer: AccountId,
        value: TokenAmount,
        target: DepositTarget,
    ) -> Result<()> {
        self.require_initialized()?;
        if value == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);

        // a staker cannot be somebody else's worker
        if let Some(bonded) = txn.staker_from_worker(staker) {
            if bonded != staker {
                return Err(EscrowError::WorkerInUse(staker));
            }
        }
        let (mut info, fresh) = match txn.staker(staker) {
            Some(info) => (info, false),
            None => (StakerInfo::fresh(), true),
        };
        if !info.flags.migrated {
            return Err(EscrowError::NotMigrated(staker));
        }
        info.value = math::add(info.value, value, "staker value")?;

        let periods = match target {
            DepositTarget::NewSubStake { periods } => {
                lock_and_create_in(&mut txn, &self.params, staker, &mut info, value, periods, current)?;
                periods
            }
            DepositTarget::SubStake { index } => {
                increase_sub_stake_in(&mut txn, &self.params, staker, &mut info, index, value, current)?
            }
        };

        if fresh {
            txn.register(staker);
        }
        txn.emit(EscrowEvent::Deposited {
            staker,
            value,
            periods,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();

        self.collaborators
            .token
            .transfer(payer, self.authorities.custody, value)?;
        if fresh {
            self.collaborators
                .fee_ledger
                .register(staker, current.saturating_sub(1))?;
        }
        debug!(%staker, %value, periods, fresh, "Deposit accepted");
        self.apply(changes);
        Ok(())
    }

    /// Create stakes for several fresh stakers paid by `payer`
    pub fn batch_deposit(&mut self, payer: AccountId, entries: &[BatchDeposit]) -> Result<()> {
        self.require_initialized()?;
        let current = self.current_period();
        let next = current + 1;
        let mut txn = Transaction::new(&self.state);
        let mut total: TokenAmount = 0;

        for entry in entries {
            let staker = entry.staker;
            if txn.staker(staker).is_some() {
                return Err(EscrowError::AlreadyStaker(staker));
            }
            if txn.staker_from_worker(staker).is_some() {
                return Err(EscrowError::WorkerInUse(staker));
            }
            if entry.sub_stakes.is_empty() {
                return Err(EscrowError::ZeroValue);
            }

            let mut info = StakerInfo::fresh();
            for &(value, periods) in &entry.sub_stakes {
                self.check_new_sub_stake(value, periods)?;
                info.value = math::add(info.value, value, "staker value")?;
                info.save_sub_stake(SubStake::open(next, periods, value), current)?;
                txn.emit(EscrowEvent::Deposited {
                    staker,
                    value,
                    periods,
                });
                txn.emit(EscrowEvent::Locked {
                    staker,
                    value,
                    first_period: next,
                    periods,
                });
            }
            if info.value > self.params.max_allowable_locked_tokens {
                return Err(EscrowError::ExceedsMaximum {
                    requested: info.value,
                    maximum: self.params.max_allowable_locked_tokens,
                });
            }
            total = math::add(total, info.value, "batch deposit")?;
            txn.register(staker);
            txn.store_staker(staker, info);
        }
        let changes = txn.finish();

        self.collaborators
            .token
            .transfer(payer, self.authorities.custody, total)?;
        for entry in entries {
            self.collaborators
                .fee_ledger
                .register(entry.staker, current.saturating_sub(1))?;
        }
        debug!(stakers = entries.len(), %total, "Batch deposit accepted");
        self.apply(changes);
        Ok(())
    }

    /// Lock already deposited tokens as a new sub-stake
    pub fn lock_and_create(&mut self, staker: AccountId, value: TokenAmount, periods: u32) -> Result<()> {
        self.require_initialized()?;
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        lock_and_create_in(&mut txn, &self.params, staker, &mut info, value, periods, current)?;
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(())
    }

    /// Lock already deposited tokens into an existing sub-stake
    pub fn lock_and_increase(&mut self, staker: AccountId, index: usize, value: TokenAmount) -> Result<()> {
        self.require_initialized()?;
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        increase_sub_stake_in(&mut txn, &self.params, staker, &mut info, index, value, current)?;
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(())
    }

    /// Split `new_value` off a sub-stake into a new one locked `periods` longer
    pub fn divide_stake(
        &mut self,
        staker: AccountId,
        index: usize,
        new_value: TokenAmount,
        periods: u32,
    ) -> Result<()> {
        self.require_initialized()?;
        let min = self.params.min_allowable_locked_tokens;
        if new_value < min {
            return Err(EscrowError::BelowMinimum {
                value: new_value,
                minimum: min,
            });
        }
        if periods == 0 {
            return Err(EscrowError::DurationTooShort {
                periods,
                minimum: 1,
            });
        }
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        let start = info.start_period(current);

        let sub = *info.sub_stakes.get(index)?;
        let last = sub.last_period_from(start);
        if last <= current {
            return Err(EscrowError::SubStakeInactive { index });
        }
        let remaining = sub
            .locked_value
            .checked_sub(new_value)
            .ok_or(EscrowError::ExceedsBalance {
                requested: new_value,
                available: sub.locked_value,
            })?;
        if remaining < min {
            return Err(EscrowError::BelowMinimum {
                value: remaining,
                minimum: min,
            });
        }
        let duration = (last - start)
            .checked_add(periods)
            .ok_or(EscrowError::Overflow("sub-stake duration"))?;

        info.sub_stakes.get_mut(index)?.locked_value = remaining;
        info.save_sub_stake(SubStake::open(sub.first_period, duration, new_value), current)?;

        txn.emit(EscrowEvent::Divided {
            staker,
            old_value: sub.locked_value,
            last_period: last,
            new_value,
            periods,
        });
        txn.emit(EscrowEvent::Locked {
            staker,
            value: new_value,
            first_period: sub.first_period,
            periods: duration,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(())
    }

    /// Join two sub-stakes that end in the same period
    pub fn merge_stake(&mut self, staker: AccountId, index_1: usize, index_2: usize) -> Result<()> {
        self.require_initialized()?;
        if index_1 == index_2 {
            return Err(EscrowError::SameSubStake);
        }
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        let start = info.start_period(current);

        let sub_1 = *info.sub_stakes.get(index_1)?;
        let sub_2 = *info.sub_stakes.get(index_2)?;
        let last_1 = sub_1.last_period_from(start);
        let last_2 = sub_2.last_period_from(start);
        if last_1 != last_2 {
            return Err(EscrowError::LastPeriodMismatch {
                first: last_1,
                second: last_2,
            });
        }
        if last_1 <= current {
            return Err(EscrowError::SubStakeInactive { index: index_1 });
        }

        // the later-starting sub-stake absorbs the other, which keeps counting
        // only for the periods before the absorber starts
        let (keep, retire) = if sub_1.first_period >= sub_2.first_period {
            (index_1, index_2)
        } else {
            (index_2, index_1)
        };
        let kept = *info.sub_stakes.get(keep)?;
        let retired = *info.sub_stakes.get(retire)?;
        let merged = math::add(kept.locked_value, retired.locked_value, "merged sub-stake")?;
        info.sub_stakes.get_mut(keep)?.locked_value = merged;
        let retired_last = kept.first_period.saturating_sub(1);
        info.sub_stakes.get_mut(retire)?.cut_at(retired_last, start);

        let sub_1 = *info.sub_stakes.get(index_1)?;
        let sub_2 = *info.sub_stakes.get(index_2)?;
        txn.emit(EscrowEvent::Merged {
            staker,
            value_1: sub_1.locked_value,
            value_2: sub_2.locked_value,
            last_period: last_1,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(())
    }

    /// Extend the unlocking duration of a sub-stake
    pub fn prolong_stake(&mut self, staker: AccountId, index: usize, periods: u32) -> Result<()> {
        self.require_initialized()?;
        if periods == 0 {
            return Err(EscrowError::DurationTooShort {
                periods,
                minimum: 1,
            });
        }
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        let start = info.start_period(current);

        let sub = *info.sub_stakes.get(index)?;
        let last = sub.last_period_from(start);
        if last <= current {
            return Err(EscrowError::SubStakeInactive { index });
        }
        let remaining = (last - current)
            .checked_add(periods)
            .ok_or(EscrowError::Overflow("sub-stake duration"))?;
        if remaining < self.params.min_locked_periods {
            return Err(EscrowError::DurationTooShort {
                periods: remaining,
                minimum: self.params.min_locked_periods,
            });
        }
        let duration = (last - start)
            .checked_add(periods)
            .ok_or(EscrowError::Overflow("sub-stake duration"))?;

        let slot = info.sub_stakes.get_mut(index)?;
        slot.last_period = None;
        slot.unlocking_duration = duration;

        txn.emit(EscrowEvent::Locked {
            staker,
            value: sub.locked_value,
            first_period: last + 1,
            periods,
        });
        txn.emit(EscrowEvent::Prolonged {
            staker,
            value: sub.locked_value,
            last_period: last,
            periods,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(())
    }

    /// Drop a released sub-stake by moving the last slot into its place
    pub fn remove_unused_sub_stake(&mut self, staker: AccountId, index: usize) -> Result<()> {
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        let sub = *info.sub_stakes.get(index)?;
        if !info.is_released(&sub, current) {
            return Err(EscrowError::SubStakeInUse { index });
        }
        info.sub_stakes.swap_remove(index)?;
        txn.store_staker(staker, info);
        let changes = txn.finish();
        debug!(%staker, index, "Removed unused sub-stake");
        self.apply(changes);
        Ok(())
    }

    /// Return unlocked tokens to the staker
    pub fn withdraw(&mut self, staker: AccountId, value: TokenAmount) -> Result<()> {
        if value == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;

        let available = info.unlocked_tokens(current);
        if value > available {
            return Err(EscrowError::InsufficientUnlocked {
                requested: value,
                available,
            });
        }
        info.value -= value;
        txn.emit(EscrowEvent::Withdrawn { staker, value });

        // nothing left to work for
        if info.value == 0 && info.committed.next().is_none() {
            if let Some(worker) = info.worker.take() {
                txn.unlink_worker(worker);
                info.worker_start_period = current;
                txn.emit(EscrowEvent::WorkerBonded {
                    staker,
                    worker: None,
                    start_period: current,
                });
            }
        }
        txn.store_staker(staker, info);
        let changes = txn.finish();

        self.collaborators
            .token
            .transfer(self.authorities.custody, staker, value)?;
        self.apply(changes);
        Ok(())
    }

    /// Toggle compounding of minted reward
    pub fn set_re_stake(&mut self, staker: AccountId, re_stake: bool) -> Result<()> {
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        if info.flags.re_stake == re_stake {
            return Ok(());
        }
        info.flags.re_stake = re_stake;
        txn.emit(EscrowEvent::ReStakeSet { staker, re_stake });
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(())
    }

    /// Toggle wind-down; resolved last periods stay where they are
    pub fn set_wind_down(&mut self, staker: AccountId, wind_down: bool) -> Result<()> {
        let current = self.current_period();
        let next = current + 1;
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        if info.flags.wind_down == wind_down {
            return Ok(());
        }
        info.flags.wind_down = wind_down;
        txn.emit(EscrowEvent::WindDownSet { staker, wind_down });

        // the start period shifts by one when the next period is committed
        if info.committed.next() == Some(next) {
            for sub in info.sub_stakes.iter_mut() {
                if !wind_down && sub.last_period == Some(next) {
                    sub.last_period = None;
                    sub.unlocking_duration = 1;
                    continue;
                }
                if sub.last_period.is_some() || sub.unlocking_duration == 0 {
                    continue;
                }
                if wind_down {
                    sub.unlocking_duration -= 1;
                } else {
                    sub.unlocking_duration += 1;
                }
                if sub.unlocking_duration == 0 {
                    sub.last_period = Some(next);
                }
            }
        }
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(())
    }

    /// Toggle work measurement; returns the work completed so far
    pub fn set_work_measurement(
        &mut self,
        caller: AccountId,
        staker: AccountId,
        measure_work: bool,
    ) -> Result<TokenAmount> {
        self.require_work_lock(caller)?;
        let mut txn = Transaction::new(&self.state);
        let mut info = txn.existing_staker(staker)?;
        let completed_work = info.completed_work;
        if info.flags.measure_work == measure_work {
            return Ok(completed_work);
        }
        info.flags.measure_work = measure_work;
        txn.emit(EscrowEvent::WorkMeasurementSet {
            staker,
            measure_work,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();
        self.apply(changes);
        Ok(completed_work)
    }

    fn require_work_lock(&self, caller: AccountId) -> Result<()> {
        if self.authorities.work_lock == Some(caller) {
            Ok(())
        } else {
            warn!(%caller, "Rejected allocation-module call");
            Err(EscrowError::Unauthorized(caller))
        }
    }

    fn check_new_sub_stake(&self, value: TokenAmount, periods: u32) -> Result<()> {
        check_new_sub_stake(&self.params, value, periods)
    }

    // === Queries ===

    pub fn staker_info(&self, staker: AccountId) -> Option<&StakerInfo> {
        self.state.stakers.get(&staker)
    }

    /// Deposited tokens plus minted reward
    pub fn all_tokens(&self, staker: AccountId) -> TokenAmount {
        self.staker_info(staker).map(|i| i.value).unwrap_or(0)
    }

    /// Tokens locked `periods` periods from now
    pub fn locked_tokens(&self, staker: AccountId, periods: u32) -> TokenAmount {
        let current = self.current_period();
        self.staker_info(staker)
            .map(|i| i.locked_tokens(current, current.saturating_add(periods)))
            .unwrap_or(0)
    }

    /// Tokens committed by all stakers for `period`
    pub fn locked_per_period(&self, period: Period) -> TokenAmount {
        self.state.locked_per_period.get(&period).copied().unwrap_or(0)
    }

    pub fn last_committed_period(&self, staker: AccountId) -> Option<Period> {
        self.staker_info(staker).and_then(|i| i.last_active_period())
    }

    pub fn sub_stake(&self, staker: AccountId, index: usize) -> Result<SubStake> {
        let info = self
            .staker_info(staker)
            .ok_or(EscrowError::NotAStaker(staker))?;
        info.sub_stakes.get(index).copied()
    }

    pub fn sub_stakes_length(&self, staker: AccountId) -> usize {
        self.staker_info(staker).map(|i| i.sub_stakes.len()).unwrap_or(0)
    }

    pub fn past_downtime(&self, staker: AccountId) -> Vec<Downtime> {
        self.staker_info(staker)
            .map(|i| i.past_downtime.clone())
            .unwrap_or_default()
    }

    pub fn completed_work(&self, staker: AccountId) -> TokenAmount {
        self.staker_info(staker).map(|i| i.completed_work).unwrap_or(0)
    }

    pub fn flags(&self, staker: AccountId) -> Option<StakerFlags> {
        self.staker_info(staker).map(|i| i.flags)
    }

    pub fn worker_of(&self, staker: AccountId) -> Option<AccountId> {
        self.staker_info(staker).and_then(|i| i.worker)
    }

    pub fn staker_from_worker(&self, worker: AccountId) -> Option<AccountId> {
        self.state.staker_from_worker.get(&worker).copied()
    }

    /// Stakers in registration order
    pub fn stakers(&self) -> &[AccountId] {
        &self.state.staker_order
    }

    pub fn stakers_length(&self) -> usize {
        self.state.staker_order.len()
    }

    pub fn reserved_reward(&self) -> TokenAmount {
        self.state.issuer.reserved_reward()
    }

    /// Verify the ledger's bookkeeping.
    ///
    /// Checks that no staker has more locked than it owns in the current or
    /// any later period, that worker links are bidirectional and that the
    /// staker list matches the records.
    pub fn check_invariants(&self) -> Result<()> {
        let current = self.current_period();
        let breach = |msg: String| Err(EscrowError::InvariantViolation(msg));

        if self.state.staker_order.len() != self.state.stakers.len() {
            return breach("staker list and records disagree".to_string());
        }
        for staker in &self.state.staker_order {
            let Some(info) = self.state.stakers.get(staker) else {
                return breach(format!("staker {staker} has no record"));
            };
            if info.sub_stakes.len() > MAX_SUB_STAKES {
                return breach(format!("staker {staker} exceeds the sub-stake cap"));
            }
            if let Some(worker) = info.worker {
                if self.state.staker_from_worker.get(&worker) != Some(staker) {
                    return breach(format!("worker {worker} of {staker} is not linked back"));
                }
            }
            if !info.flags.migrated {
                continue;
            }
            let checkpoints = [current, current + 1].into_iter().chain(
                info.sub_stakes
                    .iter()
                    .map(|s| s.first_period)
                    .filter(|&p| p > current),
            );
            for period in checkpoints {
                let locked = info.locked_tokens(current, period);
                if locked > info.value {
                    return breach(format!(
                        "staker {staker} locks {locked} in period {period} but owns {}",
                        info.value
                    ));
                }
            }
        }
        for (worker, staker) in &self.state.staker_from_worker {
            let linked = self.state.stakers.get(staker).and_then(|i| i.worker);
            if linked != Some(*worker) {
                return breach(format!("worker link {worker} -> {staker} is stale"));
            }
        }
        Ok(())
    }
}

/// Staker record that exists and uses the active period length
pub(crate) fn active_staker(txn: &Transaction<'_>, staker: AccountId) -> Result<StakerInfo> {
    let info = txn.existing_staker(staker)?;
    if !info.flags.migrated {
        return Err(EscrowError::NotMigrated(staker));
    }
    Ok(info)
}

fn check_new_sub_stake(params: &StakingParams, value: TokenAmount, periods: u32) -> Result<()> {
    if value < params.min_allowable_locked_tokens {
        return Err(EscrowError::BelowMinimum {
            value,
            minimum: params.min_allowable_locked_tokens,
        });
    }
    if periods < params.min_locked_periods {
        return Err(EscrowError::DurationTooShort {
            periods,
            minimum: params.min_locked_periods,
        });
    }
    Ok(())
}

/// Tokens locked next period after adding `value`, checked against the limits
fn requested_lock(
    params: &StakingParams,
    info: &StakerInfo,
    value: TokenAmount,
    current: Period,
) -> Result<TokenAmount> {
    let requested = math::add(
        info.locked_tokens(current, current + 1),
        value,
        "requested lock",
    )?;
    if requested > info.value {
        return Err(EscrowError::ExceedsBalance {
            requested,
            available: info.value,
        });
    }
    if requested > params.max_allowable_locked_tokens {
        return Err(EscrowError::ExceedsMaximum {
            requested,
            maximum: params.max_allowable_locked_tokens,
        });
    }
    Ok(requested)
}

fn lock_and_create_in(
    txn: &mut Transaction<'_>,
    params: &StakingParams,
    staker: AccountId,
    info: &mut StakerInfo,
    value: TokenAmount,
    periods: u32,
    current: Period,
) -> Result<()> {
    check_new_sub_stake(params, value, periods)?;
    requested_lock(params, info, value, current)?;

    let next = current + 1;
    let next_committed = info.committed.next() == Some(next);
    // the commitment already counted this staker for the next period
    if next_committed {
        txn.add_locked(next, value)?;
        txn.emit(EscrowEvent::CommitmentMade {
            staker,
            period: next,
            value,
        });
    }
    let duration = if next_committed && info.flags.wind_down {
        periods - 1
    } else {
        periods
    };
    info.save_sub_stake(SubStake::open(next, duration, value), current)?;
    txn.emit(EscrowEvent::Locked {
        staker,
        value,
        first_period: next,
        periods,
    });
    Ok(())
}

/// Grow a sub-stake from the next period on; returns its remaining periods
fn increase_sub_stake_in(
    txn: &mut Transaction<'_>,
    params: &StakingParams,
    staker: AccountId,
    info: &mut StakerInfo,
    index: usize,
    value: TokenAmount,
    current: Period,
) -> Result<u32> {
    if value == 0 {
        return Err(EscrowError::ZeroValue);
    }
    let next = current + 1;
    let start = info.start_period(current);
    let sub = *info.sub_stakes.get(index)?;
    let last = sub.last_period_from(start);
    if last <= current {
        return Err(EscrowError::SubStakeInactive { index });
    }
    requested_lock(params, info, value, current)?;

    if info.committed.next() == Some(next) {
        txn.add_locked(next, value)?;
        txn.emit(EscrowEvent::CommitmentMade {
            staker,
            period: next,
            value,
        });
    }
    info.save_old_sub_stake(
        sub.first_period,
        sub.locked_value,
        sub.reward_last_period_from(start),
        next,
        current,
    )?;
    let slot = info.sub_stakes.get_mut(index)?;
    slot.first_period = next;
    slot.locked_value = math::add(slot.locked_value, value, "sub-stake value")?;

    let periods = last - current;
    txn.emit(EscrowEvent::Locked {
        staker,
        value,
        first_period: next,
        periods,
    });
    Ok(periods)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{InMemoryToken, RecordingFeeLedger};
    use crate::issuer::IssuanceParams;
    use escrow_core::ManualClock;

    pub(crate) const SPP: u32 = 100;

    pub(crate) struct Fixture {
        pub escrow: StakingEscrow,
        pub clock: Arc<ManualClock>,
        pub token: Arc<InMemoryToken>,
        pub fee_ledger: Arc<RecordingFeeLedger>,
        pub owner: AccountId,
        pub adjudicator: AccountId,
        pub work_lock: AccountId,
    }

    impl Fixture {
        /// Ledger at `period` with small round numbers: min stake 100, max 10_000,
        /// min lock 2 periods, reserve 1_000_000
        pub fn at(period: Period) -> Self {
            let owner = AccountId::from_label("owner");
            let adjudicator = AccountId::from_label("adjudicator");
            let work_lock = AccountId::from_label("work-lock");
            let custody = AccountId::from_label("escrow");
            let clock = Arc::new(ManualClock::new(u64::from(period) * u64::from(SPP)));
            let token = Arc::new(InMemoryToken::new(owner, 10_000_000));
            let fee_ledger = Arc::new(RecordingFeeLedger::new());

            let issuance = IssuanceParams {
                issuance_decay_coefficient: 2,
                lock_duration_coefficient_1: 1,
                lock_duration_coefficient_2: 4,
                maximum_rewarded_periods: 3,
                first_phase_total_supply: 0,
                first_phase_max_issuance: 0,
            };
            let issuer = Issuer::new(issuance, 10_000_000).unwrap();
            let params = StakingParams {
                min_locked_periods: 2,
                min_allowable_locked_tokens: 100,
                max_allowable_locked_tokens: 10_000,
                min_worker_periods: 2,
            };
            let mut escrow = StakingEscrow::new(
                params,
                issuer,
                PeriodClock::new(clock.clone(), SPP, SPP),
                Authorities {
                    owner,
                    custody,
                    adjudicator,
                    work_lock: Some(work_lock),
                },
                Collaborators::new(token.clone(), fee_ledger.clone()),
            )
            .unwrap();
            escrow.initialize(owner, 1_000_000, owner).unwrap();
            escrow.drain_events();

            Self {
                escrow,
                clock,
                token,
                fee_ledger,
                owner,
                adjudicator,
                work_lock,
            }
        }

        /// A funded account
        pub fn account(&self, label: &str, balance: TokenAmount) -> AccountId {
            let account = AccountId::from_label(label);
            self.token.transfer(self.owner, account, balance).unwrap();
            account
        }

        pub fn advance(&self, periods: u32) {
            self.clock.advance(u64::from(periods) * u64::from(SPP));
        }
    }

    #[test]
    fn test_initialize_owner_only() {
        let fx = Fixture::at(1);
        let mut escrow = fx.escrow;
        assert!(matches!(
            escrow.initialize(fx.owner, 1, fx.owner),
            Err(EscrowError::AlreadyInitialized)
        ));
        assert_eq!(escrow.reserved_reward(), 1_000_000);
        assert_eq!(fx.token.balance_of(escrow.authorities().custody), 1_000_000);
    }

    #[test]
    fn test_deposit_creates_open_sub_stake() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();

        let sub = fx.escrow.sub_stake(alice, 0).unwrap();
        assert_eq!(sub, SubStake::open(6, 10, 1_000));
        assert_eq!(fx.escrow.all_tokens(alice), 1_000);
        assert_eq!(fx.escrow.locked_tokens(alice, 0), 0);
        assert_eq!(fx.escrow.locked_tokens(alice, 1), 1_000);
        assert_eq!(fx.escrow.stakers(), &[alice]);
        assert_eq!(fx.token.balance_of(alice), 4_000);
        assert!(fx.escrow.flags(alice).unwrap().migrated);
        assert_eq!(
            fx.fee_ledger.calls()[0],
            crate::FeeLedgerCall::Register {
                staker: alice,
                period: 4
            }
        );
        fx.escrow.check_invariants().unwrap();
    }

    #[test]
    fn test_deposit_preconditions() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 100_000);
        assert!(matches!(
            fx.escrow.deposit(alice, alice, 0, 10),
            Err(EscrowError::ZeroValue)
        ));
        assert!(matches!(
            fx.escrow.deposit(alice, alice, 99, 10),
            Err(EscrowError::BelowMinimum { .. })
        ));
        assert!(matches!(
            fx.escrow.deposit(alice, alice, 1_000, 1),
            Err(EscrowError::DurationTooShort { .. })
        ));
        assert!(matches!(
            fx.escrow.deposit(alice, alice, 10_001, 10),
            Err(EscrowError::ExceedsMaximum { .. })
        ));
        // nothing was applied
        assert_eq!(fx.escrow.stakers_length(), 0);
        assert!(fx.fee_ledger.calls().is_empty());
        assert_eq!(fx.token.balance_of(alice), 100_000);
    }

    #[test]
    fn test_failed_token_transfer_leaves_ledger_untouched() {
        let mut fx = Fixture::at(5);
        let poor = fx.account("poor", 50);
        assert!(matches!(
            fx.escrow.deposit(poor, poor, 1_000, 10),
            Err(EscrowError::TokenTransfer(_))
        ));
        assert_eq!(fx.escrow.stakers_length(), 0);
        assert!(fx.escrow.events().is_empty());
        // the fee ledger only hears about stakers whose tokens arrived
        assert!(fx.fee_ledger.calls().is_empty());

        let entries = vec![BatchDeposit {
            staker: AccountId::from_label("a"),
            sub_stakes: vec![(100, 5)],
        }];
        assert!(matches!(
            fx.escrow.batch_deposit(poor, &entries),
            Err(EscrowError::TokenTransfer(_))
        ));
        assert!(fx.fee_ledger.calls().is_empty());
        assert_eq!(fx.token.balance_of(poor), 50);
    }

    #[test]
    fn test_lock_requires_unlocked_tokens() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        assert!(matches!(
            fx.escrow.lock_and_create(alice, 500, 4),
            Err(EscrowError::ExceedsBalance { .. })
        ));
        assert!(matches!(
            fx.escrow.lock_and_increase(alice, 0, 500),
            Err(EscrowError::ExceedsBalance { .. })
        ));

        fx.escrow.deposit_and_increase(alice, alice, 0, 500).unwrap();
        assert_eq!(fx.escrow.sub_stakes_length(alice), 1);
        assert_eq!(fx.escrow.sub_stake(alice, 0).unwrap().locked_value, 1_500);
        assert_eq!(fx.escrow.locked_tokens(alice, 1), 1_500);
    }

    #[test]
    fn test_divide_and_merge_restores_value() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();

        fx.escrow.divide_stake(alice, 0, 400, 3).unwrap();
        assert_eq!(fx.escrow.sub_stake(alice, 0).unwrap(), SubStake::open(6, 10, 600));
        assert_eq!(fx.escrow.sub_stake(alice, 1).unwrap(), SubStake::open(6, 13, 400));

        assert!(matches!(
            fx.escrow.merge_stake(alice, 0, 1),
            Err(EscrowError::LastPeriodMismatch { first: 15, second: 18 })
        ));
        fx.escrow.prolong_stake(alice, 0, 3).unwrap();
        fx.escrow.merge_stake(alice, 0, 1).unwrap();

        assert_eq!(fx.escrow.locked_tokens(alice, 1), 1_000);
        assert_eq!(fx.escrow.locked_tokens(alice, 13), 1_000);
        assert_eq!(fx.escrow.sub_stake(alice, 0).unwrap().locked_value, 1_000);
        fx.escrow.check_invariants().unwrap();
    }

    #[test]
    fn test_divide_preconditions() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        assert!(matches!(
            fx.escrow.divide_stake(alice, 0, 950, 1),
            Err(EscrowError::BelowMinimum { value: 50, .. })
        ));
        assert!(matches!(
            fx.escrow.divide_stake(alice, 0, 500, 0),
            Err(EscrowError::DurationTooShort { .. })
        ));
        assert!(matches!(
            fx.escrow.divide_stake(alice, 3, 500, 1),
            Err(EscrowError::SubStakeIndexOutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_merge_later_start_absorbs() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        fx.advance(1);
        // period 6: both sub-stakes now end at 16
        fx.escrow.deposit(alice, alice, 500, 10).unwrap();
        fx.escrow.merge_stake(alice, 0, 1).unwrap();

        assert_eq!(fx.escrow.sub_stake(alice, 0).unwrap().last_period, Some(6));
        assert_eq!(fx.escrow.sub_stake(alice, 1).unwrap().locked_value, 1_500);
        assert_eq!(fx.escrow.locked_tokens(alice, 0), 1_000);
        assert_eq!(fx.escrow.locked_tokens(alice, 1), 1_500);
    }

    #[test]
    fn test_prolong() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        fx.escrow.merge_stake(alice, 0, 1).unwrap();

        assert!(matches!(
            fx.escrow.prolong_stake(alice, 1, 5),
            Err(EscrowError::SubStakeInactive { index: 1 })
        ));
        assert!(matches!(
            fx.escrow.prolong_stake(alice, 0, 0),
            Err(EscrowError::DurationTooShort { .. })
        ));
        fx.escrow.prolong_stake(alice, 0, 2).unwrap();
        assert_eq!(fx.escrow.sub_stake(alice, 0).unwrap().unlocking_duration, 12);
        assert_eq!(fx.escrow.locked_tokens(alice, 12), 2_000);
        assert_eq!(fx.escrow.locked_tokens(alice, 13), 0);
    }

    #[test]
    fn test_withdraw_unlocked_only() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 2).unwrap();
        assert!(matches!(
            fx.escrow.withdraw(alice, 1),
            Err(EscrowError::InsufficientUnlocked { available: 0, .. })
        ));
        // without commitments the floating end never arrives
        fx.advance(10);
        assert_eq!(fx.escrow.locked_tokens(alice, 0), 1_000);
    }

    #[test]
    fn test_remove_unused_sub_stake() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        assert!(matches!(
            fx.escrow.remove_unused_sub_stake(alice, 0),
            Err(EscrowError::SubStakeInUse { index: 0 })
        ));
        fx.escrow.merge_stake(alice, 0, 1).unwrap();
        // the absorbed slot ended at period 5
        assert!(fx.escrow.remove_unused_sub_stake(alice, 1).is_err());
        fx.advance(1);
        fx.escrow.remove_unused_sub_stake(alice, 1).unwrap();
        assert_eq!(fx.escrow.sub_stakes_length(alice), 1);
        assert_eq!(fx.escrow.locked_tokens(alice, 1), 2_000);
    }

    #[test]
    fn test_set_flags() {
        let mut fx = Fixture::at(5);
        let alice = fx.account("alice", 5_000);
        fx.escrow.deposit(alice, alice, 1_000, 10).unwrap();
        fx.escrow.drain_events();

        fx.escrow.set_re_stake(alice, false).unwrap();
        fx.escrow.set_re_stake(alice, false).unwrap();
        assert!(!fx.escrow.flags(alice).unwrap().re_stake);
        assert_eq!(fx.escrow.events().len(), 1);

        let stranger = AccountId::from_label("stranger");
        assert!(matches!(
            fx.escrow.set_work_measurement(stranger, alice, true),
            Err(EscrowError::Unauthorized(_))
        ));
        let work = fx.escrow.set_work_measurement(fx.work_lock, alice, true).unwrap();
        assert_eq!(work, 0);
        assert!(fx.escrow.flags(alice).unwrap().measure_work);
    }

    #[test]
    fn test_batch_deposit() {
        let mut fx = Fixture::at(5);
        let payer = fx.account("payer", 10_000);
        let a = AccountId::from_label("a");
        let b = AccountId::from_label("b");
        let entries = vec![
            BatchDeposit {
                staker: a,
                sub_stakes: vec![(100, 5), (200, 6)],
            },
            BatchDeposit {
                staker: b,
                sub_stakes: vec![(300, 7)],
            },
        ];
        fx.escrow.batch_deposit(payer, &entries).unwrap();
        assert_eq!(fx.escrow.all_tokens(a), 300);
        assert_eq!(fx.escrow.sub_stakes_length(a), 2);
        assert_eq!(fx.escrow.all_tokens(b), 300);
        assert_eq!(fx.token.balance_of(payer), 9_400);

        // stakers must be fresh
        assert!(matches!(
            fx.escrow.batch_deposit(payer, &entries[1..]),
            Err(EscrowError::AlreadyStaker(_))
        ));
    }

    #[test]
    fn test_donate_returns_to_reserve() {
        let mut fx = Fixture::at(5);
        let donor = fx.account("donor", 1_000);
        fx.escrow.donate(donor, 1_000).unwrap();
        assert_eq!(fx.escrow.reserved_reward(), 1_001_000);
        assert_eq!(fx.token.balance_of(donor), 0);
    }

    #[test]
    fn test_uninitialized_rejects_staking() {
        let fx = Fixture::at(5);
        let mut escrow = StakingEscrow::new(
            *fx.escrow.params(),
            Issuer::new(*fx.escrow.issuer().params(), 10_000_000).unwrap(),
            fx.escrow.clock().clone(),
            *fx.escrow.authorities(),
            fx.escrow.collaborators.clone(),
        )
        .unwrap();
        let alice = AccountId::from_label("alice");
        assert!(matches!(
            escrow.deposit(alice, alice, 1_000, 10),
            Err(EscrowError::NotInitialized)
        ));
    }
}
