//! Staged ledger transactions
//!
//! An operation never mutates the ledger while it is still validating. It
//! reads through a [`Transaction`] that overlays its own changes on the
//! committed state, then turns it into a [`ChangeSet`] that is applied in one
//! infallible step after every precondition and collaborator call succeeded.

use crate::events::EscrowEvent;
use crate::issuer::Issuer;
use crate::staker::StakerInfo;
use crate::staking::LedgerState;
use escrow_core::{math, AccountId, EscrowError, Period, Result, TokenAmount};
use std::collections::{BTreeMap, HashMap};

/// Changes staged against the committed ledger state
pub(crate) struct Transaction<'a> {
    base: &'a LedgerState,
    pub issuer: Issuer,
    locked: BTreeMap<Period, TokenAmount>,
    workers: HashMap<AccountId, Option<AccountId>>,
    stakers: HashMap<AccountId, StakerInfo>,
    registrations: Vec<AccountId>,
    events: Vec<EscrowEvent>,
}

/// Staged changes ready to be applied
#[derive(Debug)]
pub(crate) struct ChangeSet {
    pub issuer: Issuer,
    pub locked: BTreeMap<Period, TokenAmount>,
    pub workers: HashMap<AccountId, Option<AccountId>>,
    pub stakers: HashMap<AccountId, StakerInfo>,
    pub registrations: Vec<AccountId>,
    pub events: Vec<EscrowEvent>,
}

impl<'a> Transaction<'a> {
    pub fn new(base: &'a LedgerState) -> Self {
        Self {
            base,
            issuer: base.issuer.clone(),
            locked: BTreeMap::new(),
            workers: HashMap::new(),
            stakers: HashMap::new(),
            registrations: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Staged or committed staker record
    pub fn staker(&self, staker: AccountId) -> Option<StakerInfo> {
        self.stakers
            .get(&staker)
            .or_else(|| self.base.stakers.get(&staker))
            .cloned()
    }

    /// Staker record that must exist
    pub fn existing_staker(&self, staker: AccountId) -> Result<StakerInfo> {
        self.staker(staker).ok_or(EscrowError::NotAStaker(staker))
    }

    pub fn store_staker(&mut self, staker: AccountId, info: StakerInfo) {
        self.stakers.insert(staker, info);
    }

    /// Add a new staker to the ordered staker list
    pub fn register(&mut self, staker: AccountId) {
        if !self.registrations.contains(&staker) {
            self.registrations.push(staker);
        }
    }

    pub fn locked_per_period(&self, period: Period) -> TokenAmount {
        self.locked
            .get(&period)
            .or_else(|| self.base.locked_per_period.get(&period))
            .copied()
            .unwrap_or(0)
    }

    pub fn add_locked(&mut self, period: Period, value: TokenAmount) -> Result<()> {
        let total = math::add(self.locked_per_period(period), value, "locked per period")?;
        self.locked.insert(period, total);
        Ok(())
    }

    pub fn sub_locked(&mut self, period: Period, value: TokenAmount) -> Result<()> {
        let total = math::sub(self.locked_per_period(period), value, "locked per period")?;
        self.locked.insert(period, total);
        Ok(())
    }

    /// Staker bound to `worker`
    pub fn staker_from_worker(&self, worker: AccountId) -> Option<AccountId> {
        match self.workers.get(&worker) {
            Some(staged) => *staged,
            None => self.base.staker_from_worker.get(&worker).copied(),
        }
    }

    pub fn link_worker(&mut self, worker: AccountId, staker: AccountId) {
        self.workers.insert(worker, Some(staker));
    }

    pub fn unlink_worker(&mut self, worker: AccountId) {
        self.workers.insert(worker, None);
    }

    pub fn emit(&mut self, event: EscrowEvent) {
        self.events.push(event);
    }

    pub fn finish(self) -> ChangeSet {
        ChangeSet {
            issuer: self.issuer,
            locked: self.locked,
            workers: self.workers,
            stakers: self.stakers,
            registrations: self.registrations,
            events: self.events,
        }
    }
}

impl LedgerState {
    /// Apply staged changes
    pub(crate) fn apply(&mut self, changes: ChangeSet) -> Vec<EscrowEvent> {
        self.issuer = changes.issuer;
        for (period, total) in changes.locked {
            self.locked_per_period.insert(period, total);
        }
        for (worker, staker) in changes.workers {
            match staker {
                Some(staker) => self.staker_from_worker.insert(worker, staker),
                None => self.staker_from_worker.remove(&worker),
            };
        }
        for staker in changes.registrations {
            if !self.staker_order.contains(&staker) {
                self.staker_order.push(staker);
            }
        }
        self.stakers.extend(changes.stakers);
        changes.events
    }
}
