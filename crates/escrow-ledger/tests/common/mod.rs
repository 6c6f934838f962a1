//! Shared ledger harness for the integration tests

#![allow(dead_code)]

use escrow_core::{AccountId, CallContext, ManualClock, Period, PeriodClock, TokenAmount};
use escrow_ledger::{
    Authorities, Collaborators, InMemoryToken, IssuanceParams, Issuer, RecordingFeeLedger,
    StakingEscrow, StakingParams, TokenCustody,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const SPP: u32 = 3_600;
pub const TOTAL_SUPPLY: TokenAmount = 10_000_000;
pub const RESERVE: TokenAmount = 1_000_000;

pub struct Network {
    pub escrow: StakingEscrow,
    pub clock: Arc<ManualClock>,
    pub token: Arc<InMemoryToken>,
    pub fee_ledger: Arc<RecordingFeeLedger>,
    pub owner: AccountId,
    pub adjudicator: AccountId,
}

pub fn issuance() -> IssuanceParams {
    IssuanceParams {
        issuance_decay_coefficient: 2,
        lock_duration_coefficient_1: 1,
        lock_duration_coefficient_2: 4,
        maximum_rewarded_periods: 3,
        first_phase_total_supply: 0,
        first_phase_max_issuance: 0,
    }
}

pub fn staking() -> StakingParams {
    StakingParams {
        min_locked_periods: 2,
        min_allowable_locked_tokens: 100,
        max_allowable_locked_tokens: 100_000,
        min_worker_periods: 2,
    }
}

impl Network {
    /// Initialized ledger whose clock sits at the start of `period`
    pub fn at(period: Period) -> Self {
        let owner = AccountId::from_label("owner");
        let adjudicator = AccountId::from_label("adjudicator");
        let clock = Arc::new(ManualClock::new(u64::from(period) * u64::from(SPP)));
        let token = Arc::new(InMemoryToken::new(owner, TOTAL_SUPPLY));
        let fee_ledger = Arc::new(RecordingFeeLedger::new());
        let mut escrow = StakingEscrow::new(
            staking(),
            Issuer::new(issuance(), TOTAL_SUPPLY).unwrap(),
            PeriodClock::new(clock.clone(), SPP, SPP),
            Authorities {
                owner,
                custody: AccountId::from_label("escrow"),
                adjudicator,
                work_lock: None,
            },
            Collaborators::new(token.clone(), fee_ledger.clone()),
        )
        .unwrap();
        escrow.initialize(owner, RESERVE, owner).unwrap();
        escrow.drain_events();
        Self {
            escrow,
            clock,
            token,
            fee_ledger,
            owner,
            adjudicator,
        }
    }

    /// Fund `label` with `value` and stake all of it, bonded to itself
    pub fn staker(&mut self, label: &str, value: TokenAmount, periods: u32) -> AccountId {
        let staker = AccountId::from_label(label);
        self.token.transfer(self.owner, staker, value).unwrap();
        self.escrow.deposit(staker, staker, value, periods).unwrap();
        self.escrow.bond_worker(staker, Some(staker)).unwrap();
        staker
    }

    pub fn commit(&mut self, staker: AccountId) {
        self.escrow.commit(CallContext::direct(staker)).unwrap();
    }

    pub fn advance(&self, periods: u32) {
        self.clock.advance(u64::from(periods) * u64::from(SPP));
    }

    /// Network totals agree with what committed stakers lock.
    ///
    /// Periods from the current one on cannot be minted yet, so their total is
    /// exactly the sum over the stakers that committed to them. Earlier periods
    /// keep their total after stakers mint, so the stakers still pending there
    /// only give a lower bound.
    pub fn assert_period_totals(&self) {
        let current = self.escrow.current_period();
        let mut pending = BTreeMap::new();
        for staker in self.escrow.stakers() {
            let info = self.escrow.staker_info(*staker).unwrap();
            for period in info.committed.pending() {
                *pending.entry(period).or_insert(0u128) += info.locked_tokens(current, period);
            }
        }
        for (period, total) in pending {
            let recorded = self.escrow.locked_per_period(period);
            if period >= current {
                assert_eq!(recorded, total, "locked total of period {period} at period {current}");
            } else {
                assert!(
                    recorded >= total,
                    "locked total of period {period} at period {current}: {recorded} < {total}"
                );
            }
        }
    }

    /// Totals of periods before the current one never change once recorded
    pub fn assert_past_totals_kept(&self, seen: &mut BTreeMap<Period, TokenAmount>) {
        let current = self.escrow.current_period();
        for period in 0..current {
            let recorded = self.escrow.locked_per_period(period);
            let kept = *seen.entry(period).or_insert(recorded);
            assert_eq!(recorded, kept, "past total of period {period} changed at period {current}");
        }
    }
}
