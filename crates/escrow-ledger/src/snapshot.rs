//! Ledger snapshots
//!
//! A snapshot is the complete ledger state as JSON. Restoring it under a
//! different period length is how a period-length change is carried out:
//! every staker record comes back unmigrated and is rescaled lazily.

use crate::issuer::{IssuanceParams, Issuer, IssuerState};
use crate::staker::StakerInfo;
use crate::staking::{Authorities, Collaborators, LedgerState, StakingEscrow, StakingParams};
use escrow_core::{AccountId, EscrowError, Period, PeriodClock, Result, TokenAmount};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized ledger state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    pub version: u32,
    /// Period length the periods below are expressed in
    pub seconds_per_period: u32,
    pub taken_at_period: Period,
    pub params: StakingParams,
    pub issuance: IssuanceParams,
    pub total_supply: TokenAmount,
    pub issuer: IssuerState,
    pub authorities: Authorities,
    /// Staker records in registration order
    pub stakers: Vec<(AccountId, StakerInfo)>,
    pub locked_per_period: Vec<(Period, TokenAmount)>,
}

impl EscrowSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EscrowError::Snapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| EscrowError::Snapshot(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EscrowError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path.as_ref(), json).map_err(|e| {
            EscrowError::Snapshot(format!("write {}: {e}", path.as_ref().display()))
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EscrowError::Snapshot(format!("read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_json(&json)
    }

    /// Sum of all staker values
    pub fn total_staked(&self) -> TokenAmount {
        self.stakers
            .iter()
            .fold(0, |acc: TokenAmount, (_, info)| acc.saturating_add(info.value))
    }
}

impl StakingEscrow {
    /// Capture the ledger state
    pub fn snapshot(&self) -> EscrowSnapshot {
        let stakers = self
            .stakers()
            .iter()
            .filter_map(|id| self.staker_info(*id).map(|info| (*id, info.clone())))
            .collect();
        EscrowSnapshot {
            version: SNAPSHOT_VERSION,
            seconds_per_period: self.clock().seconds_per_period(),
            taken_at_period: self.current_period(),
            params: *self.params(),
            issuance: *self.issuer().params(),
            total_supply: self.issuer().total_supply(),
            issuer: self.issuer().state(),
            authorities: *self.authorities(),
            stakers,
            locked_per_period: self
                .state
                .locked_per_period
                .iter()
                .map(|(period, total)| (*period, *total))
                .collect(),
        }
    }

    /// Rebuild a ledger from a snapshot.
    ///
    /// If `clock` uses a different period length than the snapshot, its
    /// genesis period length must equal the snapshot's. Staker records are
    /// then marked unmigrated, the per-period totals are dropped and the
    /// issuer's minting period is rescaled.
    pub fn restore(
        snapshot: EscrowSnapshot,
        clock: PeriodClock,
        collaborators: Collaborators,
    ) -> Result<Self> {
        snapshot.params.validate()?;
        let issuer = Issuer::with_state(snapshot.issuance, snapshot.total_supply, snapshot.issuer)?;
        let rescale = snapshot.seconds_per_period != clock.seconds_per_period();
        if rescale && snapshot.seconds_per_period != clock.genesis_seconds_per_period() {
            return Err(EscrowError::Snapshot(format!(
                "snapshot uses {}s periods but the clock migrates from {}s",
                snapshot.seconds_per_period,
                clock.genesis_seconds_per_period()
            )));
        }

        let mut state = LedgerState::new(issuer);
        for (staker, mut info) in snapshot.stakers {
            if state.stakers.contains_key(&staker) {
                return Err(EscrowError::Snapshot(format!("staker {staker} listed twice")));
            }
            if let Some(worker) = info.worker {
                if state.staker_from_worker.insert(worker, staker).is_some() {
                    return Err(EscrowError::Snapshot(format!(
                        "worker {worker} bonded to two stakers"
                    )));
                }
            }
            if rescale {
                info.flags.migrated = false;
            }
            state.staker_order.push(staker);
            state.stakers.insert(staker, info);
        }

        if rescale {
            let minting_period = clock.recalculate_period(state.issuer.state().current_minting_period);
            state.issuer.set_minting_period(minting_period);
            warn!(
                from = snapshot.seconds_per_period,
                to = clock.seconds_per_period(),
                stakers = state.staker_order.len(),
                "Period length changed, staker records await migration"
            );
        } else {
            state.locked_per_period = snapshot.locked_per_period.into_iter().collect();
        }

        info!(
            stakers = state.staker_order.len(),
            period = clock.current_period(),
            "Ledger restored"
        );
        Ok(Self::from_parts(
            snapshot.params,
            clock,
            state,
            snapshot.authorities,
            collaborators,
        ))
    }
}
