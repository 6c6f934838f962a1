//! # Collaborators
//!
//! Interfaces the ledger calls out to:
//! - Token custody: every movement of tokens in or out of the escrow
//! - Fee ledger: registration and processed-period notifications
//! - Re-encryption verifier: correctness verdicts consumed by the adjudicator
//!
//! In-memory implementations are provided for simulation and tests.

use crate::adjudicator::ReencryptionEvidence;
use escrow_core::{AccountId, EscrowError, Period, Result, TokenAmount};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fungible token transfers
pub trait TokenCustody: Send + Sync {
    /// Move `amount` from `from` to `to`
    fn transfer(&self, from: AccountId, to: AccountId, amount: TokenAmount) -> Result<()>;

    /// Total token supply
    fn total_supply(&self) -> TokenAmount;

    /// Balance of an account
    fn balance_of(&self, account: AccountId) -> TokenAmount;
}

/// Period-fee bookkeeping
pub trait FeeLedger: Send + Sync {
    /// A staker was created; fees accrue from `period`
    fn register(&self, staker: AccountId, period: Period) -> Result<()>;

    /// Committed periods were minted; `default_period` is the newly committed period
    fn ping(
        &self,
        staker: AccountId,
        processed_period_1: Option<Period>,
        processed_period_2: Option<Period>,
        default_period: Option<Period>,
    ) -> Result<()>;

    /// The staker record moved to the active period length
    fn migrate(&self, staker: AccountId) -> Result<()>;
}

/// Verdict of the re-encryption verifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierOutcome {
    /// Whether the fragment was computed correctly
    pub correct: bool,
    /// Worker whose signature binds it to the fragment
    pub worker: AccountId,
}

/// Proof-of-incorrect-re-encryption verification
pub trait CfragVerifier: Send + Sync {
    fn verify(&self, evidence: &ReencryptionEvidence) -> Result<VerifierOutcome>;
}

/// Token ledger held in memory
#[derive(Debug, Default)]
pub struct InMemoryToken {
    balances: Mutex<HashMap<AccountId, TokenAmount>>,
    total_supply: TokenAmount,
}

impl InMemoryToken {
    /// Create a token with its whole supply held by `holder`
    pub fn new(holder: AccountId, total_supply: TokenAmount) -> Self {
        let mut balances = HashMap::new();
        balances.insert(holder, total_supply);
        Self {
            balances: Mutex::new(balances),
            total_supply,
        }
    }
}

impl TokenCustody for InMemoryToken {
    fn transfer(&self, from: AccountId, to: AccountId, amount: TokenAmount) -> Result<()> {
        let mut balances = self.balances.lock();
        let available = balances.get(&from).copied().unwrap_or(0);
        if available < amount {
            return Err(EscrowError::TokenTransfer(format!(
                "{from} holds {available}, needs {amount}"
            )));
        }
        balances.insert(from, available - amount);
        let credited = balances.entry(to).or_insert(0);
        *credited = credited
            .checked_add(amount)
            .ok_or(EscrowError::Overflow("token balance"))?;
        Ok(())
    }

    fn total_supply(&self) -> TokenAmount {
        self.total_supply
    }

    fn balance_of(&self, account: AccountId) -> TokenAmount {
        self.balances.lock().get(&account).copied().unwrap_or(0)
    }
}

/// Fee ledger that accepts every call
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFeeLedger;

impl FeeLedger for NoopFeeLedger {
    fn register(&self, _staker: AccountId, _period: Period) -> Result<()> {
        Ok(())
    }

    fn ping(
        &self,
        _staker: AccountId,
        _processed_period_1: Option<Period>,
        _processed_period_2: Option<Period>,
        _default_period: Option<Period>,
    ) -> Result<()> {
        Ok(())
    }

    fn migrate(&self, _staker: AccountId) -> Result<()> {
        Ok(())
    }
}

/// A call received by [`RecordingFeeLedger`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeLedgerCall {
    Register {
        staker: AccountId,
        period: Period,
    },
    Ping {
        staker: AccountId,
        processed_period_1: Option<Period>,
        processed_period_2: Option<Period>,
        default_period: Option<Period>,
    },
    Migrate {
        staker: AccountId,
    },
}

/// Fee ledger that records every call
#[derive(Debug, Default)]
pub struct RecordingFeeLedger {
    calls: Mutex<Vec<FeeLedgerCall>>,
}

impl RecordingFeeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<FeeLedgerCall> {
        self.calls.lock().clone()
    }
}

impl FeeLedger for RecordingFeeLedger {
    fn register(&self, staker: AccountId, period: Period) -> Result<()> {
        self.calls.lock().push(FeeLedgerCall::Register { staker, period });
        Ok(())
    }

    fn ping(
        &self,
        staker: AccountId,
        processed_period_1: Option<Period>,
        processed_period_2: Option<Period>,
        default_period: Option<Period>,
    ) -> Result<()> {
        self.calls.lock().push(FeeLedgerCall::Ping {
            staker,
            processed_period_1,
            processed_period_2,
            default_period,
        });
        Ok(())
    }

    fn migrate(&self, staker: AccountId) -> Result<()> {
        self.calls.lock().push(FeeLedgerCall::Migrate { staker });
        Ok(())
    }
}
