//! Adjudicator
//!
//! Evaluates evidence of incorrect re-encryption. Each piece of evidence is
//! judged once; an incorrect fragment slashes the staker behind the worker
//! that produced it, with a penalty that grows with the staker's history.

use crate::collaborators::CfragVerifier;
use crate::staking::StakingEscrow;
use escrow_core::{math, AccountId, EscrowError, Result, TokenAmount};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Penalty schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjudicatorParams {
    /// Penalty of a first offence
    pub base_penalty: TokenAmount,
    /// Added per earlier offence
    pub penalty_history_coefficient: TokenAmount,
    /// Penalty is capped at `value / percentage_penalty_coefficient`
    pub percentage_penalty_coefficient: u128,
    /// Investigator receives `penalty / reward_coefficient`
    pub reward_coefficient: u128,
}

impl AdjudicatorParams {
    pub fn validate(&self) -> Result<()> {
        if self.percentage_penalty_coefficient == 0 || self.reward_coefficient == 0 {
            return Err(EscrowError::InvalidConfiguration(
                "adjudicator coefficients must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Evidence that a worker produced a re-encryption fragment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReencryptionEvidence {
    pub capsule: Vec<u8>,
    pub cfrag: Vec<u8>,
    /// Worker's signed proof binding it to the fragment
    pub proof: Vec<u8>,
}

impl ReencryptionEvidence {
    /// Identity of the evaluated pair
    pub fn evaluation_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.capsule);
        hasher.update(&self.cfrag);
        *hasher.finalize().as_bytes()
    }
}

/// Result of one evaluation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfragVerdict {
    pub evaluation_hash: [u8; 32],
    pub investigator: AccountId,
    pub worker: AccountId,
    pub staker: AccountId,
    pub correct: bool,
    pub penalty: TokenAmount,
    pub reward: TokenAmount,
}

/// Judge of re-encryption evidence, holding the slashing authority
pub struct Adjudicator {
    id: AccountId,
    params: AdjudicatorParams,
    verifier: Arc<dyn CfragVerifier>,
    evaluated: HashSet<[u8; 32]>,
    penalty_history: HashMap<AccountId, u32>,
    verdicts: Vec<CfragVerdict>,
}

impl fmt::Debug for Adjudicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adjudicator")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("evaluated", &self.evaluated.len())
            .finish()
    }
}

impl Adjudicator {
    /// `id` must be the adjudicator identity the escrow was configured with
    pub fn new(
        id: AccountId,
        params: AdjudicatorParams,
        verifier: Arc<dyn CfragVerifier>,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            id,
            params,
            verifier,
            evaluated: HashSet::new(),
            penalty_history: HashMap::new(),
            verdicts: Vec::new(),
        })
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn params(&self) -> &AdjudicatorParams {
        &self.params
    }

    /// Evaluate evidence submitted by `investigator`, slashing on an incorrect fragment
    pub fn evaluate_cfrag(
        &mut self,
        escrow: &mut StakingEscrow,
        investigator: AccountId,
        evidence: &ReencryptionEvidence,
    ) -> Result<CfragVerdict> {
        let evaluation_hash = evidence.evaluation_hash();
        if self.evaluated.contains(&evaluation_hash) {
            return Err(EscrowError::AlreadyEvaluated);
        }

        let outcome = self.verifier.verify(evidence)?;
        let worker = outcome.worker;
        let staker = escrow
            .staker_from_worker(worker)
            .ok_or(EscrowError::UnknownWorker(worker))?;
        let value = escrow.all_tokens(staker);
        if value == 0 {
            return Err(EscrowError::NotAStaker(staker));
        }

        let (mut penalty, mut reward) = (0, 0);
        if !outcome.correct {
            (penalty, reward) = self.penalty_and_reward(staker, value)?;
            warn!(%staker, %worker, %penalty, "Incorrect re-encryption");
            penalty = escrow.slash(self.id, staker, penalty, investigator, reward)?;
            reward = reward.min(penalty);
            *self.penalty_history.entry(staker).or_insert(0) += 1;
        }

        let verdict = CfragVerdict {
            evaluation_hash,
            investigator,
            worker,
            staker,
            correct: outcome.correct,
            penalty,
            reward,
        };
        self.evaluated.insert(evaluation_hash);
        self.verdicts.push(verdict.clone());
        info!(%staker, correct = outcome.correct, "Evidence evaluated");
        Ok(verdict)
    }

    /// Penalty and investigator reward for the next offence of `staker`
    pub fn penalty_and_reward(
        &self,
        staker: AccountId,
        value: TokenAmount,
    ) -> Result<(TokenAmount, TokenAmount)> {
        let history = u128::from(self.penalty_history(staker));
        let escalation = self
            .params
            .penalty_history_coefficient
            .checked_mul(history)
            .ok_or(EscrowError::Overflow("penalty"))?;
        let penalty = math::add(self.params.base_penalty, escalation, "penalty")?
            .min(value / self.params.percentage_penalty_coefficient);
        Ok((penalty, penalty / self.params.reward_coefficient))
    }

    /// Offences recorded against `staker`
    pub fn penalty_history(&self, staker: AccountId) -> u32 {
        self.penalty_history.get(&staker).copied().unwrap_or(0)
    }

    pub fn is_evaluated(&self, evaluation_hash: &[u8; 32]) -> bool {
        self.evaluated.contains(evaluation_hash)
    }

    pub fn verdicts(&self) -> &[CfragVerdict] {
        &self.verdicts
    }
}
