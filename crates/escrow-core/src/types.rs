//! Core type definitions for the staking escrow
//!
//! Periods and token amounts are plain integers; account identities are
//! 32-byte values in the same shape as the rest of the protocol identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Period - discrete epoch index, `floor(now / seconds_per_period)`
pub type Period = u32;

/// Token amount in the smallest unit
pub type TokenAmount = u128;

/// AccountId - identity of a staker, worker, investigator or privileged module
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId {
    id: [u8; 32],
}

impl AccountId {
    /// Create an account id from raw bytes
    pub fn new(id: [u8; 32]) -> Self {
        Self { id }
    }

    /// Derive an account id from a public key using BLAKE3
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let hash = blake3::hash(public_key);
        Self {
            id: *hash.as_bytes(),
        }
    }

    /// Deterministic account id for a human-readable label (tests, simulation)
    pub fn from_label(label: &str) -> Self {
        let hash = blake3::hash(label.as_bytes());
        Self {
            id: *hash.as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.id
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self { id })
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

/// Caller identity of a ledger call
///
/// `sender` is the immediate caller, `origin` the account that signed the
/// outer request. They differ when the call was relayed by another module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub sender: AccountId,
    pub origin: AccountId,
}

impl CallContext {
    /// A call made directly by `account`
    pub fn direct(account: AccountId) -> Self {
        Self {
            sender: account,
            origin: account,
        }
    }

    /// A call relayed by `relay` on behalf of `origin`
    pub fn relayed(relay: AccountId, origin: AccountId) -> Self {
        Self {
            sender: relay,
            origin,
        }
    }

    /// True when the immediate caller signed the request itself
    pub fn is_direct(&self) -> bool {
        self.sender == self.origin
    }
}
