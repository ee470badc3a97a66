//! Shared ledger types: identifiers, pending entries, and the outward
//! event stream consumed by the chat/display layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Server login of a player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(login: impl Into<String>) -> Self {
        Self(login.into())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(login: &str) -> Self {
        Self(login.to_string())
    }
}

/// Named betting target. Matched case-insensitively, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutcomeId(String);

impl OutcomeId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutcomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OutcomeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Opaque handle for an in-flight gateway transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(Uuid);

impl TxHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stake charged to a player but not yet confirmed by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingStake {
    pub player: PlayerId,
    pub outcome: OutcomeId,
    pub amount: u64,
    pub handle: TxHandle,
    pub placed_at: DateTime<Utc>,
}

/// Why an outgoing payment was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutKind {
    Winnings,
    Refund,
}

/// An outgoing payment awaiting gateway confirmation. Terminal
/// notifications only log and clear these; the ledger owes nothing more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayout {
    pub player: PlayerId,
    pub amount: u64,
    pub kind: PayoutKind,
}

/// One winner's share of a settled round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub player: PlayerId,
    pub amount: u64,
}

/// Outward notifications for the display layer. Broadcast best-effort;
/// a lagging or absent subscriber never blocks the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    RoundOpened {
        outcomes: Vec<OutcomeId>,
        min_stake: u64,
        max_stake: u64,
    },
    RoundReopened,
    RoundClosed,
    /// Charge issued, awaiting gateway confirmation.
    StakePlaced {
        player: PlayerId,
        outcome: OutcomeId,
        amount: u64,
    },
    /// Charge confirmed and folded into the round totals.
    StakeAccepted {
        player: PlayerId,
        outcome: OutcomeId,
        amount: u64,
    },
    StakeRejected {
        player: PlayerId,
        reason: String,
    },
    RoundResolved {
        outcome: OutcomeId,
        quota: Option<f64>,
        payouts: Vec<PayoutRecord>,
    },
    RoundReset {
        refunds: Vec<PayoutRecord>,
    },
    PayoutFailed {
        player: PlayerId,
        amount: u64,
        reason: String,
    },
}
