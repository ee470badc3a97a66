//! Ledger error taxonomy. All variants are returned to the command layer
//! for user-facing reporting; nothing here is process-fatal, and the
//! payment-notification path never surfaces errors back into the gateway.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::models::{OutcomeId, PlayerId};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("outcome `{0}` is not part of the current round")]
    InvalidOutcome(String),

    #[error("betting is closed")]
    BettingClosed,

    #[error(
        "stake of {amount} would put {player}'s total on `{outcome}` at {total}, \
         outside [{min}, {max}]"
    )]
    StakeOutOfRange {
        player: PlayerId,
        outcome: OutcomeId,
        amount: u64,
        total: u64,
        min: u64,
        max: u64,
    },

    #[error("{player} already backs `{existing}` this round")]
    ConflictingOutcome {
        player: PlayerId,
        existing: OutcomeId,
    },

    #[error("no active round")]
    NoActiveRound,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("payment request failed: {0}")]
    PaymentRequestFailed(#[from] GatewayError),
}
