//! Betting Ledger - Round Lifecycle & Settlement
//!
//! This module owns:
//! 1. The round state machine (idle -> open -> closed -> resolved/reset)
//! 2. Two-phase stake commit against the payment gateway
//! 3. Settlement: quota computation and partial-failure payout loops
//!
//! Architecture:
//! - `round` holds the per-round bookkeeping as plain data
//! - `engine` serializes every mutation behind one async lock
//! - payment notifications re-enter through the same lock, so a stake is
//!   never half-applied

pub mod engine;
pub mod error;
pub mod round;

pub use engine::{
    ConfigApplied, LedgerSnapshot, OpenOutcome, ResetSummary, ResolveSummary, StakeLedger,
};
pub use error::LedgerError;
pub use round::RoundState;
