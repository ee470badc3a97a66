//! WagerBot Backend Library
//!
//! Pari-mutuel betting ledger for a game-server chat plugin: players
//! stake planets on named outcomes while a betting window is open; at
//! resolve time the pool (net of the house margin) is redistributed to
//! the winning outcome's supporters. Payments go through an external
//! gateway and are committed in two phases, so the ledger only counts
//! money the gateway has confirmed.
//!
//! Chat formatting, command registration and permissions live in the
//! surrounding plugin; this crate is the ledger, the settlement math and
//! the gateway seam.

pub mod config;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod settlement;

pub use config::{OutcomeConfig, RoundConfig};
pub use gateway::{
    payout_within_reserve, GatewayError, PaperGateway, PaperGatewayConfig, PaymentGateway,
    PaymentNotification, PaymentStatus,
};
pub use ledger::{
    ConfigApplied, LedgerError, LedgerSnapshot, OpenOutcome, ResetSummary, ResolveSummary,
    StakeLedger,
};
pub use models::{LedgerEvent, OutcomeId, PayoutRecord, PendingStake, PlayerId, TxHandle};
