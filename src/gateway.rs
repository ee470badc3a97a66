//! Payment gateway seam.
//!
//! The ledger never moves planets itself: it issues charge/pay requests
//! through [`PaymentGateway`] and learns the result later from an
//! asynchronous notification stream, delivered at-least-once. The
//! consumer must be idempotent.
//!
//! [`PaperGateway`] is an in-memory simulator used by tests and the demo
//! binary; production wires this trait to the actual server transaction
//! transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{PlayerId, TxHandle};

/// Planets the server always keeps back when paying out.
pub const SERVER_RESERVE: u64 = 2;

/// Pre-check before issuing a payout: the amount plus the reserve plus a
/// 5% transaction fee must fit within the server balance. Exceeding the
/// balance is a caller-side precondition, not a gateway error.
pub fn payout_within_reserve(balance: u64, amount: u64) -> bool {
    let fee = (amount as f64 * 0.05).floor() as u64;
    amount
        .saturating_add(SERVER_RESERVE)
        .saturating_add(fee)
        <= balance
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid amount: {0}")]
    InvalidAmount(u64),
    #[error("gateway transport error: {0}")]
    Transport(String),
}

/// Terminal and informational states of a gateway transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Request accepted by the transport; not terminal.
    Issued,
    Confirmed,
    Refused,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Issued)
    }
}

/// One entry of the gateway's out-of-band notification stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub handle: TxHandle,
    pub status: PaymentStatus,
}

/// Narrow interface to the server's payment rail.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Bill a player. Resolution arrives later on the notification stream.
    async fn charge(
        &self,
        player: &PlayerId,
        amount: u64,
        reason: &str,
    ) -> Result<TxHandle, GatewayError>;

    /// Pay a player from the server balance. Callers must pre-check
    /// [`payout_within_reserve`].
    async fn pay(
        &self,
        player: &PlayerId,
        amount: u64,
        reason: &str,
    ) -> Result<TxHandle, GatewayError>;

    /// Current server planet balance.
    async fn server_balance(&self) -> Result<u64, GatewayError>;
}

/// Paper gateway configuration.
#[derive(Debug, Clone)]
pub struct PaperGatewayConfig {
    /// Emit a terminal notification immediately after each charge. When
    /// false the test drives notifications by hand.
    pub auto_confirm: bool,
    /// Probability a charge is refused in auto-confirm mode (0.0 to 1.0).
    pub refuse_prob: f64,
    pub initial_balance: u64,
    /// Fixed RNG seed for reproducible refusals.
    pub seed: u64,
}

impl Default for PaperGatewayConfig {
    fn default() -> Self {
        Self {
            auto_confirm: true,
            refuse_prob: 0.0,
            initial_balance: 100_000,
            seed: 7,
        }
    }
}

/// In-memory gateway simulator. Tracks a server balance, records every
/// request for assertions, and feeds the notification channel.
pub struct PaperGateway {
    config: PaperGatewayConfig,
    balance: Mutex<u64>,
    rng: Mutex<StdRng>,
    notifications: mpsc::UnboundedSender<PaymentNotification>,
    charges: Mutex<Vec<(PlayerId, u64)>>,
    pays: Mutex<Vec<(PlayerId, u64, TxHandle)>>,
}

impl PaperGateway {
    pub fn new(
        config: PaperGatewayConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PaymentNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            balance: Mutex::new(config.initial_balance),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            notifications: tx,
            charges: Mutex::new(Vec::new()),
            pays: Mutex::new(Vec::new()),
            config,
        });
        (gateway, rx)
    }

    /// Push a notification by hand (manual mode).
    pub fn emit(&self, handle: TxHandle, status: PaymentStatus) {
        let _ = self
            .notifications
            .send(PaymentNotification { handle, status });
    }

    pub fn balance(&self) -> u64 {
        *self.balance.lock()
    }

    /// Charges issued so far, in order.
    pub fn charges(&self) -> Vec<(PlayerId, u64)> {
        self.charges.lock().clone()
    }

    /// Payouts issued so far, in order.
    pub fn pays(&self) -> Vec<(PlayerId, u64)> {
        self.pays
            .lock()
            .iter()
            .map(|(p, amount, _)| (p.clone(), *amount))
            .collect()
    }

    /// Handles of the payouts issued so far, in order.
    pub fn pay_handles(&self) -> Vec<TxHandle> {
        self.pays.lock().iter().map(|(_, _, h)| *h).collect()
    }
}

#[async_trait]
impl PaymentGateway for PaperGateway {
    async fn charge(
        &self,
        player: &PlayerId,
        amount: u64,
        reason: &str,
    ) -> Result<TxHandle, GatewayError> {
        if amount == 0 {
            return Err(GatewayError::InvalidAmount(amount));
        }
        let handle = TxHandle::generate();
        debug!(%player, amount, reason, %handle, "paper charge issued");
        self.charges.lock().push((player.clone(), amount));

        if self.config.auto_confirm {
            let refused = self.config.refuse_prob > 0.0
                && self.rng.lock().gen_bool(self.config.refuse_prob.clamp(0.0, 1.0));
            if refused {
                self.emit(handle, PaymentStatus::Refused);
            } else {
                *self.balance.lock() += amount;
                self.emit(handle, PaymentStatus::Confirmed);
            }
        }
        Ok(handle)
    }

    async fn pay(
        &self,
        player: &PlayerId,
        amount: u64,
        reason: &str,
    ) -> Result<TxHandle, GatewayError> {
        if amount == 0 {
            return Err(GatewayError::InvalidAmount(amount));
        }
        let handle = TxHandle::generate();
        debug!(%player, amount, reason, %handle, "paper payout issued");
        self.pays.lock().push((player.clone(), amount, handle));
        {
            let mut balance = self.balance.lock();
            *balance = balance.saturating_sub(amount);
        }
        if self.config.auto_confirm {
            self.emit(handle, PaymentStatus::Confirmed);
        }
        Ok(handle)
    }

    async fn server_balance(&self) -> Result<u64, GatewayError> {
        Ok(*self.balance.lock())
    }
}
