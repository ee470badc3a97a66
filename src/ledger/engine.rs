//! The stake ledger: round lifecycle, two-phase stake commit, settlement
//! and payment reconciliation.
//!
//! One `tokio::sync::Mutex` over the ledger state serializes command
//! invocations against payment notifications, and gateway calls that move
//! planets happen while it is held, so charges and payouts never overlap.
//! Payout loops are partial-failure: a failed payment is reported and the
//! loop continues with the remaining supporters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::RoundConfig;
use crate::gateway::{payout_within_reserve, PaymentGateway, PaymentNotification, PaymentStatus};
use crate::ledger::error::LedgerError;
use crate::ledger::round::RoundState;
use crate::models::{
    LedgerEvent, OutcomeId, PayoutKind, PayoutRecord, PendingPayout, PendingStake, PlayerId,
    TxHandle,
};
use crate::settlement;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What `open_round` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenOutcome {
    /// Fresh round started from configuration.
    Opened {
        outcomes: Vec<OutcomeId>,
        min_stake: u64,
        max_stake: u64,
    },
    /// An unresolved round existed and was reopened with its state intact.
    Reopened,
}

/// What `update_config` did with the new configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigApplied {
    Applied,
    /// A round is active; the config is queued for the next fresh open.
    Deferred,
}

/// Result of `resolve_round`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveSummary {
    pub outcome: OutcomeId,
    pub pool: f64,
    /// `None` when nobody backed the winner: no payouts were issued.
    pub quota: Option<f64>,
    pub payouts: Vec<PayoutRecord>,
    pub failed: Vec<PayoutRecord>,
    /// Pending stakes abandoned at settlement.
    pub abandoned_pending: usize,
}

/// Result of `reset_round`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetSummary {
    pub refunds: Vec<PayoutRecord>,
    pub failed: Vec<PayoutRecord>,
    pub abandoned_pending: usize,
}

/// Read-only debug view of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub active: bool,
    pub open: bool,
    pub stake_totals: Vec<(OutcomeId, u64)>,
    pub supporter_counts: Vec<(OutcomeId, usize)>,
    pub pending_stakes: usize,
    pub pending_payouts: usize,
}

struct LedgerState {
    config: RoundConfig,
    /// Config received while a round was active; applied at next fresh open.
    deferred_config: Option<RoundConfig>,
    round: Option<RoundState>,
    /// Outgoing payments awaiting gateway confirmation. These survive the
    /// round that produced them.
    pending_payouts: HashMap<TxHandle, PendingPayout>,
}

/// The betting ledger. Cheap to clone via `Arc`; all state lives behind
/// one lock.
pub struct StakeLedger {
    gateway: Arc<dyn PaymentGateway>,
    state: Mutex<LedgerState>,
    events: broadcast::Sender<LedgerEvent>,
}

impl StakeLedger {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: RoundConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            gateway,
            state: Mutex::new(LedgerState {
                config,
                deferred_config: None,
                round: None,
                pending_payouts: HashMap::new(),
            }),
            events,
        }
    }

    /// Subscribe to outward ledger events.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LedgerEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Open a fresh round, or reopen an unresolved one with its stakes
    /// intact. Safe to call repeatedly.
    pub async fn open_round(&self) -> OpenOutcome {
        let mut state = self.state.lock().await;

        if let Some(round) = state.round.as_mut() {
            if round.open {
                debug!("open_round called while already open");
            } else {
                info!("reopening unresolved round");
            }
            round.open = true;
            self.emit(LedgerEvent::RoundReopened);
            return OpenOutcome::Reopened;
        }

        if let Some(config) = state.deferred_config.take() {
            info!("applying deferred configuration at round open");
            state.config = config;
        }

        let outcomes = state.config.outcome_ids();
        let (min_stake, max_stake) = (state.config.min_stake, state.config.max_stake);
        state.round = Some(RoundState::new(outcomes.clone()));
        info!(?outcomes, min_stake, max_stake, "round opened");

        self.emit(LedgerEvent::RoundOpened {
            outcomes: outcomes.clone(),
            min_stake,
            max_stake,
        });
        OpenOutcome::Opened {
            outcomes,
            min_stake,
            max_stake,
        }
    }

    /// Stop accepting stakes. Returns false (reported, not fatal) when no
    /// round was open.
    pub async fn close_round(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.round.as_mut() {
            Some(round) if round.open => {
                round.open = false;
                info!("round closed");
                self.emit(LedgerEvent::RoundClosed);
                true
            }
            _ => {
                debug!("close_round with no open round");
                false
            }
        }
    }

    /// Validate and charge a stake. The ledger totals are untouched until
    /// the gateway confirms the payment.
    pub async fn place_stake(
        &self,
        player: &PlayerId,
        outcome: &str,
        amount: u64,
    ) -> Result<TxHandle, LedgerError> {
        let outcome = OutcomeId::new(outcome);
        let mut state = self.state.lock().await;

        let validation = Self::validate_stake(&state, player, &outcome, amount);
        if let Err(err) = validation {
            debug!(%player, %outcome, amount, %err, "stake rejected");
            self.emit(LedgerEvent::StakeRejected {
                player: player.clone(),
                reason: err.to_string(),
            });
            return Err(err);
        }

        let reason = format!("Stake of {} planets on {}", amount, outcome);
        let handle = match self.gateway.charge(player, amount, &reason).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%player, amount, %err, "charge request failed");
                self.emit(LedgerEvent::StakeRejected {
                    player: player.clone(),
                    reason: err.to_string(),
                });
                return Err(LedgerError::PaymentRequestFailed(err));
            }
        };

        // The round cannot vanish here: validation ran under the same lock.
        if let Some(round) = state.round.as_mut() {
            round.pending_stakes.insert(
                handle,
                PendingStake {
                    player: player.clone(),
                    outcome: outcome.clone(),
                    amount,
                    handle,
                    placed_at: chrono::Utc::now(),
                },
            );
        }
        info!(%player, %outcome, amount, %handle, "stake charged, awaiting confirmation");
        self.emit(LedgerEvent::StakePlaced {
            player: player.clone(),
            outcome,
            amount,
        });
        Ok(handle)
    }

    fn validate_stake(
        state: &LedgerState,
        player: &PlayerId,
        outcome: &OutcomeId,
        amount: u64,
    ) -> Result<(), LedgerError> {
        let round = match &state.round {
            Some(round) if round.open => round,
            _ => return Err(LedgerError::BettingClosed),
        };
        if !round.has_outcome(outcome) {
            return Err(LedgerError::InvalidOutcome(outcome.to_string()));
        }
        if let Some(existing) = round.backed_outcome(player) {
            if &existing != outcome {
                return Err(LedgerError::ConflictingOutcome {
                    player: player.clone(),
                    existing,
                });
            }
        }
        let total = round.confirmed_on(outcome, player).saturating_add(amount);
        let (min, max) = (state.config.min_stake, state.config.max_stake);
        if amount == 0 || total < min || total > max {
            return Err(LedgerError::StakeOutOfRange {
                player: player.clone(),
                outcome: outcome.clone(),
                amount,
                total,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Consume one gateway notification. Unknown handles are ignored:
    /// they belong to rounds that have ended, or are duplicate deliveries
    /// of an already-processed terminal state.
    pub async fn on_payment_notification(&self, note: PaymentNotification) {
        if !note.status.is_terminal() {
            debug!(handle = %note.handle, "non-terminal payment notification");
            return;
        }
        let mut state = self.state.lock().await;

        let pending = state
            .round
            .as_mut()
            .and_then(|round| round.pending_stakes.remove(&note.handle));
        if let Some(stake) = pending {
            match note.status {
                PaymentStatus::Confirmed => {
                    // The pending entry came out of this round under the
                    // same lock, so the round is still here.
                    if let Some(round) = state.round.as_mut() {
                        round.apply_confirmed(&stake);
                    }
                    info!(
                        player = %stake.player, outcome = %stake.outcome,
                        amount = stake.amount, "stake confirmed"
                    );
                    self.emit(LedgerEvent::StakeAccepted {
                        player: stake.player,
                        outcome: stake.outcome,
                        amount: stake.amount,
                    });
                }
                PaymentStatus::Refused | PaymentStatus::Failed => {
                    info!(
                        player = %stake.player, amount = stake.amount,
                        status = ?note.status, "stake payment not completed"
                    );
                    self.emit(LedgerEvent::StakeRejected {
                        player: stake.player,
                        reason: format!("payment {:?}", note.status).to_lowercase(),
                    });
                }
                PaymentStatus::Issued => unreachable!("filtered above"),
            }
            return;
        }

        if let Some(payout) = state.pending_payouts.remove(&note.handle) {
            match note.status {
                PaymentStatus::Confirmed => {
                    debug!(player = %payout.player, amount = payout.amount, "payout confirmed");
                }
                _ => {
                    warn!(
                        player = %payout.player, amount = payout.amount,
                        status = ?note.status, "payout did not complete"
                    );
                }
            }
            return;
        }

        debug!(handle = %note.handle, status = ?note.status, "notification for unknown handle ignored");
    }

    /// Close and settle the round: redistribute the pool to the winning
    /// outcome's supporters and end the round. Pending stakes that never
    /// confirmed are abandoned, not folded into settlement.
    pub async fn resolve_round(&self, winner: &str) -> Result<ResolveSummary, LedgerError> {
        let winner = OutcomeId::new(winner);
        let mut state = self.state.lock().await;

        {
            let round = state.round.as_ref().ok_or(LedgerError::NoActiveRound)?;
            if !round.has_outcome(&winner) {
                return Err(LedgerError::InvalidOutcome(winner.to_string()));
            }
        }
        // The round ends regardless of payout failures below.
        let Some(round) = state.round.take() else {
            return Err(LedgerError::NoActiveRound);
        };

        let abandoned_pending = round.pending_stakes.len();
        if abandoned_pending > 0 {
            warn!(abandoned_pending, "abandoning unconfirmed stakes at resolve");
        }

        let gross = round.gross_stake();
        let pool = settlement::payable_pool(gross, &state.config.margin_policy());
        let winner_total = round.total_on(&winner);
        let quota = settlement::quota(pool, winner_total);

        let mut payouts = Vec::new();
        let mut failed = Vec::new();

        match quota {
            None => {
                info!(%winner, gross, "winning outcome has zero stake, no payouts");
            }
            Some(quota) => {
                info!(%winner, gross, pool, quota, "resolving round");
                for (player, stake) in round.supporters_of(&winner) {
                    let amount = settlement::payout(stake, quota);
                    if amount == 0 {
                        debug!(%player, stake, "payout rounded to zero, skipping");
                        continue;
                    }
                    let record = PayoutRecord {
                        player: player.clone(),
                        amount,
                    };
                    let reason = format!("Bet payout: {} won, quota {:.3}", winner, quota);
                    match self
                        .issue_payout(&mut state, &player, amount, PayoutKind::Winnings, &reason)
                        .await
                    {
                        Ok(()) => payouts.push(record),
                        Err(reason) => {
                            self.emit(LedgerEvent::PayoutFailed {
                                player: player.clone(),
                                amount,
                                reason,
                            });
                            failed.push(record);
                        }
                    }
                }
            }
        }

        self.emit(LedgerEvent::RoundResolved {
            outcome: winner.clone(),
            quota,
            payouts: payouts.clone(),
        });
        Ok(ResolveSummary {
            outcome: winner,
            pool,
            quota,
            payouts,
            failed,
            abandoned_pending,
        })
    }

    /// Cancel the round and refund every confirmed contribution at face
    /// value. Pending stakes are abandoned.
    pub async fn reset_round(&self) -> Result<ResetSummary, LedgerError> {
        let mut state = self.state.lock().await;
        let round = state.round.take().ok_or(LedgerError::NoActiveRound)?;

        let abandoned_pending = round.pending_stakes.len();
        if abandoned_pending > 0 {
            warn!(abandoned_pending, "abandoning unconfirmed stakes at reset");
        }
        info!("round reset, refunding all confirmed stakes");

        let mut refunds = Vec::new();
        let mut failed = Vec::new();
        for (player, stake) in round.all_contributions() {
            let record = PayoutRecord {
                player: player.clone(),
                amount: stake,
            };
            match self
                .issue_payout(
                    &mut state,
                    &player,
                    stake,
                    PayoutKind::Refund,
                    "Bet cancelled, stake refunded",
                )
                .await
            {
                Ok(()) => refunds.push(record),
                Err(reason) => {
                    self.emit(LedgerEvent::PayoutFailed {
                        player: player.clone(),
                        amount: stake,
                        reason,
                    });
                    failed.push(record);
                }
            }
        }

        self.emit(LedgerEvent::RoundReset {
            refunds: refunds.clone(),
        });
        Ok(ResetSummary {
            refunds,
            failed,
            abandoned_pending,
        })
    }

    /// One outgoing payment: reserve pre-check, then the gateway call.
    /// Errors come back as display-ready strings; the caller reports and
    /// moves on.
    async fn issue_payout(
        &self,
        state: &mut LedgerState,
        player: &PlayerId,
        amount: u64,
        kind: PayoutKind,
        reason: &str,
    ) -> Result<(), String> {
        let balance = self
            .gateway
            .server_balance()
            .await
            .map_err(|e| format!("balance check failed: {e}"))?;
        if !payout_within_reserve(balance, amount) {
            warn!(%player, amount, balance, "payout exceeds server reserve");
            return Err(format!(
                "server balance {balance} too low to pay {amount}"
            ));
        }
        match self.gateway.pay(player, amount, reason).await {
            Ok(handle) => {
                state.pending_payouts.insert(
                    handle,
                    PendingPayout {
                        player: player.clone(),
                        amount,
                        kind,
                    },
                );
                Ok(())
            }
            Err(err) => {
                warn!(%player, amount, %err, "payout request failed");
                Err(err.to_string())
            }
        }
    }

    /// Per-outcome payout quotas for the current round. Outcomes nobody
    /// backed yet report `None`.
    pub async fn quotas(&self) -> Result<Vec<(OutcomeId, Option<f64>)>, LedgerError> {
        let state = self.state.lock().await;
        let round = state.round.as_ref().ok_or(LedgerError::NoActiveRound)?;
        let pool = settlement::payable_pool(round.gross_stake(), &state.config.margin_policy());
        Ok(round
            .outcomes
            .iter()
            .map(|o| (o.clone(), settlement::quota(pool, round.total_on(o))))
            .collect())
    }

    /// Debug view of the ledger state.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock().await;
        match &state.round {
            Some(round) => LedgerSnapshot {
                active: true,
                open: round.open,
                stake_totals: round
                    .outcomes
                    .iter()
                    .map(|o| (o.clone(), round.total_on(o)))
                    .collect(),
                supporter_counts: round
                    .outcomes
                    .iter()
                    .map(|o| {
                        let count = round.contributions.get(o).map(|m| m.len()).unwrap_or(0);
                        (o.clone(), count)
                    })
                    .collect(),
                pending_stakes: round.pending_stakes.len(),
                pending_payouts: state.pending_payouts.len(),
            },
            None => LedgerSnapshot {
                active: false,
                open: false,
                stake_totals: Vec::new(),
                supporter_counts: Vec::new(),
                pending_stakes: 0,
                pending_payouts: state.pending_payouts.len(),
            },
        }
    }

    /// Replace the round configuration. Applied immediately when idle,
    /// otherwise queued for the next fresh round.
    pub async fn update_config(&self, config: RoundConfig) -> Result<ConfigApplied, LedgerError> {
        config.validate()?;
        let mut state = self.state.lock().await;
        if state.round.is_some() {
            info!("round active, deferring configuration change");
            state.deferred_config = Some(config);
            Ok(ConfigApplied::Deferred)
        } else {
            state.config = config;
            state.deferred_config = None;
            Ok(ConfigApplied::Applied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutcomeConfig;
    use crate::gateway::{PaperGateway, PaperGatewayConfig};

    fn manual_ledger() -> (StakeLedger, Arc<PaperGateway>) {
        let (gateway, _rx) = PaperGateway::new(PaperGatewayConfig {
            auto_confirm: false,
            ..PaperGatewayConfig::default()
        });
        let ledger = StakeLedger::new(gateway.clone(), RoundConfig::default());
        (ledger, gateway)
    }

    async fn confirm(ledger: &StakeLedger, handle: TxHandle) {
        ledger
            .on_payment_notification(PaymentNotification {
                handle,
                status: PaymentStatus::Confirmed,
            })
            .await;
    }

    #[tokio::test]
    async fn stake_without_round_is_rejected_as_closed() {
        let (ledger, _) = manual_ledger();
        let err = ledger
            .place_stake(&PlayerId::from("alice"), "red", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BettingClosed));
    }

    #[tokio::test]
    async fn stake_on_unknown_outcome_is_rejected() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        let err = ledger
            .place_stake(&PlayerId::from("alice"), "green", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidOutcome(_)));
    }

    #[tokio::test]
    async fn stake_after_close_is_rejected() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        assert!(ledger.close_round().await);
        let err = ledger
            .place_stake(&PlayerId::from("alice"), "red", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BettingClosed));
    }

    #[tokio::test]
    async fn stake_bounds_cover_the_running_total() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        let alice = PlayerId::from("alice");

        // Below min
        assert!(matches!(
            ledger.place_stake(&alice, "red", 5).await.unwrap_err(),
            LedgerError::StakeOutOfRange { .. }
        ));
        // Zero amount
        assert!(matches!(
            ledger.place_stake(&alice, "red", 0).await.unwrap_err(),
            LedgerError::StakeOutOfRange { .. }
        ));

        // A confirmed 9_000 stake plus 2_000 more exceeds max 10_000
        let handle = ledger.place_stake(&alice, "red", 9_000).await.unwrap();
        confirm(&ledger, handle).await;
        assert!(matches!(
            ledger.place_stake(&alice, "red", 2_000).await.unwrap_err(),
            LedgerError::StakeOutOfRange { .. }
        ));
        // Topping up within bounds is fine
        assert!(ledger.place_stake(&alice, "red", 1_000).await.is_ok());
    }

    #[tokio::test]
    async fn pending_stake_blocks_a_different_outcome() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        let alice = PlayerId::from("alice");

        // Pending (unconfirmed) on red already commits alice to red.
        ledger.place_stake(&alice, "red", 50).await.unwrap();
        let err = ledger.place_stake(&alice, "blue", 50).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConflictingOutcome { .. }));
    }

    #[tokio::test]
    async fn confirmed_stake_blocks_a_different_outcome() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        let alice = PlayerId::from("alice");

        let handle = ledger.place_stake(&alice, "red", 50).await.unwrap();
        confirm(&ledger, handle).await;
        let err = ledger.place_stake(&alice, "blue", 50).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ConflictingOutcome { existing, .. } if existing == OutcomeId::new("red")
        ));
    }

    #[tokio::test]
    async fn outcome_matching_is_case_insensitive() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        assert!(ledger
            .place_stake(&PlayerId::from("alice"), "RED", 100)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn reopen_preserves_existing_stakes() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        let handle = ledger
            .place_stake(&PlayerId::from("alice"), "red", 100)
            .await
            .unwrap();
        confirm(&ledger, handle).await;
        ledger.close_round().await;

        assert_eq!(ledger.open_round().await, OpenOutcome::Reopened);
        let snapshot = ledger.snapshot().await;
        assert!(snapshot.open);
        assert_eq!(snapshot.stake_totals[0], (OutcomeId::new("red"), 100));
    }

    #[tokio::test]
    async fn resolve_and_reset_require_an_active_round() {
        let (ledger, _) = manual_ledger();
        assert!(matches!(
            ledger.resolve_round("red").await.unwrap_err(),
            LedgerError::NoActiveRound
        ));
        assert!(matches!(
            ledger.reset_round().await.unwrap_err(),
            LedgerError::NoActiveRound
        ));
        assert!(matches!(
            ledger.quotas().await.unwrap_err(),
            LedgerError::NoActiveRound
        ));
    }

    #[tokio::test]
    async fn resolve_rejects_unknown_winner_and_keeps_the_round() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        assert!(matches!(
            ledger.resolve_round("green").await.unwrap_err(),
            LedgerError::InvalidOutcome(_)
        ));
        assert!(ledger.snapshot().await.active);
    }

    #[tokio::test]
    async fn quotas_report_none_for_unbacked_outcomes() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;
        let handle = ledger
            .place_stake(&PlayerId::from("alice"), "red", 100)
            .await
            .unwrap();
        confirm(&ledger, handle).await;

        let quotas = ledger.quotas().await.unwrap();
        assert_eq!(quotas[0], (OutcomeId::new("red"), Some(1.0)));
        assert_eq!(quotas[1], (OutcomeId::new("blue"), None));
    }

    #[tokio::test]
    async fn config_update_is_deferred_while_a_round_is_active() {
        let (ledger, _) = manual_ledger();
        ledger.open_round().await;

        let new_config = RoundConfig {
            outcomes: vec![
                OutcomeConfig::plain("alpha"),
                OutcomeConfig::plain("beta"),
            ],
            ..RoundConfig::default()
        };
        assert_eq!(
            ledger.update_config(new_config).await.unwrap(),
            ConfigApplied::Deferred
        );
        // Current round still uses the old outcomes.
        assert!(ledger
            .place_stake(&PlayerId::from("alice"), "alpha", 100)
            .await
            .is_err());

        ledger.reset_round().await.unwrap();
        match ledger.open_round().await {
            OpenOutcome::Opened { outcomes, .. } => {
                assert_eq!(outcomes, vec![OutcomeId::new("alpha"), OutcomeId::new("beta")]);
            }
            other => panic!("expected a fresh round, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_up_front() {
        let (ledger, _) = manual_ledger();
        let bad = RoundConfig {
            outcomes: Vec::new(),
            ..RoundConfig::default()
        };
        assert!(matches!(
            ledger.update_config(bad).await.unwrap_err(),
            LedgerError::InvalidConfig(_)
        ));
    }
}
