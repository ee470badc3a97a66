//! Per-round bookkeeping: stake totals, per-player contributions and the
//! pending-transaction table. Pure state and mutations; all gateway
//! traffic and locking live in the engine.

use std::collections::HashMap;

use crate::models::{OutcomeId, PendingStake, PlayerId, TxHandle};

#[derive(Debug, Clone)]
pub struct RoundState {
    /// Accepting new stakes.
    pub open: bool,
    /// Valid targets for this round, frozen at open time.
    pub outcomes: Vec<OutcomeId>,
    /// Sum of confirmed contributions per outcome.
    pub stake_totals: HashMap<OutcomeId, u64>,
    /// Confirmed per-player stake per outcome. A player appears under at
    /// most one outcome per round.
    pub contributions: HashMap<OutcomeId, HashMap<PlayerId, u64>>,
    /// Stakes charged to the gateway but not yet confirmed.
    pub pending_stakes: HashMap<TxHandle, PendingStake>,
}

impl RoundState {
    pub fn new(outcomes: Vec<OutcomeId>) -> Self {
        let stake_totals = outcomes.iter().map(|o| (o.clone(), 0)).collect();
        let contributions = outcomes
            .iter()
            .map(|o| (o.clone(), HashMap::new()))
            .collect();
        Self {
            open: true,
            outcomes,
            stake_totals,
            contributions,
            pending_stakes: HashMap::new(),
        }
    }

    pub fn has_outcome(&self, outcome: &OutcomeId) -> bool {
        self.outcomes.contains(outcome)
    }

    /// Player's confirmed contribution on one outcome.
    pub fn confirmed_on(&self, outcome: &OutcomeId, player: &PlayerId) -> u64 {
        self.contributions
            .get(outcome)
            .and_then(|m| m.get(player))
            .copied()
            .unwrap_or(0)
    }

    /// The outcome a player is committed to, confirmed or pending.
    pub fn backed_outcome(&self, player: &PlayerId) -> Option<OutcomeId> {
        for (outcome, supporters) in &self.contributions {
            if supporters.contains_key(player) {
                return Some(outcome.clone());
            }
        }
        self.pending_stakes
            .values()
            .find(|p| &p.player == player)
            .map(|p| p.outcome.clone())
    }

    /// Total confirmed stake across all outcomes.
    pub fn gross_stake(&self) -> u64 {
        self.stake_totals.values().sum()
    }

    pub fn total_on(&self, outcome: &OutcomeId) -> u64 {
        self.stake_totals.get(outcome).copied().unwrap_or(0)
    }

    /// Fold a confirmed stake into totals and contributions.
    pub fn apply_confirmed(&mut self, stake: &PendingStake) {
        *self.stake_totals.entry(stake.outcome.clone()).or_insert(0) += stake.amount;
        *self
            .contributions
            .entry(stake.outcome.clone())
            .or_default()
            .entry(stake.player.clone())
            .or_insert(0) += stake.amount;
    }

    /// Supporters of one outcome, sorted by player for deterministic
    /// payout ordering.
    pub fn supporters_of(&self, outcome: &OutcomeId) -> Vec<(PlayerId, u64)> {
        let mut supporters: Vec<(PlayerId, u64)> = self
            .contributions
            .get(outcome)
            .map(|m| m.iter().map(|(p, s)| (p.clone(), *s)).collect())
            .unwrap_or_default();
        supporters.sort_by(|a, b| a.0.cmp(&b.0));
        supporters
    }

    /// Every confirmed contribution in the round, outcome order first,
    /// then player order. Used by reset refunds.
    pub fn all_contributions(&self) -> Vec<(PlayerId, u64)> {
        let mut all = Vec::new();
        for outcome in &self.outcomes {
            all.extend(self.supporters_of(outcome));
        }
        all
    }
}
