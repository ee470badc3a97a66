//! Round configuration: outcome set, stake bounds, and margin policy.
//!
//! Supplied by the server settings layer and read by the ledger at
//! round-open time. Changes while a round is active are deferred and
//! applied at the next fresh open, never mid-round.

use serde::{Deserialize, Serialize};

use crate::ledger::LedgerError;
use crate::models::OutcomeId;
use crate::settlement::MarginPolicy;

const DEFAULT_COLOR: &str = "$FFF";

/// One valid betting target plus its display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeConfig {
    pub id: OutcomeId,
    /// Chat color code used by the display layer. Cosmetic only.
    pub color: String,
}

impl OutcomeConfig {
    pub fn new(name: &str, color: &str) -> Self {
        Self {
            id: OutcomeId::new(name),
            color: color.to_string(),
        }
    }

    pub fn plain(name: &str) -> Self {
        Self::new(name, DEFAULT_COLOR)
    }
}

/// Configuration snapshotted into each fresh round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    pub outcomes: Vec<OutcomeConfig>,
    /// Bounds on a player's total confirmed stake per round.
    pub min_stake: u64,
    pub max_stake: u64,
    /// House cut deducted from the pool at settlement. Sign is ignored;
    /// the margin is always a deduction.
    pub margin: i64,
    /// When true, `margin` is a percentage of the gross stake.
    pub margin_is_relative: bool,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            outcomes: vec![
                OutcomeConfig::new("red", "$F00"),
                OutcomeConfig::new("blue", "$00F"),
            ],
            min_stake: 10,
            max_stake: 10_000,
            margin: 0,
            margin_is_relative: false,
        }
    }
}

impl RoundConfig {
    /// Default config with env overrides applied.
    ///
    /// `WAGER_OUTCOMES` is a comma-separated list of outcome names;
    /// colors fall back to the default when overridden this way.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("WAGER_OUTCOMES") {
            let outcomes: Vec<OutcomeConfig> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(OutcomeConfig::plain)
                .collect();
            if !outcomes.is_empty() {
                config.outcomes = outcomes;
            }
        }
        if let Ok(v) = std::env::var("WAGER_MIN_STAKE") {
            if let Ok(n) = v.parse() {
                config.min_stake = n;
            }
        }
        if let Ok(v) = std::env::var("WAGER_MAX_STAKE") {
            if let Ok(n) = v.parse() {
                config.max_stake = n;
            }
        }
        if let Ok(v) = std::env::var("WAGER_MARGIN") {
            if let Ok(n) = v.parse() {
                config.margin = n;
            }
        }
        if let Ok(v) = std::env::var("WAGER_MARGIN_RELATIVE") {
            if let Ok(b) = v.parse() {
                config.margin_is_relative = b;
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.outcomes.is_empty() {
            return Err(LedgerError::InvalidConfig(
                "at least one outcome is required".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for outcome in &self.outcomes {
            if outcome.id.as_str().is_empty() {
                return Err(LedgerError::InvalidConfig("empty outcome name".into()));
            }
            if !seen.insert(&outcome.id) {
                return Err(LedgerError::InvalidConfig(format!(
                    "duplicate outcome `{}`",
                    outcome.id
                )));
            }
        }
        if self.min_stake == 0 {
            return Err(LedgerError::InvalidConfig(
                "min_stake must be positive".into(),
            ));
        }
        if self.min_stake > self.max_stake {
            return Err(LedgerError::InvalidConfig(format!(
                "min_stake {} exceeds max_stake {}",
                self.min_stake, self.max_stake
            )));
        }
        Ok(())
    }

    pub fn outcome_ids(&self) -> Vec<OutcomeId> {
        self.outcomes.iter().map(|o| o.id.clone()).collect()
    }

    pub fn color_of(&self, outcome: &OutcomeId) -> &str {
        self.outcomes
            .iter()
            .find(|o| &o.id == outcome)
            .map(|o| o.color.as_str())
            .unwrap_or(DEFAULT_COLOR)
    }

    pub fn margin_policy(&self) -> MarginPolicy {
        MarginPolicy {
            amount: self.margin,
            relative: self.margin_is_relative,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RoundConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_outcomes() {
        let config = RoundConfig {
            outcomes: vec![OutcomeConfig::plain("red"), OutcomeConfig::plain("Red")],
            ..RoundConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LedgerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_inverted_stake_bounds() {
        let config = RoundConfig {
            min_stake: 500,
            max_stake: 100,
            ..RoundConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_min_stake() {
        let config = RoundConfig {
            min_stake: 0,
            ..RoundConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_outcome_gets_default_color() {
        let config = RoundConfig::default();
        assert_eq!(config.color_of(&OutcomeId::new("red")), "$F00");
        assert_eq!(config.color_of(&OutcomeId::new("green")), DEFAULT_COLOR);
    }
}
