//! Pure settlement arithmetic: payable pool, quota, payout rounding.
//!
//! Rounding contract: per-supporter payouts round half away from zero
//! (`f64::round`), so a 0.5-planet fraction always rounds up. Documented
//! here because the downstream conservation property (sum of payouts vs
//! pool) holds only up to this rounding slack.

use serde::{Deserialize, Serialize};

/// House cut applied to the gross stake at settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarginPolicy {
    /// Sign is ignored; the margin is always a deduction. Operators
    /// cannot configure a margin that inflates the pool.
    pub amount: i64,
    /// When true, `amount` is a percentage of the gross stake,
    /// wrapped into [0, 100].
    pub relative: bool,
}

impl MarginPolicy {
    pub const NONE: MarginPolicy = MarginPolicy {
        amount: 0,
        relative: false,
    };
}

/// Total amount distributable to winners: gross stake minus margin,
/// clamped at zero so an oversized absolute margin can never produce
/// negative payouts.
pub fn payable_pool(gross: u64, margin: &MarginPolicy) -> f64 {
    let gross = gross as f64;
    let cut = margin.amount.unsigned_abs();
    let pool = if margin.relative {
        let pct = (cut % 101) as f64;
        gross - pct * gross / 100.0
    } else {
        gross - cut as f64
    };
    pool.max(0.0)
}

/// Payout multiplier for an outcome, or `None` when nobody backed it.
pub fn quota(pool: f64, outcome_total: u64) -> Option<f64> {
    if outcome_total == 0 {
        None
    } else {
        Some(pool / outcome_total as f64)
    }
}

/// A single supporter's payout for a winning stake.
pub fn payout(stake: u64, quota: f64) -> u64 {
    (stake as f64 * quota).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_without_margin_is_gross() {
        assert_eq!(payable_pool(400, &MarginPolicy::NONE), 400.0);
    }

    #[test]
    fn absolute_margin_is_subtracted() {
        let margin = MarginPolicy {
            amount: 10,
            relative: false,
        };
        assert_eq!(payable_pool(400, &margin), 390.0);
    }

    #[test]
    fn relative_margin_takes_a_percentage() {
        let margin = MarginPolicy {
            amount: 20,
            relative: true,
        };
        assert_eq!(payable_pool(400, &margin), 320.0);
    }

    #[test]
    fn margin_sign_is_ignored() {
        let negative = MarginPolicy {
            amount: -10,
            relative: false,
        };
        assert_eq!(payable_pool(400, &negative), 390.0);

        let negative_rel = MarginPolicy {
            amount: -20,
            relative: true,
        };
        assert_eq!(payable_pool(400, &negative_rel), 320.0);
    }

    #[test]
    fn relative_margin_wraps_into_percent_range() {
        // 120 wraps to 19 via mod 101
        let margin = MarginPolicy {
            amount: 120,
            relative: true,
        };
        assert_eq!(payable_pool(100, &margin), 81.0);

        // 100 stays 100: the whole pool goes to the house
        let full = MarginPolicy {
            amount: 100,
            relative: true,
        };
        assert_eq!(payable_pool(100, &full), 0.0);
    }

    #[test]
    fn oversized_absolute_margin_clamps_pool_to_zero() {
        let margin = MarginPolicy {
            amount: 1_000,
            relative: false,
        };
        assert_eq!(payable_pool(400, &margin), 0.0);
    }

    #[test]
    fn quota_is_pool_over_outcome_total() {
        assert_eq!(quota(400.0, 100), Some(4.0));
        assert_eq!(quota(390.0, 100), Some(3.9));
        assert_eq!(quota(400.0, 0), None);
    }

    #[test]
    fn payout_rounds_half_away_from_zero() {
        // Exactly-representable half boundaries round up, never to even.
        assert_eq!(payout(1, 2.5), 3);
        assert_eq!(payout(3, 1.5), 5); // 4.5 -> 5
        assert_eq!(payout(100, 3.9), 390);
    }

    #[test]
    fn scenario_from_the_field() {
        // A stakes 100 on red, B stakes 300 on blue, red wins.
        let gross = 400;
        let pool = payable_pool(gross, &MarginPolicy::NONE);
        let q = quota(pool, 100).unwrap();
        assert_eq!(q, 4.0);
        assert_eq!(payout(100, q), 400);
    }
}
