//! Audit configuration.

use rla_stats::PluralityErrorRates;
use serde::{Deserialize, Serialize};

use crate::error::RlaError;

/// Kind of evidence the audit compares against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditType {
    Polling,
    #[default]
    Clca,
}

/// How estimation simulates discrepancies between MVRs and CVRs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Rates measured in the previous round; a priori rates in round one.
    MeasuredFromPreviousRound,
    /// Only phantoms are assumed wrong, as two-vote overstatements.
    PhantomRateOnly,
    /// Fuzz `fuzz_pct` of the cards.
    FixedFuzzPercent,
    /// The configured `apriori_rates`.
    #[default]
    AprioriRates,
}

/// Wager or estimator used by the sequential test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BettingChoice {
    Fixed { lambda: f64 },
    Agrapa,
    /// Closed form from the two-vote overstatement rate; comparison audits only.
    OptimalComparison,
    /// Kelly bet on shrinkage-estimated discrepancy rates (comparison), or
    /// ALPHA with truncated shrinkage (polling).
    Adaptive { d: usize },
    ShrinkTrunc { d: usize },
}

impl Default for BettingChoice {
    fn default() -> Self {
        BettingChoice::Adaptive { d: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub audit_type: AuditType,
    pub risk_limit: f64,
    /// Quantile of the trial sample counts used as the estimate.
    pub quantile: f64,
    pub n_trials: usize,
    pub seed: u64,
    /// Largest number of cards a round may select.
    pub sample_budget_cutoff: Option<usize>,
    pub error_strategy: ErrorStrategy,
    pub betting: BettingChoice,
    pub fuzz_pct: f64,
    pub apriori_rates: PluralityErrorRates,
    /// Every CVR lists exactly the contests on its card.
    pub has_style: bool,
    pub use_phantoms: bool,
    pub n_workers: usize,
    pub max_rounds: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            audit_type: AuditType::default(),
            risk_limit: 0.05,
            quantile: 0.8,
            n_trials: 100,
            seed: 12_356_667,
            sample_budget_cutoff: None,
            error_strategy: ErrorStrategy::default(),
            betting: BettingChoice::default(),
            fuzz_pct: 0.0,
            apriori_rates: PluralityErrorRates::STANDARD,
            has_style: true,
            use_phantoms: false,
            n_workers: 4,
            max_rounds: 5,
        }
    }
}

impl AuditConfig {
    /// Parses and validates a config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, RlaError> {
        let config: AuditConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every parameter lies in its allowed range.
    pub fn validate(&self) -> Result<(), RlaError> {
        if !(self.risk_limit > 0.0 && self.risk_limit < 1.0) {
            return Err(RlaError::config(
                "risk_limit",
                format!("{} must lie in (0, 1)", self.risk_limit),
            ));
        }
        if !(self.quantile > 0.0 && self.quantile <= 1.0) {
            return Err(RlaError::config(
                "quantile",
                format!("{} must lie in (0, 1]", self.quantile),
            ));
        }
        if self.n_trials == 0 {
            return Err(RlaError::config("n_trials", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.fuzz_pct) {
            return Err(RlaError::config(
                "fuzz_pct",
                format!("{} must lie in [0, 1]", self.fuzz_pct),
            ));
        }
        if self.n_workers == 0 {
            return Err(RlaError::config("n_workers", "must be at least 1"));
        }
        if self.max_rounds == 0 {
            return Err(RlaError::config("max_rounds", "must be at least 1"));
        }
        self.apriori_rates
            .validate()
            .map_err(|e| RlaError::config("apriori_rates", e.to_string()))?;
        match self.betting {
            BettingChoice::Fixed { lambda } if !(lambda.is_finite() && lambda >= 0.0) => {
                Err(RlaError::config("betting", format!("lambda {lambda} must be non-negative")))
            }
            BettingChoice::Adaptive { d } | BettingChoice::ShrinkTrunc { d } if d == 0 => {
                Err(RlaError::config("betting", "d must be at least 1"))
            }
            BettingChoice::OptimalComparison if self.audit_type == AuditType::Polling => Err(
                RlaError::config("betting", "optimal_comparison needs a comparison audit"),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AuditConfig::default();
        config.validate().unwrap();
        assert_eq!(config.risk_limit, 0.05);
        assert_eq!(config.apriori_rates, PluralityErrorRates::STANDARD);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = AuditConfig::from_json(
            r#"{"risk_limit": 0.1, "betting": {"kind": "fixed", "lambda": 1.2},
                "error_strategy": "fixed_fuzz_percent", "fuzz_pct": 0.01}"#,
        )
        .unwrap();
        assert_eq!(config.risk_limit, 0.1);
        assert_eq!(config.betting, BettingChoice::Fixed { lambda: 1.2 });
        assert_eq!(config.error_strategy, ErrorStrategy::FixedFuzzPercent);
        assert_eq!(config.n_trials, 100);
    }

    #[test]
    fn rejects_out_of_domain_values() {
        for bad in [
            r#"{"risk_limit": 0.0}"#,
            r#"{"risk_limit": -0.05}"#,
            r#"{"quantile": 1.5}"#,
            r#"{"n_trials": 0}"#,
            r#"{"fuzz_pct": 2.0}"#,
            r#"{"betting": {"kind": "adaptive", "d": 0}}"#,
            r#"{"audit_type": "polling", "betting": {"kind": "optimal_comparison"}}"#,
            r#"{"apriori_rates": {"p2o": 0.9, "p1o": 0.9, "p1u": 0.0, "p2u": 0.0}}"#,
        ] {
            let err = AuditConfig::from_json(bad).unwrap_err();
            assert!(matches!(err, RlaError::InvalidConfig { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn malformed_json_is_json_error() {
        assert!(matches!(
            AuditConfig::from_json("{"),
            Err(RlaError::Json(_))
        ));
    }
}
