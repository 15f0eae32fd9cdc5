//! Execution guards: last-line checks between a sized candidate and the
//! order it would become.
//!
//! Guards are config-resolved strategy objects behind one trait, each
//! independently togglable and independently logged. A disabled guard
//! always passes; an enabled guard with unusable account data fails
//! closed. Decisions are point-in-time: the account snapshot may be stale
//! by transmission time, and the downstream broker re-validates anyway.
//!
//! The rescale policy is the exception to the pass/reject shape: it
//! answers a levels-too-tight rejection with a bounded sequence of
//! widened-stop attempts, shrinking size by the same factor to hold the
//! risked amount constant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::domain::{AccountState, SymbolSpec};

/// Where in the order flow a guard runs. The stop-level guard must reject
/// before any sizing occurs; margin math needs the size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStage {
    PreSizing,
    PostSizing,
}

/// Everything a guard may inspect about one candidate order.
#[derive(Debug, Clone)]
pub struct OrderCheck<'a> {
    pub spec: &'a SymbolSpec,
    pub account: &'a AccountState,
    /// Final stop distance, in points.
    pub stop_points: f64,
    /// Final target distance, in points.
    pub target_points: f64,
    /// Lots; None before sizing.
    pub size: Option<f64>,
}

/// A guard's verdict against one order, with the numbers behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardRejection {
    pub guard: String,
    pub reason: String,
    pub context: BTreeMap<String, f64>,
}

impl GuardRejection {
    fn new(guard: &str, reason: String, context: BTreeMap<String, f64>) -> Self {
        Self { guard: guard.to_string(), reason, context }
    }
}

pub trait Guard: Send + Sync {
    fn name(&self) -> &'static str;
    fn stage(&self) -> GuardStage;
    /// None = pass. A disabled guard always passes.
    fn check(&self, order: &OrderCheck<'_>) -> Option<GuardRejection>;
}

/// Minimum broker-acceptable stop/target distance in points.
pub fn required_stop_points(spec: &SymbolSpec, spread_buffer_multiplier: f64) -> f64 {
    spec.stops_level_points + spec.spread_points * spread_buffer_multiplier
}

// -----------------------------------------------------------------------
// Stop-level guard
// -----------------------------------------------------------------------

/// Rejects stops or targets the broker would refuse as too tight.
#[derive(Debug, Clone)]
pub struct StopLevelGuard {
    enabled: bool,
    spread_buffer_multiplier: f64,
}

impl StopLevelGuard {
    pub fn new(enabled: bool, spread_buffer_multiplier: f64) -> Self {
        Self { enabled, spread_buffer_multiplier }
    }
}

impl Guard for StopLevelGuard {
    fn name(&self) -> &'static str {
        "stop_level"
    }

    fn stage(&self) -> GuardStage {
        GuardStage::PreSizing
    }

    fn check(&self, order: &OrderCheck<'_>) -> Option<GuardRejection> {
        if !self.enabled {
            return None;
        }
        let required = required_stop_points(order.spec, self.spread_buffer_multiplier);
        let offender = if order.stop_points < required {
            Some(("stop distance", order.stop_points))
        } else if order.target_points < required {
            Some(("target distance", order.target_points))
        } else {
            None
        };
        let (what, points) = offender?;
        let mut context = BTreeMap::new();
        context.insert("required_points".to_string(), required);
        context.insert("stop_points".to_string(), order.stop_points);
        context.insert("target_points".to_string(), order.target_points);
        Some(GuardRejection::new(
            self.name(),
            format!("{what} {points:.1} points < required {required:.1}"),
            context,
        ))
    }
}

// -----------------------------------------------------------------------
// Margin / open-risk guard
// -----------------------------------------------------------------------

/// Rejects orders that would strain the account: margin level under the
/// floor, too large a bite of free margin, or aggregate open risk past
/// the equity fraction.
#[derive(Debug, Clone)]
pub struct MarginRiskGuard {
    enabled: bool,
    min_margin_level_pct: f64,
    max_free_margin_fraction: f64,
    max_open_risk_fraction: f64,
}

impl MarginRiskGuard {
    pub fn new(
        enabled: bool,
        min_margin_level_pct: f64,
        max_free_margin_fraction: f64,
        max_open_risk_fraction: f64,
    ) -> Self {
        Self {
            enabled,
            min_margin_level_pct,
            max_free_margin_fraction,
            max_open_risk_fraction,
        }
    }
}

impl Guard for MarginRiskGuard {
    fn name(&self) -> &'static str {
        "margin_risk"
    }

    fn stage(&self) -> GuardStage {
        GuardStage::PostSizing
    }

    fn check(&self, order: &OrderCheck<'_>) -> Option<GuardRejection> {
        if !self.enabled {
            return None;
        }
        let account = order.account;
        let mut context = BTreeMap::new();
        context.insert("equity".to_string(), account.equity);
        context.insert("free_margin".to_string(), account.free_margin);

        // Fail closed on an unusable snapshot.
        if !account.equity.is_finite() || !account.free_margin.is_finite() {
            return Some(GuardRejection::new(
                self.name(),
                "account snapshot unusable".to_string(),
                context,
            ));
        }
        let Some(size) = order.size else {
            return Some(GuardRejection::new(
                self.name(),
                "order size unavailable".to_string(),
                context,
            ));
        };
        context.insert("size".to_string(), size);

        // Margin level is undefined at zero used margin; None with open
        // positions is an inconsistent snapshot.
        match account.margin_level_pct {
            Some(level) if level < self.min_margin_level_pct => {
                context.insert("margin_level_pct".to_string(), level);
                context.insert("min_margin_level_pct".to_string(), self.min_margin_level_pct);
                return Some(GuardRejection::new(
                    self.name(),
                    format!(
                        "margin level {level:.1}% < floor {:.1}%",
                        self.min_margin_level_pct
                    ),
                    context,
                ));
            }
            None if !account.open_positions.is_empty() => {
                return Some(GuardRejection::new(
                    self.name(),
                    "margin level unavailable with open positions".to_string(),
                    context,
                ));
            }
            _ => {}
        }

        let margin_needed = size * order.spec.margin_per_lot;
        let margin_budget = self.max_free_margin_fraction * account.free_margin;
        if margin_needed > margin_budget {
            context.insert("margin_needed".to_string(), margin_needed);
            context.insert("margin_budget".to_string(), margin_budget);
            return Some(GuardRejection::new(
                self.name(),
                format!("margin {margin_needed:.2} > budget {margin_budget:.2}"),
                context,
            ));
        }

        let open_risk = account.aggregate_open_risk();
        let new_risk = size * order.stop_points * order.spec.tick_value;
        let risk_budget = self.max_open_risk_fraction * account.equity;
        if open_risk + new_risk > risk_budget {
            context.insert("open_risk".to_string(), open_risk);
            context.insert("new_risk".to_string(), new_risk);
            context.insert("risk_budget".to_string(), risk_budget);
            return Some(GuardRejection::new(
                self.name(),
                format!(
                    "aggregate risk {:.2} > budget {risk_budget:.2}",
                    open_risk + new_risk
                ),
                context,
            ));
        }
        None
    }
}

// -----------------------------------------------------------------------
// Guard chain
// -----------------------------------------------------------------------

/// The config-resolved guard set, checked in a fixed order per stage.
pub struct ExecutionGuards {
    guards: Vec<Box<dyn Guard>>,
}

impl ExecutionGuards {
    pub fn new(config: &CoreConfig) -> Self {
        let g = &config.guards;
        let guards: Vec<Box<dyn Guard>> = vec![
            Box::new(StopLevelGuard::new(
                g.stop_level.enabled,
                g.stop_level.spread_buffer_multiplier,
            )),
            Box::new(MarginRiskGuard::new(
                g.margin.enabled,
                g.margin.min_margin_level_pct,
                g.margin.max_free_margin_fraction,
                g.margin.max_open_risk_fraction,
            )),
        ];
        Self { guards }
    }

    /// First rejection among the stage's guards, or None when all pass.
    pub fn check(&self, stage: GuardStage, order: &OrderCheck<'_>) -> Option<GuardRejection> {
        for guard in self.guards.iter().filter(|g| g.stage() == stage) {
            match guard.check(order) {
                Some(rejection) => {
                    info!(
                        guard = rejection.guard.as_str(),
                        reason = rejection.reason.as_str(),
                        "guard rejected order"
                    );
                    return Some(rejection);
                }
                None => debug!(guard = guard.name(), "guard passed"),
            }
        }
        None
    }
}

// -----------------------------------------------------------------------
// Rescale policy
// -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RescaleError {
    #[error("rescale disabled")]
    Disabled,
    /// The widening sequence ran out without clearing the requirement.
    #[error("rescale exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },
    /// Widening pushed reward/risk under the minimum. Multipliers only
    /// grow, so later attempts cannot recover.
    #[error("rescale attempt {attempt} rr {computed_rr:.2} < min_rr {min_rr:.2}")]
    RiskRewardViolated { attempt: usize, computed_rr: f64, min_rr: f64 },
}

/// One accepted widening step.
#[derive(Debug, Clone, PartialEq)]
pub struct RescaleAttempt {
    /// 1-based position in the widening sequence.
    pub attempt: usize,
    pub multiplier: f64,
    /// Widened stop distance, in points.
    pub stop_points: f64,
    /// Reward/risk at the widened stop.
    pub computed_rr: f64,
}

/// Bounded stop-widening response to a levels-too-tight rejection. The
/// caller re-sizes with the widened stop, which shrinks volume by the
/// same factor and keeps the risked amount constant.
#[derive(Debug, Clone)]
pub struct RescalePolicy {
    enabled: bool,
    multipliers: Vec<f64>,
}

impl RescalePolicy {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            enabled: config.guards.rescale.enabled,
            multipliers: config.guards.rescale.widening_multipliers.clone(),
        }
    }

    /// Walk the widening sequence until the stop clears `required_points`
    /// with reward/risk still at or above `min_rr`.
    pub fn rescale(
        &self,
        stop_points: f64,
        target_points: f64,
        required_points: f64,
        min_rr: f64,
    ) -> Result<RescaleAttempt, RescaleError> {
        if !self.enabled {
            return Err(RescaleError::Disabled);
        }
        for (i, multiplier) in self.multipliers.iter().enumerate() {
            let attempt = i + 1;
            let widened = stop_points * multiplier;
            let computed_rr = target_points / widened;
            if computed_rr < min_rr {
                warn!(attempt, computed_rr, min_rr, "rescale stopped by risk/reward");
                return Err(RescaleError::RiskRewardViolated { attempt, computed_rr, min_rr });
            }
            if widened >= required_points {
                debug!(attempt, multiplier, stop_points = widened, "rescale accepted");
                return Ok(RescaleAttempt {
                    attempt,
                    multiplier: *multiplier,
                    stop_points: widened,
                    computed_rr,
                });
            }
        }
        warn!(attempts = self.multipliers.len(), "rescale exhausted");
        Err(RescaleError::Exhausted { attempts: self.multipliers.len() })
    }
}
