//! Composite technical scorer and session-aware gate.
//!
//! Four components, each in [0, 1], blended by the configured weights
//! (validated to sum to 1.0 at load time, never per call):
//!
//! - `structure_quality`: best live quality in the snapshot;
//! - `uzr_strength`: continuous rejection strength when available, else
//!   the coarse 1.0 / 0.6 / 0.0 ladder;
//! - `ema_alignment`: 0.7 for the full short/medium/long ordering in the
//!   trade direction, 0.4 for short/medium only, plus a slope bonus;
//! - `zone_proximity`: linear decay of the distance to the nearest zone.
//!
//! The gate compares the weighted sum against the (timeframe, class,
//! session) threshold table. `gate_reasons` carries the numeric shortfall;
//! it is empty exactly when the gate passed. Pure and deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CoreConfig, RuleTable, ScorerWeights};
use crate::detect::RejectionContext;
use crate::domain::{Bar, SessionContext, Side};
use crate::indicators::{normalize, IndicatorValues};
use crate::manager::StructureManager;

pub const COMPONENT_STRUCTURE_QUALITY: &str = "structure_quality";
pub const COMPONENT_UZR_STRENGTH: &str = "uzr_strength";
pub const COMPONENT_EMA_ALIGNMENT: &str = "ema_alignment";
pub const COMPONENT_ZONE_PROXIMITY: &str = "zone_proximity";

/// Scorer output for one bar of one instrument. Never persisted past the
/// decision it informs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub composite_tech_score: f64,
    pub passed_gate: bool,
    /// Ordered rejection causes; empty iff `passed_gate`.
    pub gate_reasons: Vec<String>,
    /// The four named components and their values.
    pub component_breakdown: BTreeMap<String, f64>,
}

impl CompositeResult {
    pub fn component(&self, name: &str) -> f64 {
        self.component_breakdown.get(name).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct CompositeScorer {
    weights: ScorerWeights,
    ema_slope_cap_atr: f64,
    proximity_max_atr: f64,
    thresholds: RuleTable,
    atr_key: String,
    ema_short_key: String,
    ema_medium_key: String,
    ema_long_key: String,
}

impl CompositeScorer {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            weights: config.scorer.weights.clone(),
            ema_slope_cap_atr: config.scorer.ema_slope_cap_atr,
            proximity_max_atr: config.scorer.proximity_max_atr,
            thresholds: config.thresholds.clone(),
            atr_key: config.indicators.atr_key(),
            ema_short_key: config.indicators.ema_short_key(),
            ema_medium_key: config.indicators.ema_medium_key(),
            ema_long_key: config.indicators.ema_long_key(),
        }
    }

    pub fn compute(
        &self,
        bars: &[Bar],
        bar_index: usize,
        manager: &StructureManager,
        rejection: Option<&RejectionContext>,
        indicators: &IndicatorValues,
        session: &SessionContext,
    ) -> CompositeResult {
        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
        let side = manager.lead().map(|s| s.side);

        let structure_quality =
            manager.snapshot().iter().map(|s| s.quality).fold(0.0, f64::max);
        let uzr_strength = uzr_component(rejection);
        let ema_alignment = self.ema_component(bar_index, indicators, atr, side);
        let zone_proximity = self.proximity_component(&bars[bar_index], manager, atr);

        let composite = self.weights.structure_quality * structure_quality
            + self.weights.uzr_strength * uzr_strength
            + self.weights.ema_alignment * ema_alignment
            + self.weights.zone_proximity * zone_proximity;

        let threshold =
            self.thresholds.lookup(session.timeframe, session.class, session.session);

        let mut gate_reasons = Vec::new();
        if manager.is_empty() {
            gate_reasons.push("no active structures".to_string());
        }
        if composite < threshold {
            gate_reasons.push(format!(
                "composite {composite:.2} < {} threshold {threshold:.2}",
                session.session
            ));
        }
        let passed_gate = gate_reasons.is_empty();
        debug!(
            bar_index,
            composite,
            threshold,
            passed = passed_gate,
            session = %session.session,
            "composite gate"
        );

        let mut component_breakdown = BTreeMap::new();
        component_breakdown.insert(COMPONENT_STRUCTURE_QUALITY.to_string(), structure_quality);
        component_breakdown.insert(COMPONENT_UZR_STRENGTH.to_string(), uzr_strength);
        component_breakdown.insert(COMPONENT_EMA_ALIGNMENT.to_string(), ema_alignment);
        component_breakdown.insert(COMPONENT_ZONE_PROXIMITY.to_string(), zone_proximity);

        CompositeResult {
            composite_tech_score: composite,
            passed_gate,
            gate_reasons,
            component_breakdown,
        }
    }

    /// 0.7 for the full EMA stack ordered in the trade direction, 0.4 when
    /// only short/medium are ordered, plus a short-EMA slope bonus that
    /// saturates at `ema_slope_cap_atr` per bar. Clamped to 1.0.
    fn ema_component(
        &self,
        bar_index: usize,
        indicators: &IndicatorValues,
        atr: f64,
        side: Option<Side>,
    ) -> f64 {
        let Some(side) = side else {
            return 0.0;
        };
        let (Some(short), Some(medium), Some(long)) = (
            indicators.get(&self.ema_short_key, bar_index),
            indicators.get(&self.ema_medium_key, bar_index),
            indicators.get(&self.ema_long_key, bar_index),
        ) else {
            return 0.0;
        };
        if !short.is_finite() || !medium.is_finite() || !long.is_finite() {
            return 0.0;
        }

        let (full, partial) = match side {
            Side::Bullish => (short > medium && medium > long, short > medium),
            Side::Bearish => (short < medium && medium < long, short < medium),
        };
        let base = if full {
            0.7
        } else if partial {
            0.4
        } else {
            return 0.0;
        };

        let mut bonus = 0.0;
        if self.ema_slope_cap_atr > 0.0 && bar_index > 0 {
            if let Some(prev) = indicators.get(&self.ema_short_key, bar_index - 1) {
                if prev.is_finite() {
                    let slope = match side {
                        Side::Bullish => short - prev,
                        Side::Bearish => prev - short,
                    };
                    let slope_atr = normalize::in_atr_units(slope.max(0.0), atr);
                    bonus = 0.3 * normalize::clamp01(slope_atr / self.ema_slope_cap_atr);
                }
            }
        }
        normalize::clamp01(base + bonus)
    }

    /// Linear decay of the ATR distance from the close to the nearest live
    /// zone: 1 inside a zone, 0 at `proximity_max_atr` and beyond.
    fn proximity_component(&self, bar: &Bar, manager: &StructureManager, atr: f64) -> f64 {
        if manager.is_empty() || !normalize::atr_usable(atr) {
            return 0.0;
        }
        let nearest = manager
            .snapshot()
            .iter()
            .map(|s| s.distance_from(bar.close))
            .fold(f64::MAX, f64::min);
        let dist_atr = normalize::in_atr_units(nearest, atr);
        normalize::clamp01(1.0 - dist_atr / self.proximity_max_atr)
    }
}

fn uzr_component(rejection: Option<&RejectionContext>) -> f64 {
    match rejection {
        Some(ctx) => {
            if let Some(strength) = ctx.rejection_strength {
                strength
            } else if ctx.rejection_confirmed_next {
                1.0
            } else if ctx.rejection {
                0.6
            } else {
                0.0
            }
        }
        None => 0.0,
    }
}
