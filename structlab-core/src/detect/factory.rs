//! Detector and indicator construction from configuration.
//!
//! `build_detectors` turns the config's detector sections into runtime
//! instances, in configured priority order. A kind that is disabled, or
//! absent from the priority list, is not built at all. `required_indicators`
//! resolves the deduplicated indicator set the built pipeline needs
//! precomputed before the bar loop.

use std::collections::HashSet;

use crate::config::CoreConfig;
use crate::domain::StructureKind;
use crate::indicators::{Atr, Ema, Indicator};

use super::{
    Detector, DisplacementDetector, EngulfingDetector, ImbalanceGapDetector,
    LiquiditySweepDetector, StructuralBreakDetector, ZoneRejectionDetector,
};

/// Build the enabled detectors in configured priority order.
pub fn build_detectors(config: &CoreConfig) -> Vec<Detector> {
    let atr_key = config.indicators.atr_key();
    let d = &config.detectors;
    let mut detectors = Vec::with_capacity(d.priority.len());

    for kind in &d.priority {
        match kind {
            StructureKind::Displacement if d.displacement.enabled => {
                let c = &d.displacement;
                detectors.push(Detector::Displacement(DisplacementDetector::new(
                    c.displacement_min_body_atr,
                    c.excess_beyond_swing_atr,
                    c.mid_band_atr,
                    c.swing_lookback,
                    c.max_age_bars,
                    c.max_concurrent_per_side,
                    atr_key.clone(),
                )));
            }
            StructureKind::Imbalance if d.imbalance.enabled => {
                let c = &d.imbalance;
                detectors.push(Detector::Imbalance(ImbalanceGapDetector::new(
                    c.min_gap_atr_multiplier,
                    c.min_gap_size,
                    c.max_age_bars,
                    c.max_concurrent_per_side,
                    atr_key.clone(),
                )));
            }
            StructureKind::StructuralBreak if d.structural_break.enabled => {
                let c = &d.structural_break;
                detectors.push(Detector::StructuralBreak(StructuralBreakDetector::new(
                    c.pivot_window,
                    c.min_break_strength,
                    c.debounce_bars,
                    c.max_age_bars,
                    c.max_concurrent_per_side,
                    atr_key.clone(),
                )));
            }
            StructureKind::LiquiditySweep if d.liquidity_sweep.enabled => {
                let c = &d.liquidity_sweep;
                detectors.push(Detector::LiquiditySweep(LiquiditySweepDetector::new(
                    c.sweep_excess_atr,
                    c.reversal_window_bars,
                    c.swing_lookback,
                    c.max_age_bars,
                    c.max_concurrent_per_side,
                    atr_key.clone(),
                )));
            }
            StructureKind::ZoneRejection if d.zone_rejection.enabled => {
                let c = &d.zone_rejection;
                detectors.push(Detector::ZoneRejection(ZoneRejectionDetector::new(
                    c.touch_atr_buffer,
                    c.min_reaction_body_atr,
                    c.min_follow_through_atr,
                    c.lookahead_bars,
                    c.max_age_bars,
                    c.max_concurrent_per_side,
                    atr_key.clone(),
                )));
            }
            StructureKind::Engulfing if d.engulfing.enabled => {
                let c = &d.engulfing;
                let trend_key = c.use_trend_filter.then(|| config.indicators.ema_long_key());
                let proximity = (c.zone_proximity_atr > 0.0).then_some(c.zone_proximity_atr);
                detectors.push(Detector::Engulfing(EngulfingDetector::new(
                    c.min_body_atr,
                    c.min_body_to_range,
                    trend_key,
                    c.use_break_confirmation,
                    proximity,
                    c.max_age_bars,
                    c.max_concurrent_per_side,
                    atr_key.clone(),
                )));
            }
            _ => {}
        }
    }
    detectors
}

/// Deduplicated indicator set for precomputation before the bar loop.
///
/// The shared ATR backs every detector threshold; the three EMAs feed the
/// scorer's alignment component (the long one doubles as the engulfing
/// trend filter).
pub fn required_indicators(config: &CoreConfig) -> Vec<Box<dyn Indicator>> {
    let mut seen = HashSet::new();
    let mut indicators: Vec<Box<dyn Indicator>> = Vec::new();

    let mut add = |ind: Box<dyn Indicator>| {
        let key = ind.name().to_string();
        if seen.insert(key) {
            indicators.push(ind);
        }
    };

    add(Box::new(Atr::new(config.indicators.atr_period)));
    add(Box::new(Ema::new(config.indicators.ema_short_period)));
    add(Box::new(Ema::new(config.indicators.ema_medium_period)));
    add(Box::new(Ema::new(config.indicators.ema_long_period)));

    indicators
}
