//! Structure-derived exit planning with broker distance clamping.
//!
//! The planner walks the configured source priority until one yields a
//! valid geometry: stop beyond the backing zone's far edge plus an ATR
//! buffer, target at the nearest opposing zone edge or an ATR extension
//! when no opposing structure exists. Requested levels are recorded before
//! broker min/max stop-distance clamping so clamp impact stays measurable.
//! The risk/reward bar is re-checked on the final levels and never lowered
//! to salvage a trade.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{CoreConfig, ExitSource};
use crate::domain::{Bar, ExitMethod, Side, SymbolSpec};
use crate::indicators::{normalize, IndicatorValues};
use crate::manager::StructureManager;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExitError {
    /// No configured source produced a usable geometry. The candidate is
    /// dropped, never defaulted to an arbitrary price.
    #[error("no exit source produced a valid geometry")]
    NoExitSource,
    /// Post-clamp reward/risk fell below the session minimum.
    #[error("computed_rr {computed_rr:.2} < min_rr {min_rr:.2} (clamped: {clamped})")]
    RiskRewardTooLow { computed_rr: f64, min_rr: f64, clamped: bool },
}

/// One candidate's exit levels, before and after broker constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPlan {
    pub sl_requested: f64,
    pub tp_requested: f64,
    pub sl_final: f64,
    pub tp_final: f64,
    /// Final levels differ from requested.
    pub clamped: bool,
    pub exit_method: ExitMethod,
    /// Reward/risk from the final levels.
    pub computed_rr: f64,
}

#[derive(Debug, Clone)]
pub struct ExitPlanner {
    priority: Vec<ExitSource>,
    sl_atr_buffer: f64,
    fallback_sl_atr: f64,
    tp_atr_extension: f64,
    atr_key: String,
}

impl ExitPlanner {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            priority: config.exits.priority.clone(),
            sl_atr_buffer: config.exits.sl_atr_buffer,
            fallback_sl_atr: config.exits.fallback_sl_atr,
            tp_atr_extension: config.exits.tp_atr_extension,
            atr_key: config.indicators.atr_key(),
        }
    }

    /// Plan exits for a gated candidate entering at the current close.
    /// `min_rr` is the already-resolved session minimum.
    #[allow(clippy::too_many_arguments)]
    pub fn plan(
        &self,
        bars: &[Bar],
        bar_index: usize,
        side: Side,
        manager: &StructureManager,
        indicators: &IndicatorValues,
        spec: &SymbolSpec,
        min_rr: f64,
    ) -> Result<ExitPlan, ExitError> {
        let bar = &bars[bar_index];
        let entry = bar.close;
        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
        if !normalize::atr_usable(atr) {
            info!(symbol = %bar.symbol, bar_index, "exit planning skipped, ATR unusable");
            return Err(ExitError::NoExitSource);
        }

        let mut chosen = None;
        for source in &self.priority {
            if let Some(geometry) = self.geometry(*source, entry, side, manager, atr) {
                chosen = Some(geometry);
                break;
            }
        }
        let Some((sl_requested, tp_requested, exit_method)) = chosen else {
            info!(symbol = %bar.symbol, bar_index, "no exit source available");
            return Err(ExitError::NoExitSource);
        };

        // Broker min/max stop distance, applied to distances so both sides
        // share one code path.
        let min_dist = spec.to_price(spec.stops_level_points);
        let mut sl_dist = (entry - sl_requested).abs();
        let mut tp_dist = (tp_requested - entry).abs();
        let mut clamped = false;
        if sl_dist < min_dist {
            sl_dist = min_dist;
            clamped = true;
        }
        if let Some(max_points) = spec.max_stop_points {
            let max_dist = spec.to_price(max_points);
            if sl_dist > max_dist {
                sl_dist = max_dist;
                clamped = true;
            }
        }
        if tp_dist < min_dist {
            tp_dist = min_dist;
            clamped = true;
        }

        let (sl_final, tp_final) = match side {
            Side::Bullish => (entry - sl_dist, entry + tp_dist),
            Side::Bearish => (entry + sl_dist, entry - tp_dist),
        };
        let computed_rr = tp_dist / sl_dist;
        debug!(
            symbol = %bar.symbol,
            bar_index,
            method = %exit_method,
            sl_requested,
            tp_requested,
            sl_final,
            tp_final,
            clamped,
            computed_rr,
            "exit plan"
        );

        if computed_rr < min_rr {
            return Err(ExitError::RiskRewardTooLow { computed_rr, min_rr, clamped });
        }
        Ok(ExitPlan {
            sl_requested,
            tp_requested,
            sl_final,
            tp_final,
            clamped,
            exit_method,
            computed_rr,
        })
    }

    /// Requested (sl, tp, method) for one source, or None when the source
    /// has no structure on the candidate side of the entry.
    fn geometry(
        &self,
        source: ExitSource,
        entry: f64,
        side: Side,
        manager: &StructureManager,
        atr: f64,
    ) -> Option<(f64, f64, ExitMethod)> {
        let sl = match source.structure_kind() {
            Some(kind) => {
                let zone = manager.of_kind(kind).find(|s| s.side == side)?;
                let sl = match side {
                    Side::Bullish => zone.zone_low - self.sl_atr_buffer * atr,
                    Side::Bearish => zone.zone_high + self.sl_atr_buffer * atr,
                };
                // A zone on the wrong side of the entry gives no stop.
                let valid = match side {
                    Side::Bullish => sl < entry,
                    Side::Bearish => sl > entry,
                };
                if !valid {
                    return None;
                }
                sl
            }
            None => match side {
                Side::Bullish => entry - self.fallback_sl_atr * atr,
                Side::Bearish => entry + self.fallback_sl_atr * atr,
            },
        };

        let tp = self.target(entry, side, manager, atr);
        let method = match source.structure_kind() {
            Some(kind) => ExitMethod::Structure(kind),
            None => ExitMethod::AtrFallback,
        };
        Some((sl, tp, method))
    }

    /// Nearest opposing zone edge beyond the entry, else an ATR extension.
    fn target(&self, entry: f64, side: Side, manager: &StructureManager, atr: f64) -> f64 {
        let mut nearest: Option<f64> = None;
        for s in manager.snapshot() {
            if s.side == side {
                continue;
            }
            let edge = match side {
                Side::Bullish if s.zone_low > entry => s.zone_low,
                Side::Bearish if s.zone_high < entry => s.zone_high,
                _ => continue,
            };
            let closer = match (side, nearest) {
                (_, None) => true,
                (Side::Bullish, Some(best)) => edge < best,
                (Side::Bearish, Some(best)) => edge > best,
            };
            if closer {
                nearest = Some(edge);
            }
        }
        nearest.unwrap_or(match side {
            Side::Bullish => entry + self.tp_atr_extension * atr,
            Side::Bearish => entry - self.tp_atr_extension * atr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorState;
    use crate::domain::{InstrumentClass, Structure, StructureKind, Timeframe};
    use crate::indicators::make_ohlc_bars;

    const EPS: f64 = 1e-9;

    fn planner() -> ExitPlanner {
        ExitPlanner::new(&CoreConfig::default())
    }

    fn planner_with_priority(priority: &[ExitSource]) -> ExitPlanner {
        let mut config = CoreConfig::default();
        config.exits.priority = priority.to_vec();
        ExitPlanner::new(&config)
    }

    fn structure(kind: StructureKind, side: Side, low: f64, high: f64, quality: f64) -> Structure {
        Structure::new("TEST", Timeframe::H1, kind, side, 1, low, high, quality)
    }

    fn manager_with(structures: Vec<Structure>) -> StructureManager {
        let mut states: Vec<(StructureKind, DetectorState)> = Vec::new();
        for s in structures {
            match states.iter_mut().find(|(k, _)| *k == s.kind) {
                Some((_, state)) => state.active.push(s),
                None => {
                    let kind = s.kind;
                    let mut state = DetectorState::new();
                    state.active.push(s);
                    states.push((kind, state));
                }
            }
        }
        let refs: Vec<(StructureKind, &DetectorState)> =
            states.iter().map(|(k, s)| (*k, s)).collect();
        let mut manager = StructureManager::new(StructureKind::ALL.to_vec());
        manager.rebuild(&refs);
        manager
    }

    /// One bar closing at 101.0 with a flat 1.0 ATR.
    fn inputs() -> (Vec<Bar>, IndicatorValues) {
        let bars = make_ohlc_bars(&[(100.8, 101.1, 100.7, 101.0)]);
        let mut ind = IndicatorValues::new();
        ind.insert("atr_14", vec![1.0]);
        (bars, ind)
    }

    fn loose_spec() -> SymbolSpec {
        SymbolSpec {
            symbol: "TEST".into(),
            class: InstrumentClass::Indices,
            point: 0.01,
            stops_level_points: 0.0,
            spread_points: 0.0,
            max_stop_points: None,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            tick_value: 1.0,
            margin_per_lot: 100.0,
        }
    }

    fn forex_spec(stops_level_points: f64, max_stop_points: Option<f64>) -> SymbolSpec {
        SymbolSpec {
            symbol: "EURUSD".into(),
            class: InstrumentClass::Forex,
            point: 0.0001,
            stops_level_points,
            spread_points: 2.0,
            max_stop_points,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            tick_value: 10.0,
            margin_per_lot: 3000.0,
        }
    }

    fn forex_inputs() -> (Vec<Bar>, IndicatorValues) {
        let bars = make_ohlc_bars(&[(1.0995, 1.1005, 1.0990, 1.1000)]);
        let mut ind = IndicatorValues::new();
        ind.insert("atr_14", vec![0.001]);
        (bars, ind)
    }

    #[test]
    fn zone_stop_with_opposing_target() {
        let (bars, ind) = inputs();
        let manager = manager_with(vec![
            structure(StructureKind::Displacement, Side::Bullish, 100.0, 100.6, 0.8),
            structure(StructureKind::Displacement, Side::Bearish, 104.0, 104.5, 0.6),
        ]);
        let plan = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &loose_spec(), 1.5)
            .unwrap();

        // Stop 0.5 ATR under the zone low, target at the opposing zone edge.
        assert!((plan.sl_requested - 99.5).abs() < EPS);
        assert!((plan.tp_requested - 104.0).abs() < EPS);
        assert_eq!(plan.sl_final, plan.sl_requested);
        assert_eq!(plan.tp_final, plan.tp_requested);
        assert!(!plan.clamped);
        assert_eq!(plan.exit_method, ExitMethod::Structure(StructureKind::Displacement));
        // 3.0 reward over 1.5 risk.
        assert!((plan.computed_rr - 2.0).abs() < EPS);
    }

    #[test]
    fn missing_opposing_structure_extends_by_atr() {
        let (bars, ind) = inputs();
        let manager = manager_with(vec![structure(
            StructureKind::Displacement,
            Side::Bullish,
            100.0,
            100.6,
            0.8,
        )]);
        let plan = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &loose_spec(), 1.0)
            .unwrap();
        assert!((plan.tp_requested - 103.0).abs() < EPS);
        assert!((plan.computed_rr - 2.0 / 1.5).abs() < EPS);
    }

    #[test]
    fn priority_order_picks_the_first_valid_source() {
        let (bars, ind) = inputs();
        let manager = manager_with(vec![
            structure(StructureKind::Displacement, Side::Bullish, 100.0, 100.6, 0.8),
            structure(StructureKind::Imbalance, Side::Bullish, 100.3, 100.5, 0.5),
        ]);
        let plan = planner_with_priority(&[ExitSource::Imbalance, ExitSource::Displacement])
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &loose_spec(), 1.0)
            .unwrap();
        assert_eq!(plan.exit_method, ExitMethod::Structure(StructureKind::Imbalance));
        assert!((plan.sl_requested - 99.8).abs() < EPS);
    }

    #[test]
    fn wrong_side_zone_falls_through_to_atr() {
        let (bars, ind) = inputs();
        // Only a bearish zone overhead: no bullish displacement stop, but
        // it still serves as the opposing target for the fallback.
        let manager = manager_with(vec![structure(
            StructureKind::Displacement,
            Side::Bearish,
            103.0,
            103.5,
            0.7,
        )]);
        let plan = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &loose_spec(), 1.5)
            .unwrap();
        assert_eq!(plan.exit_method, ExitMethod::AtrFallback);
        assert!((plan.sl_requested - 100.0).abs() < EPS);
        assert!((plan.tp_requested - 103.0).abs() < EPS);
        assert!((plan.computed_rr - 2.0).abs() < EPS);
    }

    #[test]
    fn no_valid_source_is_an_explicit_error() {
        let (bars, ind) = inputs();
        let manager = manager_with(vec![]);
        let err = planner_with_priority(&[ExitSource::Displacement])
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &loose_spec(), 1.0)
            .unwrap_err();
        assert_eq!(err, ExitError::NoExitSource);
    }

    #[test]
    fn unusable_atr_yields_no_source() {
        let (bars, mut ind) = inputs();
        ind.insert("atr_14", vec![f64::NAN]);
        let manager = manager_with(vec![structure(
            StructureKind::Displacement,
            Side::Bullish,
            100.0,
            100.6,
            0.8,
        )]);
        let err = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &loose_spec(), 1.0)
            .unwrap_err();
        assert_eq!(err, ExitError::NoExitSource);
    }

    #[test]
    fn broker_minimum_widens_the_stop() {
        let (bars, ind) = forex_inputs();
        let manager = manager_with(vec![
            structure(StructureKind::Displacement, Side::Bullish, 1.0985, 1.0990, 0.8),
            structure(StructureKind::Displacement, Side::Bearish, 1.1200, 1.1210, 0.6),
        ]);
        // Requested stop 20 points; broker minimum 50.
        let plan = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &forex_spec(50.0, None), 1.5)
            .unwrap();
        assert!((plan.sl_requested - 1.0980).abs() < EPS);
        assert!((plan.sl_final - 1.0950).abs() < EPS);
        assert!(plan.clamped);
        // 200 points reward over the widened 50-point stop.
        assert!((plan.computed_rr - 4.0).abs() < EPS);
    }

    #[test]
    fn broker_maximum_tightens_the_stop() {
        let (bars, ind) = forex_inputs();
        let manager = manager_with(vec![
            structure(StructureKind::Displacement, Side::Bullish, 1.0985, 1.0990, 0.8),
            structure(StructureKind::Displacement, Side::Bearish, 1.1040, 1.1050, 0.6),
        ]);
        let plan = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &forex_spec(0.0, Some(10.0)), 1.5)
            .unwrap();
        assert!((plan.sl_final - 1.0990).abs() < EPS);
        assert!(plan.clamped);
        assert!((plan.computed_rr - 4.0).abs() < EPS);
    }

    #[test]
    fn post_clamp_rr_below_minimum_rejects_with_clamp_flag() {
        let (bars, ind) = forex_inputs();
        let manager = manager_with(vec![
            structure(StructureKind::Displacement, Side::Bullish, 1.0995, 1.0998, 0.8),
            structure(StructureKind::Displacement, Side::Bearish, 1.1020, 1.1030, 0.6),
        ]);
        // Requested 10-point stop and 20-point target: RR 2.0 pre-clamp.
        // Broker minimum 16 points drops RR to 1.25, under the 1.5 bar.
        let err = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &forex_spec(16.0, None), 1.5)
            .unwrap_err();
        match err {
            ExitError::RiskRewardTooLow { computed_rr, min_rr, clamped } => {
                assert!((computed_rr - 1.25).abs() < EPS);
                assert!((min_rr - 1.5).abs() < EPS);
                assert!(clamped);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bearish_mirrors_the_geometry() {
        let (bars, ind) = inputs();
        let manager = manager_with(vec![
            structure(StructureKind::Displacement, Side::Bearish, 101.5, 102.0, 0.8),
            structure(StructureKind::Displacement, Side::Bullish, 98.5, 99.0, 0.6),
        ]);
        let plan = planner()
            .plan(&bars, 0, Side::Bearish, &manager, &ind, &loose_spec(), 1.0)
            .unwrap();
        assert!((plan.sl_requested - 102.5).abs() < EPS);
        assert!((plan.tp_requested - 99.0).abs() < EPS);
        assert!((plan.computed_rr - 2.0 / 1.5).abs() < EPS);
    }

    #[test]
    fn nearest_opposing_zone_wins() {
        let (bars, ind) = inputs();
        let manager = manager_with(vec![
            structure(StructureKind::Displacement, Side::Bullish, 100.0, 100.6, 0.8),
            structure(StructureKind::Imbalance, Side::Bearish, 105.0, 105.5, 0.9),
            structure(StructureKind::LiquiditySweep, Side::Bearish, 103.2, 103.8, 0.4),
        ]);
        let plan = planner()
            .plan(&bars, 0, Side::Bullish, &manager, &ind, &loose_spec(), 1.0)
            .unwrap();
        assert!((plan.tp_requested - 103.2).abs() < EPS);
    }
}
