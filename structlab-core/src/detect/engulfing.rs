//! Engulfing candle detector.
//!
//! Classic two-candle reversal: the current body strictly covers the
//! prior body and the candles have opposite color. Admission needs a
//! body of at least `min_body_atr x ATR` and a body-to-range dominance
//! of `min_body_to_range`, so wicky indecision bars never qualify.
//!
//! The zone is the engulfed prior body (the basing candle), not the
//! trigger candle itself, so price sits outside the zone at creation.
//!
//! Context gates are optional and only RAISE quality, never gate
//! admission: trend alignment against a configured EMA, a live
//! structural break on the same side, and proximity to a live zone on
//! the same side each add a fixed bonus.

use tracing::warn;

use crate::domain::{Bar, Side, Structure, StructureKind};
use crate::indicators::{normalize, IndicatorValues};

use super::lifecycle;
use super::{DetectorPass, DetectorState};

/// Quality bonus per satisfied context gate.
const CONTEXT_BONUS: f64 = 0.1;
/// Base quality headroom left for context bonuses.
const BASE_SCALE: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct EngulfingDetector {
    pub min_body_atr: f64,
    pub min_body_to_range: f64,
    /// EMA key for the trend-alignment bonus; None disables the gate.
    pub trend_ema_key: Option<String>,
    /// Same-side structural break in the snapshot raises quality.
    pub use_break_confirmation: bool,
    /// Live same-side zone within this many ATRs raises quality; None
    /// disables the gate.
    pub zone_proximity_atr: Option<f64>,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
    atr_key: String,
}

impl EngulfingDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        min_body_atr: f64,
        min_body_to_range: f64,
        trend_ema_key: Option<String>,
        use_break_confirmation: bool,
        zone_proximity_atr: Option<f64>,
        max_age_bars: usize,
        max_concurrent_per_side: usize,
        atr_key: impl Into<String>,
    ) -> Self {
        assert!(min_body_atr >= 0.0, "min_body_atr must be >= 0");
        assert!(
            (0.0..=1.0).contains(&min_body_to_range),
            "min_body_to_range must be within 0..=1"
        );
        if let Some(p) = zone_proximity_atr {
            assert!(p > 0.0, "zone_proximity_atr must be > 0");
        }
        assert!(max_age_bars >= 1, "max_age_bars must be >= 1");
        assert!(max_concurrent_per_side >= 1, "max_concurrent_per_side must be >= 1");
        Self {
            min_body_atr,
            min_body_to_range,
            trend_ema_key,
            use_break_confirmation,
            zone_proximity_atr,
            max_age_bars,
            max_concurrent_per_side,
            atr_key: atr_key.into(),
        }
    }

    pub fn warmup_bars(&self) -> usize {
        1
    }

    pub fn detect(
        &self,
        bars: &[Bar],
        bar_index: usize,
        indicators: &IndicatorValues,
        prior_zones: &[Structure],
        state: &mut DetectorState,
    ) -> DetectorPass {
        let mut pass = DetectorPass::default();
        lifecycle::age_and_expire(state, self.max_age_bars, bar_index, &mut pass.updates);

        let bar = &bars[bar_index];
        if let Err(err) = bar.validate() {
            warn!(detector = "engulfing", bar_index, %err, "skipping malformed bar");
            lifecycle::prune_terminal(state);
            return pass;
        }

        for s in state.active.iter_mut() {
            lifecycle::mitigate_by_penetration(s, bar, bar_index, &mut pass.updates);
        }

        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
        if normalize::atr_usable(atr) && bar_index >= self.warmup_bars() {
            if let Some(candidate) =
                self.candidate(bars, bar_index, indicators, atr, prior_zones)
            {
                lifecycle::admit(
                    state,
                    candidate,
                    self.max_concurrent_per_side,
                    bar_index,
                    &mut pass,
                );
            }
        }

        lifecycle::prune_terminal(state);
        pass
    }

    fn candidate(
        &self,
        bars: &[Bar],
        bar_index: usize,
        indicators: &IndicatorValues,
        atr: f64,
        prior_zones: &[Structure],
    ) -> Option<Structure> {
        let prior = &bars[bar_index - 1];
        let bar = &bars[bar_index];
        if prior.validate().is_err() {
            return None;
        }

        // Opposite color, current body strictly covering the prior body.
        let side = if bar.close > bar.open && prior.close < prior.open {
            (bar.close > prior.open && bar.open < prior.close).then_some(Side::Bullish)?
        } else if bar.close < bar.open && prior.close > prior.open {
            (bar.close < prior.open && bar.open > prior.close).then_some(Side::Bearish)?
        } else {
            return None;
        };

        let body = (bar.close - bar.open).abs();
        if body < normalize::atr_threshold(self.min_body_atr, atr) {
            return None;
        }
        let range = bar.high - bar.low;
        let body_to_range = if range > 0.0 { body / range } else { 0.0 };
        if body_to_range < self.min_body_to_range {
            return None;
        }

        let body_score =
            normalize::ratio_score(normalize::in_atr_units(body, atr), self.min_body_atr);
        let span = 1.0 - self.min_body_to_range;
        let dominance = if span > 0.0 {
            normalize::clamp01((body_to_range - self.min_body_to_range) / span)
        } else {
            1.0
        };
        let mut quality = (0.6 * body_score + 0.4 * dominance) * BASE_SCALE;

        if self.trend_aligned(bar, bar_index, indicators, side) {
            quality += CONTEXT_BONUS;
        }
        if self.break_confirmed(prior_zones, side) {
            quality += CONTEXT_BONUS;
        }
        if self.near_zone(bar, atr, prior_zones, side) {
            quality += CONTEXT_BONUS;
        }
        let quality = normalize::clamp01(quality);

        let zone_low = prior.open.min(prior.close);
        let zone_high = prior.open.max(prior.close);
        Some(Structure::new(
            &bar.symbol,
            bar.timeframe,
            StructureKind::Engulfing,
            side,
            bar_index,
            zone_low,
            zone_high,
            quality,
        ))
    }

    fn trend_aligned(
        &self,
        bar: &Bar,
        bar_index: usize,
        indicators: &IndicatorValues,
        side: Side,
    ) -> bool {
        let Some(key) = &self.trend_ema_key else {
            return false;
        };
        match indicators.get(key, bar_index) {
            Some(ema) if ema.is_finite() => match side {
                Side::Bullish => bar.close > ema,
                Side::Bearish => bar.close < ema,
            },
            _ => false,
        }
    }

    fn break_confirmed(&self, prior_zones: &[Structure], side: Side) -> bool {
        self.use_break_confirmation
            && prior_zones.iter().any(|z| {
                z.kind == StructureKind::StructuralBreak
                    && z.side == side
                    && !z.state.is_terminal()
            })
    }

    fn near_zone(&self, bar: &Bar, atr: f64, prior_zones: &[Structure], side: Side) -> bool {
        let Some(max_atr) = self.zone_proximity_atr else {
            return false;
        };
        let limit = normalize::atr_threshold(max_atr, atr);
        prior_zones.iter().any(|z| {
            z.kind != StructureKind::Engulfing
                && z.side == side
                && !z.state.is_terminal()
                && z.distance_from(bar.close) <= limit
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LifecycleState, Timeframe};
    use crate::indicators::make_ohlc_bars;

    fn detector() -> EngulfingDetector {
        EngulfingDetector::new(0.5, 0.6, None, false, None, 30, 2, "atr_14")
    }

    fn flat_atr(n: usize, atr: f64) -> IndicatorValues {
        let mut values = IndicatorValues::new();
        values.insert("atr_14", vec![atr; n]);
        values
    }

    fn base_quality() -> f64 {
        // body 0.7 over the 0.5 floor, body/range 0.875 over the 0.6 floor.
        let body_score = 0.7 / 1.0;
        let dominance = (0.875 - 0.6) / 0.4;
        (0.6 * body_score + 0.4 * dominance) * BASE_SCALE
    }

    /// Bearish bar then a bullish bar strictly covering its body.
    fn bullish_engulf_bars() -> Vec<crate::domain::Bar> {
        make_ohlc_bars(&[
            (100.8, 100.9, 100.3, 100.4),
            (100.3, 101.05, 100.25, 101.0),
        ])
    }

    #[test]
    fn bullish_engulfing_creates_structure() {
        let det = detector();
        let bars = bullish_engulf_bars();
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert_eq!(pass.created.len(), 1);
        let s = &pass.created[0];
        assert_eq!(s.kind, StructureKind::Engulfing);
        assert_eq!(s.side, Side::Bullish);
        assert_eq!(s.anchor_index, 1);
        // Zone is the engulfed prior body.
        assert_eq!(s.zone_low, 100.4);
        assert_eq!(s.zone_high, 100.8);
        assert!((s.quality - base_quality()).abs() < 1e-12);
        assert_eq!(s.state, LifecycleState::Unfilled);
    }

    #[test]
    fn bearish_engulfing_is_symmetric() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.4, 100.9, 100.35, 100.8),
            (100.9, 100.95, 100.15, 100.2),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert_eq!(pass.created.len(), 1);
        let s = &pass.created[0];
        assert_eq!(s.side, Side::Bearish);
        assert_eq!(s.zone_low, 100.4);
        assert_eq!(s.zone_high, 100.8);
        assert!((s.quality - base_quality()).abs() < 1e-12);
    }

    #[test]
    fn small_body_does_not_fire() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.6, 100.7, 100.35, 100.45),
            // Engulfs, but body 0.4 sits under the 0.5 ATR floor.
            (100.3, 100.8, 100.25, 100.7),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();
        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert!(pass.created.is_empty());
    }

    #[test]
    fn wicky_candle_fails_dominance() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.8, 100.9, 100.3, 100.4),
            // Body 0.7 but range 1.4: body/range 0.5 < 0.6.
            (100.3, 101.35, 99.95, 101.0),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();
        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert!(pass.created.is_empty());
    }

    #[test]
    fn same_color_prior_does_not_fire() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.3, 100.9, 100.25, 100.8),
            (100.2, 101.1, 100.15, 101.0),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();
        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert!(pass.created.is_empty());
    }

    #[test]
    fn partial_cover_does_not_fire() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.8, 100.9, 100.3, 100.4),
            // Opens at 100.45, above the prior close: no strict engulf.
            (100.45, 101.2, 100.4, 101.15),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();
        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert!(pass.created.is_empty());
    }

    #[test]
    fn trend_alignment_raises_quality() {
        let det =
            EngulfingDetector::new(0.5, 0.6, Some("ema_50".into()), false, None, 30, 2, "atr_14");
        let bars = bullish_engulf_bars();
        let mut indicators = flat_atr(bars.len(), 1.0);
        indicators.insert("ema_50", vec![100.0; bars.len()]);
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert!((pass.created[0].quality - (base_quality() + CONTEXT_BONUS)).abs() < 1e-12);
    }

    #[test]
    fn counter_trend_gets_no_bonus() {
        let det =
            EngulfingDetector::new(0.5, 0.6, Some("ema_50".into()), false, None, 30, 2, "atr_14");
        let bars = bullish_engulf_bars();
        let mut indicators = flat_atr(bars.len(), 1.0);
        // EMA sits above the close: bullish candidate is counter-trend.
        indicators.insert("ema_50", vec![102.0; bars.len()]);
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &[], &mut state);
        assert!((pass.created[0].quality - base_quality()).abs() < 1e-12);
    }

    #[test]
    fn break_confirmation_raises_quality() {
        let det = EngulfingDetector::new(0.5, 0.6, None, true, None, 30, 2, "atr_14");
        let bars = bullish_engulf_bars();
        let indicators = flat_atr(bars.len(), 1.0);
        let zones = [Structure::new(
            "EURUSD",
            Timeframe::H1,
            StructureKind::StructuralBreak,
            Side::Bullish,
            0,
            100.0,
            100.2,
            0.6,
        )];
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &zones, &mut state);
        assert!((pass.created[0].quality - (base_quality() + CONTEXT_BONUS)).abs() < 1e-12);
    }

    #[test]
    fn opposite_side_break_gets_no_bonus() {
        let det = EngulfingDetector::new(0.5, 0.6, None, true, None, 30, 2, "atr_14");
        let bars = bullish_engulf_bars();
        let indicators = flat_atr(bars.len(), 1.0);
        let zones = [Structure::new(
            "EURUSD",
            Timeframe::H1,
            StructureKind::StructuralBreak,
            Side::Bearish,
            0,
            100.0,
            100.2,
            0.6,
        )];
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &zones, &mut state);
        assert!((pass.created[0].quality - base_quality()).abs() < 1e-12);
    }

    #[test]
    fn zone_proximity_raises_quality() {
        let det = EngulfingDetector::new(0.5, 0.6, None, false, Some(1.0), 30, 2, "atr_14");
        let bars = bullish_engulf_bars();
        let indicators = flat_atr(bars.len(), 1.0);
        // Close 101.0 is 0.5 from the zone top, inside the 1 ATR limit.
        let zones = [Structure::new(
            "EURUSD",
            Timeframe::H1,
            StructureKind::Displacement,
            Side::Bullish,
            0,
            100.0,
            100.5,
            0.8,
        )];
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &zones, &mut state);
        assert!((pass.created[0].quality - (base_quality() + CONTEXT_BONUS)).abs() < 1e-12);
    }

    #[test]
    fn distant_zone_gets_no_bonus() {
        let det = EngulfingDetector::new(0.5, 0.6, None, false, Some(1.0), 30, 2, "atr_14");
        let bars = bullish_engulf_bars();
        let indicators = flat_atr(bars.len(), 1.0);
        let zones = [Structure::new(
            "EURUSD",
            Timeframe::H1,
            StructureKind::Displacement,
            Side::Bullish,
            0,
            97.0,
            97.5,
            0.8,
        )];
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &zones, &mut state);
        assert!((pass.created[0].quality - base_quality()).abs() < 1e-12);
    }

    #[test]
    fn bonuses_stack() {
        let det = EngulfingDetector::new(
            0.5,
            0.6,
            Some("ema_50".into()),
            true,
            Some(1.0),
            30,
            2,
            "atr_14",
        );
        let bars = bullish_engulf_bars();
        let mut indicators = flat_atr(bars.len(), 1.0);
        indicators.insert("ema_50", vec![100.0; bars.len()]);
        let zones = [
            Structure::new(
                "EURUSD",
                Timeframe::H1,
                StructureKind::StructuralBreak,
                Side::Bullish,
                0,
                100.0,
                100.2,
                0.6,
            ),
            Structure::new(
                "EURUSD",
                Timeframe::H1,
                StructureKind::Displacement,
                Side::Bullish,
                0,
                100.0,
                100.5,
                0.8,
            ),
        ];
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 1, &indicators, &zones, &mut state);
        let expected = base_quality() + 3.0 * CONTEXT_BONUS;
        assert!((pass.created[0].quality - expected).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "min_body_to_range must be within 0..=1")]
    fn out_of_range_dominance_panics() {
        EngulfingDetector::new(0.5, 1.5, None, false, None, 30, 2, "atr_14");
    }
}
