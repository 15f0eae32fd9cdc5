//! Displacement zone (order block) detector.
//!
//! Flags a candle whose body exceeds `displacement_min_body_atr x ATR`
//! while its close breaks beyond the rolling swing extreme by at least
//! `excess_beyond_swing_atr x ATR`. The breaking candle's full range
//! becomes the zone. Retests must penetrate at least `mid_band_atr x ATR`
//! into the zone to count as mitigation; shallower wick taps are ignored.

use tracing::warn;

use crate::domain::{Bar, Side, Structure, StructureKind};
use crate::indicators::swing::{rolling_high, rolling_low};
use crate::indicators::{normalize, IndicatorValues};

use super::lifecycle;
use super::{DetectorPass, DetectorState};

#[derive(Debug, Clone)]
pub struct DisplacementDetector {
    pub displacement_min_body_atr: f64,
    pub excess_beyond_swing_atr: f64,
    pub mid_band_atr: f64,
    pub swing_lookback: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
    atr_key: String,
}

impl DisplacementDetector {
    pub fn new(
        displacement_min_body_atr: f64,
        excess_beyond_swing_atr: f64,
        mid_band_atr: f64,
        swing_lookback: usize,
        max_age_bars: usize,
        max_concurrent_per_side: usize,
        atr_key: impl Into<String>,
    ) -> Self {
        assert!(displacement_min_body_atr > 0.0, "displacement_min_body_atr must be > 0");
        assert!(excess_beyond_swing_atr >= 0.0, "excess_beyond_swing_atr must be >= 0");
        assert!(mid_band_atr >= 0.0, "mid_band_atr must be >= 0");
        assert!(swing_lookback >= 1, "swing_lookback must be >= 1");
        assert!(max_age_bars >= 1, "max_age_bars must be >= 1");
        assert!(max_concurrent_per_side >= 1, "max_concurrent_per_side must be >= 1");
        Self {
            displacement_min_body_atr,
            excess_beyond_swing_atr,
            mid_band_atr,
            swing_lookback,
            max_age_bars,
            max_concurrent_per_side,
            atr_key: atr_key.into(),
        }
    }

    pub fn warmup_bars(&self) -> usize {
        self.swing_lookback
    }

    pub fn detect(
        &self,
        bars: &[Bar],
        bar_index: usize,
        indicators: &IndicatorValues,
        state: &mut DetectorState,
    ) -> DetectorPass {
        let mut pass = DetectorPass::default();
        lifecycle::age_and_expire(state, self.max_age_bars, bar_index, &mut pass.updates);

        let bar = &bars[bar_index];
        if let Err(err) = bar.validate() {
            warn!(detector = "displacement", bar_index, %err, "skipping malformed bar");
            lifecycle::prune_terminal(state);
            return pass;
        }

        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
        self.scan_mitigation(bar, bar_index, atr, state, &mut pass);

        if normalize::atr_usable(atr) && bar_index >= self.warmup_bars() {
            if let Some(candidate) = self.candidate(bars, bar_index, atr) {
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

    /// Retest scan. A close through the far edge always fills; anything
    /// shallower must reach the mid-band depth before it counts.
    fn scan_mitigation(
        &self,
        bar: &Bar,
        bar_index: usize,
        atr: f64,
        state: &mut DetectorState,
        pass: &mut DetectorPass,
    ) {
        let mid_band = normalize::atr_threshold(self.mid_band_atr, atr);
        for s in state.active.iter_mut() {
            if s.state.is_terminal() {
                continue;
            }
            if lifecycle::closed_through(s, bar) {
                lifecycle::mitigate_by_penetration(s, bar, bar_index, &mut pass.updates);
                continue;
            }
            if !normalize::atr_usable(atr) {
                continue;
            }
            if lifecycle::penetration_depth(s, bar) >= mid_band {
                lifecycle::mitigate_by_penetration(s, bar, bar_index, &mut pass.updates);
            }
        }
    }

    fn candidate(&self, bars: &[Bar], bar_index: usize, atr: f64) -> Option<Structure> {
        let bar = &bars[bar_index];
        let body = bar.body();
        if body < normalize::atr_threshold(self.displacement_min_body_atr, atr) {
            return None;
        }

        let min_excess = normalize::atr_threshold(self.excess_beyond_swing_atr, atr);
        let (side, excess) = if bar.is_bullish() {
            let swing_high = rolling_high(bars, bar_index, self.swing_lookback)?;
            let excess = bar.close - swing_high;
            if excess <= 0.0 || excess < min_excess {
                return None;
            }
            (Side::Bullish, excess)
        } else if bar.is_bearish() {
            let swing_low = rolling_low(bars, bar_index, self.swing_lookback)?;
            let excess = swing_low - bar.close;
            if excess <= 0.0 || excess < min_excess {
                return None;
            }
            (Side::Bearish, excess)
        } else {
            return None;
        };

        let body_score = normalize::ratio_score(
            normalize::in_atr_units(body, atr),
            self.displacement_min_body_atr,
        );
        let excess_score = normalize::ratio_score(
            normalize::in_atr_units(excess, atr),
            self.excess_beyond_swing_atr,
        );
        let quality = 0.6 * body_score + 0.4 * excess_score;

        Some(Structure::new(
            &bar.symbol,
            bar.timeframe,
            StructureKind::Displacement,
            side,
            bar_index,
            bar.low,
            bar.high,
            quality,
        ))
    }
}
