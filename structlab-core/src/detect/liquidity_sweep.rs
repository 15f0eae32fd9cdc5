//! Liquidity sweep (stop hunt) detector.
//!
//! Fires when price pushes past a rolling swing extreme by at least
//! `sweep_excess_atr x ATR` and closes back inside within
//! `reversal_window_bars`. The bar that makes the first close back inside
//! triggers the structure; the zone is the wick band between the swept
//! level and the excursion extreme. A sweep fires once: later closes on
//! the inside of an already-reversed level are ignored.
//!
//! Sweeping the highs is bearish (trapped longs above), sweeping the lows
//! bullish.

use tracing::warn;

use crate::domain::{Bar, Side, Structure, StructureKind};
use crate::indicators::swing::{rolling_high, rolling_low};
use crate::indicators::{normalize, IndicatorValues};

use super::lifecycle;
use super::{DetectorPass, DetectorState};

#[derive(Debug, Clone)]
pub struct LiquiditySweepDetector {
    pub sweep_excess_atr: f64,
    pub reversal_window_bars: usize,
    pub swing_lookback: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
    atr_key: String,
}

impl LiquiditySweepDetector {
    pub fn new(
        sweep_excess_atr: f64,
        reversal_window_bars: usize,
        swing_lookback: usize,
        max_age_bars: usize,
        max_concurrent_per_side: usize,
        atr_key: impl Into<String>,
    ) -> Self {
        assert!(sweep_excess_atr >= 0.0, "sweep_excess_atr must be >= 0");
        assert!(swing_lookback >= 1, "swing_lookback must be >= 1");
        assert!(max_age_bars >= 1, "max_age_bars must be >= 1");
        assert!(max_concurrent_per_side >= 1, "max_concurrent_per_side must be >= 1");
        Self {
            sweep_excess_atr,
            reversal_window_bars,
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
            warn!(detector = "liquidity_sweep", bar_index, %err, "skipping malformed bar");
            lifecycle::prune_terminal(state);
            return pass;
        }

        for s in state.active.iter_mut() {
            lifecycle::mitigate_by_penetration(s, bar, bar_index, &mut pass.updates);
        }

        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
        if normalize::atr_usable(atr) && bar_index >= self.warmup_bars() {
            for side in [Side::Bearish, Side::Bullish] {
                if let Some(candidate) = self.candidate(bars, bar_index, atr, side) {
                    lifecycle::admit(
                        state,
                        candidate,
                        self.max_concurrent_per_side,
                        bar_index,
                        &mut pass,
                    );
                }
            }
        }

        lifecycle::prune_terminal(state);
        pass
    }

    /// Look for the most recent sweep start `j` whose first close back
    /// inside is this bar. `j == bar_index` is the single-candle sweep
    /// (wick through the level, close rejected).
    fn candidate(
        &self,
        bars: &[Bar],
        bar_index: usize,
        atr: f64,
        side: Side,
    ) -> Option<Structure> {
        let thr = normalize::atr_threshold(self.sweep_excess_atr, atr);
        let close = bars[bar_index].close;
        let oldest = bar_index.saturating_sub(self.reversal_window_bars).max(self.swing_lookback);

        for j in (oldest..=bar_index).rev() {
            let (level, swept) = match side {
                Side::Bearish => {
                    let level = rolling_high(bars, j, self.swing_lookback)?;
                    let excess = bars[j].high - level;
                    (level, excess >= thr && bars[j].high > level)
                }
                Side::Bullish => {
                    let level = rolling_low(bars, j, self.swing_lookback)?;
                    let excess = level - bars[j].low;
                    (level, excess >= thr && bars[j].low < level)
                }
            };
            if !swept {
                continue;
            }
            let closed_back = match side {
                Side::Bearish => close < level,
                Side::Bullish => close > level,
            };
            if !closed_back {
                continue;
            }
            // Only the first close back inside fires. The range is empty
            // for the single-candle case.
            let between = bars.get(j + 1..bar_index).unwrap_or(&[]);
            let already_reversed = between.iter().any(|b| match side {
                Side::Bearish => b.close < level,
                Side::Bullish => b.close > level,
            });
            if already_reversed {
                continue;
            }

            let excursion = &bars[j..=bar_index];
            let (zone_low, zone_high, excess) = match side {
                Side::Bearish => {
                    let extreme = excursion.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                    (level, extreme, extreme - level)
                }
                Side::Bullish => {
                    let extreme = excursion.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                    (extreme, level, level - extreme)
                }
            };

            let excess_score = normalize::ratio_score(
                normalize::in_atr_units(excess, atr),
                self.sweep_excess_atr,
            );
            // Faster reversals score higher.
            let age = (bar_index - j) as f64;
            let speed_score = 1.0 - age / (self.reversal_window_bars as f64 + 1.0);
            let quality = 0.6 * excess_score + 0.4 * speed_score;

            let bar = &bars[bar_index];
            return Some(Structure::new(
                &bar.symbol,
                bar.timeframe,
                StructureKind::LiquiditySweep,
                side,
                j,
                zone_low,
                zone_high,
                quality,
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LifecycleState;
    use crate::indicators::make_ohlc_bars;

    fn detector() -> LiquiditySweepDetector {
        LiquiditySweepDetector::new(0.3, 3, 3, 30, 2, "atr_14")
    }

    fn flat_atr(n: usize, atr: f64) -> IndicatorValues {
        let mut values = IndicatorValues::new();
        values.insert("atr_14", vec![atr; n]);
        values
    }

    #[test]
    fn single_candle_sweep_fires_on_its_own_close() {
        let det = detector();
        // Quiet highs at 100.5, then a wick to 101.2 closing back at 100.2.
        let bars = make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.3, 101.2, 100.0, 100.2),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 3, &indicators, &mut state);
        assert_eq!(pass.created.len(), 1);
        let s = &pass.created[0];
        assert_eq!(s.kind, StructureKind::LiquiditySweep);
        assert_eq!(s.side, Side::Bearish);
        assert_eq!(s.anchor_index, 3);
        assert_eq!(s.zone_low, 100.5);
        assert_eq!(s.zone_high, 101.2);
        // Excess 0.7 saturates, same-bar reversal scores full speed.
        assert!((s.quality - 1.0).abs() < 1e-12);
    }

    #[test]
    fn delayed_reversal_fires_on_first_close_back_inside() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            // Sweep bar holds above the 100.5 level.
            (100.2, 101.2, 100.0, 100.8),
            // First close back below.
            (100.8, 101.0, 100.1, 100.3),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 3, &indicators, &mut state);
        assert!(pass.created.is_empty());

        let pass = det.detect(&bars, 4, &indicators, &mut state);
        assert_eq!(pass.created.len(), 1);
        let s = &pass.created[0];
        assert_eq!(s.anchor_index, 3);
        assert_eq!(s.zone_low, 100.5);
        // Excursion extreme spans the sweep bar and the reversal bar.
        assert_eq!(s.zone_high, 101.2);
        // Excess component saturates; speed 1 - 1/4.
        assert!((s.quality - (0.6 + 0.4 * 0.75)).abs() < 1e-12);
    }

    #[test]
    fn sweep_fires_only_once() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.2, 101.2, 100.0, 100.8),
            (100.8, 101.0, 100.1, 100.3),
            // Still below the level; must not re-fire.
            (100.3, 100.4, 100.0, 100.2),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        det.detect(&bars, 4, &indicators, &mut state);
        let pass = det.detect(&bars, 5, &indicators, &mut state);
        assert!(pass.created.is_empty());
    }

    #[test]
    fn no_fire_when_reversal_misses_the_window() {
        let det = LiquiditySweepDetector::new(0.3, 2, 3, 30, 2, "atr_14");
        let bars = make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.2, 101.2, 100.0, 100.8),
            (100.8, 101.0, 100.5, 100.9),
            (100.9, 101.0, 100.5, 100.7),
            // Reversal three bars after the sweep, window is two.
            (100.7, 100.8, 100.1, 100.2),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        for i in 3..bars.len() {
            let pass = det.detect(&bars, i, &indicators, &mut state);
            assert!(pass.created.is_empty(), "unexpected fire at bar {i}");
        }
    }

    #[test]
    fn small_excess_does_not_fire() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            // Wick only 0.2 beyond the level against a 0.3 ATR floor.
            (100.3, 100.7, 100.0, 100.2),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();
        let pass = det.detect(&bars, 3, &indicators, &mut state);
        assert!(pass.created.is_empty());
    }

    #[test]
    fn swept_lows_are_bullish() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (99.7, 100.0, 98.8, 99.8),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        let pass = det.detect(&bars, 3, &indicators, &mut state);
        assert_eq!(pass.created.len(), 1);
        let s = &pass.created[0];
        assert_eq!(s.side, Side::Bullish);
        assert_eq!(s.zone_low, 98.8);
        assert_eq!(s.zone_high, 99.5);
        assert_eq!(s.state, LifecycleState::Unfilled);
    }

    #[test]
    fn revisit_of_the_wick_band_mitigates() {
        let det = detector();
        let bars = make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.3, 101.2, 100.0, 100.2),
            // Pushes back up into the 100.5..101.2 band.
            (100.2, 100.9, 100.1, 100.6),
        ]);
        let indicators = flat_atr(bars.len(), 1.0);
        let mut state = DetectorState::new();

        det.detect(&bars, 3, &indicators, &mut state);
        let pass = det.detect(&bars, 4, &indicators, &mut state);
        let partials: Vec<_> =
            pass.updates.iter().filter(|u| u.to == LifecycleState::Partial).collect();
        assert_eq!(partials.len(), 1);
        // Depth 100.9 - 100.5 = 0.4 over height 0.7.
        assert!((state.active[0].fill_fraction - 0.4 / 0.7).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "swing_lookback must be >= 1")]
    fn zero_lookback_panics() {
        LiquiditySweepDetector::new(0.3, 3, 0, 30, 2, "atr_14");
    }
}
