//! Structural-break (BOS) detector.
//!
//! A confirmed pivot high or low over `pivot_window` is broken when a
//! later close clears it by `min_break_strength x ATR`. The broken pivot
//! candle's range becomes the zone: a broken high flips to demand below
//! price, a broken low to supply above it. Re-triggers inside
//! `debounce_bars` are suppressed, and a pivot is consumed by its first
//! break: later closes beyond the same level never seed a second
//! structure, so one pivot maps to at most one id per replay.

use tracing::warn;

use crate::domain::{Bar, Side, Structure, StructureKind};
use crate::indicators::swing::{confirmed_pivot_high, confirmed_pivot_low};
use crate::indicators::{normalize, IndicatorValues};

use super::lifecycle;
use super::{DetectorPass, DetectorState};

#[derive(Debug, Clone)]
pub struct StructuralBreakDetector {
    pub pivot_window: usize,
    pub min_break_strength: f64,
    pub debounce_bars: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
    atr_key: String,
}

impl StructuralBreakDetector {
    pub fn new(
        pivot_window: usize,
        min_break_strength: f64,
        debounce_bars: usize,
        max_age_bars: usize,
        max_concurrent_per_side: usize,
        atr_key: impl Into<String>,
    ) -> Self {
        assert!(pivot_window >= 1, "pivot_window must be >= 1");
        assert!(min_break_strength >= 0.0, "min_break_strength must be >= 0");
        assert!(max_age_bars >= 1, "max_age_bars must be >= 1");
        assert!(max_concurrent_per_side >= 1, "max_concurrent_per_side must be >= 1");
        Self {
            pivot_window,
            min_break_strength,
            debounce_bars,
            max_age_bars,
            max_concurrent_per_side,
            atr_key: atr_key.into(),
        }
    }

    /// Pivot confirmation needs `pivot_window` bars on both flanks.
    pub fn warmup_bars(&self) -> usize {
        2 * self.pivot_window
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
            warn!(detector = "structural_break", bar_index, %err, "skipping malformed bar");
            lifecycle::prune_terminal(state);
            return pass;
        }

        for s in state.active.iter_mut() {
            lifecycle::mitigate_by_penetration(s, bar, bar_index, &mut pass.updates);
        }

        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
        if normalize::atr_usable(atr) && bar_index >= self.warmup_bars() {
            self.try_break(bars, bar_index, atr, Side::Bullish, state, &mut pass);
            self.try_break(bars, bar_index, atr, Side::Bearish, state, &mut pass);
        }

        lifecycle::prune_terminal(state);
        pass
    }

    fn try_break(
        &self,
        bars: &[Bar],
        bar_index: usize,
        atr: f64,
        side: Side,
        state: &mut DetectorState,
        pass: &mut DetectorPass,
    ) {
        if let Some(last) = state.last_trigger(side) {
            if bar_index - last < self.debounce_bars {
                return;
            }
        }

        let close = bars[bar_index].close;
        let (pivot_index, excess) = match side {
            Side::Bullish => {
                let (idx, pivot) = match confirmed_pivot_high(bars, bar_index, self.pivot_window) {
                    Some(p) => p,
                    None => return,
                };
                (idx, close - pivot)
            }
            Side::Bearish => {
                let (idx, pivot) = match confirmed_pivot_low(bars, bar_index, self.pivot_window) {
                    Some(p) => p,
                    None => return,
                };
                (idx, pivot - close)
            }
        };
        // Already consumed; the same pivot never breaks twice.
        if state.broken_anchor(side) == Some(pivot_index) {
            return;
        }
        if excess <= 0.0 || excess < normalize::atr_threshold(self.min_break_strength, atr) {
            return;
        }

        let pivot_bar = &bars[pivot_index];
        let quality = normalize::ratio_score(
            normalize::in_atr_units(excess, atr),
            self.min_break_strength,
        );
        let candidate = Structure::new(
            &pivot_bar.symbol,
            pivot_bar.timeframe,
            StructureKind::StructuralBreak,
            side,
            pivot_index,
            pivot_bar.low,
            pivot_bar.high,
            quality,
        );

        state.set_last_trigger(side, bar_index);
        state.set_broken_anchor(side, pivot_index);
        lifecycle::admit(state, candidate, self.max_concurrent_per_side, bar_index, pass);
    }
}
