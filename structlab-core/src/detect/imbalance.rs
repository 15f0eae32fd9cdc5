//! Imbalance gap (fair value gap) detector.
//!
//! Three-candle pattern: a gap exists when the first candle's extreme does
//! not overlap the third's. Bullish when candle 1's high sits below candle
//! 3's low, bearish mirrored. The gap must clear `min_gap_atr_multiplier x
//! ATR` and the absolute floor `min_gap_size`; setting either to zero
//! relaxes that floor and relies on the other. Fill is tracked as the
//! fraction of the gap consumed by later price action; full consumption
//! fills the zone.

use tracing::warn;

use crate::domain::{Bar, Side, Structure, StructureKind};
use crate::indicators::{normalize, IndicatorValues};

use super::lifecycle;
use super::{DetectorPass, DetectorState};

#[derive(Debug, Clone)]
pub struct ImbalanceGapDetector {
    pub min_gap_atr_multiplier: f64,
    pub min_gap_size: f64,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
    atr_key: String,
}

impl ImbalanceGapDetector {
    pub fn new(
        min_gap_atr_multiplier: f64,
        min_gap_size: f64,
        max_age_bars: usize,
        max_concurrent_per_side: usize,
        atr_key: impl Into<String>,
    ) -> Self {
        assert!(min_gap_atr_multiplier >= 0.0, "min_gap_atr_multiplier must be >= 0");
        assert!(min_gap_size >= 0.0, "min_gap_size must be >= 0");
        assert!(
            min_gap_atr_multiplier > 0.0 || min_gap_size > 0.0,
            "at least one gap floor must be > 0"
        );
        assert!(max_age_bars >= 1, "max_age_bars must be >= 1");
        assert!(max_concurrent_per_side >= 1, "max_concurrent_per_side must be >= 1");
        Self {
            min_gap_atr_multiplier,
            min_gap_size,
            max_age_bars,
            max_concurrent_per_side,
            atr_key: atr_key.into(),
        }
    }

    pub fn warmup_bars(&self) -> usize {
        2
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
            warn!(detector = "imbalance", bar_index, %err, "skipping malformed bar");
            lifecycle::prune_terminal(state);
            return pass;
        }

        // Gap fill is pure price traversal; no mid-band tolerance here.
        for s in state.active.iter_mut() {
            lifecycle::mitigate_by_penetration(s, bar, bar_index, &mut pass.updates);
        }

        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
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

    fn candidate(&self, bars: &[Bar], bar_index: usize, atr: f64) -> Option<Structure> {
        let first = &bars[bar_index - 2];
        let third = &bars[bar_index];
        if first.validate().is_err() {
            return None;
        }

        let (side, zone_low, zone_high) = if first.high < third.low {
            (Side::Bullish, first.high, third.low)
        } else if first.low > third.high {
            (Side::Bearish, third.high, first.low)
        } else {
            return None;
        };

        let gap = zone_high - zone_low;
        if gap < normalize::atr_threshold(self.min_gap_atr_multiplier, atr) {
            return None;
        }
        if gap < self.min_gap_size {
            return None;
        }

        let quality = normalize::ratio_score(
            normalize::in_atr_units(gap, atr),
            self.min_gap_atr_multiplier,
        );

        // Anchor on the middle candle whose thrust opened the gap.
        Some(Structure::new(
            &third.symbol,
            third.timeframe,
            StructureKind::Imbalance,
            side,
            bar_index - 1,
            zone_low,
            zone_high,
            quality,
        ))
    }
}
