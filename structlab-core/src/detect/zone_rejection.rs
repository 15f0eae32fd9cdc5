//! Unified zone rejection detector.
//!
//! Unlike the other five engines this one does not hunt for a raw candle
//! pattern: it watches the aggregated zones the OTHER detectors produced
//! (the previous bar's manager snapshot) and fires when price touches one
//! and gets rejected with a meaningful reaction body. The reaction candle
//! anchors a rejection structure whose zone is the rejection wick band,
//! and for the next `lookahead_bars` bars the detector keeps publishing a
//! [`RejectionContext`] with the observed follow-through, which is what
//! the composite scorer consumes.
//!
//! Structure quality is frozen at creation; only the context evolves as
//! follow-through accrues.

use tracing::{debug, warn};

use crate::domain::{Bar, Side, Structure, StructureKind};
use crate::indicators::{normalize, IndicatorValues};

use super::lifecycle;
use super::{DetectorPass, DetectorState, RejectionContext};

#[derive(Debug, Clone)]
pub struct ZoneRejectionDetector {
    /// How close to a zone edge (in ATR) a touch may start.
    pub touch_atr_buffer: f64,
    /// Minimum reaction candle body, in ATR.
    pub min_reaction_body_atr: f64,
    /// Follow-through needed (in ATR) before a rejection counts as confirmed.
    pub min_follow_through_atr: f64,
    /// How many bars after the reaction the context stays live.
    pub lookahead_bars: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
    atr_key: String,
}

impl ZoneRejectionDetector {
    pub fn new(
        touch_atr_buffer: f64,
        min_reaction_body_atr: f64,
        min_follow_through_atr: f64,
        lookahead_bars: usize,
        max_age_bars: usize,
        max_concurrent_per_side: usize,
        atr_key: impl Into<String>,
    ) -> Self {
        assert!(touch_atr_buffer >= 0.0, "touch_atr_buffer must be >= 0");
        assert!(min_reaction_body_atr >= 0.0, "min_reaction_body_atr must be >= 0");
        assert!(min_follow_through_atr >= 0.0, "min_follow_through_atr must be >= 0");
        assert!(lookahead_bars >= 1, "lookahead_bars must be >= 1");
        assert!(max_age_bars >= 1, "max_age_bars must be >= 1");
        assert!(max_concurrent_per_side >= 1, "max_concurrent_per_side must be >= 1");
        Self {
            touch_atr_buffer,
            min_reaction_body_atr,
            min_follow_through_atr,
            lookahead_bars,
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
            warn!(detector = "zone_rejection", bar_index, %err, "skipping malformed bar");
            lifecycle::prune_terminal(state);
            return pass;
        }

        for s in state.active.iter_mut() {
            lifecycle::mitigate_by_penetration(s, bar, bar_index, &mut pass.updates);
        }

        let atr = indicators.get(&self.atr_key, bar_index).unwrap_or(f64::NAN);
        if normalize::atr_usable(atr) && bar_index >= self.warmup_bars() {
            for side in [Side::Bullish, Side::Bearish] {
                if self.pending(state, bar_index, side).is_some() {
                    // One pending rejection per side at a time.
                    continue;
                }
                if let Some(candidate) = self.candidate(bar, bar_index, atr, prior_zones, side) {
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

        pass.rejection = self.context(bars, bar_index, atr, state);
        lifecycle::prune_terminal(state);
        pass
    }

    /// Most recent non-terminal rejection of `side` still inside its
    /// lookahead window.
    fn pending<'a>(
        &self,
        state: &'a DetectorState,
        bar_index: usize,
        side: Side,
    ) -> Option<&'a Structure> {
        state
            .active
            .iter()
            .filter(|s| {
                !s.state.is_terminal()
                    && s.side == side
                    && bar_index - s.anchor_index <= self.lookahead_bars
            })
            .max_by_key(|s| s.anchor_index)
    }

    /// Test this bar as a reaction candle against the touched prior zone
    /// of `side` with the highest quality.
    fn candidate(
        &self,
        bar: &Bar,
        bar_index: usize,
        atr: f64,
        prior_zones: &[Structure],
        side: Side,
    ) -> Option<Structure> {
        let body = (bar.close - bar.open).abs();
        if body < normalize::atr_threshold(self.min_reaction_body_atr, atr) {
            return None;
        }
        let reacts = match side {
            Side::Bullish => bar.close > bar.open,
            Side::Bearish => bar.close < bar.open,
        };
        if !reacts {
            return None;
        }

        let buffer = normalize::atr_threshold(self.touch_atr_buffer, atr);
        let touched = prior_zones
            .iter()
            .filter(|z| {
                z.kind != StructureKind::ZoneRejection
                    && !z.state.is_terminal()
                    && z.side == side
                    && self.touches(bar, z, buffer)
            })
            .max_by(|a, b| {
                a.quality.partial_cmp(&b.quality).unwrap_or(std::cmp::Ordering::Equal)
            })?;

        // Zone = the rejection wick band of the reaction candle.
        let (zone_low, zone_high) = match side {
            Side::Bullish => (bar.low, bar.open.min(bar.close)),
            Side::Bearish => (bar.open.max(bar.close), bar.high),
        };

        let body_score =
            normalize::ratio_score(normalize::in_atr_units(body, atr), self.min_reaction_body_atr);
        let range = bar.high - bar.low;
        let tail_score = if range > 0.0 { (zone_high - zone_low) / range } else { 0.0 };
        let quality = 0.6 * body_score + 0.4 * tail_score;

        debug!(
            detector = "zone_rejection",
            bar_index,
            source = %touched.kind,
            source_quality = touched.quality,
            %side,
            "zone touch rejected"
        );
        Some(Structure::new(
            &bar.symbol,
            bar.timeframe,
            StructureKind::ZoneRejection,
            side,
            bar_index,
            zone_low,
            zone_high,
            quality,
        ))
    }

    /// A touch reaches the near edge (within the buffer) without closing
    /// through the far edge.
    fn touches(&self, bar: &Bar, zone: &Structure, buffer: f64) -> bool {
        match zone.side {
            Side::Bullish => bar.low <= zone.zone_high + buffer && bar.close > zone.zone_low,
            Side::Bearish => bar.high >= zone.zone_low - buffer && bar.close < zone.zone_high,
        }
    }

    /// Context for the most recent pending rejection on either side, or
    /// None when nothing is inside its lookahead window.
    fn context(
        &self,
        bars: &[Bar],
        bar_index: usize,
        atr: f64,
        state: &DetectorState,
    ) -> Option<RejectionContext> {
        let pending = [Side::Bullish, Side::Bearish]
            .into_iter()
            .filter_map(|side| self.pending(state, bar_index, side))
            .max_by(|a, b| {
                a.anchor_index
                    .cmp(&b.anchor_index)
                    .then(a.quality.partial_cmp(&b.quality).unwrap_or(std::cmp::Ordering::Equal))
            })?;

        if pending.anchor_index == bar_index {
            // Reaction bar: no follow-through can exist yet.
            return Some(RejectionContext {
                rejection: true,
                rejection_confirmed_next: false,
                rejection_strength: None,
                follow_through_atr: 0.0,
                side: pending.side,
            });
        }

        let reaction_close = bars[pending.anchor_index].close;
        let after = &bars[pending.anchor_index + 1..=bar_index];
        let excursion = match pending.side {
            Side::Bullish => {
                after.iter().map(|b| b.high).fold(f64::MIN, f64::max) - reaction_close
            }
            Side::Bearish => {
                reaction_close - after.iter().map(|b| b.low).fold(f64::MAX, f64::min)
            }
        };
        let follow_through_atr = normalize::in_atr_units(excursion.max(0.0), atr);
        let confirmed = follow_through_atr >= self.min_follow_through_atr;
        let ft_score = normalize::ratio_score(follow_through_atr, self.min_follow_through_atr);
        let strength = normalize::clamp01(0.5 * pending.quality + 0.5 * ft_score);

        Some(RejectionContext {
            rejection: true,
            rejection_confirmed_next: confirmed,
            rejection_strength: Some(strength),
            follow_through_atr,
            side: pending.side,
        })
    }
}
