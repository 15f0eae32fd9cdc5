//! Structure detectors.
//!
//! Six pattern engines share one contract:
//! `detect(bars, bar_index, indicators, prior_zones, &mut state) -> DetectorPass`.
//! Detector structs are immutable parameter sets (validated in their
//! constructors); every piece of mutable state lives in the injectable
//! [`DetectorState`], so per-instrument workers can run in parallel with
//! nothing shared.
//!
//! The detector set is a closed enumeration ([`Detector`]), not an open
//! trait-object registry: structure typing, manager ordering, and exit
//! source selection all pattern-match on the kind.
//!
//! Each pass, in order: age/expire, mitigation scan, candidate admission
//! (with in-state dedup and the per-side quality cap).

pub mod displacement;
pub mod engulfing;
pub mod factory;
pub mod imbalance;
pub mod lifecycle;
pub mod liquidity_sweep;
pub mod structural_break;
pub mod zone_rejection;

pub use displacement::DisplacementDetector;
pub use engulfing::EngulfingDetector;
pub use factory::{build_detectors, required_indicators};
pub use imbalance::ImbalanceGapDetector;
pub use liquidity_sweep::LiquiditySweepDetector;
pub use structural_break::StructuralBreakDetector;
pub use zone_rejection::ZoneRejectionDetector;

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, LifecycleState, Side, Structure, StructureId, StructureKind};
use crate::indicators::IndicatorValues;

/// What the unified zone-rejection detector observed this bar.
/// Consumed by the composite scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionContext {
    /// A zone was touched and rejected within the lookahead window.
    pub rejection: bool,
    /// Post-touch follow-through reached the confirmation threshold.
    pub rejection_confirmed_next: bool,
    /// Continuous strength in [0, 1], blending reaction body and observed
    /// follow-through. None on the reaction bar itself, before any
    /// follow-through can exist; the scorer falls back to its coarse
    /// ladder in that case.
    pub rejection_strength: Option<f64>,
    /// Post-touch excursion in ATR units, measured from the reaction close.
    pub follow_through_atr: f64,
    /// Direction the rejection favors.
    pub side: Side,
}

/// Why a lifecycle transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionCause {
    /// Price penetrated the zone deep enough to count as mitigation.
    Mitigation,
    /// The zone was fully consumed or closed through.
    Consumed,
    /// age_bars exceeded max_age_bars.
    Aged,
    /// Evicted by the per-side concurrency cap (lowest quality goes first).
    Evicted,
}

/// One recorded lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleUpdate {
    pub id: StructureId,
    pub kind: StructureKind,
    pub side: Side,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub cause: TransitionCause,
    pub bar_index: usize,
}

/// Output of one detector pass over one bar.
#[derive(Debug, Clone, Default)]
pub struct DetectorPass {
    pub created: Vec<Structure>,
    pub updates: Vec<LifecycleUpdate>,
    /// Only the zone-rejection detector populates this.
    pub rejection: Option<RejectionContext>,
}

/// Injectable mutable state for one detector instance.
///
/// `active` holds only non-terminal structures between passes. The trigger
/// and broken-anchor indices are structural-break bookkeeping: debounce,
/// and the most recently consumed pivot per side. Other detectors ignore
/// them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorState {
    pub active: Vec<Structure>,
    pub last_trigger_bullish: Option<usize>,
    pub last_trigger_bearish: Option<usize>,
    pub broken_anchor_bullish: Option<usize>,
    pub broken_anchor_bearish: Option<usize>,
}

impl DetectorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-terminal structures of one side.
    pub fn count_side(&self, side: Side) -> usize {
        self.active.iter().filter(|s| !s.state.is_terminal() && s.side == side).count()
    }

    pub fn contains(&self, id: &StructureId) -> bool {
        self.active.iter().any(|s| &s.id == id)
    }

    pub fn last_trigger(&self, side: Side) -> Option<usize> {
        match side {
            Side::Bullish => self.last_trigger_bullish,
            Side::Bearish => self.last_trigger_bearish,
        }
    }

    pub fn set_last_trigger(&mut self, side: Side, bar_index: usize) {
        match side {
            Side::Bullish => self.last_trigger_bullish = Some(bar_index),
            Side::Bearish => self.last_trigger_bearish = Some(bar_index),
        }
    }

    /// Anchor of the most recently consumed pivot for one side.
    pub fn broken_anchor(&self, side: Side) -> Option<usize> {
        match side {
            Side::Bullish => self.broken_anchor_bullish,
            Side::Bearish => self.broken_anchor_bearish,
        }
    }

    pub fn set_broken_anchor(&mut self, side: Side, anchor_index: usize) {
        match side {
            Side::Bullish => self.broken_anchor_bullish = Some(anchor_index),
            Side::Bearish => self.broken_anchor_bearish = Some(anchor_index),
        }
    }
}

/// The closed detector set.
#[derive(Debug, Clone)]
pub enum Detector {
    Displacement(DisplacementDetector),
    Imbalance(ImbalanceGapDetector),
    StructuralBreak(StructuralBreakDetector),
    LiquiditySweep(LiquiditySweepDetector),
    ZoneRejection(ZoneRejectionDetector),
    Engulfing(EngulfingDetector),
}

impl Detector {
    pub fn kind(&self) -> StructureKind {
        match self {
            Detector::Displacement(_) => StructureKind::Displacement,
            Detector::Imbalance(_) => StructureKind::Imbalance,
            Detector::StructuralBreak(_) => StructureKind::StructuralBreak,
            Detector::LiquiditySweep(_) => StructureKind::LiquiditySweep,
            Detector::ZoneRejection(_) => StructureKind::ZoneRejection,
            Detector::Engulfing(_) => StructureKind::Engulfing,
        }
    }

    /// Bars needed before this detector can evaluate candidates.
    pub fn warmup_bars(&self) -> usize {
        match self {
            Detector::Displacement(d) => d.warmup_bars(),
            Detector::Imbalance(d) => d.warmup_bars(),
            Detector::StructuralBreak(d) => d.warmup_bars(),
            Detector::LiquiditySweep(d) => d.warmup_bars(),
            Detector::ZoneRejection(d) => d.warmup_bars(),
            Detector::Engulfing(d) => d.warmup_bars(),
        }
    }

    /// Run one pass. `prior_zones` is the previous bar's aggregated
    /// snapshot (the only upstream feedback in the whole pipeline).
    pub fn detect(
        &self,
        bars: &[Bar],
        bar_index: usize,
        indicators: &IndicatorValues,
        prior_zones: &[Structure],
        state: &mut DetectorState,
    ) -> DetectorPass {
        match self {
            Detector::Displacement(d) => d.detect(bars, bar_index, indicators, state),
            Detector::Imbalance(d) => d.detect(bars, bar_index, indicators, state),
            Detector::StructuralBreak(d) => d.detect(bars, bar_index, indicators, state),
            Detector::LiquiditySweep(d) => d.detect(bars, bar_index, indicators, state),
            Detector::ZoneRejection(d) => {
                d.detect(bars, bar_index, indicators, prior_zones, state)
            }
            Detector::Engulfing(d) => d.detect(bars, bar_index, indicators, prior_zones, state),
        }
    }
}
