//! Structure: a detected price zone of interest with a bounded lifetime.
//!
//! Lifecycle transitions are monotonic:
//! Unfilled → Partial → Filled, or any non-terminal state → Expired.
//! Filled and Expired are terminal; nothing leaves them.

use serde::{Deserialize, Serialize};

use super::bar::Timeframe;
use super::ids::StructureId;

/// The six detector kinds. Fixed enumeration; structure typing, manager
/// ordering, and exit-source selection all key off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureKind {
    Displacement,
    Imbalance,
    StructuralBreak,
    LiquiditySweep,
    ZoneRejection,
    Engulfing,
}

impl StructureKind {
    pub const ALL: [StructureKind; 6] = [
        StructureKind::Displacement,
        StructureKind::Imbalance,
        StructureKind::StructuralBreak,
        StructureKind::LiquiditySweep,
        StructureKind::ZoneRejection,
        StructureKind::Engulfing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StructureKind::Displacement => "DISPLACEMENT",
            StructureKind::Imbalance => "IMBALANCE",
            StructureKind::StructuralBreak => "STRUCTURAL_BREAK",
            StructureKind::LiquiditySweep => "LIQUIDITY_SWEEP",
            StructureKind::ZoneRejection => "ZONE_REJECTION",
            StructureKind::Engulfing => "ENGULFING",
        }
    }
}

impl std::fmt::Display for StructureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade side of a structure or decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Bullish,
    Bearish,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Bullish => Side::Bearish,
            Side::Bearish => Side::Bullish,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bullish => "BULLISH",
            Side::Bearish => "BEARISH",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mitigation progress of a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Unfilled,
    Partial,
    Filled,
    Expired,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Filled | LifecycleState::Expired)
    }

    /// Whether `self → to` is a legal monotonic transition.
    pub fn can_transition_to(&self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, to) {
            (Unfilled, Partial) | (Unfilled, Filled) | (Partial, Filled) => true,
            (Unfilled, Expired) | (Partial, Expired) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unfilled => "UNFILLED",
            LifecycleState::Partial => "PARTIAL",
            LifecycleState::Filled => "FILLED",
            LifecycleState::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected zone of interest.
///
/// Owned exclusively by the originating detector's state object; the
/// structure manager only ever hands out snapshot clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    pub id: StructureId,
    pub kind: StructureKind,
    pub side: Side,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Index of the bar the zone geometry is anchored to.
    pub anchor_index: usize,
    pub zone_high: f64,
    pub zone_low: f64,
    /// Detector-specific weighted composite of the detector's own
    /// sub-signals, in [0, 1]. Frozen at creation.
    pub quality: f64,
    pub state: LifecycleState,
    /// Bars elapsed since creation. Advanced once per detection pass.
    pub age_bars: usize,
    /// Fraction of the zone consumed by subsequent price action, in [0, 1].
    /// Monotone non-decreasing; 1.0 accompanies the Filled transition.
    pub fill_fraction: f64,
}

impl Structure {
    pub fn new(
        symbol: &str,
        timeframe: Timeframe,
        kind: StructureKind,
        side: Side,
        anchor_index: usize,
        zone_low: f64,
        zone_high: f64,
        quality: f64,
    ) -> Self {
        debug_assert!(zone_low <= zone_high, "zone bounds inverted");
        let id = StructureId::derive(symbol, timeframe, kind, anchor_index, zone_low, zone_high);
        Self {
            id,
            kind,
            side,
            symbol: symbol.to_string(),
            timeframe,
            anchor_index,
            zone_high,
            zone_low,
            quality: quality.clamp(0.0, 1.0),
            state: LifecycleState::Unfilled,
            age_bars: 0,
            fill_fraction: 0.0,
        }
    }

    pub fn zone_height(&self) -> f64 {
        self.zone_high - self.zone_low
    }

    pub fn zone_mid(&self) -> f64 {
        (self.zone_high + self.zone_low) / 2.0
    }

    /// Distance from `price` to the nearest zone edge; 0.0 inside the zone.
    pub fn distance_from(&self, price: f64) -> f64 {
        if price > self.zone_high {
            price - self.zone_high
        } else if price < self.zone_low {
            self.zone_low - price
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Structure {
        Structure::new(
            "EURUSD",
            Timeframe::H1,
            StructureKind::Displacement,
            Side::Bullish,
            10,
            1.1000,
            1.1040,
            0.8,
        )
    }

    #[test]
    fn new_structure_starts_unfilled() {
        let s = zone();
        assert_eq!(s.state, LifecycleState::Unfilled);
        assert_eq!(s.age_bars, 0);
        assert_eq!(s.fill_fraction, 0.0);
    }

    #[test]
    fn quality_is_clamped() {
        let s = Structure::new(
            "EURUSD",
            Timeframe::H1,
            StructureKind::Engulfing,
            Side::Bearish,
            3,
            1.0,
            2.0,
            1.7,
        );
        assert_eq!(s.quality, 1.0);
        let s = Structure::new(
            "EURUSD",
            Timeframe::H1,
            StructureKind::Engulfing,
            Side::Bearish,
            3,
            1.0,
            2.0,
            -0.2,
        );
        assert_eq!(s.quality, 0.0);
    }

    #[test]
    fn transition_table_is_monotonic() {
        use LifecycleState::*;
        assert!(Unfilled.can_transition_to(Partial));
        assert!(Unfilled.can_transition_to(Filled));
        assert!(Unfilled.can_transition_to(Expired));
        assert!(Partial.can_transition_to(Filled));
        assert!(Partial.can_transition_to(Expired));

        // No exit from terminal states, no backwards moves.
        assert!(!Filled.can_transition_to(Partial));
        assert!(!Filled.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Unfilled));
        assert!(!Partial.can_transition_to(Unfilled));
        assert!(!Unfilled.can_transition_to(Unfilled));
    }

    #[test]
    fn terminal_states() {
        assert!(!LifecycleState::Unfilled.is_terminal());
        assert!(!LifecycleState::Partial.is_terminal());
        assert!(LifecycleState::Filled.is_terminal());
        assert!(LifecycleState::Expired.is_terminal());
    }

    #[test]
    fn distance_from_edges() {
        let s = zone();
        assert!((s.distance_from(1.1050) - 0.0010).abs() < 1e-12);
        assert!((s.distance_from(1.0990) - 0.0010).abs() < 1e-12);
        assert_eq!(s.distance_from(1.1020), 0.0);
        assert!((s.zone_height() - 0.0040).abs() < 1e-12);
        assert!((s.zone_mid() - 1.1020).abs() < 1e-12);
    }

    #[test]
    fn same_geometry_same_id() {
        let a = zone();
        let b = zone();
        assert_eq!(a.id, b.id);
    }
}
