//! Decision: the ephemeral output of one bar-processing cycle.
//!
//! Built, validated, and either handed to the execution layer or discarded
//! within the same cycle. Nothing in the core persists decisions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::bar::Timeframe;
use super::ids::StructureId;
use super::session::Session;
use super::structure::{Side, StructureKind};

/// Which geometry produced the exit levels. Tracked so fallback usage can
/// be monitored downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitMethod {
    Structure(StructureKind),
    AtrFallback,
    Legacy,
}

impl std::fmt::Display for ExitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitMethod::Structure(kind) => write!(f, "STRUCTURE_{kind}"),
            ExitMethod::AtrFallback => write!(f, "ATR_FALLBACK"),
            ExitMethod::Legacy => write!(f, "LEGACY"),
        }
    }
}

/// Everything downstream observability needs about how a decision was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub composite_tech_score: f64,
    /// The four scorer components by name. BTreeMap keeps serialization
    /// canonical for fingerprinting.
    pub component_breakdown: BTreeMap<String, f64>,
    /// Empty on an accepted decision.
    pub gate_reasons: Vec<String>,
    pub exit_method: ExitMethod,
    pub clamped: bool,
    pub session: Session,
    /// Highest-priority structure backing the candidate, if any.
    pub lead_structure: Option<StructureId>,
}

/// A fully validated trade decision for one instrument on one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar_index: usize,
    pub side: Side,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Volume in lots, already step-rounded and clamped.
    pub size: f64,
    /// Post-clamp reward/risk ratio.
    pub computed_rr: f64,
    pub metadata: DecisionMetadata,
}

impl Decision {
    /// Stop distance in price units.
    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    /// Target distance in price units.
    pub fn target_distance(&self) -> f64 {
        (self.take_profit - self.entry).abs()
    }
}
