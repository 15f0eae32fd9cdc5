use serde::{Deserialize, Serialize};
use std::fmt;

use super::bar::Timeframe;
use super::structure::StructureKind;

/// Deterministic structure identifier.
///
/// Derived from symbol, timeframe, detector kind, anchor bar index, and
/// zone bounds. Wall-clock time, RNG, and I/O never enter the derivation,
/// so two replays of the same bar sequence produce byte-identical ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureId(pub String);

impl StructureId {
    /// Generate the deterministic id.
    /// Uses BLAKE3 over a canonical (sorted-key) JSON document for stable,
    /// collision-resistant hashing across builds and platforms.
    pub fn derive(
        symbol: &str,
        timeframe: Timeframe,
        kind: StructureKind,
        anchor_index: usize,
        zone_low: f64,
        zone_high: f64,
    ) -> Self {
        use serde_json::json;

        let canonical = json!({
            "anchor": anchor_index,
            "kind": kind.as_str(),
            "symbol": symbol,
            "timeframe": timeframe.to_string(),
            "zone_high": zone_high,
            "zone_low": zone_low,
        });

        let hash = blake3::hash(canonical.to_string().as_bytes());
        Self(hash.to_hex().to_string())
    }

    /// Shortened prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic configuration hash, for replay identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub String);

impl ConfigHash {
    pub fn from_hash(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
