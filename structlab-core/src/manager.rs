//! Structure manager: the aggregated cross-detector snapshot.
//!
//! Pure aggregation. Detection stays inside the detectors; the manager
//! only collects their live structures into a single ordered view for the
//! scorer and the exit planner. Kinds are never merged: two detectors
//! flagging overlapping zones stay distinct typed structures.
//!
//! Snapshot order is the configured detector priority; within one kind,
//! quality descending with ties broken by newer anchor, then id, so the
//! snapshot is byte-stable across replays.

use crate::detect::DetectorState;
use crate::domain::{Structure, StructureKind};

#[derive(Debug, Clone)]
pub struct StructureManager {
    priority: Vec<StructureKind>,
    snapshot: Vec<Structure>,
}

impl StructureManager {
    pub fn new(priority: Vec<StructureKind>) -> Self {
        Self { priority, snapshot: Vec::new() }
    }

    /// Rebuild the snapshot from the detectors' post-pass states.
    /// Kinds missing from the priority list are dropped.
    pub fn rebuild(&mut self, states: &[(StructureKind, &DetectorState)]) {
        self.snapshot.clear();
        for kind in &self.priority {
            let start = self.snapshot.len();
            for (state_kind, state) in states {
                if state_kind != kind {
                    continue;
                }
                self.snapshot
                    .extend(state.active.iter().filter(|s| !s.state.is_terminal()).cloned());
            }
            self.snapshot[start..].sort_by(|a, b| {
                b.quality
                    .partial_cmp(&a.quality)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.anchor_index.cmp(&a.anchor_index))
                    .then(a.id.0.cmp(&b.id.0))
            });
        }
    }

    /// Read-only aggregated view.
    pub fn snapshot(&self) -> &[Structure] {
        &self.snapshot
    }

    /// Highest-priority live structure; its side leads the candidate.
    pub fn lead(&self) -> Option<&Structure> {
        self.snapshot.first()
    }

    pub fn of_kind(&self, kind: StructureKind) -> impl Iterator<Item = &Structure> {
        self.snapshot.iter().filter(move |s| s.kind == kind)
    }

    /// Best structure of one kind (snapshot order is already quality-first
    /// within a kind).
    pub fn best_of_kind(&self, kind: StructureKind) -> Option<&Structure> {
        self.of_kind(kind).next()
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}
