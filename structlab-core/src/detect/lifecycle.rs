//! Shared lifecycle mechanics.
//!
//! Every detector runs the same per-bar sequence over its own
//! [`DetectorState`]: age and expire, scan mitigation, admit candidates
//! under the per-side cap. The functions here implement those steps so
//! the six detectors only supply geometry and thresholds.
//!
//! Transitions are monotone. [`mark`] refuses anything
//! [`LifecycleState::can_transition_to`] forbids, so a FILLED zone can
//! never resurface as PARTIAL no matter what a detector asks for.

use tracing::debug;

use crate::domain::{Bar, LifecycleState, Side, Structure};

use super::{DetectorPass, DetectorState, LifecycleUpdate, TransitionCause};

/// Increment age on every live structure and expire the ones past
/// `max_age_bars`. Runs first in every pass, even on malformed bars.
pub fn age_and_expire(
    state: &mut DetectorState,
    max_age_bars: usize,
    bar_index: usize,
    updates: &mut Vec<LifecycleUpdate>,
) {
    for s in state.active.iter_mut() {
        if s.state.is_terminal() {
            continue;
        }
        s.age_bars += 1;
        if s.age_bars > max_age_bars {
            record(s, LifecycleState::Expired, TransitionCause::Aged, bar_index, updates);
        }
    }
}

/// Apply one transition if the state machine allows it. Returns whether
/// the transition was applied.
pub fn mark(
    s: &mut Structure,
    to: LifecycleState,
    cause: TransitionCause,
    bar_index: usize,
    updates: &mut Vec<LifecycleUpdate>,
) -> bool {
    if !s.state.can_transition_to(to) {
        return false;
    }
    record(s, to, cause, bar_index, updates);
    true
}

fn record(
    s: &mut Structure,
    to: LifecycleState,
    cause: TransitionCause,
    bar_index: usize,
    updates: &mut Vec<LifecycleUpdate>,
) {
    updates.push(LifecycleUpdate {
        id: s.id.clone(),
        kind: s.kind,
        side: s.side,
        from: s.state,
        to,
        cause,
        bar_index,
    });
    s.state = to;
}

/// How far this bar reached into the zone, in price units. Zero when the
/// bar never touched it. Bullish zones sit below price and are entered
/// from above; bearish zones the reverse.
pub fn penetration_depth(s: &Structure, bar: &Bar) -> f64 {
    match s.side {
        Side::Bullish => (s.zone_high - bar.low).max(0.0).min(s.zone_height()),
        Side::Bearish => (bar.high - s.zone_low).max(0.0).min(s.zone_height()),
    }
}

/// The bar closed on the far side of the zone, invalidating it.
pub fn closed_through(s: &Structure, bar: &Bar) -> bool {
    match s.side {
        Side::Bullish => bar.close < s.zone_low,
        Side::Bearish => bar.close > s.zone_high,
    }
}

/// Penetration-based mitigation used by most zone kinds: any touch is at
/// least PARTIAL, full traversal or a close through the far edge is
/// FILLED. `fill_fraction` only ever ratchets upward.
pub fn mitigate_by_penetration(
    s: &mut Structure,
    bar: &Bar,
    bar_index: usize,
    updates: &mut Vec<LifecycleUpdate>,
) {
    if s.state.is_terminal() {
        return;
    }
    let depth = penetration_depth(s, bar);
    if depth <= 0.0 && !closed_through(s, bar) {
        return;
    }
    let height = s.zone_height();
    let frac = if height > 0.0 { (depth / height).clamp(0.0, 1.0) } else { 1.0 };
    s.fill_fraction = s.fill_fraction.max(frac);
    if s.fill_fraction >= 1.0 || closed_through(s, bar) {
        s.fill_fraction = 1.0;
        mark(s, LifecycleState::Filled, TransitionCause::Consumed, bar_index, updates);
    } else {
        mark(s, LifecycleState::Partial, TransitionCause::Mitigation, bar_index, updates);
    }
}

/// Admit a candidate under the per-side concurrency cap.
///
/// Duplicates (same id already live in state) are dropped silently. When
/// the cap would be exceeded, the survivor set is exactly the top `cap`
/// by quality among existing live structures plus the candidate; a
/// candidate that would itself be trimmed is never admitted at all.
/// Quality ties evict the older anchor first, then the smaller id.
pub fn admit(
    state: &mut DetectorState,
    candidate: Structure,
    cap: usize,
    bar_index: usize,
    pass: &mut DetectorPass,
) {
    if cap == 0 {
        return;
    }
    if state.contains(&candidate.id) {
        debug!(id = candidate.id.short(), "duplicate structure suppressed");
        return;
    }
    let side = candidate.side;
    if state.count_side(side) >= cap && !beats_weakest(state, &candidate) {
        debug!(
            id = candidate.id.short(),
            kind = %candidate.kind,
            "candidate below cap floor, not admitted"
        );
        return;
    }
    while state.count_side(side) >= cap {
        if let Some(idx) = weakest_index(state, side) {
            let s = &mut state.active[idx];
            debug!(id = s.id.short(), kind = %s.kind, quality = s.quality, "cap eviction");
            record(s, LifecycleState::Expired, TransitionCause::Evicted, bar_index, &mut pass.updates);
        } else {
            break;
        }
    }
    pass.created.push(candidate.clone());
    state.active.push(candidate);
}

fn beats_weakest(state: &DetectorState, candidate: &Structure) -> bool {
    match weakest_index(state, candidate.side) {
        Some(idx) => {
            let w = &state.active[idx];
            // Strictly better, or equal quality with a fresher anchor.
            candidate.quality > w.quality
                || (candidate.quality == w.quality && candidate.anchor_index > w.anchor_index)
        }
        None => true,
    }
}

/// Index of the live structure that loses a cap fight: lowest quality,
/// ties broken by older anchor, then smaller id.
fn weakest_index(state: &DetectorState, side: Side) -> Option<usize> {
    state
        .active
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.state.is_terminal() && s.side == side)
        .min_by(|(_, a), (_, b)| {
            a.quality
                .partial_cmp(&b.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.anchor_index.cmp(&b.anchor_index))
                .then(a.id.0.cmp(&b.id.0))
        })
        .map(|(idx, _)| idx)
}

/// Drop terminal structures from state at the end of a pass.
pub fn prune_terminal(state: &mut DetectorState) {
    state.active.retain(|s| !s.state.is_terminal());
}
