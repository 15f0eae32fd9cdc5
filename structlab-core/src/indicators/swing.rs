//! Swing references: rolling extremes and confirmed pivots.
//!
//! Two flavors, used by different detectors:
//! - rolling extremes over the trailing window (Donchian-style), available
//!   immediately; displacement breaks are measured against these.
//! - confirmed pivots, a local extreme with `window` lower highs (higher
//!   lows) on BOTH sides. A pivot is known only `window` bars after the
//!   fact, which keeps it strictly causal. Structural breaks and sweeps
//!   key off these.

use crate::domain::Bar;

/// Highest high over bars[index-lookback .. index] (current bar excluded).
/// None until a full window exists or if the window contains NaN.
pub fn rolling_high(bars: &[Bar], index: usize, lookback: usize) -> Option<f64> {
    if lookback == 0 || index < lookback {
        return None;
    }
    let window = &bars[index - lookback..index];
    let mut best = f64::NEG_INFINITY;
    for bar in window {
        if bar.high.is_nan() {
            return None;
        }
        best = best.max(bar.high);
    }
    Some(best)
}

/// Lowest low over bars[index-lookback .. index] (current bar excluded).
pub fn rolling_low(bars: &[Bar], index: usize, lookback: usize) -> Option<f64> {
    if lookback == 0 || index < lookback {
        return None;
    }
    let window = &bars[index - lookback..index];
    let mut best = f64::INFINITY;
    for bar in window {
        if bar.low.is_nan() {
            return None;
        }
        best = best.min(bar.low);
    }
    Some(best)
}

/// Most recent confirmed pivot high at or before `index`.
///
/// A pivot high at bar j requires high[j] to strictly exceed the highs of
/// the `window` bars on each side, so it is only confirmed at j + window.
/// Returns (pivot bar index, pivot high).
pub fn confirmed_pivot_high(bars: &[Bar], index: usize, window: usize) -> Option<(usize, f64)> {
    if window == 0 || index < 2 * window {
        return None;
    }
    // Newest confirmable pivot first.
    let mut j = index - window;
    loop {
        if is_pivot_high(bars, j, window) {
            return Some((j, bars[j].high));
        }
        if j == window {
            return None;
        }
        j -= 1;
    }
}

/// Most recent confirmed pivot low at or before `index`.
pub fn confirmed_pivot_low(bars: &[Bar], index: usize, window: usize) -> Option<(usize, f64)> {
    if window == 0 || index < 2 * window {
        return None;
    }
    let mut j = index - window;
    loop {
        if is_pivot_low(bars, j, window) {
            return Some((j, bars[j].low));
        }
        if j == window {
            return None;
        }
        j -= 1;
    }
}

fn is_pivot_high(bars: &[Bar], j: usize, window: usize) -> bool {
    let level = bars[j].high;
    if level.is_nan() {
        return false;
    }
    for k in j.saturating_sub(window)..=(j + window).min(bars.len() - 1) {
        if k == j {
            continue;
        }
        let h = bars[k].high;
        if h.is_nan() || h >= level {
            return false;
        }
    }
    true
}

fn is_pivot_low(bars: &[Bar], j: usize, window: usize) -> bool {
    let level = bars[j].low;
    if level.is_nan() {
        return false;
    }
    for k in j.saturating_sub(window)..=(j + window).min(bars.len() - 1) {
        if k == j {
            continue;
        }
        let l = bars[k].low;
        if l.is_nan() || l <= level {
            return false;
        }
    }
    true
}
