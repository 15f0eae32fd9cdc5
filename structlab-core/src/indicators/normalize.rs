//! ATR normalization helpers shared by every detector.
//!
//! All detector size/distance thresholds are ATR multiples, never absolute
//! prices, so behavior is comparable across instruments of different
//! volatility. Doubling ATR while holding a multiplier constant doubles the
//! effective absolute threshold (linearity is asserted in the property
//! tests).

/// Absolute price threshold for an ATR multiplier.
pub fn atr_threshold(multiplier: f64, atr: f64) -> f64 {
    multiplier * atr
}

/// A price distance expressed in ATR units. NaN-safe: returns 0.0 when the
/// ATR is unusable rather than poisoning downstream scores.
pub fn in_atr_units(distance: f64, atr: f64) -> f64 {
    if !atr.is_finite() || atr <= 0.0 || !distance.is_finite() {
        return 0.0;
    }
    distance / atr
}

/// Whether an ATR value is usable for normalization.
pub fn atr_usable(atr: f64) -> bool {
    atr.is_finite() && atr > 0.0
}

/// Score how far `value` sits above a detector floor, mapped to [0, 1].
/// Exactly at the floor scores 0.5; twice the floor (or more) scores 1.0.
/// A zero floor degenerates to clamping the raw value.
pub fn ratio_score(value: f64, floor: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        return 0.0;
    }
    if floor <= 0.0 {
        return clamp01(value);
    }
    clamp01(value / (2.0 * floor))
}

pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
