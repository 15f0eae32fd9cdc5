//! Engine configuration.
//!
//! One `CoreConfig` TOML document drives the whole decision core: indicator
//! periods, per-detector thresholds, scorer weights, the nested
//! threshold/min-RR rule tables, exit-source priority, sizing, and guard
//! limits. Every section carries defaults, so an empty document is a
//! complete working configuration.
//!
//! Validation is fail-fast: `from_toml_str` refuses a malformed document
//! before any bar is processed. `config_hash` is a content-addressable
//! BLAKE3 digest of the document, used as the replay identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ConfigHash, InstrumentClass, Session, StructureKind, Timeframe};

/// Scorer weights must sum to 1.0 within this tolerance.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("scorer weights sum to {sum}, expected 1.0 within 1e-6")]
    WeightSum { sum: f64 },

    #[error("{field} must be {requirement}, got {value}")]
    Invalid { field: &'static str, requirement: &'static str, value: f64 },

    #[error("ema periods must be strictly increasing, got {short}, {medium}, {long}")]
    EmaOrder { short: usize, medium: usize, long: usize },

    #[error("detector priority lists {0} twice")]
    DuplicateDetector(StructureKind),

    #[error("detector priority must not be empty")]
    EmptyDetectorPriority,

    #[error("exit priority lists {0} twice")]
    DuplicateExitSource(ExitSource),

    #[error("exit priority must not be empty")]
    EmptyExitPriority,

    #[error("rescale multipliers must be > 1.0 and strictly increasing")]
    RescaleSequence,
}

fn check(
    ok: bool,
    field: &'static str,
    requirement: &'static str,
    value: f64,
) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field, requirement, value })
    }
}

// -----------------------------------------------------------------------
// Root document
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    pub indicators: IndicatorConfig,
    pub detectors: DetectorsConfig,
    pub scorer: ScorerConfig,
    /// Composite-gate thresholds by (timeframe, class, session).
    pub thresholds: RuleTable,
    /// Minimum risk-reward by (timeframe, class, session).
    pub min_rr: RuleTable,
    pub exits: ExitConfig,
    pub sizing: SizingConfig,
    pub guards: GuardsConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorConfig::default(),
            detectors: DetectorsConfig::default(),
            scorer: ScorerConfig::default(),
            thresholds: RuleTable::new(0.60),
            min_rr: RuleTable::new(1.5),
            exits: ExitConfig::default(),
            sizing: SizingConfig::default(),
            guards: GuardsConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Content-addressable hash of the whole document.
    ///
    /// Two runs with equal hashes are guaranteed the same thresholds,
    /// weights, and tables; the replay fingerprint folds this in.
    pub fn config_hash(&self) -> ConfigHash {
        let json = serde_json::to_string(self).expect("CoreConfig serialization failed");
        let hash = blake3::hash(json.as_bytes());
        ConfigHash::from_hash(hash.to_hex().as_str())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.indicators.validate()?;
        self.detectors.validate()?;
        self.scorer.validate()?;

        for v in self.thresholds.values() {
            check(
                (0.0..=1.0).contains(&v),
                "thresholds",
                "within 0..=1",
                v,
            )?;
        }
        for v in self.min_rr.values() {
            check(v > 0.0, "min_rr", "> 0", v)?;
        }

        self.exits.validate()?;
        self.sizing.validate()?;
        self.guards.validate()
    }
}

// -----------------------------------------------------------------------
// Indicators
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub atr_period: usize,
    pub ema_short_period: usize,
    pub ema_medium_period: usize,
    pub ema_long_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self { atr_period: 14, ema_short_period: 8, ema_medium_period: 21, ema_long_period: 50 }
    }
}

impl IndicatorConfig {
    pub fn atr_key(&self) -> String {
        format!("atr_{}", self.atr_period)
    }

    pub fn ema_short_key(&self) -> String {
        format!("ema_{}", self.ema_short_period)
    }

    pub fn ema_medium_key(&self) -> String {
        format!("ema_{}", self.ema_medium_period)
    }

    pub fn ema_long_key(&self) -> String {
        format!("ema_{}", self.ema_long_period)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check(self.atr_period >= 1, "indicators.atr_period", ">= 1", self.atr_period as f64)?;
        if !(self.ema_short_period < self.ema_medium_period
            && self.ema_medium_period < self.ema_long_period)
        {
            return Err(ConfigError::EmaOrder {
                short: self.ema_short_period,
                medium: self.ema_medium_period,
                long: self.ema_long_period,
            });
        }
        check(
            self.ema_short_period >= 1,
            "indicators.ema_short_period",
            ">= 1",
            self.ema_short_period as f64,
        )
    }
}

// -----------------------------------------------------------------------
// Detectors
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorsConfig {
    /// Snapshot insertion order; also decides which structure leads a
    /// candidate when several kinds are live.
    pub priority: Vec<StructureKind>,
    pub displacement: DisplacementConfig,
    pub imbalance: ImbalanceConfig,
    pub structural_break: StructuralBreakConfig,
    pub liquidity_sweep: LiquiditySweepConfig,
    pub zone_rejection: ZoneRejectionConfig,
    pub engulfing: EngulfingConfig,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            priority: StructureKind::ALL.to_vec(),
            displacement: DisplacementConfig::default(),
            imbalance: ImbalanceConfig::default(),
            structural_break: StructuralBreakConfig::default(),
            liquidity_sweep: LiquiditySweepConfig::default(),
            zone_rejection: ZoneRejectionConfig::default(),
            engulfing: EngulfingConfig::default(),
        }
    }
}

impl DetectorsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.priority.is_empty() {
            return Err(ConfigError::EmptyDetectorPriority);
        }
        for (i, kind) in self.priority.iter().enumerate() {
            if self.priority[..i].contains(kind) {
                return Err(ConfigError::DuplicateDetector(*kind));
            }
        }
        self.displacement.validate()?;
        self.imbalance.validate()?;
        self.structural_break.validate()?;
        self.liquidity_sweep.validate()?;
        self.zone_rejection.validate()?;
        self.engulfing.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplacementConfig {
    pub enabled: bool,
    pub displacement_min_body_atr: f64,
    pub excess_beyond_swing_atr: f64,
    pub mid_band_atr: f64,
    pub swing_lookback: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
}

impl Default for DisplacementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            displacement_min_body_atr: 1.2,
            excess_beyond_swing_atr: 0.25,
            mid_band_atr: 0.5,
            swing_lookback: 10,
            max_age_bars: 96,
            max_concurrent_per_side: 3,
        }
    }
}

impl DisplacementConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.displacement_min_body_atr > 0.0,
            "detectors.displacement.displacement_min_body_atr",
            "> 0",
            self.displacement_min_body_atr,
        )?;
        check(
            self.excess_beyond_swing_atr >= 0.0,
            "detectors.displacement.excess_beyond_swing_atr",
            ">= 0",
            self.excess_beyond_swing_atr,
        )?;
        check(
            self.mid_band_atr >= 0.0,
            "detectors.displacement.mid_band_atr",
            ">= 0",
            self.mid_band_atr,
        )?;
        check(
            self.swing_lookback >= 1,
            "detectors.displacement.swing_lookback",
            ">= 1",
            self.swing_lookback as f64,
        )?;
        check_lifecycle(
            "detectors.displacement.max_age_bars",
            self.max_age_bars,
            "detectors.displacement.max_concurrent_per_side",
            self.max_concurrent_per_side,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImbalanceConfig {
    pub enabled: bool,
    pub min_gap_atr_multiplier: f64,
    /// Absolute price floor; either floor may be 0 to rely on the other.
    pub min_gap_size: f64,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
}

impl Default for ImbalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_gap_atr_multiplier: 0.15,
            min_gap_size: 0.0,
            max_age_bars: 96,
            max_concurrent_per_side: 3,
        }
    }
}

impl ImbalanceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.min_gap_atr_multiplier >= 0.0,
            "detectors.imbalance.min_gap_atr_multiplier",
            ">= 0",
            self.min_gap_atr_multiplier,
        )?;
        check(
            self.min_gap_size >= 0.0,
            "detectors.imbalance.min_gap_size",
            ">= 0",
            self.min_gap_size,
        )?;
        check(
            self.min_gap_atr_multiplier > 0.0 || self.min_gap_size > 0.0,
            "detectors.imbalance.min_gap_atr_multiplier",
            "at least one gap floor > 0",
            self.min_gap_atr_multiplier,
        )?;
        check_lifecycle(
            "detectors.imbalance.max_age_bars",
            self.max_age_bars,
            "detectors.imbalance.max_concurrent_per_side",
            self.max_concurrent_per_side,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StructuralBreakConfig {
    pub enabled: bool,
    pub pivot_window: usize,
    pub min_break_strength: f64,
    pub debounce_bars: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
}

impl Default for StructuralBreakConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pivot_window: 5,
            min_break_strength: 0.2,
            debounce_bars: 10,
            max_age_bars: 96,
            max_concurrent_per_side: 2,
        }
    }
}

impl StructuralBreakConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.pivot_window >= 1,
            "detectors.structural_break.pivot_window",
            ">= 1",
            self.pivot_window as f64,
        )?;
        check(
            self.min_break_strength >= 0.0,
            "detectors.structural_break.min_break_strength",
            ">= 0",
            self.min_break_strength,
        )?;
        check_lifecycle(
            "detectors.structural_break.max_age_bars",
            self.max_age_bars,
            "detectors.structural_break.max_concurrent_per_side",
            self.max_concurrent_per_side,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiquiditySweepConfig {
    pub enabled: bool,
    pub sweep_excess_atr: f64,
    pub reversal_window_bars: usize,
    pub swing_lookback: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
}

impl Default for LiquiditySweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_excess_atr: 0.3,
            reversal_window_bars: 3,
            swing_lookback: 10,
            max_age_bars: 72,
            max_concurrent_per_side: 2,
        }
    }
}

impl LiquiditySweepConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.sweep_excess_atr >= 0.0,
            "detectors.liquidity_sweep.sweep_excess_atr",
            ">= 0",
            self.sweep_excess_atr,
        )?;
        check(
            self.swing_lookback >= 1,
            "detectors.liquidity_sweep.swing_lookback",
            ">= 1",
            self.swing_lookback as f64,
        )?;
        check_lifecycle(
            "detectors.liquidity_sweep.max_age_bars",
            self.max_age_bars,
            "detectors.liquidity_sweep.max_concurrent_per_side",
            self.max_concurrent_per_side,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ZoneRejectionConfig {
    pub enabled: bool,
    pub touch_atr_buffer: f64,
    pub min_reaction_body_atr: f64,
    pub min_follow_through_atr: f64,
    pub lookahead_bars: usize,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
}

impl Default for ZoneRejectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            touch_atr_buffer: 0.25,
            min_reaction_body_atr: 0.3,
            min_follow_through_atr: 0.5,
            lookahead_bars: 3,
            max_age_bars: 48,
            max_concurrent_per_side: 2,
        }
    }
}

impl ZoneRejectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.touch_atr_buffer >= 0.0,
            "detectors.zone_rejection.touch_atr_buffer",
            ">= 0",
            self.touch_atr_buffer,
        )?;
        check(
            self.min_reaction_body_atr >= 0.0,
            "detectors.zone_rejection.min_reaction_body_atr",
            ">= 0",
            self.min_reaction_body_atr,
        )?;
        check(
            self.min_follow_through_atr >= 0.0,
            "detectors.zone_rejection.min_follow_through_atr",
            ">= 0",
            self.min_follow_through_atr,
        )?;
        check(
            self.lookahead_bars >= 1,
            "detectors.zone_rejection.lookahead_bars",
            ">= 1",
            self.lookahead_bars as f64,
        )?;
        check_lifecycle(
            "detectors.zone_rejection.max_age_bars",
            self.max_age_bars,
            "detectors.zone_rejection.max_concurrent_per_side",
            self.max_concurrent_per_side,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngulfingConfig {
    pub enabled: bool,
    pub min_body_atr: f64,
    pub min_body_to_range: f64,
    /// Align the candle with the long EMA for a quality bonus.
    pub use_trend_filter: bool,
    /// Live same-side structural break grants a quality bonus.
    pub use_break_confirmation: bool,
    /// Live same-side zone within this many ATRs grants a quality bonus;
    /// 0 disables the gate.
    pub zone_proximity_atr: f64,
    pub max_age_bars: usize,
    pub max_concurrent_per_side: usize,
}

impl Default for EngulfingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_body_atr: 0.5,
            min_body_to_range: 0.6,
            use_trend_filter: true,
            use_break_confirmation: true,
            zone_proximity_atr: 1.5,
            max_age_bars: 48,
            max_concurrent_per_side: 2,
        }
    }
}

impl EngulfingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.min_body_atr >= 0.0,
            "detectors.engulfing.min_body_atr",
            ">= 0",
            self.min_body_atr,
        )?;
        check(
            (0.0..=1.0).contains(&self.min_body_to_range),
            "detectors.engulfing.min_body_to_range",
            "within 0..=1",
            self.min_body_to_range,
        )?;
        check(
            self.zone_proximity_atr >= 0.0,
            "detectors.engulfing.zone_proximity_atr",
            ">= 0",
            self.zone_proximity_atr,
        )?;
        check_lifecycle(
            "detectors.engulfing.max_age_bars",
            self.max_age_bars,
            "detectors.engulfing.max_concurrent_per_side",
            self.max_concurrent_per_side,
        )
    }
}

fn check_lifecycle(
    age_field: &'static str,
    max_age_bars: usize,
    cap_field: &'static str,
    cap: usize,
) -> Result<(), ConfigError> {
    check(max_age_bars >= 1, age_field, ">= 1", max_age_bars as f64)?;
    check(cap >= 1, cap_field, ">= 1", cap as f64)
}

// -----------------------------------------------------------------------
// Scorer
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScorerConfig {
    pub weights: ScorerWeights,
    /// EMA slope bonus saturates at this many ATRs per bar.
    pub ema_slope_cap_atr: f64,
    /// Proximity decays to zero at this distance (ATRs) from the zone.
    pub proximity_max_atr: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScorerWeights::default(),
            ema_slope_cap_atr: 0.5,
            proximity_max_atr: 3.0,
        }
    }
}

impl ScorerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("scorer.weights.structure_quality", self.weights.structure_quality),
            ("scorer.weights.uzr_strength", self.weights.uzr_strength),
            ("scorer.weights.ema_alignment", self.weights.ema_alignment),
            ("scorer.weights.zone_proximity", self.weights.zone_proximity),
        ] {
            check((0.0..=1.0).contains(&w), name, "within 0..=1", w)?;
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum { sum });
        }
        check(
            self.ema_slope_cap_atr >= 0.0,
            "scorer.ema_slope_cap_atr",
            ">= 0",
            self.ema_slope_cap_atr,
        )?;
        check(
            self.proximity_max_atr > 0.0,
            "scorer.proximity_max_atr",
            "> 0",
            self.proximity_max_atr,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScorerWeights {
    pub structure_quality: f64,
    pub uzr_strength: f64,
    pub ema_alignment: f64,
    pub zone_proximity: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            structure_quality: 0.40,
            uzr_strength: 0.25,
            ema_alignment: 0.20,
            zone_proximity: 0.15,
        }
    }
}

impl ScorerWeights {
    pub fn sum(&self) -> f64 {
        self.structure_quality + self.uzr_strength + self.ema_alignment + self.zone_proximity
    }
}

// -----------------------------------------------------------------------
// Rule tables
// -----------------------------------------------------------------------

/// Nested (timeframe, class, session) rule table with per-level defaults.
/// Lookup walks from the root default down; the most specific entry wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleTable {
    pub default: f64,
    #[serde(default)]
    pub timeframes: BTreeMap<Timeframe, TimeframeRules>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeframeRules {
    #[serde(default)]
    pub default: Option<f64>,
    #[serde(default)]
    pub classes: BTreeMap<InstrumentClass, ClassRules>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassRules {
    #[serde(default)]
    pub default: Option<f64>,
    #[serde(default)]
    pub sessions: BTreeMap<Session, f64>,
}

impl RuleTable {
    pub fn new(default: f64) -> Self {
        Self { default, timeframes: BTreeMap::new() }
    }

    pub fn lookup(&self, timeframe: Timeframe, class: InstrumentClass, session: Session) -> f64 {
        let mut value = self.default;
        let Some(tf) = self.timeframes.get(&timeframe) else {
            return value;
        };
        if let Some(v) = tf.default {
            value = v;
        }
        let Some(cls) = tf.classes.get(&class) else {
            return value;
        };
        if let Some(v) = cls.default {
            value = v;
        }
        if let Some(v) = cls.sessions.get(&session) {
            value = *v;
        }
        value
    }

    /// Every value in the table, for range validation.
    fn values(&self) -> Vec<f64> {
        let mut out = vec![self.default];
        for tf in self.timeframes.values() {
            out.extend(tf.default);
            for cls in tf.classes.values() {
                out.extend(cls.default);
                out.extend(cls.sessions.values().copied());
            }
        }
        out
    }
}

// -----------------------------------------------------------------------
// Exits
// -----------------------------------------------------------------------

/// Where exit geometry may come from, in configured priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitSource {
    Displacement,
    Imbalance,
    StructuralBreak,
    LiquiditySweep,
    ZoneRejection,
    Engulfing,
    AtrFallback,
}

impl ExitSource {
    /// The structure kind this source reads, None for the ATR fallback.
    pub fn structure_kind(self) -> Option<StructureKind> {
        match self {
            ExitSource::Displacement => Some(StructureKind::Displacement),
            ExitSource::Imbalance => Some(StructureKind::Imbalance),
            ExitSource::StructuralBreak => Some(StructureKind::StructuralBreak),
            ExitSource::LiquiditySweep => Some(StructureKind::LiquiditySweep),
            ExitSource::ZoneRejection => Some(StructureKind::ZoneRejection),
            ExitSource::Engulfing => Some(StructureKind::Engulfing),
            ExitSource::AtrFallback => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitSource::Displacement => "DISPLACEMENT",
            ExitSource::Imbalance => "IMBALANCE",
            ExitSource::StructuralBreak => "STRUCTURAL_BREAK",
            ExitSource::LiquiditySweep => "LIQUIDITY_SWEEP",
            ExitSource::ZoneRejection => "ZONE_REJECTION",
            ExitSource::Engulfing => "ENGULFING",
            ExitSource::AtrFallback => "ATR_FALLBACK",
        }
    }
}

impl std::fmt::Display for ExitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExitConfig {
    pub priority: Vec<ExitSource>,
    /// Stop buffer beyond a zone's far edge, in ATR units.
    pub sl_atr_buffer: f64,
    /// Full stop distance for the ATR fallback source, in ATR units.
    pub fallback_sl_atr: f64,
    pub tp_atr_extension: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            priority: vec![
                ExitSource::Displacement,
                ExitSource::Imbalance,
                ExitSource::AtrFallback,
                ExitSource::ZoneRejection,
            ],
            sl_atr_buffer: 0.5,
            fallback_sl_atr: 1.0,
            tp_atr_extension: 2.0,
        }
    }
}

impl ExitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.priority.is_empty() {
            return Err(ConfigError::EmptyExitPriority);
        }
        for (i, source) in self.priority.iter().enumerate() {
            if self.priority[..i].contains(source) {
                return Err(ConfigError::DuplicateExitSource(*source));
            }
        }
        check(self.sl_atr_buffer >= 0.0, "exits.sl_atr_buffer", ">= 0", self.sl_atr_buffer)?;
        check(self.fallback_sl_atr > 0.0, "exits.fallback_sl_atr", "> 0", self.fallback_sl_atr)?;
        check(self.tp_atr_extension > 0.0, "exits.tp_atr_extension", "> 0", self.tp_atr_extension)
    }
}

// -----------------------------------------------------------------------
// Sizing
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SizingConfig {
    /// Equity percentage risked per trade (1.0 = 1%).
    pub risk_per_trade_pct: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self { risk_per_trade_pct: 1.0 }
    }
}

impl SizingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.risk_per_trade_pct > 0.0 && self.risk_per_trade_pct <= 100.0,
            "sizing.risk_per_trade_pct",
            "within (0, 100]",
            self.risk_per_trade_pct,
        )
    }
}

// -----------------------------------------------------------------------
// Guards
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardsConfig {
    pub stop_level: StopLevelConfig,
    pub margin: MarginConfig,
    pub rescale: RescaleConfig,
}

impl GuardsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check(
            self.stop_level.spread_buffer_multiplier >= 0.0,
            "guards.stop_level.spread_buffer_multiplier",
            ">= 0",
            self.stop_level.spread_buffer_multiplier,
        )?;
        check(
            self.margin.min_margin_level_pct >= 0.0,
            "guards.margin.min_margin_level_pct",
            ">= 0",
            self.margin.min_margin_level_pct,
        )?;
        check(
            self.margin.max_free_margin_fraction > 0.0
                && self.margin.max_free_margin_fraction <= 1.0,
            "guards.margin.max_free_margin_fraction",
            "within (0, 1]",
            self.margin.max_free_margin_fraction,
        )?;
        check(
            self.margin.max_open_risk_fraction > 0.0 && self.margin.max_open_risk_fraction <= 1.0,
            "guards.margin.max_open_risk_fraction",
            "within (0, 1]",
            self.margin.max_open_risk_fraction,
        )?;
        if self.rescale.enabled {
            let seq = &self.rescale.widening_multipliers;
            let increasing = seq.windows(2).all(|w| w[0] < w[1]);
            if seq.is_empty() || !increasing || seq.iter().any(|m| *m <= 1.0) {
                return Err(ConfigError::RescaleSequence);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StopLevelConfig {
    pub enabled: bool,
    /// Spread padding on top of the broker stops level.
    pub spread_buffer_multiplier: f64,
}

impl Default for StopLevelConfig {
    fn default() -> Self {
        Self { enabled: true, spread_buffer_multiplier: 1.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarginConfig {
    pub enabled: bool,
    pub min_margin_level_pct: f64,
    pub max_free_margin_fraction: f64,
    pub max_open_risk_fraction: f64,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_margin_level_pct: 200.0,
            max_free_margin_fraction: 0.25,
            max_open_risk_fraction: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RescaleConfig {
    pub enabled: bool,
    /// Stop-widening sequence tried in order after a levels rejection.
    pub widening_multipliers: Vec<f64>,
}

impl Default for RescaleConfig {
    fn default() -> Self {
        Self { enabled: true, widening_multipliers: vec![1.2, 1.5, 2.0] }
    }
}
