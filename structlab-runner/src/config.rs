//! Replay run configuration.
//!
//! One TOML document describes a replay: where the bar CSVs live, the
//! instruments to run with their broker specs, the account snapshot the
//! guards see, and the core configuration. The core section can be
//! embedded inline under `[core]`, referenced by path via
//! `replay.core_config`, or left out entirely to run on defaults.
//!
//! `run_id` is a content-addressable BLAKE3 hash over the whole document
//! plus the resolved core config, so two runs with the same id are
//! guaranteed the same inputs end to end.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use structlab_core::config::{ConfigError as CoreConfigError, CoreConfig};
use structlab_core::domain::{AccountState, InstrumentClass, SymbolSpec, Timeframe};

/// Unique identifier for a replay run (content-addressable hash).
pub type RunId = String;

/// Errors from parsing or validating a replay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("core config error: {0}")]
    Core(#[from] CoreConfigError),

    #[error("cannot read core config '{}': {source}", path.display())]
    CoreConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("both an inline [core] table and core_config = '{}' are set", path.display())]
    AmbiguousCore { path: PathBuf },

    #[error("no instruments configured")]
    NoInstruments,

    #[error("instrument '{0}' configured twice")]
    DuplicateInstrument(String),

    #[error("instrument '{symbol}': {field} must be {requirement}, got {value}")]
    InvalidSpec { symbol: String, field: &'static str, requirement: &'static str, value: f64 },

    #[error("account {field} must be {requirement}, got {value}")]
    InvalidAccount { field: &'static str, requirement: &'static str, value: f64 },
}

/// Top-level replay document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    #[serde(default)]
    pub replay: ReplaySettings,

    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,

    /// Inline core configuration. Mutually exclusive with
    /// `replay.core_config`.
    #[serde(default)]
    pub core: Option<CoreConfig>,
}

impl ReplayConfig {
    /// Parse and validate a TOML document. The core section (inline or
    /// referenced) is resolved separately by [`ReplayConfig::resolve_core`]
    /// because the referenced form needs file access.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ReplayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::NoInstruments);
        }
        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            if !seen.insert(instrument.symbol.as_str()) {
                return Err(ConfigError::DuplicateInstrument(instrument.symbol.clone()));
            }
            instrument.validate()?;
        }
        self.account.validate()?;
        if let (Some(_), Some(path)) = (&self.core, &self.replay.core_config) {
            return Err(ConfigError::AmbiguousCore { path: path.clone() });
        }
        Ok(())
    }

    /// Resolve the core configuration: inline `[core]` first, then the
    /// `core_config` path relative to `base_dir`, else defaults. Whatever
    /// the source, the result is validated before use.
    pub fn resolve_core(&self, base_dir: &Path) -> Result<CoreConfig, ConfigError> {
        if let Some(core) = &self.core {
            core.validate()?;
            return Ok(core.clone());
        }
        if let Some(path) = &self.replay.core_config {
            let full = base_dir.join(path);
            let text = fs::read_to_string(&full)
                .map_err(|source| ConfigError::CoreConfigIo { path: full.clone(), source })?;
            return Ok(CoreConfig::from_toml_str(&text)?);
        }
        Ok(CoreConfig::default())
    }

    /// Deterministic identity of this run: the replay document plus the
    /// resolved core config.
    pub fn run_id(&self, core: &CoreConfig) -> RunId {
        let json = serde_json::to_string(self).expect("ReplayConfig serialization failed");
        let mut hasher = blake3::Hasher::new();
        hasher.update(json.as_bytes());
        hasher.update(core.config_hash().0.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Where the bars live and how they are framed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplaySettings {
    /// Directory holding one CSV per instrument, relative to the config.
    pub csv_dir: PathBuf,
    pub timeframe: Timeframe,
    /// Path to a standalone core config TOML, relative to the config.
    pub core_config: Option<PathBuf>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self { csv_dir: PathBuf::from("data"), timeframe: Timeframe::H1, core_config: None }
    }
}

/// Account snapshot the sizing and margin guards evaluate against.
/// Replays start flat, so there are no open positions to declare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccountConfig {
    pub equity: f64,
    pub balance: f64,
    pub free_margin: f64,
    pub margin_level_pct: Option<f64>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            equity: 10_000.0,
            balance: 10_000.0,
            free_margin: 10_000.0,
            margin_level_pct: None,
        }
    }
}

impl AccountConfig {
    pub fn to_account_state(&self) -> AccountState {
        AccountState {
            equity: self.equity,
            balance: self.balance,
            free_margin: self.free_margin,
            margin_level_pct: self.margin_level_pct,
            open_positions: vec![],
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        account_check(self.equity > 0.0, "equity", "> 0", self.equity)?;
        account_check(self.balance > 0.0, "balance", "> 0", self.balance)?;
        account_check(self.free_margin >= 0.0, "free_margin", ">= 0", self.free_margin)?;
        if let Some(level) = self.margin_level_pct {
            account_check(level >= 0.0, "margin_level_pct", ">= 0", level)?;
        }
        Ok(())
    }
}

fn account_check(
    ok: bool,
    field: &'static str,
    requirement: &'static str,
    value: f64,
) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidAccount { field, requirement, value })
    }
}

/// One instrument: its CSV file and the broker spec the guards need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub class: InstrumentClass,

    /// CSV file under `csv_dir`. Defaults to `<symbol>.csv` lowercased.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Minimum price increment (one point).
    pub point: f64,

    #[serde(default)]
    pub stops_level_points: f64,
    #[serde(default)]
    pub spread_points: f64,
    #[serde(default)]
    pub max_stop_points: Option<f64>,

    #[serde(default = "default_volume_min")]
    pub volume_min: f64,
    #[serde(default = "default_volume_max")]
    pub volume_max: f64,
    #[serde(default = "default_volume_step")]
    pub volume_step: f64,

    #[serde(default = "default_tick_value")]
    pub tick_value: f64,
    #[serde(default)]
    pub margin_per_lot: f64,
}

fn default_volume_min() -> f64 {
    0.01
}

fn default_volume_max() -> f64 {
    100.0
}

fn default_volume_step() -> f64 {
    0.01
}

fn default_tick_value() -> f64 {
    1.0
}

impl InstrumentConfig {
    pub fn spec(&self) -> SymbolSpec {
        SymbolSpec {
            symbol: self.symbol.clone(),
            class: self.class,
            point: self.point,
            stops_level_points: self.stops_level_points,
            spread_points: self.spread_points,
            max_stop_points: self.max_stop_points,
            volume_min: self.volume_min,
            volume_max: self.volume_max,
            volume_step: self.volume_step,
            tick_value: self.tick_value,
            margin_per_lot: self.margin_per_lot,
        }
    }

    /// File name under `csv_dir`.
    pub fn csv_file(&self) -> PathBuf {
        match &self.file {
            Some(file) => file.clone(),
            None => PathBuf::from(format!("{}.csv", self.symbol.to_lowercase())),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.spec_check(self.point > 0.0, "point", "> 0", self.point)?;
        self.spec_check(
            self.stops_level_points >= 0.0,
            "stops_level_points",
            ">= 0",
            self.stops_level_points,
        )?;
        self.spec_check(
            self.spread_points >= 0.0,
            "spread_points",
            ">= 0",
            self.spread_points,
        )?;
        if let Some(max) = self.max_stop_points {
            self.spec_check(
                max > self.stops_level_points,
                "max_stop_points",
                "> stops_level_points",
                max,
            )?;
        }
        self.spec_check(self.volume_min > 0.0, "volume_min", "> 0", self.volume_min)?;
        self.spec_check(
            self.volume_max >= self.volume_min,
            "volume_max",
            ">= volume_min",
            self.volume_max,
        )?;
        self.spec_check(self.volume_step > 0.0, "volume_step", "> 0", self.volume_step)?;
        self.spec_check(self.tick_value > 0.0, "tick_value", "> 0", self.tick_value)?;
        self.spec_check(
            self.margin_per_lot >= 0.0,
            "margin_per_lot",
            ">= 0",
            self.margin_per_lot,
        )?;
        Ok(())
    }

    fn spec_check(
        &self,
        ok: bool,
        field: &'static str,
        requirement: &'static str,
        value: f64,
    ) -> Result<(), ConfigError> {
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidSpec {
                symbol: self.symbol.clone(),
                field,
                requirement,
                value,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[instruments]]
symbol = "EURUSD"
class = "FOREX"
point = 0.0001
"#;

    #[test]
    fn minimal_document_fills_defaults() {
        let config = ReplayConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.replay.csv_dir, PathBuf::from("data"));
        assert_eq!(config.replay.timeframe, Timeframe::H1);
        assert_eq!(config.instruments.len(), 1);
        let spec = config.instruments[0].spec();
        assert_eq!(spec.symbol, "EURUSD");
        assert!((spec.volume_min - 0.01).abs() < 1e-12);
        assert!((spec.tick_value - 1.0).abs() < 1e-12);
        assert_eq!(
            config.instruments[0].csv_file(),
            PathBuf::from("eurusd.csv")
        );
        assert!((config.account.equity - 10_000.0).abs() < 1e-12);
    }

    #[test]
    fn empty_document_is_rejected() {
        let err = ReplayConfig::from_toml("").unwrap_err();
        assert!(matches!(err, ConfigError::NoInstruments));
    }

    #[test]
    fn duplicate_instrument_is_rejected() {
        let text = r#"
[[instruments]]
symbol = "EURUSD"
class = "FOREX"
point = 0.0001

[[instruments]]
symbol = "EURUSD"
class = "FOREX"
point = 0.0001
"#;
        let err = ReplayConfig::from_toml(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateInstrument(s) if s == "EURUSD"));
    }

    #[test]
    fn negative_point_is_rejected() {
        let text = r#"
[[instruments]]
symbol = "EURUSD"
class = "FOREX"
point = -0.0001
"#;
        let err = ReplayConfig::from_toml(text).unwrap_err();
        assert!(err.to_string().contains("point"));
    }

    #[test]
    fn inline_core_and_path_conflict() {
        let text = r#"
[replay]
core_config = "core.toml"

[core.thresholds]
default = 0.4

[[instruments]]
symbol = "EURUSD"
class = "FOREX"
point = 0.0001
"#;
        let err = ReplayConfig::from_toml(text).unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousCore { .. }));
    }

    #[test]
    fn inline_core_is_resolved_and_validated() {
        let text = r#"
[core.thresholds]
default = 0.4

[[instruments]]
symbol = "EURUSD"
class = "FOREX"
point = 0.0001
"#;
        let config = ReplayConfig::from_toml(text).unwrap();
        let core = config.resolve_core(Path::new(".")).unwrap();
        assert!((core.thresholds.default - 0.4).abs() < 1e-12);
    }

    #[test]
    fn missing_core_section_falls_back_to_defaults() {
        let config = ReplayConfig::from_toml(MINIMAL).unwrap();
        let core = config.resolve_core(Path::new(".")).unwrap();
        assert_eq!(core, CoreConfig::default());
    }

    #[test]
    fn run_id_is_deterministic_and_content_sensitive() {
        let config = ReplayConfig::from_toml(MINIMAL).unwrap();
        let core = CoreConfig::default();
        let id1 = config.run_id(&core);
        let id2 = config.run_id(&core);
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 64);

        let mut other_core = CoreConfig::default();
        other_core.thresholds.default = 0.99;
        assert_ne!(id1, config.run_id(&other_core));

        let mut other = config.clone();
        other.account.equity = 20_000.0;
        assert_ne!(id1, other.run_id(&core));
    }
}
