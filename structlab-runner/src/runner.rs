//! Replay runner: wires config, bar loading, and the decision pipeline.
//!
//! Instruments replay independently (the core is per-symbol state), so the
//! runner fans them out across a rayon pool and reassembles the results in
//! sorted symbol order. The final [`ReplayResult`] carries a BLAKE3
//! fingerprint over the config hash and every accepted decision; two runs
//! with the same fingerprint made the same trades for the same reasons.

use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use structlab_core::config::CoreConfig;
use structlab_core::detect::required_indicators;
use structlab_core::domain::{AccountState, Decision, Session, SessionContext, Timeframe};
use structlab_core::indicators::precompute;
use structlab_core::pipeline::{BarOutcome, DecisionPipeline};

use crate::config::{ConfigError, InstrumentConfig, ReplayConfig, RunId};
use crate::data_loader::{load_bars, LoadError};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Replay of one instrument: every bar outcome, in bar order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolReplay {
    pub symbol: String,
    pub bar_count: usize,
    pub warmup_bars: usize,
    pub outcomes: Vec<BarOutcome>,
    pub decision_count: usize,
    /// Rejection counts keyed by stage name (GATE, EXIT, SIZING, GUARD).
    pub rejections_by_stage: BTreeMap<String, usize>,
}

impl SymbolReplay {
    /// Accepted decisions in bar order.
    pub fn decisions(&self) -> impl Iterator<Item = &Decision> {
        self.outcomes.iter().filter_map(|o| o.decision.as_ref())
    }
}

/// Complete result of a replay run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    /// Hash of the resolved core config.
    pub config_hash: String,
    /// BLAKE3 over the config hash plus every decision, in symbol order.
    pub fingerprint: String,
    /// Per-symbol replays, sorted by symbol.
    pub symbols: Vec<SymbolReplay>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Run the configured replay. CSV and core-config paths resolve relative
/// to `base_dir` (normally the directory the config file came from).
pub fn run_replay(config: &ReplayConfig, base_dir: &Path) -> Result<ReplayResult, RunError> {
    let core = config.resolve_core(base_dir)?;
    let account = config.account.to_account_state();
    let timeframe = config.replay.timeframe;
    let csv_dir = base_dir.join(&config.replay.csv_dir);

    let mut symbols = config
        .instruments
        .par_iter()
        .map(|instrument| replay_symbol(instrument, &csv_dir, timeframe, &core, &account))
        .collect::<Result<Vec<_>, RunError>>()?;
    symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let config_hash = core.config_hash().0;
    let fingerprint = stream_fingerprint(&config_hash, &symbols);
    let run_id = config.run_id(&core);

    info!(
        run_id = run_id.as_str(),
        symbols = symbols.len(),
        decisions = symbols.iter().map(|s| s.decision_count).sum::<usize>(),
        fingerprint = fingerprint.as_str(),
        "replay complete"
    );

    Ok(ReplayResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        config_hash,
        fingerprint,
        symbols,
    })
}

/// Replay one instrument end to end. Indicators are rebuilt per symbol;
/// precomputation is cheap next to the bar loop and keeps the worker
/// closure free of shared mutable state.
fn replay_symbol(
    instrument: &InstrumentConfig,
    csv_dir: &Path,
    timeframe: Timeframe,
    core: &CoreConfig,
    account: &AccountState,
) -> Result<SymbolReplay, RunError> {
    let path = csv_dir.join(instrument.csv_file());
    let bars = load_bars(&path, &instrument.symbol, timeframe)?;

    let indicators = required_indicators(core);
    let values = precompute(&bars, &indicators);

    let spec = instrument.spec();
    let mut pipeline = DecisionPipeline::new(core);
    let mut outcomes = Vec::with_capacity(bars.len());
    for (bar_index, bar) in bars.iter().enumerate() {
        let session = SessionContext::new(
            Session::from_timestamp(bar.timestamp),
            instrument.class,
            timeframe,
        );
        outcomes.push(pipeline.process_bar(&bars, bar_index, &values, &session, account, &spec));
    }

    let decision_count = outcomes.iter().filter(|o| o.decision.is_some()).count();
    let mut rejections_by_stage: BTreeMap<String, usize> = BTreeMap::new();
    for outcome in &outcomes {
        if let Some(rejection) = &outcome.rejection {
            *rejections_by_stage.entry(rejection.stage.to_string()).or_insert(0) += 1;
        }
    }

    info!(
        symbol = instrument.symbol.as_str(),
        bars = bars.len(),
        decisions = decision_count,
        "symbol replay complete"
    );

    Ok(SymbolReplay {
        symbol: instrument.symbol.clone(),
        bar_count: bars.len(),
        warmup_bars: pipeline.warmup_bars(),
        outcomes,
        decision_count,
        rejections_by_stage,
    })
}

/// Deterministic fingerprint over the decision stream.
///
/// Covers the core config hash, each symbol name, and the canonical JSON of
/// each accepted decision in bar order. Symbols are already sorted by the
/// caller, so parallel scheduling cannot reorder the stream.
fn stream_fingerprint(config_hash: &str, symbols: &[SymbolReplay]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(config_hash.as_bytes());
    for replay in symbols {
        hasher.update(replay.symbol.as_bytes());
        for decision in replay.decisions() {
            let json = serde_json::to_string(decision).expect("Decision serialization failed");
            hasher.update(json.as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}
