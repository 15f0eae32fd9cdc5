//! Replay determinism over a synthetic multi-regime series.
//!
//! Tests:
//! 1. Two fresh pipelines fed the same bars and config produce outcome
//!    sequences that compare equal and serialize to identical bytes
//! 2. Structure identities are reproducible across runs
//! 3. Outcomes survive a serialize/deserialize round trip unchanged
//!
//! Indicators are computed from the bars themselves, so the whole chain
//! from raw OHLCV to decision is covered, not just the detectors.

use chrono::{DateTime, Duration, TimeZone, Utc};
use structlab_core::config::{CoreConfig, RuleTable};
use structlab_core::detect::required_indicators;
use structlab_core::domain::{
    AccountState, Bar, InstrumentClass, Session, SessionContext, StructureId, SymbolSpec,
    Timeframe,
};
use structlab_core::indicators::{precompute, IndicatorValues};
use structlab_core::pipeline::{BarOutcome, DecisionPipeline};

fn ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap() + Duration::hours(i as i64)
}

/// Blocks of ten quiet bars, one breakout, five quiet bars at the new
/// level. Every block steps the base price up 4.0, so each breakout
/// clears its local swing high by a wide margin once ATR has warmed up.
fn synthetic_bars(blocks: usize) -> Vec<Bar> {
    let mut rows: Vec<(f64, f64, f64, f64)> = Vec::with_capacity(blocks * 16);
    for j in 0..blocks {
        let base = 100.0 + 4.0 * j as f64;
        for _ in 0..10 {
            rows.push((base, base + 0.5, base - 0.5, base));
        }
        rows.push((base, base + 3.2, base - 0.2, base + 3.0));
        let top = base + 3.0;
        for _ in 0..5 {
            rows.push((top, top + 0.5, top - 0.5, top));
        }
    }
    rows.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Bar {
            symbol: "DET".into(),
            timeframe: Timeframe::H1,
            timestamp: ts(i),
            open,
            high,
            low,
            close,
            volume: 900 + (i as u64 % 11) * 37,
        })
        .collect()
}

fn config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.thresholds = RuleTable::new(0.30);
    config.min_rr = RuleTable::new(0.5);
    config
}

fn account() -> AccountState {
    AccountState {
        equity: 10_000.0,
        balance: 10_000.0,
        free_margin: 8_000.0,
        margin_level_pct: Some(450.0),
        open_positions: vec![],
    }
}

fn spec() -> SymbolSpec {
    SymbolSpec {
        symbol: "DET".into(),
        class: InstrumentClass::Forex,
        point: 0.01,
        stops_level_points: 0.0,
        spread_points: 0.0,
        max_stop_points: None,
        volume_min: 0.01,
        volume_max: 100.0,
        volume_step: 0.01,
        tick_value: 1.0,
        margin_per_lot: 100.0,
    }
}

/// One full replay from a fresh pipeline. Sessions come from the bar
/// timestamps, exactly as a runner would derive them.
fn replay(
    config: &CoreConfig,
    bars: &[Bar],
    ind: &IndicatorValues,
) -> (Vec<BarOutcome>, Vec<StructureId>) {
    let mut pipeline = DecisionPipeline::new(config);
    let account = account();
    let spec = spec();
    let outcomes = (0..bars.len())
        .map(|i| {
            let session = SessionContext::new(
                Session::from_timestamp(bars[i].timestamp),
                InstrumentClass::Forex,
                bars[i].timeframe,
            );
            pipeline.process_bar(bars, i, ind, &session, &account, &spec)
        })
        .collect();
    let ids = pipeline.structures().iter().map(|s| s.id.clone()).collect();
    (outcomes, ids)
}

#[test]
fn identical_runs_serialize_to_identical_bytes() {
    let config = config();
    let bars = synthetic_bars(6);
    let indicators = required_indicators(&config);
    let values = precompute(&bars, &indicators);

    let (outcomes_a, ids_a) = replay(&config, &bars, &values);
    let (outcomes_b, ids_b) = replay(&config, &bars, &values);

    assert_eq!(outcomes_a, outcomes_b);
    assert_eq!(ids_a, ids_b);

    let json_a = serde_json::to_string(&outcomes_a).unwrap();
    let json_b = serde_json::to_string(&outcomes_b).unwrap();
    assert_eq!(json_a, json_b);

    // The series must actually exercise the detectors: at least one bar
    // has to score against a live structure.
    assert!(
        outcomes_a.iter().any(|o| o.composite.composite_tech_score > 0.0),
        "no structure ever became active"
    );
}

#[test]
fn recomputing_indicators_does_not_change_the_replay() {
    let config = config();
    let bars = synthetic_bars(6);
    let values_a = precompute(&bars, &required_indicators(&config));
    let values_b = precompute(&bars, &required_indicators(&config));

    let (outcomes_a, _) = replay(&config, &bars, &values_a);
    let (outcomes_b, _) = replay(&config, &bars, &values_b);
    assert_eq!(outcomes_a, outcomes_b);
}

#[test]
fn outcomes_round_trip_through_json() {
    let config = config();
    let bars = synthetic_bars(4);
    let values = precompute(&bars, &required_indicators(&config));
    let (outcomes, _) = replay(&config, &bars, &values);

    let json = serde_json::to_string(&outcomes).unwrap();
    let parsed: Vec<BarOutcome> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, outcomes);
}
