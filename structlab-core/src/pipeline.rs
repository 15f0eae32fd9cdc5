//! The per-bar decision pipeline.
//!
//! One pipeline owns the full chain for one symbol/timeframe stream:
//! detector passes (sequential, single-writer over their states) →
//! manager snapshot → composite gate → exit planning → pre-sizing guard
//! (with bounded stop rescaling) → sizing → post-sizing guard → decision.
//!
//! Every non-decision leaves an explicit [`RejectionRecord`] naming the
//! stage that stopped it. Identical bars and config always produce
//! identical outcomes; nothing here reads the clock or any RNG.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CoreConfig, RuleTable};
use crate::detect::{build_detectors, Detector, DetectorState};
use crate::domain::{
    AccountState, Bar, Decision, DecisionMetadata, SessionContext, Side, Structure,
    StructureKind, SymbolSpec,
};
use crate::exits::ExitPlanner;
use crate::guards::{
    required_stop_points, ExecutionGuards, GuardStage, OrderCheck, RescalePolicy,
};
use crate::indicators::IndicatorValues;
use crate::manager::StructureManager;
use crate::scorer::{CompositeResult, CompositeScorer};
use crate::sizing::PositionSizer;

/// Which stage stopped a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionStage {
    Gate,
    Exit,
    Sizing,
    Guard,
}

impl std::fmt::Display for RejectionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionStage::Gate => "GATE",
            RejectionStage::Exit => "EXIT",
            RejectionStage::Sizing => "SIZING",
            RejectionStage::Guard => "GUARD",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub stage: RejectionStage,
    pub reason: String,
}

/// Everything one bar produced. `decision` and `rejection` are mutually
/// exclusive; both None means the gate never saw a candidate worth
/// planning (cannot happen: a failed gate is itself recorded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarOutcome {
    pub composite: CompositeResult,
    pub decision: Option<Decision>,
    pub rejection: Option<RejectionRecord>,
}

pub struct DecisionPipeline {
    detectors: Vec<Detector>,
    states: Vec<DetectorState>,
    manager: StructureManager,
    scorer: CompositeScorer,
    planner: ExitPlanner,
    sizer: PositionSizer,
    guards: ExecutionGuards,
    rescale: RescalePolicy,
    min_rr: RuleTable,
    spread_buffer_multiplier: f64,
    warmup: usize,
}

impl DecisionPipeline {
    pub fn new(config: &CoreConfig) -> Self {
        let detectors = build_detectors(config);
        let states = detectors.iter().map(|_| DetectorState::new()).collect();
        let warmup = detectors.iter().map(Detector::warmup_bars).max().unwrap_or(0);
        Self {
            detectors,
            states,
            manager: StructureManager::new(config.detectors.priority.clone()),
            scorer: CompositeScorer::new(config),
            planner: ExitPlanner::new(config),
            sizer: PositionSizer::new(config),
            guards: ExecutionGuards::new(config),
            rescale: RescalePolicy::new(config),
            min_rr: config.min_rr.clone(),
            spread_buffer_multiplier: config.guards.stop_level.spread_buffer_multiplier,
            warmup,
        }
    }

    /// Bars before any detector can produce a candidate.
    pub fn warmup_bars(&self) -> usize {
        self.warmup
    }

    /// Current aggregated snapshot (after the last processed bar).
    pub fn structures(&self) -> &[Structure] {
        self.manager.snapshot()
    }

    /// Run the full chain over one bar. Bars must be fed in order; the
    /// detector states depend on the immediately preceding pass.
    pub fn process_bar(
        &mut self,
        bars: &[Bar],
        bar_index: usize,
        indicators: &IndicatorValues,
        session: &SessionContext,
        account: &AccountState,
        spec: &SymbolSpec,
    ) -> BarOutcome {
        // Detectors see the previous bar's aggregated snapshot; the
        // unified rejection detector reacts to other detectors' zones.
        let prior_zones: Vec<Structure> = self.manager.snapshot().to_vec();
        let mut rejection_ctx = None;
        for (detector, state) in self.detectors.iter().zip(self.states.iter_mut()) {
            let pass = detector.detect(bars, bar_index, indicators, &prior_zones, state);
            if pass.rejection.is_some() {
                rejection_ctx = pass.rejection;
            }
        }

        let pairs: Vec<(StructureKind, &DetectorState)> = self
            .detectors
            .iter()
            .map(Detector::kind)
            .zip(self.states.iter())
            .collect();
        self.manager.rebuild(&pairs);

        let composite = self.scorer.compute(
            bars,
            bar_index,
            &self.manager,
            rejection_ctx.as_ref(),
            indicators,
            session,
        );
        if !composite.passed_gate {
            let reason = composite.gate_reasons.join("; ");
            return rejected(composite, RejectionStage::Gate, reason);
        }

        let Some(lead) = self.manager.lead() else {
            // The gate requires a live structure, so this cannot happen;
            // kept explicit rather than unwrapped.
            return rejected(
                composite,
                RejectionStage::Gate,
                "no active structures".to_string(),
            );
        };
        let side = lead.side;
        let lead_id = lead.id.clone();

        let min_rr = self.min_rr.lookup(session.timeframe, session.class, session.session);
        let mut plan = match self
            .planner
            .plan(bars, bar_index, side, &self.manager, indicators, spec, min_rr)
        {
            Ok(plan) => plan,
            Err(err) => return rejected(composite, RejectionStage::Exit, err.to_string()),
        };

        let bar = &bars[bar_index];
        let entry = bar.close;
        let mut stop_points = spec.to_points((entry - plan.sl_final).abs());
        let target_points = spec.to_points((plan.tp_final - entry).abs());

        let pre = OrderCheck { spec, account, stop_points, target_points, size: None };
        if let Some(guard_rejection) = self.guards.check(GuardStage::PreSizing, &pre) {
            let required = required_stop_points(spec, self.spread_buffer_multiplier);
            // Only a too-tight stop is rescuable by widening; a too-tight
            // target or any other guard verdict is terminal.
            if guard_rejection.guard != "stop_level" || target_points < required {
                let reason = format!("{}: {}", guard_rejection.guard, guard_rejection.reason);
                return rejected(composite, RejectionStage::Guard, reason);
            }
            match self.rescale.rescale(stop_points, target_points, required, min_rr) {
                Ok(attempt) => {
                    stop_points = attempt.stop_points;
                    let widened = spec.to_price(stop_points);
                    plan.sl_final = match side {
                        Side::Bullish => entry - widened,
                        Side::Bearish => entry + widened,
                    };
                    plan.clamped = true;
                    plan.computed_rr = attempt.computed_rr;
                    info!(
                        symbol = %bar.symbol,
                        bar_index,
                        attempt = attempt.attempt,
                        multiplier = attempt.multiplier,
                        "stop rescaled after levels rejection"
                    );
                }
                Err(err) => {
                    let reason = format!(
                        "{}: {} ({})",
                        guard_rejection.guard, guard_rejection.reason, err
                    );
                    return rejected(composite, RejectionStage::Guard, reason);
                }
            }
        }

        let size = match self.sizer.size(account, spec, spec.to_price(stop_points)) {
            Ok(size) => size,
            Err(err) => return rejected(composite, RejectionStage::Sizing, err.to_string()),
        };

        let post = OrderCheck { spec, account, stop_points, target_points, size: Some(size) };
        if let Some(guard_rejection) = self.guards.check(GuardStage::PostSizing, &post) {
            let reason = format!("{}: {}", guard_rejection.guard, guard_rejection.reason);
            return rejected(composite, RejectionStage::Guard, reason);
        }

        let decision = Decision {
            symbol: bar.symbol.clone(),
            timeframe: bar.timeframe,
            bar_index,
            side,
            entry,
            stop_loss: plan.sl_final,
            take_profit: plan.tp_final,
            size,
            computed_rr: plan.computed_rr,
            metadata: DecisionMetadata {
                composite_tech_score: composite.composite_tech_score,
                component_breakdown: composite.component_breakdown.clone(),
                gate_reasons: composite.gate_reasons.clone(),
                exit_method: plan.exit_method,
                clamped: plan.clamped,
                session: session.session,
                lead_structure: Some(lead_id),
            },
        };
        info!(
            symbol = %bar.symbol,
            bar_index,
            side = %side,
            entry,
            stop_loss = decision.stop_loss,
            take_profit = decision.take_profit,
            size,
            computed_rr = decision.computed_rr,
            method = %decision.metadata.exit_method,
            "decision"
        );
        BarOutcome { composite, decision: Some(decision), rejection: None }
    }
}

fn rejected(composite: CompositeResult, stage: RejectionStage, reason: String) -> BarOutcome {
    debug!(stage = %stage, reason = reason.as_str(), "candidate rejected");
    BarOutcome {
        composite,
        decision: None,
        rejection: Some(RejectionRecord { stage, reason }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExitMethod, InstrumentClass, Session, Timeframe};
    use crate::indicators::make_ohlc_bars;

    const EPS: f64 = 1e-9;

    /// Displacement-only pipeline with relaxed gate and RR bars.
    fn pipeline_config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.detectors.priority = vec![StructureKind::Displacement];
        config.detectors.displacement.excess_beyond_swing_atr = 0.5;
        config.detectors.displacement.mid_band_atr = 0.4;
        config.detectors.displacement.swing_lookback = 3;
        config.thresholds = RuleTable::new(0.30);
        config.min_rr = RuleTable::new(0.1);
        config
    }

    fn session() -> SessionContext {
        SessionContext::new(Session::London, InstrumentClass::Forex, Timeframe::H1)
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

    fn loose_spec() -> SymbolSpec {
        SymbolSpec {
            symbol: "TEST".into(),
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

    /// Four quiet bars, then a breakout candle at index 4.
    fn breakout_bars() -> Vec<Bar> {
        make_ohlc_bars(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 103.2, 99.8, 103.0),
        ])
    }

    fn indicators(n: usize) -> IndicatorValues {
        let mut ind = IndicatorValues::new();
        ind.insert("atr_14", vec![1.0; n]);
        ind.insert("ema_8", vec![101.0; n]);
        ind.insert("ema_21", vec![100.5; n]);
        ind.insert("ema_50", vec![100.0; n]);
        ind
    }

    #[test]
    fn quiet_bar_fails_the_gate_with_a_record() {
        let mut pipeline = DecisionPipeline::new(&pipeline_config());
        let bars = breakout_bars();
        let ind = indicators(bars.len());
        let outcome = pipeline.process_bar(&bars, 0, &ind, &session(), &account(), &loose_spec());

        assert!(outcome.decision.is_none());
        let rejection = outcome.rejection.unwrap();
        assert_eq!(rejection.stage, RejectionStage::Gate);
        assert!(rejection.reason.contains("no active structures"));
        assert_eq!(outcome.composite.composite_tech_score, 0.0);
    }

    #[test]
    fn breakout_bar_produces_a_decision() {
        let mut pipeline = DecisionPipeline::new(&pipeline_config());
        let bars = breakout_bars();
        let ind = indicators(bars.len());
        let session = session();
        let account = account();
        let spec = loose_spec();

        for i in 0..4 {
            let outcome = pipeline.process_bar(&bars, i, &ind, &session, &account, &spec);
            assert!(outcome.decision.is_none());
        }

        let outcome = pipeline.process_bar(&bars, 4, &ind, &session, &account, &spec);
        assert!(outcome.rejection.is_none());
        let decision = outcome.decision.unwrap();
        assert_eq!(decision.side, Side::Bullish);
        assert!((decision.entry - 103.0).abs() < EPS);
        // Zone low 99.8 minus the 0.5 ATR buffer.
        assert!((decision.stop_loss - 99.3).abs() < EPS);
        // No opposing structure: 2 ATR extension above the entry.
        assert!((decision.take_profit - 105.0).abs() < EPS);
        // 1% of 10k over 370 points at 1.0/point, floored to the step.
        assert!((decision.size - 0.27).abs() < EPS);
        assert_eq!(decision.metadata.exit_method, ExitMethod::Structure(StructureKind::Displacement));
        assert!(!decision.metadata.clamped);
        assert!(decision.metadata.lead_structure.is_some());
        assert_eq!(pipeline.structures().len(), 1);
    }

    #[test]
    fn high_min_rr_rejects_at_the_exit_stage() {
        let mut config = pipeline_config();
        config.min_rr = RuleTable::new(1.5);
        let mut pipeline = DecisionPipeline::new(&config);
        let bars = breakout_bars();
        let ind = indicators(bars.len());
        let session = session();
        let account = account();
        let spec = loose_spec();

        for i in 0..4 {
            pipeline.process_bar(&bars, i, &ind, &session, &account, &spec);
        }
        let outcome = pipeline.process_bar(&bars, 4, &ind, &session, &account, &spec);
        assert!(outcome.decision.is_none());
        let rejection = outcome.rejection.unwrap();
        assert_eq!(rejection.stage, RejectionStage::Exit);
        assert!(rejection.reason.contains("min_rr 1.50"));
    }

    #[test]
    fn warmup_reflects_the_slowest_detector() {
        let pipeline = DecisionPipeline::new(&pipeline_config());
        assert_eq!(pipeline.warmup_bars(), 3);
    }
}
