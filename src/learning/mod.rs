//! Learning state: the three managers loaded from the store at startup and
//! mutated only by the resolution feedback path.
//!
//! Routing invariant: calibration feeds on RAW probability/confidence,
//! market-type and signal-tracker feed on ADJUSTED values. The distinct
//! update signatures below are deliberate.

pub mod calibration;
pub mod market_type;
pub mod signal_tracker;

pub use calibration::{CalibrationBucket, CalibrationManager};
pub use market_type::{MarketTypeManager, MarketTypePerformance};
pub use signal_tracker::{SignalTrackerManager, TrackerCounts, TrackerKey};

use crate::models::TradeRecord;
use serde::{Deserialize, Serialize};

const CALIBRATION_DECAY_PER_DAY: f64 = 0.95;

/// The owned triple passed through the orchestrator (never an ambient global).
#[derive(Debug, Clone, Default)]
pub struct LearningState {
    pub calibration: CalibrationManager,
    pub market_types: MarketTypeManager,
    pub signals: SignalTrackerManager,
}

impl LearningState {
    pub fn new() -> Self {
        Self {
            calibration: CalibrationManager::new(),
            market_types: MarketTypeManager::new(),
            signals: SignalTrackerManager::new(),
        }
    }

    /// Fold one resolved, non-void record into all three layers. Persistence
    /// stays with the caller so it can batch this into one transaction.
    pub fn absorb_resolution(&mut self, record: &TradeRecord) {
        if record.voided {
            return;
        }
        // Observe-only records carry no LM prediction; they are audit rows,
        // not learning evidence.
        if record.skip_reason == Some(crate::models::SkipReason::DailyCapObserveOnly) {
            return;
        }
        let (Some(outcome), Some(resolved_at)) = (record.actual_outcome, record.resolved_at) else {
            return;
        };

        // Layer 1: calibration, raw prediction vs outcome, decay-weighted.
        let raw_correct = (record.raw_probability > 0.5) == (outcome >= 0.5);
        let days_since_entry =
            (resolved_at - record.created_at).num_seconds().max(0) as f64 / 86_400.0;
        let weight = CALIBRATION_DECAY_PER_DAY.powf(days_since_entry);
        self.calibration
            .update_raw(record.raw_confidence, raw_correct, weight);

        // Layer 2: market type, adjusted Brier plus realized/counterfactual pnl.
        let brier_adjusted = record
            .brier_adjusted
            .unwrap_or_else(|| (record.adjusted_probability - outcome).powi(2));
        let pnl = record.pnl.unwrap_or(0.0);
        let entry = self.market_types.entry(record.market_type);
        if record.is_executed() {
            entry.record_trade(brier_adjusted, pnl);
        } else {
            entry.record_skip(brier_adjusted, pnl);
        }

        // Layer 3: signal tracker, adjusted prediction's correctness.
        let adjusted_correct = (record.adjusted_probability > 0.5) == (outcome >= 0.5);
        self.signals
            .record_resolution(record.market_type, &record.signal_tags, adjusted_correct);
    }

    /// Model-swap semantics: calibration back to priors, market types
    /// dampened, signal trackers untouched.
    pub fn apply_model_swap(&mut self) {
        self.calibration.reset_to_priors();
        self.market_types.dampen_all();
    }

    /// Rebuild from scratch by replaying resolved non-void records in
    /// ascending resolution order. Used by void and recalculate_learning.
    pub fn rebuild(records: &[TradeRecord]) -> Self {
        let mut sorted: Vec<&TradeRecord> = records
            .iter()
            .filter(|r| !r.voided && r.resolved_at.is_some())
            .collect();
        sorted.sort_by(|a, b| {
            a.resolved_at
                .cmp(&b.resolved_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut state = LearningState::new();
        for record in sorted {
            state.absorb_resolution(record);
        }
        state
    }

    /// Deterministic, sorted projection for comparisons and debugging.
    pub fn snapshot(&self) -> LearningSnapshot {
        let buckets = self
            .calibration
            .buckets()
            .iter()
            .map(|b| (b.lo, b.alpha, b.beta))
            .collect();

        let mut types: Vec<MarketTypePerformance> = self.market_types.iter().cloned().collect();
        types.sort_by_key(|t| t.market_type.as_str());

        let mut trackers: Vec<(TrackerKey, TrackerCounts)> = self
            .signals
            .iter()
            .map(|(k, c)| (*k, *c))
            .collect();
        trackers.sort_by_key(|(k, _)| {
            (
                k.market_type.as_str(),
                k.tier.as_str(),
                k.info_type.as_str(),
            )
        });

        LearningSnapshot {
            buckets,
            types,
            trackers,
        }
    }
}

/// Sorted projection of the full learning state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSnapshot {
    pub buckets: Vec<(f64, f64, f64)>,
    pub types: Vec<MarketTypePerformance>,
    pub trackers: Vec<(TrackerKey, TrackerCounts)>,
}

impl PartialEq for LearningSnapshot {
    fn eq(&self, other: &Self) -> bool {
        serde_json::to_string(self).ok() == serde_json::to_string(other).ok()
    }
}
