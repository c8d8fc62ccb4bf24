//! The five-step adjustment pipeline.
//!
//! Turns raw LM output into `(adjusted_probability, adjusted_confidence,
//! extra_edge)` against a read-only learning snapshot. Step order is fixed:
//! calibration, signal weighting, shrinkage, market-type penalty, temporal
//! decay. The pipeline is pure; callers persist the per-step trace.

use crate::learning::LearningState;
use crate::models::{AdjustmentTrace, InfoType, MarketType, SignalTag};

pub const MIN_PROBABILITY: f64 = 0.01;
pub const MAX_PROBABILITY: f64 = 0.99;
pub const MIN_CONFIDENCE: f64 = 0.50;
pub const MAX_CONFIDENCE: f64 = 0.99;

const SIGNAL_WEIGHT_SCALE: f64 = 0.1;
const SHRINKAGE_MIN_SAMPLES: u64 = 10;
const UNKNOWN_AGE_HOURS: f64 = 2.0;
const FRESH_I1_AGE_HOURS: f64 = 0.5;
const FRESH_I1_BOOST: f64 = 1.05;
const STALE_AGE_HOURS: f64 = 1.0;
const DECAY_PER_HOUR: f64 = 0.05;
const DECAY_FLOOR: f64 = 0.85;

#[derive(Debug, Clone)]
pub struct AdjustmentInput<'a> {
    pub raw_probability: f64,
    pub raw_confidence: f64,
    pub market_type: MarketType,
    pub signal_tags: &'a [SignalTag],
    /// Age in hours of the freshest signal, None when no signal carries a
    /// timestamp.
    pub freshest_age_hours: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct AdjustmentOutput {
    pub adjusted_probability: f64,
    pub adjusted_confidence: f64,
    pub extra_edge: f64,
    pub trace: AdjustmentTrace,
}

pub fn adjust(input: &AdjustmentInput<'_>, learning: &LearningState) -> AdjustmentOutput {
    let mut trace = AdjustmentTrace::default();

    // Step 1: calibration of confidence.
    let bucket = learning.calibration.bucket_for(input.raw_confidence);
    let correction = bucket.correction();
    let mut adj_c = (input.raw_confidence + correction).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
    trace.calibration_delta = adj_c - input.raw_confidence;

    // Step 2: signal-type weighting of confidence.
    if !input.signal_tags.is_empty() {
        let mean_weight: f64 = input
            .signal_tags
            .iter()
            .map(|t| learning.signals.weight(t.tier, t.info_type, input.market_type))
            .sum::<f64>()
            / input.signal_tags.len() as f64;
        let before = adj_c;
        adj_c = (adj_c + (mean_weight - 1.0) * SIGNAL_WEIGHT_SCALE)
            .clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
        trace.signal_weight_delta = adj_c - before;
    }

    // Step 3: probability shrinkage around 0.50, symmetric on both sides.
    let mut adj_p = input.raw_probability;
    if bucket.sample_count() >= SHRINKAGE_MIN_SAMPLES && bucket.midpoint() > 0.0 {
        let s = bucket.expected_accuracy() / bucket.midpoint();
        adj_p = (0.5 + (input.raw_probability - 0.5) * s).clamp(MIN_PROBABILITY, MAX_PROBABILITY);
    }
    trace.shrinkage_delta = adj_p - input.raw_probability;

    // Step 4: market-type edge penalty, consumed at the decision stage.
    let extra_edge = learning.market_types.edge_adjustment(input.market_type);

    // Step 5: temporal decay of confidence.
    let age = input.freshest_age_hours.unwrap_or(UNKNOWN_AGE_HOURS);
    let has_deterministic = input
        .signal_tags
        .iter()
        .any(|t| t.info_type == InfoType::I1);
    let before = adj_c;
    if has_deterministic && age < FRESH_I1_AGE_HOURS {
        adj_c = (adj_c * FRESH_I1_BOOST).min(MAX_CONFIDENCE);
    } else if age > STALE_AGE_HOURS {
        let factor = (1.0 - DECAY_PER_HOUR * (age - STALE_AGE_HOURS)).max(DECAY_FLOOR);
        adj_c = (adj_c * factor).max(MIN_CONFIDENCE);
    }
    trace.temporal_delta = adj_c - before;

    AdjustmentOutput {
        adjusted_probability: adj_p,
        adjusted_confidence: adj_c,
        extra_edge,
        trace,
    }
}
