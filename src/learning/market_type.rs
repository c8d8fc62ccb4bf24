//! Per-market-type performance tracking.
//!
//! Feeds on ADJUSTED Brier scores and realized (or counterfactual) pnl.

use crate::models::MarketType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Brier history cap during normal operation. A model swap truncates the
/// history further, to [`SWAP_DAMPEN_WINDOW`].
pub const BRIER_HISTORY_CAP: usize = 100;
pub const SWAP_DAMPEN_WINDOW: usize = 15;

const DECAY: f64 = 0.95;
const DEFAULT_BRIER: f64 = 0.25;
const MIN_TRADES_FOR_EDGE_ADJUSTMENT: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTypePerformance {
    pub market_type: MarketType,
    pub total_trades: u64,
    pub total_pnl: f64,
    /// Newest last; bounded.
    pub brier_scores: Vec<f64>,
    pub total_observed_skips: u64,
    pub counterfactual_pnl: f64,
}

impl MarketTypePerformance {
    pub fn new(market_type: MarketType) -> Self {
        Self {
            market_type,
            total_trades: 0,
            total_pnl: 0.0,
            brier_scores: Vec::new(),
            total_observed_skips: 0,
            counterfactual_pnl: 0.0,
        }
    }

    /// Exponentially decayed mean of the Brier history, newest weight 1.
    pub fn avg_brier(&self) -> f64 {
        if self.brier_scores.is_empty() {
            return DEFAULT_BRIER;
        }
        let mut weighted = 0.0;
        let mut weights = 0.0;
        let mut w = 1.0;
        for b in self.brier_scores.iter().rev() {
            weighted += w * b;
            weights += w;
            w *= DECAY;
        }
        weighted / weights
    }

    /// Extra edge demanded from this market type when its Brier record is
    /// poor. Applied at the decision stage, never to the probability.
    pub fn edge_adjustment(&self) -> f64 {
        if self.total_trades < MIN_TRADES_FOR_EDGE_ADJUSTMENT {
            return 0.0;
        }
        let avg = self.avg_brier();
        if avg > 0.30 {
            0.05
        } else if avg > 0.25 {
            0.03
        } else if avg > 0.20 {
            0.01
        } else {
            0.0
        }
    }

    pub fn should_disable(&self) -> bool {
        self.total_trades >= 30 && self.total_pnl < -0.15 * self.total_trades as f64
    }

    fn push_brier(&mut self, brier: f64) {
        self.brier_scores.push(brier);
        if self.brier_scores.len() > BRIER_HISTORY_CAP {
            let excess = self.brier_scores.len() - BRIER_HISTORY_CAP;
            self.brier_scores.drain(..excess);
        }
    }

    /// Fold in a resolved executed trade.
    pub fn record_trade(&mut self, brier_adjusted: f64, pnl: f64) {
        self.push_brier(brier_adjusted);
        self.total_trades += 1;
        self.total_pnl += pnl;
    }

    /// Fold in a resolved SKIP (counterfactual) observation.
    pub fn record_skip(&mut self, brier_adjusted: f64, counterfactual_pnl: f64) {
        self.push_brier(brier_adjusted);
        self.total_observed_skips += 1;
        self.counterfactual_pnl += counterfactual_pnl;
    }

    /// Model-swap dampening: keep only the newest window of Brier history.
    pub fn dampen(&mut self, window: usize) {
        if self.brier_scores.len() > window {
            let excess = self.brier_scores.len() - window;
            self.brier_scores.drain(..excess);
        }
    }
}

/// All per-type tables, keyed by market type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketTypeManager {
    types: HashMap<MarketType, MarketTypePerformance>,
}

impl MarketTypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, market_type: MarketType) -> Option<&MarketTypePerformance> {
        self.types.get(&market_type)
    }

    pub fn entry(&mut self, market_type: MarketType) -> &mut MarketTypePerformance {
        self.types
            .entry(market_type)
            .or_insert_with(|| MarketTypePerformance::new(market_type))
    }

    pub fn edge_adjustment(&self, market_type: MarketType) -> f64 {
        self.types
            .get(&market_type)
            .map(|t| t.edge_adjustment())
            .unwrap_or(0.0)
    }

    pub fn is_disabled(&self, market_type: MarketType) -> bool {
        self.types
            .get(&market_type)
            .map(|t| t.should_disable())
            .unwrap_or(false)
    }

    /// Model swap: truncate every type's history to the newest 15 scores.
    /// `should_disable` is derived, so re-evaluation is implicit.
    pub fn dampen_all(&mut self) {
        for t in self.types.values_mut() {
            t.dampen(SWAP_DAMPEN_WINDOW);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarketTypePerformance> {
        self.types.values()
    }

    pub fn restore(&mut self, perf: MarketTypePerformance) {
        self.types.insert(perf.market_type, perf);
    }
}
