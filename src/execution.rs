//! Execution and resolution: paper fill simulation, live delegation, pnl and
//! Brier computation, and the unrealized adverse-move metric.

use crate::market::MarketSource;
use crate::models::{Side, SkipReason, TradeCandidate, TradeRecord, TradingMode};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const MIN_EXEC_PRICE: f64 = 0.01;
const MAX_EXEC_PRICE: f64 = 0.99;
const TAKER_BASE_SLIPPAGE: f64 = 0.005;
const TAKER_DEPTH_SLIPPAGE: f64 = 0.01;
const MAKER_BASE_FILL_PROB: f64 = 0.4;
const MAKER_MID_FILL_BONUS: f64 = 0.4;
/// Live partial fills below this fraction of the request are discarded.
const MIN_LIVE_FILL_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStyle {
    Taker,
    Maker,
}

/// Taker slippage grows with order size against available depth.
pub fn taker_slippage(size: f64, depth: f64) -> f64 {
    TAKER_BASE_SLIPPAGE + TAKER_DEPTH_SLIPPAGE * (size / depth.max(1.0)).min(1.0)
}

/// Maker fill probability peaks for mid-priced contracts.
pub fn maker_fill_probability(price: f64) -> f64 {
    MAKER_BASE_FILL_PROB + MAKER_MID_FILL_BONUS * (1.0 - (price - 0.5).abs())
}

/// Simulate a paper fill. `draw` is a uniform [0,1) sample consumed only by
/// maker orders; None means the order did not fill.
pub fn paper_fill(side: Side, price: f64, size: f64, depth: f64, style: OrderStyle, draw: f64) -> Option<f64> {
    match style {
        OrderStyle::Taker => {
            let slip = taker_slippage(size, depth);
            let executed = match side {
                Side::BuyYes => price + slip,
                Side::BuyNo => price - slip,
                Side::Skip => return None,
            };
            Some(executed.clamp(MIN_EXEC_PRICE, MAX_EXEC_PRICE))
        }
        OrderStyle::Maker => {
            if draw < maker_fill_probability(price) {
                Some(price.clamp(MIN_EXEC_PRICE, MAX_EXEC_PRICE))
            } else {
                None
            }
        }
    }
}

/// Realized pnl of a $1-payout binary position.
pub fn position_pnl(side: Side, executed_price: f64, size: f64, outcome: f64) -> f64 {
    let won = match side {
        Side::BuyYes => outcome >= 0.5,
        Side::BuyNo => outcome < 0.5,
        Side::Skip => return 0.0,
    };
    if won {
        size / executed_price.max(MIN_EXEC_PRICE) - size
    } else {
        -size
    }
}

/// Fraction the market has moved against an open position since entry.
pub fn adverse_move(side: Side, entry_price: f64, current_yes_price: f64) -> f64 {
    let (entry, current) = match side {
        Side::BuyYes => (entry_price, current_yes_price),
        Side::BuyNo => (entry_price, 1.0 - current_yes_price),
        Side::Skip => return 0.0,
    };
    if entry <= 0.0 {
        return 0.0;
    }
    ((entry - current) / entry).max(0.0)
}

/// Build the audit row for a candidate. SKIP candidates and unfilled orders
/// produce SKIP records (size 0) retained for counterfactual analysis.
pub fn record_from_candidate(
    candidate: &TradeCandidate,
    run_id: &str,
    model: &str,
    executed_price: Option<f64>,
    now: DateTime<Utc>,
) -> TradeRecord {
    let headline_only = !candidate.signals.is_empty()
        && candidate.signals.iter().all(|s| s.headline_only);
    TradeRecord {
        id: Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        model: model.to_string(),
        tier: candidate.tier,
        market_id: candidate.market.market_id.clone(),
        question: candidate.market.question.clone(),
        market_type: candidate.market.market_type,
        yes_price: candidate.market.yes_price,
        no_price: candidate.market.no_price,
        resolution_time: candidate.market.resolution_time,
        resolution_hours: candidate.resolution_hours,
        volume_24h: candidate.market.volume_24h,
        liquidity: candidate.market.liquidity,
        fee_rate: candidate.market.fee_rate,
        raw_probability: candidate.raw_probability,
        raw_confidence: candidate.raw_confidence,
        adjustments: candidate.adjustments,
        adjusted_probability: candidate.adjusted_probability,
        adjusted_confidence: candidate.adjusted_confidence,
        extra_edge: candidate.extra_edge,
        action: candidate.side,
        position_size: candidate.position_size,
        kelly_fraction: crate::decision::kelly_fraction(
            candidate.side,
            candidate.adjusted_probability,
            candidate.market.yes_price,
        ),
        entry_price: candidate.entry_price(),
        executed_price,
        calculated_edge: candidate.calculated_edge,
        score: candidate.score,
        skip_reason: candidate.skip_reason,
        market_cluster_id: candidate.market_cluster_id.clone(),
        signal_tags: candidate.signals.iter().filter_map(|s| s.tag()).collect(),
        actual_outcome: None,
        pnl: None,
        brier_raw: None,
        brier_adjusted: None,
        resolved_at: None,
        unrealized_adverse_move: 0.0,
        voided: false,
        void_reason: None,
        headline_only,
        created_at: now,
    }
}

/// Resolve a record in place: outcome, pnl (realized for executed records,
/// counterfactual at `reference_stake` for SKIPs), both Brier scores and the
/// resolution timestamp.
pub fn resolve_record(
    record: &mut TradeRecord,
    outcome: f64,
    reference_stake: f64,
    now: DateTime<Utc>,
) {
    record.actual_outcome = Some(outcome);
    record.brier_raw = Some((record.raw_probability - outcome).powi(2));
    record.brier_adjusted = Some((record.adjusted_probability - outcome).powi(2));
    record.resolved_at = Some(now);

    if record.is_executed() {
        let price = record.executed_price.unwrap_or(record.entry_price);
        record.pnl = Some(position_pnl(record.action, price, record.position_size, outcome));
    } else if record.skip_reason == Some(SkipReason::DailyCapObserveOnly) {
        // No prediction was made, so there is no counterfactual position.
        record.pnl = Some(0.0);
    } else {
        // Counterfactual: what the adjusted side would have returned.
        let side = if record.adjusted_probability > record.yes_price {
            Side::BuyYes
        } else {
            Side::BuyNo
        };
        let price = match side {
            Side::BuyYes => record.yes_price,
            _ => record.no_price,
        };
        record.pnl = Some(position_pnl(side, price, reference_stake, outcome));
    }
}

/// Turns gated candidates into persisted-ready records via paper simulation
/// or the live order path.
pub struct Executor {
    mode: TradingMode,
    market: Arc<dyn MarketSource>,
}

impl Executor {
    pub fn new(mode: TradingMode, market: Arc<dyn MarketSource>) -> Self {
        Self { mode, market }
    }

    /// Execute one accepted candidate. Returns the record to persist; maker
    /// paper orders that fail the fill draw and unfilled live orders come
    /// back as SKIP records with `unfilled_maker_order`.
    pub async fn execute(
        &self,
        candidate: &TradeCandidate,
        run_id: &str,
        model: &str,
        depth: f64,
        style: OrderStyle,
    ) -> Result<TradeRecord> {
        let now = Utc::now();
        if candidate.side == Side::Skip {
            return Ok(record_from_candidate(candidate, run_id, model, None, now));
        }

        let executed_price = match self.mode {
            TradingMode::Paper => paper_fill(
                candidate.side,
                candidate.entry_price(),
                candidate.position_size,
                depth,
                style,
                rand::random::<f64>(),
            ),
            TradingMode::Live => {
                let fill = self
                    .market
                    .place_order(
                        &candidate.market.market_id,
                        candidate.side,
                        candidate.entry_price(),
                        candidate.position_size,
                    )
                    .await
                    .map_err(|e| anyhow!("live order failed: {}", e))?;
                if fill.filled && fill.size >= candidate.position_size * MIN_LIVE_FILL_FRACTION {
                    Some(fill.price.clamp(MIN_EXEC_PRICE, MAX_EXEC_PRICE))
                } else {
                    None
                }
            }
        };

        let mut record = record_from_candidate(candidate, run_id, model, executed_price, now);
        if executed_price.is_none() {
            record.action = Side::Skip;
            record.position_size = 0.0;
            record.skip_reason = Some(SkipReason::UnfilledMakerOrder);
            debug!(market_id = %candidate.market.market_id, "order did not fill");
        } else {
            info!(
                market_id = %candidate.market.market_id,
                side = candidate.side.as_str(),
                size = candidate.position_size,
                price = executed_price.unwrap_or_default(),
                "position opened"
            );
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taker_slippage_scales_with_size_over_depth() {
        assert!((taker_slippage(0.0, 1000.0) - 0.005).abs() < 1e-12);
        // size == depth saturates: 0.005 + 0.01
        assert!((taker_slippage(1000.0, 1000.0) - 0.015).abs() < 1e-12);
        assert!((taker_slippage(5000.0, 1000.0) - 0.015).abs() < 1e-12);
        // zero depth guards to max(depth, 1)
        assert!((taker_slippage(2.0, 0.0) - 0.015).abs() < 1e-12);
    }

    #[test]
    fn taker_fill_moves_against_the_order() {
        let yes = paper_fill(Side::BuyYes, 0.60, 100.0, 10_000.0, OrderStyle::Taker, 0.0).unwrap();
        assert!(yes > 0.60);
        let no = paper_fill(Side::BuyNo, 0.40, 100.0, 10_000.0, OrderStyle::Taker, 0.0).unwrap();
        assert!(no < 0.40);
    }

    #[test]
    fn executed_price_clamped() {
        let hi = paper_fill(Side::BuyYes, 0.989, 10_000.0, 1.0, OrderStyle::Taker, 0.0).unwrap();
        assert!(hi <= 0.99);
        let lo = paper_fill(Side::BuyNo, 0.011, 10_000.0, 1.0, OrderStyle::Taker, 0.0).unwrap();
        assert!(lo >= 0.01);
    }

    #[test]
    fn maker_fill_probability_peaks_at_half() {
        assert!((maker_fill_probability(0.5) - 0.8).abs() < 1e-12);
        assert!((maker_fill_probability(0.9) - 0.64).abs() < 1e-12);
        // Fills iff draw below probability, zero slippage
        assert_eq!(
            paper_fill(Side::BuyYes, 0.5, 100.0, 1000.0, OrderStyle::Maker, 0.79),
            Some(0.5)
        );
        assert_eq!(
            paper_fill(Side::BuyYes, 0.5, 100.0, 1000.0, OrderStyle::Maker, 0.81),
            None
        );
    }

    #[test]
    fn pnl_symmetry_for_dollar_contracts() {
        // BUY_YES at 0.50 with $100: win pays 100/0.5 - 100 = 100
        assert!((position_pnl(Side::BuyYes, 0.50, 100.0, 1.0) - 100.0).abs() < 1e-9);
        assert!((position_pnl(Side::BuyYes, 0.50, 100.0, 0.0) + 100.0).abs() < 1e-9);
        // BUY_NO at 0.40 with $100: win (outcome NO) pays 100/0.4 - 100 = 150
        assert!((position_pnl(Side::BuyNo, 0.40, 100.0, 0.0) - 150.0).abs() < 1e-9);
        assert!((position_pnl(Side::BuyNo, 0.40, 100.0, 1.0) + 100.0).abs() < 1e-9);
    }

    #[test]
    fn adverse_move_tracks_the_held_side() {
        // YES bought at 0.60, market now 0.45: 25% adverse
        assert!((adverse_move(Side::BuyYes, 0.60, 0.45) - 0.25).abs() < 1e-9);
        // Favorable moves clamp to zero
        assert_eq!(adverse_move(Side::BuyYes, 0.60, 0.70), 0.0);
        // NO bought at 0.40 (yes at 0.60), yes rallies to 0.80: NO worth 0.20
        assert!((adverse_move(Side::BuyNo, 0.40, 0.80) - 0.50).abs() < 1e-9);
    }

    #[test]
    fn brier_scores_follow_the_invariant() {
        use crate::models::{AdjustmentTrace, Market, MarketType, Tier};
        use chrono::Duration;

        let market = Market {
            market_id: "m".into(),
            question: "q".into(),
            yes_price: 0.6,
            no_price: 0.4,
            resolution_time: Utc::now() + Duration::hours(2),
            volume_24h: 0.0,
            liquidity: 1000.0,
            market_type: MarketType::Political,
            fee_rate: 0.0,
            keywords: vec![],
        };
        let candidate = TradeCandidate {
            market,
            signals: vec![],
            raw_probability: 0.80,
            raw_confidence: 0.75,
            adjusted_probability: 0.62,
            adjusted_confidence: 0.70,
            calculated_edge: 0.02,
            side: Side::BuyYes,
            position_size: 50.0,
            score: 0.01,
            resolution_hours: 2.0,
            market_cluster_id: None,
            skip_reason: None,
            tier: Tier::Tier1,
            adjustments: AdjustmentTrace::default(),
            extra_edge: 0.0,
        };
        let mut record = record_from_candidate(&candidate, "run", "model", Some(0.61), Utc::now());
        resolve_record(&mut record, 1.0, 50.0, Utc::now());
        assert!((record.brier_raw.unwrap() - (0.80f64 - 1.0).powi(2)).abs() < 1e-12);
        assert!((record.brier_adjusted.unwrap() - (0.62f64 - 1.0).powi(2)).abs() < 1e-12);
        assert!(record.pnl.unwrap() > 0.0);
    }

    #[test]
    fn skip_records_get_counterfactual_pnl() {
        use crate::models::{AdjustmentTrace, Market, MarketType, Tier};
        use chrono::Duration;

        let market = Market {
            market_id: "m".into(),
            question: "q".into(),
            yes_price: 0.6,
            no_price: 0.4,
            resolution_time: Utc::now() + Duration::hours(2),
            volume_24h: 0.0,
            liquidity: 1000.0,
            market_type: MarketType::Political,
            fee_rate: 0.0,
            keywords: vec![],
        };
        let candidate = TradeCandidate {
            market,
            signals: vec![],
            raw_probability: 0.75,
            raw_confidence: 0.70,
            adjusted_probability: 0.72,
            adjusted_confidence: 0.68,
            calculated_edge: 0.01,
            side: Side::Skip,
            position_size: 0.0,
            score: 0.0,
            resolution_hours: 2.0,
            market_cluster_id: None,
            skip_reason: Some(SkipReason::EdgeBelowThreshold),
            tier: Tier::Tier1,
            adjustments: AdjustmentTrace::default(),
            extra_edge: 0.0,
        };
        let mut record = record_from_candidate(&candidate, "run", "model", None, Utc::now());
        resolve_record(&mut record, 1.0, 50.0, Utc::now());
        // Counterfactual BUY_YES at 0.60 with $50: 50/0.6 - 50
        assert!((record.pnl.unwrap() - (50.0 / 0.6 - 50.0)).abs() < 1e-9);
        assert_eq!(record.position_size, 0.0);
        assert_eq!(record.action, Side::Skip);
    }
}
