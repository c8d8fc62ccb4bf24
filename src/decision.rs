//! Decision engine: edge, side, Kelly sizing, cluster detection, ranking and
//! the ordered risk gate ("Monk Mode").

use crate::models::{Side, SkipReason, TradeCandidate};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionParams {
    pub min_edge_threshold: f64,
    pub kelly_fraction: f64,
    pub max_position_pct: f64,
    pub max_cluster_exposure_pct: f64,
}

impl Default for DecisionParams {
    fn default() -> Self {
        Self {
            min_edge_threshold: 0.03,
            kelly_fraction: 0.25,
            max_position_pct: 0.08,
            max_cluster_exposure_pct: 0.12,
        }
    }
}

/// Net edge after fees and the market-type penalty.
pub fn calculated_edge(adj_p: f64, market_price: f64, fee_rate: f64, extra_edge: f64) -> f64 {
    (adj_p - market_price).abs() - fee_rate - extra_edge
}

/// Side selection against the YES price.
pub fn choose_side(adj_p: f64, market_price: f64) -> Side {
    if adj_p > market_price {
        Side::BuyYes
    } else if adj_p < market_price {
        Side::BuyNo
    } else {
        Side::Skip
    }
}

/// Full Kelly fraction for a $1-payout binary contract. `price` is the YES
/// market price for both sides; zero whenever the predicted direction does
/// not beat it.
pub fn kelly_fraction(side: Side, p: f64, price: f64) -> f64 {
    match side {
        Side::BuyYes => {
            if p > price && price < 1.0 {
                (p - price) / (1.0 - price)
            } else {
                0.0
            }
        }
        Side::BuyNo => {
            if p < price && price > 0.0 {
                (price - p) / price
            } else {
                0.0
            }
        }
        Side::Skip => 0.0,
    }
}

/// Fractional-Kelly position size, capped at `max_position_pct` of bankroll.
pub fn position_size(side: Side, p: f64, price: f64, bankroll: f64, params: &DecisionParams) -> f64 {
    let f = kelly_fraction(side, p, price);
    let sized = f * params.kelly_fraction * bankroll;
    sized.min(params.max_position_pct * bankroll).max(0.0)
}

/// Candidate score: larger edges, higher confidence and faster resolution
/// rank first. The 0.5h floor bounds the recycling bonus.
pub fn score(edge: f64, adjusted_confidence: f64, resolution_hours: f64) -> f64 {
    edge * adjusted_confidence * (1.0 / resolution_hours.max(0.5))
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<String> = a.iter().map(|k| k.to_lowercase()).collect();
    let sb: HashSet<String> = b.iter().map(|k| k.to_lowercase()).collect();
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}

const CLUSTER_MAX_RESOLUTION_GAP_SECS: i64 = 3600;
const CLUSTER_MIN_JACCARD: f64 = 0.5;

/// Assign cluster ids to correlated candidates: same market type, resolution
/// times within an hour, keyword Jaccard at least 0.5. Ids are deterministic
/// (`<market_type>:<lowest market_id>`), so repeated runs agree.
pub fn assign_clusters(candidates: &mut [TradeCandidate]) {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by_key(|&i| {
        (
            candidates[i].market.market_type.as_str(),
            candidates[i].market.resolution_time,
            candidates[i].market.market_id.clone(),
        )
    });

    // Union-find over candidate indexes.
    let mut parent: Vec<usize> = (0..candidates.len()).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        let p = parent[i];
        if p == i {
            return i;
        }
        let root = find(parent, p);
        parent[i] = root;
        root
    }

    for (oi, &i) in order.iter().enumerate() {
        for &j in order.iter().skip(oi + 1) {
            let (a, b) = (&candidates[i], &candidates[j]);
            if a.market.market_type != b.market.market_type {
                continue;
            }
            let gap = (b.market.resolution_time - a.market.resolution_time)
                .num_seconds()
                .abs();
            if gap > CLUSTER_MAX_RESOLUTION_GAP_SECS {
                break; // sorted by resolution time within the type
            }
            if jaccard(&a.market.keywords, &b.market.keywords) >= CLUSTER_MIN_JACCARD {
                let (ra, rb) = (find(&mut parent, i), find(&mut parent, j));
                if ra != rb {
                    parent[rb] = ra;
                }
            }
        }
    }

    // Only multi-member groups become clusters.
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..candidates.len() {
        let root = find(&mut parent, i);
        members.entry(root).or_default().push(i);
    }
    for group in members.values() {
        if group.len() < 2 {
            continue;
        }
        let lowest_id = group
            .iter()
            .map(|&i| candidates[i].market.market_id.clone())
            .min()
            .unwrap_or_default();
        let market_type = candidates[group[0]].market.market_type;
        let cluster_id = format!("{}:{}", market_type.as_str(), lowest_id);
        for &i in group {
            candidates[i].market_cluster_id = Some(cluster_id.clone());
        }
    }
}

/// One past non-SKIP trade the cooldown check walks over, most recent first.
#[derive(Debug, Clone, Copy)]
pub struct AdverseEvent {
    pub at: DateTime<Utc>,
    pub adverse: bool,
}

/// Everything the risk gate reads, assembled by the orchestrator under the
/// portfolio/learning mutex.
#[derive(Debug, Clone)]
pub struct GateContext {
    pub total_equity: f64,
    pub tier_executed_today: u32,
    pub tier_cap: u32,
    pub daily_resolved_pnl: f64,
    pub weekly_resolved_pnl: f64,
    pub open_exposure: f64,
    /// Open exposure per cluster id.
    pub cluster_exposure: HashMap<String, f64>,
    /// Recent non-SKIP trades, most recent first.
    pub recent_events: Vec<AdverseEvent>,
    pub api_spend_today: f64,
    pub now: DateTime<Utc>,

    pub daily_loss_limit_pct: f64,
    pub weekly_loss_limit_pct: f64,
    pub max_exposure_pct: f64,
    pub cooldown_adverse_count: u32,
    pub cooldown_window_hours: f64,
    pub daily_api_budget_usd: f64,
}

impl GateContext {
    fn consecutive_adverse(&self) -> u32 {
        let window_start =
            self.now - Duration::seconds((self.cooldown_window_hours * 3600.0) as i64);
        let mut streak = 0;
        for event in &self.recent_events {
            if event.at < window_start {
                break;
            }
            if event.adverse {
                streak += 1;
            } else {
                break;
            }
        }
        streak
    }
}

/// Ordered Monk-Mode evaluation. First failing check wins.
pub fn monk_gate(position_size: f64, accepted_this_scan: u32, ctx: &GateContext) -> Option<SkipReason> {
    if ctx.tier_executed_today + accepted_this_scan >= ctx.tier_cap {
        return Some(SkipReason::TierDailyCapReached);
    }
    if ctx.daily_resolved_pnl < -ctx.daily_loss_limit_pct * ctx.total_equity {
        return Some(SkipReason::DailyLossLimit);
    }
    if ctx.weekly_resolved_pnl < -ctx.weekly_loss_limit_pct * ctx.total_equity {
        return Some(SkipReason::WeeklyLossLimit);
    }
    if ctx.consecutive_adverse() >= ctx.cooldown_adverse_count {
        return Some(SkipReason::Cooldown);
    }
    if ctx.open_exposure + position_size > ctx.max_exposure_pct * ctx.total_equity {
        return Some(SkipReason::MaxExposure);
    }
    if ctx.api_spend_today > ctx.daily_api_budget_usd {
        return Some(SkipReason::ApiBudgetExceeded);
    }
    None
}

/// Rank non-SKIP candidates by score (market_id tiebreak) and walk the list,
/// enforcing the tier cap, cluster exposure and the Monk-Mode gate. Every
/// rejection downgrades the candidate to SKIP with its reason; nothing is
/// dropped, so counterfactual records survive.
pub fn rank_and_gate(
    mut candidates: Vec<TradeCandidate>,
    ctx: &GateContext,
    params: &DecisionParams,
) -> Vec<TradeCandidate> {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].side != Side::Skip && candidates[i].skip_reason.is_none())
        .collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .score
            .partial_cmp(&candidates[a].score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                candidates[a]
                    .market
                    .market_id
                    .cmp(&candidates[b].market.market_id)
            })
    });

    let mut accepted: u32 = 0;
    let mut pending_cluster: HashMap<String, f64> = HashMap::new();
    let cluster_cap = params.max_cluster_exposure_pct * ctx.total_equity;

    for &i in &order {
        let size = candidates[i].position_size;

        if ctx.tier_executed_today + accepted >= ctx.tier_cap {
            candidates[i].side = Side::Skip;
            candidates[i].skip_reason = Some(SkipReason::RankedBelowCutoff);
            candidates[i].position_size = 0.0;
            continue;
        }

        if let Some(cluster_id) = candidates[i].market_cluster_id.clone() {
            let existing = ctx.cluster_exposure.get(&cluster_id).copied().unwrap_or(0.0);
            let pending = pending_cluster.get(&cluster_id).copied().unwrap_or(0.0);
            if existing + pending + size > cluster_cap {
                candidates[i].side = Side::Skip;
                candidates[i].skip_reason = Some(SkipReason::ClusterExposureLimit);
                candidates[i].position_size = 0.0;
                continue;
            }
        }

        if let Some(reason) = monk_gate(size, accepted, ctx) {
            candidates[i].side = Side::Skip;
            candidates[i].skip_reason = Some(reason);
            candidates[i].position_size = 0.0;
            continue;
        }

        if let Some(cluster_id) = &candidates[i].market_cluster_id {
            *pending_cluster.entry(cluster_id.clone()).or_insert(0.0) += size;
        }
        accepted += 1;
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdjustmentTrace, Market, MarketType, Tier};
    use chrono::TimeZone;

    fn market(id: &str, keywords: &[&str], resolution_offset_min: i64) -> Market {
        Market {
            market_id: id.to_string(),
            question: format!("Question {}", id),
            yes_price: 0.60,
            no_price: 0.40,
            resolution_time: Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap()
                + Duration::minutes(resolution_offset_min),
            volume_24h: 50_000.0,
            liquidity: 20_000.0,
            market_type: MarketType::Political,
            fee_rate: 0.01,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn candidate(id: &str, keywords: &[&str], offset_min: i64, size: f64, score: f64) -> TradeCandidate {
        TradeCandidate {
            market: market(id, keywords, offset_min),
            signals: Vec::new(),
            raw_probability: 0.70,
            raw_confidence: 0.70,
            adjusted_probability: 0.70,
            adjusted_confidence: 0.70,
            calculated_edge: 0.08,
            side: Side::BuyYes,
            position_size: size,
            score,
            resolution_hours: 6.0,
            market_cluster_id: None,
            skip_reason: None,
            tier: Tier::Tier1,
            adjustments: AdjustmentTrace::default(),
            extra_edge: 0.0,
        }
    }

    fn gate_ctx() -> GateContext {
        GateContext {
            total_equity: 5000.0,
            tier_executed_today: 0,
            tier_cap: 5,
            daily_resolved_pnl: 0.0,
            weekly_resolved_pnl: 0.0,
            open_exposure: 0.0,
            cluster_exposure: HashMap::new(),
            recent_events: Vec::new(),
            api_spend_today: 0.0,
            now: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            daily_loss_limit_pct: 0.05,
            weekly_loss_limit_pct: 0.10,
            max_exposure_pct: 0.30,
            cooldown_adverse_count: 3,
            cooldown_window_hours: 2.0,
            daily_api_budget_usd: 10.0,
        }
    }

    #[test]
    fn kelly_zero_without_edge() {
        let mut p = 0.0;
        while p <= 1.0 {
            let price = 0.6;
            if p <= price {
                assert_eq!(kelly_fraction(Side::BuyYes, p, price), 0.0);
            } else {
                assert!(kelly_fraction(Side::BuyYes, p, price) > 0.0);
            }
            if p >= price {
                assert_eq!(kelly_fraction(Side::BuyNo, p, price), 0.0);
            } else {
                assert!(kelly_fraction(Side::BuyNo, p, price) > 0.0);
            }
            p += 0.01;
        }
    }

    #[test]
    fn kelly_buy_yes_hits_the_position_cap() {
        // p=0.80, q=0.60: f* = 0.20/0.40 = 0.5; quarter-Kelly on 5000 = 625,
        // capped at 8% of bankroll = 400.
        let params = DecisionParams::default();
        let f = kelly_fraction(Side::BuyYes, 0.80, 0.60);
        assert!((f - 0.5).abs() < 1e-12);
        let size = position_size(Side::BuyYes, 0.80, 0.60, 5000.0, &params);
        assert!((size - 400.0).abs() < 1e-9);
    }

    #[test]
    fn kelly_buy_no_takes_odds_from_the_yes_price() {
        // p=0.30 against a YES price of 0.60: f* = (0.60-0.30)/0.60 = 0.5
        let f = kelly_fraction(Side::BuyNo, 0.30, 0.60);
        assert!((f - 0.5).abs() < 1e-12);
        // p=0.50 still carries NO-side edge at yes 0.60
        let f = kelly_fraction(Side::BuyNo, 0.50, 0.60);
        assert!((f - (0.10 / 0.60)).abs() < 1e-12);
        let params = DecisionParams::default();
        let size = position_size(Side::BuyNo, 0.50, 0.60, 5000.0, &params);
        assert!(size > 0.0);
    }

    #[test]
    fn position_bounded_by_cap_across_inputs() {
        let params = DecisionParams::default();
        let bankroll = 5000.0;
        let mut p = 0.01;
        while p < 1.0 {
            for side in [Side::BuyYes, Side::BuyNo] {
                let size = position_size(side, p, 0.5, bankroll, &params);
                assert!(size >= 0.0);
                assert!(size <= params.max_position_pct * bankroll + 1e-9);
            }
            p += 0.01;
        }
    }

    #[test]
    fn side_selection() {
        assert_eq!(choose_side(0.7, 0.6), Side::BuyYes);
        assert_eq!(choose_side(0.5, 0.6), Side::BuyNo);
        assert_eq!(choose_side(0.6, 0.6), Side::Skip);
    }

    #[test]
    fn score_floors_resolution_hours() {
        assert_eq!(score(0.1, 0.8, 0.1), score(0.1, 0.8, 0.5));
        assert!(score(0.1, 0.8, 0.5) > score(0.1, 0.8, 6.0));
    }

    #[test]
    fn cluster_detection_at_half_jaccard() {
        // {trump, executive, order} vs {trump, executive, immigration}:
        // Jaccard = 2/4 = 0.5, resolution 30 minutes apart.
        let mut candidates = vec![
            candidate("m-a", &["trump", "executive", "order"], 0, 200.0, 0.02),
            candidate("m-b", &["trump", "executive", "immigration"], 30, 200.0, 0.01),
        ];
        assign_clusters(&mut candidates);
        assert!(candidates[0].market_cluster_id.is_some());
        assert_eq!(
            candidates[0].market_cluster_id,
            candidates[1].market_cluster_id
        );
    }

    #[test]
    fn clusters_do_not_cross_market_type() {
        let mut candidates = vec![
            candidate("m-a", &["btc", "etf"], 0, 100.0, 0.02),
            candidate("m-b", &["btc", "etf"], 10, 100.0, 0.01),
        ];
        candidates[1].market.market_type = MarketType::Crypto;
        assign_clusters(&mut candidates);
        assert!(candidates[0].market_cluster_id.is_none());
        assert!(candidates[1].market_cluster_id.is_none());
    }

    #[test]
    fn distant_resolutions_do_not_cluster() {
        let mut candidates = vec![
            candidate("m-a", &["trump", "order"], 0, 100.0, 0.02),
            candidate("m-b", &["trump", "order"], 120, 100.0, 0.01),
        ];
        assign_clusters(&mut candidates);
        assert!(candidates[0].market_cluster_id.is_none());
    }

    #[test]
    fn cluster_exposure_rejection() {
        // Existing cluster exposure 500, candidate size 200, cap 600 on a
        // 5000 bankroll: 700 > 600 rejects with cluster_exposure_limit.
        let mut candidates = vec![
            candidate("m-a", &["trump", "executive", "order"], 0, 200.0, 0.02),
            candidate("m-b", &["trump", "executive", "immigration"], 30, 200.0, 0.01),
        ];
        assign_clusters(&mut candidates);
        let cluster_id = candidates[0].market_cluster_id.clone().unwrap();

        let mut ctx = gate_ctx();
        ctx.cluster_exposure.insert(cluster_id, 500.0);
        // First candidate alone would exceed: 500 + 200 = 700 > 600
        let out = rank_and_gate(candidates, &ctx, &DecisionParams::default());
        assert_eq!(out[0].skip_reason, Some(SkipReason::ClusterExposureLimit));
        assert_eq!(out[1].skip_reason, Some(SkipReason::ClusterExposureLimit));
    }

    #[test]
    fn cluster_exposure_law_holds_after_ranking() {
        let mut candidates = vec![
            candidate("m-a", &["fed", "rate", "cut"], 0, 300.0, 0.05),
            candidate("m-b", &["fed", "rate", "hike"], 20, 300.0, 0.04),
            candidate("m-c", &["fed", "rate", "pause"], 40, 300.0, 0.03),
        ];
        assign_clusters(&mut candidates);
        let ctx = gate_ctx();
        let params = DecisionParams::default();
        let out = rank_and_gate(candidates, &ctx, &params);

        let mut per_cluster: HashMap<String, f64> = HashMap::new();
        for c in &out {
            if c.side != Side::Skip {
                if let Some(id) = &c.market_cluster_id {
                    *per_cluster.entry(id.clone()).or_insert(0.0) += c.position_size;
                }
            }
        }
        for total in per_cluster.values() {
            assert!(*total <= params.max_cluster_exposure_pct * ctx.total_equity + 1e-9);
        }
        // 300+300 fits in 600; the third was rejected.
        assert_eq!(
            out.iter().filter(|c| c.side != Side::Skip).count(),
            2
        );
    }

    #[test]
    fn equal_scores_break_ties_by_market_id() {
        let mut ctx = gate_ctx();
        ctx.tier_cap = 1;
        let candidates = vec![
            candidate("m-b", &["x"], 0, 100.0, 0.05),
            candidate("m-a", &["y"], 0, 100.0, 0.05),
        ];
        let out = rank_and_gate(candidates, &ctx, &DecisionParams::default());
        let taken: Vec<&str> = out
            .iter()
            .filter(|c| c.side != Side::Skip)
            .map(|c| c.market.market_id.as_str())
            .collect();
        assert_eq!(taken, vec!["m-a"]);
    }

    #[test]
    fn over_cap_candidates_rank_below_cutoff() {
        let mut ctx = gate_ctx();
        ctx.tier_cap = 2;
        let candidates = vec![
            candidate("m-a", &["a"], 0, 100.0, 0.05),
            candidate("m-b", &["b"], 0, 100.0, 0.04),
            candidate("m-c", &["c"], 0, 100.0, 0.03),
        ];
        let out = rank_and_gate(candidates, &ctx, &DecisionParams::default());
        let skipped: Vec<_> = out
            .iter()
            .filter(|c| c.skip_reason == Some(SkipReason::RankedBelowCutoff))
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].market.market_id, "m-c");
    }

    #[test]
    fn gate_order_daily_before_weekly() {
        let mut ctx = gate_ctx();
        ctx.daily_resolved_pnl = -300.0; // < -250 (5% of 5000)
        ctx.weekly_resolved_pnl = -600.0; // < -500 too
        assert_eq!(monk_gate(100.0, 0, &ctx), Some(SkipReason::DailyLossLimit));
    }

    #[test]
    fn gate_weekly_loss() {
        let mut ctx = gate_ctx();
        ctx.weekly_resolved_pnl = -600.0;
        assert_eq!(monk_gate(100.0, 0, &ctx), Some(SkipReason::WeeklyLossLimit));
    }

    #[test]
    fn gate_cooldown_needs_three_consecutive_adverse_in_window() {
        let mut ctx = gate_ctx();
        let now = ctx.now;
        ctx.recent_events = vec![
            AdverseEvent { at: now - Duration::minutes(10), adverse: true },
            AdverseEvent { at: now - Duration::minutes(30), adverse: true },
            AdverseEvent { at: now - Duration::minutes(50), adverse: true },
        ];
        assert_eq!(monk_gate(100.0, 0, &ctx), Some(SkipReason::Cooldown));

        // A favorable event in between breaks the streak
        ctx.recent_events[1].adverse = false;
        assert_eq!(monk_gate(100.0, 0, &ctx), None);

        // Events outside the 2h window do not count
        ctx.recent_events = vec![
            AdverseEvent { at: now - Duration::minutes(10), adverse: true },
            AdverseEvent { at: now - Duration::minutes(30), adverse: true },
            AdverseEvent { at: now - Duration::hours(3), adverse: true },
        ];
        assert_eq!(monk_gate(100.0, 0, &ctx), None);
    }

    #[test]
    fn gate_max_exposure() {
        let mut ctx = gate_ctx();
        ctx.open_exposure = 1450.0; // cap is 1500 on 5000
        assert_eq!(monk_gate(100.0, 0, &ctx), Some(SkipReason::MaxExposure));
        assert_eq!(monk_gate(40.0, 0, &ctx), None);
    }

    #[test]
    fn gate_api_budget() {
        let mut ctx = gate_ctx();
        ctx.api_spend_today = 10.5;
        assert_eq!(
            monk_gate(100.0, 0, &ctx),
            Some(SkipReason::ApiBudgetExceeded)
        );
    }

    #[test]
    fn gate_tier_cap_first() {
        let mut ctx = gate_ctx();
        ctx.tier_executed_today = 5;
        ctx.daily_resolved_pnl = -1000.0;
        assert_eq!(
            monk_gate(100.0, 0, &ctx),
            Some(SkipReason::TierDailyCapReached)
        );
    }

    #[test]
    fn edge_accounts_for_fee_and_penalty() {
        let e = calculated_edge(0.70, 0.60, 0.01, 0.03);
        assert!((e - 0.06).abs() < 1e-12);
    }
}
