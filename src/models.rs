//! Core domain types shared across the scan pipeline, learning state and store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance tier of a signal source (S1 = official primary .. S6 = fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTier {
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

impl SourceTier {
    pub fn credibility(&self) -> f64 {
        match self {
            SourceTier::S1 => 0.95,
            SourceTier::S2 => 0.90,
            SourceTier::S3 => 0.80,
            SourceTier::S4 => 0.65,
            SourceTier::S5 => 0.70,
            SourceTier::S6 => 0.30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::S1 => "S1",
            SourceTier::S2 => "S2",
            SourceTier::S3 => "S3",
            SourceTier::S4 => "S4",
            SourceTier::S5 => "S5",
            SourceTier::S6 => "S6",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S1" => Some(Self::S1),
            "S2" => Some(Self::S2),
            "S3" => Some(Self::S3),
            "S4" => Some(Self::S4),
            "S5" => Some(Self::S5),
            "S6" => Some(Self::S6),
            _ => None,
        }
    }
}

/// Informational character of a signal. I1..I5 are assigned by the LM;
/// I6 is collector-assigned for purely market-derived price action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfoType {
    I1,
    I2,
    I3,
    I4,
    I5,
    I6,
}

impl InfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoType::I1 => "I1",
            InfoType::I2 => "I2",
            InfoType::I3 => "I3",
            InfoType::I4 => "I4",
            InfoType::I5 => "I5",
            InfoType::I6 => "I6",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "I1" => Some(Self::I1),
            "I2" => Some(Self::I2),
            "I3" => Some(Self::I3),
            "I4" => Some(Self::I4),
            "I5" => Some(Self::I5),
            "I6" => Some(Self::I6),
            _ => None,
        }
    }
}

/// Where a signal came from, structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    Social,
    MarketDerived,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::News => "news",
            SourceKind::Social => "social",
            SourceKind::MarketDerived => "market_derived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Some(Self::News),
            "social" => Some(Self::Social),
            "market_derived" => Some(Self::MarketDerived),
            _ => None,
        }
    }
}

/// A normalized signal emitted by a collector. Immutable once classified;
/// `info_type` is unset at collection and filled by the LM (except I6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub source_kind: SourceKind,
    pub source_tier: SourceTier,
    pub info_type: Option<InfoType>,
    pub text: String,
    pub credibility: f64,
    pub author: Option<String>,
    pub followers: u64,
    pub engagement: u64,
    pub timestamp: DateTime<Utc>,
    pub headline_only: bool,
}

impl Signal {
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_seconds().max(0) as f64 / 3600.0
    }

    /// Tag used by the adjustment pipeline and the signal tracker.
    pub fn tag(&self) -> Option<SignalTag> {
        self.info_type.map(|info_type| SignalTag {
            tier: self.source_tier,
            info_type,
        })
    }
}

/// (tier, info_type) pair observed for a market; the unit the signal tracker
/// counts and the adjustment pipeline weighs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalTag {
    pub tier: SourceTier,
    pub info_type: InfoType,
}

/// Market category used for per-type learning and clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Political,
    Crypto,
    Sports,
    Economic,
    Entertainment,
    Other,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Political => "political",
            MarketType::Crypto => "crypto",
            MarketType::Sports => "sports",
            MarketType::Economic => "economic",
            MarketType::Entertainment => "entertainment",
            MarketType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "political" | "politics" | "elections" => Self::Political,
            "crypto" | "crypto-prices" => Self::Crypto,
            "sports" => Self::Sports,
            "economic" | "economics" | "economy" | "fed" => Self::Economic,
            "entertainment" | "pop-culture" => Self::Entertainment,
            _ => Self::Other,
        }
    }

    pub fn all() -> [MarketType; 6] {
        [
            Self::Political,
            Self::Crypto,
            Self::Sports,
            Self::Economic,
            Self::Entertainment,
            Self::Other,
        ]
    }
}

/// Scan tier. Tier 1 is the regular 15-minute scan over general markets;
/// tier 2 runs only inside news-triggered windows over crypto 15m markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Tier1,
    Tier2,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tier1" | "1" => Some(Self::Tier1),
            "tier2" | "2" => Some(Self::Tier2),
            _ => None,
        }
    }
}

/// Snapshot of a candidate market, refetched each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub question: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub resolution_time: DateTime<Utc>,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub market_type: MarketType,
    pub fee_rate: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Market {
    pub fn hours_to_resolution(&self, now: DateTime<Utc>) -> f64 {
        (self.resolution_time - now).num_seconds().max(0) as f64 / 3600.0
    }
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// Top-of-book depth snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub market_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn bid_depth(&self, levels: usize) -> f64 {
        self.bids.iter().take(levels).map(|l| l.size).sum()
    }

    pub fn ask_depth(&self, levels: usize) -> f64 {
        self.asks.iter().take(levels).map(|l| l.size).sum()
    }

    /// Depth skew in [-1, 1]; positive means bid-heavy.
    pub fn skew(&self, levels: usize) -> f64 {
        let bid = self.bid_depth(levels);
        let ask = self.ask_depth(levels);
        let total = bid + ask;
        if total <= 0.0 {
            0.0
        } else {
            (bid - ask) / total
        }
    }
}

/// Resolution state reported by the market source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Open,
    ResolvedYes,
    ResolvedNo,
}

impl ResolutionState {
    /// Outcome as 1.0 / 0.0 for YES / NO, None while open.
    pub fn outcome(&self) -> Option<f64> {
        match self {
            ResolutionState::Open => None,
            ResolutionState::ResolvedYes => Some(1.0),
            ResolutionState::ResolvedNo => Some(0.0),
        }
    }
}

/// Which side of the binary contract a decision takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    BuyYes,
    BuyNo,
    Skip,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::BuyYes => "BUY_YES",
            Side::BuyNo => "BUY_NO",
            Side::Skip => "SKIP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY_YES" => Some(Self::BuyYes),
            "BUY_NO" => Some(Self::BuyNo),
            "SKIP" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Why a candidate was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EdgeBelowThreshold,
    RankedBelowCutoff,
    ClusterExposureLimit,
    TierDailyCapReached,
    DailyLossLimit,
    WeeklyLossLimit,
    Cooldown,
    MaxExposure,
    ApiBudgetExceeded,
    DailyCapObserveOnly,
    UnfilledMakerOrder,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EdgeBelowThreshold => "edge_below_threshold",
            SkipReason::RankedBelowCutoff => "ranked_below_cutoff",
            SkipReason::ClusterExposureLimit => "cluster_exposure_limit",
            SkipReason::TierDailyCapReached => "tier_daily_cap_reached",
            SkipReason::DailyLossLimit => "daily_loss_limit",
            SkipReason::WeeklyLossLimit => "weekly_loss_limit",
            SkipReason::Cooldown => "cooldown",
            SkipReason::MaxExposure => "max_exposure",
            SkipReason::ApiBudgetExceeded => "api_budget_exceeded",
            SkipReason::DailyCapObserveOnly => "daily_cap_observe_only",
            SkipReason::UnfilledMakerOrder => "unfilled_maker_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "edge_below_threshold" => Some(Self::EdgeBelowThreshold),
            "ranked_below_cutoff" => Some(Self::RankedBelowCutoff),
            "cluster_exposure_limit" => Some(Self::ClusterExposureLimit),
            "tier_daily_cap_reached" => Some(Self::TierDailyCapReached),
            "daily_loss_limit" => Some(Self::DailyLossLimit),
            "weekly_loss_limit" => Some(Self::WeeklyLossLimit),
            "cooldown" => Some(Self::Cooldown),
            "max_exposure" => Some(Self::MaxExposure),
            "api_budget_exceeded" => Some(Self::ApiBudgetExceeded),
            "daily_cap_observe_only" => Some(Self::DailyCapObserveOnly),
            "unfilled_maker_order" => Some(Self::UnfilledMakerOrder),
            _ => None,
        }
    }
}

/// A market that made it through the per-market pipeline, scored and sided,
/// awaiting ranking and the risk gate.
#[derive(Debug, Clone)]
pub struct TradeCandidate {
    pub market: Market,
    pub signals: Vec<Signal>,
    pub raw_probability: f64,
    pub raw_confidence: f64,
    pub adjusted_probability: f64,
    pub adjusted_confidence: f64,
    pub calculated_edge: f64,
    pub side: Side,
    pub position_size: f64,
    pub score: f64,
    pub resolution_hours: f64,
    pub market_cluster_id: Option<String>,
    pub skip_reason: Option<SkipReason>,
    pub tier: Tier,
    /// Deltas applied by each adjustment step, in order.
    pub adjustments: AdjustmentTrace,
    pub extra_edge: f64,
}

impl TradeCandidate {
    pub fn entry_price(&self) -> f64 {
        match self.side {
            Side::BuyYes | Side::Skip => self.market.yes_price,
            Side::BuyNo => self.market.no_price,
        }
    }
}

/// Per-step deltas recorded for the audit row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AdjustmentTrace {
    pub calibration_delta: f64,
    pub signal_weight_delta: f64,
    pub shrinkage_delta: f64,
    pub temporal_delta: f64,
}

/// Full audit row. Created at decision time, mutated once at resolution,
/// then immutable except through the void mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub run_id: String,
    pub model: String,
    pub tier: Tier,

    // Market snapshot
    pub market_id: String,
    pub question: String,
    pub market_type: MarketType,
    pub yes_price: f64,
    pub no_price: f64,
    pub resolution_time: DateTime<Utc>,
    pub resolution_hours: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub fee_rate: f64,

    // Raw LM output and adjustments
    pub raw_probability: f64,
    pub raw_confidence: f64,
    pub adjustments: AdjustmentTrace,
    pub adjusted_probability: f64,
    pub adjusted_confidence: f64,
    pub extra_edge: f64,

    // Decision
    pub action: Side,
    pub position_size: f64,
    pub kelly_fraction: f64,
    pub entry_price: f64,
    pub executed_price: Option<f64>,
    pub calculated_edge: f64,
    pub score: f64,
    pub skip_reason: Option<SkipReason>,
    pub market_cluster_id: Option<String>,
    pub signal_tags: Vec<SignalTag>,

    // Resolution
    pub actual_outcome: Option<f64>,
    pub pnl: Option<f64>,
    pub brier_raw: Option<f64>,
    pub brier_adjusted: Option<f64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub unrealized_adverse_move: f64,

    pub voided: bool,
    pub void_reason: Option<String>,
    /// True when every signal behind this decision was headline-only.
    pub headline_only: bool,
    pub created_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn is_open(&self) -> bool {
        !self.voided && self.resolved_at.is_none()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn is_executed(&self) -> bool {
        self.action != Side::Skip
    }
}

/// Single-row account state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub total_equity: f64,
    pub total_pnl: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
}

impl Portfolio {
    pub fn new(initial_bankroll: f64) -> Self {
        Self {
            cash: initial_bankroll,
            total_equity: initial_bankroll,
            total_pnl: 0.0,
            peak_equity: initial_bankroll,
            max_drawdown: 0.0,
        }
    }

    /// Fold a realized pnl into equity and drawdown tracking.
    pub fn apply_pnl(&mut self, pnl: f64) {
        self.cash += pnl;
        self.total_equity += pnl;
        self.total_pnl += pnl;
        if self.total_equity > self.peak_equity {
            self.peak_equity = self.total_equity;
        }
        if self.peak_equity > 0.0 {
            let dd = ((self.peak_equity - self.total_equity) / self.peak_equity).clamp(0.0, 1.0);
            if dd > self.max_drawdown {
                self.max_drawdown = dd;
            }
        }
    }
}

/// Identity and config snapshot for an uninterrupted period under one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub run_id: String,
    pub model: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_current: bool,
}

/// Audit entry for a model swap, pointing at the run it opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSwapEvent {
    pub id: String,
    pub old_model: String,
    pub new_model: String,
    pub reason: String,
    pub new_run_id: String,
    pub created_at: DateTime<Utc>,
}

/// Paper vs live execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Some(Self::Paper),
            "live" => Some(Self::Live),
            _ => None,
        }
    }
}

/// Scan-cycle mode reported on the health surface and the daily mode log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Initializing,
    Active,
    ObserveOnly,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Initializing => "initializing",
            ScanMode::Active => "active",
            ScanMode::ObserveOnly => "observe_only",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_credibility_ordering() {
        assert!(SourceTier::S1.credibility() > SourceTier::S2.credibility());
        assert!(SourceTier::S5.credibility() > SourceTier::S4.credibility());
        assert_eq!(SourceTier::S6.credibility(), 0.30);
    }

    #[test]
    fn enum_round_trips() {
        for tier in [
            SourceTier::S1,
            SourceTier::S2,
            SourceTier::S3,
            SourceTier::S4,
            SourceTier::S5,
            SourceTier::S6,
        ] {
            assert_eq!(SourceTier::parse(tier.as_str()), Some(tier));
        }
        for side in [Side::BuyYes, Side::BuyNo, Side::Skip] {
            assert_eq!(Side::parse(side.as_str()), Some(side));
        }
        assert_eq!(SkipReason::parse("cooldown"), Some(SkipReason::Cooldown));
        assert_eq!(MarketType::parse("POLITICS"), MarketType::Political);
        assert_eq!(MarketType::parse("weird-category"), MarketType::Other);
    }

    #[test]
    fn orderbook_skew_bounds() {
        let book = OrderBook {
            market_id: "m1".into(),
            bids: vec![PriceLevel {
                price: 0.55,
                size: 300.0,
            }],
            asks: vec![PriceLevel {
                price: 0.57,
                size: 100.0,
            }],
            timestamp: Utc::now(),
        };
        let skew = book.skew(5);
        assert!(skew > 0.0 && skew <= 1.0);
        assert_eq!(book.bid_depth(5), 300.0);
    }

    #[test]
    fn portfolio_drawdown_tracking() {
        let mut p = Portfolio::new(1000.0);
        p.apply_pnl(100.0);
        assert_eq!(p.peak_equity, 1100.0);
        p.apply_pnl(-220.0);
        assert!((p.max_drawdown - 0.2).abs() < 1e-9);
        assert_eq!(p.total_pnl, -120.0);
    }
}
