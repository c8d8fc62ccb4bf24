//! Scheduler and orchestrator: periodic scan driver, per-market pipeline
//! fan-out with error isolation, the tier-2 breaking-news window, the
//! resolution poller, the adverse-move sweeper and the learning feedback path.

use crate::adjust::{adjust, AdjustmentInput};
use crate::config::Config;
use crate::context::{build_prompt, top_signals};
use crate::decision::{
    assign_clusters, calculated_edge, choose_side, position_size, rank_and_gate, score,
    AdverseEvent, DecisionParams, GateContext,
};
use crate::errors::TraderError;
use crate::execution::{
    adverse_move, record_from_candidate, resolve_record, Executor, OrderStyle,
};
use crate::keywords::KeywordExtractor;
use crate::learning::LearningState;
use crate::llm::LmClient;
use crate::market::MarketSource;
use crate::models::{
    InfoType, Market, OrderBook, Portfolio, ScanMode, Side, Signal, SkipReason, SourceKind,
    SourceTier, Tier, TradeCandidate,
};
use crate::sources::{NewsCollector, SocialCollector};
use crate::store::Store;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

const BOOK_SKEW_SIGNAL_THRESHOLD: f64 = 0.3;
const RECENT_EVENTS_FOR_COOLDOWN: usize = 10;
/// Reference stake for counterfactual pnl when a SKIP carried no size.
const COUNTERFACTUAL_BANKROLL_FRACTION: f64 = 0.01;

/// Crypto relevance check for the tier-2 window trigger.
const CRYPTO_TERMS: [&str; 7] = ["btc", "bitcoin", "eth", "ethereum", "solana", "sol", "crypto"];
const TIER2_TRIGGER_MIN_SIGNALS: usize = 2;
const TIER2_TRIGGER_FOLLOWERS: u64 = 100_000;

/// Shared runtime state read by the health surface.
pub struct AppState {
    pub store: Arc<Store>,
    pub last_scan_at: RwLock<Option<DateTime<Utc>>>,
    pub mode: RwLock<ScanMode>,
    pub started_at: DateTime<Utc>,
    /// Set on fatal store errors: new scans halt, resolution and CLI stay up.
    pub fatal: AtomicBool,
}

impl AppState {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            last_scan_at: RwLock::new(None),
            mode: RwLock::new(ScanMode::Initializing),
            started_at: Utc::now(),
            fatal: AtomicBool::new(false),
        }
    }
}

pub struct Scheduler {
    cfg: Config,
    store: Arc<Store>,
    market: Arc<dyn MarketSource>,
    llm: Arc<LmClient>,
    news: Arc<NewsCollector>,
    social: Arc<SocialCollector>,
    keywords: Arc<KeywordExtractor>,
    executor: Arc<Executor>,
    state: Arc<AppState>,
    /// Portfolio and learning state mutate together under one lock.
    pair: Arc<TokioMutex<(Portfolio, LearningState)>>,
    scan_in_flight: [AtomicBool; 2],
    tier2_window_until: RwLock<Option<DateTime<Utc>>>,
}

fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        store: Arc<Store>,
        market: Arc<dyn MarketSource>,
        llm: Arc<LmClient>,
        news: Arc<NewsCollector>,
        social: Arc<SocialCollector>,
        executor: Arc<Executor>,
        state: Arc<AppState>,
        pair: Arc<TokioMutex<(Portfolio, LearningState)>>,
    ) -> Self {
        Self {
            cfg,
            store,
            market,
            llm,
            news,
            social,
            keywords: Arc::new(KeywordExtractor::new()),
            executor,
            state,
            pair,
            scan_in_flight: [AtomicBool::new(false), AtomicBool::new(false)],
            tier2_window_until: RwLock::new(None),
        }
    }

    fn decision_params(&self) -> DecisionParams {
        DecisionParams {
            min_edge_threshold: self.cfg.min_edge_threshold,
            kelly_fraction: self.cfg.kelly_fraction,
            max_position_pct: self.cfg.max_position_pct,
            max_cluster_exposure_pct: self.cfg.max_cluster_exposure_pct,
        }
    }

    /// Spawn every periodic task and run until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut tasks = JoinSet::new();

        {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let mut tick = interval(Duration::from_secs(this.cfg.tier1_scan_minutes * 60));
                loop {
                    tick.tick().await;
                    this.scan_guarded(Tier::Tier1).await;
                }
            });
        }
        {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let mut tick = interval(Duration::from_secs(this.cfg.tier2_scan_minutes * 60));
                loop {
                    tick.tick().await;
                    if this.tier2_window_active() {
                        this.scan_guarded(Tier::Tier2).await;
                    }
                }
            });
        }
        {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let mut tick = interval(Duration::from_secs(this.cfg.news_watch_minutes * 60));
                loop {
                    tick.tick().await;
                    this.watch_breaking_news().await;
                }
            });
        }
        {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let mut tick = interval(Duration::from_secs(this.cfg.resolution_poll_minutes * 60));
                loop {
                    tick.tick().await;
                    this.poll_resolutions().await;
                }
            });
        }
        {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let mut tick = interval(Duration::from_secs(this.cfg.adverse_sweep_minutes * 60));
                loop {
                    tick.tick().await;
                    this.sweep_adverse_moves().await;
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    pub fn tier2_window_active(&self) -> bool {
        match *self.tier2_window_until.read() {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }

    /// Qualifying crypto news opens or extends the tier-2 window.
    pub async fn watch_breaking_news(&self) {
        let signals = self.news.collect().await;
        if self.qualifies_for_tier2(&signals) {
            let until = Utc::now() + ChronoDuration::minutes(self.cfg.tier2_window_minutes as i64);
            *self.tier2_window_until.write() = Some(until);
            info!(until = %until, "tier-2 window opened/extended by breaking crypto news");
        }
    }

    pub fn qualifies_for_tier2(&self, signals: &[Signal]) -> bool {
        // Whole-token matching; substring checks would fire on words like
        // "resolved" or "whether".
        let is_crypto = |text: &str| {
            let lower = text.to_lowercase();
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| CRYPTO_TERMS.contains(&word))
        };
        let crypto: Vec<&Signal> = signals.iter().filter(|s| is_crypto(&s.text)).collect();
        crypto.len() >= TIER2_TRIGGER_MIN_SIGNALS
            && crypto.iter().any(|s| {
                matches!(s.source_tier, SourceTier::S1 | SourceTier::S2)
                    || s.followers >= TIER2_TRIGGER_FOLLOWERS
            })
    }

    /// One scan may be in flight per tier; a long cycle never double-starts.
    async fn scan_guarded(&self, tier: Tier) {
        let slot = match tier {
            Tier::Tier1 => &self.scan_in_flight[0],
            Tier::Tier2 => &self.scan_in_flight[1],
        };
        if slot.swap(true, Ordering::SeqCst) {
            warn!(tier = tier.as_str(), "previous scan still running, skipping tick");
            return;
        }
        self.scan_cycle(tier).await;
        slot.store(false, Ordering::SeqCst);
    }

    fn tier_cap(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Tier1 => self.cfg.tier1_daily_cap,
            Tier::Tier2 => self.cfg.tier2_daily_cap,
        }
    }

    /// Classify a store failure: fatal kinds halt new scans, consistency
    /// kinds abort only the operation that hit them, everything else is
    /// logged and retried on the next tick.
    fn note_store_failure(&self, err: &anyhow::Error, what: &str) {
        match err.downcast_ref::<TraderError>() {
            Some(kind) if kind.is_fatal() => {
                error!(error = %err, what, "fatal store failure, halting new scans");
                self.state.fatal.store(true, Ordering::SeqCst);
            }
            Some(TraderError::Consistency(_)) => {
                error!(error = %err, what, "consistency failure, operation aborted");
            }
            _ => {
                error!(error = %err, what, "store failure");
            }
        }
    }

    /// The full scan pipeline for one tier.
    pub async fn scan_cycle(&self, tier: Tier) {
        if self.state.fatal.load(Ordering::SeqCst) {
            warn!("fatal state set, new scans halted");
            return;
        }
        let now = Utc::now();
        let day_start = utc_day_start(now);

        let executed_today = match self.store.count_executed_since(tier, day_start) {
            Ok(n) => n,
            Err(err) => {
                error!(error = %err, "executed-count query failed, skipping scan");
                return;
            }
        };
        let observe_only = executed_today >= self.tier_cap(tier);

        let mode = if observe_only {
            ScanMode::ObserveOnly
        } else {
            ScanMode::Active
        };
        *self.state.mode.write() = mode;
        if let Err(err) = self.store.log_mode(mode) {
            warn!(error = %err, "mode log write failed");
        }

        let mut markets = match self.market.list_active(tier).await {
            Ok(m) => m,
            Err(err) => {
                // Transient/protocol failures just cost this tick.
                let absorbable = err
                    .downcast_ref::<TraderError>()
                    .map_or(true, TraderError::is_absorbable);
                if absorbable {
                    warn!(tier = tier.as_str(), error = %err, "market listing failed");
                } else {
                    error!(tier = tier.as_str(), error = %err, "market listing failed");
                }
                return;
            }
        };

        // One consistent learning snapshot and equity figure for the scan.
        let (bankroll, learning) = {
            let pair = self.pair.lock().await;
            (pair.0.total_equity, pair.1.clone())
        };

        // Market types with a sustained losing record sit out entirely.
        markets.retain(|m| {
            let disabled = learning.market_types.is_disabled(m.market_type);
            if disabled {
                warn!(market_id = %m.market_id, market_type = m.market_type.as_str(),
                      "market type disabled by performance, dropped from scan");
            }
            !disabled
        });
        if markets.is_empty() {
            *self.state.last_scan_at.write() = Some(Utc::now());
            return;
        }

        let learning = Arc::new(learning);
        let news_signals = Arc::new(self.news.collect().await);

        // Fan out per-market pipelines under bounded concurrency; one
        // market's failure never aborts the scan.
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent_pipelines));
        let mut tasks: JoinSet<Option<TradeCandidate>> = JoinSet::new();
        for market in markets {
            let permit = Arc::clone(&semaphore);
            let learning = Arc::clone(&learning);
            let news_signals = Arc::clone(&news_signals);
            let this = self.pipeline_deps();
            let params = self.decision_params();
            tasks.spawn(async move {
                let _permit = permit.acquire().await.ok()?;
                this.run_market_pipeline(
                    market,
                    tier,
                    observe_only,
                    bankroll,
                    &learning,
                    &news_signals,
                    &params,
                )
                .await
            });
        }

        let mut candidates: Vec<TradeCandidate> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "market pipeline panicked"),
            }
        }

        assign_clusters(&mut candidates);

        let gate_ctx = match self.build_gate_context(tier, executed_today, bankroll, now).await {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(error = %err, "gate context build failed, skipping scan");
                return;
            }
        };
        let gated = rank_and_gate(candidates, &gate_ctx, &self.decision_params());

        let run = match self.store.current_run() {
            Ok(Some(run)) => run,
            Ok(None) => {
                error!("no current experiment run; decisions cannot be recorded");
                return;
            }
            Err(err) => {
                error!(error = %err, "current-run lookup failed");
                self.state.fatal.store(true, Ordering::SeqCst);
                return;
            }
        };

        let mut executed = 0usize;
        let mut skipped = 0usize;
        for candidate in &gated {
            let record = if candidate.side == Side::Skip {
                skipped += 1;
                record_from_candidate(candidate, &run.run_id, &run.model, None, Utc::now())
            } else {
                let depth = candidate.market.liquidity;
                match self
                    .executor
                    .execute(candidate, &run.run_id, &run.model, depth, OrderStyle::Taker)
                    .await
                {
                    Ok(record) => {
                        if record.is_executed() {
                            executed += 1;
                        } else {
                            skipped += 1;
                        }
                        record
                    }
                    Err(err) => {
                        warn!(market_id = %candidate.market.market_id, error = %err,
                              "execution failed, market dropped");
                        continue;
                    }
                }
            };
            if let Err(err) = self.store.insert_record(&record) {
                self.note_store_failure(&err, "record write");
                if self.state.fatal.load(Ordering::SeqCst) {
                    return;
                }
            }
        }

        *self.state.last_scan_at.write() = Some(Utc::now());
        info!(
            tier = tier.as_str(),
            candidates = gated.len(),
            executed,
            skipped,
            observe_only,
            "scan cycle complete"
        );
    }

    fn pipeline_deps(&self) -> PipelineDeps {
        PipelineDeps {
            market_source: Arc::clone(&self.market),
            llm: Arc::clone(&self.llm),
            social: Arc::clone(&self.social),
            keywords: Arc::clone(&self.keywords),
        }
    }

    async fn build_gate_context(
        &self,
        tier: Tier,
        executed_today: u32,
        bankroll: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<GateContext> {
        let day_start = utc_day_start(now);
        let week_start = now - ChronoDuration::days(7);

        let recent = self.store.recent_nonskip_records(RECENT_EVENTS_FOR_COOLDOWN)?;
        let recent_events = recent
            .iter()
            .map(|r| AdverseEvent {
                at: r.resolved_at.unwrap_or(r.created_at),
                adverse: match (r.resolved_at, r.pnl) {
                    (Some(_), Some(pnl)) => pnl < 0.0,
                    _ => r.unrealized_adverse_move > self.cfg.adverse_move_threshold,
                },
            })
            .collect();

        Ok(GateContext {
            total_equity: bankroll,
            tier_executed_today: executed_today,
            tier_cap: self.tier_cap(tier),
            daily_resolved_pnl: self.store.resolved_pnl_since(day_start)?,
            weekly_resolved_pnl: self.store.resolved_pnl_since(week_start)?,
            open_exposure: self.store.open_exposure()?,
            cluster_exposure: self.store.cluster_open_exposure()?,
            recent_events,
            api_spend_today: self.store.api_spend_today()?,
            now,
            daily_loss_limit_pct: self.cfg.daily_loss_limit_pct,
            weekly_loss_limit_pct: self.cfg.weekly_loss_limit_pct,
            max_exposure_pct: self.cfg.max_exposure_pct,
            cooldown_adverse_count: self.cfg.cooldown_adverse_count,
            cooldown_window_hours: self.cfg.cooldown_window_hours,
            daily_api_budget_usd: self.cfg.daily_api_budget_usd,
        })
    }

    /// Resolution poller: settle any open record whose market has resolved,
    /// feed learning and the portfolio, and persist atomically.
    pub async fn poll_resolutions(&self) {
        let open = match self.store.open_records() {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "open-records query failed");
                return;
            }
        };

        for mut record in open {
            let (_, state) = match self.market.get_market(&record.market_id).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(market_id = %record.market_id, error = %err,
                          "resolution check failed, will retry next poll");
                    continue;
                }
            };
            let Some(outcome) = state.outcome() else {
                continue;
            };

            let mut pair = self.pair.lock().await;
            let (portfolio, learning) = &mut *pair;
            let checkpoint = (portfolio.clone(), learning.clone());

            let reference_stake = if record.position_size > 0.0 {
                record.position_size
            } else {
                COUNTERFACTUAL_BANKROLL_FRACTION * portfolio.total_equity
            };
            resolve_record(&mut record, outcome, reference_stake, Utc::now());

            if record.is_executed() {
                if let Some(pnl) = record.pnl {
                    portfolio.apply_pnl(pnl);
                }
            }
            learning.absorb_resolution(&record);

            if let Err(err) = self.store.persist_resolution(&record, learning, portfolio) {
                // Roll the in-memory pair back to what the store still holds.
                (*portfolio, *learning) = checkpoint;
                self.note_store_failure(&err, "resolution persist");
                if self.state.fatal.load(Ordering::SeqCst) {
                    return;
                }
                // Consistency: drop this record's update, keep settling others.
                continue;
            }
            info!(
                record_id = %record.id,
                market_id = %record.market_id,
                outcome,
                pnl = record.pnl.unwrap_or(0.0),
                "record resolved"
            );
        }
    }

    /// Periodic sweep persisting the current adverse-move fraction of every
    /// open executed position.
    pub async fn sweep_adverse_moves(&self) {
        let open = match self.store.open_records() {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "open-records query failed");
                return;
            }
        };

        for record in open.iter().filter(|r| r.is_executed()) {
            let (market, _) = match self.market.get_market(&record.market_id).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(market_id = %record.market_id, error = %err, "adverse sweep fetch failed");
                    continue;
                }
            };
            let entry = record.executed_price.unwrap_or(record.entry_price);
            let current = adverse_move(record.action, entry, market.yes_price);
            if let Err(err) = self.store.update_adverse_move(&record.id, current) {
                warn!(record_id = %record.id, error = %err, "adverse move write failed");
            }
        }
    }
}

/// The per-market pipeline's dependencies, cloneable into spawned tasks.
struct PipelineDeps {
    market_source: Arc<dyn MarketSource>,
    llm: Arc<LmClient>,
    social: Arc<SocialCollector>,
    keywords: Arc<KeywordExtractor>,
}

impl PipelineDeps {
    /// Keyword extraction, signal gathering, LM estimation, adjustment and
    /// preliminary decision for one market. Returns None when the market is
    /// dropped this cycle (transport or parse failure).
    #[allow(clippy::too_many_arguments)]
    async fn run_market_pipeline(
        &self,
        mut market: Market,
        tier: Tier,
        observe_only: bool,
        bankroll: f64,
        learning: &LearningState,
        news_signals: &[Signal],
        params: &DecisionParams,
    ) -> Option<TradeCandidate> {
        let now = Utc::now();
        let resolution_hours = market.hours_to_resolution(now);

        // Keyword extraction must not touch the LM while the cap is hit.
        let lm_for_keywords = if observe_only { None } else { Some(&*self.llm) };
        let keywords = self
            .keywords
            .extract(
                &market.market_id,
                &market.question,
                market.market_type,
                lm_for_keywords,
            )
            .await;
        market.keywords = keywords.clone();

        let mut signals = self.social.collect(&keywords).await;
        signals.extend(
            news_signals
                .iter()
                .filter(|s| {
                    let text = s.text.to_lowercase();
                    keywords.iter().any(|k| text.contains(k.as_str()))
                })
                .cloned(),
        );

        if observe_only {
            // Cap exhausted: keep the counterfactual data, skip the LM spend.
            return Some(TradeCandidate {
                resolution_hours,
                market,
                signals,
                raw_probability: 0.0,
                raw_confidence: 0.0,
                adjusted_probability: 0.0,
                adjusted_confidence: 0.0,
                calculated_edge: 0.0,
                side: Side::Skip,
                position_size: 0.0,
                score: 0.0,
                market_cluster_id: None,
                skip_reason: Some(SkipReason::DailyCapObserveOnly),
                tier,
                adjustments: Default::default(),
                extra_edge: 0.0,
            });
        }

        let book = self.market_source.get_orderbook(&market.market_id).await.ok();
        if let Some(book) = &book {
            let skew = book.skew(5);
            if skew.abs() > BOOK_SKEW_SIGNAL_THRESHOLD {
                signals.push(market_derived_signal(&market, book, skew));
            }
        }

        let prompt = build_prompt(&market, &signals, book.as_ref(), now);
        let estimate = self.llm.call(&prompt, &market.market_id).await?;

        // Stamp LM info types onto the prompt's signal ordering.
        let mut ordered: Vec<Signal> = top_signals(&signals).into_iter().cloned().collect();
        estimate.apply_info_types(&mut ordered);

        let tags: Vec<_> = ordered.iter().filter_map(|s| s.tag()).collect();
        let freshest_age = ordered
            .iter()
            .map(|s| s.age_hours(now))
            .fold(None, |acc: Option<f64>, age| {
                Some(acc.map_or(age, |a| a.min(age)))
            });

        let adjusted = adjust(
            &AdjustmentInput {
                raw_probability: estimate.estimated_probability,
                raw_confidence: estimate.confidence,
                market_type: market.market_type,
                signal_tags: &tags,
                freshest_age_hours: freshest_age,
            },
            learning,
        );

        let edge = calculated_edge(
            adjusted.adjusted_probability,
            market.yes_price,
            market.fee_rate,
            adjusted.extra_edge,
        );
        let mut side = choose_side(adjusted.adjusted_probability, market.yes_price);
        let mut skip_reason = None;
        if edge <= params.min_edge_threshold {
            side = Side::Skip;
            skip_reason = Some(SkipReason::EdgeBelowThreshold);
        }

        // Kelly sizing always takes the YES market price; the NO-side odds
        // are derived from it inside the formula.
        let size = if side == Side::Skip {
            0.0
        } else {
            position_size(
                side,
                adjusted.adjusted_probability,
                market.yes_price,
                bankroll,
                params,
            )
        };

        Some(TradeCandidate {
            resolution_hours,
            market,
            signals: ordered,
            raw_probability: estimate.estimated_probability,
            raw_confidence: estimate.confidence,
            adjusted_probability: adjusted.adjusted_probability,
            adjusted_confidence: adjusted.adjusted_confidence,
            calculated_edge: edge,
            side,
            position_size: size,
            score: score(edge, adjusted.adjusted_confidence, resolution_hours),
            market_cluster_id: None,
            skip_reason,
            tier,
            adjustments: adjusted.trace,
            extra_edge: adjusted.extra_edge,
        })
    }
}

fn market_derived_signal(market: &Market, book: &OrderBook, skew: f64) -> Signal {
    Signal {
        source_kind: SourceKind::MarketDerived,
        source_tier: SourceTier::S5,
        info_type: Some(InfoType::I6),
        text: format!(
            "Order book skew {:+.2} on {} (bid ${:.0} vs ask ${:.0})",
            skew,
            market.market_id,
            book.bid_depth(5),
            book.ask_depth(5)
        ),
        credibility: SourceTier::S5.credibility(),
        author: None,
        followers: 0,
        engagement: 0,
        timestamp: book.timestamp,
        headline_only: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn crypto_signal(text: &str, tier: SourceTier, followers: u64) -> Signal {
        Signal {
            source_kind: SourceKind::News,
            source_tier: tier,
            info_type: None,
            text: text.to_string(),
            credibility: tier.credibility(),
            author: None,
            followers,
            engagement: 0,
            timestamp: Utc::now(),
            headline_only: true,
        }
    }

    fn bare_scheduler() -> Scheduler {
        // Enough plumbing for the pure helpers under test.
        std::env::set_var("LM_API_KEY", "test");
        std::env::set_var("SOCIAL_API_KEY", "test");
        let cfg = Config::from_env().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let market: Arc<dyn MarketSource> =
            Arc::new(crate::market::MockMarketSource::new(vec![]));
        let llm = Arc::new(LmClient::new(&cfg, Arc::clone(&store)));
        let classifier = Arc::new(crate::sources::SourceClassifier::new(
            &crate::config::SourceLists::default(),
        ));
        let news = Arc::new(NewsCollector::new(
            Arc::new(crate::sources::HttpFeedFetcher::new(1)),
            Arc::clone(&classifier),
            &crate::config::FeedList::default(),
        ));
        let social = Arc::new(SocialCollector::new(
            Arc::new(crate::sources::HttpSocialClient::new(&cfg)),
            classifier,
            Arc::clone(&store),
            cfg.social_usd_per_call,
        ));
        let executor = Arc::new(Executor::new(
            crate::models::TradingMode::Paper,
            Arc::clone(&market),
        ));
        let state = Arc::new(AppState::new(Arc::clone(&store)));
        let pair = Arc::new(TokioMutex::new((
            Portfolio::new(5000.0),
            LearningState::new(),
        )));
        Scheduler::new(cfg, store, market, llm, news, social, executor, state, pair)
    }

    #[test]
    fn tier2_trigger_needs_two_crypto_signals_and_a_strong_one() {
        let sched = bare_scheduler();

        // Two crypto signals, one S2 wire source: qualifies
        let qualifying = vec![
            crypto_signal("Bitcoin ETF inflows surge", SourceTier::S2, 0),
            crypto_signal("ETH spikes after upgrade", SourceTier::S6, 500),
        ];
        assert!(sched.qualifies_for_tier2(&qualifying));

        // Two crypto signals, neither strong: no window
        let weak = vec![
            crypto_signal("btc chatter", SourceTier::S6, 10),
            crypto_signal("eth chatter", SourceTier::S6, 10),
        ];
        assert!(!sched.qualifies_for_tier2(&weak));

        // A 100k-follower account substitutes for a wire source
        let big_account = vec![
            crypto_signal("solana outage resolved", SourceTier::S6, 150_000),
            crypto_signal("sol validators restarting", SourceTier::S6, 10),
        ];
        assert!(sched.qualifies_for_tier2(&big_account));

        // One crypto signal is not enough
        let single = vec![crypto_signal("bitcoin news", SourceTier::S1, 0)];
        assert!(!sched.qualifies_for_tier2(&single));

        // Non-crypto headlines never qualify
        let unrelated = vec![
            crypto_signal("Election polls tighten", SourceTier::S1, 0),
            crypto_signal("Fed holds rates", SourceTier::S2, 0),
        ];
        assert!(!sched.qualifies_for_tier2(&unrelated));
    }

    #[test]
    fn store_failures_classify_into_halt_or_abort() {
        let sched = bare_scheduler();

        let consistency: anyhow::Error = TraderError::Consistency("missing run".into()).into();
        sched.note_store_failure(&consistency, "record write");
        assert!(!sched.state.fatal.load(Ordering::SeqCst));

        let transient: anyhow::Error = TraderError::TransientIo("disk busy".into()).into();
        sched.note_store_failure(&transient, "record write");
        assert!(!sched.state.fatal.load(Ordering::SeqCst));

        let fatal: anyhow::Error = TraderError::Fatal("commit failed".into()).into();
        sched.note_store_failure(&fatal, "resolution persist");
        assert!(sched.state.fatal.load(Ordering::SeqCst));
    }

    #[test]
    fn day_start_truncates_to_midnight() {
        let now = Utc::now();
        let start = utc_day_start(now);
        assert_eq!(start.hour(), 0);
        assert_eq!(start.minute(), 0);
        assert!(now - start < ChronoDuration::hours(24));
    }
}
