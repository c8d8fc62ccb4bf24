//! Persistent store: single SQLite connection in WAL mode behind a mutex.
//!
//! Single-writer transactional model. Trade-record writes require an existing
//! experiment run (FK enforced); the resolution feedback path persists the
//! updated record, all three learning tables and the portfolio in one
//! transaction.

use crate::errors::TraderError;
use crate::learning::{
    CalibrationManager, LearningState, MarketTypeManager, MarketTypePerformance,
    SignalTrackerManager, TrackerCounts, TrackerKey,
};
use crate::models::{
    ExperimentRun, InfoType, MarketType, ModelSwapEvent, Portfolio, ScanMode, Side, SignalTag,
    SkipReason, SourceTier, Tier, TradeRecord,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Transaction};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS experiment_runs (
    run_id TEXT PRIMARY KEY,
    model TEXT NOT NULL,
    description TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    is_current INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS model_swaps (
    id TEXT PRIMARY KEY,
    old_model TEXT NOT NULL,
    new_model TEXT NOT NULL,
    reason TEXT NOT NULL,
    new_run_id TEXT NOT NULL REFERENCES experiment_runs(run_id),
    created_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS trade_records (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES experiment_runs(run_id),
    model TEXT NOT NULL,
    tier TEXT NOT NULL,
    market_id TEXT NOT NULL,
    question TEXT NOT NULL,
    market_type TEXT NOT NULL,
    yes_price REAL NOT NULL,
    no_price REAL NOT NULL,
    resolution_time INTEGER NOT NULL,
    resolution_hours REAL NOT NULL,
    volume_24h REAL NOT NULL,
    liquidity REAL NOT NULL,
    fee_rate REAL NOT NULL,
    raw_probability REAL NOT NULL,
    raw_confidence REAL NOT NULL,
    calibration_delta REAL NOT NULL DEFAULT 0,
    signal_weight_delta REAL NOT NULL DEFAULT 0,
    shrinkage_delta REAL NOT NULL DEFAULT 0,
    temporal_delta REAL NOT NULL DEFAULT 0,
    adjusted_probability REAL NOT NULL,
    adjusted_confidence REAL NOT NULL,
    extra_edge REAL NOT NULL DEFAULT 0,
    action TEXT NOT NULL,
    position_size REAL NOT NULL DEFAULT 0,
    kelly_fraction REAL NOT NULL DEFAULT 0,
    entry_price REAL NOT NULL,
    executed_price REAL,
    calculated_edge REAL NOT NULL,
    score REAL NOT NULL,
    skip_reason TEXT,
    market_cluster_id TEXT,
    signal_tags_json TEXT NOT NULL DEFAULT '[]',
    actual_outcome REAL,
    pnl REAL,
    brier_raw REAL,
    brier_adjusted REAL,
    resolved_at INTEGER,
    unrealized_adverse_move REAL NOT NULL DEFAULT 0,
    voided INTEGER NOT NULL DEFAULT 0,
    void_reason TEXT,
    headline_only INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
) WITHOUT ROWID;

-- Partial index over open (unresolved, non-void) records: the resolution
-- poller and the exposure queries hit this constantly.
CREATE INDEX IF NOT EXISTS idx_trade_records_open
    ON trade_records(created_at DESC) WHERE resolved_at IS NULL AND voided = 0;

CREATE INDEX IF NOT EXISTS idx_trade_records_headline
    ON trade_records(created_at DESC) WHERE headline_only = 1;

CREATE INDEX IF NOT EXISTS idx_trade_records_resolved
    ON trade_records(resolved_at ASC) WHERE resolved_at IS NOT NULL AND voided = 0;

CREATE INDEX IF NOT EXISTS idx_trade_records_market
    ON trade_records(market_id, created_at DESC);

CREATE TABLE IF NOT EXISTS calibration_buckets (
    lo REAL PRIMARY KEY,
    hi REAL NOT NULL,
    alpha REAL NOT NULL,
    beta REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS market_type_performance (
    market_type TEXT PRIMARY KEY,
    total_trades INTEGER NOT NULL,
    total_pnl REAL NOT NULL,
    brier_scores_json TEXT NOT NULL,
    total_observed_skips INTEGER NOT NULL,
    counterfactual_pnl REAL NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS signal_trackers (
    tier TEXT NOT NULL,
    info_type TEXT NOT NULL,
    market_type TEXT NOT NULL,
    present_winning INTEGER NOT NULL,
    present_losing INTEGER NOT NULL,
    absent_winning INTEGER NOT NULL,
    absent_losing INTEGER NOT NULL,
    PRIMARY KEY (tier, info_type, market_type)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS portfolio (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    cash REAL NOT NULL,
    total_equity REAL NOT NULL,
    total_pnl REAL NOT NULL,
    peak_equity REAL NOT NULL,
    max_drawdown REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS api_costs (
    day TEXT NOT NULL,
    service TEXT NOT NULL,
    calls INTEGER NOT NULL DEFAULT 0,
    usd REAL NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (day, service)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS daily_modes (
    day TEXT NOT NULL,
    mode TEXT NOT NULL,
    changed_at INTEGER NOT NULL,
    PRIMARY KEY (day, changed_at)
) WITHOUT ROWID;
"#;

const RECORD_COLUMNS: &str = "id, run_id, model, tier, market_id, question, market_type, \
     yes_price, no_price, resolution_time, resolution_hours, volume_24h, liquidity, fee_rate, \
     raw_probability, raw_confidence, calibration_delta, signal_weight_delta, shrinkage_delta, \
     temporal_delta, adjusted_probability, adjusted_confidence, extra_edge, action, \
     position_size, kelly_fraction, entry_price, executed_price, calculated_edge, score, \
     skip_reason, market_cluster_id, signal_tags_json, actual_outcome, pnl, brier_raw, \
     brier_adjusted, resolved_at, unrealized_adverse_move, voided, void_reason, headline_only, \
     created_at";

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn dt(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn tags_to_json(tags: &[SignalTag]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn tags_from_json(json: &str) -> Vec<SignalTag> {
    serde_json::from_str(json).unwrap_or_default()
}

fn is_fk_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("open database at {}", db_path))?;
        Self::init(conn, db_path)
    }

    /// Throwaway store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if label != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!(path = label, "store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- experiment runs -------------------------------------------------

    /// Open a new run and make it current; ends any previous current run.
    pub fn start_run(&self, model: &str, description: &str) -> Result<ExperimentRun> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        tx.execute(
            "UPDATE experiment_runs SET is_current = 0, ended_at = COALESCE(ended_at, ?1) \
             WHERE is_current = 1",
            params![ts(now)],
        )?;
        let run = ExperimentRun {
            run_id: Uuid::new_v4().to_string(),
            model: model.to_string(),
            description: description.to_string(),
            started_at: now,
            ended_at: None,
            is_current: true,
        };
        tx.execute(
            "INSERT INTO experiment_runs (run_id, model, description, started_at, ended_at, is_current) \
             VALUES (?1, ?2, ?3, ?4, NULL, 1)",
            params![run.run_id, run.model, run.description, ts(run.started_at)],
        )?;
        tx.commit()?;
        Ok(run)
    }

    pub fn current_run(&self) -> Result<Option<ExperimentRun>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT run_id, model, description, started_at, ended_at, is_current \
             FROM experiment_runs WHERE is_current = 1 LIMIT 1",
        )?;
        let run = stmt
            .query_row([], |row| {
                Ok(ExperimentRun {
                    run_id: row.get(0)?,
                    model: row.get(1)?,
                    description: row.get(2)?,
                    started_at: dt(row.get(3)?),
                    ended_at: row.get::<_, Option<i64>>(4)?.map(dt),
                    is_current: row.get::<_, i64>(5)? != 0,
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(run)
    }

    pub fn end_run(&self, run_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE experiment_runs SET ended_at = ?1, is_current = 0 \
             WHERE run_id = ?2 AND ended_at IS NULL",
            params![ts(Utc::now()), run_id],
        )?;
        if changed == 0 {
            return Err(TraderError::Consistency(format!(
                "no open experiment run {}",
                run_id
            ))
            .into());
        }
        Ok(())
    }

    pub fn record_model_swap(&self, event: &ModelSwapEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO model_swaps (id, old_model, new_model, reason, new_run_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.old_model,
                event.new_model,
                event.reason,
                event.new_run_id,
                ts(event.created_at)
            ],
        )
        .map_err(|e| {
            if is_fk_violation(&e) {
                anyhow!(TraderError::Consistency(format!(
                    "model swap references missing run {}",
                    event.new_run_id
                )))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    // ---- trade records ---------------------------------------------------

    pub fn insert_record(&self, record: &TradeRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO trade_records ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                  ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, \
                  ?33, ?34, ?35, ?36, ?37, ?38, ?39, ?40, ?41, ?42, ?43)",
                RECORD_COLUMNS
            ),
            params![
                record.id,
                record.run_id,
                record.model,
                record.tier.as_str(),
                record.market_id,
                record.question,
                record.market_type.as_str(),
                record.yes_price,
                record.no_price,
                ts(record.resolution_time),
                record.resolution_hours,
                record.volume_24h,
                record.liquidity,
                record.fee_rate,
                record.raw_probability,
                record.raw_confidence,
                record.adjustments.calibration_delta,
                record.adjustments.signal_weight_delta,
                record.adjustments.shrinkage_delta,
                record.adjustments.temporal_delta,
                record.adjusted_probability,
                record.adjusted_confidence,
                record.extra_edge,
                record.action.as_str(),
                record.position_size,
                record.kelly_fraction,
                record.entry_price,
                record.executed_price,
                record.calculated_edge,
                record.score,
                record.skip_reason.map(|r| r.as_str()),
                record.market_cluster_id,
                tags_to_json(&record.signal_tags),
                record.actual_outcome,
                record.pnl,
                record.brier_raw,
                record.brier_adjusted,
                record.resolved_at.map(ts),
                record.unrealized_adverse_move,
                record.voided as i64,
                record.void_reason,
                record.headline_only as i64,
                ts(record.created_at),
            ],
        )
        .map_err(|e| {
            if is_fk_violation(&e) {
                anyhow!(TraderError::Consistency(format!(
                    "trade record {} references missing run {}",
                    record.id, record.run_id
                )))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TradeRecord> {
        let tier: String = row.get(3)?;
        let market_type: String = row.get(6)?;
        let action: String = row.get(23)?;
        let skip_reason: Option<String> = row.get(30)?;
        let tags_json: String = row.get(32)?;
        Ok(TradeRecord {
            id: row.get(0)?,
            run_id: row.get(1)?,
            model: row.get(2)?,
            tier: Tier::parse(&tier).unwrap_or(Tier::Tier1),
            market_id: row.get(4)?,
            question: row.get(5)?,
            market_type: MarketType::parse(&market_type),
            yes_price: row.get(7)?,
            no_price: row.get(8)?,
            resolution_time: dt(row.get(9)?),
            resolution_hours: row.get(10)?,
            volume_24h: row.get(11)?,
            liquidity: row.get(12)?,
            fee_rate: row.get(13)?,
            raw_probability: row.get(14)?,
            raw_confidence: row.get(15)?,
            adjustments: crate::models::AdjustmentTrace {
                calibration_delta: row.get(16)?,
                signal_weight_delta: row.get(17)?,
                shrinkage_delta: row.get(18)?,
                temporal_delta: row.get(19)?,
            },
            adjusted_probability: row.get(20)?,
            adjusted_confidence: row.get(21)?,
            extra_edge: row.get(22)?,
            action: Side::parse(&action).unwrap_or(Side::Skip),
            position_size: row.get(24)?,
            kelly_fraction: row.get(25)?,
            entry_price: row.get(26)?,
            executed_price: row.get(27)?,
            calculated_edge: row.get(28)?,
            score: row.get(29)?,
            skip_reason: skip_reason.as_deref().and_then(SkipReason::parse),
            market_cluster_id: row.get(31)?,
            signal_tags: tags_from_json(&tags_json),
            actual_outcome: row.get(33)?,
            pnl: row.get(34)?,
            brier_raw: row.get(35)?,
            brier_adjusted: row.get(36)?,
            resolved_at: row.get::<_, Option<i64>>(37)?.map(dt),
            unrealized_adverse_move: row.get(38)?,
            voided: row.get::<_, i64>(39)? != 0,
            void_reason: row.get(40)?,
            headline_only: row.get::<_, i64>(41)? != 0,
            created_at: dt(row.get(42)?),
        })
    }

    pub fn get_record(&self, id: &str) -> Result<Option<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM trade_records WHERE id = ?1",
            RECORD_COLUMNS
        ))?;
        let record = stmt
            .query_row(params![id], Self::row_to_record)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(record)
    }

    pub fn open_records(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM trade_records \
             WHERE resolved_at IS NULL AND voided = 0 ORDER BY created_at ASC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Resolved, non-void records in ascending resolution order: the replay
    /// input for void and recalculate_learning.
    pub fn resolved_nonvoid_records(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM trade_records \
             WHERE resolved_at IS NOT NULL AND voided = 0 ORDER BY resolved_at ASC, id ASC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Recent non-SKIP records, most recent first, for the cooldown walk.
    pub fn recent_nonskip_records(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM trade_records \
             WHERE action != 'SKIP' AND voided = 0 ORDER BY created_at DESC LIMIT ?1",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_executed_since(&self, tier: Tier, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trade_records \
             WHERE tier = ?1 AND action != 'SKIP' AND voided = 0 AND created_at >= ?2",
            params![tier.as_str(), ts(since)],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn resolved_pnl_since(&self, since: DateTime<Utc>) -> Result<f64> {
        let conn = self.conn.lock();
        let pnl: f64 = conn.query_row(
            "SELECT COALESCE(SUM(pnl), 0) FROM trade_records \
             WHERE action != 'SKIP' AND voided = 0 AND resolved_at >= ?1",
            params![ts(since)],
            |row| row.get(0),
        )?;
        Ok(pnl)
    }

    pub fn open_exposure(&self) -> Result<f64> {
        let conn = self.conn.lock();
        let sum: f64 = conn.query_row(
            "SELECT COALESCE(SUM(position_size), 0) FROM trade_records \
             WHERE resolved_at IS NULL AND voided = 0 AND action != 'SKIP'",
            [],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    pub fn cluster_open_exposure(&self) -> Result<HashMap<String, f64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT market_cluster_id, COALESCE(SUM(position_size), 0) FROM trade_records \
             WHERE resolved_at IS NULL AND voided = 0 AND action != 'SKIP' \
               AND market_cluster_id IS NOT NULL \
             GROUP BY market_cluster_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            out.insert(k, v);
        }
        Ok(out)
    }

    pub fn count_open(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trade_records WHERE resolved_at IS NULL AND voided = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trade_records WHERE created_at >= ?1",
            params![ts(since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn update_adverse_move(&self, record_id: &str, adverse_move: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE trade_records SET unrealized_adverse_move = ?1 \
             WHERE id = ?2 AND resolved_at IS NULL AND voided = 0",
            params![adverse_move, record_id],
        )?;
        Ok(())
    }

    /// Mark a record voided. Errors when the record does not exist or is
    /// already void, so the CLI can exit nonzero.
    pub fn void_record(&self, record_id: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE trade_records SET voided = 1, void_reason = ?1 \
             WHERE id = ?2 AND voided = 0",
            params![reason, record_id],
        )?;
        if changed == 0 {
            return Err(TraderError::Consistency(format!(
                "record {} missing or already void",
                record_id
            ))
            .into());
        }
        Ok(())
    }

    /// Persist a resolution: the updated record, all three learning tables
    /// and the portfolio in one transaction.
    pub fn persist_resolution(
        &self,
        record: &TradeRecord,
        learning: &LearningState,
        portfolio: &Portfolio,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE trade_records SET actual_outcome = ?1, pnl = ?2, brier_raw = ?3, \
             brier_adjusted = ?4, resolved_at = ?5, executed_price = ?6, \
             unrealized_adverse_move = ?7 WHERE id = ?8",
            params![
                record.actual_outcome,
                record.pnl,
                record.brier_raw,
                record.brier_adjusted,
                record.resolved_at.map(ts),
                record.executed_price,
                record.unrealized_adverse_move,
                record.id,
            ],
        )?;
        if changed == 0 {
            return Err(
                TraderError::Consistency(format!("resolved record {} missing", record.id)).into(),
            );
        }
        Self::save_learning_tx(&tx, learning)?;
        Self::save_portfolio_tx(&tx, portfolio)?;
        // Losing this commit desynchronizes learning from the record history.
        tx.commit().map_err(|e| {
            anyhow!(TraderError::Fatal(format!(
                "resolution commit for {} failed: {}",
                record.id, e
            )))
        })?;
        Ok(())
    }

    // ---- learning state --------------------------------------------------

    fn save_learning_tx(tx: &Transaction<'_>, learning: &LearningState) -> Result<()> {
        tx.execute("DELETE FROM calibration_buckets", [])?;
        for b in learning.calibration.buckets() {
            tx.execute(
                "INSERT INTO calibration_buckets (lo, hi, alpha, beta) VALUES (?1, ?2, ?3, ?4)",
                params![b.lo, b.hi, b.alpha, b.beta],
            )?;
        }

        tx.execute("DELETE FROM market_type_performance", [])?;
        for perf in learning.market_types.iter() {
            tx.execute(
                "INSERT INTO market_type_performance \
                 (market_type, total_trades, total_pnl, brier_scores_json, \
                  total_observed_skips, counterfactual_pnl) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    perf.market_type.as_str(),
                    perf.total_trades as i64,
                    perf.total_pnl,
                    serde_json::to_string(&perf.brier_scores)?,
                    perf.total_observed_skips as i64,
                    perf.counterfactual_pnl,
                ],
            )?;
        }

        tx.execute("DELETE FROM signal_trackers", [])?;
        for (key, counts) in learning.signals.iter() {
            tx.execute(
                "INSERT INTO signal_trackers \
                 (tier, info_type, market_type, present_winning, present_losing, \
                  absent_winning, absent_losing) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    key.tier.as_str(),
                    key.info_type.as_str(),
                    key.market_type.as_str(),
                    counts.present_winning as i64,
                    counts.present_losing as i64,
                    counts.absent_winning as i64,
                    counts.absent_losing as i64,
                ],
            )?;
        }
        Ok(())
    }

    pub fn save_learning(&self, learning: &LearningState) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::save_learning_tx(&tx, learning)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_learning(&self) -> Result<LearningState> {
        let conn = self.conn.lock();

        let mut calibration = CalibrationManager::new();
        let mut stmt =
            conn.prepare_cached("SELECT lo, alpha, beta FROM calibration_buckets")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;
        for row in rows {
            let (lo, alpha, beta) = row?;
            calibration.restore_bucket(lo, alpha, beta);
        }

        let mut market_types = MarketTypeManager::new();
        let mut stmt = conn.prepare_cached(
            "SELECT market_type, total_trades, total_pnl, brier_scores_json, \
             total_observed_skips, counterfactual_pnl FROM market_type_performance",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;
        for row in rows {
            let (mt, trades, pnl, brier_json, skips, cf_pnl) = row?;
            market_types.restore(MarketTypePerformance {
                market_type: MarketType::parse(&mt),
                total_trades: trades.max(0) as u64,
                total_pnl: pnl,
                brier_scores: serde_json::from_str(&brier_json).unwrap_or_default(),
                total_observed_skips: skips.max(0) as u64,
                counterfactual_pnl: cf_pnl,
            });
        }

        let mut signals = SignalTrackerManager::new();
        let mut stmt = conn.prepare_cached(
            "SELECT tier, info_type, market_type, present_winning, present_losing, \
             absent_winning, absent_losing FROM signal_trackers",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        for row in rows {
            let (tier, info, mt, pw, pl, aw, al) = row?;
            let (Some(tier), Some(info)) = (SourceTier::parse(&tier), InfoType::parse(&info))
            else {
                continue;
            };
            signals.restore(
                TrackerKey {
                    tier,
                    info_type: info,
                    market_type: MarketType::parse(&mt),
                },
                TrackerCounts {
                    present_winning: pw.max(0) as u64,
                    present_losing: pl.max(0) as u64,
                    absent_winning: aw.max(0) as u64,
                    absent_losing: al.max(0) as u64,
                },
            );
        }

        Ok(LearningState {
            calibration,
            market_types,
            signals,
        })
    }

    // ---- portfolio -------------------------------------------------------

    fn save_portfolio_tx(tx: &Transaction<'_>, portfolio: &Portfolio) -> Result<()> {
        tx.execute(
            "INSERT INTO portfolio (id, cash, total_equity, total_pnl, peak_equity, max_drawdown) \
             VALUES (1, ?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET cash = ?1, total_equity = ?2, total_pnl = ?3, \
             peak_equity = ?4, max_drawdown = ?5",
            params![
                portfolio.cash,
                portfolio.total_equity,
                portfolio.total_pnl,
                portfolio.peak_equity,
                portfolio.max_drawdown,
            ],
        )?;
        Ok(())
    }

    pub fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::save_portfolio_tx(&tx, portfolio)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_or_init_portfolio(&self, initial_bankroll: f64) -> Result<Portfolio> {
        {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT cash, total_equity, total_pnl, peak_equity, max_drawdown \
                 FROM portfolio WHERE id = 1",
            )?;
            let loaded = stmt
                .query_row([], |row| {
                    Ok(Portfolio {
                        cash: row.get(0)?,
                        total_equity: row.get(1)?,
                        total_pnl: row.get(2)?,
                        peak_equity: row.get(3)?,
                        max_drawdown: row.get(4)?,
                    })
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            if let Some(p) = loaded {
                return Ok(p);
            }
        }
        let fresh = Portfolio::new(initial_bankroll);
        self.save_portfolio(&fresh)?;
        Ok(fresh)
    }

    // ---- api costs and modes --------------------------------------------

    pub fn add_api_cost(&self, service: &str, calls: u64, usd: f64) -> Result<()> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO api_costs (day, service, calls, usd, failures) \
             VALUES (?1, ?2, ?3, ?4, 0) \
             ON CONFLICT(day, service) DO UPDATE SET calls = calls + ?3, usd = usd + ?4",
            params![day, service, calls as i64, usd],
        )?;
        Ok(())
    }

    pub fn add_parse_failure(&self, service: &str) -> Result<()> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO api_costs (day, service, calls, usd, failures) \
             VALUES (?1, ?2, 0, 0, 1) \
             ON CONFLICT(day, service) DO UPDATE SET failures = failures + 1",
            params![day, service],
        )?;
        Ok(())
    }

    /// Combined LM + social spend for today, the api-budget gate input.
    pub fn api_spend_today(&self) -> Result<f64> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        let usd: f64 = conn.query_row(
            "SELECT COALESCE(SUM(usd), 0) FROM api_costs WHERE day = ?1",
            params![day],
            |row| row.get(0),
        )?;
        Ok(usd)
    }

    pub fn service_stats_today(&self, service: &str) -> Result<(u64, f64, u64)> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT calls, usd, failures FROM api_costs WHERE day = ?1 AND service = ?2",
                params![day, service],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)? as u64,
                    ))
                },
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok((0, 0.0, 0)),
                other => Err(other),
            })?;
        Ok(row)
    }

    pub fn log_mode(&self, mode: ScanMode) -> Result<()> {
        let now = Utc::now();
        let day = now.format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO daily_modes (day, mode, changed_at) VALUES (?1, ?2, ?3)",
            params![day, mode.as_str(), ts(now)],
        )?;
        Ok(())
    }
}
