//! Health endpoint: scan freshness, current mode and basic trade counts.

use crate::scheduler::AppState;
use axum::{extract::State, response::Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

const DEGRADED_AFTER_MINUTES: i64 = 30;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_scan_at: Option<String>,
    pub minutes_since_scan: Option<i64>,
    pub mode: &'static str,
    pub open_trades: u64,
    pub trades_today: u64,
    pub uptime_secs: i64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = Utc::now();
    let last_scan = *state.last_scan_at.read();
    let minutes_since = last_scan.map(|t| (now - t).num_minutes());

    let status = match minutes_since {
        Some(m) if m <= DEGRADED_AFTER_MINUTES => "healthy",
        _ => "degraded",
    };

    let day_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);

    Json(HealthResponse {
        status,
        last_scan_at: last_scan.map(|t| t.to_rfc3339()),
        minutes_since_scan: minutes_since,
        mode: state.mode.read().as_str(),
        open_trades: state.store.count_open().unwrap_or(0),
        trades_today: state.store.count_created_since(day_start).unwrap_or(0),
        uptime_secs: (now - state.started_at).num_seconds(),
    })
}
