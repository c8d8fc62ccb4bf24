//! Runtime configuration: typed env parsing plus the two YAML source lists.

use crate::models::TradingMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Mandatory credentials
    pub lm_api_key: String,
    pub social_api_key: String,

    pub trading_mode: TradingMode,
    pub initial_bankroll: f64,
    pub database_path: String,
    pub health_port: u16,

    // LM
    pub lm_base_url: String,
    pub lm_model: String,
    pub lm_max_tokens: u32,
    pub lm_timeout_secs: u64,
    pub lm_usd_per_input_token: f64,
    pub lm_usd_per_output_token: f64,

    // Collectors / market data
    pub social_base_url: String,
    pub social_usd_per_call: f64,
    pub market_base_url: String,
    pub market_timeout_secs: u64,
    pub social_timeout_secs: u64,
    pub sources_config_path: String,
    pub feeds_config_path: String,

    // Decision thresholds
    pub min_edge_threshold: f64,
    pub kelly_fraction: f64,
    pub max_position_pct: f64,
    pub max_cluster_exposure_pct: f64,

    // Risk gate
    pub tier1_daily_cap: u32,
    pub tier2_daily_cap: u32,
    pub daily_loss_limit_pct: f64,
    pub weekly_loss_limit_pct: f64,
    pub max_exposure_pct: f64,
    pub cooldown_window_hours: f64,
    pub cooldown_adverse_count: u32,
    pub adverse_move_threshold: f64,
    pub daily_api_budget_usd: f64,

    // Scheduling
    pub tier1_scan_minutes: u64,
    pub tier2_scan_minutes: u64,
    pub news_watch_minutes: u64,
    pub resolution_poll_minutes: u64,
    pub adverse_sweep_minutes: u64,
    pub tier2_window_minutes: u64,
    pub max_concurrent_pipelines: usize,

    // Tier-1 market filter
    pub tier1_min_resolution_hours: f64,
    pub tier1_max_resolution_hours: f64,
    pub tier1_liquidity_floor: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let lm_api_key = std::env::var("LM_API_KEY").context("LM_API_KEY missing (set env var)")?;
        let social_api_key =
            std::env::var("SOCIAL_API_KEY").context("SOCIAL_API_KEY missing (set env var)")?;

        let trading_mode = std::env::var("TRADING_MODE")
            .ok()
            .and_then(|v| TradingMode::parse(&v))
            .unwrap_or(TradingMode::Paper);

        Ok(Self {
            lm_api_key,
            social_api_key,
            trading_mode,
            initial_bankroll: env_f64("INITIAL_BANKROLL", 5000.0),
            database_path: env_string("DATABASE_PATH", "./monkbot.db"),
            health_port: env_u32("HEALTH_PORT", 8080) as u16,

            lm_base_url: env_string("LM_BASE_URL", "https://openrouter.ai/api/v1"),
            lm_model: env_string("LM_MODEL", "anthropic/claude-sonnet-4.5"),
            lm_max_tokens: env_u32("LM_MAX_TOKENS", 900),
            lm_timeout_secs: env_u64("LM_TIMEOUT_SECS", 30),
            lm_usd_per_input_token: env_f64("LM_USD_PER_INPUT_TOKEN", 3e-6),
            lm_usd_per_output_token: env_f64("LM_USD_PER_OUTPUT_TOKEN", 15e-6),

            social_base_url: env_string("SOCIAL_BASE_URL", "https://api.social.example/v2"),
            social_usd_per_call: env_f64("SOCIAL_USD_PER_CALL", 0.005),
            market_base_url: env_string("MARKET_BASE_URL", "https://gamma-api.polymarket.com"),
            market_timeout_secs: env_u64("MARKET_TIMEOUT_SECS", 5),
            social_timeout_secs: env_u64("SOCIAL_TIMEOUT_SECS", 5),
            sources_config_path: env_string("SOURCES_CONFIG", "./config/sources.yaml"),
            feeds_config_path: env_string("FEEDS_CONFIG", "./config/feeds.yaml"),

            min_edge_threshold: env_f64("MIN_EDGE_THRESHOLD", 0.03),
            kelly_fraction: env_f64("KELLY_FRACTION", 0.25),
            max_position_pct: env_f64("MAX_POSITION_PCT", 0.08),
            max_cluster_exposure_pct: env_f64("MAX_CLUSTER_EXPOSURE_PCT", 0.12),

            tier1_daily_cap: env_u32("TIER1_DAILY_CAP", 5),
            tier2_daily_cap: env_u32("TIER2_DAILY_CAP", 10),
            daily_loss_limit_pct: env_f64("DAILY_LOSS_LIMIT_PCT", 0.05),
            weekly_loss_limit_pct: env_f64("WEEKLY_LOSS_LIMIT_PCT", 0.10),
            max_exposure_pct: env_f64("MAX_EXPOSURE_PCT", 0.30),
            cooldown_window_hours: env_f64("COOLDOWN_WINDOW_HOURS", 2.0),
            cooldown_adverse_count: env_u32("COOLDOWN_ADVERSE_COUNT", 3),
            adverse_move_threshold: env_f64("ADVERSE_MOVE_THRESHOLD", 0.10),
            daily_api_budget_usd: env_f64("DAILY_API_BUDGET_USD", 10.0),

            tier1_scan_minutes: env_u64("TIER1_SCAN_MINUTES", 15),
            tier2_scan_minutes: env_u64("TIER2_SCAN_MINUTES", 5),
            news_watch_minutes: env_u64("NEWS_WATCH_MINUTES", 5),
            resolution_poll_minutes: env_u64("RESOLUTION_POLL_MINUTES", 5),
            adverse_sweep_minutes: env_u64("ADVERSE_SWEEP_MINUTES", 10),
            tier2_window_minutes: env_u64("TIER2_WINDOW_MINUTES", 30),
            max_concurrent_pipelines: env_u32("MAX_CONCURRENT_PIPELINES", 8) as usize,

            tier1_min_resolution_hours: env_f64("TIER1_MIN_RESOLUTION_HOURS", 0.5),
            tier1_max_resolution_hours: env_f64("TIER1_MAX_RESOLUTION_HOURS", 168.0),
            tier1_liquidity_floor: env_f64("TIER1_LIQUIDITY_FLOOR", 1000.0),
        })
    }
}

/// YAML document one: source classification lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceLists {
    #[serde(default)]
    pub official_handles: Vec<String>,
    #[serde(default)]
    pub official_domains: Vec<String>,
    #[serde(default)]
    pub wire_services: Vec<String>,
    #[serde(default)]
    pub institutional_media: Vec<String>,
    #[serde(default)]
    pub expert_keywords: Vec<String>,
}

impl SourceLists {
    /// Load from YAML; a missing file degrades to empty lists with a warning
    /// so the classifier falls back to S6 rather than failing startup.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!(path, "sources config not found, classifier lists empty");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read sources config {}", path))?;
        serde_yaml::from_str(&text).with_context(|| format!("parse sources config {}", path))
    }
}

/// One configured news feed with its canonical domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsFeed {
    pub url: String,
    pub domain: String,
}

/// YAML document two: news feed list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedList {
    #[serde(default)]
    pub feeds: Vec<NewsFeed>,
}

impl FeedList {
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!(path, "feeds config not found, news collector disabled");
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("read feeds config {}", path))?;
        serde_yaml::from_str(&text).with_context(|| format!("parse feeds config {}", path))
    }
}
