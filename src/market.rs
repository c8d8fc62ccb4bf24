//! Market source seam: listing, order books, resolution state and order
//! placement, plus the HTTP implementation and a scripted mock for tests.

use crate::config::Config;
use crate::errors::TraderError;
use crate::models::{
    Market, MarketType, OrderBook, PriceLevel, ResolutionState, Side, Tier,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FillResult {
    pub filled: bool,
    pub price: f64,
    pub size: f64,
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Active candidate markets for a tier, already filtered.
    async fn list_active(&self, tier: Tier) -> Result<Vec<Market>>;
    async fn get_orderbook(&self, market_id: &str) -> Result<OrderBook>;
    async fn get_market(&self, market_id: &str) -> Result<(Market, ResolutionState)>;
    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        price: f64,
        size: f64,
    ) -> Result<FillResult>;
}

/// Tier filters applied to listings.
#[derive(Debug, Clone)]
pub struct MarketFilters {
    pub tier1_min_resolution_hours: f64,
    pub tier1_max_resolution_hours: f64,
    pub tier1_liquidity_floor: f64,
}

impl MarketFilters {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            tier1_min_resolution_hours: cfg.tier1_min_resolution_hours,
            tier1_max_resolution_hours: cfg.tier1_max_resolution_hours,
            tier1_liquidity_floor: cfg.tier1_liquidity_floor,
        }
    }

    pub fn accepts(&self, tier: Tier, market: &Market, now: DateTime<Utc>) -> bool {
        let hours = market.hours_to_resolution(now);
        match tier {
            Tier::Tier1 => {
                hours >= self.tier1_min_resolution_hours
                    && hours <= self.tier1_max_resolution_hours
                    && market.liquidity >= self.tier1_liquidity_floor
            }
            // Tier 2: crypto 15-minute markets only.
            Tier::Tier2 => market.market_type == MarketType::Crypto && hours <= 0.25,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiMarket {
    id: String,
    question: String,
    #[serde(default)]
    yes_price: f64,
    #[serde(default)]
    no_price: f64,
    end_date: DateTime<Utc>,
    #[serde(default)]
    volume_24h: f64,
    #[serde(default)]
    liquidity: f64,
    #[serde(default)]
    category: String,
    #[serde(default)]
    fee_rate: f64,
    #[serde(default)]
    resolved: bool,
    #[serde(default)]
    outcome: Option<String>,
}

impl ApiMarket {
    fn to_market(&self) -> Market {
        Market {
            market_id: self.id.clone(),
            question: self.question.clone(),
            yes_price: self.yes_price,
            no_price: if self.no_price > 0.0 {
                self.no_price
            } else {
                1.0 - self.yes_price
            },
            resolution_time: self.end_date,
            volume_24h: self.volume_24h,
            liquidity: self.liquidity,
            market_type: MarketType::parse(&self.category),
            fee_rate: self.fee_rate,
            keywords: Vec::new(),
        }
    }

    fn resolution(&self) -> ResolutionState {
        if !self.resolved {
            return ResolutionState::Open;
        }
        match self.outcome.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("yes") => ResolutionState::ResolvedYes,
            _ => ResolutionState::ResolvedNo,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiBook {
    #[serde(default)]
    bids: Vec<ApiLevel>,
    #[serde(default)]
    asks: Vec<ApiLevel>,
}

#[derive(Debug, Deserialize)]
struct ApiLevel {
    price: f64,
    size: f64,
}

#[derive(Debug, Deserialize)]
struct ApiFill {
    #[serde(default)]
    filled: bool,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    size: f64,
}

/// HTTP market-data client.
pub struct HttpMarketSource {
    http: reqwest::Client,
    base_url: String,
    filters: MarketFilters,
}

impl HttpMarketSource {
    pub fn new(cfg: &Config) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.market_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: cfg.market_base_url.trim_end_matches('/').to_string(),
            filters: MarketFilters::from_config(cfg),
        }
    }
}

#[async_trait]
impl MarketSource for HttpMarketSource {
    async fn list_active(&self, tier: Tier) -> Result<Vec<Market>> {
        let raw: Vec<ApiMarket> = self
            .http
            .get(format!("{}/markets", self.base_url))
            .query(&[("active", "true"), ("closed", "false")])
            .send()
            .await
            .map_err(|e| TraderError::http("list markets", &e))?
            .error_for_status()
            .map_err(|e| TraderError::http("list markets status", &e))?
            .json()
            .await
            .map_err(|e| TraderError::http("list markets body", &e))?;

        let now = Utc::now();
        let markets: Vec<Market> = raw
            .iter()
            .map(ApiMarket::to_market)
            .filter(|m| self.filters.accepts(tier, m, now))
            .collect();
        debug!(tier = tier.as_str(), count = markets.len(), "markets listed");
        Ok(markets)
    }

    async fn get_orderbook(&self, market_id: &str) -> Result<OrderBook> {
        let raw: ApiBook = self
            .http
            .get(format!("{}/book/{}", self.base_url, market_id))
            .send()
            .await
            .map_err(|e| TraderError::http("get orderbook", &e))?
            .error_for_status()
            .map_err(|e| TraderError::http("orderbook status", &e))?
            .json()
            .await
            .map_err(|e| TraderError::http("orderbook body", &e))?;
        Ok(OrderBook {
            market_id: market_id.to_string(),
            bids: raw
                .bids
                .iter()
                .map(|l| PriceLevel {
                    price: l.price,
                    size: l.size,
                })
                .collect(),
            asks: raw
                .asks
                .iter()
                .map(|l| PriceLevel {
                    price: l.price,
                    size: l.size,
                })
                .collect(),
            timestamp: Utc::now(),
        })
    }

    async fn get_market(&self, market_id: &str) -> Result<(Market, ResolutionState)> {
        let raw: ApiMarket = self
            .http
            .get(format!("{}/markets/{}", self.base_url, market_id))
            .send()
            .await
            .map_err(|e| TraderError::http("get market", &e))?
            .error_for_status()
            .map_err(|e| TraderError::http("market status", &e))?
            .json()
            .await
            .map_err(|e| TraderError::http("market body", &e))?;
        Ok((raw.to_market(), raw.resolution()))
    }

    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        price: f64,
        size: f64,
    ) -> Result<FillResult> {
        if side == Side::Skip {
            return Err(anyhow!("cannot place a SKIP order"));
        }
        let raw: ApiFill = self
            .http
            .post(format!("{}/orders", self.base_url))
            .json(&serde_json::json!({
                "market_id": market_id,
                "side": side.as_str(),
                "price": price,
                "size": size,
            }))
            .send()
            .await
            .map_err(|e| TraderError::http("place order", &e))?
            .error_for_status()
            .map_err(|e| TraderError::http("order status", &e))?
            .json()
            .await
            .map_err(|e| TraderError::http("order body", &e))?;
        Ok(FillResult {
            filled: raw.filled,
            price: raw.price,
            size: raw.size,
        })
    }
}

/// Scripted market source for tests: fixed listings, per-market resolution
/// states and order books, orders always fill at the requested price.
#[derive(Default)]
pub struct MockMarketSource {
    pub markets: Mutex<Vec<Market>>,
    pub resolutions: Mutex<HashMap<String, ResolutionState>>,
    pub books: Mutex<HashMap<String, OrderBook>>,
}

impl MockMarketSource {
    pub fn new(markets: Vec<Market>) -> Self {
        Self {
            markets: Mutex::new(markets),
            resolutions: Mutex::new(HashMap::new()),
            books: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, market_id: &str, state: ResolutionState) {
        self.resolutions.lock().insert(market_id.to_string(), state);
    }
}

#[async_trait]
impl MarketSource for MockMarketSource {
    async fn list_active(&self, _tier: Tier) -> Result<Vec<Market>> {
        Ok(self.markets.lock().clone())
    }

    async fn get_orderbook(&self, market_id: &str) -> Result<OrderBook> {
        self.books
            .lock()
            .get(market_id)
            .cloned()
            .ok_or_else(|| anyhow!("no book for {}", market_id))
    }

    async fn get_market(&self, market_id: &str) -> Result<(Market, ResolutionState)> {
        let market = self
            .markets
            .lock()
            .iter()
            .find(|m| m.market_id == market_id)
            .cloned()
            .ok_or_else(|| anyhow!("no market {}", market_id))?;
        let state = self
            .resolutions
            .lock()
            .get(market_id)
            .copied()
            .unwrap_or(ResolutionState::Open);
        Ok((market, state))
    }

    async fn place_order(
        &self,
        _market_id: &str,
        _side: Side,
        price: f64,
        size: f64,
    ) -> Result<FillResult> {
        Ok(FillResult {
            filled: true,
            price,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn market(hours: f64, liquidity: f64, market_type: MarketType) -> Market {
        Market {
            market_id: "m".into(),
            question: "q".into(),
            yes_price: 0.5,
            no_price: 0.5,
            resolution_time: Utc::now() + Duration::seconds((hours * 3600.0) as i64),
            volume_24h: 0.0,
            liquidity,
            market_type,
            fee_rate: 0.0,
            keywords: vec![],
        }
    }

    fn filters() -> MarketFilters {
        MarketFilters {
            tier1_min_resolution_hours: 0.5,
            tier1_max_resolution_hours: 168.0,
            tier1_liquidity_floor: 1000.0,
        }
    }

    #[test]
    fn tier1_filter_checks_window_and_liquidity() {
        let f = filters();
        let now = Utc::now();
        assert!(f.accepts(Tier::Tier1, &market(24.0, 5000.0, MarketType::Political), now));
        assert!(!f.accepts(Tier::Tier1, &market(0.1, 5000.0, MarketType::Political), now));
        assert!(!f.accepts(Tier::Tier1, &market(500.0, 5000.0, MarketType::Political), now));
        assert!(!f.accepts(Tier::Tier1, &market(24.0, 100.0, MarketType::Political), now));
    }

    #[test]
    fn tier2_filter_wants_crypto_quarter_hour() {
        let f = filters();
        let now = Utc::now();
        assert!(f.accepts(Tier::Tier2, &market(0.2, 100.0, MarketType::Crypto), now));
        assert!(!f.accepts(Tier::Tier2, &market(0.2, 100.0, MarketType::Political), now));
        assert!(!f.accepts(Tier::Tier2, &market(2.0, 100.0, MarketType::Crypto), now));
    }
}
