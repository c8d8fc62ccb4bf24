//! Social post collector: keyword search over recent posts with a quality
//! pre-filter, near-duplicate suppression and a hard result cap.

use crate::config::Config;
use crate::errors::TraderError;
use crate::models::{Signal, SourceKind};
use crate::sources::classifier::{SignalMeta, SourceClassifier};
use crate::store::Store;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const SEARCH_WINDOW_HOURS: i64 = 2;
const MIN_FOLLOWERS: u64 = 1000;
const MIN_ENGAGEMENT: u64 = 10;
const DEDUP_OVERLAP: f64 = 0.80;
const MAX_RESULTS: usize = 10;

pub const COST_SERVICE_SOCIAL: &str = "social";

/// One post as returned by the social search API.
#[derive(Debug, Clone, Deserialize)]
pub struct SocialPost {
    pub text: String,
    pub author: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub engagement: u64,
    #[serde(default)]
    pub bio: String,
    pub timestamp: DateTime<Utc>,
}

/// Search seam so tests can inject fixture posts.
#[async_trait]
pub trait SocialSearch: Send + Sync {
    async fn search(&self, keywords: &[String], since: DateTime<Utc>) -> Result<Vec<SocialPost>>;
}

/// Thin HTTP client for the social search API.
pub struct HttpSocialClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSocialClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(cfg.social_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: cfg.social_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.social_api_key.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    posts: Vec<SocialPost>,
}

#[async_trait]
impl SocialSearch for HttpSocialClient {
    async fn search(&self, keywords: &[String], since: DateTime<Utc>) -> Result<Vec<SocialPost>> {
        let query = keywords.join(" OR ");
        let resp: SearchResponse = self
            .http
            .get(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("q", query.as_str()), ("since", &since.to_rfc3339())])
            .send()
            .await
            .map_err(|e| TraderError::http("social search request", &e))?
            .error_for_status()
            .map_err(|e| TraderError::http("social search status", &e))?
            .json()
            .await
            .map_err(|e| TraderError::http("social search body", &e))?;
        Ok(resp.posts)
    }
}

/// Amplification-shaped accounts: numeric-suffix handles or tiny accounts
/// with outsized engagement.
pub fn looks_like_bot(post: &SocialPost) -> bool {
    let trailing_digits = post
        .author
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if trailing_digits >= 4 {
        return true;
    }
    post.followers < 25 && post.engagement > 500
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Token overlap against the smaller post: near-identical reposts collapse.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    let smaller = ta.len().min(tb.len());
    if smaller == 0 {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count();
    inter as f64 / smaller as f64
}

pub struct SocialCollector {
    search: Arc<dyn SocialSearch>,
    classifier: Arc<SourceClassifier>,
    store: Arc<Store>,
    usd_per_call: f64,
}

impl SocialCollector {
    pub fn new(
        search: Arc<dyn SocialSearch>,
        classifier: Arc<SourceClassifier>,
        store: Arc<Store>,
        usd_per_call: f64,
    ) -> Self {
        Self {
            search,
            classifier,
            store,
            usd_per_call,
        }
    }

    /// Search recent posts for the keyword set. Any transport failure is
    /// logged and maps to an empty list.
    pub async fn collect(&self, keywords: &[String]) -> Vec<Signal> {
        if keywords.is_empty() {
            return Vec::new();
        }
        let since = Utc::now() - Duration::hours(SEARCH_WINDOW_HOURS);
        let posts = match self.search.search(keywords, since).await {
            Ok(posts) => posts,
            Err(err) => {
                warn!(error = %err, "social search failed, returning empty");
                return Vec::new();
            }
        };
        if let Err(err) = self
            .store
            .add_api_cost(COST_SERVICE_SOCIAL, 1, self.usd_per_call)
        {
            warn!(error = %err, "failed to record social cost");
        }

        let mut kept: Vec<SocialPost> = Vec::new();
        for post in posts {
            if post.followers < MIN_FOLLOWERS
                || post.engagement < MIN_ENGAGEMENT
                || looks_like_bot(&post)
            {
                continue;
            }
            if kept
                .iter()
                .any(|k| token_overlap(&k.text, &post.text) >= DEDUP_OVERLAP)
            {
                continue;
            }
            kept.push(post);
        }

        let mut signals: Vec<Signal> = kept
            .into_iter()
            .map(|post| {
                let tier = self.classifier.classify(&SignalMeta {
                    source_kind: Some(SourceKind::Social),
                    handle: Some(&post.author),
                    verified: post.verified,
                    followers: post.followers,
                    bio: Some(&post.bio),
                    ..Default::default()
                });
                Signal {
                    source_kind: SourceKind::Social,
                    source_tier: tier,
                    info_type: None,
                    text: post.text,
                    credibility: tier.credibility(),
                    author: Some(post.author),
                    followers: post.followers,
                    engagement: post.engagement,
                    timestamp: post.timestamp,
                    headline_only: false,
                }
            })
            .collect();

        signals.sort_by(|a, b| {
            b.credibility
                .partial_cmp(&a.credibility)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        signals.truncate(MAX_RESULTS);
        debug!(count = signals.len(), "social collection complete");
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceLists;

    struct FixtureSearch {
        posts: Vec<SocialPost>,
        fail: bool,
    }

    #[async_trait]
    impl SocialSearch for FixtureSearch {
        async fn search(
            &self,
            _keywords: &[String],
            _since: DateTime<Utc>,
        ) -> Result<Vec<SocialPost>> {
            if self.fail {
                anyhow::bail!("rate limited");
            }
            Ok(self.posts.clone())
        }
    }

    fn post(text: &str, author: &str, followers: u64, engagement: u64) -> SocialPost {
        SocialPost {
            text: text.to_string(),
            author: author.to_string(),
            verified: false,
            followers,
            engagement,
            bio: String::new(),
            timestamp: Utc::now(),
        }
    }

    fn collector(posts: Vec<SocialPost>, fail: bool) -> SocialCollector {
        SocialCollector::new(
            Arc::new(FixtureSearch { posts, fail }),
            Arc::new(SourceClassifier::new(&SourceLists::default())),
            Arc::new(Store::open_in_memory().unwrap()),
            0.005,
        )
    }

    #[tokio::test]
    async fn prefilter_drops_small_accounts_and_bots() {
        let posts = vec![
            post("real take on the fed decision", "macro_max", 5000, 40),
            post("small account", "newbie", 200, 50),
            post("low engagement", "quiet", 5000, 2),
            post("bot spam here", "pump98231", 9000, 900),
        ];
        let signals = collector(posts, false).collect(&["fed".into()]).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].author.as_deref(), Some("macro_max"));
        assert!(!signals[0].headline_only);
    }

    #[tokio::test]
    async fn near_duplicates_collapse() {
        let posts = vec![
            post("BREAKING: fed cuts rates by 50bps today", "a_trader", 5000, 40),
            post("BREAKING fed cuts rates by 50bps today!!", "b_trader", 6000, 50),
            post("completely different subject entirely", "c_trader", 7000, 60),
        ];
        let signals = collector(posts, false).collect(&["fed".into()]).await;
        assert_eq!(signals.len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_returns_empty() {
        let signals = collector(vec![], true).collect(&["fed".into()]).await;
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn capped_at_ten_sorted_by_credibility() {
        let posts: Vec<SocialPost> = (0..15)
            .map(|i| {
                post(
                    &format!("topic{} alpha{} bravo{} charlie{} delta{}", i, i, i, i, i),
                    &format!("acct_{}", i),
                    2000 + i,
                    20,
                )
            })
            .collect();
        let signals = collector(posts, false).collect(&["x".into()]).await;
        assert_eq!(signals.len(), 10);
        for pair in signals.windows(2) {
            assert!(pair[0].credibility >= pair[1].credibility);
        }
    }

    #[test]
    fn overlap_metric() {
        assert!(token_overlap("fed cuts rates today", "fed cuts rates today!") >= 0.99);
        assert!(token_overlap("fed cuts rates", "btc hits new high") < 0.2);
    }

    #[test]
    fn bot_heuristic() {
        assert!(looks_like_bot(&post("x", "pump98231", 9000, 900)));
        assert!(looks_like_bot(&post("x", "tiny", 10, 900)));
        assert!(!looks_like_bot(&post("x", "macro_max", 5000, 40)));
    }
}
