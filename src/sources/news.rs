//! News headline collector.
//!
//! Pulls configured feeds, drops stale or already-seen headlines, classifies
//! the source and emits headline-only signals. The dedup map is owned here
//! and pruned of day-old entries at the start of every collection pass.

use crate::config::{FeedList, NewsFeed};
use crate::errors::TraderError;
use crate::models::{Signal, SourceKind};
use crate::sources::classifier::{SignalMeta, SourceClassifier};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_HEADLINE_AGE_HOURS: i64 = 2;
const DEDUP_RETENTION_HOURS: i64 = 24;

/// One parsed feed entry.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub title: String,
    pub published: DateTime<Utc>,
}

/// Transport + parse seam, so tests can inject fixture entries.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, feed: &NewsFeed) -> Result<Vec<FeedEntry>>;
}

/// Minimal RSS fetcher: GETs the feed and scans `<item>` blocks for titles
/// and publication dates. Deliberately tolerant; a malformed item is skipped.
pub struct HttpFeedFetcher {
    http: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, feed: &NewsFeed) -> Result<Vec<FeedEntry>> {
        let body = self
            .http
            .get(&feed.url)
            .send()
            .await
            .map_err(|e| TraderError::http(&format!("fetch feed {}", feed.url), &e))?
            .error_for_status()
            .map_err(|e| TraderError::http(&format!("feed status {}", feed.url), &e))?
            .text()
            .await
            .map_err(|e| TraderError::http("feed body", &e))?;
        Ok(parse_rss_items(&body))
    }
}

fn tag_text<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(block[start..end].trim())
}

/// Scan `<item>` blocks out of an RSS body.
pub fn parse_rss_items(body: &str) -> Vec<FeedEntry> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<item>") {
        let Some(end) = rest[start..].find("</item>") else {
            break;
        };
        let block = &rest[start..start + end];
        rest = &rest[start + end + 7..];

        let Some(title) = tag_text(block, "title") else {
            continue;
        };
        let title = title
            .trim_start_matches("<![CDATA[")
            .trim_end_matches("]]>")
            .trim();
        if title.is_empty() {
            continue;
        }
        let published = tag_text(block, "pubDate")
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        out.push(FeedEntry {
            title: title.to_string(),
            published,
        });
    }
    out
}

pub struct NewsCollector {
    fetcher: Arc<dyn FeedFetcher>,
    classifier: Arc<SourceClassifier>,
    feeds: Vec<NewsFeed>,
    /// Headline text to first-seen time.
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NewsCollector {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        classifier: Arc<SourceClassifier>,
        feeds: &FeedList,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            feeds: feeds.feeds.clone(),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Collect fresh headlines across all feeds. A failing feed is logged
    /// and skipped; it never poisons the others.
    pub async fn collect(&self) -> Vec<Signal> {
        let now = Utc::now();
        {
            let mut seen = self.seen.lock();
            seen.retain(|_, first_seen| now - *first_seen < Duration::hours(DEDUP_RETENTION_HOURS));
        }

        let mut signals = Vec::new();
        for feed in &self.feeds {
            let entries = match self.fetcher.fetch(feed).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(feed = %feed.url, error = %err, "news feed failed, skipping");
                    continue;
                }
            };

            for entry in entries {
                if now - entry.published > Duration::hours(MAX_HEADLINE_AGE_HOURS) {
                    continue;
                }
                {
                    let mut seen = self.seen.lock();
                    if seen.contains_key(&entry.title) {
                        continue;
                    }
                    seen.insert(entry.title.clone(), now);
                }

                let tier = self.classifier.classify(&SignalMeta {
                    source_kind: Some(SourceKind::News),
                    domain: Some(&feed.domain),
                    ..Default::default()
                });
                signals.push(Signal {
                    source_kind: SourceKind::News,
                    source_tier: tier,
                    info_type: None,
                    text: entry.title,
                    credibility: tier.credibility(),
                    author: Some(feed.domain.clone()),
                    followers: 0,
                    engagement: 0,
                    timestamp: entry.published,
                    headline_only: true,
                });
            }
        }

        debug!(count = signals.len(), "news collection complete");
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceLists;

    struct FixtureFetcher {
        entries: Vec<FeedEntry>,
        fail_domains: Vec<String>,
    }

    #[async_trait]
    impl FeedFetcher for FixtureFetcher {
        async fn fetch(&self, feed: &NewsFeed) -> Result<Vec<FeedEntry>> {
            if self.fail_domains.contains(&feed.domain) {
                anyhow::bail!("boom");
            }
            Ok(self.entries.clone())
        }
    }

    fn feeds(domains: &[&str]) -> FeedList {
        FeedList {
            feeds: domains
                .iter()
                .map(|d| NewsFeed {
                    url: format!("https://{}/rss", d),
                    domain: d.to_string(),
                })
                .collect(),
        }
    }

    fn classifier() -> Arc<SourceClassifier> {
        Arc::new(SourceClassifier::new(&SourceLists {
            wire_services: vec!["reuters".into()],
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn collects_fresh_unseen_headlines() {
        let fetcher = Arc::new(FixtureFetcher {
            entries: vec![
                FeedEntry {
                    title: "Fresh headline".into(),
                    published: Utc::now() - Duration::minutes(10),
                },
                FeedEntry {
                    title: "Stale headline".into(),
                    published: Utc::now() - Duration::hours(3),
                },
            ],
            fail_domains: vec![],
        });
        let collector = NewsCollector::new(fetcher, classifier(), &feeds(&["reuters.com"]));

        let signals = collector.collect().await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].text, "Fresh headline");
        assert!(signals[0].headline_only);
        assert_eq!(signals[0].source_tier, crate::models::SourceTier::S2);

        // Second pass: already seen
        let again = collector.collect().await;
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn one_failing_feed_does_not_poison_the_rest() {
        let fetcher = Arc::new(FixtureFetcher {
            entries: vec![FeedEntry {
                title: "Working feed headline".into(),
                published: Utc::now(),
            }],
            fail_domains: vec!["broken.example".to_string()],
        });
        let collector = NewsCollector::new(
            fetcher,
            classifier(),
            &feeds(&["broken.example", "reuters.com"]),
        );
        let signals = collector.collect().await;
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn rss_parsing_handles_cdata_and_missing_dates() {
        let body = r#"
<rss><channel>
  <item><title><![CDATA[CPI comes in hot]]></title>
    <pubDate>Sun, 01 Jun 2025 12:00:00 GMT</pubDate></item>
  <item><title>No date headline</title></item>
  <item><description>no title at all</description></item>
</channel></rss>"#;
        let items = parse_rss_items(body);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "CPI comes in hot");
        assert_eq!(
            items[0].published,
            DateTime::parse_from_rfc2822("Sun, 01 Jun 2025 12:00:00 GMT")
                .unwrap()
                .with_timezone(&Utc)
        );
    }
}
