//! Signal sources: provenance classification plus the news and social
//! collectors. Everything here emits normalized [`crate::models::Signal`]s.

pub mod classifier;
pub mod news;
pub mod social;

pub use classifier::{SignalMeta, SourceClassifier};
pub use news::{FeedEntry, FeedFetcher, HttpFeedFetcher, NewsCollector};
pub use social::{HttpSocialClient, SocialCollector, SocialPost, SocialSearch};
