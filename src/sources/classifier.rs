//! Source classifier: pure mapping from signal provenance to a tier.
//!
//! Config lists load once at startup; missing metadata degrades to S6,
//! never a failure.

use crate::config::SourceLists;
use crate::models::{SourceKind, SourceTier};
use std::collections::HashSet;

/// Provenance metadata available at collection time.
#[derive(Debug, Clone, Default)]
pub struct SignalMeta<'a> {
    pub source_kind: Option<SourceKind>,
    pub handle: Option<&'a str>,
    pub domain: Option<&'a str>,
    pub verified: bool,
    pub followers: u64,
    pub bio: Option<&'a str>,
}

const EXPERT_MIN_FOLLOWERS: u64 = 50_000;

#[derive(Debug, Clone)]
pub struct SourceClassifier {
    official_handles: HashSet<String>,
    official_domains: HashSet<String>,
    wire_services: HashSet<String>,
    institutional_media: HashSet<String>,
    expert_keywords: Vec<String>,
}

impl SourceClassifier {
    pub fn new(lists: &SourceLists) -> Self {
        let lower = |v: &[String]| -> HashSet<String> {
            v.iter().map(|s| s.trim().to_lowercase()).collect()
        };
        Self {
            official_handles: lower(&lists.official_handles),
            official_domains: lower(&lists.official_domains),
            wire_services: lower(&lists.wire_services),
            institutional_media: lower(&lists.institutional_media),
            expert_keywords: lists
                .expert_keywords
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn classify(&self, meta: &SignalMeta<'_>) -> SourceTier {
        let handle = meta.handle.map(|h| h.trim_start_matches('@').to_lowercase());
        let domain = meta.domain.map(|d| d.trim().to_lowercase());

        // S1: official primary sources (configured handles and RSS domains)
        if let Some(h) = &handle {
            if self.official_handles.contains(h) {
                return SourceTier::S1;
            }
        }
        if let Some(d) = &domain {
            if self.official_domains.contains(d) {
                return SourceTier::S1;
            }
        }

        // S2 wire services, S3 institutional media: match handle or domain
        for name in handle.iter().chain(domain.iter()) {
            if self.wire_services.contains(name)
                || self.wire_services.iter().any(|w| name.contains(w))
            {
                return SourceTier::S2;
            }
        }
        for name in handle.iter().chain(domain.iter()) {
            if self.institutional_media.contains(name)
                || self.institutional_media.iter().any(|m| name.contains(m))
            {
                return SourceTier::S3;
            }
        }

        // S4: verified social expert with reach
        if meta.source_kind == Some(SourceKind::Social)
            && meta.verified
            && meta.followers >= EXPERT_MIN_FOLLOWERS
        {
            if let Some(bio) = meta.bio {
                let bio = bio.to_lowercase();
                if self.expert_keywords.iter().any(|k| bio.contains(k)) {
                    return SourceTier::S4;
                }
            }
        }

        // S5: market-derived price action
        if meta.source_kind == Some(SourceKind::MarketDerived) {
            return SourceTier::S5;
        }

        SourceTier::S6
    }
}
