//! Keyword extraction for market questions.
//!
//! Regex pass first (quoted phrases, proper-noun bigrams, acronyms, ticker
//! forms) unioned with market-type supplements; the LM fallback only fires
//! when the regex pass finds fewer than two entities. Results are cached per
//! market id for the process lifetime.

use crate::llm::LmClient;
use crate::models::MarketType;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;

const MAX_KEYWORDS: usize = 5;
const MIN_REGEX_ENTITIES: usize = 2;

const QUESTION_STOPWORDS: [&str; 12] = [
    "will", "does", "did", "is", "are", "can", "who", "what", "when", "where", "how", "the",
];

pub struct KeywordExtractor {
    quoted: Regex,
    proper_bigram: Regex,
    camel_case: Regex,
    acronym: Regex,
    ticker: Regex,
    cache: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self {
            quoted: Regex::new(r#""([^"]{2,60})""#).expect("quoted regex"),
            proper_bigram: Regex::new(r"\b([A-Z][a-z]+(?: [A-Z][a-z]+)+)\b")
                .expect("bigram regex"),
            camel_case: Regex::new(r"\b([A-Z][a-z]+(?:[A-Z][a-z]+)+)\b").expect("camel regex"),
            acronym: Regex::new(r"\b([A-Z]{2,5})\b").expect("acronym regex"),
            ticker: Regex::new(r"\$([A-Za-z]{1,6})\b").expect("ticker regex"),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn supplements(market_type: MarketType) -> &'static [&'static str] {
        match market_type {
            MarketType::Political => &["election"],
            MarketType::Crypto => &["crypto"],
            MarketType::Sports => &["sports"],
            MarketType::Economic => &["economy"],
            MarketType::Entertainment => &["entertainment"],
            MarketType::Other => &[],
        }
    }

    /// Regex-only entity pass, ordered by extraction priority.
    pub fn regex_entities(&self, question: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |candidate: String| {
            let candidate = candidate.trim().to_lowercase();
            if !candidate.is_empty() && !out.contains(&candidate) {
                out.push(candidate);
            }
        };

        for cap in self.quoted.captures_iter(question) {
            push(cap[1].to_string());
        }
        for cap in self.proper_bigram.captures_iter(question) {
            // Sentence-leading question words ride along in the capitalized
            // run ("Will Donald Trump ..."); strip them.
            let mut words: Vec<&str> = cap[1].split_whitespace().collect();
            while words.len() > 1 && QUESTION_STOPWORDS.contains(&words[0].to_lowercase().as_str())
            {
                words.remove(0);
            }
            push(words.join(" "));
        }
        for cap in self.camel_case.captures_iter(question) {
            push(cap[1].to_string());
        }
        for cap in self.acronym.captures_iter(question) {
            push(cap[1].to_string());
        }
        for cap in self.ticker.captures_iter(question) {
            push(format!("${}", &cap[1]));
        }
        out
    }

    /// Extract up to five keywords, consulting the LM only when the regex
    /// pass is too thin. `lm` is optional so scans degrade without it.
    pub async fn extract(
        &self,
        market_id: &str,
        question: &str,
        market_type: MarketType,
        lm: Option<&LmClient>,
    ) -> Vec<String> {
        if let Some(cached) = self.cache.lock().get(market_id) {
            return cached.clone();
        }

        let entities = self.regex_entities(question);
        let mut keywords = if entities.len() >= MIN_REGEX_ENTITIES {
            entities
        } else if let Some(lm) = lm {
            match lm.keywords(question).await {
                Some(words) if !words.is_empty() => words,
                _ => entities,
            }
        } else {
            entities
        };

        for supplement in Self::supplements(market_type) {
            let s = supplement.to_string();
            if !keywords.contains(&s) {
                keywords.push(s);
            }
        }
        keywords.truncate(MAX_KEYWORDS);

        self.cache
            .lock()
            .insert(market_id.to_string(), keywords.clone());
        keywords
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_named_entities_without_lm() {
        let ex = KeywordExtractor::new();
        let words = ex
            .extract(
                "m1",
                "Will Donald Trump sign an executive order on TikTok this week?",
                MarketType::Political,
                None,
            )
            .await;
        assert!(words.contains(&"donald trump".to_string()));
        assert!(words.contains(&"tiktok".to_string()));
        assert!(words.len() <= 5);
    }

    #[tokio::test]
    async fn supplements_appended_per_market_type() {
        let ex = KeywordExtractor::new();
        let words = ex
            .extract(
                "m2",
                "Will the Federal Reserve cut rates after the CPI print?",
                MarketType::Economic,
                None,
            )
            .await;
        assert!(words.contains(&"economy".to_string()));
    }

    #[tokio::test]
    async fn cache_returns_first_result() {
        let ex = KeywordExtractor::new();
        let first = ex
            .extract("m3", "Will Taylor Swift announce a tour?", MarketType::Entertainment, None)
            .await;
        let second = ex
            .extract("m3", "entirely different question text", MarketType::Other, None)
            .await;
        assert_eq!(first, second);
    }

    #[test]
    fn regex_pass_finds_tickers_acronyms_quotes() {
        let ex = KeywordExtractor::new();
        let entities =
            ex.regex_entities(r#"Will $BTC close above "one hundred thousand" after the ETF news?"#);
        assert!(entities.contains(&"$btc".to_string()));
        assert!(entities.contains(&"etf".to_string()));
        assert!(entities.contains(&"one hundred thousand".to_string()));
    }
}
