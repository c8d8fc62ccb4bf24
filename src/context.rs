//! Context builder: renders a market, its best signals and the order book
//! into the estimation prompt, and validates the structured response.

use crate::models::{InfoType, Market, OrderBook, Signal};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const MAX_SIGNALS_IN_PROMPT: usize = 7;
const DEPTH_LEVELS: usize = 5;

/// Validated estimate parsed from the LM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmEstimate {
    pub estimated_probability: f64,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub key_signals: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<String>,
    /// Signal index ("s1".."s7") to info type ("I1".."I5").
    #[serde(default)]
    pub signal_info_types: HashMap<String, String>,
}

impl LmEstimate {
    /// Validate a tolerantly-parsed JSON value: required fields present,
    /// numeric strings coerced, probabilities confined to [0, 1].
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| anyhow!("not an object"))?;

        let estimated_probability = coerce_unit_f64(
            obj.get("estimated_probability")
                .ok_or_else(|| anyhow!("missing estimated_probability"))?,
        )?;
        let confidence =
            coerce_unit_f64(obj.get("confidence").ok_or_else(|| anyhow!("missing confidence"))?)?;
        let reasoning = obj
            .get("reasoning")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing reasoning"))?
            .to_string();
        let signal_info_types = obj
            .get("signal_info_types")
            .ok_or_else(|| anyhow!("missing signal_info_types"))?;
        let signal_info_types: HashMap<String, String> = match signal_info_types {
            Value::Object(map) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => return Err(anyhow!("signal_info_types is not an object")),
        };

        let key_signals = string_array(obj.get("key_signals"));
        let contradictions = string_array(obj.get("contradictions"));

        Ok(Self {
            estimated_probability,
            confidence,
            reasoning,
            key_signals,
            contradictions,
            signal_info_types,
        })
    }

    /// Stamp LM-assigned info types onto the prompt's signals by index.
    /// Collector-assigned I6 tags are never overwritten.
    pub fn apply_info_types(&self, signals: &mut [Signal]) {
        for (key, value) in &self.signal_info_types {
            let Some(idx) = key
                .trim()
                .trim_start_matches(['s', 'S'])
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
            else {
                continue;
            };
            let Some(info) = InfoType::parse(value) else {
                continue;
            };
            if info == InfoType::I6 {
                continue;
            }
            if let Some(signal) = signals.get_mut(idx) {
                if signal.info_type != Some(InfoType::I6) {
                    signal.info_type = Some(info);
                }
            }
        }
    }
}

fn coerce_unit_f64(value: &Value) -> Result<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("bad number"))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("non-numeric string: {}", s))?,
        other => return Err(anyhow!("expected number, got {}", other)),
    };
    if !n.is_finite() || !(0.0..=1.0).contains(&n) {
        return Err(anyhow!("out of [0,1]: {}", n));
    }
    Ok(n)
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Signals sorted by credibility descending, capped for the prompt.
pub fn top_signals(signals: &[Signal]) -> Vec<&Signal> {
    let mut sorted: Vec<&Signal> = signals.iter().collect();
    sorted.sort_by(|a, b| {
        b.credibility
            .partial_cmp(&a.credibility)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.truncate(MAX_SIGNALS_IN_PROMPT);
    sorted
}

/// Render the estimation prompt.
pub fn build_prompt(
    market: &Market,
    signals: &[Signal],
    book: Option<&OrderBook>,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str(&format!(
        "MARKET: {}\nYES price: {:.3}  NO price: {:.3}\nResolves: {} ({:.1}h remaining)\n24h volume: ${:.0}  Liquidity: ${:.0}\n",
        market.question,
        market.yes_price,
        market.no_price,
        market.resolution_time.to_rfc3339(),
        market.hours_to_resolution(now),
        market.volume_24h,
        market.liquidity,
    ));

    if let Some(book) = book {
        out.push_str(&format!(
            "Order book: bid depth (top {lvls}) ${:.0}, ask depth ${:.0}, skew {:+.2}\n",
            book.bid_depth(DEPTH_LEVELS),
            book.ask_depth(DEPTH_LEVELS),
            book.skew(DEPTH_LEVELS),
            lvls = DEPTH_LEVELS,
        ));
    }

    let top = top_signals(signals);
    if top.is_empty() {
        out.push_str("\nSIGNALS: none collected this cycle.\n");
    } else {
        out.push_str("\nSIGNALS (most credible first):\n");
        for (i, s) in top.iter().enumerate() {
            out.push_str(&format!(
                "s{}: [{} cred {:.2}] {}\n",
                i + 1,
                s.source_tier.as_str(),
                s.credibility,
                s.text.trim(),
            ));
        }
    }

    out.push_str(
        "\nEstimate the probability that this market resolves YES.\n\
         Respond with STRICT JSON only, no prose outside the object:\n\
         {\n\
           \"estimated_probability\": 0.0-1.0,\n\
           \"confidence\": 0.0-1.0,\n\
           \"reasoning\": \"...\",\n\
           \"key_signals\": [\"s1\", ...],\n\
           \"contradictions\": [\"...\"],\n\
           \"signal_info_types\": {\"s1\": \"I1|I2|I3|I4|I5\", ...}\n\
         }\n\
         Info types: I1 deterministic outcome, I2 strong directional,\n\
         I3 weak directional, I4 sentiment shift, I5 contradictory.\n",
    );

    out
}
