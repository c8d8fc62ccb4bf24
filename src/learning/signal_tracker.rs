//! Two-dimensional signal tracking.
//!
//! For every (source tier, info type, market type) key, four counters answer
//! one question: do markets where this signal kind was present win more often
//! than markets where it was absent? Updates use the ADJUSTED prediction's
//! correctness.

use crate::models::{InfoType, MarketType, SignalTag, SourceTier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MIN_SAMPLES_PER_SIDE: u64 = 5;
const WEIGHT_SLOPE: f64 = 0.3;
const WEIGHT_FLOOR: f64 = 0.8;
const WEIGHT_CEIL: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackerKey {
    pub tier: SourceTier,
    pub info_type: InfoType,
    pub market_type: MarketType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerCounts {
    pub present_winning: u64,
    pub present_losing: u64,
    pub absent_winning: u64,
    pub absent_losing: u64,
}

impl TrackerCounts {
    fn present_total(&self) -> u64 {
        self.present_winning + self.present_losing
    }

    fn absent_total(&self) -> u64 {
        self.absent_winning + self.absent_losing
    }

    /// Win-rate lift of presence over absence. 1.0 until both sides have
    /// enough samples; a zero absent win-rate guards to 1.0.
    pub fn lift(&self) -> f64 {
        if self.present_total() < MIN_SAMPLES_PER_SIDE
            || self.absent_total() < MIN_SAMPLES_PER_SIDE
        {
            return 1.0;
        }
        let winrate_present = self.present_winning as f64 / self.present_total() as f64;
        let winrate_absent = self.absent_winning as f64 / self.absent_total() as f64;
        if winrate_absent == 0.0 {
            return 1.0;
        }
        winrate_present / winrate_absent
    }

    pub fn weight(&self) -> f64 {
        (1.0 + WEIGHT_SLOPE * (self.lift() - 1.0)).clamp(WEIGHT_FLOOR, WEIGHT_CEIL)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalTrackerManager {
    counts: HashMap<TrackerKey, TrackerCounts>,
}

impl SignalTrackerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weight applied by the adjustment pipeline. Unknown keys weigh 1.0.
    pub fn weight(&self, tier: SourceTier, info_type: InfoType, market_type: MarketType) -> f64 {
        self.counts
            .get(&TrackerKey {
                tier,
                info_type,
                market_type,
            })
            .map(|c| c.weight())
            .unwrap_or(1.0)
    }

    /// Fold in one resolved market: tags observed on the record update the
    /// present counters; every other known key of the same market type
    /// updates the absent counters.
    pub fn record_resolution(&mut self, market_type: MarketType, tags: &[SignalTag], won: bool) {
        for tag in tags {
            let key = TrackerKey {
                tier: tag.tier,
                info_type: tag.info_type,
                market_type,
            };
            self.counts.entry(key).or_default();
        }

        for (key, counts) in self.counts.iter_mut() {
            if key.market_type != market_type {
                continue;
            }
            let present = tags
                .iter()
                .any(|t| t.tier == key.tier && t.info_type == key.info_type);
            match (present, won) {
                (true, true) => counts.present_winning += 1,
                (true, false) => counts.present_losing += 1,
                (false, true) => counts.absent_winning += 1,
                (false, false) => counts.absent_losing += 1,
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TrackerKey, &TrackerCounts)> {
        self.counts.iter()
    }

    pub fn restore(&mut self, key: TrackerKey, counts: TrackerCounts) {
        self.counts.insert(key, counts);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(tier: SourceTier, info: InfoType) -> SignalTag {
        SignalTag {
            tier,
            info_type: info,
        }
    }

    #[test]
    fn small_samples_mean_neutral_weight() {
        let mut mgr = SignalTrackerManager::new();
        for _ in 0..4 {
            mgr.record_resolution(
                MarketType::Political,
                &[tag(SourceTier::S1, InfoType::I2)],
                true,
            );
        }
        assert_eq!(
            mgr.weight(SourceTier::S1, InfoType::I2, MarketType::Political),
            1.0
        );
    }

    #[test]
    fn predictive_signal_gets_weight_above_one() {
        let mut mgr = SignalTrackerManager::new();
        // Present and winning 6 times
        for _ in 0..6 {
            mgr.record_resolution(
                MarketType::Crypto,
                &[tag(SourceTier::S1, InfoType::I2)],
                true,
            );
        }
        // Absent (different tag) and mostly losing 6 times
        for i in 0..6 {
            mgr.record_resolution(
                MarketType::Crypto,
                &[tag(SourceTier::S6, InfoType::I4)],
                i < 2,
            );
        }
        let w = mgr.weight(SourceTier::S1, InfoType::I2, MarketType::Crypto);
        assert!(w > 1.0);
        assert!(w <= 1.2);
    }

    #[test]
    fn weight_is_clamped_both_ways() {
        let mut mgr = SignalTrackerManager::new();
        // Present always losing, absent always winning: lift well below 1
        for _ in 0..10 {
            mgr.record_resolution(
                MarketType::Sports,
                &[tag(SourceTier::S4, InfoType::I4)],
                false,
            );
        }
        for _ in 0..10 {
            mgr.record_resolution(
                MarketType::Sports,
                &[tag(SourceTier::S2, InfoType::I1)],
                true,
            );
        }
        let w = mgr.weight(SourceTier::S4, InfoType::I4, MarketType::Sports);
        assert_eq!(w, 0.8);
    }

    #[test]
    fn market_types_are_isolated() {
        let mut mgr = SignalTrackerManager::new();
        for _ in 0..10 {
            mgr.record_resolution(
                MarketType::Political,
                &[tag(SourceTier::S1, InfoType::I1)],
                true,
            );
        }
        // Same tier/info under another market type stays neutral
        assert_eq!(
            mgr.weight(SourceTier::S1, InfoType::I1, MarketType::Crypto),
            1.0
        );
    }

    #[test]
    fn zero_absent_winrate_guards_to_one() {
        let mut mgr = SignalTrackerManager::new();
        for _ in 0..6 {
            mgr.record_resolution(
                MarketType::Economic,
                &[tag(SourceTier::S3, InfoType::I3)],
                true,
            );
        }
        for _ in 0..6 {
            mgr.record_resolution(
                MarketType::Economic,
                &[tag(SourceTier::S5, InfoType::I6)],
                false,
            );
        }
        // S3/I3 absent side lost every time -> winrate_absent is 0 -> guard
        assert_eq!(
            mgr.weight(SourceTier::S3, InfoType::I3, MarketType::Economic),
            1.0
        );
    }
}
