//! Bayesian confidence calibration.
//!
//! Six fixed confidence buckets, each a Beta(alpha, beta) posterior over
//! "the raw prediction was correct". Updates use RAW confidence and RAW
//! probability only; routing adjusted values here would drive the posterior
//! toward a fixed point unrelated to LM accuracy.

use serde::{Deserialize, Serialize};

/// Bucket boundaries: lower-inclusive, upper-exclusive, except the last
/// bucket which is closed at 1.00.
pub const BUCKET_RANGES: [(f64, f64); 6] = [
    (0.50, 0.60),
    (0.60, 0.70),
    (0.70, 0.80),
    (0.80, 0.90),
    (0.90, 0.95),
    (0.95, 1.00),
];

const MIN_SAMPLES_FOR_CORRECTION: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub lo: f64,
    pub hi: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl CalibrationBucket {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self {
            lo,
            hi,
            alpha: 1.0,
            beta: 1.0,
        }
    }

    fn contains(&self, c: f64) -> bool {
        if (self.hi - 1.00).abs() < f64::EPSILON {
            c >= self.lo && c <= self.hi
        } else {
            c >= self.lo && c < self.hi
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }

    pub fn expected_accuracy(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn sample_count(&self) -> u64 {
        (self.alpha + self.beta - 2.0).max(0.0).floor() as u64
    }

    /// Width of the 95% central interval of Beta(alpha, beta), via the
    /// normal approximation to the Beta variance, clamped into [0, 1].
    pub fn uncertainty(&self) -> f64 {
        let n = self.alpha + self.beta;
        let var = (self.alpha * self.beta) / (n * n * (n + 1.0));
        (2.0 * 1.96 * var.sqrt()).clamp(0.0, 1.0)
    }

    /// Additive confidence correction. Zero until the bucket has seen
    /// enough evidence; shrinks further as posterior uncertainty grows.
    pub fn correction(&self) -> f64 {
        if self.sample_count() < MIN_SAMPLES_FOR_CORRECTION {
            return 0.0;
        }
        let certainty = (1.0 - 2.0 * self.uncertainty()).max(0.0);
        (self.expected_accuracy() - self.midpoint()) * certainty
    }

    /// Decay-weighted Bayesian update. `weight` is 0.95^days_since_entry.
    pub fn update(&mut self, correct: bool, weight: f64) {
        let w = weight.clamp(0.0, 1.0);
        if correct {
            self.alpha += w;
        } else {
            self.beta += w;
        }
    }
}

/// The six-bucket calibration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationManager {
    buckets: Vec<CalibrationBucket>,
}

impl Default for CalibrationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationManager {
    pub fn new() -> Self {
        Self {
            buckets: BUCKET_RANGES
                .iter()
                .map(|&(lo, hi)| CalibrationBucket::new(lo, hi))
                .collect(),
        }
    }

    /// The unique bucket containing `confidence`. Values below 0.50 clamp
    /// into the first bucket; the partition covers [0.50, 1.00] exactly.
    pub fn bucket_for(&self, confidence: f64) -> &CalibrationBucket {
        let c = confidence.clamp(0.50, 1.00);
        self.buckets
            .iter()
            .find(|b| b.contains(c))
            .unwrap_or(&self.buckets[0])
    }

    fn bucket_for_mut(&mut self, confidence: f64) -> &mut CalibrationBucket {
        let c = confidence.clamp(0.50, 1.00);
        let idx = self
            .buckets
            .iter()
            .position(|b| b.contains(c))
            .unwrap_or(0);
        &mut self.buckets[idx]
    }

    /// Record a resolved RAW prediction into the bucket of its RAW confidence.
    pub fn update_raw(&mut self, raw_confidence: f64, correct: bool, weight: f64) {
        self.bucket_for_mut(raw_confidence).update(correct, weight);
    }

    /// Model swap: all posteriors back to uniform priors.
    pub fn reset_to_priors(&mut self) {
        for b in &mut self.buckets {
            b.alpha = 1.0;
            b.beta = 1.0;
        }
    }

    pub fn buckets(&self) -> &[CalibrationBucket] {
        &self.buckets
    }

    /// Restore a bucket loaded from the store. Ranges not matching the
    /// fixed partition are ignored.
    pub fn restore_bucket(&mut self, lo: f64, alpha: f64, beta: f64) {
        if let Some(b) = self.buckets.iter_mut().find(|b| (b.lo - lo).abs() < 1e-9) {
            b.alpha = alpha.max(1.0);
            b.beta = beta.max(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_half_to_one_exactly_once() {
        let mgr = CalibrationManager::new();
        let mut c = 0.50;
        while c <= 1.00 {
            let hits = mgr.buckets().iter().filter(|b| b.contains(c)).count();
            assert_eq!(hits, 1, "confidence {} hit {} buckets", c, hits);
            c += 0.001;
        }
    }

    #[test]
    fn boundaries_are_lower_inclusive() {
        let mgr = CalibrationManager::new();
        assert_eq!(mgr.bucket_for(0.60).lo, 0.60);
        assert_eq!(mgr.bucket_for(0.70).lo, 0.70);
        assert_eq!(mgr.bucket_for(0.95).lo, 0.95);
        assert_eq!(mgr.bucket_for(1.00).lo, 0.95);
    }

    #[test]
    fn fresh_bucket_has_no_correction() {
        let b = CalibrationBucket::new(0.70, 0.80);
        assert_eq!(b.sample_count(), 0);
        assert_eq!(b.correction(), 0.0);
    }

    #[test]
    fn overconfident_bucket_corrects_downward() {
        let mut b = CalibrationBucket::new(0.70, 0.80);
        // 5 correct, 13 incorrect: expected accuracy well below midpoint
        for _ in 0..5 {
            b.update(true, 1.0);
        }
        for _ in 0..13 {
            b.update(false, 1.0);
        }
        assert!(b.sample_count() >= 10);
        assert!(b.correction() < 0.0);
    }

    #[test]
    fn derived_stats_for_a_seasoned_bucket() {
        let mut b = CalibrationBucket::new(0.70, 0.80);
        b.alpha = 6.0;
        b.beta = 14.0;
        assert_eq!(b.sample_count(), 18);
        assert!((b.expected_accuracy() - 0.30).abs() < 1e-12);
        assert!((b.midpoint() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn decay_weight_shrinks_update() {
        let mut fresh = CalibrationBucket::new(0.50, 0.60);
        let mut stale = CalibrationBucket::new(0.50, 0.60);
        fresh.update(true, 1.0);
        stale.update(true, 0.95f64.powi(30));
        assert!(fresh.alpha > stale.alpha);
        assert!(stale.alpha > 1.0);
    }

    #[test]
    fn reset_restores_uniform_priors() {
        let mut mgr = CalibrationManager::new();
        for _ in 0..20 {
            mgr.update_raw(0.72, false, 1.0);
        }
        assert!(mgr.bucket_for(0.72).correction() != 0.0);
        mgr.reset_to_priors();
        for b in mgr.buckets() {
            assert_eq!(b.alpha, 1.0);
            assert_eq!(b.beta, 1.0);
            assert_eq!(b.correction(), 0.0);
        }
    }
}
