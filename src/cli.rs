//! CLI surface: experiment lifecycle, model swap, void and learning rebuild.
//!
//! Every command mutates state transactionally and exits nonzero on
//! validation failure (the binary maps errors to exit codes).

use crate::learning::LearningState;
use crate::models::ModelSwapEvent;
use crate::store::Store;
use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "monkbot", about = "Prediction-market trader with a learning loop")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scan/resolution daemon (default).
    Run,
    /// Close the current run, open one under the new model and reset the
    /// model-scoped learning layers.
    ModelSwap {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
        #[arg(long)]
        reason: String,
    },
    /// Void a trade record and rebuild learning from the survivors.
    VoidTrade {
        #[arg(long)]
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Open a new experiment run.
    StartExperiment {
        #[arg(long)]
        description: String,
        #[arg(long)]
        model: String,
    },
    /// End an experiment run by id.
    EndExperiment {
        #[arg(long = "run-id")]
        run_id: String,
    },
    /// Rebuild all learning state from resolved non-void records.
    RecalculateLearning,
}

/// Swap models: end the current run, open the successor, log the swap event,
/// then reset calibration to priors and dampen market-type history. Signal
/// trackers carry over untouched.
pub fn model_swap(store: &Store, old: &str, new: &str, reason: &str) -> Result<()> {
    let current = store
        .current_run()?
        .ok_or_else(|| anyhow!("no current experiment run"))?;
    if current.model != old {
        return Err(anyhow!(
            "current run model is '{}', not '{}'",
            current.model,
            old
        ));
    }

    let new_run = store.start_run(new, &format!("model swap: {}", reason))?;
    store.record_model_swap(&ModelSwapEvent {
        id: Uuid::new_v4().to_string(),
        old_model: old.to_string(),
        new_model: new.to_string(),
        reason: reason.to_string(),
        new_run_id: new_run.run_id.clone(),
        created_at: Utc::now(),
    })?;

    let mut learning = store.load_learning()?;
    learning.apply_model_swap();
    store.save_learning(&learning)?;

    info!(old, new, new_run_id = %new_run.run_id, "model swap complete");
    println!("{}", new_run.run_id);
    Ok(())
}

/// Void one record, then rebuild every learning layer by replaying the
/// remaining resolved non-void records from priors.
pub fn void_trade(store: &Store, record_id: &str, reason: &str) -> Result<()> {
    store.void_record(record_id, reason)?;
    recalculate_learning(store)?;
    info!(record_id, reason, "record voided and learning rebuilt");
    Ok(())
}

pub fn start_experiment(store: &Store, description: &str, model: &str) -> Result<()> {
    let run = store.start_run(model, description)?;
    println!("{}", run.run_id);
    Ok(())
}

pub fn end_experiment(store: &Store, run_id: &str) -> Result<()> {
    store.end_run(run_id)?;
    info!(run_id, "experiment run ended");
    Ok(())
}

/// Replay resolved non-void records in resolution order into fresh state.
pub fn recalculate_learning(store: &Store) -> Result<()> {
    let records = store.resolved_nonvoid_records()?;
    let rebuilt = LearningState::rebuild(&records);
    store.save_learning(&rebuilt)?;
    info!(records = records.len(), "learning state rebuilt");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::market_type::SWAP_DAMPEN_WINDOW;
    use crate::models::{
        AdjustmentTrace, InfoType, MarketType, Side, SignalTag, SourceTier, Tier, TradeRecord,
    };
    use chrono::Duration;

    fn resolved(run_id: &str, id: &str, i: i64) -> TradeRecord {
        let created = Utc::now() - Duration::hours(48) + Duration::hours(i);
        let resolved = created + Duration::hours(2);
        TradeRecord {
            id: id.to_string(),
            run_id: run_id.to_string(),
            model: "model-a".into(),
            tier: Tier::Tier1,
            market_id: format!("mkt-{}", id),
            question: "q".into(),
            market_type: MarketType::Political,
            yes_price: 0.6,
            no_price: 0.4,
            resolution_time: resolved,
            resolution_hours: 2.0,
            volume_24h: 0.0,
            liquidity: 1000.0,
            fee_rate: 0.0,
            raw_probability: 0.7,
            raw_confidence: 0.72,
            adjustments: AdjustmentTrace::default(),
            adjusted_probability: 0.66,
            adjusted_confidence: 0.7,
            extra_edge: 0.0,
            action: Side::BuyYes,
            position_size: 50.0,
            kelly_fraction: 0.25,
            entry_price: 0.6,
            executed_price: Some(0.61),
            calculated_edge: 0.05,
            score: 0.01,
            skip_reason: None,
            market_cluster_id: None,
            signal_tags: vec![SignalTag {
                tier: SourceTier::S1,
                info_type: InfoType::I2,
            }],
            actual_outcome: Some(if i % 2 == 0 { 1.0 } else { 0.0 }),
            pnl: Some(if i % 2 == 0 { 10.0 } else { -8.0 }),
            brier_raw: Some(0.1),
            brier_adjusted: Some(0.12),
            resolved_at: Some(resolved),
            unrealized_adverse_move: 0.0,
            voided: false,
            void_reason: None,
            headline_only: false,
            created_at: created,
        }
    }

    #[test]
    fn model_swap_validates_old_model_and_resets_layers() {
        let store = Store::open_in_memory().unwrap();
        let run = store.start_run("model-a", "first").unwrap();
        for i in 0..40 {
            store
                .insert_record(&resolved(&run.run_id, &format!("r{}", i), i))
                .unwrap();
        }
        recalculate_learning(&store).unwrap();
        let before = store.load_learning().unwrap();
        assert!(
            before
                .market_types
                .get(MarketType::Political)
                .unwrap()
                .brier_scores
                .len()
                > SWAP_DAMPEN_WINDOW
        );
        let trackers_before = before.snapshot().trackers;

        // Wrong old model: validation failure
        assert!(model_swap(&store, "model-x", "model-b", "test").is_err());

        model_swap(&store, "model-a", "model-b", "upgrade").unwrap();

        let current = store.current_run().unwrap().unwrap();
        assert_eq!(current.model, "model-b");

        let after = store.load_learning().unwrap();
        for b in after.calibration.buckets() {
            assert_eq!((b.alpha, b.beta), (1.0, 1.0));
        }
        assert_eq!(
            after
                .market_types
                .get(MarketType::Political)
                .unwrap()
                .brier_scores
                .len(),
            SWAP_DAMPEN_WINDOW
        );
        assert_eq!(after.snapshot().trackers, trackers_before);
    }

    #[test]
    fn void_rebuild_matches_manual_replay() {
        let store = Store::open_in_memory().unwrap();
        let run = store.start_run("model-a", "x").unwrap();
        for i in 0..10 {
            store
                .insert_record(&resolved(&run.run_id, &format!("r{}", i), i))
                .unwrap();
        }
        void_trade(&store, "r7", "oracle dispute").unwrap();

        let survivors = store.resolved_nonvoid_records().unwrap();
        assert_eq!(survivors.len(), 9);
        let expected = LearningState::rebuild(&survivors);
        let stored = store.load_learning().unwrap();
        assert_eq!(stored.snapshot(), expected.snapshot());

        // Unknown record: validation failure
        assert!(void_trade(&store, "missing", "x").is_err());
    }

    #[test]
    fn experiment_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        start_experiment(&store, "baseline", "model-a").unwrap();
        let run = store.current_run().unwrap().unwrap();
        end_experiment(&store, &run.run_id).unwrap();
        assert!(store.current_run().unwrap().is_none());
        assert!(end_experiment(&store, &run.run_id).is_err());
    }
}
