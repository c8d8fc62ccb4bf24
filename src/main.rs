//! monkbot entrypoint: admin subcommands run against the store and exit;
//! the default `run` mode boots the scheduler, the resolution poller and the
//! health endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use monkbot::{
    api,
    cli::{self, Cli, Command},
    config::{Config, FeedList, SourceLists},
    execution::Executor,
    learning::LearningState,
    llm::LmClient,
    market::{HttpMarketSource, MarketSource},
    scheduler::{AppState, Scheduler},
    sources::{HttpFeedFetcher, HttpSocialClient, NewsCollector, SocialCollector, SourceClassifier},
    store::Store,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex as TokioMutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = Config::from_env().context("load configuration")?;
    let store = Arc::new(Store::open(&cfg.database_path).context("open store")?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(cfg, store).await,
        Command::ModelSwap { old, new, reason } => cli::model_swap(&store, &old, &new, &reason),
        Command::VoidTrade { id, reason } => cli::void_trade(&store, &id, &reason),
        Command::StartExperiment { description, model } => {
            cli::start_experiment(&store, &description, &model)
        }
        Command::EndExperiment { run_id } => cli::end_experiment(&store, &run_id),
        Command::RecalculateLearning => cli::recalculate_learning(&store),
    }
}

async fn run_daemon(cfg: Config, store: Arc<Store>) -> Result<()> {
    // A current experiment run must exist before any decision is recorded.
    if store.current_run()?.is_none() {
        let run = store.start_run(&cfg.lm_model, "bootstrap run")?;
        info!(run_id = %run.run_id, model = %run.model, "opened bootstrap experiment run");
    }

    let source_lists = SourceLists::load(&cfg.sources_config_path)?;
    let feed_list = FeedList::load(&cfg.feeds_config_path)?;
    let classifier = Arc::new(SourceClassifier::new(&source_lists));

    let market: Arc<dyn MarketSource> = Arc::new(HttpMarketSource::new(&cfg));
    let llm = Arc::new(LmClient::new(&cfg, Arc::clone(&store)));
    let news = Arc::new(NewsCollector::new(
        Arc::new(HttpFeedFetcher::new(cfg.market_timeout_secs)),
        Arc::clone(&classifier),
        &feed_list,
    ));
    let social = Arc::new(SocialCollector::new(
        Arc::new(HttpSocialClient::new(&cfg)),
        classifier,
        Arc::clone(&store),
        cfg.social_usd_per_call,
    ));
    let executor = Arc::new(Executor::new(cfg.trading_mode, Arc::clone(&market)));

    let portfolio = store.load_or_init_portfolio(cfg.initial_bankroll)?;
    let learning = match store.load_learning() {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "learning load failed, starting from priors");
            LearningState::new()
        }
    };
    info!(
        equity = portfolio.total_equity,
        mode = ?cfg.trading_mode,
        "portfolio and learning state loaded"
    );
    let pair = Arc::new(TokioMutex::new((portfolio, learning)));

    let state = Arc::new(AppState::new(Arc::clone(&store)));
    let health_port = cfg.health_port;
    let scheduler = Arc::new(Scheduler::new(
        cfg,
        store,
        market,
        llm,
        news,
        social,
        executor,
        Arc::clone(&state),
        pair,
    ));

    let app = api::router(state);
    let listener = TcpListener::bind(("0.0.0.0", health_port))
        .await
        .with_context(|| format!("bind health port {}", health_port))?;
    info!(port = health_port, "health endpoint listening");

    tokio::select! {
        _ = scheduler.run() => {},
        result = axum::serve(listener, app) => {
            result.context("health server")?;
        }
    }
    Ok(())
}
