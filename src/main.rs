use anyhow::{bail, Context};
use bandbot::api::{BinanceClient, RemoteFeed};
use bandbot::backtest::{BacktestRunner, MarketScenario, SyntheticFeed};
use bandbot::config::{AppConfig, ExecutionMode};
use bandbot::db::PostgresCandleStore;
use bandbot::execution::{ExecutionEngine, LiveBackend, OrderBackend, SimulatedBackend};
use bandbot::models::{Candle, Timeframe};
use bandbot::persistence::{CandleStore, MemoryCandleStore, RedisCandleStore};
use bandbot::sync::{CandleSynchronizer, SyncContext};
use bandbot::trader::Trader;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

/// Bollinger band trading bot
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, default_value = "bandbot.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile stored candles with the exchange
    Sync {
        /// Window start: epoch millis, YYYY-MM-DD or RFC 3339
        #[arg(long, requires = "end", conflicts_with = "limit")]
        start: Option<String>,
        /// Window end (inclusive), same formats as --start
        #[arg(long, requires = "start")]
        end: Option<String>,
        /// Only make sure the most recent N candles are stored
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Replay history through the strategy on the simulated backend
    Backtest {
        /// Generate candles instead of reading the exchange
        #[arg(long, default_value_t = false)]
        synthetic: bool,
        /// Synthetic scenario: uptrend, downtrend, sideways, volatile, gaps, crash
        #[arg(long, default_value = "volatile", value_parser = parse_scenario)]
        scenario: MarketScenario,
        /// Seed for synthetic data
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of candles when no window is given
        #[arg(long, default_value_t = 1000)]
        candles: usize,
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Trade closed candles as they arrive until Ctrl+C
    Live,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(Some(&cli.config)).context("Failed to load configuration")?;
    setup_logging(&config);

    tracing::info!(
        "🚀 BandBot starting: {} {} (period {}, multiplier {})",
        config.strategy.symbol,
        config.strategy.timeframe,
        config.strategy.period,
        config.strategy.multiplier
    );

    match cli.command {
        Commands::Sync { start, end, limit } => run_sync(&config, start, end, limit).await,
        Commands::Backtest {
            synthetic,
            scenario,
            seed,
            candles,
            start,
            end,
        } => {
            let window = match (start, end) {
                (Some(start), Some(end)) => Some((parse_time(&start)?, parse_time(&end)?)),
                _ => None,
            };
            run_backtest(&config, synthetic, scenario, seed, candles, window).await
        }
        Commands::Live => run_live(&config).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Postgres, then Redis, then the in-memory store
async fn open_store(config: &AppConfig) -> Arc<dyn CandleStore> {
    let storage = &config.storage;

    if let Some(url) = &storage.postgres_url {
        match PostgresCandleStore::new(url).await {
            Ok(store) => {
                tracing::info!("Postgres candle store enabled");
                return Arc::new(store);
            }
            Err(e) => tracing::warn!("Failed to connect to Postgres ({}), trying next store", e),
        }
    }

    if let Some(url) = &storage.redis_url {
        match RedisCandleStore::new(url).await {
            Ok(store) => {
                tracing::info!("Redis candle store enabled at {}", url);
                return Arc::new(store);
            }
            Err(e) => tracing::warn!("Failed to connect to Redis ({}), trying next store", e),
        }
    }

    tracing::info!(
        "Using in-memory candle store (max {} candles per series)",
        storage.memory_max_candles
    );
    Arc::new(MemoryCandleStore::new(storage.memory_max_candles))
}

fn exchange_feed(config: &AppConfig) -> anyhow::Result<Arc<dyn RemoteFeed>> {
    let client = BinanceClient::new(&config.exchange).context("Failed to create exchange client")?;
    Ok(Arc::new(client))
}

fn sync_context(config: &AppConfig) -> SyncContext {
    match config.sync.timeout_secs {
        Some(secs) => SyncContext::new().with_timeout(Duration::from_secs(secs)),
        None => SyncContext::new(),
    }
}

fn timeframe(config: &AppConfig) -> anyhow::Result<Timeframe> {
    Timeframe::parse(&config.strategy.timeframe)
        .with_context(|| format!("Unknown timeframe {}", config.strategy.timeframe))
}

fn parse_scenario(s: &str) -> Result<MarketScenario, String> {
    match s.to_ascii_lowercase().as_str() {
        "uptrend" => Ok(MarketScenario::Uptrend),
        "downtrend" => Ok(MarketScenario::Downtrend),
        "sideways" => Ok(MarketScenario::Sideways),
        "volatile" => Ok(MarketScenario::Volatile),
        "gaps" => Ok(MarketScenario::WithGaps),
        "crash" => Ok(MarketScenario::Crash),
        other => Err(format!("unknown scenario '{}'", other)),
    }
}

/// Epoch millis, a UTC date or an RFC 3339 timestamp
fn parse_time(s: &str) -> anyhow::Result<i64> {
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid time '{}'", s))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid date '{}'", s))?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp_millis())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_sync(
    config: &AppConfig,
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let store = open_store(config).await;
    let synchronizer = CandleSynchronizer::new(store, exchange_feed(config)?, config.sync.clone());
    let ctx = sync_context(config);
    let symbol = &config.strategy.symbol;
    let tf = &config.strategy.timeframe;

    match (start, end, limit) {
        (Some(start), Some(end), _) => {
            let (start, end) = (parse_time(&start)?, parse_time(&end)?);
            if start > end {
                bail!("--start must not be after --end");
            }
            let (candles, report) = synchronizer
                .fetch_range_with_report(&ctx, symbol, tf, start, end)
                .await
                .context("Range sync aborted")?;
            tracing::info!(
                "✅ {} candles in window ({} gaps, {} failed)",
                candles.len(),
                report.missing_ranges.len(),
                report.failed_ranges.len()
            );
        }
        (_, _, Some(limit)) => {
            let candles = synchronizer
                .fetch_latest(&ctx, symbol, tf, limit)
                .await
                .context("Latest sync aborted")?;
            match (candles.first(), candles.last()) {
                (Some(first), Some(last)) => tracing::info!(
                    "✅ {} latest candles, {} .. {}",
                    candles.len(),
                    first.open_time,
                    last.open_time
                ),
                _ => tracing::warn!("No candles available for {} {}", symbol, tf),
            }
        }
        _ => bail!("sync needs either --start and --end, or --limit"),
    }

    Ok(())
}

async fn run_backtest(
    config: &AppConfig,
    synthetic: bool,
    scenario: MarketScenario,
    seed: u64,
    num_candles: usize,
    window: Option<(i64, i64)>,
) -> anyhow::Result<()> {
    let symbol = &config.strategy.symbol;
    let tf = timeframe(config)?;
    let ctx = sync_context(config);

    let candles = if synthetic {
        let (start, _) = window.unwrap_or((0, 0));
        let feed = SyntheticFeed::generate(seed, scenario, symbol, tf, start, num_candles);
        tracing::info!(
            "📊 Generated {} synthetic {:?} candles (seed {})",
            feed.candles().len(),
            scenario,
            seed
        );
        let end = feed.candles().last().map_or(start, |c| c.open_time);

        // Run the generated series through the same reconciliation path
        let store = Arc::new(MemoryCandleStore::new(config.storage.memory_max_candles));
        let synchronizer = CandleSynchronizer::new(store, Arc::new(feed), config.sync.clone());
        synchronizer
            .fetch_range(&ctx, symbol, tf.as_str(), start, end)
            .await
            .context("Failed to load synthetic candles")?
    } else {
        let store = open_store(config).await;
        let synchronizer =
            CandleSynchronizer::new(store, exchange_feed(config)?, config.sync.clone());
        match window {
            Some((start, end)) => synchronizer
                .fetch_range(&ctx, symbol, tf.as_str(), start, end)
                .await
                .context("Failed to load candle window")?,
            None => synchronizer
                .fetch_latest(&ctx, symbol, tf.as_str(), num_candles)
                .await
                .context("Failed to load latest candles")?,
        }
    };

    let closed = closed_candles(candles, Utc::now().timestamp_millis(), None);
    let metrics = BacktestRunner::new(config.clone())
        .run(&closed)
        .await
        .context("Backtest failed")?;
    metrics.print_report();
    Ok(())
}

async fn run_live(config: &AppConfig) -> anyhow::Result<()> {
    let strategy = &config.strategy;
    let execution = &config.execution;
    let tf = timeframe(config)?;
    let interval = Duration::from_millis(tf.interval_ms() as u64);

    let feed = exchange_feed(config)?;
    let synchronizer = CandleSynchronizer::new(open_store(config).await, feed.clone(), config.sync.clone());

    let backend: Box<dyn OrderBackend> = match execution.mode {
        ExecutionMode::Live => Box::new(LiveBackend::new(
            feed.clone(),
            &strategy.base_asset,
            &strategy.quote_asset,
        )),
        ExecutionMode::Simulated => Box::new(SimulatedBackend::new(
            execution.initial_capital,
            execution.commission_rate,
        )),
    };

    let (cancel, ctx) = SyncContext::cancellable();
    let engine = ExecutionEngine::new(backend, execution.initial_capital, execution.commission_rate)
        .with_context(ctx.clone());
    let mut trader = Trader::new(strategy, execution.commission_rate, engine);

    match trader.engine().real_portfolio().await {
        Ok(p) => tracing::info!(
            "💰 Backend portfolio: cash ${:.2}, position {:.8} {}",
            p.cash,
            p.position,
            strategy.base_asset
        ),
        Err(e) => tracing::warn!("Could not read backend portfolio: {}", e),
    }

    // Warm the band window on history so the first live bar can trade
    let history = synchronizer
        .fetch_latest(&ctx, &strategy.symbol, tf.as_str(), strategy.period)
        .await
        .context("Failed to load warm-up history")?;
    let history = closed_candles(history, Utc::now().timestamp_millis(), None);
    let mut last_seen = history.last().map(|c| c.open_time);
    trader.warm_up(&history);
    tracing::info!(
        "🔥 Warmed up on {} candles, polling every {}s. Press Ctrl+C to stop...",
        history.len(),
        interval.as_secs()
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                cancel.cancel();
                break;
            }
            _ = ticker.tick() => {
                let latest = match synchronizer
                    .fetch_latest(&ctx, &strategy.symbol, tf.as_str(), strategy.period)
                    .await
                {
                    Ok(candles) => candles,
                    Err(e) => {
                        tracing::error!("Candle poll failed: {}", e);
                        continue;
                    }
                };

                for candle in closed_candles(latest, Utc::now().timestamp_millis(), last_seen) {
                    last_seen = Some(candle.open_time);
                    match trader.on_candle(&candle).await {
                        Ok(outcome) => {
                            for fill in &outcome.fills {
                                tracing::info!(
                                    "💹 {} {:.8} @ {:.4} (fee {:.4})",
                                    fill.side.as_str(),
                                    fill.quantity,
                                    fill.price,
                                    fill.commission
                                );
                            }
                        }
                        Err(e) if e.is_data_source() => {
                            tracing::warn!("Skipping bar {}: {}", candle.open_time, e);
                        }
                        Err(e) => {
                            tracing::error!("Trading stopped on bar {}: {}", candle.open_time, e);
                            return Err(e).context("Live trading failed");
                        }
                    }
                }
            }
        }
    }

    let summary = trader.engine().statistics();
    tracing::info!(
        "Equity ${:.2} ({:+.2}%), {} trades, win rate {:.1}%",
        summary.equity,
        summary.total_return * 100.0,
        summary.trades.total_trades,
        summary.win_rate * 100.0
    );
    tracing::info!("👋 BandBot stopped");
    Ok(())
}

/// Candles already closed at `now` and newer than `after`, ascending
fn closed_candles(candles: Vec<Candle>, now: i64, after: Option<i64>) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| c.close_time < now)
        .filter(|c| after.map_or(true, |seen| c.open_time > seen))
        .collect()
}
