mod broker;
mod calendar;
mod config;
mod engine;
mod error;
mod events;
mod journal;
mod market_data;
mod state_store;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use broker::PaperBroker;
use config::{RunnerConfig, RunnerConfigManager};
use engine::backtest::{run_backtest, ExpiryCalendar, OptionChain};
use engine::runner::LiveRunner;
use events::EventBus;
use journal::{CsvJournal, SqliteJournal, TradeJournal};
use market_data::HistoricalMarketData;
use state_store::{StateStore, StateTree};
use types::{Moneyness, Underlying};

#[derive(Parser)]
#[command(name = "nifty-inside-bar-engine")]
#[command(author = "Trading Engine")]
#[command(version = "0.1.0")]
#[command(about = "Inside-bar breakout engine for NIFTY index options", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Runner configuration file (TOML); overridden by NIFTY__* env vars.
    #[arg(short, long, default_value = "runner_config.toml")]
    config: String,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live control loop against a replayed candle feed.
    Live {
        /// JSON file of RawBar entries used as the market-data feed.
        #[arg(long)]
        candles: PathBuf,
        /// Underlying to trade.
        #[arg(long, default_value = "nifty")]
        underlying: String,
        /// Number of cycles to run (omit to run until Ctrl+C).
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Run the walk-forward backtest simulator over a candle file.
    Backtest {
        /// JSON file of Candle entries (aligned 1h spot OHLC).
        #[arg(long)]
        candles: PathBuf,
        #[arg(long, default_value = "nifty")]
        underlying: String,
    },
    /// Set the execution-armed safety interlock to true.
    Arm,
    /// Clear the execution-armed safety interlock.
    Disarm,
    /// Print the current persisted state snapshot.
    Status,
    /// Update one or more live-tunable runner settings (§3 `RunnerState`,
    /// §6.3). Validated and committed atomically; an invalid combination
    /// leaves the persisted config unchanged. Only the fields passed are
    /// updated; omitted fields keep their current value.
    SetConfig {
        #[arg(long)]
        sl_points: Option<Decimal>,
        #[arg(long)]
        trail_points: Option<Decimal>,
        #[arg(long)]
        order_lots: Option<u32>,
        #[arg(long)]
        atm_offset: Option<i64>,
        #[arg(long)]
        daily_loss_limit_pct: Option<Decimal>,
        #[arg(long)]
        lot_size: Option<u32>,
    },
}

/// The execution-arm interlock, persisted as its own small file so an
/// external controller can flip it between `live` process invocations
/// without touching the rest of the runner config (§6.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ArmFlag {
    armed: bool,
}

const ARM_FLAG_PATH: &str = "execution_armed.json";

async fn read_arm_flag() -> bool {
    match tokio::fs::read(ARM_FLAG_PATH).await {
        Ok(bytes) => serde_json::from_slice::<ArmFlag>(&bytes).map(|f| f.armed).unwrap_or(false),
        Err(_) => false,
    }
}

async fn write_arm_flag(armed: bool) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(&ArmFlag { armed })?;
    tokio::fs::write(ARM_FLAG_PATH, bytes).await.context("writing execution-armed flag")?;
    Ok(())
}

fn load_runner_config(path: &str) -> Result<RunnerConfig> {
    let built = config_rs::Config::builder()
        .add_source(config_rs::File::with_name(path).required(false))
        .add_source(config_rs::Environment::with_prefix("NIFTY").separator("__"))
        .build()?;
    let runner_config: RunnerConfig = built.try_deserialize().unwrap_or_default();
    if let Err(errors) = runner_config.validate() {
        anyhow::bail!("invalid runner config: {}", errors.join(", "));
    }
    Ok(runner_config)
}

fn parse_underlying(raw: &str) -> Result<Underlying> {
    match raw.to_lowercase().as_str() {
        "nifty" => Ok(Underlying::Nifty),
        "banknifty" => Ok(Underlying::BankNifty),
        other => anyhow::bail!("unknown underlying '{other}', expected nifty or banknifty"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!("nifty_inside_bar_engine starting");

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "fatal error during startup or execution");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Arm => {
            write_arm_flag(true).await?;
            info!("execution-armed flag set to true");
        }
        Commands::Disarm => {
            write_arm_flag(false).await?;
            info!("execution-armed flag set to false");
        }
        Commands::Status => {
            run_status(&cli.config).await?;
        }
        Commands::SetConfig {
            sl_points,
            trail_points,
            order_lots,
            atm_offset,
            daily_loss_limit_pct,
            lot_size,
        } => {
            run_set_config(
                &cli.config,
                sl_points,
                trail_points,
                order_lots,
                atm_offset,
                daily_loss_limit_pct,
                lot_size,
            )
            .await?;
        }
        Commands::Backtest { candles, underlying } => {
            run_backtest_command(&cli.config, candles, &underlying).await?;
        }
        Commands::Live {
            candles,
            underlying,
            cycles,
        } => {
            run_live(&cli.config, candles, &underlying, cycles).await?;
        }
    }
    Ok(())
}

async fn run_status(config_path: &str) -> Result<()> {
    let runner_config = load_runner_config(config_path)?;
    let armed = read_arm_flag().await;

    println!("execution_armed: {armed}");
    println!("strategy.sl_points: {}", runner_config.strategy.sl_points);
    println!("strategy.lot_size: {}", runner_config.strategy.lot_size);
    println!("risk.daily_loss_limit_pct: {}", runner_config.risk.daily_loss_limit_pct);

    let store = StateStore::new(&runner_config.persistence.snapshot_dir, runner_config.persistence.snapshot_retention);
    let event_log = state_store::EventLog::new(format!("{}/events.jsonl", runner_config.persistence.snapshot_dir));
    match store.load_latest().await? {
        Some((state, snapshot_at)) => {
            println!("last snapshot: {snapshot_at}");
            println!("daily_pnl: {}", state.daily_pnl);
            println!("active_monitors: {}", state.active_monitors.len());
            for position in &state.active_monitors {
                println!(
                    "  {} remaining={} stop_loss={} realized_pnl={}",
                    position.tradingsymbol, position.remaining_qty_lots, position.stop_loss, position.realized_pnl
                );
            }
            let replayed = event_log.replay_since(snapshot_at).await?;
            println!("events since snapshot: {}", replayed.len());
            for event in replayed.iter().rev().take(5) {
                println!("  {} at {}", event.event_type, event.timestamp);
            }
        }
        None => println!("no state snapshot found yet"),
    }
    Ok(())
}

/// Applies a partial tunable update through `RunnerConfigManager`'s
/// validate-then-commit-or-revert path (§6.3) and persists the resulting
/// config back to `config_path` so a running `live` process picks it up
/// on its next reload, the same way `arm`/`disarm` flip a sidecar file
/// from a separate invocation.
#[allow(clippy::too_many_arguments)]
async fn run_set_config(
    config_path: &str,
    sl_points: Option<Decimal>,
    trail_points: Option<Decimal>,
    order_lots: Option<u32>,
    atm_offset: Option<i64>,
    daily_loss_limit_pct: Option<Decimal>,
    lot_size: Option<u32>,
) -> Result<()> {
    let runner_config = load_runner_config(config_path)?;
    let manager = RunnerConfigManager::new(runner_config);

    let mut strategy = manager.get_config().await.strategy;
    let mut strategy_changed = false;
    if let Some(v) = sl_points {
        strategy.sl_points = v;
        strategy_changed = true;
    }
    if let Some(v) = trail_points {
        strategy.trail_points = v;
        strategy_changed = true;
    }
    if let Some(v) = order_lots {
        strategy.order_lots = v;
        strategy_changed = true;
    }
    if let Some(v) = atm_offset {
        strategy.atm_offset = v;
        strategy_changed = true;
    }
    if let Some(v) = lot_size {
        strategy.lot_size = v;
        strategy_changed = true;
    }
    if strategy_changed {
        manager.update_strategy(strategy).await.map_err(|e| anyhow::anyhow!(e))?;
    }

    if let Some(v) = daily_loss_limit_pct {
        let mut risk = manager.get_config().await.risk;
        risk.daily_loss_limit_pct = v;
        manager.update_risk(risk).await.map_err(|e| anyhow::anyhow!(e))?;
    }

    let updated = manager.get_config().await;
    let toml_text = toml::to_string_pretty(&updated).context("serializing updated runner config")?;
    tokio::fs::write(config_path, toml_text)
        .await
        .with_context(|| format!("writing updated runner config to {config_path}"))?;

    info!("runner config updated");
    println!("sl_points: {}", updated.strategy.sl_points);
    println!("trail_points: {}", updated.strategy.trail_points);
    println!("order_lots: {}", updated.strategy.order_lots);
    println!("atm_offset: {}", updated.strategy.atm_offset);
    println!("lot_size: {}", updated.strategy.lot_size);
    println!("daily_loss_limit_pct: {}", updated.risk.daily_loss_limit_pct);
    Ok(())
}

async fn build_journal(config: &RunnerConfig) -> Result<Arc<dyn TradeJournal>> {
    match SqliteJournal::new(&config.persistence.journal_path).await {
        Ok(journal) => Ok(Arc::new(journal)),
        Err(e) => {
            warn!(error = %e, "sqlite journal unavailable, falling back to CSV journal");
            let csv_path = format!("{}.csv", config.persistence.journal_path);
            Ok(Arc::new(CsvJournal::new(csv_path).await?))
        }
    }
}

async fn run_backtest_command(config_path: &str, candles_path: PathBuf, underlying: &str) -> Result<()> {
    let runner_config = load_runner_config(config_path)?;
    let underlying = parse_underlying(underlying)?;

    let raw = tokio::fs::read(&candles_path)
        .await
        .with_context(|| format!("reading candle file {}", candles_path.display()))?;
    let candles: Vec<types::Candle> = serde_json::from_slice(&raw).context("parsing candle file")?;

    // No option chain is supplied from the CLI; the synthetic premium path
    // applies (§4.H step 5). A chain-backed run is exercised in tests.
    let chain: Option<&OptionChain> = None;
    let expiries = ExpiryCalendar::new(next_four_weekly_tuesdays(Utc::now()));

    let results = run_backtest(
        &candles,
        chain,
        &expiries,
        underlying,
        Moneyness::Atm,
        &runner_config.strategy,
        runner_config.risk.initial_capital,
    );

    println!("=== Backtest Results ===");
    println!("initial_capital:   {}", results.initial_capital);
    println!("final_capital:     {}", results.final_capital);
    println!("total_trades:      {}", results.total_trades);
    println!("winning_trades:    {}", results.winning_trades);
    println!("losing_trades:     {}", results.losing_trades);
    println!("win_rate_pct:      {:.2}", results.win_rate_pct);
    println!("average_win:       {}", results.average_win);
    println!("average_loss:      {}", results.average_loss);
    println!("max_drawdown_pct:  {:.2}", results.max_drawdown_pct);
    println!("longest_win_streak:  {}", results.longest_win_streak);
    println!("longest_loss_streak: {}", results.longest_loss_streak);
    println!("capital_exhausted: {}", results.capital_exhausted);
    println!("avg_capital_req:   {}", results.average_capital_requirement);
    println!("trail_exit_share_of_wins_pct: {:.2}", results.trail_exit_share_of_wins_pct);

    Ok(())
}

/// NIFTY's weekly expiry falls on Tuesday at 15:30 IST (§6.1); returns the
/// next four such instants' calendar dates on or after `from`.
fn next_four_weekly_tuesdays(from: chrono::DateTime<Utc>) -> Vec<chrono::NaiveDate> {
    use chrono::{Datelike, Weekday};
    let ist = from.with_timezone(&chrono_tz::Asia::Kolkata);
    let mut date = ist.date_naive();
    let mut out = Vec::new();
    while out.len() < 4 {
        if date.weekday() == Weekday::Tue {
            out.push(date);
        }
        date = date.succ_opt().expect("date arithmetic does not overflow within a few weeks");
    }
    out
}

async fn run_live(
    config_path: &str,
    candles_path: PathBuf,
    underlying: &str,
    cycles: Option<u64>,
) -> Result<()> {
    let runner_config = load_runner_config(config_path)?;
    let underlying = parse_underlying(underlying)?;

    let raw = tokio::fs::read(&candles_path)
        .await
        .with_context(|| format!("reading candle file {}", candles_path.display()))?;
    let bars: Vec<types::RawBar> = serde_json::from_slice(&raw).context("parsing candle feed file")?;

    let mut aligner = engine::aligner::CandleAligner::new();
    let mut candles = Vec::new();
    for bar in &bars {
        if let Some(closed) = aligner.ingest(bar) {
            candles.push(closed);
        }
    }

    let market_data = Arc::new(HistoricalMarketData::new());
    market_data.load(underlying, candles).await;

    let broker = Arc::new(PaperBroker::new(
        runner_config.risk.initial_capital * Decimal::from(10),
        bars.last().map(|b| b.close).unwrap_or_default(),
    ));
    let journal = build_journal(&runner_config).await?;
    let events = Arc::new(EventBus::new());
    let config_manager = RunnerConfigManager::new(runner_config.clone());

    let event_log = state_store::EventLog::new(format!("{}/events.jsonl", runner_config.persistence.snapshot_dir));
    tokio::fs::create_dir_all(&runner_config.persistence.snapshot_dir).await.ok();
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = event_rx.recv().await {
            if let Err(e) = event_log.append(&envelope).await {
                warn!(error = %e, "failed to append event to replay log");
            }
        }
    });

    let runner = Arc::new(LiveRunner::new(
        market_data,
        broker,
        journal,
        events,
        config_manager,
        underlying,
    ));

    let store = StateStore::new(&runner_config.persistence.snapshot_dir, runner_config.persistence.snapshot_retention);

    {
        let broker = runner.broker();
        let events = runner.events();
        let runner = Arc::clone(&runner);
        let interval_seconds = runner_config.polling.reconciliation_interval_seconds;
        tokio::spawn(async move {
            let mut reconciliation = engine::reconciliation::BrokerReconciliation::new();
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
            loop {
                ticker.tick().await;
                let positions = runner.snapshot_positions().await;
                reconciliation.run_once(broker.as_ref(), &positions, events.as_ref()).await;
            }
        });
    }

    info!("starting live control loop; press Ctrl+C to stop");
    let mut tick: u64 = 0;
    loop {
        if let Some(limit) = cycles {
            if tick >= limit {
                break;
            }
        }

        runner.set_execution_armed(read_arm_flag().await);
        // Pick up tunables written by a concurrent `set-config` invocation
        // (§6.3); validate-then-commit-or-revert is `update_full`'s job, so
        // a transiently invalid file on disk just keeps the prior config.
        if let Ok(reloaded) = load_runner_config(config_path) {
            runner.config_manager().update_full(reloaded).await.ok();
        }
        let now = Utc::now();
        let outcome = runner.run_cycle(now).await;
        info!(?outcome, "cycle complete");

        let state = StateTree {
            daily_pnl: runner.daily_pnl().await,
            daily_pnl_date: Some(now.with_timezone(&chrono_tz::Asia::Kolkata).date_naive()),
            active_signal: runner.active_signal_snapshot().await,
            active_monitors: runner.snapshot_positions().await,
            execution_armed: runner.is_execution_armed(),
        };
        if let Err(e) = store.save(&state, now).await {
            warn!(error = %e, "failed to persist state snapshot");
        }

        tick += 1;
        if cycles.is_some() {
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(runner_config.polling.polling_interval_seconds)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
