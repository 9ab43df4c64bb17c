use anyhow::Context;
use btcbot::api::CoinGeckoClient;
use btcbot::config::{BotConfig, ConfigError};
use btcbot::control::{self, ControlServer};
use btcbot::indicators::RsiEngine;
use btcbot::notification::{spawn_dispatcher, GatewayClient, NotificationDispatcher};
use btcbot::scheduler::Orchestrator;
use btcbot::strategy::SignalEvaluator;
use btcbot::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "btcbot", about = "BTC RSI alert bot", version)]
struct Cli {
    /// Configuration file (without extension is fine)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduled alert service (default)
    Run,
    /// Send one message through the running service's rate-limited dispatcher
    Notify {
        /// Message text
        text: Vec<String>,
    },
    /// Fetch prices once and print RSI and signal without notifying
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            config.validate()?;
            run(config).await?;
        }
        Command::Notify { text } => {
            validate_without_gateway(&config)?;
            notify(config, text.join(" ")).await?;
        }
        Command::Check => {
            validate_without_gateway(&config)?;
            check(config).await?;
        }
    }

    Ok(())
}

/// Gateway credentials live with the service, not with the client commands
fn validate_without_gateway(config: &BotConfig) -> std::result::Result<(), ConfigError> {
    match config.validate() {
        Ok(()) | Err(ConfigError::Missing(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("btcbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: BotConfig) -> anyhow::Result<()> {
    tracing::info!("🚀 btcbot starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Coin: {} ({})", config.coingecko.coin_id, config.coingecko.vs_currency);
    tracing::info!(
        "  RSI: period {} / oversold {} / overbought {}",
        config.indicator.period,
        config.signal.oversold_level,
        config.signal.overbought_level
    );
    tracing::info!("  Interval: {}s", config.scheduler.interval_secs);

    let feed = CoinGeckoClient::new(config.coingecko.clone())?;
    let gateway = GatewayClient::new(&config.gateway)?;
    let (notifier, dispatcher_task) =
        spawn_dispatcher(NotificationDispatcher::new(gateway, config.gateway.clone()));

    let control = ControlServer::bind(&config.control.bind_addr, notifier.clone()).await?;
    tracing::info!("  Control socket: {}", control.local_addr()?);
    let control_task = tokio::spawn(control.serve());

    let orchestrator = Orchestrator::new(&config, feed, notifier);
    let scheduler_task = tokio::spawn(orchestrator.run());

    tracing::info!("✅ Scheduler running. Press Ctrl+C to stop.");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("\n⏹️  Shutting down...");
        }
        result = scheduler_task => {
            if let Err(e) = result {
                tracing::error!("❌ Scheduler task ended unexpectedly: {}", e);
            }
        }
    }

    // Messages still queued for a later window are abandoned
    control_task.abort();
    dispatcher_task.abort();
    tracing::info!("✅ Shutdown complete");
    Ok(())
}

async fn notify(config: BotConfig, text: String) -> anyhow::Result<()> {
    anyhow::ensure!(!text.trim().is_empty(), "message text is empty");

    let outcome = control::send_manual(&config.control.bind_addr, &text).await?;
    tracing::info!(?outcome, "Manual notification handed to the service");
    println!("{:?}", outcome);
    Ok(())
}

async fn check(config: BotConfig) -> anyhow::Result<()> {
    let mut feed = CoinGeckoClient::new(config.coingecko.clone())?;
    let series = feed.fetch(config.coingecko.lookback_hours).await;
    let latest = series
        .latest()
        .copied()
        .context("no price data returned by CoinGecko")?;

    let mut engine = RsiEngine::from_config(&config.indicator);
    for point in series.points() {
        engine.update(point.price);
    }

    let evaluator = SignalEvaluator::from_config(&config.signal);

    println!("\n📊 {} / {}", config.coingecko.coin_id, config.coingecko.vs_currency);
    println!("  Points:    {}", series.len());
    println!("  Latest:    ${:.2} at {}", latest.price, latest.timestamp);
    match engine.last_value() {
        Some(rsi) => {
            let signal = evaluator.evaluate(rsi, latest.price);
            println!("  RSI({}):   {:.2}", engine.period(), rsi);
            println!("  Signal:    {}", signal.kind.label());
        }
        None => println!(
            "  RSI({}):   warming up ({}/{} points)",
            engine.period(),
            engine.observed(),
            config.indicator.min_data_points
        ),
    }

    Ok(())
}
