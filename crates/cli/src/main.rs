use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sigpilot_bridge::{Bridge, PaperBridge, SocketBridge};
use sigpilot_core::ConfigLoader;
use sigpilot_orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "sigpilot")]
#[command(about = "Trading-signal pipeline with risk gating and stealth execution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the terminal bridge
    Run {
        /// Config profile overlay (config/Config.<profile>.toml)
        #[arg(short, long)]
        profile: Option<String>,
        /// Use the in-memory paper bridge instead of the socket bridge
        #[arg(long)]
        paper: bool,
    },
    /// Replay one signal text through the pipeline on the paper bridge
    Replay {
        /// Raw signal text
        text: String,
        /// Provider the signal is attributed to
        #[arg(short, long, default_value = "replay")]
        provider: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { profile, paper } => run_pipeline(profile.as_deref(), paper).await,
        Commands::Replay { text, provider } => replay_signal(&text, &provider).await,
    }
}

async fn run_pipeline(profile: Option<&str>, paper: bool) -> anyhow::Result<()> {
    let config = match profile {
        Some(profile) => ConfigLoader::load_with_profile(profile)?,
        None => ConfigLoader::load()?,
    };

    let bridge: Arc<dyn Bridge> = if paper {
        tracing::warn!("Paper bridge active, no broker orders will be placed");
        Arc::new(PaperBridge::new())
    } else {
        Arc::new(SocketBridge::new(&config.bridge.host, config.bridge.port))
    };

    let (orchestrator, handle) = Orchestrator::new(config, bridge);
    let runner = tokio::spawn(orchestrator.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    handle.shutdown().await.ok();
    runner.await?;
    Ok(())
}

async fn replay_signal(text: &str, provider: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load().unwrap_or_default();
    let bridge = Arc::new(PaperBridge::new());
    seed_quotes(&bridge);

    let (orchestrator, handle) = Orchestrator::new(config, bridge);
    let runner = tokio::spawn(orchestrator.run());

    let ack = handle.replay_signal(text, provider).await?;
    println!("{}", serde_json::to_string_pretty(&ack)?);

    handle.shutdown().await.ok();
    runner.await?;
    Ok(())
}

/// Seeds a few common quotes so replays fill at plausible prices.
fn seed_quotes(bridge: &PaperBridge) {
    let quotes: &[(&str, &str, &str)] = &[
        ("EURUSD", "1.0848", "1.0850"),
        ("GBPUSD", "1.2648", "1.2650"),
        ("USDJPY", "150.18", "150.20"),
        ("XAUUSD", "1949.50", "1950.00"),
    ];
    for (symbol, bid, ask) in quotes {
        let bid: Decimal = bid.parse().unwrap_or(Decimal::ONE);
        let ask: Decimal = ask.parse().unwrap_or(Decimal::ONE);
        bridge.set_quote(symbol, bid, ask);
    }
}
