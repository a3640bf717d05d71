use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cryptogap::analysis;
use cryptogap::config::Config;
use cryptogap::exchanges::{binance::BinanceClient, kraken::KrakenClient, PriceSource};
use cryptogap::llm::Summarizer;
use cryptogap::models::{MarketPair, QuoteMarket};
use cryptogap::monitor::ArbitrageMonitor;

/// Cross-exchange price gap monitor for Binance and Kraken
#[derive(Parser, Debug)]
#[command(name = "cryptogap")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh prices on an interval and rank the spreads (default)
    Monitor,

    /// 24h stats, order book and recent trades for one coin on every exchange
    Analyze {
        /// Coin symbol, e.g. BTC
        symbol: String,

        /// Quote market
        #[arg(short, long, default_value = "USDT")]
        quote: QuoteMarket,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let http = reqwest::Client::builder()
        .timeout(config.fetch_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let sources: Vec<Box<dyn PriceSource>> = vec![
        Box::new(BinanceClient::new(http.clone())),
        Box::new(KrakenClient::new(http.clone())),
    ];

    let summarizer = config.llm.as_ref().map(|llm| Summarizer::new(http.clone(), llm));

    match cli.command.unwrap_or(Command::Monitor) {
        Command::Monitor => {
            if summarizer.is_none() {
                log::info!("GROQ_API_KEY not set, running without summaries");
            }
            let mut monitor = ArbitrageMonitor::new(config, sources, summarizer);
            monitor.run().await
        }
        Command::Analyze { symbol, quote } => {
            let pair = MarketPair::new(symbol, quote);
            analysis::analyze(&sources, &pair, summarizer.as_ref()).await?;
            Ok(())
        }
    }
}
