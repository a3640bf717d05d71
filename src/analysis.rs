//! On-demand market detail for a single coin across every exchange.

use anyhow::{bail, Result};
use futures::future::join_all;

use crate::exchanges::PriceSource;
use crate::llm::Summarizer;
use crate::models::{CoinDetail, MarketPair};

/// Fetch the detail of `pair` from every source concurrently. Sources that
/// fail or do not list the pair are logged and left out.
pub async fn collect_details(
    sources: &[Box<dyn PriceSource>],
    pair: &MarketPair,
) -> Vec<CoinDetail> {
    let results = join_all(sources.iter().map(|source| source.fetch_coin_detail(pair))).await;

    sources
        .iter()
        .zip(results)
        .filter_map(|(source, result)| match result {
            Ok(detail) => Some(detail),
            Err(e) => {
                log::warn!("{}: no detail for {}: {}", source.name(), pair, e);
                None
            }
        })
        .collect()
}

/// Log the detail of each exchange, then the LLM read when a summarizer is set.
pub async fn analyze(
    sources: &[Box<dyn PriceSource>],
    pair: &MarketPair,
    summarizer: Option<&Summarizer>,
) -> Result<Vec<CoinDetail>> {
    let details = collect_details(sources, pair).await;
    if details.is_empty() {
        bail!("no exchange returned data for {}", pair);
    }

    for detail in &details {
        for line in format_detail(detail) {
            log::info!("{}", line);
        }
    }

    match summarizer {
        Some(summarizer) => match summarizer.analyze_coin(&pair.symbol, &details).await {
            Ok(text) => log::info!("Detailed analysis for {}:\n{}", pair, text),
            Err(e) => log::error!("Error generating analysis for {}: {}", pair, e),
        },
        None => log::info!("GROQ_API_KEY not set, skipping the written analysis"),
    }

    Ok(details)
}

fn format_detail(detail: &CoinDetail) -> Vec<String> {
    let stats = &detail.stats;
    let mut lines = vec![
        format!(
            "{} {}/{}: last {} ({}% 24h) high {} low {}",
            stats.exchange,
            stats.symbol,
            stats.quote,
            stats.last_price,
            stats.change_pct,
            stats.high_price,
            stats.low_price
        ),
        format!(
            "  volume {} {} / {} {}",
            stats.volume.round_dp(4),
            stats.symbol,
            stats.quote_volume.round_dp(2),
            stats.quote
        ),
    ];

    if let (Some(bid), Some(ask)) = (detail.bids.first(), detail.asks.first()) {
        lines.push(format!(
            "  best bid {} x {} | best ask {} x {}",
            bid.price, bid.quantity, ask.price, ask.quantity
        ));
    }
    if let Some(trade) = detail.recent_trades.first() {
        lines.push(format!(
            "  last trade {} {} at {}",
            trade.side, trade.quantity, trade.price
        ));
    }

    lines
}
