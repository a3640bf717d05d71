use async_trait::async_trait;
use serde::Deserialize;

use super::{
    book_levels, parse_price, require_decimal, FetchError, PriceSource, TickerBook, BOOK_DEPTH,
    RECENT_TRADES,
};
use crate::models::{CoinDetail, CoinStats, MarketPair, TradePrint, TradeSide};

const BINANCE_API: &str = "https://api.binance.com";

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// `/api/v3/ticker/24hr` for a single symbol.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayStats {
    last_price: String,
    open_price: String,
    high_price: String,
    low_price: String,
    volume: String,
    quote_volume: String,
    price_change_percent: String,
}

#[derive(Debug, Deserialize)]
struct Depth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentTrade {
    price: String,
    qty: String,
    is_buyer_maker: bool,
}

pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, BINANCE_API)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get(&self, path: &str) -> Result<String, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                exchange: "Binance",
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(body)
    }
}

/// Decode `/api/v3/ticker/price`: `[{"symbol":"BTCUSDT","price":"60000.00"}, ...]`.
fn parse_tickers(body: &str) -> Result<TickerBook, FetchError> {
    let tickers: Vec<TickerPrice> = serde_json::from_str(body)?;

    Ok(tickers
        .into_iter()
        .filter_map(|t| Some((t.symbol, parse_price(&t.price)?)))
        .collect())
}

fn parse_stats(pair: &MarketPair, body: &str) -> Result<CoinStats, FetchError> {
    let raw: DayStats = serde_json::from_str(body)?;
    let field = |name: &str, value: &str| require_decimal("Binance", name, Some(value));

    Ok(CoinStats {
        exchange: "Binance".to_string(),
        symbol: pair.symbol.clone(),
        quote: pair.quote,
        last_price: field("lastPrice", raw.last_price.as_str())?,
        open_price: field("openPrice", raw.open_price.as_str())?,
        high_price: field("highPrice", raw.high_price.as_str())?,
        low_price: field("lowPrice", raw.low_price.as_str())?,
        volume: field("volume", raw.volume.as_str())?,
        quote_volume: field("quoteVolume", raw.quote_volume.as_str())?,
        change_pct: field("priceChangePercent", raw.price_change_percent.as_str())?,
    })
}

/// Combine the 24hr, depth and trades bodies for one symbol.
fn parse_detail(
    pair: &MarketPair,
    stats: &str,
    depth: &str,
    trades: &str,
) -> Result<CoinDetail, FetchError> {
    let stats = parse_stats(pair, stats)?;
    let depth: Depth = serde_json::from_str(depth)?;
    let trades: Vec<RecentTrade> = serde_json::from_str(trades)?;

    // Binance lists trades oldest first
    let recent_trades = trades
        .iter()
        .rev()
        .filter_map(|t| {
            Some(TradePrint {
                price: parse_price(&t.price)?,
                quantity: parse_price(&t.qty)?,
                side: if t.is_buyer_maker {
                    TradeSide::Sell
                } else {
                    TradeSide::Buy
                },
            })
        })
        .take(RECENT_TRADES)
        .collect();

    Ok(CoinDetail {
        stats,
        bids: book_levels(depth.bids.iter().map(|(p, q)| (p.as_str(), q.as_str()))),
        asks: book_levels(depth.asks.iter().map(|(p, q)| (p.as_str(), q.as_str()))),
        recent_trades,
    })
}

#[async_trait]
impl PriceSource for BinanceClient {
    fn name(&self) -> &str {
        "Binance"
    }

    fn pair_code(&self, base: &str, quote: &str) -> String {
        format!("{}{}", base, quote)
    }

    async fn fetch_tickers(&self) -> Result<TickerBook, FetchError> {
        let body = self.get("/api/v3/ticker/price").await?;
        parse_tickers(&body)
    }

    async fn fetch_coin_detail(&self, pair: &MarketPair) -> Result<CoinDetail, FetchError> {
        let code = self.pair_code(&pair.symbol, pair.quote.code());
        let stats_path = format!("/api/v3/ticker/24hr?symbol={}", code);
        let depth_path = format!("/api/v3/depth?symbol={}&limit={}", code, BOOK_DEPTH);
        let trades_path = format!("/api/v3/trades?symbol={}&limit={}", code, RECENT_TRADES);
        let (stats, depth, trades) = futures::try_join!(
            self.get(&stats_path),
            self.get(&depth_path),
            self.get(&trades_path),
        )?;

        parse_detail(pair, &stats, &depth, &trades)
    }
}
