use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use super::{
    book_levels, parse_price, require_decimal, FetchError, PriceSource, TickerBook, BOOK_DEPTH,
    RECENT_TRADES,
};
use crate::arbitrage::spread_pct;
use crate::models::{CoinDetail, CoinStats, MarketPair, TradePrint, TradeSide};

const KRAKEN_API: &str = "https://api.kraken.com";

/// Every Kraken public endpoint wraps its payload the same way.
#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AssetPair {
    wsname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    /// Last trade closed: [price, lot volume]
    c: Vec<String>,
    /// Volume: [today, last 24 hours]
    #[serde(default)]
    v: Vec<String>,
    /// Volume weighted average price: [today, last 24 hours]
    #[serde(default)]
    p: Vec<String>,
    #[serde(default)]
    h: Vec<String>,
    #[serde(default)]
    l: Vec<String>,
    /// Today's opening price
    #[serde(default)]
    o: Option<String>,
}

/// Book levels are `[price, volume, timestamp]`.
#[derive(Debug, Deserialize)]
struct OrderBook {
    asks: Vec<(String, String, serde_json::Value)>,
    bids: Vec<(String, String, serde_json::Value)>,
}

pub struct KrakenClient {
    base_url: String,
    client: reqwest::Client,
}

impl KrakenClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, KRAKEN_API)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get_public<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, FetchError> {
        let body = self.get_raw(endpoint).await?;
        unwrap_result(&body)
    }

    async fn get_raw(&self, endpoint: &str) -> Result<String, FetchError> {
        let url = format!("{}/0/public/{}", self.base_url, endpoint);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                exchange: "Kraken",
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(body)
    }
}

fn unwrap_result<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    let parsed: KrakenResponse<T> = serde_json::from_str(body)?;
    if !parsed.error.is_empty() {
        return Err(FetchError::Api {
            exchange: "Kraken",
            message: parsed.error.join(", "),
        });
    }
    parsed.result.ok_or_else(|| FetchError::Api {
        exchange: "Kraken",
        message: "empty result".to_string(),
    })
}

/// Kraken keeps a few legacy asset codes.
fn normalize_asset(asset: &str) -> &str {
    match asset {
        "XBT" => "BTC",
        "XDG" => "DOGE",
        other => other,
    }
}

fn kraken_asset(asset: &str) -> &str {
    match asset {
        "BTC" => "XBT",
        "DOGE" => "XDG",
        other => other,
    }
}

/// Altname Kraken accepts in `?pair=`, e.g. `XBTUSDT`.
fn request_pair(pair: &MarketPair) -> String {
    format!(
        "{}{}",
        kraken_asset(&pair.symbol),
        kraken_asset(pair.quote.code())
    )
}

/// Single-pair endpoints answer under Kraken's own key (`XXBTZUSD`), so
/// take whichever entry came back.
fn single_entry<T>(result: HashMap<String, T>) -> Result<T, FetchError> {
    result
        .into_values()
        .next()
        .ok_or_else(|| FetchError::Api {
            exchange: "Kraken",
            message: "pair not listed".to_string(),
        })
}

fn parse_stats(pair: &MarketPair, body: &str) -> Result<CoinStats, FetchError> {
    let ticker = single_entry(unwrap_result::<HashMap<String, Ticker>>(body)?)?;
    let field = |name: &str, values: &[String], idx: usize| {
        require_decimal("Kraken", name, values.get(idx).map(String::as_str))
    };

    let last_price = field("c", ticker.c.as_slice(), 0)?;
    let open_price = require_decimal("Kraken", "o", ticker.o.as_deref())?;
    let volume = field("v", ticker.v.as_slice(), 1)?;
    let vwap = field("p", ticker.p.as_slice(), 1)?;

    Ok(CoinStats {
        exchange: "Kraken".to_string(),
        symbol: pair.symbol.clone(),
        quote: pair.quote,
        last_price,
        open_price,
        high_price: field("h", ticker.h.as_slice(), 1)?,
        low_price: field("l", ticker.l.as_slice(), 1)?,
        volume,
        quote_volume: vwap * volume,
        change_pct: spread_pct(open_price, last_price)
            .map(|pct| pct.round_dp(3))
            .unwrap_or(Decimal::ZERO),
    })
}

fn parse_book(body: &str) -> Result<OrderBook, FetchError> {
    single_entry(unwrap_result::<HashMap<String, OrderBook>>(body)?)
}

/// Trades come back as `{"<pair>": [[price, volume, time, "b"|"s", ...], ...], "last": "..."}`,
/// oldest first.
fn parse_trades(body: &str) -> Result<Vec<TradePrint>, FetchError> {
    let result = unwrap_result::<HashMap<String, serde_json::Value>>(body)?;
    let rows = result
        .into_iter()
        .filter(|(key, _)| key != "last")
        .find_map(|(_, value)| match value {
            serde_json::Value::Array(rows) => Some(rows),
            _ => None,
        })
        .unwrap_or_default();

    Ok(rows
        .iter()
        .rev()
        .filter_map(|row| {
            let price = parse_price(row.get(0)?.as_str()?)?;
            let quantity = parse_price(row.get(1)?.as_str()?)?;
            let side = match row.get(3)?.as_str()? {
                "b" => TradeSide::Buy,
                "s" => TradeSide::Sell,
                _ => return None,
            };
            Some(TradePrint {
                price,
                quantity,
                side,
            })
        })
        .take(RECENT_TRADES)
        .collect())
}

fn parse_detail(
    pair: &MarketPair,
    stats: &str,
    book: &str,
    trades: &str,
) -> Result<CoinDetail, FetchError> {
    let stats = parse_stats(pair, stats)?;
    let book = parse_book(book)?;

    Ok(CoinDetail {
        stats,
        bids: book_levels(book.bids.iter().map(|(p, q, _)| (p.as_str(), q.as_str()))),
        asks: book_levels(book.asks.iter().map(|(p, q, _)| (p.as_str(), q.as_str()))),
        recent_trades: parse_trades(trades)?,
    })
}

/// Map Kraken's internal pair keys (`XXBTZUSD`) to `BASE/QUOTE` codes with
/// normalised assets, keeping the last trade price of each.
fn build_book(
    pairs: HashMap<String, AssetPair>,
    tickers: HashMap<String, Ticker>,
) -> TickerBook {
    let mut book = TickerBook::new();

    for (key, pair) in pairs {
        let Some((base, quote)) = pair.wsname.as_deref().and_then(|ws| ws.split_once('/')) else {
            continue;
        };
        let Some(price) = tickers
            .get(&key)
            .and_then(|t| t.c.first())
            .and_then(|raw| parse_price(raw))
        else {
            continue;
        };

        book.insert(
            format!("{}/{}", normalize_asset(base), normalize_asset(quote)),
            price,
        );
    }

    book
}

#[async_trait]
impl PriceSource for KrakenClient {
    fn name(&self) -> &str {
        "Kraken"
    }

    fn pair_code(&self, base: &str, quote: &str) -> String {
        format!("{}/{}", base, quote)
    }

    async fn fetch_tickers(&self) -> Result<TickerBook, FetchError> {
        let (pairs, tickers) = futures::try_join!(
            self.get_public::<HashMap<String, AssetPair>>("AssetPairs"),
            self.get_public::<HashMap<String, Ticker>>("Ticker"),
        )?;

        Ok(build_book(pairs, tickers))
    }

    async fn fetch_coin_detail(&self, pair: &MarketPair) -> Result<CoinDetail, FetchError> {
        let code = request_pair(pair);
        let stats_path = format!("Ticker?pair={}", code);
        let book_path = format!("Depth?pair={}&count={}", code, BOOK_DEPTH);
        let trades_path = format!("Trades?pair={}&count={}", code, RECENT_TRADES);
        let (stats, book, trades) = futures::try_join!(
            self.get_raw(&stats_path),
            self.get_raw(&book_path),
            self.get_raw(&trades_path),
        )?;

        parse_detail(pair, &stats, &book, &trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::resolve_pairs;
    use crate::models::QuoteMarket;
    use rust_decimal_macros::dec;

    const ASSET_PAIRS: &str = r#"{
        "error": [],
        "result": {
            "XXBTZUSD": {"altname": "XBTUSD", "wsname": "XBT/USD", "base": "XXBT", "quote": "ZUSD"},
            "XBTUSDT": {"altname": "XBTUSDT", "wsname": "XBT/USDT", "base": "XXBT", "quote": "USDT"},
            "XETHXXBT": {"altname": "ETHXBT", "wsname": "ETH/XBT", "base": "XETH", "quote": "XXBT"},
            "XDGUSDT": {"altname": "XDGUSDT", "wsname": "XDG/USDT", "base": "XXDG", "quote": "USDT"},
            "LEGACY": {"altname": "LEGACY"}
        }
    }"#;

    const TICKERS: &str = r#"{
        "error": [],
        "result": {
            "XXBTZUSD": {"a": ["60250.0", "1", "1.000"], "c": ["60250.10000", "0.0015"]},
            "XBTUSDT": {"a": ["60300.0", "1", "1.000"], "c": ["60300.00000", "0.0100"]},
            "XETHXXBT": {"c": ["0.05120", "1.2"]},
            "XDGUSDT": {"c": ["0.1512000", "100"]},
            "LEGACY": {"c": ["1.0", "1"]}
        }
    }"#;

    const PAIR_TICKER: &str = r#"{
        "error": [],
        "result": {
            "XBTUSDT": {
                "a": ["60310.0", "1", "1.000"],
                "b": ["60290.0", "2", "2.000"],
                "c": ["60300.00000", "0.0100"],
                "v": ["120.5", "250"],
                "p": ["60100.0", "60000"],
                "t": [1500, 3200],
                "l": ["59800.0", "59000"],
                "h": ["60400.0", "60500"],
                "o": "60000.00000"
            }
        }
    }"#;

    const DEPTH: &str = r#"{
        "error": [],
        "result": {
            "XBTUSDT": {
                "asks": [["60310.00000", "1.200", 1700000000]],
                "bids": [["60290.00000", "0.800", 1700000000], ["60280.00000", "2.000", 1700000001]]
            }
        }
    }"#;

    const TRADES: &str = r#"{
        "error": [],
        "result": {
            "XBTUSDT": [
                ["60250.00000", "0.05000000", 1700000000.1, "s", "m", "", 1],
                ["60300.00000", "0.01000000", 1700000001.2, "b", "l", "", 2]
            ],
            "last": "1700000001200000000"
        }
    }"#;

    fn fixture_book() -> TickerBook {
        let pairs: HashMap<String, AssetPair> = unwrap_result(ASSET_PAIRS).unwrap();
        let tickers: HashMap<String, Ticker> = unwrap_result(TICKERS).unwrap();
        build_book(pairs, tickers)
    }

    #[test]
    fn test_book_uses_normalized_wsnames() {
        let book = fixture_book();

        assert_eq!(book.len(), 4);
        assert_eq!(book.get("BTC/USDT"), Some(&dec!(60300)));
        assert_eq!(book.get("ETH/BTC"), Some(&dec!(0.0512)));
        assert_eq!(book.get("DOGE/USDT"), Some(&dec!(0.1512)));
        assert!(!book.contains_key("XBT/USDT"));
    }

    #[test]
    fn test_request_pair_uses_kraken_assets() {
        assert_eq!(request_pair(&MarketPair::new("BTC", QuoteMarket::Usdt)), "XBTUSDT");
        assert_eq!(request_pair(&MarketPair::new("ETH", QuoteMarket::Btc)), "ETHXBT");
        assert_eq!(request_pair(&MarketPair::new("DOGE", QuoteMarket::Usdt)), "XDGUSDT");
    }

    #[test]
    fn test_parse_coin_detail() {
        let pair = MarketPair::new("BTC", QuoteMarket::Usdt);

        let detail = parse_detail(&pair, PAIR_TICKER, DEPTH, TRADES).unwrap();

        let stats = &detail.stats;
        assert_eq!(stats.exchange, "Kraken");
        assert_eq!(stats.last_price, dec!(60300));
        assert_eq!(stats.open_price, dec!(60000));
        assert_eq!(stats.high_price, dec!(60500));
        assert_eq!(stats.low_price, dec!(59000));
        assert_eq!(stats.volume, dec!(250));
        assert_eq!(stats.quote_volume, dec!(15000000));
        assert_eq!(stats.change_pct, dec!(0.5));

        assert_eq!(detail.bids.len(), 2);
        assert_eq!(detail.asks[0].price, dec!(60310));

        assert_eq!(detail.recent_trades.len(), 2);
        assert_eq!(detail.recent_trades[0].side, TradeSide::Buy);
        assert_eq!(detail.recent_trades[1].price, dec!(60250));
    }

    #[test]
    fn test_unknown_pair_is_api_error() {
        let body = r#"{"error": ["EQuery:Unknown asset pair"]}"#;
        let pair = MarketPair::new("FOO", QuoteMarket::Usdt);

        let err = parse_detail(&pair, body, DEPTH, TRADES).unwrap_err();
        assert!(err.to_string().contains("Unknown asset pair"));

        let empty = r#"{"error": [], "result": {}}"#;
        assert!(parse_detail(&pair, empty, DEPTH, TRADES).is_err());
    }

    #[test]
    fn test_error_payload_is_api_error() {
        let body = r#"{"error": ["EAPI:Rate limit exceeded"]}"#;
        let err = unwrap_result::<HashMap<String, Ticker>>(body).unwrap_err();

        match err {
            FetchError::Api { exchange, message } => {
                assert_eq!(exchange, "Kraken");
                assert_eq!(message, "EAPI:Rate limit exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pairs_resolve_against_kraken_codes() {
        let client = KrakenClient::new(reqwest::Client::new());
        let book = fixture_book();

        let pairs = vec![
            MarketPair::new("BTC", QuoteMarket::Usdt),
            MarketPair::new("DOGE", QuoteMarket::Usdt),
            MarketPair::new("ETH", QuoteMarket::Btc),
            MarketPair::new("BNB", QuoteMarket::Usdt),
        ];
        let fragment = resolve_pairs(client.name(), &book, &pairs, |b, q| client.pair_code(b, q));

        assert_eq!(fragment.len(), 3);
        assert_eq!(fragment.exchange, "Kraken");
        assert!(fragment.price(&pairs[3]).is_none());
    }
}
