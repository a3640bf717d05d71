use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{BookLevel, CoinDetail, MarketPair, PriceFragment};

pub mod binance;
pub mod kraken;

/// Order book levels kept per side in a coin detail.
pub const BOOK_DEPTH: usize = 5;
/// Trades kept in a coin detail.
pub const RECENT_TRADES: usize = 10;

/// Last traded price per exchange-native pair code.
pub type TickerBook = HashMap<String, Decimal>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{exchange} responded with status {status}: {body}")]
    Status {
        exchange: &'static str,
        status: u16,
        body: String,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{exchange} API error: {message}")]
    Api {
        exchange: &'static str,
        message: String,
    },
}

/// One exchange's answer for a refresh cycle. `ok` is false when the exchange
/// could not be reached at all, in which case the fragment is empty.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub fragment: PriceFragment,
    pub ok: bool,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Exchange-native code for `base` quoted in `quote`.
    fn pair_code(&self, base: &str, quote: &str) -> String;

    /// Download every ticker the exchange lists.
    async fn fetch_tickers(&self) -> Result<TickerBook, FetchError>;

    /// 24h stats, order book top and recent trades for a single pair.
    async fn fetch_coin_detail(&self, pair: &MarketPair) -> Result<CoinDetail, FetchError>;

    async fn fetch_prices(&self, pairs: &[MarketPair]) -> FetchOutcome {
        match self.fetch_tickers().await {
            Ok(book) => {
                let fragment = resolve_pairs(self.name(), &book, pairs, |base, quote| {
                    self.pair_code(base, quote)
                });
                log::debug!(
                    "{}: resolved {} of {} pairs from {} tickers",
                    self.name(),
                    fragment.len(),
                    pairs.len(),
                    book.len()
                );
                FetchOutcome { fragment, ok: true }
            }
            Err(e) => {
                log::warn!("{}: price fetch failed: {}", self.name(), e);
                FetchOutcome {
                    fragment: PriceFragment::new(self.name()),
                    ok: false,
                }
            }
        }
    }
}

/// Look each pair up directly, falling back to the inverted reverse pair.
/// Pairs found neither way are left out of the fragment.
pub fn resolve_pairs<F>(
    exchange: &str,
    book: &TickerBook,
    pairs: &[MarketPair],
    code: F,
) -> PriceFragment
where
    F: Fn(&str, &str) -> String,
{
    let now = Utc::now();
    let mut fragment = PriceFragment::new(exchange);

    for pair in pairs {
        let quote = pair.quote.code();
        let direct = book.get(&code(&pair.symbol, quote)).copied();
        let price = direct.or_else(|| {
            book.get(&code(quote, &pair.symbol))
                .and_then(|reverse| Decimal::ONE.checked_div(*reverse))
        });

        match price {
            Some(price) => fragment.insert(pair.clone(), price, now),
            None => log::debug!("{}: {} not listed", exchange, pair),
        }
    }

    fragment
}

/// Parse a decimal price string, ignoring entries the exchange left blank.
pub(crate) fn parse_price(raw: &str) -> Option<Decimal> {
    raw.trim().parse::<Decimal>().ok()
}

/// Like `parse_price`, for fields a detail response cannot do without.
pub(crate) fn require_decimal(
    exchange: &'static str,
    field: &str,
    raw: Option<&str>,
) -> Result<Decimal, FetchError> {
    raw.and_then(parse_price).ok_or_else(|| FetchError::Api {
        exchange,
        message: format!("missing or malformed {}", field),
    })
}

/// Parse `[price, quantity]` pairs, best first, dropping malformed levels.
pub(crate) fn book_levels<'a, I>(levels: I) -> Vec<BookLevel>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    levels
        .into_iter()
        .filter_map(|(price, quantity)| {
            Some(BookLevel {
                price: parse_price(price)?,
                quantity: parse_price(quantity)?,
            })
        })
        .take(BOOK_DEPTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuoteMarket;
    use rust_decimal_macros::dec;

    fn concat(base: &str, quote: &str) -> String {
        format!("{}{}", base, quote)
    }

    #[test]
    fn test_direct_pair_resolution() {
        let mut book = TickerBook::new();
        book.insert("BTCUSDT".to_string(), dec!(60000));

        let fragment = resolve_pairs(
            "Binance",
            &book,
            &[MarketPair::new("BTC", QuoteMarket::Usdt)],
            concat,
        );

        assert_eq!(
            fragment.price(&MarketPair::new("BTC", QuoteMarket::Usdt)),
            Some(dec!(60000))
        );
        assert_eq!(fragment.exchange, "Binance");
    }

    #[test]
    fn test_reverse_pair_is_inverted() {
        let mut book = TickerBook::new();
        book.insert("BTCBNB".to_string(), dec!(100));

        let fragment = resolve_pairs(
            "Binance",
            &book,
            &[MarketPair::new("BNB", QuoteMarket::Btc)],
            concat,
        );

        assert_eq!(
            fragment.price(&MarketPair::new("BNB", QuoteMarket::Btc)),
            Some(dec!(0.01))
        );
    }

    #[test]
    fn test_missing_and_zero_reverse_pairs_are_omitted() {
        let mut book = TickerBook::new();
        book.insert("BTCDOT".to_string(), dec!(0));

        let fragment = resolve_pairs(
            "Binance",
            &book,
            &[
                MarketPair::new("DOT", QuoteMarket::Btc),
                MarketPair::new("LTC", QuoteMarket::Usdt),
            ],
            concat,
        );

        assert!(fragment.is_empty());
    }

    #[test]
    fn test_require_decimal_names_the_field() {
        assert_eq!(
            require_decimal("Kraken", "open", Some("101.5")).unwrap(),
            dec!(101.5)
        );

        let err = require_decimal("Kraken", "open", None).unwrap_err();
        assert_eq!(err.to_string(), "Kraken API error: missing or malformed open");
        assert!(require_decimal("Kraken", "high", Some("")).is_err());
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("60000.01000000"), Some(dec!(60000.01)));
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("n/a"), None);
    }
}
