use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Denominating currency of a trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteMarket {
    Usdt,
    Btc,
    Bnb,
}

impl QuoteMarket {
    pub fn code(&self) -> &'static str {
        match self {
            QuoteMarket::Usdt => "USDT",
            QuoteMarket::Btc => "BTC",
            QuoteMarket::Bnb => "BNB",
        }
    }
}

impl fmt::Display for QuoteMarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for QuoteMarket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USDT" => Ok(QuoteMarket::Usdt),
            "BTC" => Ok(QuoteMarket::Btc),
            "BNB" => Ok(QuoteMarket::Bnb),
            other => Err(anyhow!("unsupported quote market: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketPair {
    pub symbol: String,
    pub quote: QuoteMarket,
}

impl MarketPair {
    pub fn new(symbol: impl Into<String>, quote: QuoteMarket) -> Self {
        Self {
            symbol: symbol.into().to_ascii_uppercase(),
            quote,
        }
    }

    /// Every symbol/market combination worth querying. A coin is never quoted
    /// against itself (BTC/BTC).
    pub fn cross(symbols: &[String], markets: &[QuoteMarket]) -> Vec<MarketPair> {
        symbols
            .iter()
            .flat_map(|symbol| {
                markets
                    .iter()
                    .map(move |quote| MarketPair::new(symbol.as_str(), *quote))
            })
            .filter(|pair| pair.symbol != pair.quote.code())
            .collect()
    }
}

impl fmt::Display for MarketPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.quote)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub quote: QuoteMarket,
    pub exchange: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Prices reported by a single exchange during one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct PriceFragment {
    pub exchange: String,
    pub points: HashMap<MarketPair, PricePoint>,
}

impl PriceFragment {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            points: HashMap::new(),
        }
    }

    pub fn insert(&mut self, pair: MarketPair, price: Decimal, timestamp: DateTime<Utc>) {
        let point = PricePoint {
            symbol: pair.symbol.clone(),
            quote: pair.quote,
            exchange: self.exchange.clone(),
            price,
            timestamp,
        };
        self.points.insert(pair, point);
    }

    pub fn price(&self, pair: &MarketPair) -> Option<Decimal> {
        self.points.get(pair).map(|p| p.price)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// All fragments of one cycle keyed by (symbol, quote market, exchange).
///
/// Exchanges keep the order in which their fragments were supplied so the
/// calculator walks them deterministically.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    rows: BTreeMap<MarketPair, Vec<PricePoint>>,
}

impl PriceTable {
    pub fn from_fragments(fragments: &[PriceFragment]) -> Self {
        let mut rows: BTreeMap<MarketPair, Vec<PricePoint>> = BTreeMap::new();
        for fragment in fragments {
            for (pair, point) in &fragment.points {
                let quotes = rows.entry(pair.clone()).or_default();
                if quotes.iter().all(|q| q.exchange != point.exchange) {
                    quotes.push(point.clone());
                }
            }
        }
        Self { rows }
    }

    pub fn get(&self, pair: &MarketPair, exchange: &str) -> Option<&PricePoint> {
        self.rows
            .get(pair)?
            .iter()
            .find(|p| p.exchange == exchange)
    }

    /// Pairs quoted by at least two exchanges, with their quotes.
    pub fn shared_pairs(&self) -> impl Iterator<Item = (&MarketPair, &[PricePoint])> {
        self.rows
            .iter()
            .filter(|(_, quotes)| quotes.len() >= 2)
            .map(|(pair, quotes)| (pair, quotes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub quote: QuoteMarket,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub spread_pct: Decimal,
    pub computed_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn pair(&self) -> MarketPair {
        MarketPair::new(self.symbol.as_str(), self.quote)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSimulation {
    pub size: Decimal,
    pub coin_amount: Decimal,
    pub gross_profit: Decimal,
    pub fee_cost: Decimal,
    pub slippage_cost: Decimal,
    pub net_profit: Decimal,
    pub net_profit_pct: Decimal,
    pub profitable: bool,
}

/// A cheap coin whose USDT price differs between exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowPriceGainer {
    pub symbol: String,
    pub prices: Vec<(String, Decimal)>,
    pub spread_pct: Decimal,
    pub avg_price: Decimal,
}

/// Rolling 24-hour statistics for one pair on one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinStats {
    pub exchange: String,
    pub symbol: String,
    pub quote: QuoteMarket,
    pub last_price: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    /// Base asset volume
    pub volume: Decimal,
    /// Quote asset volume
    pub quote_volume: Decimal,
    pub change_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => f.write_str("Buy"),
            TradeSide::Sell => f.write_str("Sell"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub price: Decimal,
    pub quantity: Decimal,
    /// Aggressor side
    pub side: TradeSide,
}

/// Market detail for one pair on one exchange: 24h stats, top of the order
/// book (best level first) and the latest trades (newest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinDetail {
    pub stats: CoinStats,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub recent_trades: Vec<TradePrint>,
}

/// Live quotes for one pair shared by several exchanges, in exchange order.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePriceRow {
    pub pair: MarketPair,
    pub prices: Vec<(String, Decimal)>,
    /// Highest quote minus lowest quote
    pub difference: Decimal,
}
