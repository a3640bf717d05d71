use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::arbitrage::{SpreadFilter, TradeCosts};
use crate::models::QuoteMarket;

const DEFAULT_SYMBOLS: &str = "BTC,ETH,SOL,BNB,XRP,ADA,DOGE,DOT,LINK,LTC";
const DEFAULT_LLM_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Clone)]
pub struct Config {
    pub tracked_symbols: Vec<String>,
    pub quote_markets: Vec<QuoteMarket>,
    pub spread_filter: SpreadFilter,
    pub low_price_ceiling: Decimal,
    pub trade_costs: TradeCosts,
    pub trade_amount: Decimal,
    pub refresh_secs: u64,
    pub fetch_timeout_secs: u64,
    pub top_n: usize,
    pub unhealthy_after_failures: u32,
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Missing keys fall back to
    /// their defaults; present but malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let tracked_symbols: Vec<String> = var("TRACKED_SYMBOLS", DEFAULT_SYMBOLS)
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let quote_markets = var("QUOTE_MARKETS", "USDT,BTC")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<QuoteMarket>>>()
            .context("Invalid QUOTE_MARKETS")?;

        let spread_filter = SpreadFilter {
            min_spread_pct: var("MIN_SPREAD_PCT", "0")
                .parse()
                .context("Invalid MIN_SPREAD_PCT")?,
            max_spread_pct: var("MAX_SPREAD_PCT", "20") // beyond this it's bad data
                .parse()
                .context("Invalid MAX_SPREAD_PCT")?,
            min_price: var("MIN_VALID_PRICE", "0.00000001")
                .parse()
                .context("Invalid MIN_VALID_PRICE")?,
        };

        let mut taker_fee_pct = HashMap::new();
        taker_fee_pct.insert(
            "Binance".to_string(),
            var("BINANCE_TAKER_FEE_PCT", "0.1")
                .parse()
                .context("Invalid BINANCE_TAKER_FEE_PCT")?,
        );
        taker_fee_pct.insert(
            "Kraken".to_string(),
            var("KRAKEN_TAKER_FEE_PCT", "0.26")
                .parse()
                .context("Invalid KRAKEN_TAKER_FEE_PCT")?,
        );

        let trade_costs = TradeCosts {
            taker_fee_pct,
            default_taker_fee_pct: var("DEFAULT_TAKER_FEE_PCT", "0.2")
                .parse()
                .context("Invalid DEFAULT_TAKER_FEE_PCT")?,
            slippage_pct: var("SLIPPAGE_PCT", "0.2")
                .parse()
                .context("Invalid SLIPPAGE_PCT")?,
        };

        let llm = lookup("GROQ_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| LlmConfig {
                api_key,
                api_url: var("LLM_API_URL", DEFAULT_LLM_URL),
                model: var("LLM_MODEL", DEFAULT_LLM_MODEL),
            });

        Ok(Config {
            tracked_symbols,
            quote_markets,
            spread_filter,
            low_price_ceiling: var("LOW_PRICE_CEILING", "1") // 1 USDT
                .parse()
                .context("Invalid LOW_PRICE_CEILING")?,
            trade_costs,
            trade_amount: var("TRADE_AMOUNT", "1000") // 1000 of the quote currency
                .parse()
                .context("Invalid TRADE_AMOUNT")?,
            refresh_secs: var("REFRESH_SECS", "60")
                .parse()
                .context("Invalid REFRESH_SECS")?,
            fetch_timeout_secs: var("FETCH_TIMEOUT_SECS", "10")
                .parse()
                .context("Invalid FETCH_TIMEOUT_SECS")?,
            top_n: var("TOP_N", "10").parse().context("Invalid TOP_N")?,
            unhealthy_after_failures: var("UNHEALTHY_AFTER_FAILURES", "3")
                .parse()
                .context("Invalid UNHEALTHY_AFTER_FAILURES")?,
            llm,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.tracked_symbols.len(), 10);
        assert_eq!(config.quote_markets, vec![QuoteMarket::Usdt, QuoteMarket::Btc]);
        assert_eq!(config.spread_filter.min_spread_pct, dec!(0));
        assert_eq!(config.spread_filter.max_spread_pct, dec!(20));
        assert_eq!(config.trade_costs.fee_for("Binance"), dec!(0.1));
        assert_eq!(config.trade_costs.fee_for("Kraken"), dec!(0.26));
        assert_eq!(config.trade_costs.fee_for("Bybit"), dec!(0.2));
        assert_eq!(config.low_price_ceiling, dec!(1));
        assert_eq!(config.refresh_secs, 60);
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("TRACKED_SYMBOLS", "btc, eth ,,sol"),
            ("QUOTE_MARKETS", "USDT,BNB"),
            ("MIN_SPREAD_PCT", "0.25"),
            ("GROQ_API_KEY", "secret"),
            ("LLM_MODEL", "mixtral"),
        ]))
        .unwrap();

        assert_eq!(config.tracked_symbols, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(config.quote_markets, vec![QuoteMarket::Usdt, QuoteMarket::Bnb]);
        assert_eq!(config.spread_filter.min_spread_pct, dec!(0.25));

        let llm = config.llm.unwrap();
        assert_eq!(llm.api_key, "secret");
        assert_eq!(llm.model, "mixtral");
        assert_eq!(llm.api_url, DEFAULT_LLM_URL);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("QUOTE_MARKETS", "USDT,EUR")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("TRADE_AMOUNT", "lots")])).is_err());
    }

    #[test]
    fn test_blank_api_key_disables_llm() {
        let config = Config::from_lookup(lookup_from(&[("GROQ_API_KEY", "  ")])).unwrap();
        assert!(config.llm.is_none());
    }
}
