use anyhow::Result;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use crate::arbitrage::{
    compute_opportunities, live_price_rows, low_price_gainers, simulate_with_costs,
    OpportunityScan,
};
use crate::config::Config;
use crate::exchanges::PriceSource;
use crate::health::{ExchangeHealth, HealthStatus};
use crate::llm::Summarizer;
use crate::models::{LivePriceRow, LowPriceGainer, MarketPair, Opportunity, TradeSimulation};
use crate::state::{same_route, LastSeenOpportunity};

/// Everything one refresh cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub scan: OpportunityScan,
    /// Side-by-side quotes for pairs several exchanges reported
    pub live_prices: Vec<LivePriceRow>,
    pub low_price: Vec<LowPriceGainer>,
    pub failed_sources: Vec<String>,
    pub best_simulation: Option<TradeSimulation>,
    /// The best route differs from the previously retained one.
    pub best_changed: bool,
}

pub struct ArbitrageMonitor {
    config: Config,
    sources: Vec<Box<dyn PriceSource>>,
    pairs: Vec<MarketPair>,
    health: ExchangeHealth,
    last_seen: Arc<LastSeenOpportunity>,
    summarizer: Option<Summarizer>,
    last_summarized_gainer: Option<String>,
}

impl ArbitrageMonitor {
    pub fn new(
        config: Config,
        sources: Vec<Box<dyn PriceSource>>,
        summarizer: Option<Summarizer>,
    ) -> Self {
        let pairs = MarketPair::cross(&config.tracked_symbols, &config.quote_markets);
        let max_quiet = chrono::Duration::seconds((config.refresh_secs * 3) as i64);
        let health = ExchangeHealth::new(config.unhealthy_after_failures, max_quiet);

        Self {
            config,
            sources,
            pairs,
            health,
            last_seen: Arc::new(LastSeenOpportunity::new()),
            summarizer,
            last_summarized_gainer: None,
        }
    }

    /// Shared handle to the last seen opportunity for readers outside the loop.
    pub fn last_seen(&self) -> Arc<LastSeenOpportunity> {
        Arc::clone(&self.last_seen)
    }

    /// Refresh on every tick until Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Refresh on every tick until `shutdown` resolves. A cycle in flight is
    /// abandoned as soon as it does.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        log::info!(
            "Starting cryptogap: {} pairs across {} exchanges, refresh every {}s",
            self.pairs.len(),
            self.sources.len(),
            self.config.refresh_secs
        );

        let mut ticker = tokio::time::interval(self.config.refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => break,
            }
            tokio::select! {
                _ = self.cycle() => {}
                _ = &mut shutdown => break,
            }
        }

        log::info!("Shutting down");
        Ok(())
    }

    async fn cycle(&mut self) {
        let report = self.refresh().await;
        self.render(&report);
        self.summarize(&report).await;
    }

    /// Fetch every source, rank the spreads and update the retained best.
    pub async fn refresh(&mut self) -> CycleReport {
        let outcomes = join_all(
            self.sources
                .iter()
                .map(|source| source.fetch_prices(&self.pairs)),
        )
        .await;

        let mut failed_sources = Vec::new();
        let mut fragments = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let exchange = outcome.fragment.exchange.clone();
            if let HealthStatus::Degraded(reason) = self.health.record(&exchange, outcome.ok) {
                log::warn!("Degraded price source: {}", reason);
            }
            if !outcome.ok {
                failed_sources.push(exchange);
            }
            fragments.push(outcome.fragment);
        }

        let filter = &self.config.spread_filter;
        let scan = compute_opportunities(&fragments, filter);
        let live_prices = live_price_rows(&fragments);
        let low_price = low_price_gainers(&fragments, self.config.low_price_ceiling, filter);

        if scan.invalid_spreads > 0 {
            log::debug!("Discarded {} implausible spreads", scan.invalid_spreads);
        }

        let best_simulation = scan.best().map(|best| {
            simulate_with_costs(best, self.config.trade_amount, &self.config.trade_costs)
        });

        let best_changed = match self.last_seen.update(&scan.opportunities) {
            Some(Some(previous)) => scan
                .best()
                .map(|best| !same_route(&previous, best))
                .unwrap_or(false),
            Some(None) => true,
            None => false,
        };

        CycleReport {
            scan,
            live_prices,
            low_price,
            failed_sources,
            best_simulation,
            best_changed,
        }
    }

    fn render(&self, report: &CycleReport) {
        if !report.failed_sources.is_empty() {
            let stats = self.health.get_stats();
            log::warn!(
                "Unreachable this cycle: {} ({} of {} sources degraded, {} failures so far)",
                report.failed_sources.join(", "),
                stats.degraded_sources,
                stats.total_sources,
                stats.total_failures
            );
        }
        for (exchange, last_success) in self.health.stale_sources() {
            match last_success {
                Some(ts) => log::warn!(
                    "{} prices are stale, last success at {}",
                    exchange,
                    ts.format("%H:%M:%S")
                ),
                None => log::warn!("{} has not returned prices yet", exchange),
            }
        }

        if report.scan.is_no_data() {
            log::warn!("No price data: fewer than two exchanges answered");
            return;
        }

        for market in &self.config.quote_markets {
            let rows: Vec<&LivePriceRow> = report
                .live_prices
                .iter()
                .filter(|row| row.pair.quote == *market)
                .collect();
            if rows.is_empty() {
                continue;
            }
            log::info!("Live prices ({} market)", market);
            for row in rows {
                log::info!("{}", format_live_row(row));
            }
        }

        if report.scan.opportunities.is_empty() {
            log::info!(
                "No price differences above {}%",
                self.config.spread_filter.min_spread_pct
            );
        } else {
            log::info!(
                "{:>3}  {:<10} {:<8} {:<8} {:>16} {:>16} {:>9}",
                "#",
                "PAIR",
                "BUY",
                "SELL",
                "BUY PRICE",
                "SELL PRICE",
                "SPREAD"
            );
            for (rank, o) in report
                .scan
                .opportunities
                .iter()
                .take(self.config.top_n)
                .enumerate()
            {
                log::info!("{}", format_row(rank + 1, o));
            }
        }

        if let (Some(best), Some(sim)) = (report.scan.best(), &report.best_simulation) {
            log::info!(
                "Best: buy {} on {} sell on {} | {} {} -> net {} ({}%)",
                best.pair(),
                best.buy_exchange,
                best.sell_exchange,
                sim.size,
                best.quote,
                sim.net_profit.round_dp(4),
                sim.net_profit_pct.round_dp(3)
            );
        }

        for gainer in report.low_price.iter().take(self.config.top_n) {
            log::info!(
                "Low price {:<6} spread {:>7}% avg {} USDT",
                gainer.symbol,
                gainer.spread_pct.round_dp(3).to_string(),
                gainer.avg_price.round_dp(8)
            );
        }
    }

    async fn summarize(&mut self, report: &CycleReport) {
        let Some(summarizer) = &self.summarizer else {
            return;
        };

        if report.best_changed {
            if let (Some(best), Some(sim)) = (report.scan.best(), &report.best_simulation) {
                match summarizer.summarize_opportunity(best, sim).await {
                    Ok(text) => log::info!("Analysis for {}:\n{}", best.pair(), text),
                    Err(e) => log::error!("Error summarizing opportunity: {}", e),
                }
            }
        }

        if let Some(gainer) = report.low_price.first() {
            if self.last_summarized_gainer.as_deref() == Some(gainer.symbol.as_str()) {
                return;
            }
            match summarizer.summarize_low_price(gainer).await {
                Ok(text) => {
                    log::info!("Low price analysis for {}:\n{}", gainer.symbol, text);
                    self.last_summarized_gainer = Some(gainer.symbol.clone());
                }
                Err(e) => log::error!("Error summarizing low price gainer: {}", e),
            }
        }
    }
}

fn format_row(rank: usize, o: &Opportunity) -> String {
    format!(
        "{:>3}  {:<10} {:<8} {:<8} {:>16} {:>16} {:>8}%",
        rank,
        o.pair().to_string(),
        o.buy_exchange,
        o.sell_exchange,
        o.buy_price.round_dp(8).to_string(),
        o.sell_price.round_dp(8).to_string(),
        o.spread_pct.round_dp(3).to_string()
    )
}

fn format_live_row(row: &LivePriceRow) -> String {
    let quotes: Vec<String> = row
        .prices
        .iter()
        .map(|(exchange, price)| format!("{} {}", exchange, price.round_dp(8)))
        .collect();
    format!(
        "  {:<10} {} | diff {}",
        row.pair.to_string(),
        quotes.join(" | "),
        row.difference.round_dp(8)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::ScanStatus;
    use crate::exchanges::{FetchError, TickerBook};
    use crate::models::{CoinDetail, QuoteMarket};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};

    /// Replays scripted ticker books; `None` simulates an unreachable exchange.
    struct ScriptedSource {
        name: &'static str,
        script: Mutex<VecDeque<Option<TickerBook>>>,
    }

    impl ScriptedSource {
        fn new(name: &'static str, script: Vec<Option<TickerBook>>) -> Box<dyn PriceSource> {
            Box::new(Self {
                name,
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn pair_code(&self, base: &str, quote: &str) -> String {
            format!("{}-{}", base, quote)
        }

        async fn fetch_tickers(&self) -> Result<TickerBook, FetchError> {
            match self.script.lock().pop_front().flatten() {
                Some(book) => Ok(book),
                None => Err(FetchError::Api {
                    exchange: "test",
                    message: "unreachable".to_string(),
                }),
            }
        }

        async fn fetch_coin_detail(&self, _pair: &MarketPair) -> Result<CoinDetail, FetchError> {
            Err(FetchError::Api {
                exchange: "test",
                message: "no detail".to_string(),
            })
        }
    }

    /// Answers with one price after a long delay.
    struct SlowSource {
        delay: std::time::Duration,
    }

    #[async_trait]
    impl PriceSource for SlowSource {
        fn name(&self) -> &str {
            "Slow"
        }

        fn pair_code(&self, base: &str, quote: &str) -> String {
            format!("{}-{}", base, quote)
        }

        async fn fetch_tickers(&self) -> Result<TickerBook, FetchError> {
            tokio::time::sleep(self.delay).await;
            Ok(book(&[("BTC-USDT", dec!(60000))]).unwrap_or_default())
        }

        async fn fetch_coin_detail(&self, _pair: &MarketPair) -> Result<CoinDetail, FetchError> {
            tokio::time::sleep(self.delay).await;
            Err(FetchError::Api {
                exchange: "test",
                message: "no detail".to_string(),
            })
        }
    }

    fn book(prices: &[(&str, rust_decimal::Decimal)]) -> Option<TickerBook> {
        Some(prices.iter().map(|(code, p)| (code.to_string(), *p)).collect())
    }

    fn config() -> Config {
        let mut env = HashMap::new();
        env.insert("TRACKED_SYMBOLS", "BTC,ETH,DOGE");
        env.insert("QUOTE_MARKETS", "USDT");
        env.insert("UNHEALTHY_AFTER_FAILURES", "2");
        env.insert("BINANCE_TAKER_FEE_PCT", "0.1");
        env.insert("KRAKEN_TAKER_FEE_PCT", "0.16");
        env.insert("SLIPPAGE_PCT", "0.05");
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_ranks_and_retains_best() {
        let binance = ScriptedSource::new(
            "Binance",
            vec![book(&[
                ("BTC-USDT", dec!(60000)),
                ("ETH-USDT", dec!(3000)),
                ("DOGE-USDT", dec!(0.10)),
            ])],
        );
        let kraken = ScriptedSource::new(
            "Kraken",
            vec![book(&[
                ("BTC-USDT", dec!(60300)),
                ("ETH-USDT", dec!(3003)),
                ("DOGE-USDT", dec!(0.102)),
            ])],
        );
        let mut monitor = ArbitrageMonitor::new(config(), vec![binance, kraken], None);

        let report = monitor.refresh().await;

        assert_eq!(report.scan.status, ScanStatus::Ok);
        let symbols: Vec<&str> = report
            .scan
            .opportunities
            .iter()
            .map(|o| o.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["DOGE", "BTC", "ETH"]);
        assert!(report.failed_sources.is_empty());
        assert!(report.best_changed);

        assert_eq!(report.low_price.len(), 1);
        assert_eq!(report.low_price[0].symbol, "DOGE");

        // DOGE: 2% of 1000 minus 0.31% costs
        let sim = report.best_simulation.unwrap();
        assert_eq!(sim.net_profit, dec!(16.9));

        assert_eq!(monitor.last_seen().get().unwrap().symbol, "DOGE");

        let live: Vec<String> = report.live_prices.iter().map(|r| r.pair.to_string()).collect();
        assert_eq!(live, vec!["BTC/USDT", "DOGE/USDT", "ETH/USDT"]);
        assert_eq!(report.live_prices[0].difference, dec!(300));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_cycle_in_flight() {
        let slow: Box<dyn PriceSource> = Box::new(SlowSource {
            delay: std::time::Duration::from_secs(30),
        });
        let kraken = ScriptedSource::new("Kraken", vec![]);
        let mut monitor = ArbitrageMonitor::new(config(), vec![slow, kraken], None);

        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(200));
        let finished = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            monitor.run_until(shutdown),
        )
        .await;

        assert!(matches!(finished, Ok(Ok(()))));
        assert!(monitor.last_seen().get().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_between_ticks() {
        let binance = ScriptedSource::new("Binance", vec![book(&[("BTC-USDT", dec!(60000))])]);
        let kraken = ScriptedSource::new("Kraken", vec![book(&[("BTC-USDT", dec!(60300))])]);
        let mut monitor = ArbitrageMonitor::new(config(), vec![binance, kraken], None);

        // the first tick fires at once, the second only after REFRESH_SECS
        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(200));
        let finished = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            monitor.run_until(shutdown),
        )
        .await;

        assert!(matches!(finished, Ok(Ok(()))));
        assert_eq!(monitor.last_seen().get().unwrap().symbol, "BTC");
    }

    #[tokio::test]
    async fn test_total_failure_reports_no_data_and_keeps_last_seen() {
        let binance = ScriptedSource::new(
            "Binance",
            vec![book(&[("BTC-USDT", dec!(60000))]), None, None],
        );
        let kraken = ScriptedSource::new(
            "Kraken",
            vec![book(&[("BTC-USDT", dec!(60300))]), None, None],
        );
        let mut monitor = ArbitrageMonitor::new(config(), vec![binance, kraken], None);

        monitor.refresh().await;
        let report = monitor.refresh().await;

        assert!(report.scan.is_no_data());
        assert!(report.scan.opportunities.is_empty());
        assert_eq!(report.failed_sources, vec!["Binance", "Kraken"]);
        assert!(report.best_simulation.is_none());
        assert!(!report.best_changed);
        assert_eq!(monitor.last_seen().get().unwrap().symbol, "BTC");

        monitor.refresh().await;
        assert!(monitor.health.is_degraded("Binance"));
        assert!(monitor.health.is_degraded("Kraken"));
    }

    #[tokio::test]
    async fn test_partial_failure_still_degrades_to_no_data() {
        let binance = ScriptedSource::new("Binance", vec![book(&[("BTC-USDT", dec!(60000))])]);
        let kraken = ScriptedSource::new("Kraken", vec![None]);
        let mut monitor = ArbitrageMonitor::new(config(), vec![binance, kraken], None);

        let report = monitor.refresh().await;

        assert!(report.scan.is_no_data());
        assert_eq!(report.failed_sources, vec!["Kraken"]);
        assert!(monitor.last_seen().get().is_none());
    }

    #[tokio::test]
    async fn test_same_route_is_not_reported_as_changed() {
        let binance = ScriptedSource::new(
            "Binance",
            vec![book(&[("BTC-USDT", dec!(60000))]), book(&[("BTC-USDT", dec!(60010))])],
        );
        let kraken = ScriptedSource::new(
            "Kraken",
            vec![book(&[("BTC-USDT", dec!(60300))]), book(&[("BTC-USDT", dec!(60400))])],
        );
        let mut monitor = ArbitrageMonitor::new(config(), vec![binance, kraken], None);

        assert!(monitor.refresh().await.best_changed);
        assert!(!monitor.refresh().await.best_changed);
    }

    #[test]
    fn test_format_live_row() {
        let row = LivePriceRow {
            pair: MarketPair::new("ETH", QuoteMarket::Btc),
            prices: vec![
                ("Binance".to_string(), dec!(0.05)),
                ("Kraken".to_string(), dec!(0.0512)),
            ],
            difference: dec!(0.0012),
        };

        let line = format_live_row(&row);
        assert!(line.contains("ETH/BTC"));
        assert!(line.contains("Binance 0.05 | Kraken 0.0512"));
        assert!(line.ends_with("diff 0.0012"));
    }

    #[test]
    fn test_format_row() {
        let o = Opportunity {
            symbol: "BTC".to_string(),
            quote: QuoteMarket::Usdt,
            buy_exchange: "Binance".to_string(),
            sell_exchange: "Kraken".to_string(),
            buy_price: dec!(60000),
            sell_price: dec!(60300),
            spread_pct: dec!(0.5),
            computed_at: chrono::Utc::now(),
        };

        let row = format_row(1, &o);
        assert!(row.starts_with("  1  BTC/USDT"));
        assert!(row.ends_with("0.5%"));
    }
}
