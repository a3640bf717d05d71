use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::LlmConfig;
use crate::models::{CoinDetail, LowPriceGainer, Opportunity, TradeSimulation};

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 500;
const ANALYSIS_MAX_TOKENS: u32 = 800;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const OPPORTUNITY_SYSTEM: &str = "You are a cryptocurrency trader who specialises in \
cross-exchange arbitrage. Give short, practical guidance.";
const LOW_PRICE_SYSTEM: &str = "You are a cryptocurrency trader who follows low-priced coins \
and market inefficiencies. Give short, practical guidance.";

/// Natural-language commentary through an OpenAI-compatible chat endpoint.
#[derive(Clone)]
pub struct Summarizer {
    http: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl Summarizer {
    pub fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
        }
    }

    pub async fn summarize_opportunity(
        &self,
        opportunity: &Opportunity,
        simulation: &TradeSimulation,
    ) -> Result<String> {
        let prompt = opportunity_prompt(opportunity, simulation);
        self.chat_completion(OPPORTUNITY_SYSTEM, &prompt, MAX_TOKENS)
            .await
    }

    pub async fn summarize_low_price(&self, gainer: &LowPriceGainer) -> Result<String> {
        self.chat_completion(LOW_PRICE_SYSTEM, &low_price_prompt(gainer), MAX_TOKENS)
            .await
    }

    /// Longer market read for one coin from its per-exchange detail.
    pub async fn analyze_coin(&self, symbol: &str, details: &[CoinDetail]) -> Result<String> {
        let system = format!(
            "You are a cryptocurrency analyst specialising in {} trading. \
             Give detailed, data-driven analysis for traders.",
            symbol
        );
        let prompt = coin_analysis_prompt(symbol, details);
        self.chat_completion(&system, &prompt, ANALYSIS_MAX_TOKENS)
            .await
    }

    async fn chat_completion(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens,
        };

        let resp = self
            .http
            .post(&self.api_url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("llm request")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(400).collect();
            return Err(anyhow!("llm {}: {}", status.as_u16(), snippet));
        }

        let content = parse_completion(&body)?;
        log::debug!(
            "{} answered in {}ms ({} chars)",
            self.model,
            start.elapsed().as_millis(),
            content.len()
        );
        Ok(content)
    }
}

fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body).context("llm json parse")?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .map(|m| m.content.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| anyhow!("llm returned no content"))
}

pub fn opportunity_prompt(opportunity: &Opportunity, simulation: &TradeSimulation) -> String {
    format!(
        "A cross-exchange price gap was just observed.\n\n\
         Pair: {}/{}\n\
         Buy on: {} at {}\n\
         Sell on: {} at {}\n\
         Spread: {:.2}%\n\
         Simulated {} {} trade: net profit {} ({:.2}%) after fees and slippage\n\n\
         In a few sentences, cover why the gap may exist, the main execution risks \
         (transfer time, liquidity, withdrawal limits), and whether it is worth acting on.",
        opportunity.symbol,
        opportunity.quote,
        opportunity.buy_exchange,
        opportunity.buy_price,
        opportunity.sell_exchange,
        opportunity.sell_price,
        opportunity.spread_pct,
        simulation.size,
        opportunity.quote,
        simulation.net_profit.round_dp(4),
        simulation.net_profit_pct,
    )
}

pub fn low_price_prompt(gainer: &LowPriceGainer) -> String {
    let quotes: Vec<String> = gainer
        .prices
        .iter()
        .map(|(exchange, price)| format!("{}: {} USDT", exchange, price))
        .collect();

    format!(
        "A low-priced coin shows a price difference between exchanges.\n\n\
         Coin: {}\n\
         Quotes: {}\n\
         Spread: {:.2}%\n\
         Average price: {} USDT\n\n\
         In a few sentences, cover likely reasons for the difference, the risks of \
         trading low-priced coins, and whether it deserves a closer look.",
        gainer.symbol,
        quotes.join(", "),
        gainer.spread_pct,
        gainer.avg_price.round_dp(8),
    )
}

pub fn coin_analysis_prompt(symbol: &str, details: &[CoinDetail]) -> String {
    let mut sections = Vec::with_capacity(details.len());
    for detail in details {
        let stats = &detail.stats;
        let mut section = format!(
            "{} ({}/{})\n\
             Last: {} | Open: {} | High: {} | Low: {}\n\
             24h change: {}% | Volume: {} {} ({} {})\n",
            stats.exchange,
            stats.symbol,
            stats.quote,
            stats.last_price,
            stats.open_price,
            stats.high_price,
            stats.low_price,
            stats.change_pct,
            stats.volume.round_dp(4),
            stats.symbol,
            stats.quote_volume.round_dp(2),
            stats.quote,
        );

        section.push_str("Top bids:");
        for level in detail.bids.iter().take(3) {
            section.push_str(&format!(" {} x {};", level.price, level.quantity));
        }
        section.push_str("\nTop asks:");
        for level in detail.asks.iter().take(3) {
            section.push_str(&format!(" {} x {};", level.price, level.quantity));
        }
        section.push_str("\nRecent trades:");
        for trade in detail.recent_trades.iter().take(5) {
            section.push_str(&format!(" {} {} at {};", trade.side, trade.quantity, trade.price));
        }
        sections.push(section);
    }

    format!(
        "Give a detailed analysis of {} from this market data.\n\n\
         {}\n\n\
         Cover: current market conditions, the 24-hour price trend, what the volume \
         indicates, order book liquidity and buy/sell pressure, any price gap between \
         the exchanges, a short-term outlook (24-48 hours) and possible trading strategies. \
         Keep it trader-friendly.",
        symbol,
        sections.join("\n\n"),
    )
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    pub message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    pub content: String,
}
