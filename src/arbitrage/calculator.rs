//! Cross-exchange spread detection over one refresh cycle.
//!
//! Everything here is a pure function of the fragments handed in: no I/O, no
//! retained state between calls.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::models::{
    LivePriceRow, LowPriceGainer, MarketPair, Opportunity, PriceFragment, PricePoint, PriceTable,
    QuoteMarket,
};

/// Bounds applied to every computed spread.
#[derive(Debug, Clone)]
pub struct SpreadFilter {
    /// Spreads below this percentage are dropped silently.
    pub min_spread_pct: Decimal,
    /// Spreads above this percentage are treated as stale or bad data.
    pub max_spread_pct: Decimal,
    /// Buy prices below this are too close to zero to divide by.
    pub min_price: Decimal,
}

impl Default for SpreadFilter {
    fn default() -> Self {
        Self {
            min_spread_pct: Decimal::ZERO,
            max_spread_pct: Decimal::from(20),
            min_price: Decimal::new(1, 8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// At least two exchanges reported prices; the list may still be empty.
    Ok,
    /// Fewer than two exchanges reported anything, so nothing could be compared.
    NoData,
}

#[derive(Debug, Clone)]
pub struct OpportunityScan {
    pub status: ScanStatus,
    /// Ranked by spread descending, then symbol ascending.
    pub opportunities: Vec<Opportunity>,
    /// Pairs rejected for a near-zero price or a spread above the ceiling.
    pub invalid_spreads: usize,
}

impl OpportunityScan {
    fn no_data() -> Self {
        Self {
            status: ScanStatus::NoData,
            opportunities: Vec::new(),
            invalid_spreads: 0,
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.status == ScanStatus::NoData
    }

    pub fn best(&self) -> Option<&Opportunity> {
        self.opportunities.first()
    }
}

enum PairOutcome {
    Opportunity(Opportunity),
    Invalid,
    Skipped,
}

/// Percentage gained buying at `buy` and selling at `sell`.
///
/// Returns `None` when `buy` is zero or the result does not fit a `Decimal`.
pub fn spread_pct(buy: Decimal, sell: Decimal) -> Option<Decimal> {
    if buy.is_zero() {
        return None;
    }
    (sell - buy)
        .checked_div(buy)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

pub fn compute_opportunities(
    fragments: &[PriceFragment],
    filter: &SpreadFilter,
) -> OpportunityScan {
    let populated: HashSet<&str> = fragments
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| f.exchange.as_str())
        .collect();
    if populated.len() < 2 {
        log::debug!(
            "Only {} of {} exchanges reported prices",
            populated.len(),
            fragments.len()
        );
        return OpportunityScan::no_data();
    }

    let table = PriceTable::from_fragments(fragments);
    let computed_at = Utc::now();

    let mut opportunities = Vec::new();
    let mut invalid_spreads = 0;

    for (pair, quotes) in table.shared_pairs() {
        for (i, first) in quotes.iter().enumerate() {
            for second in &quotes[i + 1..] {
                match evaluate_pair(pair, first, second, filter, computed_at) {
                    PairOutcome::Opportunity(opportunity) => opportunities.push(opportunity),
                    PairOutcome::Invalid => invalid_spreads += 1,
                    PairOutcome::Skipped => {}
                }
            }
        }
    }

    rank(&mut opportunities);

    OpportunityScan {
        status: ScanStatus::Ok,
        opportunities,
        invalid_spreads,
    }
}

fn evaluate_pair(
    pair: &MarketPair,
    first: &PricePoint,
    second: &PricePoint,
    filter: &SpreadFilter,
    computed_at: DateTime<Utc>,
) -> PairOutcome {
    if first.price.min(second.price) < filter.min_price {
        log::debug!(
            "Rejecting {}: near-zero price ({} on {}, {} on {})",
            pair,
            first.price,
            first.exchange,
            second.price,
            second.exchange
        );
        return PairOutcome::Invalid;
    }

    let (Some(forward), Some(backward)) = (
        spread_pct(first.price, second.price),
        spread_pct(second.price, first.price),
    ) else {
        return PairOutcome::Invalid;
    };

    let (buy, sell, spread) = if forward > Decimal::ZERO {
        (first, second, forward)
    } else if backward > Decimal::ZERO {
        (second, first, backward)
    } else {
        return PairOutcome::Skipped;
    };

    if spread > filter.max_spread_pct {
        log::debug!(
            "Rejecting {}: spread {}% above ceiling {}% ({} -> {})",
            pair,
            spread.round_dp(4),
            filter.max_spread_pct,
            buy.exchange,
            sell.exchange
        );
        return PairOutcome::Invalid;
    }
    if spread < filter.min_spread_pct {
        return PairOutcome::Skipped;
    }

    PairOutcome::Opportunity(Opportunity {
        symbol: pair.symbol.clone(),
        quote: pair.quote,
        buy_exchange: buy.exchange.clone(),
        sell_exchange: sell.exchange.clone(),
        buy_price: buy.price,
        sell_price: sell.price,
        spread_pct: spread,
        computed_at,
    })
}

fn rank(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.spread_pct
            .cmp(&a.spread_pct)
            .then_with(|| a.symbol.cmp(&b.symbol))
            .then_with(|| a.quote.cmp(&b.quote))
            .then_with(|| a.buy_exchange.cmp(&b.buy_exchange))
            .then_with(|| a.sell_exchange.cmp(&b.sell_exchange))
    });
}

/// Side-by-side quotes for every pair at least two exchanges reported, with
/// the absolute gap between the highest and lowest quote. Rows with no gap
/// are kept.
pub fn live_price_rows(fragments: &[PriceFragment]) -> Vec<LivePriceRow> {
    let table = PriceTable::from_fragments(fragments);
    let mut exchanges: Vec<&str> = Vec::new();
    for fragment in fragments {
        if !exchanges.contains(&fragment.exchange.as_str()) {
            exchanges.push(fragment.exchange.as_str());
        }
    }

    table
        .shared_pairs()
        .map(|(pair, _)| {
            let prices: Vec<(String, Decimal)> = exchanges
                .iter()
                .filter_map(|exchange| {
                    table
                        .get(pair, exchange)
                        .map(|point| (exchange.to_string(), point.price))
                })
                .collect();
            let high = prices.iter().map(|(_, p)| *p).max().unwrap_or_default();
            let low = prices.iter().map(|(_, p)| *p).min().unwrap_or_default();

            LivePriceRow {
                pair: pair.clone(),
                prices,
                difference: high - low,
            }
        })
        .collect()
}

/// Restrict fragments to the USDT pairs of coins trading below `ceiling` on
/// any exchange.
pub fn low_price_subset(fragments: &[PriceFragment], ceiling: Decimal) -> Vec<PriceFragment> {
    let cheap: HashSet<&str> = fragments
        .iter()
        .flat_map(|f| f.points.iter())
        .filter(|(pair, point)| pair.quote == QuoteMarket::Usdt && point.price < ceiling)
        .map(|(pair, _)| pair.symbol.as_str())
        .collect();

    fragments
        .iter()
        .map(|fragment| PriceFragment {
            exchange: fragment.exchange.clone(),
            points: fragment
                .points
                .iter()
                .filter(|(pair, _)| {
                    pair.quote == QuoteMarket::Usdt && cheap.contains(pair.symbol.as_str())
                })
                .map(|(pair, point)| (pair.clone(), point.clone()))
                .collect(),
        })
        .collect()
}

/// Opportunities among low-priced coins, with the average of the two quotes.
pub fn low_price_gainers(
    fragments: &[PriceFragment],
    ceiling: Decimal,
    filter: &SpreadFilter,
) -> Vec<LowPriceGainer> {
    let subset = low_price_subset(fragments, ceiling);
    compute_opportunities(&subset, filter)
        .opportunities
        .into_iter()
        .map(|o| LowPriceGainer {
            avg_price: (o.buy_price + o.sell_price) / Decimal::TWO,
            prices: vec![
                (o.buy_exchange, o.buy_price),
                (o.sell_exchange, o.sell_price),
            ],
            symbol: o.symbol,
            spread_pct: o.spread_pct,
        })
        .collect()
}
