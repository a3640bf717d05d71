use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::models::{Opportunity, TradeSimulation};

/// Execution costs, all expressed in percent (0.1 means 0.1%).
#[derive(Debug, Clone, Default)]
pub struct TradeCosts {
    pub taker_fee_pct: HashMap<String, Decimal>,
    pub default_taker_fee_pct: Decimal,
    pub slippage_pct: Decimal,
}

impl TradeCosts {
    pub fn fee_for(&self, exchange: &str) -> Decimal {
        self.taker_fee_pct
            .get(exchange)
            .copied()
            .unwrap_or(self.default_taker_fee_pct)
    }
}

/// Net result of taking `opportunity` with `size` units of the quote currency.
pub fn simulate(
    opportunity: &Opportunity,
    size: Decimal,
    fee_buy_pct: Decimal,
    fee_sell_pct: Decimal,
    slippage_pct: Decimal,
) -> TradeSimulation {
    let hundred = Decimal::ONE_HUNDRED;

    let gross_profit = size * opportunity.spread_pct / hundred;
    let fee_cost = size * (fee_buy_pct + fee_sell_pct) / hundred;
    let slippage_cost = size * slippage_pct / hundred;
    let net_profit = gross_profit - fee_cost - slippage_cost;

    let coin_amount = size
        .checked_div(opportunity.buy_price)
        .unwrap_or(Decimal::ZERO);
    let net_profit_pct = net_profit
        .checked_div(size)
        .map(|r| r * hundred)
        .unwrap_or(Decimal::ZERO);

    TradeSimulation {
        size,
        coin_amount,
        gross_profit,
        fee_cost,
        slippage_cost,
        net_profit,
        net_profit_pct,
        profitable: net_profit > Decimal::ZERO,
    }
}

pub fn simulate_with_costs(
    opportunity: &Opportunity,
    size: Decimal,
    costs: &TradeCosts,
) -> TradeSimulation {
    simulate(
        opportunity,
        size,
        costs.fee_for(&opportunity.buy_exchange),
        costs.fee_for(&opportunity.sell_exchange),
        costs.slippage_pct,
    )
}
