pub mod calculator;
pub mod simulator;

pub use calculator::{
    compute_opportunities, live_price_rows, low_price_gainers, low_price_subset, spread_pct,
    OpportunityScan, ScanStatus, SpreadFilter,
};
pub use simulator::{simulate, simulate_with_costs, TradeCosts};
