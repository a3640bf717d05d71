//! Cross-exchange price gap monitor.
//!
//! Polls public ticker endpoints, ranks the spreads between exchanges for the
//! same coin and quote market, and simulates the net result of acting on them.

pub mod analysis;
pub mod arbitrage;
pub mod config;
pub mod exchanges;
pub mod health;
pub mod llm;
pub mod models;
pub mod monitor;
pub mod state;
