use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Fetch health bookkeeping for each price source
pub struct ExchangeHealth {
    /// Consecutive failed fetches before a source counts as degraded
    unhealthy_after: u32,

    /// Per-exchange fetch history
    sources: HashMap<String, SourceSnapshot>,

    /// Longest gap between successful fetches before the data is stale
    max_quiet: Duration,
}

#[derive(Debug, Clone)]
struct SourceSnapshot {
    last_success: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    total_failures: u64,
}

impl ExchangeHealth {
    pub fn new(unhealthy_after: u32, max_quiet: Duration) -> Self {
        Self {
            unhealthy_after: unhealthy_after.max(1),
            sources: HashMap::new(),
            max_quiet,
        }
    }

    /// Record the outcome of one fetch and report the source's state after it.
    pub fn record(&mut self, exchange: &str, ok: bool) -> HealthStatus {
        self.record_at(exchange, ok, Utc::now())
    }

    fn record_at(&mut self, exchange: &str, ok: bool, now: DateTime<Utc>) -> HealthStatus {
        let snapshot = self
            .sources
            .entry(exchange.to_string())
            .or_insert(SourceSnapshot {
                last_success: None,
                consecutive_failures: 0,
                total_failures: 0,
            });

        if ok {
            if snapshot.consecutive_failures >= self.unhealthy_after {
                log::info!(
                    "{} recovered after {} failed fetches",
                    exchange,
                    snapshot.consecutive_failures
                );
            }
            snapshot.last_success = Some(now);
            snapshot.consecutive_failures = 0;
            return HealthStatus::Healthy;
        }

        snapshot.consecutive_failures += 1;
        snapshot.total_failures += 1;

        if snapshot.consecutive_failures >= self.unhealthy_after {
            let since = match snapshot.last_success {
                Some(ts) => format!("last success {}s ago", (now - ts).num_seconds()),
                None => "never succeeded".to_string(),
            };
            return HealthStatus::Degraded(format!(
                "{} failed {} fetches in a row ({})",
                exchange, snapshot.consecutive_failures, since
            ));
        }

        HealthStatus::Healthy
    }

    pub fn is_degraded(&self, exchange: &str) -> bool {
        self.sources
            .get(exchange)
            .map(|s| s.consecutive_failures >= self.unhealthy_after)
            .unwrap_or(false)
    }

    /// Sources without a successful fetch inside the quiet window, sorted by
    /// name, with the time they last answered.
    pub fn stale_sources(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.stale_at(Utc::now())
    }

    fn stale_at(&self, now: DateTime<Utc>) -> Vec<(String, Option<DateTime<Utc>>)> {
        let mut stale: Vec<_> = self
            .sources
            .iter()
            .filter(|(_, snapshot)| self.is_stale(snapshot, now))
            .map(|(name, snapshot)| (name.clone(), snapshot.last_success))
            .collect();
        stale.sort();
        stale
    }

    fn is_stale(&self, snapshot: &SourceSnapshot, now: DateTime<Utc>) -> bool {
        snapshot
            .last_success
            .map(|ts| now.signed_duration_since(ts) > self.max_quiet)
            .unwrap_or(true)
    }

    pub fn get_stats(&self) -> HealthStats {
        self.stats_at(Utc::now())
    }

    fn stats_at(&self, now: DateTime<Utc>) -> HealthStats {
        let mut stats = HealthStats {
            total_sources: self.sources.len(),
            healthy_sources: 0,
            degraded_sources: 0,
            stale_sources: 0,
            total_failures: 0,
        };

        for snapshot in self.sources.values() {
            if snapshot.consecutive_failures == 0 {
                stats.healthy_sources += 1;
            }
            if snapshot.consecutive_failures >= self.unhealthy_after {
                stats.degraded_sources += 1;
            }
            if self.is_stale(snapshot, now) {
                stats.stale_sources += 1;
            }
            stats.total_failures += snapshot.total_failures;
        }

        stats
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStats {
    pub total_sources: usize,
    pub healthy_sources: usize,
    pub degraded_sources: usize,
    pub stale_sources: usize,
    pub total_failures: u64,
}
