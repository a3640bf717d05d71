use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::Opportunity;

/// The best opportunity from the most recent cycle that produced any.
///
/// Cycles with an empty ranking leave the previous value in place.
#[derive(Debug, Default)]
pub struct LastSeenOpportunity {
    slot: RwLock<Option<Arc<Opportunity>>>,
}

impl LastSeenOpportunity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in the head of `ranked`. Returns the replaced value, if any, or
    /// `None` without touching the slot when `ranked` is empty.
    pub fn update(&self, ranked: &[Opportunity]) -> Option<Option<Arc<Opportunity>>> {
        let best = ranked.first()?;
        let previous = self.slot.write().replace(Arc::new(best.clone()));
        Some(previous)
    }

    pub fn get(&self) -> Option<Arc<Opportunity>> {
        self.slot.read().clone()
    }
}

/// Same symbol, market and direction.
pub fn same_route(a: &Opportunity, b: &Opportunity) -> bool {
    a.symbol == b.symbol
        && a.quote == b.quote
        && a.buy_exchange == b.buy_exchange
        && a.sell_exchange == b.sell_exchange
}
