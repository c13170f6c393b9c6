use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::price::FullPrice;
use super::tariff::TariffIndex;

/// An ordered run of hourly prices and the window it spans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSet {
    prices: Vec<FullPrice>,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl PriceSet {
    pub fn new(prices: Vec<FullPrice>) -> Self {
        let from = prices.iter().map(|p| p.valid_from.to_utc()).min();
        let to = prices.iter().map(|p| p.valid_to.to_utc()).max();
        Self {
            window: from.zip(to),
            prices,
        }
    }

    pub fn prices(&self) -> &[FullPrice] {
        &self.prices
    }

    pub fn into_prices(self) -> Vec<FullPrice> {
        self.prices
    }

    pub fn from(&self) -> Option<DateTime<Utc>> {
        self.window.map(|(from, _)| from)
    }

    pub fn to(&self) -> Option<DateTime<Utc>> {
        self.window.map(|(_, to)| to)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// True if the set covers all of `[from, to)`.
    pub fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        if to < from {
            return false;
        }
        self.window
            .is_some_and(|(start, end)| start <= from && end >= to)
    }

    /// Prices lying entirely within `[from, to)`, with the window they span.
    pub fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> PriceSet {
        PriceSet::new(
            self.prices
                .iter()
                .filter(|p| p.in_window(from, to))
                .cloned()
                .collect(),
        )
    }
}

/// Holds the most recently summarized prices. Refreshes replace the whole set.
#[derive(Debug, Default)]
pub struct PriceCache {
    current: RwLock<Option<Arc<PriceSet>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached prices for `[from, to)`, or `None` if a refresh is needed.
    pub async fn get(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<PriceSet> {
        let current = self.current.read().await.clone();
        match current {
            Some(set) if set.in_range(from, to) => {
                debug!(%from, %to, "Cache HIT");
                Some(set.range(from, to))
            }
            _ => {
                debug!(%from, %to, "Cache MISS");
                None
            }
        }
    }

    pub async fn replace(&self, set: PriceSet) -> Arc<PriceSet> {
        let set = Arc::new(set);
        debug!(n = set.len(), from = ?set.from(), to = ?set.to(), "Cache PUT");
        *self.current.write().await = Some(Arc::clone(&set));
        set
    }

    pub async fn snapshot(&self) -> Option<Arc<PriceSet>> {
        self.current.read().await.clone()
    }
}

/// A tariff index stamped with the time its document was fetched.
#[derive(Debug, Clone)]
pub struct TariffSnapshot {
    pub index: Arc<TariffIndex>,
    pub fetched_at: DateTime<Utc>,
}

impl TariffSnapshot {
    pub fn new(index: TariffIndex, fetched_at: DateTime<Utc>) -> Self {
        Self {
            index: Arc::new(index),
            fetched_at,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
        now - self.fetched_at > max_age
    }
}
