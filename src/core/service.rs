//! Orchestrates fetching, normalizing, indexing and caching of prices

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::cache::{PriceCache, PriceSet, TariffSnapshot};
use super::calendar::{BusinessCalendar, at_local_time};
use super::error::{PriceError, Result};
use super::price::summarize;
use super::spot::{CurrencyNormalizer, PriceArea, SpotPrice, SpotPriceSource};
use super::tariff::{TariffIndex, TariffSource};

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub area: PriceArea,
    /// Provider code of the first tariff position.
    pub position_base: u32,
    pub tariff_max_age: TimeDelta,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            area: PriceArea::default(),
            position_base: 1,
            tariff_max_age: TimeDelta::hours(24),
        }
    }
}

pub struct PriceService {
    spot_source: Arc<dyn SpotPriceSource>,
    tariff_source: Arc<dyn TariffSource>,
    calendar: Arc<dyn BusinessCalendar>,
    options: ServiceOptions,
    cache: PriceCache,
    tariffs: RwLock<Option<TariffSnapshot>>,
}

impl PriceService {
    pub fn new(
        spot_source: Arc<dyn SpotPriceSource>,
        tariff_source: Arc<dyn TariffSource>,
        calendar: Arc<dyn BusinessCalendar>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            spot_source,
            tariff_source,
            calendar,
            options,
            cache: PriceCache::new(),
            tariffs: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Consumer prices for every hour lying within `[from, to)`.
    pub async fn prices(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        ignore_missing_tariffs: bool,
    ) -> Result<PriceSet> {
        self.prices_at(from, to, ignore_missing_tariffs, Utc::now())
            .await
    }

    /// Same as [`PriceService::prices`] with an explicit current time.
    #[instrument(name = "Prices", skip(self), fields(area = %self.options.area))]
    pub async fn prices_at(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        ignore_missing_tariffs: bool,
        now: DateTime<Utc>,
    ) -> Result<PriceSet> {
        if let Some(cached) = self.cache.get(from, to).await {
            return Ok(cached);
        }

        let end = self.fetch_horizon(now).max(to);
        let (spot_prices, tariffs) = futures::join!(
            self.normalized_spot_prices(from, end),
            self.current_tariffs(now, ignore_missing_tariffs)
        );
        let spot_prices = spot_prices?;
        let tariffs = tariffs?;

        let set = PriceSet::new(summarize(
            &spot_prices,
            &tariffs,
            self.calendar.timezone(),
        ));
        info!(n = set.len(), from = ?set.from(), to = ?set.to(), "Refreshed prices");
        let set = self.cache.replace(set).await;
        Ok(set.range(from, to))
    }

    /// Local midnight ending the day after `now`.
    fn fetch_horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tz = self.calendar.timezone();
        let today = now.with_timezone(&tz).date_naive();
        let day = today.checked_add_days(Days::new(2)).unwrap_or(today);
        at_local_time(tz, day, NaiveTime::MIN).with_timezone(&Utc)
    }

    async fn normalized_spot_prices(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SpotPrice>> {
        debug!(%from, %to, "Fetching spot prices");
        let raw = self
            .spot_source
            .fetch_spot_prices(self.options.area, from, to)
            .await?;
        CurrencyNormalizer::new(
            self.spot_source.as_ref(),
            self.calendar.as_ref(),
            self.options.area,
        )
        .normalize(raw)
        .await
    }

    async fn current_tariffs(
        &self,
        now: DateTime<Utc>,
        ignore_missing: bool,
    ) -> Result<Arc<TariffIndex>> {
        let current = self.tariffs.read().await.clone();
        if let Some(snapshot) = &current {
            if !snapshot.is_stale(now, self.options.tariff_max_age) {
                return Ok(Arc::clone(&snapshot.index));
            }
        }

        match self.refresh_tariffs(now).await {
            Ok(index) => Ok(index),
            Err(err) if ignore_missing => {
                warn!(error = %err, "Failed to refresh tariffs, using previous tariffs");
                Ok(current.map(|snapshot| snapshot.index).unwrap_or_default())
            }
            Err(err) => Err(PriceError::StaleTariffFetchFailed(Box::new(err))),
        }
    }

    /// Fetches tariffs ahead of the first price request.
    pub async fn preload_tariffs(&self) -> Result<()> {
        self.refresh_tariffs(Utc::now()).await.map(|_| ())
    }

    async fn refresh_tariffs(&self, now: DateTime<Utc>) -> Result<Arc<TariffIndex>> {
        let document = self.tariff_source.fetch_charges().await?;
        let index = TariffIndex::build(&document, self.options.position_base)?;
        info!(positions = index.position_count(), "Refreshed tariffs");

        let snapshot = TariffSnapshot::new(index, now);
        let index = Arc::clone(&snapshot.index);
        *self.tariffs.write().await = Some(snapshot);
        Ok(index)
    }
}
