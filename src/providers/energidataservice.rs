use async_trait::async_trait;
use chrono::{DateTime, DurationRound, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::util::{build_client, ensure_success, read_json, send_with_retry};
use crate::core::error::{PriceError, Result};
use crate::core::spot::{PriceArea, RawSpotPrice, SpotPriceSource};

const SOURCE_NAME: &str = "energidataservice";

/// Spot prices from the Energi Data Service `Elspotprices` dataset.
pub struct EnergiDataServiceProvider {
    base_url: String,
    client: reqwest::Client,
    tz: Tz,
}

impl EnergiDataServiceProvider {
    /// `tz` is the zone the dataset interprets `start` and `end` in.
    pub fn new(base_url: &str, timeout: Duration, tz: Tz) -> anyhow::Result<Self> {
        Ok(EnergiDataServiceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
            tz,
        })
    }

    fn request_url(
        &self,
        area: PriceArea,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<reqwest::Url> {
        let format = |t: DateTime<Utc>| t.with_timezone(&self.tz).format("%Y-%m-%dT%H:%M").to_string();
        // One record per hour and area, with room for a DST fall-back hour
        let limit = (to - from).num_hours().max(0) + 2;
        reqwest::Url::parse_with_params(
            &format!("{}/dataset/Elspotprices", self.base_url),
            &[
                ("start", format(from)),
                ("end", format(to)),
                ("filter", format!(r#"{{"PriceArea":["{}"]}}"#, area.code())),
                ("sort", "HourUTC asc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .map_err(|e| PriceError::upstream(SOURCE_NAME, format!("invalid base URL: {e}")))
    }
}

#[derive(Deserialize, Debug)]
struct ElspotpricesResponse {
    #[serde(default)]
    records: Vec<ElspotpriceRecord>,
}

#[derive(Deserialize, Debug)]
struct ElspotpriceRecord {
    #[serde(rename = "HourUTC")]
    hour_utc: String,
    #[serde(rename = "SpotPriceDKK")]
    spot_price_dkk: Option<f64>,
    #[serde(rename = "SpotPriceEUR")]
    spot_price_eur: Option<f64>,
}

/// Accepts RFC 3339 and the dataset's naive `YYYY-MM-DDTHH:MM:SS` UTC form.
fn parse_hour_utc(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").map(|naive| naive.and_utc())
        })
        .ok()
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(TimeDelta::hours(1)).unwrap_or(t)
}

fn into_spot_prices(
    records: Vec<ElspotpriceRecord>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<RawSpotPrice>> {
    let mut prices = Vec::with_capacity(records.len());
    for record in records {
        let hour_utc = parse_hour_utc(&record.hour_utc).ok_or_else(|| {
            PriceError::malformed(SOURCE_NAME, format!("invalid HourUTC '{}'", record.hour_utc))
        })?;
        if hour_utc < from || hour_utc >= to {
            continue;
        }
        let spot_price_eur = record.spot_price_eur.ok_or_else(|| {
            PriceError::malformed(SOURCE_NAME, format!("missing SpotPriceEUR at {hour_utc}"))
        })?;
        prices.push(RawSpotPrice {
            hour_utc,
            spot_price_dkk: record.spot_price_dkk,
            spot_price_eur,
        });
    }

    prices.sort_by_key(|p| p.hour_utc);
    prices.dedup_by_key(|p| p.hour_utc);
    Ok(prices)
}

#[async_trait]
impl SpotPriceSource for EnergiDataServiceProvider {
    #[instrument(name = "EnergiDataServiceFetch", skip(self), fields(area = %area))]
    async fn fetch_spot_prices(
        &self,
        area: PriceArea,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawSpotPrice>> {
        let (from, to) = (truncate_to_hour(from), truncate_to_hour(to));
        if to <= from {
            return Ok(Vec::new());
        }

        let url = self.request_url(area, from, to)?;
        debug!("Requesting spot prices from {}", url);

        let response = send_with_retry(SOURCE_NAME, || self.client.get(url.clone())).await?;
        let response = ensure_success(SOURCE_NAME, response).await?;
        let data: ElspotpricesResponse = read_json(SOURCE_NAME, response).await?;

        let prices = into_spot_prices(data.records, from, to)?;
        debug!(n = prices.len(), "Received spot prices");
        Ok(prices)
    }
}
