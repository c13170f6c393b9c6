//! Spot prices and DKK gap repair

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::calendar::{BusinessCalendar, at_local_time, previous_business_day_close};
use super::error::{PriceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PriceArea {
    /// West of the Great Belt
    #[serde(rename = "DK1")]
    DkWest,
    /// East of the Great Belt
    #[default]
    #[serde(rename = "DK2")]
    DkEast,
}

impl PriceArea {
    pub fn code(&self) -> &'static str {
        match self {
            PriceArea::DkWest => "DK1",
            PriceArea::DkEast => "DK2",
        }
    }
}

impl Display for PriceArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for PriceArea {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DK1" => Ok(PriceArea::DkWest),
            "DK2" => Ok(PriceArea::DkEast),
            _ => Err(anyhow::anyhow!("Invalid price area: {}", s)),
        }
    }
}

/// One hour of wholesale prices as delivered upstream, per MWh.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpotPrice {
    pub hour_utc: DateTime<Utc>,
    pub spot_price_dkk: Option<f64>,
    pub spot_price_eur: f64,
}

/// One hour of wholesale prices with a DKK price in place, per MWh.
///
/// `estimated_rate` is set when the DKK price was derived from the EUR price.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotPrice {
    pub hour_utc: DateTime<Utc>,
    pub spot_price_dkk: f64,
    pub spot_price_eur: f64,
    pub estimated_rate: Option<f64>,
}

impl SpotPrice {
    pub fn is_estimated(&self) -> bool {
        self.estimated_rate.is_some()
    }
}

#[async_trait]
pub trait SpotPriceSource: Send + Sync {
    /// Hourly prices in `[from, to)`, ascending by hour, at most one per hour.
    async fn fetch_spot_prices(
        &self,
        area: PriceArea,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawSpotPrice>>;
}

/// Fills in missing DKK prices from EUR prices.
///
/// DKK prices are not published on days without an exchange-rate fixing, so the
/// last known DKK/EUR ratio before the gap is used instead.
pub struct CurrencyNormalizer<'a> {
    source: &'a dyn SpotPriceSource,
    calendar: &'a dyn BusinessCalendar,
    area: PriceArea,
}

impl<'a> CurrencyNormalizer<'a> {
    pub fn new(
        source: &'a dyn SpotPriceSource,
        calendar: &'a dyn BusinessCalendar,
        area: PriceArea,
    ) -> Self {
        Self {
            source,
            calendar,
            area,
        }
    }

    #[instrument(name = "NormalizeSpotPrices", skip_all, fields(area = %self.area, n = prices.len()))]
    pub async fn normalize(&self, prices: Vec<RawSpotPrice>) -> Result<Vec<SpotPrice>> {
        // The reference is the last fully quoted hour before the first gap
        let mut missing_dkk = false;
        let mut reference = None;
        for price in &prices {
            match price.spot_price_dkk {
                None => missing_dkk = true,
                Some(dkk) if !missing_dkk && dkk != 0.0 && price.spot_price_eur != 0.0 => {
                    reference = Some((dkk, price.spot_price_eur));
                }
                Some(_) => {}
            }
        }

        if !missing_dkk {
            return Ok(prices.into_iter().map(Self::as_quoted).collect());
        }

        let (dkk, eur) = match reference {
            Some(reference) => reference,
            // Missing DKK implies at least one record, sorted ascending
            None => self.fetch_reference(prices[0].hour_utc).await?,
        };
        let rate = dkk / eur;
        debug!(rate, "Estimating missing DKK prices");

        Ok(prices
            .into_iter()
            .map(|price| match price.spot_price_dkk {
                Some(_) => Self::as_quoted(price),
                None => SpotPrice {
                    hour_utc: price.hour_utc,
                    spot_price_dkk: price.spot_price_eur * rate,
                    spot_price_eur: price.spot_price_eur,
                    estimated_rate: Some(rate),
                },
            })
            .collect())
    }

    /// Fetches the 23:00 local hour of the business day before `earliest`.
    async fn fetch_reference(&self, earliest: DateTime<Utc>) -> Result<(f64, f64)> {
        let business_day = previous_business_day_close(self.calendar, earliest);
        let closing_hour = NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN);
        let target = at_local_time(
            self.calendar.timezone(),
            business_day.date_naive(),
            closing_hour,
        )
        .with_timezone(&Utc);
        debug!(%target, "No in-series DKK reference, fetching one");

        let fetched = self
            .source
            .fetch_spot_prices(self.area, target, target + TimeDelta::hours(1))
            .await?;
        let reference = fetched.first().ok_or_else(|| {
            PriceError::ReferenceUnavailable(format!("no spot price returned for {target}"))
        })?;
        match reference.spot_price_dkk {
            Some(dkk) if reference.spot_price_eur != 0.0 => Ok((dkk, reference.spot_price_eur)),
            Some(_) => Err(PriceError::ReferenceUnavailable(format!(
                "EUR price at {target} is zero"
            ))),
            None => Err(PriceError::ReferenceUnavailable(format!(
                "DKK price at {target} is missing"
            ))),
        }
    }

    fn as_quoted(price: RawSpotPrice) -> SpotPrice {
        SpotPrice {
            hour_utc: price.hour_utc,
            spot_price_dkk: price.spot_price_dkk.unwrap_or_default(),
            spot_price_eur: price.spot_price_eur,
            estimated_rate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calendar::DanishBusinessCalendar;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockSpotSource {
        reference: Option<RawSpotPrice>,
        call_count: AtomicUsize,
        requested: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl MockSpotSource {
        fn new(reference: Option<RawSpotPrice>) -> Self {
            Self {
                reference,
                call_count: AtomicUsize::new(0),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpotPriceSource for MockSpotSource {
        async fn fetch_spot_prices(
            &self,
            _area: PriceArea,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<RawSpotPrice>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push((from, to));
            Ok(self.reference.iter().cloned().collect())
        }
    }

    fn hour(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap()
    }

    fn raw(at: DateTime<Utc>, dkk: Option<f64>, eur: f64) -> RawSpotPrice {
        RawSpotPrice {
            hour_utc: at,
            spot_price_dkk: dkk,
            spot_price_eur: eur,
        }
    }

    #[tokio::test]
    async fn test_complete_series_is_unchanged() {
        let source = MockSpotSource::new(None);
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        let input = vec![
            raw(hour(11, 0), Some(100.0), 13.0),
            raw(hour(11, 1), Some(0.0), 0.0),
            raw(hour(11, 2), Some(300.0), 15.0),
        ];
        let result = normalizer.normalize(input.clone()).await.unwrap();

        assert_eq!(result.len(), input.len());
        for (before, after) in input.iter().zip(&result) {
            assert_eq!(before.hour_utc, after.hour_utc);
            assert_eq!(before.spot_price_dkk, Some(after.spot_price_dkk));
            assert_eq!(before.spot_price_eur, after.spot_price_eur);
            assert!(!after.is_estimated());
        }
        assert_eq!(source.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gap_is_filled_from_in_series_reference() {
        let source = MockSpotSource::new(None);
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        let input = vec![
            raw(hour(11, 0), Some(100.0), 13.0),
            raw(hour(11, 1), None, 14.0),
            raw(hour(11, 2), Some(300.0), 15.0),
        ];
        let result = normalizer.normalize(input).await.unwrap();

        assert!(!result[0].is_estimated());
        assert!((result[1].spot_price_dkk - 107.6923).abs() < 1e-3);
        assert!((result[1].estimated_rate.unwrap() - 7.6923).abs() < 1e-3);
        assert!(!result[2].is_estimated());
        assert_eq!(result[2].spot_price_dkk, 300.0);
        assert_eq!(source.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_is_fixed_across_gaps() {
        let source = MockSpotSource::new(None);
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        let input = vec![
            raw(hour(11, 0), Some(100.0), 13.0),
            raw(hour(11, 1), None, 14.0),
            raw(hour(11, 2), Some(300.0), 15.0),
            raw(hour(11, 3), None, 16.0),
        ];
        let result = normalizer.normalize(input).await.unwrap();

        let rate = 100.0 / 13.0;
        for repaired in [&result[1], &result[3]] {
            assert_eq!(repaired.estimated_rate, Some(rate));
            assert_eq!(repaired.spot_price_dkk, repaired.spot_price_eur * rate);
        }
    }

    #[tokio::test]
    async fn test_gap_before_first_quote_fetches_reference() {
        let source = MockSpotSource::new(Some(raw(hour(7, 21), Some(745.0), 100.0)));
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        let input = vec![
            raw(hour(8, 0), None, 20.0),
            raw(hour(10, 12), Some(300.0), 15.0),
        ];
        let result = normalizer.normalize(input).await.unwrap();

        assert_eq!(source.call_count.load(Ordering::SeqCst), 1);
        assert_eq!(result[0].estimated_rate, Some(7.45));
        assert!(!result[1].is_estimated());
    }

    #[tokio::test]
    async fn test_reference_fetched_from_previous_business_day() {
        let reference = raw(hour(7, 21), Some(745.0), 100.0);
        let source = MockSpotSource::new(Some(reference));
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        // Saturday and Sunday without any DKK quotes
        let input = vec![raw(hour(8, 0), None, 20.0), raw(hour(9, 0), None, 30.0)];
        let result = normalizer.normalize(input).await.unwrap();

        assert_eq!(source.call_count.load(Ordering::SeqCst), 1);
        // Friday 23:00 Copenhagen summer time
        let requested = source.requested.lock().unwrap().clone();
        assert_eq!(requested, vec![(hour(7, 21), hour(7, 22))]);

        assert!((result[0].spot_price_dkk - 149.0).abs() < 1e-9);
        assert!((result[1].spot_price_dkk - 223.5).abs() < 1e-9);
        assert!(result.iter().all(|p| p.estimated_rate == Some(7.45)));
    }

    #[tokio::test]
    async fn test_reference_without_dkk_fails() {
        let source = MockSpotSource::new(Some(raw(hour(7, 21), None, 100.0)));
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        let result = normalizer
            .normalize(vec![raw(hour(8, 0), None, 20.0)])
            .await;
        assert!(matches!(result, Err(PriceError::ReferenceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_empty_reference_response_fails() {
        let source = MockSpotSource::new(None);
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        let result = normalizer
            .normalize(vec![raw(hour(8, 0), None, 20.0)])
            .await;
        assert!(matches!(result, Err(PriceError::ReferenceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_empty_series() {
        let source = MockSpotSource::new(None);
        let calendar = DanishBusinessCalendar::default();
        let normalizer = CurrencyNormalizer::new(&source, &calendar, PriceArea::DkEast);

        assert!(normalizer.normalize(Vec::new()).await.unwrap().is_empty());
    }

    #[test]
    fn test_price_area_parsing() {
        assert_eq!("dk1".parse::<PriceArea>().unwrap(), PriceArea::DkWest);
        assert_eq!("DK2".parse::<PriceArea>().unwrap(), PriceArea::DkEast);
        assert!("SE4".parse::<PriceArea>().is_err());
        assert_eq!(PriceArea::default().to_string(), "DK2");
    }
}
