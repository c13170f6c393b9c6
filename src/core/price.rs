//! Consumer prices and the summarizer combining spot prices with tariffs

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use super::spot::SpotPrice;
use super::tariff::{TariffIndex, TariffLineItem, line_items_total};

/// Fixed Danish VAT of 25%.
pub const VAT_MULTIPLIER: f64 = 1.25;

/// Final price per kWh for one hour, all amounts in DKK.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullPrice {
    pub valid_from: DateTime<Tz>,
    pub valid_to: DateTime<Tz>,
    pub taxes: Vec<TariffLineItem>,
    #[serde(rename = "dkk_estimated")]
    pub estimated: bool,
    #[serde(rename = "rate", skip_serializing_if = "Option::is_none")]
    pub estimated_rate: Option<f64>,
    #[serde(rename = "spot_price_ex_vat")]
    pub raw_price: f64,
    #[serde(rename = "taxes_subtotal_ex_vat")]
    pub taxes_subtotal: f64,
    #[serde(rename = "total_ex_vat")]
    pub total: f64,
    pub total_inc_vat: f64,
}

impl FullPrice {
    /// True if `[valid_from, valid_to)` lies within `[from, to)`.
    pub fn in_window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.valid_from >= from && self.valid_to <= to
    }
}

/// Compact rendering used by the `simple` output mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplePrice {
    pub period: String,
    pub price: String,
}

impl From<&FullPrice> for SimplePrice {
    fn from(price: &FullPrice) -> Self {
        SimplePrice {
            period: format!(
                "{} - {}",
                price.valid_from.format("%H:%M"),
                price.valid_to.format("%H:%M")
            ),
            price: format!("{:.2} kr.", price.total_inc_vat),
        }
    }
}

/// Combines normalized spot prices with the tariffs in effect at each local hour.
///
/// Produces exactly one record per input record, in input order.
pub fn summarize(spot_prices: &[SpotPrice], tariffs: &TariffIndex, tz: Tz) -> Vec<FullPrice> {
    spot_prices
        .iter()
        .map(|spot| {
            let valid_from = spot.hour_utc.with_timezone(&tz);
            let taxes = tariffs.at_pos(valid_from.hour() as usize).to_vec();
            let taxes_subtotal = line_items_total(&taxes);
            // Spot prices are per MWh
            let raw_price = spot.spot_price_dkk / 1000.0;
            let total = taxes_subtotal + raw_price;

            FullPrice {
                valid_to: (spot.hour_utc + TimeDelta::hours(1)).with_timezone(&tz),
                valid_from,
                taxes,
                estimated: spot.is_estimated(),
                estimated_rate: spot.estimated_rate,
                raw_price,
                taxes_subtotal,
                total,
                total_inc_vat: total * VAT_MULTIPLIER,
            }
        })
        .collect()
}
