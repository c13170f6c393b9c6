//! Grid tariffs and their hour-of-day index

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{PriceError, Result};

const SOURCE_NAME: &str = "tariff document";

/// Charges document as returned by the tariff provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChargesDocument {
    #[serde(default)]
    pub result: Vec<ChargesResult>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargesResult {
    #[serde(default)]
    pub result: Option<MeteringPointCharges>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringPointCharges {
    pub metering_point_id: String,
    #[serde(default)]
    pub tariffs: Vec<RawTariff>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTariff {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub period_type: Option<String>,
    #[serde(default)]
    pub prices: Vec<RawTariffPrice>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTariffPrice {
    pub position: String,
    pub price: f64,
}

impl ChargesDocument {
    pub fn tariffs(&self) -> impl Iterator<Item = &RawTariff> {
        self.result
            .iter()
            .filter_map(|r| r.result.as_ref())
            .flat_map(|r| r.tariffs.iter())
    }
}

#[async_trait]
pub trait TariffSource: Send + Sync {
    async fn fetch_charges(&self) -> Result<ChargesDocument>;
}

/// A named tax or tariff component in DKK per kWh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TariffLineItem {
    pub name: String,
    #[serde(skip)]
    pub description: Option<String>,
    #[serde(skip)]
    pub owner: Option<String>,
    pub amount: f64,
}

pub fn line_items_total(items: &[TariffLineItem]) -> f64 {
    items.iter().map(|item| item.amount).sum()
}

/// Line items per zero-based hour-of-day position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TariffIndex {
    positions: BTreeMap<usize, Vec<TariffLineItem>>,
}

impl TariffIndex {
    /// Builds the index from a charges document.
    ///
    /// Every tariff contributes one line item to each position up to the
    /// largest price array in the document. Positions a tariff does not
    /// declare reuse its first declared price, so flat tariffs line up with
    /// time-of-use tariffs. A tariff with a single price is flat whatever
    /// position it declares.
    ///
    /// `position_base` is the provider's usual code for the first position.
    /// A tariff numbering from a lower code, or one whose codes do not fit
    /// the document under that base, is rebased on its own smallest code.
    pub fn build(document: &ChargesDocument, position_base: u32) -> Result<Self> {
        let mut position_count = 0;
        let mut declared = BTreeSet::new();
        for tariff in document.tariffs() {
            position_count = position_count.max(tariff.prices.len());
            for entry in &tariff.prices {
                declared.insert(parse_position(&entry.position)?);
            }
        }
        debug!(position_count, ?declared, "Indexing tariffs");

        let mut positions: BTreeMap<usize, Vec<TariffLineItem>> = BTreeMap::new();
        for tariff in document.tariffs() {
            let Some(first) = tariff.prices.first() else {
                continue;
            };

            let by_position = zero_based_prices(tariff, position_base, position_count)?;
            for position in 0..position_count {
                let amount = by_position.get(&position).copied().unwrap_or(first.price);
                positions.entry(position).or_default().push(TariffLineItem {
                    name: tariff.name.clone(),
                    description: tariff.description.clone(),
                    owner: tariff.owner.clone(),
                    amount,
                });
            }
        }

        Ok(Self { positions })
    }

    /// Line items at `position`, falling back to position 0.
    pub fn at_pos(&self, position: usize) -> &[TariffLineItem] {
        self.positions
            .get(&position)
            .or_else(|| self.positions.get(&0))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn parse_position(position: &str) -> Result<u32> {
    position.trim().parse().map_err(|_| {
        PriceError::malformed(SOURCE_NAME, format!("position '{position}' is not a number"))
    })
}

/// Prices of one tariff keyed by zero-based position.
fn zero_based_prices(
    tariff: &RawTariff,
    position_base: u32,
    position_count: usize,
) -> Result<BTreeMap<usize, f64>> {
    let codes = tariff
        .prices
        .iter()
        .map(|entry| parse_position(&entry.position))
        .collect::<Result<Vec<_>>>()?;
    let (Some(&lowest), Some(&highest)) = (codes.iter().min(), codes.iter().max()) else {
        return Ok(BTreeMap::new());
    };

    let fits = |base: u32| ((highest - base) as usize) < position_count;
    let base = if codes.len() == 1 || lowest < position_base || !fits(position_base) {
        lowest
    } else {
        position_base
    };
    if !fits(base) {
        return Err(PriceError::malformed(
            SOURCE_NAME,
            format!(
                "tariff '{}' declares position {highest} beyond {position_count} positions",
                tariff.name
            ),
        ));
    }

    let mut by_position = BTreeMap::new();
    for (code, entry) in codes.into_iter().zip(&tariff.prices) {
        if by_position.insert((code - base) as usize, entry.price).is_some() {
            return Err(PriceError::malformed(
                SOURCE_NAME,
                format!("tariff '{}' declares position {code} twice", tariff.name),
            ));
        }
    }
    Ok(by_position)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tariff(name: &str, prices: &[f64]) -> RawTariff {
        RawTariff {
            name: name.to_string(),
            description: Some(format!("{name} description")),
            owner: Some("Radius Elnet A/S".to_string()),
            period_type: Some("P1D".to_string()),
            prices: prices
                .iter()
                .enumerate()
                .map(|(i, price)| RawTariffPrice {
                    position: (i + 1).to_string(),
                    price: *price,
                })
                .collect(),
        }
    }

    fn document(tariffs: Vec<RawTariff>) -> ChargesDocument {
        ChargesDocument {
            result: vec![ChargesResult {
                result: Some(MeteringPointCharges {
                    metering_point_id: "571313174112345678".to_string(),
                    tariffs,
                }),
                success: true,
                error_text: None,
            }],
        }
    }

    fn hourly(offset: f64) -> Vec<f64> {
        (0..24).map(|h| offset + h as f64 / 100.0).collect()
    }

    #[test]
    fn test_flat_tariffs_are_identical_at_every_hour() {
        let doc = document(vec![
            tariff("Elafgift", &[0.761]),
            tariff("Transmissions nettarif", &[0.058]),
        ]);
        let index = TariffIndex::build(&doc, 1).unwrap();

        let expected = index.at_pos(0).to_vec();
        assert_eq!(expected.len(), 2);
        for hour in 0..24 {
            assert_eq!(index.at_pos(hour), expected.as_slice());
        }
    }

    #[test]
    fn test_flat_tariff_falls_back_to_default_position() {
        let doc = document(vec![tariff("Elafgift", &[0.10])]);
        let index = TariffIndex::build(&doc, 1).unwrap();

        let items = index.at_pos(5);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Elafgift");
        assert_eq!(items[0].amount, 0.10);
    }

    #[test]
    fn test_flat_and_hourly_tariffs_are_merged() {
        let doc = document(vec![
            tariff("Elafgift", &[0.761]),
            tariff("Nettarif C time", &hourly(0.2)),
        ]);
        let index = TariffIndex::build(&doc, 1).unwrap();

        assert_eq!(index.position_count(), 24);
        for hour in 0..24 {
            let items = index.at_pos(hour);
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].name, "Elafgift");
            assert_eq!(items[0].amount, 0.761);
            assert_eq!(items[1].name, "Nettarif C time");
            assert_eq!(items[1].amount, 0.2 + hour as f64 / 100.0);
        }
    }

    #[test]
    fn test_uneven_tariffs_reuse_first_price() {
        let doc = document(vec![
            tariff("Short", &[1.0, 2.0, 3.0]),
            tariff("Hourly", &hourly(0.0)),
        ]);
        let index = TariffIndex::build(&doc, 1).unwrap();

        assert_eq!(index.at_pos(1)[0].amount, 2.0);
        assert_eq!(index.at_pos(2)[0].amount, 3.0);
        assert_eq!(index.at_pos(3)[0].amount, 1.0);
        assert_eq!(index.at_pos(23)[0].amount, 1.0);
    }

    #[test]
    fn test_tariff_without_prices_contributes_nothing() {
        let doc = document(vec![tariff("Empty", &[]), tariff("Elafgift", &[0.5])]);
        let index = TariffIndex::build(&doc, 1).unwrap();

        for hour in 0..24 {
            let items = index.at_pos(hour);
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].name, "Elafgift");
        }
    }

    fn renumbered(mut tariff: RawTariff, first: usize) -> RawTariff {
        for (i, entry) in tariff.prices.iter_mut().enumerate() {
            entry.position = (first + i).to_string();
        }
        tariff
    }

    #[test]
    fn test_zero_based_positions() {
        let doc = document(vec![
            renumbered(tariff("Hourly", &hourly(0.0)), 0),
            tariff("Flat", &[0.5]),
        ]);

        let index = TariffIndex::build(&doc, 0).unwrap();
        assert_eq!(index.position_count(), 24);
        assert_eq!(index.at_pos(0)[0].amount, 0.0);
        assert_eq!(index.at_pos(7)[0].amount, 0.07);
        for hour in 0..24 {
            assert_eq!(index.at_pos(hour)[1].amount, 0.5);
        }
    }

    #[test]
    fn test_mixed_position_bases_are_aligned() {
        let doc = document(vec![
            tariff("Flat", &[0.5]),
            renumbered(tariff("From zero", &hourly(0.0)), 0),
            renumbered(tariff("From one", &hourly(1.0)), 1),
        ]);

        for base in [0, 1] {
            let index = TariffIndex::build(&doc, base).unwrap();
            assert_eq!(index.position_count(), 24);
            for hour in 0..24 {
                let items = index.at_pos(hour);
                assert_eq!(items.len(), 3);
                assert_eq!(items[0].amount, 0.5);
                assert_eq!(items[1].amount, hour as f64 / 100.0);
                assert_eq!(items[2].amount, 1.0 + hour as f64 / 100.0);
            }
        }
    }

    #[test]
    fn test_single_price_is_flat_with_zero_base() {
        let doc = document(vec![tariff("Flat", &[0.5])]);
        let index = TariffIndex::build(&doc, 0).unwrap();

        for hour in 0..24 {
            assert_eq!(index.at_pos(hour)[0].amount, 0.5);
        }
    }

    #[test]
    fn test_tariff_missing_first_hour_keeps_configured_base() {
        let mut late = tariff("Late", &[1.0, 2.0]);
        late.prices[0].position = "2".to_string();
        late.prices[1].position = "3".to_string();
        let doc = document(vec![late, tariff("Hourly", &hourly(0.0))]);
        let index = TariffIndex::build(&doc, 1).unwrap();

        assert_eq!(index.at_pos(0)[0].amount, 1.0);
        assert_eq!(index.at_pos(1)[0].amount, 1.0);
        assert_eq!(index.at_pos(2)[0].amount, 2.0);
        assert_eq!(index.at_pos(3)[0].amount, 1.0);
    }

    #[test]
    fn test_malformed_positions_are_rejected() {
        let mut bad = tariff("Bad", &[0.1]);
        bad.prices[0].position = "first".to_string();
        let result = TariffIndex::build(&document(vec![bad]), 1);
        assert!(matches!(
            result,
            Err(PriceError::MalformedUpstreamData { .. })
        ));

        let mut sparse = tariff("Sparse", &[0.1, 0.2]);
        sparse.prices[1].position = "40".to_string();
        let result = TariffIndex::build(&document(vec![sparse]), 1);
        assert!(result.is_err());

        let mut duplicate = tariff("Twice", &[0.1, 0.2]);
        duplicate.prices[1].position = "1".to_string();
        let result = TariffIndex::build(&document(vec![duplicate]), 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_index_has_no_line_items() {
        let index = TariffIndex::build(&ChargesDocument::default(), 1).unwrap();
        assert!(index.is_empty());
        assert!(index.at_pos(3).is_empty());
        assert_eq!(line_items_total(index.at_pos(3)), 0.0);
    }

    #[test]
    fn test_document_deserialization() {
        let json = r#"{
            "result": [{
                "result": {
                    "meteringPointId": "571313174112345678",
                    "subscriptions": [],
                    "fees": [],
                    "tariffs": [{
                        "tariffId": "40000",
                        "name": "Elafgift",
                        "description": "Elafgiften",
                        "owner": "Energinet Systemansvar A/S (SYO)",
                        "periodType": "P1D",
                        "validFromDate": "2024-01-01T00:00:00",
                        "validToDate": null,
                        "prices": [{"position": "1", "price": 0.761}]
                    }]
                },
                "success": true,
                "errorCode": 10000,
                "errorText": "NoError",
                "id": "571313174112345678",
                "stackTrace": null
            }]
        }"#;
        let doc: ChargesDocument = serde_json::from_str(json).unwrap();
        let tariffs: Vec<_> = doc.tariffs().collect();
        assert_eq!(tariffs.len(), 1);
        assert_eq!(tariffs[0].name, "Elafgift");
        assert_eq!(tariffs[0].prices[0].position, "1");
    }
}
