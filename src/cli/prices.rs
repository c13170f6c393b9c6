use super::ui;
use crate::core::cache::PriceSet;
use crate::core::price::{FullPrice, SimplePrice};
use crate::core::service::PriceService;
use anyhow::{Context, Result};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use comfy_table::{Cell, CellAlignment, Color};

pub const DEFAULT_HOURS: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Simple,
}

#[derive(Debug, Clone)]
pub struct PricesArgs {
    pub hours: i64,
    pub format: OutputFormat,
    pub ignore_missing_tariffs: bool,
}

/// `[from, to)` covering `hours` hours from the start of the current hour.
///
/// Returns `None` if the end does not fit in a timestamp.
pub fn requested_window(
    now: DateTime<Utc>,
    hours: i64,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let from = now.duration_trunc(TimeDelta::hours(1)).unwrap_or(now);
    let to = from.checked_add_signed(TimeDelta::try_hours(hours)?)?;
    Some((from, to))
}

pub fn simple_prices(prices: &[FullPrice]) -> Vec<SimplePrice> {
    prices.iter().map(SimplePrice::from).collect()
}

pub fn display_as_table(set: &PriceSet) -> String {
    if set.is_empty() {
        return ui::style_text("No prices available for the requested hours", ui::StyleType::Error);
    }

    let mut table = ui::new_styled_table();

    table.set_header(vec![
        ui::header_cell("From"),
        ui::header_cell("To"),
        ui::header_cell("Spot (kr/kWh)"),
        ui::header_cell("Taxes (kr/kWh)"),
        ui::header_cell("Total ex VAT"),
        ui::header_cell("Total inc VAT"),
    ]);

    let cheapest = set
        .prices()
        .iter()
        .map(|p| p.total_inc_vat)
        .fold(f64::INFINITY, f64::min);

    for price in set.prices() {
        let spot = if price.estimated {
            Cell::new(format!("{:.4}*", price.raw_price)).fg(Color::Yellow)
        } else {
            Cell::new(format!("{:.4}", price.raw_price))
        };
        let total = ui::format_price_cell(price.total_inc_vat, price.total_inc_vat == cheapest);

        table.add_row(vec![
            Cell::new(price.valid_from.format("%a %d %b %H:%M")),
            Cell::new(price.valid_to.format("%H:%M")),
            spot.set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.4}", price.taxes_subtotal)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.4}", price.total)).set_alignment(CellAlignment::Right),
            total,
        ]);
    }

    let mut output = format!(
        "{}\n\n",
        ui::style_text("Electricity prices", ui::StyleType::Title)
    );
    output.push_str(&table.to_string());

    if let Some(rate) = set.prices().iter().find_map(|p| p.estimated_rate) {
        output.push_str(&ui::style_text(
            &format!("\n* estimated from EUR at {rate:.4} DKK/EUR"),
            ui::StyleType::Subtle,
        ));
    }
    output
}

pub fn render(set: &PriceSet, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(display_as_table(set)),
        OutputFormat::Json => serde_json::to_string_pretty(set.prices())
            .context("Failed to serialize prices"),
        OutputFormat::Simple => serde_json::to_string_pretty(&simple_prices(set.prices()))
            .context("Failed to serialize prices"),
    }
}

pub async fn run(service: &PriceService, args: &PricesArgs) -> Result<()> {
    let (from, to) = requested_window(Utc::now(), args.hours)
        .with_context(|| format!("{} hours is out of range", args.hours))?;

    let spinner = ui::new_spinner("Fetching prices...");
    let result = service.prices(from, to, args.ignore_missing_tariffs).await;
    spinner.finish_and_clear();

    let set = result.context("Failed to get prices")?;
    println!("{}", render(&set, args.format)?);
    Ok(())
}
