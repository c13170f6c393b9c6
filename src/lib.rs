pub mod cli;
pub mod core;
pub mod providers;

use crate::cli::prices::PricesArgs;
use crate::core::calendar::DanishBusinessCalendar;
use crate::core::config::AppConfig;
use crate::core::service::PriceService;
use crate::providers::{EloverblikProvider, EnergiDataServiceProvider};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Prices(PricesArgs),
    Serve { port: Option<u16> },
}

/// Wires the configured upstream providers into a price service.
pub fn build_service(config: &AppConfig) -> Result<PriceService> {
    let tz = config.tz()?;
    let timeout = config.request_timeout();

    let spot_source = EnergiDataServiceProvider::new(&config.energidataservice.base_url, timeout, tz)?;
    let tariff_source = EloverblikProvider::new(
        &config.eloverblik.base_url,
        &config.eloverblik.token,
        &config.eloverblik.metering_point,
        timeout,
    )?;

    Ok(PriceService::new(
        Arc::new(spot_source),
        Arc::new(tariff_source),
        Arc::new(DanishBusinessCalendar::new(tz)),
        config.service_options(),
    ))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("elpris starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let service = build_service(&config)?;

    match command {
        AppCommand::Prices(mut args) => {
            args.ignore_missing_tariffs |= config.tariffs.ignore_missing;
            cli::prices::run(&service, &args).await
        }
        AppCommand::Serve { port } => {
            cli::serve::run(
                Arc::new(service),
                port.unwrap_or(config.server.port),
                config.tariffs.ignore_missing,
            )
            .await
        }
    }
}
