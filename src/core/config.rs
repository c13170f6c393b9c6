use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

use super::service::ServiceOptions;
use super::spot::PriceArea;

const METERING_POINT_LEN: usize = 18;

#[derive(Deserialize, Serialize, Clone)]
pub struct EloverblikConfig {
    pub token: String,
    pub metering_point: String,
    #[serde(default = "EloverblikConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "EloverblikConfig::default_position_base")]
    pub position_base: u32,
}

// Keeps the refresh token out of debug logs
impl std::fmt::Debug for EloverblikConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EloverblikConfig")
            .field("token", &"<redacted>")
            .field("metering_point", &self.metering_point)
            .field("base_url", &self.base_url)
            .field("position_base", &self.position_base)
            .finish()
    }
}

impl EloverblikConfig {
    fn default_base_url() -> String {
        "https://api.eloverblik.dk/customerapi/api".to_string()
    }

    fn default_position_base() -> u32 {
        1
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EnergiDataServiceConfig {
    #[serde(default = "EnergiDataServiceConfig::default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub price_area: PriceArea,
}

impl EnergiDataServiceConfig {
    fn default_base_url() -> String {
        "https://api.energidataservice.dk".to_string()
    }
}

impl Default for EnergiDataServiceConfig {
    fn default() -> Self {
        EnergiDataServiceConfig {
            base_url: Self::default_base_url(),
            price_area: PriceArea::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig { timeout_secs: 30 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TariffConfig {
    #[serde(default = "TariffConfig::default_max_age_hours")]
    pub max_age_hours: i64,
    #[serde(default)]
    pub ignore_missing: bool,
}

impl TariffConfig {
    fn default_max_age_hours() -> i64 {
        24
    }
}

impl Default for TariffConfig {
    fn default() -> Self {
        TariffConfig {
            max_age_hours: Self::default_max_age_hours(),
            ignore_missing: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: 8080 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub eloverblik: EloverblikConfig,
    #[serde(default)]
    pub energidataservice: EnergiDataServiceConfig,
    #[serde(default = "AppConfig::default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tariffs: TariffConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    fn default_timezone() -> String {
        "Europe/Copenhagen".to_string()
    }

    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dk", "elpris", "elpris")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.eloverblik.token.trim().is_empty() {
            bail!("eloverblik.token must not be empty");
        }
        let mid = &self.eloverblik.metering_point;
        if mid.len() != METERING_POINT_LEN || !mid.bytes().all(|b| b.is_ascii_digit()) {
            bail!(
                "eloverblik.metering_point must be {METERING_POINT_LEN} digits, got '{mid}'"
            );
        }
        self.tz()?;
        if self.tariff_max_age().is_none() {
            bail!(
                "tariffs.max_age_hours must be a positive number of hours, got {}",
                self.tariffs.max_age_hours
            );
        }
        if self.http.timeout_secs == 0 {
            bail!("http.timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    fn tariff_max_age(&self) -> Option<TimeDelta> {
        TimeDelta::try_hours(self.tariffs.max_age_hours).filter(|age| *age > TimeDelta::zero())
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            area: self.energidataservice.price_area,
            position_base: self.eloverblik.position_base,
            tariff_max_age: self.tariff_max_age().unwrap_or(TimeDelta::MAX),
        }
    }
}
