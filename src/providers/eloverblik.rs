use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::util::{build_client, ensure_success, read_json, send_with_retry};
use crate::core::error::{PriceError, Result};
use crate::core::tariff::{ChargesDocument, TariffSource};

const SOURCE_NAME: &str = "eloverblik";

/// One initial attempt plus a single re-authentication.
const MAX_AUTH_ATTEMPTS: usize = 2;

/// Tariffs for one metering point from the Eloverblik customer API.
///
/// The configured refresh token is exchanged for a short-lived data access
/// token, which is kept until the API rejects it.
pub struct EloverblikProvider {
    base_url: String,
    refresh_token: String,
    metering_point: String,
    client: reqwest::Client,
    access_token: Mutex<Option<String>>,
}

impl EloverblikProvider {
    pub fn new(
        base_url: &str,
        refresh_token: &str,
        metering_point: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(EloverblikProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            refresh_token: refresh_token.to_string(),
            metering_point: metering_point.to_string(),
            client: build_client(timeout)?,
            access_token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn authenticate(&self) -> Result<String> {
        let url = format!("{}/token", self.base_url);
        debug!("Requesting access token from {}", url);

        let response = send_with_retry(SOURCE_NAME, || {
            self.client.get(&url).bearer_auth(&self.refresh_token)
        })
        .await?;
        let response = ensure_success(SOURCE_NAME, response).await?;
        let body: TokenResponse = read_json(SOURCE_NAME, response).await?;

        match body.result {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(PriceError::malformed(SOURCE_NAME, "token response has no result")),
        }
    }

    async fn post_charges(&self, token: &str) -> Result<reqwest::Response> {
        let url = format!("{}/meteringpoints/meteringpoint/getcharges", self.base_url);
        let body = ChargesRequest {
            metering_points: MeteringPoints {
                metering_point: vec![self.metering_point.clone()],
            },
        };
        debug!("Requesting charges from {}", url);

        send_with_retry(SOURCE_NAME, || {
            self.client.post(&url).bearer_auth(token).json(&body)
        })
        .await
    }
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    result: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChargesRequest {
    metering_points: MeteringPoints,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MeteringPoints {
    metering_point: Vec<String>,
}

fn check_results(document: ChargesDocument) -> Result<ChargesDocument> {
    if let Some(failed) = document.result.iter().find(|r| !r.success) {
        let reason = failed.error_text.as_deref().unwrap_or("unknown error");
        return Err(PriceError::upstream(
            SOURCE_NAME,
            format!("charges request rejected: {reason}"),
        ));
    }
    Ok(document)
}

#[async_trait]
impl TariffSource for EloverblikProvider {
    #[instrument(name = "EloverblikFetch", skip(self), fields(metering_point = %self.metering_point))]
    async fn fetch_charges(&self) -> Result<ChargesDocument> {
        for attempt in 1..=MAX_AUTH_ATTEMPTS {
            let token = self.access_token().await?;
            let response = self.post_charges(&token).await?;

            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    warn!(attempt, status = %response.status(), "Access token rejected");
                    *self.access_token.lock().await = None;
                }
                _ => {
                    let response = ensure_success(SOURCE_NAME, response).await?;
                    let document: ChargesDocument = read_json(SOURCE_NAME, response).await?;
                    debug!(n = document.tariffs().count(), "Received tariffs");
                    return check_results(document);
                }
            }
        }

        Err(PriceError::upstream(
            SOURCE_NAME,
            format!("access token rejected after {MAX_AUTH_ATTEMPTS} attempts"),
        ))
    }
}
