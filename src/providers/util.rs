use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::core::error::PriceError;

const USER_AGENT: &str = concat!("elpris/", env!("CARGO_PKG_VERSION"));

/// Builds an HTTP client whose requests give up after `timeout`.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// Either the successful result or the error after all attempts
pub async fn with_retry<F, Fut, T, E>(mut operation: F, retries: usize, delay_ms: u64) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Sends a request, retrying transport failures, and maps the final failure.
pub async fn send_with_retry<F>(source_name: &'static str, build: F) -> Result<reqwest::Response, PriceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    with_retry(|| build().send(), 2, 500)
        .await
        .map_err(|e| transport_error(source_name, &e))
}

pub fn transport_error(source_name: &'static str, err: &reqwest::Error) -> PriceError {
    if err.is_timeout() {
        PriceError::upstream(source_name, format!("request timed out: {err}"))
    } else {
        PriceError::upstream(source_name, format!("request failed: {err}"))
    }
}

/// Fails with the status and a prefix of the body for non-2xx responses.
pub async fn ensure_success(
    source_name: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, PriceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(PriceError::upstream(
        source_name,
        format!("HTTP {status}: {excerpt}"),
    ))
}

/// Reads the body and decodes it as JSON.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    source_name: &'static str,
    response: reqwest::Response,
) -> Result<T, PriceError> {
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(source_name, &e))?;
    serde_json::from_str(&text)
        .map_err(|e| PriceError::malformed(source_name, format!("failed to parse response: {e}")))
}
