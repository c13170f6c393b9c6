use super::prices::{DEFAULT_HOURS, requested_window, simple_prices};
use crate::core::error::PriceError;
use crate::core::price::FullPrice;
use crate::core::service::PriceService;
use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ServerState {
    pub service: Arc<PriceService>,
    pub ignore_missing_tariffs: bool,
}

#[derive(Serialize)]
struct PricesBody<'a> {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    contents: &'a [FullPrice],
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    cached_from: Option<DateTime<Utc>>,
    cached_to: Option<DateTime<Utc>>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/powerPrices", get(power_prices_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub fn status_for(err: &PriceError) -> StatusCode {
    match err {
        PriceError::ReferenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PriceError::UpstreamUnavailable { .. }
        | PriceError::StaleTariffFetchFailed(_)
        | PriceError::MalformedUpstreamData { .. } => StatusCode::BAD_GATEWAY,
    }
}

async fn power_prices_handler(
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let hours = match params.get("hours") {
        None => DEFAULT_HOURS,
        Some(raw) => match raw.parse::<i64>() {
            Ok(hours) => hours,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("Error parsing {raw} as integer"),
                )
                    .into_response();
            }
        },
    };
    let simple = params.get("simple").is_some_and(|s| !s.is_empty());

    let Some((from, to)) = requested_window(Utc::now(), hours) else {
        return (StatusCode::BAD_REQUEST, format!("{hours} hours is out of range")).into_response();
    };

    match state
        .service
        .prices(from, to, state.ignore_missing_tariffs)
        .await
    {
        Ok(set) if simple => Json(simple_prices(set.prices())).into_response(),
        Ok(set) => Json(PricesBody {
            from: set.from(),
            to: set.to(),
            contents: set.prices(),
        })
        .into_response(),
        Err(err) => {
            warn!(error = %err, "Failed to get prices");
            (status_for(&err), err.to_string()).into_response()
        }
    }
}

async fn health_handler(State(state): State<ServerState>) -> Json<HealthBody> {
    let cached = state.service.cache().snapshot().await;
    Json(HealthBody {
        status: "ok",
        cached_from: cached.as_ref().and_then(|set| set.from()),
        cached_to: cached.as_ref().and_then(|set| set.to()),
    })
}

pub async fn run(service: Arc<PriceService>, port: u16, ignore_missing_tariffs: bool) -> Result<()> {
    if let Err(err) = service.preload_tariffs().await {
        if !ignore_missing_tariffs {
            return Err(err).context("Failed to preload tariffs");
        }
        warn!(error = %err, "Failed to preload tariffs, continuing without them");
    }

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    let app = router(ServerState {
        service,
        ignore_missing_tariffs,
    });
    axum::serve(listener, app).await.context("Server error")
}
