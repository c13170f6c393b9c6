//! Error taxonomy for the price reconciliation core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PriceError {
    /// An upstream service could not be reached or answered with a non-success status.
    #[error("{source_name} unavailable: {message}")]
    UpstreamUnavailable {
        source_name: &'static str,
        message: String,
    },

    /// No usable DKK/EUR reference point, even after the business-day lookup.
    #[error("no DKK/EUR reference rate available: {0}")]
    ReferenceUnavailable(String),

    #[error("failed to refresh stale tariffs: {0}")]
    StaleTariffFetchFailed(#[source] Box<PriceError>),

    #[error("malformed data from {source_name}: {message}")]
    MalformedUpstreamData {
        source_name: &'static str,
        message: String,
    },
}

impl PriceError {
    pub fn upstream(source_name: &'static str, message: impl Into<String>) -> Self {
        PriceError::UpstreamUnavailable {
            source_name,
            message: message.into(),
        }
    }

    pub fn malformed(source_name: &'static str, message: impl Into<String>) -> Self {
        PriceError::MalformedUpstreamData {
            source_name,
            message: message.into(),
        }
    }
}

pub type Result<T, E = PriceError> = std::result::Result<T, E>;
