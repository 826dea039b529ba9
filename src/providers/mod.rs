//! IP reputation providers.

pub mod abuseipdb;

use async_trait::async_trait;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Highest score a provider may report.
pub const MAX_SCORE: u8 = 100;

/// Where a score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Served by the remote cache.
    Cache,
    /// Fetched from the reputation provider.
    Origin,
    /// Substituted after a failed lookup under fail-open.
    FallbackZero,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Cache => "cache",
            Provenance::Origin => "origin",
            Provenance::FallbackZero => "fallback-zero",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abuse confidence score (0-100, higher = worse) tagged with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReputationScore {
    value: u8,
    provenance: Provenance,
}

impl ReputationScore {
    /// Build a score, rejecting values above [`MAX_SCORE`].
    pub fn new(value: u8, provenance: Provenance) -> Option<Self> {
        (value <= MAX_SCORE).then_some(Self { value, provenance })
    }

    /// Minimum-risk score used when a failed lookup is tolerated.
    pub fn fallback_zero() -> Self {
        Self {
            value: 0,
            provenance: Provenance::FallbackZero,
        }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }
}

/// Error from a reputation provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReputationError {
    /// Request could not be sent, or timed out.
    #[error("transport error: {0}")]
    Transport(String),
    /// Provider reported an internal server error.
    #[error("provider server error")]
    Server,
    /// Provider returned an explicit error list.
    #[error("provider rejected the request (HTTP {status}): {messages}")]
    ProviderValidation { status: u16, messages: String },
    /// Error status without a structured error body.
    #[error("provider returned HTTP {status}")]
    HttpStatus { status: u16 },
    /// Response parsed but carried no usable score.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ReputationError {
    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ReputationError::Transport(_) => "transport_error",
            ReputationError::Server => "server_error",
            ReputationError::ProviderValidation { .. } => "provider_validation_error",
            ReputationError::HttpStatus { .. } => "http_status_error",
            ReputationError::MalformedResponse(_) => "malformed_response",
        }
    }
}

impl From<reqwest::Error> for ReputationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ReputationError::Transport(format!("request timed out: {e}"))
        } else {
            ReputationError::Transport(e.to_string())
        }
    }
}

/// Trait for IP reputation providers.
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Look up the abuse confidence score of an address.
    ///
    /// A successful result is always within `0..=MAX_SCORE`.
    async fn check(&self, ip: &Ipv4Addr) -> Result<u8, ReputationError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
