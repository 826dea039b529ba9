//! AbuseIPDB reputation provider.
//!
//! The response body has been observed in several shapes depending on how
//! it was relayed, so the score is located by trying a fixed list of
//! [`ExtractionRule`]s in priority order instead of deserializing into a
//! single struct.

use super::{ReputationError, ReputationProvider, MAX_SCORE};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, warn};

/// Field names that may carry the confidence score, most specific first.
const SCORE_FIELDS: [&str; 2] = ["abuseConfidenceScore", "score"];

/// Message AbuseIPDB puts in the body of internal failures.
const SERVER_ERROR_MESSAGE: &str = "Server Error";

/// Where in the response document to look for the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionRule {
    /// `data.data.<score>`: provider body wrapped in a relay envelope.
    DoublyNested,
    /// `data.<score>`: the provider's documented shape.
    SinglyNested,
    /// `<score>` at the top level.
    TopLevel,
}

impl ExtractionRule {
    /// Rules in the order they are attempted.
    pub const PRIORITY: [ExtractionRule; 3] = [
        ExtractionRule::DoublyNested,
        ExtractionRule::SinglyNested,
        ExtractionRule::TopLevel,
    ];

    fn container<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        match self {
            ExtractionRule::DoublyNested => doc.get("data")?.get("data"),
            ExtractionRule::SinglyNested => doc.get("data"),
            ExtractionRule::TopLevel => Some(doc),
        }
    }

    /// Apply this rule; yields a score only if it is numeric and in range.
    pub fn apply(&self, doc: &Value) -> Option<u8> {
        let container = self.container(doc)?;
        SCORE_FIELDS
            .iter()
            .find_map(|field| container.get(*field).and_then(score_from_json))
    }
}

/// First score found by the rules in [`ExtractionRule::PRIORITY`].
pub fn extract_score(doc: &Value) -> Option<(ExtractionRule, u8)> {
    ExtractionRule::PRIORITY
        .iter()
        .find_map(|rule| rule.apply(doc).map(|score| (*rule, score)))
}

fn score_from_json(value: &Value) -> Option<u8> {
    if let Some(n) = value.as_u64() {
        return u8::try_from(n).ok().filter(|n| *n <= MAX_SCORE);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && (0.0..=f64::from(MAX_SCORE)).contains(&f) {
        Some(f as u8)
    } else {
        None
    }
}

/// Turn a provider response into a score or a classified failure.
///
/// Checks run in a fixed order: server error marker, explicit error list,
/// error status, then score extraction.
pub fn classify_response(status: u16, body: &str) -> Result<u8, ReputationError> {
    let doc: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    if doc.get("message").and_then(Value::as_str) == Some(SERVER_ERROR_MESSAGE) {
        return Err(ReputationError::Server);
    }

    if let Some(errors) = doc.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages = errors
                .iter()
                .map(|err| {
                    err.get("detail")
                        .or_else(|| err.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("unspecified error")
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ReputationError::ProviderValidation { status, messages });
        }
    }

    if status >= 400 {
        return Err(ReputationError::HttpStatus { status });
    }

    match extract_score(&doc) {
        Some((rule, score)) => {
            debug!(?rule, score, "Extracted abuse confidence score");
            Ok(score)
        }
        None if doc.is_null() => Err(ReputationError::MalformedResponse(
            "response body is not JSON".to_string(),
        )),
        None => Err(ReputationError::MalformedResponse(
            "no abuse confidence score in range 0-100 at any known path".to_string(),
        )),
    }
}

/// AbuseIPDB reputation provider.
pub struct AbuseIPDBProvider {
    client: Client,
    api_url: String,
    api_key: String,
    max_age_days: u32,
    timeout: Duration,
}

impl AbuseIPDBProvider {
    /// Create a provider over a shared HTTP client.
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            max_age_days: config.max_age_days,
            timeout: config.timeout,
        }
    }

    fn check_url(&self, ip: &Ipv4Addr) -> String {
        format!(
            "{}/check?ipAddress={}&maxAgeInDays={}&verbose=true",
            self.api_url, ip, self.max_age_days
        )
    }
}

#[async_trait]
impl ReputationProvider for AbuseIPDBProvider {
    async fn check(&self, ip: &Ipv4Addr) -> Result<u8, ReputationError> {
        debug!(ip = %ip, "Querying AbuseIPDB");

        let response = self
            .client
            .get(self.check_url(ip))
            .header("Key", &self.api_key)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        let result = classify_response(status, &body);
        if let Err(ref e) = result {
            warn!(
                ip = %ip,
                status,
                error_kind = e.kind(),
                error = %e,
                body = %truncate(&body, 512),
                "AbuseIPDB lookup failed"
            );
        }
        result
    }

    fn name(&self) -> &str {
        "abuseipdb"
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
