//! Score cache for reputation lookups.
//!
//! The gate talks to a REST key/value store (Upstash-style `GET /get/{key}`
//! and `POST /set/{key}?EX={ttl}`). Cache trouble never affects a decision:
//! a failed read is a miss and a failed write is logged and dropped.

use crate::config::Config;
use crate::providers::MAX_SCORE;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Namespace for score entries in a shared cache.
pub const CACHE_KEY_PREFIX: &str = "abuseipdb:ip:";

/// Cache key for an address.
pub fn cache_key(ip: &Ipv4Addr) -> String {
    format!("{CACHE_KEY_PREFIX}{ip}")
}

/// Best-effort score storage.
#[async_trait]
pub trait ScoreCache: Send + Sync {
    /// Cached score for `key`, or `None` on a miss or any failure.
    async fn get(&self, key: &str) -> Option<u8>;

    /// Store `score` under `key` for `ttl_seconds`. Failures are swallowed.
    async fn set(&self, key: &str, score: u8, ttl_seconds: u64);
}

/// Why a cache call did not produce a usable answer.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("cache returned HTTP {0}")]
    Status(u16),
    #[error("malformed cache payload: {0}")]
    Malformed(String),
}

/// Parse the body of a cache read.
///
/// Accepts `{"result": ...}` and the relayed `{"data": {"result": ...}}`.
/// A null or absent result is a plain miss. A present value must be an
/// integer (or stringified integer) within 0-100.
pub fn parse_cached_score(body: &str) -> Result<Option<u8>, CacheError> {
    let doc: Value =
        serde_json::from_str(body).map_err(|e| CacheError::Malformed(e.to_string()))?;

    let result = ["/data/result", "/result"]
        .iter()
        .find_map(|pointer| doc.pointer(pointer).filter(|v| !v.is_null()));

    let Some(result) = result else {
        return Ok(None);
    };

    let parsed = match result {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };

    match parsed {
        Some(n) if (0..=i64::from(MAX_SCORE)).contains(&n) => Ok(Some(n as u8)),
        _ => Err(CacheError::Malformed(format!("unusable score value {result}"))),
    }
}

/// REST key/value cache client.
pub struct RemoteCache {
    client: Client,
    base_url: String,
    read_token: String,
    write_token: String,
    timeout: Duration,
}

impl RemoteCache {
    /// Create a cache client over a shared HTTP client.
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.cache_url.clone(),
            read_token: config.cache_token_read.clone(),
            write_token: config.cache_token_write.clone(),
            timeout: config.timeout,
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<u8>, CacheError> {
        let response = self
            .client
            .get(format!("{}/get/{}", self.base_url, key))
            .bearer_auth(&self.read_token)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CacheError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_cached_score(&body)
    }

    async fn try_set(&self, key: &str, score: u8, ttl_seconds: u64) -> Result<(), CacheError> {
        let response = self
            .client
            .post(format!("{}/set/{}?EX={}", self.base_url, key, ttl_seconds))
            .bearer_auth(&self.write_token)
            .timeout(self.timeout)
            .json(&score)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CacheError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ScoreCache for RemoteCache {
    async fn get(&self, key: &str) -> Option<u8> {
        match self.try_get(key).await {
            Ok(Some(score)) => {
                debug!(key, score, "Cache hit");
                Some(score)
            }
            Ok(None) => {
                debug!(key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, score: u8, ttl_seconds: u64) {
        match self.try_set(key, score, ttl_seconds).await {
            Ok(()) => debug!(key, score, ttl_seconds, "Cached reputation score"),
            Err(e) => warn!(key, error = %e, "Cache write failed, continuing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key(&Ipv4Addr::new(1, 2, 3, 4)), "abuseipdb:ip:1.2.3.4");
    }

    #[test]
    fn test_parse_cached_score_hit() {
        assert_eq!(parse_cached_score(r#"{"result":"42"}"#).unwrap(), Some(42));
        assert_eq!(parse_cached_score(r#"{"data":{"result":"0"}}"#).unwrap(), Some(0));
        assert_eq!(parse_cached_score(r#"{"result":100}"#).unwrap(), Some(100));
    }

    #[test]
    fn test_parse_cached_score_miss() {
        assert_eq!(parse_cached_score(r#"{"result":null}"#).unwrap(), None);
        assert_eq!(parse_cached_score(r#"{"data":{}}"#).unwrap(), None);
        assert_eq!(parse_cached_score("{}").unwrap(), None);
    }

    #[test]
    fn test_parse_cached_score_malformed() {
        for body in [
            r#"{"result":"101"}"#,
            r#"{"result":"-1"}"#,
            r#"{"result":"forty"}"#,
            r#"{"result":"4.5"}"#,
            r#"{"result":true}"#,
            "<html>",
        ] {
            assert!(
                matches!(parse_cached_score(body), Err(CacheError::Malformed(_))),
                "{body}"
            );
        }
    }
}
