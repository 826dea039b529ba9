//! In-process stand-ins for the REST cache and the AbuseIPDB API.

#![allow(dead_code)]

use abuseipdb_login_gate::config::keys;
use abuseipdb_login_gate::RawSettings;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const READ_TOKEN: &str = "read-token";
pub const WRITE_TOKEN: &str = "write-token";
pub const API_KEY: &str = "a1b2c3d4e5f6a7b8c9d0a1b2c3d4e5f6a7b8c9d0a1b2c3d4e5f6a7b8c9d0abcd";

/// Request the provider endpoint last received.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub query: HashMap<String, String>,
    pub key_header: Option<String>,
    pub accept_header: Option<String>,
}

/// Write the cache endpoint last received.
#[derive(Debug, Clone, Default)]
pub struct CacheWrite {
    pub key: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Clone)]
pub struct MockState {
    pub store: Arc<Mutex<HashMap<String, String>>>,
    pub cache_status: Arc<Mutex<StatusCode>>,
    pub cache_delay: Arc<Mutex<Duration>>,
    pub cache_gets: Arc<AtomicUsize>,
    pub cache_sets: Arc<AtomicUsize>,
    pub last_write: Arc<Mutex<Option<CacheWrite>>>,
    pub provider_status: Arc<Mutex<StatusCode>>,
    pub provider_body: Arc<Mutex<String>>,
    pub provider_delay: Arc<Mutex<Duration>>,
    pub provider_hits: Arc<AtomicUsize>,
    pub last_request: Arc<Mutex<Option<ProviderRequest>>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            store: Arc::default(),
            cache_status: Arc::new(Mutex::new(StatusCode::OK)),
            cache_delay: Arc::new(Mutex::new(Duration::ZERO)),
            cache_gets: Arc::default(),
            cache_sets: Arc::default(),
            last_write: Arc::default(),
            provider_status: Arc::new(Mutex::new(StatusCode::OK)),
            provider_body: Arc::new(Mutex::new(score_body(0))),
            provider_delay: Arc::new(Mutex::new(Duration::ZERO)),
            provider_hits: Arc::default(),
            last_request: Arc::default(),
        }
    }
}

impl MockState {
    pub fn respond(&self, status: StatusCode, body: impl Into<String>) {
        *self.provider_status.lock().unwrap() = status;
        *self.provider_body.lock().unwrap() = body.into();
    }

    pub fn respond_with_score(&self, score: u8) {
        self.respond(StatusCode::OK, score_body(score));
    }

    pub fn delay_provider(&self, delay: Duration) {
        *self.provider_delay.lock().unwrap() = delay;
    }

    /// Stall both cache endpoints for `delay` before answering.
    pub fn delay_cache(&self, delay: Duration) {
        *self.cache_delay.lock().unwrap() = delay;
    }

    async fn cache_stall(&self) {
        let delay = *self.cache_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn fail_cache(&self, status: StatusCode) {
        *self.cache_status.lock().unwrap() = status;
    }

    pub fn seed(&self, key: &str, value: &str) {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.store.lock().unwrap().get(key).cloned()
    }

    pub fn provider_hits(&self) -> usize {
        self.provider_hits.load(Ordering::SeqCst)
    }

    pub fn cache_gets(&self) -> usize {
        self.cache_gets.load(Ordering::SeqCst)
    }

    pub fn cache_sets(&self) -> usize {
        self.cache_sets.load(Ordering::SeqCst)
    }
}

/// Provider body in the documented `data.abuseConfidenceScore` shape.
pub fn score_body(score: u8) -> String {
    json!({
        "data": {
            "ipAddress": "203.0.113.50",
            "isPublic": true,
            "abuseConfidenceScore": score,
            "countryCode": "US",
            "isTor": false,
            "totalReports": 3
        }
    })
    .to_string()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn cache_get(
    State(state): State<MockState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.cache_gets.fetch_add(1, Ordering::SeqCst);
    state.cache_stall().await;

    let status = *state.cache_status.lock().unwrap();
    if status != StatusCode::OK {
        return (status, "cache unavailable".to_string());
    }
    if header_value(&headers, "authorization").as_deref() != Some(format!("Bearer {READ_TOKEN}").as_str()) {
        return (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" }).to_string());
    }

    let result = state.stored(&key);
    (StatusCode::OK, json!({ "result": result }).to_string())
}

async fn cache_set(
    State(state): State<MockState>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    state.cache_sets.fetch_add(1, Ordering::SeqCst);

    let authorization = header_value(&headers, "authorization");
    *state.last_write.lock().unwrap() = Some(CacheWrite {
        key: key.clone(),
        query,
        authorization: authorization.clone(),
        body: body.clone(),
    });
    state.cache_stall().await;

    let status = *state.cache_status.lock().unwrap();
    if status != StatusCode::OK {
        return (status, "cache unavailable".to_string());
    }
    if authorization.as_deref() != Some(format!("Bearer {WRITE_TOKEN}").as_str()) {
        return (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" }).to_string());
    }

    state.seed(&key, body.trim());
    (StatusCode::OK, json!({ "result": "OK" }).to_string())
}

async fn provider_check(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.provider_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_request.lock().unwrap() = Some(ProviderRequest {
        query,
        key_header: header_value(&headers, "key"),
        accept_header: header_value(&headers, "accept"),
    });

    let delay = *state.provider_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let status = *state.provider_status.lock().unwrap();
    let body = state.provider_body.lock().unwrap().clone();
    (status, [(header::CONTENT_TYPE, "application/json")], body)
}

/// Start the mock on an ephemeral port and return its base URL.
pub async fn spawn(state: MockState) -> String {
    let app = Router::new()
        .route("/cache/get/{key}", get(cache_get))
        .route("/cache/set/{key}", post(cache_set))
        .route("/api/v2/check", get(provider_check))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Base URL of a port nothing listens on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Complete, valid settings pointing at `base_url`.
pub fn settings(base_url: &str, threshold: u8, fail_open: bool) -> RawSettings {
    RawSettings::from_pairs([
        (keys::CACHE_URL, format!("{base_url}/cache")),
        (keys::CACHE_TOKEN_READ, READ_TOKEN.to_string()),
        (keys::CACHE_TOKEN_WRITE, WRITE_TOKEN.to_string()),
        (keys::CACHE_EXPIRY_SECONDS, "3600".to_string()),
        (keys::API_KEY, API_KEY.to_string()),
        (keys::BLOCK_THRESHOLD, threshold.to_string()),
        (keys::FAIL_OPEN, fail_open.to_string()),
        (keys::API_URL, format!("{base_url}/api/v2")),
        (keys::TIMEOUT_MS, "1000".to_string()),
    ])
}
