//! Configuration for the login reputation gate.
//!
//! Settings arrive as untyped key/value pairs (process environment or a flat
//! YAML file) and are converted once per evaluation into a validated
//! [`Config`]. Validation collects every problem in a single pass so that an
//! operator sees the whole list at once.

use anyhow::Context;
use ipnet::IpNet;
use regex::Regex;
use reqwest::Url;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Setting names understood by the gate.
pub mod keys {
    pub const CACHE_URL: &str = "ABUSEIPDB_CACHE_URL";
    pub const CACHE_TOKEN_READ: &str = "ABUSEIPDB_CACHE_TOKEN_READ";
    pub const CACHE_TOKEN_WRITE: &str = "ABUSEIPDB_CACHE_TOKEN_WRITE";
    pub const CACHE_EXPIRY_SECONDS: &str = "ABUSEIPDB_CACHE_EXPIRY_SECONDS";
    pub const API_KEY: &str = "ABUSEIPDB_API_KEY";
    pub const BLOCK_THRESHOLD: &str = "ABUSEIPDB_BLOCK_THRESHOLD";
    pub const FAIL_OPEN: &str = "ABUSEIPDB_FAIL_OPEN";
    pub const API_URL: &str = "ABUSEIPDB_API_URL";
    pub const MAX_AGE_DAYS: &str = "ABUSEIPDB_MAX_AGE_DAYS";
    pub const TIMEOUT_MS: &str = "ABUSEIPDB_TIMEOUT_MS";
    pub const ALLOWLIST: &str = "ABUSEIPDB_ALLOWLIST";
    pub const TEST_FALSE_POSITIVE: &str = "ABUSEIPDB_TEST_FALSE_POSITIVE";

    /// Every key, in the order they are reported.
    pub const ALL: [&str; 12] = [
        CACHE_URL,
        CACHE_TOKEN_READ,
        CACHE_TOKEN_WRITE,
        CACHE_EXPIRY_SECONDS,
        API_KEY,
        BLOCK_THRESHOLD,
        FAIL_OPEN,
        API_URL,
        MAX_AGE_DAYS,
        TIMEOUT_MS,
        ALLOWLIST,
        TEST_FALSE_POSITIVE,
    ];
}

/// Minimum length of an AbuseIPDB API key.
pub const MIN_API_KEY_LEN: usize = 64;

const DEFAULT_API_URL: &str = "https://api.abuseipdb.com/api/v2";
const DEFAULT_MAX_AGE_DAYS: u32 = 90;
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Upper bound on the per-request timeout.
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Action to take when the reputation lookup fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailAction {
    /// Allow the login when the lookup fails (fail-open).
    Allow,
    /// Deny the login when the lookup fails (fail-closed).
    #[default]
    Block,
}

impl FailAction {
    /// Map the boolean fail-open flag onto an action.
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open {
            FailAction::Allow
        } else {
            FailAction::Block
        }
    }

    pub fn is_fail_open(&self) -> bool {
        matches!(self, FailAction::Allow)
    }
}

/// Untyped configuration source.
#[derive(Clone, Default)]
pub struct RawSettings {
    values: HashMap<String, String>,
}

impl RawSettings {
    /// Read every known key from the process environment.
    pub fn from_env() -> Self {
        let values = keys::ALL
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self { values }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load settings from a flat YAML mapping.
    ///
    /// `${VAR}` references are replaced with environment values before
    /// parsing. Sequences of scalars are joined with commas, so the allowlist
    /// may be written as a YAML list.
    pub fn load_yaml(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let expanded = expand_env_vars(&content)?;
        let document: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&expanded)
            .with_context(|| format!("parsing {}", path.display()))?;

        let mut values = HashMap::new();
        for (key, value) in document {
            let rendered = match value {
                serde_yaml::Value::Null => continue,
                serde_yaml::Value::Sequence(items) => items
                    .iter()
                    .map(|item| scalar_to_string(item).with_context(|| format!("{key} entry")))
                    .collect::<anyhow::Result<Vec<_>>>()?
                    .join(","),
                other => scalar_to_string(&other).with_context(|| key.clone())?,
            };
            values.insert(key, rendered);
        }
        Ok(Self { values })
    }

    /// Trimmed value for `key`; empty values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

impl fmt::Debug for RawSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("RawSettings").field("keys", &names).finish()
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> anyhow::Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => anyhow::bail!("expected a scalar value"),
    }
}

/// One problem found while validating settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigIssue {
    /// The setting this issue refers to.
    pub fn key(&self) -> &'static str {
        match self {
            ConfigIssue::Missing(key) => key,
            ConfigIssue::Invalid { key, .. } => key,
        }
    }
}

/// Every missing or invalid setting found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {}", join_issues(.issues))]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

impl ConfigError {
    /// Whether any issue concerns `key`.
    pub fn mentions(&self, key: &str) -> bool {
        self.issues.iter().any(|issue| issue.key() == key)
    }
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validated gate configuration.
#[derive(Clone)]
pub struct Config {
    /// Cache base URL without a trailing slash.
    pub cache_url: String,
    pub cache_token_read: String,
    pub cache_token_write: String,
    pub cache_ttl_seconds: u64,
    pub api_key: String,
    /// Scores strictly above this value are denied.
    pub block_threshold: u8,
    pub fail_action: FailAction,
    /// Provider base URL without a trailing slash.
    pub api_url: String,
    pub max_age_days: u32,
    /// Bound applied to every network call.
    pub timeout: Duration,
    pub allowlist: Vec<AllowlistEntry>,
    /// Substitute a known-bad address for the client address.
    pub test_false_positive: bool,
}

impl Config {
    /// Validate raw settings into a typed configuration.
    pub fn from_settings(settings: &RawSettings) -> Result<Self, ConfigError> {
        let mut v = Validator {
            settings,
            issues: Vec::new(),
        };

        let cache_url = v.required(keys::CACHE_URL).and_then(|s| v.http_url(keys::CACHE_URL, s));
        let cache_token_read = v.required(keys::CACHE_TOKEN_READ);
        let cache_token_write = v.required(keys::CACHE_TOKEN_WRITE);
        let cache_ttl_seconds = v
            .required(keys::CACHE_EXPIRY_SECONDS)
            .and_then(|s| v.integer(keys::CACHE_EXPIRY_SECONDS, s, 1, i64::MAX, "a positive number"));
        let api_key = v.required(keys::API_KEY).and_then(|s| v.api_key(s));
        let block_threshold = v
            .required(keys::BLOCK_THRESHOLD)
            .and_then(|s| v.integer(keys::BLOCK_THRESHOLD, s, 0, 100, "a number between 0 and 100"));

        let fail_open = v.flag(keys::FAIL_OPEN);
        let test_false_positive = v.flag(keys::TEST_FALSE_POSITIVE);
        let api_url = match v.optional(keys::API_URL) {
            Some(s) => v.http_url(keys::API_URL, s),
            None => Some(DEFAULT_API_URL.to_string()),
        };
        let max_age_days = match v.optional(keys::MAX_AGE_DAYS) {
            Some(s) => v.integer(keys::MAX_AGE_DAYS, s, 1, 365, "a number between 1 and 365"),
            None => Some(i64::from(DEFAULT_MAX_AGE_DAYS)),
        };
        let timeout_ms = match v.optional(keys::TIMEOUT_MS) {
            Some(s) => v.integer(
                keys::TIMEOUT_MS,
                s,
                1,
                MAX_TIMEOUT_MS as i64,
                "a number of milliseconds between 1 and 60000",
            ),
            None => Some(DEFAULT_TIMEOUT_MS as i64),
        };
        let allowlist = v.allowlist();

        match (
            cache_url,
            cache_token_read,
            cache_token_write,
            cache_ttl_seconds,
            api_key,
            block_threshold,
            api_url,
            max_age_days,
            timeout_ms,
        ) {
            (
                Some(cache_url),
                Some(cache_token_read),
                Some(cache_token_write),
                Some(ttl),
                Some(api_key),
                Some(threshold),
                Some(api_url),
                Some(max_age_days),
                Some(timeout_ms),
            ) if v.issues.is_empty() => Ok(Config {
                cache_url,
                cache_token_read: cache_token_read.to_string(),
                cache_token_write: cache_token_write.to_string(),
                cache_ttl_seconds: ttl as u64,
                api_key: api_key.to_string(),
                block_threshold: threshold as u8,
                fail_action: FailAction::from_fail_open(fail_open),
                api_url,
                max_age_days: max_age_days as u32,
                timeout: Duration::from_millis(timeout_ms as u64),
                allowlist,
                test_false_positive,
            }),
            _ => Err(ConfigError { issues: v.issues }),
        }
    }

    /// Check whether an address is covered by the allowlist.
    pub fn is_allowlisted(&self, ip: &IpAddr) -> bool {
        self.allowlist.iter().any(|entry| entry.contains(ip))
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# AbuseIPDB login gate configuration
#
# Every key may also be supplied as an environment variable of the same name.

# Remote key/value cache (REST, bearer authenticated)
ABUSEIPDB_CACHE_URL: "https://example-cache.upstash.io"
ABUSEIPDB_CACHE_TOKEN_READ: "${ABUSEIPDB_CACHE_TOKEN_READ}"
ABUSEIPDB_CACHE_TOKEN_WRITE: "${ABUSEIPDB_CACHE_TOKEN_WRITE}"
ABUSEIPDB_CACHE_EXPIRY_SECONDS: 3600     # must be > 0

# Reputation provider
ABUSEIPDB_API_KEY: "${ABUSEIPDB_API_KEY}" # 64+ alphanumeric characters
ABUSEIPDB_BLOCK_THRESHOLD: 80             # deny when score > threshold (0-100)
ABUSEIPDB_FAIL_OPEN: false                # allow logins when the lookup fails

# Optional
ABUSEIPDB_API_URL: "https://api.abuseipdb.com/api/v2"
ABUSEIPDB_MAX_AGE_DAYS: 90
ABUSEIPDB_TIMEOUT_MS: 5000                # bound for every network call
ABUSEIPDB_ALLOWLIST:                      # never evaluated
  - "10.0.0.0/8"
  - "192.168.0.0/16"
ABUSEIPDB_TEST_FALSE_POSITIVE: false      # check 64.227.0.197 instead of the client
"#
        .to_string()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("cache_url", &self.cache_url)
            .field("cache_token_read", &"<redacted>")
            .field("cache_token_write", &"<redacted>")
            .field("cache_ttl_seconds", &self.cache_ttl_seconds)
            .field("api_key", &"<redacted>")
            .field("block_threshold", &self.block_threshold)
            .field("fail_action", &self.fail_action)
            .field("api_url", &self.api_url)
            .field("max_age_days", &self.max_age_days)
            .field("timeout", &self.timeout)
            .field("allowlist", &self.allowlist)
            .field("test_false_positive", &self.test_false_positive)
            .finish()
    }
}

struct Validator<'a> {
    settings: &'a RawSettings,
    issues: Vec<ConfigIssue>,
}

impl<'a> Validator<'a> {
    fn required(&mut self, key: &'static str) -> Option<&'a str> {
        let settings: &'a RawSettings = self.settings;
        let value = settings.get(key);
        if value.is_none() {
            self.issues.push(ConfigIssue::Missing(key));
        }
        value
    }

    fn optional(&self, key: &'static str) -> Option<&'a str> {
        let settings: &'a RawSettings = self.settings;
        settings.get(key)
    }

    fn invalid(&mut self, key: &'static str, reason: impl Into<String>) {
        self.issues.push(ConfigIssue::Invalid {
            key,
            reason: reason.into(),
        });
    }

    fn integer(&mut self, key: &'static str, raw: &str, min: i64, max: i64, expected: &str) -> Option<i64> {
        match raw.parse::<i64>() {
            Ok(n) if (min..=max).contains(&n) => Some(n),
            Ok(n) => {
                self.invalid(key, format!("{n} is out of range, must be {expected}"));
                None
            }
            Err(_) => {
                self.invalid(key, format!("{raw:?} is not an integer, must be {expected}"));
                None
            }
        }
    }

    fn http_url(&mut self, key: &'static str, raw: &str) -> Option<String> {
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
                Some(raw.trim_end_matches('/').to_string())
            }
            Ok(url) => {
                self.invalid(key, format!("unsupported URL scheme {:?}", url.scheme()));
                None
            }
            Err(e) => {
                self.invalid(key, format!("not a valid URL: {e}"));
                None
            }
        }
    }

    fn api_key(&mut self, raw: &'a str) -> Option<&'a str> {
        if raw.len() < MIN_API_KEY_LEN || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            self.invalid(
                keys::API_KEY,
                format!(
                    "must be at least {MIN_API_KEY_LEN} characters long and contain only letters and numbers"
                ),
            );
            return None;
        }
        Some(raw)
    }

    fn flag(&mut self, key: &'static str) -> bool {
        let Some(raw) = self.optional(key) else {
            return false;
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                self.invalid(key, format!("{raw:?} is not a boolean"));
                false
            }
        }
    }

    fn allowlist(&mut self) -> Vec<AllowlistEntry> {
        let Some(raw) = self.optional(keys::ALLOWLIST) else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match AllowlistEntry::parse(item) {
                Some(entry) => entries.push(entry),
                None => self.invalid(keys::ALLOWLIST, format!("{item:?} is not an IP address or CIDR")),
            }
        }
        entries
    }
}

/// Parsed allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowlistEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl AllowlistEntry {
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(ip) = s.parse::<IpAddr>() {
            Some(AllowlistEntry::Single(ip))
        } else if let Ok(net) = s.parse::<IpNet>() {
            Some(AllowlistEntry::Network(net))
        } else {
            None
        }
    }

    /// Check if an IP address matches this allowlist entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            AllowlistEntry::Single(allowed) => allowed == ip,
            AllowlistEntry::Network(net) => net.contains(ip),
        }
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> anyhow::Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;
    let expanded = re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    });
    Ok(expanded.into_owned())
}
