//! Client address extraction and eligibility.
//!
//! Only public-looking IPv4 addresses are worth a reputation lookup. Anything
//! else (no address, the `unknown` sentinel, loopback, malformed input) is
//! skipped and the login proceeds without evaluation.

use crate::config::Config;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// Placeholder the platform reports when it has no client address.
pub const UNKNOWN_SENTINEL: &str = "unknown";

/// Address substituted for the client when end-to-end deny testing is on.
pub const KNOWN_BAD_TEST_IP: Ipv4Addr = Ipv4Addr::new(64, 227, 0, 197);

/// Result of classifying a candidate address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateAddress {
    /// Eligible for a reputation lookup.
    Evaluable(Ipv4Addr),
    /// Not evaluated; the gate allows without a lookup.
    Skipped(SkipReason),
}

/// Why an address was not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No address, or the platform's `unknown` placeholder.
    Unknown,
    Loopback,
    /// Not a strict dotted-quad IPv4 address.
    Malformed,
    Allowlisted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unknown => "unknown",
            SkipReason::Loopback => "loopback",
            SkipReason::Malformed => "malformed",
            SkipReason::Allowlisted => "allowlisted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First entry of a forwarded-address list, trimmed.
///
/// `X-Forwarded-For: client, proxy1, proxy2` yields `client`. A missing or
/// empty value yields the `unknown` sentinel.
pub fn first_forwarded(raw: Option<&str>) -> &str {
    raw.and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SENTINEL)
}

/// Classify a single candidate address.
pub fn classify(candidate: &str) -> CandidateAddress {
    if candidate.eq_ignore_ascii_case(UNKNOWN_SENTINEL) {
        return CandidateAddress::Skipped(SkipReason::Unknown);
    }
    if candidate.eq_ignore_ascii_case("localhost") {
        return CandidateAddress::Skipped(SkipReason::Loopback);
    }
    match parse_dotted_quad(candidate) {
        Some(ip) if ip.is_loopback() => CandidateAddress::Skipped(SkipReason::Loopback),
        Some(ip) => CandidateAddress::Evaluable(ip),
        None => CandidateAddress::Skipped(SkipReason::Malformed),
    }
}

/// Resolve the address the gate should evaluate for one login.
///
/// Applies the known-bad test substitution and the configured allowlist on
/// top of [`classify`].
pub fn resolve(forwarded: Option<&str>, config: &Config) -> CandidateAddress {
    if config.test_false_positive {
        warn!(
            forwarded = forwarded.unwrap_or_default(),
            substitute = %KNOWN_BAD_TEST_IP,
            "Test false positive enabled, evaluating known-bad address instead of client"
        );
        return CandidateAddress::Evaluable(KNOWN_BAD_TEST_IP);
    }
    match classify(first_forwarded(forwarded)) {
        CandidateAddress::Evaluable(ip) if config.is_allowlisted(&IpAddr::V4(ip)) => {
            CandidateAddress::Skipped(SkipReason::Allowlisted)
        }
        other => other,
    }
}

/// Strict IPv4 dotted-quad parser: four decimal octets of one to three
/// digits each, every octet within 0-255, nothing else.
fn parse_dotted_quad(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse::<u8>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}
