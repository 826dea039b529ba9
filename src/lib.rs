//! AbuseIPDB login gate.
//!
//! Decides, once per authentication, whether the client address is
//! trustworthy enough for the session to continue.
//!
//! # Features
//!
//! - **AbuseIPDB lookups** - abuse confidence score per IPv4 address
//! - **Remote score cache** - REST key/value store with per-entry TTL
//! - **Strict configuration** - every problem reported in one pass; a broken
//!   configuration always denies
//! - **Fail-open/closed** - configurable behavior when the lookup fails
//! - **Address screening** - loopback, unknown, malformed and allowlisted
//!   addresses are never looked up
//!
//! # Example
//!
//! ```no_run
//! use abuseipdb_login_gate::{RawSettings, ReputationGate};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let gate = ReputationGate::new()?;
//! let evaluation = gate
//!     .evaluate(&RawSettings::from_env(), Some("203.0.113.7, 10.0.0.1"))
//!     .await;
//! println!("{}", evaluation.decision);
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod cache;
pub mod config;
pub mod decision;
pub mod gate;
pub mod providers;

pub use config::{Config, ConfigError, FailAction, RawSettings};
pub use decision::{decide, Decision, Outcome};
pub use gate::{Evaluation, Gate, ReputationGate, Stage};
