//! Login reputation gate.
//!
//! One evaluation walks a fixed sequence of stages:
//!
//! ```text
//! Start -> ConfigValidated -> AddressChecked -> CacheLookup
//!       -> [miss] OriginFetch -> [success] CacheWrite -> Decided
//! ```
//!
//! A configuration error jumps straight to a denial, a skipped address
//! straight to an allow, and a cache hit skips the origin fetch and the
//! write-back. The gate never retries and always ends with a [`Decision`].

use crate::address::{self, CandidateAddress};
use crate::cache::{cache_key, RemoteCache, ScoreCache};
use crate::config::{Config, RawSettings};
use crate::decision::{decide, Decision};
use crate::providers::abuseipdb::AbuseIPDBProvider;
use crate::providers::{Provenance, ReputationError, ReputationProvider, ReputationScore};
use reqwest::Client;
use std::net::Ipv4Addr;
use tracing::{debug, error, info, warn};

/// Steps of one evaluation, in the order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ConfigValidated,
    AddressChecked,
    CacheLookup,
    OriginFetch,
    CacheWrite,
    Decided,
}

/// Outcome of one evaluation along with how it was reached.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: Decision,
    /// Score the decision was based on, if one was obtained.
    pub score: Option<ReputationScore>,
    /// Stages visited, ending with [`Stage::Decided`].
    pub stages: Vec<Stage>,
}

struct Trail {
    stages: Vec<Stage>,
}

impl Trail {
    fn new() -> Self {
        Self {
            stages: vec![Stage::Start],
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn finish(mut self, decision: Decision, score: Option<ReputationScore>) -> Evaluation {
        self.stages.push(Stage::Decided);
        Evaluation {
            decision,
            score,
            stages: self.stages,
        }
    }
}

/// Gate over a validated configuration and its collaborators.
pub struct Gate<'a> {
    config: &'a Config,
    cache: &'a dyn ScoreCache,
    provider: &'a dyn ReputationProvider,
}

impl<'a> Gate<'a> {
    pub fn new(
        config: &'a Config,
        cache: &'a dyn ScoreCache,
        provider: &'a dyn ReputationProvider,
    ) -> Self {
        Self {
            config,
            cache,
            provider,
        }
    }

    /// Evaluate one login from its raw forwarded-address value.
    pub async fn evaluate(&self, forwarded: Option<&str>) -> Evaluation {
        let mut trail = Trail::new();
        trail.enter(Stage::ConfigValidated);
        self.run(forwarded, trail).await
    }

    async fn run(&self, forwarded: Option<&str>, mut trail: Trail) -> Evaluation {
        let candidate = address::resolve(forwarded, self.config);
        trail.enter(Stage::AddressChecked);

        let ip = match candidate {
            CandidateAddress::Evaluable(ip) => ip,
            CandidateAddress::Skipped(reason) => {
                warn!(
                    forwarded = forwarded.unwrap_or_default(),
                    %reason,
                    "Skipping reputation check"
                );
                return trail.finish(
                    Decision::allow(format!("address not evaluated: {reason}")),
                    None,
                );
            }
        };

        let key = cache_key(&ip);
        trail.enter(Stage::CacheLookup);
        let cached = self
            .cache
            .get(&key)
            .await
            .and_then(|value| ReputationScore::new(value, Provenance::Cache));

        let score = match cached {
            Some(score) => score,
            None => {
                trail.enter(Stage::OriginFetch);
                match self.fetch(&ip).await {
                    Ok(score) => {
                        trail.enter(Stage::CacheWrite);
                        self.cache
                            .set(&key, score.value(), self.config.cache_ttl_seconds)
                            .await;
                        score
                    }
                    Err(e) => match self.config.fail_action.resolve_failure(&e) {
                        Ok(fallback) => {
                            warn!(
                                ip = %ip,
                                provider = self.provider.name(),
                                error_kind = e.kind(),
                                error = %e,
                                "Reputation lookup failed, fail-open allows with score 0"
                            );
                            fallback
                        }
                        Err(decision) => {
                            info!(
                                ip = %ip,
                                provider = self.provider.name(),
                                error_kind = e.kind(),
                                error = %e,
                                "Reputation lookup failed, denying login"
                            );
                            return trail.finish(decision, None);
                        }
                    },
                }
            }
        };

        let decision = decide(
            Some(score.value()),
            self.config.block_threshold,
            self.config.fail_action,
        );

        if decision.is_deny() {
            info!(
                ip = %ip,
                score = score.value(),
                provenance = %score.provenance(),
                threshold = self.config.block_threshold,
                "Denying login"
            );
        } else {
            debug!(
                ip = %ip,
                score = score.value(),
                provenance = %score.provenance(),
                threshold = self.config.block_threshold,
                "Allowing login"
            );
        }

        trail.finish(decision, Some(score))
    }

    async fn fetch(&self, ip: &Ipv4Addr) -> Result<ReputationScore, ReputationError> {
        let value = self.provider.check(ip).await?;
        ReputationScore::new(value, Provenance::Origin).ok_or_else(|| {
            ReputationError::MalformedResponse(format!("score {value} out of range"))
        })
    }
}

/// Entry point for the invoking platform.
///
/// Holds one HTTP client shared by every evaluation; configuration is
/// validated afresh on each call.
#[derive(Clone)]
pub struct ReputationGate {
    client: Client,
}

impl ReputationGate {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Run one evaluation.
    pub async fn evaluate(&self, settings: &RawSettings, forwarded: Option<&str>) -> Evaluation {
        let mut trail = Trail::new();

        let config = match Config::from_settings(settings) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Gate configuration invalid, denying login");
                return trail.finish(Decision::deny(format!("configuration error: {e}")), None);
            }
        };
        trail.enter(Stage::ConfigValidated);

        let cache = RemoteCache::new(self.client.clone(), &config);
        let provider = AbuseIPDBProvider::new(self.client.clone(), &config);
        Gate::new(&config, &cache, &provider)
            .run(forwarded, trail)
            .await
    }
}
