//! Allow/deny decisions.
//!
//! Everything here is pure: no I/O, no clock, no shared state.

use crate::config::FailAction;
use crate::providers::{ReputationError, ReputationScore};
use serde::Serialize;
use std::fmt;

pub const REASON_SCORE_EXCEEDS_THRESHOLD: &str = "score exceeds threshold";
pub const REASON_SCORE_WITHIN_THRESHOLD: &str = "score within threshold";
pub const REASON_UNDETERMINED: &str = "reputation undetermined";
pub const REASON_UNDETERMINED_FAIL_OPEN: &str = "reputation undetermined, allowed by fail-open";

/// Whether the login may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allow,
    Deny,
}

/// Final result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Deny,
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    pub fn is_deny(&self) -> bool {
        self.outcome == Outcome::Deny
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Outcome::Allow => write!(f, "allow ({})", self.reason),
            Outcome::Deny => write!(f, "deny ({})", self.reason),
        }
    }
}

/// Map a score (or its absence) onto a decision.
///
/// A score equal to the threshold is allowed; only strictly greater scores
/// are denied. An absent score follows the fail action.
pub fn decide(score: Option<u8>, threshold: u8, fail_action: FailAction) -> Decision {
    match score {
        Some(score) if score > threshold => Decision::deny(REASON_SCORE_EXCEEDS_THRESHOLD),
        Some(_) => Decision::allow(REASON_SCORE_WITHIN_THRESHOLD),
        None => match fail_action {
            FailAction::Allow => Decision::allow(REASON_UNDETERMINED_FAIL_OPEN),
            FailAction::Block => Decision::deny(REASON_UNDETERMINED),
        },
    }
}

impl FailAction {
    /// Resolve a failed lookup.
    ///
    /// Fail-open continues with a minimum-risk score of zero; fail-closed
    /// ends the evaluation with a denial naming the failure.
    pub fn resolve_failure(&self, error: &ReputationError) -> Result<ReputationScore, Decision> {
        match self {
            FailAction::Allow => Ok(ReputationScore::fallback_zero()),
            FailAction::Block => Err(Decision::deny(format!("reputation lookup failed: {error}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provenance;

    #[test]
    fn test_decide_exhaustive() {
        for fail_action in [FailAction::Allow, FailAction::Block] {
            for threshold in 0..=100u8 {
                for score in 0..=100u8 {
                    let decision = decide(Some(score), threshold, fail_action);
                    assert_eq!(
                        decision.is_deny(),
                        score > threshold,
                        "score={score} threshold={threshold}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_equal_score_allowed() {
        let decision = decide(Some(80), 80, FailAction::Block);
        assert_eq!(decision, Decision::allow(REASON_SCORE_WITHIN_THRESHOLD));

        let decision = decide(Some(81), 80, FailAction::Allow);
        assert_eq!(decision, Decision::deny(REASON_SCORE_EXCEEDS_THRESHOLD));
    }

    #[test]
    fn test_absent_score_follows_fail_action() {
        for threshold in 0..=100u8 {
            assert!(decide(None, threshold, FailAction::Allow).is_allow());
            assert_eq!(
                decide(None, threshold, FailAction::Block),
                Decision::deny(REASON_UNDETERMINED)
            );
        }
    }

    #[test]
    fn test_resolve_failure() {
        let error = ReputationError::HttpStatus { status: 503 };

        let score = FailAction::Allow.resolve_failure(&error).unwrap();
        assert_eq!(score.value(), 0);
        assert_eq!(score.provenance(), Provenance::FallbackZero);

        let decision = FailAction::Block.resolve_failure(&error).unwrap_err();
        assert!(decision.is_deny());
        assert_eq!(decision.reason, "reputation lookup failed: provider returned HTTP 503");
    }

    #[test]
    fn test_decision_serializes() {
        let json = serde_json::to_string(&Decision::deny(REASON_SCORE_EXCEEDS_THRESHOLD)).unwrap();
        assert_eq!(json, r#"{"outcome":"deny","reason":"score exceeds threshold"}"#);
        assert_eq!(Decision::allow("ok").to_string(), "allow (ok)");
    }
}
