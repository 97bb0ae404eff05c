//! Pre-submission eligibility and shape checking. Validation only reads; it
//! never mutates anything. Any failure to positively confirm eligibility is
//! a rejection: double-voting prevention outranks availability.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::models::{Ballot, Poll, PollStatus, Selection, TrustTier, ValidBallot, VotingMethod};

/// External identity collaborator. The engine never issues or verifies
/// credentials itself; it only reads the caller's trust tier.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_tier(&self, voter_id: &str) -> Result<TierInfo, IdentityError>;
}

#[derive(Debug, Clone)]
pub struct TierInfo {
    pub tier: TrustTier,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct IdentityError(pub String);

/// Full validation pipeline. `existing` is the voter's latest counted ballot
/// for this poll, if any; the caller looks it up beforehand.
pub async fn validate(
    poll: Option<&Poll>,
    ballot: Ballot,
    identity: &dyn IdentityProvider,
    existing: Option<&Ballot>,
) -> Result<ValidBallot, ValidationError> {
    let poll = poll.ok_or_else(|| ValidationError::PollNotFound(ballot.poll_id.clone()))?;

    match poll.status {
        PollStatus::Active => {}
        PollStatus::Draft => return Err(ValidationError::PollNotActive(poll.status)),
        _ => return Err(ValidationError::PollClosed),
    }
    if Utc::now() >= poll.close_at {
        return Err(ValidationError::PollClosed);
    }

    check_shape(poll, &ballot.selection)?;

    // Fail closed: an unreachable identity provider rejects the ballot
    // rather than assuming eligibility.
    let info = identity
        .user_tier(&ballot.voter_id)
        .await
        .map_err(|e| ValidationError::IdentityUnavailable(e.0))?;
    if info.tier < poll.min_tier {
        return Err(ValidationError::InsufficientTier {
            required: poll.min_tier,
            actual: info.tier,
        });
    }

    if existing.is_some() && !poll.allow_revision {
        return Err(ValidationError::DuplicateVote);
    }

    Ok(ValidBallot::assume_valid(ballot))
}

/// Shape check alone: does the selection conform to the poll's method?
pub fn check_shape(poll: &Poll, selection: &Selection) -> Result<(), ValidationError> {
    match (poll.voting_method, selection) {
        (VotingMethod::SingleChoice, Selection::Single { option_id }) => {
            require_option(poll, option_id)
        }
        (VotingMethod::Approval, Selection::Approval { option_ids }) => {
            require_distinct(option_ids.iter())?;
            for id in option_ids {
                require_option(poll, id)?;
            }
            let limits = poll.approval_limits;
            if option_ids.len() < limits.min || option_ids.len() > limits.max {
                return Err(ValidationError::InvalidSelectionShape(format!(
                    "approval ballot must name between {} and {} options",
                    limits.min, limits.max
                )));
            }
            Ok(())
        }
        (VotingMethod::Ranked, Selection::Ranked { ranking }) => {
            if ranking.is_empty() {
                return Err(ValidationError::InvalidSelectionShape(
                    "ranking must not be empty".into(),
                ));
            }
            require_distinct(ranking.iter())?;
            for id in ranking {
                require_option(poll, id)?;
            }
            Ok(())
        }
        (VotingMethod::Range | VotingMethod::Quadratic, Selection::Scores { scores }) => {
            if scores.is_empty() {
                return Err(ValidationError::InvalidSelectionShape(
                    "at least one option must be scored".into(),
                ));
            }
            require_distinct(scores.iter().map(|s| &s.option_id))?;
            let range = poll.score_range;
            for entry in scores {
                require_option(poll, &entry.option_id)?;
                if entry.score < range.min || entry.score > range.max {
                    return Err(ValidationError::InvalidSelectionShape(format!(
                        "score {} for option {} is outside [{}, {}]",
                        entry.score, entry.option_id, range.min, range.max
                    )));
                }
            }
            Ok(())
        }
        (method, _) => Err(ValidationError::InvalidSelectionShape(format!(
            "selection kind does not fit a {} poll",
            method.as_str()
        ))),
    }
}

fn require_option(poll: &Poll, option_id: &str) -> Result<(), ValidationError> {
    if poll.has_option(option_id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSelectionShape(format!(
            "unknown option: {option_id}"
        )))
    }
}

fn require_distinct<'a>(ids: impl Iterator<Item = &'a String>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateOption(id.clone()));
        }
    }
    Ok(())
}
