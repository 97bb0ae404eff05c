//! Poll finalization: close, snapshot, tally, publish. Runs exactly once per
//! poll; concurrent callers race on compare-and-set status transitions and
//! all but one back off.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use sha2::{Digest, Sha256};

use crate::audit::{self, AuditSink, TransitionEvent};
use crate::db::SqliteStore;
use crate::error::{FinalizeError, StoreError};
use crate::merkle::MerkleTree;
use crate::models::{
    Ballot, ExcludedBallot, Poll, PollSnapshot, PollStatus, TieBreakPolicy, ValidBallot,
    VoteResult,
};
use crate::processor::with_retry;
use crate::voting;

#[derive(Debug)]
pub enum FinalizeOutcome {
    Finalized { snapshot: PollSnapshot, result: VoteResult },
    /// The poll was already finalized; the stored snapshot and result are
    /// returned unchanged.
    AlreadyFinalized { snapshot: PollSnapshot, result: VoteResult },
}

pub struct FinalizeManager {
    store: Arc<SqliteStore>,
    audit: Arc<dyn AuditSink>,
}

impl FinalizeManager {
    pub fn new(store: Arc<SqliteStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn finalize(&self, poll_id: &str) -> Result<FinalizeOutcome, FinalizeError> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or_else(|| FinalizeError::PollNotFound(poll_id.to_string()))?;

        match poll.status {
            PollStatus::Finalized => {
                let snapshot = self
                    .store
                    .get_snapshot(poll_id)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                let result = self
                    .store
                    .get_result(poll_id)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                return Ok(FinalizeOutcome::AlreadyFinalized { snapshot, result });
            }
            PollStatus::Finalizing => return Err(FinalizeError::RetryLater),
            PollStatus::Draft => {
                return Err(FinalizeError::PollNotActive(poll_id.to_string(), poll.status));
            }
            PollStatus::Active => {
                if !self
                    .store
                    .cas_poll_status(poll_id, PollStatus::Active, PollStatus::Closed)
                    .await?
                {
                    // Another caller is ahead of us.
                    return Err(FinalizeError::RetryLater);
                }
                self.record(poll_id, "active", "closing").await;
            }
            PollStatus::Closed => {}
        }

        if !self
            .store
            .cas_poll_status(poll_id, PollStatus::Closed, PollStatus::Finalizing)
            .await?
        {
            return Err(FinalizeError::RetryLater);
        }
        self.record(poll_id, "closing", "snapshotting").await;

        let ballots = self.store.get_ballots(poll_id).await?;
        let (official, excluded, revised_count) = partition_official(&poll, ballots);

        let canonical = audit::canonical_ballots(&official);
        let checksum = audit::checksum(&canonical);
        let tie_break = TieBreakPolicy::Seeded { seed: derive_seed(poll_id, &checksum) };

        let leaves: Vec<String> = official.iter().map(|b| b.leaf_hash()).collect();
        let merkle_root = MerkleTree::from_leaves(leaves)
            .root()
            .unwrap_or("")
            .to_string();

        let snapshot = PollSnapshot {
            poll_id: poll_id.to_string(),
            official_count: official.len() as u64,
            excluded,
            revised_count,
            checksum,
            merkle_root,
            tie_break,
            created_at: Utc::now(),
        };
        self.record(poll_id, "snapshotting", "tallying").await;

        let result = voting::tally(&poll, &official, &snapshot.tie_break);
        if let Err(reason) = voting::verify_outcome(&result.outcome) {
            // Fatal: leave the poll in finalizing for an operator to inspect.
            error!("tally self-check failed for poll {poll_id}: {reason}");
            return Err(FinalizeError::Computation(reason));
        }

        with_retry(|| self.store.insert_snapshot_and_result(&snapshot, &result)).await?;

        if !self
            .store
            .cas_poll_status(poll_id, PollStatus::Finalizing, PollStatus::Finalized)
            .await?
        {
            return Err(FinalizeError::RetryLater);
        }
        self.record(poll_id, "tallying", "finalized").await;
        info!(
            "poll {poll_id} finalized: {} official ballots, root {}",
            snapshot.official_count, snapshot.merkle_root
        );

        Ok(FinalizeOutcome::Finalized { snapshot, result })
    }

    /// Build the audit export for a finalized poll.
    pub async fn export(&self, poll_id: &str) -> Result<audit::AuditExport, FinalizeError> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or_else(|| FinalizeError::PollNotFound(poll_id.to_string()))?;
        if poll.status != PollStatus::Finalized {
            return Err(FinalizeError::PollNotActive(poll_id.to_string(), poll.status));
        }
        let snapshot = self
            .store
            .get_snapshot(poll_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let result = self
            .store
            .get_result(poll_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let ballots = self.store.get_ballots(poll_id).await?;
        let (official, _, _) = partition_official(&poll, ballots);
        Ok(audit::export(&poll, &snapshot, &official, &result))
    }

    async fn record(&self, poll_id: &str, from: &str, to: &str) {
        let event = TransitionEvent::new(poll_id, from, to);
        self.audit.record(&event).await;
        if let Err(err) = self.store.append_audit_event(&event).await {
            warn!("audit event persist failed for poll {poll_id}: {err}");
        }
    }
}

/// Split the raw ballot list into the official set (sorted by id), the
/// excluded ballots, and the count of superseded revisions.
pub(crate) fn partition_official(
    poll: &Poll,
    ballots: Vec<Ballot>,
) -> (Vec<ValidBallot>, Vec<ExcludedBallot>, u64) {
    let mut excluded = Vec::new();
    let mut in_window = Vec::new();
    for ballot in ballots {
        if ballot.submitted_at < poll.close_at {
            in_window.push(ballot);
        } else {
            excluded.push(ExcludedBallot {
                ballot_id: ballot.id,
                reason: "post-close".to_string(),
            });
        }
    }

    let mut revised_count = 0;
    let official: Vec<Ballot> = if poll.allow_revision {
        // Latest ballot per voter wins; get_ballots orders by submission time.
        let mut latest: std::collections::HashMap<String, Ballot> = std::collections::HashMap::new();
        for ballot in in_window {
            if latest.insert(ballot.voter_id.clone(), ballot).is_some() {
                revised_count += 1;
            }
        }
        latest.into_values().collect()
    } else {
        in_window
    };

    let mut official: Vec<ValidBallot> =
        official.into_iter().map(ValidBallot::assume_valid).collect();
    official.sort_by(|a, b| a.id.cmp(&b.id));
    excluded.sort_by(|a, b| a.ballot_id.cmp(&b.ballot_id));
    (official, excluded, revised_count)
}

/// Tie-break seed bound to the ballot set: the first eight bytes of
/// sha256 over the poll id and snapshot checksum. Recorded in the snapshot,
/// so any verifier can reproduce elimination order.
pub(crate) fn derive_seed(poll_id: &str, checksum: &str) -> u64 {
    let digest = Sha256::digest(format!("tiebreak:{poll_id}:{checksum}").as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest has 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Selection, TrustTier, VotingMethod};

    fn poll(allow_revision: bool) -> Poll {
        let mut poll = Poll::new(
            "test".into(),
            vec!["a".into(), "b".into()],
            VotingMethod::SingleChoice,
            Utc::now() + chrono::Duration::hours(1),
            TrustTier::T0,
            allow_revision,
        );
        poll.status = PollStatus::Active;
        poll
    }

    fn ballot(poll: &Poll, voter: &str, key: &str) -> Ballot {
        Ballot::new(
            poll.id.clone(),
            voter.into(),
            Selection::Single { option_id: poll.options[0].id.clone() },
            key.into(),
        )
    }

    #[test]
    fn post_close_ballots_are_excluded_with_a_reason() {
        let poll = poll(false);
        let timely = ballot(&poll, "v1", "k1");
        let mut late = ballot(&poll, "v2", "k2");
        late.submitted_at = poll.close_at + chrono::Duration::seconds(5);
        let late_id = late.id.clone();

        let (official, excluded, revised) = partition_official(&poll, vec![timely, late]);
        assert_eq!(official.len(), 1);
        assert_eq!(revised, 0);
        assert_eq!(
            excluded,
            vec![ExcludedBallot { ballot_id: late_id, reason: "post-close".into() }]
        );
    }

    #[test]
    fn revisions_keep_only_the_latest_per_voter() {
        let poll = poll(true);
        let first = ballot(&poll, "v1", "k1");
        let mut second = ballot(&poll, "v1", "k2");
        second.submitted_at = first.submitted_at + chrono::Duration::seconds(10);
        let second_id = second.id.clone();

        let (official, excluded, revised) = partition_official(&poll, vec![first, second]);
        assert_eq!(official.len(), 1);
        assert_eq!(official[0].id, second_id);
        assert_eq!(revised, 1);
        assert!(excluded.is_empty());
    }

    #[test]
    fn official_set_is_sorted_by_ballot_id() {
        let poll = poll(false);
        let ballots: Vec<Ballot> = (0..5).map(|i| ballot(&poll, &format!("v{i}"), "k")).collect();
        let (official, _, _) = partition_official(&poll, ballots);
        let ids: Vec<&str> = official.iter().map(|b| b.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn seed_is_deterministic_and_input_bound() {
        assert_eq!(derive_seed("p1", "abc"), derive_seed("p1", "abc"));
        assert_ne!(derive_seed("p1", "abc"), derive_seed("p1", "abd"));
        assert_ne!(derive_seed("p1", "abc"), derive_seed("p2", "abc"));
    }
}
