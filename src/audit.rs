//! Audit surface: structured finalize transition events, the canonical
//! serialization of the official ballot set, and the portable export a
//! standalone verifier can use to re-derive the published result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{Ballot, Poll, PollSnapshot, Selection, ValidBallot, VoteResult};
use crate::{merkle, voting};

/// One finalize state transition, emitted to the compliance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub poll_id: String,
    pub from_state: String,
    pub to_state: String,
    pub at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(poll_id: &str, from_state: &str, to_state: &str) -> Self {
        Self {
            poll_id: poll_id.to_string(),
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            at: Utc::now(),
        }
    }
}

/// Where transition events go. Recording is best effort and must never fail
/// the transition itself.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &TransitionEvent);
}

/// Default sink: structured log lines.
pub struct LogSink;

#[async_trait]
impl AuditSink for LogSink {
    async fn record(&self, event: &TransitionEvent) {
        info!(
            "audit poll_id={} from={} to={} at={}",
            event.poll_id,
            event.from_state,
            event.to_state,
            event.at.to_rfc3339()
        );
    }
}

/// The canonical, language-agnostic view of one official ballot. Field order
/// and ballot-id ordering are fixed, so the serialization (and therefore the
/// checksum) is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBallot {
    pub id: String,
    pub voter_id: String,
    pub selection: Selection,
    pub submitted_at: DateTime<Utc>,
}

impl From<&Ballot> for CanonicalBallot {
    fn from(ballot: &Ballot) -> Self {
        Self {
            id: ballot.id.clone(),
            voter_id: ballot.voter_id.clone(),
            selection: ballot.selection.clone(),
            submitted_at: ballot.submitted_at,
        }
    }
}

/// Canonical form of the official ballot set: one record per ballot, sorted
/// by ballot id.
pub fn canonical_ballots(official: &[ValidBallot]) -> Vec<CanonicalBallot> {
    let mut ballots: Vec<CanonicalBallot> =
        official.iter().map(|b| CanonicalBallot::from(&**b)).collect();
    ballots.sort_by(|a, b| a.id.cmp(&b.id));
    ballots
}

/// sha256 over the canonical serialization.
pub fn checksum(ballots: &[CanonicalBallot]) -> String {
    let bytes = serde_json::to_vec(ballots).expect("serialisation is infallible");
    hex::encode(Sha256::digest(&bytes))
}

/// Everything an independent verifier needs to re-derive the stored result:
/// the poll definition, the snapshot, the official ballots in canonical
/// order, and the result as published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    pub version: u32,
    pub poll: Poll,
    pub snapshot: PollSnapshot,
    pub ballots: Vec<CanonicalBallot>,
    pub result: VoteResult,
    pub result_digest: String,
}

pub fn export(
    poll: &Poll,
    snapshot: &PollSnapshot,
    official: &[ValidBallot],
    result: &VoteResult,
) -> AuditExport {
    AuditExport {
        version: 1,
        poll: poll.clone(),
        snapshot: snapshot.clone(),
        ballots: canonical_ballots(official),
        result: result.clone(),
        result_digest: result.digest(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checksum_ok: bool,
    pub merkle_ok: bool,
    pub result_ok: bool,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.checksum_ok && self.merkle_ok && self.result_ok
    }
}

/// Independently re-derive checksum, Merkle root and tally from the export
/// and compare against what it claims. Pure; touches no storage.
pub fn verify_export(export: &AuditExport) -> VerificationReport {
    let mut ballots = export.ballots.clone();
    ballots.sort_by(|a, b| a.id.cmp(&b.id));
    let checksum_ok = checksum(&ballots) == export.snapshot.checksum;

    let rebuilt: Vec<ValidBallot> = ballots
        .iter()
        .map(|c| {
            ValidBallot::assume_valid(Ballot {
                id: c.id.clone(),
                poll_id: export.snapshot.poll_id.clone(),
                voter_id: c.voter_id.clone(),
                selection: c.selection.clone(),
                submitted_at: c.submitted_at,
                // Not part of the commitment; receipts are not re-derived.
                idempotency_key: String::new(),
            })
        })
        .collect();

    let leaves: Vec<String> = rebuilt.iter().map(|b| b.leaf_hash()).collect();
    let root = merkle::MerkleTree::from_leaves(leaves)
        .root()
        .unwrap_or("")
        .to_string();
    let merkle_ok = root == export.snapshot.merkle_root;

    let recomputed = voting::tally(&export.poll, &rebuilt, &export.snapshot.tie_break);
    let result_ok =
        recomputed.digest() == export.result_digest && export.result.digest() == export.result_digest;

    VerificationReport { checksum_ok, merkle_ok, result_ok }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Outcome, PollStatus, TieBreakPolicy, TrustTier, VotingMethod,
    };

    fn make_poll() -> Poll {
        let mut poll = Poll::new(
            "favourite letter".into(),
            vec!["a".into(), "b".into()],
            VotingMethod::SingleChoice,
            Utc::now() + chrono::Duration::hours(1),
            TrustTier::T0,
            false,
        );
        poll.status = PollStatus::Active;
        for (i, opt) in poll.options.iter_mut().enumerate() {
            opt.id = ["a", "b"][i].to_string();
        }
        poll
    }

    fn ballots_for(poll: &Poll) -> Vec<ValidBallot> {
        ["v1", "v2", "v3"]
            .iter()
            .map(|v| {
                ValidBallot::assume_valid(Ballot::new(
                    poll.id.clone(),
                    v.to_string(),
                    Selection::Single { option_id: "a".into() },
                    format!("key-{v}"),
                ))
            })
            .collect()
    }

    fn snapshot_for(poll: &Poll, official: &[ValidBallot]) -> PollSnapshot {
        let canonical = canonical_ballots(official);
        let mut sorted: Vec<&ValidBallot> = official.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let leaves: Vec<String> = sorted.iter().map(|b| b.leaf_hash()).collect();
        PollSnapshot {
            poll_id: poll.id.clone(),
            official_count: official.len() as u64,
            excluded: Vec::new(),
            revised_count: 0,
            checksum: checksum(&canonical),
            merkle_root: merkle::MerkleTree::from_leaves(leaves)
                .root()
                .unwrap_or("")
                .to_string(),
            tie_break: TieBreakPolicy::Seeded { seed: 5 },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn checksum_ignores_input_order() {
        let poll = make_poll();
        let ballots = ballots_for(&poll);
        let forward = canonical_ballots(&ballots);
        let reversed: Vec<ValidBallot> = ballots.iter().rev().cloned().collect();
        let backward = canonical_ballots(&reversed);
        assert_eq!(checksum(&forward), checksum(&backward));
    }

    #[test]
    fn export_round_trips_through_verification() {
        let poll = make_poll();
        let ballots = ballots_for(&poll);
        let snapshot = snapshot_for(&poll, &ballots);
        let result = voting::tally(&poll, &ballots, &snapshot.tie_break);
        let export = export(&poll, &snapshot, &ballots, &result);

        // Serialize and parse back, as a real verifier would.
        let json = serde_json::to_string(&export).unwrap();
        let parsed: AuditExport = serde_json::from_str(&json).unwrap();
        let report = verify_export(&parsed);
        assert!(report.is_ok(), "report: {report:?}");
    }

    #[test]
    fn tampered_ballot_breaks_checksum_and_root() {
        let poll = make_poll();
        let ballots = ballots_for(&poll);
        let snapshot = snapshot_for(&poll, &ballots);
        let result = voting::tally(&poll, &ballots, &snapshot.tie_break);
        let mut export = export(&poll, &snapshot, &ballots, &result);
        export.ballots[0].selection = Selection::Single { option_id: "b".into() };

        let report = verify_export(&export);
        assert!(!report.checksum_ok);
        assert!(!report.merkle_ok);
    }

    #[test]
    fn doctored_result_is_detected() {
        let poll = make_poll();
        let ballots = ballots_for(&poll);
        let snapshot = snapshot_for(&poll, &ballots);
        let result = voting::tally(&poll, &ballots, &snapshot.tie_break);
        let mut export = export(&poll, &snapshot, &ballots, &result);
        if let Outcome::SingleChoice { winners, .. } = &mut export.result.outcome {
            *winners = vec!["b".into()];
        }
        export.result_digest = export.result.digest();

        let report = verify_export(&export);
        assert!(report.checksum_ok);
        assert!(!report.result_ok);
    }
}
