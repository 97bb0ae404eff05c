use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub options: Vec<PollOption>,
    pub voting_method: VotingMethod,
    pub status: PollStatus,
    pub close_at: DateTime<Utc>,
    pub min_tier: TrustTier,
    pub allow_revision: bool,
    pub score_range: ScoreRange,
    pub approval_limits: ApprovalLimits,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub label: String,
}

/// Inclusive bounds for per-option scores (range voting) or credits (quadratic).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: i64,
    pub max: i64,
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self { min: 0, max: 10 }
    }
}

/// How many distinct options an approval ballot may name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApprovalLimits {
    pub min: usize,
    pub max: usize,
}

impl Default for ApprovalLimits {
    fn default() -> Self {
        Self { min: 1, max: usize::MAX }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    SingleChoice,
    Approval,
    Ranked,
    Quadratic,
    Range,
}

impl VotingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotingMethod::SingleChoice => "single_choice",
            VotingMethod::Approval => "approval",
            VotingMethod::Ranked => "ranked",
            VotingMethod::Quadratic => "quadratic",
            VotingMethod::Range => "range",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single_choice" => Some(VotingMethod::SingleChoice),
            "approval" => Some(VotingMethod::Approval),
            "ranked" => Some(VotingMethod::Ranked),
            "quadratic" => Some(VotingMethod::Quadratic),
            "range" => Some(VotingMethod::Range),
            _ => None,
        }
    }
}

/// Poll lifecycle. Transitions are strictly forward; a finalized poll never
/// re-opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Draft,
    Active,
    Closed,
    Finalizing,
    Finalized,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Draft => "draft",
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
            PollStatus::Finalizing => "finalizing",
            PollStatus::Finalized => "finalized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PollStatus::Draft),
            "active" => Some(PollStatus::Active),
            "closed" => Some(PollStatus::Closed),
            "finalizing" => Some(PollStatus::Finalizing),
            "finalized" => Some(PollStatus::Finalized),
            _ => None,
        }
    }

    /// Forward-only transition check.
    pub fn can_advance_to(&self, next: PollStatus) -> bool {
        next > *self
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally verified assurance level. Higher tiers satisfy polls requiring
/// lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrustTier {
    T0,
    T1,
    T2,
    T3,
}

impl TrustTier {
    pub fn level(&self) -> u8 {
        match self {
            TrustTier::T0 => 0,
            TrustTier::T1 => 1,
            TrustTier::T2 => 2,
            TrustTier::T3 => 3,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(TrustTier::T0),
            1 => Some(TrustTier::T1),
            2 => Some(TrustTier::T2),
            3 => Some(TrustTier::T3),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.level())
    }
}

/// The selections on a ballot. The shape must match the poll's voting method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    Single { option_id: String },
    Approval { option_ids: Vec<String> },
    Ranked { ranking: Vec<String> },
    Scores { scores: Vec<OptionScore> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionScore {
    pub option_id: String,
    pub score: i64,
}

/// One voter's submitted selections. Immutable once persisted; a revision is
/// a new ballot that supersedes by recency, never an update in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub id: String,
    pub poll_id: String,
    pub voter_id: String,
    pub selection: Selection,
    pub submitted_at: DateTime<Utc>,
    pub idempotency_key: String,
}

impl Ballot {
    pub fn new(
        poll_id: String,
        voter_id: String,
        selection: Selection,
        idempotency_key: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            poll_id,
            voter_id,
            selection,
            submitted_at: Utc::now(),
            idempotency_key,
        }
    }

    /// Commitment leaf for this ballot, fed into the poll's Merkle tree.
    pub fn leaf_hash(&self) -> String {
        let selection =
            serde_json::to_string(&self.selection).expect("serialisation is infallible");
        let data = format!(
            "{}:{}:{}:{}:{}",
            self.id,
            self.poll_id,
            self.voter_id,
            selection,
            self.submitted_at.timestamp()
        );
        hex::encode(Sha256::digest(data.as_bytes()))
    }
}

/// A ballot that passed validation. Only the validator mints these for fresh
/// submissions; ballots read back from the store were validated on submit.
#[derive(Debug, Clone)]
pub struct ValidBallot(Ballot);

impl ValidBallot {
    pub(crate) fn assume_valid(ballot: Ballot) -> Self {
        Self(ballot)
    }

    pub fn into_inner(self) -> Ballot {
        self.0
    }
}

impl std::ops::Deref for ValidBallot {
    type Target = Ballot;

    fn deref(&self) -> &Ballot {
        &self.0
    }
}

/// Returned by the processor on successful submission. Resubmitting with the
/// same idempotency key replays the original receipt unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub ballot_id: String,
    pub poll_id: String,
    pub ballot_hash: String,
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionReceipt {
    pub fn for_ballot(ballot: &Ballot) -> Self {
        Self {
            ballot_id: ballot.id.clone(),
            poll_id: ballot.poll_id.clone(),
            ballot_hash: ballot.leaf_hash(),
            submitted_at: ballot.submitted_at,
        }
    }
}

/// Elimination tie-break policy, recorded with the snapshot so elimination
/// order is reproducible by an independent verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Among candidates tied for last, eliminate the lexicographically
    /// greatest option id.
    OptionOrder,
    /// Deterministic draw keyed by a recorded seed, the round number and the
    /// candidate id.
    Seeded { seed: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionCount {
    pub option_id: String,
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRating {
    pub option_id: String,
    pub total: i64,
    pub ballots: u64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionInfluence {
    pub option_id: String,
    pub credits: i64,
    pub quadratic_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    Elimination,
    Exhausted,
}

/// One grouped redistribution after an elimination. `to` is absent when the
/// ballots ran out of preferences and became exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTransfer {
    pub from: String,
    pub to: Option<String>,
    pub count: u64,
    pub reason: TransferReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundCount {
    pub option_id: String,
    pub votes: u64,
    /// Share of this round's non-exhausted ballots.
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrvRound {
    pub round: u32,
    pub counts: Vec<RoundCount>,
    /// Non-exhausted ballots in this round; the majority denominator.
    pub continuing_ballots: u64,
    pub eliminated: Vec<String>,
    pub transfers: Vec<VoteTransfer>,
}

/// Method-specific tally outcome. Each variant keeps its own result shape;
/// there is deliberately no shared "vote count" field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Outcome {
    SingleChoice {
        counts: Vec<OptionCount>,
        winners: Vec<String>,
    },
    Approval {
        approvals: Vec<OptionCount>,
        winners: Vec<String>,
    },
    Range {
        ratings: Vec<OptionRating>,
        winners: Vec<String>,
    },
    Quadratic {
        influence: Vec<OptionInfluence>,
        winners: Vec<String>,
    },
    Ranked {
        winner: Option<String>,
        tied: Vec<String>,
        rounds: Vec<IrvRound>,
        total_rounds: u32,
        /// Votes needed for a majority in the deciding round.
        quota: u64,
        exhausted: u64,
        no_candidates: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    pub poll_id: String,
    pub voting_method: VotingMethod,
    pub outcome: Outcome,
    pub invalid_ballots: u64,
    pub computed_at: DateTime<Utc>,
}

impl VoteResult {
    /// Digest over everything except `computed_at`, so re-running the tally
    /// on the same snapshot produces a comparable value.
    pub fn digest(&self) -> String {
        #[derive(Serialize)]
        struct View<'a> {
            poll_id: &'a str,
            voting_method: VotingMethod,
            outcome: &'a Outcome,
            invalid_ballots: u64,
        }
        let view = View {
            poll_id: &self.poll_id,
            voting_method: self.voting_method,
            outcome: &self.outcome,
            invalid_ballots: self.invalid_ballots,
        };
        let bytes = serde_json::to_vec(&view).expect("serialisation is infallible");
        hex::encode(Sha256::digest(&bytes))
    }
}

/// A ballot retained for audit but excluded from the official tally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedBallot {
    pub ballot_id: String,
    pub reason: String,
}

/// Immutable, checksummed record of the official ballot set at finalize
/// time. Created exactly once per poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSnapshot {
    pub poll_id: String,
    pub official_count: u64,
    pub excluded: Vec<ExcludedBallot>,
    /// Ballots superseded by a later revision from the same voter.
    pub revised_count: u64,
    /// sha256 over the canonical serialization of the official ballot set.
    pub checksum: String,
    /// Merkle root over per-ballot leaf hashes. Empty for an empty ballot set.
    pub merkle_root: String,
    pub tie_break: TieBreakPolicy,
    pub created_at: DateTime<Utc>,
}

impl PollSnapshot {
    /// Root plus leaf count, the publishable commitment summary.
    pub fn commitment_log(&self) -> CommitmentLog {
        CommitmentLog {
            merkle_root: self.merkle_root.clone(),
            leaf_count: self.official_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentLog {
    pub merkle_root: String,
    pub leaf_count: u64,
}

impl Poll {
    pub fn new(
        title: String,
        option_labels: Vec<String>,
        voting_method: VotingMethod,
        close_at: DateTime<Utc>,
        min_tier: TrustTier,
        allow_revision: bool,
    ) -> Self {
        let options = option_labels
            .into_iter()
            .map(|label| PollOption {
                id: Uuid::new_v4().to_string(),
                label,
            })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            title,
            options,
            voting_method,
            status: PollStatus::Draft,
            close_at,
            min_tier,
            allow_revision,
            score_range: ScoreRange::default(),
            approval_limits: ApprovalLimits::default(),
            created_at: Utc::now(),
        }
    }

    pub fn option_ids(&self) -> Vec<String> {
        self.options.iter().map(|o| o.id.clone()).collect()
    }

    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_forward_only() {
        assert!(PollStatus::Active.can_advance_to(PollStatus::Closed));
        assert!(PollStatus::Closed.can_advance_to(PollStatus::Finalizing));
        assert!(PollStatus::Finalizing.can_advance_to(PollStatus::Finalized));
        assert!(!PollStatus::Finalized.can_advance_to(PollStatus::Active));
        assert!(!PollStatus::Closed.can_advance_to(PollStatus::Active));
        assert!(!PollStatus::Active.can_advance_to(PollStatus::Active));
    }

    #[test]
    fn tier_ordering_matches_levels() {
        assert!(TrustTier::T3 > TrustTier::T0);
        assert!(TrustTier::T1 >= TrustTier::T1);
        assert_eq!(TrustTier::from_level(2), Some(TrustTier::T2));
        assert_eq!(TrustTier::from_level(9), None);
    }

    #[test]
    fn leaf_hash_is_stable_for_identical_ballots() {
        let ballot = Ballot::new(
            "poll-1".into(),
            "voter-1".into(),
            Selection::Single { option_id: "opt-a".into() },
            "key-1".into(),
        );
        assert_eq!(ballot.leaf_hash(), ballot.leaf_hash());

        let mut other = ballot.clone();
        other.selection = Selection::Single { option_id: "opt-b".into() };
        assert_ne!(ballot.leaf_hash(), other.leaf_hash());
    }

    #[test]
    fn result_digest_ignores_computed_at() {
        let outcome = Outcome::SingleChoice {
            counts: vec![OptionCount { option_id: "a".into(), votes: 2 }],
            winners: vec!["a".into()],
        };
        let a = VoteResult {
            poll_id: "p".into(),
            voting_method: VotingMethod::SingleChoice,
            outcome: outcome.clone(),
            invalid_ballots: 0,
            computed_at: Utc::now(),
        };
        let b = VoteResult {
            computed_at: a.computed_at + chrono::Duration::hours(1),
            ..a.clone()
        };
        assert_eq!(a.digest(), b.digest());
    }
}
