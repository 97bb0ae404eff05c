pub mod approval;
pub mod irv;
pub mod quadratic;
pub mod range;
pub mod ranked;
pub mod single_choice;

use chrono::Utc;

use crate::models::{Outcome, Poll, TieBreakPolicy, ValidBallot, VoteResult, VotingMethod};

/// Dispatch the poll's ballots to its voting method. The method set is
/// closed, so this is a plain match rather than dynamic dispatch; each arm
/// returns that method's own result shape.
pub fn tally(poll: &Poll, ballots: &[ValidBallot], tie_break: &TieBreakPolicy) -> VoteResult {
    let (outcome, invalid_ballots) = match poll.voting_method {
        VotingMethod::SingleChoice => single_choice::tally(poll, ballots),
        VotingMethod::Approval => approval::tally(poll, ballots),
        VotingMethod::Range => range::tally(poll, ballots),
        VotingMethod::Quadratic => quadratic::tally(poll, ballots),
        VotingMethod::Ranked => ranked::tally(poll, ballots, tie_break),
    };

    VoteResult {
        poll_id: poll.id.clone(),
        voting_method: poll.voting_method,
        outcome,
        invalid_ballots,
        computed_at: Utc::now(),
    }
}

/// Sanity-check an outcome before it is persisted. Ranked results carry
/// enough structure to cross-check; other methods have nothing to contradict.
pub fn verify_outcome(outcome: &Outcome) -> Result<(), String> {
    match outcome {
        Outcome::Ranked { rounds, .. } => irv::verify_rounds(rounds),
        _ => Ok(()),
    }
}
