use crate::models::{Outcome, Poll, Selection, TieBreakPolicy, ValidBallot};
use crate::voting::irv;

/// Ranked-choice tally. All the algorithmic work lives in [`irv`]; this
/// module only extracts rankings and packages the outcome.
pub fn tally(poll: &Poll, ballots: &[ValidBallot], tie_break: &TieBreakPolicy) -> (Outcome, u64) {
    let mut rankings: Vec<Vec<String>> = Vec::with_capacity(ballots.len());
    let mut invalid: u64 = 0;

    for ballot in ballots {
        match &ballot.selection {
            Selection::Ranked { ranking } if ranking.iter().all(|id| poll.has_option(id)) => {
                rankings.push(ranking.clone());
            }
            _ => invalid += 1,
        }
    }

    let outcome = irv::run(&poll.option_ids(), &rankings, tie_break);
    (
        Outcome::Ranked {
            winner: outcome.winner,
            tied: outcome.tied,
            rounds: outcome.rounds,
            total_rounds: outcome.total_rounds,
            quota: outcome.quota,
            exhausted: outcome.exhausted,
            no_candidates: outcome.no_candidates,
        },
        invalid,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ballot, TrustTier, VotingMethod};
    use chrono::Utc;

    fn poll_with_options(ids: &[&str]) -> Poll {
        let mut poll = Poll::new(
            "test".into(),
            Vec::new(),
            VotingMethod::Ranked,
            Utc::now() + chrono::Duration::hours(1),
            TrustTier::T0,
            false,
        );
        poll.options = ids
            .iter()
            .map(|id| crate::models::PollOption { id: id.to_string(), label: id.to_string() })
            .collect();
        poll
    }

    fn ranked(poll_id: &str, voter: &str, ranking: &[&str]) -> ValidBallot {
        ValidBallot::assume_valid(Ballot::new(
            poll_id.into(),
            voter.into(),
            Selection::Ranked { ranking: ranking.iter().map(|s| s.to_string()).collect() },
            format!("key-{voter}"),
        ))
    }

    #[test]
    fn delegates_to_irv() {
        let poll = poll_with_options(&["a", "b", "c"]);
        let ballots = vec![
            ranked(&poll.id, "v1", &["a", "b", "c"]),
            ranked(&poll.id, "v2", &["a", "b", "c"]),
            ranked(&poll.id, "v3", &["b", "a", "c"]),
        ];
        let (outcome, invalid) = tally(&poll, &ballots, &TieBreakPolicy::OptionOrder);
        assert_eq!(invalid, 0);
        match outcome {
            Outcome::Ranked { winner, total_rounds, .. } => {
                assert_eq!(winner.as_deref(), Some("a"));
                assert_eq!(total_rounds, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn mismatched_selection_counts_as_invalid() {
        let poll = poll_with_options(&["a", "b"]);
        let bad = ValidBallot::assume_valid(Ballot::new(
            poll.id.clone(),
            "v1".into(),
            Selection::Single { option_id: "a".into() },
            "key".into(),
        ));
        let (outcome, invalid) = tally(&poll, &[bad], &TieBreakPolicy::OptionOrder);
        assert_eq!(invalid, 1);
        match outcome {
            Outcome::Ranked { winner, no_candidates, .. } => {
                assert_eq!(winner, None);
                assert!(no_candidates);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
