use crate::models::{Outcome, OptionCount, Poll, Selection, ValidBallot};

/// Count one vote per ballot. The winner is the highest count; options tied
/// for highest are all reported, never arbitrarily resolved.
pub fn tally(poll: &Poll, ballots: &[ValidBallot]) -> (Outcome, u64) {
    let mut counts: Vec<OptionCount> = poll
        .options
        .iter()
        .map(|o| OptionCount { option_id: o.id.clone(), votes: 0 })
        .collect();
    let mut invalid: u64 = 0;

    for ballot in ballots {
        match &ballot.selection {
            Selection::Single { option_id } => {
                match counts.iter_mut().find(|c| &c.option_id == option_id) {
                    Some(count) => count.votes += 1,
                    None => invalid += 1,
                }
            }
            _ => invalid += 1,
        }
    }

    counts.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.option_id.cmp(&b.option_id)));

    let top = counts.first().map(|c| c.votes).unwrap_or(0);
    let winners = if top > 0 {
        counts
            .iter()
            .filter(|c| c.votes == top)
            .map(|c| c.option_id.clone())
            .collect()
    } else {
        Vec::new()
    };

    (Outcome::SingleChoice { counts, winners }, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ballot, PollStatus, TrustTier, VotingMethod};
    use chrono::Utc;

    fn poll_with_options(ids: &[&str]) -> Poll {
        let mut poll = Poll::new(
            "test".into(),
            Vec::new(),
            VotingMethod::SingleChoice,
            Utc::now() + chrono::Duration::hours(1),
            TrustTier::T0,
            false,
        );
        poll.status = PollStatus::Active;
        poll.options = ids
            .iter()
            .map(|id| crate::models::PollOption { id: id.to_string(), label: id.to_string() })
            .collect();
        poll
    }

    fn single(poll_id: &str, voter: &str, option: &str) -> ValidBallot {
        ValidBallot::assume_valid(Ballot::new(
            poll_id.into(),
            voter.into(),
            Selection::Single { option_id: option.into() },
            format!("key-{voter}"),
        ))
    }

    #[test]
    fn highest_count_wins() {
        // Options [X,Y,Z], ballots [X,X,Y] -> winner X, {X:2, Y:1, Z:0}.
        let poll = poll_with_options(&["x", "y", "z"]);
        let ballots = vec![
            single(&poll.id, "v1", "x"),
            single(&poll.id, "v2", "x"),
            single(&poll.id, "v3", "y"),
        ];
        let (outcome, invalid) = tally(&poll, &ballots);
        assert_eq!(invalid, 0);
        match outcome {
            Outcome::SingleChoice { counts, winners } => {
                assert_eq!(winners, vec!["x".to_string()]);
                let get = |id: &str| counts.iter().find(|c| c.option_id == id).unwrap().votes;
                assert_eq!(get("x"), 2);
                assert_eq!(get("y"), 1);
                assert_eq!(get("z"), 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn tied_top_counts_are_all_reported() {
        let poll = poll_with_options(&["x", "y"]);
        let ballots = vec![single(&poll.id, "v1", "x"), single(&poll.id, "v2", "y")];
        let (outcome, _) = tally(&poll, &ballots);
        match outcome {
            Outcome::SingleChoice { winners, .. } => {
                assert_eq!(winners, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn no_ballots_means_no_winner() {
        let poll = poll_with_options(&["x", "y"]);
        let (outcome, _) = tally(&poll, &[]);
        match outcome {
            Outcome::SingleChoice { winners, .. } => assert!(winners.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
