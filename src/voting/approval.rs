use crate::models::{Outcome, OptionCount, Poll, Selection, ValidBallot};

/// Each ballot approves a set of options; an option's count is the number of
/// ballots that named it. Winner is the highest approval count.
pub fn tally(poll: &Poll, ballots: &[ValidBallot]) -> (Outcome, u64) {
    let mut approvals: Vec<OptionCount> = poll
        .options
        .iter()
        .map(|o| OptionCount { option_id: o.id.clone(), votes: 0 })
        .collect();
    let mut invalid: u64 = 0;

    for ballot in ballots {
        match &ballot.selection {
            Selection::Approval { option_ids }
                if option_ids.iter().all(|id| poll.has_option(id)) =>
            {
                for option_id in option_ids {
                    if let Some(count) = approvals.iter_mut().find(|c| &c.option_id == option_id) {
                        count.votes += 1;
                    }
                }
            }
            _ => invalid += 1,
        }
    }

    approvals.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.option_id.cmp(&b.option_id)));

    let top = approvals.first().map(|c| c.votes).unwrap_or(0);
    let winners = if top > 0 {
        approvals
            .iter()
            .filter(|c| c.votes == top)
            .map(|c| c.option_id.clone())
            .collect()
    } else {
        Vec::new()
    };

    (Outcome::Approval { approvals, winners }, invalid)
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
            VotingMethod::Approval,
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

    fn approve(poll_id: &str, voter: &str, options: &[&str]) -> ValidBallot {
        ValidBallot::assume_valid(Ballot::new(
            poll_id.into(),
            voter.into(),
            Selection::Approval { option_ids: options.iter().map(|s| s.to_string()).collect() },
            format!("key-{voter}"),
        ))
    }

    #[test]
    fn ballots_may_approve_multiple_options() {
        let poll = poll_with_options(&["a", "b", "c"]);
        let ballots = vec![
            approve(&poll.id, "v1", &["a", "b"]),
            approve(&poll.id, "v2", &["b"]),
            approve(&poll.id, "v3", &["b", "c"]),
        ];
        let (outcome, invalid) = tally(&poll, &ballots);
        assert_eq!(invalid, 0);
        match outcome {
            Outcome::Approval { approvals, winners } => {
                assert_eq!(winners, vec!["b".to_string()]);
                let get = |id: &str| approvals.iter().find(|c| c.option_id == id).unwrap().votes;
                assert_eq!(get("a"), 1);
                assert_eq!(get("b"), 3);
                assert_eq!(get("c"), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_option_invalidates_the_ballot() {
        let poll = poll_with_options(&["a", "b"]);
        let ballots = vec![approve(&poll.id, "v1", &["a", "nope"])];
        let (outcome, invalid) = tally(&poll, &ballots);
        assert_eq!(invalid, 1);
        match outcome {
            Outcome::Approval { winners, .. } => assert!(winners.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
