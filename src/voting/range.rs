use crate::models::{Outcome, OptionRating, Poll, Selection, ValidBallot};

/// Running sum and mean of submitted scores per option. The winner is the
/// highest mean among options that received at least one rating.
pub fn tally(poll: &Poll, ballots: &[ValidBallot]) -> (Outcome, u64) {
    let mut ratings: Vec<OptionRating> = poll
        .options
        .iter()
        .map(|o| OptionRating { option_id: o.id.clone(), total: 0, ballots: 0, mean: 0.0 })
        .collect();
    let mut invalid: u64 = 0;

    for ballot in ballots {
        match &ballot.selection {
            Selection::Scores { scores }
                if scores.iter().all(|s| poll.has_option(&s.option_id)) =>
            {
                for score in scores {
                    if let Some(rating) =
                        ratings.iter_mut().find(|r| r.option_id == score.option_id)
                    {
                        rating.total += score.score;
                        rating.ballots += 1;
                    }
                }
            }
            _ => invalid += 1,
        }
    }

    for rating in &mut ratings {
        if rating.ballots > 0 {
            rating.mean = rating.total as f64 / rating.ballots as f64;
        }
    }

    ratings.sort_by(|a, b| {
        b.mean
            .partial_cmp(&a.mean)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.option_id.cmp(&b.option_id))
    });

    let winners = match ratings.iter().filter(|r| r.ballots > 0).map(|r| r.mean).next() {
        Some(top) => ratings
            .iter()
            .filter(|r| r.ballots > 0 && r.mean == top)
            .map(|r| r.option_id.clone())
            .collect(),
        None => Vec::new(),
    };

    (Outcome::Range { ratings, winners }, invalid)
}
