use crate::models::{Outcome, OptionInfluence, Poll, Selection, ValidBallot};

/// Quadratic voting: credits a ballot allocates to an option convert to
/// influence at square-root cost, so concentrating credits has diminishing
/// returns. Per-option influence is the summed square roots, reported as a
/// quadratic score distinct from any raw vote count.
pub fn tally(poll: &Poll, ballots: &[ValidBallot]) -> (Outcome, u64) {
    let mut influence: Vec<OptionInfluence> = poll
        .options
        .iter()
        .map(|o| OptionInfluence { option_id: o.id.clone(), credits: 0, quadratic_score: 0.0 })
        .collect();
    let mut invalid: u64 = 0;

    for ballot in ballots {
        match &ballot.selection {
            Selection::Scores { scores }
                if scores
                    .iter()
                    .all(|s| s.score >= 0 && poll.has_option(&s.option_id)) =>
            {
                for score in scores {
                    if let Some(entry) =
                        influence.iter_mut().find(|i| i.option_id == score.option_id)
                    {
                        entry.credits += score.score;
                        entry.quadratic_score += (score.score as f64).sqrt();
                    }
                }
            }
            _ => invalid += 1,
        }
    }

    influence.sort_by(|a, b| {
        b.quadratic_score
            .partial_cmp(&a.quadratic_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.option_id.cmp(&b.option_id))
    });

    let top = influence.first().map(|i| i.quadratic_score).unwrap_or(0.0);
    let winners = if top > 0.0 {
        influence
            .iter()
            .filter(|i| i.quadratic_score == top)
            .map(|i| i.option_id.clone())
            .collect()
    } else {
        Vec::new()
    };

    (Outcome::Quadratic { influence, winners }, invalid)
}
