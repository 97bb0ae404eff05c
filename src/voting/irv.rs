//! Instant-runoff elimination. The whole computation is a pure function of
//! (candidates, rankings, tie-break policy): each round is derived from an
//! immutable `RoundState`, so identical inputs always reproduce the same
//! rounds and the same winner.

use sha2::{Digest, Sha256};

use crate::models::{IrvRound, RoundCount, TieBreakPolicy, TransferReason, VoteTransfer};

#[derive(Debug, Clone, PartialEq)]
pub struct IrvOutcome {
    pub winner: Option<String>,
    /// Populated only for an exact final-two tie.
    pub tied: Vec<String>,
    pub rounds: Vec<IrvRound>,
    pub total_rounds: u32,
    /// Majority quota of the deciding round.
    pub quota: u64,
    pub exhausted: u64,
    pub no_candidates: bool,
}

/// Candidate set and remaining preferences carried between rounds. A new
/// state is produced per round; nothing is mutated in place.
#[derive(Debug, Clone)]
struct RoundState {
    continuing: Vec<String>,
    ballots: Vec<Vec<String>>,
}

enum Verdict {
    Winner(String),
    Tie(Vec<String>),
    Eliminate(String),
    AllExhausted,
}

pub fn run(candidates: &[String], rankings: &[Vec<String>], tie_break: &TieBreakPolicy) -> IrvOutcome {
    if candidates.is_empty() || rankings.is_empty() {
        return IrvOutcome {
            winner: None,
            tied: Vec::new(),
            rounds: Vec::new(),
            total_rounds: 0,
            quota: 0,
            exhausted: 0,
            no_candidates: true,
        };
    }

    let mut state = RoundState {
        continuing: candidates.to_vec(),
        ballots: rankings.to_vec(),
    };
    let mut rounds: Vec<IrvRound> = Vec::new();
    let total_ballots = rankings.len() as u64;

    // Each round eliminates at least one candidate, so this terminates.
    for round_no in 1..=candidates.len() as u32 {
        let (mut round, verdict) = play_round(&state, round_no, tie_break);
        let quota = round.continuing_ballots / 2 + 1;
        let exhausted = total_ballots - round.continuing_ballots;

        match verdict {
            Verdict::Winner(winner) => {
                rounds.push(round);
                return IrvOutcome {
                    winner: Some(winner),
                    tied: Vec::new(),
                    total_rounds: round_no,
                    quota,
                    exhausted,
                    no_candidates: false,
                    rounds,
                };
            }
            Verdict::Tie(tied) => {
                rounds.push(round);
                return IrvOutcome {
                    winner: None,
                    tied,
                    total_rounds: round_no,
                    quota,
                    exhausted,
                    no_candidates: false,
                    rounds,
                };
            }
            Verdict::AllExhausted => {
                rounds.push(round);
                return IrvOutcome {
                    winner: None,
                    tied: Vec::new(),
                    total_rounds: round_no,
                    quota,
                    exhausted,
                    no_candidates: false,
                    rounds,
                };
            }
            Verdict::Eliminate(loser) => {
                let (transfers, next) = eliminate(&state, &loser);
                round.eliminated = vec![loser];
                round.transfers = transfers;
                rounds.push(round);
                state = next;
            }
        }
    }

    // Unreachable with a well-formed candidate set; report what we have
    // rather than guessing a winner.
    let (quota, exhausted) = rounds
        .last()
        .map(|r| (r.continuing_ballots / 2 + 1, total_ballots - r.continuing_ballots))
        .unwrap_or((0, 0));
    IrvOutcome {
        winner: None,
        tied: Vec::new(),
        total_rounds: rounds.len() as u32,
        quota,
        exhausted,
        no_candidates: false,
        rounds,
    }
}

/// Tally one round of the given state and decide what happens next. Does not
/// record eliminations or transfers; the caller fills those in.
fn play_round(state: &RoundState, round_no: u32, tie_break: &TieBreakPolicy) -> (IrvRound, Verdict) {
    let mut votes: Vec<u64> = vec![0; state.continuing.len()];
    let mut continuing_ballots: u64 = 0;

    for ballot in &state.ballots {
        if let Some(top) = top_choice(ballot, &state.continuing) {
            let idx = state
                .continuing
                .iter()
                .position(|c| c == top)
                .expect("top choice is a continuing candidate");
            votes[idx] += 1;
            continuing_ballots += 1;
        }
    }

    let counts: Vec<RoundCount> = state
        .continuing
        .iter()
        .zip(votes.iter())
        .map(|(option_id, &v)| RoundCount {
            option_id: option_id.clone(),
            votes: v,
            percent: if continuing_ballots > 0 {
                v as f64 * 100.0 / continuing_ballots as f64
            } else {
                0.0
            },
        })
        .collect();

    let round = IrvRound {
        round: round_no,
        counts,
        continuing_ballots,
        eliminated: Vec::new(),
        transfers: Vec::new(),
    };

    if continuing_ballots == 0 {
        return (round, Verdict::AllExhausted);
    }

    // Majority check against the exhausted-adjusted denominator, not the
    // original ballot count.
    if let Some(idx) = votes.iter().position(|&v| v * 2 > continuing_ballots) {
        return (round, Verdict::Winner(state.continuing[idx].clone()));
    }

    // Two candidates without a majority means an exact split. That is an
    // explicit tie; the elimination tie-break never decides a winner.
    if state.continuing.len() == 2 {
        return (round, Verdict::Tie(state.continuing.clone()));
    }

    let min = votes.iter().copied().min().expect("continuing set is non-empty");
    let tied_last: Vec<String> = state
        .continuing
        .iter()
        .zip(votes.iter())
        .filter(|&(_, &v)| v == min)
        .map(|(c, _)| c.clone())
        .collect();

    let loser = if tied_last.len() == 1 {
        tied_last[0].clone()
    } else {
        select_for_elimination(tie_break, &tied_last, round_no)
    };
    (round, Verdict::Eliminate(loser))
}

/// Remove `loser` from the state and redistribute its ballots, producing the
/// grouped transfer records and the next round's state.
fn eliminate(state: &RoundState, loser: &str) -> (Vec<VoteTransfer>, RoundState) {
    let next_continuing: Vec<String> = state
        .continuing
        .iter()
        .filter(|c| c.as_str() != loser)
        .cloned()
        .collect();

    let mut transferred: Vec<(String, u64)> = Vec::new();
    let mut exhausted_count: u64 = 0;

    for ballot in &state.ballots {
        if top_choice(ballot, &state.continuing).map(String::as_str) != Some(loser) {
            continue;
        }
        match top_choice(ballot, &next_continuing) {
            Some(next) => match transferred.iter_mut().find(|(to, _)| to == next) {
                Some((_, count)) => *count += 1,
                None => transferred.push((next.clone(), 1)),
            },
            None => exhausted_count += 1,
        }
    }

    let mut transfers: Vec<VoteTransfer> = transferred
        .into_iter()
        .map(|(to, count)| VoteTransfer {
            from: loser.to_string(),
            to: Some(to),
            count,
            reason: TransferReason::Elimination,
        })
        .collect();
    transfers.sort_by(|a, b| a.to.cmp(&b.to));
    if exhausted_count > 0 {
        transfers.push(VoteTransfer {
            from: loser.to_string(),
            to: None,
            count: exhausted_count,
            reason: TransferReason::Exhausted,
        });
    }

    let next = RoundState {
        continuing: next_continuing,
        ballots: state.ballots.clone(),
    };
    (transfers, next)
}

fn top_choice<'a>(ballot: &'a [String], continuing: &[String]) -> Option<&'a String> {
    ballot.iter().find(|pref| continuing.contains(pref))
}

/// Pick the single candidate to eliminate from a last-place tie. Applies
/// only to elimination ordering, never to declaring a final winner.
fn select_for_elimination(policy: &TieBreakPolicy, tied: &[String], round: u32) -> String {
    match policy {
        TieBreakPolicy::OptionOrder => tied
            .iter()
            .max()
            .cloned()
            .expect("tied set is non-empty"),
        TieBreakPolicy::Seeded { seed } => tied
            .iter()
            .min_by_key(|id| draw(*seed, round, id))
            .cloned()
            .expect("tied set is non-empty"),
    }
}

fn draw(seed: u64, round: u32, candidate: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(round.to_be_bytes());
    hasher.update(candidate.as_bytes());
    hasher.finalize().into()
}

/// Internal consistency check over recorded rounds: per-round counts must
/// sum to that round's continuing-ballot count, which never grows between
/// rounds. A violation means the result cannot be trusted.
pub fn verify_rounds(rounds: &[IrvRound]) -> Result<(), String> {
    let mut prev_continuing: Option<u64> = None;
    for round in rounds {
        let sum: u64 = round.counts.iter().map(|c| c.votes).sum();
        if sum != round.continuing_ballots {
            return Err(format!(
                "round {}: counts sum to {} but {} ballots are continuing",
                round.round, sum, round.continuing_ballots
            ));
        }
        if let Some(prev) = prev_continuing {
            if round.continuing_ballots > prev {
                return Err(format!(
                    "round {}: continuing ballots grew from {} to {}",
                    round.round, prev, round.continuing_ballots
                ));
            }
        }
        prev_continuing = Some(round.continuing_ballots);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn rankings(ballots: &[&[&str]]) -> Vec<Vec<String>> {
        ballots.iter().map(|b| ids(b)).collect()
    }

    #[test]
    fn majority_in_round_one() {
        // [[A,B,C],[A,B,C],[B,A,C]] -> A has 2 of 3 in round 1.
        let outcome = run(
            &ids(&["a", "b", "c"]),
            &rankings(&[&["a", "b", "c"], &["a", "b", "c"], &["b", "a", "c"]]),
            &TieBreakPolicy::OptionOrder,
        );
        assert_eq!(outcome.winner.as_deref(), Some("a"));
        assert_eq!(outcome.total_rounds, 1);
        assert_eq!(outcome.quota, 2);
        assert_eq!(outcome.exhausted, 0);
        let round = &outcome.rounds[0];
        assert_eq!(round.continuing_ballots, 3);
        assert!(round.transfers.is_empty());
        let a = round.counts.iter().find(|c| c.option_id == "a").unwrap();
        assert_eq!(a.votes, 2);
    }

    #[test]
    fn elimination_transfers_to_next_preference() {
        // Three-way first-round tie; option-order policy eliminates the
        // greatest id ("zebra"), whose ballot transfers to cherry.
        let outcome = run(
            &ids(&["apple", "zebra", "cherry"]),
            &rankings(&[&["apple", "cherry"], &["zebra", "cherry"], &["cherry", "apple"]]),
            &TieBreakPolicy::OptionOrder,
        );
        assert_eq!(outcome.winner.as_deref(), Some("cherry"));
        assert_eq!(outcome.total_rounds, 2);

        let first = &outcome.rounds[0];
        assert_eq!(first.eliminated, vec!["zebra".to_string()]);
        assert_eq!(
            first.transfers,
            vec![VoteTransfer {
                from: "zebra".into(),
                to: Some("cherry".into()),
                count: 1,
                reason: TransferReason::Elimination,
            }]
        );

        let second = &outcome.rounds[1];
        assert_eq!(second.continuing_ballots, 3);
        let cherry = second.counts.iter().find(|c| c.option_id == "cherry").unwrap();
        assert_eq!(cherry.votes, 2);
    }

    #[test]
    fn single_candidate_single_ballot_wins_immediately() {
        let outcome = run(&ids(&["solo"]), &rankings(&[&["solo"]]), &TieBreakPolicy::OptionOrder);
        assert_eq!(outcome.winner.as_deref(), Some("solo"));
        assert_eq!(outcome.total_rounds, 1);
        assert!(outcome.rounds[0].transfers.is_empty());
    }

    #[test]
    fn final_two_exact_split_is_an_explicit_tie() {
        let outcome = run(
            &ids(&["a", "b"]),
            &rankings(&[&["a"], &["b"]]),
            &TieBreakPolicy::Seeded { seed: 42 },
        );
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.tied, ids(&["a", "b"]));
        assert_eq!(outcome.total_rounds, 1);
    }

    #[test]
    fn empty_ballot_set_reports_no_candidates() {
        let outcome = run(&ids(&["a", "b"]), &[], &TieBreakPolicy::OptionOrder);
        assert!(outcome.no_candidates);
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.total_rounds, 0);
        assert!(outcome.rounds.is_empty());
    }

    #[test]
    fn fully_exhausted_ballots_yield_no_winner() {
        let outcome = run(
            &ids(&["a", "b", "c"]),
            &vec![Vec::new(), Vec::new(), Vec::new()],
            &TieBreakPolicy::OptionOrder,
        );
        assert_eq!(outcome.winner, None);
        assert!(outcome.tied.is_empty());
        assert_eq!(outcome.exhausted, 3);
        assert_eq!(outcome.rounds[0].continuing_ballots, 0);
    }

    #[test]
    fn exhausted_ballots_leave_the_denominator() {
        // After x is eliminated its only ballot exhausts; the round-2 quota
        // is computed over 3 continuing ballots, not the original 4.
        let outcome = run(
            &ids(&["a", "m", "x"]),
            &rankings(&[&["a"], &["a"], &["m", "a"], &["x"]]),
            &TieBreakPolicy::OptionOrder,
        );
        assert_eq!(outcome.winner.as_deref(), Some("a"));
        let last = outcome.rounds.last().unwrap();
        assert_eq!(last.continuing_ballots, 3);
        assert_eq!(outcome.exhausted, 1);
        assert_eq!(outcome.quota, 2);
        let transfers = &outcome.rounds[0].transfers;
        assert_eq!(
            transfers,
            &vec![VoteTransfer {
                from: "x".into(),
                to: None,
                count: 1,
                reason: TransferReason::Exhausted,
            }]
        );
    }

    #[test]
    fn round_counts_sum_to_continuing_ballots() {
        let outcome = run(
            &ids(&["a", "b", "c", "d"]),
            &rankings(&[
                &["a", "b"],
                &["b", "c"],
                &["c", "d"],
                &["d", "a"],
                &["a", "c"],
                &["b"],
                &["c"],
            ]),
            &TieBreakPolicy::Seeded { seed: 7 },
        );
        verify_rounds(&outcome.rounds).unwrap();
        let mut prev = u64::MAX;
        for round in &outcome.rounds {
            assert!(round.continuing_ballots <= prev);
            prev = round.continuing_ballots;
        }
    }

    #[test]
    fn seeded_tie_break_is_reproducible() {
        let candidates = ids(&["a", "b", "c"]);
        let ballots = rankings(&[&["a"], &["b"], &["c"]]);
        let first = run(&candidates, &ballots, &TieBreakPolicy::Seeded { seed: 99 });
        let second = run(&candidates, &ballots, &TieBreakPolicy::Seeded { seed: 99 });
        assert_eq!(first, second);
        assert_eq!(first.rounds[0].eliminated.len(), 1);
    }

    #[test]
    fn verify_rounds_catches_bad_sums() {
        let rounds = vec![IrvRound {
            round: 1,
            counts: vec![RoundCount { option_id: "a".into(), votes: 2, percent: 100.0 }],
            continuing_ballots: 3,
            eliminated: Vec::new(),
            transfers: Vec::new(),
        }];
        assert!(verify_rounds(&rounds).is_err());
    }
}
