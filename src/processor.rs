//! Submission pipeline: rate limit, validate, persist exactly once, receipt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::warn;
use tokio::time::sleep;

use crate::db::{BallotInsert, SqliteStore};
use crate::error::{ProcessingError, StoreError, ValidationError};
use crate::models::{Ballot, Selection, SubmissionReceipt};
use crate::validator::{self, IdentityProvider};

const MAX_INSERT_ATTEMPTS: u32 = 3;

/// Per-voter sliding-window limiter. In-memory and non-blocking: a request
/// over the limit is rejected immediately with a retry hint, never queued.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key`, or reject with the seconds until the oldest
    /// in-window hit expires.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("limiter lock is never poisoned");
        let entry = hits.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);

        if entry.len() >= self.max_requests {
            let oldest = entry[0];
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after.as_secs().max(1));
        }
        entry.push(now);
        Ok(())
    }
}

/// Orchestrates one ballot submission end to end. Stateless between calls
/// apart from the rate limiter.
pub struct VoteProcessor {
    store: Arc<SqliteStore>,
    identity: Arc<dyn IdentityProvider>,
    limiter: RateLimiter,
}

impl VoteProcessor {
    pub fn new(
        store: Arc<SqliteStore>,
        identity: Arc<dyn IdentityProvider>,
        limiter: RateLimiter,
    ) -> Self {
        Self { store, identity, limiter }
    }

    /// Submit a ballot. Resubmitting the same idempotency key replays the
    /// original receipt; a different key from the same voter on a
    /// no-revision poll is rejected as a duplicate vote.
    pub async fn submit(
        &self,
        poll_id: &str,
        voter_id: &str,
        selection: Selection,
        idempotency_key: &str,
    ) -> Result<SubmissionReceipt, ProcessingError> {
        self.limiter
            .check(&format!("{poll_id}:{voter_id}"))
            .map_err(|retry_after_secs| ProcessingError::RateLimited { retry_after_secs })?;

        let poll = with_retry(|| self.store.get_poll(poll_id)).await?;

        // Replay short-circuits before validation, so a retry of an accepted
        // submission still succeeds after the poll has closed.
        if let Some(original) = self
            .store
            .find_ballot_by_key(poll_id, voter_id, idempotency_key)
            .await?
        {
            return Ok(SubmissionReceipt::for_ballot(&original));
        }

        let existing = self.store.find_voter_ballot(poll_id, voter_id).await?;
        let ballot = Ballot::new(
            poll_id.to_string(),
            voter_id.to_string(),
            selection,
            idempotency_key.to_string(),
        );
        let valid = validator::validate(
            poll.as_ref(),
            ballot,
            self.identity.as_ref(),
            existing.as_ref(),
        )
        .await?;

        let exclusive = poll.map(|p| !p.allow_revision).unwrap_or(true);
        let outcome = with_retry(|| self.store.insert_ballot(&valid, exclusive)).await?;

        let receipt = match outcome {
            BallotInsert::Inserted => {
                // Best effort only; the official tally never reads this.
                if let Err(err) = self.store.increment_display_counter(poll_id).await {
                    warn!("display counter update failed for poll {poll_id}: {err}");
                }
                SubmissionReceipt::for_ballot(&valid)
            }
            BallotInsert::IdempotentReplay(original) => SubmissionReceipt::for_ballot(&original),
            BallotInsert::DuplicateVoter => {
                // Lost a race with our own earlier insert, or with a genuine
                // second vote. The key tells which.
                match self
                    .store
                    .find_ballot_by_key(poll_id, voter_id, idempotency_key)
                    .await?
                {
                    Some(original) => SubmissionReceipt::for_ballot(&original),
                    None => return Err(ValidationError::DuplicateVote.into()),
                }
            }
        };

        Ok(receipt)
    }
}

/// Retry a storage call on transient failures with bounded backoff.
pub(crate) async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt + 1 < MAX_INSERT_ATTEMPTS => {
                let delay = Duration::from_millis(50 * 2u64.pow(attempt));
                warn!("transient storage error (attempt {}): {err}", attempt + 1);
                sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
