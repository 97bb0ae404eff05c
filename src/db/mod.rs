use chrono::{DateTime, Utc};
use sqlx::{
    Row, Sqlite,
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow},
};

use crate::audit::TransitionEvent;
use crate::error::StoreError;
use crate::models::{
    ApprovalLimits, Ballot, Poll, PollOption, PollSnapshot, PollStatus, ScoreRange, Selection,
    TrustTier, VoteResult, VotingMethod,
};

/// What happened when a ballot insert hit the store's uniqueness rules.
#[derive(Debug)]
pub enum BallotInsert {
    Inserted,
    /// The same (poll, voter, idempotency key) row already exists.
    IdempotentReplay(Ballot),
    /// A different counted ballot already exists for this voter.
    DuplicateVoter,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_url: &str) -> Result<Self, StoreError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Initialize the database schema
    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                voting_method TEXT NOT NULL,
                status TEXT NOT NULL,
                close_at TEXT NOT NULL,
                min_tier INTEGER NOT NULL,
                allow_revision BOOLEAN NOT NULL DEFAULT FALSE,
                score_min INTEGER NOT NULL,
                score_max INTEGER NOT NULL,
                approval_min INTEGER NOT NULL,
                approval_max INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id TEXT NOT NULL,
                poll_id TEXT NOT NULL,
                label TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (poll_id, id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // `exclusive` is denormalized from the poll's allow_revision flag at
        // insert time so the one-ballot-per-voter rule can live in a partial
        // unique index instead of application code.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ballots (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                selection TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                exclusive BOOLEAN NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS ballots_idempotency
            ON ballots(poll_id, voter_id, idempotency_key);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS ballots_one_per_voter
            ON ballots(poll_id, voter_id) WHERE exclusive = 1;
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                poll_id TEXT PRIMARY KEY,
                official_count INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                merkle_root TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                poll_id TEXT PRIMARY KEY,
                digest TEXT NOT NULL,
                data TEXT NOT NULL,
                computed_at TEXT NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS display_counters (
                poll_id TEXT PRIMARY KEY,
                votes INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id TEXT NOT NULL,
                from_state TEXT NOT NULL,
                to_state TEXT NOT NULL,
                at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // Create a new poll and its options
    pub async fn create_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO polls (id, title, voting_method, status, close_at, min_tier,
                               allow_revision, score_min, score_max, approval_min,
                               approval_max, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.title)
        .bind(poll.voting_method.as_str())
        .bind(poll.status.as_str())
        .bind(poll.close_at.to_rfc3339())
        .bind(poll.min_tier.level() as i64)
        .bind(poll.allow_revision)
        .bind(poll.score_range.min)
        .bind(poll.score_range.max)
        .bind(poll.approval_limits.min as i64)
        .bind(poll.approval_limits.max.min(i64::MAX as usize) as i64)
        .bind(poll.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        for (position, option) in poll.options.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO poll_options (id, poll_id, label, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&option.id)
            .bind(&poll.id)
            .bind(&option.label)
            .bind(position as i64)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    // Get a poll with its options
    pub async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>, StoreError> {
        let row = sqlx::query("SELECT * FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let option_rows =
            sqlx::query("SELECT id, label FROM poll_options WHERE poll_id = ? ORDER BY position")
                .bind(poll_id)
                .fetch_all(&self.pool)
                .await?;
        let options = option_rows
            .iter()
            .map(|r| PollOption { id: r.get("id"), label: r.get("label") })
            .collect();

        Ok(Some(poll_from_row(&row, options)?))
    }

    /// Compare-and-set on the poll status. Returns false when the poll was
    /// not in `from`, or when the transition would go backwards.
    pub async fn cas_poll_status(
        &self,
        poll_id: &str,
        from: PollStatus,
        to: PollStatus,
    ) -> Result<bool, StoreError> {
        if !from.can_advance_to(to) {
            return Ok(false);
        }
        let result = sqlx::query("UPDATE polls SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(poll_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Insert a ballot, classifying uniqueness conflicts. `exclusive` mirrors
    /// the poll's allow_revision flag (true when revision is NOT allowed).
    pub async fn insert_ballot(
        &self,
        ballot: &Ballot,
        exclusive: bool,
    ) -> Result<BallotInsert, StoreError> {
        let selection =
            serde_json::to_string(&ballot.selection).expect("serialisation is infallible");
        let result = sqlx::query(
            r#"
            INSERT INTO ballots (id, poll_id, voter_id, selection, submitted_at,
                                 idempotency_key, exclusive)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ballot.id)
        .bind(&ballot.poll_id)
        .bind(&ballot.voter_id)
        .bind(&selection)
        .bind(ballot.submitted_at.to_rfc3339())
        .bind(&ballot.idempotency_key)
        .bind(exclusive)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(BallotInsert::Inserted),
            // Either unique index may fire; the key tells them apart. A row
            // under the same key is our own earlier insert, anything else is
            // a second ballot from the same voter.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                match self
                    .find_ballot_by_key(&ballot.poll_id, &ballot.voter_id, &ballot.idempotency_key)
                    .await?
                {
                    Some(existing) => Ok(BallotInsert::IdempotentReplay(existing)),
                    None => Ok(BallotInsert::DuplicateVoter),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All ballots for a poll in stable order.
    pub async fn get_ballots(&self, poll_id: &str) -> Result<Vec<Ballot>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM ballots WHERE poll_id = ? ORDER BY submitted_at, id")
                .bind(poll_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(ballot_from_row).collect()
    }

    /// The voter's latest ballot for a poll, if any.
    pub async fn find_voter_ballot(
        &self,
        poll_id: &str,
        voter_id: &str,
    ) -> Result<Option<Ballot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM ballots WHERE poll_id = ? AND voter_id = ?
            ORDER BY submitted_at DESC, id DESC LIMIT 1
            "#,
        )
        .bind(poll_id)
        .bind(voter_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ballot_from_row).transpose()
    }

    pub async fn find_ballot_by_key(
        &self,
        poll_id: &str,
        voter_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<Ballot>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM ballots WHERE poll_id = ? AND voter_id = ? AND idempotency_key = ?",
        )
        .bind(poll_id)
        .bind(voter_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ballot_from_row).transpose()
    }

    /// Persist the snapshot and result together. One transaction; finalize
    /// never publishes one without the other.
    pub async fn insert_snapshot_and_result(
        &self,
        snapshot: &PollSnapshot,
        result: &VoteResult,
    ) -> Result<(), StoreError> {
        let snapshot_json =
            serde_json::to_string(snapshot).expect("serialisation is infallible");
        let result_json = serde_json::to_string(result).expect("serialisation is infallible");

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO snapshots (poll_id, official_count, checksum, merkle_root, data, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.poll_id)
        .bind(snapshot.official_count as i64)
        .bind(&snapshot.checksum)
        .bind(&snapshot.merkle_root)
        .bind(&snapshot_json)
        .bind(snapshot.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO results (poll_id, digest, data, computed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&result.poll_id)
        .bind(result.digest())
        .bind(&result_json)
        .bind(result.computed_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_snapshot(&self, poll_id: &str) -> Result<Option<PollSnapshot>, StoreError> {
        let row = sqlx::query("SELECT data FROM snapshots WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let data: String = r.get("data");
            serde_json::from_str(&data)
                .map_err(|e| StoreError::Corrupt(format!("snapshot for {poll_id}: {e}")))
        })
        .transpose()
    }

    pub async fn get_result(&self, poll_id: &str) -> Result<Option<VoteResult>, StoreError> {
        let row = sqlx::query("SELECT data FROM results WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let data: String = r.get("data");
            serde_json::from_str(&data)
                .map_err(|e| StoreError::Corrupt(format!("result for {poll_id}: {e}")))
        })
        .transpose()
    }

    // Live display counter, separate from the official tally
    pub async fn increment_display_counter(&self, poll_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO display_counters (poll_id, votes) VALUES (?, 1)
            ON CONFLICT(poll_id) DO UPDATE SET votes = votes + 1
            "#,
        )
        .bind(poll_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn display_count(&self, poll_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT votes FROM display_counters WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("votes")).unwrap_or(0))
    }

    pub async fn append_audit_event(&self, event: &TransitionEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (poll_id, from_state, to_state, at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&event.poll_id)
        .bind(&event.from_state)
        .bind(&event.to_state)
        .bind(event.at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn audit_events(&self, poll_id: &str) -> Result<Vec<TransitionEvent>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM audit_events WHERE poll_id = ? ORDER BY seq")
                .bind(poll_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                Ok(TransitionEvent {
                    poll_id: row.get("poll_id"),
                    from_state: row.get("from_state"),
                    to_state: row.get("to_state"),
                    at: parse_timestamp(row.get("at"))?,
                })
            })
            .collect()
    }

    /// Active polls whose close time has passed, for the background closer.
    pub async fn expired_active_polls(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT id FROM polls WHERE status = ? AND close_at <= ?")
            .bind(PollStatus::Active.as_str())
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

fn poll_from_row(row: &SqliteRow, options: Vec<PollOption>) -> Result<Poll, StoreError> {
    let method_str: String = row.get("voting_method");
    let voting_method = VotingMethod::parse(&method_str)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown voting method: {method_str}")))?;
    let status_str: String = row.get("status");
    let status = PollStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown poll status: {status_str}")))?;
    let tier_level: i64 = row.get("min_tier");
    let min_tier = TrustTier::from_level(tier_level as u8)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown trust tier: {tier_level}")))?;

    Ok(Poll {
        id: row.get("id"),
        title: row.get("title"),
        options,
        voting_method,
        status,
        close_at: parse_timestamp(row.get("close_at"))?,
        min_tier,
        allow_revision: row.get("allow_revision"),
        score_range: ScoreRange { min: row.get("score_min"), max: row.get("score_max") },
        approval_limits: ApprovalLimits {
            min: row.get::<i64, _>("approval_min") as usize,
            max: row.get::<i64, _>("approval_max") as usize,
        },
        created_at: parse_timestamp(row.get("created_at"))?,
    })
}

fn ballot_from_row(row: &SqliteRow) -> Result<Ballot, StoreError> {
    let selection_json: String = row.get("selection");
    let selection: Selection = serde_json::from_str(&selection_json)
        .map_err(|e| StoreError::Corrupt(format!("ballot selection: {e}")))?;
    Ok(Ballot {
        id: row.get("id"),
        poll_id: row.get("poll_id"),
        voter_id: row.get("voter_id"),
        selection,
        submitted_at: parse_timestamp(row.get("submitted_at"))?,
        idempotency_key: row.get("idempotency_key"),
    })
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw}: {e}")))
}
