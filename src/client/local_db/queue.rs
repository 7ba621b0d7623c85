//! # Pending Mutation Storage
//!
//! SQL side of the mutation queue and of the optimistic overlay it drives.
//!
//! Every operation that changes which mutations are live for a subject
//! (enqueue, acknowledgment, dead-lettering, requeue, discard) rebuilds that
//! subject's overlay in the same transaction through [`reproject_pending`], so
//! the displayed state never disagrees with the queue.

use crate::client::local_db::entities::{canonical_assignment, upsert_assignment, upsert_review_statistic};
use crate::client::local_db::{
    decode_json, decode_opt_ts, decode_ts, encode_json, encode_opt_ts, encode_ts, LocalDatabase,
    Result,
};
use crate::client::offline::optimistic::project;
use crate::client::offline::queue::{
    MutationKind, MutationStatus, NewMutation, PendingMutation,
};
use crate::client::offline::reconciliation::Reconciliation;
use crate::client::remote::SubmissionReceipt;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

const MUTATION_SELECT: &str = "SELECT sequence, idempotency_key, kind, subject_id, assignment_id,
        payload, created_at, status, attempts, next_attempt_at, last_error, skipped
     FROM pending_mutations";

impl LocalDatabase {
    /// Persist a mutation, rebuild the subject's overlay and count the action
    /// towards today's activity, all in one transaction.
    pub async fn enqueue_mutation(&self, mutation: &NewMutation) -> Result<PendingMutation> {
        let key = Uuid::new_v4();
        let created_at = Utc::now();
        let kind = mutation.payload.kind();

        let mut tx = self.begin_write().await?;

        let assignment_id = match mutation.assignment_id {
            Some(id) => Some(id),
            None => sqlx::query_scalar("SELECT id FROM assignments WHERE subject_id = ?")
                .bind(mutation.subject_id)
                .fetch_optional(&mut *tx)
                .await?,
        };

        let sequence = sqlx::query(
            "INSERT INTO pending_mutations (
                idempotency_key, kind, subject_id, assignment_id, payload, created_at, status
            ) VALUES (?, ?, ?, ?, ?, ?, 'pending')",
        )
        .bind(key.to_string())
        .bind(kind.as_str())
        .bind(mutation.subject_id)
        .bind(assignment_id)
        .bind(encode_json(&mutation.payload)?)
        .bind(encode_ts(&created_at))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        reproject_pending(&mut *tx, mutation.subject_id).await?;
        record_activity(&mut *tx, kind, mutation.payload.occurred_at()).await?;

        let stored = fetch_mutation(&mut *tx, sequence).await?;
        tx.commit().await?;

        stored.ok_or(sqlx::Error::RowNotFound)
    }

    /// Next mutation the drain has to deal with.
    ///
    /// Dead letters the user skipped are passed over; with
    /// `skip_all_dead_letters` every dead letter is.
    pub async fn next_mutation(&self, skip_all_dead_letters: bool) -> Result<Option<PendingMutation>> {
        let row = sqlx::query(&format!(
            "{} WHERE NOT (status = 'failed_terminal' AND (skipped = 1 OR ?))
             ORDER BY sequence ASC
             LIMIT 1",
            MUTATION_SELECT
        ))
        .bind(skip_all_dead_letters)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_mutation).transpose()
    }

    pub async fn get_mutation(&self, sequence: i64) -> Result<Option<PendingMutation>> {
        let mut conn = self.pool.acquire().await?;
        fetch_mutation(&mut conn, sequence).await
    }

    /// Every queued mutation, dead letters included, in replay order
    pub async fn list_mutations(&self) -> Result<Vec<PendingMutation>> {
        let rows = sqlx::query(&format!("{} ORDER BY sequence ASC", MUTATION_SELECT))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_mutation).collect()
    }

    pub async fn dead_letters(&self) -> Result<Vec<PendingMutation>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = 'failed_terminal' ORDER BY sequence ASC",
            MUTATION_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mutation).collect()
    }

    pub async fn mark_in_flight(&self, sequence: i64) -> Result<()> {
        sqlx::query("UPDATE pending_mutations SET status = 'in_flight' WHERE sequence = ?")
            .bind(sequence)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Put an in-flight mutation back without counting an attempt
    pub async fn release_mutation(&self, sequence: i64) -> Result<()> {
        sqlx::query(
            "UPDATE pending_mutations SET status = 'pending'
             WHERE sequence = ? AND status = 'in_flight'",
        )
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a transient failure and the time the mutation becomes eligible
    pub async fn schedule_retry(
        &self,
        sequence: i64,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE pending_mutations SET
                status = 'failed_retryable',
                attempts = attempts + 1,
                next_attempt_at = ?,
                last_error = ?
             WHERE sequence = ?",
        )
        .bind(encode_ts(&next_attempt_at))
        .bind(error)
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a mutation terminally failed and drop it from the overlay
    pub async fn dead_letter_mutation(&self, sequence: i64, error: &str) -> Result<()> {
        let mut tx = self.begin_write().await?;
        let subject_id: Option<i64> = sqlx::query_scalar(
            "UPDATE pending_mutations SET
                status = 'failed_terminal',
                attempts = attempts + 1,
                next_attempt_at = NULL,
                last_error = ?
             WHERE sequence = ?
             RETURNING subject_id",
        )
        .bind(error)
        .bind(sequence)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(subject_id) = subject_id {
            reproject_pending(&mut *tx, subject_id).await?;
        }
        tx.commit().await
    }

    /// Apply a remote acknowledgment: remove the mutation, write the returned
    /// canonical state and rebuild the overlay from it, in one transaction.
    pub async fn acknowledge_mutation(
        &self,
        sequence: i64,
        receipt: &SubmissionReceipt,
    ) -> Result<Reconciliation> {
        let mut tx = self.begin_write().await?;

        let subject_id: Option<i64> =
            sqlx::query_scalar("DELETE FROM pending_mutations WHERE sequence = ? RETURNING subject_id")
                .bind(sequence)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = upsert_assignment(&mut *tx, &receipt.assignment).await?;
        if let Some(stat) = &receipt.review_statistic {
            upsert_review_statistic(&mut *tx, stat).await?;
        }

        reproject_pending(&mut *tx, receipt.assignment.subject_id).await?;
        if let Some(subject_id) = subject_id.filter(|id| *id != receipt.assignment.subject_id) {
            reproject_pending(&mut *tx, subject_id).await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Let the drain pass over a dead letter
    pub async fn skip_dead_letter(&self, sequence: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE pending_mutations SET skipped = 1
             WHERE sequence = ? AND status = 'failed_terminal'",
        )
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return a dead letter to `pending` and restore it in the overlay
    pub async fn requeue_dead_letter(&self, sequence: i64) -> Result<bool> {
        let mut tx = self.begin_write().await?;
        let subject_id: Option<i64> = sqlx::query_scalar(
            "UPDATE pending_mutations SET
                status = 'pending',
                skipped = 0,
                next_attempt_at = NULL
             WHERE sequence = ? AND status = 'failed_terminal'
             RETURNING subject_id",
        )
        .bind(sequence)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(subject_id) = subject_id {
            reproject_pending(&mut *tx, subject_id).await?;
        }
        tx.commit().await?;
        Ok(subject_id.is_some())
    }

    /// Delete a dead letter and take its action back out of the day's
    /// activity counts
    pub async fn discard_dead_letter(&self, sequence: i64) -> Result<bool> {
        let mut tx = self.begin_write().await?;
        let Some(mutation) = fetch_mutation(&mut *tx, sequence).await? else {
            return Ok(false);
        };
        if mutation.status != MutationStatus::FailedTerminal {
            return Ok(false);
        }

        sqlx::query("DELETE FROM pending_mutations WHERE sequence = ?")
            .bind(sequence)
            .execute(&mut *tx)
            .await?;

        reproject_pending(&mut *tx, mutation.subject_id).await?;
        adjust_activity(&mut *tx, mutation.kind, mutation.payload.occurred_at(), -1).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Reset every `in_flight` row to `pending`
    pub async fn recover_in_flight(&self) -> Result<u64> {
        let result =
            sqlx::query("UPDATE pending_mutations SET status = 'pending' WHERE status = 'in_flight'")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

/// Rebuild the optimistic overlay of a subject's assignment from its
/// canonical columns and the live (non-terminal) mutations, in sequence order.
/// Clears the overlay once no live mutation remains.
pub(crate) async fn reproject_pending(conn: &mut SqliteConnection, subject_id: i64) -> Result<()> {
    let Some(canonical) = canonical_assignment(conn, subject_id).await? else {
        return Ok(());
    };

    let rows = sqlx::query(&format!(
        "{} WHERE subject_id = ? AND status != 'failed_terminal' ORDER BY sequence ASC",
        MUTATION_SELECT
    ))
    .bind(subject_id)
    .fetch_all(&mut *conn)
    .await?;
    let live = rows.iter().map(row_to_mutation).collect::<Result<Vec<_>>>()?;

    let Some(pending_since) = live.iter().map(|m| m.created_at).min() else {
        sqlx::query(
            "UPDATE assignments SET
                pending_since = NULL,
                optimistic_srs_stage = NULL,
                optimistic_started_at = NULL,
                optimistic_passed_at = NULL,
                optimistic_burned_at = NULL,
                optimistic_available_at = NULL
             WHERE subject_id = ?",
        )
        .bind(subject_id)
        .execute(&mut *conn)
        .await?;
        return Ok(());
    };

    let state = project(&canonical, &live);
    sqlx::query(
        "UPDATE assignments SET
            pending_since = ?,
            optimistic_srs_stage = ?,
            optimistic_started_at = ?,
            optimistic_passed_at = ?,
            optimistic_burned_at = ?,
            optimistic_available_at = ?
         WHERE subject_id = ?",
    )
    .bind(encode_ts(&pending_since))
    .bind(state.srs_stage as i64)
    .bind(encode_opt_ts(&state.started_at))
    .bind(encode_opt_ts(&state.passed_at))
    .bind(encode_opt_ts(&state.burned_at))
    .bind(encode_opt_ts(&state.available_at))
    .bind(subject_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn record_activity(
    conn: &mut SqliteConnection,
    kind: MutationKind,
    at: DateTime<Utc>,
) -> Result<()> {
    adjust_activity(conn, kind, at, 1).await
}

/// Add `delta` to the day's counter for `kind`, never going below zero
async fn adjust_activity(
    conn: &mut SqliteConnection,
    kind: MutationKind,
    at: DateTime<Utc>,
    delta: i64,
) -> Result<()> {
    let (lessons, reviews) = match kind {
        MutationKind::LessonStart => (delta, 0i64),
        MutationKind::ReviewGrade => (0, delta),
    };

    sqlx::query(
        "INSERT INTO daily_activity (day, lessons, reviews) VALUES (?1, MAX(?2, 0), MAX(?3, 0))
         ON CONFLICT(day) DO UPDATE SET
            lessons = MAX(lessons + ?2, 0),
            reviews = MAX(reviews + ?3, 0)",
    )
    .bind(at.date_naive().to_string())
    .bind(lessons)
    .bind(reviews)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_mutation(conn: &mut SqliteConnection, sequence: i64) -> Result<Option<PendingMutation>> {
    let row = sqlx::query(&format!("{} WHERE sequence = ?", MUTATION_SELECT))
        .bind(sequence)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_mutation).transpose()
}

fn row_to_mutation(row: &SqliteRow) -> Result<PendingMutation> {
    let key: String = row.try_get("idempotency_key")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(PendingMutation {
        sequence: row.try_get("sequence")?,
        idempotency_key: Uuid::parse_str(&key).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        kind: MutationKind::parse(&kind).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        subject_id: row.try_get("subject_id")?,
        assignment_id: row.try_get("assignment_id")?,
        payload: decode_json(&row.try_get::<String, _>("payload")?)?,
        created_at: decode_ts(&row.try_get::<String, _>("created_at")?)?,
        status: MutationStatus::parse(&status).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        next_attempt_at: decode_opt_ts(row.try_get("next_attempt_at")?)?,
        last_error: row.try_get("last_error")?,
        skipped: row.try_get("skipped")?,
    })
}
