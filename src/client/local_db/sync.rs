//! # Sync Metadata Operations
//!
//! Page commits and the per-resource cursor table behind incremental pulls.
//!
//! ## Features
//!
//! - **Atomic Pages**: a page of items and its checkpoint commit in one
//!   transaction; a crash never leaves half a page or a cursor ahead of data
//! - **Monotonic Cursors**: the committed cursor only ever moves forward
//! - **Resume Tokens**: a partially committed pass records the next page to
//!   fetch so the following run continues instead of restarting
//! - **Verification**: local row counts and pruning for full refresh
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kioku::client::local_db::LocalDatabase;
//! use kioku::shared::Resource;
//!
//! # async fn example(db: LocalDatabase) -> sqlx::Result<()> {
//! let state = db.cursor_state(Resource::Subjects).await?;
//! println!("subjects updated after {:?}", state.cursor);
//! # Ok(())
//! # }
//! ```

use crate::client::local_db::entities::{
    upsert_assignment, upsert_level_progression, upsert_review_statistic, upsert_study_material,
    upsert_subject, upsert_user, upsert_voice_actor,
};
use crate::client::local_db::{decode_opt_ts, decode_ts, encode_opt_ts, encode_ts, LocalDatabase, Result};
use crate::client::offline::reconciliation::ReconcileStats;
use crate::client::remote::ResourceItems;
use crate::shared::Resource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashSet;

/// Rows deleted per statement when pruning
const PRUNE_CHUNK: usize = 500;

/// Stored sync position of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub resource: Resource,
    /// Committed `updated_after` watermark
    pub cursor: Option<DateTime<Utc>>,
    /// Next page of a partially committed delta pass
    pub resume_token: Option<String>,
    /// Watermark the partial pass will commit once it completes
    pub pass_watermark: Option<DateTime<Utc>>,
    /// Server total seen by the last verification
    pub last_total: Option<u64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CursorState {
    pub fn empty(resource: Resource) -> Self {
        Self {
            resource,
            cursor: None,
            resume_token: None,
            pass_watermark: None,
            last_total: None,
            verified_at: None,
            updated_at: None,
        }
    }
}

/// Sync position to record together with a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// Items only; used by backfill passes
    None,
    /// More pages follow
    Resume {
        token: String,
        watermark: Option<DateTime<Utc>>,
    },
    /// Last page of a delta pass; the cursor advances to `watermark`
    Complete { watermark: Option<DateTime<Utc>> },
}

impl LocalDatabase {
    /// Current sync position of a resource
    pub async fn cursor_state(&self, resource: Resource) -> Result<CursorState> {
        let mut conn = self.pool.acquire().await?;
        load_cursor(&mut conn, resource).await
    }

    /// Sync positions of every resource that has one
    pub async fn sync_cursors(&self) -> Result<Vec<CursorState>> {
        let rows = sqlx::query(
            "SELECT resource, cursor, resume_token, pass_watermark, last_total, verified_at, updated_at
             FROM sync_metadata
             ORDER BY resource ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_cursor).collect()
    }

    /// Write a page of items and its checkpoint atomically
    pub async fn commit_page(
        &self,
        items: &ResourceItems,
        checkpoint: &Checkpoint,
    ) -> Result<ReconcileStats> {
        let mut tx = self.begin_write().await?;
        let stats = write_items(&mut *tx, items).await?;

        let resource = items.resource();
        match checkpoint {
            Checkpoint::None => {}
            Checkpoint::Resume { token, watermark } => {
                let mut state = load_cursor(&mut *tx, resource).await?;
                state.resume_token = Some(token.clone());
                state.pass_watermark = later(state.pass_watermark, *watermark);
                store_cursor(&mut *tx, &state).await?;
            }
            Checkpoint::Complete { watermark } => {
                let mut state = load_cursor(&mut *tx, resource).await?;
                let watermark = later(state.pass_watermark, *watermark);
                state.cursor = later(state.cursor, watermark);
                state.resume_token = None;
                state.pass_watermark = None;
                store_cursor(&mut *tx, &state).await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(
            "Committed {} {} item(s) ({} written, {} stale)",
            items.len(),
            resource,
            stats.written(),
            stats.skipped()
        );
        Ok(stats)
    }

    /// Drop a resume token without touching the committed cursor
    pub async fn clear_resume(&self, resource: Resource) -> Result<()> {
        sqlx::query(
            "UPDATE sync_metadata SET resume_token = NULL, pass_watermark = NULL, updated_at = ?
             WHERE resource = ?",
        )
        .bind(encode_ts(&Utc::now()))
        .bind(resource.name())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remember the server total a full refresh verified against
    pub async fn record_verification(&self, resource: Resource, total: u64) -> Result<()> {
        let mut tx = self.begin_write().await?;
        let mut state = load_cursor(&mut *tx, resource).await?;
        state.last_total = Some(total);
        state.verified_at = Some(Utc::now());
        store_cursor(&mut *tx, &state).await?;
        tx.commit().await
    }

    /// Local row count of a resource
    pub async fn local_count(&self, resource: Resource) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", resource.table()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Delete rows the server no longer reports.
    ///
    /// Assignments carrying unacknowledged mutations are kept.
    pub async fn prune_missing(&self, resource: Resource, seen: &HashSet<i64>) -> Result<u64> {
        if resource == Resource::User {
            return Ok(0);
        }

        let table = resource.table();
        let ids_query = if resource == Resource::Assignments {
            "SELECT id FROM assignments WHERE pending_since IS NULL".to_string()
        } else {
            format!("SELECT id FROM {}", table)
        };
        let local: Vec<i64> = sqlx::query_scalar(&ids_query).fetch_all(&self.pool).await?;
        let missing: Vec<i64> = local.into_iter().filter(|id| !seen.contains(id)).collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let mut tx = self.begin_write().await?;
        let mut deleted = 0;
        for chunk in missing.chunks(PRUNE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut sql = format!("DELETE FROM {} WHERE id IN ({})", table, placeholders);
            if resource == Resource::Assignments {
                sql.push_str(" AND pending_since IS NULL");
            }
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            deleted += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        tracing::info!("Pruned {} {} row(s) missing on the server", deleted, resource);
        Ok(deleted)
    }
}

async fn write_items(conn: &mut SqliteConnection, items: &ResourceItems) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();
    match items {
        ResourceItems::Users(users) => {
            for user in users {
                stats.record(upsert_user(conn, user).await?);
            }
        }
        ResourceItems::Subjects(subjects) => {
            for subject in subjects {
                stats.record(upsert_subject(conn, subject).await?);
            }
        }
        ResourceItems::Assignments(assignments) => {
            for assignment in assignments {
                stats.record(upsert_assignment(conn, assignment).await?);
            }
        }
        ResourceItems::StudyMaterials(materials) => {
            for material in materials {
                stats.record(upsert_study_material(conn, material).await?);
            }
        }
        ResourceItems::ReviewStatistics(stats_items) => {
            for stat in stats_items {
                stats.record(upsert_review_statistic(conn, stat).await?);
            }
        }
        ResourceItems::LevelProgressions(progressions) => {
            for progression in progressions {
                stats.record(upsert_level_progression(conn, progression).await?);
            }
        }
        ResourceItems::VoiceActors(actors) => {
            for actor in actors {
                stats.record(upsert_voice_actor(conn, actor).await?);
            }
        }
    }
    Ok(stats)
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

async fn load_cursor(conn: &mut SqliteConnection, resource: Resource) -> Result<CursorState> {
    let row = sqlx::query(
        "SELECT resource, cursor, resume_token, pass_watermark, last_total, verified_at, updated_at
         FROM sync_metadata
         WHERE resource = ?",
    )
    .bind(resource.name())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_cursor(&row),
        None => Ok(CursorState::empty(resource)),
    }
}

async fn store_cursor(conn: &mut SqliteConnection, state: &CursorState) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO sync_metadata (
            resource, cursor, resume_token, pass_watermark, last_total, verified_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(state.resource.name())
    .bind(encode_opt_ts(&state.cursor))
    .bind(&state.resume_token)
    .bind(encode_opt_ts(&state.pass_watermark))
    .bind(state.last_total.map(|total| total as i64))
    .bind(encode_opt_ts(&state.verified_at))
    .bind(encode_ts(&Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn row_to_cursor(row: &SqliteRow) -> Result<CursorState> {
    let resource: String = row.try_get("resource")?;
    let last_total: Option<i64> = row.try_get("last_total")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(CursorState {
        resource: Resource::parse(&resource).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        cursor: decode_opt_ts(row.try_get("cursor")?)?,
        resume_token: row.try_get("resume_token")?,
        pass_watermark: decode_opt_ts(row.try_get("pass_watermark")?)?,
        last_total: last_total.map(|total| total.max(0) as u64),
        verified_at: decode_opt_ts(row.try_get("verified_at")?)?,
        updated_at: Some(decode_ts(&updated_at)?),
    })
}
