//! # Entity Storage
//!
//! Typed reads and writes for every resource pulled from the remote service.
//!
//! ## Features
//!
//! - **Versioned Upserts**: every writer reconciles the incoming row against
//!   the stored `data_updated_at` and drops older versions
//! - **Connection-Level Writers**: writers take a `SqliteConnection` so a page
//!   of items and its cursor update share one transaction
//! - **Effective Reads**: assignment reads go through `effective_assignments`,
//!   which shows the optimistic overlay while mutations are pending
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kioku::client::local_db::LocalDatabase;
//!
//! # async fn example(db: LocalDatabase) -> sqlx::Result<()> {
//! if let Some(view) = db.get_assignment(440).await? {
//!     println!("stage {} (pending: {})", view.assignment.srs_stage, view.pending);
//! }
//! # Ok(())
//! # }
//! ```

use crate::client::local_db::{
    decode_json, decode_opt_ts, decode_small, decode_ts, encode_json, encode_opt_ts, encode_ts,
    LocalDatabase, Result,
};
use crate::client::offline::reconciliation::{reconcile, Reconciliation, RowVersion};
use crate::shared::{
    Assignment, LevelProgression, ReviewStatistic, StudyMaterial, Subject, SubjectType, User,
    VoiceActor,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// Assignment as the user currently sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentView {
    pub assignment: Assignment,
    /// Unacknowledged mutations are shaping the displayed state
    pub pending: bool,
}

impl LocalDatabase {
    /// Profile of the signed-in user
    pub async fn get_user(&self) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, level, max_level_granted, started_at,
                    current_vacation_started_at, data_updated_at
             FROM users
             ORDER BY data_updated_at DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn get_subject(&self, id: i64) -> Result<Option<Subject>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SUBJECT_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_subject).transpose()
    }

    /// Visible subjects of one level, ordered by id
    pub async fn subjects_at_level(&self, level: u8) -> Result<Vec<Subject>> {
        let rows = sqlx::query(&format!(
            "{} WHERE level = ? AND hidden_at IS NULL ORDER BY id ASC",
            SUBJECT_SELECT
        ))
        .bind(level as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_subject).collect()
    }

    /// Assignment for a subject, with the optimistic overlay applied
    pub async fn get_assignment(&self, subject_id: i64) -> Result<Option<AssignmentView>> {
        let row = sqlx::query(
            "SELECT id, subject_id, subject_type, srs_stage, unlocked_at, started_at,
                    passed_at, burned_at, available_at, hidden, data_updated_at, has_pending
             FROM effective_assignments
             WHERE subject_id = ?",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(AssignmentView {
                assignment: row_to_assignment(&row)?,
                pending: row.try_get("has_pending")?,
            })),
            None => Ok(None),
        }
    }

    /// Last server-confirmed state of a subject's assignment
    pub async fn get_canonical_assignment(&self, subject_id: i64) -> Result<Option<Assignment>> {
        let mut conn = self.pool.acquire().await?;
        canonical_assignment(&mut conn, subject_id).await
    }

    pub async fn get_study_material(&self, subject_id: i64) -> Result<Option<StudyMaterial>> {
        let row = sqlx::query(
            "SELECT id, subject_id, meaning_note, reading_note, meaning_synonyms, data_updated_at
             FROM study_materials
             WHERE subject_id = ?
             ORDER BY data_updated_at DESC
             LIMIT 1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_study_material).transpose()
    }

    pub async fn get_review_statistic(&self, subject_id: i64) -> Result<Option<ReviewStatistic>> {
        let row = sqlx::query(
            "SELECT id, subject_id, meaning_correct, meaning_incorrect, meaning_current_streak,
                    reading_correct, reading_incorrect, reading_current_streak,
                    percentage_correct, data_updated_at
             FROM review_statistics
             WHERE subject_id = ?
             ORDER BY data_updated_at DESC
             LIMIT 1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_review_statistic).transpose()
    }

    pub async fn get_level_progressions(&self) -> Result<Vec<LevelProgression>> {
        let rows = sqlx::query(
            "SELECT id, level, unlocked_at, started_at, passed_at, completed_at, abandoned_at,
                    data_updated_at
             FROM level_progressions
             ORDER BY level ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_level_progression).collect()
    }

    pub async fn get_voice_actors(&self) -> Result<Vec<VoiceActor>> {
        let rows = sqlx::query(
            "SELECT id, name, gender, description, data_updated_at FROM voice_actors ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(VoiceActor {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    gender: row.try_get("gender")?,
                    description: row.try_get("description")?,
                    data_updated_at: decode_ts(&row.try_get::<String, _>("data_updated_at")?)?,
                })
            })
            .collect()
    }
}

const SUBJECT_SELECT: &str = "SELECT id, subject_type, level, characters, meanings, readings,
        component_subject_ids, amalgamation_subject_ids, visually_similar_subject_ids,
        hidden_at, data_updated_at
     FROM subjects";

async fn stored_version(
    conn: &mut SqliteConnection,
    table: &str,
    id: i64,
) -> Result<Option<RowVersion>> {
    let raw: Option<String> =
        sqlx::query_scalar(&format!("SELECT data_updated_at FROM {} WHERE id = ?", table))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    raw.as_deref()
        .map(|raw| decode_ts(raw).map(RowVersion::new))
        .transpose()
}

pub(crate) async fn upsert_user(conn: &mut SqliteConnection, user: &User) -> Result<Reconciliation> {
    let raw: Option<String> = sqlx::query_scalar("SELECT data_updated_at FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_optional(&mut *conn)
        .await?;
    let stored = raw.as_deref().map(decode_ts).transpose()?.map(RowVersion::new);

    let outcome = reconcile(stored.as_ref(), user.data_updated_at);
    if !outcome.writes() {
        return Ok(outcome);
    }

    sqlx::query(
        "INSERT OR REPLACE INTO users (
            id, username, level, max_level_granted, started_at,
            current_vacation_started_at, data_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(user.level as i64)
    .bind(user.max_level_granted as i64)
    .bind(encode_ts(&user.started_at))
    .bind(encode_opt_ts(&user.current_vacation_started_at))
    .bind(encode_ts(&user.data_updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(outcome)
}

pub(crate) async fn upsert_subject(
    conn: &mut SqliteConnection,
    subject: &Subject,
) -> Result<Reconciliation> {
    let stored = stored_version(conn, "subjects", subject.id).await?;
    let outcome = reconcile(stored.as_ref(), subject.data_updated_at);
    if !outcome.writes() {
        return Ok(outcome);
    }

    sqlx::query(
        "INSERT OR REPLACE INTO subjects (
            id, subject_type, level, characters, meanings, readings,
            component_subject_ids, amalgamation_subject_ids, visually_similar_subject_ids,
            hidden_at, data_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(subject.id)
    .bind(subject.subject_type.as_str())
    .bind(subject.level as i64)
    .bind(&subject.characters)
    .bind(encode_json(&subject.meanings)?)
    .bind(encode_json(&subject.readings)?)
    .bind(encode_json(&subject.component_subject_ids)?)
    .bind(encode_json(&subject.amalgamation_subject_ids)?)
    .bind(encode_json(&subject.visually_similar_subject_ids)?)
    .bind(encode_opt_ts(&subject.hidden_at))
    .bind(encode_ts(&subject.data_updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(outcome)
}

/// Write the canonical columns of an assignment.
///
/// The optimistic overlay is never touched here. A newly inserted row gets its
/// overlay built from any mutations queued before it was first pulled.
pub(crate) async fn upsert_assignment(
    conn: &mut SqliteConnection,
    assignment: &Assignment,
) -> Result<Reconciliation> {
    let row = sqlx::query("SELECT data_updated_at, pending_since FROM assignments WHERE id = ?")
        .bind(assignment.id)
        .fetch_optional(&mut *conn)
        .await?;
    let stored = match row {
        Some(row) => Some(
            RowVersion::new(decode_ts(&row.try_get::<String, _>("data_updated_at")?)?)
                .with_pending(decode_opt_ts(row.try_get("pending_since")?)?),
        ),
        None => None,
    };

    let outcome = reconcile(stored.as_ref(), assignment.data_updated_at);
    if !outcome.writes() {
        return Ok(outcome);
    }

    sqlx::query(
        "INSERT INTO assignments (
            id, subject_id, subject_type, srs_stage, unlocked_at, started_at,
            passed_at, burned_at, available_at, hidden, data_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            subject_id = excluded.subject_id,
            subject_type = excluded.subject_type,
            srs_stage = excluded.srs_stage,
            unlocked_at = excluded.unlocked_at,
            started_at = excluded.started_at,
            passed_at = excluded.passed_at,
            burned_at = excluded.burned_at,
            available_at = excluded.available_at,
            hidden = excluded.hidden,
            data_updated_at = excluded.data_updated_at",
    )
    .bind(assignment.id)
    .bind(assignment.subject_id)
    .bind(assignment.subject_type.as_str())
    .bind(assignment.srs_stage as i64)
    .bind(encode_opt_ts(&assignment.unlocked_at))
    .bind(encode_opt_ts(&assignment.started_at))
    .bind(encode_opt_ts(&assignment.passed_at))
    .bind(encode_opt_ts(&assignment.burned_at))
    .bind(encode_opt_ts(&assignment.available_at))
    .bind(assignment.hidden)
    .bind(encode_ts(&assignment.data_updated_at))
    .execute(&mut *conn)
    .await?;

    if outcome == Reconciliation::Insert {
        crate::client::local_db::queue::reproject_pending(conn, assignment.subject_id).await?;
    }

    Ok(outcome)
}

pub(crate) async fn upsert_study_material(
    conn: &mut SqliteConnection,
    material: &StudyMaterial,
) -> Result<Reconciliation> {
    let stored = stored_version(conn, "study_materials", material.id).await?;
    let outcome = reconcile(stored.as_ref(), material.data_updated_at);
    if !outcome.writes() {
        return Ok(outcome);
    }

    sqlx::query(
        "INSERT OR REPLACE INTO study_materials (
            id, subject_id, meaning_note, reading_note, meaning_synonyms, data_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(material.id)
    .bind(material.subject_id)
    .bind(&material.meaning_note)
    .bind(&material.reading_note)
    .bind(encode_json(&material.meaning_synonyms)?)
    .bind(encode_ts(&material.data_updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(outcome)
}

pub(crate) async fn upsert_review_statistic(
    conn: &mut SqliteConnection,
    stat: &ReviewStatistic,
) -> Result<Reconciliation> {
    let stored = stored_version(conn, "review_statistics", stat.id).await?;
    let outcome = reconcile(stored.as_ref(), stat.data_updated_at);
    if !outcome.writes() {
        return Ok(outcome);
    }

    sqlx::query(
        "INSERT OR REPLACE INTO review_statistics (
            id, subject_id, meaning_correct, meaning_incorrect, meaning_current_streak,
            reading_correct, reading_incorrect, reading_current_streak,
            percentage_correct, data_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(stat.id)
    .bind(stat.subject_id)
    .bind(stat.meaning_correct as i64)
    .bind(stat.meaning_incorrect as i64)
    .bind(stat.meaning_current_streak as i64)
    .bind(stat.reading_correct as i64)
    .bind(stat.reading_incorrect as i64)
    .bind(stat.reading_current_streak as i64)
    .bind(stat.percentage_correct as i64)
    .bind(encode_ts(&stat.data_updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(outcome)
}

pub(crate) async fn upsert_level_progression(
    conn: &mut SqliteConnection,
    progression: &LevelProgression,
) -> Result<Reconciliation> {
    let stored = stored_version(conn, "level_progressions", progression.id).await?;
    let outcome = reconcile(stored.as_ref(), progression.data_updated_at);
    if !outcome.writes() {
        return Ok(outcome);
    }

    sqlx::query(
        "INSERT OR REPLACE INTO level_progressions (
            id, level, unlocked_at, started_at, passed_at, completed_at, abandoned_at,
            data_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(progression.id)
    .bind(progression.level as i64)
    .bind(encode_opt_ts(&progression.unlocked_at))
    .bind(encode_opt_ts(&progression.started_at))
    .bind(encode_opt_ts(&progression.passed_at))
    .bind(encode_opt_ts(&progression.completed_at))
    .bind(encode_opt_ts(&progression.abandoned_at))
    .bind(encode_ts(&progression.data_updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(outcome)
}

pub(crate) async fn upsert_voice_actor(
    conn: &mut SqliteConnection,
    actor: &VoiceActor,
) -> Result<Reconciliation> {
    let stored = stored_version(conn, "voice_actors", actor.id).await?;
    let outcome = reconcile(stored.as_ref(), actor.data_updated_at);
    if !outcome.writes() {
        return Ok(outcome);
    }

    sqlx::query(
        "INSERT OR REPLACE INTO voice_actors (id, name, gender, description, data_updated_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(actor.id)
    .bind(&actor.name)
    .bind(&actor.gender)
    .bind(&actor.description)
    .bind(encode_ts(&actor.data_updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(outcome)
}

pub(crate) async fn canonical_assignment(
    conn: &mut SqliteConnection,
    subject_id: i64,
) -> Result<Option<Assignment>> {
    let row = sqlx::query(
        "SELECT id, subject_id, subject_type, srs_stage, unlocked_at, started_at,
                passed_at, burned_at, available_at, hidden, data_updated_at
         FROM assignments
         WHERE subject_id = ?",
    )
    .bind(subject_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_assignment).transpose()
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        level: decode_small(row.try_get("level")?, "level")?,
        max_level_granted: decode_small(row.try_get("max_level_granted")?, "max_level_granted")?,
        started_at: decode_ts(&row.try_get::<String, _>("started_at")?)?,
        current_vacation_started_at: decode_opt_ts(row.try_get("current_vacation_started_at")?)?,
        data_updated_at: decode_ts(&row.try_get::<String, _>("data_updated_at")?)?,
    })
}

fn row_to_subject(row: &SqliteRow) -> Result<Subject> {
    Ok(Subject {
        id: row.try_get("id")?,
        subject_type: decode_subject_type(row)?,
        level: decode_small(row.try_get("level")?, "level")?,
        characters: row.try_get("characters")?,
        meanings: decode_json(&row.try_get::<String, _>("meanings")?)?,
        readings: decode_json(&row.try_get::<String, _>("readings")?)?,
        component_subject_ids: decode_json(&row.try_get::<String, _>("component_subject_ids")?)?,
        amalgamation_subject_ids: decode_json(
            &row.try_get::<String, _>("amalgamation_subject_ids")?,
        )?,
        visually_similar_subject_ids: decode_json(
            &row.try_get::<String, _>("visually_similar_subject_ids")?,
        )?,
        hidden_at: decode_opt_ts(row.try_get("hidden_at")?)?,
        data_updated_at: decode_ts(&row.try_get::<String, _>("data_updated_at")?)?,
    })
}

fn row_to_assignment(row: &SqliteRow) -> Result<Assignment> {
    Ok(Assignment {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        subject_type: decode_subject_type(row)?,
        srs_stage: decode_small(row.try_get("srs_stage")?, "srs_stage")?,
        unlocked_at: decode_opt_ts(row.try_get("unlocked_at")?)?,
        started_at: decode_opt_ts(row.try_get("started_at")?)?,
        passed_at: decode_opt_ts(row.try_get("passed_at")?)?,
        burned_at: decode_opt_ts(row.try_get("burned_at")?)?,
        available_at: decode_opt_ts(row.try_get("available_at")?)?,
        hidden: row.try_get("hidden")?,
        data_updated_at: decode_ts(&row.try_get::<String, _>("data_updated_at")?)?,
    })
}

fn row_to_study_material(row: &SqliteRow) -> Result<StudyMaterial> {
    Ok(StudyMaterial {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        meaning_note: row.try_get("meaning_note")?,
        reading_note: row.try_get("reading_note")?,
        meaning_synonyms: decode_json(&row.try_get::<String, _>("meaning_synonyms")?)?,
        data_updated_at: decode_ts(&row.try_get::<String, _>("data_updated_at")?)?,
    })
}

fn row_to_review_statistic(row: &SqliteRow) -> Result<ReviewStatistic> {
    Ok(ReviewStatistic {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        meaning_correct: decode_count(row, "meaning_correct")?,
        meaning_incorrect: decode_count(row, "meaning_incorrect")?,
        meaning_current_streak: decode_count(row, "meaning_current_streak")?,
        reading_correct: decode_count(row, "reading_correct")?,
        reading_incorrect: decode_count(row, "reading_incorrect")?,
        reading_current_streak: decode_count(row, "reading_current_streak")?,
        percentage_correct: decode_small(row.try_get("percentage_correct")?, "percentage_correct")?,
        data_updated_at: decode_ts(&row.try_get::<String, _>("data_updated_at")?)?,
    })
}

fn row_to_level_progression(row: &SqliteRow) -> Result<LevelProgression> {
    Ok(LevelProgression {
        id: row.try_get("id")?,
        level: decode_small(row.try_get("level")?, "level")?,
        unlocked_at: decode_opt_ts(row.try_get("unlocked_at")?)?,
        started_at: decode_opt_ts(row.try_get("started_at")?)?,
        passed_at: decode_opt_ts(row.try_get("passed_at")?)?,
        completed_at: decode_opt_ts(row.try_get("completed_at")?)?,
        abandoned_at: decode_opt_ts(row.try_get("abandoned_at")?)?,
        data_updated_at: decode_ts(&row.try_get::<String, _>("data_updated_at")?)?,
    })
}

fn decode_subject_type(row: &SqliteRow) -> Result<SubjectType> {
    let raw: String = row.try_get("subject_type")?;
    SubjectType::parse(&raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_count(row: &SqliteRow, column: &'static str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("value {} does not fit in u32", value).into(),
    })
}
