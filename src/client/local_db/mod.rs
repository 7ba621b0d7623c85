//! # Local Database Module
//!
//! Local SQLite storage for the offline-first study client. It mirrors the
//! remote resources the engine pulls and adds the two control tables the
//! engine owns.
//!
//! ## Architecture
//!
//! - **Entity tables**: users, subjects, assignments, study materials, review
//!   statistics, level progressions, voice actors
//! - **Sync Metadata**: per-resource cursor, plus the resume token of a
//!   partially committed pass
//! - **Pending Mutations**: durable, ordered queue of user actions awaiting
//!   acknowledgment
//! - **Daily Activity**: per-day lesson and review totals
//!
//! Every write that touches more than one row runs in a single transaction.
//! A page of pulled items and the cursor update it justifies commit together
//! or not at all.
//!
//! ## Key Components
//!
//! - `schema.rs`: schema version bookkeeping
//! - `entities.rs`: typed upserts and reads for pulled resources
//! - `sync.rs`: page commits, cursors and full-refresh verification helpers
//! - `queue.rs`: pending mutation rows and optimistic projection
//! - `queries.rs`: read-side queries for the UI layer
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kioku::client::local_db::LocalDatabase;
//!
//! # async fn example() -> sqlx::Result<()> {
//! let db = LocalDatabase::open_in_memory().await?;
//! let stats = db.get_stats().await?;
//! assert_eq!(stats.pending_mutations, 0);
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod queries;
pub mod queue;
pub mod schema;
pub mod sync;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Result as SqlxResult, Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Result type for local database operations
pub type Result<T> = SqlxResult<T>;

/// Local database connection manager
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the local database at `path`.
    ///
    /// Uses WAL mode so read-side queries never wait on a sync transaction.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        tracing::debug!("Opened local database at {}", path.display());
        Ok(db)
    }

    /// Open a private in-memory database.
    ///
    /// A single connection keeps every query on the same memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Platform-specific default location of the database file
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("kioku");
        path.push("local.db");
        path
    }

    /// Create all tables and record applied migrations
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&self.pool)
            .await?;

        self.run_migrations().await
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let (current_version,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        for version in schema::get_pending_migrations(current_version as i32) {
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(encode_ts(&Utc::now()))
                .execute(&self.pool)
                .await?;
            tracing::info!("Applied local schema migration {}", version);
        }

        Ok(())
    }

    /// Start a transaction holding the write lock from its first statement.
    ///
    /// Under WAL a deferred transaction that reads first fails its lock
    /// upgrade with `SQLITE_BUSY` immediately; `BEGIN IMMEDIATE` waits on
    /// the busy timeout instead.
    pub(crate) async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Row counts for debugging and status output
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let (subjects,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subjects")
            .fetch_one(&self.pool)
            .await?;
        let (assignments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM assignments")
            .fetch_one(&self.pool)
            .await?;
        let (study_materials,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM study_materials")
            .fetch_one(&self.pool)
            .await?;
        let (pending_mutations,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pending_mutations WHERE status != 'failed_terminal'",
        )
        .fetch_one(&self.pool)
        .await?;
        let (dead_letters,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pending_mutations WHERE status = 'failed_terminal'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            subject_count: subjects as u64,
            assignment_count: assignments as u64,
            study_material_count: study_materials as u64,
            pending_mutations: pending_mutations as u64,
            dead_letters: dead_letters as u64,
        })
    }

    /// Remove every synced row, cursor and queued mutation (logout)
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.begin_write().await?;
        for table in [
            "users",
            "subjects",
            "assignments",
            "study_materials",
            "review_statistics",
            "level_progressions",
            "voice_actors",
            "sync_metadata",
            "pending_mutations",
            "daily_activity",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!("Local database reset");
        Ok(())
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub subject_count: u64,
    pub assignment_count: u64,
    pub study_material_count: u64,
    /// Mutations still awaiting acknowledgment
    pub pending_mutations: u64,
    /// Terminally failed mutations awaiting a user decision
    pub dead_letters: u64,
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(encode_ts)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(crate) fn decode_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_ts).transpose()
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| sqlx::Error::Protocol(format!("JSON serialization error: {}", e)))
}

pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(crate) fn decode_small(value: i64, column: &'static str) -> Result<u8> {
    u8::try_from(value).map_err(|_| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("value {} does not fit in u8", value).into(),
    })
}
