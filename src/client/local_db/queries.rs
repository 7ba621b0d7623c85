//! # Read-Side Queries
//!
//! Pure reads for dashboards and badges. They see assignments through the
//! optimistic overlay, so a review graded offline leaves the review count and
//! shows up in the forecast at its predicted time straight away.

use crate::client::local_db::{decode_ts, encode_ts, LocalDatabase, Result};
use crate::shared::srs::{floor_to_hour, BURNED_STAGE, FIRST_REVIEW_STAGE, LESSON_STAGE};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::BTreeMap;

/// Reviews unlocking within one hour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastBucket {
    /// Top of the hour the reviews unlock at
    pub hour: DateTime<Utc>,
    pub count: u64,
    /// Reviews available by the end of this hour, current backlog included
    pub cumulative: u64,
}

/// Lessons and reviews done on one UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub day: NaiveDate,
    pub lessons: u64,
    pub reviews: u64,
}

impl LocalDatabase {
    /// Mutations awaiting acknowledgment, dead letters excluded
    pub async fn pending_mutation_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pending_mutations WHERE status != 'failed_terminal'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Reviews due at `now`
    pub async fn available_review_count(&self, now: DateTime<Utc>) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM effective_assignments
             WHERE hidden = 0
               AND srs_stage BETWEEN ? AND ?
               AND available_at IS NOT NULL
               AND available_at <= ?",
        )
        .bind(FIRST_REVIEW_STAGE as i64)
        .bind((BURNED_STAGE - 1) as i64)
        .bind(encode_ts(&now))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Unlocked subjects whose lesson has not been started
    pub async fn available_lesson_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM effective_assignments
             WHERE hidden = 0 AND srs_stage = ? AND unlocked_at IS NOT NULL",
        )
        .bind(LESSON_STAGE as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Hourly review forecast for the `hours` hours after `now`.
    ///
    /// Only hours that unlock at least one review are returned.
    pub async fn review_forecast(&self, now: DateTime<Utc>, hours: u32) -> Result<Vec<ForecastBucket>> {
        let until = now + TimeDelta::hours(hours as i64);
        let backlog = self.available_review_count(now).await?;

        let rows = sqlx::query(
            "SELECT available_at FROM effective_assignments
             WHERE hidden = 0
               AND srs_stage BETWEEN ? AND ?
               AND available_at > ?
               AND available_at <= ?
             ORDER BY available_at ASC",
        )
        .bind(FIRST_REVIEW_STAGE as i64)
        .bind((BURNED_STAGE - 1) as i64)
        .bind(encode_ts(&now))
        .bind(encode_ts(&until))
        .fetch_all(&self.pool)
        .await?;

        let mut per_hour: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
        for row in rows {
            let available_at = decode_ts(&row.try_get::<String, _>("available_at")?)?;
            *per_hour.entry(floor_to_hour(available_at)).or_default() += 1;
        }

        let mut cumulative = backlog;
        Ok(per_hour
            .into_iter()
            .map(|(hour, count)| {
                cumulative += count;
                ForecastBucket {
                    hour,
                    count,
                    cumulative,
                }
            })
            .collect())
    }

    /// Activity totals for `day`; zero when nothing was recorded
    pub async fn daily_activity(&self, day: NaiveDate) -> Result<DailyActivity> {
        let row = sqlx::query("SELECT lessons, reviews FROM daily_activity WHERE day = ?")
            .bind(day.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let (lessons, reviews) = match row {
            Some(row) => (
                row.try_get::<i64, _>("lessons")?,
                row.try_get::<i64, _>("reviews")?,
            ),
            None => (0, 0),
        };

        Ok(DailyActivity {
            day,
            lessons: lessons.max(0) as u64,
            reviews: reviews.max(0) as u64,
        })
    }
}
