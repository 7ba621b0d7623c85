//! # SRS Stage Table
//!
//! Fixed spaced-repetition schedule shared by the optimistic display and the
//! tests. The remote service is authoritative for real transitions; this table
//! only predicts what it will answer so the UI can show the result of a grade
//! before the grade is acknowledged.
//!
//! | stage | name          | next review after |
//! |-------|---------------|-------------------|
//! | 0     | lesson        | -                 |
//! | 1-4   | apprentice    | 4h, 8h, 23h, 47h  |
//! | 5-6   | guru          | 167h, 335h        |
//! | 7     | master        | 719h              |
//! | 8     | enlightened   | 2879h             |
//! | 9     | burned        | never             |

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Stage of an assignment whose lesson has not been started
pub const LESSON_STAGE: u8 = 0;
/// Stage a started lesson lands on
pub const FIRST_REVIEW_STAGE: u8 = 1;
/// First stage that counts as passed
pub const PASSING_STAGE: u8 = 5;
/// Ceiling stage; the item never comes back
pub const BURNED_STAGE: u8 = 9;

const INTERVAL_HOURS: [Option<i64>; 10] = [
    None,
    Some(4),
    Some(8),
    Some(23),
    Some(47),
    Some(167),
    Some(335),
    Some(719),
    Some(2879),
    None,
];

/// Named group of stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SrsCategory {
    Lesson,
    Apprentice,
    Guru,
    Master,
    Enlightened,
    Burned,
}

impl SrsCategory {
    pub fn for_stage(stage: u8) -> Self {
        match stage {
            0 => SrsCategory::Lesson,
            1..=4 => SrsCategory::Apprentice,
            5 | 6 => SrsCategory::Guru,
            7 => SrsCategory::Master,
            8 => SrsCategory::Enlightened,
            _ => SrsCategory::Burned,
        }
    }
}

/// Wait before the next review at `stage`, or `None` for lesson and burned
pub fn interval(stage: u8) -> Option<TimeDelta> {
    INTERVAL_HOURS
        .get(stage as usize)
        .copied()
        .flatten()
        .map(TimeDelta::hours)
}

/// Stage after a correct answer
pub fn promote(stage: u8) -> u8 {
    stage.saturating_add(1).min(BURNED_STAGE)
}

/// Stage after `incorrect` wrong answers.
///
/// Every two wrong answers (rounded up) cost one stage, doubled from guru
/// upwards. A reviewed item never falls back to the lesson stage.
pub fn demote(stage: u8, incorrect: u32) -> u8 {
    if incorrect == 0 {
        return stage;
    }
    let adjustment = incorrect.div_ceil(2);
    let penalty = if stage >= PASSING_STAGE { 2 } else { 1 };
    let drop = adjustment.saturating_mul(penalty);
    let lowered = (stage as u32).saturating_sub(drop);
    lowered.max(FIRST_REVIEW_STAGE as u32) as u8
}

/// Stage after a graded review
pub fn next_stage(stage: u8, incorrect_meaning: u32, incorrect_reading: u32) -> u8 {
    let incorrect = incorrect_meaning.saturating_add(incorrect_reading);
    if incorrect == 0 {
        promote(stage)
    } else {
        demote(stage, incorrect)
    }
}

/// When an item that reached `stage` at `at` becomes reviewable again
pub fn next_review_at(stage: u8, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    interval(stage).map(|wait| floor_to_hour(at + wait))
}

/// Start of the hour containing `at`; reviews unlock on the hour
pub fn floor_to_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::hours(1)).unwrap_or(at)
}
