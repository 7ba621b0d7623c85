//! # Optimistic Assignment Display
//!
//! Predicts what an assignment will look like once its queued mutations are
//! acknowledged, so a lesson or a graded review shows its result immediately.
//!
//! The projection always starts from the canonical server state and replays
//! the unacknowledged mutations in sequence order through the fixed SRS table.
//! The store keeps the result in the assignment's overlay columns while the
//! pending flag is set; the remote response replaces it on acknowledgment.

use crate::client::offline::queue::{MutationPayload, PendingMutation};
use crate::shared::srs;
use crate::shared::Assignment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SRS fields of an assignment as the user should currently see them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticState {
    pub srs_stage: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub burned_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
}

impl OptimisticState {
    pub fn from_assignment(assignment: &Assignment) -> Self {
        Self {
            srs_stage: assignment.srs_stage,
            started_at: assignment.started_at,
            passed_at: assignment.passed_at,
            burned_at: assignment.burned_at,
            available_at: assignment.available_at,
        }
    }

    /// Apply one user action on top of the current state
    pub fn apply(&mut self, payload: &MutationPayload) {
        match payload {
            MutationPayload::LessonStart { started_at } => {
                if self.srs_stage != srs::LESSON_STAGE {
                    return;
                }
                self.srs_stage = srs::FIRST_REVIEW_STAGE;
                self.started_at = Some(*started_at);
                self.available_at = srs::next_review_at(self.srs_stage, *started_at);
            }
            MutationPayload::ReviewGrade {
                incorrect_meaning_answers,
                incorrect_reading_answers,
                created_at,
            } => {
                // Lessons and burned items have nothing to review
                if self.srs_stage == srs::LESSON_STAGE || self.srs_stage == srs::BURNED_STAGE {
                    return;
                }
                self.srs_stage = srs::next_stage(
                    self.srs_stage,
                    *incorrect_meaning_answers,
                    *incorrect_reading_answers,
                );
                if self.srs_stage >= srs::PASSING_STAGE && self.passed_at.is_none() {
                    self.passed_at = Some(*created_at);
                }
                if self.srs_stage == srs::BURNED_STAGE {
                    self.burned_at = Some(*created_at);
                }
                self.available_at = srs::next_review_at(self.srs_stage, *created_at);
            }
        }
    }
}

/// Project `mutations` (in replay order) on top of the canonical assignment
pub fn project<'a>(
    canonical: &Assignment,
    mutations: impl IntoIterator<Item = &'a PendingMutation>,
) -> OptimisticState {
    let mut state = OptimisticState::from_assignment(canonical);
    for mutation in mutations {
        state.apply(&mutation.payload);
    }
    state
}
