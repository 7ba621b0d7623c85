//! Synced Entity Types
//!
//! Plain data types for every resource the engine pulls from the remote
//! learning service, plus the `Resource` enum naming them in phase order.
//!
//! Every record carries `data_updated_at`, the server's last-modified stamp.
//! The local store only replaces a row with a version whose stamp is at least
//! as new as the stored one, and sync cursors are built from these stamps.

use crate::shared::error::SharedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of study subject
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Radical,
    Kanji,
    Vocabulary,
    KanaVocabulary,
}

impl SubjectType {
    /// Name used on the wire and in the local store
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Radical => "radical",
            SubjectType::Kanji => "kanji",
            SubjectType::Vocabulary => "vocabulary",
            SubjectType::KanaVocabulary => "kana_vocabulary",
        }
    }

    /// Parse a stored subject type name
    pub fn parse(raw: &str) -> Result<Self, SharedError> {
        match raw {
            "radical" => Ok(SubjectType::Radical),
            "kanji" => Ok(SubjectType::Kanji),
            "vocabulary" => Ok(SubjectType::Vocabulary),
            "kana_vocabulary" => Ok(SubjectType::KanaVocabulary),
            other => Err(SharedError::unknown("subject type", other)),
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted meaning of a subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meaning {
    pub meaning: String,
    pub primary: bool,
    #[serde(default = "default_true")]
    pub accepted_answer: bool,
}

/// An accepted reading of a subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reading {
    pub reading: String,
    pub primary: bool,
    #[serde(default = "default_true")]
    pub accepted_answer: bool,
    /// onyomi / kunyomi / nanori for kanji readings
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Immutable reference item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: i64,
    #[serde(rename = "type")]
    pub subject_type: SubjectType,
    pub level: u8,
    pub characters: Option<String>,
    #[serde(default)]
    pub meanings: Vec<Meaning>,
    #[serde(default)]
    pub readings: Vec<Reading>,
    /// Subjects this one is built from
    #[serde(default)]
    pub component_subject_ids: Vec<i64>,
    /// Subjects built from this one
    #[serde(default)]
    pub amalgamation_subject_ids: Vec<i64>,
    #[serde(default)]
    pub visually_similar_subject_ids: Vec<i64>,
    #[serde(default)]
    pub hidden_at: Option<DateTime<Utc>>,
    pub data_updated_at: DateTime<Utc>,
}

impl Subject {
    /// Every subject id this subject references
    pub fn referenced_subject_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.component_subject_ids
            .iter()
            .chain(self.amalgamation_subject_ids.iter())
            .chain(self.visually_similar_subject_ids.iter())
            .copied()
    }
}

/// Per-user SRS state for a subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub id: i64,
    pub subject_id: i64,
    pub subject_type: SubjectType,
    pub srs_stage: u8,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub passed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub burned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub available_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hidden: bool,
    pub data_updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Reject stages outside the SRS table
    pub fn validate(&self) -> Result<(), SharedError> {
        if self.srs_stage > crate::shared::srs::BURNED_STAGE {
            return Err(SharedError::invalid(
                "srs_stage",
                format!("stage {} is outside 0..=9", self.srs_stage),
            ));
        }
        Ok(())
    }
}

/// User notes and synonyms for a subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyMaterial {
    pub id: i64,
    pub subject_id: i64,
    #[serde(default)]
    pub meaning_note: Option<String>,
    #[serde(default)]
    pub reading_note: Option<String>,
    #[serde(default)]
    pub meaning_synonyms: Vec<String>,
    pub data_updated_at: DateTime<Utc>,
}

/// Answer counters for a subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewStatistic {
    pub id: i64,
    pub subject_id: i64,
    pub meaning_correct: u32,
    pub meaning_incorrect: u32,
    pub meaning_current_streak: u32,
    pub reading_correct: u32,
    pub reading_incorrect: u32,
    pub reading_current_streak: u32,
    pub percentage_correct: u8,
    pub data_updated_at: DateTime<Utc>,
}

/// Progress through one level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelProgression {
    pub id: i64,
    pub level: u8,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub passed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub abandoned_at: Option<DateTime<Utc>>,
    pub data_updated_at: DateTime<Utc>,
}

/// Voice actor credited on vocabulary audio
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceActor {
    pub id: i64,
    pub name: String,
    pub gender: String,
    #[serde(default)]
    pub description: String,
    pub data_updated_at: DateTime<Utc>,
}

/// Account profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub level: u8,
    pub max_level_granted: u8,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub current_vacation_started_at: Option<DateTime<Utc>>,
    pub data_updated_at: DateTime<Utc>,
}

/// Remote resource pulled in one sync phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    User,
    Subjects,
    Assignments,
    StudyMaterials,
    ReviewStatistics,
    LevelProgressions,
    VoiceActors,
}

impl Resource {
    /// Default phase order: later resources reference earlier ones by id
    pub const PHASE_ORDER: [Resource; 7] = [
        Resource::User,
        Resource::Subjects,
        Resource::Assignments,
        Resource::StudyMaterials,
        Resource::ReviewStatistics,
        Resource::LevelProgressions,
        Resource::VoiceActors,
    ];

    /// Name used for endpoints, cursor rows and progress messages
    pub fn name(&self) -> &'static str {
        match self {
            Resource::User => "user",
            Resource::Subjects => "subjects",
            Resource::Assignments => "assignments",
            Resource::StudyMaterials => "study_materials",
            Resource::ReviewStatistics => "review_statistics",
            Resource::LevelProgressions => "level_progressions",
            Resource::VoiceActors => "voice_actors",
        }
    }

    /// Local table holding this resource
    pub fn table(&self) -> &'static str {
        match self {
            Resource::User => "users",
            other => other.name(),
        }
    }

    /// Parse a resource name
    pub fn parse(raw: &str) -> Result<Self, SharedError> {
        Resource::PHASE_ORDER
            .iter()
            .copied()
            .find(|resource| resource.name() == raw)
            .ok_or_else(|| SharedError::unknown("resource", raw))
    }

    /// Resources whose rows this resource references by id
    pub fn depends_on(&self) -> &'static [Resource] {
        match self {
            Resource::User | Resource::Subjects | Resource::VoiceActors => &[],
            Resource::Assignments | Resource::StudyMaterials | Resource::ReviewStatistics => {
                &[Resource::Subjects]
            }
            Resource::LevelProgressions => &[Resource::User],
        }
    }

    /// Whether the resource is fetched page by page
    pub fn is_paginated(&self) -> bool {
        !matches!(self, Resource::User)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
