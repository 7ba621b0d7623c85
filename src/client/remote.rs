//! # Remote Learning Service Client
//!
//! The sync engine talks to the authoritative service only through
//! [`RemoteService`]. [`HttpRemote`] implements it over HTTPS with `reqwest`;
//! tests substitute a scripted in-memory implementation.
//!
//! ## Wire Contract
//!
//! - `GET /user`: the profile object
//! - `GET /{resource}?updated_after=&page_after_id=&per_page=`: a page envelope
//!   `{items, next_page_cursor, total_count, data_updated_at}`
//! - `GET /assignments?subject_ids={id}`: targeted re-pull of one assignment
//! - `PUT /assignments/{id}/start` and `POST /reviews`: progress submissions,
//!   each carrying an `Idempotency-Key` header
//!
//! ## Failure Classification
//!
//! | response                          | error        |
//! |-----------------------------------|--------------|
//! | transport error, 408, 429, 5xx    | `Network`    |
//! | 401, 403                          | `Auth`       |
//! | 409                               | `Conflict`   |
//! | any other 4xx                     | `Validation` |
//! | undecodable body                  | `Decode`     |

use crate::client::error::SyncError;
use crate::client::offline::queue::MutationPayload;
use crate::shared::{
    AppConfig, Assignment, ConfigError, LevelProgression, Resource, ReviewStatistic, StudyMaterial,
    Subject, User, VoiceActor,
};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Per-request timeout; a timeout is a transient failure
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote failure, classified by how the engine must react to it
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("Rejected by server: {message}")]
    Validation { status: Option<u16>, message: String },

    #[error("Conflict with server state: {message}")]
    Conflict { message: String },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Decode(_))
    }
}

/// Filter and position of one page request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    /// Only items whose `data_updated_at` is after this
    pub updated_after: Option<DateTime<Utc>>,
    /// Opaque cursor from the previous page's `next_page_cursor`
    pub page_after: Option<String>,
    pub page_size: u32,
}

/// Items of one page, typed by resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceItems {
    Users(Vec<User>),
    Subjects(Vec<Subject>),
    Assignments(Vec<Assignment>),
    StudyMaterials(Vec<StudyMaterial>),
    ReviewStatistics(Vec<ReviewStatistic>),
    LevelProgressions(Vec<LevelProgression>),
    VoiceActors(Vec<VoiceActor>),
}

impl ResourceItems {
    pub fn empty(resource: Resource) -> Self {
        match resource {
            Resource::User => ResourceItems::Users(Vec::new()),
            Resource::Subjects => ResourceItems::Subjects(Vec::new()),
            Resource::Assignments => ResourceItems::Assignments(Vec::new()),
            Resource::StudyMaterials => ResourceItems::StudyMaterials(Vec::new()),
            Resource::ReviewStatistics => ResourceItems::ReviewStatistics(Vec::new()),
            Resource::LevelProgressions => ResourceItems::LevelProgressions(Vec::new()),
            Resource::VoiceActors => ResourceItems::VoiceActors(Vec::new()),
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            ResourceItems::Users(_) => Resource::User,
            ResourceItems::Subjects(_) => Resource::Subjects,
            ResourceItems::Assignments(_) => Resource::Assignments,
            ResourceItems::StudyMaterials(_) => Resource::StudyMaterials,
            ResourceItems::ReviewStatistics(_) => Resource::ReviewStatistics,
            ResourceItems::LevelProgressions(_) => Resource::LevelProgressions,
            ResourceItems::VoiceActors(_) => Resource::VoiceActors,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ResourceItems::Users(items) => items.len(),
            ResourceItems::Subjects(items) => items.len(),
            ResourceItems::Assignments(items) => items.len(),
            ResourceItems::StudyMaterials(items) => items.len(),
            ResourceItems::ReviewStatistics(items) => items.len(),
            ResourceItems::LevelProgressions(items) => items.len(),
            ResourceItems::VoiceActors(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric ids of the items; the user profile has none
    pub fn ids(&self) -> Vec<i64> {
        match self {
            ResourceItems::Users(_) => Vec::new(),
            ResourceItems::Subjects(items) => items.iter().map(|i| i.id).collect(),
            ResourceItems::Assignments(items) => items.iter().map(|i| i.id).collect(),
            ResourceItems::StudyMaterials(items) => items.iter().map(|i| i.id).collect(),
            ResourceItems::ReviewStatistics(items) => items.iter().map(|i| i.id).collect(),
            ResourceItems::LevelProgressions(items) => items.iter().map(|i| i.id).collect(),
            ResourceItems::VoiceActors(items) => items.iter().map(|i| i.id).collect(),
        }
    }

    /// Newest `data_updated_at` among the items
    pub fn max_updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ResourceItems::Users(items) => items.iter().map(|i| i.data_updated_at).max(),
            ResourceItems::Subjects(items) => items.iter().map(|i| i.data_updated_at).max(),
            ResourceItems::Assignments(items) => items.iter().map(|i| i.data_updated_at).max(),
            ResourceItems::StudyMaterials(items) => items.iter().map(|i| i.data_updated_at).max(),
            ResourceItems::ReviewStatistics(items) => items.iter().map(|i| i.data_updated_at).max(),
            ResourceItems::LevelProgressions(items) => items.iter().map(|i| i.data_updated_at).max(),
            ResourceItems::VoiceActors(items) => items.iter().map(|i| i.data_updated_at).max(),
        }
    }
}

/// One page of a resource collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: ResourceItems,
    /// Cursor of the following page; `None` on the last page
    pub next_page_cursor: Option<String>,
    /// Size of the whole filtered collection
    pub total_count: Option<u64>,
    /// Newest modification stamp of the collection when the page was served
    pub data_updated_at: Option<DateTime<Utc>>,
}

impl Page {
    /// Last and only page holding `items`
    pub fn single(items: ResourceItems) -> Self {
        let total = items.len() as u64;
        let stamp = items.max_updated_at();
        Self {
            items,
            next_page_cursor: None,
            total_count: Some(total),
            data_updated_at: stamp,
        }
    }
}

/// A queued mutation on its way to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSubmission {
    pub idempotency_key: Uuid,
    pub subject_id: i64,
    pub assignment_id: Option<i64>,
    pub payload: MutationPayload,
}

/// Canonical state the server returned for an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub assignment: Assignment,
    #[serde(default)]
    pub review_statistic: Option<ReviewStatistic>,
}

/// Authoritative remote collaborator of the sync engine
pub trait RemoteService: Send + Sync {
    /// Profile of the authenticated user
    fn fetch_user(&self) -> BoxFuture<'_, Result<User, RemoteError>>;

    /// One page of a paginated resource
    fn fetch_page<'a>(
        &'a self,
        resource: Resource,
        query: &'a PageQuery,
    ) -> BoxFuture<'a, Result<Page, RemoteError>>;

    /// Current server state of one subject's assignment
    fn fetch_assignment(&self, subject_id: i64) -> BoxFuture<'_, Result<Option<Assignment>, RemoteError>>;

    /// Submit a progress mutation; resubmitting the same key has no further effect
    fn submit<'a>(
        &'a self,
        submission: &'a ProgressSubmission,
    ) -> BoxFuture<'a, Result<SubmissionReceipt, RemoteError>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    items: Vec<T>,
    #[serde(default)]
    next_page_cursor: Option<String>,
    #[serde(default)]
    total_count: Option<u64>,
    #[serde(default)]
    data_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct StartLessonBody {
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ReviewBody {
    subject_id: i64,
    assignment_id: Option<i64>,
    incorrect_meaning_answers: u32,
    incorrect_reading_answers: u32,
    created_at: DateTime<Utc>,
}

/// HTTPS implementation of [`RemoteService`]
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    pub fn new(config: &AppConfig) -> Result<Self, SyncError> {
        let base_url = config
            .server_url
            .as_deref()
            .ok_or(ConfigError::MissingValue("server_url"))?;
        let token = config
            .api_token
            .clone()
            .ok_or(ConfigError::MissingValue("api_token"))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(classify_status(status, body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &PageQuery,
    ) -> Result<Envelope<T>, RemoteError> {
        let mut params: Vec<(&str, String)> = vec![("per_page", query.page_size.to_string())];
        if let Some(after) = &query.updated_after {
            params.push(("updated_after", after.to_rfc3339()));
        }
        if let Some(page_after) = &query.page_after {
            params.push(("page_after_id", page_after.clone()));
        }

        let request = self
            .client
            .get(self.url(&format!("/{}", resource.name())))
            .query(&params);
        self.send(request).await
    }

    async fn fetch_page_typed(&self, resource: Resource, query: &PageQuery) -> Result<Page, RemoteError> {
        macro_rules! page {
            ($variant:ident) => {{
                let envelope = self.get_page(resource, query).await?;
                Page {
                    items: ResourceItems::$variant(envelope.items),
                    next_page_cursor: envelope.next_page_cursor,
                    total_count: envelope.total_count,
                    data_updated_at: envelope.data_updated_at,
                }
            }};
        }

        Ok(match resource {
            Resource::User => {
                let user: User = self.send(self.client.get(self.url("/user"))).await?;
                Page::single(ResourceItems::Users(vec![user]))
            }
            Resource::Subjects => page!(Subjects),
            Resource::Assignments => page!(Assignments),
            Resource::StudyMaterials => page!(StudyMaterials),
            Resource::ReviewStatistics => page!(ReviewStatistics),
            Resource::LevelProgressions => page!(LevelProgressions),
            Resource::VoiceActors => page!(VoiceActors),
        })
    }

    async fn submit_typed(&self, submission: &ProgressSubmission) -> Result<SubmissionReceipt, RemoteError> {
        let key = submission.idempotency_key.to_string();
        match &submission.payload {
            MutationPayload::LessonStart { started_at } => {
                let assignment_id = submission.assignment_id.ok_or_else(|| RemoteError::Validation {
                    status: None,
                    message: format!(
                        "lesson start for subject {} has no assignment id",
                        submission.subject_id
                    ),
                })?;
                let request = self
                    .client
                    .put(self.url(&format!("/assignments/{}/start", assignment_id)))
                    .header("Idempotency-Key", key)
                    .json(&StartLessonBody {
                        started_at: *started_at,
                    });
                let assignment: Assignment = self.send(request).await?;
                Ok(SubmissionReceipt {
                    assignment,
                    review_statistic: None,
                })
            }
            MutationPayload::ReviewGrade {
                incorrect_meaning_answers,
                incorrect_reading_answers,
                created_at,
            } => {
                let request = self
                    .client
                    .post(self.url("/reviews"))
                    .header("Idempotency-Key", key)
                    .json(&ReviewBody {
                        subject_id: submission.subject_id,
                        assignment_id: submission.assignment_id,
                        incorrect_meaning_answers: *incorrect_meaning_answers,
                        incorrect_reading_answers: *incorrect_reading_answers,
                        created_at: *created_at,
                    });
                self.send(request).await
            }
        }
    }
}

impl RemoteService for HttpRemote {
    fn fetch_user(&self) -> BoxFuture<'_, Result<User, RemoteError>> {
        async move { self.send(self.client.get(self.url("/user"))).await }.boxed()
    }

    fn fetch_page<'a>(
        &'a self,
        resource: Resource,
        query: &'a PageQuery,
    ) -> BoxFuture<'a, Result<Page, RemoteError>> {
        self.fetch_page_typed(resource, query).boxed()
    }

    fn fetch_assignment(&self, subject_id: i64) -> BoxFuture<'_, Result<Option<Assignment>, RemoteError>> {
        async move {
            let request = self
                .client
                .get(self.url("/assignments"))
                .query(&[("subject_ids", subject_id.to_string())]);
            let envelope: Envelope<Assignment> = self.send(request).await?;
            Ok(envelope.items.into_iter().find(|a| a.subject_id == subject_id))
        }
        .boxed()
    }

    fn submit<'a>(
        &'a self,
        submission: &'a ProgressSubmission,
    ) -> BoxFuture<'a, Result<SubmissionReceipt, RemoteError>> {
        self.submit_typed(submission).boxed()
    }
}

/// Map a non-success status to the engine's error taxonomy
pub fn classify_status(status: StatusCode, body: String) -> RemoteError {
    match status.as_u16() {
        401 | 403 => RemoteError::Auth {
            status: status.as_u16(),
        },
        409 => RemoteError::Conflict { message: body },
        408 | 429 => RemoteError::Network(format!("HTTP {}: {}", status.as_u16(), body)),
        code if status.is_client_error() => RemoteError::Validation {
            status: Some(code),
            message: body,
        },
        code => RemoteError::Network(format!("HTTP {}: {}", code, body)),
    }
}
