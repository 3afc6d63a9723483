// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Connection pool error: {0}")]
    Pool(String),
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    pub(crate) fn from_diesel_unique(err: diesel::result::Error, what: &str) -> Self {
        match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => StoreError::Conflict(what.to_string()),
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Optional filters for listing challenges. `status: None` lists every status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChallengeFilter {
    pub event_id: Option<i32>,
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub status: Option<ChallengeStatus>,
}

/// A submission joined with the names an admin wants to see next to it.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    #[serde(flatten)]
    pub submission: SubmittedFlag,
    pub user_name: String,
    pub challenge_title: String,
}

/// Outcome of recording one flag attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedSubmission {
    pub submission_id: i32,
    /// True when this attempt was correct and the user had not solved the
    /// challenge before.
    pub first_solve: bool,
}

/// Per-user totals derived from correct submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRow {
    pub user_id: i32,
    pub name: String,
    pub points: i64,
    pub solved: i64,
    pub last_solve_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UserStats {
    pub total: i64,
    pub active: i64,
    pub banned: i64,
    pub admins: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChallengeStats {
    pub total: i64,
    pub active: i64,
    pub disabled: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EventStats {
    pub total: i64,
    pub active: i64,
    pub archived: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FlagStats {
    pub total: i64,
    pub correct: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PlatformStats {
    pub users: UserStats,
    pub challenges: ChallengeStats,
    pub events: EventStats,
    pub flags: FlagStats,
}

/// Persistence backend used by the request handlers.
///
/// Methods returning `bool` report whether the addressed row existed.
/// Implementations must keep `users.total_points` and
/// `users.challenges_solved` equal to the aggregate of the user's distinct
/// correctly solved challenges after every write that can change it.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // users
    async fn find_user(&self, id: i32) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    /// Creates the user if the email is unknown, otherwise promotes the
    /// existing row to admin and resets its password hash.
    async fn ensure_admin(&self, user: NewUser) -> StoreResult<User>;
    /// Ordered by total points, then solved count, both descending.
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn set_user_banned(
        &self,
        id: i32,
        banned_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;
    async fn set_user_role(&self, id: i32, role: UserRole) -> StoreResult<bool>;
    async fn delete_user(&self, id: i32) -> StoreResult<bool>;

    // challenges
    /// Newest first.
    async fn list_challenges(&self, filter: &ChallengeFilter) -> StoreResult<Vec<Challenge>>;
    async fn find_challenge(&self, id: i32) -> StoreResult<Option<Challenge>>;
    async fn create_challenge(&self, challenge: NewChallenge) -> StoreResult<Challenge>;
    async fn update_challenge(
        &self,
        id: i32,
        changes: ChallengeChanges,
        flag_hash: Option<String>,
    ) -> StoreResult<bool>;
    async fn delete_challenge(&self, id: i32) -> StoreResult<bool>;
    async fn count_challenges_in_event(&self, event_id: i32) -> StoreResult<i64>;
    async fn count_challenges_in_category(&self, category: &str) -> StoreResult<i64>;

    // events
    /// Latest start first.
    async fn list_events(&self) -> StoreResult<Vec<Event>>;
    async fn find_event(&self, id: i32) -> StoreResult<Option<Event>>;
    async fn active_event(&self, now: DateTime<Utc>) -> StoreResult<Option<Event>>;
    async fn create_event(&self, event: NewEvent) -> StoreResult<Event>;
    async fn update_event(&self, id: i32, event: NewEvent) -> StoreResult<bool>;
    /// Marks the event archived and detaches its challenges.
    async fn archive_event(&self, id: i32) -> StoreResult<bool>;
    async fn delete_event(&self, id: i32) -> StoreResult<bool>;
    /// Archives every active event whose end date lies before `now`.
    async fn archive_expired_events(&self, now: DateTime<Utc>) -> StoreResult<Vec<Event>>;
    /// Unranked totals over correct submissions recorded for the event.
    async fn event_scores(&self, event_id: i32) -> StoreResult<Vec<ScoreRow>>;

    // categories
    /// Ordered by name.
    async fn list_categories(&self) -> StoreResult<Vec<Category>>;
    async fn find_category(&self, id: i32) -> StoreResult<Option<Category>>;
    async fn create_category(&self, category: NewCategory) -> StoreResult<Category>;
    async fn update_category(&self, id: i32, category: NewCategory) -> StoreResult<bool>;
    async fn delete_category(&self, id: i32) -> StoreResult<bool>;

    // sponsors
    /// Ordered by display order.
    async fn list_sponsors(&self) -> StoreResult<Vec<Sponsor>>;
    async fn create_sponsor(&self, sponsor: NewSponsor) -> StoreResult<Sponsor>;
    async fn update_sponsor(&self, id: i32, sponsor: NewSponsor) -> StoreResult<bool>;
    async fn delete_sponsor(&self, id: i32) -> StoreResult<bool>;

    // submissions
    /// Records one attempt and, on a first correct solve, refreshes the
    /// user's aggregates. Serialized per user.
    async fn record_submission(&self, submission: NewSubmittedFlag)
    -> StoreResult<RecordedSubmission>;
    /// Newest first.
    async fn list_submissions(&self, challenge_id: Option<i32>)
    -> StoreResult<Vec<SubmissionRecord>>;
    /// Deletes all submissions, or only those belonging to an event, and
    /// recomputes every user's aggregates. Returns the number of deleted rows.
    async fn reset_submissions(&self, event_id: Option<i32>) -> StoreResult<usize>;

    async fn stats(&self) -> StoreResult<PlatformStats>;
}
