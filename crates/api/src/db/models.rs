// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::schema::*;

#[derive(
    diesel_derive_enum::DbEnum,
    Debug,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Ord,
    PartialOrd,
    Default,
)]
#[DbValueStyle = "snake_case"]
#[ExistingTypePath = "crate::db::schema::sql_types::UserRole"]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

#[derive(
    diesel_derive_enum::DbEnum, Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy, Default,
)]
#[DbValueStyle = "verbatim"]
#[ExistingTypePath = "crate::db::schema::sql_types::ChallengeDifficulty"]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

#[derive(
    diesel_derive_enum::DbEnum, Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy, Default,
)]
#[DbValueStyle = "snake_case"]
#[ExistingTypePath = "crate::db::schema::sql_types::ChallengeStatus"]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    #[default]
    Active,
    Disabled,
}

#[derive(
    diesel_derive_enum::DbEnum, Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy, Default,
)]
#[DbValueStyle = "snake_case"]
#[ExistingTypePath = "crate::db::schema::sql_types::EventStatus"]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    #[default]
    Active,
    Archived,
}

/* =========================
 * USERS
 * ========================= */

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_banned: bool,
    pub banned_at: Option<DateTime<Utc>>,
    pub total_points: i32,
    pub challenges_solved: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin && !self.is_banned
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
}

/* =========================
 * CHALLENGES
 * ========================= */

#[derive(Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone)]
#[diesel(table_name = challenges)]
#[diesel(belongs_to(Event))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Challenge {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub points: i32,
    #[serde(skip_serializing)]
    pub flag_hash: String,
    pub files: serde_json::Value,
    pub challenge_link: Option<String>,
    pub event_id: Option<i32>,
    pub status: ChallengeStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = challenges)]
pub struct NewChallenge {
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub points: i32,
    pub flag_hash: String,
    pub files: serde_json::Value,
    pub challenge_link: Option<String>,
    pub event_id: Option<i32>,
    pub status: ChallengeStatus,
}

/// Full replacement of a challenge's descriptive fields. The flag hash is
/// handled separately so that an update without a new flag keeps the old one.
#[derive(AsChangeset, Debug, Clone)]
#[diesel(table_name = challenges)]
#[diesel(treat_none_as_null = true)]
pub struct ChallengeChanges {
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub points: i32,
    pub files: serde_json::Value,
    pub challenge_link: Option<String>,
    pub event_id: Option<i32>,
    pub status: ChallengeStatus,
}

/* =========================
 * EVENTS
 * ========================= */

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone)]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Event {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub banner_url: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_running_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Active && self.start_date <= now && self.end_date >= now
    }
}

/// Used both for inserting and for full updates of an event.
#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = events)]
#[diesel(treat_none_as_null = true)]
pub struct NewEvent {
    pub name: String,
    pub description: String,
    pub banner_url: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: EventStatus,
}

/* =========================
 * CATEGORIES
 * ========================= */

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone)]
#[diesel(table_name = categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = categories)]
#[diesel(treat_none_as_null = true)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
}

/* =========================
 * SPONSORS
 * ========================= */

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone)]
#[diesel(table_name = sponsors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Sponsor {
    pub id: i32,
    pub name: String,
    pub logo_url: String,
    pub website_url: Option<String>,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = sponsors)]
#[diesel(treat_none_as_null = true)]
pub struct NewSponsor {
    pub name: String,
    pub logo_url: String,
    pub website_url: Option<String>,
    pub display_order: i32,
}

/* =========================
 * SUBMITTED FLAGS
 * ========================= */

#[derive(Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone)]
#[diesel(table_name = submitted_flags)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Challenge))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubmittedFlag {
    pub id: i32,
    pub user_id: i32,
    pub challenge_id: i32,
    pub event_id: Option<i32>,
    pub flag: String,
    pub is_correct: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = submitted_flags)]
pub struct NewSubmittedFlag {
    pub user_id: i32,
    pub challenge_id: i32,
    pub event_id: Option<i32>,
    pub flag: String,
    pub is_correct: bool,
}
