// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-local store used when no database is configured, and by tests.
//! Everything lives behind one async mutex, so every operation is atomic.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::models::*;
use super::store::*;

struct Table<T> {
    rows: BTreeMap<i32, T>,
    next_id: i32,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<T: Clone> Table<T> {
    fn insert_with(&mut self, build: impl FnOnce(i32) -> T) -> T {
        let id = self.next_id;
        self.next_id += 1;
        let row = build(id);
        self.rows.insert(id, row.clone());
        row
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }
}

#[derive(Default)]
struct State {
    users: Table<User>,
    challenges: Table<Challenge>,
    events: Table<Event>,
    categories: Table<Category>,
    sponsors: Table<Sponsor>,
    submissions: Table<SubmittedFlag>,
}

impl State {
    fn refresh_scores(&mut self, only_user: Option<i32>) {
        let points: HashMap<i32, i32> = self
            .challenges
            .values()
            .map(|c| (c.id, c.points))
            .collect();
        let mut solved: HashMap<i32, HashSet<i32>> = HashMap::new();
        for submission in self.submissions.values().filter(|s| s.is_correct) {
            if points.contains_key(&submission.challenge_id) {
                solved
                    .entry(submission.user_id)
                    .or_default()
                    .insert(submission.challenge_id);
            }
        }
        for user in self.users.rows.values_mut() {
            if only_user.is_some_and(|id| id != user.id) {
                continue;
            }
            let challenges = solved.remove(&user.id).unwrap_or_default();
            let total: i64 = challenges.iter().map(|id| i64::from(points[id])).sum();
            user.total_points = i32::try_from(total).unwrap_or(i32::MAX);
            user.challenges_solved = challenges.len() as i32;
        }
    }

    fn archive_event(&mut self, id: i32) -> bool {
        let Some(event) = self.events.rows.get_mut(&id) else {
            return false;
        };
        event.status = EventStatus::Archived;
        for challenge in self.challenges.rows.values_mut() {
            if challenge.event_id == Some(id) {
                challenge.event_id = None;
            }
        }
        true
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: i32) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.rows.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("Email already registered".into()));
        }
        Ok(state.users.insert_with(|id| User {
            id,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            is_banned: false,
            banned_at: None,
            total_points: 0,
            challenges_solved: 0,
            created_at: Utc::now(),
        }))
    }

    async fn ensure_admin(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.users.rows.values_mut().find(|u| u.email == user.email) {
            existing.role = UserRole::Admin;
            existing.password_hash = user.password_hash;
            existing.is_banned = false;
            existing.banned_at = None;
            return Ok(existing.clone());
        }
        Ok(state.users.insert_with(|id| User {
            id,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: UserRole::Admin,
            is_banned: false,
            banned_at: None,
            total_points: 0,
            challenges_solved: 0,
            created_at: Utc::now(),
        }))
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let state = self.state.lock().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then(b.challenges_solved.cmp(&a.challenges_solved))
                .then(a.id.cmp(&b.id))
        });
        Ok(users)
    }

    async fn set_user_banned(
        &self,
        id: i32,
        banned_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.users.rows.get_mut(&id) {
            Some(user) => {
                user.is_banned = banned_at.is_some();
                user.banned_at = banned_at;
                true
            }
            None => false,
        })
    }

    async fn set_user_role(&self, id: i32, role: UserRole) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.users.rows.get_mut(&id) {
            Some(user) => {
                user.role = role;
                true
            }
            None => false,
        })
    }

    async fn delete_user(&self, id: i32) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.users.rows.remove(&id).is_none() {
            return Ok(false);
        }
        state.submissions.rows.retain(|_, s| s.user_id != id);
        Ok(true)
    }

    async fn list_challenges(&self, filter: &ChallengeFilter) -> StoreResult<Vec<Challenge>> {
        let state = self.state.lock().await;
        let mut challenges: Vec<Challenge> = state
            .challenges
            .values()
            .filter(|c| filter.event_id.is_none_or(|id| c.event_id == Some(id)))
            .filter(|c| filter.category.as_ref().is_none_or(|cat| &c.category == cat))
            .filter(|c| filter.difficulty.is_none_or(|d| c.difficulty == d))
            .filter(|c| filter.status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        challenges.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(challenges)
    }

    async fn find_challenge(&self, id: i32) -> StoreResult<Option<Challenge>> {
        Ok(self.state.lock().await.challenges.rows.get(&id).cloned())
    }

    async fn create_challenge(&self, challenge: NewChallenge) -> StoreResult<Challenge> {
        let mut state = self.state.lock().await;
        Ok(state.challenges.insert_with(|id| Challenge {
            id,
            title: challenge.title,
            description: challenge.description,
            category: challenge.category,
            difficulty: challenge.difficulty,
            points: challenge.points,
            flag_hash: challenge.flag_hash,
            files: challenge.files,
            challenge_link: challenge.challenge_link,
            event_id: challenge.event_id,
            status: challenge.status,
            created_at: Utc::now(),
        }))
    }

    async fn update_challenge(
        &self,
        id: i32,
        changes: ChallengeChanges,
        flag_hash: Option<String>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(challenge) = state.challenges.rows.get_mut(&id) else {
            return Ok(false);
        };
        challenge.title = changes.title;
        challenge.description = changes.description;
        challenge.category = changes.category;
        challenge.difficulty = changes.difficulty;
        challenge.points = changes.points;
        challenge.files = changes.files;
        challenge.challenge_link = changes.challenge_link;
        challenge.event_id = changes.event_id;
        challenge.status = changes.status;
        if let Some(flag_hash) = flag_hash {
            challenge.flag_hash = flag_hash;
        }
        state.refresh_scores(None);
        Ok(true)
    }

    async fn delete_challenge(&self, id: i32) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.challenges.rows.remove(&id).is_none() {
            return Ok(false);
        }
        state.submissions.rows.retain(|_, s| s.challenge_id != id);
        state.refresh_scores(None);
        Ok(true)
    }

    async fn count_challenges_in_event(&self, event_id: i32) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .challenges
            .values()
            .filter(|c| c.event_id == Some(event_id))
            .count() as i64)
    }

    async fn count_challenges_in_category(&self, category: &str) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .challenges
            .values()
            .filter(|c| c.category == category)
            .count() as i64)
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let state = self.state.lock().await;
        let mut events: Vec<Event> = state.events.values().cloned().collect();
        events.sort_by(|a, b| b.start_date.cmp(&a.start_date).then(b.id.cmp(&a.id)));
        Ok(events)
    }

    async fn find_event(&self, id: i32) -> StoreResult<Option<Event>> {
        Ok(self.state.lock().await.events.rows.get(&id).cloned())
    }

    async fn active_event(&self, now: DateTime<Utc>) -> StoreResult<Option<Event>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .filter(|e| e.is_running_at(now))
            .max_by_key(|e| e.start_date)
            .cloned())
    }

    async fn create_event(&self, event: NewEvent) -> StoreResult<Event> {
        let mut state = self.state.lock().await;
        Ok(state.events.insert_with(|id| Event {
            id,
            name: event.name,
            description: event.description,
            banner_url: event.banner_url,
            start_date: event.start_date,
            end_date: event.end_date,
            status: event.status,
            created_at: Utc::now(),
        }))
    }

    async fn update_event(&self, id: i32, event: NewEvent) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.events.rows.get_mut(&id) {
            Some(existing) => {
                existing.name = event.name;
                existing.description = event.description;
                existing.banner_url = event.banner_url;
                existing.start_date = event.start_date;
                existing.end_date = event.end_date;
                existing.status = event.status;
                true
            }
            None => false,
        })
    }

    async fn archive_event(&self, id: i32) -> StoreResult<bool> {
        Ok(self.state.lock().await.archive_event(id))
    }

    async fn delete_event(&self, id: i32) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.events.rows.remove(&id).is_none() {
            return Ok(false);
        }
        for challenge in state.challenges.rows.values_mut() {
            if challenge.event_id == Some(id) {
                challenge.event_id = None;
            }
        }
        for submission in state.submissions.rows.values_mut() {
            if submission.event_id == Some(id) {
                submission.event_id = None;
            }
        }
        Ok(true)
    }

    async fn archive_expired_events(&self, now: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        let mut state = self.state.lock().await;
        let expired: Vec<i32> = state
            .events
            .values()
            .filter(|e| e.status == EventStatus::Active && e.end_date < now)
            .map(|e| e.id)
            .collect();
        let mut archived = Vec::with_capacity(expired.len());
        for id in expired {
            if state.archive_event(id) {
                if let Some(event) = state.events.rows.get(&id) {
                    archived.push(event.clone());
                }
            }
        }
        Ok(archived)
    }

    async fn event_scores(&self, event_id: i32) -> StoreResult<Vec<ScoreRow>> {
        let state = self.state.lock().await;
        // First correct submission per (user, challenge).
        let mut first_solves: BTreeMap<(i32, i32), DateTime<Utc>> = BTreeMap::new();
        for s in state
            .submissions
            .values()
            .filter(|s| s.is_correct && s.event_id == Some(event_id))
        {
            first_solves
                .entry((s.user_id, s.challenge_id))
                .and_modify(|at| *at = (*at).min(s.submitted_at))
                .or_insert(s.submitted_at);
        }

        let mut rows: BTreeMap<i32, ScoreRow> = BTreeMap::new();
        for ((user_id, challenge_id), solved_at) in first_solves {
            let (Some(user), Some(challenge)) = (
                state.users.rows.get(&user_id),
                state.challenges.rows.get(&challenge_id),
            ) else {
                continue;
            };
            if user.is_banned {
                continue;
            }
            let row = rows.entry(user_id).or_insert_with(|| ScoreRow {
                user_id,
                name: user.name.clone(),
                points: 0,
                solved: 0,
                last_solve_at: None,
            });
            row.points += i64::from(challenge.points);
            row.solved += 1;
            row.last_solve_at = row.last_solve_at.max(Some(solved_at));
        }
        Ok(rows.into_values().collect())
    }

    async fn list_categories(&self) -> StoreResult<Vec<Category>> {
        let state = self.state.lock().await;
        let mut categories: Vec<Category> = state.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn find_category(&self, id: i32) -> StoreResult<Option<Category>> {
        Ok(self.state.lock().await.categories.rows.get(&id).cloned())
    }

    async fn create_category(&self, category: NewCategory) -> StoreResult<Category> {
        let mut state = self.state.lock().await;
        if state.categories.values().any(|c| c.name == category.name) {
            return Err(StoreError::Conflict("Category already exists".into()));
        }
        Ok(state.categories.insert_with(|id| Category {
            id,
            name: category.name,
            description: category.description,
            created_at: Utc::now(),
        }))
    }

    async fn update_category(&self, id: i32, category: NewCategory) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state
            .categories
            .values()
            .any(|c| c.id != id && c.name == category.name)
        {
            return Err(StoreError::Conflict("Category already exists".into()));
        }
        Ok(match state.categories.rows.get_mut(&id) {
            Some(existing) => {
                existing.name = category.name;
                existing.description = category.description;
                true
            }
            None => false,
        })
    }

    async fn delete_category(&self, id: i32) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .categories
            .rows
            .remove(&id)
            .is_some())
    }

    async fn list_sponsors(&self) -> StoreResult<Vec<Sponsor>> {
        let state = self.state.lock().await;
        let mut sponsors: Vec<Sponsor> = state.sponsors.values().cloned().collect();
        sponsors.sort_by(|a, b| a.display_order.cmp(&b.display_order).then(a.id.cmp(&b.id)));
        Ok(sponsors)
    }

    async fn create_sponsor(&self, sponsor: NewSponsor) -> StoreResult<Sponsor> {
        let mut state = self.state.lock().await;
        Ok(state.sponsors.insert_with(|id| Sponsor {
            id,
            name: sponsor.name,
            logo_url: sponsor.logo_url,
            website_url: sponsor.website_url,
            display_order: sponsor.display_order,
            created_at: Utc::now(),
        }))
    }

    async fn update_sponsor(&self, id: i32, sponsor: NewSponsor) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.sponsors.rows.get_mut(&id) {
            Some(existing) => {
                existing.name = sponsor.name;
                existing.logo_url = sponsor.logo_url;
                existing.website_url = sponsor.website_url;
                existing.display_order = sponsor.display_order;
                true
            }
            None => false,
        })
    }

    async fn delete_sponsor(&self, id: i32) -> StoreResult<bool> {
        Ok(self.state.lock().await.sponsors.rows.remove(&id).is_some())
    }

    async fn record_submission(
        &self,
        submission: NewSubmittedFlag,
    ) -> StoreResult<RecordedSubmission> {
        let mut state = self.state.lock().await;
        if !state.users.rows.contains_key(&submission.user_id) {
            return Err(StoreError::NotFound);
        }
        let solved_before = state.submissions.values().any(|s| {
            s.user_id == submission.user_id
                && s.challenge_id == submission.challenge_id
                && s.is_correct
        });
        let first_solve = submission.is_correct && !solved_before;
        let recorded = state.submissions.insert_with(|id| SubmittedFlag {
            id,
            user_id: submission.user_id,
            challenge_id: submission.challenge_id,
            event_id: submission.event_id,
            flag: submission.flag,
            is_correct: submission.is_correct,
            submitted_at: Utc::now(),
        });
        if first_solve {
            state.refresh_scores(Some(recorded.user_id));
        }
        Ok(RecordedSubmission {
            submission_id: recorded.id,
            first_solve,
        })
    }

    async fn list_submissions(
        &self,
        challenge_id: Option<i32>,
    ) -> StoreResult<Vec<SubmissionRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<SubmissionRecord> = state
            .submissions
            .values()
            .filter(|s| challenge_id.is_none_or(|id| s.challenge_id == id))
            .filter_map(|s| {
                let user = state.users.rows.get(&s.user_id)?;
                let challenge = state.challenges.rows.get(&s.challenge_id)?;
                Some(SubmissionRecord {
                    submission: s.clone(),
                    user_name: user.name.clone(),
                    challenge_title: challenge.title.clone(),
                })
            })
            .collect();
        records.sort_by(|a, b| {
            b.submission
                .submitted_at
                .cmp(&a.submission.submitted_at)
                .then(b.submission.id.cmp(&a.submission.id))
        });
        Ok(records)
    }

    async fn reset_submissions(&self, event_id: Option<i32>) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let before = state.submissions.rows.len();
        match event_id {
            Some(event_id) => {
                let event_challenges: HashSet<i32> = state
                    .challenges
                    .values()
                    .filter(|c| c.event_id == Some(event_id))
                    .map(|c| c.id)
                    .collect();
                state.submissions.rows.retain(|_, s| {
                    s.event_id != Some(event_id) && !event_challenges.contains(&s.challenge_id)
                });
            }
            None => state.submissions.rows.clear(),
        }
        let deleted = before - state.submissions.rows.len();
        state.refresh_scores(None);
        Ok(deleted)
    }

    async fn stats(&self) -> StoreResult<PlatformStats> {
        let state = self.state.lock().await;
        let count = |it: usize| it as i64;

        let users = UserStats {
            total: count(state.users.rows.len()),
            active: count(state.users.values().filter(|u| !u.is_banned).count()),
            banned: count(state.users.values().filter(|u| u.is_banned).count()),
            admins: count(
                state
                    .users
                    .values()
                    .filter(|u| u.role == UserRole::Admin)
                    .count(),
            ),
        };
        let challenges = ChallengeStats {
            total: count(state.challenges.rows.len()),
            active: count(
                state
                    .challenges
                    .values()
                    .filter(|c| c.status == ChallengeStatus::Active)
                    .count(),
            ),
            disabled: count(
                state
                    .challenges
                    .values()
                    .filter(|c| c.status == ChallengeStatus::Disabled)
                    .count(),
            ),
        };
        let events = EventStats {
            total: count(state.events.rows.len()),
            active: count(
                state
                    .events
                    .values()
                    .filter(|e| e.status == EventStatus::Active)
                    .count(),
            ),
            archived: count(
                state
                    .events
                    .values()
                    .filter(|e| e.status == EventStatus::Archived)
                    .count(),
            ),
        };
        let flags = FlagStats {
            total: count(state.submissions.rows.len()),
            correct: count(state.submissions.values().filter(|s| s.is_correct).count()),
        };
        Ok(PlatformStats {
            users,
            challenges,
            events,
            flags,
        })
    }
}
