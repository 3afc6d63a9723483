// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use super::models::*;
use super::schema::{categories, challenges, events, sponsors, submitted_flags, users};
use super::store::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Recomputes score aggregates from correct submissions, for one user or
/// (with a NULL parameter) for everyone.
const REFRESH_SCORES_SQL: &str = "
UPDATE users SET
    total_points = LEAST(COALESCE((
        SELECT SUM(c.points) FROM challenges c
        WHERE c.id IN (
            SELECT sf.challenge_id FROM submitted_flags sf
            WHERE sf.user_id = users.id AND sf.is_correct
        )
    ), 0), 2147483647)::int4,
    challenges_solved = (
        SELECT COUNT(DISTINCT sf.challenge_id) FROM submitted_flags sf
        JOIN challenges c ON c.id = sf.challenge_id
        WHERE sf.user_id = users.id AND sf.is_correct
    )::int4
WHERE $1::int4 IS NULL OR users.id = $1";

const EVENT_SCORES_SQL: &str = "
SELECT u.id AS user_id,
       u.name AS name,
       COALESCE(SUM(c.points), 0)::int8 AS points,
       COUNT(*)::int8 AS solved,
       MAX(s.first_at) AS last_solve_at
FROM (
    SELECT sf.user_id, sf.challenge_id, MIN(sf.submitted_at) AS first_at
    FROM submitted_flags sf
    WHERE sf.is_correct AND sf.event_id = $1
    GROUP BY sf.user_id, sf.challenge_id
) s
JOIN users u ON u.id = s.user_id
JOIN challenges c ON c.id = s.challenge_id
WHERE NOT u.is_banned
GROUP BY u.id, u.name";

#[derive(QueryableByName)]
struct EventScoreSql {
    #[diesel(sql_type = Integer)]
    user_id: i32,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = BigInt)]
    points: i64,
    #[diesel(sql_type = BigInt)]
    solved: i64,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    last_solve_at: Option<DateTime<Utc>>,
}

async fn refresh_scores(conn: &mut AsyncPgConnection, user_id: Option<i32>) -> QueryResult<usize> {
    diesel::sql_query(REFRESH_SCORES_SQL)
        .bind::<Nullable<Integer>, _>(user_id)
        .execute(conn)
        .await
}

async fn archive_event_in(conn: &mut AsyncPgConnection, id: i32) -> QueryResult<bool> {
    let updated = diesel::update(events::table.find(id))
        .set(events::status.eq(EventStatus::Archived))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Ok(false);
    }
    diesel::update(challenges::table.filter(challenges::event_id.eq(id)))
        .set(challenges::event_id.eq(None::<i32>))
        .execute(conn)
        .await?;
    Ok(true)
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn get_db_conn(&self) -> StoreResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn find_user(&self, id: i32) -> StoreResult<Option<User>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(users::table
            .find(id)
            .select(User::as_select())
            .first(&mut *pooled)
            .await
            .optional()?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(users::table
            .filter(users::email.eq(email))
            .select(User::as_select())
            .first(&mut *pooled)
            .await
            .optional()?)
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut pooled = self.get_db_conn().await?;
        diesel::insert_into(users::table)
            .values(&user)
            .returning(User::as_returning())
            .get_result(&mut *pooled)
            .await
            .map_err(|e| StoreError::from_diesel_unique(e, "Email already registered"))
    }

    async fn ensure_admin(&self, user: NewUser) -> StoreResult<User> {
        let mut pooled = self.get_db_conn().await?;
        Ok(diesel::insert_into(users::table)
            .values(&user)
            .on_conflict(users::email)
            .do_update()
            .set((
                users::role.eq(UserRole::Admin),
                users::password_hash.eq(&user.password_hash),
                users::is_banned.eq(false),
                users::banned_at.eq(None::<DateTime<Utc>>),
            ))
            .returning(User::as_returning())
            .get_result(&mut *pooled)
            .await?)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(users::table
            .order_by((
                users::total_points.desc(),
                users::challenges_solved.desc(),
                users::id.asc(),
            ))
            .select(User::as_select())
            .load(&mut *pooled)
            .await?)
    }

    async fn set_user_banned(
        &self,
        id: i32,
        banned_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let updated = diesel::update(users::table.find(id))
            .set((
                users::is_banned.eq(banned_at.is_some()),
                users::banned_at.eq(banned_at),
            ))
            .execute(&mut *pooled)
            .await?;
        Ok(updated > 0)
    }

    async fn set_user_role(&self, id: i32, role: UserRole) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let updated = diesel::update(users::table.find(id))
            .set(users::role.eq(role))
            .execute(&mut *pooled)
            .await?;
        Ok(updated > 0)
    }

    async fn delete_user(&self, id: i32) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let deleted = diesel::delete(users::table.find(id))
            .execute(&mut *pooled)
            .await?;
        Ok(deleted > 0)
    }

    async fn list_challenges(&self, filter: &ChallengeFilter) -> StoreResult<Vec<Challenge>> {
        let mut query = challenges::table
            .select(Challenge::as_select())
            .into_boxed();
        if let Some(event_id) = filter.event_id {
            query = query.filter(challenges::event_id.eq(event_id));
        }
        if let Some(category) = &filter.category {
            query = query.filter(challenges::category.eq(category.clone()));
        }
        if let Some(difficulty) = filter.difficulty {
            query = query.filter(challenges::difficulty.eq(difficulty));
        }
        if let Some(status) = filter.status {
            query = query.filter(challenges::status.eq(status));
        }
        let mut pooled = self.get_db_conn().await?;
        Ok(query
            .order_by((challenges::created_at.desc(), challenges::id.desc()))
            .load(&mut *pooled)
            .await?)
    }

    async fn find_challenge(&self, id: i32) -> StoreResult<Option<Challenge>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(challenges::table
            .find(id)
            .select(Challenge::as_select())
            .first(&mut *pooled)
            .await
            .optional()?)
    }

    async fn create_challenge(&self, challenge: NewChallenge) -> StoreResult<Challenge> {
        let mut pooled = self.get_db_conn().await?;
        Ok(diesel::insert_into(challenges::table)
            .values(&challenge)
            .returning(Challenge::as_returning())
            .get_result(&mut *pooled)
            .await?)
    }

    async fn update_challenge(
        &self,
        id: i32,
        changes: ChallengeChanges,
        flag_hash: Option<String>,
    ) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                let updated = diesel::update(challenges::table.find(id))
                    .set(&changes)
                    .execute(conn)
                    .await?;
                if updated == 0 {
                    return Ok(false);
                }
                if let Some(flag_hash) = flag_hash {
                    diesel::update(challenges::table.find(id))
                        .set(challenges::flag_hash.eq(flag_hash))
                        .execute(conn)
                        .await?;
                }
                // Point values may have changed for everyone who solved it.
                refresh_scores(conn, None).await?;
                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }

    async fn delete_challenge(&self, id: i32) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                let deleted = diesel::delete(challenges::table.find(id))
                    .execute(conn)
                    .await?;
                if deleted == 0 {
                    return Ok(false);
                }
                refresh_scores(conn, None).await?;
                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }

    async fn count_challenges_in_event(&self, event_id: i32) -> StoreResult<i64> {
        let mut pooled = self.get_db_conn().await?;
        Ok(challenges::table
            .filter(challenges::event_id.eq(event_id))
            .count()
            .get_result(&mut *pooled)
            .await?)
    }

    async fn count_challenges_in_category(&self, category: &str) -> StoreResult<i64> {
        let mut pooled = self.get_db_conn().await?;
        Ok(challenges::table
            .filter(challenges::category.eq(category))
            .count()
            .get_result(&mut *pooled)
            .await?)
    }

    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(events::table
            .order_by((events::start_date.desc(), events::id.desc()))
            .select(Event::as_select())
            .load(&mut *pooled)
            .await?)
    }

    async fn find_event(&self, id: i32) -> StoreResult<Option<Event>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(events::table
            .find(id)
            .select(Event::as_select())
            .first(&mut *pooled)
            .await
            .optional()?)
    }

    async fn active_event(&self, now: DateTime<Utc>) -> StoreResult<Option<Event>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(events::table
            .filter(events::status.eq(EventStatus::Active))
            .filter(events::start_date.le(now))
            .filter(events::end_date.ge(now))
            .order_by(events::start_date.desc())
            .select(Event::as_select())
            .first(&mut *pooled)
            .await
            .optional()?)
    }

    async fn create_event(&self, event: NewEvent) -> StoreResult<Event> {
        let mut pooled = self.get_db_conn().await?;
        Ok(diesel::insert_into(events::table)
            .values(&event)
            .returning(Event::as_returning())
            .get_result(&mut *pooled)
            .await?)
    }

    async fn update_event(&self, id: i32, event: NewEvent) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let updated = diesel::update(events::table.find(id))
            .set(&event)
            .execute(&mut *pooled)
            .await?;
        Ok(updated > 0)
    }

    async fn archive_event(&self, id: i32) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        conn.transaction::<_, StoreError, _>(move |conn| {
            async move { Ok(archive_event_in(conn, id).await?) }.scope_boxed()
        })
        .await
    }

    async fn delete_event(&self, id: i32) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let deleted = diesel::delete(events::table.find(id))
            .execute(&mut *pooled)
            .await?;
        Ok(deleted > 0)
    }

    async fn archive_expired_events(&self, now: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        let mut pooled = self.get_db_conn().await?;
        let expired: Vec<Event> = events::table
            .filter(events::status.eq(EventStatus::Active))
            .filter(events::end_date.lt(now))
            .select(Event::as_select())
            .load(&mut *pooled)
            .await?;

        let mut archived = Vec::with_capacity(expired.len());
        for mut event in expired {
            let id = event.id;
            let conn: &mut AsyncPgConnection = &mut pooled;
            let done = conn
                .transaction::<_, StoreError, _>(move |conn| {
                    async move { Ok(archive_event_in(conn, id).await?) }.scope_boxed()
                })
                .await?;
            if done {
                event.status = EventStatus::Archived;
                archived.push(event);
            }
        }
        Ok(archived)
    }

    async fn event_scores(&self, event_id: i32) -> StoreResult<Vec<ScoreRow>> {
        let mut pooled = self.get_db_conn().await?;
        let rows: Vec<EventScoreSql> = diesel::sql_query(EVENT_SCORES_SQL)
            .bind::<Integer, _>(event_id)
            .load(&mut *pooled)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ScoreRow {
                user_id: row.user_id,
                name: row.name,
                points: row.points,
                solved: row.solved,
                last_solve_at: row.last_solve_at,
            })
            .collect())
    }

    async fn list_categories(&self) -> StoreResult<Vec<Category>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(categories::table
            .order_by(categories::name.asc())
            .select(Category::as_select())
            .load(&mut *pooled)
            .await?)
    }

    async fn find_category(&self, id: i32) -> StoreResult<Option<Category>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(categories::table
            .find(id)
            .select(Category::as_select())
            .first(&mut *pooled)
            .await
            .optional()?)
    }

    async fn create_category(&self, category: NewCategory) -> StoreResult<Category> {
        let mut pooled = self.get_db_conn().await?;
        diesel::insert_into(categories::table)
            .values(&category)
            .returning(Category::as_returning())
            .get_result(&mut *pooled)
            .await
            .map_err(|e| StoreError::from_diesel_unique(e, "Category already exists"))
    }

    async fn update_category(&self, id: i32, category: NewCategory) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let updated = diesel::update(categories::table.find(id))
            .set(&category)
            .execute(&mut *pooled)
            .await
            .map_err(|e| StoreError::from_diesel_unique(e, "Category already exists"))?;
        Ok(updated > 0)
    }

    async fn delete_category(&self, id: i32) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let deleted = diesel::delete(categories::table.find(id))
            .execute(&mut *pooled)
            .await?;
        Ok(deleted > 0)
    }

    async fn list_sponsors(&self) -> StoreResult<Vec<Sponsor>> {
        let mut pooled = self.get_db_conn().await?;
        Ok(sponsors::table
            .order_by((sponsors::display_order.asc(), sponsors::id.asc()))
            .select(Sponsor::as_select())
            .load(&mut *pooled)
            .await?)
    }

    async fn create_sponsor(&self, sponsor: NewSponsor) -> StoreResult<Sponsor> {
        let mut pooled = self.get_db_conn().await?;
        Ok(diesel::insert_into(sponsors::table)
            .values(&sponsor)
            .returning(Sponsor::as_returning())
            .get_result(&mut *pooled)
            .await?)
    }

    async fn update_sponsor(&self, id: i32, sponsor: NewSponsor) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let updated = diesel::update(sponsors::table.find(id))
            .set(&sponsor)
            .execute(&mut *pooled)
            .await?;
        Ok(updated > 0)
    }

    async fn delete_sponsor(&self, id: i32) -> StoreResult<bool> {
        let mut pooled = self.get_db_conn().await?;
        let deleted = diesel::delete(sponsors::table.find(id))
            .execute(&mut *pooled)
            .await?;
        Ok(deleted > 0)
    }

    async fn record_submission(
        &self,
        submission: NewSubmittedFlag,
    ) -> StoreResult<RecordedSubmission> {
        let mut pooled = self.get_db_conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                // Locking the user row serializes concurrent attempts by the
                // same user, so the solved-before check below cannot race.
                users::table
                    .find(submission.user_id)
                    .select(users::id)
                    .for_update()
                    .first::<i32>(conn)
                    .await
                    .optional()?
                    .ok_or(StoreError::NotFound)?;

                let solved_before: bool = diesel::select(diesel::dsl::exists(
                    submitted_flags::table
                        .filter(submitted_flags::user_id.eq(submission.user_id))
                        .filter(submitted_flags::challenge_id.eq(submission.challenge_id))
                        .filter(submitted_flags::is_correct.eq(true)),
                ))
                .get_result(conn)
                .await?;

                let submission_id: i32 = diesel::insert_into(submitted_flags::table)
                    .values(&submission)
                    .returning(submitted_flags::id)
                    .get_result(conn)
                    .await?;

                let first_solve = submission.is_correct && !solved_before;
                if first_solve {
                    refresh_scores(conn, Some(submission.user_id)).await?;
                }
                Ok(RecordedSubmission {
                    submission_id,
                    first_solve,
                })
            }
            .scope_boxed()
        })
        .await
    }

    async fn list_submissions(
        &self,
        challenge_id: Option<i32>,
    ) -> StoreResult<Vec<SubmissionRecord>> {
        let mut query = submitted_flags::table
            .inner_join(users::table)
            .inner_join(challenges::table)
            .select((SubmittedFlag::as_select(), users::name, challenges::title))
            .into_boxed();
        if let Some(challenge_id) = challenge_id {
            query = query.filter(submitted_flags::challenge_id.eq(challenge_id));
        }
        let mut pooled = self.get_db_conn().await?;
        let rows: Vec<(SubmittedFlag, String, String)> = query
            .order_by((
                submitted_flags::submitted_at.desc(),
                submitted_flags::id.desc(),
            ))
            .load(&mut *pooled)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(submission, user_name, challenge_title)| SubmissionRecord {
                submission,
                user_name,
                challenge_title,
            })
            .collect())
    }

    async fn reset_submissions(&self, event_id: Option<i32>) -> StoreResult<usize> {
        let mut pooled = self.get_db_conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        conn.transaction::<_, StoreError, _>(move |conn| {
            async move {
                let deleted = match event_id {
                    Some(event_id) => {
                        let event_challenges: Vec<i32> = challenges::table
                            .filter(challenges::event_id.eq(event_id))
                            .select(challenges::id)
                            .load(conn)
                            .await?;
                        diesel::delete(
                            submitted_flags::table.filter(
                                submitted_flags::event_id
                                    .eq(event_id)
                                    .or(submitted_flags::challenge_id.eq_any(event_challenges)),
                            ),
                        )
                        .execute(conn)
                        .await?
                    }
                    None => diesel::delete(submitted_flags::table).execute(conn).await?,
                };
                refresh_scores(conn, None).await?;
                Ok(deleted)
            }
            .scope_boxed()
        })
        .await
    }

    async fn stats(&self) -> StoreResult<PlatformStats> {
        let mut pooled = self.get_db_conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let total_users: i64 = users::table.count().get_result(conn).await?;
        let banned_users: i64 = users::table
            .filter(users::is_banned.eq(true))
            .count()
            .get_result(conn)
            .await?;
        let admin_users: i64 = users::table
            .filter(users::role.eq(UserRole::Admin))
            .count()
            .get_result(conn)
            .await?;

        let total_challenges: i64 = challenges::table.count().get_result(conn).await?;
        let active_challenges: i64 = challenges::table
            .filter(challenges::status.eq(ChallengeStatus::Active))
            .count()
            .get_result(conn)
            .await?;

        let total_events: i64 = events::table.count().get_result(conn).await?;
        let active_events: i64 = events::table
            .filter(events::status.eq(EventStatus::Active))
            .count()
            .get_result(conn)
            .await?;
        let archived_events: i64 = events::table
            .filter(events::status.eq(EventStatus::Archived))
            .count()
            .get_result(conn)
            .await?;

        let total_flags: i64 = submitted_flags::table.count().get_result(conn).await?;
        let correct_flags: i64 = submitted_flags::table
            .filter(submitted_flags::is_correct.eq(true))
            .count()
            .get_result(conn)
            .await?;

        Ok(PlatformStats {
            users: UserStats {
                total: total_users,
                active: total_users - banned_users,
                banned: banned_users,
                admins: admin_users,
            },
            challenges: ChallengeStats {
                total: total_challenges,
                active: active_challenges,
                disabled: total_challenges - active_challenges,
            },
            events: EventStats {
                total: total_events,
                active: active_events,
                archived: archived_events,
            },
            flags: FlagStats {
                total: total_flags,
                correct: correct_flags,
            },
        })
    }
}
