// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::Utc;
use hyper::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{admin_mutation, invalid_action, parse_datetime};
use crate::{
    db::{
        models::{EventStatus, NewEvent},
        store::ScoreRow,
    },
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
};

#[derive(Deserialize, Default)]
#[serde(default)]
struct EventPayload {
    name: String,
    description: String,
    banner_url: Option<String>,
    start_date: String,
    end_date: String,
    status: Option<EventStatus>,
}

impl EventPayload {
    fn into_new_event(self) -> ApiResult<NewEvent> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::validation("Event name is required"));
        }
        if self.start_date.trim().is_empty() || self.end_date.trim().is_empty() {
            return Err(ApiError::validation("Start and end dates are required"));
        }
        let start_date = parse_datetime(&self.start_date)
            .ok_or_else(|| ApiError::validation("Invalid start date"))?;
        let end_date =
            parse_datetime(&self.end_date).ok_or_else(|| ApiError::validation("Invalid end date"))?;
        if end_date <= start_date {
            return Err(ApiError::validation("End date must be after start date"));
        }
        Ok(NewEvent {
            name,
            description: self.description,
            banner_url: self
                .banner_url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            start_date,
            end_date,
            status: self.status.unwrap_or_default(),
        })
    }
}

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    match (req.method(), req.action()) {
        (&Method::GET, "list") => list(ctx).await,
        (&Method::GET, "get") => get(ctx, req).await,
        (&Method::GET, "active") => active(ctx).await,
        (&Method::GET, "scoreboard") => scoreboard(ctx, req).await,
        (&Method::POST, "add" | "create") => create(ctx, req).await,
        (&Method::PUT, "update") => update(ctx, req).await,
        (&Method::POST, "archive") => archive(ctx, req).await,
        (&Method::DELETE, "delete") => delete(ctx, req).await,
        _ => Err(invalid_action()),
    }
}

async fn list(ctx: &Context) -> ApiResult<Value> {
    let events = ctx
        .store()
        .list_events()
        .await
        .or_internal("Failed to fetch events")?;
    Ok(json!({ "events": events }))
}

async fn get(ctx: &Context, req: &Request) -> ApiResult<Value> {
    let id = req.id_param("id", "Event")?;
    let event = ctx
        .store()
        .find_event(id)
        .await
        .or_internal("Failed to fetch event")?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;
    Ok(json!({ "event": event }))
}

async fn active(ctx: &Context) -> ApiResult<Value> {
    let event = ctx
        .store()
        .active_event(Utc::now())
        .await
        .or_internal("Failed to fetch event")?;
    Ok(json!({ "event": event }))
}

/// Orders by points, then solves, then whoever reached their score first.
pub(crate) fn rank_scores(mut rows: Vec<ScoreRow>) -> Vec<Value> {
    rows.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then(b.solved.cmp(&a.solved))
            .then_with(|| match (a.last_solve_at, b.last_solve_at) {
                (Some(a), Some(b)) => a.cmp(&b),
                (a, b) => a.is_none().cmp(&b.is_none()),
            })
            .then(a.user_id.cmp(&b.user_id))
    });
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            json!({
                "rank": i + 1,
                "user_id": row.user_id,
                "username": row.name,
                "points": row.points,
                "solved": row.solved,
            })
        })
        .collect()
}

async fn scoreboard(ctx: &Context, req: &Request) -> ApiResult<Value> {
    let id = req.id_param("id", "Event")?;
    let event = ctx
        .store()
        .find_event(id)
        .await
        .or_internal("Failed to fetch scoreboard")?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;
    let rows = ctx
        .store()
        .event_scores(id)
        .await
        .or_internal("Failed to fetch scoreboard")?;
    Ok(json!({ "event": event, "leaderboard": rank_scores(rows) }))
}

async fn create(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let event = req.json::<EventPayload>()?.into_new_event()?;
    let event = ctx
        .store()
        .create_event(event)
        .await
        .or_internal("Failed to create event")?;
    tracing::info!(event_id = event.id, name = %event.name, "Created event");
    Ok(json!({ "success": true, "id": event.id }))
}

async fn update(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "Event")?;
    let event = req.json::<EventPayload>()?.into_new_event()?;
    let archiving = event.status == EventStatus::Archived;
    if !ctx
        .store()
        .update_event(id, event)
        .await
        .or_internal("Failed to update event")?
    {
        return Err(ApiError::not_found("Event not found"));
    }
    // Archived events must not keep challenges.
    if archiving {
        ctx.store()
            .archive_event(id)
            .await
            .or_internal("Failed to archive event")?;
        tracing::info!(event_id = id, "Archived event through update");
    }
    Ok(json!({ "success": true }))
}

async fn archive(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "Event")?;
    if !ctx
        .store()
        .archive_event(id)
        .await
        .or_internal("Failed to archive event")?
    {
        return Err(ApiError::not_found("Event not found"));
    }
    tracing::info!(event_id = id, "Archived event");
    Ok(json!({ "success": true }))
}

async fn delete(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "Event")?;
    let in_use = ctx
        .store()
        .count_challenges_in_event(id)
        .await
        .or_internal("Failed to delete event")?;
    if in_use > 0 {
        return Err(ApiError::conflict("Cannot delete event: it has challenges"));
    }
    if !ctx
        .store()
        .delete_event(id)
        .await
        .or_internal("Failed to delete event")?
    {
        return Err(ApiError::not_found("Event not found"));
    }
    Ok(json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use hyper::StatusCode;

    use crate::{
        db::{Store, models::NewChallenge, store::ChallengeFilter},
        rest::test_util::{TestApp, TestSession},
        security::flag::hash_flag,
    };

    use super::*;

    async fn create_event(app: &TestApp, session: &TestSession, body: Value) -> i32 {
        let resp = app
            .request(Method::POST, "/api/events.php?action=create")
            .admin()
            .csrf_json(session, body)
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
        resp.body["id"].as_i64().unwrap() as i32
    }

    fn running_event(name: &str) -> Value {
        let now = Utc::now();
        json!({
            "name": name,
            "description": "Autumn qualifier",
            "start_date": (now - Duration::hours(1)).to_rfc3339(),
            "end_date": (now + Duration::hours(5)).to_rfc3339(),
        })
    }

    async fn challenge_in(app: &TestApp, event_id: i32, flag: &str, points: i32) -> i32 {
        app.store
            .create_challenge(NewChallenge {
                title: format!("chall-{points}"),
                description: String::new(),
                category: "Web".into(),
                difficulty: Default::default(),
                points,
                flag_hash: hash_flag(flag),
                files: json!([]),
                challenge_link: None,
                event_id: Some(event_id),
                status: Default::default(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_and_read_events() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let id = create_event(&app, &session, running_event("Qualifier")).await;

        let resp = app.request(Method::GET, "/api/events?action=active").send().await;
        assert_eq!(resp.body["event"]["id"], id);
        assert_eq!(resp.body["event"]["status"], "active");

        let resp = app
            .request(Method::GET, &format!("/api/events?action=get&id={id}"))
            .send()
            .await;
        assert_eq!(resp.body["event"]["name"], "Qualifier");

        let resp = app.request(Method::GET, "/api/events?action=list").send().await;
        assert_eq!(resp.body["events"].as_array().unwrap().len(), 1);

        let resp = app.request(Method::GET, "/api/events?action=get&id=42").send().await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_local_datetime_inputs() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let id = create_event(
            &app,
            &session,
            json!({ "name": "Finals", "start_date": "2025-11-01T09:00", "end_date": "2025-11-02T18:30" }),
        )
        .await;
        let event = app.store.find_event(id).await.unwrap().unwrap();
        assert_eq!(event.start_date, Utc.with_ymd_and_hms(2025, 11, 1, 9, 0, 0).unwrap());
        assert_eq!(event.end_date, Utc.with_ymd_and_hms(2025, 11, 2, 18, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn test_event_validation() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let cases = [
            (json!({ "start_date": "2025-01-01T00:00", "end_date": "2025-01-02T00:00" }), "Event name is required"),
            (json!({ "name": "X", "start_date": "2025-01-01T00:00" }), "Start and end dates are required"),
            (json!({ "name": "X", "start_date": "soon", "end_date": "2025-01-02T00:00" }), "Invalid start date"),
            (json!({ "name": "X", "start_date": "2025-01-02T00:00", "end_date": "2025-01-01T00:00" }), "End date must be after start date"),
        ];
        for (body, message) in cases {
            let resp = app
                .request(Method::POST, "/api/events?action=add")
                .admin()
                .csrf_json(&session, body)
                .send()
                .await;
            assert_eq!(resp.status, StatusCode::BAD_REQUEST);
            assert_eq!(resp.body["error"], message);
        }
    }

    #[tokio::test]
    async fn test_archive_moves_challenges_to_general_pool() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let event_id = create_event(&app, &session, running_event("Spring")).await;
        let first = challenge_in(&app, event_id, "cvctf{a}", 10).await;
        let second = challenge_in(&app, event_id, "cvctf{b}", 20).await;

        let resp = app
            .request(Method::POST, &format!("/api/events?action=archive&id={event_id}"))
            .admin()
            .csrf_json(&session, json!({}))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);

        let event = app.store.find_event(event_id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Archived);
        for id in [first, second] {
            let challenge = app.store.find_challenge(id).await.unwrap().unwrap();
            assert_eq!(challenge.event_id, None);
        }
        let filter = ChallengeFilter {
            event_id: Some(event_id),
            ..Default::default()
        };
        assert!(app.store.list_challenges(&filter).await.unwrap().is_empty());

        let resp = app.request(Method::GET, "/api/events?action=active").send().await;
        assert!(resp.body["event"].is_null());
    }

    #[tokio::test]
    async fn test_update_to_archived_releases_challenges() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let event_id = create_event(&app, &session, running_event("Autumn")).await;
        let challenge = challenge_in(&app, event_id, "cvctf{autumn}", 50).await;

        let mut body = running_event("Autumn");
        body["status"] = json!("archived");
        let resp = app
            .request(Method::PUT, &format!("/api/events?action=update&id={event_id}"))
            .admin()
            .csrf_json(&session, body)
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);

        let event = app.store.find_event(event_id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Archived);
        let challenge = app.store.find_challenge(challenge).await.unwrap().unwrap();
        assert_eq!(challenge.event_id, None);

        let resp = app
            .request(Method::DELETE, &format!("/api/events?action=delete&id={event_id}"))
            .admin()
            .session(&session)
            .header("x-csrf-token", &session.token)
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delete_blocked_while_challenges_reference_event() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let event_id = create_event(&app, &session, running_event("Winter")).await;
        let challenge = challenge_in(&app, event_id, "cvctf{w}", 10).await;
        let delete = || {
            app.request(Method::DELETE, &format!("/api/events?action=delete&id={event_id}"))
                .admin()
                .session(&session)
                .header("x-csrf-token", &session.token)
                .send()
        };

        let resp = delete().await;
        assert_eq!(resp.status, StatusCode::CONFLICT);
        assert_eq!(resp.body["error"], "Cannot delete event: it has challenges");

        app.store.delete_challenge(challenge).await.unwrap();
        assert_eq!(delete().await.status, StatusCode::OK);
        assert!(app.store.find_event(event_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scoreboard_survives_archiving() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let event_id = create_event(&app, &session, running_event("Summer")).await;
        let easy = challenge_in(&app, event_id, "cvctf{easy}", 100).await;
        let hard = challenge_in(&app, event_id, "cvctf{hard}", 300).await;
        let alice = app.seed_user("Alice").await;
        let bob = app.seed_user("Bob").await;

        for (user, challenge, flag) in [
            (bob.id, easy, "cvctf{easy}"),
            (alice.id, easy, "cvctf{easy}"),
            (alice.id, hard, "cvctf{hard}"),
            (alice.id, hard, "cvctf{hard}"),
        ] {
            app.request(Method::POST, "/api/submit_flag")
                .csrf_json(&session, json!({ "challenge_id": challenge, "user_id": user, "flag": flag }))
                .send()
                .await;
        }

        app.request(Method::POST, &format!("/api/events?action=archive&id={event_id}"))
            .admin()
            .csrf_json(&session, json!({}))
            .send()
            .await;

        let resp = app
            .request(Method::GET, &format!("/api/events?action=scoreboard&id={event_id}"))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        let board = resp.body["leaderboard"].as_array().unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0]["username"], "Alice");
        assert_eq!(board[0]["points"], 400);
        assert_eq!(board[0]["solved"], 2);
        assert_eq!(board[0]["rank"], 1);
        assert_eq!(board[1]["username"], "Bob");
        assert_eq!(board[1]["rank"], 2);
    }

    #[test]
    fn test_rank_scores_tie_breaks() {
        let at = |minute| Some(Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap());
        let row = |user_id, points, solved, last_solve_at| ScoreRow {
            user_id,
            name: format!("user{user_id}"),
            points,
            solved,
            last_solve_at,
        };
        let ranked = rank_scores(vec![
            row(1, 100, 1, at(30)),
            row(2, 100, 1, at(10)),
            row(3, 100, 2, at(50)),
            row(4, 300, 1, at(59)),
        ]);
        let order: Vec<i64> = ranked.iter().map(|r| r["user_id"].as_i64().unwrap()).collect();
        assert_eq!(order, [4, 3, 2, 1]);
        assert_eq!(ranked[3]["rank"], 4);
    }
}
