// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::Utc;
use hyper::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use validator::Validate;

use super::{admin_mutation, de, events::rank_scores, invalid_action, validate_payload};
use crate::{
    db::{
        models::{NewUser, UserRole},
        store::ScoreRow,
    },
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
    security::{
        password::{MIN_PASSWORD_LENGTH, hash_password},
        sanitize::sanitize_input,
    },
};

const MIN_PASSWORD_LENGTH_U64: u64 = MIN_PASSWORD_LENGTH as u64;

#[derive(Deserialize, Validate, Default)]
#[serde(default)]
struct AddUserRequest {
    name: String,
    #[validate(email(message = "Invalid email format"))]
    email: String,
    #[validate(length(
        min = MIN_PASSWORD_LENGTH_U64,
        message = "Password must be at least 8 characters long"
    ))]
    password: String,
    role: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ToggleRequest {
    #[serde(deserialize_with = "de::optional_i32")]
    id: Option<i32>,
    #[serde(deserialize_with = "de::optional_bool")]
    is_banned: Option<bool>,
    #[serde(deserialize_with = "de::optional_bool")]
    make_admin: Option<bool>,
}

impl ToggleRequest {
    fn user_id(&self) -> ApiResult<i32> {
        self.id
            .filter(|id| *id > 0)
            .ok_or_else(|| ApiError::validation("User ID required"))
    }
}

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    match (req.method(), req.action()) {
        (&Method::GET, "scoreboard") => scoreboard(ctx).await,
        (&Method::GET, "list") => list(ctx).await,
        (&Method::POST, "add") => add(ctx, req).await,
        (&Method::POST, "ban") => ban(ctx, req).await,
        (&Method::POST, "makeAdmin") => make_admin(ctx, req).await,
        (&Method::DELETE, "delete") => delete(ctx, req).await,
        (&Method::GET, "flags") => flags(ctx, req).await,
        (&Method::POST, "reset") => reset(ctx, req).await,
        _ => Err(invalid_action()),
    }
}

async fn scoreboard(ctx: &Context) -> ApiResult<Value> {
    let users = ctx
        .store()
        .list_users()
        .await
        .or_internal("Failed to fetch scoreboard")?;
    let rows = users
        .into_iter()
        .filter(|u| !u.is_banned)
        .map(|u| ScoreRow {
            user_id: u.id,
            name: u.name,
            points: i64::from(u.total_points),
            solved: i64::from(u.challenges_solved),
            last_solve_at: None,
        })
        .collect();
    Ok(json!({ "leaderboard": rank_scores(rows) }))
}

async fn list(ctx: &Context) -> ApiResult<Value> {
    ctx.require_admin().await?;
    let users = ctx
        .store()
        .list_users()
        .await
        .or_internal("Failed to fetch users")?;
    Ok(json!({ "users": users }))
}

async fn add(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let mut payload: AddUserRequest = req.json()?;
    payload.name = sanitize_input(&payload.name);
    payload.email = sanitize_input(&payload.email);
    if payload.name.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Name, email, and password are required"));
    }
    validate_payload(&payload)?;
    let role = match payload.role.as_deref() {
        Some("admin") => UserRole::Admin,
        _ => UserRole::User,
    };
    let password_hash = hash_password(&payload.password)
        .map_err(|e| ApiError::internal("Failed to create user", e.to_string()))?;
    let user = ctx
        .store()
        .create_user(NewUser {
            name: payload.name,
            email: payload.email,
            password_hash,
            role,
        })
        .await
        .or_internal("Failed to create user")?;
    tracing::info!(user_id = user.id, ?role, "Admin created user");
    Ok(json!({ "success": true, "user_id": user.id }))
}

async fn ban(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let payload: ToggleRequest = req.json()?;
    let id = payload.user_id()?;
    let banned = payload.is_banned.unwrap_or(true);
    if !ctx
        .store()
        .set_user_banned(id, banned.then(Utc::now))
        .await
        .or_internal("Failed to update user status")?
    {
        return Err(ApiError::not_found("User not found"));
    }
    tracing::info!(user_id = id, banned, "Updated ban status");
    Ok(json!({ "success": true }))
}

async fn make_admin(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let payload: ToggleRequest = req.json()?;
    let id = payload.user_id()?;
    let role = if payload.make_admin.unwrap_or(true) {
        UserRole::Admin
    } else {
        UserRole::User
    };
    if !ctx
        .store()
        .set_user_role(id, role)
        .await
        .or_internal("Failed to update user role")?
    {
        return Err(ApiError::not_found("User not found"));
    }
    tracing::info!(user_id = id, ?role, "Updated user role");
    Ok(json!({ "success": true }))
}

async fn delete(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "User")?;
    if !ctx
        .store()
        .delete_user(id)
        .await
        .or_internal("Failed to delete user")?
    {
        return Err(ApiError::not_found("User not found"));
    }
    Ok(json!({ "success": true }))
}

async fn flags(ctx: &Context, req: &Request) -> ApiResult<Value> {
    ctx.require_admin().await?;
    let challenge_id = req.optional_id_param("challenge_id")?;
    let flags = ctx
        .store()
        .list_submissions(challenge_id)
        .await
        .or_internal("Failed to fetch flags")?;
    Ok(json!({ "flags": flags }))
}

async fn reset(ctx: &Context, req: &Request) -> ApiResult<Value> {
    let admin = admin_mutation(ctx, req).await?;
    let event_id = req.optional_id_param("event_id")?;
    let deleted = ctx
        .store()
        .reset_submissions(event_id)
        .await
        .or_internal("Failed to reset event")?;
    tracing::warn!(admin = %admin.email, ?event_id, deleted, "Reset submissions");
    Ok(json!({ "success": true, "deleted": deleted }))
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;

    use crate::{
        db::Store,
        rest::test_util::{TestApp, TestSession},
    };

    use super::*;

    async fn solve(
        app: &TestApp,
        session: &TestSession,
        user_id: i32,
        challenge_id: i32,
        flag: &str,
    ) {
        let resp = app
            .request(Method::POST, "/api/submit_flag")
            .csrf_json(session, json!({ "challenge_id": challenge_id, "user_id": user_id, "flag": flag }))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_public_scoreboard_excludes_banned_users() {
        let app = TestApp::new();
        let session = app.session().await;
        let alice = app.seed_user("Alice").await;
        let bob = app.seed_user("Bob").await;
        let carol = app.seed_user("Carol").await;
        let small = app.seed_challenge("Small", "cvctf{s}", 50).await;
        let big = app.seed_challenge("Big", "cvctf{b}", 200).await;
        solve(&app, &session, alice.id, small, "cvctf{s}").await;
        solve(&app, &session, bob.id, big, "cvctf{b}").await;
        solve(&app, &session, carol.id, big, "cvctf{b}").await;
        solve(&app, &session, carol.id, small, "cvctf{s}").await;
        app.store.set_user_banned(carol.id, Some(Utc::now())).await.unwrap();

        let resp = app.request(Method::GET, "/api/users?action=scoreboard").send().await;
        assert_eq!(resp.status, StatusCode::OK);
        let board = resp.body["leaderboard"].as_array().unwrap();
        let names: Vec<&str> = board.iter().map(|r| r["username"].as_str().unwrap()).collect();
        assert_eq!(names, ["Bob", "Alice"]);
        assert_eq!(board[0]["points"], 200);
    }

    #[tokio::test]
    async fn test_admin_only_reads() {
        let app = TestApp::new();
        app.seed_admin().await;
        for uri in ["/api/users?action=list", "/api/users?action=flags"] {
            let resp = app.request(Method::GET, uri).send().await;
            assert_eq!(resp.status, StatusCode::FORBIDDEN);
            let resp = app.request(Method::GET, uri).admin().send().await;
            assert_eq!(resp.status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_add_user_and_conflict() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let body = json!({ "name": "Judge", "email": "judge@example.com", "password": "password1", "role": "admin" });
        let resp = app
            .request(Method::POST, "/api/users?action=add")
            .admin()
            .csrf_json(&session, body.clone())
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
        let id = resp.body["user_id"].as_i64().unwrap() as i32;
        let user = app.store.find_user(id).await.unwrap().unwrap();
        assert_eq!(user.role, UserRole::Admin);

        let resp = app
            .request(Method::POST, "/api/users?action=add")
            .admin()
            .csrf_json(&session, body)
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::CONFLICT);

        let resp = app
            .request(Method::POST, "/api/users?action=add")
            .admin()
            .csrf_json(&session, json!({ "name": "X", "email": "x@example.com" }))
            .send()
            .await;
        assert_eq!(resp.body["error"], "Name, email, and password are required");
    }

    #[tokio::test]
    async fn test_ban_and_promote() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let user = app.seed_user("Dave").await;

        let resp = app
            .request(Method::POST, "/api/users?action=ban")
            .admin()
            .csrf_json(&session, json!({ "id": user.id }))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        let stored = app.store.find_user(user.id).await.unwrap().unwrap();
        assert!(stored.is_banned);
        assert!(stored.banned_at.is_some());

        app.request(Method::POST, "/api/users?action=ban")
            .admin()
            .csrf_json(&session, json!({ "id": user.id.to_string(), "is_banned": false }))
            .send()
            .await;
        let stored = app.store.find_user(user.id).await.unwrap().unwrap();
        assert!(!stored.is_banned);
        assert!(stored.banned_at.is_none());

        let resp = app
            .request(Method::POST, "/api/users?action=makeAdmin")
            .admin()
            .csrf_json(&session, json!({ "id": user.id, "make_admin": true }))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert!(app.store.find_user(user.id).await.unwrap().unwrap().is_admin());

        // The promoted user now passes the admin gate.
        let resp = app
            .request(Method::GET, "/api/users?action=list")
            .header("x-admin-email", "dave@cvctf.test")
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);

        let resp = app
            .request(Method::POST, "/api/users?action=ban")
            .admin()
            .csrf_json(&session, json!({}))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.body["error"], "User ID required");
    }

    #[tokio::test]
    async fn test_banned_admin_loses_access() {
        let app = TestApp::new();
        let admin = app.seed_admin().await;
        app.store.set_user_banned(admin.id, Some(Utc::now())).await.unwrap();
        let resp = app.request(Method::GET, "/api/users?action=list").admin().send().await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_flags_and_reset() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let user = app.seed_user("Erin").await;
        let first = app.seed_challenge("One", "cvctf{1}", 10).await;
        let second = app.seed_challenge("Two", "cvctf{2}", 20).await;
        solve(&app, &session, user.id, first, "cvctf{1}").await;
        solve(&app, &session, user.id, second, "cvctf{wrong}").await;

        let resp = app
            .request(Method::GET, &format!("/api/users?action=flags&challenge_id={second}"))
            .admin()
            .send()
            .await;
        let flags = resp.body["flags"].as_array().unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0]["user_name"], "Erin");
        assert_eq!(flags[0]["challenge_title"], "Two");
        assert_eq!(flags[0]["is_correct"], false);

        let resp = app
            .request(Method::POST, "/api/users?action=reset")
            .admin()
            .csrf_json(&session, json!({}))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body["deleted"], 2);
        let user = app.store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.total_points, 0);
        assert_eq!(user.challenges_solved, 0);
    }

    #[tokio::test]
    async fn test_delete_user() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let user = app.seed_user("Frank").await;
        let delete = |id: i32| {
            app.request(Method::DELETE, &format!("/api/users?action=delete&id={id}"))
                .admin()
                .session(&session)
                .header("x-csrf-token", &session.token)
                .send()
        };
        assert_eq!(delete(user.id).await.status, StatusCode::OK);
        assert!(app.store.find_user(user.id).await.unwrap().is_none());
        assert_eq!(delete(user.id).await.status, StatusCode::NOT_FOUND);
    }
}
