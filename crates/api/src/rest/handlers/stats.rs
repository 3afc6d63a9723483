// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::Method;
use serde_json::Value;

use crate::{
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
};

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    if req.method() != Method::GET {
        return Err(ApiError::MethodNotAllowed);
    }
    ctx.require_admin().await?;
    let stats = ctx
        .store()
        .stats()
        .await
        .or_internal("Failed to fetch statistics")?;
    serde_json::to_value(stats).map_err(|e| ApiError::internal("Failed to fetch statistics", e))
}

#[cfg(test)]
mod tests {
    use hyper::StatusCode;
    use serde_json::json;

    use crate::{db::Store, rest::test_util::TestApp};

    use super::*;

    #[tokio::test]
    async fn test_stats_counts() {
        let app = TestApp::new();
        app.seed_admin().await;
        let session = app.session().await;
        let user = app.seed_user("Grace").await;
        let challenge = app.seed_challenge("Stats", "cvctf{n}", 10).await;
        for flag in ["cvctf{no}", "cvctf{n}"] {
            app.request(Method::POST, "/api/submit_flag")
                .csrf_json(&session, json!({ "challenge_id": challenge, "user_id": user.id, "flag": flag }))
                .send()
                .await;
        }
        app.store.set_user_banned(user.id, Some(chrono::Utc::now())).await.unwrap();

        let resp = app.request(Method::GET, "/api/stats.php").admin().send().await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            resp.body,
            json!({
                "users": { "total": 2, "active": 1, "banned": 1, "admins": 1 },
                "challenges": { "total": 1, "active": 1, "disabled": 0 },
                "events": { "total": 0, "active": 0, "archived": 0 },
                "flags": { "total": 2, "correct": 1 },
            })
        );
    }

    #[tokio::test]
    async fn test_stats_access() {
        let app = TestApp::new();
        app.seed_admin().await;
        let resp = app.request(Method::GET, "/api/stats").send().await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
        let resp = app.request(Method::POST, "/api/stats").admin().send().await;
        assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
