// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::Method;
use serde_json::{Value, json};

use crate::{
    error::{ApiError, ApiResult},
    rest::{Context, Request},
};

/// Issues a token bound to the caller's session cookie.
pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    if req.method() != Method::GET {
        return Err(ApiError::validation("Invalid request"));
    }
    Ok(json!({ "token": ctx.issue_csrf_token().await }))
}

#[cfg(test)]
mod tests {
    use hyper::{StatusCode, header};

    use crate::rest::test_util::TestApp;

    use super::*;

    #[tokio::test]
    async fn test_token_is_bound_to_session() {
        let app = TestApp::new();
        let first = app.session().await;
        let second = app.session().await;
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(first.token.len(), 64);

        // A token presented with another session's cookie is rejected.
        let resp = app
            .request(Method::POST, "/api/auth?action=login")
            .session(&second)
            .json(json!({ "email": "a@example.com", "password": "password1", "csrf_token": first.token }))
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_existing_session_keeps_cookie() {
        let app = TestApp::new();
        let session = app.session().await;
        let resp = app
            .request(Method::GET, "/api/csrf.php")
            .session(&session)
            .send()
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert!(resp.headers.get(header::SET_COOKIE).is_none());
        let token = resp.body["token"].as_str().unwrap();
        assert_ne!(token, session.token);
    }

    #[tokio::test]
    async fn test_only_get_is_accepted() {
        let app = TestApp::new();
        let resp = app.request(Method::POST, "/api/csrf").send().await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.body["error"], "Invalid request");
    }
}
