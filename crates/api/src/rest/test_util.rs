// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Drives requests through [`super::serve`] against an in-memory store.

use std::{net::IpAddr, sync::Arc};

use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Method, StatusCode, body::Bytes, header};
use serde_json::{Value, json};

use super::{BaseContext, serve};
use crate::{
    config::Config,
    db::{
        Store,
        memory::MemoryStore,
        models::{NewChallenge, NewUser, User, UserRole},
    },
    security::{csrf::SESSION_COOKIE, flag::hash_flag},
};

pub const ADMIN_EMAIL: &str = "admin@cvctf.test";

pub struct TestApp {
    pub base: BaseContext,
    pub store: Arc<MemoryStore>,
    ip: IpAddr,
}

pub struct TestSession {
    pub session_id: String,
    pub token: String,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub struct TestRequest<'a> {
    app: &'a TestApp,
    builder: hyper::http::request::Builder,
    body: Bytes,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            base: BaseContext::new(store.clone(), config),
            store,
            ip: "203.0.113.7".parse().unwrap(),
        }
    }

    pub fn request(&self, method: Method, uri: &str) -> TestRequest<'_> {
        TestRequest {
            app: self,
            builder: hyper::Request::builder()
                .method(method)
                .uri(uri)
                .header(header::USER_AGENT, "cvctf-tests"),
            body: Bytes::new(),
        }
    }

    /// Fetches a CSRF token together with a fresh session cookie.
    pub async fn session(&self) -> TestSession {
        let resp = self.request(Method::GET, "/api/csrf").send().await;
        assert_eq!(resp.status, StatusCode::OK);
        let cookie = resp
            .headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .expect("csrf endpoint sets a session cookie");
        let session_id = cookie
            .split(';')
            .next()
            .and_then(|pair| pair.strip_prefix(&format!("{SESSION_COOKIE}=")))
            .expect("session cookie has a value")
            .to_string();
        TestSession {
            session_id,
            token: resp.body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Admin account usable through `X-Admin-Email`. The password hash is a
    /// placeholder, so this account cannot log in.
    pub async fn seed_admin(&self) -> User {
        self.store
            .ensure_admin(NewUser {
                name: "Admin".into(),
                email: ADMIN_EMAIL.into(),
                password_hash: "unusable".into(),
                role: UserRole::Admin,
            })
            .await
            .unwrap()
    }

    pub async fn seed_user(&self, name: &str) -> User {
        self.store
            .create_user(NewUser {
                name: name.into(),
                email: format!("{}@cvctf.test", name.to_lowercase()),
                password_hash: "unusable".into(),
                role: UserRole::User,
            })
            .await
            .unwrap()
    }

    pub async fn seed_challenge(&self, title: &str, flag: &str, points: i32) -> i32 {
        self.store
            .create_challenge(NewChallenge {
                title: title.into(),
                description: String::new(),
                category: "Web".into(),
                difficulty: Default::default(),
                points,
                flag_hash: hash_flag(flag),
                files: json!([]),
                challenge_link: None,
                event_id: None,
                status: Default::default(),
            })
            .await
            .unwrap()
            .id
    }
}

impl TestRequest<'_> {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    pub fn admin(self) -> Self {
        self.header("x-admin-email", ADMIN_EMAIL)
    }

    pub fn session(self, session: &TestSession) -> Self {
        let cookie = format!("{SESSION_COOKIE}={}", session.session_id);
        self.header("cookie", &cookie)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Bytes::from(serde_json::to_vec(&body).unwrap());
        self.builder = self
            .builder
            .header(header::CONTENT_TYPE, "application/json");
        self
    }

    /// Sends `body` with the session cookie and its CSRF token attached.
    pub fn csrf_json(self, session: &TestSession, mut body: Value) -> Self {
        body["csrf_token"] = Value::String(session.token.clone());
        self.session(session).json(body)
    }

    pub async fn send(self) -> TestResponse {
        let req = self.builder.body(Full::new(self.body)).unwrap();
        let resp = serve(self.app.base.clone(), self.app.ip, req).await;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }
}
