// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::HashMap, net::IpAddr, sync::Arc};

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{
    HeaderMap, Method, Response, StatusCode,
    body::Bytes,
    header::{self, HeaderValue},
};
use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    db::{Store, models::User},
    error::{ApiError, ApiResult, StoreResultExt},
    security::{
        csrf::{CsrfStore, SESSION_COOKIE},
        rate_limit::{Bucket, RateLimiter, client_fingerprint},
    },
};

pub mod handlers;

#[cfg(test)]
pub(crate) mod test_util;

/// Request bodies above this size are rejected before any handler runs.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// State shared by every request.
#[derive(Clone)]
pub struct BaseContext {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub csrf: CsrfStore,
    pub limiter: RateLimiter,
}

impl BaseContext {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            csrf: CsrfStore::new(config.csrf_token_ttl),
            limiter: RateLimiter::new(
                config.rate_limit_window,
                config.auth_rate_limit,
                config.flag_rate_limit,
            ),
            config: Arc::new(config),
        }
    }
}

pub struct Context {
    base: BaseContext,
    ip: IpAddr,
    user_agent: String,
    admin_email: Option<String>,
    csrf_header: Option<String>,
    session_id: String,
    fresh_session: bool,
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn session_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| {
            !value.is_empty()
                && value.len() <= 128
                && value.chars().all(|c| c.is_ascii_alphanumeric())
        })
}

impl Context {
    pub fn new(base: BaseContext, ip: IpAddr, headers: &HeaderMap) -> Self {
        let (session_id, fresh_session) = match session_from_cookies(headers) {
            Some(id) => (id, false),
            None => (CsrfStore::new_session_id(), true),
        };
        Self {
            base,
            ip,
            user_agent: header_string(headers, "user-agent").unwrap_or_else(|| "unknown".into()),
            admin_email: header_string(headers, "x-admin-email"),
            csrf_header: header_string(headers, "x-csrf-token"),
            session_id,
            fresh_session,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.base.store.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.base.config
    }

    pub fn check_rate_limit(&self, bucket: Bucket) -> ApiResult<()> {
        let fingerprint = client_fingerprint(&self.ip, &self.user_agent);
        if self.base.limiter.check(&fingerprint, bucket) {
            Ok(())
        } else {
            tracing::warn!(ip = %self.ip, ?bucket, "Rate limit exceeded");
            Err(ApiError::TooManyRequests(match bucket {
                Bucket::Auth => "Too many requests. Please try again later.",
                Bucket::Flags => "Too many flag submissions. Please try again later.",
            }))
        }
    }

    /// Resolves `X-Admin-Email` to a non-banned admin account.
    pub async fn require_admin(&self) -> ApiResult<User> {
        let denied = || ApiError::Forbidden("Admin access required".into());
        let Some(email) = self.admin_email.as_deref() else {
            tracing::warn!(ip = %self.ip, "Admin request without X-Admin-Email");
            return Err(denied());
        };
        match self
            .store()
            .find_user_by_email(email)
            .await
            .or_internal("Failed to verify admin access")?
        {
            Some(user) if user.is_admin() => Ok(user),
            _ => {
                tracing::warn!(ip = %self.ip, email, "Rejected admin request");
                Err(denied())
            }
        }
    }

    /// Accepts the token from the `csrf_token` body field or the
    /// `X-CSRF-Token` header.
    pub async fn require_csrf(&self, req: &Request) -> ApiResult<()> {
        let token = req
            .body_field("csrf_token")
            .or_else(|| self.csrf_header.clone());
        if self
            .base
            .csrf
            .validate(Some(&self.session_id), token.as_deref())
            .await
        {
            Ok(())
        } else {
            tracing::warn!(ip = %self.ip, "Invalid CSRF token");
            Err(ApiError::Forbidden("Invalid CSRF token".into()))
        }
    }

    pub async fn issue_csrf_token(&self) -> String {
        self.base.csrf.issue(&self.session_id).await
    }
}

/// Method, query and body of one API call.
pub struct Request {
    method: Method,
    query: HashMap<String, String>,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, query: Option<&str>, body: Bytes) -> Self {
        Self {
            method,
            query: query
                .and_then(|q| serde_urlencoded::from_str(q).ok())
                .unwrap_or_default(),
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn action(&self) -> &str {
        self.param("action").unwrap_or("")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// A positive integer id from the query string.
    pub fn id_param(&self, name: &str, what: &str) -> ApiResult<i32> {
        self.param(name)
            .and_then(|v| v.parse().ok())
            .filter(|id: &i32| *id > 0)
            .ok_or_else(|| ApiError::validation(format!("{what} ID required")))
    }

    /// Like [`Request::id_param`], but absence is not an error.
    pub fn optional_id_param(&self, name: &str) -> ApiResult<Option<i32>> {
        match self.param(name) {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| ApiError::validation(format!("Invalid {name}"))),
        }
    }

    /// Deserializes the JSON body. An empty body reads as `{}`.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        let result = if self.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_str("{}")
        } else {
            serde_json::from_slice(&self.body)
        };
        result.map_err(|e| {
            tracing::debug!("Rejected JSON payload: {e}");
            ApiError::validation("Invalid JSON payload")
        })
    }

    fn body_field(&self, name: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        value
            .get(name)?
            .as_str()
            .map(str::to_string)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Auth,
    Users,
    Challenges,
    Events,
    Categories,
    Sponsors,
    SubmitFlag,
    Stats,
    Csrf,
}

impl Resource {
    /// Maps `/api/<name>` and the legacy `/api/<name>.php` to a resource.
    pub fn from_path(path: &str) -> Option<Self> {
        let name = path.strip_prefix("/api/")?.trim_end_matches('/');
        let name = name.strip_suffix(".php").unwrap_or(name);
        Some(match name {
            "auth" => Resource::Auth,
            "users" => Resource::Users,
            "challenges" => Resource::Challenges,
            "events" => Resource::Events,
            "categories" => Resource::Categories,
            "sponsors" => Resource::Sponsors,
            "submit_flag" => Resource::SubmitFlag,
            "stats" => Resource::Stats,
            "csrf" => Resource::Csrf,
            _ => return None,
        })
    }
}

pub async fn dispatch(
    ctx: &Context,
    resource: Resource,
    req: &Request,
) -> ApiResult<serde_json::Value> {
    match resource {
        Resource::Auth => handlers::auth::handle(ctx, req).await,
        Resource::Users => handlers::users::handle(ctx, req).await,
        Resource::Challenges => handlers::challenges::handle(ctx, req).await,
        Resource::Events => handlers::events::handle(ctx, req).await,
        Resource::Categories => handlers::categories::handle(ctx, req).await,
        Resource::Sponsors => handlers::sponsors::handle(ctx, req).await,
        Resource::SubmitFlag => handlers::flags::handle(ctx, req).await,
        Resource::Stats => handlers::stats::handle(ctx, req).await,
        Resource::Csrf => handlers::csrf::handle(ctx, req).await,
    }
}

fn json_response(status: StatusCode, payload: &serde_json::Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(payload).unwrap_or_default();
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

fn apply_cors(resp: &mut Response<Full<Bytes>>, allow_origin: &str) {
    let headers = resp.headers_mut();
    if let Ok(origin) = HeaderValue::from_str(allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, X-Admin-Email, X-CSRF-Token"),
    );
    if allow_origin != "*" {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}

/// Answers one HTTP request: CORS preflight, health check or API call.
pub async fn serve<B>(
    base: BaseContext,
    remote_ip: IpAddr,
    req: hyper::Request<B>,
) -> Response<Full<Bytes>>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let allow_origin = base.config.cors_allow_origin.clone();
    let path = parts.uri.path();

    let mut resp = if parts.method == Method::OPTIONS {
        let mut resp = Response::new(Full::new(Bytes::new()));
        *resp.status_mut() = StatusCode::NO_CONTENT;
        resp
    } else if path == "/health" {
        json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
    } else if let Some(resource) = Resource::from_path(path) {
        match Limited::new(body, MAX_BODY_SIZE).collect().await {
            Ok(collected) => {
                let ctx = Context::new(base, remote_ip, &parts.headers);
                let request = Request::new(
                    parts.method.clone(),
                    parts.uri.query(),
                    collected.to_bytes(),
                );
                let (status, payload) = match dispatch(&ctx, resource, &request).await {
                    Ok(payload) => (StatusCode::OK, payload),
                    Err(e) => (e.status(), e.to_json()),
                };
                tracing::debug!(
                    method = %parts.method,
                    path,
                    status = status.as_u16(),
                    "Handled request"
                );
                let mut resp = json_response(status, &payload);
                if ctx.fresh_session && resource == Resource::Csrf && status.is_success() {
                    let cookie = format!(
                        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
                        ctx.session_id
                    );
                    if let Ok(cookie) = HeaderValue::from_str(&cookie) {
                        resp.headers_mut().insert(header::SET_COOKIE, cookie);
                    }
                }
                resp
            }
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &serde_json::json!({ "error": "Request body too large" }),
            ),
            Err(e) => {
                tracing::warn!("Failed to read request body: {e}");
                json_response(
                    StatusCode::BAD_REQUEST,
                    &serde_json::json!({ "error": "Failed to read request body" }),
                )
            }
        }
    } else {
        json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": "Not found" }))
    };

    apply_cors(&mut resp, &allow_origin);
    resp
}
