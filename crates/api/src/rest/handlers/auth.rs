// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use validator::Validate;

use super::{invalid_action, validate_payload};
use crate::{
    db::models::{NewUser, UserRole},
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
    security::{
        constant_time_eq,
        password::{MIN_PASSWORD_LENGTH, hash_password, verify_password},
        rate_limit::Bucket,
        sanitize::sanitize_input,
    },
};

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginRequest {
    email: String,
    password: String,
}

const MIN_PASSWORD_LENGTH_U64: u64 = MIN_PASSWORD_LENGTH as u64;

#[derive(Deserialize, Validate, Default)]
#[serde(default)]
struct RegisterRequest {
    name: String,
    #[validate(email(message = "Invalid email format"))]
    email: String,
    #[validate(length(
        min = MIN_PASSWORD_LENGTH_U64,
        message = "Password must be at least 8 characters long"
    ))]
    password: String,
}

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    if req.method() != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }
    match req.action() {
        "login" => login(ctx, req).await,
        "register" => register(ctx, req).await,
        _ => Err(invalid_action()),
    }
}

async fn login(ctx: &Context, req: &Request) -> ApiResult<Value> {
    ctx.check_rate_limit(Bucket::Auth)?;
    ctx.require_csrf(req).await?;
    let payload: LoginRequest = req.json()?;
    let email = sanitize_input(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    if let Some(admin) = &ctx.config().admin {
        let email_ok = constant_time_eq(&email, &admin.email);
        let password_ok = constant_time_eq(&payload.password, &admin.password);
        if email_ok & password_ok {
            let user = ctx
                .store()
                .find_user_by_email(&admin.email)
                .await
                .or_internal("Login failed")?
                .ok_or_else(|| {
                    ApiError::internal("Login failed", "configured admin was not seeded")
                })?;
            tracing::info!(user_id = user.id, "Admin logged in");
            return Ok(json!({ "success": true, "isAdmin": true, "user": user }));
        }
    }

    let user = ctx
        .store()
        .find_user_by_email(&email)
        .await
        .or_internal("Login failed")?;
    let Some(user) = user.filter(|u| verify_password(&payload.password, &u.password_hash)) else {
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };
    if user.is_banned {
        return Err(ApiError::Forbidden("Account is banned".into()));
    }
    Ok(json!({ "success": true, "isAdmin": user.is_admin(), "user": user }))
}

async fn register(ctx: &Context, req: &Request) -> ApiResult<Value> {
    ctx.check_rate_limit(Bucket::Auth)?;
    ctx.require_csrf(req).await?;
    let mut payload: RegisterRequest = req.json()?;
    payload.name = sanitize_input(&payload.name);
    payload.email = sanitize_input(&payload.email);
    if payload.name.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("All fields are required"));
    }
    validate_payload(&payload)?;

    let password_hash = hash_password(&payload.password)
        .map_err(|e| ApiError::internal("Registration failed", e.to_string()))?;
    let user = ctx
        .store()
        .create_user(NewUser {
            name: payload.name,
            email: payload.email,
            password_hash,
            role: UserRole::User,
        })
        .await
        .or_internal("Registration failed")?;
    tracing::info!(user_id = user.id, "Registered new user");
    Ok(json!({ "success": true, "user": user }))
}
