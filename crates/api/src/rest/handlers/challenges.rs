// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::Method;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::{admin_mutation, de, invalid_action};
use crate::{
    config::Config,
    db::{
        models::{ChallengeChanges, ChallengeStatus, Difficulty, NewChallenge},
        store::ChallengeFilter,
    },
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
    security::{
        flag::{hash_flag, is_flag_hash},
        sanitize::strip_tags,
    },
};

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChallengePayload {
    title: String,
    description: String,
    category: String,
    difficulty: Option<Difficulty>,
    #[serde(deserialize_with = "de::optional_i32")]
    points: Option<i32>,
    flag: Option<String>,
    flag_hash: Option<String>,
    files: Option<Value>,
    challenge_link: Option<String>,
    #[serde(deserialize_with = "de::optional_i32")]
    event_id: Option<i32>,
    status: Option<ChallengeStatus>,
}

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    match (req.method(), req.action()) {
        (&Method::GET, "list") => list(ctx, req).await,
        (&Method::GET, "get") => get(ctx, req).await,
        (&Method::POST, "add") => add(ctx, req).await,
        (&Method::PUT, "update") => update(ctx, req).await,
        (&Method::DELETE, "delete") => delete(ctx, req).await,
        _ => Err(invalid_action()),
    }
}

/// Parses a query value with the same spelling the JSON API uses.
fn parse_enum<T: DeserializeOwned>(value: &str, what: &str) -> ApiResult<T> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| ApiError::validation(format!("Invalid {what}")))
}

async fn list(ctx: &Context, req: &Request) -> ApiResult<Value> {
    let status = match req.param("status").unwrap_or("active") {
        "all" => None,
        other => Some(parse_enum(other, "status")?),
    };
    let filter = ChallengeFilter {
        event_id: req.optional_id_param("event_id")?,
        category: req.param("category").map(strip_tags),
        difficulty: req
            .param("difficulty")
            .map(|d| parse_enum(d, "difficulty"))
            .transpose()?,
        status,
    };
    let challenges = ctx
        .store()
        .list_challenges(&filter)
        .await
        .or_internal("Failed to fetch challenges")?;
    Ok(json!({ "challenges": challenges }))
}

async fn get(ctx: &Context, req: &Request) -> ApiResult<Value> {
    let id = req.id_param("id", "Challenge")?;
    let challenge = ctx
        .store()
        .find_challenge(id)
        .await
        .or_internal("Failed to fetch challenge")?
        .ok_or_else(|| ApiError::not_found("Challenge not found"))?;
    Ok(json!({ "challenge": challenge }))
}

/// Hash of the flag supplied in the payload, if any. Plaintext flags must
/// carry the configured prefix.
fn flag_hash_from(payload: &ChallengePayload, config: &Config) -> ApiResult<Option<String>> {
    if let Some(flag) = payload.flag.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        if !config.flag_format.is_empty() && !flag.starts_with(&config.flag_format) {
            return Err(ApiError::validation(format!(
                "Flag must start with {}",
                config.flag_format
            )));
        }
        return Ok(Some(hash_flag(flag)));
    }
    match payload.flag_hash.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        Some(hash) if is_flag_hash(hash) => Ok(Some(hash.to_ascii_lowercase())),
        Some(_) => Err(ApiError::validation("Invalid flag hash")),
        None => Ok(None),
    }
}

async fn changes_from(ctx: &Context, payload: ChallengePayload) -> ApiResult<ChallengeChanges> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::validation("Title is required"));
    }
    let points = payload.points.unwrap_or(0);
    if points < 0 {
        return Err(ApiError::validation("Points must be a non-negative number"));
    }
    let files = match payload.files {
        None | Some(Value::Null) => json!([]),
        Some(files @ Value::Array(_)) => files,
        Some(_) => return Err(ApiError::validation("Files must be a list")),
    };
    if let Some(event_id) = payload.event_id {
        ctx.store()
            .find_event(event_id)
            .await
            .or_internal("Failed to save challenge")?
            .ok_or_else(|| ApiError::not_found("Event not found"))?;
    }
    Ok(ChallengeChanges {
        title,
        description: payload.description,
        category: strip_tags(&payload.category),
        difficulty: payload.difficulty.unwrap_or_default(),
        points,
        files,
        challenge_link: payload
            .challenge_link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        event_id: payload.event_id,
        status: payload.status.unwrap_or_default(),
    })
}

async fn add(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let payload: ChallengePayload = req.json()?;
    let flag_hash = flag_hash_from(&payload, ctx.config())?
        .ok_or_else(|| ApiError::validation("Flag is required"))?;
    let changes = changes_from(ctx, payload).await?;
    let challenge = ctx
        .store()
        .create_challenge(NewChallenge {
            title: changes.title,
            description: changes.description,
            category: changes.category,
            difficulty: changes.difficulty,
            points: changes.points,
            flag_hash,
            files: changes.files,
            challenge_link: changes.challenge_link,
            event_id: changes.event_id,
            status: changes.status,
        })
        .await
        .or_internal("Failed to create challenge")?;
    tracing::info!(challenge_id = challenge.id, "Created challenge");
    Ok(json!({ "success": true, "id": challenge.id }))
}

async fn update(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "Challenge")?;
    let payload: ChallengePayload = req.json()?;
    let flag_hash = flag_hash_from(&payload, ctx.config())?;
    let changes = changes_from(ctx, payload).await?;
    if !ctx
        .store()
        .update_challenge(id, changes, flag_hash)
        .await
        .or_internal("Failed to update challenge")?
    {
        return Err(ApiError::not_found("Challenge not found"));
    }
    Ok(json!({ "success": true }))
}

async fn delete(ctx: &Context, req: &Request) -> ApiResult<Value> {
    admin_mutation(ctx, req).await?;
    let id = req.id_param("id", "Challenge")?;
    if !ctx
        .store()
        .delete_challenge(id)
        .await
        .or_internal("Failed to delete challenge")?
    {
        return Err(ApiError::not_found("Challenge not found"));
    }
    tracing::info!(challenge_id = id, "Deleted challenge");
    Ok(json!({ "success": true }))
}
