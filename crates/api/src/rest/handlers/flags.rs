// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use super::de;
use crate::{
    db::models::{ChallengeStatus, NewSubmittedFlag},
    error::{ApiError, ApiResult, StoreResultExt},
    rest::{Context, Request},
    security::{flag::flag_matches, rate_limit::Bucket},
};

const FAILED: &str = "Failed to process flag submission";

#[derive(Deserialize, Default)]
#[serde(default)]
struct SubmitFlagRequest {
    #[serde(deserialize_with = "de::optional_i32")]
    challenge_id: Option<i32>,
    flag: String,
    #[serde(deserialize_with = "de::optional_i32")]
    user_id: Option<i32>,
}

pub async fn handle(ctx: &Context, req: &Request) -> ApiResult<Value> {
    if req.method() != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }
    ctx.check_rate_limit(Bucket::Flags)?;
    ctx.require_csrf(req).await?;

    let payload: SubmitFlagRequest = req.json()?;
    let flag = payload.flag.trim();
    let (Some(challenge_id), Some(user_id)) = (payload.challenge_id, payload.user_id) else {
        return Err(ApiError::validation("Missing required fields"));
    };
    if flag.is_empty() {
        return Err(ApiError::validation("Missing required fields"));
    }

    let challenge = ctx
        .store()
        .find_challenge(challenge_id)
        .await
        .or_internal(FAILED)?
        .filter(|c| c.status == ChallengeStatus::Active)
        .ok_or_else(|| ApiError::not_found("Challenge not found"))?;
    let user = ctx
        .store()
        .find_user(user_id)
        .await
        .or_internal(FAILED)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if user.is_banned {
        return Err(ApiError::Forbidden("Account is banned".into()));
    }

    let is_correct = flag_matches(flag, &challenge.flag_hash);
    let recorded = ctx
        .store()
        .record_submission(NewSubmittedFlag {
            user_id,
            challenge_id,
            event_id: challenge.event_id,
            flag: flag.to_string(),
            is_correct,
        })
        .await
        .or_internal(FAILED)?;

    Ok(match (is_correct, recorded.first_solve) {
        (true, true) => {
            tracing::info!(user_id, challenge_id, points = challenge.points, "Challenge solved");
            json!({ "correct": true, "message": "Correct flag!", "points": challenge.points })
        }
        (true, false) => json!({
            "correct": true,
            "already_solved": true,
            "message": "Already solved",
            "points": 0,
        }),
        (false, _) => json!({ "correct": false, "message": "Incorrect flag" }),
    })
}
