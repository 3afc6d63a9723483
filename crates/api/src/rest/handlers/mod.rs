// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, NaiveDateTime, Utc};
use validator::Validate;

use crate::{
    db::models::User,
    error::{ApiError, ApiResult},
    rest::{Context, Request},
};

pub mod auth;
pub mod categories;
pub mod challenges;
pub mod csrf;
pub mod events;
pub mod flags;
pub mod sponsors;
pub mod stats;
pub mod users;

fn invalid_action() -> ApiError {
    ApiError::validation("Invalid action")
}

/// Admin gate followed by the CSRF check, in that order.
async fn admin_mutation(ctx: &Context, req: &Request) -> ApiResult<User> {
    let admin = ctx.require_admin().await?;
    ctx.require_csrf(req).await?;
    Ok(admin)
}

/// Runs the derived validators and reports the first failing field, in
/// field-name order.
fn validate_payload<T: Validate>(payload: &T) -> ApiResult<()> {
    payload.validate().map_err(|errors| {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        let message = fields
            .iter()
            .flat_map(|(_, errs)| errs.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| "Invalid input".to_string());
        ApiError::Validation(message)
    })
}

/// Accepts RFC 3339 as well as the `YYYY-MM-DDTHH:MM[:SS]` form sent by
/// `datetime-local` inputs, which is taken as UTC.
pub(crate) fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Lenient deserializers for payloads produced by HTML forms, where numbers
/// often arrive as strings.
pub(crate) mod de {
    use serde::{Deserialize, Deserializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        Text(String),
    }

    pub fn optional_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = match Option::<NumberOrString>::deserialize(deserializer)? {
            None => return Ok(None),
            Some(NumberOrString::Number(n)) => n,
            Some(NumberOrString::Text(s)) if s.trim().is_empty() => return Ok(None),
            Some(NumberOrString::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("not a number: {s}")))?,
        };
        i32::try_from(value)
            .map(Some)
            .map_err(|_| D::Error::custom("number out of range"))
    }

    /// `true`, `false`, `1`, `0`, `"1"` and `"true"` style booleans.
    pub fn optional_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Loose {
            Bool(bool),
            Number(i64),
            Text(String),
        }
        Ok(match Option::<Loose>::deserialize(deserializer)? {
            None => None,
            Some(Loose::Bool(b)) => Some(b),
            Some(Loose::Number(n)) => Some(n != 0),
            Some(Loose::Text(s)) => match s.trim() {
                "1" | "true" | "on" | "yes" => Some(true),
                "0" | "false" | "off" | "no" | "" => Some(false),
                other => return Err(D::Error::custom(format!("not a boolean: {other}"))),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde::Deserialize;

    use super::*;

    #[test]
    fn test_parse_datetime() {
        let expected = Utc.with_ymd_and_hms(2025, 10, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_datetime("2025-10-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_datetime("2025-10-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_datetime("2025-10-01T12:30"), Some(expected));
        assert_eq!(parse_datetime(" 2025-10-01T12:30:00 "), Some(expected));
        assert_eq!(parse_datetime("2025-10-01 12:30:00"), Some(expected));
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[derive(Deserialize)]
    struct Loose {
        #[serde(default, deserialize_with = "de::optional_i32")]
        id: Option<i32>,
        #[serde(default, deserialize_with = "de::optional_bool")]
        flag: Option<bool>,
    }

    #[test]
    fn test_lenient_fields() {
        let parsed: Loose = serde_json::from_str(r#"{"id":"42","flag":"1"}"#).unwrap();
        assert_eq!(parsed.id, Some(42));
        assert_eq!(parsed.flag, Some(true));

        let parsed: Loose = serde_json::from_str(r#"{"id":7,"flag":false}"#).unwrap();
        assert_eq!(parsed.id, Some(7));
        assert_eq!(parsed.flag, Some(false));

        let parsed: Loose = serde_json::from_str(r#"{"id":"","flag":null}"#).unwrap();
        assert_eq!(parsed.id, None);
        assert_eq!(parsed.flag, None);

        let parsed: Loose = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.id, None);

        assert!(serde_json::from_str::<Loose>(r#"{"id":"abc"}"#).is_err());
        assert!(serde_json::from_str::<Loose>(r#"{"id":9999999999}"#).is_err());
    }
}
