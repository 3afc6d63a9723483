// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use hyper::StatusCode;
use thiserror::Error;

use crate::{db::StoreError, security::sanitize::sanitize_error_message};

/// Errors a request handler can answer with.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    TooManyRequests(&'static str),
    /// Only `message` is shown to the client; `source` goes to the log.
    #[error("{message}")]
    Internal {
        message: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal(
        message: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let source = source.into();
        tracing::error!("{message}: {source}");
        ApiError::Internal { message, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `{"error": ...}` payload sent to the client.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": sanitize_error_message(&self.to_string()) })
    }
}

/// Translates store failures at the handler boundary.
pub trait StoreResultExt<T> {
    /// Keeps conflicts and missing rows visible to the client and replaces
    /// everything else with `message`.
    fn or_internal(self, message: &'static str) -> ApiResult<T>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn or_internal(self, message: &'static str) -> ApiResult<T> {
        self.map_err(|e| match e {
            StoreError::Conflict(what) => ApiError::Conflict(what),
            StoreError::NotFound => ApiError::NotFound(e.to_string()),
            other => ApiError::internal(message, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::validation("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::TooManyRequests("slow down").status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn test_store_errors_are_translated() {
        let conflict: Result<(), _> = Err(StoreError::Conflict("Email already registered".into()));
        let err = conflict.or_internal("Registration failed").unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_json()["error"], "Email already registered");

        let broken: Result<(), _> = Err(StoreError::Pool("connection refused to 10.0.0.3".into()));
        let err = broken.or_internal("Failed to fetch challenges").unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_json()["error"], "Failed to fetch challenges");
    }

    #[test]
    fn test_error_body_is_sanitized() {
        let err = ApiError::validation("cannot read /srv/app/config.json");
        assert_eq!(err.to_json()["error"], "cannot read [file removed]");
    }
}
