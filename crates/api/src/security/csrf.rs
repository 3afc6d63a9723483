// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use super::{constant_time_eq, random_token};

pub const SESSION_COOKIE: &str = "cvctf_session";

/// Server-side CSRF tokens, one per browser session.
#[derive(Clone)]
pub struct CsrfStore {
    tokens: moka::future::Cache<String, String>,
}

impl CsrfStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: moka::future::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn new_session_id() -> String {
        random_token(16)
    }

    /// Generates a fresh token for the session, replacing any previous one.
    pub async fn issue(&self, session_id: &str) -> String {
        let token = random_token(32);
        self.tokens
            .insert(session_id.to_string(), token.clone())
            .await;
        token
    }

    pub async fn validate(&self, session_id: Option<&str>, token: Option<&str>) -> bool {
        let (Some(session_id), Some(token)) = (session_id, token) else {
            return false;
        };
        if token.is_empty() {
            return false;
        }
        match self.tokens.get(session_id).await {
            Some(expected) => constant_time_eq(&expected, token),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_validate() {
        let store = CsrfStore::new(Duration::from_secs(60));
        let session = CsrfStore::new_session_id();
        let token = store.issue(&session).await;
        assert_eq!(token.len(), 64);
        assert!(store.validate(Some(&session), Some(&token)).await);
        assert!(!store.validate(Some(&session), Some("nope")).await);
        assert!(!store.validate(Some("other-session"), Some(&token)).await);
        assert!(!store.validate(None, Some(&token)).await);
        assert!(!store.validate(Some(&session), None).await);
    }

    #[tokio::test]
    async fn test_reissue_replaces_token() {
        let store = CsrfStore::new(Duration::from_secs(60));
        let old = store.issue("s").await;
        let new = store.issue("s").await;
        assert!(!store.validate(Some("s"), Some(&old)).await);
        assert!(store.validate(Some("s"), Some(&new)).await);
    }
}
