// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
    #[error("{0} must be set together with {1}")]
    Incomplete(&'static str, &'static str),
}

/// Credentials of the bootstrap administrator.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub listen_addr: SocketAddr,
    pub admin: Option<AdminCredentials>,
    /// Prefix every plaintext flag must start with. Empty disables the check.
    pub flag_format: String,
    pub auth_rate_limit: usize,
    pub flag_rate_limit: usize,
    pub rate_limit_window: Duration,
    pub csrf_token_ttl: Duration,
    pub cors_allow_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 0], 3000)),
            admin: None,
            flag_format: "cvctf{".to_string(),
            auth_rate_limit: 5,
            flag_rate_limit: 30,
            rate_limit_window: Duration::from_secs(60),
            csrf_token_ttl: Duration::from_secs(2 * 60 * 60),
            cors_allow_origin: "*".to_string(),
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

impl Config {
    /// Reads the configuration from the process environment, after loading a
    /// `.env` file if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to load .env file: {e}");
            }
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let admin = match (non_empty("ADMIN_EMAIL"), non_empty("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminCredentials {
                email: email.trim().to_string(),
                password,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Incomplete("ADMIN_EMAIL", "ADMIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Incomplete("ADMIN_PASSWORD", "ADMIN_EMAIL")),
        };

        let window_secs: u64 = parse(
            &lookup,
            "RATE_LIMIT_WINDOW_SECS",
            defaults.rate_limit_window.as_secs(),
        )?;
        let csrf_ttl_secs: u64 =
            parse(&lookup, "CSRF_TOKEN_TTL_SECS", defaults.csrf_token_ttl.as_secs())?;
        if window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "RATE_LIMIT_WINDOW_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            listen_addr: parse(&lookup, "LISTEN_ADDR", defaults.listen_addr)?,
            admin,
            flag_format: lookup("FLAG_FORMAT").unwrap_or(defaults.flag_format),
            auth_rate_limit: parse(&lookup, "AUTH_RATE_LIMIT", defaults.auth_rate_limit)?,
            flag_rate_limit: parse(&lookup, "FLAG_RATE_LIMIT", defaults.flag_rate_limit)?,
            rate_limit_window: Duration::from_secs(window_secs),
            csrf_token_ttl: Duration::from_secs(csrf_ttl_secs),
            cors_allow_origin: non_empty("CORS_ALLOW_ORIGIN").unwrap_or(defaults.cors_allow_origin),
        })
    }
}
