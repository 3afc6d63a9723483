// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;

/// Which limit applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Auth,
    Flags,
}

impl Bucket {
    fn suffix(self) -> &'static str {
        match self {
            Bucket::Auth => "",
            Bucket::Flags => "_flags",
        }
    }
}

/// Sliding window limiter keyed by client fingerprint.
///
/// Each key keeps the timestamps of its accepted requests inside the current
/// window; anything older is dropped on the next check.
#[derive(Clone)]
pub struct RateLimiter {
    hits: Arc<DashMap<String, Vec<Instant>>>,
    window: Duration,
    auth_limit: usize,
    flag_limit: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, auth_limit: usize, flag_limit: usize) -> Self {
        Self {
            hits: Arc::new(DashMap::new()),
            window,
            auth_limit,
            flag_limit,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a request and returns whether it is allowed.
    pub fn check(&self, fingerprint: &str, bucket: Bucket) -> bool {
        self.check_at(fingerprint, bucket, Instant::now())
    }

    pub fn check_at(&self, fingerprint: &str, bucket: Bucket, now: Instant) -> bool {
        let limit = match bucket {
            Bucket::Auth => self.auth_limit,
            Bucket::Flags => self.flag_limit,
        };
        let key = format!("{fingerprint}{}", bucket.suffix());
        let mut entry = self.hits.entry(key).or_default();
        entry.retain(|&at| now.saturating_duration_since(at) < self.window);
        if entry.len() >= limit {
            return false;
        }
        entry.push(now);
        true
    }

    /// Forgets keys whose requests all fell out of the window.
    pub fn prune(&self, now: Instant) {
        self.hits.retain(|_, hits| {
            hits.retain(|&at| now.saturating_duration_since(at) < self.window);
            !hits.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.hits.len()
    }
}

/// The identity requests are counted under: address plus user agent.
pub fn client_fingerprint(ip: &std::net::IpAddr, user_agent: &str) -> String {
    format!("{ip}_{user_agent}")
}
