// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use sha2::{Digest, Sha256};

use super::constant_time_eq;

/// Lowercase hex SHA-256 of the flag with surrounding whitespace removed.
pub fn hash_flag(flag: &str) -> String {
    format!("{:x}", Sha256::digest(flag.trim().as_bytes()))
}

pub fn flag_matches(submitted: &str, stored_hash: &str) -> bool {
    constant_time_eq(&hash_flag(submitted), &stored_hash.to_ascii_lowercase())
}

pub fn is_flag_hash(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
