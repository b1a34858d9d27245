// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::Utc;
use rand::{Rng, distr::Alphanumeric, rng};
use serde::{Deserialize, Serialize};

/// Length of the random alphanumeric suffix in a generated identity.
const SUFFIX_LEN: usize = 6;

/// Prefix of every generated identity token.
const PREFIX: &str = "RIDER_";

/// A locally generated token identifying the installation/rider.
///
/// Identities look like `RIDER_<timestamp><random>`: the UTC generation time
/// in milliseconds followed by a random alphanumeric suffix. An identity is
/// generated once, persisted, and read by both the interactive and the
/// background delivery paths. Regenerating it invalidates the prior
/// association on the server side; no reconciliation happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Wraps an already persisted identity token.
    pub fn new(token: &str) -> Self {
        DeviceIdentity(token.trim().to_owned())
    }

    /// Generates a fresh identity token.
    ///
    /// # Example
    ///
    /// ```rust
    /// use common::identity::DeviceIdentity;
    ///
    /// let id = DeviceIdentity::generate();
    /// assert!(id.as_str().starts_with("RIDER_"));
    /// ```
    pub fn generate() -> Self {
        let suffix: String = rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(char::from)
            .collect();
        DeviceIdentity(format!("{PREFIX}{}{suffix}", Utc::now().timestamp_millis()))
    }

    /// Returns true when the token is non-empty after trimming.
    ///
    /// A persisted identity file that was truncated or cleared yields an
    /// empty token, which callers treat the same as a missing one.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
