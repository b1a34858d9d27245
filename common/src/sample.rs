// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{identity::DeviceIdentity, position::GnssPosition, serde::timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One GPS fix with associated metadata destined for the fleet server.
///
/// This is the wire payload of `POST {server}/api/positions`. Field names
/// follow the server's camelCase contract. `platform`, `altitude`, `heading`
/// and `isBackground` are omitted from the body when absent; the server
/// treats the body as a bag of fields and nulls are never sent.
///
/// Samples are ephemeral: built per reading, sent once, discarded. A sample
/// whose send fails is permanently lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub driver_id: DeviceIdentity,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub speed: f64,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_background: Option<bool>,
}

impl PositionSample {
    /// Builds the wire payload for one GNSS fix.
    ///
    /// # Arguments
    ///
    /// * `fix` - The GNSS fix to deliver.
    /// * `driver_id` - The device identity the sample is attributed to.
    /// * `platform` - Platform tag stamped on the sample, if configured.
    /// * `background` - Whether the fix arrived via the background delivery path.
    pub fn from_fix(
        fix: &GnssPosition,
        driver_id: &DeviceIdentity,
        platform: Option<&str>,
        background: bool,
    ) -> Self {
        PositionSample {
            driver_id: driver_id.clone(),
            latitude: fix.latitude(),
            longitude: fix.longitude(),
            accuracy: fix.accuracy(),
            speed: fix.speed(),
            timestamp: *fix.time(),
            platform: platform.map(str::to_owned),
            altitude: fix.altitude(),
            heading: fix.heading(),
            is_background: Some(background),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
