// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::serde::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a geographical coordinate with latitude and longitude.
///
/// The `Position` struct is commonly used to store a point on Earth
/// in decimal degrees. Latitude values range from -90.0 to 90.0, and
/// longitude values range from -180.0 to 180.0. Route files fed to the
/// constant GNSS source are lists of these.
///
/// # Example
///
/// ```rust
/// use common::position::Position;
///
/// let pos = Position {
///     latitude: 52.5200,
///     longitude: 13.4050,
/// };
///
/// println!("{:?}", pos);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    /// Creates a new [`Position`] with the given latitude and longitude.
    pub fn new(latitude: &f64, longitude: &f64) -> Self {
        Position {
            latitude: *latitude,
            longitude: *longitude,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Represents a single GNSS (Global Navigation Satellite System) fix.
///
/// Stores the coordinate, the speed over ground, the estimated horizontal
/// accuracy, optional altitude and heading, and the UTC capture time of the
/// fix. A fix is constructed once per reading and discarded after delivery.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GnssPosition {
    latitude: f64,
    longitude: f64,
    speed: f64,
    accuracy: f64,
    altitude: Option<f64>,
    heading: Option<f64>,
    #[serde(with = "timestamp")]
    time: DateTime<Utc>,
}

impl GnssPosition {
    /// Creates a new [`GnssPosition`].
    ///
    /// # Arguments
    ///
    /// * `latitude` – Latitude in decimal degrees. Positive for northern hemisphere.
    /// * `longitude` – Longitude in decimal degrees. Positive for eastern hemisphere.
    /// * `speed` – Speed over ground in meters per second.
    /// * `accuracy` – Estimated horizontal accuracy in meters.
    /// * `altitude` – Altitude above mean sea level in meters, when the receiver reports one.
    /// * `heading` – Course over ground in degrees from true north, when reported.
    /// * `time` – Capture time of the fix in UTC.
    ///
    /// # Example
    ///
    /// ```rust
    /// use common::position::GnssPosition;
    ///
    /// let time = chrono::Utc::now();
    /// let pos = GnssPosition::new(52.0, 13.0, 4.2, 8.0, None, None, &time);
    /// ```
    pub fn new(
        latitude: f64,
        longitude: f64,
        speed: f64,
        accuracy: f64,
        altitude: Option<f64>,
        heading: Option<f64>,
        time: &DateTime<Utc>,
    ) -> GnssPosition {
        GnssPosition {
            latitude,
            longitude,
            speed,
            accuracy,
            altitude,
            heading,
            time: *time,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Returns the latitude in decimal degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Returns the longitude in decimal degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Returns the speed over ground in meters per second.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Returns the estimated horizontal accuracy in meters.
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// Returns the altitude in meters, if the receiver reported one.
    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    /// Returns the heading in degrees from true north, if reported.
    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    /// Returns the UTC capture time of the fix.
    pub fn time(&self) -> &DateTime<Utc> {
        &self.time
    }

    /// Returns the great-circle distance to `other` in meters.
    ///
    /// Haversine on the WGS84 mean radius. Used to evaluate the batch
    /// delivery distance hint, so meter-level precision is sufficient.
    pub fn distance_to(&self, other: &GnssPosition) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.8;
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}
