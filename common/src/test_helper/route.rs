// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::position::{GnssPosition, Position};
use chrono::{DateTime, Utc};

/// Returns a short delivery route through Oschersleben used by tests.
pub fn get_route() -> Vec<Position> {
    vec![
        Position::new(&52.026649, &11.282535),
        Position::new(&52.026751, &11.282047),
        Position::new(&52.026807, &11.281746),
    ]
}

/// Returns a canned GNSS fix on the test route.
pub fn get_fix() -> GnssPosition {
    GnssPosition::new(
        52.026649,
        11.282535,
        4.2,
        8.5,
        Some(81.0),
        Some(271.5),
        &DateTime::<Utc>::default(),
    )
}
