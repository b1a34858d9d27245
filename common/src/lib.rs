// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Common crate for the courier uplink daemon
//!
//! Provides the common data types that are used across every module.

pub mod identity;
pub mod position;
pub mod sample;
pub mod serde;
pub mod test_helper;

/// Task registry key of the background location delivery.
///
/// The background delivery registration is keyed by this fixed name, like the
/// task name handed to the platform task registry in the mobile original.
pub const BACKGROUND_LOCATION_TASK: &str = "COURIER_BACKGROUND_LOCATION";
