// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! GNSS sources and the background batch delivery
//!
//! The position sources bridge the external location subsystem (a gpsd
//! daemon, or a constant replay source for testing) onto the event bus. The
//! batch delivery buffers published fixes and flushes them in batches
//! according to registered scheduling hints.

pub mod batcher;
pub mod constant_source;
pub mod gpsd_source;
