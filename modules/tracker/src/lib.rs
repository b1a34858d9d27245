// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Tracker module for the courier uplink daemon
//!
//! Owns the tracking state of the device. While tracking, the latest GNSS fix
//! is handed to the uplink on a fixed poll interval and the background batch
//! delivery is kept registered, so fixes keep flowing when the foreground
//! path is starved.

use common::position::GnssPosition;
use module_core::{
    BatchHints, BatchRegistrationResponsePtr, EventKind, Module, ModuleCtx, Request,
    SendResponsePtr, StatusProbeResponsePtr,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bus address of the tracker module.
pub const TRACKER_ADDR: u32 = 0x40;

/// Lower bound applied to the configured poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Static configuration of the [`Tracker`].
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// How often the latest fix is handed to the uplink while tracking.
    pub poll_interval: Duration,
    /// Scheduling hints passed on when registering the batch delivery.
    pub hints: BatchHints,
    /// Start tracking as soon as the module runs, without waiting for a
    /// [`StartTrackingEvent`](EventKind::StartTrackingEvent).
    pub auto_start: bool,
}

/// Foreground tracking controller.
///
/// Starting is idempotent: a second start while tracking only re-announces
/// [`TrackingStartedEvent`](EventKind::TrackingStartedEvent) and does not
/// register the batch delivery again. Stopping while not tracking announces
/// [`TrackingStoppedEvent`](EventKind::TrackingStoppedEvent) without
/// publishing an unregistration request.
pub struct Tracker {
    ctx: ModuleCtx,
    config: TrackerConfig,
    tracking: bool,
    last_fix: Option<GnssPosition>,
    next_req_id: u32,
}

impl Tracker {
    pub fn new(ctx: ModuleCtx, config: TrackerConfig) -> Self {
        Tracker {
            ctx,
            config,
            tracking: false,
            last_fix: None,
            next_req_id: 1,
        }
    }

    fn next_req_id(&mut self) -> u32 {
        let id = self.next_req_id;
        self.next_req_id = self.next_req_id.wrapping_add(1);
        id
    }

    fn start(&mut self) {
        if self.tracking {
            debug!("Start requested while already tracking");
        } else {
            info!("Tracking started");
            self.tracking = true;
            let id = self.next_req_id();
            let _ = self
                .ctx
                .publish_event(EventKind::RegisterBatchDeliveryRequestEvent(Arc::new(
                    Request {
                        id,
                        sender_addr: TRACKER_ADDR,
                        data: self.config.hints.clone(),
                    },
                )));
        }
        let _ = self.ctx.publish_event(EventKind::TrackingStartedEvent);
    }

    fn stop(&mut self) {
        if self.tracking {
            info!("Tracking stopped");
            self.tracking = false;
            self.last_fix = None;
            let id = self.next_req_id();
            let _ = self
                .ctx
                .publish_event(EventKind::UnregisterBatchDeliveryRequestEvent(Arc::new(
                    Request {
                        id,
                        sender_addr: TRACKER_ADDR,
                        data: self.config.hints.task.clone(),
                    },
                )));
        } else {
            debug!("Stop requested while not tracking");
        }
        let _ = self.ctx.publish_event(EventKind::TrackingStoppedEvent);
    }

    /// Hands the latest fix to the uplink. Without a fix the tick is skipped.
    fn on_poll_tick(&mut self) {
        if !self.tracking {
            return;
        }
        let Some(fix) = self.last_fix else {
            debug!("No fix received yet, skipping poll tick");
            return;
        };
        let id = self.next_req_id();
        let _ = self
            .ctx
            .publish_event(EventKind::UplinkSendRequestEvent(Arc::new(Request {
                id,
                sender_addr: TRACKER_ADDR,
                data: fix,
            })));
    }

    fn on_send_response(&self, resp: &SendResponsePtr) {
        if resp.receiver_addr != TRACKER_ADDR {
            return;
        }
        match &resp.data {
            Ok(status) => debug!("Fix delivered with status {status}"),
            Err(e) => warn!("Fix delivery failed. Error: {e:?}"),
        }
    }

    fn on_status_probe_response(&self, resp: &StatusProbeResponsePtr) {
        if resp.receiver_addr != TRACKER_ADDR {
            return;
        }
        match &resp.data {
            Ok(body) => info!("Fleet server reachable: {body}"),
            Err(e) => warn!("Fleet server unreachable. Error: {e:?}"),
        }
    }

    fn on_registration_response(&self, resp: &BatchRegistrationResponsePtr, registered: bool) {
        if resp.receiver_addr != TRACKER_ADDR {
            return;
        }
        if resp.data == registered {
            debug!("Batch delivery registered state is now {}", resp.data);
        } else {
            warn!(
                "Batch delivery answered with unexpected registered state {}",
                resp.data
            );
        }
    }
}

#[async_trait::async_trait]
impl Module for Tracker {
    async fn run(&mut self) -> Result<(), ()> {
        // One liveness probe at startup, the outcome is only logged.
        let id = self.next_req_id();
        let _ = self
            .ctx
            .publish_event(EventKind::StatusProbeRequestEvent(Request::empty_request(
                id,
                TRACKER_ADDR,
            )));
        if self.config.auto_start {
            self.start();
        }
        // tokio::time::interval panics on a zero period.
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        if period != self.config.poll_interval {
            warn!("Poll interval too short, polling every {MIN_POLL_INTERVAL:?}");
        }
        let mut poll = tokio::time::interval(period);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        poll.tick().await;
        let mut run = true;
        while run {
            tokio::select! {
                _ = poll.tick() => self.on_poll_tick(),
                event = self.ctx.receiver.recv() => {
                    match event {
                        Ok(event) => {
                            match event.kind {
                                EventKind::QuitEvent => run = false,
                                EventKind::StartTrackingEvent => self.start(),
                                EventKind::StopTrackingEvent => self.stop(),
                                EventKind::GnssPositionEvent(position) => {
                                    self.last_fix = Some(*position);
                                }
                                EventKind::UplinkSendResponseEvent(response) => {
                                    self.on_send_response(&response);
                                }
                                EventKind::StatusProbeResponseEvent(response) => {
                                    self.on_status_probe_response(&response);
                                }
                                EventKind::RegisterBatchDeliveryResponseEvent(response) => {
                                    self.on_registration_response(&response, true);
                                }
                                EventKind::UnregisterBatchDeliveryResponseEvent(response) => {
                                    self.on_registration_response(&response, false);
                                }
                                _ => (),
                            }
                        }
                        Err(e) => error!("Failed to receive event in module Tracker. Error: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}
