// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use common::position::GnssPosition;
use module_core::{
    BatchHints, Event, EventKind, Module, ModuleCtx, RegisterBatchRequestPtr, Response,
    UnregisterBatchRequestPtr,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Deadline used while no registration is active.
const IDLE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// State of an active batch delivery registration.
struct Registration {
    hints: BatchHints,
    buffer: Vec<GnssPosition>,
    /// Meters covered since the last flush, summed fix to fix.
    distance_covered: f64,
    deadline: Instant,
}

impl Registration {
    fn new(hints: BatchHints) -> Self {
        let deadline = Instant::now() + flush_interval(&hints);
        Registration {
            hints,
            buffer: Vec::new(),
            distance_covered: 0.0,
            deadline,
        }
    }
}

/// A zero time interval disables the timed flush, `tokio::time` cannot sleep
/// a zero period repeatedly without spinning.
fn flush_interval(hints: &BatchHints) -> std::time::Duration {
    if hints.time_interval.is_zero() {
        IDLE_INTERVAL
    } else {
        hints.time_interval
    }
}

/// The background buffered location delivery.
///
/// Stands in for the platform task registry of the mobile original: while a
/// registration for its task name is active, every published GNSS fix is
/// buffered and the buffer is flushed as one
/// [`GnssBatchEvent`](EventKind::GnssBatchEvent) (delivery order preserved)
/// whenever the registered time interval elapses or the registered distance
/// hint is exceeded. The hints are hints: flush timing is owned by this task,
/// not by the registering module.
///
/// Registration and unregistration are idempotent. Registering twice keeps a
/// single registration with the latest hints, already buffered fixes survive
/// the update; unregistering while unregistered is a no-op that still answers
/// with the stopped state. Only unregistering drops buffered fixes without
/// flushing them.
pub struct BatchDelivery {
    ctx: ModuleCtx,
    task: String,
    registration: Option<Registration>,
}

impl BatchDelivery {
    /// Creates the batch delivery for the given task registry key.
    pub fn new(ctx: ModuleCtx, task: &str) -> Self {
        BatchDelivery {
            ctx,
            task: task.to_owned(),
            registration: None,
        }
    }

    fn on_register(&mut self, req: &RegisterBatchRequestPtr) {
        if req.data.task != self.task {
            debug!(
                "Ignoring registration for unknown task {} (serving {})",
                req.data.task, self.task
            );
            return;
        }
        info!(
            "Background delivery registered for task {} (interval {:?}, distance {} m)",
            self.task, req.data.time_interval, req.data.distance_interval
        );
        match &mut self.registration {
            // Re-registering updates the hints only, buffered fixes survive.
            Some(reg) => {
                reg.hints = req.data.clone();
                reg.deadline = Instant::now() + flush_interval(&reg.hints);
            }
            None => self.registration = Some(Registration::new(req.data.clone())),
        }
        let resp = Response::new(req.id, req.sender_addr, true);
        let _ = self.ctx.sender.send(Event {
            kind: EventKind::RegisterBatchDeliveryResponseEvent(resp),
        });
    }

    fn on_unregister(&mut self, req: &UnregisterBatchRequestPtr) {
        if req.data != self.task {
            debug!(
                "Ignoring unregistration for unknown task {} (serving {})",
                req.data, self.task
            );
            return;
        }
        if let Some(reg) = self.registration.take() {
            info!(
                "Background delivery unregistered for task {}, dropping {} buffered fixes",
                self.task,
                reg.buffer.len()
            );
        } else {
            debug!("Unregister for task {} while not registered", self.task);
        }
        let resp = Response::new(req.id, req.sender_addr, false);
        let _ = self.ctx.sender.send(Event {
            kind: EventKind::UnregisterBatchDeliveryResponseEvent(resp),
        });
    }

    fn on_position(&mut self, position: &GnssPosition) {
        let Some(reg) = &mut self.registration else {
            return;
        };
        if let Some(last) = reg.buffer.last() {
            reg.distance_covered += last.distance_to(position);
        }
        reg.buffer.push(*position);
        if reg.distance_covered >= reg.hints.distance_interval {
            self.flush();
        }
    }

    fn on_deadline(&mut self) {
        if let Some(reg) = &mut self.registration {
            if reg.buffer.is_empty() {
                reg.deadline = Instant::now() + flush_interval(&reg.hints);
            } else {
                self.flush();
            }
        }
    }

    /// Publishes the buffered fixes as one batch and rearms the interval.
    fn flush(&mut self) {
        let Some(reg) = &mut self.registration else {
            return;
        };
        let batch = std::mem::take(&mut reg.buffer);
        reg.distance_covered = 0.0;
        reg.deadline = Instant::now() + flush_interval(&reg.hints);
        debug!("Flushing batch of {} fixes for task {}", batch.len(), self.task);
        let _ = self.ctx.sender.send(Event {
            kind: EventKind::GnssBatchEvent(Arc::new(batch)),
        });
    }

    fn next_deadline(&self) -> Instant {
        match &self.registration {
            Some(reg) => reg.deadline,
            None => Instant::now() + IDLE_INTERVAL,
        }
    }
}

#[async_trait::async_trait]
impl Module for BatchDelivery {
    async fn run(&mut self) -> Result<(), ()> {
        let mut run = true;
        while run {
            tokio::select! {
                _ = tokio::time::sleep_until(self.next_deadline()) => {
                    self.on_deadline();
                }
                event = self.ctx.receiver.recv() => {
                    match event {
                        Ok(event) => {
                            match event.kind {
                                EventKind::QuitEvent => run = false,
                                EventKind::RegisterBatchDeliveryRequestEvent(request) => {
                                    self.on_register(&request);
                                }
                                EventKind::UnregisterBatchDeliveryRequestEvent(request) => {
                                    self.on_unregister(&request);
                                }
                                EventKind::GnssPositionEvent(position) => {
                                    self.on_position(&position);
                                }
                                _ => (),
                            }
                        }
                        Err(e) => error!("Failed to receive event in module BatchDelivery. Error: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}
