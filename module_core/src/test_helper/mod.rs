// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{Event, EventBus, EventKind, EventKindType, ModuleCtx};
use std::{
    collections::HashMap,
    io::ErrorKind,
    sync::{LazyLock, RwLock},
};
use tokio::time::{timeout, timeout_at};
use tracing::{debug, error};

/// Publishes a quit event and waits for the module task to finish.
///
/// # Panics
/// Panics when the module does not terminate within 100 ms or its run loop
/// returned `Err(())`.
pub async fn stop_module(
    event_bus: &EventBus,
    handle: &mut tokio::task::JoinHandle<Result<(), ()>>,
) {
    event_bus.publish(&Event {
        kind: EventKind::QuitEvent,
    });
    let _ = timeout(std::time::Duration::from_millis(100), handle)
        .await
        .expect("Module doesn't handle quit event in timeout")
        .unwrap();
}

/// Waits until an event with the given discriminant arrives on `rx`.
///
/// Events of other kinds are consumed and skipped. Only the variant type is
/// compared; payload data is ignored.
///
/// # Panics
/// Panics when no matching event arrives within `duration`.
pub async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    duration: std::time::Duration,
    exp_event: EventKindType,
) -> Event {
    let deadline = tokio::time::Instant::now() + duration;
    while let Ok(received) = timeout_at(deadline, rx.recv()).await {
        match received {
            Ok(event) if event.event_type() == exp_event => return event,
            Ok(_) => (),
            Err(e) => debug!("Receive error while waiting for {exp_event:?}: {e}"),
        }
    }
    panic!("Failed to receive event of type {exp_event:?}");
}

static RESPONSE_HANDLERS: LazyLock<RwLock<HashMap<(usize, EventKindType), ResponseHandler>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Registers a canned response for a request event type.
///
/// Whenever an event whose discriminant matches `request_type` is observed on
/// the bus of `ctx`, `response_event` is published in reply. The handler task
/// stays alive in a global cache keyed by bus and request type until
/// [`unregister_response_event`] removes it.
///
/// # Errors
/// Returns `ErrorKind::AlreadyExists` when the same bus already has a handler
/// for `request_type`.
pub fn register_response_event(
    request_type: EventKindType,
    response_event: Event,
    ctx: ModuleCtx,
) -> Result<(), std::io::Error> {
    let bus_id = ctx.bus_id();
    let handler = ResponseHandler::new(ctx, request_type, response_event);
    let mut cache = RESPONSE_HANDLERS.write().unwrap();
    if cache.insert((bus_id, request_type), handler).is_some() {
        return Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("Response handler for request type {request_type:?} already exists"),
        ));
    }
    debug!("Registered response handler for request type {request_type:?} on bus {bus_id}");
    Ok(())
}

/// Removes a previously registered canned response and aborts its task.
/// A no-op when no handler is registered for the pair.
pub fn unregister_response_event(bus_id: usize, request_type: &EventKindType) {
    let mut cache = RESPONSE_HANDLERS.write().unwrap();
    if cache.remove(&(bus_id, *request_type)).is_some() {
        debug!("Unregistered response handler for request type {request_type:?} on bus {bus_id}");
    }
}

/// A background task answering one request event type with a fixed response.
///
/// Dropping the handler aborts the task.
#[derive(Debug)]
pub struct ResponseHandler {
    handle: tokio::task::JoinHandle<()>,
}

impl ResponseHandler {
    pub fn new(mut ctx: ModuleCtx, request_type: EventKindType, response_event: Event) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                match ctx.receiver.recv().await {
                    Ok(event) => {
                        if event.event_type() == request_type {
                            debug!("Answering request of type {request_type:?}");
                            let _ = ctx.sender.send(response_event.clone());
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    Err(e) => error!("Failed to receive request. Error: {e}"),
                }
            }
        });
        ResponseHandler { handle }
    }
}

impl Drop for ResponseHandler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
