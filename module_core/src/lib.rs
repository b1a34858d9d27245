// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Event bus and module plumbing for the courier uplink daemon
//!
//! Every module runs as an asynchronous task on one shared [`EventBus`] and
//! communicates exclusively through [`Event`]s, either as fire-and-forget
//! notifications or as [`Request`]/[`Response`] round trips.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum_macros::EnumDiscriminants;

/// Represents a high-level event in the system.
///
/// Each `Event` wraps an [`EventKind`], which defines the actual type
/// and data carried by the event.
///
/// This structure is designed to be passed through an [`EventBus`]
/// between asynchronous modules.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The inner event type and associated data.
    pub kind: EventKind,
}

impl Event {
    /// Returns the discriminant of the wrapped [`EventKind`].
    pub fn event_type(&self) -> EventKindType {
        EventKindType::from(&self.kind)
    }
}

/// A thread-safe, reference-counted pointer to a GNSS fix.
pub type GnssPositionPtr = Arc<common::position::GnssPosition>;

/// A batch of GNSS fixes, in delivery order, as flushed by the background
/// delivery path.
pub type GnssBatchPtr = Arc<Vec<common::position::GnssPosition>>;

/// A request without payload data.
pub type EmptyRequestPtr = Arc<Request<()>>;

/// Request to register the batch delivery with its scheduling hints.
pub type RegisterBatchRequestPtr = Arc<Request<BatchHints>>;

/// Request to unregister the batch delivery, carrying the task name.
pub type UnregisterBatchRequestPtr = Arc<Request<String>>;

/// Response to a batch delivery (un)registration. The data is the
/// registered-state after the operation.
pub type BatchRegistrationResponsePtr = Arc<Response<bool>>;

/// Response carrying the device identity, or the storage failure that
/// prevented loading or persisting it.
pub type IdentityResponsePtr = Arc<Response<Result<common::identity::DeviceIdentity, std::io::ErrorKind>>>;

/// Request to deliver one foreground fix to the fleet server. The uplink
/// stamps the cached device identity and platform tag on the outgoing
/// sample.
pub type SendPositionRequestPtr = Arc<Request<common::position::GnssPosition>>;

/// Response to a sample delivery: the HTTP status code on success, or the
/// error kind describing why the send failed. A non-2xx status is a failure.
pub type SendResponsePtr = Arc<Response<Result<u16, std::io::ErrorKind>>>;

/// Response to a server liveness probe: the response body as opaque text.
pub type StatusProbeResponsePtr = Arc<Response<Result<String, std::io::ErrorKind>>>;

/// Scheduling hints for the background batch delivery.
///
/// The intervals are hints handed to the delivery task, not enforced
/// guarantees: fixes are flushed whenever the task decides a hint has been
/// met, at a time and frequency the requesting module cannot precisely
/// control.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchHints {
    /// The task registry key the registration applies to.
    pub task: String,
    /// Flush the buffered fixes after roughly this long.
    pub time_interval: std::time::Duration,
    /// Flush once roughly this many meters have been covered.
    pub distance_interval: f64,
}

/// A request envelope published on the [`EventBus`].
///
/// The `id` and `sender_addr` pair correlates the eventual response with
/// the module that asked for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Request<T> {
    pub id: u32,
    pub sender_addr: u32,
    pub data: T,
}

impl Request<()> {
    /// Creates a payload-free request envelope.
    pub fn empty_request(id: u32, sender_addr: u32) -> EmptyRequestPtr {
        EmptyRequestPtr::new(Request {
            id,
            sender_addr,
            data: (),
        })
    }
}

/// A response envelope published on the [`EventBus`].
///
/// Mirrors the `id` of the originating [`Request`]; `receiver_addr` is the
/// requester's `sender_addr`.
#[derive(Clone, Debug, PartialEq)]
pub struct Response<T> {
    pub id: u32,
    pub receiver_addr: u32,
    pub data: T,
}

impl<T> Response<T> {
    /// Creates a response envelope wrapped in an [`Arc`].
    pub fn new(id: u32, receiver_addr: u32, data: T) -> Arc<Self> {
        Arc::new(Response {
            id,
            receiver_addr,
            data,
        })
    }
}

/// Enumerates the different kinds of events that can be emitted
/// and transmitted via the [`EventBus`].
#[derive(Clone, Debug, PartialEq, EnumDiscriminants)]
#[strum_discriminants(derive(Hash))]
pub enum EventKind {
    /// Indicates that a module shall terminate.
    QuitEvent,

    /// A single GNSS fix published by the active position source.
    GnssPositionEvent(GnssPositionPtr),

    /// A buffered batch of GNSS fixes flushed by the background delivery
    /// path, in delivery order.
    GnssBatchEvent(GnssBatchPtr),

    /// Register the background batch delivery with the given hints.
    RegisterBatchDeliveryRequestEvent(RegisterBatchRequestPtr),

    /// Registration outcome, data is the registered-state after the request.
    RegisterBatchDeliveryResponseEvent(BatchRegistrationResponsePtr),

    /// Unregister the background batch delivery for a task name.
    UnregisterBatchDeliveryRequestEvent(UnregisterBatchRequestPtr),

    /// Unregistration outcome, data is the registered-state after the request.
    UnregisterBatchDeliveryResponseEvent(BatchRegistrationResponsePtr),

    /// Load the persisted device identity, generating one if none exists.
    LoadIdentityRequestEvent(EmptyRequestPtr),

    /// The loaded (or freshly generated) device identity.
    LoadIdentityResponseEvent(IdentityResponsePtr),

    /// Discard the persisted device identity and generate a new one.
    ResetIdentityRequestEvent(EmptyRequestPtr),

    /// The regenerated device identity.
    ResetIdentityResponseEvent(IdentityResponsePtr),

    /// Deliver one foreground fix to the fleet server.
    UplinkSendRequestEvent(SendPositionRequestPtr),

    /// Outcome of a sample delivery.
    UplinkSendResponseEvent(SendResponsePtr),

    /// Probe the fleet server's liveness endpoint.
    StatusProbeRequestEvent(EmptyRequestPtr),

    /// Probe outcome with the response body as opaque text.
    StatusProbeResponseEvent(StatusProbeResponsePtr),

    /// Ask the tracker to start tracking.
    StartTrackingEvent,

    /// Ask the tracker to stop tracking.
    StopTrackingEvent,

    /// The tracker started tracking, or was already tracking.
    TrackingStartedEvent,

    /// The tracker stopped tracking, or was never tracking.
    TrackingStoppedEvent,
}

impl EventKind {
    /// Returns the response envelope metadata `(id, receiver_addr)` when
    /// this is a response kind.
    pub fn response_meta(&self) -> Option<(u32, u32)> {
        match self {
            EventKind::RegisterBatchDeliveryResponseEvent(r) => Some((r.id, r.receiver_addr)),
            EventKind::UnregisterBatchDeliveryResponseEvent(r) => Some((r.id, r.receiver_addr)),
            EventKind::LoadIdentityResponseEvent(r) => Some((r.id, r.receiver_addr)),
            EventKind::ResetIdentityResponseEvent(r) => Some((r.id, r.receiver_addr)),
            EventKind::UplinkSendResponseEvent(r) => Some((r.id, r.receiver_addr)),
            EventKind::StatusProbeResponseEvent(r) => Some((r.id, r.receiver_addr)),
            _ => None,
        }
    }
}

/// The discriminant type of [`EventKind`], used wherever only the variant
/// matters and not the payload.
pub type EventKindType = EventKindDiscriminants;

/// Extracts a reference to the payload of an [`EventKind`] variant.
///
/// Evaluates to `Option<&Payload>`: `Some` when the kind matches the given
/// variant, `None` otherwise.
#[macro_export]
macro_rules! payload_ref {
    ($kind:expr, $variant:path) => {
        match &$kind {
            $variant(payload) => Some(payload),
            _ => None,
        }
    };
}

static BUS_ID: AtomicUsize = AtomicUsize::new(0);

/// A simple asynchronous event bus for publishing and subscribing to [`Event`]s.
///
/// The event bus uses a [`tokio::sync::broadcast::channel`] under the hood,
/// allowing multiple receivers to listen for the same stream of events.
///
/// Each published event is cloned and distributed to all active subscribers.
/// If no subscribers exist at the time of publication, the event is discarded silently.
pub struct EventBus {
    /// The broadcast sender used internally to distribute events.
    sender: tokio::sync::broadcast::Sender<Event>,
    /// Process-unique id of this bus instance.
    bus_id: usize,
}

impl EventBus {
    /// Creates a new [`EventBus`] with a fixed buffer capacity of 100 messages.
    ///
    /// When the buffer is full, the oldest messages are dropped automatically
    /// as new ones are published.
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(100);
        EventBus {
            sender,
            bus_id: BUS_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Subscribes to the event bus and returns a [`tokio::sync::broadcast::Receiver`].
    ///
    /// The returned receiver will receive all future events published after the
    /// subscription is created.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an [`Event`] to all active subscribers.
    ///
    /// If no subscribers exist, the event is discarded silently.
    pub fn publish(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }

    /// Creates a [`ModuleCtx`] bound to this [`EventBus`].
    ///
    /// The returned context can be used by modules implementing [`Module`]
    /// to send and receive events within their execution scope.
    pub fn context(&self) -> ModuleCtx {
        ModuleCtx::new(self)
    }
}

/// Provides a default instance of [`EventBus`].
impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Defines the common interface for an asynchronous module
/// that can be executed and communicate via the [`EventBus`].
#[async_trait::async_trait]
pub trait Module {
    /// Runs the module asynchronously until completion.
    ///
    /// This function typically contains the module's main event loop,
    /// reacting to messages received through the [`ModuleCtx`].
    async fn run(&mut self) -> Result<(), ()>;
}

/// Provides a module-scoped context for interacting with the [`EventBus`].
///
/// Each `ModuleCtx` owns both a sender and a receiver, allowing the module
/// to both publish and listen for events concurrently.
pub struct ModuleCtx {
    /// The broadcast sender used to publish events.
    pub sender: tokio::sync::broadcast::Sender<Event>,

    /// The broadcast receiver used to listen for events.
    pub receiver: tokio::sync::broadcast::Receiver<Event>,

    bus_id: usize,
}

impl ModuleCtx {
    /// Constructs a new [`ModuleCtx`] from the given [`EventBus`].
    ///
    /// Clones the internal broadcast sender and creates a new receiver.
    pub fn new(event_bus: &EventBus) -> Self {
        ModuleCtx {
            sender: event_bus.sender.clone(),
            receiver: event_bus.subscribe(),
            bus_id: event_bus.bus_id,
        }
    }

    /// Publishes an [`EventKind`] wrapped in an [`Event`] on the bus.
    pub fn publish_event(
        &self,
        kind: EventKind,
    ) -> Result<usize, tokio::sync::broadcast::error::SendError<Event>> {
        self.sender.send(Event { kind })
    }

    /// Returns a fresh receiver that observes all events published after
    /// this call.
    pub fn receiver(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.receiver.resubscribe()
    }

    /// Returns the process-unique id of the bus this context belongs to.
    pub fn bus_id(&self) -> usize {
        self.bus_id
    }

    /// Waits for the response of a previously published request.
    ///
    /// Matches on the event discriminant and the response envelope: the
    /// response `id` must equal `id` and its `receiver_addr` must equal
    /// `addr`. Gives up after one second.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::ErrorKind::TimedOut`] if no matching response
    /// arrives in time.
    pub async fn wait_for_event(
        &mut self,
        id: u32,
        addr: u32,
        kind: &EventKindType,
    ) -> Result<Event, std::io::Error> {
        let deadline = tokio::time::Instant::now() + RESPONSE_TIMEOUT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.receiver.recv())
                .await
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))?;
            match event {
                Ok(event) => {
                    if event.event_type() == *kind
                        && event.kind.response_meta() == Some((id, addr))
                    {
                        return Ok(event);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
                }
                Err(e) => {
                    tracing::error!("Failed to receive event while waiting. Error: {e}");
                }
            }
        }
    }
}

const RESPONSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

pub mod test_helper;
