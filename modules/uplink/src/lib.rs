// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Uplink module for the courier uplink daemon
//!
//! Pushes position samples to the fleet server over HTTP and probes its
//! liveness. Delivery is best effort: there is no retry, no backoff, and no
//! queueing of failed sends. A sample whose send fails is permanently lost.

use common::{identity::DeviceIdentity, sample::PositionSample};
use module_core::{
    EmptyRequestPtr, Event, EventKind, GnssBatchPtr, IdentityResponsePtr, Module, ModuleCtx,
    Request, Response, SendPositionRequestPtr,
};
use std::io;
use tracing::{debug, error, info, warn};

/// Bus address of the uplink module.
pub const UPLINK_ADDR: u32 = 0x50;

/// Request id of the identity load issued at startup.
const IDENTITY_REQ_ID: u32 = 1;

/// HTTP client for the fleet server.
///
/// Requests the device identity once at startup and caches it for the life
/// of the process; both the interactive send path and the background batch
/// path stamp the cached identity on their samples. An identity reset
/// observed on the bus refreshes the cache, so later sends carry the new
/// token.
pub struct Uplink {
    ctx: ModuleCtx,
    client: reqwest::Client,
    server_url: String,
    platform: Option<String>,
    identity: Option<DeviceIdentity>,
}

impl Uplink {
    /// Creates the uplink for the given fleet server base URL.
    ///
    /// No timeout is configured on the client beyond its defaults, matching
    /// the original's fetch behavior.
    pub fn new(ctx: ModuleCtx, server_url: &str, platform: Option<&str>) -> Self {
        Uplink {
            ctx,
            client: reqwest::Client::new(),
            server_url: server_url.trim_end_matches('/').to_owned(),
            platform: platform.map(str::to_owned),
            identity: None,
        }
    }

    /// Issues one POST of the sample to `{server}/api/positions`.
    ///
    /// Returns the HTTP status code for a 2xx response. A non-2xx response
    /// is a failure, as is any transport error.
    async fn post_sample(&self, sample: &PositionSample) -> Result<u16, io::ErrorKind> {
        let url = format!("{}/api/positions", self.server_url);
        match self.client.post(&url).json(sample).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    debug!("Position sent for {} ({})", sample.driver_id, status);
                    Ok(status.as_u16())
                } else {
                    error!("Server rejected position with status {}", status);
                    Err(io::ErrorKind::InvalidData)
                }
            }
            Err(e) => {
                error!("Failed to send position to {}. Error: {}", url, e);
                Err(transport_error_kind(&e))
            }
        }
    }

    /// Handles one interactive send request and answers with the outcome.
    async fn handle_send_request(&self, req: &SendPositionRequestPtr) {
        let data = match &self.identity {
            Some(identity) => {
                let sample = PositionSample::from_fix(
                    &req.data,
                    identity,
                    self.platform.as_deref(),
                    false,
                );
                self.post_sample(&sample).await
            }
            None => {
                warn!("Dropping send request, no device identity available yet");
                Err(io::ErrorKind::NotFound)
            }
        };
        let resp = Response::new(req.id, req.sender_addr, data);
        let _ = self.ctx.sender.send(Event {
            kind: EventKind::UplinkSendResponseEvent(resp),
        });
    }

    /// Forwards a background batch, one POST per fix in delivery order.
    ///
    /// Failed sends are logged and dropped; the remaining fixes of the batch
    /// are still attempted. A batch of N fixes always results in exactly N
    /// attempts.
    async fn handle_batch(&self, batch: &GnssBatchPtr) {
        let Some(identity) = &self.identity else {
            warn!(
                "Dropping background batch of {} fixes, no device identity available yet",
                batch.len()
            );
            return;
        };
        for fix in batch.iter() {
            let sample =
                PositionSample::from_fix(fix, identity, self.platform.as_deref(), true);
            if let Err(e) = self.post_sample(&sample).await {
                error!("Background position lost. Error: {e:?}");
            }
        }
    }

    /// Probes `{server}/api/status` and answers with the body as opaque text.
    async fn handle_status_probe(&self, req: &EmptyRequestPtr) {
        let url = format!("{}/api/status", self.server_url);
        let data = match self.client.get(&url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    resp.text().await.map_err(|e| {
                        error!("Failed to read status body. Error: {}", e);
                        transport_error_kind(&e)
                    })
                } else {
                    error!("Status probe answered with status {}", status);
                    Err(io::ErrorKind::InvalidData)
                }
            }
            Err(e) => {
                error!("Status probe to {} failed. Error: {}", url, e);
                Err(transport_error_kind(&e))
            }
        };
        let resp = Response::new(req.id, req.sender_addr, data);
        let _ = self.ctx.sender.send(Event {
            kind: EventKind::StatusProbeResponseEvent(resp),
        });
    }

    fn on_identity_loaded(&mut self, resp: &IdentityResponsePtr) {
        if resp.receiver_addr != UPLINK_ADDR {
            return;
        }
        match &resp.data {
            Ok(identity) => {
                info!("Uplink sending as {}", identity);
                self.identity = Some(identity.clone());
            }
            Err(e) => error!("Failed to load device identity. Error: {e:?}"),
        }
    }

    fn on_identity_reset(&mut self, resp: &IdentityResponsePtr) {
        if let Ok(identity) = &resp.data {
            info!("Device identity reset, uplink now sending as {}", identity);
            self.identity = Some(identity.clone());
        }
    }
}

fn transport_error_kind(e: &reqwest::Error) -> io::ErrorKind {
    if e.is_timeout() {
        io::ErrorKind::TimedOut
    } else if e.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else {
        io::ErrorKind::BrokenPipe
    }
}

#[async_trait::async_trait]
impl Module for Uplink {
    async fn run(&mut self) -> Result<(), ()> {
        let _ = self
            .ctx
            .publish_event(EventKind::LoadIdentityRequestEvent(Request::empty_request(
                IDENTITY_REQ_ID,
                UPLINK_ADDR,
            )));
        let mut run = true;
        while run {
            tokio::select! {
                event = self.ctx.receiver.recv() => {
                    match event {
                        Ok(event) => {
                            match event.kind {
                                EventKind::QuitEvent => run = false,
                                EventKind::UplinkSendRequestEvent(request) => {
                                    self.handle_send_request(&request).await;
                                }
                                EventKind::GnssBatchEvent(batch) => {
                                    self.handle_batch(&batch).await;
                                }
                                EventKind::StatusProbeRequestEvent(request) => {
                                    self.handle_status_probe(&request).await;
                                }
                                EventKind::LoadIdentityResponseEvent(response) => {
                                    self.on_identity_loaded(&response);
                                }
                                EventKind::ResetIdentityResponseEvent(response) => {
                                    self.on_identity_reset(&response);
                                }
                                _ => (),
                            }
                        }
                        Err(e) => error!("Failed to receive event in module Uplink. Error: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}
