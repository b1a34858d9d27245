// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Identity module for the courier uplink daemon
//!
//! Persists the device identity in the local data directory and serves it to
//! the other modules over request/response events.

use common::identity::DeviceIdentity;
use module_core::{EmptyRequestPtr, Event, EventKind, ModuleCtx, Response};
use std::{
    fs::DirBuilder,
    io::{self},
    path::PathBuf,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

/// File name of the persisted identity inside the root directory.
const DEVICE_IDENTITY_FILE: &str = "driver.id";

/// A file-backed store for the device identity.
///
/// The identity is one string token in one file under the configured root
/// directory. Loading generates and persists a fresh token when none exists
/// or the stored one is unusable; resetting always generates a fresh token,
/// invalidating the prior association.
///
/// ## Important
///
/// `IdentityStore` **does not implement any internal synchronization or
/// locking mechanisms**. Two stores pointed at the same directory may both
/// write a first-ever identity concurrently; the last write wins and no
/// reconciliation happens.
pub struct IdentityStore {
    identity_file: String,
    module_ctx: ModuleCtx,
}

impl IdentityStore {
    pub fn new(root_dir: &PathBuf, ctx: ModuleCtx) -> Self {
        if let Err(e) = DirBuilder::new().recursive(true).create(root_dir) {
            error!(
                "Failed to create identity dir folder {}. Error: {}",
                root_dir.to_string_lossy(),
                e
            );
        }
        let mut identity_file = PathBuf::from(root_dir);
        identity_file.push(DEVICE_IDENTITY_FILE);
        info!(
            "Using identity file: {}",
            identity_file.to_string_lossy()
        );
        IdentityStore {
            identity_file: identity_file.to_string_lossy().to_string(),
            module_ctx: ctx,
        }
    }

    /// Returns the persisted identity, generating and persisting a fresh one
    /// when none exists.
    ///
    /// A missing, unreadable, or empty identity file is treated the same:
    /// the previous identity is gone, a new one takes its place.
    ///
    /// Errors:
    /// - Propagates I/O errors from persisting a freshly generated identity.
    async fn load_or_generate(&self) -> io::Result<DeviceIdentity> {
        match self.read_identity().await {
            Ok(identity) if identity.is_valid() => {
                debug!("Loaded identity {} from {}", identity, self.identity_file);
                Ok(identity)
            }
            Ok(_) => {
                info!("Identity file {} is empty, generating", self.identity_file);
                self.generate_and_persist().await
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    error!(
                        "Failed to read identity file {}. Error: {}",
                        self.identity_file, e
                    );
                }
                self.generate_and_persist().await
            }
        }
    }

    /// Discards the persisted identity and generates a new one.
    async fn reset(&self) -> io::Result<DeviceIdentity> {
        self.generate_and_persist().await
    }

    async fn generate_and_persist(&self) -> io::Result<DeviceIdentity> {
        let identity = DeviceIdentity::generate();
        self.persist(&identity).await?;
        info!("Generated device identity {}", identity);
        Ok(identity)
    }

    async fn read_identity(&self) -> io::Result<DeviceIdentity> {
        let mut file = tokio::fs::File::open(&self.identity_file).await?;
        let mut token = String::default();
        file.read_to_string(&mut token).await?;
        Ok(DeviceIdentity::new(&token))
    }

    /// Writes the identity token, ensuring it is persisted.
    ///
    /// The file is created if it does not exist, or truncated if it does.
    /// After writing, the file is explicitly synced to ensure durability.
    async fn persist(&self, identity: &DeviceIdentity) -> io::Result<()> {
        let mut file = tokio::fs::File::create(&self.identity_file).await?;
        file.write_all(identity.as_str().as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn handle_load_request(&self, req: &EmptyRequestPtr) {
        let data = match self.load_or_generate().await {
            Ok(identity) => Ok(identity),
            Err(e) => {
                error!(
                    "Failed to load or generate identity in {}. Error: {}",
                    self.identity_file, e
                );
                Err(e.kind())
            }
        };
        let resp = Response::new(req.id, req.sender_addr, data);
        let _ = self.module_ctx.sender.send(Event {
            kind: EventKind::LoadIdentityResponseEvent(resp),
        });
    }

    async fn handle_reset_request(&self, req: &EmptyRequestPtr) {
        let data = match self.reset().await {
            Ok(identity) => {
                info!("Device identity reset, new identity {}", identity);
                Ok(identity)
            }
            Err(e) => {
                error!(
                    "Failed to reset identity in {}. Error: {}",
                    self.identity_file, e
                );
                Err(e.kind())
            }
        };
        let resp = Response::new(req.id, req.sender_addr, data);
        let _ = self.module_ctx.sender.send(Event {
            kind: EventKind::ResetIdentityResponseEvent(resp),
        });
    }
}

#[async_trait::async_trait]
impl module_core::Module for IdentityStore {
    async fn run(&mut self) -> Result<(), ()> {
        let mut run = true;
        while run {
            tokio::select! {
                event = self.module_ctx.receiver.recv() => {
                    match event {
                        Ok(event) => {
                            match event.kind {
                                EventKind::QuitEvent => run = false,
                                EventKind::LoadIdentityRequestEvent(request) => {
                                    self.handle_load_request(&request).await;
                                },
                                EventKind::ResetIdentityRequestEvent(request) => {
                                    self.handle_reset_request(&request).await;
                                },
                                _ => ()
                            }
                        }
                        Err(e) => error!("Failed to receive event in module IdentityStore. Error: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}
