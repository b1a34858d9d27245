// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use common::position::GnssPosition;
use futures::StreamExt;
use gpsd_proto::{self, Tpv};
use module_core::Event;
use module_core::{EventKind, Module, ModuleCtx};
use std::{
    io::{self, Error, ErrorKind},
    net::SocketAddr,
    str::FromStr,
    sync::Arc,
};
use tokio::sync::Notify;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error};

/// Reader-side state of the gpsd connection.
struct GpsdPositionRuntime {
    /// Gates the reader task until the module run loop is up.
    notify: Arc<Notify>,
    /// Bus sender used to publish the converted fixes.
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl GpsdPositionRuntime {
    pub fn new(sender: tokio::sync::broadcast::Sender<Event>) -> Self {
        GpsdPositionRuntime {
            notify: Arc::new(Notify::new()),
            sender,
        }
    }

    async fn process_tpv_msg(&mut self, tpv: &Tpv) {
        let Some(position) = convert_tpv(tpv) else {
            return;
        };
        debug!(
            "GPSD fix lat: {} lon: {} accuracy: {}",
            position.latitude(),
            position.longitude(),
            position.accuracy()
        );
        let _ = self.sender.send(Event {
            kind: EventKind::GnssPositionEvent(Arc::new(position)),
        });
    }
}

/// Converts a TPV report into a [`GnssPosition`].
///
/// Reports without latitude, longitude, speed, or time are unusable and
/// yield `None`. Horizontal accuracy is the larger of the longitude and
/// latitude error estimates, zero when gpsd reports neither.
fn convert_tpv(tpv: &Tpv) -> Option<GnssPosition> {
    let lat = tpv.lat?;
    let lon = tpv.lon?;
    let speed = tpv.speed?;
    let time = tpv.time.as_ref()?;
    let Ok(datetime) = chrono::DateTime::<chrono::Utc>::from_str(time) else {
        return None;
    };
    let accuracy = match (tpv.epx, tpv.epy) {
        (Some(epx), Some(epy)) => f64::from(epx.max(epy)),
        (Some(epx), None) => f64::from(epx),
        (None, Some(epy)) => f64::from(epy),
        (None, None) => 0.0,
    };
    Some(GnssPosition::new(
        lat,
        lon,
        speed.into(),
        accuracy,
        tpv.alt.map(f64::from),
        tpv.track.map(f64::from),
        &datetime,
    ))
}

async fn gpsd_reader(mut stream: TcpStream, mut runtime: GpsdPositionRuntime) {
    runtime.notify.notified().await;
    if let Err(e) = stream
        .write_all(gpsd_proto::ENABLE_WATCH_CMD.as_bytes())
        .await
    {
        error!("Failed to enable gpsd watch mode. Error: {e}");
        return;
    }
    let mut framed = Framed::new(stream, LinesCodec::new());
    while let Some(result) = framed.next().await {
        match result {
            Ok(ref line) => {
                if let Ok(tpv) = serde_json::from_str::<Tpv>(line) {
                    runtime.process_tpv_msg(&tpv).await;
                }
            }
            Err(e) => {
                error!("GPSD receive error {e:?}");
            }
        }
    }
}

/// GNSS source backed by a gpsd daemon.
///
/// Connects to the daemon over TCP, enables watch mode, and publishes a
/// [`GnssPositionEvent`](EventKind::GnssPositionEvent) for every usable TPV
/// report. gpsd owns the delivery schedule entirely; this module only
/// forwards what arrives.
pub struct GpsdModule {
    ctx: ModuleCtx,
    gpsd_handle: tokio::task::JoinHandle<()>,
    task_notify: Arc<Notify>,
}

impl GpsdModule {
    /// Connects to the gpsd daemon at `address`.
    ///
    /// A refused connection is the GPS-unavailable failure mode and is
    /// surfaced to the caller; there is no reconnect logic.
    pub async fn new(ctx: ModuleCtx, address: &str) -> Result<Self, Error> {
        let address: SocketAddr = match address.parse() {
            Ok(addr) => addr,
            Err(e) => return Err(io::Error::new(ErrorKind::InvalidInput, e)),
        };
        let socket = TcpStream::connect(address).await?;
        let rt = GpsdPositionRuntime::new(ctx.sender.clone());
        let notify = rt.notify.clone();
        let gpsd_reader_task_handle = tokio::spawn(async move { gpsd_reader(socket, rt).await });
        Ok(GpsdModule {
            ctx,
            gpsd_handle: gpsd_reader_task_handle,
            task_notify: notify,
        })
    }
}

#[async_trait::async_trait]
impl Module for GpsdModule {
    async fn run(&mut self) -> Result<(), ()> {
        self.task_notify.notify_one();
        let mut run = true;
        while run {
            tokio::select! {
                event = self.ctx.receiver.recv() => {
                    match event {
                        Ok(event) => {
                            if let EventKind::QuitEvent = event.kind {
                                self.gpsd_handle.abort();
                                run = false;
                            }
                        }
                        Err(e) => error!("Failed to receive event in module Gpsd. Error: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}
