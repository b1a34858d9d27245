// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::{DateTime, Utc};
use gnss::gpsd_source::GpsdModule;
use module_core::{
    EventBus, EventKind, EventKindType, Module, payload_ref,
    test_helper::{stop_module, wait_for_event},
};
use std::str::FromStr;
use std::{io::Error, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

const TIMEOUT_MS: u16 = 500;

struct GpsdServer {
    socket: TcpListener,
    client: Option<TcpStream>,
}

impl GpsdServer {
    pub async fn new() -> (GpsdServer, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind gpsd test server on localhost");
        let addr = listener
            .local_addr()
            .expect("Failed to read gpsd test server address")
            .to_string();
        let server = GpsdServer {
            socket: listener,
            client: None,
        };
        (server, addr)
    }

    pub async fn accept_client(&mut self) {
        match self.socket.accept().await {
            Ok((client, _)) => self.client = Some(client),
            Err(e) => panic!("Client connection failed. Error: {:?}", e),
        }
    }

    pub async fn send(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self.client {
            Some(ref mut client) => client.write_all(buf).await,
            None => panic!("GPSD server no client is connected"),
        }
    }

    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.client {
            Some(ref mut client) => client.read(buf).await,
            None => panic!("GPSD server no client is connected"),
        }
    }
}

async fn test_setup(eb: &EventBus) -> (GpsdServer, tokio::task::JoinHandle<Result<(), ()>>) {
    let (mut server, addr) = GpsdServer::new().await;
    let mut module = GpsdModule::new(eb.context(), &addr)
        .await
        .expect("Failed to connect to the gpsd test server");
    let handle = tokio::spawn(async move { module.run().await });
    timeout(
        Duration::from_millis(TIMEOUT_MS.into()),
        server.accept_client(),
    )
    .await
    .unwrap_or_else(|_| panic!("No client connected within timeout of {TIMEOUT_MS} ms"));
    (server, handle)
}

/// Drains the watch command the module sends on startup.
async fn expect_watch_cmd(server: &mut GpsdServer) -> String {
    let mut buf: Vec<u8> = vec![0; gpsd_proto::ENABLE_WATCH_CMD.len()];
    let _ = timeout(
        Duration::from_millis(TIMEOUT_MS.into()),
        server.receive(&mut buf),
    )
    .await
    .unwrap_or_else(|_| panic!("Enable command not received in {TIMEOUT_MS} ms"));
    std::str::from_utf8(&buf)
        .expect("Received enable command is not a valid string")
        .to_owned()
}

const USABLE_TPV: &str = concat!(
    r#"{"class":"TPV","mode":3,"time":"2005-06-08T10:34:48.283Z","#,
    r#""lat":52.026649,"lon":11.282535,"speed":4.2,"#,
    r#""epx":6.5,"epy":8.5,"alt":81.0,"track":271.5}"#,
    "\n"
);

const TPV_WITHOUT_SPEED: &str = concat!(
    r#"{"class":"TPV","mode":2,"time":"2005-06-08T10:34:48.283Z","#,
    r#""lat":1.0,"lon":1.0}"#,
    "\n"
);

const TPV_WITHOUT_ERROR_ESTIMATES: &str = concat!(
    r#"{"class":"TPV","mode":3,"time":"2005-06-08T10:34:48.283Z","#,
    r#""lat":2.0,"lon":2.0,"speed":1.0}"#,
    "\n"
);

#[tokio::test]
#[test_log::test]
async fn enables_gpsd_watch_mode_on_start() {
    let eb = EventBus::default();
    let (mut server, mut handle) = test_setup(&eb).await;

    let received_cmd = expect_watch_cmd(&mut server).await;
    assert_eq!(received_cmd, gpsd_proto::ENABLE_WATCH_CMD);

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn usable_tpv_reports_become_position_events() {
    let eb = EventBus::default();
    let (mut server, mut handle) = test_setup(&eb).await;
    expect_watch_cmd(&mut server).await;

    let mut rx = eb.subscribe();
    server
        .send(USABLE_TPV.as_bytes())
        .await
        .expect("Failed to send TPV msg");
    let event = wait_for_event(
        &mut rx,
        Duration::from_millis(TIMEOUT_MS.into()),
        EventKindType::GnssPositionEvent,
    )
    .await;
    let fix = payload_ref!(event.kind, EventKind::GnssPositionEvent).unwrap();
    assert_eq!(fix.latitude(), 52.026649);
    assert_eq!(fix.longitude(), 11.282535);
    assert_eq!(fix.speed(), f64::from(4.2f32));
    // Accuracy is the larger of the two error estimates.
    assert_eq!(fix.accuracy(), f64::from(8.5f32));
    assert_eq!(fix.altitude(), Some(f64::from(81.0f32)));
    assert_eq!(fix.heading(), Some(f64::from(271.5f32)));
    assert_eq!(
        *fix.time(),
        DateTime::<Utc>::from_str("2005-06-08T10:34:48.283Z").unwrap()
    );

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn tpv_without_required_fields_is_skipped() {
    let eb = EventBus::default();
    let (mut server, mut handle) = test_setup(&eb).await;
    expect_watch_cmd(&mut server).await;

    let mut rx = eb.subscribe();
    server
        .send(TPV_WITHOUT_SPEED.as_bytes())
        .await
        .expect("Failed to send TPV msg");
    server
        .send(USABLE_TPV.as_bytes())
        .await
        .expect("Failed to send TPV msg");

    // The incomplete report yields nothing, the first published fix is the
    // usable one.
    let event = wait_for_event(
        &mut rx,
        Duration::from_millis(TIMEOUT_MS.into()),
        EventKindType::GnssPositionEvent,
    )
    .await;
    let fix = payload_ref!(event.kind, EventKind::GnssPositionEvent).unwrap();
    assert_eq!(fix.latitude(), 52.026649);

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn missing_error_estimates_yield_zero_accuracy() {
    let eb = EventBus::default();
    let (mut server, mut handle) = test_setup(&eb).await;
    expect_watch_cmd(&mut server).await;

    let mut rx = eb.subscribe();
    server
        .send(TPV_WITHOUT_ERROR_ESTIMATES.as_bytes())
        .await
        .expect("Failed to send TPV msg");
    let event = wait_for_event(
        &mut rx,
        Duration::from_millis(TIMEOUT_MS.into()),
        EventKindType::GnssPositionEvent,
    )
    .await;
    let fix = payload_ref!(event.kind, EventKind::GnssPositionEvent).unwrap();
    assert_eq!(fix.accuracy(), 0.0);
    assert_eq!(fix.altitude(), None);
    assert_eq!(fix.heading(), None);

    stop_module(&eb, &mut handle).await;
}
