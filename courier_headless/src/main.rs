// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use clap::{CommandFactory, Parser};
use common::BACKGROUND_LOCATION_TASK;
use dirs::data_local_dir;
use gnss::{batcher::BatchDelivery, constant_source::ConstantGnssModule, gpsd_source::GpsdModule};
use identity::IdentityStore;
use module_core::{BatchHints, Event, EventBus, EventKind, Module};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracker::{Tracker, TrackerConfig};
use uplink::Uplink;

/// Velocity of the replayed route in meters per second.
const FAKE_GPS_VELOCITY: f64 = 10.0;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the fleet server, e.g. http://localhost:3000
    #[arg(short, long)]
    server_url: String,
    /// Read fixes from a local gpsd.
    #[arg(short = 'd', long)]
    gpsd: bool,
    /// Address of the gpsd to connect to.
    #[arg(long, default_value = "127.0.0.1:2947")]
    gpsd_address: String,
    /// Replay a route file instead of reading real fixes.
    #[arg(short, long)]
    gps_fake: bool,
    /// Route file (CSV, longitude,latitude per line) for --gps-fake.
    #[arg(short = 'f', long)]
    gps_source_file: Option<String>,
    /// Foreground send interval in seconds.
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    poll_secs: u64,
    /// Background flush interval hint in seconds.
    #[arg(short, long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: u64,
    /// Background flush distance hint in meters.
    #[arg(long, default_value_t = 10.0)]
    distance_meters: f64,
    /// Platform tag stamped on every sample.
    #[arg(long)]
    platform: Option<String>,
    /// Overrides the identity storage directory.
    #[arg(long)]
    data_dir: Option<String>,
}

fn read_route_from_file(file_path: &str) -> Result<Vec<common::position::Position>, ()> {
    let mut rdr = csv::Reader::from_path(file_path).map_err(|e| {
        error!("Failed to open route file {file_path}. Error: {e}");
    })?;
    let mut positions = Vec::new();

    for result in rdr.records() {
        let record = result.map_err(|e| {
            error!("Failed to read route file {file_path}. Error: {e}");
        })?;
        let (Some(lon), Some(lat)) = (record.get(0), record.get(1)) else {
            error!("Route file {file_path} has a line with fewer than two fields");
            return Err(());
        };
        let longitude = f64::from_str(lon).map_err(|e| {
            error!("Invalid longitude {lon} in route file. Error: {e}");
        })?;
        let latitude = f64::from_str(lat).map_err(|e| {
            error!("Invalid latitude {lat} in route file. Error: {e}");
        })?;
        positions.push(common::position::Position {
            longitude,
            latitude,
        });
    }
    debug!("length of route: {}", positions.len());
    Ok(positions)
}

async fn get_gpsd_module(eb: &EventBus, address: &str) -> Result<Box<dyn Module>, ()> {
    match GpsdModule::new(eb.context(), address).await {
        Ok(gpsd) => Ok(Box::new(gpsd)),
        Err(e) => {
            error!("Failed to connect to gpsd!. Error: {}", e);
            Err(())
        }
    }
}

fn create_fake_gps_module(eb: &EventBus, cli: &Cli) -> Result<Box<dyn Module>, ()> {
    if let Some(source_file) = &cli.gps_source_file {
        let positions = read_route_from_file(source_file)?;
        let module = ConstantGnssModule::new(eb.context(), &positions, FAKE_GPS_VELOCITY)
            .map_err(|e| {
                error!("Failed to create ConstantGnssModule. Error: {e}");
            })?;
        Ok(Box::new(module))
    } else {
        error!("Failed to create ConstantGnssModule. Error: gps_source_file not set");
        let _ = Cli::command().print_help();
        Err(())
    }
}

fn get_storage_dir(cli: &Cli) -> Result<std::path::PathBuf, ()> {
    if let Some(data_dir) = &cli.data_dir {
        return Ok(std::path::PathBuf::from(data_dir));
    }
    let mut storage_dir = data_local_dir().ok_or_else(|| {
        error!("Could not determine local data directory");
    })?;
    storage_dir.push("courier");
    Ok(storage_dir)
}

#[tokio::main]
async fn main() -> Result<(), ()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let storage_dir = get_storage_dir(&cli)?;
    let eb = EventBus::default();
    let mut gps: Box<dyn Module> = if cli.gpsd {
        get_gpsd_module(&eb, &cli.gpsd_address).await?
    } else if cli.gps_fake {
        create_fake_gps_module(&eb, &cli)?
    } else {
        error!("No GPS source specified. Use --gpsd or --gps-fake");
        let _ = Cli::command().print_help();
        return Err(());
    };
    let mut identity_store = IdentityStore::new(&storage_dir, eb.context());
    let mut uplink = Uplink::new(eb.context(), &cli.server_url, cli.platform.as_deref());
    let mut batcher = BatchDelivery::new(eb.context(), BACKGROUND_LOCATION_TASK);
    let mut tracker = Tracker::new(
        eb.context(),
        TrackerConfig {
            poll_interval: Duration::from_secs(cli.poll_secs),
            hints: BatchHints {
                task: BACKGROUND_LOCATION_TASK.to_string(),
                time_interval: Duration::from_secs(cli.interval_secs),
                distance_interval: cli.distance_meters,
            },
            auto_start: true,
        },
    );

    let quit_sender = eb.context().sender;
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = quit_sender.send(Event {
            kind: EventKind::QuitEvent,
        });
    }) {
        error!("Failed to install Ctrl-C handler. Error: {e}");
    }

    info!("Starting modules...");
    tokio::join!(
        identity_store.run(),
        gps.run(),
        batcher.run(),
        uplink.run(),
        tracker.run()
    )
    .0
}
