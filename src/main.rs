//! ==============================================================================
//! main.rs - climate hub entry point
//! ==============================================================================
//!
//! purpose:
//!     the hub between an esp32 climate controller and the browser dashboard.
//!     the device publishes telemetry to an mqtt broker; the hub subscribes,
//!     keeps the last readings in memory and serves them over http.
//!
//! responsibilities:
//!     - load configuration (file + env overrides)
//!     - start the ingestion task (the only writer of the history store)
//!     - start the bus subscriber (broker connection, reconnects)
//!     - serve the json api and the static dashboard
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                       climate hub                            │
//!     │  ┌──────────────┐   mpsc    ┌──────────────┐                 │
//!     │  │ bus (mqtt)   │ ────────▶ │ ingestion    │                 │
//!     │  │ bus.rs       │  bytes    │ ingest.rs    │                 │
//!     │  └──────────────┘           └──────┬───────┘                 │
//!     │         │ state watch              │ record                  │
//!     │         │                   ┌──────┴───────┐                 │
//!     │         │                   │ history ring │ <- store.rs     │
//!     │         │                   └──────┬───────┘                 │
//!     │         │                          │ snapshot                │
//!     │         │                   ┌──────┴───────┐   ┌──────────┐  │
//!     │         └─────────────────▶ │ web server   │◀──│ ota.rs   │  │
//!     │                             │ server.rs    │   └──────────┘  │
//!     │                             └──────────────┘                 │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! lifetime:
//!     history is volatile. it is created empty at start and discarded when
//!     the process exits.
//!
//! ==============================================================================

mod args;
mod bus;
mod config;
mod domain;
mod ingest;
mod normalize;
mod ota;
mod query;
mod server;
mod stats;
mod store;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// bus -> ingestion queue depth; readings arrive seconds apart
const INGEST_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();

    // startup banner
    println!("===========================================================");
    println!("  Climate Hub");
    println!("  MQTT telemetry -> bounded history -> dashboard");
    println!("===========================================================");

    // step 1: load configuration
    let args = args::Args::parse();
    let config = config::HubConfig::resolve(&args)?;
    init_tracing(&config.logging.level);
    install_panic_hook();
    config.print_summary();

    // step 2: the store, owned here and handed out explicitly
    let store = Arc::new(store::HistoryStore::new(config.history.capacity));
    info!(capacity = store.capacity(), "history store ready");

    // step 3: ingestion task (single writer), also drives ota completion
    let ota = Arc::new(ota::OtaService::new(
        config.ota.clone(),
        config.device.firmware_version.clone(),
    ));
    let (inbox_tx, inbox_rx) = mpsc::channel(INGEST_QUEUE);
    let ingestor = ingest::Ingestor::new(
        Arc::clone(&store),
        normalize::Normalizer::new(config.device.clone()),
        config.logging.show_sensor_data,
    )
    .with_ota(Arc::clone(&ota));
    tokio::spawn(ingestor.run(inbox_rx));

    // step 4: bus subscriber
    let (subscriber, bus_state) = bus::BusSubscriber::new(config.broker.clone(), inbox_tx);
    tokio::spawn(async move {
        if let Err(e) = subscriber.run().await {
            error!(error = %e, "bus subscriber stopped; no new readings will arrive");
        }
    });

    // step 5: web server (runs until ctrl-c)
    let state = server::AppState {
        query: query::QueryFacade::new(store),
        ota,
        bus: bus_state,
        started,
        ssl: config.server.ssl,
        default_limit: config.history.default_limit.max(1),
    };
    info!(port = config.server.port, "starting web server");
    server::serve(config.server.port, state, config.server.static_dir.clone()).await
}

/// RUST_LOG wins over the configured level
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// the one place panics are logged, handler panics included; the task dies,
/// the process does not
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        error!(panic = %panic, "unexpected panic");
    }));
}
