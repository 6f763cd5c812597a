use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use feedrelay::pipeline::Dispatched;
use feedrelay::{
    Config, Connection, Database, DeliveryClient, DeliveryResponse, Dispatcher, InputEvent,
    MessagePayload, Pipeline, Stores,
};

/// Interval between reservation pruning passes.
const PRUNE_INTERVAL_SECS: u64 = 3600;

/// Delivery client appending every payload to a JSON-lines file.
struct OutboxClient {
    file: Mutex<File>,
}

impl OutboxClient {
    async fn open(path: &str) -> std::io::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl DeliveryClient for OutboxClient {
    async fn send(&self, connection: &Connection, payload: &MessagePayload) -> DeliveryResponse {
        let line = json!({
            "connectionId": connection.id,
            "target": connection.target,
            "payload": payload,
            "queuedAt": Utc::now().to_rfc3339(),
        })
        .to_string();

        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        }
        .await;

        match written {
            Ok(()) => DeliveryResponse::ok(),
            Err(e) => DeliveryResponse::TransportError(e.to_string()),
        }
    }
}

fn print_results(dispatched: Dispatched) {
    match dispatched.result {
        Ok(report) => {
            for event in report.events {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("Failed to encode output event: {}", e),
                }
            }
        }
        Err(e) => {
            let line = json!({
                "kind": "run-failed",
                "feedId": dispatched.feed_id,
                "retryable": e.is_retryable(),
                "error": e.to_string(),
            });
            println!("{line}");
        }
    }
}

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = feedrelay::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedrelay::logging::init_console_only(&config.logging.level);
    }

    info!("feedrelay - feed article delivery pipeline");

    let db = match Database::open(&config.database.path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database {}: {}", config.database.path, e);
            std::process::exit(1);
        }
    };

    let client = match OutboxClient::open(&config.delivery.outbox_path).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to open outbox {}: {}", config.delivery.outbox_path, e);
            std::process::exit(1);
        }
    };
    info!("Writing outbound payloads to {}", config.delivery.outbox_path);

    let pipeline = Arc::new(Pipeline::new(
        Stores::sqlite(&db),
        client,
        &config.delivery,
    ));
    let (dispatcher, mut results) = Dispatcher::new(Arc::clone(&pipeline), &config.dispatch);

    let printer = tokio::spawn(async move {
        while let Some(dispatched) = results.recv().await {
            print_results(dispatched);
        }
    });

    let retention = config.delivery.reservation_retention();
    let housekeeping = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move {
            let mut timer = interval(Duration::from_secs(PRUNE_INTERVAL_SECS));
            loop {
                timer.tick().await;
                match pipeline.prune_reservations(Utc::now(), retention).await {
                    Ok(0) => {}
                    Ok(pruned) => debug!("Pruned {} expired reservation(s)", pruned),
                    Err(e) => warn!("Failed to prune reservations: {}", e),
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted = 0usize;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: InputEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed input event: {}", e);
                continue;
            }
        };

        if let Err(e) = dispatcher.submit(event).await {
            error!("Failed to queue event: {}", e);
            continue;
        }
        submitted += 1;
    }

    info!("Input closed after {} event(s), draining queues", submitted);
    dispatcher.shutdown().await;
    housekeeping.abort();
    if let Err(e) = printer.await {
        error!("Output task failed: {}", e);
    }
    info!("feedrelay stopped");
}
