//! Orchestrator (C6): boots discovery, transport, aggregator and writer,
//! then drives the periodic flush/discovery loop until shutdown.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::discovery::MarketDiscovery;
use crate::error::{Error, Result};
use crate::transport::StreamTransport;
use crate::writer::Writer;

const WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
const LOOP_TICK: Duration = Duration::from_secs(5);
const ARCHIVE_PATH: &str = "data.zip";

/// Runs the daemon to completion: initial discovery, then the periodic
/// flush/discovery loop, until a shutdown signal arrives, followed by a
/// final flush. Returns `Err` only for unrecoverable startup failures
/// (spec.md's "no markets found" fail-fast); steady-state errors are
/// logged and the loop continues.
pub async fn run(config: Config) -> Result<()> {
    let discovery = MarketDiscovery::new();

    info!("running initial market discovery");
    let initial_markets = discovery.discover(&config.market_queries).await;
    if initial_markets.is_empty() {
        return Err(Error::Discovery(
            "no markets found, check market_queries".into(),
        ));
    }

    let asset_ids: Vec<String> = initial_markets.iter().map(|m| m.asset_id.clone()).collect();
    let event_count: usize =
        initial_markets.iter().map(|m| m.event_slug.as_str()).collect::<HashSet<_>>().len();
    info!(assets = asset_ids.len(), events = event_count, "discovered markets");

    let aggregator = Arc::new(Aggregator::new(config.candle_interval_seconds));
    let writer = Arc::new(Writer::new(config.data_dir.clone(), discovery.known_assets())?);
    let transport = Arc::new(StreamTransport::new(WS_URL));

    let cancel = transport.cancel_token();
    spawn_signal_listener(cancel.clone());

    let transport_task = {
        let transport = transport.clone();
        let aggregator = aggregator.clone();
        tokio::spawn(async move {
            transport.run(asset_ids, move |value| aggregator.on_message(&value)).await;
        })
    };

    let archive_path = PathBuf::from(ARCHIVE_PATH);
    let mut last_discovery = Instant::now();
    let mut last_flush = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(LOOP_TICK) => {}
            _ = cancel.cancelled() => break,
        }

        drain_and_buffer(&aggregator, &writer, now_ms());

        if last_flush.elapsed() >= Duration::from_secs(config.flush_interval_seconds) {
            flush_and_archive(&writer, &archive_path);
            last_flush = Instant::now();
        }

        if last_discovery.elapsed() >= Duration::from_secs(config.discovery_interval_seconds) {
            let new_markets = discovery.discover(&config.market_queries).await;
            if !new_markets.is_empty() {
                let new_ids: Vec<String> = new_markets.iter().map(|m| m.asset_id.clone()).collect();
                info!(count = new_ids.len(), "subscribing to new assets");
                if let Err(e) = transport.subscribe(new_ids) {
                    error!(error = %e, "failed to send dynamic subscribe frame");
                }
            }
            last_discovery = Instant::now();
        }
    }

    info!("shutting down");
    transport.stop();
    let _ = transport_task.await;

    drain_and_buffer(&aggregator, &writer, now_ms());
    flush_and_archive(&writer, &archive_path);
    info!("shutdown complete");

    Ok(())
}

fn drain_and_buffer(aggregator: &Aggregator, writer: &Writer, now_ms: i64) {
    aggregator.flush_stale_candles(now_ms);
    let completed = aggregator.drain_completed_candles();
    if !completed.is_empty() {
        let count = writer.append_candles(&completed);
        info!(count, buffer_size = writer.buffer_size(), "buffered candles");
    }
}

fn flush_and_archive(writer: &Writer, archive_path: &std::path::Path) {
    if let Err(e) = writer.flush_to_disk() {
        error!(error = %e, "flush to disk failed");
    }
    if let Err(e) = writer.archive(archive_path) {
        error!(error = %e, "archive failed");
    }
}

/// Signals shutdown on SIGINT or (on unix) SIGTERM.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
            info!("received ctrl-c");
        }
        cancel.cancel();
    });
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
