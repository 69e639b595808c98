//! edgefeed - streaming ingest and OHLCV aggregation daemon for
//! prediction-market order flow.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── config.rs        # Configuration loading and validation
//! ├── market.rs        # Shared MarketInfo / slug derivation
//! ├── discovery/       # C2: resolves market queries into tracked assets
//! ├── transport/       # C3: WebSocket market-data stream
//! ├── aggregator/       # C4: per-asset OHLCV candle aggregation
//! ├── writer/           # C5: Parquet persistence + zip archiving
//! └── orchestrator.rs  # C6: wires the above into the run loop
//! ```

pub mod aggregator;
pub mod config;
pub mod discovery;
pub mod error;
pub mod market;
pub mod orchestrator;
pub mod transport;
pub mod writer;
