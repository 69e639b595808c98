//! End-to-end: raw inbound events -> aggregator -> writer -> on-disk files,
//! matching spec.md §8 scenarios S1/S3/S4.

mod support;

use std::fs::File;

use arrow::array::Int64Array;
use edgefeed::aggregator::Aggregator;
use edgefeed::writer::Writer;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::json;

fn read_timestamps(path: &std::path::Path) -> Vec<i64> {
    let file = File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
    let mut timestamps = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let column = batch.column_by_name("timestamp").unwrap();
        let array = column.as_any().downcast_ref::<Int64Array>().unwrap();
        timestamps.extend(array.iter().map(|v| v.unwrap()));
    }
    timestamps
}

#[test]
fn trades_flow_through_to_a_deduped_parquet_file() {
    let dir = tempfile::tempdir().unwrap();
    let info = support::market("token-yes", "will-it-rain", "Will it rain tomorrow?", "yes");
    let known = support::known_assets(&[info]);

    let aggregator = Aggregator::new(60);
    let writer = Writer::new(dir.path(), known).unwrap();

    aggregator.on_message(&json!({
        "event_type": "last_trade_price",
        "asset_id": "token-yes",
        "timestamp": 61_000,
        "price": 0.52,
        "size": 100,
    }));
    aggregator.on_message(&json!({
        "event_type": "last_trade_price",
        "asset_id": "token-yes",
        "timestamp": 119_000,
        "price": 0.55,
        "size": 50,
    }));
    aggregator.flush_stale_candles(130_000);

    let completed = aggregator.drain_completed_candles();
    assert_eq!(completed.len(), 1);
    writer.append_candles(&completed);
    writer.flush_to_disk().unwrap();

    let path = dir.path().join("will-it-rain").join("will-it-rain-tomorrow.parquet");
    assert!(path.exists());
    assert_eq!(read_timestamps(&path), vec![60]);

    // A second interval's worth of trades, flushed separately: dedup is
    // scoped per-timestamp, so the file should now carry two distinct rows.
    aggregator.on_message(&json!({
        "event_type": "last_trade_price",
        "asset_id": "token-yes",
        "timestamp": 125_000,
        "price": 0.60,
        "size": 10,
    }));
    aggregator.flush_stale_candles(190_000);
    let completed = aggregator.drain_completed_candles();
    writer.append_candles(&completed);
    writer.flush_to_disk().unwrap();

    assert_eq!(read_timestamps(&path), vec![60, 120]);
    assert_eq!(writer.buffer_size(), 0);
}

#[test]
fn repeated_flush_of_same_interval_overwrites_rather_than_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let info = support::market("token-yes", "evt", "Question?", "yes");
    let known = support::known_assets(&[info]);
    let writer = Writer::new(dir.path(), known.clone()).unwrap();
    let aggregator = Aggregator::new(60);

    aggregator.on_message(&json!({
        "event_type": "last_trade_price", "asset_id": "token-yes",
        "timestamp": 10_000, "price": 0.4, "size": 1,
    }));
    aggregator.flush_stale_candles(70_000);
    writer.append_candles(&aggregator.drain_completed_candles());
    writer.flush_to_disk().unwrap();

    aggregator.on_message(&json!({
        "event_type": "last_trade_price", "asset_id": "token-yes",
        "timestamp": 11_000, "price": 0.9, "size": 1,
    }));
    aggregator.flush_stale_candles(70_000); // forces a re-open + immediate stale-flush of the same [0,60) bucket
    writer.append_candles(&aggregator.drain_completed_candles());
    writer.flush_to_disk().unwrap();

    let path = dir.path().join("evt").join("question.parquet");
    assert_eq!(read_timestamps(&path), vec![0]);
}
