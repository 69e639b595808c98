//! Arrow schema and row<->`RecordBatch` conversion for on-disk candle files.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, Float64Array, Float64Builder, Int64Array, Int64Builder, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::error::{Error, Result};

/// One buffered row, ready to be written: a finalized candle plus the
/// outcome label resolved at append time.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRow {
    pub asset_id: String,
    pub outcome: String,
    pub timestamp: i64,
    pub datetime: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
    pub vwap: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

pub fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("asset_id", DataType::Utf8, false),
        Field::new("outcome", DataType::Utf8, false),
        Field::new("timestamp", DataType::Int64, false),
        Field::new("datetime", DataType::Utf8, false),
        Field::new("open", DataType::Float64, false),
        Field::new("high", DataType::Float64, false),
        Field::new("low", DataType::Float64, false),
        Field::new("close", DataType::Float64, false),
        Field::new("volume", DataType::Float64, false),
        Field::new("trade_count", DataType::Int64, false),
        Field::new("vwap", DataType::Float64, false),
        Field::new("buy_volume", DataType::Float64, false),
        Field::new("sell_volume", DataType::Float64, false),
    ]))
}

pub fn rows_to_batch(rows: &[CandleRow]) -> Result<RecordBatch> {
    let mut asset_id = StringBuilder::new();
    let mut outcome = StringBuilder::new();
    let mut timestamp = Int64Builder::new();
    let mut datetime = StringBuilder::new();
    let mut open = Float64Builder::new();
    let mut high = Float64Builder::new();
    let mut low = Float64Builder::new();
    let mut close = Float64Builder::new();
    let mut volume = Float64Builder::new();
    let mut trade_count = Int64Builder::new();
    let mut vwap = Float64Builder::new();
    let mut buy_volume = Float64Builder::new();
    let mut sell_volume = Float64Builder::new();

    for row in rows {
        asset_id.append_value(&row.asset_id);
        outcome.append_value(&row.outcome);
        timestamp.append_value(row.timestamp);
        datetime.append_value(&row.datetime);
        open.append_value(row.open);
        high.append_value(row.high);
        low.append_value(row.low);
        close.append_value(row.close);
        volume.append_value(row.volume);
        trade_count.append_value(row.trade_count as i64);
        vwap.append_value(row.vwap);
        buy_volume.append_value(row.buy_volume);
        sell_volume.append_value(row.sell_volume);
    }

    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(asset_id.finish()),
            Arc::new(outcome.finish()),
            Arc::new(timestamp.finish()),
            Arc::new(datetime.finish()),
            Arc::new(open.finish()),
            Arc::new(high.finish()),
            Arc::new(low.finish()),
            Arc::new(close.finish()),
            Arc::new(volume.finish()),
            Arc::new(trade_count.finish()),
            Arc::new(vwap.finish()),
            Arc::new(buy_volume.finish()),
            Arc::new(sell_volume.finish()),
        ],
    )
    .map_err(Error::Arrow)
}

fn col_str(batch: &RecordBatch, name: &str) -> Result<&StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Write(format!("missing or malformed column '{name}'")))
}

fn col_i64(batch: &RecordBatch, name: &str) -> Result<&Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Write(format!("missing or malformed column '{name}'")))
}

fn col_f64(batch: &RecordBatch, name: &str) -> Result<&Float64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| Error::Write(format!("missing or malformed column '{name}'")))
}

pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<CandleRow>> {
    let asset_id = col_str(batch, "asset_id")?;
    let outcome = col_str(batch, "outcome")?;
    let timestamp = col_i64(batch, "timestamp")?;
    let datetime = col_str(batch, "datetime")?;
    let open = col_f64(batch, "open")?;
    let high = col_f64(batch, "high")?;
    let low = col_f64(batch, "low")?;
    let close = col_f64(batch, "close")?;
    let volume = col_f64(batch, "volume")?;
    let trade_count = col_i64(batch, "trade_count")?;
    let vwap = col_f64(batch, "vwap")?;
    let buy_volume = col_f64(batch, "buy_volume")?;
    let sell_volume = col_f64(batch, "sell_volume")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(CandleRow {
            asset_id: asset_id.value(i).to_string(),
            outcome: outcome.value(i).to_string(),
            timestamp: timestamp.value(i),
            datetime: datetime.value(i).to_string(),
            open: open.value(i),
            high: high.value(i),
            low: low.value(i),
            close: close.value(i),
            volume: volume.value(i),
            trade_count: trade_count.value(i) as u64,
            vwap: vwap.value(i),
            buy_volume: buy_volume.value(i),
            sell_volume: sell_volume.value(i),
        });
    }
    Ok(rows)
}

/// Overwrite `path` with exactly `rows`, creating parent directories first.
pub fn write_rows(path: &Path, rows: &[CandleRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let batch = rows_to_batch(rows)?;
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(Error::Parquet)?;
    writer.write(&batch).map_err(Error::Parquet)?;
    writer.close().map_err(Error::Parquet)?;
    Ok(())
}

/// Read every row out of an existing candle file.
pub fn read_rows(path: &Path) -> Result<Vec<CandleRow>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(Error::Parquet)?
        .build()
        .map_err(Error::Parquet)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(Error::Arrow)?;
        rows.extend(batch_to_rows(&batch)?);
    }
    Ok(rows)
}
