//! Writer (C5): buffers finalized candles, flushes them to per-market
//! Parquet files grouped by `(asset_id, outcome)`, and snapshots the data
//! directory into a rotated zip archive.

mod schema;

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::aggregator::candle::OHLCVCandle;
use crate::discovery::KnownAssets;
use crate::error::{Error, Result};
use crate::market::asset_id_prefix;
use schema::CandleRow;

/// Buffers finalized candles and periodically flushes/archives them.
///
/// `append_candles` and `flush_to_disk` are both meant to be driven from a
/// single task (the orchestrator); the internal buffer lock only protects
/// against that task racing with itself across `tokio::spawn`ed helpers.
pub struct Writer {
    data_dir: PathBuf,
    known_assets: KnownAssets,
    buffer: Mutex<Vec<CandleRow>>,
}

impl Writer {
    pub fn new(data_dir: impl Into<PathBuf>, known_assets: KnownAssets) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir, known_assets, buffer: Mutex::new(Vec::new()) })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Append finalized candles to the in-memory buffer, resolving each
    /// candle's outcome label from the current `known_assets` snapshot.
    /// Returns the number appended.
    pub fn append_candles(&self, candles: &[OHLCVCandle]) -> usize {
        if candles.is_empty() {
            return 0;
        }
        let mut buffer = self.buffer.lock();
        for candle in candles {
            let outcome = self
                .known_assets
                .get(&candle.asset_id)
                .map(|info| info.outcome_label.clone())
                .unwrap_or_default();

            buffer.push(CandleRow {
                asset_id: candle.asset_id.clone(),
                outcome,
                timestamp: candle.start_time,
                datetime: format_datetime(candle.start_time),
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
                trade_count: candle.trade_count,
                vwap: candle.vwap,
                buy_volume: candle.buy_volume,
                sell_volume: candle.sell_volume,
            });
        }
        candles.len()
    }

    fn file_path_for(&self, asset_id: &str) -> PathBuf {
        let relative = match self.known_assets.get(asset_id) {
            Some(info) => info.relative_path(),
            None => Path::new("unknown").join(format!("{}.parquet", asset_id_prefix(asset_id))),
        };
        self.data_dir.join(relative)
    }

    /// Group the buffer by `(asset_id, outcome)`, merge each group with any
    /// existing on-disk rows (dedup on `(asset_id, outcome, timestamp)`,
    /// keeping the most recently buffered value), sort by
    /// `(timestamp, outcome)`, and rewrite the file. The buffer lock is only
    /// held twice: once up front to take the whole buffer, once at the end
    /// to restore whatever didn't make it to disk. If a group fails to
    /// read or write, that group's rows plus every group not yet attempted
    /// go back into the buffer untouched, so the next flush retries all of
    /// them.
    pub fn flush_to_disk(&self) -> Result<()> {
        let taken = std::mem::take(&mut *self.buffer.lock());
        if taken.is_empty() {
            debug!("nothing to flush");
            return Ok(());
        }

        let mut groups: BTreeMap<(String, String), Vec<CandleRow>> = BTreeMap::new();
        for row in taken {
            groups.entry((row.asset_id.clone(), row.outcome.clone())).or_default().push(row);
        }

        let flushed_count: usize = groups.values().map(|v| v.len()).sum();
        let mut remaining: VecDeque<(String, String, Vec<CandleRow>)> = groups
            .into_iter()
            .map(|((asset_id, outcome), rows)| (asset_id, outcome, rows))
            .collect();

        let failure = loop {
            let Some((asset_id, outcome, mut new_rows)) = remaining.pop_front() else {
                break None;
            };
            let path = self.file_path_for(&asset_id);

            let mut combined = match path.exists().then(|| schema::read_rows(&path)).transpose() {
                Ok(Some(mut existing)) => {
                    existing.append(&mut new_rows);
                    existing
                }
                Ok(None) => new_rows,
                Err(e) => {
                    warn!(asset_id = %asset_id, outcome = %outcome, error = %e, "flush failed reading existing rows, buffer retained for retry");
                    remaining.push_front((asset_id, outcome, new_rows));
                    break Some(e);
                }
            };

            combined.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.outcome.cmp(&b.outcome)));
            dedup_keep_last(&mut combined, &asset_id, &outcome);

            if let Err(e) = schema::write_rows(&path, &combined) {
                warn!(asset_id = %asset_id, outcome = %outcome, error = %e, "flush failed, buffer retained for retry");
                remaining.push_front((asset_id, outcome, combined));
                break Some(e);
            }

            let label = match self.known_assets.get(&asset_id) {
                Some(info) => format!("{}/{}/{outcome}", info.event_slug, info.market_slug),
                None => format!("{}/{outcome}", asset_id_prefix(&asset_id)),
            };
            info!(rows = combined.len(), label = %label, "flushed candles");
        };

        if let Some(e) = failure {
            let mut unflushed: Vec<CandleRow> =
                remaining.into_iter().flat_map(|(_, _, rows)| rows).collect();
            self.buffer.lock().append(&mut unflushed);
            return Err(e);
        }

        info!(flushed_count, "flush complete");
        Ok(())
    }

    /// Zip `data_dir` to `archive_path`, writing to a temp file in the same
    /// directory then replacing atomically. Rotates up to two size-ordered
    /// backups of the previous archive before replacing it, but only when
    /// the new archive is not smaller than the one it replaces.
    pub fn archive(&self, archive_path: impl AsRef<Path>) -> Result<()> {
        let archive_dest = archive_path.as_ref();
        let parent = match archive_dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let tmp = tempfile::Builder::new()
            .prefix(".edgefeed-archive-")
            .suffix(".zip")
            .tempfile_in(parent)
            .map_err(|e| Error::Archive(format!("failed to create temp archive file: {e}")))?;
        let tmp_path = tmp.path().to_path_buf();

        zip_directory(&self.data_dir, &tmp_path)?;

        if archive_dest.exists() {
            let new_size = fs::metadata(&tmp_path)?.len();
            let old_size = fs::metadata(archive_dest)?.len();

            if new_size >= old_size {
                let backup1 = parent.join("data_backup_1.zip");
                let backup2 = parent.join("data_backup_2.zip");
                if backup1.exists() {
                    let should_rotate = !backup2.exists()
                        || fs::metadata(&backup1)?.len() > fs::metadata(&backup2)?.len();
                    if should_rotate {
                        fs::rename(&backup1, &backup2)?;
                    } else {
                        info!("skipping backup1 to backup2 rotation: backup1 not larger than backup2");
                    }
                }
                fs::rename(archive_dest, &backup1)?;
            } else {
                warn!(new_size, old_size, "new archive smaller than existing, skipping backup rotation");
            }
        }

        fs::rename(&tmp_path, archive_dest)?;
        // The file now lives at archive_dest; tell the temp-path guard to
        // stand down instead of trying to remove a path that's already gone.
        let _ = tmp.into_temp_path().keep();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(archive_dest, fs::Permissions::from_mode(0o640))?;
        }

        let size_mb = fs::metadata(archive_dest)?.len() as f64 / (1024.0 * 1024.0);
        info!(archive = %archive_dest.display(), size_mb, "archive updated");
        Ok(())
    }
}

fn dedup_keep_last(rows: &mut Vec<CandleRow>, asset_id: &str, outcome: &str) {
    // `rows` is sorted by timestamp, so the last-buffered row for a given
    // timestamp survives by always overwriting earlier entries in the map.
    let mut by_ts: BTreeMap<i64, CandleRow> = BTreeMap::new();
    for row in rows.drain(..) {
        debug_assert_eq!(row.asset_id, asset_id);
        debug_assert_eq!(row.outcome, outcome);
        by_ts.insert(row.timestamp, row);
    }
    rows.extend(by_ts.into_values());
}

fn format_datetime(start_time: i64) -> String {
    Utc.timestamp_opt(start_time, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string())
}

/// Recursively zip `root` into `dest_path`, with archive entries relative to
/// `root`'s parent so the top-level directory name is preserved in the zip.
fn zip_directory(root: &Path, dest_path: &Path) -> Result<()> {
    let file = fs::File::create(dest_path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let base = root.parent().unwrap_or(root);
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let rel = path.strip_prefix(base).unwrap_or(&path).to_string_lossy().replace('\\', "/");

            if path.is_dir() {
                writer.add_directory(format!("{rel}/"), options).map_err(Error::Zip)?;
                stack.push(path);
            } else {
                writer.start_file(rel, options).map_err(Error::Zip)?;
                let mut f = fs::File::open(&path)?;
                std::io::copy(&mut f, &mut writer)?;
            }
        }
    }

    writer.finish().map_err(Error::Zip)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketInfo;
    use std::sync::Arc;

    fn known_assets_with(info: MarketInfo) -> KnownAssets {
        let map = Arc::new(dashmap::DashMap::new());
        map.insert(info.asset_id.clone(), Arc::new(info));
        map
    }

    fn candle(asset_id: &str, start_time: i64, close: f64) -> OHLCVCandle {
        OHLCVCandle {
            asset_id: asset_id.into(),
            start_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            trade_count: 1,
            vwap_numerator: close,
            buy_volume: 0.0,
            sell_volume: 0.0,
            vwap: close,
        }
    }

    #[test]
    fn append_then_flush_writes_a_parquet_file() {
        let dir = tempfile::tempdir().unwrap();
        let info = MarketInfo::new("a1", "evt-slug", "Will it rain", "Event", "cond1", "yes");
        let known = known_assets_with(info);
        let writer = Writer::new(dir.path(), known).unwrap();

        writer.append_candles(&[candle("a1", 60, 0.5)]);
        assert_eq!(writer.buffer_size(), 1);
        writer.flush_to_disk().unwrap();
        assert_eq!(writer.buffer_size(), 0);

        let path = dir.path().join("evt-slug").join("will-it-rain.parquet");
        assert!(path.exists());
    }

    #[test]
    fn repeated_flushes_dedup_on_timestamp_keeping_last() {
        let dir = tempfile::tempdir().unwrap();
        let info = MarketInfo::new("a1", "evt-slug", "Will it rain", "Event", "cond1", "yes");
        let known = known_assets_with(info);
        let writer = Writer::new(dir.path(), known).unwrap();

        writer.append_candles(&[candle("a1", 60, 0.5)]);
        writer.flush_to_disk().unwrap();

        writer.append_candles(&[candle("a1", 60, 0.9), candle("a1", 120, 0.8)]);
        writer.flush_to_disk().unwrap();

        let path = dir.path().join("evt-slug").join("will-it-rain.parquet");
        let rows = schema::read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, 60);
        assert_eq!(rows[0].close, 0.9);
        assert_eq!(rows[1].timestamp, 120);
    }

    #[test]
    fn unknown_asset_falls_back_to_prefix_path() {
        let dir = tempfile::tempdir().unwrap();
        let known: KnownAssets = Arc::new(dashmap::DashMap::new());
        let writer = Writer::new(dir.path(), known).unwrap();

        writer.append_candles(&[candle("abcdefghijklmnopqrstuvwxyz", 60, 0.5)]);
        writer.flush_to_disk().unwrap();

        let path = dir.path().join("unknown").join("abcdefghijklmnop.parquet");
        assert!(path.exists());
    }

    #[test]
    fn archive_creates_a_zip_and_sets_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let info = MarketInfo::new("a1", "evt-slug", "Will it rain", "Event", "cond1", "yes");
        let known = known_assets_with(info);
        let writer = Writer::new(dir.path(), known).unwrap();
        writer.append_candles(&[candle("a1", 60, 0.5)]);
        writer.flush_to_disk().unwrap();

        let archive_path = dir.path().join("data.zip");
        writer.archive(&archive_path).unwrap();
        assert!(archive_path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&archive_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o640);
        }
    }

    #[test]
    fn archive_rotates_backups_only_when_growing() {
        let dir = tempfile::tempdir().unwrap();
        let known: KnownAssets = Arc::new(dashmap::DashMap::new());
        let writer = Writer::new(dir.path(), known.clone()).unwrap();
        let archive_path = dir.path().join("data.zip");

        writer.append_candles(&[candle("a1", 60, 0.5)]);
        writer.flush_to_disk().unwrap();
        writer.archive(&archive_path).unwrap();

        writer.append_candles(&[candle("a1", 120, 0.6), candle("a2", 60, 0.4)]);
        writer.flush_to_disk().unwrap();
        writer.archive(&archive_path).unwrap();

        assert!(archive_path.exists());
        assert!(dir.path().join("data_backup_1.zip").exists());
    }
}
