//! The CSV sink worker: bounded submit queue, buffered daily-rotated file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::LogRow;

/// Submit queue depth; rows beyond this are dropped.
const QUEUE_SIZE: usize = 4096;

/// Write buffer size.
const BUF_SIZE: usize = 1 << 20;

/// Flush cadence.
const FLUSH_PERIOD: Duration = Duration::from_secs(1);

/// CSV header, 18 columns.
pub const CSV_HEADER: &str = "timestamp,price,final_score,\
score_1s,score_1m,score_5m,score_15m,score_1h,\
htf_bias,market_state,action_hint,\
delta_1s,cvd,ob_score,oi,oi_delta,\
behavior,event_flags";

/// Handle used by the engine worker to submit rows.
#[derive(Clone)]
pub struct CsvSink {
    tx: mpsc::Sender<LogRow>,
}

impl CsvSink {
    /// Start the sink worker. The returned task exits after the shutdown
    /// signal fires, flushing buffered rows first.
    pub fn spawn(log_dir: PathBuf, shutdown: watch::Receiver<bool>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let handle = tokio::spawn(run(log_dir, rx, shutdown));
        (Self { tx }, handle)
    }

    /// Non-blocking submit; the row is dropped when the sink is backed up.
    pub fn log(&self, row: LogRow) {
        if self.tx.try_send(row).is_err() {
            tracing::debug!(target: "orderflow::sink", "log row dropped, sink backed up");
        }
    }
}

async fn run(log_dir: PathBuf, mut rx: mpsc::Receiver<LogRow>, mut shutdown: watch::Receiver<bool>) {
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        warn!(target: "orderflow::sink", error = %e, dir = %log_dir.display(), "cannot create log directory, sink disabled");
        return;
    }

    let mut file = DailyCsv::new(log_dir);
    let mut flush_timer = tokio::time::interval(FLUSH_PERIOD);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            row = rx.recv() => {
                match row {
                    Some(row) => file.write_row(&row),
                    None => break,
                }
            }
            _ = flush_timer.tick() => file.flush(),
            _ = shutdown.changed() => break,
        }
    }

    // Drain whatever was already queued, then flush and close.
    while let Ok(row) = rx.try_recv() {
        file.write_row(&row);
    }
    file.flush();
}

/// Append-only CSV file rotated per UTC day.
struct DailyCsv {
    dir: PathBuf,
    current_day: String,
    writer: Option<BufWriter<File>>,
}

impl DailyCsv {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            current_day: String::new(),
            writer: None,
        }
    }

    fn write_row(&mut self, row: &LogRow) {
        let Some(day) = utc_day(row.timestamp) else {
            warn!(target: "orderflow::sink", timestamp = row.timestamp, "row with invalid timestamp dropped");
            return;
        };

        if day != self.current_day {
            self.rotate(&day);
        }

        if let Some(writer) = &mut self.writer {
            if let Err(e) = writer.write_all(format_row(row).as_bytes()) {
                warn!(target: "orderflow::sink", error = %e, "CSV write failed");
            }
        }
    }

    fn rotate(&mut self, day: &str) {
        self.flush();

        let path = self.dir.join(format!("{day}.csv"));
        match open_append(&path) {
            Ok((file, is_empty)) => {
                let mut writer = BufWriter::with_capacity(BUF_SIZE, file);
                if is_empty {
                    if let Err(e) = writeln!(writer, "{CSV_HEADER}") {
                        warn!(target: "orderflow::sink", error = %e, "CSV header write failed");
                    }
                }
                info!(target: "orderflow::sink", path = %path.display(), "logging to CSV");
                self.writer = Some(writer);
                self.current_day = day.to_string();
            }
            Err(e) => {
                warn!(target: "orderflow::sink", error = %e, path = %path.display(), "cannot open CSV file");
                self.writer = None;
                self.current_day.clear();
            }
        }
    }

    fn flush(&mut self) {
        if let Some(writer) = &mut self.writer {
            if let Err(e) = writer.flush() {
                warn!(target: "orderflow::sink", error = %e, "CSV flush failed");
            }
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<(File, bool)> {
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let is_empty = file.metadata()?.len() == 0;
    Ok((file, is_empty))
}

/// UTC day string `YYYY-MM-DD` for a unix-millisecond timestamp.
fn utc_day(timestamp_ms: i64) -> Option<String> {
    let dt = Utc.timestamp_millis_opt(timestamp_ms).single()?;
    Some(dt.format("%Y-%m-%d").to_string())
}

/// Render one row, newline-terminated. Column formats are fixed: prices
/// and scores at 2 decimals, flow quantities at 4, enums as integers.
fn format_row(row: &LogRow) -> String {
    format!(
        "{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{},{},{},{:.4},{:.4},{},{:.2},{:.4},{},{}\n",
        row.timestamp,
        row.price,
        row.final_score,
        row.score_1s,
        row.score_1m,
        row.score_5m,
        row.score_15m,
        row.score_1h,
        row.htf_bias.as_str(),
        row.market_state,
        row.action_hint,
        row.delta_1s,
        row.cvd,
        row.ob_score,
        row.oi,
        row.oi_delta,
        row.behavior,
        row.event_flags,
    )
}

#[cfg(test)]
mod tests {
    use super::super::{build_row, HtfBias};
    use super::*;
    use crate::model::Snapshot;

    fn sample_row() -> LogRow {
        LogRow {
            timestamp: 1_700_000_000_123,
            price: 30_000.456,
            final_score: 13.5,
            score_1s: 13.5,
            score_1m: 7.25,
            score_5m: 3.0,
            score_15m: -2.0,
            score_1h: 0.5,
            htf_bias: HtfBias::Range,
            market_state: "RANGE_CHOPPY",
            action_hint: "NO_TRADE",
            delta_1s: 0.51239,
            cvd: -12.34567,
            ob_score: -42,
            oi: 100_000.789,
            oi_delta: -120.00004,
            behavior: 3,
            event_flags: 0,
        }
    }

    #[test]
    fn row_has_18_columns_with_fixed_formats() {
        let line = format_row(&sample_row());
        assert!(line.ends_with('\n'));
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields.len(), 18);
        assert_eq!(fields[0], "1700000000123");
        assert_eq!(fields[1], "30000.46");
        assert_eq!(fields[2], "13.50");
        assert_eq!(fields[8], "RANGE");
        assert_eq!(fields[11], "0.5124");
        assert_eq!(fields[12], "-12.3457");
        assert_eq!(fields[13], "-42");
        assert_eq!(fields[14], "100000.79");
        assert_eq!(fields[15], "-120.0000");
        assert_eq!(fields[16], "3");
        assert_eq!(fields[17], "0");
    }

    #[test]
    fn header_matches_row_arity() {
        assert_eq!(CSV_HEADER.split(',').count(), 18);
    }

    #[test]
    fn utc_day_formats() {
        // 2023-11-14T22:13:20Z
        assert_eq!(utc_day(1_700_000_000_000).unwrap(), "2023-11-14");
        assert!(utc_day(i64::MAX).is_none());
    }

    #[test]
    fn build_row_uses_long_oi_delta_and_htf_scores() {
        let mut snap = Snapshot {
            time_ms: 1_700_000_000_123,
            price: 30_000.0,
            final_score: 20.0,
            ..Default::default()
        };
        snap.oi.oi_delta_short = 1.0;
        snap.oi.oi_delta_long = 2.0;
        snap.htf[2].avg_score = 60.0;
        snap.htf[3].avg_score = 60.0;
        snap.htf[4].avg_score = 60.0;

        let row = build_row(&snap, 0);
        assert_eq!(row.oi_delta, 2.0);
        assert_eq!(row.score_1h, 60.0);
        assert_eq!(row.htf_bias, HtfBias::Bullish);
        assert_eq!(row.market_state, "TRENDING_UP");
        assert_eq!(row.action_hint, "WATCH_LONG");
        assert_eq!(row.score_1s, 20.0);
    }

    #[tokio::test]
    async fn sink_writes_header_once_and_rotates_by_day() {
        let dir = tempfile::tempdir().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sink, handle) = CsvSink::spawn(dir.path().to_path_buf(), shutdown_rx);

        let mut row = sample_row();
        sink.log(row.clone());
        row.timestamp += 1_000;
        sink.log(row.clone());
        // Next UTC day.
        row.timestamp += 86_400_000;
        sink.log(row);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let day1 = std::fs::read_to_string(dir.path().join("2023-11-14.csv")).unwrap();
        let day2 = std::fs::read_to_string(dir.path().join("2023-11-15.csv")).unwrap();

        let lines1: Vec<&str> = day1.lines().collect();
        assert_eq!(lines1[0], CSV_HEADER);
        assert_eq!(lines1.len(), 3, "header plus two rows");
        assert_eq!(day2.lines().count(), 2, "header plus one row");
    }
}
