//! Best-effort ring hydration from the daily CSV logs after a restart.
//!
//! The CSV rows carry no OHLC, so candles are reconstructed flat
//! (open = high = low = close = price) with the logged per-timeframe
//! scores. Any failure leaves the ring empty and the service continues
//! with live data only.

use std::collections::HashMap;
use std::path::Path;

use csv::StringRecord;
use tracing::{info, warn};

use crate::model::{CandleSnapshot, OiSnapshot, OrderbookSnapshot, Snapshot, NUM_HTF};

/// Load up to `limit` snapshots from the newest CSV file in `log_dir`,
/// oldest first.
pub fn load_recent(log_dir: &Path, limit: usize) -> Vec<Snapshot> {
    let Some(latest) = newest_csv(log_dir) else {
        info!(target: "orderflow::history", dir = %log_dir.display(), "no CSV history found");
        return Vec::new();
    };

    let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(&latest) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(target: "orderflow::history", error = %e, path = %latest.display(), "cannot open CSV history");
            return Vec::new();
        }
    };

    let columns: HashMap<String, usize> = match reader.headers() {
        Ok(headers) => headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect(),
        Err(e) => {
            warn!(target: "orderflow::history", error = %e, "cannot read CSV header");
            return Vec::new();
        }
    };

    // Malformed rows are skipped, not fatal.
    let rows: Vec<StringRecord> = reader.records().filter_map(|r| r.ok()).collect();
    let skip = rows.len().saturating_sub(limit);

    let snapshots: Vec<Snapshot> = rows[skip..]
        .iter()
        .filter_map(|row| row_to_snapshot(row, &columns))
        .collect();

    info!(
        target: "orderflow::history",
        path = %latest.display(),
        rows = rows.len(),
        restored = snapshots.len(),
        "restored snapshot history from CSV"
    );
    snapshots
}

/// Newest daily file by name; `YYYY-MM-DD.csv` sorts chronologically.
fn newest_csv(log_dir: &Path) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(log_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .max()
}

fn row_to_snapshot(row: &StringRecord, columns: &HashMap<String, usize>) -> Option<Snapshot> {
    let float = |col: &str| -> f64 {
        columns
            .get(col)
            .and_then(|&i| row.get(i))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let int = |col: &str| -> i64 {
        columns
            .get(col)
            .and_then(|&i| row.get(i))
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    };

    let time_ms = int("timestamp");
    if time_ms <= 0 {
        return None;
    }
    let time_sec = time_ms / 1000;

    let price = float("price");
    let final_score = float("final_score");

    let candle_1s = CandleSnapshot {
        time: time_sec,
        open: price,
        high: price,
        low: price,
        close: price,
        delta: float("delta_1s"),
        avg_score: float("score_1s"),
        ..Default::default()
    };
    let candle_1m = CandleSnapshot {
        time: time_sec / 60 * 60,
        open: price,
        high: price,
        low: price,
        close: price,
        avg_score: float("score_1m"),
        ..Default::default()
    };

    // HTF scores logged for 5m/15m/1h only; 4h and 1d restart flat.
    let mut htf = [CandleSnapshot::default(); NUM_HTF];
    for (i, (seconds, score_col)) in [
        (300i64, Some("score_5m")),
        (900, Some("score_15m")),
        (3_600, Some("score_1h")),
        (14_400, None),
        (86_400, None),
    ]
    .into_iter()
    .enumerate()
    {
        htf[i].time = time_sec / seconds * seconds;
        htf[i].close = price;
        if let Some(col) = score_col {
            htf[i].avg_score = float(col);
        }
    }

    Some(Snapshot {
        price,
        time_ms,
        cvd: float("cvd"),
        candle_1s,
        candle_1m,
        orderbook: OrderbookSnapshot {
            score: int("ob_score") as i32,
            ..Default::default()
        },
        oi: OiSnapshot {
            oi: float("oi"),
            oi_delta_long: float("oi_delta"),
            behavior: int("behavior") as u8,
            ..Default::default()
        },
        final_score,
        htf,
    })
}
