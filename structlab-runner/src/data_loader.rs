//! CSV bar loading for the replay runner.
//!
//! One file per instrument, header `timestamp,open,high,low,close,volume`,
//! timestamps in RFC 3339. Loading is strict: a malformed timestamp, an
//! out-of-order row, or a bar that fails shape validation aborts the load
//! with the offending line number. Replays are only reproducible if the
//! input is exactly what the fingerprint says it is, so there is no
//! skip-and-continue mode here.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use structlab_core::domain::{Bar, BarError, Timeframe};

/// Errors from reading and validating a bar file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open bar file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("'{}' line {line}: invalid RFC 3339 timestamp '{value}'", path.display())]
    Timestamp { path: PathBuf, line: u64, value: String },

    #[error("'{}' line {line}: timestamp not strictly increasing", path.display())]
    OutOfOrder { path: PathBuf, line: u64 },

    #[error("'{}' line {line}: {source}", path.display())]
    Shape {
        path: PathBuf,
        line: u64,
        #[source]
        source: BarError,
    },

    #[error("'{}' contains no bars", path.display())]
    Empty { path: PathBuf },
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// Load one instrument's bars. Line numbers in errors count the header
/// as line 1, so the first data row is line 2.
pub fn load_bars(path: &Path, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(file);

    let mut bars: Vec<Bar> = Vec::new();
    for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
        let line = i as u64 + 2;
        let row = row.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|_| LoadError::Timestamp {
                path: path.to_path_buf(),
                line,
                value: row.timestamp.clone(),
            })?
            .with_timezone(&Utc);

        if let Some(prev) = bars.last() {
            if timestamp <= prev.timestamp {
                return Err(LoadError::OutOfOrder { path: path.to_path_buf(), line });
            }
        }

        let bar = Bar {
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        };
        bar.validate().map_err(|source| LoadError::Shape {
            path: path.to_path_buf(),
            line,
            source,
        })?;
        bars.push(bar);
    }

    if bars.is_empty() {
        return Err(LoadError::Empty { path: path.to_path_buf() });
    }

    info!(symbol, bars = bars.len(), path = %path.display(), "loaded bar file");
    Ok(bars)
}
