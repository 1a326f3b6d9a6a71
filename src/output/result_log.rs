//! Result Log
//!
//! Append-only CSV record of run events. Every run gets a run id one
//! greater than the largest id already in the file, so several runs can
//! share a log. Rows are sent over a channel to a writer thread; workers
//! never touch the file themselves.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Column names, in file order.
pub const HEADER: [&str; 6] = [
    "run_id",
    "action",
    "started_at",
    "duration_ms",
    "duration_ticks",
    "worker_id",
];

/// Kind of logged event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultAction {
    Init,
    Sample,
}

/// One line of the result log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub run_id: u64,
    pub action: ResultAction,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Duration in nanoseconds
    pub duration_ticks: u64,
    pub worker_id: u64,
}

/// Open result log with its writer thread.
pub struct ResultLog {
    path: PathBuf,
    run_id: u64,
    tx: Option<Sender<ResultRow>>,
    writer: Option<JoinHandle<csv::Result<u64>>>,
}

impl ResultLog {
    /// Opens (creating if needed) the log at `path` and allocates the next
    /// run id.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {}", parent.display());
            }
        }

        if !path.exists() {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        let run_id = next_run_id(&path)?;
        info!("Result log: {} (run {})", path.display(), run_id);

        let file = OpenOptions::new().append(true).open(&path)?;
        let (tx, rx) = channel::<ResultRow>();
        let writer = thread::spawn(move || {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            let mut written = 0u64;
            for row in rx {
                writer.serialize(&row)?;
                written += 1;
            }
            writer.flush()?;
            Ok(written)
        });

        Ok(Self {
            path,
            run_id,
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a cloneable handle for emitting rows.
    pub fn recorder(&self) -> Option<ResultRecorder> {
        self.tx.as_ref().map(|tx| ResultRecorder {
            run_id: self.run_id,
            tx: tx.clone(),
        })
    }

    /// Flushes and closes the log once every recorder is dropped.
    ///
    /// Returns the number of rows written in this run.
    pub fn close(&mut self) -> io::Result<u64> {
        drop(self.tx.take());
        let Some(writer) = self.writer.take() else {
            return Ok(0);
        };
        match writer.join() {
            Ok(result) => result.map_err(io::Error::from),
            Err(_) => Err(io::Error::new(io::ErrorKind::Other, "result log writer panicked")),
        }
    }
}

impl Drop for ResultLog {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                warn!("Failed to close result log {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Sends rows to the result log writer.
#[derive(Debug, Clone)]
pub struct ResultRecorder {
    run_id: u64,
    tx: Sender<ResultRow>,
}

impl ResultRecorder {
    pub fn init_completed(&self, duration: Duration, worker_id: u64) {
        self.send(ResultAction::Init, Utc::now(), duration, worker_id);
    }

    pub fn sample_completed(&self, started_at: DateTime<Utc>, duration: Duration, worker_id: u64) {
        self.send(ResultAction::Sample, started_at, duration, worker_id);
    }

    fn send(&self, action: ResultAction, started_at: DateTime<Utc>, duration: Duration, worker_id: u64) {
        let row = ResultRow {
            run_id: self.run_id,
            action,
            started_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            duration_ticks: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            worker_id,
        };
        // The writer only goes away at close, after all workers have exited.
        if self.tx.send(row).is_err() {
            debug!("Result log closed, row dropped");
        }
    }
}

/// Scans an existing log for the next run id.
///
/// The header row and rows whose first column is not a number are
/// skipped; the result is one past the largest id seen, or 1.
pub fn next_run_id(path: impl AsRef<Path>) -> io::Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut last = 0u64;
    for record in reader.records() {
        let Ok(record) = record else {
            continue;
        };
        if let Some(id) = record.get(0).and_then(|field| field.trim().parse::<u64>().ok()) {
            last = last.max(id);
        }
    }
    Ok(last + 1)
}
