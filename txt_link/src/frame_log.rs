//! Append-only diagnostic frame log.
//!
//! One JSON object per line. Frame records are written at `debug`/`trace`,
//! callback firings and lifecycle records at `info` and below, misses at
//! every level except `error`.

use serde::Serialize;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use txt_common::config::LogLevel;
use txt_common::error::TxtResult;

use crate::dispatch::TaEvent;

/// File name of the frame log inside the log directory.
pub const FRAME_LOG_FILE: &str = "txt_link_frames.jsonl";

/// Direction of a logged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameDirection {
    /// Host → firmware.
    Tx,
    /// Firmware → host.
    Rx,
}

/// Buffered JSON-lines writer.
pub struct FrameLog {
    path: PathBuf,
    writer: BufWriter<File>,
    level: LogLevel,
    write_failed: bool,
}

impl FrameLog {
    /// Open (append) the frame log in `dir`, creating the directory if needed.
    pub fn open(dir: &Path, level: LogLevel) -> TxtResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(FRAME_LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Frame log at {:?} (level {:?})", path, level);
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            level,
            write_failed: false,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log one sent or received frame.
    pub fn frame(&mut self, direction: FrameDirection, seq: u32, bytes: &[u8]) {
        if self.level.logs_frames() {
            self.append(json!({
                "ts_us": now_us(),
                "kind": "frame",
                "dir": direction,
                "seq": seq,
                "len": bytes.len(),
            }));
        }
    }

    /// Log a dispatched event.
    pub fn event(&mut self, event: &TaEvent) {
        if self.level.logs_events() {
            self.append(json!({
                "ts_us": now_us(),
                "kind": "event",
                "event": event,
            }));
        }
    }

    /// Log a missed exchange.
    pub fn miss(&mut self, seq: u32, consecutive: u32, reason: &str) {
        if self.level != LogLevel::Error {
            self.append(json!({
                "ts_us": now_us(),
                "kind": "miss",
                "seq": seq,
                "consecutive": consecutive,
                "reason": reason,
            }));
        }
    }

    /// Log a lifecycle note (start, stop, link loss).
    pub fn lifecycle(&mut self, what: &str) {
        if self.level.logs_events() || what == "link_lost" {
            self.append(json!({
                "ts_us": now_us(),
                "kind": "lifecycle",
                "what": what,
            }));
        }
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Frame log flush failed: {}", e);
        }
    }

    fn append(&mut self, record: serde_json::Value) {
        let result = serde_json::to_writer(&mut self.writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            // Report once; the link keeps running without the log.
            if !self.write_failed {
                warn!("Frame log write to {:?} failed: {}", self.path, e);
                self.write_failed = true;
            }
        }
    }
}

impl Drop for FrameLog {
    fn drop(&mut self) {
        self.flush();
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
