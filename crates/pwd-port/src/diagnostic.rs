//! Append-only diagnostic log.
//!
//! One file per worker, opened at start and closed at stop. Lines are
//! timestamped and flushed as they are written so they survive the host
//! killing the worker. Every line is mirrored to `tracing`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::error::{PortError, PortResult};

/// Default location, shared with earlier driver builds.
pub const DEFAULT_LOG_PATH: &str = "/tmp/erlang-pwd-drv.log";

#[derive(Debug)]
pub struct DiagnosticLog {
    file: File,
    path: PathBuf,
}

impl DiagnosticLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> PortResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| PortError::LogOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Informational line: lifecycle events and lookup misses.
    pub fn info(&mut self, line: &str) {
        info!(target: "pwd_port::diagnostic", "{line}");
        self.write(line);
    }

    /// Failure line: allocation and channel problems.
    pub fn warn(&mut self, line: &str) {
        warn!(target: "pwd_port::diagnostic", "{line}");
        self.write(line);
    }

    /// Append one line and flush it. Failures are reported but not returned.
    ///
    /// The line goes out in a single write so workers sharing the file do
    /// not interleave mid-line.
    pub fn write(&mut self, line: &str) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let text = format!("{stamp} {line}\n");
        let result = self
            .file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush());
        if let Err(err) = result {
            warn!("couldn't write diagnostic log {}: {err}", self.path.display());
        }
    }

    /// Flush and close the file.
    pub fn close(mut self) {
        if let Err(err) = self.file.flush() {
            warn!("couldn't flush diagnostic log {}: {err}", self.path.display());
        }
    }
}
