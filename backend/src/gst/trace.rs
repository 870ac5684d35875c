//! Frame timing trace sink.
//!
//! Writes one [`TraceRecord`] line per received frame so that capture to
//! receipt latency can be analysed offline.

use crate::gst::frame::{wall_clock_seconds, FrameBuffer};
use crate::gst::handler::{CallbackContext, FrameHandler, HandlerError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use vidlink_types::TraceRecord;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Trace file {0} is not open")]
    NotOpen(PathBuf),

    #[error("Failed to write to trace file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Frame handler that logs frame timing to a file.
pub struct TraceSink {
    path: PathBuf,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl TraceSink {
    /// Create or truncate the trace file at `path`.
    ///
    /// An open failure is reported and leaves the sink without a writer;
    /// every later record then fails with [`TraceError::NotOpen`].
    pub fn create(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let writer = match open_trace_file(&path) {
            Ok(file) => {
                info!("Writing frame trace to {}", path.display());
                Some(Box::new(file) as Box<dyn Write + Send>)
            }
            Err(e) => {
                error!("Failed to open trace file '{}': {}", path.display(), e);
                None
            }
        };
        Self {
            path,
            writer: Mutex::new(writer),
        }
    }

    /// Trace into an arbitrary writer; `label` is used in diagnostics.
    pub fn from_writer(label: impl Into<PathBuf>, writer: impl Write + Send + 'static) -> Self {
        Self {
            path: label.into(),
            writer: Mutex::new(Some(Box::new(writer))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Write the trace line for `frame`, stamped with the current wall clock.
    pub fn record(&self, frame: &FrameBuffer<'_>) -> Result<TraceRecord, TraceError> {
        let record = TraceRecord::new(
            frame.timestamp(),
            wall_clock_seconds(),
            frame.seqn(),
            frame.size(),
        );
        self.write_record(&record)?;
        Ok(record)
    }

    fn write_record(&self, record: &TraceRecord) -> Result<(), TraceError> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| TraceError::NotOpen(self.path.clone()))?;

        // A zero-length write surfaces as ErrorKind::WriteZero.
        writer
            .write_all(record.to_line().as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|source| TraceError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

fn open_trace_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

impl FrameHandler for TraceSink {
    fn frame_ready(
        &self,
        _context: &CallbackContext,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), HandlerError> {
        match self.record(frame) {
            Ok(record) => {
                debug!("Traced frame {} ({} bytes)", record.sequence_number, record.size);
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                Err(e.into())
            }
        }
    }

    fn end_of_stream(&self, context: &CallbackContext) {
        info!(
            "End of stream from '{}', trace {} complete",
            context.origin(),
            self.path.display()
        );
        if let Some(writer) = self.writer.lock().as_mut() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush trace file {}: {}", self.path.display(), e);
            }
        }
    }
}
