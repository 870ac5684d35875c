//! Pull loop run by a frame source's worker thread.
//!
//! The loop pulls one frame at a time from a [`FrameStream`], wraps it in a
//! borrowed [`FrameBuffer`] and hands it to the handler before pulling the
//! next one. Pulls use a bounded timeout so the cancellation token is checked
//! between frames.

use super::SourceError;
use crate::gst::frame::{admit, wall_clock_seconds, FrameBuffer, SequenceCounter};
use crate::gst::handler::{CallbackContext, FrameHandler};
use gstreamer as gst;
use gstreamer_app as gst_app;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use vidlink_types::OversizePolicy;

/// Bytes of one pulled frame.
pub enum FramePayload {
    Mapped(gst::MappedBuffer<gst::buffer::Readable>),
    Owned(Vec<u8>),
}

impl FramePayload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FramePayload::Mapped(map) => map.as_slice(),
            FramePayload::Owned(data) => data,
        }
    }
}

pub struct PulledFrame {
    pub payload: FramePayload,
    /// Capture time, seconds since the Unix epoch.
    pub timestamp: f64,
}

impl PulledFrame {
    pub fn owned(data: Vec<u8>, timestamp: f64) -> Self {
        Self {
            payload: FramePayload::Owned(data),
            timestamp,
        }
    }
}

pub enum PullOutcome {
    Frame(PulledFrame),
    /// Nothing arrived within the timeout.
    Timeout,
    EndOfStream,
}

/// Blocking producer of frames.
pub trait FrameStream: Send {
    fn pull(&mut self, timeout: Duration) -> Result<PullOutcome, SourceError>;
}

/// [`FrameStream`] over a pipeline's appsink.
///
/// When given the pipeline bus, an error posted there ends the stream
/// instead of leaving the loop polling a stalled appsink.
pub struct AppSinkStream {
    appsink: gst_app::AppSink,
    bus: Option<gst::Bus>,
}

impl AppSinkStream {
    pub fn new(appsink: gst_app::AppSink, bus: Option<gst::Bus>) -> Self {
        Self { appsink, bus }
    }

    fn pipeline_error(&self) -> Option<SourceError> {
        let msg = self
            .bus
            .as_ref()?
            .pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(SourceError::Pull(format!(
                "{} (debug: {:?})",
                err.error(),
                err.debug()
            ))),
            _ => None,
        }
    }
}

impl FrameStream for AppSinkStream {
    fn pull(&mut self, timeout: Duration) -> Result<PullOutcome, SourceError> {
        let timeout = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Ok(PullOutcome::EndOfStream);
            }
            if let Some(e) = self.pipeline_error() {
                return Err(e);
            }
            return Ok(PullOutcome::Timeout);
        };

        let timestamp = wall_clock_seconds();
        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| SourceError::Pull("sample without buffer".to_string()))?;
        let map = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| SourceError::Pull("failed to map buffer".to_string()))?;

        Ok(PullOutcome::Frame(PulledFrame {
            payload: FramePayload::Mapped(map),
            timestamp,
        }))
    }
}

/// How a pull loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    Cancelled,
    Failed(String),
}

pub struct PullLoop {
    pub label: String,
    pub stream: Box<dyn FrameStream>,
    pub handler: Arc<dyn FrameHandler>,
    pub context: CallbackContext,
    pub counter: SequenceCounter,
    pub capacity: usize,
    pub policy: OversizePolicy,
    pub poll_interval: Duration,
    pub cancel: CancellationToken,
}

impl PullLoop {
    pub fn run(mut self) -> LoopExit {
        debug!("Pull loop '{}' started", self.label);
        let mut dispatched: u64 = 0;

        let exit = loop {
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let frame = match self.stream.pull(self.poll_interval) {
                Ok(PullOutcome::Frame(frame)) => frame,
                Ok(PullOutcome::Timeout) => continue,
                Ok(PullOutcome::EndOfStream) => break LoopExit::EndOfStream,
                Err(e) => {
                    error!("Pull loop '{}' failed to pull frame: {}", self.label, e);
                    break LoopExit::Failed(e.to_string());
                }
            };

            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let bytes = frame.payload.as_slice();
            let Some(admitted) = admit(bytes, self.capacity, self.policy) else {
                warn!(
                    "Pull loop '{}' dropped frame of {} bytes, larger than the max buffer size {}",
                    self.label,
                    bytes.len(),
                    self.capacity
                );
                continue;
            };
            if admitted.len() < bytes.len() {
                warn!(
                    "Pull loop '{}' truncated frame of {} bytes to {}",
                    self.label,
                    bytes.len(),
                    admitted.len()
                );
            }

            let buffer = match FrameBuffer::new(0, frame.timestamp, admitted, self.capacity) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!("Pull loop '{}': {}", self.label, e);
                    continue;
                }
            };
            // Numbered only once the frame is certain to be dispatched.
            let seqn = self.counter.advance();
            let buffer = buffer.with_seqn(seqn);

            trace!(
                "Pull loop '{}' dispatching frame {} ({} bytes)",
                self.label,
                seqn,
                buffer.size()
            );
            if let Err(e) = self.handler.frame_ready(&self.context, &buffer) {
                warn!(
                    "Handler for '{}' failed on frame {}: {}",
                    self.label, seqn, e
                );
            }
            dispatched += 1;
        };

        match &exit {
            LoopExit::EndOfStream => {
                info!(
                    "Pull loop '{}' reached end of stream after {} frames",
                    self.label, dispatched
                );
                self.handler.end_of_stream(&self.context);
            }
            LoopExit::Cancelled => {
                info!(
                    "Pull loop '{}' cancelled after {} frames",
                    self.label, dispatched
                );
            }
            LoopExit::Failed(_) => {}
        }

        exit
    }
}
