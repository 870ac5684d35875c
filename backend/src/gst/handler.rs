//! Consumer-side callback interface.
//!
//! A [`FrameHandler`] receives frames synchronously on the thread that
//! dispatches them (a frame source worker, or whoever calls
//! `DisplaySink::push_frame`) and is told once when the stream ends.

use crate::gst::display::DisplayError;
use crate::gst::frame::FrameBuffer;
use crate::gst::trace::TraceError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("{0}")]
    Other(String),
}

/// Opaque context registered together with a handler and passed back on
/// every callback.
#[derive(Clone, Default)]
pub struct CallbackContext {
    origin: String,
    data: Option<Arc<dyn Any + Send + Sync>>,
}

impl CallbackContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: None,
        }
    }

    /// Attach caller-owned data, retrievable with [`CallbackContext::data`].
    pub fn with_data(origin: impl Into<String>, data: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            origin: origin.into(),
            data: Some(data),
        }
    }

    /// Name of the component dispatching the callback.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext")
            .field("origin", &self.origin)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

/// Receiver of frames and end-of-stream notifications.
///
/// `frame_ready` must consume the buffer before returning; the bytes are
/// released as soon as the call ends. A slow handler stalls the producer.
pub trait FrameHandler: Send + Sync {
    fn frame_ready(
        &self,
        context: &CallbackContext,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), HandlerError>;

    /// Called once when the stream feeding this handler has ended.
    fn end_of_stream(&self, _context: &CallbackContext) {}
}
