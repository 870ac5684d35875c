//! GStreamer integration.

pub mod caps;
pub mod display;
pub mod frame;
pub mod handler;
pub mod source;
pub mod thread_priority;
pub mod trace;

pub use caps::{is_compatible, CapsError};
pub use display::{AppSrcInjector, DisplayError, DisplaySink};
pub use frame::{FrameBuffer, FrameError, OwnedFrame, SequenceCounter, MAX_BUFFER_SIZE};
pub use handler::{CallbackContext, FrameHandler, HandlerError};
pub use source::{FrameSource, LoopExit, SourceError};
pub use trace::{TraceError, TraceSink};
