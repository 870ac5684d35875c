//! Shared types for the vidlink frame transport.
//!
//! Plain serializable value types used by the GStreamer side and by
//! configuration files.

pub mod policy;
pub mod priority;
pub mod state;
pub mod trace;

pub use policy::{OversizePolicy, RenderTopologyKind, SourceTopologyKind};
pub use priority::{ThreadPriority, ThreadPriorityStatus};
pub use state::PipelineState;
pub use trace::{round_to_micros, TraceParseError, TraceRecord};
