//! Vidlink: moves decoded video frames from a decode pipeline to frame
//! handlers across a worker-thread boundary.
//!
//! A [`FrameSource`] pulls frames on its own worker thread and hands each one
//! to a registered [`FrameHandler`] as a borrowed [`FrameBuffer`].
//! [`DisplaySink`] feeds frames into a render pipeline and [`TraceSink`]
//! records their timing. [`is_compatible`] compares two caps descriptors.

pub mod config;
pub mod gst;
pub mod logging;

pub use gst::{
    is_compatible, CallbackContext, DisplaySink, FrameBuffer, FrameHandler, FrameSource,
    TraceSink,
};
