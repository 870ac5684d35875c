//! Render pipeline bus handling.
//!
//! Two independent entry points:
//! - a sync interceptor that runs inline on whichever thread posts a message
//!   and answers window-handle requests before the pipeline carries on;
//! - a watch thread that pops queued messages and reports end-of-stream,
//!   errors and pipeline state changes.

use crate::gst::handler::{CallbackContext, FrameHandler};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use vidlink_types::PipelineState;

/// Element message name used by GStreamer 0.10 sinks.
pub const LEGACY_WINDOW_HANDLE_MESSAGE: &str = "prepare-xwindow-id";

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handler slot shared between a display sink and its watch thread.
pub(crate) type SharedHandler = Arc<RwLock<Option<Arc<dyn FrameHandler>>>>;

/// Whether `msg` asks the application for a window handle.
pub fn is_window_handle_request(msg: &gst::MessageRef) -> bool {
    if gst_video::is_video_overlay_prepare_window_handle_message(msg) {
        return true;
    }
    matches!(msg.view(), gst::MessageView::Element(_))
        && msg
            .structure()
            .is_some_and(|s| s.has_name(LEGACY_WINDOW_HANDLE_MESSAGE))
}

/// Sync-handler decision for one message.
///
/// Window-handle requests turn off clock sync on the render surface and are
/// dropped so no default window gets created. Everything else passes.
pub fn intercept(msg: &gst::MessageRef, render_surface: Option<&gst::Element>) -> gst::BusSyncReply {
    if !is_window_handle_request(msg) {
        return gst::BusSyncReply::Pass;
    }

    match render_surface {
        Some(surface) if surface.find_property("sync").is_some() => {
            surface.set_property("sync", false);
            debug!("Disabled sync on render surface '{}'", surface.name());
        }
        Some(surface) => {
            warn!(
                "Render surface '{}' has no sync property, leaving it as is",
                surface.name()
            );
        }
        None => {
            debug!("Window handle requested but no render surface is known");
        }
    }

    gst::BusSyncReply::Drop
}

/// Install [`intercept`] as the bus sync handler.
pub fn install_sync_interceptor(
    bus: &gst::Bus,
    render_surface: Option<gst::glib::WeakRef<gst::Element>>,
) {
    bus.set_sync_handler(move |_bus, msg| {
        let surface = render_surface.as_ref().and_then(|weak| weak.upgrade());
        intercept(msg, surface.as_ref())
    });
}

/// Everything the watch thread reports into.
pub(crate) struct WatchTargets {
    pub name: String,
    pub handler: SharedHandler,
    pub context: CallbackContext,
    pub eos_reached: Arc<AtomicBool>,
    pub cached_state: Arc<RwLock<PipelineState>>,
}

/// Dedicated thread dispatching queued bus messages.
pub(crate) struct BusWatch {
    cancel: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BusWatch {
    pub fn spawn(bus: gst::Bus, targets: WatchTargets) -> io::Result<Self> {
        let cancel = CancellationToken::new();
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("vidlink-bus-{}", targets.name))
            .spawn(move || {
                debug!("Bus watch started for '{}'", targets.name);
                while !thread_cancel.is_cancelled() {
                    let Some(msg) = bus.timed_pop_filtered(
                        gst::ClockTime::from_nseconds(WATCH_POLL_INTERVAL.as_nanos() as u64),
                        &[
                            gst::MessageType::Eos,
                            gst::MessageType::Error,
                            gst::MessageType::Warning,
                            gst::MessageType::StateChanged,
                        ],
                    ) else {
                        continue;
                    };
                    dispatch(&msg, &targets);
                }
                debug!("Bus watch stopped for '{}'", targets.name);
            })?;

        Ok(Self {
            cancel,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Stop the watch thread and wait for it, unless called from it.
    pub fn stop(&self) {
        self.cancel.cancel();
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Bus watch thread panicked");
        }
    }
}

fn dispatch(msg: &gst::Message, targets: &WatchTargets) {
    use gst::MessageView;

    trace!("Bus message type: {:?}", msg.type_());

    match msg.view() {
        MessageView::Eos(_) => {
            if targets.eos_reached.swap(true, Ordering::SeqCst) {
                debug!("Repeated end of stream on '{}' ignored", targets.name);
                return;
            }
            info!("Render pipeline '{}' reached end of stream", targets.name);
            let handler = targets.handler.read().clone();
            if let Some(handler) = handler {
                handler.end_of_stream(&targets.context);
            }
        }
        MessageView::Error(err) => {
            error!(
                "Render pipeline error in '{}': {} (debug: {:?}, source: {:?})",
                targets.name,
                err.error(),
                err.debug(),
                err.src().map(|s| s.name().to_string())
            );
        }
        MessageView::Warning(w) => {
            warn!(
                "Render pipeline warning in '{}': {} (source: {:?})",
                targets.name,
                w.error(),
                w.src().map(|s| s.name().to_string())
            );
        }
        MessageView::StateChanged(state_changed) => {
            let from_pipeline = msg.src().is_some_and(|s| s.is::<gst::Pipeline>());
            if !from_pipeline {
                return;
            }
            let new_state = match state_changed.current() {
                gst::State::Ready => PipelineState::Ready,
                gst::State::Paused => PipelineState::Paused,
                gst::State::Playing => PipelineState::Playing,
                _ => PipelineState::Null,
            };
            info!(
                "Render pipeline '{}' state changed: {:?} -> {:?}",
                targets.name,
                state_changed.old(),
                state_changed.current()
            );
            *targets.cached_state.write() = new_state;
        }
        _ => {}
    }
}
