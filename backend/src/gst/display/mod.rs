//! Display sink: feeds frames into a live render pipeline.
//!
//! The render pipeline is described by a [`RenderTopology`] strategy. After
//! construction the bus gets a sync interceptor for window-handle requests
//! and a watch thread for end-of-stream, then the pipeline is taken
//! NULL -> READY -> PLAYING. If construction fails the sink keeps no pipeline
//! and every operation reports [`DisplayError::NoPipeline`].

pub mod bus;
pub mod topology;

use crate::config::DisplayConfig;
use crate::gst::frame::FrameBuffer;
use crate::gst::handler::{CallbackContext, FrameHandler, HandlerError};
use bus::{BusWatch, SharedHandler, WatchTargets};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use topology::{RenderTopology, RENDER_SURFACE_NAME, SOURCE_ADAPTER_NAME};
use tracing::{debug, error, info, trace, warn};
use vidlink_types::PipelineState;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("Display sink has no render pipeline")]
    NoPipeline,

    #[error("Failed to build render topology '{topology}': {reason}")]
    Construction { topology: String, reason: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Render pipeline has no bus")]
    NoBus,

    #[error("Failed to spawn bus watch thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Pipeline state change failed: {0}")]
    StateChange(String),

    #[error("Pad not found: {element}:{pad}")]
    PadNotFound { element: String, pad: String },

    #[error("No caps negotiated on {0}")]
    NoCaps(String),

    #[error("Render pipeline already reached end of stream")]
    EndOfStream,

    #[error("Failed to push buffer into render pipeline: {0}")]
    Push(String),

    #[error("Frame handler failed: {0}")]
    Handler(String),
}

struct RenderPipeline {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    watch: BusWatch,
}

/// Frame handler that injects frame bytes into a render pipeline's appsrc.
///
/// The appsrc timestamps buffers on arrival (`do-timestamp=true`).
#[derive(Clone)]
pub struct AppSrcInjector {
    appsrc: gst_app::AppSrc,
}

impl AppSrcInjector {
    pub fn new(appsrc: gst_app::AppSrc) -> Self {
        Self { appsrc }
    }
}

impl FrameHandler for AppSrcInjector {
    fn frame_ready(
        &self,
        _context: &CallbackContext,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), HandlerError> {
        // The frame view dies with this call, so the pipeline gets its own copy.
        let buffer = gst::Buffer::from_slice(frame.data().to_vec());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| DisplayError::Push(format!("{:?}", e)))?;
        trace!("Injected frame {} ({} bytes)", frame.seqn(), frame.size());
        Ok(())
    }

    fn end_of_stream(&self, context: &CallbackContext) {
        info!("Display '{}' finished rendering", context.origin());
    }
}

/// Frame consumer backed by a live render pipeline.
pub struct DisplaySink {
    name: String,
    pipeline: Option<RenderPipeline>,
    handler: SharedHandler,
    context: CallbackContext,
    eos_reached: Arc<AtomicBool>,
    cached_state: Arc<RwLock<PipelineState>>,
}

impl DisplaySink {
    /// Build the render pipeline selected by `config`.
    pub fn new(name: impl Into<String>, config: &DisplayConfig) -> Self {
        let topology = topology::select(config.topology, config.caps.as_deref());
        Self::with_topology(name, topology.as_ref())
    }

    /// Build the render pipeline described by `topology`.
    pub fn with_topology(name: impl Into<String>, topology: &dyn RenderTopology) -> Self {
        let name = name.into();
        let mut sink = Self {
            context: CallbackContext::new(name.clone()),
            name,
            pipeline: None,
            handler: Arc::new(RwLock::new(None)),
            eos_reached: Arc::new(AtomicBool::new(false)),
            cached_state: Arc::new(RwLock::new(PipelineState::Null)),
        };

        match sink.build(topology) {
            Ok(render) => {
                *sink.handler.write() = Some(Arc::new(AppSrcInjector::new(render.appsrc.clone())));
                sink.pipeline = Some(render);
                if let Err(e) = sink.play() {
                    error!("Display '{}' could not start rendering: {}", sink.name, e);
                }
            }
            Err(e) => {
                error!(
                    "Failed to create display pipeline '{}': {}. Are the GStreamer plugins installed correctly?",
                    sink.name, e
                );
            }
        }

        sink
    }

    fn build(&self, topology: &dyn RenderTopology) -> Result<RenderPipeline, DisplayError> {
        let description = topology.launch_description();
        debug!(
            "Building render topology '{}' for '{}': {}",
            topology.name(),
            self.name,
            description
        );

        let construction_error = |reason: String| DisplayError::Construction {
            topology: topology.name().to_string(),
            reason,
        };

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| construction_error(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| construction_error("description is not a pipeline".to_string()))?;

        self.prepare(pipeline.clone()).inspect_err(|_| {
            let _ = pipeline.set_state(gst::State::Null);
        })
    }

    fn prepare(&self, pipeline: gst::Pipeline) -> Result<RenderPipeline, DisplayError> {
        let appsrc = pipeline
            .by_name(SOURCE_ADAPTER_NAME)
            .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| DisplayError::ElementNotFound(SOURCE_ADAPTER_NAME.to_string()))?;

        let bus = pipeline.bus().ok_or(DisplayError::NoBus)?;

        let surface = pipeline.by_name(RENDER_SURFACE_NAME);
        if surface.is_none() {
            warn!(
                "Render topology for '{}' has no element named '{}', window requests will only be dropped",
                self.name, RENDER_SURFACE_NAME
            );
        }
        bus::install_sync_interceptor(&bus, surface.map(|s| s.downgrade()));

        pipeline
            .set_state(gst::State::Ready)
            .map_err(|e| DisplayError::StateChange(format!("Failed to reach READY: {}", e)))?;

        let watch = BusWatch::spawn(
            bus,
            WatchTargets {
                name: self.name.clone(),
                handler: self.handler.clone(),
                context: self.context.clone(),
                eos_reached: self.eos_reached.clone(),
                cached_state: self.cached_state.clone(),
            },
        )
        .map_err(DisplayError::ThreadSpawn)?;

        Ok(RenderPipeline {
            pipeline,
            appsrc,
            watch,
        })
    }

    fn render(&self) -> Result<&RenderPipeline, DisplayError> {
        self.pipeline.as_ref().ok_or_else(|| {
            error!("Display '{}' has no render pipeline", self.name);
            DisplayError::NoPipeline
        })
    }

    /// Request PLAYING. The cached state follows once the pipeline reports
    /// the transition on its bus.
    pub fn play(&self) -> Result<gst::StateChangeSuccess, DisplayError> {
        let render = self.render()?;
        info!("Setting display pipeline '{}' to PLAYING", self.name);

        let success = render
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| DisplayError::StateChange(format!("Failed to start: {}", e)))?;
        debug!("Display '{}' PLAYING requested: {:?}", self.name, success);
        Ok(success)
    }

    /// Request PAUSED.
    pub fn pause(&self) -> Result<gst::StateChangeSuccess, DisplayError> {
        let render = self.render()?;
        render
            .pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| DisplayError::StateChange(format!("Failed to pause: {}", e)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the render pipeline was built.
    pub fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Last pipeline state reported on the bus.
    pub fn state(&self) -> PipelineState {
        *self.cached_state.read()
    }

    /// Whether the render pipeline has posted end-of-stream.
    pub fn is_eos(&self) -> bool {
        self.eos_reached.load(Ordering::SeqCst)
    }

    /// Replace the handler that receives pushed frames and end-of-stream.
    pub fn set_frame_handler(&self, handler: Arc<dyn FrameHandler>) -> Result<(), DisplayError> {
        self.render()?;
        *self.handler.write() = Some(handler);
        Ok(())
    }

    /// Hand `frame` to the registered handler on the calling thread.
    pub fn push_frame(&self, frame: &FrameBuffer<'_>) -> Result<(), DisplayError> {
        self.render()?;
        if self.is_eos() {
            return Err(DisplayError::EndOfStream);
        }

        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            return Ok(());
        };
        handler
            .frame_ready(&self.context, frame)
            .map_err(|e| DisplayError::Handler(e.to_string()))
    }

    /// Signal end of input to the render pipeline so it drains.
    pub fn end_input(&self) -> Result<(), DisplayError> {
        let render = self.render()?;
        render
            .appsrc
            .end_of_stream()
            .map_err(|e| DisplayError::Push(format!("{:?}", e)))?;
        Ok(())
    }

    /// Currently negotiated caps on the appsrc pad.
    pub fn get_stream_metadata(&self) -> Result<String, DisplayError> {
        let render = self.render()?;
        let pad = render
            .appsrc
            .static_pad("src")
            .ok_or_else(|| DisplayError::PadNotFound {
                element: SOURCE_ADAPTER_NAME.to_string(),
                pad: "src".to_string(),
            })?;
        let caps = pad
            .allowed_caps()
            .ok_or_else(|| DisplayError::NoCaps(format!("{}:src", SOURCE_ADAPTER_NAME)))?;
        Ok(caps.to_string())
    }

    /// Stop the watch thread and take the pipeline to NULL.
    pub fn shutdown(&self) -> Result<(), DisplayError> {
        let render = self.render()?;
        render.watch.stop();
        render
            .pipeline
            .set_state(gst::State::Null)
            .map_err(|e| DisplayError::StateChange(format!("Failed to stop: {}", e)))?;
        // The watch has stopped, nothing else reports state from here on.
        *self.cached_state.write() = PipelineState::Null;
        Ok(())
    }
}

impl FrameHandler for DisplaySink {
    fn frame_ready(
        &self,
        _context: &CallbackContext,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), HandlerError> {
        self.push_frame(frame).map_err(HandlerError::from)
    }

    fn end_of_stream(&self, context: &CallbackContext) {
        info!(
            "Upstream '{}' ended, draining display '{}'",
            context.origin(),
            self.name
        );
        if let Err(e) = self.end_input() {
            warn!("Failed to signal end of input to '{}': {}", self.name, e);
        }
    }
}

impl Drop for DisplaySink {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            debug!("Dropping display pipeline: {}", self.name);
            let _ = self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gst::frame::MAX_BUFFER_SIZE;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};
    use topology::LaunchTopology;

    const TEST_CAPS: &str =
        "video/x-raw, format=(string)GRAY8, width=(int)4, height=(int)2, framerate=(fraction)25/1";

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(String, u64)>>,
        eos: AtomicUsize,
    }

    impl FrameHandler for Recorder {
        fn frame_ready(
            &self,
            context: &CallbackContext,
            frame: &FrameBuffer<'_>,
        ) -> Result<(), HandlerError> {
            self.frames
                .lock()
                .push((context.origin().to_string(), frame.seqn()));
            Ok(())
        }

        fn end_of_stream(&self, _context: &CallbackContext) {
            self.eos.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn plugins_available() -> bool {
        gst::ElementFactory::find("appsrc").is_some()
            && gst::ElementFactory::find("fakesink").is_some()
    }

    fn test_topology() -> LaunchTopology {
        LaunchTopology::new(
            "test",
            format!(
                "appsrc name=src is-live=true format=time caps=\"{}\" ! fakesink name=sink",
                TEST_CAPS
            ),
        )
    }

    fn wait_for_state(sink: &DisplaySink, state: PipelineState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.state() != state && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        sink.state() == state
    }

    #[test]
    fn test_construction_reaches_playing() {
        gst::init().unwrap();
        if !plugins_available() {
            println!("appsrc/fakesink not available, skipping test");
            return;
        }

        let sink = DisplaySink::with_topology("state-test", &test_topology());
        assert!(sink.is_ready());
        assert!(wait_for_state(&sink, PipelineState::Playing));
    }

    #[test]
    fn test_state_waits_for_async_transition() {
        gst::init().unwrap();
        if !plugins_available() {
            println!("appsrc/fakesink not available, skipping test");
            return;
        }

        // Not live: the pipeline cannot leave READY until a buffer prerolls.
        let topology = LaunchTopology::new(
            "preroll",
            format!(
                "appsrc name=src format=time caps=\"{}\" ! fakesink name=sink",
                TEST_CAPS
            ),
        );
        let sink = DisplaySink::with_topology("preroll-test", &topology);
        assert!(sink.is_ready());
        assert!(wait_for_state(&sink, PipelineState::Ready));

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(sink.state(), PipelineState::Ready);

        let data = [0u8; 8];
        let frame = FrameBuffer::new(0, 0.0, &data, MAX_BUFFER_SIZE).unwrap();
        sink.push_frame(&frame).unwrap();
        assert!(wait_for_state(&sink, PipelineState::Playing));
    }

    #[test]
    fn test_failed_construction_guards_operations() {
        gst::init().unwrap();
        let topology = LaunchTopology::new("broken", "nonexistentelement_vidlink ! fakesink");
        let sink = DisplaySink::with_topology("broken", &topology);

        assert!(!sink.is_ready());
        assert_eq!(sink.state(), PipelineState::Null);

        let data = [0u8; 8];
        let frame = FrameBuffer::new(0, 0.0, &data, MAX_BUFFER_SIZE).unwrap();
        assert!(matches!(sink.push_frame(&frame), Err(DisplayError::NoPipeline)));
        assert!(matches!(
            sink.get_stream_metadata(),
            Err(DisplayError::NoPipeline)
        ));
        assert!(matches!(sink.play(), Err(DisplayError::NoPipeline)));
        assert!(matches!(sink.end_input(), Err(DisplayError::NoPipeline)));
        assert!(matches!(
            sink.set_frame_handler(Arc::new(Recorder::default())),
            Err(DisplayError::NoPipeline)
        ));
    }

    #[test]
    fn test_topology_without_appsrc_is_rejected() {
        gst::init().unwrap();
        let topology = LaunchTopology::new("no-appsrc", "fakesrc ! fakesink name=sink");
        let sink = DisplaySink::with_topology("no-appsrc", &topology);
        assert!(!sink.is_ready());
    }

    #[test]
    fn test_push_and_end_of_stream() {
        gst::init().unwrap();
        if !plugins_available() {
            println!("appsrc/fakesink not available, skipping test");
            return;
        }

        let sink = DisplaySink::with_topology("display-test", &test_topology());
        assert!(sink.is_ready());

        let metadata = sink.get_stream_metadata().unwrap();
        assert!(metadata.contains("video/x-raw"), "metadata: {metadata}");

        let data = [128u8; 8];
        let frame = FrameBuffer::new(0, 0.0, &data, MAX_BUFFER_SIZE).unwrap();
        sink.push_frame(&frame).unwrap();

        let recorder = Arc::new(Recorder::default());
        sink.set_frame_handler(recorder.clone()).unwrap();
        let frame = FrameBuffer::new(1, 0.04, &data, MAX_BUFFER_SIZE).unwrap();
        sink.push_frame(&frame).unwrap();
        assert_eq!(
            recorder.frames.lock().as_slice(),
            &[("display-test".to_string(), 1)]
        );

        sink.end_input().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !sink.is_eos() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(sink.is_eos());
        assert_eq!(recorder.eos.load(Ordering::SeqCst), 1);

        let frame = FrameBuffer::new(2, 0.08, &data, MAX_BUFFER_SIZE).unwrap();
        assert!(matches!(
            sink.push_frame(&frame),
            Err(DisplayError::EndOfStream)
        ));
        assert_eq!(recorder.frames.lock().len(), 1);

        sink.shutdown().unwrap();
        assert_eq!(sink.state(), PipelineState::Null);
    }
}
