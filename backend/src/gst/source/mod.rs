//! Frame source: drives a decode pipeline and publishes its frames.
//!
//! [`FrameSource::initialize`] builds the decode topology and sets it
//! PLAYING. [`FrameSource::start`] then spawns one worker thread running the
//! pull loop, which hands each frame to the registered [`FrameHandler`] in
//! pull order. At most one frame is in flight per source. The worker ends on
//! end-of-stream, on a fatal pull error, or when the source is stopped.

mod construction;
pub mod worker;

pub use construction::{is_video_pad, SINK_ADAPTER_NAME};
pub use worker::{FramePayload, FrameStream, LoopExit, PullOutcome, PulledFrame};

use crate::config::SourceConfig;
use crate::gst::caps::{self, CapsError};
use crate::gst::frame::SequenceCounter;
use crate::gst::handler::{CallbackContext, FrameHandler};
use crate::gst::thread_priority::{apply_to_current_thread, ThreadPriorityState};
use construction::SourcePipeline;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vidlink_types::ThreadPriorityStatus;
use worker::{AppSinkStream, PullLoop};

/// Longest wait for the decode pipeline to preroll before reading its caps.
pub const PREROLL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(5);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Video source created from an empty url")]
    EmptyUrl,

    #[error("Failed to create element {element}: {reason}")]
    ElementCreation { element: String, reason: String },

    #[error("Failed to add elements to pipeline: {0}")]
    Bin(String),

    #[error("Failed to link elements: {from} -> {to}: {reason}")]
    Link {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Failed to start video source {url}: {reason}. Is the file path correct?")]
    StateChange { url: String, reason: String },

    #[error("Video source is not initialized")]
    NotInitialized,

    #[error("Video source stream was already consumed by a previous run")]
    StreamConsumed,

    #[error("No frame handler registered")]
    NoHandler,

    #[error("A frame handler is already registered")]
    HandlerAlreadyRegistered,

    #[error("Video source worker already started")]
    AlreadyStarted,

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("Pad not found: {element}:{pad}")]
    PadNotFound { element: String, pad: String },

    #[error("No caps negotiated on {0}")]
    NoCaps(String),

    #[error("Failed to pull frame: {0}")]
    Pull(String),

    #[error(transparent)]
    Caps(#[from] CapsError),
}

/// Producer of frames for one registered handler.
pub struct FrameSource {
    url: String,
    settings: SourceConfig,
    pipeline: Option<SourcePipeline>,
    stream: Option<Box<dyn FrameStream>>,
    handler: Option<(Arc<dyn FrameHandler>, CallbackContext)>,
    counter: SequenceCounter,
    cancel: CancellationToken,
    worker: Option<JoinHandle<LoopExit>>,
    priority: ThreadPriorityState,
}

impl FrameSource {
    /// Create a source for the media file at `url`. Nothing is built until
    /// [`FrameSource::initialize`].
    pub fn new(url: impl Into<String>, settings: &SourceConfig) -> Result<Self, SourceError> {
        let url = url.into();
        if url.is_empty() {
            error!("Video Source: Creating source from empty url");
            return Err(SourceError::EmptyUrl);
        }
        Ok(Self::with_parts(url, settings, None))
    }

    /// Create a source pulling from an already constructed frame stream.
    pub fn from_stream(
        label: impl Into<String>,
        stream: Box<dyn FrameStream>,
        settings: &SourceConfig,
    ) -> Self {
        Self::with_parts(label.into(), settings, Some(stream))
    }

    fn with_parts(
        url: String,
        settings: &SourceConfig,
        stream: Option<Box<dyn FrameStream>>,
    ) -> Self {
        Self {
            url,
            settings: settings.clone(),
            pipeline: None,
            stream,
            handler: None,
            counter: SequenceCounter::new(),
            cancel: CancellationToken::new(),
            worker: None,
            priority: ThreadPriorityState::new(settings.worker_priority),
        }
    }

    /// Share a sequence counter with other sources for global ordering.
    pub fn with_counter(mut self, counter: SequenceCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Build the decode pipeline and set it PLAYING.
    ///
    /// On failure the source keeps no pipeline and must not be started.
    pub fn initialize(&mut self) -> Result<(), SourceError> {
        if self.worker.is_some() {
            return Err(SourceError::AlreadyStarted);
        }
        if let Some(previous) = self.pipeline.take() {
            let _ = previous.pipeline.set_state(gst::State::Null);
        }

        let source = construction::build(&self.url, self.settings.topology)?;

        info!("Starting video source pipeline for {}", self.url);
        if let Err(e) = source.pipeline.set_state(gst::State::Playing) {
            error!(
                "Failed to create the video source for {}. Is the file path correct?",
                self.url
            );
            let _ = source.pipeline.set_state(gst::State::Null);
            return Err(SourceError::StateChange {
                url: self.url.clone(),
                reason: e.to_string(),
            });
        }

        self.stream = Some(Box::new(AppSinkStream::new(
            source.appsink.clone(),
            source.pipeline.bus(),
        )));
        self.pipeline = Some(source);
        Ok(())
    }

    /// Register the handler receiving every frame. Only one may be registered.
    pub fn set_frame_handler(
        &mut self,
        handler: Arc<dyn FrameHandler>,
        context: CallbackContext,
    ) -> Result<(), SourceError> {
        if self.handler.is_some() {
            warn!("Video source {} already has a frame handler", self.url);
            return Err(SourceError::HandlerAlreadyRegistered);
        }
        self.handler = Some((handler, context));
        Ok(())
    }

    /// Spawn the worker thread running the pull loop.
    pub fn start(&mut self) -> Result<(), SourceError> {
        if self.worker.is_some() {
            return Err(SourceError::AlreadyStarted);
        }
        let Some((handler, context)) = self.handler.clone() else {
            error!("Callback handler is not set for {}", self.url);
            return Err(SourceError::NoHandler);
        };
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None if self.pipeline.is_some() => return Err(SourceError::StreamConsumed),
            None => return Err(SourceError::NotInitialized),
        };

        let pull_loop = PullLoop {
            label: self.url.clone(),
            stream,
            handler,
            context,
            counter: self.counter.clone(),
            capacity: self.settings.max_buffer_size,
            policy: self.settings.oversize_policy,
            poll_interval: self.settings.pull_timeout(),
            cancel: self.cancel.clone(),
        };
        let priority = self.priority.clone();
        let label = self.url.clone();

        let handle = thread::Builder::new()
            .name("vidlink-source".to_string())
            .spawn(move || {
                apply_to_current_thread(&priority, &label);
                pull_loop.run()
            })
            .map_err(|e| {
                error!("Failed to spawn video source worker: {}", e);
                SourceError::ThreadSpawn(e)
            })?;

        debug!("Video source worker started for {}", self.url);
        self.worker = Some(handle);
        Ok(())
    }

    /// Whether the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Token that stops the worker when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Block until the worker thread exits.
    pub fn wait(&mut self) -> Result<LoopExit, SourceError> {
        let handle = self.worker.take().ok_or(SourceError::NotInitialized)?;
        handle.join().map_err(|_| {
            error!("Video source worker for {} panicked", self.url);
            SourceError::WorkerPanicked
        })
    }

    /// Cancel the worker, join it and take the pipeline to NULL.
    pub fn stop(&mut self) -> Result<Option<LoopExit>, SourceError> {
        self.cancel.cancel();
        let exit = if self.worker.is_some() {
            Some(self.wait()?)
        } else {
            None
        };
        if let Some(source) = self.pipeline.take() {
            source
                .pipeline
                .set_state(gst::State::Null)
                .map_err(|e| SourceError::StateChange {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
            info!("Stopped video source {}", self.url);
        }
        self.stream = None;
        Ok(exit)
    }

    /// Outcome of the worker priority request.
    pub fn priority_status(&self) -> ThreadPriorityStatus {
        self.priority.get_status()
    }

    /// Caps negotiated on the appsink's sink pad.
    ///
    /// Waits up to [`PREROLL_TIMEOUT`] for the pipeline to preroll, since the
    /// appsink is only linked once the demuxer exposes its video pad.
    pub fn get_stream_metadata(&self) -> Result<String, SourceError> {
        let source = self.pipeline.as_ref().ok_or(SourceError::NotInitialized)?;
        let (result, current, pending) = source.pipeline.state(PREROLL_TIMEOUT);
        match result {
            Ok(gst::StateChangeSuccess::Async) => {
                warn!(
                    "Video source {} still prerolling ({:?} -> {:?}) after {}",
                    self.url, current, pending, PREROLL_TIMEOUT
                );
            }
            Ok(_) => {}
            Err(e) => {
                return Err(SourceError::StateChange {
                    url: self.url.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let pad = source
            .appsink
            .static_pad("sink")
            .ok_or_else(|| SourceError::PadNotFound {
                element: SINK_ADAPTER_NAME.to_string(),
                pad: "sink".to_string(),
            })?;
        let caps = pad
            .current_caps()
            .or_else(|| pad.allowed_caps())
            .ok_or_else(|| SourceError::NoCaps(format!("{}:sink", SINK_ADAPTER_NAME)))?;
        Ok(caps.to_string())
    }

    /// Whether this source's caps and `remote` are always compatible.
    pub fn is_metadata_compatible(&self, remote: &str) -> Result<bool, SourceError> {
        let local = self.get_stream_metadata()?;
        Ok(caps::is_compatible(&local, remote)?)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if self.worker.is_some() || self.pipeline.is_some() {
            debug!("Dropping video source: {}", self.url);
            if let Err(e) = self.stop() {
                warn!("Failed to stop video source {}: {}", self.url, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gst::frame::FrameBuffer;
    use crate::gst::handler::HandlerError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Scripted(VecDeque<PullOutcome>);

    impl FrameStream for Scripted {
        fn pull(&mut self, timeout: Duration) -> Result<PullOutcome, SourceError> {
            match self.0.pop_front() {
                Some(outcome) => Ok(outcome),
                None => {
                    thread::sleep(timeout);
                    Ok(PullOutcome::Timeout)
                }
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        seqns: Mutex<Vec<u64>>,
    }

    impl FrameHandler for Recorder {
        fn frame_ready(
            &self,
            _context: &CallbackContext,
            frame: &FrameBuffer<'_>,
        ) -> Result<(), HandlerError> {
            self.seqns.lock().push(frame.seqn());
            Ok(())
        }
    }

    fn frames(n: usize) -> VecDeque<PullOutcome> {
        (0..n)
            .map(|i| PullOutcome::Frame(PulledFrame::owned(vec![i as u8; 8], i as f64)))
            .collect()
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(
            FrameSource::new("", &SourceConfig::default()),
            Err(SourceError::EmptyUrl)
        ));
    }

    #[test]
    fn test_start_requires_initialize_and_handler() {
        let mut source = FrameSource::new("/tmp/none.mkv", &SourceConfig::default()).unwrap();
        assert!(matches!(source.start(), Err(SourceError::NoHandler)));

        source
            .set_frame_handler(Arc::new(Recorder::default()), CallbackContext::new("test"))
            .unwrap();
        assert!(matches!(source.start(), Err(SourceError::NotInitialized)));
        assert!(matches!(
            source.get_stream_metadata(),
            Err(SourceError::NotInitialized)
        ));
    }

    #[test]
    fn test_second_handler_rejected() {
        let mut source = FrameSource::from_stream(
            "test",
            Box::new(Scripted(VecDeque::new())),
            &SourceConfig::default(),
        );
        source
            .set_frame_handler(Arc::new(Recorder::default()), CallbackContext::new("a"))
            .unwrap();
        assert!(matches!(
            source.set_frame_handler(Arc::new(Recorder::default()), CallbackContext::new("b")),
            Err(SourceError::HandlerAlreadyRegistered)
        ));
    }

    #[test]
    fn test_initialize_missing_file_fails() {
        gst::init().unwrap();
        if gst::ElementFactory::find("matroskademux").is_none() {
            println!("matroskademux not available, skipping test");
            return;
        }

        let mut source =
            FrameSource::new("/nonexistent/vidlink/input.mkv", &SourceConfig::default()).unwrap();
        let result = source.initialize();
        assert!(matches!(result, Err(SourceError::StateChange { .. })));
        assert!(matches!(
            source.get_stream_metadata(),
            Err(SourceError::NotInitialized)
        ));
    }

    /// Encode a short Matroska clip, or `None` when the plugins are missing.
    fn write_test_clip(dir: &std::path::Path) -> Option<std::path::PathBuf> {
        let needed = ["videotestsrc", "matroskamux", "matroskademux", "filesink"];
        if needed.iter().any(|f| gst::ElementFactory::find(f).is_none()) {
            return None;
        }

        let path = dir.join("clip.mkv");
        let pipeline = gst::parse::launch(&format!(
            "videotestsrc num-buffers=5 ! video/x-raw,format=I420,width=64,height=48,framerate=25/1 \
             ! matroskamux ! filesink location=\"{}\"",
            path.display()
        ))
        .unwrap();
        pipeline.set_state(gst::State::Playing).unwrap();
        let bus = pipeline.bus().unwrap();
        let msg = bus
            .timed_pop_filtered(
                gst::ClockTime::from_seconds(10),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            )
            .unwrap();
        assert_eq!(msg.type_(), gst::MessageType::Eos);
        pipeline.set_state(gst::State::Null).unwrap();
        Some(path)
    }

    #[test]
    fn test_metadata_available_right_after_initialize() {
        gst::init().unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let Some(clip) = write_test_clip(temp_dir.path()) else {
            println!("matroska/videotestsrc plugins not available, skipping test");
            return;
        };

        let mut source =
            FrameSource::new(clip.to_string_lossy(), &SourceConfig::default()).unwrap();
        source.initialize().unwrap();

        let metadata = source.get_stream_metadata().unwrap();
        assert!(metadata.starts_with("video/x-raw"), "metadata: {metadata}");
        assert!(metadata.contains("width=(int)64"), "metadata: {metadata}");
        assert!(source.is_metadata_compatible("video/x-raw").unwrap());
        assert!(!source.is_metadata_compatible("audio/x-raw").unwrap());

        source.stop().unwrap();
    }

    #[test]
    fn test_stop_cancels_running_worker() {
        let settings = SourceConfig {
            pull_timeout_ms: 5,
            ..SourceConfig::default()
        };
        let mut source =
            FrameSource::from_stream("idle", Box::new(Scripted(frames(2))), &settings);
        let recorder = Arc::new(Recorder::default());
        source
            .set_frame_handler(recorder.clone(), CallbackContext::new("idle"))
            .unwrap();
        source.start().unwrap();
        assert!(matches!(source.start(), Err(SourceError::AlreadyStarted)));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recorder.seqns.lock().len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(source.stop().unwrap(), Some(LoopExit::Cancelled));
        assert!(!source.is_running());
        assert_eq!(recorder.seqns.lock().as_slice(), &[0, 1]);
    }

    #[test]
    fn test_shared_counter_spans_sources() {
        let counter = SequenceCounter::new();
        let recorder = Arc::new(Recorder::default());

        for label in ["first", "second"] {
            let mut source = FrameSource::from_stream(
                label,
                Box::new(Scripted({
                    let mut script = frames(2);
                    script.push_back(PullOutcome::EndOfStream);
                    script
                })),
                &SourceConfig::default(),
            )
            .with_counter(counter.clone());
            source
                .set_frame_handler(recorder.clone(), CallbackContext::new(label))
                .unwrap();
            source.start().unwrap();
            assert_eq!(source.wait().unwrap(), LoopExit::EndOfStream);
        }

        assert_eq!(recorder.seqns.lock().as_slice(), &[0, 1, 2, 3]);
        assert_eq!(counter.peek(), 4);
    }
}
