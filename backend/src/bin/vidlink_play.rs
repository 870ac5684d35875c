//! Play a Matroska file through a frame source into a trace file or a
//! display window.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use vidlink::config::Config;
use vidlink::gst::{CallbackContext, DisplaySink, FrameHandler, FrameSource, LoopExit, TraceSink};

/// Vidlink - push decoded video frames to a display or a timing trace
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Matroska file to read
    input: PathBuf,

    /// Config file merged over the default config locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write one timing line per frame to this file
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Render frames in a window instead of tracing them
    #[arg(long)]
    display: bool,

    /// Caps of a remote consumer to check against the source before playing
    #[arg(long)]
    remote_caps: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.config.as_deref(), args.trace.clone(), args.log_level)?;
    let _log_guard = vidlink::logging::init(&config.logging)?;

    gstreamer::init().context("Failed to initialize GStreamer")?;

    let input = args.input.to_string_lossy().into_owned();
    let mut source = FrameSource::new(input.clone(), &config.source)?;
    source
        .initialize()
        .with_context(|| format!("Failed to initialize video source {}", input))?;

    if let Some(remote) = args.remote_caps.as_deref() {
        match source.is_metadata_compatible(remote) {
            Ok(true) => info!("Source caps are compatible with {}", remote),
            Ok(false) => anyhow::bail!("Source caps are not compatible with {}", remote),
            Err(e) => anyhow::bail!("Could not compare source caps with {}: {}", remote, e),
        }
    }

    let handler: Arc<dyn FrameHandler> = if args.display {
        let sink = DisplaySink::new("display", &config.display);
        if !sink.is_ready() {
            anyhow::bail!("Display pipeline could not be created");
        }
        Arc::new(sink)
    } else {
        let path = config
            .trace
            .path
            .clone()
            .context("Nothing to do: pass --trace <file> or --display")?;
        let sink = TraceSink::create(&path);
        if !sink.is_open() {
            anyhow::bail!("Could not open trace file {}", path.display());
        }
        Arc::new(sink)
    };

    source.set_frame_handler(handler, CallbackContext::new(input.clone()))?;

    let cancel = source.cancellation_token();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }

    source.start()?;
    info!("Playing {}", input);

    match source.wait()? {
        LoopExit::EndOfStream => info!("Finished {}", input),
        LoopExit::Cancelled => info!("Interrupted"),
        LoopExit::Failed(reason) => error!("Video source failed: {}", reason),
    }

    let status = source.priority_status();
    if status.error.is_some() {
        warn!("Worker priority: {:?}", status);
    }

    source.stop()?;
    Ok(())
}
