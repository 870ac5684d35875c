//! Render topology strategies.
//!
//! Each strategy yields a `gst-launch` description containing an appsrc named
//! [`SOURCE_ADAPTER_NAME`] and, where the surface supports it, a render sink
//! named [`RENDER_SURFACE_NAME`]. The strategy is picked from configuration at
//! startup rather than compiled in per platform.

use vidlink_types::RenderTopologyKind;

/// Name of the appsrc frames are injected into.
pub const SOURCE_ADAPTER_NAME: &str = "src";

/// Name of the render surface element.
pub const RENDER_SURFACE_NAME: &str = "sink";

/// Default appsrc caps for the X-window chain.
pub const XWINDOW_DEFAULT_CAPS: &str =
    "video/x-vp8, width=(int)640, height=(int)360, framerate=(fraction)25/1";

/// Default appsrc caps for the DirectDraw chain.
pub const DIRECTDRAW_DEFAULT_CAPS: &str = "video/x-vp8, width=(int)640, height=(int)360, \
     pixel-aspect-ratio=(fraction)1/1, framerate=(fraction)1000/1";

/// Builder of a render pipeline description.
pub trait RenderTopology: Send + Sync {
    fn name(&self) -> &str;

    fn launch_description(&self) -> String;
}

fn appsrc_stage(caps: &str) -> String {
    format!(
        "appsrc name=\"{}\" is-live=true do-timestamp=true format=time caps=\"{}\"",
        SOURCE_ADAPTER_NAME, caps
    )
}

/// VP8 decode into an X11 `ximagesink`.
#[derive(Debug, Clone)]
pub struct XWindowTopology {
    caps: String,
}

impl XWindowTopology {
    pub fn new(caps: Option<&str>) -> Self {
        Self {
            caps: caps.unwrap_or(XWINDOW_DEFAULT_CAPS).to_string(),
        }
    }
}

impl RenderTopology for XWindowTopology {
    fn name(&self) -> &str {
        "xwindow"
    }

    fn launch_description(&self) -> String {
        format!(
            "{} ! queue2 ! vp8dec ! videoconvert ! ximagesink name=\"{}\" sync=false",
            appsrc_stage(&self.caps),
            RENDER_SURFACE_NAME
        )
    }
}

/// VP8 decode into a Windows `directdrawsink`.
#[derive(Debug, Clone)]
pub struct DirectDrawTopology {
    caps: String,
}

impl DirectDrawTopology {
    pub fn new(caps: Option<&str>) -> Self {
        Self {
            caps: caps.unwrap_or(DIRECTDRAW_DEFAULT_CAPS).to_string(),
        }
    }
}

impl RenderTopology for DirectDrawTopology {
    fn name(&self) -> &str {
        "directdraw"
    }

    fn launch_description(&self) -> String {
        format!(
            "{} ! queue2 ! vp8dec ! queue2 ! videoconvert ! directdrawsink name=\"{}\"",
            appsrc_stage(&self.caps),
            RENDER_SURFACE_NAME
        )
    }
}

/// Caller-supplied launch description, for hosts with their own render chain.
#[derive(Debug, Clone)]
pub struct LaunchTopology {
    name: String,
    description: String,
}

impl LaunchTopology {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl RenderTopology for LaunchTopology {
    fn name(&self) -> &str {
        &self.name
    }

    fn launch_description(&self) -> String {
        self.description.clone()
    }
}

/// Resolve a configured topology kind to a strategy.
pub fn select(kind: RenderTopologyKind, caps: Option<&str>) -> Box<dyn RenderTopology> {
    match kind {
        RenderTopologyKind::XWindow => Box::new(XWindowTopology::new(caps)),
        RenderTopologyKind::DirectDraw => Box::new(DirectDrawTopology::new(caps)),
        RenderTopologyKind::Auto if cfg!(windows) => Box::new(DirectDrawTopology::new(caps)),
        RenderTopologyKind::Auto => Box::new(XWindowTopology::new(caps)),
    }
}
