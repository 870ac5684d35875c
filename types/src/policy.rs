//! Frame source and render topology selection.

use serde::{Deserialize, Serialize};

/// What a frame source does with a pulled frame larger than the buffer capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Drop the frame and report it; no sequence number is consumed.
    #[default]
    Reject,
    /// Forward only the first `capacity` bytes.
    Truncate,
}

/// Decode topology used by a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceTopologyKind {
    /// `filesrc ! matroskademux ~> appsink`
    #[default]
    Direct,
    /// `filesrc ! matroskademux ~> matroskamux streamable=true ! appsink`
    Remux,
}

/// Render topology used by a display sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenderTopologyKind {
    /// Pick by the platform the process runs on
    #[default]
    Auto,
    /// X11 `ximagesink` chain
    XWindow,
    /// Windows `directdrawsink` chain
    DirectDraw,
}
