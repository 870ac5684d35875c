//! Pipeline state definitions.

use serde::{Deserialize, Serialize};

/// GStreamer pipeline state.
///
/// These states correspond to the GStreamer GST_STATE enum. Pipelines owned by
/// this crate move NULL -> READY -> PLAYING; PAUSED is only reported when some
/// other party drives the pipeline there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No pipeline, or construction failed
    #[default]
    Null,
    /// The pipeline is constructed and ready to go to PAUSED
    Ready,
    /// The pipeline is paused
    Paused,
    /// The pipeline is playing/running
    Playing,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Ready => write!(f, "READY"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Playing => write!(f, "PLAYING"),
        }
    }
}
