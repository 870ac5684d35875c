//! Capability descriptor comparison.
//!
//! Descriptors are GStreamer caps strings. Two descriptors are compatible
//! when every format one of them allows is also allowed by the other, in
//! either direction, so that a fixed producer format and a wider consumer
//! format negotiate regardless of which side asks.

use gstreamer as gst;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CapsError {
    #[error("Invalid capability descriptor {descriptor:?}: {reason}")]
    Parse { descriptor: String, reason: String },
}

/// Parse a capability descriptor into caps.
pub fn parse_descriptor(descriptor: &str) -> Result<gst::Caps, CapsError> {
    gst::Caps::from_str(descriptor).map_err(|e| {
        warn!("Failed to parse caps {:?}: {}", descriptor, e);
        CapsError::Parse {
            descriptor: descriptor.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Symmetric "always compatible" test between two descriptors.
///
/// A partial overlap (some but not all parameter assignments satisfy both
/// sides) is not compatible.
pub fn is_compatible(local: &str, remote: &str) -> Result<bool, CapsError> {
    let local_caps = parse_descriptor(local)?;
    let remote_caps = parse_descriptor(remote)?;

    let compatible = local_caps.is_always_compatible(&remote_caps)
        || remote_caps.is_always_compatible(&local_caps);

    debug!(
        "Caps compatibility {} <-> {}: {}",
        local_caps, remote_caps, compatible
    );
    Ok(compatible)
}
