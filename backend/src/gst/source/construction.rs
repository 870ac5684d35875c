//! Decode topology for a frame source.
//!
//! `filesrc ! matroskademux` with the demuxer's video pads linked, as they
//! appear, either straight to the appsink or through a streamable
//! `matroskamux`. Audio and subtitle pads are left unlinked.

use super::SourceError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, error, info};
use vidlink_types::SourceTopologyKind;

/// Name of the appsink frames are pulled from.
pub const SINK_ADAPTER_NAME: &str = "appsink";

pub(crate) struct SourcePipeline {
    pub pipeline: gst::Pipeline,
    pub appsink: gst_app::AppSink,
}

fn make_element(factory: &str, name: &str) -> Result<gst::Element, SourceError> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| {
            error!("Error creating {}: {}", factory, e);
            SourceError::ElementCreation {
                element: factory.to_string(),
                reason: e.to_string(),
            }
        })
}

/// Whether a demuxer pad carries video.
pub fn is_video_pad(pad: &gst::Pad) -> bool {
    if pad.name().starts_with("video") {
        return true;
    }
    pad.current_caps()
        .as_ref()
        .and_then(|caps| caps.structure(0))
        .map(|s| s.name().starts_with("video/"))
        .unwrap_or(false)
}

/// Build the decode pipeline for `url`. The pipeline is left in NULL.
pub(crate) fn build(url: &str, kind: SourceTopologyKind) -> Result<SourcePipeline, SourceError> {
    let pipeline = gst::Pipeline::with_name("video_source_pipeline");

    let filesrc = gst::ElementFactory::make("filesrc")
        .name("filesrc")
        .property("location", url)
        .build()
        .map_err(|e| {
            error!("Error creating file source: {}", e);
            SourceError::ElementCreation {
                element: "filesrc".to_string(),
                reason: e.to_string(),
            }
        })?;
    let demux = make_element("matroskademux", "demux")?;
    let appsink = gst_app::AppSink::builder().name(SINK_ADAPTER_NAME).build();

    pipeline
        .add_many([&filesrc, &demux, appsink.upcast_ref()])
        .map_err(|e| SourceError::Bin(e.to_string()))?;

    filesrc.link(&demux).map_err(|e| {
        error!("Failed to link file source and matroskademux: {}", e);
        SourceError::Link {
            from: "filesrc".to_string(),
            to: "demux".to_string(),
            reason: e.to_string(),
        }
    })?;

    let link_target = match kind {
        SourceTopologyKind::Direct => appsink.clone().upcast::<gst::Element>(),
        SourceTopologyKind::Remux => {
            let muxer = gst::ElementFactory::make("matroskamux")
                .name("muxer")
                .property("streamable", true)
                .build()
                .map_err(|e| SourceError::ElementCreation {
                    element: "matroskamux".to_string(),
                    reason: e.to_string(),
                })?;
            pipeline
                .add(&muxer)
                .map_err(|e| SourceError::Bin(e.to_string()))?;
            muxer.link(&appsink).map_err(|e| {
                error!("Failed to link muxer and appsink: {}", e);
                SourceError::Link {
                    from: "muxer".to_string(),
                    to: SINK_ADAPTER_NAME.to_string(),
                    reason: e.to_string(),
                }
            })?;
            muxer
        }
    };

    let target_weak = link_target.downgrade();
    demux.connect_pad_added(move |_demux, pad| {
        let pad_name = pad.name();
        if !is_video_pad(pad) {
            debug!("Ignoring non-video demuxer pad {}", pad_name);
            return;
        }
        let Some(target) = target_weak.upgrade() else {
            return;
        };

        let sink_pad = match kind {
            SourceTopologyKind::Direct => target.static_pad("sink"),
            SourceTopologyKind::Remux => target.request_pad_simple("video_%u"),
        };
        let Some(sink_pad) = sink_pad else {
            error!("No sink pad available on {} for {}", target.name(), pad_name);
            return;
        };
        if sink_pad.is_linked() {
            debug!("{} already linked, ignoring {}", target.name(), pad_name);
            return;
        }

        match pad.link(&sink_pad) {
            Ok(_) => info!("Linked demuxer pad {} to {}", pad_name, target.name()),
            Err(e) => error!(
                "Failed to link demuxer pad {} to {}: {:?}",
                pad_name,
                target.name(),
                e
            ),
        }
    });

    Ok(SourcePipeline { pipeline, appsink })
}
