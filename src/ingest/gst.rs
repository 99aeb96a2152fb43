//! GStreamer decode graph.
//!
//! Files go through `filesrc ! decodebin`, network streams through
//! `rtspsrc ! decodebin`; both end in an RGB appsink that keeps one buffer and
//! drops older ones instead of blocking the decoder.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;

use crate::frame::{pack_rgb_rows, VideoFrame};
use crate::ingest::locator::Locator;
use crate::ingest::pipeline::{ControlSignal, MediaPipeline};

const SINK_NAME: &str = "frames";

pub struct GstPipeline {
    description: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    eos_reported: bool,
}

impl GstPipeline {
    pub fn new(locator: &Locator) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let head = match locator {
            Locator::File(path) => format!("filesrc location=\"{}\"", path.display()),
            Locator::Stream(url) => {
                format!("rtspsrc location={} latency=200 drop-on-late=true", url)
            }
            Locator::Synthetic(_) => {
                return Err(anyhow!("synthetic sources do not use gstreamer"));
            }
        };
        let description = format!(
            "{} ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name={} sync=false max-buffers=1 drop=true",
            head, SINK_NAME
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build gstreamer pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("gstreamer description is not a pipeline"))?;

        let appsink = pipeline
            .by_name(SINK_NAME)
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            description,
            pipeline,
            appsink,
            eos_reported: false,
        })
    }

    fn translate(&self, message: &gstreamer::Message) -> Option<ControlSignal> {
        use gstreamer::MessageView;
        match message.view() {
            MessageView::Error(err) => Some(ControlSignal::Error(format!(
                "{} (from {:?}): {}",
                err.error(),
                err.src().map(|s| s.path_string()),
                err.debug().map(|d| d.to_string()).unwrap_or_default()
            ))),
            MessageView::Eos(..) => Some(ControlSignal::EndOfStream),
            MessageView::StateChanged(change) => {
                let from_pipeline = message
                    .src()
                    .is_some_and(|src| src == self.pipeline.upcast_ref::<gstreamer::Object>());
                let ready = matches!(
                    change.current(),
                    gstreamer::State::Paused | gstreamer::State::Playing
                );
                (from_pipeline && ready).then_some(ControlSignal::Ready)
            }
            _ => None,
        }
    }
}

fn clock_time(timeout: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_nseconds(timeout.as_nanos().min(u64::MAX as u128) as u64)
}

impl MediaPipeline for GstPipeline {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set gstreamer pipeline to Playing")?;
        Ok(())
    }

    fn poll_control(&mut self, timeout: Duration) -> Option<ControlSignal> {
        let bus = self.pipeline.bus()?;
        let types = [
            gstreamer::MessageType::Error,
            gstreamer::MessageType::Eos,
            gstreamer::MessageType::StateChanged,
        ];
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let message = bus.timed_pop_filtered(clock_time(remaining), &types)?;
            // Element-level state changes are filtered here; keep waiting.
            if let Some(signal) = self.translate(&message) {
                return Some(signal);
            }
        }
    }

    fn pull_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>> {
        let Some(sample) = self.appsink.try_pull_sample(clock_time(timeout)) else {
            if self.appsink.is_eos() && !self.eos_reported {
                // The bus EOS can lag behind the sink draining; post our own.
                self.eos_reported = true;
                match self.pipeline.bus() {
                    Some(bus) => {
                        if let Err(e) = bus.post(gstreamer::message::Eos::new()) {
                            log::debug!("GstPipeline: failed to post fallback EOS: {}", e);
                        }
                    }
                    None => log::debug!("GstPipeline: no bus for fallback EOS"),
                }
            }
            return Ok(None);
        };

        let buffer = sample.buffer().context("sample missing buffer")?;
        let caps = sample.caps().context("sample missing caps")?;
        let info =
            gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;
        let width = info.width();
        let height = info.height();
        let stride = usize::try_from(info.stride()[0]).context("negative row stride")?;

        let map = buffer.map_readable().context("map gstreamer buffer")?;
        let pixels = pack_rgb_rows(map.as_slice(), width, height, stride)?;
        VideoFrame::new(pixels, width, height).map(Some)
    }

    fn stop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("GstPipeline: failed to set pipeline to Null: {}", e);
        }
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
