//! FFmpeg decode graph.
//!
//! Demux and decode run on a worker thread. Frames cross a one-slot channel;
//! when the consumer is slow the worker evicts the stale frame before sending
//! the new one. Readiness, open failures, decode errors and EOS cross a second
//! channel so the consumer sees them the same way it sees GStreamer bus messages.
//!
//! Network inputs are opened with a socket timeout so a stalled camera fails
//! the blocking read, and `stop()` waits a bounded time for the worker before
//! detaching it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ffmpeg_next as ffmpeg;

use crate::frame::{pack_rgb_rows, VideoFrame};
use crate::ingest::handoff::{LatestSlot, Worker};
use crate::ingest::locator::Locator;
use crate::ingest::pipeline::{ControlSignal, MediaPipeline};

/// Socket read timeout for network inputs (ffmpeg `timeout` option, microseconds).
const NETWORK_TIMEOUT_US: u64 = 5_000_000;
/// How long `stop()` waits for the decode thread before detaching it.
const STOP_GRACE: Duration = Duration::from_secs(2);

pub struct FfmpegPipeline {
    target: String,
    live: bool,
    session: Option<Session>,
}

struct Session {
    frames: Receiver<VideoFrame>,
    control: Receiver<ControlSignal>,
    stop: Arc<AtomicBool>,
    worker: Worker,
}

impl FfmpegPipeline {
    pub fn new(locator: &Locator) -> Result<Self> {
        let target = match locator {
            Locator::File(path) => path.display().to_string(),
            Locator::Stream(url) => url.clone(),
            Locator::Synthetic(_) => return Err(anyhow!("synthetic sources do not use ffmpeg")),
        };
        Ok(Self {
            target,
            live: locator.is_live(),
            session: None,
        })
    }
}

impl MediaPipeline for FfmpegPipeline {
    fn describe(&self) -> String {
        format!("ffmpeg:{}", self.target)
    }

    fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(anyhow!("ffmpeg pipeline already started"));
        }
        let (frames, frame_rx) = LatestSlot::new();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let decoder = DecodeLoop {
            target: self.target.clone(),
            live: self.live,
            frames,
            control: control_tx,
            stop: stop.clone(),
        };
        let worker = Worker::spawn("ffmpeg-decode", move || decoder.run())
            .context("spawn ffmpeg decode thread")?;

        self.session = Some(Session {
            frames: frame_rx,
            control: control_rx,
            stop,
            worker,
        });
        Ok(())
    }

    fn poll_control(&mut self, timeout: Duration) -> Option<ControlSignal> {
        let session = self.session.as_ref()?;
        if timeout.is_zero() {
            return session.control.try_recv().ok();
        }
        session.control.recv_timeout(timeout).ok()
    }

    fn pull_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("ffmpeg pipeline is not started"))?;
        match session.frames.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            // A finished worker has already reported why on the control channel.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.stop.store(true, Ordering::SeqCst);
        if !session.worker.join_within(STOP_GRACE) {
            // Still blocked inside ffmpeg; it exits on its own once the read returns.
            log::warn!(
                "FfmpegPipeline: decode thread for {} did not stop within {:?}, detaching",
                self.target,
                STOP_GRACE
            );
        }
    }
}

impl Drop for FfmpegPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DecodeLoop {
    target: String,
    live: bool,
    frames: LatestSlot<VideoFrame>,
    control: Sender<ControlSignal>,
    stop: Arc<AtomicBool>,
}

impl DecodeLoop {
    fn run(self) {
        let signal = match self.decode() {
            Ok(()) if self.stopped() => return,
            Ok(()) => ControlSignal::EndOfStream,
            Err(e) => ControlSignal::Error(format!("{:#}", e)),
        };
        let _ = self.control.send(signal);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn decode(&self) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut input = self
            .open_input()
            .with_context(|| format!("failed to open '{}' with ffmpeg", self.target))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("input has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let mut decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let _ = self.control.send(ControlSignal::Ready);

        for (stream, packet) in input.packets() {
            if self.stopped() {
                return Ok(());
            }
            if stream.index() != stream_index {
                continue;
            }
            decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            self.drain(&mut decoder, &mut scaler)?;
        }
        decoder.send_eof().context("flush ffmpeg decoder")?;
        self.drain(&mut decoder, &mut scaler)
    }

    fn open_input(&self) -> Result<ffmpeg::format::context::Input> {
        if !self.live {
            return Ok(ffmpeg::format::input(&self.target)?);
        }
        let mut options = ffmpeg::Dictionary::new();
        if self.target.starts_with("rtsp") {
            options.set("rtsp_transport", "tcp");
        }
        options.set("timeout", &NETWORK_TIMEOUT_US.to_string());
        Ok(ffmpeg::format::input_with_dictionary(&self.target, options)?)
    }

    fn drain(
        &self,
        decoder: &mut ffmpeg::codec::decoder::Video,
        scaler: &mut ffmpeg::software::scaling::Context,
    ) -> Result<()> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb = ffmpeg::frame::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            scaler
                .run(&decoded, &mut rgb)
                .context("scale frame to RGB")?;
            let pixels = pack_rgb_rows(rgb.data(0), rgb.width(), rgb.height(), rgb.stride(0))?;
            self.frames
                .offer(VideoFrame::new(pixels, rgb.width(), rgb.height())?);
        }
        Ok(())
    }
}
