//! Generated frames for tests and demos (`stub://` locators).
//!
//! The scene is a dark background with one checker-textured square that moves
//! right by a few pixels per frame and wraps around. Frames are produced on
//! demand, so the pipeline never holds more than the frame being pulled.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::frame::VideoFrame;
use crate::ingest::pipeline::{ControlSignal, MediaPipeline};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STEP_PX: u32 = 4;
const CELL_PX: u32 = 8;
const BACKGROUND: [u8; 3] = [16, 16, 16];
const LIGHT: [u8; 3] = [230, 230, 230];
const DARK: [u8; 3] = [90, 90, 90];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frames before end-of-stream; `None` runs forever.
    pub frames: Option<u64>,
    /// Report a decoder error once this many frames were delivered.
    pub error_after: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames: None,
            error_after: None,
        }
    }
}

impl SyntheticConfig {
    pub(crate) fn from_url(url: &Url) -> Result<Self> {
        let mut config = Self {
            name: url
                .host_str()
                .filter(|h| !h.is_empty())
                .unwrap_or("synthetic")
                .to_string(),
            ..Self::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => config.frames = Some(parse_query(&key, &value)?),
                "width" => config.width = parse_query(&key, &value)?,
                "height" => config.height = parse_query(&key, &value)?,
                "error_after" => config.error_after = Some(parse_query(&key, &value)?),
                other => return Err(anyhow!("unknown stub:// parameter '{}'", other)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub:// frame dimensions must be non-zero"));
        }
        Ok(config)
    }
}

fn parse_query<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid stub:// parameter {}={}", key, value))
}

pub struct SyntheticPipeline {
    config: SyntheticConfig,
    started: bool,
    delivered: u64,
    control: VecDeque<ControlSignal>,
    terminal_sent: bool,
}

impl SyntheticPipeline {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            started: false,
            delivered: 0,
            control: VecDeque::new(),
            terminal_sent: false,
        }
    }

    fn signal_terminal(&mut self, signal: ControlSignal) {
        if !self.terminal_sent {
            self.terminal_sent = true;
            self.control.push_back(signal);
        }
    }

    fn render(&self, index: u64) -> Result<VideoFrame> {
        let (w, h) = (self.config.width, self.config.height);
        let side = (w.min(h) / 8).max(2);
        let travel = w.saturating_sub(side).max(1) as u64;
        let x0 = ((index * STEP_PX as u64) % travel) as u32;
        let y0 = h.saturating_sub(side) / 2;

        let mut pixels = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
                let color = if !inside {
                    BACKGROUND
                } else if ((x - x0) / CELL_PX + (y - y0) / CELL_PX) % 2 == 0 {
                    LIGHT
                } else {
                    DARK
                };
                pixels.extend_from_slice(&color);
            }
        }
        VideoFrame::new(pixels, w, h)
    }
}

impl MediaPipeline for SyntheticPipeline {
    fn describe(&self) -> String {
        format!(
            "stub://{} ({}x{}, synthetic)",
            self.config.name, self.config.width, self.config.height
        )
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        self.control.push_back(ControlSignal::Ready);
        Ok(())
    }

    fn poll_control(&mut self, _timeout: Duration) -> Option<ControlSignal> {
        self.control.pop_front()
    }

    fn pull_frame(&mut self, _timeout: Duration) -> Result<Option<VideoFrame>> {
        if !self.started {
            return Err(anyhow!("synthetic pipeline is not started"));
        }
        if self.config.error_after == Some(self.delivered) {
            let message = format!("synthetic decoder failure after {} frames", self.delivered);
            self.signal_terminal(ControlSignal::Error(message));
            return Ok(None);
        }
        if self.config.frames == Some(self.delivered) {
            self.signal_terminal(ControlSignal::EndOfStream);
            return Ok(None);
        }
        let frame = self.render(self.delivered)?;
        self.delivered += 1;
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.started = false;
        self.control.clear();
    }
}
