use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::ingest::synthetic::SyntheticConfig;

pub const STUB_SCHEME: &str = "stub";
const STREAM_SCHEMES: [&str; 2] = ["rtsp", "rtsps"];

/// Where frames come from. Classification is purely syntactic.
#[derive(Clone, Debug, PartialEq)]
pub enum Locator {
    /// Live network stream (`rtsp://`, `rtsps://`).
    Stream(String),
    /// Local media file.
    File(PathBuf),
    /// Generated frames (`stub://name?frames=N&width=W&height=H&error_after=K`).
    Synthetic(SyntheticConfig),
}

impl Locator {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("source locator is empty"));
        }
        if !raw.contains("://") {
            return Ok(Locator::File(PathBuf::from(raw)));
        }

        let url = Url::parse(raw).with_context(|| format!("invalid source URL '{}'", raw))?;
        let scheme = url.scheme();
        if STREAM_SCHEMES.contains(&scheme) {
            return Ok(Locator::Stream(raw.to_string()));
        }
        if scheme == STUB_SCHEME {
            return Ok(Locator::Synthetic(SyntheticConfig::from_url(&url)?));
        }
        // `C://video.mp4` style drive paths parse as a one-letter scheme.
        if scheme.len() == 1 {
            return Ok(Locator::File(PathBuf::from(raw)));
        }
        Err(anyhow!(
            "unsupported source scheme '{}://' (expected a file path, rtsp:// or stub://)",
            scheme
        ))
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Locator::Stream(_))
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Stream(url) => write!(f, "{}", url),
            Locator::File(path) => write!(f, "{}", path.display()),
            Locator::Synthetic(cfg) => write!(f, "stub://{}", cfg.name),
        }
    }
}
