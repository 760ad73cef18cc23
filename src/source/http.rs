//! HTTP still-camera adapter.
//!
//! Many IP cameras expose a JPEG snapshot endpoint alongside (or instead of)
//! an RTSP stream. `HttpCamera` polls such an endpoint: every `read()` is one
//! GET returning one JPEG, decoded in memory. That polling model matches the
//! engine's sampling cadence; continuous MJPEG streams are not consumed here.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use crate::frame::{Frame, SourceProperties};
use crate::source::CameraAdapter;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Configuration for an HTTP still camera.
#[derive(Clone, Debug)]
pub struct HttpCameraConfig {
    /// Snapshot URL, http(s) scheme (e.g., "http://192.168.1.20/snapshot.jpg").
    pub url: String,
    /// Nominal frame rate reported in properties.
    pub fps: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpCameraConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/snapshot.jpg".to_string(),
            fps: 1,
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP snapshot camera adapter.
pub struct HttpCamera {
    config: HttpCameraConfig,
    agent: ureq::Agent,
    connected: bool,
    last_dimensions: Option<(u32, u32)>,
}

impl HttpCamera {
    pub fn new(config: HttpCameraConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse http camera url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported http camera scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout_read(config.timeout)
            .build();
        Ok(Self {
            config,
            agent,
            connected: false,
            last_dimensions: None,
        })
    }

    fn fetch_jpeg(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .context("fetch snapshot")?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .context("read snapshot body")?;
        if bytes.len() > MAX_JPEG_BYTES {
            return Err(anyhow!("snapshot exceeds {} bytes", MAX_JPEG_BYTES));
        }
        Ok(bytes)
    }
}

impl CameraAdapter for HttpCamera {
    /// "Connecting" an HTTP camera means proving the endpoint answers; the
    /// probe reads issued by `LiveSource::connect` do the real validation.
    fn connect(&mut self) -> Result<()> {
        self.fetch_jpeg().context("http camera unreachable")?;
        self.connected = true;
        log::info!("HttpCamera: connected to {}", self.config.url);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("http camera is not connected"));
        }
        let bytes = self.fetch_jpeg()?;
        let decoded = image::load_from_memory(&bytes).context("decode snapshot jpeg")?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        self.last_dimensions = Some((width, height));
        Ok(Frame::new(rgb.into_raw(), width, height))
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn properties(&self) -> SourceProperties {
        let (width, height) = self.last_dimensions.unwrap_or((0, 0));
        SourceProperties {
            width,
            height,
            fps: self.config.fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        let config = HttpCameraConfig {
            url: "rtsp://camera/stream".to_string(),
            ..HttpCameraConfig::default()
        };
        assert!(HttpCamera::new(config).is_err());
    }

    #[test]
    fn read_requires_connect() {
        let mut camera = HttpCamera::new(HttpCameraConfig::default()).unwrap();
        assert!(camera.read().is_err());
    }
}
