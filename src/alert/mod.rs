//! Alert composition and dispatch.
//!
//! The engine emits alerts through the `AlertDispatcher` capability; what
//! happens on the other side (a chat bot, MQTT, a pager) is a deployment
//! concern. `LogDispatcher` is the built-in sink; `MqttDispatcher` ships
//! behind the `alert-mqtt` feature.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::detect::Detection;
use crate::frame::Frame;

pub mod dedup;
#[cfg(feature = "alert-mqtt")]
pub mod mqtt;

pub use dedup::AlertDeduplicator;
#[cfg(feature = "alert-mqtt")]
pub use mqtt::{MqttDispatcher, MqttDispatcherConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Motion,
    Presence,
    SourceDown,
    SourceRestored,
}

/// Operator-facing alert metadata. Timestamps here are wall-clock epoch
/// seconds (for humans); the engine's own gates run on the monotonic clock.
#[derive(Clone, Debug, Serialize)]
pub struct AlertMetadata {
    pub category: AlertCategory,
    pub epoch_s: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_percentage: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detections: Vec<Detection>,
    /// Recognized-identity labels carried by identity providers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
}

impl AlertMetadata {
    pub fn status(category: AlertCategory, message: String) -> Self {
        Self {
            category,
            epoch_s: now_epoch_s(),
            message,
            motion_percentage: None,
            detections: Vec::new(),
            identities: Vec::new(),
        }
    }
}

/// One outgoing alert. The frame, when present, is the sampled frame that
/// triggered the alert; dispatchers that forward images encode it as JPEG.
pub struct Alert<'a> {
    pub metadata: AlertMetadata,
    pub frame: Option<&'a Frame>,
}

/// Alert delivery capability.
pub trait AlertDispatcher: Send {
    fn send(&mut self, alert: &Alert<'_>) -> Result<()>;
}

/// Built-in sink that writes alerts to the log.
pub struct LogDispatcher;

impl AlertDispatcher for LogDispatcher {
    fn send(&mut self, alert: &Alert<'_>) -> Result<()> {
        log::info!(
            "ALERT {:?}: {}{}",
            alert.metadata.category,
            alert.metadata.message,
            match alert.frame {
                Some(frame) => format!(" [{}x{} frame]", frame.width, frame.height),
                None => String::new(),
            }
        );
        Ok(())
    }
}

/// Encode a frame as JPEG for outward delivery.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80);
    encoder
        .encode(
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .context("encode alert frame as jpeg")?;
    Ok(out)
}

pub fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
