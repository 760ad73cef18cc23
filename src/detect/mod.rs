//! Perception providers.
//!
//! Providers are pluggable detectors invoked by the scheduler each cycle:
//! person presence, identity recognition, whatever a deployment wires in.
//! Their internals are opaque to the engine; the contract is one frame in,
//! zero or more labeled detections out, stateless from the scheduler's
//! perspective. A provider failure is isolated per provider and never
//! aborts the cycle.

use anyhow::Result;
use serde::Serialize;

use crate::frame::Frame;

pub mod motion;
pub mod stub;

pub use motion::{MotionConfig, MotionDifferencer, MotionResult, Region};
pub use stub::StubPresenceProvider;

/// Axis-aligned detection bounds, pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A labeled detection returned by a perception provider.
///
/// `label` is "person" for plain presence; identity providers put the
/// recognized name there instead.
#[derive(Clone, Debug, Serialize)]
pub struct Detection {
    pub bounds: BoundingBox,
    pub score: f32,
    pub label: String,
}

/// Pluggable perception capability.
pub trait PerceptionProvider: Send {
    /// Provider identifier, used in logs when a provider fails.
    fn name(&self) -> &'static str;

    /// Inspect one frame. Implementations must treat the frame as read-only
    /// and must not require lifecycle beyond construction.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}
