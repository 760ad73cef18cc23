//! Vigil detection kernel.
//!
//! This crate implements the detection orchestration engine behind `vigild`:
//! 24/7 watch over one live video source, periodic frame sampling through a
//! cascade of perception filters, and deduplicated alerts out to a
//! notification channel. It is built to run unattended — source disconnects
//! and perception failures are survived indefinitely.
//!
//! # Architecture
//!
//! - `source`: the `CameraAdapter` capability and the `LiveSource`
//!   connection-resilience state machine (probe-validated connect, 3-strike
//!   escalation, capped exponential backoff).
//! - `detect`: perception seam (`PerceptionProvider`) and the frame-to-frame
//!   `MotionDifferencer`.
//! - `alert`: alert composition, the `AlertDispatcher` capability, and the
//!   fingerprint-based `AlertDeduplicator`.
//! - `scheduler`: the tick-driven `SamplingScheduler` that wires the above
//!   together under interval/cooldown gates.
//! - `control`: state shared with the inbound command path plus the local
//!   control endpoint.
//! - `clock`, `config`, `error`: monotonic time, daemon configuration, and
//!   the source failure taxonomy.

pub mod alert;
pub mod clock;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod frame;
pub mod scheduler;
pub mod source;

pub use alert::{
    Alert, AlertCategory, AlertDeduplicator, AlertDispatcher, AlertMetadata, LogDispatcher,
};
#[cfg(feature = "alert-mqtt")]
pub use alert::{MqttDispatcher, MqttDispatcherConfig};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::VigildConfig;
pub use control::{ControlConfig, ControlServer, ControlState};
pub use detect::{
    BoundingBox, Detection, MotionConfig, MotionDifferencer, MotionResult, PerceptionProvider,
    Region, StubPresenceProvider,
};
pub use error::SourceError;
pub use frame::{Frame, SourceProperties};
pub use scheduler::{EngineStats, SamplingScheduler, SchedulerConfig};
#[cfg(feature = "ingest-http")]
pub use source::{HttpCamera, HttpCameraConfig};
pub use source::{
    backoff_delay, CameraAdapter, CameraScript, LiveSource, RtspCamera, RtspCameraConfig,
    ScriptedCamera, SourceStatus,
};
