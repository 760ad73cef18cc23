//! Live source connection resilience.
//!
//! This module owns the connection to one video producer:
//! - `CameraAdapter` is the capability a camera/video integration provides
//!   (RTSP, HTTP stills, synthetic).
//! - `LiveSource` wraps an adapter in the connection state machine:
//!   probe-validated connect, consecutive-failure escalation, capped
//!   exponential backoff reconnect, and a non-consuming health check.
//!
//! The state machine is observable (status, counters, generation) but has no
//! outward notification responsibility; surfacing source-down/restored
//! events is the scheduler's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::SourceError;
use crate::frame::{Frame, SourceProperties};

pub mod rtsp;
pub mod stub;
#[cfg(feature = "ingest-http")]
pub mod http;

#[cfg(feature = "ingest-http")]
pub use http::{HttpCamera, HttpCameraConfig};
pub use rtsp::{RtspCamera, RtspCameraConfig};
pub use stub::{CameraScript, ScriptedCamera};

/// Camera adapter capability.
///
/// Implementations own the underlying stream handle. They report plain
/// errors; retry, escalation, and backoff policy all live in `LiveSource`.
pub trait CameraAdapter: Send {
    /// Open the underlying stream and apply buffering/format hints.
    fn connect(&mut self) -> Result<()>;

    /// Attempt one read. May block for up to one frame interval.
    fn read(&mut self) -> Result<Frame>;

    /// Release the underlying handle. Must be safe to call in any state.
    fn release(&mut self);

    fn properties(&self) -> SourceProperties;
}

/// Connection states. Reified as an enum so illegal combinations of
/// "connected flag" and failure counters cannot be represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
    Failed,
}

/// Consecutive read failures that trigger a reconnect.
const READ_FAILURE_THRESHOLD: u32 = 3;
/// Probe reads attempted while validating a fresh connection.
const PROBE_READS: u32 = 5;
/// Probe reads that must succeed before the connection counts.
const PROBE_REQUIRED_SUCCESSES: u32 = 3;
const PROBE_SPACING: Duration = Duration::from_millis(100);
const BACKOFF_CAP_SECS: u64 = 30;
/// Granularity at which backoff sleeps poll the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Backoff before reconnect attempt `attempt` (0-based): 2, 4, 8, 16, 30,
/// 30, ... seconds. The cap bounds the worst-case reconnect storm rate
/// while the early doubling recovers quickly from transient drops.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .saturating_pow(attempt.saturating_add(1))
        .min(BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

/// Connection-resilience state machine for one live source.
pub struct LiveSource {
    adapter: Box<dyn CameraAdapter>,
    status: SourceStatus,
    consecutive_failures: u32,
    last_frame_at: Option<Duration>,
    /// Bumped on every successful (re)connect. Downstream state that assumes
    /// frame-to-frame continuity (the motion baseline) resets when it moves.
    generation: u64,
    max_reconnect_attempts: u32,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
}

impl LiveSource {
    pub fn new(
        adapter: Box<dyn CameraAdapter>,
        max_reconnect_attempts: u32,
        clock: Arc<dyn Clock>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            status: SourceStatus::Disconnected,
            consecutive_failures: 0,
            last_frame_at: None,
            generation: 0,
            max_reconnect_attempts,
            clock,
            shutdown,
        }
    }

    pub fn status(&self) -> SourceStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_frame_at(&self) -> Option<Duration> {
        self.last_frame_at
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn properties(&self) -> SourceProperties {
        self.adapter.properties()
    }

    /// Open and validate the connection.
    ///
    /// A source that "opens" but never delivers usable frames must not count
    /// as connected, so the handle is probed with up to five reads 100ms
    /// apart and the connection is declared good on the third success.
    /// Anything less releases the handle and reports failure.
    pub fn connect(&mut self) -> Result<(), SourceError> {
        self.status = SourceStatus::Connecting;
        if let Err(err) = self.adapter.connect() {
            self.adapter.release();
            self.status = SourceStatus::Disconnected;
            return Err(SourceError::Adapter(err));
        }

        let mut successes = 0u32;
        for _ in 0..PROBE_READS {
            if self.adapter.read().is_ok() {
                successes += 1;
                if successes >= PROBE_REQUIRED_SUCCESSES {
                    self.status = SourceStatus::Connected;
                    self.consecutive_failures = 0;
                    self.last_frame_at = Some(self.clock.now());
                    self.generation += 1;
                    log::info!(
                        "source connected (probe {}/{} reads ok)",
                        successes,
                        PROBE_READS
                    );
                    return Ok(());
                }
            }
            self.clock.sleep(PROBE_SPACING);
        }

        self.adapter.release();
        self.status = SourceStatus::Disconnected;
        log::warn!(
            "source opened but failed probe validation ({}/{} reads ok)",
            successes,
            PROBE_READS
        );
        Err(SourceError::ProbeFailed {
            successes,
            attempted: PROBE_READS,
        })
    }

    /// Attempt one read.
    ///
    /// A success resets the failure counter. A failure increments it; the
    /// third consecutive failure escalates to `reconnect()`. Even when that
    /// reconnect succeeds the triggering cycle gets no frame, so the caller
    /// still sees a transient failure for this read.
    pub fn read(&mut self) -> Result<Frame, SourceError> {
        match self.status {
            SourceStatus::Connected | SourceStatus::Degraded => {}
            _ => return Err(SourceError::NotConnected),
        }

        match self.adapter.read() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                self.status = SourceStatus::Connected;
                self.last_frame_at = Some(self.clock.now());
                Ok(frame)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                log::warn!(
                    "frame read failed ({} consecutive): {}",
                    self.consecutive_failures,
                    err
                );
                if self.consecutive_failures >= READ_FAILURE_THRESHOLD {
                    self.status = SourceStatus::Reconnecting;
                    self.reconnect(self.max_reconnect_attempts)?;
                    return Err(SourceError::TransientRead {
                        consecutive: READ_FAILURE_THRESHOLD,
                    });
                }
                self.status = SourceStatus::Degraded;
                Err(SourceError::TransientRead {
                    consecutive: self.consecutive_failures,
                })
            }
        }
    }

    /// Release the handle and retry `connect()` with capped exponential
    /// backoff. First success wins; exhausting every attempt is fatal for
    /// this source. Backoff sleeps poll the shutdown flag so cancellation
    /// does not wait out a 30-second delay.
    pub fn reconnect(&mut self, max_attempts: u32) -> Result<(), SourceError> {
        self.status = SourceStatus::Reconnecting;
        self.adapter.release();
        self.consecutive_failures = 0;

        for attempt in 0..max_attempts {
            let delay = backoff_delay(attempt);
            log::info!(
                "reconnect attempt {}/{} in {}s",
                attempt + 1,
                max_attempts,
                delay.as_secs()
            );
            self.interruptible_sleep(delay)?;

            match self.connect() {
                Ok(()) => {
                    log::info!("reconnect succeeded on attempt {}", attempt + 1);
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("reconnect attempt {} failed: {}", attempt + 1, err);
                    self.status = SourceStatus::Reconnecting;
                }
            }
        }

        self.status = SourceStatus::Failed;
        log::error!(
            "source failed: {} reconnect attempts exhausted",
            max_attempts
        );
        Err(SourceError::ConnectionLost {
            attempts: max_attempts,
        })
    }

    /// Non-consuming probe read.
    ///
    /// Used by the scheduler's periodic check, decoupled from the sampling
    /// cadence; it does not touch the failure counter the main cycle uses.
    pub fn health_check(&mut self) -> Result<(), SourceError> {
        match self.status {
            SourceStatus::Connected | SourceStatus::Degraded => {}
            _ => return Err(SourceError::NotConnected),
        }
        self.adapter
            .read()
            .map(|_| ())
            .map_err(SourceError::Adapter)
    }

    /// Release the handle unconditionally, in any state.
    pub fn release(&mut self) {
        self.adapter.release();
        self.status = SourceStatus::Disconnected;
        log::info!("source handle released");
    }

    fn interruptible_sleep(&self, total: Duration) -> Result<(), SourceError> {
        let deadline = self.clock.now() + total;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(SourceError::Aborted);
            }
            let remaining = deadline.saturating_sub(self.clock.now());
            if remaining.is_zero() {
                return Ok(());
            }
            self.clock.sleep(remaining.min(SHUTDOWN_POLL));
        }
    }
}
