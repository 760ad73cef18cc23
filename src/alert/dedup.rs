//! Alert fingerprint cache.
//!
//! Near-duplicate frames (a static scene, the same subject standing still)
//! would otherwise produce one alert per sampling cycle. Each attempted
//! alert is fingerprinted — a SHA-256 digest of a 32x32 grayscale thumbnail,
//! coarse enough to absorb sensor and compression noise while still telling
//! genuinely different scenes apart — and repeats within the suppression
//! window are dropped.
//!
//! The window is measured against the *original* sighting: a suppressed
//! duplicate never refreshes the timestamp, so a slowly drifting scene
//! cannot keep itself suppressed forever.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::frame::Frame;

/// Thumbnail edge used for fingerprinting.
pub const FINGERPRINT_EDGE: u32 = 32;

/// Entries untouched for this long are purged on the next call.
const EVICTION_HORIZON: Duration = Duration::from_secs(300);

/// Time-windowed suppression cache keyed by frame fingerprint.
pub struct AlertDeduplicator {
    window: Duration,
    horizon: Duration,
    entries: HashMap<[u8; 32], Duration>,
}

impl AlertDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            // The horizon must outlive the window or entries could evict
            // while still suppressing.
            horizon: EVICTION_HORIZON.max(window),
            entries: HashMap::new(),
        }
    }

    /// Decide whether an alert for `frame` should be suppressed, recording
    /// the attempt. `now` comes from the engine's monotonic clock.
    pub fn should_suppress(&mut self, frame: &Frame, now: Duration) -> bool {
        self.entries
            .retain(|_, &mut seen| now.saturating_sub(seen) <= self.horizon);

        let fp = fingerprint(frame);
        if let Some(&seen) = self.entries.get(&fp) {
            if now.saturating_sub(seen) < self.window {
                log::debug!(
                    "duplicate alert suppressed (fp={}, seen {:?} ago)",
                    hex::encode(&fp[..8]),
                    now.saturating_sub(seen)
                );
                return true;
            }
        }

        self.entries.insert(fp, now);
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fixed-size content digest of a coarse grayscale downsample.
pub fn fingerprint(frame: &Frame) -> [u8; 32] {
    let thumb = frame.downsample_gray(FINGERPRINT_EDGE, FINGERPRINT_EDGE);
    Sha256::digest(&thumb).into()
}
