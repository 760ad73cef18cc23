//! Scriptable synthetic camera.
//!
//! `ScriptedCamera` is the test double for the adapter seam: a shared
//! `CameraScript` handle injects connect/read failures and drives the scene
//! content, so resilience and scheduling behavior can be exercised without a
//! real stream. The daemon also accepts it for `stub://` deployments.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::frame::{Frame, SourceProperties};
use crate::source::CameraAdapter;

/// Shared control handle for a `ScriptedCamera`.
///
/// Tests keep a clone of the `Arc` after the camera moves into a
/// `LiveSource`, and steer failures/scene changes through it.
#[derive(Default)]
pub struct CameraScript {
    fail_connects: AtomicU32,
    fail_reads: AtomicU32,
    fail_read_indices: Mutex<HashSet<u64>>,
    connects: AtomicU32,
    reads: AtomicU64,
    releases: AtomicU32,
    scene: AtomicU32,
}

impl CameraScript {
    /// Fail the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    /// Fail specific upcoming reads, 1-based relative to the reads already
    /// performed (`&[2, 4]` fails the second and fourth read from now).
    pub fn fail_reads_at(&self, offsets: &[u64]) {
        let base = self.reads.load(Ordering::SeqCst);
        let mut indices = self
            .fail_read_indices
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for offset in offsets {
            indices.insert(base + offset);
        }
    }

    /// Change the synthetic scene. Scene 0 is a black frame; any other value
    /// paints a 20x30 block of that intensity, so consecutive distinct
    /// scenes differ in exactly 600 pixels.
    pub fn set_scene(&self, scene: u32) {
        self.scene.store(scene, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    fn next_read_fails(&self) -> bool {
        if self
            .fail_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return true;
        }
        let seq = self.reads.load(Ordering::SeqCst);
        self.fail_read_indices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&seq)
    }
}

/// Synthetic camera adapter driven by a `CameraScript`.
pub struct ScriptedCamera {
    script: Arc<CameraScript>,
    width: u32,
    height: u32,
    fps: u32,
    connected: bool,
}

impl ScriptedCamera {
    pub fn new(script: Arc<CameraScript>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            script,
            width,
            height,
            fps,
            connected: false,
        }
    }

    fn render_scene(&self) -> Frame {
        let scene = self.script.scene.load(Ordering::SeqCst);
        let mut frame = Frame::solid(self.width, self.height, [0, 0, 0]);
        if scene > 0 {
            let value = (scene % 256) as u8;
            for y in 10..40u32.min(self.height) {
                for x in 10..30u32.min(self.width) {
                    let idx = ((y * self.width + x) * 3) as usize;
                    frame.data[idx] = value;
                    frame.data[idx + 1] = value;
                    frame.data[idx + 2] = value;
                }
            }
        }
        frame
    }
}

impl CameraAdapter for ScriptedCamera {
    fn connect(&mut self) -> Result<()> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        if self
            .script
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("scripted connect failure"));
        }
        self.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("scripted camera is not connected"));
        }
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        if self.script.next_read_fails() {
            return Err(anyhow!("scripted read failure"));
        }
        Ok(self.render_scene())
    }

    fn release(&mut self) {
        self.script.releases.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn properties(&self) -> SourceProperties {
        SourceProperties {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }
}
