//! Frames and pixel helpers.
//!
//! A `Frame` is an owned RGB24 buffer produced by a camera adapter. The
//! grayscale and downsample helpers here are shared by the motion
//! differencer (diffing happens on smoothed grayscale) and the alert
//! deduplicator (fingerprints hash a coarse grayscale thumbnail).

use serde::Serialize;

/// Reported stream properties of a connected source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SourceProperties {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// One captured frame, RGB24 interleaved.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            data,
            width,
            height,
        }
    }

    /// Solid-color frame, mostly useful for synthetic sources and tests.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height)
    }

    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Single-channel intensity (Rec. 601 integer weights).
    pub fn gray(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect()
    }

    /// Area-averaged grayscale thumbnail of the requested size.
    ///
    /// Averaging over source cells (rather than nearest-neighbor sampling)
    /// keeps the result stable under single-pixel sensor noise, which is
    /// what makes it usable as a near-duplicate fingerprint.
    pub fn downsample_gray(&self, target_width: u32, target_height: u32) -> Vec<u8> {
        let gray = self.gray();
        if target_width == 0 || target_height == 0 || self.width == 0 || self.height == 0 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity((target_width * target_height) as usize);
        for ty in 0..target_height {
            let y0 = (ty as u64 * self.height as u64 / target_height as u64) as u32;
            let mut y1 = ((ty as u64 + 1) * self.height as u64 / target_height as u64) as u32;
            y1 = y1.max(y0 + 1).min(self.height);
            for tx in 0..target_width {
                let x0 = (tx as u64 * self.width as u64 / target_width as u64) as u32;
                let mut x1 = ((tx as u64 + 1) * self.width as u64 / target_width as u64) as u32;
                x1 = x1.max(x0 + 1).min(self.width);

                let mut sum = 0u64;
                for y in y0..y1 {
                    let row = (y * self.width) as usize;
                    for x in x0..x1 {
                        sum += gray[row + x as usize] as u64;
                    }
                }
                let count = ((y1 - y0) * (x1 - x0)) as u64;
                out.push((sum / count) as u8);
            }
        }
        out
    }
}

pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}
