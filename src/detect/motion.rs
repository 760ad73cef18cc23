//! Frame-to-frame motion differencing.
//!
//! The differencer keeps the previous frame (smoothed grayscale) as its
//! baseline and reports, per call: whether anything moved, how much of the
//! frame changed, and where. It is pure frame-to-frame: the baseline is
//! replaced on every call, there is no long-lived background model.
//!
//! Pipeline per frame: box blur -> grayscale diff against baseline ->
//! binarize at the sensitivity threshold -> dilate to merge adjacent change
//! -> connected components -> drop regions below the minimum area.
//!
//! Two deliberate asymmetries:
//! - Region area counts pre-dilation changed pixels, so dilation merges
//!   neighborhoods without inflating small noise past the area filter.
//! - The reported percentage comes from the unfiltered dilated mask, so
//!   `has_motion == false` can coexist with a nonzero percentage.

use crate::frame::Frame;

/// Tuning for the motion differencer.
#[derive(Clone, Copy, Debug)]
pub struct MotionConfig {
    /// Minimum per-pixel intensity delta that counts as change.
    pub sensitivity: u8,
    /// Changed-pixel count below which a region is discarded as noise.
    pub min_region_area: usize,
    /// Box blur radius applied before diffing. Zero disables smoothing.
    pub blur_radius: u32,
    /// Dilation passes that merge adjacent changed pixels.
    pub dilate_iterations: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sensitivity: 25,
            min_region_area: 500,
            blur_radius: 2,
            dilate_iterations: 2,
        }
    }
}

/// A contiguous changed region. Bounds and area come from the pre-dilation
/// changed pixels inside the merged component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: usize,
}

/// Outcome of differencing one frame against the baseline.
#[derive(Clone, Debug, Default)]
pub struct MotionResult {
    pub has_motion: bool,
    /// Changed share of the frame, 0..100, from the unfiltered mask.
    pub percentage: f32,
    pub regions: Vec<Region>,
}

/// Stateful frame-to-frame change detector.
pub struct MotionDifferencer {
    config: MotionConfig,
    baseline: Option<Vec<u8>>,
    width: u32,
    height: u32,
}

impl MotionDifferencer {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            baseline: None,
            width: 0,
            height: 0,
        }
    }

    /// Diff `frame` against the baseline and replace the baseline with it.
    ///
    /// The first call after construction or `reset()` never reports motion;
    /// there is nothing to diff against yet.
    pub fn detect(&mut self, frame: &Frame) -> MotionResult {
        let smoothed = box_blur(
            &frame.gray(),
            frame.width,
            frame.height,
            self.config.blur_radius,
        );

        if self.width != frame.width || self.height != frame.height {
            // Dimension change invalidates the baseline.
            self.baseline = None;
            self.width = frame.width;
            self.height = frame.height;
        }

        let Some(previous) = self.baseline.take() else {
            self.baseline = Some(smoothed);
            return MotionResult::default();
        };

        let total = smoothed.len();
        let mut mask: Vec<u8> = smoothed
            .iter()
            .zip(previous.iter())
            .map(|(a, b)| u8::from(a.abs_diff(*b) > self.config.sensitivity))
            .collect();
        self.baseline = Some(smoothed);

        let raw = mask.clone();
        for _ in 0..self.config.dilate_iterations {
            mask = dilate(&mask, frame.width, frame.height);
        }

        let changed = mask.iter().filter(|&&v| v != 0).count();
        let percentage = if total > 0 {
            changed as f32 / total as f32 * 100.0
        } else {
            0.0
        };

        let regions = extract_regions(
            &mask,
            &raw,
            frame.width,
            frame.height,
            self.config.min_region_area,
        );

        MotionResult {
            has_motion: !regions.is_empty(),
            percentage,
            regions,
        }
    }

    /// Drop the baseline, e.g. after a reconnect or scene cut where
    /// frame-to-frame continuity is broken.
    pub fn reset(&mut self) {
        self.baseline = None;
        log::debug!("motion baseline reset");
    }
}

/// Separable box blur with clamped edges.
fn box_blur(src: &[u8], width: u32, height: u32, radius: u32) -> Vec<u8> {
    if radius == 0 || src.is_empty() {
        return src.to_vec();
    }
    let horizontal = blur_pass(src, width, height, radius, true);
    blur_pass(&horizontal, width, height, radius, false)
}

fn blur_pass(src: &[u8], width: u32, height: u32, radius: u32, horizontal: bool) -> Vec<u8> {
    let (outer, inner) = if horizontal {
        (height, width)
    } else {
        (width, height)
    };
    let mut out = vec![0u8; src.len()];
    for o in 0..outer {
        for i in 0..inner {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(inner - 1);
            let mut sum = 0u32;
            for k in lo..=hi {
                let idx = if horizontal {
                    (o * width + k) as usize
                } else {
                    (k * width + o) as usize
                };
                sum += src[idx] as u32;
            }
            let idx = if horizontal {
                (o * width + i) as usize
            } else {
                (i * width + o) as usize
            };
            out[idx] = (sum / (hi - lo + 1)) as u8;
        }
    }
    out
}

/// One 3x3 dilation pass over a binary mask.
fn dilate(mask: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as i64;
    let h = height as i64;
    let mut out = vec![0u8; mask.len()];
    for y in 0..h {
        for x in 0..w {
            let mut set = 0u8;
            'neighbors: for dy in -1..=1 {
                for dx in -1..=1 {
                    let ny = y + dy;
                    let nx = x + dx;
                    if ny >= 0 && ny < h && nx >= 0 && nx < w && mask[(ny * w + nx) as usize] != 0 {
                        set = 1;
                        break 'neighbors;
                    }
                }
            }
            out[(y * w + x) as usize] = set;
        }
    }
    out
}

/// Connected components (8-connectivity) over the dilated mask.
///
/// Each component's bounds and area are measured over the pre-dilation
/// pixels it covers; components whose true changed area does not exceed
/// `min_area` are discarded.
fn extract_regions(
    dilated: &[u8],
    raw: &[u8],
    width: u32,
    height: u32,
    min_area: usize,
) -> Vec<Region> {
    let w = width as usize;
    let h = height as usize;
    let mut visited = vec![false; dilated.len()];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..dilated.len() {
        if dilated[start] == 0 || visited[start] {
            continue;
        }

        let mut area = 0usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let x = idx % w;
            let y = idx / w;

            if raw[idx] != 0 {
                area += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let ny = y as i64 + dy;
                    let nx = x as i64 + dx;
                    if ny < 0 || ny >= h as i64 || nx < 0 || nx >= w as i64 {
                        continue;
                    }
                    let nidx = ny as usize * w + nx as usize;
                    if dilated[nidx] != 0 && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }
        }

        if area > min_area {
            regions.push(Region {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
                area,
            });
        }
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 80;
    const H: u32 = 60;

    /// Config without smoothing so tests control changed areas exactly.
    fn sharp_config() -> MotionConfig {
        MotionConfig {
            blur_radius: 0,
            ..MotionConfig::default()
        }
    }

    fn black() -> Frame {
        Frame::solid(W, H, [0, 0, 0])
    }

    /// Black frame with a white block of the given size at (x, y).
    fn with_block(x: u32, y: u32, bw: u32, bh: u32) -> Frame {
        let mut frame = black();
        for yy in y..y + bh {
            for xx in x..x + bw {
                let idx = ((yy * W + xx) * 3) as usize;
                frame.data[idx] = 255;
                frame.data[idx + 1] = 255;
                frame.data[idx + 2] = 255;
            }
        }
        frame
    }

    #[test]
    fn first_call_stores_baseline_and_reports_nothing() {
        let mut differ = MotionDifferencer::new(MotionConfig::default());
        let result = differ.detect(&with_block(10, 10, 30, 30));

        assert!(!result.has_motion);
        assert_eq!(result.percentage, 0.0);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn region_of_600_pixels_is_motion() {
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());
        let result = differ.detect(&with_block(10, 10, 20, 30));

        assert!(result.has_motion);
        assert!(result.percentage > 0.0);
        assert_eq!(result.regions.len(), 1);
        let region = result.regions[0];
        assert_eq!(region.area, 600);
        assert_eq!((region.x, region.y), (10, 10));
        assert_eq!((region.width, region.height), (20, 30));
    }

    #[test]
    fn region_of_400_pixels_is_below_the_area_filter() {
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());
        let result = differ.detect(&with_block(10, 10, 20, 20));

        assert!(!result.has_motion);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn percentage_is_reported_even_without_motion() {
        // The percentage comes from the unfiltered mask, so a sub-threshold
        // region still contributes; this decoupling is intentional.
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());
        let result = differ.detect(&with_block(10, 10, 20, 20));

        assert!(!result.has_motion);
        assert!(result.percentage > 0.0);
    }

    #[test]
    fn baseline_is_replaced_every_call() {
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());
        let moving = differ.detect(&with_block(10, 10, 20, 30));
        assert!(moving.has_motion);

        // Same frame again: diff against the new baseline is empty.
        let still = differ.detect(&with_block(10, 10, 20, 30));
        assert!(!still.has_motion);
        assert_eq!(still.percentage, 0.0);
    }

    #[test]
    fn reset_clears_the_baseline() {
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());
        differ.reset();

        let result = differ.detect(&with_block(10, 10, 20, 30));
        assert!(!result.has_motion, "first frame after reset is baseline");
    }

    #[test]
    fn nearby_regions_merge_through_dilation() {
        // Two 15x30 blocks 2 pixels apart: each is 450 (below the filter on
        // its own), dilation bridges the gap and the merged component's
        // true area is 900.
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());

        let mut frame = with_block(10, 10, 15, 30);
        for yy in 10..40u32 {
            for xx in 27..42u32 {
                let idx = ((yy * W + xx) * 3) as usize;
                frame.data[idx] = 255;
                frame.data[idx + 1] = 255;
                frame.data[idx + 2] = 255;
            }
        }
        let result = differ.detect(&frame);

        assert!(result.has_motion);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].area, 900);
    }

    #[test]
    fn blur_suppresses_single_pixel_noise() {
        let mut differ = MotionDifferencer::new(MotionConfig::default());
        differ.detect(&black());

        let mut noisy = black();
        let idx = ((30 * W + 40) * 3) as usize;
        noisy.data[idx] = 255;
        noisy.data[idx + 1] = 255;
        noisy.data[idx + 2] = 255;
        let result = differ.detect(&noisy);

        assert!(!result.has_motion);
        assert_eq!(result.percentage, 0.0);
    }

    #[test]
    fn dimension_change_restarts_the_baseline() {
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());

        let result = differ.detect(&Frame::solid(40, 30, [255, 255, 255]));
        assert!(!result.has_motion);
    }

    #[test]
    fn sub_threshold_intensity_delta_is_ignored() {
        let mut differ = MotionDifferencer::new(sharp_config());
        differ.detect(&black());

        // Delta of 20 is below the default sensitivity of 25.
        let result = differ.detect(&Frame::solid(W, H, [20, 20, 20]));
        assert!(!result.has_motion);
        assert_eq!(result.percentage, 0.0);
    }
}
