// src/lane_style.rs
//
// Per-lane paint color and stroke pattern (solid / dashed).
//
// 1. Coverage of the white/yellow masks inside a thin band around the curve
//    picks the dominant color.
// 2. The curve is resampled at a fixed arc-length step and, at each sample,
//    the dominant mask is probed along the normal. This yields a binary
//    presence signal along the lane.
// 3. Fill ratio and long zero-runs of that signal decide the pattern, with
//    the color coverage as a fallback when the signal alone is inconclusive.

use crate::color_analysis::{ColorMasks, LaneColor};
use crate::types::PixelPoint;
use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

/// Minimum coverage for yellow to win outright.
const YELLOW_MIN_COVERAGE: f32 = 0.15;
/// Yellow must beat white coverage by this factor.
const YELLOW_OVER_WHITE: f32 = 1.10;
const WHITE_MIN_COVERAGE: f32 = 0.12;

const BAND_MIN_THICKNESS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneLabel {
    Solid,
    Dashed,
    Ambiguous,
}

impl LaneLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneLabel::Solid => "solid",
            LaneLabel::Dashed => "dashed",
            LaneLabel::Ambiguous => "ambiguous",
        }
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, LaneLabel::Ambiguous)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleParams {
    /// Arc-length distance between probes along the curve (pixels)
    pub sample_step: f32,
    pub cov_solid: f32,
    pub cov_dashed: f32,
    pub yellow_cov_solid: f32,
    pub yellow_cov_dashed: f32,
    pub fill_solid: f32,
    pub fill_dashed: f32,
    /// Shortest zero-run (in samples) that counts as a gap
    pub min_gap_pix: usize,
    /// Strip half width as a fraction of the image width
    pub strip_ratio: f32,
    pub min_strip_half_width: i32,
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            sample_step: 3.0,
            cov_solid: 0.65,
            cov_dashed: 0.45,
            yellow_cov_solid: 0.52,
            yellow_cov_dashed: 0.35,
            fill_solid: 0.85,
            fill_dashed: 0.65,
            min_gap_pix: 6,
            strip_ratio: 0.004,
            min_strip_half_width: 4,
        }
    }
}

impl StyleParams {
    /// Coverage thresholds (solid, dashed) for the dominant color.
    fn coverage_thresholds(&self, color: LaneColor) -> (f32, f32) {
        match color {
            LaneColor::Yellow => (self.yellow_cov_solid, self.yellow_cov_dashed),
            LaneColor::White | LaneColor::Unknown => (self.cov_solid, self.cov_dashed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneStyleResult {
    pub label: LaneLabel,
    pub color: LaneColor,
    /// Coverage of the dominant color
    pub coverage: f32,
    pub coverage_white: f32,
    pub coverage_yellow: f32,
    pub fill_ratio: f32,
    pub long_gap_count: usize,
    pub gaps: Vec<usize>,
    pub signal: Vec<u8>,
}

impl LaneStyleResult {
    /// Result for lanes that cannot be measured.
    pub fn degenerate() -> Self {
        Self {
            label: LaneLabel::Ambiguous,
            color: LaneColor::Unknown,
            coverage: 0.0,
            coverage_white: 0.0,
            coverage_yellow: 0.0,
            fill_ratio: 0.0,
            long_gap_count: 0,
            gaps: Vec::new(),
            signal: Vec::new(),
        }
    }
}

// ============================================================================
// STRIP WIDTH
// ============================================================================

/// Resolution-proportional search half width.
pub fn strip_half_width(image_width: u32, params: &StyleParams) -> i32 {
    params
        .min_strip_half_width
        .max((image_width as f32 * params.strip_ratio) as i32)
}

/// Half width grown quadratically towards the bottom of the image, where
/// perspective makes markings wider.
pub fn adaptive_strip_half(y_ref: i32, image_width: u32, image_height: u32, params: &StyleParams) -> i32 {
    let base = strip_half_width(image_width, params);
    let rel = y_ref as f32 / image_height.max(1) as f32;
    let gain = (0.012 * image_width as f32 * rel * rel) as i32;
    base + gain
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Classify one lane, computing the color masks from `image`.
///
/// Prefer [`classify_lane_with_masks`] when several lanes share a frame.
pub fn classify_lane(
    image: &RgbImage,
    points: &[PixelPoint],
    strip_half: i32,
    params: &StyleParams,
) -> LaneStyleResult {
    if points.len() < 2 {
        return LaneStyleResult::degenerate();
    }
    let masks = ColorMasks::from_image(image);
    classify_lane_with_masks(&masks, points, strip_half, params)
}

pub fn classify_lane_with_masks(
    masks: &ColorMasks,
    points: &[PixelPoint],
    strip_half: i32,
    params: &StyleParams,
) -> LaneStyleResult {
    if points.len() < 2 {
        return LaneStyleResult::degenerate();
    }

    // band is strip_half thick in total, half the probe strip
    let band = lane_band_mask(
        masks.width(),
        masks.height(),
        points,
        BAND_MIN_THICKNESS.max(strip_half),
    );

    let mut lane_pix = 0usize;
    let mut white_in = 0usize;
    let mut yellow_in = 0usize;
    for (x, y, px) in band.enumerate_pixels() {
        if px.0[0] == 0 {
            continue;
        }
        lane_pix += 1;
        if masks.white.get_pixel(x, y).0[0] > 0 {
            white_in += 1;
        }
        if masks.yellow.get_pixel(x, y).0[0] > 0 {
            yellow_in += 1;
        }
    }
    if lane_pix == 0 {
        return LaneStyleResult::degenerate();
    }

    let coverage_white = white_in as f32 / lane_pix as f32;
    let coverage_yellow = yellow_in as f32 / lane_pix as f32;
    let color = dominant_color(coverage_white, coverage_yellow);

    let samples = sample_along_curve(points, params.sample_step);
    let signal = presence_signal(masks, color, &samples, strip_half);

    let fill_ratio = if signal.is_empty() {
        0.0
    } else {
        signal.iter().map(|&v| v as f32).sum::<f32>() / signal.len() as f32
    };
    let gaps = runlength_gaps(&signal, params.min_gap_pix);
    let long_gap_count = gaps.len();

    let coverage = match color {
        LaneColor::Yellow => coverage_yellow,
        LaneColor::White | LaneColor::Unknown => coverage_white,
    };
    let label = decide_label(color, coverage, fill_ratio, long_gap_count, params);

    LaneStyleResult {
        label,
        color,
        coverage,
        coverage_white,
        coverage_yellow,
        fill_ratio,
        long_gap_count,
        gaps,
        signal,
    }
}

/// First matching rule wins; ties between weak coverages go to white.
fn dominant_color(coverage_white: f32, coverage_yellow: f32) -> LaneColor {
    if coverage_yellow >= YELLOW_MIN_COVERAGE.max(coverage_white * YELLOW_OVER_WHITE) {
        LaneColor::Yellow
    } else if coverage_white >= WHITE_MIN_COVERAGE {
        LaneColor::White
    } else if coverage_yellow > coverage_white {
        LaneColor::Yellow
    } else {
        LaneColor::White
    }
}

fn decide_label(
    color: LaneColor,
    coverage: f32,
    fill_ratio: f32,
    long_gap_count: usize,
    params: &StyleParams,
) -> LaneLabel {
    if fill_ratio >= params.fill_solid && long_gap_count <= 1 {
        return LaneLabel::Solid;
    }
    if fill_ratio <= params.fill_dashed && long_gap_count >= 2 {
        return LaneLabel::Dashed;
    }

    let (cov_solid, cov_dashed) = params.coverage_thresholds(color);
    if coverage >= cov_solid && long_gap_count <= 1 {
        LaneLabel::Solid
    } else if coverage <= cov_dashed && long_gap_count >= 2 {
        LaneLabel::Dashed
    } else {
        LaneLabel::Ambiguous
    }
}

fn presence_signal(
    masks: &ColorMasks,
    color: LaneColor,
    samples: &[(f32, f32)],
    strip_half: i32,
) -> Vec<u8> {
    let mut signal = Vec::with_capacity(samples.len());
    for (i, &(x, y)) in samples.iter().enumerate() {
        let (nx, ny) = normal_direction(samples, i);
        let hit = (-strip_half..=strip_half).any(|d| {
            let sx = (x + nx * d as f32).round() as i32;
            let sy = (y + ny * d as f32).round() as i32;
            masks.is_set(color, sx, sy)
        });
        signal.push(hit as u8);
    }
    signal
}

// ============================================================================
// GEOMETRY
// ============================================================================

/// Rasterize the polyline as a band of `thickness` pixels with round joins.
pub fn lane_band_mask(width: u32, height: u32, points: &[PixelPoint], thickness: i32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 || points.is_empty() {
        return mask;
    }

    let on = Luma([255u8]);
    let half = thickness.max(1) as f32 / 2.0;

    for seg in points.windows(2) {
        let (x0, y0) = (seg[0].0 as f32, seg[0].1 as f32);
        let (x1, y1) = (seg[1].0 as f32, seg[1].1 as f32);
        let len = (x1 - x0).hypot(y1 - y0);
        if len < 1e-6 {
            continue;
        }
        let nx = -(y1 - y0) / len * half;
        let ny = (x1 - x0) / len * half;

        let corner = |x: f32, y: f32| Point::new(x.round() as i32, y.round() as i32);
        let poly = [
            corner(x0 + nx, y0 + ny),
            corner(x1 + nx, y1 + ny),
            corner(x1 - nx, y1 - ny),
            corner(x0 - nx, y0 - ny),
        ];
        // imageproc rejects polygons that are closed explicitly
        if poly[0] != poly[3] {
            draw_polygon_mut(&mut mask, &poly, on);
        }
    }

    let radius = (thickness / 2).max(1);
    for &(x, y) in points {
        draw_filled_circle_mut(&mut mask, (x, y), radius, on);
    }

    mask
}

/// Resample the polyline at uniform arc-length steps (at least 2 samples).
///
/// Curves with fewer than 2 points or zero length are returned unchanged.
pub fn sample_along_curve(points: &[PixelPoint], step: f32) -> Vec<(f32, f32)> {
    let pts: Vec<(f32, f32)> = points.iter().map(|&(x, y)| (x as f32, y as f32)).collect();
    if pts.len() < 2 {
        return pts;
    }

    let seg_lens: Vec<f32> = pts
        .windows(2)
        .map(|w| (w[1].0 - w[0].0).hypot(w[1].1 - w[0].1))
        .collect();
    let total: f32 = seg_lens.iter().sum();
    if total < 1e-6 {
        return pts;
    }

    let n_samples = ((total / step.max(1e-6)).floor() as usize).max(2);
    let mut out = Vec::with_capacity(n_samples);
    let mut acc = 0.0f32;
    let mut j = 0usize;

    for k in 0..n_samples {
        let s = total * k as f32 / (n_samples - 1) as f32;
        while j < seg_lens.len() - 1 && acc + seg_lens[j] < s {
            acc += seg_lens[j];
            j += 1;
        }
        let t = (s - acc) / seg_lens[j].max(1e-6);
        let (a, b) = (pts[j], pts[j + 1]);
        out.push((a.0 * (1.0 - t) + b.0 * t, a.1 * (1.0 - t) + b.1 * t));
    }

    out
}

/// Unit normal of the curve at `idx`, from its immediate neighbours.
///
/// Falls back to the next non-coincident neighbour pair, then to a fixed
/// direction when the curve is locally degenerate.
pub fn normal_direction(points: &[(f32, f32)], idx: usize) -> (f32, f32) {
    let n = points.len();
    match n {
        0 => return (1.0, 0.0),
        1 => return (0.0, 1.0),
        _ => {}
    }

    let idx = idx.min(n - 1);
    let i0 = idx.saturating_sub(1);
    let i1 = (idx + 1).min(n - 1);
    let (p0, p1) = (points[i0], points[i1]);

    let mut t = (p1.0 - p0.0, p1.1 - p0.1);
    let mut norm = t.0.hypot(t.1);
    if norm < 1e-6 {
        t = if i1 + 1 < n {
            let p2 = points[i1 + 1];
            (p2.0 - p1.0, p2.1 - p1.1)
        } else if i0 >= 1 {
            let pm = points[i0 - 1];
            (p0.0 - pm.0, p0.1 - pm.1)
        } else {
            (1.0, 0.0)
        };
        norm = t.0.hypot(t.1);
        if norm < 1e-6 {
            t = (1.0, 0.0);
            norm = 1.0;
        }
    }

    let (tx, ty) = (t.0 / norm, t.1 / norm);
    (-ty, tx)
}

/// Lengths of zero-runs of at least `min_gap` samples, trailing run included.
pub fn runlength_gaps(signal: &[u8], min_gap: usize) -> Vec<usize> {
    let mut gaps = Vec::new();
    let mut cur = 0usize;
    for &v in signal {
        if v == 0 {
            cur += 1;
        } else {
            if cur >= min_gap {
                gaps.push(cur);
            }
            cur = 0;
        }
    }
    if cur >= min_gap {
        gaps.push(cur);
    }
    gaps
}
