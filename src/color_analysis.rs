// src/color_analysis.rs
//
// Paint color segmentation for lane markings.
//
// Two binary masks over the whole frame:
//   - WHITE:  low saturation and high value (HSV), or very high luma (Lab L)
//   - YELLOW: hue band with enough saturation/value (HSV), or a bright
//             luma/chroma window (Lab), then closed with a 3x3 cross to
//             bridge single-pixel holes in worn paint
//
// Thresholds are expressed in 8-bit OpenCV units: H in [0, 180), S/V/L/a/b in
// [0, 255] with a/b offset by 128.

use crate::types::PixelPoint;
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use serde::Serialize;

// ============================================================================
// THRESHOLDS
// ============================================================================

const WHITE_MAX_S: u8 = 90;
const WHITE_MIN_V: u8 = 170;
const WHITE_MIN_L: u8 = 185;

const YELLOW_H_RANGE: (u8, u8) = (8, 65);
const YELLOW_MIN_S: u8 = 25;
const YELLOW_MIN_V: u8 = 110;
const YELLOW_MIN_L: u8 = 150;
const YELLOW_MIN_B: u8 = 135;
const YELLOW_A_RANGE: (u8, u8) = (110, 150);

const MASK_ON: u8 = 255;

// ============================================================================
// PUBLIC TYPES
// ============================================================================

/// Dominant paint color of a lane marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneColor {
    White,
    Yellow,
    Unknown,
}

impl LaneColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneColor::White => "white",
            LaneColor::Yellow => "yellow",
            LaneColor::Unknown => "unknown",
        }
    }
}

/// White and yellow paint masks of one frame (0 or 255 per pixel).
#[derive(Debug, Clone)]
pub struct ColorMasks {
    pub white: GrayImage,
    pub yellow: GrayImage,
}

impl ColorMasks {
    pub fn from_image(img: &RgbImage) -> Self {
        let (w, h) = img.dimensions();
        let mut white = GrayImage::new(w, h);
        let mut yellow = GrayImage::new(w, h);

        for (x, y, px) in img.enumerate_pixels() {
            let [r, g, b] = px.0;
            let (hue, sat, val) = rgb_to_hsv8(r, g, b);
            let (l, a, bb) = rgb_to_lab8(r, g, b);

            let is_white = (sat < WHITE_MAX_S && val > WHITE_MIN_V) || l > WHITE_MIN_L;

            let hsv_yellow = hue >= YELLOW_H_RANGE.0
                && hue <= YELLOW_H_RANGE.1
                && sat >= YELLOW_MIN_S
                && val >= YELLOW_MIN_V;
            let lab_yellow = l > YELLOW_MIN_L
                && bb > YELLOW_MIN_B
                && a > YELLOW_A_RANGE.0
                && a < YELLOW_A_RANGE.1;

            if is_white {
                white.put_pixel(x, y, Luma([MASK_ON]));
            }
            if hsv_yellow || lab_yellow {
                yellow.put_pixel(x, y, Luma([MASK_ON]));
            }
        }

        let yellow = morphology::close(&yellow, Norm::L1, 1);

        Self { white, yellow }
    }

    pub fn width(&self) -> u32 {
        self.white.width()
    }

    pub fn height(&self) -> u32 {
        self.white.height()
    }

    /// Mask for a color. `Unknown` falls back to white.
    pub fn mask(&self, color: LaneColor) -> &GrayImage {
        match color {
            LaneColor::Yellow => &self.yellow,
            LaneColor::White | LaneColor::Unknown => &self.white,
        }
    }

    /// Bounds-checked mask lookup; out-of-image is never set.
    #[inline]
    pub fn is_set(&self, color: LaneColor, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x as u32 >= self.width() || y as u32 >= self.height() {
            return false;
        }
        self.mask(color).get_pixel(x as u32, y as u32).0[0] > 0
    }

    /// Number of set pixels of `color` in the square of radius `r` around
    /// `(x, y)`, clipped to the image.
    pub fn local_count(&self, color: LaneColor, x: i32, y: i32, r: i32) -> u32 {
        let x0 = (x - r).max(0);
        let y0 = (y - r).max(0);
        let x1 = (x + r + 1).min(self.width() as i32);
        let y1 = (y + r + 1).min(self.height() as i32);
        if x0 >= x1 || y0 >= y1 {
            return 0;
        }

        let mask = self.mask(color);
        let mut count = 0;
        for yy in y0..y1 {
            for xx in x0..x1 {
                if mask.get_pixel(xx as u32, yy as u32).0[0] > 0 {
                    count += 1;
                }
            }
        }
        count
    }
}

// ============================================================================
// COLOR SPACE CONVERSION
// ============================================================================

/// RGB to 8-bit HSV (H: 0-179 in half degrees, S: 0-255, V: 0-255).
#[inline]
pub fn rgb_to_hsv8(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { delta * 255.0 / max } else { 0.0 };

    let h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let h8 = ((h / 2.0).round() as u32 % 180) as u8;
    (h8, s.round().min(255.0) as u8, max as u8)
}

/// RGB (sRGB, D65) to 8-bit Lab (L scaled to 0-255, a/b offset by 128).
#[inline]
pub fn rgb_to_lab8(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let lin = |c: u8| {
        let c = c as f32 / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    let (rl, gl, bl) = (lin(r), lin(g), lin(b));

    let x = (0.412453 * rl + 0.357580 * gl + 0.180423 * bl) / 0.950456;
    let y = 0.212671 * rl + 0.715160 * gl + 0.072169 * bl;
    let z = (0.019334 * rl + 0.119193 * gl + 0.950227 * bl) / 1.088754;

    let f = |t: f32| {
        if t > 0.008856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let (fx, fy, fz) = (f(x), f(y), f(z));

    let l = if y > 0.008856 {
        116.0 * fy - 16.0
    } else {
        903.3 * y
    };
    let a = 500.0 * (fx - fy) + 128.0;
    let bb = 200.0 * (fy - fz) + 128.0;

    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    (to_u8(l * 255.0 / 100.0), to_u8(a), to_u8(bb))
}

// ============================================================================
// POINT SNAPPING
// ============================================================================

/// Move each point to the best-painted spot on a coarse `±r` grid.
///
/// The current position is scored by mask counts in a `base_radius` window,
/// candidates in a radius `r / 2` window; a yellow improvement takes
/// precedence over a white one. Also returns the color that won the most
/// points (yellow must strictly beat white).
pub fn snap_points_to_color(
    masks: &ColorMasks,
    points: &[PixelPoint],
    r: i32,
    base_radius: i32,
) -> (Vec<PixelPoint>, LaneColor) {
    if points.is_empty() {
        return (Vec::new(), LaneColor::Unknown);
    }

    let mut snapped = Vec::with_capacity(points.len());
    let mut white_wins = 0usize;
    let mut yellow_wins = 0usize;

    for &(x, y) in points {
        let mut best = (x, y);
        let mut best_w = masks.local_count(LaneColor::White, x, y, base_radius);
        let mut best_y = masks.local_count(LaneColor::Yellow, x, y, base_radius);

        for dx in [-r, 0, r] {
            for dy in [-r, 0, r] {
                let (tx, ty) = (x + dx, y + dy);
                let w_score = masks.local_count(LaneColor::White, tx, ty, r / 2);
                let y_score = masks.local_count(LaneColor::Yellow, tx, ty, r / 2);

                if y_score > best_y {
                    best = (tx, ty);
                    best_y = y_score;
                    best_w = w_score;
                } else if w_score > best_w {
                    best = (tx, ty);
                    best_w = w_score;
                    best_y = y_score;
                }
            }
        }

        snapped.push(best);
        if best_y > best_w {
            yellow_wins += 1;
        } else if best_w > best_y {
            white_wins += 1;
        }
    }

    let color = if yellow_wins > white_wins {
        LaneColor::Yellow
    } else if white_wins > 0 {
        LaneColor::White
    } else {
        LaneColor::Unknown
    };

    (snapped, color)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_hsv8_primaries() {
        assert_eq!(rgb_to_hsv8(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv8(255, 255, 0), (30, 255, 255));
        assert_eq!(rgb_to_hsv8(0, 0, 255), (120, 255, 255));
        let (_, s, v) = rgb_to_hsv8(200, 200, 200);
        assert_eq!(s, 0);
        assert_eq!(v, 200);
    }

    #[test]
    fn test_lab8_white_and_black() {
        let (l, a, b) = rgb_to_lab8(255, 255, 255);
        assert_eq!(l, 255);
        assert!((a as i32 - 128).abs() <= 1);
        assert!((b as i32 - 128).abs() <= 1);
        assert_eq!(rgb_to_lab8(0, 0, 0).0, 0);
    }

    #[test]
    fn test_lab8_yellow_has_positive_b() {
        let (_, _, b) = rgb_to_lab8(200, 160, 0);
        assert!(b > 180);
    }

    #[test]
    fn test_masks_separate_paint_from_asphalt() {
        let mut img = RgbImage::from_pixel(6, 1, Rgb([50, 50, 50]));
        img.put_pixel(1, 0, Rgb([240, 240, 240]));
        img.put_pixel(4, 0, Rgb([200, 160, 0]));
        let masks = ColorMasks::from_image(&img);

        assert!(masks.is_set(LaneColor::White, 1, 0));
        assert!(!masks.is_set(LaneColor::Yellow, 1, 0));
        assert!(masks.is_set(LaneColor::Yellow, 4, 0));
        assert!(!masks.is_set(LaneColor::White, 4, 0));
        assert!(!masks.is_set(LaneColor::White, 0, 0));
        assert!(!masks.is_set(LaneColor::Yellow, 0, 0));
        assert!(!masks.is_set(LaneColor::White, -1, 0));
        assert!(!masks.is_set(LaneColor::White, 6, 0));
    }

    #[test]
    fn test_yellow_mask_closes_single_pixel_hole() {
        let mut img = RgbImage::from_pixel(9, 9, Rgb([50, 50, 50]));
        for y in 2..7 {
            for x in 2..7 {
                img.put_pixel(x, y, Rgb([200, 160, 0]));
            }
        }
        img.put_pixel(4, 4, Rgb([50, 50, 50]));
        let masks = ColorMasks::from_image(&img);
        assert!(masks.is_set(LaneColor::Yellow, 4, 4));
        assert!(!masks.is_set(LaneColor::Yellow, 0, 0));
    }

    #[test]
    fn test_local_count_clips_at_border() {
        let img = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        let masks = ColorMasks::from_image(&img);
        assert_eq!(masks.local_count(LaneColor::White, 0, 0, 1), 4);
        assert_eq!(masks.local_count(LaneColor::White, 1, 1, 1), 9);
        assert_eq!(masks.local_count(LaneColor::White, 20, 20, 2), 0);
    }

    #[test]
    fn test_snap_moves_points_onto_paint() {
        let mut img = RgbImage::from_pixel(40, 40, Rgb([50, 50, 50]));
        for y in 0..40 {
            for x in 24..28 {
                img.put_pixel(x, y, Rgb([200, 160, 0]));
            }
        }
        let masks = ColorMasks::from_image(&img);
        let (snapped, color) = snap_points_to_color(&masks, &[(20, 10), (20, 30)], 6, 3);
        assert_eq!(color, LaneColor::Yellow);
        for p in snapped {
            assert_eq!(p.0, 26);
        }
    }

    #[test]
    fn test_snap_full_radius_base_keeps_point_near_paint() {
        // the wide base window already sees 3 paint columns, more than any
        // narrow candidate window
        let mut img = RgbImage::from_pixel(40, 40, Rgb([50, 50, 50]));
        for y in 0..40 {
            for x in 24..28 {
                img.put_pixel(x, y, Rgb([200, 160, 0]));
            }
        }
        let masks = ColorMasks::from_image(&img);
        let (snapped, color) = snap_points_to_color(&masks, &[(20, 10)], 6, 6);
        assert_eq!(snapped, vec![(20, 10)]);
        assert_eq!(color, LaneColor::Yellow);
    }
}
