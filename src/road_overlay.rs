// src/road_overlay.rs
//
// Annotated frame rendering.
//
//   - each lane polyline in its dominant paint color (3px solid, 2px otherwise)
//   - decoded points as small green dots
//   - a style badge under the lane's last point:
//       ███████   solid
//       ██ ██ ██  dashed
//       ┌─────┐   ambiguous (outline only)
//   - with the `video` feature, a caption next to the badge:
//       "1:solid-white(cov=0.91,fill=0.97)"
//
// All drawing is clipped to the frame.

use crate::color_analysis::LaneColor;
use crate::lane_style::{lane_band_mask, LaneLabel, LaneStyleResult};
use crate::types::LanePoints;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
#[cfg(feature = "video")]
use tracing::debug;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Colors used for lane rendering (RGB).
pub mod colors {
    use image::Rgb;

    pub const LANE_YELLOW: Rgb<u8> = Rgb([255, 215, 0]);
    pub const LANE_WHITE: Rgb<u8> = Rgb([235, 235, 235]);
    pub const POINT_GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    pub const BADGE_BACKGROUND: Rgb<u8> = Rgb([20, 20, 20]);
}

/// Alpha values for blended layers.
pub mod alpha {
    pub const BADGE_BACKGROUND: f32 = 0.55;
}

const SOLID_THICKNESS: i32 = 3;
const DEFAULT_THICKNESS: i32 = 2;
const POINT_RADIUS: i32 = 2;

const BADGE_OFFSET_Y: i32 = 14;
const BADGE_MARGIN_BOTTOM: i32 = 8;
const BADGE_W: u32 = 30;
const BADGE_H: u32 = 8;
const BADGE_PAD: i32 = 3;
#[cfg(feature = "video")]
const CAPTION_GAP: i32 = 4;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Draw every lane onto a copy of `frame`.
///
/// `styles` is parallel to `lanes` when classification ran; lanes without a
/// style are drawn white and thin, without a badge.
pub fn draw_lanes(frame: &RgbImage, lanes: &[LanePoints], styles: &[LaneStyleResult]) -> RgbImage {
    let mut output = frame.clone();

    for (i, lane) in lanes.iter().enumerate() {
        let style = styles.get(i);
        let color = style.map_or(colors::LANE_WHITE, |s| lane_color(s.color));
        let thickness = match style.map(|s| s.label) {
            Some(LaneLabel::Solid) => SOLID_THICKNESS,
            _ => DEFAULT_THICKNESS,
        };

        if lane.len() >= 2 {
            draw_polyline(&mut output, &lane.points, thickness, color);
        }
        for &(x, y) in &lane.points {
            if x >= 0 && y >= 0 && (x as u32) < output.width() && (y as u32) < output.height() {
                draw_filled_circle_mut(&mut output, (x, y), POINT_RADIUS, colors::POINT_GREEN);
            }
        }

        if let (Some(style), Some(&last)) = (style, lane.points.last()) {
            let (bx, by) = draw_style_badge(&mut output, last, style.label, color);

            #[cfg(feature = "video")]
            {
                let origin = (
                    bx + BADGE_W as i32 + 2 * BADGE_PAD + CAPTION_GAP,
                    by + BADGE_H as i32 + BADGE_PAD,
                );
                let caption = style_caption(lane.slot, style);
                if let Err(e) = text::put_caption(&mut output, &caption, origin, color) {
                    debug!("caption for slot {} not drawn: {:#}", lane.slot, e);
                }
            }
            #[cfg(not(feature = "video"))]
            let _ = (bx, by);
        }
    }

    output
}

/// One-line summary of a lane's style, e.g. `1:dashed-yellow(cov=0.41,fill=0.52)`.
pub fn style_caption(slot: usize, style: &LaneStyleResult) -> String {
    format!(
        "{}:{}-{}(cov={:.2},fill={:.2})",
        slot,
        style.label.as_str(),
        style.color.as_str(),
        style.coverage,
        style.fill_ratio
    )
}

pub fn lane_color(color: LaneColor) -> Rgb<u8> {
    match color {
        LaneColor::Yellow => colors::LANE_YELLOW,
        LaneColor::White | LaneColor::Unknown => colors::LANE_WHITE,
    }
}

// ============================================================================
// PRIMITIVES
// ============================================================================

fn draw_polyline(output: &mut RgbImage, points: &[(i32, i32)], thickness: i32, color: Rgb<u8>) {
    let band = lane_band_mask(output.width(), output.height(), points, thickness);
    for (x, y, px) in band.enumerate_pixels() {
        if px.0[0] > 0 {
            output.put_pixel(x, y, color);
        }
    }
}

/// Returns the badge's top-left corner.
fn draw_style_badge(
    output: &mut RgbImage,
    anchor: (i32, i32),
    label: LaneLabel,
    color: Rgb<u8>,
) -> (i32, i32) {
    let (w, h) = (output.width() as i32, output.height() as i32);
    let x = anchor.0.clamp(0, (w - BADGE_W as i32 - 2 * BADGE_PAD).max(0));
    let y = (anchor.1 + BADGE_OFFSET_Y).min(h - BADGE_MARGIN_BOTTOM).max(0);

    let background = Rect::at(x, y).of_size(
        BADGE_W + 2 * BADGE_PAD as u32,
        BADGE_H + 2 * BADGE_PAD as u32,
    );
    blend_rect(output, background, colors::BADGE_BACKGROUND, alpha::BADGE_BACKGROUND);

    let (ix, iy) = (x + BADGE_PAD, y + BADGE_PAD);
    match label {
        LaneLabel::Solid => {
            draw_filled_rect_mut(output, Rect::at(ix, iy).of_size(BADGE_W, BADGE_H), color);
        }
        LaneLabel::Dashed => {
            let dash = BADGE_W / 5;
            for k in 0..3 {
                let dx = ix + (2 * k * dash) as i32;
                draw_filled_rect_mut(output, Rect::at(dx, iy).of_size(dash, BADGE_H), color);
            }
        }
        LaneLabel::Ambiguous => {
            draw_hollow_rect_mut(output, Rect::at(ix, iy).of_size(BADGE_W, BADGE_H), color);
        }
    }

    (x, y)
}

fn blend_rect(output: &mut RgbImage, rect: Rect, color: Rgb<u8>, alpha: f32) {
    let x0 = rect.left().max(0) as u32;
    let y0 = rect.top().max(0) as u32;
    let x1 = (rect.right() + 1).clamp(0, output.width() as i32) as u32;
    let y1 = (rect.bottom() + 1).clamp(0, output.height() as i32) as u32;

    for y in y0..y1 {
        for x in x0..x1 {
            let px = output.get_pixel_mut(x, y);
            for c in 0..3 {
                let v = px.0[c] as f32 * (1.0 - alpha) + color.0[c] as f32 * alpha;
                px.0[c] = v.round() as u8;
            }
        }
    }
}

#[cfg(feature = "video")]
mod text {
    use anyhow::{bail, Result};
    use image::{Rgb, RgbImage};
    use opencv::{core, imgproc, prelude::*};

    /// Draw `text` with its baseline starting at `origin`, in place.
    pub fn put_caption(output: &mut RgbImage, text: &str, origin: (i32, i32), color: Rgb<u8>) -> Result<()> {
        let flat = core::Mat::from_slice(output.as_raw())?;
        let mut mat = flat.reshape(3, output.height() as i32)?.try_clone()?;

        // the Mat holds RGB, so the scalar is in RGB order too
        let [r, g, b] = color.0;
        imgproc::put_text(
            &mut mat,
            text,
            core::Point::new(origin.0, origin.1),
            imgproc::FONT_HERSHEY_SIMPLEX,
            CAPTION_SCALE,
            core::Scalar::new(r as f64, g as f64, b as f64, 0.0),
            1,
            imgproc::LINE_AA,
            false,
        )?;

        let data = mat.data_bytes()?;
        if data.len() != output.len() {
            bail!("caption buffer has {} bytes, frame has {}", data.len(), output.len());
        }
        output.copy_from_slice(data);
        Ok(())
    }

    const CAPTION_SCALE: f64 = 0.42;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane_style::LaneStyleResult;

    fn style(label: LaneLabel, color: LaneColor) -> LaneStyleResult {
        LaneStyleResult {
            label,
            color,
            ..LaneStyleResult::degenerate()
        }
    }

    #[test]
    fn test_draw_lanes_leaves_input_untouched() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let lanes = vec![LanePoints::new(1, vec![(50, 10), (50, 60)])];
        let out = draw_lanes(&frame, &lanes, &[style(LaneLabel::Solid, LaneColor::Yellow)]);

        assert_eq!(frame.get_pixel(50, 30), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(50, 30), &colors::LANE_YELLOW);
        // point dot overrides the line
        assert_eq!(out.get_pixel(50, 10), &colors::POINT_GREEN);
    }

    #[test]
    fn test_unstyled_lane_is_white() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let lanes = vec![LanePoints::new(0, vec![(20, 10), (20, 60)])];
        let out = draw_lanes(&frame, &lanes, &[]);
        assert_eq!(out.get_pixel(20, 35), &colors::LANE_WHITE);
    }

    #[test]
    fn test_out_of_frame_points_are_clipped() {
        let frame = RgbImage::from_pixel(40, 40, Rgb([0, 0, 0]));
        let lanes = vec![LanePoints::new(0, vec![(-10, -10), (60, 60)])];
        let out = draw_lanes(&frame, &lanes, &[style(LaneLabel::Dashed, LaneColor::White)]);
        assert_eq!(out.dimensions(), (40, 40));
    }

    #[test]
    fn test_badge_drawn_below_last_point() {
        let frame = RgbImage::from_pixel(120, 120, Rgb([0, 0, 0]));
        let lanes = vec![LanePoints::new(0, vec![(10, 10), (10, 40)])];
        let out = draw_lanes(&frame, &lanes, &[style(LaneLabel::Solid, LaneColor::White)]);
        let (ix, iy) = (10 + BADGE_PAD as u32, 40 + BADGE_OFFSET_Y as u32 + BADGE_PAD as u32);
        assert_eq!(out.get_pixel(ix + 5, iy + 2), &colors::LANE_WHITE);
    }

    #[test]
    fn test_style_caption_format() {
        let s = LaneStyleResult {
            coverage: 0.414,
            fill_ratio: 0.5,
            ..style(LaneLabel::Dashed, LaneColor::Yellow)
        };
        assert_eq!(style_caption(2, &s), "2:dashed-yellow(cov=0.41,fill=0.50)");
    }

    #[cfg(feature = "video")]
    #[test]
    fn test_caption_drawn_right_of_badge() {
        let frame = RgbImage::from_pixel(320, 120, Rgb([0, 0, 0]));
        let lanes = vec![LanePoints::new(0, vec![(10, 10), (10, 40)])];
        let out = draw_lanes(&frame, &lanes, &[style(LaneLabel::Solid, LaneColor::White)]);
        let text_x = 10 + BADGE_W + 2 * BADGE_PAD as u32 + CAPTION_GAP as u32;
        let lit = (text_x..320)
            .flat_map(|x| (40..120).map(move |y| (x, y)))
            .filter(|&(x, y)| out.get_pixel(x, y).0 != [0, 0, 0])
            .count();
        assert!(lit > 20, "caption left {} pixels lit", lit);
    }
}
