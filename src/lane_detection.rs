// src/lane_detection.rs
//
// UFLDv2 post-processing: row/column classification heads -> ordered lane
// point sequences in original-image pixels.
//
// Row branch:    y fixed at a row anchor, x predicted over num_cell_row cells.
// Column branch: x fixed at a column anchor, y predicted over num_cell_col cells.
// Each lane slot is decoded by exactly one branch.

use crate::numeric::{local_soft_argmax, percentile, softmax_axis};
use crate::output_router::RawPrediction;
use crate::tensor::Tensor;
use crate::types::{LanePoints, ModelConfig, PixelPoint};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Percentile of y used to pick the "bottom" points of a lane for ordering.
const LANE_KEY_PERCENTILE: f32 = 80.0;

/// Normalised anchor positions, fixed for a model.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorGrid {
    /// Along image height, spans `[1 - crop_ratio, 1]`
    pub row_anchor: Vec<f32>,
    /// Along image width, spans `[0, 1]`
    pub col_anchor: Vec<f32>,
}

impl AnchorGrid {
    pub fn new(num_row: usize, num_col: usize, crop_ratio: f32) -> Self {
        Self {
            row_anchor: linspace(1.0 - crop_ratio as f64, 1.0, num_row),
            col_anchor: linspace(0.0, 1.0, num_col),
        }
    }

    pub fn from_model(model: &ModelConfig) -> Self {
        Self::new(model.num_row, model.num_col, model.crop_ratio)
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start as f32],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| (start + step * i as f64) as f32).collect()
        }
    }
}

/// Decoder thresholds. Every field is tunable; the defaults are one of
/// several operating points the model has been run with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderParams {
    /// Existence-probability threshold, row branch
    pub tau_row: f32,
    /// Existence-probability threshold, column branch
    pub tau_col: f32,
    pub min_pts_row: usize,
    pub min_pts_col: usize,
    /// Half-width of the soft-argmax window, in cells
    pub local_width: usize,
    /// Largest anchor-index step still counted as contiguous
    pub gap_tol: usize,
    pub row_lane_idx: Vec<usize>,
    pub col_lane_idx: Vec<usize>,
    pub sort_left_to_right: bool,
}

impl Default for DecoderParams {
    fn default() -> Self {
        Self {
            tau_row: 0.70,
            tau_col: 0.70,
            min_pts_row: 6,
            min_pts_col: 6,
            local_width: 1,
            gap_tol: 1,
            row_lane_idx: vec![1, 2],
            col_lane_idx: vec![0, 3],
            sort_left_to_right: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Row,
    Col,
}

/// Convert one frame's raw heads into lane point sequences.
///
/// Slots that fail the existence or continuity filters are dropped entirely.
/// Returns an empty vector when nothing survives.
pub fn pred2coords(
    pred: &RawPrediction,
    anchors: &AnchorGrid,
    ori_w: u32,
    ori_h: u32,
    params: &DecoderParams,
) -> Result<Vec<LanePoints>> {
    check_head(&pred.loc_row, &pred.exist_row, anchors.row_anchor.len(), "row")?;
    check_head(&pred.loc_col, &pred.exist_col, anchors.col_anchor.len(), "col")?;

    let num_lanes = pred.loc_row.shape()[3];
    if pred.loc_col.shape()[3] != num_lanes {
        bail!(
            "lane dimension mismatch: loc_row has {}, loc_col has {}",
            num_lanes,
            pred.loc_col.shape()[3]
        );
    }

    let exist_row_prob = softmax_axis(pred.exist_row.data(), pred.exist_row.shape(), 1);
    let exist_col_prob = softmax_axis(pred.exist_col.data(), pred.exist_col.shape(), 1);

    let mut lanes: Vec<Option<Vec<PixelPoint>>> = vec![None; num_lanes];

    let branches = [
        (Branch::Row, &params.row_lane_idx, &pred.loc_row, &pred.exist_row, &exist_row_prob),
        (Branch::Col, &params.col_lane_idx, &pred.loc_col, &pred.exist_col, &exist_col_prob),
    ];

    for (branch, slots, loc, exist, exist_prob) in branches {
        for &lane in slots.iter() {
            if lane >= num_lanes {
                bail!("lane slot {} out of range for {} lanes", lane, num_lanes);
            }
            let points = decode_lane(branch, lane, loc, exist, exist_prob, anchors, ori_w, ori_h, params);
            if let Some(points) = points {
                debug!("{:?} lane {} decoded with {} points", branch, lane, points.len());
                lanes[lane] = Some(points);
            }
        }
    }

    let mut coords: Vec<LanePoints> = lanes
        .into_iter()
        .enumerate()
        .filter_map(|(slot, pts)| pts.map(|p| LanePoints::new(slot, p)))
        .collect();

    if params.sort_left_to_right {
        sort_left_to_right(&mut coords);
    }

    Ok(coords)
}

fn check_head(loc: &Tensor, exist: &Tensor, num_anchors: usize, name: &str) -> Result<()> {
    let (ls, es) = (loc.shape(), exist.shape());
    if ls.len() != 4 || es.len() != 4 {
        bail!("{} heads must be 4-D, got {:?} and {:?}", name, ls, es);
    }
    if ls[1] < 2 {
        bail!("{} localisation head needs at least 2 cells, got {:?}", name, ls);
    }
    if es[1] != 2 || ls[2] != num_anchors || es[2] != num_anchors || ls[3] != es[3] {
        bail!(
            "{} heads {:?}/{:?} inconsistent with {} anchors",
            name,
            ls,
            es,
            num_anchors
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn decode_lane(
    branch: Branch,
    lane: usize,
    loc: &Tensor,
    exist: &Tensor,
    exist_prob: &[f32],
    anchors: &AnchorGrid,
    ori_w: u32,
    ori_h: u32,
    params: &DecoderParams,
) -> Option<Vec<PixelPoint>> {
    let (tau, min_pts, anchor_pos) = match branch {
        Branch::Row => (params.tau_row, params.min_pts_row, &anchors.row_anchor),
        Branch::Col => (params.tau_col, params.min_pts_col, &anchors.col_anchor),
    };

    let grid = loc.shape()[1];
    let num_anchors = loc.shape()[2];

    // Probability of class 1 ("lane present") per anchor
    let probs: Vec<f32> = (0..num_anchors)
        .map(|k| exist_prob[exist.offset4(0, 1, k, lane)])
        .collect();

    let active: Vec<usize> = (0..num_anchors)
        .filter(|&k| {
            // argmax over {absent, present}; ties go to "absent"
            let valid = exist.at4(0, 1, k, lane) > exist.at4(0, 0, k, lane);
            probs[k] > tau && valid
        })
        .collect();

    if active.len() < min_pts {
        return None;
    }

    let active = longest_run(&active, Some(&probs), params.gap_tol);
    if active.len() < min_pts {
        return None;
    }

    let mut column = vec![0.0f32; grid];
    let mut points: Vec<PixelPoint> = active
        .iter()
        .map(|&k| {
            for (cell, v) in column.iter_mut().enumerate() {
                *v = loc.at4(0, cell, k, lane);
            }
            let ratio = local_soft_argmax(&column, params.local_width) / (grid - 1) as f32;

            match branch {
                Branch::Row => (
                    to_pixel(ratio * ori_w as f32, ori_w),
                    to_pixel(anchor_pos[k] * ori_h as f32, ori_h),
                ),
                Branch::Col => (
                    to_pixel(anchor_pos[k] * ori_w as f32, ori_w),
                    to_pixel(ratio * ori_h as f32, ori_h),
                ),
            }
        })
        .collect();

    points.sort_by_key(|p| p.1);
    Some(points)
}

/// Truncate to an integer pixel and keep it inside `[0, extent)`.
#[inline]
fn to_pixel(v: f32, extent: u32) -> i32 {
    let max = extent.saturating_sub(1) as i32;
    (v as i32).clamp(0, max)
}

/// Keep the most trustworthy contiguous stretch of anchor indices.
///
/// `indices` must be sorted. Runs are split wherever consecutive indices
/// differ by more than `gap_tol`; the longest run wins, ties broken by the
/// summed `weights` (indexed by anchor), then by position (earliest first).
pub fn longest_run(indices: &[usize], weights: Option<&[f32]>, gap_tol: usize) -> Vec<usize> {
    if indices.is_empty() {
        return Vec::new();
    }

    let score = |run: &[usize]| -> f32 {
        weights
            .map(|w| run.iter().map(|&k| w.get(k).copied().unwrap_or(0.0)).sum())
            .unwrap_or(0.0)
    };

    let mut best: &[usize] = &indices[..1];
    let mut best_score = f32::NEG_INFINITY;
    let mut start = 0;

    for end in 1..=indices.len() {
        let split = end == indices.len() || indices[end] - indices[end - 1] > gap_tol;
        if !split {
            continue;
        }
        let run = &indices[start..end];
        let run_score = score(run);
        if run.len() > best.len() || (run.len() == best.len() && run_score > best_score) {
            best = run;
            best_score = run_score;
        }
        start = end;
    }

    best.to_vec()
}

/// Ordering key for a lane: median x of the points at or below the 80th
/// percentile of y (falls back to all points).
pub fn lane_key(points: &[PixelPoint]) -> i32 {
    let ys: Vec<f32> = points.iter().map(|p| p.1 as f32).collect();
    let Some(y_cut) = percentile(&ys, LANE_KEY_PERCENTILE) else {
        return 0;
    };

    let mut xs: Vec<i32> = points
        .iter()
        .filter(|p| p.1 as f32 >= y_cut)
        .map(|p| p.0)
        .collect();
    if xs.is_empty() {
        xs = points.iter().map(|p| p.0).collect();
    }
    xs.sort_unstable();
    xs[xs.len() / 2]
}

/// Stable left-to-right ordering by [`lane_key`].
pub fn sort_left_to_right(lanes: &mut [LanePoints]) {
    lanes.sort_by_cached_key(|lane| lane_key(&lane.points));
}
