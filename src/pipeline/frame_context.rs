// src/pipeline/frame_context.rs
//
// Everything one call to `LanePipeline::forward` produces. The annotated
// frame and lane geometry are the primary result; diagnostics ride along as
// an optional, best-effort extra.

use crate::lane_style::LaneStyleResult;
use crate::numeric::softmax_axis;
use crate::output_router::{OutputRole, RawPrediction};
use crate::tensor::Tensor;
use crate::types::LanePoints;
use image::RgbImage;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_id: u64,
    pub annotated: RgbImage,
    /// Decoded lanes, ordered as configured (slot order or left to right)
    pub lanes: Vec<LanePoints>,
    /// Parallel to `lanes`; empty when classification is disabled
    pub styles: Vec<LaneStyleResult>,
    pub diagnostics: Option<FrameDiagnostics>,
    /// Set when the executor refused an input reshape and the frame ran on
    /// the previously bound shape
    pub reshape_warning: Option<String>,
    pub timings: FrameTimings,
}

impl FrameOutput {
    pub fn total_points(&self) -> usize {
        self.lanes.iter().map(LanePoints::len).sum()
    }

    /// Serializable view without the image.
    pub fn record(&self) -> FrameRecord<'_> {
        FrameRecord {
            frame_id: self.frame_id,
            lanes: &self.lanes,
            styles: &self.styles,
            diagnostics: self.diagnostics.as_ref(),
            reshape_warning: self.reshape_warning.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FrameRecord<'a> {
    pub frame_id: u64,
    pub lanes: &'a [LanePoints],
    pub styles: &'a [LaneStyleResult],
    pub diagnostics: Option<&'a FrameDiagnostics>,
    pub reshape_warning: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FrameTimings {
    pub preprocess_us: u64,
    pub inference_us: u64,
    pub decode_us: u64,
    pub classify_us: u64,
    pub total_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputStats {
    pub role: OutputRole,
    pub shape: Vec<usize>,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameDiagnostics {
    /// Mean existence probability over all row anchors and lanes
    pub exist_row_mean: f32,
    pub exist_col_mean: f32,
    pub total_points: usize,
    pub outputs: Vec<OutputStats>,
}

impl FrameDiagnostics {
    /// `None` when any head is empty or malformed.
    pub fn collect(pred: &RawPrediction, lanes: &[LanePoints]) -> Option<Self> {
        let outputs = OutputRole::ALL
            .iter()
            .map(|&role| {
                let tensor = pred.get(role);
                tensor.stats().map(|(min, max, mean)| OutputStats {
                    role,
                    shape: tensor.shape().to_vec(),
                    min,
                    max,
                    mean,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            exist_row_mean: mean_exist_prob(&pred.exist_row)?,
            exist_col_mean: mean_exist_prob(&pred.exist_col)?,
            total_points: lanes.iter().map(LanePoints::len).sum(),
            outputs,
        })
    }
}

/// Mean of the class-1 plane of an existence head `[1, 2, N, L]`.
fn mean_exist_prob(exist: &Tensor) -> Option<f32> {
    let shape = exist.shape();
    if shape.len() != 4 || shape[1] != 2 {
        return None;
    }
    let plane = shape[2] * shape[3];
    if plane == 0 {
        return None;
    }
    let prob = softmax_axis(exist.data(), shape, 1);
    let present = prob.get(plane..2 * plane)?;
    Some(present.iter().sum::<f32>() / plane as f32)
}
