// src/pipeline/orchestrator.rs
//
// One frame, start to finish:
//
//   preprocess -> bind input (reshape if needed) -> invoke -> route outputs
//     -> pred2coords -> [snap] -> classify -> [hysteresis] -> draw
//
// Frames are processed strictly one after another. The only state carried
// between frames is the executor's bound input shape and, when enabled, the
// per-slot label tracker; a pipeline instance belongs to a single stream.

use super::frame_context::{FrameDiagnostics, FrameOutput, FrameTimings};
use super::metrics::PipelineMetrics;
use crate::color_analysis::{snap_points_to_color, ColorMasks};
use crate::inference::TensorExecutor;
use crate::lane_detection::{pred2coords, AnchorGrid};
use crate::lane_style::{
    adaptive_strip_half, classify_lane_with_masks, strip_half_width, LaneStyleResult, StyleParams,
};
use crate::numeric::percentile;
use crate::output_router::{OutputRole, OutputRouter};
use crate::preprocessing::{preprocess, InputLayout};
use crate::road_overlay::draw_lanes;
use crate::smoother::LaneStyleTracker;
use crate::types::{Config, LanePoints};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info, warn};

const SNAP_MIN_RADIUS: i32 = 3;
const STRIP_REF_PERCENTILE: f32 = 80.0;

pub struct LanePipeline<E: TensorExecutor> {
    config: Config,
    executor: E,
    router: OutputRouter,
    anchors: AnchorGrid,
    layout: InputLayout,
    input_index: usize,
    tracker: Option<LaneStyleTracker>,
    metrics: PipelineMetrics,
    frame_id: u64,
}

impl<E: TensorExecutor> LanePipeline<E> {
    /// Validate the executor against the configuration and build the pipeline.
    ///
    /// Fails when the model cannot produce every output role the
    /// configuration implies.
    pub fn new(config: Config, executor: E) -> Result<Self> {
        config.validate()?;

        let router = OutputRouter::new(&config.model, config.debug);
        router
            .validate_declared(&executor.output_details())
            .context("Model outputs do not match the configured grid")?;

        let inputs = executor.input_details();
        let Some(input) = inputs.first() else {
            bail!("executor exposes no input tensor");
        };
        let layout = config.model.input_layout.resolve(&input.shape);

        info!(
            "Lane pipeline ready: input {:?} ({:?}), grid {}x{} rows / {}x{} cols, {} lanes",
            input.shape,
            layout,
            config.model.num_cell_row,
            config.model.num_row,
            config.model.num_cell_col,
            config.model.num_col,
            config.model.num_lanes
        );

        let tracker = config.classifier.hysteresis.then(|| {
            LaneStyleTracker::new(config.model.num_lanes, config.classifier.reset_after_misses)
        });

        Ok(Self {
            anchors: AnchorGrid::from_model(&config.model),
            input_index: input.index,
            router,
            layout,
            tracker,
            executor,
            config,
            metrics: PipelineMetrics::new(),
            frame_id: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    /// Forget all label history, e.g. before starting a new stream.
    pub fn reset_tracks(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.reset();
        }
    }

    pub fn forward(&mut self, frame: &RgbImage) -> Result<FrameOutput> {
        let frame_start = Instant::now();
        let frame_id = self.frame_id;
        self.frame_id += 1;

        let (ori_w, ori_h) = self.config.model.ori_size.unwrap_or(frame.dimensions());

        let t = Instant::now();
        let model = &self.config.model;
        let crop_ratio = model.crop_ratio;
        let mut input = preprocess(
            frame,
            model.train_width,
            model.train_height,
            crop_ratio,
            self.layout,
        )?;

        let reshape_warning = self.ensure_input_shape(input.shape());
        if reshape_warning.is_some() {
            // still bound to the old shape: build the input at that size
            if let Some((w, h)) = self.layout.spatial_dims(&self.bound_input_shape()) {
                debug!("Preprocessing at bound input size {}x{}", w, h);
                input = preprocess(frame, w, h, crop_ratio, self.layout)?;
            }
        }
        let preprocess_us = t.elapsed().as_micros() as u64;

        let t = Instant::now();
        self.executor
            .set_input(self.input_index, input)
            .context("Failed to bind network input")?;
        self.executor.invoke().context("Inference failed")?;
        let inference_us = t.elapsed().as_micros() as u64;
        debug!("inference_time: {:.1} ms", inference_us as f64 / 1000.0);

        let t = Instant::now();
        let pred = self.router.collect(&self.executor)?;
        if self.config.debug {
            for role in OutputRole::ALL {
                let tensor = pred.get(role);
                match tensor.stats() {
                    Some((min, max, mean)) => debug!(
                        "[OUT] {:10} shape={:?} min={:.3} max={:.3} mean={:.3}",
                        role.as_str(),
                        tensor.shape(),
                        min,
                        max,
                        mean
                    ),
                    None => debug!("[OUT] {:10} shape={:?}", role.as_str(), tensor.shape()),
                }
            }
        }
        let mut lanes = pred2coords(&pred, &self.anchors, ori_w, ori_h, &self.config.decoder)?;
        let decode_us = t.elapsed().as_micros() as u64;

        let t = Instant::now();
        let styles = if self.config.classifier.enabled {
            self.classify(frame, &mut lanes)
        } else {
            Vec::new()
        };
        let classify_us = t.elapsed().as_micros() as u64;

        let annotated = draw_lanes(frame, &lanes, &styles);

        let diagnostics = FrameDiagnostics::collect(&pred, &lanes);
        if let Some(diag) = &diagnostics {
            let summary: Vec<String> = lanes
                .iter()
                .zip(&styles)
                .map(|(lane, s)| format!("{}:{}-{}", lane.slot, s.label.as_str(), s.color.as_str()))
                .collect();
            debug!(
                "[diag] points={} | exist_row≈{:.3}, exist_col≈{:.3} | {}",
                diag.total_points,
                diag.exist_row_mean,
                diag.exist_col_mean,
                summary.join(" | ")
            );
        }

        self.metrics.record_frame(lanes.len(), &styles);
        self.metrics
            .add_timing(&self.metrics.inference_time_us, inference_us);
        self.metrics
            .add_timing(&self.metrics.classify_time_us, classify_us);

        Ok(FrameOutput {
            frame_id,
            annotated,
            lanes,
            styles,
            diagnostics,
            reshape_warning,
            timings: FrameTimings {
                preprocess_us,
                inference_us,
                decode_us,
                classify_us,
                total_us: frame_start.elapsed().as_micros() as u64,
            },
        })
    }

    fn bound_input_shape(&self) -> Vec<usize> {
        self.executor
            .input_details()
            .into_iter()
            .find(|d| d.index == self.input_index)
            .map(|d| d.shape)
            .unwrap_or_default()
    }

    /// Rebind the executor input when the tensor shape differs from the bound
    /// one. A refused reshape is not fatal: the frame proceeds on the old
    /// binding and the returned message is attached to the output.
    fn ensure_input_shape(&mut self, shape: &[usize]) -> Option<String> {
        let bound = self.bound_input_shape();
        if bound == shape {
            return None;
        }

        let attempt = self
            .executor
            .resize_input(self.input_index, shape)
            .and_then(|_| self.executor.allocate());

        match attempt {
            Ok(()) => {
                info!("Input rebound from {:?} to {:?}", bound, shape);
                None
            }
            Err(e) => {
                let message = format!(
                    "input reshape {:?} -> {:?} failed, keeping bound shape: {:#}",
                    bound, shape, e
                );
                warn!("{}", message);
                self.metrics.inc(&self.metrics.reshape_failures);
                Some(message)
            }
        }
    }

    fn classify(&mut self, frame: &RgbImage, lanes: &mut [LanePoints]) -> Vec<LaneStyleResult> {
        let masks = ColorMasks::from_image(frame);
        let cls = &self.config.classifier;
        let (width, height) = frame.dimensions();

        let mut styles = Vec::with_capacity(lanes.len());
        for lane in lanes.iter_mut() {
            if cls.snap_points {
                let r = SNAP_MIN_RADIUS.max((cls.snap_ratio * width as f32) as i32);
                let base = ((r as f32 * cls.snap_base_scale) as i32).max(0);
                let (snapped, vote) = snap_points_to_color(&masks, &lane.points, r, base);
                debug!("slot {} snapped (r={}) vote={}", lane.slot, r, vote.as_str());
                lane.points = snapped;
            }

            let (strip_half, params) = if cls.adaptive_strip {
                let ys: Vec<f32> = lane.points.iter().map(|p| p.1 as f32).collect();
                let y_ref = percentile(&ys, STRIP_REF_PERCENTILE).unwrap_or(0.0) as i32;
                let half = adaptive_strip_half(y_ref, width, height, &cls.style);
                let params = StyleParams {
                    min_gap_pix: cls.style.min_gap_pix.max(half.max(0) as usize),
                    ..cls.style.clone()
                };
                (half, params)
            } else {
                (strip_half_width(width, &cls.style), cls.style.clone())
            };

            let mut result = classify_lane_with_masks(&masks, &lane.points, strip_half, &params);
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.apply(lane.slot, &mut result);
            }
            styles.push(result);
        }

        if let Some(tracker) = self.tracker.as_mut() {
            let decoded: Vec<usize> = lanes.iter().map(|l| l.slot).collect();
            tracker.end_frame(&decoded);
        }

        styles
    }
}
