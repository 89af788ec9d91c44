// src/pipeline/metrics.rs
//
// Run-level counters and timings. Cheap to clone and share with a reporter
// thread; every field is an atomic behind an Arc.

use crate::lane_style::{LaneLabel, LaneStyleResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub frames_with_lanes: Arc<AtomicU64>,
    pub lanes_decoded: Arc<AtomicU64>,
    pub solid_lanes: Arc<AtomicU64>,
    pub dashed_lanes: Arc<AtomicU64>,
    pub ambiguous_lanes: Arc<AtomicU64>,
    pub reshape_failures: Arc<AtomicU64>,
    /// Accumulated over all frames
    pub inference_time_us: Arc<AtomicU64>,
    pub classify_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            frames_with_lanes: Arc::new(AtomicU64::new(0)),
            lanes_decoded: Arc::new(AtomicU64::new(0)),
            solid_lanes: Arc::new(AtomicU64::new(0)),
            dashed_lanes: Arc::new(AtomicU64::new(0)),
            ambiguous_lanes: Arc::new(AtomicU64::new(0)),
            reshape_failures: Arc::new(AtomicU64::new(0)),
            inference_time_us: Arc::new(AtomicU64::new(0)),
            classify_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Count one processed frame.
    pub fn record_frame(&self, lane_count: usize, styles: &[LaneStyleResult]) {
        self.inc(&self.total_frames);
        if lane_count > 0 {
            self.inc(&self.frames_with_lanes);
        }
        self.lanes_decoded
            .fetch_add(lane_count as u64, Ordering::Relaxed);
        for style in styles {
            let counter = match style.label {
                LaneLabel::Solid => &self.solid_lanes,
                LaneLabel::Dashed => &self.dashed_lanes,
                LaneLabel::Ambiguous => &self.ambiguous_lanes,
            };
            self.inc(counter);
        }
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let avg = |counter: &AtomicU64| {
            if frames > 0 {
                counter.load(Ordering::Relaxed) / frames
            } else {
                0
            }
        };

        MetricsSummary {
            total_frames: frames,
            fps: self.fps(),
            frames_with_lanes: self.frames_with_lanes.load(Ordering::Relaxed),
            lanes_decoded: self.lanes_decoded.load(Ordering::Relaxed),
            solid_lanes: self.solid_lanes.load(Ordering::Relaxed),
            dashed_lanes: self.dashed_lanes.load(Ordering::Relaxed),
            ambiguous_lanes: self.ambiguous_lanes.load(Ordering::Relaxed),
            reshape_failures: self.reshape_failures.load(Ordering::Relaxed),
            avg_inference_us: avg(&self.inference_time_us),
            avg_classify_us: avg(&self.classify_time_us),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub frames_with_lanes: u64,
    pub lanes_decoded: u64,
    pub solid_lanes: u64,
    pub dashed_lanes: u64,
    pub ambiguous_lanes: u64,
    pub reshape_failures: u64,
    pub avg_inference_us: u64,
    pub avg_classify_us: u64,
    pub elapsed_secs: f64,
}
