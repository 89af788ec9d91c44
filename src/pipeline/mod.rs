// src/pipeline/mod.rs

pub mod frame_context;
pub mod metrics;
pub mod orchestrator;

pub use frame_context::{FrameDiagnostics, FrameOutput, FrameRecord, FrameTimings};
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use orchestrator::LanePipeline;
