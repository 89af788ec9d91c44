// src/lib.rs
//
// Lane detection post-processing: routes the raw UFLDv2 heads, decodes them
// into lane point sequences, classifies each lane's paint color and stroke
// pattern, and renders the annotated frame.

pub mod color_analysis;
pub mod config;
pub mod inference;
pub mod lane_detection;
pub mod lane_style;
pub mod numeric;
pub mod output_router;
pub mod pipeline;
pub mod preprocessing;
pub mod road_overlay;
pub mod smoother;
pub mod tensor;
pub mod types;
pub mod video_processor;

pub use color_analysis::{ColorMasks, LaneColor};
pub use inference::{OrtExecutor, TensorExecutor};
pub use lane_detection::{pred2coords, AnchorGrid, DecoderParams};
pub use lane_style::{classify_lane, LaneLabel, LaneStyleResult, StyleParams};
pub use output_router::{OutputRole, OutputRouter, RawPrediction, RouteError};
pub use pipeline::{FrameOutput, LanePipeline};
pub use tensor::{DType, Tensor, TensorDesc};
pub use types::{Config, LanePoints, PixelPoint};
