use crate::lane_detection::DecoderParams;
use crate::lane_style::StyleParams;
use crate::preprocessing::InputLayout;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub decoder: DecoderParams,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Verbose tensor/route logging
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub train_width: usize,
    pub train_height: usize,
    pub num_row: usize,
    pub num_col: usize,
    pub num_lanes: usize,
    pub crop_ratio: f32,
    #[serde(default = "default_num_cell_row")]
    pub num_cell_row: usize,
    #[serde(default = "default_num_cell_col")]
    pub num_cell_col: usize,
    #[serde(default)]
    pub input_layout: InputLayout,
    /// Force the original (w, h). `None` takes it from each frame.
    #[serde(default)]
    pub ori_size: Option<(u32, u32)>,
}

fn default_num_cell_row() -> usize {
    200
}

fn default_num_cell_col() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub num_threads: usize,
    pub use_cuda: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            use_cuda: false,
        }
    }
}

/// Style classification policy on top of the raw [`StyleParams`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub style: StyleParams,
    /// Widen the search strip towards the bottom of the image
    pub adaptive_strip: bool,
    /// Snap decoded points onto nearby paint before classifying
    pub snap_points: bool,
    pub snap_ratio: f32,
    /// Window radius for scoring a point's current position, as a fraction
    /// of the snap radius. Candidates always use half the snap radius.
    pub snap_base_scale: f32,
    /// Carry solid/dashed labels through ambiguous frames
    pub hysteresis: bool,
    /// Consecutive empty frames after which a slot's label history is dropped
    pub reset_after_misses: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            style: StyleParams::default(),
            adaptive_strip: false,
            snap_points: false,
            snap_ratio: 0.0035,
            snap_base_scale: 1.0,
            hysteresis: false,
            reset_after_misses: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Integer pixel coordinate `(x, y)` in the original image.
pub type PixelPoint = (i32, i32);

/// Decoded points of one lane slot, sorted by increasing y.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanePoints {
    pub slot: usize,
    pub points: Vec<PixelPoint>,
}

impl LanePoints {
    pub fn new(slot: usize, points: Vec<PixelPoint>) -> Self {
        Self { slot, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
