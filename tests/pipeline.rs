// tests/pipeline.rs
//
// End-to-end runs of `LanePipeline` against an in-memory executor that
// replays fixed network outputs.

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use lane_marking::output_router::{OutputRole, RouteError};
use lane_marking::pipeline::LanePipeline;
use lane_marking::preprocessing::InputLayout;
use lane_marking::{Config, DType, LaneColor, LaneLabel, Tensor, TensorDesc, TensorExecutor};

const FRAME_W: u32 = 128;
const FRAME_H: u32 = 96;

const CONFIG: &str = r#"
model:
  path: "unused.onnx"
  train_width: 64
  train_height: 32
  num_row: 8
  num_col: 6
  num_lanes: 4
  crop_ratio: 0.5
  num_cell_row: 20
  num_cell_col: 10
decoder:
  min_pts_row: 4
  min_pts_col: 4
"#;

fn config() -> Config {
    Config::from_yaml_str(CONFIG).unwrap()
}

fn config_with(extra: &str) -> Config {
    Config::from_yaml_str(&format!("{}{}", CONFIG, extra)).unwrap()
}

struct MockExecutor {
    input_shape: Vec<usize>,
    outputs: Vec<(TensorDesc, Tensor)>,
    last_input_shape: Option<Vec<usize>>,
    invocations: usize,
    allocations: usize,
}

impl MockExecutor {
    fn new(input_shape: Vec<usize>, outputs: Vec<Tensor>) -> Self {
        let outputs = outputs
            .into_iter()
            .enumerate()
            .map(|(index, t)| {
                let desc = TensorDesc {
                    name: format!("output_{}", index),
                    index,
                    shape: t.shape().to_vec(),
                    dtype: DType::F32,
                };
                (desc, t)
            })
            .collect();
        Self {
            input_shape,
            outputs,
            last_input_shape: None,
            invocations: 0,
            allocations: 0,
        }
    }
}

impl TensorExecutor for MockExecutor {
    fn input_details(&self) -> Vec<TensorDesc> {
        vec![TensorDesc {
            name: "input".to_string(),
            index: 0,
            shape: self.input_shape.clone(),
            dtype: DType::F32,
        }]
    }

    fn output_details(&self) -> Vec<TensorDesc> {
        self.outputs.iter().map(|(d, _)| d.clone()).collect()
    }

    fn allocate(&mut self) -> Result<()> {
        self.allocations += 1;
        Ok(())
    }

    /// Accepts only tensors that fit the bound shape (0 = any).
    fn set_input(&mut self, _index: usize, tensor: Tensor) -> Result<()> {
        let fits = self.input_shape.len() == tensor.shape().len()
            && self
                .input_shape
                .iter()
                .zip(tensor.shape())
                .all(|(&want, &got)| want == 0 || want == got);
        if !fits {
            bail!("input expects shape {:?}, got {:?}", self.input_shape, tensor.shape());
        }
        self.last_input_shape = Some(tensor.shape().to_vec());
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        self.invocations += 1;
        Ok(())
    }

    fn get_output(&self, index: usize) -> Result<Tensor> {
        self.outputs
            .get(index)
            .map(|(_, t)| t.clone())
            .context("no such output")
    }

    fn resize_input(&mut self, _index: usize, shape: &[usize]) -> Result<()> {
        self.input_shape = shape.to_vec();
        Ok(())
    }
}

/// Same executor without reshape support (trait default).
struct FixedShapeExecutor(MockExecutor);

impl TensorExecutor for FixedShapeExecutor {
    fn input_details(&self) -> Vec<TensorDesc> {
        self.0.input_details()
    }
    fn output_details(&self) -> Vec<TensorDesc> {
        self.0.output_details()
    }
    fn allocate(&mut self) -> Result<()> {
        self.0.allocate()
    }
    fn set_input(&mut self, index: usize, tensor: Tensor) -> Result<()> {
        self.0.set_input(index, tensor)
    }
    fn invoke(&mut self) -> Result<()> {
        self.0.invoke()
    }
    fn get_output(&self, index: usize) -> Result<Tensor> {
        self.0.get_output(index)
    }
}

/// Heads with lane slot 1 on the row branch (anchors 2..8, cell 5) and slot 0
/// on the column branch (all anchors, cell 7). Emitted in a scrambled order.
fn heads() -> Vec<Tensor> {
    let mut loc_row = Tensor::zeros(vec![1, 20, 8, 4]);
    let mut exist_row = Tensor::zeros(vec![1, 2, 8, 4]);
    let mut loc_col = Tensor::zeros(vec![1, 10, 6, 4]);
    let mut exist_col = Tensor::zeros(vec![1, 2, 6, 4]);

    for lane in 0..4 {
        for k in 0..8 {
            exist_row.set4(0, 0, k, lane, 3.0);
        }
        for k in 0..6 {
            exist_col.set4(0, 0, k, lane, 3.0);
        }
    }
    for k in 2..8 {
        exist_row.set4(0, 0, k, 1, 0.0);
        exist_row.set4(0, 1, k, 1, 4.0);
        loc_row.set4(0, 5, k, 1, 10.0);
    }
    for k in 0..6 {
        exist_col.set4(0, 0, k, 0, 0.0);
        exist_col.set4(0, 1, k, 0, 4.0);
        loc_col.set4(0, 7, k, 0, 10.0);
    }

    vec![exist_col, loc_row, exist_row, loc_col]
}

fn asphalt() -> RgbImage {
    RgbImage::from_pixel(FRAME_W, FRAME_H, Rgb([50, 50, 50]))
}

/// Asphalt with a white stripe under the row-branch lane (x ≈ 37).
fn painted() -> RgbImage {
    let mut img = asphalt();
    for y in 40..FRAME_H {
        for x in 33..=41 {
            img.put_pixel(x, y, Rgb([240, 240, 240]));
        }
    }
    img
}

fn nchw_executor() -> MockExecutor {
    MockExecutor::new(vec![1, 3, 32, 64], heads())
}

#[test]
fn test_forward_decodes_and_classifies() {
    let mut pipeline = LanePipeline::new(config(), nchw_executor()).unwrap();
    let out = pipeline.forward(&painted()).unwrap();

    assert_eq!(out.frame_id, 0);
    assert_eq!(out.annotated.dimensions(), (FRAME_W, FRAME_H));
    assert!(out.reshape_warning.is_none());

    let mut slots: Vec<usize> = out.lanes.iter().map(|l| l.slot).collect();
    slots.sort();
    assert_eq!(slots, vec![0, 1]);
    for lane in &out.lanes {
        assert_eq!(lane.len(), 6);
        for &(x, y) in &lane.points {
            assert!(x >= 0 && (x as u32) < FRAME_W);
            assert!(y >= 0 && (y as u32) < FRAME_H);
        }
    }

    assert_eq!(out.styles.len(), out.lanes.len());
    let row_lane = out.lanes.iter().position(|l| l.slot == 1).unwrap();
    assert_eq!(out.styles[row_lane].color, LaneColor::White);
    assert_eq!(out.styles[row_lane].label, LaneLabel::Solid);

    let diag = out.diagnostics.as_ref().unwrap();
    assert_eq!(diag.total_points, 12);
    assert_eq!(diag.outputs.len(), 4);

    let exec = pipeline.executor();
    assert_eq!(exec.invocations, 1);
    assert_eq!(exec.last_input_shape.as_deref(), Some(&[1, 3, 32, 64][..]));
    assert_eq!(exec.allocations, 0);

    let second = pipeline.forward(&painted()).unwrap();
    assert_eq!(second.frame_id, 1);
    assert_eq!(pipeline.metrics().summary().total_frames, 2);
}

#[test]
fn test_row_lane_points_follow_anchors() {
    let mut pipeline = LanePipeline::new(config(), nchw_executor()).unwrap();
    let out = pipeline.forward(&asphalt()).unwrap();

    let row_lane = out.lanes.iter().find(|l| l.slot == 1).unwrap();
    // every point sits on the same cell column, y increasing
    assert!(row_lane.points.iter().all(|p| p.0 == row_lane.points[0].0));
    assert!(row_lane.points.windows(2).all(|w| w[0].1 < w[1].1));

    let col_lane = out.lanes.iter().find(|l| l.slot == 0).unwrap();
    assert!(col_lane.points.iter().all(|p| p.1 == col_lane.points[0].1));
}

#[test]
fn test_classifier_can_be_disabled() {
    let cfg = config_with("classifier:\n  enabled: false\n");
    let mut pipeline = LanePipeline::new(cfg, nchw_executor()).unwrap();
    let out = pipeline.forward(&painted()).unwrap();
    assert_eq!(out.lanes.len(), 2);
    assert!(out.styles.is_empty());
}

#[test]
fn test_hysteresis_carries_label_through_ambiguous_frame() {
    let row_label = |out: &lane_marking::FrameOutput| {
        let i = out.lanes.iter().position(|l| l.slot == 1).unwrap();
        out.styles[i].label
    };

    let cfg = config_with("classifier:\n  hysteresis: true\n");
    let mut pipeline = LanePipeline::new(cfg, nchw_executor()).unwrap();
    assert_eq!(row_label(&pipeline.forward(&painted()).unwrap()), LaneLabel::Solid);
    assert_eq!(row_label(&pipeline.forward(&asphalt()).unwrap()), LaneLabel::Solid);

    pipeline.reset_tracks();
    assert_eq!(row_label(&pipeline.forward(&asphalt()).unwrap()), LaneLabel::Ambiguous);

    let mut plain = LanePipeline::new(config(), nchw_executor()).unwrap();
    assert_eq!(row_label(&plain.forward(&painted()).unwrap()), LaneLabel::Solid);
    assert_eq!(row_label(&plain.forward(&asphalt()).unwrap()), LaneLabel::Ambiguous);
}

#[test]
fn test_dynamic_input_is_rebound_once() {
    let exec = MockExecutor::new(vec![0, 3, 32, 64], heads());
    let mut pipeline = LanePipeline::new(config(), exec).unwrap();

    let out = pipeline.forward(&asphalt()).unwrap();
    assert!(out.reshape_warning.is_none());
    pipeline.forward(&asphalt()).unwrap();

    assert_eq!(pipeline.executor().allocations, 1);
    assert_eq!(pipeline.executor().input_shape, vec![1, 3, 32, 64]);
}

#[test]
fn test_reshape_failure_warns_and_continues() {
    let exec = FixedShapeExecutor(MockExecutor::new(vec![1, 3, 40, 64], heads()));
    let mut pipeline = LanePipeline::new(config(), exec).unwrap();

    let out = pipeline.forward(&asphalt()).unwrap();
    assert!(out.reshape_warning.is_some());
    assert_eq!(out.lanes.len(), 2);
    assert_eq!(out.annotated.dimensions(), (FRAME_W, FRAME_H));
    assert_eq!(pipeline.executor().0.invocations, 1);
    // input rebuilt at the bound 64x40 instead of the configured 64x32
    assert_eq!(
        pipeline.executor().0.last_input_shape.as_deref(),
        Some(&[1, 3, 40, 64][..])
    );
    assert_eq!(pipeline.metrics().summary().reshape_failures, 1);

    // every frame keeps running on the stale binding
    let again = pipeline.forward(&asphalt()).unwrap();
    assert!(again.reshape_warning.is_some());
    assert_eq!(pipeline.executor().0.invocations, 2);
    assert_eq!(pipeline.metrics().summary().reshape_failures, 2);
}

#[test]
fn test_reshape_failure_on_nhwc_binding_uses_bound_size() {
    let exec = FixedShapeExecutor(MockExecutor::new(vec![1, 48, 96, 3], heads()));
    let mut pipeline = LanePipeline::new(config(), exec).unwrap();
    assert_eq!(pipeline.layout(), InputLayout::Nhwc);

    let out = pipeline.forward(&painted()).unwrap();
    assert!(out.reshape_warning.is_some());
    assert_eq!(
        pipeline.executor().0.last_input_shape.as_deref(),
        Some(&[1, 48, 96, 3][..])
    );
}

#[test]
fn test_nhwc_layout_detected_from_input() {
    let exec = MockExecutor::new(vec![1, 32, 64, 3], heads());
    let mut pipeline = LanePipeline::new(config(), exec).unwrap();
    assert_eq!(pipeline.layout(), InputLayout::Nhwc);

    pipeline.forward(&asphalt()).unwrap();
    assert_eq!(
        pipeline.executor().last_input_shape.as_deref(),
        Some(&[1, 32, 64, 3][..])
    );
}

#[test]
fn test_missing_output_fails_at_startup() {
    let mut outputs = heads();
    outputs.remove(0); // exist_col
    let exec = MockExecutor::new(vec![1, 3, 32, 64], outputs);

    let err = match LanePipeline::new(config(), exec) {
        Ok(_) => panic!("pipeline should reject the model"),
        Err(e) => e,
    };
    match err.downcast_ref::<RouteError>() {
        Some(RouteError::MissingRoles { missing }) => {
            assert_eq!(missing, &vec![OutputRole::ExistCol]);
        }
        None => panic!("unexpected error: {:#}", err),
    }
}

#[test]
fn test_runtime_shape_drift_is_an_error() {
    let mut exec = nchw_executor();
    // declared shape stays valid, the produced tensor does not
    exec.outputs[0].1 = Tensor::zeros(vec![1, 2, 5, 4]);
    let mut pipeline = LanePipeline::new(config(), exec).unwrap();
    assert!(pipeline.forward(&asphalt()).is_err());
}

#[test]
fn test_ori_size_override_scales_points() {
    let mut cfg = config();
    cfg.model.ori_size = Some((1280, 720));
    let mut pipeline = LanePipeline::new(cfg, nchw_executor()).unwrap();
    let out = pipeline.forward(&asphalt()).unwrap();

    let max_y = out
        .lanes
        .iter()
        .flat_map(|l| l.points.iter().map(|p| p.1))
        .max()
        .unwrap();
    assert!(max_y > FRAME_H as i32);
    assert!(max_y < 720);
}
