// src/preprocessing.rs

use crate::tensor::Tensor;
use anyhow::{bail, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use serde::{Deserialize, Serialize};

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Memory layout of the network input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// Decide from the executor's bound input shape
    #[default]
    Auto,
    Nchw,
    Nhwc,
}

impl InputLayout {
    /// Resolve `Auto` against a bound input shape. Falls back to NCHW when
    /// the shape carries no 3-channel axis.
    pub fn resolve(self, bound_shape: &[usize]) -> InputLayout {
        match self {
            InputLayout::Auto => {
                if bound_shape.len() == 4 && bound_shape[1] == 3 {
                    InputLayout::Nchw
                } else if bound_shape.len() == 4 && bound_shape[3] == 3 {
                    InputLayout::Nhwc
                } else {
                    InputLayout::Nchw
                }
            }
            other => other,
        }
    }

    /// `(width, height)` of a 4-D input shape in this layout. `None` for other
    /// ranks or dynamic (0) spatial dims.
    pub fn spatial_dims(self, shape: &[usize]) -> Option<(usize, usize)> {
        if shape.len() != 4 {
            return None;
        }
        let (h, w) = match self {
            InputLayout::Nhwc => (shape[1], shape[2]),
            InputLayout::Nchw | InputLayout::Auto => (shape[2], shape[3]),
        };
        (w > 0 && h > 0).then_some((w, h))
    }

    pub fn input_shape(self, width: usize, height: usize) -> Vec<usize> {
        match self {
            InputLayout::Nhwc => vec![1, height, width, 3],
            InputLayout::Nchw | InputLayout::Auto => vec![1, 3, height, width],
        }
    }
}

/// Build the network input from an RGB frame.
///
/// The frame is resized to `train_width x train_height / crop_ratio`, the top
/// rows are cut so `train_height` rows remain, then each channel is scaled to
/// [0, 1] and standardized with the ImageNet mean/std.
pub fn preprocess(
    img: &RgbImage,
    train_width: usize,
    train_height: usize,
    crop_ratio: f32,
    layout: InputLayout,
) -> Result<Tensor> {
    if img.width() == 0 || img.height() == 0 {
        bail!("empty input frame");
    }
    if train_width == 0 || train_height == 0 {
        bail!("invalid network input size {}x{}", train_width, train_height);
    }

    let full_height = ((train_height as f32 / crop_ratio) as usize).max(train_height);
    let cut = full_height - train_height;

    let resized = imageops::resize(
        img,
        train_width as u32,
        full_height as u32,
        FilterType::CatmullRom,
    );

    let (w, h) = (train_width, train_height);
    let plane = h * w;
    let mut output = vec![0.0f32; 3 * plane];

    for y in 0..h {
        for x in 0..w {
            let px = resized.get_pixel(x as u32, (y + cut) as u32).0;
            for c in 0..3 {
                let value = (px[c] as f32 / 255.0 - MEAN[c]) / STD[c];
                let idx = match layout {
                    InputLayout::Nhwc => (y * w + x) * 3 + c,
                    InputLayout::Nchw | InputLayout::Auto => c * plane + y * w + x,
                };
                output[idx] = value;
            }
        }
    }

    Tensor::new(layout.input_shape(w, h), output)
}
