// src/tensor.rs

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;

/// Element type reported by the executor for a tensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DType {
    F32,
    F16,
    I8,
    U8,
    I32,
    I64,
    Other,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F16 => "float16",
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Other => "other",
        }
    }
}

/// Executor-side description of one input or output slot.
///
/// Dynamic dimensions are reported as `0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorDesc {
    pub name: String,
    pub index: usize,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

/// Dense row-major `f32` tensor.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            bail!(
                "tensor data length {} does not match shape {:?} ({} elements)",
                data.len(),
                shape,
                expected
            );
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Flat offset of a 4-D index.
    #[inline]
    pub fn offset4(&self, i0: usize, i1: usize, i2: usize, i3: usize) -> usize {
        debug_assert_eq!(self.shape.len(), 4);
        ((i0 * self.shape[1] + i1) * self.shape[2] + i2) * self.shape[3] + i3
    }

    #[inline]
    pub fn at4(&self, i0: usize, i1: usize, i2: usize, i3: usize) -> f32 {
        self.data[self.offset4(i0, i1, i2, i3)]
    }

    #[inline]
    pub fn set4(&mut self, i0: usize, i1: usize, i2: usize, i3: usize, value: f32) {
        let idx = self.offset4(i0, i1, i2, i3);
        self.data[idx] = value;
    }

    /// (min, max, mean) over all elements, `None` when empty.
    pub fn stats(&self) -> Option<(f32, f32, f32)> {
        if self.data.is_empty() {
            return None;
        }
        let min = self.data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64;
        Some((min, max, mean as f32))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .finish()
    }
}
