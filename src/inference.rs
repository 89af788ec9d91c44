// src/inference.rs

use crate::tensor::{DType, Tensor, TensorDesc};
use crate::types::Config;
use anyhow::{bail, Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    tensor::{PrimitiveTensorElementType, TensorElementType},
    value::DynValue,
};
use std::time::Instant;
use tracing::{debug, info};

/// The inference runtime as seen by the pipeline.
///
/// Mirrors an interpreter-style API: describe slots, bind an input, invoke,
/// then read outputs back by index. Implementations own their tensor buffers.
pub trait TensorExecutor {
    fn input_details(&self) -> Vec<TensorDesc>;

    fn output_details(&self) -> Vec<TensorDesc>;

    /// (Re)allocate internal buffers for the currently bound shapes.
    fn allocate(&mut self) -> Result<()>;

    fn set_input(&mut self, index: usize, tensor: Tensor) -> Result<()>;

    fn invoke(&mut self) -> Result<()>;

    fn get_output(&self, index: usize) -> Result<Tensor>;

    /// Rebind an input slot to a new shape. Executors with fixed shapes keep
    /// the default, which always fails.
    fn resize_input(&mut self, index: usize, shape: &[usize]) -> Result<()> {
        bail!(
            "executor does not support resizing input {} to {:?}",
            index,
            shape
        )
    }
}

/// ONNX Runtime backed executor.
pub struct OrtExecutor {
    session: Session,
    inputs: Vec<TensorDesc>,
    /// Declared input shapes as loaded from the model (0 = dynamic)
    declared_inputs: Vec<Vec<usize>>,
    outputs: Vec<TensorDesc>,
    pending: Vec<Option<Tensor>>,
    results: Vec<Tensor>,
}

impl OrtExecutor {
    pub fn new(config: &Config) -> Result<Self> {
        info!("Initializing inference engine");
        info!("Model path: {}", config.model.path);

        let mut session_builder = Session::builder()?;

        if config.inference.use_cuda {
            info!("Enabling CUDA execution provider");
            session_builder =
                session_builder.with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()])?;
        }

        info!("Building ONNX Runtime session...");
        let session = session_builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.inference.num_threads.max(1))?
            .with_inter_threads(1)?
            .commit_from_file(&config.model.path)
            .with_context(|| format!("Failed to load model {}", config.model.path))?;

        let inputs: Vec<TensorDesc> = session
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| TensorDesc {
                name: input.name.clone(),
                index,
                shape: input
                    .input_type
                    .tensor_shape()
                    .map(|s| dims_to_shape(s))
                    .unwrap_or_default(),
                dtype: input
                    .input_type
                    .tensor_type()
                    .map(dtype_of)
                    .unwrap_or(DType::Other),
            })
            .collect();

        let outputs: Vec<TensorDesc> = session
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| TensorDesc {
                name: output.name.clone(),
                index,
                shape: output
                    .output_type
                    .tensor_shape()
                    .map(|s| dims_to_shape(s))
                    .unwrap_or_default(),
                dtype: output
                    .output_type
                    .tensor_type()
                    .map(dtype_of)
                    .unwrap_or(DType::Other),
            })
            .collect();

        if inputs.is_empty() {
            bail!("model {} declares no inputs", config.model.path);
        }

        for d in &inputs {
            info!("Input: {} {:?} {}", d.name, d.shape, d.dtype.as_str());
        }
        for d in &outputs {
            info!("Output: {} {:?} {}", d.name, d.shape, d.dtype.as_str());
        }

        info!("✓ Inference engine initialized successfully");

        let declared_inputs = inputs.iter().map(|d| d.shape.clone()).collect();
        let pending = vec![None; inputs.len()];

        Ok(Self {
            session,
            inputs,
            declared_inputs,
            outputs,
            pending,
            results: Vec::new(),
        })
    }
}

impl TensorExecutor for OrtExecutor {
    fn input_details(&self) -> Vec<TensorDesc> {
        self.inputs.clone()
    }

    fn output_details(&self) -> Vec<TensorDesc> {
        self.outputs.clone()
    }

    fn allocate(&mut self) -> Result<()> {
        // ONNX Runtime allocates per run; only drop stale results.
        self.results.clear();
        Ok(())
    }

    fn set_input(&mut self, index: usize, tensor: Tensor) -> Result<()> {
        let Some(desc) = self.inputs.get(index) else {
            bail!("input index {} out of range ({} inputs)", index, self.inputs.len());
        };

        let compatible = desc.shape.len() == tensor.shape().len()
            && desc
                .shape
                .iter()
                .zip(tensor.shape())
                .all(|(&want, &got)| want == 0 || want == got);
        if !compatible {
            bail!(
                "input {} expects shape {:?}, got {:?}",
                desc.name,
                desc.shape,
                tensor.shape()
            );
        }

        self.pending[index] = Some(tensor);
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let Some(tensor) = self.pending.first_mut().and_then(Option::take) else {
            bail!("invoke called before set_input");
        };

        let input_name = self.inputs[0].name.clone();
        let output_slots: Vec<(String, DType)> =
            self.outputs.iter().map(|d| (d.name.clone(), d.dtype)).collect();

        let shape = tensor.shape().to_vec();
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), tensor.into_data().into_boxed_slice()))?;

        let start = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![input_name.as_str() => input_value])?;
        debug!("inference_time: {:.1} ms", start.elapsed().as_secs_f64() * 1000.0);

        let mut results = Vec::with_capacity(output_slots.len());
        for (name, dtype) in &output_slots {
            let tensor = extract_f32(&outputs[name.as_str()], *dtype)
                .with_context(|| format!("Failed to read output {} ({})", name, dtype.as_str()))?;
            results.push(tensor);
        }
        drop(outputs);

        for (desc, tensor) in self.outputs.iter_mut().zip(&results) {
            desc.shape = tensor.shape().to_vec();
        }
        self.results = results;

        Ok(())
    }

    fn get_output(&self, index: usize) -> Result<Tensor> {
        self.results
            .get(index)
            .cloned()
            .with_context(|| format!("no output {} (invoke not run or index out of range)", index))
    }

    fn resize_input(&mut self, index: usize, shape: &[usize]) -> Result<()> {
        let Some(declared) = self.declared_inputs.get(index) else {
            bail!("input index {} out of range", index);
        };

        if declared.len() != shape.len() {
            bail!("rank mismatch: model declares {:?}, requested {:?}", declared, shape);
        }
        if let Some((want, got)) = declared
            .iter()
            .zip(shape)
            .find(|&(&want, &got)| want != 0 && want != got)
        {
            bail!(
                "fixed dimension {} cannot be resized to {} (declared {:?})",
                want,
                got,
                declared
            );
        }

        self.inputs[index].shape = shape.to_vec();
        Ok(())
    }
}

/// Output value as an `f32` tensor. Integer heads are widened by value, no
/// scale/zero-point is applied.
fn extract_f32(value: &DynValue, dtype: DType) -> Result<Tensor> {
    match dtype {
        DType::I8 => extract_as::<i8>(value, |v| v as f32),
        DType::U8 => extract_as::<u8>(value, |v| v as f32),
        DType::I32 => extract_as::<i32>(value, |v| v as f32),
        DType::I64 => extract_as::<i64>(value, |v| v as f32),
        _ => extract_as::<f32>(value, |v| v),
    }
}

fn extract_as<T>(value: &DynValue, widen: impl Fn(T) -> f32) -> Result<Tensor>
where
    T: PrimitiveTensorElementType + Copy,
{
    let (shape, data) = value.try_extract_tensor::<T>()?;
    let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    widen_into(shape, data, widen)
}

fn widen_into<T: Copy>(shape: Vec<usize>, data: &[T], widen: impl Fn(T) -> f32) -> Result<Tensor> {
    Tensor::new(shape, data.iter().map(|&v| widen(v)).collect())
}

fn dims_to_shape(dims: &[i64]) -> Vec<usize> {
    dims.iter().map(|&d| if d > 0 { d as usize } else { 0 }).collect()
}

fn dtype_of(ty: TensorElementType) -> DType {
    match ty {
        TensorElementType::Float32 => DType::F32,
        TensorElementType::Float16 => DType::F16,
        TensorElementType::Int8 => DType::I8,
        TensorElementType::Uint8 => DType::U8,
        TensorElementType::Int32 => DType::I32,
        TensorElementType::Int64 => DType::I64,
        _ => DType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dims_to_shape_marks_dynamic() {
        assert_eq!(dims_to_shape(&[-1, 3, 320, 1600]), vec![0, 3, 320, 1600]);
    }

    #[test]
    fn test_integer_outputs_widen_to_f32() {
        let t = widen_into(vec![1, 2, 2], &[-128i8, -1, 0, 127], |v| v as f32).unwrap();
        assert_eq!(t.shape(), &[1, 2, 2]);
        assert_eq!(t.data(), &[-128.0, -1.0, 0.0, 127.0]);

        let t = widen_into(vec![3], &[0u8, 200, 255], |v| v as f32).unwrap();
        assert_eq!(t.data(), &[0.0, 200.0, 255.0]);
        assert!(widen_into(vec![2, 2], &[1u8, 2, 3], |v| v as f32).is_err());
    }

    #[test]
    fn test_dtype_mapping() {
        assert_eq!(dtype_of(TensorElementType::Float32), DType::F32);
        assert_eq!(dtype_of(TensorElementType::Uint8), DType::U8);
    }
}
