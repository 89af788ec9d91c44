// src/output_router.rs
//
// Maps executor outputs to their semantic role by shape. The model does not
// name its heads reliably across exports, so the only contract is the shape
// implied by the configuration:
//
//   loc_row   [1, num_cell_row, num_row, num_lanes]
//   loc_col   [1, num_cell_col, num_col, num_lanes]
//   exist_row [1, 2,            num_row, num_lanes]
//   exist_col [1, 2,            num_col, num_lanes]

use crate::inference::TensorExecutor;
use crate::tensor::{Tensor, TensorDesc};
use crate::types::ModelConfig;
use anyhow::Context;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutputRole {
    LocRow,
    LocCol,
    ExistRow,
    ExistCol,
}

impl OutputRole {
    pub const ALL: [OutputRole; 4] = [
        OutputRole::LocRow,
        OutputRole::LocCol,
        OutputRole::ExistRow,
        OutputRole::ExistCol,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputRole::LocRow => "loc_row",
            OutputRole::LocCol => "loc_col",
            OutputRole::ExistRow => "exist_row",
            OutputRole::ExistCol => "exist_col",
        }
    }
}

impl fmt::Display for OutputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("missing required outputs {missing:?}; check the model output shapes against the config")]
    MissingRoles { missing: Vec<OutputRole> },
}

/// Expected shape for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeSignature {
    pub role: OutputRole,
    pub shape: [usize; 4],
}

impl ShapeSignature {
    pub fn matches(&self, shape: &[usize]) -> bool {
        shape == self.shape.as_slice()
    }

    /// Like [`matches`](Self::matches) but a declared `0` (dynamic) dimension
    /// accepts anything.
    pub fn admits_declared(&self, shape: &[usize]) -> bool {
        shape.len() == 4
            && shape
                .iter()
                .zip(self.shape.iter())
                .all(|(&declared, &want)| declared == 0 || declared == want)
    }
}

/// The four raw network heads of one frame.
#[derive(Debug, Clone)]
pub struct RawPrediction {
    pub loc_row: Tensor,
    pub loc_col: Tensor,
    pub exist_row: Tensor,
    pub exist_col: Tensor,
}

impl RawPrediction {
    pub fn get(&self, role: OutputRole) -> &Tensor {
        match role {
            OutputRole::LocRow => &self.loc_row,
            OutputRole::LocCol => &self.loc_col,
            OutputRole::ExistRow => &self.exist_row,
            OutputRole::ExistCol => &self.exist_col,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputRouter {
    signatures: [ShapeSignature; 4],
    debug: bool,
}

impl OutputRouter {
    pub fn new(model: &ModelConfig, debug: bool) -> Self {
        let lanes = model.num_lanes;
        Self {
            signatures: [
                ShapeSignature {
                    role: OutputRole::LocRow,
                    shape: [1, model.num_cell_row, model.num_row, lanes],
                },
                ShapeSignature {
                    role: OutputRole::LocCol,
                    shape: [1, model.num_cell_col, model.num_col, lanes],
                },
                ShapeSignature {
                    role: OutputRole::ExistRow,
                    shape: [1, 2, model.num_row, lanes],
                },
                ShapeSignature {
                    role: OutputRole::ExistCol,
                    shape: [1, 2, model.num_col, lanes],
                },
            ],
            debug,
        }
    }

    /// Startup check against the declared output shapes. Fails when some role
    /// has no declared output that could ever carry it.
    pub fn validate_declared(&self, outputs: &[TensorDesc]) -> Result<(), RouteError> {
        let missing: Vec<OutputRole> = self
            .signatures
            .iter()
            .filter(|sig| !outputs.iter().any(|d| sig.admits_declared(&d.shape)))
            .map(|sig| sig.role)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RouteError::MissingRoles { missing })
        }
    }

    /// Assign each tensor to the first unfilled role whose shape it matches.
    /// Unmatched and surplus tensors are dropped.
    pub fn route(
        &self,
        outputs: impl IntoIterator<Item = (String, Tensor)>,
    ) -> Result<RawPrediction, RouteError> {
        let mut slots: [Option<Tensor>; 4] = [None, None, None, None];

        for (name, tensor) in outputs {
            let target = self
                .signatures
                .iter()
                .enumerate()
                .find(|(i, sig)| slots[*i].is_none() && sig.matches(tensor.shape()));

            match target {
                Some((i, _)) => slots[i] = Some(tensor),
                None => {
                    if self.debug {
                        debug!("Unroutable output: {} shape={:?}", name, tensor.shape());
                    }
                }
            }
        }

        let missing: Vec<OutputRole> = OutputRole::ALL
            .iter()
            .zip(slots.iter())
            .filter(|(_, slot)| slot.is_none())
            .map(|(role, _)| *role)
            .collect();
        if !missing.is_empty() {
            return Err(RouteError::MissingRoles { missing });
        }

        let [loc_row, loc_col, exist_row, exist_col] = slots;
        match (loc_row, loc_col, exist_row, exist_col) {
            (Some(loc_row), Some(loc_col), Some(exist_row), Some(exist_col)) => Ok(RawPrediction {
                loc_row,
                loc_col,
                exist_row,
                exist_col,
            }),
            _ => Err(RouteError::MissingRoles {
                missing: OutputRole::ALL.to_vec(),
            }),
        }
    }

    /// Pull every output of the last invocation and route it.
    pub fn collect<E: TensorExecutor + ?Sized>(&self, executor: &E) -> anyhow::Result<RawPrediction> {
        let mut tensors = Vec::new();
        for desc in executor.output_details() {
            let tensor = executor
                .get_output(desc.index)
                .with_context(|| format!("Failed to read output {}", desc.name))?;
            tensors.push((desc.name, tensor));
        }
        Ok(self.route(tensors)?)
    }
}
