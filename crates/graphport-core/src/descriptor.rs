use std::ffi::{CString, NulError};

use crate::abi::{OnnxTensorDescriptorV1, ONNXIFI_TAG_TENSOR_DESCRIPTOR_V1};
use crate::tensor::{DataType, MemoryType, Shape};

/// One bound input, output or weight.
///
/// The name is fixed at construction; type, dims and buffer are refreshed per call.
#[derive(Clone, Debug)]
pub struct TensorDescriptor {
    name: CString,
    pub data_type: DataType,
    pub memory_type: MemoryType,
    pub dims: Shape,
    pub buffer: u64,
}

impl TensorDescriptor {
    pub fn new(name: &str) -> Result<Self, NulError> {
        Ok(Self {
            name: CString::new(name)?,
            data_type: DataType::F32,
            memory_type: MemoryType::Cpu,
            dims: Shape::scalar(),
            buffer: 0,
        })
    }

    pub fn name(&self) -> &str {
        // Built from a &str, so always valid UTF-8.
        self.name.to_str().unwrap_or_default()
    }

    /// ABI view borrowing this descriptor's name and dims; do not move `self` while it is in use.
    pub fn as_raw(&self) -> OnnxTensorDescriptorV1 {
        OnnxTensorDescriptorV1 {
            tag: ONNXIFI_TAG_TENSOR_DESCRIPTOR_V1,
            name: self.name.as_ptr(),
            data_type: self.data_type.tag(),
            memory_type: self.memory_type.tag(),
            dimensions: self.dims.rank() as u32,
            shape: self.dims.dims().as_ptr(),
            buffer: self.buffer,
        }
    }
}

/// Declared output type/shape that overrides anything else for its position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapeHint {
    pub data_type: DataType,
    pub dims: Shape,
}

/// What the binder decided for one output on this call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputShape {
    pub data_type: DataType,
    /// `None` defers to whatever shape the backend/tensor store already reports.
    pub dims: Option<Shape>,
}

impl From<&ShapeHint> for OutputShape {
    fn from(hint: &ShapeHint) -> Self {
        Self {
            data_type: hint.data_type,
            dims: Some(hint.dims.clone()),
        }
    }
}

impl Default for OutputShape {
    fn default() -> Self {
        Self {
            data_type: DataType::F32,
            dims: None,
        }
    }
}
