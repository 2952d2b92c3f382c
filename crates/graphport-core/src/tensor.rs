use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::abi::*;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("{dtype:?} tensor of shape {dims:?} does not fit in memory")]
    TooLarge { dtype: DataType, dims: Vec<u64> },
    #[error("shape {dims:?} holds {expected} values, got {got}")]
    ValueCount {
        dims: Vec<u64>,
        expected: usize,
        got: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F32,
    U8,
    I8,
    U16,
    I16,
    I32,
    I64,
    F16,
    F64,
    U32,
    U64,
}

impl DataType {
    pub fn tag(self) -> OnnxEnum {
        match self {
            DataType::F32 => ONNXIFI_DATATYPE_FLOAT32,
            DataType::U8 => ONNXIFI_DATATYPE_UINT8,
            DataType::I8 => ONNXIFI_DATATYPE_INT8,
            DataType::U16 => ONNXIFI_DATATYPE_UINT16,
            DataType::I16 => ONNXIFI_DATATYPE_INT16,
            DataType::I32 => ONNXIFI_DATATYPE_INT32,
            DataType::I64 => ONNXIFI_DATATYPE_INT64,
            DataType::F16 => ONNXIFI_DATATYPE_FLOAT16,
            DataType::F64 => ONNXIFI_DATATYPE_FLOAT64,
            DataType::U32 => ONNXIFI_DATATYPE_UINT32,
            DataType::U64 => ONNXIFI_DATATYPE_UINT64,
        }
    }

    /// `None` for `UNDEFINED` and for tags this crate does not know.
    pub fn from_tag(tag: i64) -> Option<Self> {
        let tag = OnnxEnum::try_from(tag).ok()?;
        Some(match tag {
            ONNXIFI_DATATYPE_FLOAT32 => DataType::F32,
            ONNXIFI_DATATYPE_UINT8 => DataType::U8,
            ONNXIFI_DATATYPE_INT8 => DataType::I8,
            ONNXIFI_DATATYPE_UINT16 => DataType::U16,
            ONNXIFI_DATATYPE_INT16 => DataType::I16,
            ONNXIFI_DATATYPE_INT32 => DataType::I32,
            ONNXIFI_DATATYPE_INT64 => DataType::I64,
            ONNXIFI_DATATYPE_FLOAT16 => DataType::F16,
            ONNXIFI_DATATYPE_FLOAT64 => DataType::F64,
            ONNXIFI_DATATYPE_UINT32 => DataType::U32,
            ONNXIFI_DATATYPE_UINT64 => DataType::U64,
            _ => return None,
        })
    }

    pub fn byte_size(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 | DataType::F16 => 2,
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::I64 | DataType::F64 | DataType::U64 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryType {
    #[default]
    Cpu,
}

impl MemoryType {
    pub fn tag(self) -> OnnxEnum {
        match self {
            MemoryType::Cpu => ONNXIFI_MEMORY_TYPE_CPU,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub SmallVec<[u64; 6]>);

impl Shape {
    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_slice(d: &[u64]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn dims(&self) -> &[u64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Rank 0 holds a single element. `None` when the product overflows `usize`.
    pub fn numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, d| {
            usize::try_from(*d).ok().and_then(|d| acc.checked_mul(d))
        })
    }

    pub fn byte_len(&self, dtype: DataType) -> Option<usize> {
        self.numel()?.checked_mul(dtype.byte_size())
    }
}

/// A host-resident tensor as kept by a tensor store.
#[derive(Clone, Debug)]
pub struct HostTensor {
    dtype: DataType,
    shape: Shape,
    data: BytesMut,
}

impl HostTensor {
    /// A single zeroed element of rank 0.
    pub fn scalar(dtype: DataType) -> Self {
        Self {
            dtype,
            shape: Shape::scalar(),
            data: BytesMut::zeroed(dtype.byte_size()),
        }
    }

    pub fn zeros(dtype: DataType, shape: Shape) -> Result<Self, TensorError> {
        let byte_len = checked_byte_len(dtype, &shape)?;
        Ok(Self {
            dtype,
            shape,
            data: BytesMut::zeroed(byte_len),
        })
    }

    pub fn from_f32(dims: &[u64], values: &[f32]) -> Result<Self, TensorError> {
        let shape = Shape::from_slice(dims);
        let expected = checked_byte_len(DataType::F32, &shape)? / 4;
        if expected != values.len() {
            return Err(TensorError::ValueCount {
                dims: dims.to_vec(),
                expected,
                got: values.len(),
            });
        }
        let mut data = BytesMut::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_ne_bytes());
        }
        Ok(Self {
            dtype: DataType::F32,
            shape,
            data,
        })
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// `None` unless the tensor holds FLOAT32 data.
    pub fn to_f32(&self) -> Option<Vec<f32>> {
        if self.dtype != DataType::F32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }

    /// Re-types and resizes the buffer in place. Existing bytes are kept where they still fit.
    pub fn reshape(&mut self, dtype: DataType, shape: Shape) -> Result<(), TensorError> {
        let byte_len = checked_byte_len(dtype, &shape)?;
        self.data.resize(byte_len, 0);
        self.dtype = dtype;
        self.shape = shape;
        Ok(())
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}

fn checked_byte_len(dtype: DataType, shape: &Shape) -> Result<usize, TensorError> {
    shape.byte_len(dtype).ok_or_else(|| TensorError::TooLarge {
        dtype,
        dims: shape.dims().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_resizes_storage() {
        let mut t = HostTensor::scalar(DataType::F32);
        assert_eq!(t.byte_len(), 4);
        t.reshape(DataType::I64, Shape::from_slice(&[2, 3])).unwrap();
        assert_eq!(t.byte_len(), 48);
        assert_eq!(t.shape().dims(), &[2, 3]);
    }

    #[test]
    fn overflowing_shapes_are_rejected() {
        let huge = Shape::from_slice(&[1, 1 << 32, 1 << 32]);
        assert_eq!(huge.numel(), None);
        assert_eq!(Shape::from_slice(&[1 << 31, 1 << 31]).byte_len(DataType::F32), None);
        assert_eq!(Shape::scalar().numel(), Some(1));

        let mut t = HostTensor::scalar(DataType::F32);
        assert!(matches!(
            t.reshape(DataType::F32, huge.clone()),
            Err(TensorError::TooLarge { .. })
        ));
        assert_eq!(t.shape(), &Shape::scalar());
        assert!(HostTensor::zeros(DataType::F32, huge).is_err());
    }

    #[test]
    fn value_count_must_match_shape() {
        assert_eq!(
            HostTensor::from_f32(&[2, 2], &[1.0; 3]).unwrap_err(),
            TensorError::ValueCount {
                dims: vec![2, 2],
                expected: 4,
                got: 3,
            }
        );
        let t = HostTensor::from_f32(&[2], &[1.0, 2.0]).unwrap();
        assert_eq!(t.to_f32(), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert_eq!(DataType::from_tag(1), Some(DataType::F32));
        assert_eq!(DataType::from_tag(0), None);
        assert_eq!(DataType::from_tag(9), None);
        assert_eq!(DataType::from_tag(i64::MAX), None);
    }
}
