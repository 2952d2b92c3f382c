use std::collections::HashMap;

use graphport_core::{DataType, OutputShape, Shape, ShapeHint, TensorDescriptor};

use crate::config::{args, OperatorDef};
use crate::error::{OpError, Result};
use crate::store::TensorStore;

/// Input/output descriptors for one operator instance.
///
/// The backend binds by name while the operator binds by position, so descriptor
/// `i` always carries the i-th declared graph name and is filled from the i-th
/// operator tensor. The lists never change size or order after construction.
#[derive(Debug)]
pub struct TensorBinder {
    inputs: Vec<TensorDescriptor>,
    outputs: Vec<TensorDescriptor>,
    output_shape_hints: HashMap<usize, ShapeHint>,
}

impl TensorBinder {
    pub fn new(
        input_names: &[String],
        output_names: &[String],
        output_shape_hints: HashMap<usize, ShapeHint>,
    ) -> Result<Self> {
        Ok(Self {
            inputs: descriptors(args::INPUT_NAMES, input_names)?,
            outputs: descriptors(args::OUTPUT_NAMES, output_names)?,
            output_shape_hints,
        })
    }

    pub fn from_def(
        def: &OperatorDef,
        input_names: &[String],
        output_names: &[String],
    ) -> Result<Self> {
        let hints = parse_output_shape_hints(def, output_names.len())?;
        Self::new(input_names, output_names, hints)
    }

    /// A registered hint always wins; otherwise FLOAT32 with dims left to the backend.
    pub fn resolve_output_shape(&self, index: usize) -> OutputShape {
        self.output_shape_hints
            .get(&index)
            .map(OutputShape::from)
            .unwrap_or_default()
    }

    /// Points every descriptor at the live tensors in `store`.
    ///
    /// Outputs are shaped first and all addresses are taken afterwards, so no buffer
    /// is reallocated once its address has been recorded.
    pub fn bind(
        &mut self,
        op_inputs: &[String],
        op_outputs: &[String],
        store: &mut dyn TensorStore,
    ) -> Result<()> {
        for (index, name) in op_outputs.iter().enumerate() {
            let resolved = self.resolve_output_shape(index);
            let tensor = store.tensor_mut_or_insert(name);
            let dims = resolved
                .dims
                .unwrap_or_else(|| tensor.shape().clone());
            if tensor.dtype() != resolved.data_type || *tensor.shape() != dims {
                tensor.reshape(resolved.data_type, dims)?;
            }
        }

        for (desc, name) in self.outputs.iter_mut().zip(op_outputs) {
            let tensor = store.tensor_mut_or_insert(name);
            desc.data_type = tensor.dtype();
            desc.dims = tensor.shape().clone();
            desc.buffer = tensor.as_mut_ptr() as u64;
        }

        for (desc, name) in self.inputs.iter_mut().zip(op_inputs) {
            let tensor = store
                .tensor(name)
                .ok_or_else(|| OpError::MissingTensor(name.clone()))?;
            desc.data_type = tensor.dtype();
            desc.dims = tensor.shape().clone();
            desc.buffer = tensor.as_ptr() as u64;
        }
        Ok(())
    }

    pub fn input_descriptors(&self) -> &[TensorDescriptor] {
        &self.inputs
    }

    pub fn output_descriptors(&self) -> &[TensorDescriptor] {
        &self.outputs
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(TensorDescriptor::name).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(TensorDescriptor::name).collect()
    }
}

/// Reads `output_shape_hint_<i>`: first element is the type tag, the rest are dims.
pub fn parse_output_shape_hints(
    def: &OperatorDef,
    output_count: usize,
) -> Result<HashMap<usize, ShapeHint>> {
    let mut hints = HashMap::new();
    for index in 0..output_count {
        let raw = def.repeated_ints(&format!("{}{index}", args::OUTPUT_SHAPE_HINT_PREFIX))?;
        let Some((&tag, dims)) = raw.split_first() else {
            continue;
        };
        let data_type = DataType::from_tag(tag).ok_or_else(|| OpError::InvalidShapeHint {
            index,
            reason: format!("unknown element type tag {tag}"),
        })?;
        let dims = dims
            .iter()
            .map(|d| u64::try_from(*d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| OpError::InvalidShapeHint {
                index,
                reason: format!("negative dimension in {dims:?}"),
            })?;
        let dims = Shape::from_slice(&dims);
        if dims.byte_len(data_type).is_none() {
            return Err(OpError::InvalidShapeHint {
                index,
                reason: format!("{data_type:?} tensor of shape {:?} overflows", dims.dims()),
            });
        }
        hints.insert(index, ShapeHint { data_type, dims });
    }
    Ok(hints)
}

fn descriptors(arg: &str, names: &[String]) -> Result<Vec<TensorDescriptor>> {
    names
        .iter()
        .map(|name| {
            TensorDescriptor::new(name).map_err(|e| OpError::invalid_argument(arg, e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use graphport_core::HostTensor;

    use super::*;
    use crate::store::Workspace;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hint_overrides_and_default_defers() {
        let def = OperatorDef::new("op").arg("output_shape_hint_1", vec![7i64, 2, 3]);
        let binder = TensorBinder::from_def(&def, &[], &names(&["a", "b"])).unwrap();

        assert_eq!(binder.resolve_output_shape(0), OutputShape::default());
        assert_eq!(
            binder.resolve_output_shape(1),
            OutputShape {
                data_type: DataType::I64,
                dims: Some(Shape::from_slice(&[2, 3])),
            }
        );
    }

    #[test]
    fn bad_hints_are_configuration_errors() {
        let def = OperatorDef::new("op").arg("output_shape_hint_0", vec![99i64, 2]);
        assert!(matches!(
            parse_output_shape_hints(&def, 1),
            Err(OpError::InvalidShapeHint { index: 0, .. })
        ));
        let def = OperatorDef::new("op").arg("output_shape_hint_0", vec![1i64, -2]);
        assert!(parse_output_shape_hints(&def, 1).is_err());
    }

    #[test]
    fn hint_too_large_to_allocate_is_rejected() {
        let def = OperatorDef::new("op").arg("output_shape_hint_0", vec![1i64, 1, 1 << 32, 1 << 32]);
        assert!(matches!(
            parse_output_shape_hints(&def, 1),
            Err(OpError::InvalidShapeHint { index: 0, .. })
        ));
        // Element count fits, byte count does not.
        let def = OperatorDef::new("op").arg("output_shape_hint_0", vec![7i64, 1 << 31, 1 << 31]);
        assert!(parse_output_shape_hints(&def, 1).is_err());
    }

    #[test]
    fn bind_without_hint_keeps_stored_output_shape() {
        let mut binder = TensorBinder::new(&names(&["x"]), &names(&["z"]), HashMap::new()).unwrap();
        let mut ws = Workspace::new();
        ws.insert("in", HostTensor::from_f32(&[3], &[1.0, 2.0, 3.0]).unwrap());
        ws.insert("out", HostTensor::zeros(DataType::F32, Shape::from_slice(&[3])).unwrap());

        binder
            .bind(&names(&["in"]), &names(&["out"]), &mut ws)
            .unwrap();
        assert_eq!(binder.output_descriptors()[0].dims.dims(), &[3]);
        assert_eq!(binder.input_descriptors()[0].name(), "x");
        assert_eq!(
            binder.input_descriptors()[0].buffer,
            ws.get("in").unwrap().as_ptr() as u64
        );
    }

    #[test]
    fn missing_input_names_the_tensor() {
        let mut binder = TensorBinder::new(&names(&["x"]), &[], HashMap::new()).unwrap();
        let mut ws = Workspace::new();
        let err = binder.bind(&names(&["gone"]), &[], &mut ws).unwrap_err();
        assert!(matches!(err, OpError::MissingTensor(name) if name == "gone"));
    }
}
