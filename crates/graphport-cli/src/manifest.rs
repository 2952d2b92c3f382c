use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use bytes::Bytes;
use graphport_core::{DataType, HostTensor, Shape};
use graphport_runtime::{args, Argument, OperatorDef, Workspace};
use serde::Deserialize;

/// A delegated operator plus the tensors it is run on.
///
/// `model_path` is resolved against the manifest's directory and loaded into `onnx_model`.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    pub op: OperatorDef,
    pub model_path: PathBuf,
    #[serde(default)]
    pub tensors: Vec<TensorFill>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TensorFill {
    pub name: String,
    pub shape: Vec<u64>,
    #[serde(default)]
    pub fill: f32,
}

impl TensorFill {
    pub fn tensor(&self) -> Result<HostTensor> {
        let shape = Shape::from_slice(&self.shape);
        let numel = shape
            .byte_len(DataType::F32)
            .and(shape.numel())
            .with_context(|| format!("tensor {} has too many elements", self.name))?;
        let tensor = HostTensor::from_f32(&self.shape, &vec![self.fill; numel])
            .with_context(|| format!("filling tensor {}", self.name))?;
        Ok(tensor)
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let mut manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing manifest {}", path.display()))?;

        let model_path = match path.parent() {
            Some(dir) => dir.join(&manifest.model_path),
            None => manifest.model_path.clone(),
        };
        let model = std::fs::read(&model_path)
            .with_context(|| format!("reading model {}", model_path.display()))?;
        ensure!(!model.is_empty(), "model {} is empty", model_path.display());
        manifest
            .op
            .args
            .insert(args::ONNX_MODEL.to_string(), Argument::Bytes(Bytes::from(model)));
        Ok(manifest)
    }

    /// A fresh tensor store holding every declared tensor.
    pub fn workspace(&self) -> Result<Workspace> {
        let mut ws = Workspace::new();
        for fill in &self.tensors {
            ws.insert(fill.name.clone(), fill.tensor()?);
        }
        Ok(ws)
    }

    /// The declared tensors that feed the operator's inputs, in input order.
    pub fn job_inputs(&self) -> Result<Vec<(String, HostTensor)>> {
        self.op
            .inputs
            .iter()
            .map(|name| {
                let fill = self
                    .tensors
                    .iter()
                    .find(|t| &t.name == name)
                    .with_context(|| format!("no tensor declared for input {name}"))?;
                Ok((name.clone(), fill.tensor()?))
            })
            .collect()
    }
}

/// First few values of a tensor for logging.
pub fn preview(tensor: &HostTensor, count: usize) -> String {
    match (tensor.dtype(), tensor.to_f32()) {
        (DataType::F32, Some(values)) => format!("{:?}", &values[..values.len().min(count)]),
        (dtype, _) => format!("<{dtype:?}, {} bytes>", tensor.byte_len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "name": "onnxifi_add",
        "inputs": ["a", "b"],
        "outputs": ["c"],
        "args": {
            "input_names": ["x", "y"],
            "output_names": ["z"],
            "output_shape_hint_0": [1, 2, 5],
            "model_id": "demo",
            "net_pos": "0",
            "backend_id": 1
        },
        "model_path": "add.txt",
        "tensors": [
            {"name": "a", "shape": [10], "fill": 1.5},
            {"name": "b", "shape": [10], "fill": 2.0}
        ]
    }"#;

    #[test]
    fn loads_manifest_and_model() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("graphport-manifest-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("add.txt"), "z = add x y\n")?;
        let path = dir.join("manifest.json");
        std::fs::write(&path, MANIFEST)?;

        let manifest = Manifest::load(&path)?;
        assert_eq!(manifest.op.inputs, vec!["a", "b"]);
        assert_eq!(manifest.op.single_int(args::BACKEND_ID, 0)?, 1);
        assert_eq!(manifest.op.repeated_ints("output_shape_hint_0")?, vec![1, 2, 5]);
        assert_eq!(&manifest.op.bytes(args::ONNX_MODEL)?[..], b"z = add x y\n");

        let inputs = manifest.job_inputs()?;
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].1.to_f32(), Some(vec![1.5; 10]));
        assert_eq!(manifest.workspace()?.len(), 2);

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn undeclared_input_is_reported() {
        let manifest = Manifest {
            op: OperatorDef::new("op").input("missing"),
            model_path: PathBuf::from("unused"),
            tensors: Vec::new(),
        };
        let err = manifest.job_inputs().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn oversized_tensor_is_an_error() {
        let fill = TensorFill {
            name: "huge".to_string(),
            shape: vec![u64::MAX, 2],
            fill: 0.0,
        };
        let err = fill.tensor().unwrap_err();
        assert!(err.to_string().contains("huge"), "{err}");
    }
}
