use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{OpError, Result};

/// Argument names understood by the ONNXIFI operator.
pub mod args {
    pub const ONNX_MODEL: &str = "onnx_model";
    pub const INPUT_NAMES: &str = "input_names";
    pub const OUTPUT_NAMES: &str = "output_names";
    pub const OUTPUT_SHAPE_HINT_PREFIX: &str = "output_shape_hint_";
    pub const INITIALIZERS: &str = "initializers";
    pub const BACKEND_ID: &str = "backend_id";
    pub const MODEL_ID: &str = "model_id";
    pub const NET_POS: &str = "net_pos";
    pub const CUSTOM_PREFIX: &str = "custom_";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strs(Vec<String>),
    Bytes(Bytes),
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Float(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::Str(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::Str(v)
    }
}

impl From<Vec<i64>> for Argument {
    fn from(v: Vec<i64>) -> Self {
        Argument::Ints(v)
    }
}

impl From<Vec<&str>> for Argument {
    fn from(v: Vec<&str>) -> Self {
        Argument::Strs(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Argument {
    fn from(v: Vec<String>) -> Self {
        Argument::Strs(v)
    }
}

impl From<Bytes> for Argument {
    fn from(v: Bytes) -> Self {
        Argument::Bytes(v)
    }
}

/// Operator configuration handed over by the executor: tensor names by position plus arguments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
    #[serde(default)]
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub args: BTreeMap<String, Argument>,
}

impl OperatorDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Argument>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.args.get(name)
    }

    pub fn single_str(&self, name: &str, default: &str) -> Result<String> {
        match self.get(name) {
            None => Ok(default.to_string()),
            Some(Argument::Str(v)) => Ok(v.clone()),
            Some(other) => Err(wrong_kind(name, "a string", other)),
        }
    }

    pub fn single_int(&self, name: &str, default: i64) -> Result<i64> {
        match self.get(name) {
            None => Ok(default),
            Some(Argument::Int(v)) => Ok(*v),
            Some(other) => Err(wrong_kind(name, "an integer", other)),
        }
    }

    pub fn repeated_strs(&self, name: &str) -> Result<Vec<String>> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(Argument::Strs(v)) => Ok(v.clone()),
            Some(Argument::Ints(v)) if v.is_empty() => Ok(Vec::new()),
            Some(other) => Err(wrong_kind(name, "a string list", other)),
        }
    }

    pub fn repeated_ints(&self, name: &str) -> Result<Vec<i64>> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(Argument::Ints(v)) => Ok(v.clone()),
            Some(Argument::Strs(v)) if v.is_empty() => Ok(Vec::new()),
            Some(other) => Err(wrong_kind(name, "an integer list", other)),
        }
    }

    /// Raw bytes from either a bytes or a string argument; missing reads as empty.
    pub fn bytes(&self, name: &str) -> Result<Bytes> {
        match self.get(name) {
            None => Ok(Bytes::new()),
            Some(Argument::Bytes(v)) => Ok(v.clone()),
            Some(Argument::Str(v)) => Ok(Bytes::copy_from_slice(v.as_bytes())),
            Some(other) => Err(wrong_kind(name, "bytes", other)),
        }
    }
}

fn wrong_kind(name: &str, expected: &str, got: &Argument) -> OpError {
    OpError::invalid_argument(name, format!("expected {expected}, got {got:?}"))
}
