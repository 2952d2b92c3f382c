use graphport_core::{AbiError, TensorError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("release of cache key {key:?} without a matching acquire")]
    UnknownKey { key: String },
    #[error("backend graph cache lock poisoned")]
    Poisoned,
}

/// Every way constructing or running an ONNXIFI operator can fail. None of them are retried.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("input_names has {names} entries but the operator declares {arity} inputs")]
    InputArity { names: usize, arity: usize },
    #[error("output_names has {names} entries but the operator declares {arity} outputs")]
    OutputArity { names: usize, arity: usize },
    #[error("onnx_model cannot be empty")]
    EmptyModel,
    #[error("initializers should come in pairs, got {0} entries")]
    OddInitializers(usize),
    #[error("unfulfilled initializer {0:?}")]
    MissingInitializer(String),
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("invalid shape hint for output {index}: {reason}")]
    InvalidShapeHint { index: usize, reason: String },
    #[error("tensor {0:?} is not in the tensor store")]
    MissingTensor(String),
    #[error("at least 1 onnxifi backend should be available")]
    NoBackends,
    #[error("backend index out of bound: {index}, #backends: {count}")]
    BackendIndexOutOfRange { index: i64, count: usize },
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl OpError {
    pub(crate) fn invalid_argument(name: &str, reason: impl Into<String>) -> Self {
        OpError::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = OpError> = std::result::Result<T, E>;
