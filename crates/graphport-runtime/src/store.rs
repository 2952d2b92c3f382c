use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use graphport_core::abi::OnnxTensorDescriptorV1;
use graphport_core::{DataType, HostTensor, Shape, TensorDescriptor};

use crate::error::{OpError, Result};

/// Host-side tensor storage the operator reads inputs from and writes outputs into.
pub trait TensorStore {
    fn tensor(&self, name: &str) -> Option<&HostTensor>;

    /// Creates a rank-0 FLOAT32 tensor when `name` is not present yet.
    fn tensor_mut_or_insert(&mut self, name: &str) -> &mut HostTensor;

    /// One weight descriptor per requested initializer, named by its original (graph) name.
    fn initializer_descriptors(&self, mapping: &InitializerMapping) -> Result<InitializerList<'_>> {
        let mut list = InitializerList::default();
        for original in mapping.originals() {
            let stored = mapping.workspace_name(original);
            let tensor = self
                .tensor(stored)
                .ok_or_else(|| OpError::MissingInitializer(original.to_string()))?;
            let mut desc = TensorDescriptor::new(original)
                .map_err(|e| OpError::invalid_argument("initializers", e.to_string()))?;
            desc.data_type = tensor.dtype();
            desc.dims = tensor.shape().clone();
            desc.buffer = tensor.as_ptr() as u64;
            list.names.push(original.to_string());
            list.shapes.push(tensor.shape().clone());
            list.descriptors.push(desc);
        }
        Ok(list)
    }
}

/// Parsed `initializers` argument: original graph name -> tensor store name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitializerMapping {
    renames: HashMap<String, String>,
    originals: Vec<String>,
}

impl InitializerMapping {
    /// `pairs` is a flat `[original, stored, original, stored, ...]` list.
    pub fn parse(pairs: &[String]) -> Result<Self> {
        if pairs.len() % 2 != 0 {
            return Err(OpError::OddInitializers(pairs.len()));
        }
        let mut mapping = Self::default();
        let mut seen = HashSet::new();
        for pair in pairs.chunks_exact(2) {
            let (original, stored) = (&pair[0], &pair[1]);
            mapping.renames.insert(original.clone(), stored.clone());
            if seen.insert(original.clone()) {
                mapping.originals.push(original.clone());
            }
        }
        Ok(mapping)
    }

    pub fn originals(&self) -> impl Iterator<Item = &str> {
        self.originals.iter().map(String::as_str)
    }

    pub fn workspace_name<'a>(&'a self, original: &'a str) -> &'a str {
        self.renames
            .get(original)
            .map(String::as_str)
            .unwrap_or(original)
    }
}

/// Weight descriptors whose buffers borrow from the tensor store that produced them.
#[derive(Debug, Default)]
pub struct InitializerList<'a> {
    pub descriptors: Vec<TensorDescriptor>,
    pub names: Vec<String>,
    pub shapes: Vec<Shape>,
    _store: PhantomData<&'a ()>,
}

impl InitializerList<'_> {
    pub fn raw(&self) -> Vec<OnnxTensorDescriptorV1> {
        self.descriptors.iter().map(TensorDescriptor::as_raw).collect()
    }
}

/// In-memory tensor store keyed by tensor name.
#[derive(Clone, Debug, Default)]
pub struct Workspace {
    tensors: HashMap<String, HostTensor>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: HostTensor) -> Option<HostTensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&HostTensor> {
        self.tensors.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<HostTensor> {
        self.tensors.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl TensorStore for Workspace {
    fn tensor(&self, name: &str) -> Option<&HostTensor> {
        self.tensors.get(name)
    }

    fn tensor_mut_or_insert(&mut self, name: &str) -> &mut HostTensor {
        self.tensors
            .entry(name.to_string())
            .or_insert_with(|| HostTensor::scalar(DataType::F32))
    }
}
