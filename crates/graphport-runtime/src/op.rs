use std::sync::Arc;

use graphport_core::{OnnxifiLibrary, Shape};
use tracing::debug;

use crate::binder::TensorBinder;
use crate::builder::{io_names, GraphBuilder};
use crate::config::OperatorDef;
use crate::dispatch::ExecutionDispatcher;
use crate::error::Result;
use crate::graph::{BackendGraph, BackendGraphCache, BackendGraphLease};
use crate::store::TensorStore;

/// An executor-side operator that delegates its whole subgraph to an ONNXIFI backend.
///
/// Construction compiles (or joins) the shared backend graph; `run` executes it once;
/// dropping the operator releases its reference on the shared graph.
pub struct OnnxifiOp {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    binder: TensorBinder,
    dispatcher: ExecutionDispatcher,
    initializer_names: Vec<String>,
    initializer_shapes: Vec<Shape>,
    graph: BackendGraphLease,
}

impl OnnxifiOp {
    pub fn new(
        def: &OperatorDef,
        store: &dyn TensorStore,
        library: Arc<OnnxifiLibrary>,
        cache: Arc<BackendGraphCache>,
    ) -> Result<Self> {
        let (input_names, output_names) = io_names(def)?;
        let binder = TensorBinder::from_def(def, &input_names, &output_names)?;
        let built = GraphBuilder::new(def, &library, &cache).build(store)?;

        debug!(
            op = %def.name,
            key = built.lease.key(),
            inputs = input_names.len(),
            outputs = output_names.len(),
            "constructed ONNXIFI op"
        );

        Ok(Self {
            name: def.name.clone(),
            inputs: def.inputs.clone(),
            outputs: def.outputs.clone(),
            binder,
            dispatcher: ExecutionDispatcher::new(built.run_with_fence),
            initializer_names: built.initializer_names,
            initializer_shapes: built.initializer_shapes,
            graph: built.lease,
        })
    }

    pub fn run(&mut self, store: &mut dyn TensorStore) -> Result<()> {
        self.binder.bind(&self.inputs, &self.outputs, store)?;
        // SAFETY: Descriptors point into `store`, which stays exclusively borrowed until
        // dispatch returns and the backend has signalled completion.
        unsafe {
            self.dispatcher.dispatch(
                &self.graph,
                self.binder.input_descriptors(),
                self.binder.output_descriptors(),
            )
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_key(&self) -> &str {
        self.graph.key()
    }

    pub fn backend_graph(&self) -> &BackendGraph {
        &self.graph
    }

    pub fn shares_backend_graph_with(&self, other: &OnnxifiOp) -> bool {
        self.graph.ptr_eq(&other.graph)
    }

    pub fn binder(&self) -> &TensorBinder {
        &self.binder
    }

    pub fn uses_fenced_path(&self) -> bool {
        self.dispatcher.uses_fenced_path()
    }

    /// Operator-side tensor names of the outputs, by position.
    pub fn output_tensors(&self) -> &[String] {
        &self.outputs
    }

    pub fn initializer_names(&self) -> &[String] {
        &self.initializer_names
    }

    pub fn initializer_shapes(&self) -> &[Shape] {
        &self.initializer_shapes
    }
}
