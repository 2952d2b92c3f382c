use graphport_core::abi::{OnnxMemoryFenceV1, OnnxTensorDescriptorV1, SetIoAndRunGraphFn};
use graphport_core::{check, AbiError, EventHandle, OnnxifiLibrary, TensorDescriptor};
use tracing::{trace, warn};

use crate::error::Result;
use crate::graph::BackendGraph;

/// Runs a bound graph through whichever execution protocol the backend advertised.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutionDispatcher {
    run_with_fence: Option<SetIoAndRunGraphFn>,
}

impl ExecutionDispatcher {
    /// `run_with_fence` is resolved once at build time and never looked up again.
    pub fn new(run_with_fence: Option<SetIoAndRunGraphFn>) -> Self {
        Self { run_with_fence }
    }

    pub fn uses_fenced_path(&self) -> bool {
        self.run_with_fence.is_some()
    }

    /// Executes one inference and returns once outputs are written.
    ///
    /// # Safety
    /// Every descriptor buffer must stay valid and unaliased until this returns.
    pub unsafe fn dispatch(
        &self,
        graph: &BackendGraph,
        inputs: &[TensorDescriptor],
        outputs: &[TensorDescriptor],
    ) -> Result<()> {
        let raw_inputs: Vec<_> = inputs.iter().map(TensorDescriptor::as_raw).collect();
        let raw_outputs: Vec<_> = outputs.iter().map(TensorDescriptor::as_raw).collect();

        let _guard = graph.execution_guard();
        match self.run_with_fence {
            Some(run) => unsafe { run_fenced(graph, run, &raw_inputs, &raw_outputs)? },
            None => unsafe { run_plain(graph, &raw_inputs, &raw_outputs)? },
        }
        Ok(())
    }
}

unsafe fn run_fenced(
    graph: &BackendGraph,
    run: SetIoAndRunGraphFn,
    inputs: &[OnnxTensorDescriptorV1],
    outputs: &[OnnxTensorDescriptorV1],
) -> Result<(), AbiError> {
    let mut output_fence = OnnxMemoryFenceV1::event_fence();
    trace!(graph = graph.graph().addr(), "onnxSetIOAndRunGraph");
    let status = unsafe {
        run(
            graph.graph().as_raw(),
            inputs.len() as u32,
            inputs.as_ptr(),
            outputs.len() as u32,
            outputs.as_ptr(),
            &mut output_fence,
        )
    };
    if let Err(err) = check(status, "onnxSetIOAndRunGraphFunction") {
        release_quietly(graph.library(), EventHandle::from_raw(output_fence.event));
        return Err(err);
    }
    wait_and_release(graph.library(), EventHandle::from_raw(output_fence.event))
}

unsafe fn run_plain(
    graph: &BackendGraph,
    inputs: &[OnnxTensorDescriptorV1],
    outputs: &[OnnxTensorDescriptorV1],
) -> Result<(), AbiError> {
    let library = graph.library();
    unsafe { library.set_graph_io(graph.graph(), inputs, outputs)? };

    let input_event = library.init_event(graph.backend())?;
    let mut input_fence = OnnxMemoryFenceV1::event_fence();
    input_fence.event = input_event.as_raw();
    let mut output_fence = OnnxMemoryFenceV1::event_fence();

    trace!(graph = graph.graph().addr(), "onnxRunGraph");
    if let Err(err) = unsafe { library.run_graph(graph.graph(), &input_fence, &mut output_fence) } {
        release_quietly(library, input_event);
        return Err(err);
    }
    let output_event = EventHandle::from_raw(output_fence.event);

    if let Err(err) = library.signal_event(input_event) {
        release_quietly(library, input_event);
        release_quietly(library, output_event);
        return Err(err);
    }
    let waited = wait_and_release(library, output_event);
    let released = library.release_event(input_event);
    waited.and(released)
}

fn wait_and_release(library: &OnnxifiLibrary, event: EventHandle) -> Result<(), AbiError> {
    let waited = library.wait_event(event);
    let released = library.release_event(event);
    waited.and(released)
}

fn release_quietly(library: &OnnxifiLibrary, event: EventHandle) {
    if event.is_null() {
        return;
    }
    if let Err(err) = library.release_event(event) {
        warn!(error = %err, "failed to release fence event");
    }
}
