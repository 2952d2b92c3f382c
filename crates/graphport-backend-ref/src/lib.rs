//! A CPU ONNXIFI backend written in Rust.
//!
//! It exports the full ONNXIFI entry-point table (also as a `cdylib`) and executes
//! the small text model format in [`model`]. Two backends are enumerated:
//!
//! | index | name         | capabilities  | `onnxSetIOAndRunGraphFunction` |
//! |-------|--------------|---------------|--------------------------------|
//! | 0     | `ref-sync`   | none          | no                             |
//! | 1     | `ref-fenced` | `THREAD_SAFE` | yes                            |
//!
//! Every entry point records an [`AbiCall`] in a per-thread [`journal`].

#![allow(non_snake_case)]

mod event;
pub mod journal;
pub mod model;

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::sync::{Arc, Mutex};

use graphport_core::abi::*;
use graphport_core::{OnnxifiFns, OnnxifiLibrary};
use tracing::{debug, trace};

use crate::event::RefEvent;
pub use crate::event::open_events;
pub use crate::journal::AbiCall;
use crate::model::{evaluate, Program, Value};

pub const SYNC_BACKEND: i64 = 0;
pub const FENCED_BACKEND: i64 = 1;

struct BackendKind {
    name: &'static str,
    capabilities: u64,
    fenced: bool,
}

static BACKENDS: [BackendKind; 2] = [
    BackendKind {
        name: "ref-sync",
        capabilities: 0,
        fenced: false,
    },
    BackendKind {
        name: "ref-fenced",
        capabilities: ONNXIFI_CAPABILITY_THREAD_SAFE,
        fenced: true,
    },
];

/// The entry-point table of this crate, linked in-process.
pub fn library() -> OnnxifiLibrary {
    OnnxifiLibrary::from_fns(
        "graphport-backend-ref",
        OnnxifiFns {
            get_backend_ids: onnxGetBackendIDs,
            release_backend_id: onnxReleaseBackendID,
            get_backend_info: onnxGetBackendInfo,
            init_backend: onnxInitBackend,
            release_backend: onnxReleaseBackend,
            init_event: onnxInitEvent,
            signal_event: onnxSignalEvent,
            wait_event: onnxWaitEvent,
            release_event: onnxReleaseEvent,
            init_graph: onnxInitGraph,
            set_graph_io: onnxSetGraphIO,
            run_graph: onnxRunGraph,
            release_graph: onnxReleaseGraph,
            get_extension_function_address: onnxGetExtensionFunctionAddress,
        },
    )
}

struct RefBackendId {
    index: usize,
}

struct RefBackend {
    index: usize,
}

struct GraphCore {
    program: Program,
    weights: HashMap<String, Value>,
}

struct RefGraph {
    core: Arc<GraphCore>,
    io: Mutex<Option<BoundIo>>,
}

#[derive(Clone, Debug)]
struct BoundTensor {
    name: String,
    data_type: OnnxEnum,
    dims: Vec<u64>,
    /// Element count; its FLOAT32 byte size fits in `usize`.
    numel: usize,
    buffer: OnnxPointer,
}

impl BoundTensor {
    /// # Safety
    /// `buffer` must hold `numel` FLOAT32 values.
    unsafe fn read_f32(&self) -> Result<Value, OnnxStatus> {
        if self.data_type != ONNXIFI_DATATYPE_FLOAT32 {
            return Err(ONNXIFI_STATUS_UNSUPPORTED_DATATYPE);
        }
        let len = self.numel * 4;
        let bytes: &[u8] = if len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.buffer as *const u8, len) }
        };
        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Value {
            dims: self.dims.clone(),
            data,
        })
    }

    /// # Safety
    /// `buffer` must be writable for `numel` FLOAT32 values.
    unsafe fn write_f32(&self, value: &Value) -> Result<(), OnnxStatus> {
        if self.data_type != ONNXIFI_DATATYPE_FLOAT32 {
            return Err(ONNXIFI_STATUS_UNSUPPORTED_DATATYPE);
        }
        if self.numel != value.data.len() {
            return Err(ONNXIFI_STATUS_MISMATCHING_SHAPE);
        }
        let dst = self.buffer as *mut u8;
        for (i, v) in value.data.iter().enumerate() {
            let bytes = v.to_ne_bytes();
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(i * 4), 4) };
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct BoundIo {
    inputs: Vec<BoundTensor>,
    outputs: Vec<BoundTensor>,
}

impl BoundIo {
    fn names(tensors: &[BoundTensor]) -> Vec<String> {
        tensors.iter().map(|t| t.name.clone()).collect()
    }
}

fn status_of(result: Result<(), OnnxStatus>) -> OnnxStatus {
    match result {
        Ok(()) => ONNXIFI_STATUS_SUCCESS,
        Err(status) => status,
    }
}

/// # Safety
/// `ptr` must point at `count` descriptors whose names and shapes are readable.
unsafe fn read_descriptors(
    ptr: *const OnnxTensorDescriptorV1,
    count: u32,
) -> Result<Vec<BoundTensor>, OnnxStatus> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(ONNXIFI_STATUS_INVALID_POINTER);
    }
    let raw = unsafe { std::slice::from_raw_parts(ptr, count as usize) };
    raw.iter()
        .map(|desc| {
            if desc.tag != ONNXIFI_TAG_TENSOR_DESCRIPTOR_V1 {
                return Err(ONNXIFI_STATUS_UNSUPPORTED_TAG);
            }
            if desc.name.is_null() {
                return Err(ONNXIFI_STATUS_INVALID_NAME);
            }
            if desc.memory_type != ONNXIFI_MEMORY_TYPE_CPU {
                return Err(ONNXIFI_STATUS_INVALID_MEMORY_TYPE);
            }
            if desc.dimensions > 0 && desc.shape.is_null() {
                return Err(ONNXIFI_STATUS_INVALID_SHAPE);
            }
            let name = unsafe { CStr::from_ptr(desc.name) }
                .to_string_lossy()
                .into_owned();
            let dims = if desc.dimensions == 0 {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(desc.shape, desc.dimensions as usize) }.to_vec()
            };
            let numel = dims
                .iter()
                .try_fold(1usize, |acc, d| acc.checked_mul(usize::try_from(*d).ok()?))
                .filter(|n| n.checked_mul(4).is_some())
                .ok_or(ONNXIFI_STATUS_INVALID_SHAPE)?;
            let tensor = BoundTensor {
                name,
                data_type: desc.data_type,
                dims,
                numel,
                buffer: desc.buffer,
            };
            if tensor.buffer == 0 && tensor.numel > 0 {
                return Err(ONNXIFI_STATUS_INVALID_MEMORY_LOCATION);
            }
            Ok(tensor)
        })
        .collect()
}

fn check_outputs(core: &GraphCore, outputs: &[BoundTensor]) -> Result<(), OnnxStatus> {
    match outputs.iter().find(|t| !core.program.produces(&t.name)) {
        Some(_) => Err(ONNXIFI_STATUS_UNIDENTIFIED_NAME),
        None => Ok(()),
    }
}

/// # Safety
/// Every buffer in `io` must be valid for its descriptor.
unsafe fn execute(core: &GraphCore, io: &BoundIo) -> Result<(), OnnxStatus> {
    let mut env = core.weights.clone();
    for input in &io.inputs {
        env.insert(input.name.clone(), unsafe { input.read_f32()? });
    }
    evaluate(&core.program, &mut env)?;
    for output in &io.outputs {
        let value = env.get(&output.name).ok_or(ONNXIFI_STATUS_UNIDENTIFIED_NAME)?;
        unsafe { output.write_f32(value)? };
    }
    Ok(())
}

/// # Safety
/// A non-null `fence` must point at a readable fence struct.
unsafe fn check_fence(fence: *const OnnxMemoryFenceV1) -> Result<(), OnnxStatus> {
    if fence.is_null() {
        return Err(ONNXIFI_STATUS_INVALID_POINTER);
    }
    let fence = unsafe { &*fence };
    if fence.tag != ONNXIFI_TAG_MEMORY_FENCE_V1 {
        return Err(ONNXIFI_STATUS_UNSUPPORTED_TAG);
    }
    if fence.fence_type != ONNXIFI_SYNCHRONIZATION_EVENT {
        return Err(ONNXIFI_STATUS_UNSUPPORTED_FENCE_TYPE);
    }
    Ok(())
}

unsafe fn backend_kind<'a>(id: OnnxBackendId) -> Result<(usize, &'a BackendKind), OnnxStatus> {
    if id.is_null() {
        return Err(ONNXIFI_STATUS_INVALID_ID);
    }
    let index = unsafe { &*(id as *const RefBackendId) }.index;
    BACKENDS
        .get(index)
        .map(|kind| (index, kind))
        .ok_or(ONNXIFI_STATUS_INVALID_ID)
}

#[no_mangle]
pub unsafe extern "C" fn onnxGetBackendIDs(
    backend_ids: *mut OnnxBackendId,
    num_backends: *mut usize,
) -> OnnxStatus {
    if num_backends.is_null() {
        return ONNXIFI_STATUS_INVALID_POINTER;
    }
    let available = BACKENDS.len();
    let capacity = unsafe { *num_backends };
    unsafe { *num_backends = available };
    if backend_ids.is_null() || capacity < available {
        journal::record(AbiCall::GetBackendIds { filled: false });
        return ONNXIFI_STATUS_FALLBACK;
    }
    for index in 0..available {
        let id = Box::into_raw(Box::new(RefBackendId { index }));
        unsafe { *backend_ids.add(index) = id as OnnxBackendId };
    }
    journal::record(AbiCall::GetBackendIds { filled: true });
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxReleaseBackendID(backend_id: OnnxBackendId) -> OnnxStatus {
    if backend_id.is_null() {
        return ONNXIFI_STATUS_INVALID_ID;
    }
    journal::record(AbiCall::ReleaseBackendId {
        id: backend_id as usize,
    });
    drop(unsafe { Box::from_raw(backend_id as *mut RefBackendId) });
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxGetBackendInfo(
    backend_id: OnnxBackendId,
    info_type: OnnxBackendInfo,
    info_value: *mut c_void,
    info_value_size: *mut usize,
) -> OnnxStatus {
    let (_, kind) = match unsafe { backend_kind(backend_id) } {
        Ok(found) => found,
        Err(status) => return status,
    };
    if info_value_size.is_null() {
        return ONNXIFI_STATUS_INVALID_POINTER;
    }
    journal::record(AbiCall::GetBackendInfo {
        id: backend_id as usize,
        info: info_type,
    });
    let value: Vec<u8> = match info_type {
        ONNXIFI_BACKEND_NAME => {
            let mut name = kind.name.as_bytes().to_vec();
            name.push(0);
            name
        }
        ONNXIFI_BACKEND_CAPABILITIES => kind.capabilities.to_ne_bytes().to_vec(),
        _ => return ONNXIFI_STATUS_UNSUPPORTED_ATTRIBUTE,
    };
    let capacity = unsafe { *info_value_size };
    unsafe { *info_value_size = value.len() };
    if info_value.is_null() || capacity < value.len() {
        return ONNXIFI_STATUS_FALLBACK;
    }
    unsafe { std::ptr::copy_nonoverlapping(value.as_ptr(), info_value as *mut u8, value.len()) };
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxGetExtensionFunctionAddress(
    backend_id: OnnxBackendId,
    name: *const c_char,
    function: *mut Option<ExtensionFunctionPointer>,
) -> OnnxStatus {
    let (_, kind) = match unsafe { backend_kind(backend_id) } {
        Ok(found) => found,
        Err(status) => return status,
    };
    if name.is_null() || function.is_null() {
        return ONNXIFI_STATUS_INVALID_POINTER;
    }
    let requested = unsafe { CStr::from_ptr(name) };
    let found = kind.fenced && requested.to_bytes() == SET_IO_AND_RUN_GRAPH_EXTENSION.as_bytes();
    journal::record(AbiCall::GetExtensionFunctionAddress {
        id: backend_id as usize,
        found,
    });
    if !found {
        unsafe { *function = None };
        return ONNXIFI_STATUS_UNIDENTIFIED_NAME;
    }
    let run: SetIoAndRunGraphFn = set_io_and_run_graph;
    // SAFETY: Callers transmute back to `SetIoAndRunGraphFn` before calling.
    unsafe {
        *function = Some(std::mem::transmute::<SetIoAndRunGraphFn, ExtensionFunctionPointer>(run))
    };
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxInitBackend(
    backend_id: OnnxBackendId,
    aux_properties: *const u64,
    backend: *mut OnnxBackend,
) -> OnnxStatus {
    let (index, kind) = match unsafe { backend_kind(backend_id) } {
        Ok(found) => found,
        Err(status) => return status,
    };
    if backend.is_null() {
        return ONNXIFI_STATUS_INVALID_POINTER;
    }
    let mut properties = Vec::new();
    if !aux_properties.is_null() {
        let mut cursor = aux_properties;
        loop {
            let key = unsafe { *cursor };
            if key == ONNXIFI_BACKEND_PROPERTY_NONE {
                break;
            }
            let value = unsafe { *cursor.add(1) };
            properties.push((key, value));
            cursor = unsafe { cursor.add(2) };
        }
    }
    let handle = Box::into_raw(Box::new(RefBackend { index })) as OnnxBackend;
    unsafe { *backend = handle };
    debug!(backend = kind.name, properties = properties.len(), "initialized reference backend");
    journal::record(AbiCall::InitBackend {
        id: backend_id as usize,
        backend: handle as usize,
        properties,
    });
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxReleaseBackend(backend: OnnxBackend) -> OnnxStatus {
    if backend.is_null() {
        return ONNXIFI_STATUS_INVALID_BACKEND;
    }
    journal::record(AbiCall::ReleaseBackend {
        backend: backend as usize,
    });
    let released = unsafe { Box::from_raw(backend as *mut RefBackend) };
    debug!(backend = BACKENDS[released.index].name, "released reference backend");
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxInitEvent(backend: OnnxBackend, event: *mut OnnxEvent) -> OnnxStatus {
    if backend.is_null() {
        return ONNXIFI_STATUS_INVALID_BACKEND;
    }
    if event.is_null() {
        return ONNXIFI_STATUS_INVALID_POINTER;
    }
    unsafe { *event = RefEvent::into_handle(Arc::new(RefEvent::default())) };
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxSignalEvent(event: OnnxEvent) -> OnnxStatus {
    if event.is_null() {
        return ONNXIFI_STATUS_INVALID_EVENT;
    }
    unsafe { RefEvent::borrow(event) }.signal(ONNXIFI_STATUS_SUCCESS)
}

/// Blocks until signalled and returns the status of the work behind the event.
#[no_mangle]
pub unsafe extern "C" fn onnxWaitEvent(event: OnnxEvent) -> OnnxStatus {
    if event.is_null() {
        return ONNXIFI_STATUS_INVALID_EVENT;
    }
    unsafe { RefEvent::borrow(event) }.wait()
}

#[no_mangle]
pub unsafe extern "C" fn onnxReleaseEvent(event: OnnxEvent) -> OnnxStatus {
    if event.is_null() {
        return ONNXIFI_STATUS_INVALID_EVENT;
    }
    unsafe { RefEvent::release(event) };
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxInitGraph(
    backend: OnnxBackend,
    _aux_properties: *const u64,
    model_size: usize,
    model: *const c_void,
    weights_count: u32,
    weight_descriptors: *const OnnxTensorDescriptorV1,
    graph: *mut OnnxGraph,
) -> OnnxStatus {
    if backend.is_null() {
        return ONNXIFI_STATUS_INVALID_BACKEND;
    }
    if graph.is_null() || model.is_null() {
        return ONNXIFI_STATUS_INVALID_POINTER;
    }
    if model_size == 0 {
        return ONNXIFI_STATUS_INVALID_SIZE;
    }
    let bytes = unsafe { std::slice::from_raw_parts(model as *const u8, model_size) };
    let program = match std::str::from_utf8(bytes)
        .map_err(|_| ONNXIFI_STATUS_INVALID_MODEL)
        .and_then(Program::parse)
    {
        Ok(program) => program,
        Err(status) => return status,
    };

    let weights = match unsafe { read_descriptors(weight_descriptors, weights_count) } {
        Ok(weights) => weights,
        Err(status) => return status,
    };
    let mut values = HashMap::with_capacity(weights.len());
    for weight in &weights {
        match unsafe { weight.read_f32() } {
            Ok(value) => values.insert(weight.name.clone(), value),
            Err(status) => return status,
        };
    }

    let handle = Box::into_raw(Box::new(RefGraph {
        core: Arc::new(GraphCore {
            program,
            weights: values,
        }),
        io: Mutex::new(None),
    })) as OnnxGraph;
    unsafe { *graph = handle };
    journal::record(AbiCall::InitGraph {
        backend: backend as usize,
        graph: handle as usize,
        weights: BoundIo::names(&weights),
    });
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxSetGraphIO(
    graph: OnnxGraph,
    inputs_count: u32,
    input_descriptors: *const OnnxTensorDescriptorV1,
    outputs_count: u32,
    output_descriptors: *const OnnxTensorDescriptorV1,
) -> OnnxStatus {
    if graph.is_null() {
        return ONNXIFI_STATUS_INVALID_GRAPH;
    }
    let ref_graph = unsafe { &*(graph as *const RefGraph) };
    let bound = unsafe { read_descriptors(input_descriptors, inputs_count) }.and_then(|inputs| {
        let outputs = unsafe { read_descriptors(output_descriptors, outputs_count) }?;
        check_outputs(&ref_graph.core, &outputs)?;
        Ok(BoundIo { inputs, outputs })
    });
    let io = match bound {
        Ok(io) => io,
        Err(status) => return status,
    };
    journal::record(AbiCall::SetGraphIo {
        graph: graph as usize,
        inputs: BoundIo::names(&io.inputs),
        outputs: BoundIo::names(&io.outputs),
    });
    *ref_graph.io.lock().unwrap_or_else(|p| p.into_inner()) = Some(io);
    ONNXIFI_STATUS_SUCCESS
}

/// Starts the bound graph once `input_fence` signals; `output_fence` receives an
/// event that signals with the run's status.
#[no_mangle]
pub unsafe extern "C" fn onnxRunGraph(
    graph: OnnxGraph,
    input_fence: *const OnnxMemoryFenceV1,
    output_fence: *mut OnnxMemoryFenceV1,
) -> OnnxStatus {
    if graph.is_null() {
        return ONNXIFI_STATUS_INVALID_GRAPH;
    }
    if let Err(status) = unsafe { check_fence(input_fence).and_then(|()| check_fence(output_fence)) } {
        return status;
    }
    let input_event = unsafe { (*input_fence).event };
    if input_event.is_null() {
        return ONNXIFI_STATUS_INVALID_EVENT;
    }
    let ref_graph = unsafe { &*(graph as *const RefGraph) };
    let Some(io) = ref_graph.io.lock().unwrap_or_else(|p| p.into_inner()).clone() else {
        return ONNXIFI_STATUS_INVALID_STATE;
    };
    journal::record(AbiCall::RunGraph {
        graph: graph as usize,
    });

    let input = unsafe { RefEvent::clone_handle(input_event) };
    let output = Arc::new(RefEvent::default());
    let signaller = Arc::clone(&output);
    let core = Arc::clone(&ref_graph.core);
    let spawned = std::thread::Builder::new()
        .name("ref-onnxifi-run".to_string())
        .spawn(move || {
            let mut status = input.wait();
            if status == ONNXIFI_STATUS_SUCCESS {
                // SAFETY: The host keeps bound buffers alive until the output fence signals.
                status = status_of(unsafe { execute(&core, &io) });
            }
            trace!(status, "reference run finished");
            signaller.signal(status);
        });
    if spawned.is_err() {
        return ONNXIFI_STATUS_NO_SYSTEM_RESOURCES;
    }
    unsafe { (*output_fence).event = RefEvent::into_handle(output) };
    ONNXIFI_STATUS_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn onnxReleaseGraph(graph: OnnxGraph) -> OnnxStatus {
    if graph.is_null() {
        return ONNXIFI_STATUS_INVALID_GRAPH;
    }
    journal::record(AbiCall::ReleaseGraph {
        graph: graph as usize,
    });
    drop(unsafe { Box::from_raw(graph as *mut RefGraph) });
    ONNXIFI_STATUS_SUCCESS
}

/// Binds IO and runs synchronously; the returned fence event is already signalled.
///
/// Once the fence is accepted an event is handed out even if the run fails, signalled
/// with the failure status.
unsafe extern "C" fn set_io_and_run_graph(
    graph: OnnxGraph,
    inputs_count: u32,
    input_descriptors: *const OnnxTensorDescriptorV1,
    outputs_count: u32,
    output_descriptors: *const OnnxTensorDescriptorV1,
    output_fence: *mut OnnxMemoryFenceV1,
) -> OnnxStatus {
    if graph.is_null() {
        return ONNXIFI_STATUS_INVALID_GRAPH;
    }
    if let Err(status) = unsafe { check_fence(output_fence) } {
        return status;
    }
    let ref_graph = unsafe { &*(graph as *const RefGraph) };
    let result = unsafe { read_descriptors(input_descriptors, inputs_count) }.and_then(|inputs| {
        let outputs = unsafe { read_descriptors(output_descriptors, outputs_count) }?;
        check_outputs(&ref_graph.core, &outputs)?;
        let io = BoundIo { inputs, outputs };
        journal::record(AbiCall::SetIoAndRunGraph {
            graph: graph as usize,
            inputs: BoundIo::names(&io.inputs),
            outputs: BoundIo::names(&io.outputs),
        });
        unsafe { execute(&ref_graph.core, &io) }
    });
    let status = status_of(result);
    unsafe { (*output_fence).event = RefEvent::into_handle(RefEvent::signaled(status)) };
    status
}
