//! Raw ONNXIFI types, constants and entry-point signatures.
//!
//! Everything in here mirrors `onnxifi.h` and is shared by the host side
//! (`OnnxifiLibrary`) and by in-process backends that implement the ABI.

use std::ffi::{c_char, c_void};

pub type OnnxStatus = i32;
pub type OnnxEnum = i32;
pub type OnnxBackendInfo = i32;
pub type OnnxPointer = u64;
pub type OnnxBackendId = *mut c_void;
pub type OnnxBackend = *mut c_void;
pub type OnnxGraph = *mut c_void;
pub type OnnxEvent = *mut c_void;

pub const ONNXIFI_STATUS_SUCCESS: OnnxStatus = 0x0000;
pub const ONNXIFI_STATUS_FALLBACK: OnnxStatus = 0x0001;
pub const ONNXIFI_STATUS_INVALID_ID: OnnxStatus = 0x0101;
pub const ONNXIFI_STATUS_INVALID_SIZE: OnnxStatus = 0x0102;
pub const ONNXIFI_STATUS_INVALID_POINTER: OnnxStatus = 0x0103;
pub const ONNXIFI_STATUS_INVALID_PROTOBUF: OnnxStatus = 0x0104;
pub const ONNXIFI_STATUS_INVALID_MODEL: OnnxStatus = 0x0105;
pub const ONNXIFI_STATUS_INVALID_BACKEND: OnnxStatus = 0x0106;
pub const ONNXIFI_STATUS_INVALID_GRAPH: OnnxStatus = 0x0107;
pub const ONNXIFI_STATUS_INVALID_EVENT: OnnxStatus = 0x0108;
pub const ONNXIFI_STATUS_INVALID_STATE: OnnxStatus = 0x0109;
pub const ONNXIFI_STATUS_INVALID_NAME: OnnxStatus = 0x010A;
pub const ONNXIFI_STATUS_INVALID_SHAPE: OnnxStatus = 0x010B;
pub const ONNXIFI_STATUS_INVALID_DATATYPE: OnnxStatus = 0x010C;
pub const ONNXIFI_STATUS_INVALID_MEMORY_TYPE: OnnxStatus = 0x010D;
pub const ONNXIFI_STATUS_INVALID_MEMORY_LOCATION: OnnxStatus = 0x010E;
pub const ONNXIFI_STATUS_INVALID_FENCE_TYPE: OnnxStatus = 0x010F;
pub const ONNXIFI_STATUS_INVALID_PROPERTY: OnnxStatus = 0x0110;
pub const ONNXIFI_STATUS_UNSUPPORTED_TAG: OnnxStatus = 0x0201;
pub const ONNXIFI_STATUS_UNSUPPORTED_VERSION: OnnxStatus = 0x0202;
pub const ONNXIFI_STATUS_UNSUPPORTED_OPERATOR: OnnxStatus = 0x0203;
pub const ONNXIFI_STATUS_UNSUPPORTED_ATTRIBUTE: OnnxStatus = 0x0204;
pub const ONNXIFI_STATUS_UNSUPPORTED_SHAPE: OnnxStatus = 0x0205;
pub const ONNXIFI_STATUS_UNSUPPORTED_DATATYPE: OnnxStatus = 0x0206;
pub const ONNXIFI_STATUS_UNSUPPORTED_MEMORY_TYPE: OnnxStatus = 0x0207;
pub const ONNXIFI_STATUS_UNSUPPORTED_FENCE_TYPE: OnnxStatus = 0x0208;
pub const ONNXIFI_STATUS_UNSUPPORTED_PROPERTY: OnnxStatus = 0x0209;
pub const ONNXIFI_STATUS_UNIDENTIFIED_NAME: OnnxStatus = 0x0301;
pub const ONNXIFI_STATUS_MISMATCHING_SHAPE: OnnxStatus = 0x0302;
pub const ONNXIFI_STATUS_MISMATCHING_DATATYPE: OnnxStatus = 0x0303;
pub const ONNXIFI_STATUS_NO_SYSTEM_MEMORY: OnnxStatus = 0x0401;
pub const ONNXIFI_STATUS_NO_DEVICE_MEMORY: OnnxStatus = 0x0402;
pub const ONNXIFI_STATUS_NO_SYSTEM_RESOURCES: OnnxStatus = 0x0403;
pub const ONNXIFI_STATUS_NO_DEVICE_RESOURCES: OnnxStatus = 0x0404;
pub const ONNXIFI_STATUS_BACKEND_UNAVAILABLE: OnnxStatus = 0x0405;
pub const ONNXIFI_STATUS_INTERNAL_ERROR: OnnxStatus = 0x0501;

pub const ONNXIFI_TAG_TENSOR_DESCRIPTOR_V1: i32 = 0x43DF_BF69;
pub const ONNXIFI_TAG_MEMORY_FENCE_V1: i32 = 0x23E0_8AAB;

pub const ONNXIFI_DATATYPE_UNDEFINED: OnnxEnum = 0;
pub const ONNXIFI_DATATYPE_FLOAT32: OnnxEnum = 1;
pub const ONNXIFI_DATATYPE_UINT8: OnnxEnum = 2;
pub const ONNXIFI_DATATYPE_INT8: OnnxEnum = 3;
pub const ONNXIFI_DATATYPE_UINT16: OnnxEnum = 4;
pub const ONNXIFI_DATATYPE_INT16: OnnxEnum = 5;
pub const ONNXIFI_DATATYPE_INT32: OnnxEnum = 6;
pub const ONNXIFI_DATATYPE_INT64: OnnxEnum = 7;
pub const ONNXIFI_DATATYPE_FLOAT16: OnnxEnum = 10;
pub const ONNXIFI_DATATYPE_FLOAT64: OnnxEnum = 11;
pub const ONNXIFI_DATATYPE_UINT32: OnnxEnum = 12;
pub const ONNXIFI_DATATYPE_UINT64: OnnxEnum = 13;

pub const ONNXIFI_MEMORY_TYPE_CPU: OnnxEnum = 0;

pub const ONNXIFI_SYNCHRONIZATION_EVENT: OnnxEnum = 0x0001;

pub const ONNXIFI_BACKEND_PROPERTY_NONE: u64 = 0;

pub const ONNXIFI_BACKEND_NAME: OnnxBackendInfo = 1;
pub const ONNXIFI_BACKEND_CAPABILITIES: OnnxBackendInfo = 10;

pub const ONNXIFI_CAPABILITY_THREAD_SAFE: u64 = 0x01;

/// Extension symbol that sets graph IO and runs it in one call, signalling a fence.
pub const SET_IO_AND_RUN_GRAPH_EXTENSION: &str = "onnxSetIOAndRunGraphFunction";

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct OnnxTensorDescriptorV1 {
    pub tag: i32,
    pub name: *const c_char,
    pub data_type: OnnxEnum,
    pub memory_type: OnnxEnum,
    pub dimensions: u32,
    pub shape: *const u64,
    pub buffer: OnnxPointer,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct OnnxMemoryFenceV1 {
    pub tag: i32,
    pub fence_type: OnnxEnum,
    pub event: OnnxEvent,
}

impl OnnxMemoryFenceV1 {
    /// An event fence whose event slot is still empty.
    pub fn event_fence() -> Self {
        Self {
            tag: ONNXIFI_TAG_MEMORY_FENCE_V1,
            fence_type: ONNXIFI_SYNCHRONIZATION_EVENT,
            event: std::ptr::null_mut(),
        }
    }
}

pub type GetBackendIdsFn =
    unsafe extern "C" fn(backend_ids: *mut OnnxBackendId, num_backends: *mut usize) -> OnnxStatus;
pub type ReleaseBackendIdFn = unsafe extern "C" fn(backend_id: OnnxBackendId) -> OnnxStatus;
pub type GetBackendInfoFn = unsafe extern "C" fn(
    backend_id: OnnxBackendId,
    info_type: OnnxBackendInfo,
    info_value: *mut c_void,
    info_value_size: *mut usize,
) -> OnnxStatus;
pub type InitBackendFn = unsafe extern "C" fn(
    backend_id: OnnxBackendId,
    aux_properties: *const u64,
    backend: *mut OnnxBackend,
) -> OnnxStatus;
pub type ReleaseBackendFn = unsafe extern "C" fn(backend: OnnxBackend) -> OnnxStatus;
pub type InitEventFn = unsafe extern "C" fn(backend: OnnxBackend, event: *mut OnnxEvent) -> OnnxStatus;
pub type SignalEventFn = unsafe extern "C" fn(event: OnnxEvent) -> OnnxStatus;
pub type WaitEventFn = unsafe extern "C" fn(event: OnnxEvent) -> OnnxStatus;
pub type ReleaseEventFn = unsafe extern "C" fn(event: OnnxEvent) -> OnnxStatus;
pub type InitGraphFn = unsafe extern "C" fn(
    backend: OnnxBackend,
    aux_properties: *const u64,
    model_size: usize,
    model: *const c_void,
    weights_count: u32,
    weight_descriptors: *const OnnxTensorDescriptorV1,
    graph: *mut OnnxGraph,
) -> OnnxStatus;
pub type SetGraphIoFn = unsafe extern "C" fn(
    graph: OnnxGraph,
    inputs_count: u32,
    input_descriptors: *const OnnxTensorDescriptorV1,
    outputs_count: u32,
    output_descriptors: *const OnnxTensorDescriptorV1,
) -> OnnxStatus;
pub type RunGraphFn = unsafe extern "C" fn(
    graph: OnnxGraph,
    input_fence: *const OnnxMemoryFenceV1,
    output_fence: *mut OnnxMemoryFenceV1,
) -> OnnxStatus;
pub type ReleaseGraphFn = unsafe extern "C" fn(graph: OnnxGraph) -> OnnxStatus;

pub type ExtensionFunctionPointer = unsafe extern "C" fn() -> OnnxStatus;
pub type GetExtensionFunctionAddressFn = unsafe extern "C" fn(
    backend_id: OnnxBackendId,
    name: *const c_char,
    function: *mut Option<ExtensionFunctionPointer>,
) -> OnnxStatus;

/// Signature behind [`SET_IO_AND_RUN_GRAPH_EXTENSION`].
pub type SetIoAndRunGraphFn = unsafe extern "C" fn(
    graph: OnnxGraph,
    inputs_count: u32,
    input_descriptors: *const OnnxTensorDescriptorV1,
    outputs_count: u32,
    output_descriptors: *const OnnxTensorDescriptorV1,
    output_fence: *mut OnnxMemoryFenceV1,
) -> OnnxStatus;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident, $raw:ty) => {
        $(#[$meta])*
        // Stored as usize so handles can cross threads inside Send + Sync bundles.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(usize);

        impl $name {
            pub fn from_raw(raw: $raw) -> Self {
                Self(raw as usize)
            }

            pub fn as_raw(self) -> $raw {
                self.0 as $raw
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            pub fn addr(self) -> usize {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// Names one available backend before it is instantiated.
    BackendIdHandle,
    OnnxBackendId
);
opaque_handle!(
    /// An initialized backend instance.
    BackendHandle,
    OnnxBackend
);
opaque_handle!(
    /// A backend's compiled form of a subgraph.
    GraphHandle,
    OnnxGraph
);
opaque_handle!(EventHandle, OnnxEvent);
