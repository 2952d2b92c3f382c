use std::ffi::{c_void, CStr};
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::debug;

use crate::abi::*;
use crate::backend::BackendCapabilities;
use crate::status::{check, check_count_query, AbiError};

/// The fixed table of ONNXIFI entry points.
#[derive(Clone, Copy)]
pub struct OnnxifiFns {
    pub get_backend_ids: GetBackendIdsFn,
    pub release_backend_id: ReleaseBackendIdFn,
    pub get_backend_info: GetBackendInfoFn,
    pub init_backend: InitBackendFn,
    pub release_backend: ReleaseBackendFn,
    pub init_event: InitEventFn,
    pub signal_event: SignalEventFn,
    pub wait_event: WaitEventFn,
    pub release_event: ReleaseEventFn,
    pub init_graph: InitGraphFn,
    pub set_graph_io: SetGraphIoFn,
    pub run_graph: RunGraphFn,
    pub release_graph: ReleaseGraphFn,
    pub get_extension_function_address: GetExtensionFunctionAddressFn,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open ONNXIFI library {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("failed to resolve ONNXIFI symbol {name}: {source}")]
    Symbol {
        name: String,
        #[source]
        source: libloading::Error,
    },
}

/// A pre-initialized ONNXIFI library: the entry-point table plus whatever keeps it alive.
pub struct OnnxifiLibrary {
    _lib: Option<Library>,
    fns: OnnxifiFns,
    origin: String,
}

impl OnnxifiLibrary {
    /// Opens a shared library and resolves the full entry-point table.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        // SAFETY: Loading runs the library's initializers; callers choose a trusted ONNXIFI library.
        let lib = unsafe { Library::new(path) }.map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let fns = OnnxifiFns {
            get_backend_ids: load_symbol(&lib, b"onnxGetBackendIDs\0")?,
            release_backend_id: load_symbol(&lib, b"onnxReleaseBackendID\0")?,
            get_backend_info: load_symbol(&lib, b"onnxGetBackendInfo\0")?,
            init_backend: load_symbol(&lib, b"onnxInitBackend\0")?,
            release_backend: load_symbol(&lib, b"onnxReleaseBackend\0")?,
            init_event: load_symbol(&lib, b"onnxInitEvent\0")?,
            signal_event: load_symbol(&lib, b"onnxSignalEvent\0")?,
            wait_event: load_symbol(&lib, b"onnxWaitEvent\0")?,
            release_event: load_symbol(&lib, b"onnxReleaseEvent\0")?,
            init_graph: load_symbol(&lib, b"onnxInitGraph\0")?,
            set_graph_io: load_symbol(&lib, b"onnxSetGraphIO\0")?,
            run_graph: load_symbol(&lib, b"onnxRunGraph\0")?,
            release_graph: load_symbol(&lib, b"onnxReleaseGraph\0")?,
            get_extension_function_address: load_symbol(
                &lib,
                b"onnxGetExtensionFunctionAddress\0",
            )?,
        };
        debug!(path = %path.display(), "loaded ONNXIFI library");
        Ok(Self {
            _lib: Some(lib),
            fns,
            origin: path.display().to_string(),
        })
    }

    /// Wraps a table whose functions live in this process (statically linked backends).
    pub fn from_fns(origin: impl Into<String>, fns: OnnxifiFns) -> Self {
        Self {
            _lib: None,
            fns,
            origin: origin.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn fns(&self) -> &OnnxifiFns {
        &self.fns
    }

    /// Count phase of backend enumeration.
    pub fn backend_count(&self) -> Result<usize, AbiError> {
        let mut count = 0usize;
        // SAFETY: A null id buffer asks only for the count, written through a valid pointer.
        let status = unsafe { (self.fns.get_backend_ids)(std::ptr::null_mut(), &mut count) };
        check_count_query(status, "onnxGetBackendIDs")?;
        Ok(count)
    }

    /// Fill phase of backend enumeration. Every returned id must eventually be released.
    pub fn backend_ids(&self, count: usize) -> Result<Vec<BackendIdHandle>, AbiError> {
        let mut raw: Vec<OnnxBackendId> = vec![std::ptr::null_mut(); count];
        let mut filled = count;
        // SAFETY: The buffer holds `count` writable slots and `filled` reports its capacity.
        let status = unsafe { (self.fns.get_backend_ids)(raw.as_mut_ptr(), &mut filled) };
        check(status, "onnxGetBackendIDs")?;
        raw.truncate(filled.min(count));
        Ok(raw.into_iter().map(BackendIdHandle::from_raw).collect())
    }

    pub fn release_backend_id(&self, id: BackendIdHandle) -> Result<(), AbiError> {
        // SAFETY: The id came from this library's enumeration and is released once.
        check(
            unsafe { (self.fns.release_backend_id)(id.as_raw()) },
            "onnxReleaseBackendID",
        )
    }

    /// Queries a backend info value, sizing the buffer with a first FALLBACK round.
    pub fn backend_info(
        &self,
        id: BackendIdHandle,
        info: OnnxBackendInfo,
    ) -> Result<Vec<u8>, AbiError> {
        let mut size = 0usize;
        // SAFETY: Null value pointer with a valid size pointer is the documented size query.
        let status = unsafe {
            (self.fns.get_backend_info)(id.as_raw(), info, std::ptr::null_mut(), &mut size)
        };
        check_count_query(status, "onnxGetBackendInfo")?;
        let mut value = vec![0u8; size];
        // SAFETY: The buffer is `size` bytes long, as reported by the backend.
        let status = unsafe {
            (self.fns.get_backend_info)(
                id.as_raw(),
                info,
                value.as_mut_ptr() as *mut c_void,
                &mut size,
            )
        };
        check(status, "onnxGetBackendInfo")?;
        value.truncate(size);
        Ok(value)
    }

    pub fn backend_name(&self, id: BackendIdHandle) -> Result<String, AbiError> {
        let raw = self.backend_info(id, ONNXIFI_BACKEND_NAME)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn backend_capabilities(&self, id: BackendIdHandle) -> Result<BackendCapabilities, AbiError> {
        let raw = self.backend_info(id, ONNXIFI_BACKEND_CAPABILITIES)?;
        let mut bits = [0u8; 8];
        let len = raw.len().min(8);
        bits[..len].copy_from_slice(&raw[..len]);
        Ok(BackendCapabilities::from_bits(u64::from_ne_bytes(bits)))
    }

    /// `properties` must be terminated by `ONNXIFI_BACKEND_PROPERTY_NONE`.
    pub fn init_backend(
        &self,
        id: BackendIdHandle,
        properties: &[u64],
    ) -> Result<BackendHandle, AbiError> {
        debug_assert_eq!(properties.last(), Some(&ONNXIFI_BACKEND_PROPERTY_NONE));
        let mut backend: OnnxBackend = std::ptr::null_mut();
        // SAFETY: Property list is terminated and outlives the call; out pointer is valid.
        let status =
            unsafe { (self.fns.init_backend)(id.as_raw(), properties.as_ptr(), &mut backend) };
        check(status, "onnxInitBackend")?;
        Ok(BackendHandle::from_raw(backend))
    }

    pub fn release_backend(&self, backend: BackendHandle) -> Result<(), AbiError> {
        // SAFETY: The backend was created by this library and is released once.
        check(
            unsafe { (self.fns.release_backend)(backend.as_raw()) },
            "onnxReleaseBackend",
        )
    }

    /// # Safety
    /// Every weight descriptor must point at a name and buffer valid for the duration of the call.
    pub unsafe fn init_graph(
        &self,
        backend: BackendHandle,
        model: &[u8],
        weights: &[OnnxTensorDescriptorV1],
    ) -> Result<GraphHandle, AbiError> {
        let mut graph: OnnxGraph = std::ptr::null_mut();
        let status = unsafe {
            (self.fns.init_graph)(
                backend.as_raw(),
                std::ptr::null(),
                model.len(),
                model.as_ptr() as *const c_void,
                weights.len() as u32,
                weights.as_ptr(),
                &mut graph,
            )
        };
        check(status, "onnxInitGraph")?;
        Ok(GraphHandle::from_raw(graph))
    }

    pub fn release_graph(&self, graph: GraphHandle) -> Result<(), AbiError> {
        // SAFETY: The graph was created by this library and is released once.
        check(
            unsafe { (self.fns.release_graph)(graph.as_raw()) },
            "onnxReleaseGraph",
        )
    }

    /// # Safety
    /// Descriptor names, shapes and buffers must stay valid until the next run completes.
    pub unsafe fn set_graph_io(
        &self,
        graph: GraphHandle,
        inputs: &[OnnxTensorDescriptorV1],
        outputs: &[OnnxTensorDescriptorV1],
    ) -> Result<(), AbiError> {
        let status = unsafe {
            (self.fns.set_graph_io)(
                graph.as_raw(),
                inputs.len() as u32,
                inputs.as_ptr(),
                outputs.len() as u32,
                outputs.as_ptr(),
            )
        };
        check(status, "onnxSetGraphIO")
    }

    /// # Safety
    /// The buffers bound by the last `set_graph_io` must be valid until the output fence signals.
    pub unsafe fn run_graph(
        &self,
        graph: GraphHandle,
        input_fence: &OnnxMemoryFenceV1,
        output_fence: &mut OnnxMemoryFenceV1,
    ) -> Result<(), AbiError> {
        let status = unsafe { (self.fns.run_graph)(graph.as_raw(), input_fence, output_fence) };
        check(status, "onnxRunGraph")
    }

    pub fn init_event(&self, backend: BackendHandle) -> Result<EventHandle, AbiError> {
        let mut event: OnnxEvent = std::ptr::null_mut();
        // SAFETY: Out pointer is valid; the backend handle belongs to this library.
        let status = unsafe { (self.fns.init_event)(backend.as_raw(), &mut event) };
        check(status, "onnxInitEvent")?;
        Ok(EventHandle::from_raw(event))
    }

    pub fn signal_event(&self, event: EventHandle) -> Result<(), AbiError> {
        // SAFETY: Event was produced by this library and not yet released.
        check(
            unsafe { (self.fns.signal_event)(event.as_raw()) },
            "onnxSignalEvent",
        )
    }

    pub fn wait_event(&self, event: EventHandle) -> Result<(), AbiError> {
        // SAFETY: Event was produced by this library and not yet released.
        check(
            unsafe { (self.fns.wait_event)(event.as_raw()) },
            "onnxWaitEvent",
        )
    }

    pub fn release_event(&self, event: EventHandle) -> Result<(), AbiError> {
        // SAFETY: Event was produced by this library and is released once.
        check(
            unsafe { (self.fns.release_event)(event.as_raw()) },
            "onnxReleaseEvent",
        )
    }

    /// Resolves an optional extension entry point. Any non-success status reads as "absent".
    pub fn extension_function(
        &self,
        id: BackendIdHandle,
        name: &CStr,
    ) -> Option<ExtensionFunctionPointer> {
        let mut function: Option<ExtensionFunctionPointer> = None;
        // SAFETY: Name is NUL-terminated and the out slot is a valid nullable function pointer.
        let status = unsafe {
            (self.fns.get_extension_function_address)(id.as_raw(), name.as_ptr(), &mut function)
        };
        match check(status, "onnxGetExtensionFunctionAddress") {
            Ok(()) => function,
            Err(err) => {
                debug!(extension = ?name, error = %err, "extension not available");
                None
            }
        }
    }
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, LoadError> {
    // SAFETY: Caller names a symbol whose ONNXIFI signature matches `T`.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|source| LoadError::Symbol {
        name: String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]).into_owned(),
        source,
    })?;
    Ok(*sym)
}
