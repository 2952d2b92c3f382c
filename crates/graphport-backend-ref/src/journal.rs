//! Per-thread record of the ABI calls this backend received.

use std::cell::RefCell;

use graphport_core::abi::OnnxBackendInfo;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiCall {
    /// `filled` is false for the count query.
    GetBackendIds { filled: bool },
    ReleaseBackendId { id: usize },
    GetBackendInfo { id: usize, info: OnnxBackendInfo },
    GetExtensionFunctionAddress { id: usize, found: bool },
    InitBackend {
        id: usize,
        backend: usize,
        properties: Vec<(u64, u64)>,
    },
    ReleaseBackend { backend: usize },
    InitGraph {
        backend: usize,
        graph: usize,
        weights: Vec<String>,
    },
    ReleaseGraph { graph: usize },
    SetGraphIo { graph: usize, inputs: Vec<String>, outputs: Vec<String> },
    RunGraph { graph: usize },
    SetIoAndRunGraph { graph: usize, inputs: Vec<String>, outputs: Vec<String> },
}

impl AbiCall {
    pub fn is_init_backend(&self) -> bool {
        matches!(self, AbiCall::InitBackend { .. })
    }

    pub fn is_init_graph(&self) -> bool {
        matches!(self, AbiCall::InitGraph { .. })
    }
}

thread_local! {
    static CALLS: RefCell<Vec<AbiCall>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn record(call: AbiCall) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

/// Drains the calls made from the current thread.
pub fn take() -> Vec<AbiCall> {
    CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
}
