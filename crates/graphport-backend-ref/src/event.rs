use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex};

use graphport_core::abi::*;

thread_local! {
    static OPEN: Cell<usize> = const { Cell::new(0) };
}

/// Event handles created on the current thread and not yet released there.
pub fn open_events() -> usize {
    OPEN.with(Cell::get)
}

/// A one-shot event. The signalled value is the status of the work it guards, and
/// waiting returns it.
#[derive(Debug, Default)]
pub(crate) struct RefEvent {
    state: Mutex<Option<OnnxStatus>>,
    cond: Condvar,
}

impl RefEvent {
    pub(crate) fn signaled(status: OnnxStatus) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Some(status)),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn signal(&self, status: OnnxStatus) -> OnnxStatus {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.is_some() {
            return ONNXIFI_STATUS_INVALID_STATE;
        }
        *state = Some(status);
        self.cond.notify_all();
        ONNXIFI_STATUS_SUCCESS
    }

    pub(crate) fn wait(&self) -> OnnxStatus {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if let Some(status) = *state {
                return status;
            }
            state = self.cond.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }

    pub(crate) fn into_handle(event: Arc<Self>) -> OnnxEvent {
        OPEN.with(|open| open.set(open.get() + 1));
        Arc::into_raw(event) as OnnxEvent
    }

    /// # Safety
    /// `raw` must come from [`RefEvent::into_handle`] and not be released yet.
    pub(crate) unsafe fn borrow<'a>(raw: OnnxEvent) -> &'a Self {
        unsafe { &*(raw as *const Self) }
    }

    /// # Safety
    /// Same as [`RefEvent::borrow`].
    pub(crate) unsafe fn clone_handle(raw: OnnxEvent) -> Arc<Self> {
        let ptr = raw as *const Self;
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// # Safety
    /// `raw` must come from [`RefEvent::into_handle`]; it is invalid afterwards.
    pub(crate) unsafe fn release(raw: OnnxEvent) {
        OPEN.with(|open| open.set(open.get().saturating_sub(1)));
        drop(unsafe { Arc::from_raw(raw as *const Self) });
    }
}
