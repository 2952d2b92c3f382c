use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use graphport_core::{
    BackendCapabilities, BackendHandle, BackendIdHandle, GraphHandle, OnnxifiLibrary, PropertyList,
};
use tracing::{debug, error, info, warn};

use crate::cache::{Lease, SharedResourceCache};
use crate::error::{OpError, Result};
use crate::store::InitializerList;

pub type BackendGraphCache = SharedResourceCache<BackendGraph>;
pub type BackendGraphLease = Lease<BackendGraph>;

/// Native backend identity, backend instance and compiled graph shared by every
/// operator instance that presents the same cache key. Immutable once built.
pub struct BackendGraph {
    library: Arc<OnnxifiLibrary>,
    backend_id: BackendIdHandle,
    backend: BackendHandle,
    graph: GraphHandle,
    backend_index: usize,
    capabilities: BackendCapabilities,
    // Present when the backend does not declare thread-safe graph execution.
    run_lock: Option<Mutex<()>>,
}

impl BackendGraph {
    pub fn library(&self) -> &Arc<OnnxifiLibrary> {
        &self.library
    }

    pub fn backend_id(&self) -> BackendIdHandle {
        self.backend_id
    }

    pub fn backend(&self) -> BackendHandle {
        self.backend
    }

    pub fn graph(&self) -> GraphHandle {
        self.graph
    }

    pub fn backend_index(&self) -> usize {
        self.backend_index
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    pub fn serializes_runs(&self) -> bool {
        self.run_lock.is_some()
    }

    /// Held across one set-IO-and-run sequence when runs on this graph must not overlap.
    pub fn execution_guard(&self) -> Option<MutexGuard<'_, ()>> {
        self.run_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for BackendGraph {
    fn drop(&mut self) {
        debug!(
            graph = self.graph.addr(),
            backend = self.backend.addr(),
            "tearing down ONNXIFI backend graph"
        );
        if let Err(err) = self.library.release_graph(self.graph) {
            error!(error = %err, "failed to release ONNXIFI graph");
        }
        if let Err(err) = self.library.release_backend(self.backend) {
            error!(error = %err, "failed to release ONNXIFI backend");
        }
        if let Err(err) = self.library.release_backend_id(self.backend_id) {
            error!(error = %err, "failed to release ONNXIFI backend id");
        }
    }
}

/// Everything the creator needs to compile one subgraph.
pub struct GraphRecipe<'a> {
    pub backend_index: i64,
    pub properties: &'a PropertyList,
    pub model: &'a [u8],
    pub initializers: &'a InitializerList<'a>,
}

/// Enumerates backends, initializes the selected one and compiles the graph on it.
///
/// Native resources acquired before a failing step are released before returning.
pub fn create_backend_graph(
    library: &Arc<OnnxifiLibrary>,
    recipe: &GraphRecipe<'_>,
) -> Result<BackendGraph> {
    let count = library.backend_count()?;
    if count == 0 {
        return Err(OpError::NoBackends);
    }
    let out_of_range = || OpError::BackendIndexOutOfRange {
        index: recipe.backend_index,
        count,
    };
    let index = usize::try_from(recipe.backend_index)
        .ok()
        .filter(|index| *index < count)
        .ok_or_else(out_of_range)?;

    let ids = library.backend_ids(count)?;
    let Some(&backend_id) = ids.get(index) else {
        release_ids(library, &ids, None)?;
        return Err(out_of_range());
    };

    let backend = match library.init_backend(backend_id, &recipe.properties.encode()) {
        Ok(backend) => backend,
        Err(err) => {
            release_ids(library, &ids, None)?;
            return Err(err.into());
        }
    };

    if let Err(err) = release_ids(library, &ids, Some(index)) {
        release_backend_quietly(library, backend, backend_id);
        return Err(err);
    }

    let capabilities = library
        .backend_capabilities(backend_id)
        .unwrap_or_else(|err| {
            debug!(error = %err, "backend capabilities unavailable, assuming none");
            BackendCapabilities::default()
        });

    let weights = recipe.initializers.raw();
    // SAFETY: The initializer list borrows the tensor store, so every weight buffer and name
    // outlives this call.
    let graph = match unsafe { library.init_graph(backend, recipe.model, &weights) } {
        Ok(graph) => graph,
        Err(err) => {
            release_backend_quietly(library, backend, backend_id);
            return Err(err.into());
        }
    };

    info!(
        library = library.origin(),
        backend_index = index,
        backends = count,
        weights = weights.len(),
        thread_safe = capabilities.thread_safe,
        "initialized ONNXIFI backend graph"
    );

    Ok(BackendGraph {
        library: Arc::clone(library),
        backend_id,
        backend,
        graph,
        backend_index: index,
        capabilities,
        run_lock: (!capabilities.thread_safe).then(|| Mutex::new(())),
    })
}

fn release_ids(
    library: &OnnxifiLibrary,
    ids: &[BackendIdHandle],
    keep: Option<usize>,
) -> Result<()> {
    let mut first_err = None;
    for (i, id) in ids.iter().enumerate() {
        if Some(i) == keep {
            continue;
        }
        if let Err(err) = library.release_backend_id(*id) {
            warn!(backend_index = i, error = %err, "failed to release unused backend id");
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn release_backend_quietly(library: &OnnxifiLibrary, backend: BackendHandle, id: BackendIdHandle) {
    if let Err(err) = library.release_backend(backend) {
        warn!(error = %err, "failed to release backend after construction failure");
    }
    if let Err(err) = library.release_backend_id(id) {
        warn!(error = %err, "failed to release backend id after construction failure");
    }
}
