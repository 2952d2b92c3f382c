use std::ffi::CString;
use std::sync::Arc;

use graphport_core::abi::{
    ExtensionFunctionPointer, SetIoAndRunGraphFn, SET_IO_AND_RUN_GRAPH_EXTENSION,
};
use graphport_core::{BackendIdHandle, BackendProperty, OnnxifiLibrary, PropertyList, Shape};
use tracing::debug;

use crate::config::{args, Argument, OperatorDef};
use crate::error::{OpError, Result};
use crate::graph::{create_backend_graph, BackendGraphCache, BackendGraphLease, GraphRecipe};
use crate::store::{InitializerMapping, TensorStore};

/// Result of building: the shared graph plus what was learned about it.
pub struct BuiltGraph {
    pub lease: BackendGraphLease,
    pub run_with_fence: Option<SetIoAndRunGraphFn>,
    pub initializer_names: Vec<String>,
    pub initializer_shapes: Vec<Shape>,
}

pub struct GraphBuilder<'a> {
    def: &'a OperatorDef,
    library: &'a Arc<OnnxifiLibrary>,
    cache: &'a Arc<BackendGraphCache>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        def: &'a OperatorDef,
        library: &'a Arc<OnnxifiLibrary>,
        cache: &'a Arc<BackendGraphCache>,
    ) -> Self {
        Self {
            def,
            library,
            cache,
        }
    }

    pub fn build(&self, store: &dyn TensorStore) -> Result<BuiltGraph> {
        let model = self.def.bytes(args::ONNX_MODEL)?;
        if model.is_empty() {
            return Err(OpError::EmptyModel);
        }
        let properties = build_property_list(self.def)?;

        // The net may have been rewritten, so weights are looked up under their mapped names.
        let mapping = InitializerMapping::parse(&self.def.repeated_strs(args::INITIALIZERS)?)?;
        let initializers = store.initializer_descriptors(&mapping)?;

        let key = cache_key(self.def)?;
        let backend_index = self.def.single_int(args::BACKEND_ID, 0)?;
        let recipe = GraphRecipe {
            backend_index,
            properties: &properties,
            model: &model,
            initializers: &initializers,
        };
        let lease = self
            .cache
            .get_or_create(&key, || create_backend_graph(self.library, &recipe))?;

        let run_with_fence = resolve_run_with_fence(self.library, lease.backend_id());
        debug!(
            key = %key,
            fenced = run_with_fence.is_some(),
            shared = self.cache.ref_count(&key),
            "bound ONNXIFI backend graph"
        );

        Ok(BuiltGraph {
            lease,
            run_with_fence,
            initializer_names: initializers.names.clone(),
            initializer_shapes: initializers.shapes.clone(),
        })
    }
}

/// Declared ONNX-side input/output names, checked against the operator's arity.
pub fn io_names(def: &OperatorDef) -> Result<(Vec<String>, Vec<String>)> {
    let input_names = def.repeated_strs(args::INPUT_NAMES)?;
    let output_names = def.repeated_strs(args::OUTPUT_NAMES)?;
    if input_names.len() != def.inputs.len() {
        return Err(OpError::InputArity {
            names: input_names.len(),
            arity: def.inputs.len(),
        });
    }
    if output_names.len() != def.outputs.len() {
        return Err(OpError::OutputArity {
            names: output_names.len(),
            arity: def.outputs.len(),
        });
    }
    Ok((input_names, output_names))
}

/// `<model_id>:<net_pos>`: one compiled-subgraph occurrence.
pub fn cache_key(def: &OperatorDef) -> Result<String> {
    Ok(format!(
        "{}:{}",
        def.single_str(args::MODEL_ID, "")?,
        def.single_str(args::NET_POS, "")?
    ))
}

/// Backend-selection properties from `custom_<key>` arguments; none means the NONE marker only.
pub fn build_property_list(def: &OperatorDef) -> Result<PropertyList> {
    let mut properties = PropertyList::none();
    for (name, value) in &def.args {
        let Some(raw_key) = name.strip_prefix(args::CUSTOM_PREFIX) else {
            continue;
        };
        let key: u64 = raw_key
            .parse()
            .ok()
            .filter(|key| *key != 0)
            .ok_or_else(|| OpError::invalid_argument(name, "backend property key must be a non-zero integer"))?;
        let property = match value {
            Argument::Int(value) => BackendProperty::Int { key, value: *value },
            Argument::Float(value) => BackendProperty::Float { key, value: *value },
            other => {
                return Err(OpError::invalid_argument(
                    name,
                    format!("backend property must be an int or float, got {other:?}"),
                ))
            }
        };
        properties.push(property);
    }
    Ok(properties)
}

fn resolve_run_with_fence(
    library: &OnnxifiLibrary,
    backend_id: BackendIdHandle,
) -> Option<SetIoAndRunGraphFn> {
    let name = CString::new(SET_IO_AND_RUN_GRAPH_EXTENSION).ok()?;
    let function = library.extension_function(backend_id, &name)?;
    // SAFETY: The extension is published under this name with the SetIoAndRunGraphFn signature.
    Some(unsafe {
        std::mem::transmute::<ExtensionFunctionPointer, SetIoAndRunGraphFn>(function)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_mismatch_is_reported() {
        let def = OperatorDef::new("op")
            .input("a")
            .input("b")
            .output("c")
            .arg(args::INPUT_NAMES, vec!["x"])
            .arg(args::OUTPUT_NAMES, vec!["z"]);
        assert!(matches!(
            io_names(&def),
            Err(OpError::InputArity { names: 1, arity: 2 })
        ));
    }

    #[test]
    fn cache_key_joins_model_and_position() {
        let def = OperatorDef::new("op")
            .arg(args::MODEL_ID, "resnet")
            .arg(args::NET_POS, "3");
        assert_eq!(cache_key(&def).unwrap(), "resnet:3");
    }

    #[test]
    fn custom_arguments_become_typed_properties() {
        let def = OperatorDef::new("op")
            .arg("custom_5", 4i64)
            .arg("custom_6", 1.5f64)
            .arg("unrelated", 9i64);
        let list = build_property_list(&def).unwrap();
        assert_eq!(
            list.properties(),
            &[
                BackendProperty::Int { key: 5, value: 4 },
                BackendProperty::Float { key: 6, value: 1.5 },
            ]
        );
        assert!(build_property_list(&OperatorDef::new("op")).unwrap().is_empty());
    }

    #[test]
    fn non_numeric_property_key_is_rejected() {
        let def = OperatorDef::new("op").arg("custom_threads", 4i64);
        assert!(matches!(
            build_property_list(&def),
            Err(OpError::InvalidArgument { .. })
        ));
    }
}
