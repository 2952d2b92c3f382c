mod common;

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use graphport_backend_ref::{journal, AbiCall, FENCED_BACKEND, SYNC_BACKEND};
use graphport_core::abi::{OnnxBackendId, OnnxStatus, ONNXIFI_STATUS_SUCCESS};
use graphport_core::OnnxifiLibrary;
use graphport_runtime::{args, OnnxifiOp, OpError, Workspace};

use common::{add_def, add_workspace, cache, expected_sum, library};

#[test]
fn same_key_shares_one_backend_graph() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();

    let first = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;
    let second = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;

    assert!(first.shares_backend_graph_with(&second));
    assert_eq!(first.cache_key(), "add-model:0");
    assert_eq!(cache.ref_count("add-model:0"), 2);

    let calls = journal::take();
    assert_eq!(calls.iter().filter(|c| c.is_init_backend()).count(), 1);
    assert_eq!(calls.iter().filter(|c| c.is_init_graph()).count(), 1);
    Ok(())
}

#[test]
fn different_positions_get_separate_graphs() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();

    let first = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;
    let second = OnnxifiOp::new(&add_def(SYNC_BACKEND, "1"), &ws, lib.clone(), cache.clone())?;

    assert!(!first.shares_backend_graph_with(&second));
    assert_eq!(cache.len(), 2);
    Ok(())
}

#[test]
fn dropping_one_sharer_keeps_the_graph_alive() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let mut ws = add_workspace();

    let first = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;
    let mut second = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;
    journal::take();

    drop(first);
    assert!(journal::take()
        .iter()
        .all(|c| !matches!(c, AbiCall::ReleaseGraph { .. })));
    assert_eq!(cache.ref_count("add-model:0"), 1);

    second.run(&mut ws)?;
    assert_eq!(ws.get("c").and_then(|t| t.to_f32()), Some(expected_sum()));
    Ok(())
}

#[test]
fn last_release_tears_down_graph_then_backend_then_id() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();

    let op = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;
    let graph = op.backend_graph().graph().addr();
    let backend = op.backend_graph().backend().addr();
    let id = op.backend_graph().backend_id().addr();
    journal::take();

    drop(op);
    assert!(cache.is_empty());
    assert_eq!(
        journal::take(),
        vec![
            AbiCall::ReleaseGraph { graph },
            AbiCall::ReleaseBackend { backend },
            AbiCall::ReleaseBackendId { id },
        ]
    );
    Ok(())
}

#[test]
fn key_is_rebuilt_after_last_release() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();

    drop(OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?);
    journal::take();

    let _again = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;
    let calls = journal::take();
    assert_eq!(calls.iter().filter(|c| c.is_init_graph()).count(), 1);
    assert_eq!(cache.ref_count("add-model:0"), 1);
    Ok(())
}

#[test]
fn unselected_backend_ids_are_released_at_creation() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();

    let op = OnnxifiOp::new(&add_def(FENCED_BACKEND, "0"), &ws, lib.clone(), cache.clone())?;
    let kept = op.backend_graph().backend_id().addr();
    assert_eq!(op.backend_graph().backend_index(), 1);

    let released: Vec<usize> = journal::take()
        .into_iter()
        .filter_map(|c| match c {
            AbiCall::ReleaseBackendId { id } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(released.len(), 1);
    assert_ne!(released[0], kept);
    Ok(())
}

#[test]
fn out_of_range_backend_index_fails_before_init() {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();

    for index in [2, -1] {
        let err = OnnxifiOp::new(&add_def(index, "0"), &ws, lib.clone(), cache.clone())
            .err()
            .expect("index is out of range");
        assert!(matches!(
            err,
            OpError::BackendIndexOutOfRange { index: i, count: 2 } if i == index
        ));
    }
    assert!(journal::take().iter().all(|c| !c.is_init_backend()));
    assert!(cache.is_empty());
}

/// Enumeration that succeeds with zero backends.
unsafe extern "C" fn no_backends(_ids: *mut OnnxBackendId, num_backends: *mut usize) -> OnnxStatus {
    unsafe { *num_backends = 0 };
    ONNXIFI_STATUS_SUCCESS
}

#[test]
fn empty_library_fails_before_init() {
    let mut fns = *graphport_backend_ref::library().fns();
    fns.get_backend_ids = no_backends;
    let lib = Arc::new(OnnxifiLibrary::from_fns("empty", fns));
    let (cache, ws) = (cache(), add_workspace());
    journal::take();

    let err = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &ws, lib, cache.clone()).err();
    assert!(matches!(err, Some(OpError::NoBackends)));
    assert!(journal::take().is_empty());
    assert!(cache.is_empty());
}

#[test]
fn odd_initializer_list_fails_without_native_calls() {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();
    let def = add_def(SYNC_BACKEND, "0").arg(args::INITIALIZERS, vec!["w", "w_0", "dangling"]);

    let err = OnnxifiOp::new(&def, &ws, lib, cache.clone())
        .err()
        .expect("odd initializers are rejected");
    assert!(matches!(err, OpError::OddInitializers(3)));
    assert!(journal::take().is_empty());
    assert!(cache.is_empty());
}

#[test]
fn arity_and_model_checks_precede_backend_work() {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();

    let def = add_def(SYNC_BACKEND, "0").arg(args::OUTPUT_NAMES, vec!["z", "extra"]);
    let err = OnnxifiOp::new(&def, &ws, lib.clone(), cache.clone()).err();
    assert!(matches!(err, Some(OpError::OutputArity { names: 2, arity: 1 })));

    let def = add_def(SYNC_BACKEND, "0").arg(args::ONNX_MODEL, Bytes::new());
    let err = OnnxifiOp::new(&def, &ws, lib, cache).err();
    assert!(matches!(err, Some(OpError::EmptyModel)));

    assert!(journal::take().is_empty());
}

#[test]
fn initializers_are_handed_over_under_original_names() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let mut ws = Workspace::new();
    ws.insert("a", graphport_core::HostTensor::from_f32(&[3], &[1.0, 2.0, 3.0])?);
    ws.insert("bias_renamed", graphport_core::HostTensor::from_f32(&[3], &[0.5, 0.5, 0.5])?);
    ws.insert("c", graphport_core::HostTensor::from_f32(&[3], &[0.0; 3])?);

    let def = graphport_runtime::OperatorDef::new("onnxifi_bias")
        .input("a")
        .output("c")
        .arg(args::ONNX_MODEL, Bytes::from_static(b"z = add x bias"))
        .arg(args::INPUT_NAMES, vec!["x"])
        .arg(args::OUTPUT_NAMES, vec!["z"])
        .arg(args::INITIALIZERS, vec!["bias", "bias_renamed"])
        .arg(args::MODEL_ID, "bias-model")
        .arg(args::NET_POS, "0");

    let mut op = OnnxifiOp::new(&def, &ws, lib, cache)?;
    assert_eq!(op.initializer_names(), &["bias".to_string()]);
    assert_eq!(op.initializer_shapes()[0].dims(), &[3]);
    assert!(journal::take().iter().any(|c| matches!(
        c,
        AbiCall::InitGraph { weights, .. } if weights == &vec!["bias".to_string()]
    )));

    op.run(&mut ws)?;
    assert_eq!(ws.get("c").and_then(|t| t.to_f32()), Some(vec![1.5, 2.5, 3.5]));
    Ok(())
}

#[test]
fn custom_arguments_reach_init_backend() -> Result<()> {
    let (lib, cache) = (library(), cache());
    let ws = add_workspace();
    let def = add_def(SYNC_BACKEND, "0")
        .arg("custom_17", 3i64)
        .arg("custom_18", 0.25f64);

    let _op = OnnxifiOp::new(&def, &ws, lib, cache)?;
    let properties = journal::take().into_iter().find_map(|c| match c {
        AbiCall::InitBackend { properties, .. } => Some(properties),
        _ => None,
    });
    assert_eq!(properties, Some(vec![(17, 3), (18, 0.25f64.to_bits())]));
    Ok(())
}
