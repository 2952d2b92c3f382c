use std::ffi::CString;

use anyhow::Result;
use graphport_backend_ref::{journal, library, open_events, AbiCall};
use graphport_core::abi::{
    OnnxMemoryFenceV1, SetIoAndRunGraphFn, ONNXIFI_STATUS_MISMATCHING_SHAPE,
    SET_IO_AND_RUN_GRAPH_EXTENSION,
};
use graphport_core::{EventHandle, HostTensor, Shape, Status, TensorDescriptor};

fn f32_descriptor(name: &str, tensor: &mut HostTensor) -> Result<TensorDescriptor> {
    let mut desc = TensorDescriptor::new(name)?;
    desc.dims = tensor.shape().clone();
    desc.buffer = tensor.as_mut_ptr() as u64;
    Ok(desc)
}

#[test]
fn enumerates_two_backends() -> Result<()> {
    let lib = library();
    let count = lib.backend_count()?;
    assert_eq!(count, 2);

    let ids = lib.backend_ids(count)?;
    assert_eq!(lib.backend_name(ids[0])?, "ref-sync");
    assert_eq!(lib.backend_name(ids[1])?, "ref-fenced");
    assert!(!lib.backend_capabilities(ids[0])?.thread_safe);
    assert!(lib.backend_capabilities(ids[1])?.thread_safe);

    let ext = CString::new(SET_IO_AND_RUN_GRAPH_EXTENSION)?;
    assert!(lib.extension_function(ids[0], &ext).is_none());
    assert!(lib.extension_function(ids[1], &ext).is_some());

    for id in ids {
        lib.release_backend_id(id)?;
    }
    let calls = journal::take();
    assert_eq!(calls[0], AbiCall::GetBackendIds { filled: false });
    assert_eq!(calls[1], AbiCall::GetBackendIds { filled: true });
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, AbiCall::ReleaseBackendId { .. }))
            .count(),
        2
    );
    Ok(())
}

#[test]
fn runs_plain_path_with_events() -> Result<()> {
    let lib = library();
    let ids = lib.backend_ids(lib.backend_count()?)?;
    let backend = lib.init_backend(ids[0], &[7, 42, 0])?;

    let mut w = HostTensor::from_f32(&[3], &[10.0, 20.0, 30.0])?;
    let weight = f32_descriptor("w", &mut w)?;
    // SAFETY: `w` outlives the call.
    let graph = unsafe { lib.init_graph(backend, b"z = add x w\n", &[weight.as_raw()])? };

    let mut x = HostTensor::from_f32(&[3], &[1.0, 2.0, 3.0])?;
    let mut z = HostTensor::zeros(graphport_core::DataType::F32, Shape::from_slice(&[3]))?;
    let input = f32_descriptor("x", &mut x)?;
    let output = f32_descriptor("z", &mut z)?;

    let input_event = lib.init_event(backend)?;
    let mut input_fence = OnnxMemoryFenceV1::event_fence();
    input_fence.event = input_event.as_raw();
    let mut output_fence = OnnxMemoryFenceV1::event_fence();
    // SAFETY: `x` and `z` stay alive until the output event is waited on.
    unsafe {
        lib.set_graph_io(graph, &[input.as_raw()], &[output.as_raw()])?;
        lib.run_graph(graph, &input_fence, &mut output_fence)?;
    }
    lib.signal_event(input_event)?;
    let output_event = EventHandle::from_raw(output_fence.event);
    lib.wait_event(output_event)?;
    lib.release_event(output_event)?;
    lib.release_event(input_event)?;

    assert_eq!(z.to_f32(), Some(vec![11.0, 22.0, 33.0]));

    lib.release_graph(graph)?;
    lib.release_backend(backend)?;
    for id in ids {
        lib.release_backend_id(id)?;
    }

    let calls = journal::take();
    let init = calls.iter().find(|c| c.is_init_backend());
    assert!(matches!(
        init,
        Some(AbiCall::InitBackend { properties, .. }) if properties == &vec![(7, 42)]
    ));
    assert!(calls.contains(&AbiCall::InitGraph {
        backend: backend.addr(),
        graph: graph.addr(),
        weights: vec!["w".to_string()],
    }));
    Ok(())
}

#[test]
fn fenced_extension_reports_shape_mismatch() -> Result<()> {
    let lib = library();
    let ids = lib.backend_ids(lib.backend_count()?)?;
    let backend = lib.init_backend(ids[1], &[0])?;
    // SAFETY: No weights.
    let graph = unsafe { lib.init_graph(backend, b"z = relu x", &[])? };

    let ext = CString::new(SET_IO_AND_RUN_GRAPH_EXTENSION)?;
    let raw = lib.extension_function(ids[1], &ext).expect("fenced backend exports extension");
    // SAFETY: The reference backend hands out this exact signature.
    let run: SetIoAndRunGraphFn = unsafe { std::mem::transmute(raw) };

    let mut x = HostTensor::from_f32(&[4], &[-1.0, 2.0, -3.0, 4.0])?;
    let mut z = HostTensor::zeros(graphport_core::DataType::F32, Shape::from_slice(&[2]))?;
    let input = f32_descriptor("x", &mut x)?;
    let output = f32_descriptor("z", &mut z)?;
    let inputs = [input.as_raw()];
    let outputs = [output.as_raw()];
    let mut fence = OnnxMemoryFenceV1::event_fence();
    // SAFETY: Descriptor arrays and buffers outlive the call.
    let status = unsafe {
        run(
            graph.as_raw(),
            1,
            inputs.as_ptr(),
            1,
            outputs.as_ptr(),
            &mut fence,
        )
    };
    assert_eq!(status, ONNXIFI_STATUS_MISMATCHING_SHAPE);
    assert!(!fence.event.is_null());
    assert_eq!(open_events(), 1);
    let event = EventHandle::from_raw(fence.event);
    let waited = lib.wait_event(event).unwrap_err();
    assert_eq!(waited.status, Status(ONNXIFI_STATUS_MISMATCHING_SHAPE));
    lib.release_event(event)?;
    assert_eq!(open_events(), 0);

    lib.release_graph(graph)?;
    lib.release_backend(backend)?;
    for id in ids {
        lib.release_backend_id(id)?;
    }
    Ok(())
}
