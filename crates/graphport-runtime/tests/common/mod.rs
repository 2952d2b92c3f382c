#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use graphport_core::{HostTensor, OnnxifiLibrary};
use graphport_runtime::{args, BackendGraphCache, OperatorDef, Workspace};

pub const ADD_MODEL: &[u8] = b"# z = x + y\nz = add x y\n";

pub fn library() -> Arc<OnnxifiLibrary> {
    Arc::new(graphport_backend_ref::library())
}

pub fn cache() -> Arc<BackendGraphCache> {
    Arc::new(BackendGraphCache::new())
}

/// `c = a + b` on the operator side, `z = x + y` inside the delegated graph.
pub fn add_def(backend: i64, net_pos: &str) -> OperatorDef {
    OperatorDef::new("onnxifi_add")
        .input("a")
        .input("b")
        .output("c")
        .arg(args::ONNX_MODEL, Bytes::from_static(ADD_MODEL))
        .arg(args::INPUT_NAMES, vec!["x", "y"])
        .arg(args::OUTPUT_NAMES, vec!["z"])
        .arg(args::MODEL_ID, "add-model")
        .arg(args::NET_POS, net_pos)
        .arg(args::BACKEND_ID, backend)
}

pub fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| i as f32 * scale).collect()
}

/// Inputs `a`, `b` of ten elements and a pre-sized output `c`.
pub fn add_workspace() -> Workspace {
    let mut ws = Workspace::new();
    ws.insert("a", HostTensor::from_f32(&[10], &ramp(10, 1.0)).expect("ten values"));
    ws.insert("b", HostTensor::from_f32(&[10], &ramp(10, 0.5)).expect("ten values"));
    ws.insert("c", HostTensor::from_f32(&[10], &[0.0; 10]).expect("ten values"));
    ws
}

pub fn expected_sum() -> Vec<f32> {
    ramp(10, 1.5)
}
