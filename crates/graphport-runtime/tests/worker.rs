mod common;

use anyhow::Result;
use graphport_backend_ref::{FENCED_BACKEND, SYNC_BACKEND};
use graphport_core::HostTensor;
use graphport_runtime::{OnnxifiOp, RunJob, Worker};
use tokio::sync::{mpsc, oneshot};

use common::{add_def, add_workspace, cache, expected_sum, library, ramp};

#[tokio::test(flavor = "multi_thread")]
async fn replicas_share_a_graph_and_answer_jobs() -> Result<()> {
    for backend in [SYNC_BACKEND, FENCED_BACKEND] {
        let (lib, cache) = (library(), cache());
        let def = add_def(backend, "0");

        let mut senders = Vec::new();
        let mut handles = Vec::new();
        for id in 0..2u32 {
            let workspace = add_workspace();
            let op = OnnxifiOp::new(&def, &workspace, lib.clone(), cache.clone())?;
            let (tx, inbox) = mpsc::channel::<RunJob>(8);
            senders.push(tx);
            handles.push(tokio::spawn(
                Worker {
                    id,
                    inbox,
                    op,
                    workspace,
                }
                .run(),
            ));
        }
        assert_eq!(cache.ref_count("add-model:0"), 2);

        for (i, tx) in senders.iter().cycle().take(6).enumerate() {
            let (resp_tx, resp_rx) = oneshot::channel();
            let inputs = vec![
                ("a".to_string(), HostTensor::from_f32(&[10], &ramp(10, 1.0))?),
                ("b".to_string(), HostTensor::from_f32(&[10], &ramp(10, 0.5))?),
            ];
            tx.send(RunJob { inputs, resp_tx }).await?;
            let outputs = resp_rx.await?.map_err(anyhow::Error::msg)?;
            assert_eq!(outputs.len(), 1, "job {i}");
            assert_eq!(outputs[0].0, "c");
            assert_eq!(outputs[0].1.to_f32(), Some(expected_sum()));
        }

        drop(senders);
        for handle in handles {
            handle.await??;
        }
        assert!(cache.is_empty());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_job_reports_error_and_worker_continues() -> Result<()> {
    let workspace = add_workspace();
    let op = OnnxifiOp::new(&add_def(SYNC_BACKEND, "0"), &workspace, library(), cache())?;
    let (tx, inbox) = mpsc::channel::<RunJob>(2);
    let handle = tokio::spawn(
        Worker {
            id: 0,
            inbox,
            op,
            workspace,
        }
        .run(),
    );

    let (resp_tx, resp_rx) = oneshot::channel();
    let inputs = vec![("b".to_string(), HostTensor::from_f32(&[3], &[1.0; 3])?)];
    tx.send(RunJob { inputs, resp_tx }).await?;
    let err = resp_rx.await?.expect_err("shape mismatch");
    assert!(err.contains("MISMATCHING_SHAPE"), "{err}");

    let (resp_tx, resp_rx) = oneshot::channel();
    let inputs = vec![("b".to_string(), HostTensor::from_f32(&[10], &ramp(10, 0.5))?)];
    tx.send(RunJob { inputs, resp_tx }).await?;
    let outputs = resp_rx.await?.map_err(anyhow::Error::msg)?;
    assert_eq!(outputs[0].1.to_f32(), Some(expected_sum()));

    drop(tx);
    handle.await??;
    Ok(())
}
