use anyhow::{Context, Result};
use graphport_core::HostTensor;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::op::OnnxifiOp;
use crate::store::Workspace;

pub type NamedTensors = Vec<(String, HostTensor)>;

#[derive(Debug)]
pub struct RunJob {
    pub inputs: NamedTensors,
    pub resp_tx: oneshot::Sender<Result<NamedTensors, String>>,
}

/// Drives one operator replica; replicas built from the same definition share a backend graph.
pub struct Worker {
    pub id: u32,
    pub inbox: mpsc::Receiver<RunJob>,
    pub op: OnnxifiOp,
    pub workspace: Workspace,
}

impl Worker {
    pub async fn run(mut self) -> Result<()> {
        info!(worker_id = self.id, key = self.op.cache_key(), "worker started");
        while let Some(job) = self.inbox.recv().await {
            // Backend calls block until the fence signals.
            let result = tokio::task::block_in_place(|| self.run_job(job.inputs));
            if let Err(err) = &result {
                error!(worker_id = self.id, error = ?err, "onnxifi run failed");
            }
            let _ = job.resp_tx.send(result.map_err(|err| format!("{err:#}")));
        }
        info!(worker_id = self.id, "worker stopped");
        Ok(())
    }

    fn run_job(&mut self, inputs: NamedTensors) -> Result<NamedTensors> {
        for (name, tensor) in inputs {
            self.workspace.insert(name, tensor);
        }
        self.op
            .run(&mut self.workspace)
            .with_context(|| format!("running {}", self.op.name()))?;

        self.op
            .output_tensors()
            .iter()
            .map(|name| {
                let tensor = self
                    .workspace
                    .get(name)
                    .with_context(|| format!("output {name} missing after run"))?;
                Ok((name.clone(), tensor.clone()))
            })
            .collect()
    }
}
